//! Decoding images for display.
//!
//! The terminal only accepts PNG, so every image is decoded and re-encoded.
//! Very large images are downscaled for upload; the viewport keeps working in
//! natural pixels and the renderer scales source rectangles by
//! [`DisplayImage::upload_scale`].

use std::io::Cursor;
use std::path::{Path, PathBuf};

use anyhow::Context;
use image::ImageFormat;
use image::imageops::FilterType;
use log::debug;

pub struct DisplayImage {
    pub path: PathBuf,
    pub natural_width: u32,
    pub natural_height: u32,
    pub upload_width: u32,
    pub upload_height: u32,
    pub png: Vec<u8>,
}

impl DisplayImage {
    /// Uploaded pixels per natural pixel (≤ 1).
    pub fn upload_scale(&self) -> f64 {
        if self.natural_width == 0 {
            return 1.0;
        }
        self.upload_width as f64 / self.natural_width as f64
    }
}

pub fn load(path: &Path, max_upload_px: u32) -> anyhow::Result<DisplayImage> {
    let img = image::ImageReader::open(path)
        .with_context(|| format!("failed to open {}", path.display()))?
        .with_guessed_format()
        .with_context(|| format!("failed to read {}", path.display()))?
        .decode()
        .with_context(|| format!("failed to decode {}", path.display()))?;
    let (natural_width, natural_height) = (img.width(), img.height());

    let upload = if natural_width.max(natural_height) > max_upload_px {
        debug!(
            "picture: downscaling {natural_width}x{natural_height} to fit {max_upload_px}px for upload"
        );
        img.resize(max_upload_px, max_upload_px, FilterType::Triangle)
    } else {
        img
    };

    let mut png = Vec::new();
    upload
        .write_to(&mut Cursor::new(&mut png), ImageFormat::Png)
        .context("failed to encode PNG")?;
    debug!(
        "picture: {} {natural_width}x{natural_height}, upload {}x{} ({} bytes)",
        path.display(),
        upload.width(),
        upload.height(),
        png.len()
    );

    Ok(DisplayImage {
        path: path.to_path_buf(),
        natural_width,
        natural_height,
        upload_width: upload.width(),
        upload_height: upload.height(),
        png,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn write_png(dir: &Path, w: u32, h: u32) -> PathBuf {
        let path = dir.join("img.png");
        image::RgbImage::new(w, h).save(&path).unwrap();
        path
    }

    #[test]
    fn small_image_is_uploaded_as_is() {
        let dir = tempfile::tempdir().unwrap();
        let img = load(&write_png(dir.path(), 20, 10), 4096).unwrap();
        assert_eq!((img.natural_width, img.natural_height), (20, 10));
        assert_eq!((img.upload_width, img.upload_height), (20, 10));
        assert_eq!(img.upload_scale(), 1.0);
        assert_eq!(&img.png[..8], b"\x89PNG\r\n\x1a\n");
    }

    #[test]
    fn large_image_is_downscaled_for_upload() {
        let dir = tempfile::tempdir().unwrap();
        let img = load(&write_png(dir.path(), 200, 100), 50).unwrap();
        assert_eq!((img.natural_width, img.natural_height), (200, 100));
        assert_eq!(img.upload_width, 50);
        assert_eq!(img.upload_height, 25);
        assert!((img.upload_scale() - 0.25).abs() < 1e-9);
    }

    #[test]
    fn garbage_fails_to_decode() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("bad.jpg");
        std::fs::write(&path, b"not an image").unwrap();
        assert!(load(&path, 4096).is_err());
    }
}
