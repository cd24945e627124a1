//! View synchronization between the master window and its secondary.
//!
//! A window publishes its pan/zoom as a [`SyncMessage`] whose scroll position
//! is a fraction of the scrollable extent, so two renditions of the same scene
//! at different resolutions line up by relative position.
//!
//! Transport: each instance binds `<state_dir>/sync-<role>.sock` (Unix
//! datagram, non-blocking). [`PairRelay`] forwards a message from one role to
//! the sink attached for the other role; there is exactly one counterpart.

use std::fmt;
use std::io;
use std::os::unix::net::UnixDatagram;
use std::path::{Path, PathBuf};

use log::{debug, warn};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Role {
    Master,
    Secondary,
}

impl Role {
    pub fn counterpart(self) -> Role {
        match self {
            Role::Master => Role::Secondary,
            Role::Secondary => Role::Master,
        }
    }

    pub fn name(self) -> &'static str {
        match self {
            Role::Master => "master",
            Role::Secondary => "secondary",
        }
    }
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Pan/zoom state exchanged between the two windows.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct SyncMessage {
    pub zoom: f64,
    /// Horizontal scroll as a fraction of the scaled image width.
    pub x: f64,
    /// Vertical scroll as a fraction of the scaled image height.
    pub y: f64,
    pub origin: Role,
}

/// Messages between a window's controller and its renderer.
#[derive(Debug, Clone, PartialEq)]
pub enum WindowMessage {
    /// The image finished loading or redisplaying.
    ViewChanged,
    ApplyView(SyncMessage),
    /// `None` shows the default "waiting for conversion" text.
    ShowWaitOverlay(Option<String>),
    HideWaitOverlay,
}

/// Per-window gate deciding whether sync may flow in or out.
#[derive(Debug, Clone)]
pub struct SyncGate {
    role: Role,
    detached: bool,
    suppressed: bool,
}

impl SyncGate {
    pub fn new(role: Role) -> Self {
        Self {
            role,
            detached: false,
            suppressed: false,
        }
    }

    pub fn role(&self) -> Role {
        self.role
    }

    pub fn is_detached(&self) -> bool {
        self.detached
    }

    pub fn allows_inbound(&self) -> bool {
        !(self.role == Role::Secondary && self.detached)
    }

    pub fn allows_outbound(&self) -> bool {
        self.allows_inbound() && !self.suppressed
    }

    /// Flip the detach flag. Only a secondary can detach; returns the new
    /// state, or `None` on the master.
    pub fn toggle_detach(&mut self) -> Option<bool> {
        if self.role != Role::Secondary {
            return None;
        }
        self.detached = !self.detached;
        debug!("sync: detached={}", self.detached);
        Some(self.detached)
    }

    /// Held while an inbound message is applied, so the resulting local view
    /// change is not echoed back.
    pub(crate) fn suppress(&mut self) {
        self.suppressed = true;
    }

    pub(crate) fn release(&mut self) {
        self.suppressed = false;
    }
}

/// Destination for relayed messages.
pub trait SyncSink {
    fn deliver(&self, msg: &SyncMessage) -> io::Result<()>;
}

impl SyncSink for std::sync::mpsc::Sender<SyncMessage> {
    fn deliver(&self, msg: &SyncMessage) -> io::Result<()> {
        self.send(*msg)
            .map_err(|e| io::Error::new(io::ErrorKind::BrokenPipe, e.to_string()))
    }
}

/// Pass-through relay keyed by sender identity.
#[derive(Default)]
pub struct PairRelay {
    master: Option<Box<dyn SyncSink>>,
    secondary: Option<Box<dyn SyncSink>>,
}

impl PairRelay {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn attach(&mut self, role: Role, sink: Box<dyn SyncSink>) {
        *self.slot(role) = Some(sink);
    }

    pub fn detach(&mut self, role: Role) {
        *self.slot(role) = None;
    }

    /// Forward `msg` from `sender` to the other window. Returns whether it was
    /// handed to a sink.
    pub fn relay(&self, sender: Role, msg: &SyncMessage) -> bool {
        let target = match sender.counterpart() {
            Role::Master => &self.master,
            Role::Secondary => &self.secondary,
        };
        let Some(sink) = target else {
            return false;
        };
        match sink.deliver(msg) {
            Ok(()) => true,
            Err(e) => {
                // The other window may simply not exist yet.
                debug!("sync: relay {sender} -> {} failed: {e}", sender.counterpart());
                false
            }
        }
    }

    fn slot(&mut self, role: Role) -> &mut Option<Box<dyn SyncSink>> {
        match role {
            Role::Master => &mut self.master,
            Role::Secondary => &mut self.secondary,
        }
    }
}

pub fn encode(msg: &SyncMessage) -> Vec<u8> {
    // Encoding a struct of plain floats into a Vec cannot fail.
    bincode::serde::encode_to_vec(msg, bincode::config::standard()).unwrap_or_default()
}

pub fn decode(bytes: &[u8]) -> Option<SyncMessage> {
    bincode::serde::decode_from_slice(bytes, bincode::config::standard())
        .ok()
        .map(|(msg, _)| msg)
}

pub fn socket_path(dir: &Path, role: Role) -> PathBuf {
    dir.join(format!("sync-{}.sock", role.name()))
}

/// This window's receiving end.
pub struct SyncSocket {
    socket: UnixDatagram,
    path: PathBuf,
}

impl SyncSocket {
    /// Bind the socket for `role`, replacing a stale one left by a previous
    /// instance.
    pub fn bind(dir: &Path, role: Role) -> io::Result<Self> {
        std::fs::create_dir_all(dir)?;
        let path = socket_path(dir, role);
        match std::fs::remove_file(&path) {
            Ok(()) => debug!("sync: removed stale socket {}", path.display()),
            Err(e) if e.kind() == io::ErrorKind::NotFound => {}
            Err(e) => return Err(e),
        }
        let socket = UnixDatagram::bind(&path)?;
        socket.set_nonblocking(true)?;
        debug!("sync: listening on {}", path.display());
        Ok(Self { socket, path })
    }

    /// Drain every pending message, in receipt order. Non-blocking.
    pub fn drain(&self) -> Vec<SyncMessage> {
        let mut messages = Vec::new();
        let mut buf = [0u8; 256];
        loop {
            match self.socket.recv(&mut buf) {
                Ok(n) => match decode(&buf[..n]) {
                    Some(msg) => messages.push(msg),
                    None => warn!("sync: dropping malformed datagram ({n} bytes)"),
                },
                Err(e) if e.kind() == io::ErrorKind::WouldBlock => break,
                Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
                Err(e) => {
                    warn!("sync: recv failed: {e}");
                    break;
                }
            }
        }
        messages
    }
}

impl Drop for SyncSocket {
    fn drop(&mut self) {
        let _ = std::fs::remove_file(&self.path);
    }
}

/// Sending end addressed at the counterpart's socket file.
pub struct PeerSocket {
    socket: UnixDatagram,
    path: PathBuf,
}

impl PeerSocket {
    pub fn new(dir: &Path, role: Role) -> io::Result<Self> {
        Ok(Self {
            socket: UnixDatagram::unbound()?,
            path: socket_path(dir, role),
        })
    }
}

impl SyncSink for PeerSocket {
    fn deliver(&self, msg: &SyncMessage) -> io::Result<()> {
        self.socket.send_to(&encode(msg), &self.path).map(|_| ())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::mpsc;

    fn msg(origin: Role) -> SyncMessage {
        SyncMessage {
            zoom: 1.5,
            x: 0.25,
            y: 0.75,
            origin,
        }
    }

    #[test]
    fn relay_forwards_to_counterpart_only() {
        let (master_tx, master_rx) = mpsc::channel();
        let (secondary_tx, secondary_rx) = mpsc::channel();
        let mut relay = PairRelay::new();
        relay.attach(Role::Master, Box::new(master_tx));
        relay.attach(Role::Secondary, Box::new(secondary_tx));

        assert!(relay.relay(Role::Master, &msg(Role::Master)));
        assert_eq!(secondary_rx.try_recv().unwrap().origin, Role::Master);
        assert!(master_rx.try_recv().is_err());

        assert!(relay.relay(Role::Secondary, &msg(Role::Secondary)));
        assert_eq!(master_rx.try_recv().unwrap().origin, Role::Secondary);
        assert!(secondary_rx.try_recv().is_err());
    }

    #[test]
    fn relay_without_counterpart_drops() {
        let (tx, _rx) = mpsc::channel();
        let mut relay = PairRelay::new();
        relay.attach(Role::Master, Box::new(tx));
        assert!(!relay.relay(Role::Master, &msg(Role::Master)));
        relay.detach(Role::Master);
        assert!(!relay.relay(Role::Secondary, &msg(Role::Secondary)));
    }

    #[test]
    fn detached_secondary_blocks_both_directions() {
        let mut gate = SyncGate::new(Role::Secondary);
        assert!(gate.allows_inbound() && gate.allows_outbound());
        assert_eq!(gate.toggle_detach(), Some(true));
        assert!(!gate.allows_inbound());
        assert!(!gate.allows_outbound());
        assert_eq!(gate.toggle_detach(), Some(false));
        assert!(gate.allows_outbound());
    }

    #[test]
    fn master_cannot_detach() {
        let mut gate = SyncGate::new(Role::Master);
        assert_eq!(gate.toggle_detach(), None);
        assert!(gate.allows_inbound());
    }

    #[test]
    fn suppression_blocks_outbound_only() {
        let mut gate = SyncGate::new(Role::Master);
        gate.suppress();
        assert!(!gate.allows_outbound());
        assert!(gate.allows_inbound());
        gate.release();
        assert!(gate.allows_outbound());
    }

    #[test]
    fn decode_rejects_garbage() {
        assert_eq!(decode(&encode(&msg(Role::Secondary))), Some(msg(Role::Secondary)));
        assert!(decode(&[0xff]).is_none());
    }

    #[test]
    fn sockets_deliver_in_order() {
        let dir = tempfile::tempdir().unwrap();
        let master = SyncSocket::bind(dir.path(), Role::Master).unwrap();
        let mut relay = PairRelay::new();
        relay.attach(
            Role::Master,
            Box::new(PeerSocket::new(dir.path(), Role::Master).unwrap()),
        );

        for zoom in [1.0, 2.0, 3.0] {
            let m = SyncMessage { zoom, ..msg(Role::Secondary) };
            assert!(relay.relay(Role::Secondary, &m));
        }
        let got: Vec<f64> = master.drain().iter().map(|m| m.zoom).collect();
        assert_eq!(got, vec![1.0, 2.0, 3.0]);
        assert!(master.drain().is_empty());
    }

    #[test]
    fn sending_to_absent_peer_is_not_fatal() {
        let dir = tempfile::tempdir().unwrap();
        let mut relay = PairRelay::new();
        relay.attach(
            Role::Secondary,
            Box::new(PeerSocket::new(dir.path(), Role::Secondary).unwrap()),
        );
        assert!(!relay.relay(Role::Master, &msg(Role::Master)));
    }
}
