use std::cell::RefCell;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::rc::Rc;
use std::sync::mpsc;
use std::time::{Duration, SystemTime};

use pairview::app::{Action, App, AppSettings, Effect, WAIT_TEXT};
use pairview::convert::{ConversionService, ConversionSettings, ConverterBackend, RunningConversion};
use pairview::launcher::{LaunchCommand, ProcessHost, ProcessInfo, SECONDARY_ENV, SecondaryLauncher};
use pairview::status::{InstanceStatus, StatusRecord, StatusStore};
use pairview::sync::{PairRelay, PeerSocket, Role, SyncMessage, SyncSocket, WindowMessage};
use pairview::viewport::{ZoomDirection, ZoomMode};

// ---------------------------------------------------------------------------
// Fakes
// ---------------------------------------------------------------------------

#[derive(Default, Clone)]
struct FakeHost {
    procs: Rc<RefCell<Vec<ProcessInfo>>>,
    spawned: Rc<RefCell<Vec<LaunchCommand>>>,
}

impl ProcessHost for FakeHost {
    fn list(&self) -> io::Result<Vec<ProcessInfo>> {
        Ok(self.procs.borrow().clone())
    }

    fn spawn_detached(&self, cmd: &LaunchCommand) -> io::Result<u32> {
        let pid = 4000 + self.spawned.borrow().len() as u32;
        let mut line = vec![cmd.program.to_string_lossy().into_owned()];
        line.extend(cmd.args.iter().map(|a| a.to_string_lossy().into_owned()));
        self.procs.borrow_mut().push(ProcessInfo {
            pid,
            command_line: line.join(" "),
        });
        self.spawned.borrow_mut().push(cmd.clone());
        Ok(pid)
    }

    fn terminate(&self, pid: u32) -> io::Result<()> {
        self.procs.borrow_mut().retain(|p| p.pid != pid);
        Ok(())
    }
}

/// Exits cleanly on the second poll having written only `flushed` bytes; the
/// rest of the file shows up later, as with converters that exit before
/// their output is on disk.
struct LazyConverter {
    flushed: usize,
}

struct LazyRun {
    output: PathBuf,
    polls: u32,
    flushed: usize,
}

impl RunningConversion for LazyRun {
    fn try_finish(&mut self) -> io::Result<Option<bool>> {
        self.polls += 1;
        if self.polls < 2 {
            return Ok(None);
        }
        fs::write(&self.output, vec![0u8; self.flushed])?;
        Ok(Some(true))
    }
}

impl ConverterBackend for LazyConverter {
    fn start(&self, _source: &Path, output: &Path) -> io::Result<Box<dyn RunningConversion>> {
        Ok(Box::new(LazyRun {
            output: output.to_path_buf(),
            polls: 0,
            flushed: self.flushed,
        }))
    }
}

fn ms(n: u64) -> Duration {
    Duration::from_millis(n)
}

fn make_app(dir: &Path, role: Role, host: &FakeHost, image: Option<PathBuf>) -> App {
    let launcher = SecondaryLauncher::new(
        Box::new(host.clone()),
        PathBuf::from("/usr/local/bin/pairview"),
        Vec::new(),
    );
    let conversion = ConversionService::new(
        Box::new(LazyConverter { flushed: 20 * 1024 }),
        ConversionSettings::new(dir.join("scratch")),
    );
    App::new(
        role,
        AppSettings::default(),
        InstanceStatus::new(StatusStore::new(dir.join(format!("{}.json", role.name())))),
        StatusStore::new(dir.join("original_status.json")),
        launcher,
        conversion,
        image,
    )
}

fn sends(effects: Vec<Effect>) -> Vec<SyncMessage> {
    effects
        .into_iter()
        .filter_map(|e| match e {
            Effect::Send(m) => Some(m),
            _ => None,
        })
        .collect()
}

/// Resize to 500x400 and load a 1000x800 image; returns what it published.
fn show_image(app: &mut App) -> Vec<SyncMessage> {
    let mut out = sends(app.handle_action(
        Action::Resize {
            width: 500.0,
            height: 400.0,
        },
        ms(0),
    ));
    out.extend(sends(app.image_loaded(1000, 800, ms(0))));
    out
}

// ---------------------------------------------------------------------------
// Scenarios
// ---------------------------------------------------------------------------

#[test]
fn test_open_converts_launches_and_syncs() {
    let _ = env_logger::builder().is_test(true).try_init();
    let dir = tempfile::tempdir().unwrap();
    let raw = dir.path().join("a.raw");
    fs::write(&raw, b"raw sensor data").unwrap();
    // Well before anything the converter writes.
    fs::File::options()
        .write(true)
        .open(&raw)
        .unwrap()
        .set_modified(SystemTime::UNIX_EPOCH + Duration::from_secs(1_000_000))
        .unwrap();
    StatusStore::new(dir.path().join("original_status.json"))
        .write(&StatusRecord::source_request(Some(raw.clone()), None))
        .unwrap();

    let host = FakeHost::default();
    let mut master = make_app(dir.path(), Role::Master, &host, None);
    master.start(ms(0));

    // `o`: conversion starts behind the wait overlay.
    master.handle_action(Action::OpenSecondary, ms(0));
    assert!(master.is_converting());
    assert_eq!(master.overlay(), Some(WAIT_TEXT));

    // Converter exits with a 20 KiB file: still not launched.
    master.tick(ms(100));
    master.tick(ms(200));
    master.tick(ms(300));
    assert!(master.is_converting());
    assert!(host.spawned.borrow().is_empty());

    // The rest of the output lands; the next size check launches.
    let output = dir.path().join("scratch").join("a_converted.jpg");
    fs::write(&output, vec![0u8; 60 * 1024]).unwrap();
    master.tick(ms(400));
    assert!(!master.is_converting());
    assert!(master.overlay().is_none());

    let spawned = host.spawned.borrow().clone();
    assert_eq!(spawned.len(), 1);
    assert_eq!(spawned[0].program, "/usr/local/bin/pairview");
    assert_eq!(spawned[0].args, vec!["--secondary".into(), output.clone().into_os_string()]);
    assert!(spawned[0].env.contains(&(SECONDARY_ENV.to_string(), "1".to_string())));

    // Second `o` with the secondary still alive: no conversion, no new window.
    master.handle_action(Action::OpenSecondary, ms(500));
    assert!(!master.is_converting());
    assert_eq!(host.spawned.borrow().len(), 1);

    // The launched secondary shows the converted file and drives the master.
    let mut secondary = make_app(dir.path(), Role::Secondary, &host, Some(output.clone()));
    let (master_tx, master_rx) = mpsc::channel();
    let (secondary_tx, secondary_rx) = mpsc::channel();
    let mut relay = PairRelay::new();
    relay.attach(Role::Master, Box::new(master_tx));
    relay.attach(Role::Secondary, Box::new(secondary_tx));

    for msg in show_image(&mut master) {
        relay.relay(Role::Master, &msg);
    }
    assert_eq!(
        secondary.start(ms(0)),
        vec![Effect::Reload(output.clone())]
    );
    for msg in show_image(&mut secondary) {
        relay.relay(Role::Secondary, &msg);
    }
    while let Ok(msg) = secondary_rx.try_recv() {
        secondary.handle_message(WindowMessage::ApplyView(msg), ms(0));
    }
    while let Ok(msg) = master_rx.try_recv() {
        assert!(sends(master.handle_message(WindowMessage::ApplyView(msg), ms(0))).is_empty());
    }

    for msg in sends(secondary.handle_action(Action::Zoom(ZoomDirection::In), ms(600))) {
        assert!(relay.relay(Role::Secondary, &msg));
    }
    let inbound: Vec<_> = master_rx.try_iter().collect();
    assert_eq!(inbound.len(), 1);
    assert_eq!(inbound[0].origin, Role::Secondary);
    let echoes = sends(master.handle_message(WindowMessage::ApplyView(inbound[0]), ms(600)));
    assert!(echoes.is_empty(), "applying a synced view must not echo");

    let m = master.viewport().state();
    let s = secondary.viewport().state();
    assert_eq!(m.zoom_mode, ZoomMode::Manual);
    assert!((m.zoom_factor - s.zoom_factor).abs() < 1e-9);
    assert!((m.scroll_x - s.scroll_x).abs() < 1e-6);
    assert!((m.scroll_y - s.scroll_y).abs() < 1e-6);
}

#[test]
fn test_detached_secondary_stops_syncing() {
    let dir = tempfile::tempdir().unwrap();
    let host = FakeHost::default();
    let mut master = make_app(dir.path(), Role::Master, &host, None);
    let mut secondary = make_app(dir.path(), Role::Secondary, &host, None);
    show_image(&mut master);
    show_image(&mut secondary);

    secondary.handle_action(Action::ToggleDetach, ms(0));
    assert!(sends(secondary.handle_action(Action::Zoom(ZoomDirection::In), ms(10))).is_empty());

    let before = secondary.viewport().state().clone();
    let master_msgs = sends(master.handle_action(Action::ResetZoom, ms(20)));
    assert_eq!(master_msgs.len(), 1);
    assert!(
        secondary
            .handle_message(WindowMessage::ApplyView(master_msgs[0]), ms(20))
            .is_empty()
    );
    assert_eq!(secondary.viewport().state(), &before);

    // Re-attached: the master's view applies again.
    secondary.handle_action(Action::ToggleDetach, ms(30));
    secondary.handle_message(WindowMessage::ApplyView(master_msgs[0]), ms(30));
    assert_eq!(secondary.viewport().state().zoom_factor, 1.0);
}

#[test]
fn test_sync_over_sockets_preserves_order() {
    let dir = tempfile::tempdir().unwrap();
    let host = FakeHost::default();
    let master_socket = SyncSocket::bind(dir.path(), Role::Master).unwrap();
    let mut secondary_relay = PairRelay::new();
    secondary_relay.attach(
        Role::Master,
        Box::new(PeerSocket::new(dir.path(), Role::Master).unwrap()),
    );

    let mut master = make_app(dir.path(), Role::Master, &host, None);
    let mut secondary = make_app(dir.path(), Role::Secondary, &host, None);
    show_image(&mut master);
    show_image(&mut secondary);

    let mut sent = Vec::new();
    for step in 0..3 {
        for msg in sends(secondary.handle_action(Action::Zoom(ZoomDirection::In), ms(step * 10))) {
            assert!(secondary_relay.relay(Role::Secondary, &msg));
            sent.push(msg);
        }
    }
    let received = master_socket.drain();
    assert_eq!(received, sent);
    for msg in received {
        master.handle_message(WindowMessage::ApplyView(msg), ms(50));
    }
    assert!(
        (master.viewport().state().zoom_factor - secondary.viewport().state().zoom_factor).abs()
            < 1e-9
    );
}
