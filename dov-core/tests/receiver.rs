//! Receiver pipeline tests driven by a scripted camera: carrier images
//! are rendered with the codec and fed straight into the capture side.

use std::sync::mpsc;
use std::thread;
use std::time::{Duration, Instant};

use dov_core::file::sha256_reader;
use dov_core::{
    AnalyzerConfig, CaptureSource, CarrierImage, DetectorConfig, DovError, EofPayload, FrameCodec,
    Layout, LayoutConfig, Receiver, ReceiverConfig, ReceiverEvent, ReceiverHandle, ReceiverState,
    StartPayload, TransferFlags,
};
use tokio::sync::mpsc::UnboundedReceiver;

// ── Helpers ──────────────────────────────────────────────────────

/// Capture source fed from a channel; an empty channel reads as "no
/// image this time".
struct ScriptedCamera(mpsc::Receiver<CarrierImage>);

impl CaptureSource for ScriptedCamera {
    fn open(&mut self, _device_id: u32) -> Result<(), DovError> {
        Ok(())
    }

    fn read(&mut self) -> Result<Option<CarrierImage>, DovError> {
        Ok(self.0.recv_timeout(Duration::from_millis(20)).ok())
    }

    fn close(&mut self) {}
}

struct Rig {
    codec: FrameCodec,
    camera: mpsc::Sender<CarrierImage>,
    events: UnboundedReceiver<ReceiverEvent>,
    handle: ReceiverHandle,
    save_dir: tempfile::TempDir,
}

impl Rig {
    fn new(tweak: impl FnOnce(&mut ReceiverConfig)) -> Self {
        let layout = Layout::new(&LayoutConfig {
            frame_width: 640,
            frame_height: 480,
            ..LayoutConfig::default()
        })
        .unwrap();
        let save_dir = tempfile::tempdir().unwrap();
        let mut config = ReceiverConfig {
            queue_capacity: 256,
            poll_interval_ms: 10,
            save_dir: save_dir.path().to_path_buf(),
            ..ReceiverConfig::default()
        };
        tweak(&mut config);

        let (camera, feed) = mpsc::channel();
        let (receiver, events) = Receiver::new(
            layout,
            DetectorConfig::default(),
            AnalyzerConfig::default(),
            config,
            Box::new(ScriptedCamera(feed)),
        );
        Rig {
            codec: FrameCodec::new(layout),
            camera,
            events,
            handle: receiver.start().unwrap(),
            save_dir,
        }
    }

    fn show(&self, image: CarrierImage) {
        self.camera.send(image).unwrap();
    }

    fn idle(&self) {
        self.show(self.codec.encode_idle());
    }

    fn start(&self, start: &StartPayload) {
        self.show(self.codec.encode_start(start).unwrap());
    }

    fn data(&self, index: u32, chunk: &[u8]) {
        self.show(self.codec.encode_data(index, chunk).unwrap());
    }

    fn eof(&self, start: &StartPayload) {
        let eof = EofPayload {
            total_frames: start.total_frames,
            sha256: start.sha256,
        };
        self.show(self.codec.encode_eof(&eof).unwrap());
    }

    /// Split `content` the way a sender on this layout would.
    fn transfer(&self, name: &str, content: &[u8]) -> (StartPayload, Vec<Vec<u8>>) {
        let chunks: Vec<Vec<u8>> = content
            .chunks(self.chunk_size())
            .map(<[u8]>::to_vec)
            .collect();
        let start = StartPayload {
            name: name.into(),
            file_size: content.len() as u64,
            total_frames: chunks.len() as u32,
            sha256: sha256_reader(&mut &content[..]).unwrap(),
            flags: TransferFlags::empty(),
        };
        (start, chunks)
    }

    fn chunk_size(&self) -> usize {
        self.codec.payload_capacity()
    }

    /// Wait for the first event matching `pred`, skipping the rest.
    fn expect(&mut self, what: &str, pred: impl Fn(&ReceiverEvent) -> bool) -> ReceiverEvent {
        let deadline = Instant::now() + Duration::from_secs(10);
        while Instant::now() < deadline {
            match self.events.try_recv() {
                Ok(event) if pred(&event) => return event,
                Ok(_) => {}
                Err(_) => thread::sleep(Duration::from_millis(5)),
            }
        }
        panic!("timed out waiting for {what}");
    }
}

fn content(len: usize) -> Vec<u8> {
    (0..len).map(|i| (i * 31 % 251) as u8).collect()
}

// ── Reception ────────────────────────────────────────────────────

#[test]
fn assembles_shuffled_and_duplicated_chunks() {
    let mut rig = Rig::new(|_| {});
    let data = content(rig.chunk_size() * 3 + 100);
    let (start, chunks) = rig.transfer("shuffled.bin", &data);
    assert_eq!(chunks.len(), 4);

    rig.idle();
    rig.expect("connected", |e| {
        matches!(e, ReceiverEvent::StateChanged { state: ReceiverState::Connected, .. })
    });

    rig.start(&start);
    rig.start(&start);
    for index in [2u32, 0, 2, 3, 1, 0] {
        rig.data(index, &chunks[index as usize]);
    }
    rig.eof(&start);

    let done = rig.expect("completion", |e| matches!(e, ReceiverEvent::Completed(_)));
    let ReceiverEvent::Completed(path) = done else {
        unreachable!()
    };
    assert_eq!(path, rig.save_dir.path().join("shuffled.bin"));
    assert_eq!(std::fs::read(&path).unwrap(), data);
    assert_eq!(rig.handle.state(), ReceiverState::Complete);

    rig.handle.stop();
}

#[test]
fn resend_fills_missing_chunks() {
    let mut rig = Rig::new(|_| {});
    let data = content(rig.chunk_size() * 3);
    let (start, chunks) = rig.transfer("gappy.bin", &data);
    assert_eq!(chunks.len(), 3);

    rig.start(&start);
    rig.data(0, &chunks[0]);
    rig.data(2, &chunks[2]);
    rig.eof(&start);

    let missing = rig.expect("missing frames", |e| matches!(e, ReceiverEvent::MissingFrames(_)));
    assert!(matches!(missing, ReceiverEvent::MissingFrames(list) if list == vec![1]));
    let deadline = Instant::now() + Duration::from_secs(5);
    while rig.handle.state() != ReceiverState::Error && Instant::now() < deadline {
        thread::sleep(Duration::from_millis(5));
    }
    assert_eq!(rig.handle.state(), ReceiverState::Error);

    // The sender's resend pass: START, the missing chunk, EOF.
    rig.start(&start);
    rig.expect("resumed progress", |e| {
        matches!(e, ReceiverEvent::Progress { received: 2, total: 3 })
    });
    rig.data(1, &chunks[1]);
    rig.eof(&start);

    let done = rig.expect("completion", |e| matches!(e, ReceiverEvent::Completed(_)));
    let ReceiverEvent::Completed(path) = done else {
        unreachable!()
    };
    assert_eq!(std::fs::read(path).unwrap(), data);

    rig.handle.stop();
}

#[test]
fn corrupt_transfer_is_rejected() {
    let mut rig = Rig::new(|_| {});
    let data = content(rig.chunk_size() * 2);
    let (mut start, chunks) = rig.transfer("corrupt.bin", &data);
    start.sha256 = [0x11; 32];

    rig.start(&start);
    for (i, chunk) in chunks.iter().enumerate() {
        rig.data(i as u32, chunk);
    }
    rig.eof(&start);

    let err = rig.expect("error", |e| matches!(e, ReceiverEvent::Error(_)));
    assert!(matches!(err, ReceiverEvent::Error(msg) if msg.contains("SHA-256")));
    assert!(!rig.save_dir.path().join("corrupt.bin").exists());

    rig.handle.stop();
}

#[test]
fn silent_link_times_out_and_rescans() {
    let mut rig = Rig::new(|config| {
        config.frame_timeout_ms = 100;
        config.connection_timeout_ms = 400;
    });
    let data = content(rig.chunk_size() * 2);
    let (start, chunks) = rig.transfer("stalled.bin", &data);

    rig.start(&start);
    rig.data(0, &chunks[0]);
    rig.expect("receiving", |e| {
        matches!(e, ReceiverEvent::Progress { received: 1, total: 2 })
    });

    rig.expect("stall warning", |e| matches!(e, ReceiverEvent::Warning(_)));
    let reset = rig.expect("rescan", |e| {
        matches!(e, ReceiverEvent::StateChanged { state: ReceiverState::Scanning, .. })
    });
    assert!(
        matches!(reset, ReceiverEvent::StateChanged { message, .. } if message.contains("timed out"))
    );

    // The dropped session is gone: a late EOF does nothing.
    rig.eof(&start);
    thread::sleep(Duration::from_millis(100));
    assert_eq!(rig.handle.state(), ReceiverState::Scanning);

    rig.handle.stop();
}

#[test]
fn stop_emits_stopped() {
    let mut rig = Rig::new(|_| {});
    rig.expect("scanning", |e| {
        matches!(e, ReceiverEvent::StateChanged { state: ReceiverState::Scanning, .. })
    });

    let Rig {
        handle, mut events, ..
    } = rig;
    handle.stop();

    let mut last = None;
    while let Ok(event) = events.try_recv() {
        if let ReceiverEvent::StateChanged { state, .. } = event {
            last = Some(state);
        }
    }
    assert_eq!(last, Some(ReceiverState::Stopped));
}
