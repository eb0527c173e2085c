//! Stub models, sources and gateways shared by the daemon's unit tests.

use crate::gateway::Gateway;
use crate::notify::{NotificationSink, NotifyError};
use crate::pipeline::FaceAnalyzer;
use crate::session::Recipient;
use image::RgbImage;
use parking_lot::Mutex;
use rollcall_core::detector::DetectorError;
use rollcall_core::recognizer::RecognizerError;
use rollcall_core::{BoundingBox, Embedding, FaceDetect, FaceEmbed};
use rollcall_store::{Store, StoreError, StoredIdentity};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{mpsc, Arc};
use std::time::{Duration, Instant};

pub fn stored(name: &str, encoding: Vec<f32>) -> StoredIdentity {
    StoredIdentity {
        name: name.to_string(),
        age: 30,
        email: format!("{}@example.com", name.to_lowercase()),
        encoding,
    }
}

pub fn face_box(x: f32, y: f32, width: f32, height: f32) -> BoundingBox {
    BoundingBox {
        x,
        y,
        width,
        height,
        confidence: 0.9,
        landmarks: Some([
            (x + width * 0.3, y + height * 0.4),
            (x + width * 0.7, y + height * 0.4),
            (x + width * 0.5, y + height * 0.6),
            (x + width * 0.35, y + height * 0.8),
            (x + width * 0.65, y + height * 0.8),
        ]),
    }
}

/// Returns the same boxes on every call and counts calls.
pub struct ScriptedDetector {
    pub boxes: Vec<BoundingBox>,
    pub calls: Arc<AtomicUsize>,
}

impl FaceDetect for ScriptedDetector {
    fn detect(&mut self, _image: &RgbImage) -> Result<Vec<BoundingBox>, DetectorError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        Ok(self.boxes.clone())
    }
}

/// Hands out embeddings round-robin, one per face.
pub struct SequenceEmbedder {
    pub embeddings: Vec<Vec<f32>>,
    pub next: usize,
}

impl FaceEmbed for SequenceEmbedder {
    fn extract(&mut self, _image: &RgbImage, _face: &BoundingBox) -> Result<Embedding, RecognizerError> {
        let values = self.embeddings[self.next % self.embeddings.len()].clone();
        self.next += 1;
        Ok(Embedding::new(values))
    }
}

/// Analyzer whose detector always finds `boxes` and whose embedder cycles
/// through `embeddings`. Also returns the detector call counter.
pub fn analyzer(
    boxes: Vec<BoundingBox>,
    embeddings: Vec<Vec<f32>>,
) -> (Arc<Mutex<FaceAnalyzer>>, Arc<AtomicUsize>) {
    let calls = Arc::new(AtomicUsize::new(0));
    let detector = ScriptedDetector {
        boxes,
        calls: Arc::clone(&calls),
    };
    let embedder = SequenceEmbedder {
        embeddings,
        next: 0,
    };
    (
        Arc::new(Mutex::new(FaceAnalyzer::new(Box::new(detector), Box::new(embedder)))),
        calls,
    )
}

/// In-memory store with switchable read and write failures.
pub struct FlakyGateway {
    pub store: Store,
    fail_reads: AtomicBool,
    fail_writes: AtomicBool,
}

impl FlakyGateway {
    pub fn new() -> Self {
        Self {
            store: Store::open_in_memory().unwrap(),
            fail_reads: AtomicBool::new(false),
            fail_writes: AtomicBool::new(false),
        }
    }

    pub fn with_identities(identities: &[StoredIdentity]) -> Self {
        let gateway = Self::new();
        for identity in identities {
            gateway.store.upsert_identity(identity).unwrap();
        }
        gateway
    }

    pub fn fail_reads(&self, fail: bool) {
        self.fail_reads.store(fail, Ordering::SeqCst);
    }

    pub fn fail_writes(&self, fail: bool) {
        self.fail_writes.store(fail, Ordering::SeqCst);
    }

    fn injected() -> StoreError {
        StoreError::NotFound("injected failure".into())
    }
}

impl Gateway for FlakyGateway {
    fn load_identities(&self) -> Result<Vec<StoredIdentity>, StoreError> {
        if self.fail_reads.load(Ordering::SeqCst) {
            return Err(Self::injected());
        }
        self.store.load_identities()
    }

    fn upsert_identity(&self, identity: &StoredIdentity) -> Result<(), StoreError> {
        if self.fail_writes.load(Ordering::SeqCst) {
            return Err(Self::injected());
        }
        self.store.upsert_identity(identity)
    }

    fn record_attendance(&self, names: &[String], timestamp: &str) -> Result<usize, StoreError> {
        if self.fail_writes.load(Ordering::SeqCst) {
            return Err(Self::injected());
        }
        self.store.record_attendance(names, timestamp)
    }
}

/// Records delivered contacts; fails for contacts containing "bounce".
#[derive(Default)]
pub struct RecordingNotifier {
    pub delivered: Mutex<Vec<String>>,
}

impl NotificationSink for RecordingNotifier {
    fn notify(&self, recipient: &Recipient, _timestamp: &str) -> Result<(), NotifyError> {
        if recipient.contact.contains("bounce") {
            return Err(NotifyError::Transport("550 mailbox unavailable".into()));
        }
        self.delivered.lock().push(recipient.contact.clone());
        Ok(())
    }
}

impl RecordingNotifier {
    /// Wait until `count` contacts were delivered by a detached dispatch.
    pub fn wait_for(&self, count: usize) -> Vec<String> {
        let deadline = Instant::now() + Duration::from_secs(5);
        loop {
            let delivered = self.delivered.lock().clone();
            if delivered.len() >= count || Instant::now() > deadline {
                return delivered;
            }
            std::thread::sleep(Duration::from_millis(5));
        }
    }
}

/// Blocks every delivery until the paired sender releases it.
pub struct GatedNotifier {
    gate: Mutex<mpsc::Receiver<()>>,
    pub recorder: RecordingNotifier,
}

impl GatedNotifier {
    pub fn new() -> (Self, mpsc::Sender<()>) {
        let (tx, rx) = mpsc::channel();
        let sink = Self {
            gate: Mutex::new(rx),
            recorder: RecordingNotifier::default(),
        };
        (sink, tx)
    }
}

impl NotificationSink for GatedNotifier {
    fn notify(&self, recipient: &Recipient, timestamp: &str) -> Result<(), NotifyError> {
        self.gate
            .lock()
            .recv()
            .map_err(|_| NotifyError::Transport("gate closed".into()))?;
        self.recorder.notify(recipient, timestamp)
    }
}
