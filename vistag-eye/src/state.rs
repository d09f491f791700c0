//! Published detection state

use crate::config::VisionConfig;
use crate::models::{DetectionOutcome, DetectionResult};
use std::fmt::Write as _;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};
use tokio::sync::{mpsc, watch};
use tracing::{debug, error};

/// First line of every rendered summary
pub const RESULTS_HEADER: &str = "Detection Results:";

/// Render a detection result as published text.
///
/// One header line, then one `Index: <id> Name: <label>` line per object in
/// detector order. Every line ends with a newline.
pub fn render_summary(result: &DetectionResult) -> String {
    let mut text = String::with_capacity(RESULTS_HEADER.len() + 1 + result.len() * 24);
    text.push_str(RESULTS_HEADER);
    text.push('\n');
    for object in result.objects() {
        let _ = writeln!(text, "Index: {} Name: {}", object.class_id, object.display_name());
    }
    text
}

/// Sending half for detection outcomes.
///
/// Outcomes are applied in the order they are submitted, so the last
/// detection to complete is the one that stays published.
#[derive(Debug, Clone)]
pub struct OutcomeSink {
    tx: mpsc::UnboundedSender<DetectionOutcome>,
}

impl OutcomeSink {
    /// Sink plus its receiving end, for hosts that apply outcomes themselves
    pub fn channel() -> (Self, mpsc::UnboundedReceiver<DetectionOutcome>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self { tx }, rx)
    }

    /// Forward an outcome. Returns `false` (and drops it) if nothing is
    /// listening any more.
    pub fn submit(&self, outcome: DetectionOutcome) -> bool {
        match self.tx.send(outcome) {
            Ok(()) => true,
            Err(_) => {
                debug!("Detection state is gone, dropping outcome");
                false
            }
        }
    }
}

/// Holds the published text describing the most recent successful detection.
///
/// Readers see either the initial text, the empty string after [`clear`], or
/// a complete rendered summary; never a partial one.
///
/// [`clear`]: DetectionStateStore::clear
pub struct DetectionStateStore {
    text: watch::Sender<Arc<str>>,
    updates: AtomicU64,
    failures: AtomicU64,
}

impl DetectionStateStore {
    pub fn new(initial_text: impl Into<String>) -> Self {
        let initial: String = initial_text.into();
        let (text, _) = watch::channel::<Arc<str>>(Arc::from(initial));
        Self {
            text,
            updates: AtomicU64::new(0),
            failures: AtomicU64::new(0),
        }
    }

    pub fn from_config(config: &VisionConfig) -> Self {
        Self::new(config.initial_text.clone())
    }

    /// Apply a detection outcome.
    ///
    /// Success replaces the published text; failure is logged and counted,
    /// leaving the text untouched.
    pub fn update(&self, outcome: DetectionOutcome) {
        match outcome {
            DetectionOutcome::Success(result) => {
                let summary = render_summary(&result);
                self.text.send_replace(Arc::from(summary));
                self.updates.fetch_add(1, Ordering::Relaxed);
                debug!("Published detection summary with {} objects", result.len());
            }
            DetectionOutcome::Failure(err) => {
                self.failures.fetch_add(1, Ordering::Relaxed);
                error!("detection failed: {}", err);
            }
        }
    }

    /// Current published text
    pub fn read(&self) -> Arc<str> {
        self.text.borrow().clone()
    }

    /// Observe the published text. The receiver starts at the current value.
    pub fn subscribe(&self) -> watch::Receiver<Arc<str>> {
        self.text.subscribe()
    }

    /// Set the published text to the empty string
    pub fn clear(&self) {
        self.text.send_replace(Arc::from(""));
    }

    /// Successful outcomes applied so far
    pub fn update_count(&self) -> u64 {
        self.updates.load(Ordering::Relaxed)
    }

    pub fn failure_count(&self) -> u64 {
        self.failures.load(Ordering::Relaxed)
    }

    /// Start a task applying outcomes in arrival order and return its sink.
    ///
    /// The task holds the store weakly; once the store is dropped, pending
    /// and later outcomes are discarded. Must be called inside a tokio runtime.
    pub fn spawn_updater(self: &Arc<Self>) -> OutcomeSink {
        let (sink, mut rx) = OutcomeSink::channel();
        let store: Weak<Self> = Arc::downgrade(self);

        tokio::spawn(async move {
            while let Some(outcome) = rx.recv().await {
                match store.upgrade() {
                    Some(store) => store.update(outcome),
                    None => break,
                }
            }
            debug!("Detection state updater stopped");
        });

        sink
    }
}
