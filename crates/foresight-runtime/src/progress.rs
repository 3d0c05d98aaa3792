//! Run progress reporting.
//!
//! The scheduler emits one [`ProgressEvent`] per completed call. Sinks are
//! notified synchronously and must not block; anything slow belongs on the
//! other side of a [`ChannelProgress`].

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, VecDeque};
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::time::Instant;

/// Completion counters for one model.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ModelProgress {
    pub completed: u32,
    pub total: u32,
    pub successful: u32,
}

/// Snapshot of a run after a call completes.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProgressEvent {
    /// Fraction of calls finished, in `[0, 1]`.
    pub progress: f64,
    pub message: String,
    pub completed: usize,
    pub total: usize,
    pub model_progress: BTreeMap<String, ModelProgress>,

    /// Estimated seconds remaining, once enough calls have finished.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub eta_seconds: Option<u64>,
}

/// Receives progress events.
pub trait ProgressSink: Send + Sync {
    fn on_progress(&self, event: &ProgressEvent);
}

/// Discards events.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopProgress;

impl ProgressSink for NoopProgress {
    fn on_progress(&self, _event: &ProgressEvent) {}
}

/// Forwards events to an unbounded channel.
///
/// Sending never blocks. Events are dropped once the receiver is gone.
#[derive(Debug, Clone)]
pub struct ChannelProgress {
    tx: mpsc::UnboundedSender<ProgressEvent>,
}

impl ChannelProgress {
    pub fn new() -> (Self, mpsc::UnboundedReceiver<ProgressEvent>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self { tx }, rx)
    }
}

impl ProgressSink for ChannelProgress {
    fn on_progress(&self, event: &ProgressEvent) {
        let _ = self.tx.send(event.clone());
    }
}

/// Number of recent completions the ETA is averaged over.
pub const ETA_WINDOW: usize = 10;

/// Moving-average ETA over the last [`ETA_WINDOW`] completions.
#[derive(Debug)]
pub struct EtaTracker {
    total: usize,
    started: Instant,
    state: Mutex<EtaState>,
}

#[derive(Debug)]
struct EtaState {
    completed: usize,
    last_update: Instant,
    window: VecDeque<Duration>,
}

impl EtaTracker {
    pub fn start(total: usize) -> Self {
        let now = Instant::now();
        Self {
            total,
            started: now,
            state: Mutex::new(EtaState {
                completed: 0,
                last_update: now,
                window: VecDeque::with_capacity(ETA_WINDOW),
            }),
        }
    }

    /// Record `count` completions since the last update.
    pub fn record(&self, count: usize) {
        let now = Instant::now();
        let mut state = self.state.lock();
        let delta = now.saturating_duration_since(state.last_update);
        let per_item = if count > 0 { delta / count as u32 } else { delta };
        if state.window.len() == ETA_WINDOW {
            state.window.pop_front();
        }
        state.window.push_back(per_item);
        state.completed += count;
        state.last_update = now;
    }

    pub fn completed(&self) -> usize {
        self.state.lock().completed
    }

    fn average(window: &VecDeque<Duration>) -> Option<Duration> {
        if window.is_empty() {
            return None;
        }
        Some(window.iter().sum::<Duration>() / window.len() as u32)
    }

    /// Seconds remaining, `None` before the first completion.
    pub fn eta_seconds(&self) -> Option<u64> {
        let state = self.state.lock();
        if state.completed == 0 {
            return None;
        }
        let remaining = self.total.saturating_sub(state.completed);
        if remaining == 0 {
            return Some(0);
        }
        let average = Self::average(&state.window)?;
        Some((average.as_secs_f64() * remaining as f64) as u64)
    }

    /// Completions per second over the window.
    pub fn items_per_second(&self) -> Option<f64> {
        let state = self.state.lock();
        let average = Self::average(&state.window)?.as_secs_f64();
        (average > 0.0).then(|| 1.0 / average)
    }

    pub fn elapsed(&self) -> Duration {
        self.started.elapsed()
    }

    /// `"2m 30s"`, or `"calculating"` before the first completion.
    pub fn eta_display(&self) -> String {
        self.eta_seconds()
            .map(format_duration)
            .unwrap_or_else(|| "calculating".to_string())
    }
}

/// Render whole seconds as `45s`, `2m 30s` or `1h 5m`.
pub fn format_duration(seconds: u64) -> String {
    if seconds < 60 {
        return format!("{seconds}s");
    }
    let minutes = seconds / 60;
    let rest = seconds % 60;
    if minutes < 60 {
        return if rest > 0 {
            format!("{minutes}m {rest}s")
        } else {
            format!("{minutes}m")
        };
    }
    let hours = minutes / 60;
    let rest_minutes = minutes % 60;
    if rest_minutes > 0 {
        format!("{hours}h {rest_minutes}m")
    } else {
        format!("{hours}h")
    }
}
