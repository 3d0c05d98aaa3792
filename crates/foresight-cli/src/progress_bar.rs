//! Terminal progress bar for ensemble runs.

use indicatif::{ProgressBar, ProgressStyle};

use foresight_runtime::{format_duration, ProgressEvent, ProgressSink};

const TEMPLATE: &str =
    "{spinner:.green} [{elapsed_precise}] [{bar:40.cyan/blue}] {pos}/{len} (eta {prefix}) {msg}";

/// Renders scheduler progress events on stderr.
pub struct BarProgress {
    bar: ProgressBar,
}

impl BarProgress {
    pub fn new(total: u64) -> Self {
        let style = ProgressStyle::default_bar()
            .template(TEMPLATE)
            .map(|s| s.progress_chars("#>-"))
            .unwrap_or_else(|_| ProgressStyle::default_bar());
        let bar = ProgressBar::new(total);
        bar.set_style(style);
        bar.set_prefix("calculating");
        Self { bar }
    }

    /// A bar that draws nothing, for `--quiet`.
    pub fn hidden() -> Self {
        Self {
            bar: ProgressBar::hidden(),
        }
    }

    pub fn finish(&self, message: &str) {
        self.bar.finish_with_message(message.to_string());
    }

    pub fn position(&self) -> u64 {
        self.bar.position()
    }
}

impl ProgressSink for BarProgress {
    fn on_progress(&self, event: &ProgressEvent) {
        self.bar.set_length(event.total as u64);
        self.bar.set_position(event.completed as u64);
        if let Some(eta) = event.eta_seconds {
            self.bar.set_prefix(format_duration(eta));
        }
        self.bar.set_message(event.message.clone());
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::BTreeMap;

    #[test]
    fn test_bar_tracks_events() {
        let progress = BarProgress::hidden();
        progress.on_progress(&ProgressEvent {
            progress: 0.5,
            message: "a/one #1: success (2/4)".to_string(),
            completed: 2,
            total: 4,
            model_progress: BTreeMap::new(),
            eta_seconds: Some(30),
        });
        assert_eq!(progress.position(), 2);
        progress.finish("done");
    }
}
