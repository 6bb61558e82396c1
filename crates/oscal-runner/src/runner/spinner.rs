use indicatif::{ProgressBar, ProgressStyle};
use std::time::Duration;

const TICK_INTERVAL: Duration = Duration::from_millis(100);

/// Terminal activity indicator shown while a tool runs
///
/// Draws to stderr and is hidden when stderr is not a terminal. The line is
/// cleared when the guard drops, so captured tool output is never interleaved
/// with spinner frames.
pub struct Spinner {
    bar: ProgressBar,
}

impl Spinner {
    pub fn start(message: impl Into<String>) -> Self {
        let bar = ProgressBar::new_spinner();
        let style = ProgressStyle::with_template("{spinner:.cyan} {msg}")
            .unwrap_or_else(|_| ProgressStyle::default_spinner())
            .tick_chars("⠋⠙⠹⠸⠼⠴⠦⠧⠇⠏ ");
        bar.set_style(style);
        bar.set_message(message.into());
        bar.enable_steady_tick(TICK_INTERVAL);
        Self { bar }
    }
}

impl Drop for Spinner {
    fn drop(&mut self) {
        self.bar.finish_and_clear();
    }
}
