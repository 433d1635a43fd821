//! Progress notification.
//!
//! The pipeline reports `(current_batch, total_batches)` after every batch.
//! Any `Fn(usize, usize) + Send + Sync` closure works as a callback;
//! [`ProgressBarReporter`] draws an `indicatif` bar for the CLI.

use indicatif::{ProgressBar, ProgressStyle};
use std::any::Any;
use std::panic::{catch_unwind, AssertUnwindSafe};
use tracing::warn;

/// Receives batch progress from a running transfer.
pub trait ProgressCallback: Send + Sync {
    /// Called once per finished batch. `current_batch` strictly increases
    /// within one run and reaches `total_batches` on the last call.
    fn on_progress(&self, current_batch: usize, total_batches: usize);
}

impl<F> ProgressCallback for F
where
    F: Fn(usize, usize) + Send + Sync,
{
    fn on_progress(&self, current_batch: usize, total_batches: usize) {
        self(current_batch, total_batches);
    }
}

/// Invokes `callback`, logging and swallowing any panic.
///
/// Returns `false` if the callback panicked.
pub fn notify(callback: &dyn ProgressCallback, current_batch: usize, total_batches: usize) -> bool {
    match catch_unwind(AssertUnwindSafe(|| {
        callback.on_progress(current_batch, total_batches);
    })) {
        Ok(()) => true,
        Err(payload) => {
            warn!(
                "Progress callback panicked at batch {}/{}: {}",
                current_batch,
                total_batches,
                panic_message(payload.as_ref())
            );
            false
        }
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> &str {
    if let Some(s) = payload.downcast_ref::<&str>() {
        s
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.as_str()
    } else {
        "unknown panic"
    }
}

/// Terminal progress bar counting batches. Clones share one bar.
#[derive(Clone)]
pub struct ProgressBarReporter {
    bar: ProgressBar,
}

impl ProgressBarReporter {
    /// Creates a bar sized to `total_batches`; a spinner when unknown.
    #[must_use]
    pub fn new(total_batches: usize) -> Self {
        let bar = if total_batches > 0 {
            ProgressBar::new(total_batches as u64)
        } else {
            ProgressBar::new_spinner()
        };

        bar.set_style(
            ProgressStyle::default_bar()
                .template(
                    "{spinner:.green} [{elapsed_precise}] [{bar:40.cyan/blue}] {pos}/{len} batches ({eta})",
                )
                .unwrap_or_else(|_| ProgressStyle::default_bar())
                .progress_chars("#>-"),
        );

        Self { bar }
    }

    /// Hidden bar, for non-interactive output.
    #[must_use]
    pub fn hidden() -> Self {
        Self {
            bar: ProgressBar::hidden(),
        }
    }

    /// Underlying bar.
    #[must_use]
    pub fn bar(&self) -> &ProgressBar {
        &self.bar
    }

    /// Finishes the bar with a closing message.
    pub fn finish(&self, message: &'static str) {
        self.bar.finish_with_message(message);
    }
}

impl ProgressCallback for ProgressBarReporter {
    fn on_progress(&self, current_batch: usize, total_batches: usize) {
        if self.bar.length() != Some(total_batches as u64) {
            self.bar.set_length(total_batches as u64);
        }
        self.bar.set_position(current_batch as u64);
    }
}
