/*!
[Console]: the one-way progress/status sink the core reports through. The
core never reads from it; a caller's interactive renderer (out of scope
for this crate) can be layered underneath by implementing the trait.
*/

use std::sync::atomic::{AtomicUsize, Ordering};

use tracing::info;

/// A one-way sink for plan/backfill progress. Implementations must not
/// block the caller for long; the core does not await any response.
pub trait Console: Send + Sync {
    /// A free-form status line, e.g. a phase boundary or a skipped node.
    fn log_status_update(&self, message: &str);

    /// A terminal success message for the whole run.
    fn log_success(&self, message: &str);

    /// Begin tracking promotion progress for `total` snapshots under `name`.
    fn start_promotion_progress(&self, name: &str, total: usize);

    /// Advance promotion progress by `n` completed snapshots.
    fn update_promotion_progress(&self, n: usize);

    /// Finish promotion progress, reporting overall `success`.
    fn stop_promotion_progress(&self, success: bool);

    /// Format `completed` out of `total` as a whole-percent string, shared
    /// by every implementation so the rounding rule lives in one place.
    fn format_progress(&self, completed: usize, total: usize) -> String {
        if total == 0 {
            return "100%".to_string();
        }
        format!("{:.0}%", (completed as f64 / total as f64) * 100.0)
    }
}

/// Discards everything. The default when no caller-supplied console is given.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopConsole;

impl Console for NoopConsole {
    fn log_status_update(&self, _message: &str) {}
    fn log_success(&self, _message: &str) {}
    fn start_promotion_progress(&self, _name: &str, _total: usize) {}
    fn update_promotion_progress(&self, _n: usize) {}
    fn stop_promotion_progress(&self, _success: bool) {}
}

/// Routes every call through `tracing`, for non-interactive runs (CI,
/// daemonized schedulers) that still want visibility without a TTY renderer.
#[derive(Debug, Default)]
pub struct TracingConsole {
    total: AtomicUsize,
    completed: AtomicUsize,
}

impl TracingConsole {
    /// A fresh console tracking no promotion yet.
    pub fn new() -> Self {
        Self::default()
    }
}

impl Console for TracingConsole {
    fn log_status_update(&self, message: &str) {
        info!(target: "sqlmesh_core::console", "{message}");
    }

    fn log_success(&self, message: &str) {
        info!(target: "sqlmesh_core::console", success = true, "{message}");
    }

    fn start_promotion_progress(&self, name: &str, total: usize) {
        self.total.store(total, Ordering::SeqCst);
        self.completed.store(0, Ordering::SeqCst);
        info!(target: "sqlmesh_core::console", environment = name, total, "promotion started");
    }

    fn update_promotion_progress(&self, n: usize) {
        let completed = self.completed.fetch_add(n, Ordering::SeqCst) + n;
        let total = self.total.load(Ordering::SeqCst);
        info!(
            target: "sqlmesh_core::console",
            completed,
            total,
            progress = %self.format_progress(completed, total),
            "promotion progress"
        );
    }

    fn stop_promotion_progress(&self, success: bool) {
        info!(target: "sqlmesh_core::console", success, "promotion finished");
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn noop_console_accepts_every_call() {
        let console = NoopConsole;
        console.log_status_update("hello");
        console.start_promotion_progress("prod", 3);
        console.update_promotion_progress(1);
        console.stop_promotion_progress(true);
        console.log_success("done");
    }

    #[test]
    fn format_progress_rounds_to_whole_percent() {
        let console = NoopConsole;
        assert_eq!(console.format_progress(1, 3), "33%");
        assert_eq!(console.format_progress(0, 0), "100%");
        assert_eq!(console.format_progress(2, 2), "100%");
    }

    #[test]
    fn tracing_console_accumulates_across_updates() {
        let console = TracingConsole::new();
        console.start_promotion_progress("prod", 4);
        console.update_promotion_progress(1);
        console.update_promotion_progress(2);
        assert_eq!(console.completed.load(Ordering::SeqCst), 3);
    }
}
