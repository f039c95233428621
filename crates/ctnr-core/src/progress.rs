use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::Arc;

/// Non-blocking progress sink for a single in-flight tool invocation.
///
/// `emit` must never block step execution; implementations that forward to
/// a transport should buffer via an unbounded channel rather than awaiting
/// the write inline.
pub trait ProgressEmitter: Send + Sync {
    fn emit(&self, step: &str, percent: u8, message: &str);
    fn close(&self) {}
}

/// Used when the MCP client supplied no progress token.
#[derive(Debug, Default, Clone, Copy)]
pub struct NullProgressEmitter;

impl ProgressEmitter for NullProgressEmitter {
    fn emit(&self, _step: &str, _percent: u8, _message: &str) {}
}

/// Wraps any [`ProgressEmitter`] to clamp percent to be non-decreasing across calls.
pub struct MonotonicProgressEmitter<E> {
    inner: E,
    last: AtomicU8,
}

impl<E: ProgressEmitter> MonotonicProgressEmitter<E> {
    pub fn new(inner: E) -> Self {
        Self {
            inner,
            last: AtomicU8::new(0),
        }
    }
}

impl<E: ProgressEmitter> ProgressEmitter for MonotonicProgressEmitter<E> {
    fn emit(&self, step: &str, percent: u8, message: &str) {
        let clamped = percent.min(100);
        let prev = self.last.fetch_max(clamped, Ordering::SeqCst);
        let to_send = clamped.max(prev);
        self.inner.emit(step, to_send, message);
    }

    fn close(&self) {
        self.inner.close();
    }
}

pub type SharedProgressEmitter = Arc<dyn ProgressEmitter>;

/// Compute the percent complete for a workflow given completed-or-skipped
/// step count against the total step count.
///
/// Skipped steps count toward the denominator just like completed ones.
pub fn percent_complete(completed_or_skipped: usize, total: usize) -> u8 {
    if total == 0 {
        return 100;
    }
    ((completed_or_skipped as f64 / total as f64) * 100.0).round() as u8
}
