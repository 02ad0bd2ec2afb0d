//! Frame-tick source — the re-architected "event loop drives render"
//! from `spec.md`'s DESIGN NOTES: the engine never owns a windowing
//! event loop (Non-goal), so ticks are pushed in from outside through
//! this trait (§5 SUPPLEMENTAL "Frame-tick source").
//!
//! Grounded in `bin/editor/src/editor.rs`'s `ModalEditor::redraw_request`/
//! paint-on-demand pattern, generalized from "the windowing toolkit calls
//! us" to "anything implementing `FrameTickSource` calls us" — a channel,
//! a timer, or a test harness.
use std::time::{Duration, Instant};

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct FrameTick {
    pub sequence: u64,
}

/// Supplies the next frame tick the scheduler should drive on.
/// Implementors may block (production: waiting on an external signal) or
/// return immediately (tests: a virtual clock).
pub trait FrameTickSource {
    fn next_tick(&mut self) -> FrameTick;
}

/// Wraps an external callback (e.g. a channel receiver fed by a
/// windowing toolkit's redraw callback) as a `FrameTickSource`. The
/// engine itself never creates a window or event loop (Non-goal).
pub struct SystemFrameTickSource<F: FnMut() -> FrameTick> {
    pull: F,
}

impl<F: FnMut() -> FrameTick> SystemFrameTickSource<F> {
    pub fn new(pull: F) -> Self {
        SystemFrameTickSource { pull }
    }
}

impl<F: FnMut() -> FrameTick> FrameTickSource for SystemFrameTickSource<F> {
    fn next_tick(&mut self) -> FrameTick {
        (self.pull)()
    }
}

/// A deterministic virtual clock for tests: each call to `next_tick`
/// advances by a fixed interval and increments the sequence number,
/// without touching wall-clock time.
pub struct VirtualFrameTickSource {
    sequence: u64,
    interval: Duration,
    last: Instant,
}

impl VirtualFrameTickSource {
    pub fn new(interval: Duration) -> Self {
        VirtualFrameTickSource {
            sequence: 0,
            interval,
            last: Instant::now(),
        }
    }

    pub fn elapsed_since_last(&self) -> Duration {
        self.last.elapsed()
    }
}

impl FrameTickSource for VirtualFrameTickSource {
    fn next_tick(&mut self) -> FrameTick {
        self.sequence += 1;
        self.last = Instant::now();
        FrameTick { sequence: self.sequence }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn virtual_source_increments_sequence() {
        let mut source = VirtualFrameTickSource::new(Duration::from_millis(16));
        assert_eq!(source.next_tick().sequence, 1);
        assert_eq!(source.next_tick().sequence, 2);
    }
}
