//! Observer — injectable logging/metrics hook for cache and error events
//! (§4.3 "stats counters gated on Observer", §7 "observability records
//! ... when enabled").
//!
//! Grounded in `bin/editor/src/editor.rs`'s `log::info!`/`log::warn!`
//! call sites around redraw/paint events: the teacher always logs via the
//! `log` facade regardless of any particular UI being attached, so the
//! engine does the same here and layers a second, optional `Observer`
//! for callers who want structured events rather than log lines.
use crate::cache::CacheStats;
use crate::error::ErrorContext;

/// Structured hook for cache and error events. Independent of the `log`
/// crate: `log::*!` calls always fire (ambient logging, never gated);
/// an `Observer` is for callers who want typed events/metrics instead of
/// parsing log lines.
pub trait Observer: Send + Sync {
    fn on_cache_event(&self, cache_name: &'static str, stats: CacheStats) {
        let _ = (cache_name, stats);
    }

    fn on_error(&self, error: &ErrorContext) {
        let _ = error;
    }

    fn on_device_lost(&self) {}

    fn on_recovery_attempt(&self, attempt: u32) {
        let _ = attempt;
    }
}

/// The default observer: does nothing beyond the engine's own `log::*!`
/// calls (§7 "observability ... when enabled" — disabled by default).
pub struct NoopObserver;

impl Observer for NoopObserver {}

/// An observer that mirrors every event into the `log` facade, for
/// callers who want both the structured hook and human-readable lines
/// without writing their own `Observer`.
pub struct LoggingObserver;

impl Observer for LoggingObserver {
    fn on_cache_event(&self, cache_name: &'static str, stats: CacheStats) {
        log::debug!(
            "cache `{cache_name}`: hits={} misses={} creations={} reuses={} peak={}",
            stats.hits,
            stats.misses,
            stats.creations,
            stats.reuses,
            stats.peak_size
        );
    }

    fn on_error(&self, error: &ErrorContext) {
        log::warn!("{}:{}: {}", error.component, error.operation, error.context);
    }

    fn on_device_lost(&self) {
        log::error!("device lost");
    }

    fn on_recovery_attempt(&self, attempt: u32) {
        log::info!("recovery attempt {attempt}");
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn noop_observer_accepts_all_events_without_panic() {
        let observer = NoopObserver;
        observer.on_cache_event("shaders", CacheStats::default());
        observer.on_device_lost();
        observer.on_recovery_attempt(1);
    }
}
