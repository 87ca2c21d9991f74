use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;

use tracing::{debug, warn};

use crate::stop_signal::StopSignal;

static GENERATION_COUNTER: AtomicU64 = AtomicU64::new(1);

pub(crate) fn next_generation_id() -> u64 {
    GENERATION_COUNTER.fetch_add(1, Ordering::SeqCst)
}

/// Threads spawned by a single start call, sharing one stop signal.
#[derive(Debug)]
pub(crate) struct Generation {
    pub id: u64,
    signal: Arc<StopSignal>,
    handles: Vec<JoinHandle<()>>,
}

impl Generation {
    pub fn new(id: u64, signal: Arc<StopSignal>) -> Self {
        Self {
            id,
            signal,
            handles: Vec::new(),
        }
    }

    pub fn push(&mut self, handle: JoinHandle<()>) {
        self.handles.push(handle);
    }

    /// Raises the stop signal and joins every thread of the generation.
    /// Must be called without holding the controller lock.
    pub fn shutdown(self, kind: &str) {
        self.signal.raise();
        let total = self.handles.len();
        for handle in self.handles {
            let name = handle.thread().name().unwrap_or("unnamed").to_string();
            match handle.join() {
                Ok(()) => debug!(kind, generation = self.id, thread = %name, "worker exited"),
                Err(_) => warn!(kind, generation = self.id, thread = %name, "worker panicked"),
            }
        }
        debug!(kind, generation = self.id, joined = total, "generation joined");
    }
}

/// Lifecycle of one controller.
///
/// `Stopping` covers the window where the state lock has been released and
/// the old generation is being joined: the controller still counts as
/// running, a second stop is refused, and start is refused until the join
/// completes.
#[derive(Debug, Default)]
pub(crate) enum Phase {
    #[default]
    Idle,
    Running(Generation),
    Stopping,
}

impl Phase {
    pub fn is_idle(&self) -> bool {
        matches!(self, Phase::Idle)
    }

    /// Moves a running generation out, leaving `Stopping` behind.
    /// Returns `None` when there is nothing to stop.
    pub fn begin_stop(&mut self) -> Option<Generation> {
        match std::mem::replace(self, Phase::Stopping) {
            Phase::Running(generation) => Some(generation),
            other => {
                *self = other;
                None
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;
    use std::thread;

    #[test]
    fn begin_stop_only_takes_running_generations() {
        let mut phase = Phase::Idle;
        assert!(phase.begin_stop().is_none());
        assert!(phase.is_idle());

        phase = Phase::Running(Generation::new(7, Arc::new(StopSignal::new())));
        let generation = phase.begin_stop().expect("running generation");
        assert_eq!(generation.id, 7);
        assert!(matches!(phase, Phase::Stopping));

        // A second stop while the first one is joining gets nothing.
        assert!(phase.begin_stop().is_none());
        assert!(matches!(phase, Phase::Stopping));
    }

    #[test]
    fn shutdown_joins_all_threads() {
        let signal = Arc::new(StopSignal::new());
        let exited = Arc::new(AtomicUsize::new(0));
        let mut generation = Generation::new(next_generation_id(), Arc::clone(&signal));

        for _ in 0..3 {
            let signal = Arc::clone(&signal);
            let exited = Arc::clone(&exited);
            generation.push(thread::spawn(move || {
                while !signal.is_raised() {
                    std::hint::spin_loop();
                }
                exited.fetch_add(1, Ordering::SeqCst);
            }));
        }

        generation.shutdown("test");
        assert_eq!(exited.load(Ordering::SeqCst), 3);
    }

    #[test]
    fn generation_ids_are_unique() {
        let a = next_generation_id();
        let b = next_generation_id();
        assert_ne!(a, b);
    }
}
