use std::hint::black_box;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::mpsc::{self, Receiver, SyncSender};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::thread;
use std::time::Duration;

use rand::Rng;
use tracing::{debug, info};

use crate::error::StressError;
use crate::lifecycle::{next_generation_id, Generation, Phase};
use crate::stop_signal::StopSignal;

/// Inner iterations between two stop-signal checks.
pub const CHECK_INTERVAL: u64 = 1000;

const RESET_THRESHOLD: f64 = 1e10;

#[derive(Debug, Clone)]
pub struct CpuSettings {
    /// Upper bound for the worker count. Defaults to the host's logical cores.
    pub available_cores: usize,
    /// How often the generation monitor logs progress.
    pub status_interval: Duration,
}

impl Default for CpuSettings {
    fn default() -> Self {
        Self {
            available_cores: num_cpus::get(),
            status_interval: Duration::from_secs(10),
        }
    }
}

#[derive(Debug, Default)]
struct CpuState {
    phase: Phase,
    cores: usize,
}

/// Keeps `cores` logical CPUs busy until stopped.
///
/// At most one generation of workers exists at a time. `stop` joins every
/// worker of the generation before returning.
#[derive(Debug)]
pub struct CpuController {
    settings: CpuSettings,
    state: Mutex<CpuState>,
    cycles: Arc<AtomicU64>,
    live: Arc<AtomicUsize>,
}

impl Default for CpuController {
    fn default() -> Self {
        Self::new(CpuSettings::default())
    }
}

impl CpuController {
    pub fn new(mut settings: CpuSettings) -> Self {
        settings.available_cores = settings.available_cores.max(1);
        Self {
            settings,
            state: Mutex::new(CpuState::default()),
            cycles: Arc::new(AtomicU64::new(0)),
            live: Arc::new(AtomicUsize::new(0)),
        }
    }

    fn lock(&self) -> MutexGuard<'_, CpuState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn available_cores(&self) -> usize {
        self.settings.available_cores
    }

    /// Clamps a requested core count into `[1, available]`; `<= 0` means all.
    pub fn clamp_cores(&self, requested: i64) -> usize {
        let available = self.settings.available_cores;
        if requested <= 0 {
            available
        } else {
            usize::try_from(requested).map_or(available, |n| n.min(available))
        }
    }

    /// Starts a new generation of workers.
    ///
    /// Returns `Ok(false)` without touching state when a generation is
    /// already running or still shutting down.
    pub fn start(&self, requested: i64) -> Result<bool, StressError> {
        let mut state = self.lock();
        if !state.phase.is_idle() {
            return Ok(false);
        }

        let cores = self.clamp_cores(requested);
        let signal = Arc::new(StopSignal::new());
        let mut generation = Generation::new(next_generation_id(), Arc::clone(&signal));
        let (tx, rx) = mpsc::sync_channel::<f64>(cores);

        for worker in 0..cores {
            let spawned = thread::Builder::new()
                .name(format!("cpu-stress-{}-{}", generation.id, worker))
                .spawn({
                    let signal = Arc::clone(&signal);
                    let cycles = Arc::clone(&self.cycles);
                    let live = Arc::clone(&self.live);
                    let tx = tx.clone();
                    move || {
                        let _live = LiveWorker::enter(live);
                        burn(&signal, &cycles, &tx);
                    }
                });
            match spawned {
                Ok(handle) => generation.push(handle),
                Err(e) => {
                    generation.shutdown("cpu");
                    return Err(e.into());
                }
            }
        }
        drop(tx);

        let spawned = thread::Builder::new()
            .name(format!("cpu-stress-{}-monitor", generation.id))
            .spawn({
                let id = generation.id;
                let signal = Arc::clone(&signal);
                let cycles = Arc::clone(&self.cycles);
                let interval = self.settings.status_interval;
                move || monitor(id, cores, interval, &signal, &cycles, rx)
            });
        match spawned {
            Ok(handle) => generation.push(handle),
            Err(e) => {
                generation.shutdown("cpu");
                return Err(e.into());
            }
        }

        info!(
            generation = generation.id,
            cores,
            available = self.settings.available_cores,
            "cpu stress started"
        );
        state.cores = cores;
        state.phase = Phase::Running(generation);
        Ok(true)
    }

    /// Stops the running generation and waits for all of its workers.
    pub fn stop(&self) -> bool {
        let generation = {
            let mut state = self.lock();
            match state.phase.begin_stop() {
                Some(generation) => generation,
                None => return false,
            }
        };

        let id = generation.id;
        info!(generation = id, "stopping cpu stress");
        generation.shutdown("cpu");

        let mut state = self.lock();
        state.phase = Phase::Idle;
        state.cores = 0;
        info!(generation = id, cycles = self.cycles(), "cpu stress stopped");
        true
    }

    pub fn is_running(&self) -> bool {
        !self.lock().phase.is_idle()
    }

    pub fn cores_in_use(&self) -> usize {
        self.lock().cores
    }

    /// Calculation batches completed since the controller was created.
    pub fn cycles(&self) -> u64 {
        self.cycles.load(Ordering::Relaxed)
    }

    /// Worker threads currently inside their computation loop.
    pub fn live_workers(&self) -> usize {
        self.live.load(Ordering::SeqCst)
    }
}

struct LiveWorker(Arc<AtomicUsize>);

impl LiveWorker {
    fn enter(live: Arc<AtomicUsize>) -> Self {
        live.fetch_add(1, Ordering::SeqCst);
        Self(live)
    }
}

impl Drop for LiveWorker {
    fn drop(&mut self) {
        self.0.fetch_sub(1, Ordering::SeqCst);
    }
}

/// Saturates one core with transcendental math until the signal is raised.
fn burn(signal: &StopSignal, cycles: &AtomicU64, results: &SyncSender<f64>) {
    let mut rng = rand::rng();
    let base = rng.random::<f64>() * 100.0;
    let mut acc = 0.0_f64;
    let mut counter: u64 = 0;

    while !signal.is_raised() {
        for _ in 0..CHECK_INTERVAL {
            let x = base + (counter as f64 / 1000.0).sin();
            acc += x.sin() * x.cos() * (x / 5.0).sin().exp();
            acc += acc.abs().sqrt() + x.abs().powf(0.5 * x.sin());
            if !acc.is_finite() || acc.abs() > RESET_THRESHOLD {
                acc = rng.random::<f64>() * 100.0;
            }
            counter = counter.wrapping_add(1);
        }
        cycles.fetch_add(1, Ordering::Relaxed);
        // Nobody waits on this; a full channel just drops the sample.
        let _ = results.try_send(black_box(acc));
    }
}

fn monitor(
    generation: u64,
    cores: usize,
    interval: Duration,
    signal: &StopSignal,
    cycles: &AtomicU64,
    results: Receiver<f64>,
) {
    let mut last = None;
    while !signal.wait_timeout(interval) {
        if let Some(sample) = results.try_iter().last() {
            last = Some(sample);
        }
        info!(
            generation,
            cores,
            cycles = cycles.load(Ordering::Relaxed),
            last_result = last.unwrap_or_default(),
            "cpu stress running"
        );
    }
    debug!(generation, "cpu monitor exiting");
}
