use std::fmt;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::thread;
use std::time::{Duration, Instant};

use tracing::{debug, info, warn};

use crate::error::StressError;
use crate::lifecycle::{next_generation_id, Generation, Phase};
use crate::stop_signal::StopSignal;
use crate::sys_info;

pub const MIB: usize = 1024 * 1024;

/// Largest limit whose size in bytes fits in `usize`.
pub const MAX_LIMIT_MIB: usize = usize::MAX / MIB;

/// Distance between two written bytes in a fresh block.
const TOUCH_STRIDE: usize = 1024;

#[derive(Debug, Clone)]
pub struct MemorySettings {
    pub block_size_mib: usize,
    pub alloc_interval: Duration,
    pub status_interval: Duration,
    pub default_limit_mib: usize,
}

impl Default for MemorySettings {
    fn default() -> Self {
        Self {
            block_size_mib: 10,
            alloc_interval: Duration::from_millis(500),
            status_interval: Duration::from_secs(5),
            default_limit_mib: 1024,
        }
    }
}

struct MemoryState {
    phase: Phase,
    limit_bytes: usize,
    blocks: Vec<Box<[u8]>>,
}

impl MemoryState {
    fn allocated_bytes(&self) -> usize {
        self.blocks.iter().map(|block| block.len()).sum()
    }
}

struct Shared {
    settings: MemorySettings,
    state: Mutex<MemoryState>,
}

impl Shared {
    fn lock(&self) -> MutexGuard<'_, MemoryState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

enum Growth {
    Added(usize),
    AtLimit(usize),
}

/// Grows a list of resident byte blocks up to a limit.
///
/// Blocks outlive the task: stopping only halts growth, and memory is
/// handed back exclusively through [`MemoryController::free`].
#[derive(Clone)]
pub struct MemoryController {
    shared: Arc<Shared>,
}

impl fmt::Debug for MemoryController {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let state = self.shared.lock();
        f.debug_struct("MemoryController")
            .field("phase", &state.phase)
            .field("blocks", &state.blocks.len())
            .field("allocated_bytes", &state.allocated_bytes())
            .field("limit_bytes", &state.limit_bytes)
            .finish()
    }
}

impl Default for MemoryController {
    fn default() -> Self {
        Self::new(MemorySettings::default())
    }
}

impl MemoryController {
    pub fn new(mut settings: MemorySettings) -> Self {
        settings.block_size_mib = settings.block_size_mib.max(1);
        settings.default_limit_mib = settings.default_limit_mib.max(1);
        let limit_bytes = settings.default_limit_mib.saturating_mul(MIB);
        Self {
            shared: Arc::new(Shared {
                settings,
                state: Mutex::new(MemoryState {
                    phase: Phase::Idle,
                    limit_bytes,
                    blocks: Vec::new(),
                }),
            }),
        }
    }

    /// Starts the allocation loop with a limit in MiB; `<= 0` selects the
    /// default and anything above [`MAX_LIMIT_MIB`] is clamped to it.
    /// Growth resumes above whatever earlier runs left allocated.
    ///
    /// Returns `Ok(false)` without touching state when a task is already
    /// running or still shutting down.
    pub fn start(&self, limit_mib: i64) -> Result<bool, StressError> {
        let mut state = self.shared.lock();
        if !state.phase.is_idle() {
            return Ok(false);
        }

        let requested = limit_mib;
        let limit_mib = if requested <= 0 {
            self.shared.settings.default_limit_mib
        } else {
            usize::try_from(requested).map_or(MAX_LIMIT_MIB, |n| n.min(MAX_LIMIT_MIB))
        };
        if requested > 0 && limit_mib as u128 != requested as u128 {
            warn!(requested, clamped = limit_mib, "memory limit clamped");
        }
        let limit_bytes = limit_mib.saturating_mul(MIB);

        let signal = Arc::new(StopSignal::new());
        let mut generation = Generation::new(next_generation_id(), Arc::clone(&signal));
        let handle = thread::Builder::new()
            .name(format!("mem-stress-{}", generation.id))
            .spawn({
                let id = generation.id;
                let shared = Arc::clone(&self.shared);
                move || allocate_loop(id, &shared, limit_bytes, &signal)
            })?;
        generation.push(handle);

        info!(
            generation = generation.id,
            limit_mib = limit_bytes / MIB,
            reused_mib = state.allocated_bytes() / MIB,
            "memory stress started"
        );
        state.limit_bytes = limit_bytes;
        state.phase = Phase::Running(generation);
        Ok(true)
    }

    /// Halts the allocation loop and waits for it to exit. Allocated blocks
    /// are kept.
    pub fn stop(&self) -> bool {
        let generation = {
            let mut state = self.shared.lock();
            match state.phase.begin_stop() {
                Some(generation) => generation,
                None => return false,
            }
        };

        let id = generation.id;
        info!(generation = id, "stopping memory stress");
        generation.shutdown("memory");

        let mut state = self.shared.lock();
        state.phase = Phase::Idle;
        info!(
            generation = id,
            still_allocated_mib = state.allocated_bytes() / MIB,
            "memory stress stopped, memory is still allocated"
        );
        true
    }

    /// Drops every block regardless of the task state and returns the
    /// number of MiB released.
    pub fn free(&self) -> usize {
        let blocks = std::mem::take(&mut self.shared.lock().blocks);
        let released: usize = blocks.iter().map(|block| block.len()).sum();
        drop(blocks);
        release_to_os();

        info!(released_mib = released / MIB, "memory cleanup complete");
        released / MIB
    }

    pub fn is_running(&self) -> bool {
        !self.shared.lock().phase.is_idle()
    }

    pub fn allocated_mib(&self) -> usize {
        self.shared.lock().allocated_bytes() / MIB
    }

    pub fn limit_mib(&self) -> usize {
        self.shared.lock().limit_bytes / MIB
    }
}

/// Allocates one block, trimmed so the total never passes `limit`.
fn grow(shared: &Shared, limit: usize) -> Growth {
    let current = shared.lock().allocated_bytes();
    if current >= limit {
        return Growth::AtLimit(current);
    }

    let size = shared.settings.block_size_mib.saturating_mul(MIB).min(limit - current);
    let block = touched_block(size);

    let mut state = shared.lock();
    let total = state.allocated_bytes();
    if total + size > limit {
        return Growth::AtLimit(total);
    }
    state.blocks.push(block);
    Growth::Added(total + size)
}

/// Zeroed allocations may be mapped lazily; writing a non-zero byte into
/// every page makes the block resident.
fn touched_block(size: usize) -> Box<[u8]> {
    let mut block = vec![0u8; size].into_boxed_slice();
    for (n, i) in (0..size).step_by(TOUCH_STRIDE).enumerate() {
        block[i] = (n % 255) as u8 + 1;
    }
    block
}

fn allocate_loop(generation: u64, shared: &Shared, limit: usize, signal: &StopSignal) {
    let settings = &shared.settings;
    let mut next_alloc = Instant::now() + settings.alloc_interval;
    let mut next_status = Instant::now() + settings.status_interval;
    let mut capped = false;

    log_system_memory(generation);
    loop {
        let deadline = next_alloc.min(next_status);
        if signal.wait_timeout(deadline.saturating_duration_since(Instant::now())) {
            break;
        }

        let now = Instant::now();
        if now >= next_alloc {
            match grow(shared, limit) {
                Growth::Added(total) => {
                    capped = false;
                    debug!(
                        generation,
                        allocated_mib = total / MIB,
                        percent = percent(total, limit),
                        "allocated block"
                    );
                }
                Growth::AtLimit(total) if !capped => {
                    capped = true;
                    info!(
                        generation,
                        allocated_mib = total / MIB,
                        limit_mib = limit / MIB,
                        "reached memory allocation limit, holding"
                    );
                }
                Growth::AtLimit(_) => {}
            }
            next_alloc = now + settings.alloc_interval;
        }
        if now >= next_status {
            let total = shared.lock().allocated_bytes();
            info!(
                generation,
                allocated_mib = total / MIB,
                limit_mib = limit / MIB,
                percent = percent(total, limit),
                "memory stress running"
            );
            log_system_memory(generation);
            next_status = now + settings.status_interval;
        }
    }
    debug!(generation, "allocation loop exiting");
}

fn log_system_memory(generation: u64) {
    let snapshot = sys_info::memory_snapshot();
    debug!(
        generation,
        used_mib = snapshot.used_mib,
        total_mib = snapshot.total_mib,
        "system memory"
    );
}

pub(crate) fn percent(part: usize, whole: usize) -> usize {
    if whole == 0 {
        0
    } else {
        ((part as u128 * 100) / whole as u128) as usize
    }
}

/// Returns freed heap pages to the OS where the allocator supports it.
#[cfg(all(target_os = "linux", target_env = "gnu"))]
fn release_to_os() {
    // SAFETY: malloc_trim only walks the allocator's own free lists.
    unsafe {
        libc::malloc_trim(0);
    }
}

#[cfg(not(all(target_os = "linux", target_env = "gnu")))]
fn release_to_os() {}
