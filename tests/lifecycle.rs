use std::sync::{Arc, Barrier};
use std::thread;
use std::time::{Duration, Instant};

use stress_bench::{CpuController, CpuSettings, MemoryController, MemorySettings};

fn wait_for(mut cond: impl FnMut() -> bool) -> bool {
    let deadline = Instant::now() + Duration::from_secs(10);
    while Instant::now() < deadline {
        if cond() {
            return true;
        }
        thread::sleep(Duration::from_millis(5));
    }
    false
}

#[test]
fn cpu_and_memory_end_to_end() {
    let cpu = CpuController::new(CpuSettings {
        available_cores: 2,
        status_interval: Duration::from_millis(20),
    });
    assert!(cpu.start(2).unwrap());
    assert_eq!(cpu.cores_in_use(), 2);
    assert!(cpu.stop());
    assert!(!cpu.is_running());

    let memory = MemoryController::new(MemorySettings {
        block_size_mib: 10,
        alloc_interval: Duration::from_millis(5),
        status_interval: Duration::from_millis(20),
        default_limit_mib: 1024,
    });
    assert!(memory.start(50).unwrap());
    assert!(wait_for(|| memory.allocated_mib() == 50));
    assert!(memory.stop());
    assert_eq!(memory.allocated_mib(), 50);
    memory.free();
    assert_eq!(memory.allocated_mib(), 0);
    memory.free();
    assert_eq!(memory.allocated_mib(), 0);
}

#[test]
fn controllers_are_independent() {
    let cpu = CpuController::new(CpuSettings {
        available_cores: 1,
        status_interval: Duration::from_millis(20),
    });
    let memory = MemoryController::new(MemorySettings {
        block_size_mib: 1,
        alloc_interval: Duration::from_millis(5),
        status_interval: Duration::from_millis(20),
        default_limit_mib: 4,
    });

    assert!(cpu.start(0).unwrap());
    assert!(memory.start(0).unwrap());
    assert!(cpu.stop());
    assert!(memory.is_running());
    assert!(memory.stop());
    assert!(!cpu.is_running());
    memory.free();
}

#[test]
fn racing_start_and_stop_never_corrupt_state() {
    let cpu = Arc::new(CpuController::new(CpuSettings {
        available_cores: 2,
        status_interval: Duration::from_millis(20),
    }));
    let barrier = Arc::new(Barrier::new(4));

    let callers: Vec<_> = (0..4)
        .map(|i| {
            let cpu = Arc::clone(&cpu);
            let barrier = Arc::clone(&barrier);
            thread::spawn(move || {
                barrier.wait();
                for _ in 0..20 {
                    if i % 2 == 0 {
                        let _ = cpu.start(1).unwrap();
                    } else {
                        cpu.stop();
                    }
                }
            })
        })
        .collect();
    for caller in callers {
        caller.join().unwrap();
    }

    cpu.stop();
    assert!(!cpu.is_running());
    assert_eq!(cpu.cores_in_use(), 0);
    assert_eq!(cpu.live_workers(), 0);

    assert!(cpu.start(2).unwrap());
    assert_eq!(cpu.cores_in_use(), 2);
    assert!(cpu.stop());
}
