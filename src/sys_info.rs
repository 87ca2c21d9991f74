use sysinfo::System;

const MIB: u64 = 1024 * 1024;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MemorySnapshot {
    pub total_mib: u64,
    pub used_mib: u64,
}

/// Host-wide memory usage, as reported by the OS.
pub fn memory_snapshot() -> MemorySnapshot {
    let mut sys = System::new();
    sys.refresh_memory();

    MemorySnapshot {
        total_mib: sys.total_memory() / MIB,
        used_mib: sys.used_memory() / MIB,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn used_never_exceeds_total() {
        let snapshot = memory_snapshot();
        assert!(snapshot.used_mib <= snapshot.total_mib);
    }
}
