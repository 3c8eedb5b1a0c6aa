#[cfg(target_env = "msvc")]
pub use std::alloc::System as DefaultAllocator;
#[cfg(not(target_env = "msvc"))]
pub use tikv_jemallocator::Jemalloc as DefaultAllocator;

#[macro_export]
macro_rules! used {
    () => {
        #[global_allocator]
        static GLOBAL: $crate::DefaultAllocator = $crate::DefaultAllocator;
    };
}

/// Point-in-time allocator statistics, in bytes.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct MemoryStats {
    /// Bytes handed out to the application and not yet freed.
    pub allocated: u64,
    /// Bytes in pages backing at least one live allocation.
    pub active: u64,
    /// Bytes of physical memory the allocator holds from the OS.
    pub resident: u64,
}

/// Read current allocator statistics. jemalloc caches its counters; the
/// epoch must be advanced to refresh them before reading.
#[cfg(not(target_env = "msvc"))]
pub fn sample() -> Result<MemoryStats, tikv_jemalloc_ctl::Error> {
    use tikv_jemalloc_ctl::{epoch, stats};

    epoch::advance()?;
    Ok(MemoryStats {
        allocated: stats::allocated::read()? as u64,
        active: stats::active::read()? as u64,
        resident: stats::resident::read()? as u64,
    })
}

/// The system allocator exposes no counters; report zeros rather than
/// failing the caller's sampling loop.
#[cfg(target_env = "msvc")]
pub fn sample() -> Result<MemoryStats, std::convert::Infallible> {
    Ok(MemoryStats::default())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sample_reads_counters() {
        let stats = sample().expect("allocator statistics unavailable");
        // active pages always cover at least the allocated bytes
        assert!(stats.active >= stats.allocated || stats.active == 0);
    }
}
