//! Advisory process-memory sampling.

use parking_lot::Mutex;
use sysinfo::{Pid, ProcessExt, System, SystemExt};

/// Samples the resident set size of the current process.
///
/// Readings feed the advisory `peak_memory_bytes` counter; failures simply
/// report zero rather than disturbing the record path.
pub struct MemorySampler {
    system: Mutex<System>,
    pid: Option<Pid>,
}

impl MemorySampler {
    /// Creates a sampler bound to the current process.
    pub fn new() -> Self {
        Self {
            system: Mutex::new(System::new()),
            pid: sysinfo::get_current_pid().ok(),
        }
    }

    /// Current RSS in bytes, or zero when sampling is unavailable.
    pub fn current_rss_bytes(&self) -> u64 {
        let pid = match self.pid {
            Some(pid) => pid,
            None => return 0,
        };
        let mut system = self.system.lock();
        if !system.refresh_process(pid) {
            return 0;
        }
        system.process(pid).map(|p| p.memory()).unwrap_or(0)
    }
}

impl Default for MemorySampler {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sampling_the_current_process_reports_memory() {
        let sampler = MemorySampler::new();
        // The test binary certainly has a nonzero RSS.
        assert!(sampler.current_rss_bytes() > 0);
    }
}
