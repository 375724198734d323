use std::fs;
use std::time::{Duration, Instant};

/// Resident set size of this process in KiB, or 0 where `/proc` is missing.
pub fn get_rss_memory() -> u64 {
    if let Ok(statm) = fs::read_to_string("/proc/self/statm") {
        if let Some(rss_str) = statm.split_whitespace().nth(1) {
            if let Ok(rss) = rss_str.parse::<u64>() {
                return rss * 4096 / 1024; // pages to KiB
            }
        }
    }
    0
}

/// Wall time and RSS growth over a stretch of work. RSS is process-wide, so
/// with concurrent tasks the delta includes everyone else's allocations.
pub struct ResourceMeter {
    started: Instant,
    initial_memory: u64,
}

impl ResourceMeter {
    pub fn start() -> Self {
        Self {
            started: Instant::now(),
            initial_memory: get_rss_memory(),
        }
    }

    /// Elapsed time and memory delta in KiB (negative when memory was freed).
    pub fn finish(&self) -> (Duration, i64) {
        let final_memory = get_rss_memory();
        (
            self.started.elapsed(),
            final_memory as i64 - self.initial_memory as i64,
        )
    }
}
