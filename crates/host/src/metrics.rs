//! Per-session counters and latency samples
//!
//! Byte counters are updated by the shell pump and SFTP engine; latency
//! samples come from the keep-alive loop (client round trip plus an SSH-side
//! probe). Everything here is observational and never drives control flow.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Mutex;
use std::time::Instant;

/// Samples retained per session.
const SAMPLE_CAP: usize = 32;

/// Monotonic byte counters for one session.
#[derive(Debug, Default)]
pub struct SessionCounters {
    bytes_in: AtomicU64,
    bytes_out: AtomicU64,
}

impl SessionCounters {
    pub fn add_in(&self, n: u64) {
        self.bytes_in.fetch_add(n, Ordering::Relaxed);
    }

    pub fn add_out(&self, n: u64) {
        self.bytes_out.fetch_add(n, Ordering::Relaxed);
    }

    pub fn bytes_in(&self) -> u64 {
        self.bytes_in.load(Ordering::Relaxed)
    }

    pub fn bytes_out(&self) -> u64 {
        self.bytes_out.load(Ordering::Relaxed)
    }
}

/// One keep-alive measurement, all in milliseconds.
#[derive(Debug, Clone, Copy)]
pub struct LatencySample {
    pub remote_ms: u64,
    pub local_ms: u64,
    pub total_ms: u64,
}

/// Bounded ring of latency samples.
#[derive(Debug, Default)]
pub struct LatencySampler {
    samples: Mutex<VecDeque<LatencySample>>,
}

impl LatencySampler {
    pub fn record(&self, remote_ms: u64, local_ms: u64) -> LatencySample {
        let sample = LatencySample {
            remote_ms,
            local_ms,
            total_ms: remote_ms + local_ms,
        };
        let mut samples = self.samples.lock().unwrap();
        if samples.len() == SAMPLE_CAP {
            samples.pop_front();
        }
        samples.push_back(sample);
        sample
    }

    pub fn latest(&self) -> Option<LatencySample> {
        self.samples.lock().unwrap().back().copied()
    }

    pub fn len(&self) -> usize {
        self.samples.lock().unwrap().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Milliseconds since an arbitrary process-local origin; used to stamp
/// heartbeat frames with a monotonic clock.
pub fn monotonic_ms(origin: Instant) -> u64 {
    u64::try_from(origin.elapsed().as_millis()).unwrap_or(u64::MAX)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_counters_accumulate() {
        let c = SessionCounters::default();
        c.add_in(10);
        c.add_in(5);
        c.add_out(7);
        assert_eq!(c.bytes_in(), 15);
        assert_eq!(c.bytes_out(), 7);
    }

    #[test]
    fn test_sampler_caps_and_totals() {
        let s = LatencySampler::default();
        for i in 0..40 {
            s.record(i, 1);
        }
        assert_eq!(s.len(), SAMPLE_CAP);
        let last = s.latest().unwrap();
        assert_eq!(last.remote_ms, 39);
        assert_eq!(last.total_ms, 40);
    }

    #[test]
    fn test_monotonic_ms_non_decreasing() {
        let origin = Instant::now();
        let a = monotonic_ms(origin);
        let b = monotonic_ms(origin);
        assert!(b >= a);
    }
}
