//! Resource governor for the extractor worker pool.
//!
//! Samples CPU and memory pressure, maintains an EMA of both, and scales a
//! concurrency factor in `[0.1, 3.0]` around the baseline worker count:
//! sustained pressure above 90% throttles, sustained idle below 10% boosts.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Mutex;
use sysinfo::System;

const EMA_ALPHA: f64 = 0.3;
const FACTOR_MIN: f64 = 0.1;
const FACTOR_MAX: f64 = 3.0;
const PRESSURE_HIGH: f64 = 90.0;
const IDLE_LOW: f64 = 10.0;

pub struct ResourceGovernor {
    sys: Mutex<System>,
    cpu_ema: AtomicU64,
    mem_ema: AtomicU64,
    factor: AtomicU64,
}

fn store_f64(slot: &AtomicU64, value: f64) {
    slot.store(value.to_bits(), Ordering::Relaxed);
}

fn load_f64(slot: &AtomicU64) -> f64 {
    f64::from_bits(slot.load(Ordering::Relaxed))
}

impl ResourceGovernor {
    #[must_use]
    pub fn new() -> Self {
        let gov = Self {
            sys: Mutex::new(System::new()),
            cpu_ema: AtomicU64::new(0),
            mem_ema: AtomicU64::new(0),
            factor: AtomicU64::new(0),
        };
        store_f64(&gov.cpu_ema, 50.0);
        store_f64(&gov.mem_ema, 50.0);
        store_f64(&gov.factor, 1.0);
        gov
    }

    /// Takes one sample and updates the concurrency factor.
    pub fn sample(&self) {
        let (cpu, mem) = {
            let Ok(mut sys) = self.sys.lock() else { return };
            sys.refresh_cpu_usage();
            sys.refresh_memory();
            let cpu = f64::from(sys.global_cpu_usage());
            let total = sys.total_memory();
            let mem = if total == 0 {
                0.0
            } else {
                sys.used_memory() as f64 / total as f64 * 100.0
            };
            (cpu, mem)
        };
        self.apply_sample(cpu, mem);
    }

    /// EMA update and factor adjustment, separated for testability.
    pub fn apply_sample(&self, cpu_pct: f64, mem_pct: f64) {
        let cpu = EMA_ALPHA * cpu_pct + (1.0 - EMA_ALPHA) * load_f64(&self.cpu_ema);
        let mem = EMA_ALPHA * mem_pct + (1.0 - EMA_ALPHA) * load_f64(&self.mem_ema);
        store_f64(&self.cpu_ema, cpu);
        store_f64(&self.mem_ema, mem);

        let mut factor = load_f64(&self.factor);
        if cpu > PRESSURE_HIGH || mem > PRESSURE_HIGH {
            factor *= 0.8;
        } else if cpu < IDLE_LOW && mem < PRESSURE_HIGH {
            factor *= 1.15;
        } else {
            // Drift back toward neutral when pressure is moderate.
            factor += (1.0 - factor) * 0.1;
        }
        store_f64(&self.factor, factor.clamp(FACTOR_MIN, FACTOR_MAX));
    }

    #[must_use]
    pub fn factor(&self) -> f64 {
        load_f64(&self.factor)
    }

    #[must_use]
    pub fn cpu_ema(&self) -> f64 {
        load_f64(&self.cpu_ema)
    }

    #[must_use]
    pub fn mem_ema(&self) -> f64 {
        load_f64(&self.mem_ema)
    }

    /// Active worker target around the baseline, never below one.
    #[must_use]
    pub fn worker_target(&self, baseline: usize) -> usize {
        let scaled = (baseline as f64 * self.factor()).round() as usize;
        scaled.clamp(1, baseline.saturating_mul(3).max(1))
    }
}

impl Default for ResourceGovernor {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sustained_pressure_throttles() {
        let gov = ResourceGovernor::new();
        for _ in 0..30 {
            gov.apply_sample(98.0, 60.0);
        }
        assert!(gov.factor() < 0.5);
        assert_eq!(gov.worker_target(4), 1);
    }

    #[test]
    fn test_sustained_idle_boosts() {
        let gov = ResourceGovernor::new();
        for _ in 0..60 {
            gov.apply_sample(2.0, 30.0);
        }
        assert!(gov.factor() > 1.5);
        assert!(gov.worker_target(4) > 4);
    }

    #[test]
    fn test_factor_stays_in_bounds() {
        let gov = ResourceGovernor::new();
        for _ in 0..500 {
            gov.apply_sample(100.0, 100.0);
        }
        assert!(gov.factor() >= FACTOR_MIN);
        for _ in 0..500 {
            gov.apply_sample(0.0, 0.0);
        }
        assert!(gov.factor() <= FACTOR_MAX);
        assert!(gov.worker_target(4) <= 12);
    }

    #[test]
    fn test_moderate_load_drifts_to_neutral() {
        let gov = ResourceGovernor::new();
        for _ in 0..100 {
            gov.apply_sample(0.0, 0.0);
        }
        for _ in 0..200 {
            gov.apply_sample(50.0, 50.0);
        }
        assert!((gov.factor() - 1.0).abs() < 0.1);
    }
}
