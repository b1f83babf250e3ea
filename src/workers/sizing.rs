use crate::config::WorkersConfig;
use crate::transcribe::EngineDescriptor;
use crate::utils::available_memory_bytes;

const GIB: f64 = 1024.0 * 1024.0 * 1024.0;

/// Decides how many chunk workers a job may run
#[derive(Debug, Clone)]
pub struct WorkerSizing {
    pub min_workers: usize,
    pub max_workers: usize,
    /// Share of available memory the pool may claim
    pub safety_factor: f64,
    /// Assumed available memory when the system cannot be queried
    pub fallback_memory_bytes: u64,
}

impl WorkerSizing {
    pub fn from_config(config: &WorkersConfig) -> Self {
        Self {
            min_workers: config.min_workers,
            max_workers: config.max_workers,
            safety_factor: config.memory_safety_factor,
            fallback_memory_bytes: (config.fallback_memory_gb * GIB) as u64,
        }
    }

    /// Worker count from chunk count alone, before any memory cap
    pub fn desired(&self, total_chunks: usize) -> usize {
        let min = self.min_workers.max(1);
        let max = self.max_workers.max(min);

        let stepped = match total_chunks {
            0..=2 => min,
            3..=5 => 3,
            6..=10 => 5,
            11..=20 => 7,
            n => (n / 2).max(5),
        };

        stepped.clamp(min, max)
    }

    /// Workers that fit into this job's share of memory, never below one
    pub fn memory_ceiling(&self, available_bytes: u64, active_jobs: usize, per_worker_bytes: u64) -> usize {
        if per_worker_bytes == 0 {
            return usize::MAX;
        }
        let share = available_bytes as f64 / active_jobs.max(1) as f64;
        let ceiling = (share * self.safety_factor / per_worker_bytes as f64).floor() as usize;
        ceiling.max(1)
    }

    /// Combine the chunk-driven target with the memory ceiling
    pub fn workers_for(
        &self,
        total_chunks: usize,
        per_worker_bytes: u64,
        available_bytes: u64,
        active_jobs: usize,
    ) -> usize {
        let desired = self.desired(total_chunks);
        let ceiling = self.memory_ceiling(available_bytes, active_jobs, per_worker_bytes);

        if ceiling < desired {
            tracing::info!(
                desired,
                ceiling,
                active_jobs,
                available_gb = available_bytes as f64 / GIB,
                "Reducing workers due to memory constraints"
            );
        }
        desired.min(ceiling).max(1)
    }

    /// Size the pool for `engine` against the memory the system reports right now
    pub fn compute(&self, total_chunks: usize, engine: &EngineDescriptor, active_jobs: usize) -> usize {
        let available = available_memory_bytes().unwrap_or_else(|| {
            tracing::debug!("Could not read available memory, using configured fallback");
            self.fallback_memory_bytes
        });
        self.workers_for(total_chunks, engine.memory_per_worker_bytes(), available, active_jobs)
    }
}

impl Default for WorkerSizing {
    fn default() -> Self {
        Self::from_config(&WorkersConfig::default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const GB: u64 = 1024 * 1024 * 1024;

    fn sizing(min: usize, max: usize) -> WorkerSizing {
        WorkerSizing {
            min_workers: min,
            max_workers: max,
            safety_factor: 0.7,
            fallback_memory_bytes: 8 * GB,
        }
    }

    #[test]
    fn test_step_table() {
        let s = sizing(1, 10);
        assert_eq!(s.desired(1), 1);
        assert_eq!(s.desired(2), 1);
        assert_eq!(s.desired(4), 3);
        assert_eq!(s.desired(8), 5);
        assert_eq!(s.desired(13), 7);
        assert_eq!(s.desired(30), 10);
        assert_eq!(sizing(1, 20).desired(30), 15);
        assert_eq!(sizing(1, 20).desired(21), 10);
    }

    #[test]
    fn test_small_batches_use_min_workers() {
        assert_eq!(sizing(4, 10).desired(2), 4);
        assert_eq!(sizing(4, 10).desired(0), 4);
        // plenty of memory: one chunk still gets the configured floor
        assert_eq!(sizing(3, 8).workers_for(1, GB / 10, 64 * GB, 1), 3);
    }

    #[test]
    fn test_memory_ceiling_caps_local_model() {
        let s = sizing(1, 10);
        // 8 GB * 0.7 / 2.5 GB = 2.24
        let per_worker = (2.5 * GB as f64) as u64;
        assert_eq!(s.workers_for(13, per_worker, 8 * GB, 1), 2);
        // two active jobs halve the share
        assert_eq!(s.workers_for(13, per_worker, 8 * GB, 2), 1);
    }

    #[test]
    fn test_bounds_hold_across_inputs() {
        for min in 1..4 {
            for max in min..12 {
                let s = sizing(min, max);
                for chunks in 0..60 {
                    for available_gb in [1u64, 4, 16, 64] {
                        for per_worker in [GB / 10, GB, 3 * GB] {
                            for active in 1..4 {
                                let workers = s.workers_for(chunks, per_worker, available_gb * GB, active);
                                let ceiling = s.memory_ceiling(available_gb * GB, active, per_worker);
                                assert!(workers >= 1);
                                assert!(workers <= max);
                                assert!(workers <= ceiling);
                                if ceiling >= min {
                                    assert!(workers >= min);
                                }
                            }
                        }
                    }
                }
            }
        }
    }
}
