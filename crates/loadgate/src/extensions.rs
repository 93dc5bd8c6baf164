//! Extension traits for common configuration patterns.

use crate::worker::WorkerBuilder;

/// Extension trait for CPU-based parallelism caps.
pub trait WithSysParallelismCpus {
    /// Caps the worker's parallelism at the number of available CPU
    /// cores.
    ///
    /// # Example
    ///
    /// ```rust
    /// use loadgate::Worker;
    /// use loadgate::extensions::WithSysParallelismCpus;
    ///
    /// # fn example() -> Result<(), loadgate::ConfigError> {
    /// let worker = Worker::builder()
    ///     .with_loop_count(100)
    ///     .with_parallelism_to_system_cpus()
    ///     .build()?;
    /// # Ok(())
    /// # }
    /// ```
    ///
    /// # Panics
    ///
    /// Panics if the system's available parallelism cannot be determined.
    fn with_parallelism_to_system_cpus(self) -> Self;
}

impl WithSysParallelismCpus for WorkerBuilder {
    fn with_parallelism_to_system_cpus(self) -> Self {
        let cpus = std::thread::available_parallelism()
            .expect("to be able to get system cpu info")
            .get();
        self.with_max_parallelism(cpus as i32)
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::worker::Worker;

    #[test]
    fn test_cpu_cap_builds() {
        Worker::builder()
            .with_parallelism_to_system_cpus()
            .build()
            .expect("cpu-derived cap must be valid");
    }

    #[test]
    fn test_cpu_cap_conflicts_with_explicit_cap() {
        Worker::builder()
            .with_max_parallelism(4)
            .with_parallelism_to_system_cpus()
            .build()
            .expect_err("parallelism axis must stay single-option");
    }
}
