//! Execution context: the engine's one explicit, caller-owned resource.
//!
//! Per the Design Notes in `spec.md` §9 — "Process-wide singletons (the
//! thread pool, the staging directory) become explicit context passed into
//! the engine" — this replaces the Python original's module-level
//! `parallel_analysis_executor = ThreadPoolExecutor()` with a value the
//! caller constructs once and threads through `run_analysis`.

use std::path::PathBuf;

use rayon::{ThreadPool, ThreadPoolBuilder};

/// Execution context for one or more analyses: a bounded thread pool for
/// subset enumeration (`spec.md` §5), and an optional staging directory
/// for file-backed uploads (`spec.md` §6). The engine only ever reads from
/// `staging_dir`; writing to it is the ingest path's job (see
/// [`crate::staging`]).
pub struct EngineContext {
    pool: ThreadPool,
    staging_dir: Option<PathBuf>,
}

impl EngineContext {
    /// Builds a context with a thread pool sized to the available
    /// parallelism, and no staging directory.
    pub fn new() -> Self {
        let threads = std::thread::available_parallelism()
            .map(|n| n.get())
            .unwrap_or(1);
        Self::with_threads(threads)
    }

    /// Builds a context with an explicitly sized thread pool.
    pub fn with_threads(threads: usize) -> Self {
        let pool = ThreadPoolBuilder::new()
            .num_threads(threads.max(1))
            .build()
            .expect("failed to build the subset-analysis thread pool");
        Self {
            pool,
            staging_dir: None,
        }
    }

    /// Attaches a staging directory used by [`crate::staging::stage_file`].
    pub fn with_staging_dir(mut self, dir: PathBuf) -> Self {
        self.staging_dir = Some(dir);
        self
    }

    /// The staging directory, if one was configured.
    pub fn staging_dir(&self) -> Option<&PathBuf> {
        self.staging_dir.as_ref()
    }

    /// The bounded thread pool subset enumeration runs on.
    pub fn pool(&self) -> &ThreadPool {
        &self.pool
    }
}

impl Default for EngineContext {
    fn default() -> Self {
        Self::new()
    }
}
