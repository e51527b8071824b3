use thiserror::Error;

/// Failures the drain engine records. None of them escape a drain loop; they
/// are logged and reported in [`crate::queue::DrainReport`].
#[derive(Debug, Error)]
pub enum Error {
    #[error("followup delivery for \"{key}\" failed (attempt {attempt}): {source:#}")]
    DrainCallback {
        key: String,
        attempt: u32,
        #[source]
        source: anyhow::Error,
    },

    #[error("followup queue \"{key}\" gave up after {retries} failed attempts; discarded {discarded}")]
    RetriesExhausted {
        key: String,
        retries: u32,
        discarded: usize,
    },

    #[error("followup queue \"{key}\" stuck draining for {draining_ms}ms; cleared {cleared}")]
    StuckDrain {
        key: String,
        draining_ms: u64,
        cleared: usize,
    },
}

pub type Result<T> = std::result::Result<T, Error>;
