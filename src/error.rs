use std::io;

use thiserror::Error;

pub type Result<T> = std::result::Result<T, Error>;

/// Errors that surface as `Err` rather than as a boolean or a zero count.
///
/// Almost every failure in this crate is reported through a return value the
/// caller inspects (`false` from a bind attempt, `0` from `send`/`recv`); only
/// reactor construction and the readiness wait itself can fail exceptionally.
#[derive(Debug, Error)]
pub enum Error {
    /// The OS polling facility could not be created.
    #[error("reactor initialization failed: {0}")]
    Init(#[source] io::Error),

    /// The readiness wait failed. Aborts the current dispatch cycle only; the
    /// next `run_once` call retries implicitly.
    #[error("readiness wait failed: {0}")]
    Wait(#[source] io::Error),
}
