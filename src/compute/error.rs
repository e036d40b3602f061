//! Compute-side error taxonomy.

use std::path::PathBuf;

use super::program::{KernelKey, ProgramKey};
use super::status::Status;

/// Errors raised by the compute resource manager.
///
/// Every variant is fatal for the operation that raised it; nothing is
/// retried.
#[derive(Debug, thiserror::Error)]
pub enum ComputeError {
    #[error("OpenCL Error: {status} in {call}")]
    Device { call: &'static str, status: Status },
    #[error("Failed to compile compute program ({program}): {status}\n{log}")]
    Build {
        program: String,
        status: Status,
        log: String,
    },
    #[error("Kernel `{kernel}` not found in compute program `{program}`")]
    KernelNotFound { program: String, kernel: String },
    #[error("Global compute context instance already exists")]
    DuplicateContext,
    #[error("No compute context has been created")]
    NoContext,
    #[error("No compute platform available")]
    NoPlatform,
    #[error("No GPU device available")]
    NoDevice,
    #[error("No active rendering surface to share with")]
    NoSurface,
    #[error("Failed to read compute source {}: {source}", .path.display())]
    Source {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("Command queue {0} does not exist")]
    UnknownQueue(usize),
    #[error("Compute program {0:?} does not exist")]
    UnknownProgram(ProgramKey),
    #[error("Kernel {0:?} does not exist")]
    UnknownKernel(KernelKey),
}

impl ComputeError {
    /// Device status carried by this error, if any.
    pub fn status(&self) -> Option<Status> {
        match self {
            ComputeError::Device { status, .. } | ComputeError::Build { status, .. } => {
                Some(*status)
            }
            _ => None,
        }
    }
}

pub type ComputeResult<T> = Result<T, ComputeError>;

/// Attaches the API call name to a raw device status.
pub(crate) trait StatusExt<T> {
    fn call(self, call: &'static str) -> ComputeResult<T>;
}

impl<T> StatusExt<T> for Result<T, Status> {
    fn call(self, call: &'static str) -> ComputeResult<T> {
        self.map_err(|status| ComputeError::Device { call, status })
    }
}

/// Keeps the first error of a teardown sequence while the remaining steps
/// still run.
pub(crate) fn keep_first(first: &mut Option<ComputeError>, result: ComputeResult<()>) {
    if let Err(e) = result {
        if first.is_none() {
            *first = Some(e);
        } else {
            log::error!("Additional teardown failure: {}", e);
        }
    }
}
