//! Compiled compute programs and the kernels they own.

use std::sync::Arc;

use super::api::{ComputeApi, ContextHandle, DeviceHandle, ProgramHandle};
use super::error::{keep_first, ComputeError, ComputeResult, StatusExt};
use super::kernel::Kernel;

/// Key of a program owned by a [`DeviceContext`](super::DeviceContext).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ProgramKey(pub(crate) usize);

/// Key of a kernel: owning program plus position in its kernel list.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct KernelKey {
    pub program: ProgramKey,
    pub(crate) index: usize,
}

/// Default cap on surfaced build-log text.
pub const BUILD_LOG_CAPACITY: usize = 10_000;

/// A compiled unit of device code and the kernels extracted from it.
pub struct Program {
    api: Arc<dyn ComputeApi>,
    context: ContextHandle,
    name: String,
    handle: ProgramHandle,
    kernels: Vec<Kernel>,
    released: bool,
}

impl Program {
    /// Creates and synchronously builds a program from source text.
    ///
    /// On build failure the driver log (capped at `log_capacity` characters)
    /// is returned in [`ComputeError::Build`] and the program handle is
    /// released before returning.
    pub(crate) fn new(
        api: Arc<dyn ComputeApi>,
        context: ContextHandle,
        device: DeviceHandle,
        name: &str,
        source: &str,
        log_capacity: usize,
    ) -> ComputeResult<Self> {
        let handle = api
            .create_program_with_source(context, source)
            .call("clCreateProgramWithSource")?;

        if let Err(status) = api.build_program(handle, device) {
            let log = match api.program_build_log(handle, device) {
                Ok(log) => truncate_log(log, log_capacity),
                Err(log_status) => format!("<build log unavailable: {}>", log_status),
            };
            log::error!("Failed to compile compute program ({})\n{}", name, log);
            if let Err(release_status) = api.release_program(handle) {
                log::error!(
                    "Failed to release unbuilt program {}: {}",
                    name,
                    release_status
                );
            }
            return Err(ComputeError::Build {
                program: name.to_string(),
                status,
                log,
            });
        }

        log::debug!("Created Compute Program: {}", name);
        Ok(Self {
            api,
            context,
            name: name.to_string(),
            handle,
            kernels: Vec::new(),
            released: false,
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn handle(&self) -> ProgramHandle {
        self.handle
    }

    pub fn kernels(&self) -> &[Kernel] {
        &self.kernels
    }

    pub fn kernel(&self, index: usize) -> Option<&Kernel> {
        self.kernels.get(index)
    }

    pub fn kernel_mut(&mut self, index: usize) -> Option<&mut Kernel> {
        self.kernels.get_mut(index)
    }

    /// Extracts the entry point `entry` and returns its index in this program.
    pub fn create_kernel(&mut self, entry: &str) -> ComputeResult<usize> {
        let kernel = Kernel::new(
            self.api.clone(),
            self.context,
            self.handle,
            &self.name,
            entry,
        )?;
        self.kernels.push(kernel);
        Ok(self.kernels.len() - 1)
    }

    /// Destroys all kernels (and their memory objects), then the program.
    pub fn destroy(mut self) -> ComputeResult<()> {
        self.release()
    }

    fn release(&mut self) -> ComputeResult<()> {
        if self.released {
            return Ok(());
        }
        self.released = true;

        let mut first = None;
        for mut kernel in self.kernels.drain(..) {
            keep_first(&mut first, kernel.release());
        }
        keep_first(
            &mut first,
            self.api.release_program(self.handle).call("clReleaseProgram"),
        );
        log::debug!("Destroyed Compute Program: {}", self.name);

        first.map_or(Ok(()), Err)
    }
}

impl Drop for Program {
    fn drop(&mut self) {
        if let Err(e) = self.release() {
            log::error!("Failed to destroy compute program {}: {}", self.name, e);
        }
    }
}

impl std::fmt::Debug for Program {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Program")
            .field("name", &self.name)
            .field("handle", &self.handle)
            .field("kernels", &self.kernels)
            .finish()
    }
}

/// Caps a build log at `capacity` characters.
fn truncate_log(log: String, capacity: usize) -> String {
    match log.char_indices().nth(capacity) {
        Some((end, _)) => log[..end].to_string(),
        None => log,
    }
}
