//! The shared compute context: device discovery, queues and program
//! ownership.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use super::api::{
    ComputeApi, ContextHandle, ContextProperties, DeviceHandle, DeviceType, PlatformHandle,
    QueueProperties,
};
use super::error::{keep_first, ComputeError, ComputeResult, StatusExt};
use super::kernel::Kernel;
use super::program::{KernelKey, Program, ProgramKey};
use super::queue::CommandQueue;
use super::status::Status;
use crate::config::RuntimeConfig;
use crate::graphics::SurfaceHandles;

/// Owner of the compute context bound to the active rendering surface.
///
/// Created through [`Runtime::create_context`](crate::Runtime::create_context),
/// which allows at most one at a time. Teardown order is programs (and with
/// them kernels and memory objects), then queues, then the context.
pub struct DeviceContext {
    api: Arc<dyn ComputeApi>,
    platform: PlatformHandle,
    device: DeviceHandle,
    device_name: String,
    handle: ContextHandle,
    queues: Vec<CommandQueue>,
    /// Destroyed programs leave an empty slot; keys are never reused.
    programs: Vec<Option<Program>>,
    resource_root: PathBuf,
    build_log_capacity: usize,
    released: bool,
}

impl DeviceContext {
    pub(crate) fn create(
        api: Arc<dyn ComputeApi>,
        surface: SurfaceHandles,
        config: &RuntimeConfig,
    ) -> ComputeResult<Self> {
        let platform = match api.platform_ids() {
            Ok(ids) => ids.into_iter().next().ok_or(ComputeError::NoPlatform)?,
            Err(Status::PLATFORM_NOT_FOUND_KHR) => return Err(ComputeError::NoPlatform),
            Err(status) => {
                return Err(ComputeError::Device {
                    call: "clGetPlatformIDs",
                    status,
                })
            }
        };

        let device = match api.device_ids(platform, DeviceType::Gpu) {
            Ok(ids) => ids.into_iter().next().ok_or(ComputeError::NoDevice)?,
            Err(Status::DEVICE_NOT_FOUND) => return Err(ComputeError::NoDevice),
            Err(status) => {
                return Err(ComputeError::Device {
                    call: "clGetDeviceIDs",
                    status,
                })
            }
        };
        let device_name = api.device_name(device).call("clGetDeviceInfo")?;
        log::info!("Using compute device: {}", device_name);

        let properties = ContextProperties {
            platform,
            surface: Some(surface),
        };
        let handle = api
            .create_context(device, &properties)
            .call("clCreateContext")?;

        // From here on a failure drops `context`, which releases what exists.
        let mut context = Self {
            api,
            platform,
            device,
            device_name,
            handle,
            queues: Vec::new(),
            programs: Vec::new(),
            resource_root: config.resource_root.clone(),
            build_log_capacity: config.build_log_capacity,
            released: false,
        };
        let properties = QueueProperties {
            profiling: config.queue_profiling,
            out_of_order: false,
        };
        for _ in 0..config.queue_count {
            context.create_queue(properties)?;
        }

        log::debug!("Created Compute Handler");
        Ok(context)
    }

    pub fn handle(&self) -> ContextHandle {
        self.handle
    }

    pub fn platform(&self) -> PlatformHandle {
        self.platform
    }

    pub fn device(&self) -> DeviceHandle {
        self.device
    }

    pub fn device_name(&self) -> &str {
        &self.device_name
    }

    pub fn resource_root(&self) -> &Path {
        &self.resource_root
    }

    /// Allocates a new command queue and returns its index.
    pub fn create_queue(&mut self, properties: QueueProperties) -> ComputeResult<usize> {
        let handle = self
            .api
            .create_queue(self.handle, self.device, properties)
            .call("clCreateCommandQueue")?;
        self.queues.push(CommandQueue::new(self.api.clone(), handle));
        Ok(self.queues.len() - 1)
    }

    pub fn queue(&self, index: usize) -> ComputeResult<&CommandQueue> {
        self.queues
            .get(index)
            .ok_or(ComputeError::UnknownQueue(index))
    }

    pub fn queues(&self) -> &[CommandQueue] {
        &self.queues
    }

    /// Compiles `source` into a program tracked by this context.
    ///
    /// A program that fails to build is not registered.
    pub fn create_program(&mut self, name: &str, source: &str) -> ComputeResult<ProgramKey> {
        let program = Program::new(
            self.api.clone(),
            self.handle,
            self.device,
            name,
            source,
            self.build_log_capacity,
        )?;
        self.programs.push(Some(program));
        Ok(ProgramKey(self.programs.len() - 1))
    }

    /// Reads `path` (relative to the resource root) and compiles it.
    pub fn create_program_from_file(&mut self, path: impl AsRef<Path>) -> ComputeResult<ProgramKey> {
        let path = path.as_ref();
        let full = self.resource_root.join(path);
        let source = std::fs::read_to_string(&full).map_err(|source| {
            log::error!("Failed to open file: {}", full.display());
            ComputeError::Source {
                path: full.clone(),
                source,
            }
        })?;
        self.create_program(&path.to_string_lossy(), &source)
    }

    pub fn program(&self, key: ProgramKey) -> ComputeResult<&Program> {
        self.programs
            .get(key.0)
            .and_then(Option::as_ref)
            .ok_or(ComputeError::UnknownProgram(key))
    }

    pub fn program_mut(&mut self, key: ProgramKey) -> ComputeResult<&mut Program> {
        self.programs
            .get_mut(key.0)
            .and_then(Option::as_mut)
            .ok_or(ComputeError::UnknownProgram(key))
    }

    /// Live programs in creation order.
    pub fn programs(&self) -> impl Iterator<Item = (ProgramKey, &Program)> {
        self.programs
            .iter()
            .enumerate()
            .filter_map(|(i, p)| p.as_ref().map(|p| (ProgramKey(i), p)))
    }

    /// Extracts entry point `entry` from a tracked program.
    pub fn create_kernel(&mut self, program: ProgramKey, entry: &str) -> ComputeResult<KernelKey> {
        let index = self.program_mut(program)?.create_kernel(entry)?;
        Ok(KernelKey { program, index })
    }

    pub fn kernel(&self, key: KernelKey) -> ComputeResult<&Kernel> {
        self.program(key.program)?
            .kernel(key.index)
            .ok_or(ComputeError::UnknownKernel(key))
    }

    pub fn kernel_mut(&mut self, key: KernelKey) -> ComputeResult<&mut Kernel> {
        self.program_mut(key.program)?
            .kernel_mut(key.index)
            .ok_or(ComputeError::UnknownKernel(key))
    }

    /// Destroys one program, cascading to its kernels and memory objects.
    pub fn destroy_program(&mut self, key: ProgramKey) -> ComputeResult<()> {
        let program = self
            .programs
            .get_mut(key.0)
            .and_then(Option::take)
            .ok_or(ComputeError::UnknownProgram(key))?;
        program.destroy()
    }

    /// Tears down programs, queues and the context, in that order.
    ///
    /// Every step runs even if an earlier one fails; the first failure is
    /// returned.
    pub fn destroy(mut self) -> ComputeResult<()> {
        self.release()
    }

    fn release(&mut self) -> ComputeResult<()> {
        if self.released {
            return Ok(());
        }
        self.released = true;

        let mut first = None;
        for program in self.programs.drain(..).flatten() {
            keep_first(&mut first, program.destroy());
        }
        for queue in self.queues.drain(..) {
            keep_first(
                &mut first,
                self.api
                    .release_queue(queue.handle())
                    .call("clReleaseCommandQueue"),
            );
        }
        keep_first(
            &mut first,
            self.api.release_context(self.handle).call("clReleaseContext"),
        );
        log::debug!("Destroyed Compute Handler");

        first.map_or(Ok(()), Err)
    }
}

impl Drop for DeviceContext {
    fn drop(&mut self) {
        if let Err(e) = self.release() {
            log::error!("Failed to destroy compute context: {}", e);
        }
    }
}

impl std::fmt::Debug for DeviceContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DeviceContext")
            .field("device", &self.device_name)
            .field("handle", &self.handle)
            .field("queues", &self.queues.len())
            .field("programs", &self.programs().count())
            .finish()
    }
}
