//! In-process emulated device.
//!
//! [`HostDevice`] implements both [`ComputeApi`](crate::compute::ComputeApi)
//! and [`GraphicsApi`](crate::graphics::GraphicsApi) over one store, so
//! compute memory objects created from textures, renderbuffers and vertex
//! buffers alias the very same bytes the graphics side reads. Kernels are
//! host functions registered by entry-point name.
//!
//! The device checks what a driver would only leave undefined: dispatching a
//! shared object without acquiring it, graphics access to an object compute
//! still holds, releasing anything twice, and tearing down a context before
//! its children. Every create and release is counted in [`HostStats`].

mod compute;
mod graphics;
mod kernels;
mod state;

use std::collections::BTreeMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use crate::compute::{NdRange, Status};
use crate::graphics::{NativeId, SurfaceHandles};

pub use kernels::{scan_kernels, HostImage, KernelArgs, KernelSignature};
pub use state::TextureParams;

use state::HostState;

/// Host implementation of a kernel entry point.
pub type HostKernelFn =
    Arc<dyn Fn(&mut KernelArgs, &NdRange) -> Result<(), Status> + Send + Sync>;

/// Default surface size, matching a 512x512 window.
pub const DEFAULT_SURFACE_SIZE: (u32, u32) = (512, 512);

/// Name reported for the emulated device.
pub const HOST_DEVICE_NAME: &str = "Host Emulated GPU";

/// Counters of every object created and released on a [`HostDevice`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct HostStats {
    pub contexts_created: usize,
    pub contexts_released: usize,
    pub queues_created: usize,
    pub queues_released: usize,
    pub programs_created: usize,
    pub programs_released: usize,
    pub kernels_created: usize,
    pub kernels_released: usize,
    pub mems_created: usize,
    pub mems_released: usize,
    /// Releases of handles that were already released or never existed.
    pub invalid_releases: usize,
    pub dispatches: usize,
    pub acquires: usize,
    pub gl_releases: usize,
    pub textures_created: usize,
    pub textures_deleted: usize,
    pub renderbuffers_created: usize,
    pub renderbuffers_deleted: usize,
    pub framebuffers_created: usize,
    pub framebuffers_deleted: usize,
    /// Graphics objects deleted while a compute view of them was still alive.
    pub orphaned_views: usize,
}

impl HostStats {
    pub fn live_mem_objects(&self) -> usize {
        self.mems_created - self.mems_released
    }

    pub fn live_kernels(&self) -> usize {
        self.kernels_created - self.kernels_released
    }

    pub fn live_programs(&self) -> usize {
        self.programs_created - self.programs_released
    }

    /// Every compute object released exactly once.
    pub fn compute_clean(&self) -> bool {
        self.invalid_releases == 0
            && self.contexts_created == self.contexts_released
            && self.queues_created == self.queues_released
            && self.live_programs() == 0
            && self.live_kernels() == 0
            && self.live_mem_objects() == 0
    }

    /// Every graphics object deleted and no compute view outlived its target.
    pub fn graphics_clean(&self) -> bool {
        self.orphaned_views == 0
            && self.textures_created == self.textures_deleted
            && self.renderbuffers_created == self.renderbuffers_deleted
            && self.framebuffers_created == self.framebuffers_deleted
    }
}

/// Builder for a [`HostDevice`] with failure injection and custom kernels.
#[derive(Clone)]
pub struct HostDeviceBuilder {
    platform: bool,
    gpu: bool,
    refuse_context: bool,
    surface: Option<SurfaceHandles>,
    surface_size: (u32, u32),
    kernels: BTreeMap<String, HostKernelFn>,
}

impl Default for HostDeviceBuilder {
    fn default() -> Self {
        Self {
            platform: true,
            gpu: true,
            refuse_context: false,
            surface: Some(SurfaceHandles {
                gl_context: 0x1,
                display: 0x1,
            }),
            surface_size: DEFAULT_SURFACE_SIZE,
            kernels: BTreeMap::new(),
        }
    }
}

impl HostDeviceBuilder {
    /// Platform query reports no platform.
    pub fn no_platform(mut self) -> Self {
        self.platform = false;
        self
    }

    /// Device query finds no GPU.
    pub fn no_gpu(mut self) -> Self {
        self.gpu = false;
        self
    }

    /// Context creation fails with `CL_DEVICE_NOT_AVAILABLE`.
    pub fn refuse_context(mut self) -> Self {
        self.refuse_context = true;
        self
    }

    /// No active rendering surface.
    pub fn headless(mut self) -> Self {
        self.surface = None;
        self
    }

    pub fn surface_size(mut self, width: u32, height: u32) -> Self {
        self.surface_size = (width, height);
        self
    }

    /// Registers a host implementation for entry point `name`.
    pub fn kernel<F>(mut self, name: &str, kernel: F) -> Self
    where
        F: Fn(&mut KernelArgs, &NdRange) -> Result<(), Status> + Send + Sync + 'static,
    {
        self.kernels.insert(name.to_string(), Arc::new(kernel));
        self
    }

    /// Registers `vecAdd` and `xyPattern`.
    pub fn standard_kernels(mut self) -> Self {
        for (name, kernel) in kernels::standard_kernels() {
            self.kernels.insert(name.to_string(), kernel);
        }
        self
    }

    pub fn build(self) -> HostDevice {
        HostDevice {
            platform: self.platform,
            gpu: self.gpu,
            refuse_context: self.refuse_context,
            surface: self.surface,
            kernels: self.kernels,
            state: Mutex::new(HostState::new(self.surface_size)),
        }
    }
}

/// Emulated device backing both device APIs.
pub struct HostDevice {
    platform: bool,
    gpu: bool,
    refuse_context: bool,
    surface: Option<SurfaceHandles>,
    kernels: BTreeMap<String, HostKernelFn>,
    state: Mutex<HostState>,
}

impl HostDevice {
    /// Device with a 512x512 surface and the standard kernels.
    pub fn new() -> Self {
        Self::builder().standard_kernels().build()
    }

    pub fn builder() -> HostDeviceBuilder {
        HostDeviceBuilder::default()
    }

    /// Shared handle, ready to pass to [`Runtime::with_device`](crate::Runtime::with_device).
    pub fn shared() -> Arc<Self> {
        Arc::new(Self::new())
    }

    pub fn stats(&self) -> HostStats {
        self.lock().stats
    }

    /// Current parameters of a texture, `None` if it does not exist.
    pub fn texture_params(&self, texture: NativeId) -> Option<TextureParams> {
        self.lock().textures.get(&texture.0).map(|t| t.params)
    }

    /// Number of allocated mip levels of a texture.
    pub fn texture_levels(&self, texture: NativeId) -> Option<usize> {
        self.lock()
            .textures
            .get(&texture.0)
            .map(|t| t.levels.iter().filter(|l| l.is_some()).count())
    }

    /// Whether a compute memory object is currently acquired.
    pub fn is_acquired(&self, mem: crate::compute::MemHandle) -> Option<bool> {
        self.lock().mems.get(&mem.0).map(|m| m.acquired)
    }

    /// Commands enqueued on `queue` that have not run yet.
    pub fn pending(&self, queue: crate::compute::QueueHandle) -> usize {
        self.lock()
            .queues
            .get(&queue.0)
            .map_or(0, |q| q.pending.len())
    }

    fn lock(&self) -> MutexGuard<'_, HostState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl Default for HostDevice {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for HostDevice {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HostDevice")
            .field("surface", &self.surface)
            .field("kernels", &self.kernels.keys().collect::<Vec<_>>())
            .field("stats", &self.stats())
            .finish()
    }
}
