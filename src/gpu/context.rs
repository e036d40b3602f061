//! wgpu device initialization.

use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use wgpu::{Adapter, Device, Instance, Queue};

use super::state::GpuState;
use crate::graphics::SurfaceHandles;

/// Errors that can occur during GPU operations.
#[derive(Debug, thiserror::Error)]
pub enum GpuError {
    #[error("No suitable GPU adapter found")]
    NoAdapter,
    #[error("Failed to request device: {0}")]
    DeviceRequest(#[from] wgpu::RequestDeviceError),
    #[error("Buffer mapping failed: {0}")]
    BufferMapFailed(String),
}

/// Surface handles reported for the offscreen surface.
const OFFSCREEN_SURFACE: SurfaceHandles = SurfaceHandles {
    gl_context: 1,
    display: 0,
};

/// A single wgpu adapter serving both the compute and graphics pipelines.
///
/// The rendering surface is offscreen: a color and a depth-stencil texture
/// the size given at creation.
pub struct WgpuDevice {
    instance: Instance,
    pub(super) adapter: Arc<Adapter>,
    pub(super) device: Arc<Device>,
    pub(super) queue: Arc<Queue>,
    state: Mutex<GpuState>,
}

impl WgpuDevice {
    /// Create a device for headless use.
    ///
    /// Prefers Metal on macOS, falls back to other backends.
    pub async fn new(surface_size: (u32, u32)) -> Result<Self, GpuError> {
        let instance = Instance::new(&wgpu::InstanceDescriptor {
            backends: wgpu::Backends::METAL | wgpu::Backends::VULKAN | wgpu::Backends::GL,
            ..Default::default()
        });

        let adapter = instance
            .request_adapter(&wgpu::RequestAdapterOptions {
                power_preference: wgpu::PowerPreference::HighPerformance,
                force_fallback_adapter: false,
                compatible_surface: None,
            })
            .await
            .map_err(|_| GpuError::NoAdapter)?;

        let (device, queue) = adapter
            .request_device(&wgpu::DeviceDescriptor {
                label: Some("phobz-interop"),
                required_features: wgpu::Features::empty(),
                required_limits: wgpu::Limits::default(),
                memory_hints: wgpu::MemoryHints::Performance,
                trace: wgpu::Trace::Off,
                experimental_features: wgpu::ExperimentalFeatures::default(),
            })
            .await?;

        let info = adapter.get_info();
        log::info!("Using adapter {} ({:?})", info.name, info.backend);

        let state = GpuState::new(&device, surface_size);
        Ok(Self {
            instance,
            adapter: Arc::new(adapter),
            device: Arc::new(device),
            queue: Arc::new(queue),
            state: Mutex::new(state),
        })
    }

    /// Blocking variant of [`new`](Self::new).
    pub fn new_blocking(surface_size: (u32, u32)) -> Result<Self, GpuError> {
        pollster::block_on(Self::new(surface_size))
    }

    /// Get info about the GPU adapter.
    pub fn adapter_info(&self) -> wgpu::AdapterInfo {
        self.adapter.get_info()
    }

    pub fn instance(&self) -> &Instance {
        &self.instance
    }

    pub fn device(&self) -> &Device {
        &self.device
    }

    pub(super) fn surface_handles(&self) -> SurfaceHandles {
        OFFSCREEN_SURFACE
    }

    pub(super) fn lock(&self) -> MutexGuard<'_, GpuState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Blocks until submitted work has completed.
    pub(super) fn wait_idle(&self) -> Result<(), GpuError> {
        self.device
            .poll(wgpu::PollType::wait_indefinitely())
            .map(|_| ())
            .map_err(|e| GpuError::BufferMapFailed(e.to_string()))
    }

    /// Runs `f` inside a validation error scope, returning the first
    /// validation message it raised.
    pub(super) fn validated<T>(&self, f: impl FnOnce(&Device) -> T) -> (T, Option<String>) {
        let scope = self.device.push_error_scope(wgpu::ErrorFilter::Validation);
        let value = f(&self.device);
        let error = pollster::block_on(scope.pop());
        (value, error.map(|e| e.to_string()))
    }
}

impl std::fmt::Debug for WgpuDevice {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WgpuDevice")
            .field("adapter", &self.adapter.get_info().name)
            .finish()
    }
}
