//! wgpu-backed device.
//!
//! Implements both [`ComputeApi`](crate::compute::ComputeApi) and
//! [`GraphicsApi`](crate::graphics::GraphicsApi) on one adapter, so shared
//! memory objects alias the same wgpu resources. Kernels are written in WGSL
//! (see `res/wgsl/`).

mod compute;
mod context;
mod graphics;
mod readback;
mod state;

pub use context::{GpuError, WgpuDevice};
