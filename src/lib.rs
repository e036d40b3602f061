//! Phobz Interop Core
//!
//! Resource manager for a compute pipeline and a raster pipeline sharing one
//! GPU.
//!
//! # Features
//!
//! - Single shared compute context bound to the active rendering surface
//! - Program/kernel registry with build-log diagnostics
//! - Zero-copy memory objects aliasing textures, renderbuffers and vertex
//!   buffers, with the acquire → dispatch → wait → release hand-off
//! - Textures, renderbuffers and framebuffers with non-owning attachments
//! - Host-emulated device for headless use and tests
//! - wgpu device (when `gpu` feature is enabled)

pub mod compute;
pub mod config;
#[cfg(feature = "gpu")]
pub mod gpu;
pub mod graphics;
pub mod host;
pub mod logging;
pub mod runtime;

// Re-export commonly used types
pub use compute::{
    status_name, CommandQueue, ComputeApi, ComputeError, ComputeResult, DeviceContext,
    ImageDesc, ImageFormat, Kernel, KernelKey, MemAccess, MemKind, MemRef, NdRange, Program,
    ProgramKey, SharedScope, Status,
};
pub use config::{ConfigError, RuntimeConfig};
#[cfg(feature = "gpu")]
pub use gpu::{GpuError, WgpuDevice};
pub use graphics::{
    AttachmentPoint, Framebuffer, FramebufferStatus, GlError, GraphicsApi, NativeId,
    PixelFormat, RenderTargetError, RenderTargets, RenderbufferKey, TargetRef, Texture,
    TextureKey, TextureTarget,
};
pub use host::{HostDevice, HostStats};
pub use logging::{init_logging, LoggingConfig};
pub use runtime::{Runtime, RuntimeError, RuntimeResult};
