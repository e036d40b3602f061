//! Compute resource manager.
//!
//! Owns the shared context, command queues, compiled programs, kernels and
//! the memory objects kernels allocate, and implements the acquire/release
//! hand-off for objects shared with the graphics pipeline.

pub mod api;
mod context;
mod error;
mod interop;
mod kernel;
mod memory;
mod program;
mod queue;
mod range;
pub mod status;

pub use api::{
    ApiResult, ChannelOrder, ChannelType, ComputeApi, ContextHandle, ContextProperties,
    DeviceHandle, DeviceType, ImageDesc, ImageFormat, KernelHandle, MemAccess, MemHandle,
    PlatformHandle, ProgramHandle, QueueHandle, QueueProperties,
};
pub use context::DeviceContext;
pub use error::{ComputeError, ComputeResult};
pub use interop::SharedScope;
pub use kernel::Kernel;
pub use memory::{MemKind, MemObject, MemRef};
pub use program::{KernelKey, Program, ProgramKey, BUILD_LOG_CAPACITY};
pub use queue::CommandQueue;
pub use range::NdRange;
pub use status::{status_name, Status};
