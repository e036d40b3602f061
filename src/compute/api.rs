//! Compute device API seam.
//!
//! [`ComputeApi`] is the raw device layer the manager is written against.
//! Every call reports a numeric [`Status`] on failure; callers attach the call
//! name and turn it into a [`ComputeError`](super::ComputeError).

use super::range::NdRange;
use super::status::Status;
use crate::graphics::{NativeId, PixelFormat, SurfaceHandles, TextureTarget};

pub type ApiResult<T> = Result<T, Status>;

macro_rules! handle {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
        pub struct $name(pub u64);
    };
}

handle!(PlatformHandle);
handle!(DeviceHandle);
handle!(
    /// Compute context handle.
    ContextHandle
);
handle!(QueueHandle);
handle!(ProgramHandle);
handle!(KernelHandle);
handle!(
    /// Device memory object (buffer or image, private or shared).
    MemHandle
);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeviceType {
    Gpu,
    Cpu,
    All,
}

/// Properties used when creating the shared context.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ContextProperties {
    pub platform: PlatformHandle,
    /// Surface whose device memory the context shares.
    pub surface: Option<SurfaceHandles>,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct QueueProperties {
    pub profiling: bool,
    pub out_of_order: bool,
}

/// Kernel-side access to a memory object.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MemAccess {
    ReadOnly,
    WriteOnly,
    ReadWrite,
}

impl MemAccess {
    pub fn can_read(self) -> bool {
        !matches!(self, MemAccess::WriteOnly)
    }

    pub fn can_write(self) -> bool {
        !matches!(self, MemAccess::ReadOnly)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ChannelOrder {
    R,
    Rg,
    Rgba,
    Bgra,
}

impl ChannelOrder {
    pub fn channels(self) -> usize {
        match self {
            ChannelOrder::R => 1,
            ChannelOrder::Rg => 2,
            ChannelOrder::Rgba | ChannelOrder::Bgra => 4,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ChannelType {
    UnormInt8,
    UnsignedInt8,
    SignedInt32,
    Float,
}

impl ChannelType {
    pub fn size(self) -> usize {
        match self {
            ChannelType::UnormInt8 | ChannelType::UnsignedInt8 => 1,
            ChannelType::SignedInt32 | ChannelType::Float => 4,
        }
    }
}

/// Channel layout of an image.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ImageFormat {
    pub order: ChannelOrder,
    pub data_type: ChannelType,
}

impl ImageFormat {
    pub const RGBA8: ImageFormat = ImageFormat {
        order: ChannelOrder::Rgba,
        data_type: ChannelType::UnormInt8,
    };

    pub fn pixel_size(self) -> usize {
        self.order.channels() * self.data_type.size()
    }

    /// Compute view of a graphics pixel format; depth and stencil formats
    /// have none.
    pub fn from_pixel_format(format: PixelFormat) -> Option<Self> {
        let (order, data_type) = match format {
            PixelFormat::R8 => (ChannelOrder::R, ChannelType::UnormInt8),
            PixelFormat::Rg8 => (ChannelOrder::Rg, ChannelType::UnormInt8),
            PixelFormat::Rgba8 => (ChannelOrder::Rgba, ChannelType::UnormInt8),
            PixelFormat::R32F => (ChannelOrder::R, ChannelType::Float),
            PixelFormat::Rgba32F => (ChannelOrder::Rgba, ChannelType::Float),
            PixelFormat::Depth32F | PixelFormat::Depth24Stencil8 | PixelFormat::StencilIndex8 => {
                return None
            }
        };
        Some(Self { order, data_type })
    }
}

/// Shape of a 2D image.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ImageDesc {
    pub width: u32,
    pub height: u32,
    pub mip_levels: u32,
}

impl ImageDesc {
    pub fn new_2d(width: u32, height: u32) -> Self {
        Self {
            width,
            height,
            mip_levels: 1,
        }
    }
}

/// Raw compute device operations.
///
/// Transfers (`enqueue_write_*`/`enqueue_read_*`) are blocking. Kernel
/// dispatch is enqueued and completes no later than the next `finish` on the
/// same queue; queues are FIFO and unordered with respect to each other.
pub trait ComputeApi: Send + Sync {
    fn platform_ids(&self) -> ApiResult<Vec<PlatformHandle>>;
    fn device_ids(&self, platform: PlatformHandle, kind: DeviceType)
        -> ApiResult<Vec<DeviceHandle>>;
    fn device_name(&self, device: DeviceHandle) -> ApiResult<String>;

    fn create_context(
        &self,
        device: DeviceHandle,
        properties: &ContextProperties,
    ) -> ApiResult<ContextHandle>;
    fn release_context(&self, context: ContextHandle) -> ApiResult<()>;

    fn create_queue(
        &self,
        context: ContextHandle,
        device: DeviceHandle,
        properties: QueueProperties,
    ) -> ApiResult<QueueHandle>;
    fn release_queue(&self, queue: QueueHandle) -> ApiResult<()>;

    fn create_program_with_source(
        &self,
        context: ContextHandle,
        source: &str,
    ) -> ApiResult<ProgramHandle>;
    fn build_program(&self, program: ProgramHandle, device: DeviceHandle) -> ApiResult<()>;
    fn program_build_log(&self, program: ProgramHandle, device: DeviceHandle)
        -> ApiResult<String>;
    fn release_program(&self, program: ProgramHandle) -> ApiResult<()>;

    fn create_kernel(&self, program: ProgramHandle, name: &str) -> ApiResult<KernelHandle>;
    fn release_kernel(&self, kernel: KernelHandle) -> ApiResult<()>;
    fn set_kernel_arg_mem(&self, kernel: KernelHandle, index: u32, mem: MemHandle)
        -> ApiResult<()>;
    fn set_kernel_arg_bytes(&self, kernel: KernelHandle, index: u32, bytes: &[u8])
        -> ApiResult<()>;

    fn create_buffer(
        &self,
        context: ContextHandle,
        access: MemAccess,
        size: usize,
    ) -> ApiResult<MemHandle>;
    fn create_image(
        &self,
        context: ContextHandle,
        access: MemAccess,
        format: &ImageFormat,
        desc: &ImageDesc,
    ) -> ApiResult<MemHandle>;
    fn create_from_gl_buffer(
        &self,
        context: ContextHandle,
        access: MemAccess,
        buffer: NativeId,
    ) -> ApiResult<MemHandle>;
    fn create_from_gl_texture(
        &self,
        context: ContextHandle,
        access: MemAccess,
        target: TextureTarget,
        mip_level: u32,
        texture: NativeId,
    ) -> ApiResult<MemHandle>;
    fn create_from_gl_renderbuffer(
        &self,
        context: ContextHandle,
        access: MemAccess,
        renderbuffer: NativeId,
    ) -> ApiResult<MemHandle>;
    fn release_mem(&self, mem: MemHandle) -> ApiResult<()>;

    fn enqueue_write_buffer(
        &self,
        queue: QueueHandle,
        mem: MemHandle,
        offset: usize,
        data: &[u8],
    ) -> ApiResult<()>;
    fn enqueue_read_buffer(
        &self,
        queue: QueueHandle,
        mem: MemHandle,
        offset: usize,
        out: &mut [u8],
    ) -> ApiResult<()>;
    fn enqueue_write_image(&self, queue: QueueHandle, mem: MemHandle, data: &[u8])
        -> ApiResult<()>;
    fn enqueue_read_image(&self, queue: QueueHandle, mem: MemHandle) -> ApiResult<Vec<u8>>;
    fn enqueue_nd_range(
        &self,
        queue: QueueHandle,
        kernel: KernelHandle,
        range: &NdRange,
    ) -> ApiResult<()>;

    fn enqueue_acquire_gl_objects(&self, queue: QueueHandle, mems: &[MemHandle])
        -> ApiResult<()>;
    fn enqueue_release_gl_objects(&self, queue: QueueHandle, mems: &[MemHandle])
        -> ApiResult<()>;

    /// Blocks until all work enqueued on `queue` has completed.
    fn finish(&self, queue: QueueHandle) -> ApiResult<()>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_image_format_pixel_size() {
        assert_eq!(ImageFormat::RGBA8.pixel_size(), 4);
        let f = ImageFormat {
            order: ChannelOrder::Rgba,
            data_type: ChannelType::Float,
        };
        assert_eq!(f.pixel_size(), 16);
    }

    #[test]
    fn test_pixel_format_mapping() {
        assert_eq!(
            ImageFormat::from_pixel_format(PixelFormat::Rgba8),
            Some(ImageFormat::RGBA8)
        );
        assert_eq!(ImageFormat::from_pixel_format(PixelFormat::Depth32F), None);
        for format in [PixelFormat::R8, PixelFormat::Rg8, PixelFormat::R32F, PixelFormat::Rgba32F] {
            let image = ImageFormat::from_pixel_format(format).unwrap();
            assert_eq!(image.pixel_size(), format.bytes_per_pixel());
        }
    }

    #[test]
    fn test_access_flags() {
        assert!(MemAccess::ReadOnly.can_read());
        assert!(!MemAccess::ReadOnly.can_write());
        assert!(MemAccess::WriteOnly.can_write());
        assert!(!MemAccess::WriteOnly.can_read());
        assert!(MemAccess::ReadWrite.can_read() && MemAccess::ReadWrite.can_write());
    }
}
