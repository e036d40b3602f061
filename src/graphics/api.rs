//! Raster-side device API seam.
//!
//! The render-target manager talks to the graphics pipeline only through
//! [`GraphicsApi`]. Identifiers are opaque native names meaningful only to
//! the backend that issued them.

use std::fmt;

/// Opaque native identifier of a texture, renderbuffer, framebuffer or buffer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct NativeId(pub u32);

impl fmt::Display for NativeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// Native handles of the active rendering surface, used to bind a compute
/// context to the same device for zero-copy sharing.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SurfaceHandles {
    pub gl_context: u64,
    pub display: u64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TextureTarget {
    Texture2d,
    TextureRectangle,
}

/// Internal pixel storage formats.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PixelFormat {
    R8,
    Rg8,
    Rgba8,
    R32F,
    Rgba32F,
    Depth32F,
    Depth24Stencil8,
    StencilIndex8,
}

impl PixelFormat {
    pub fn bytes_per_pixel(self) -> usize {
        match self {
            PixelFormat::R8 | PixelFormat::StencilIndex8 => 1,
            PixelFormat::Rg8 => 2,
            PixelFormat::Rgba8
            | PixelFormat::R32F
            | PixelFormat::Depth32F
            | PixelFormat::Depth24Stencil8 => 4,
            PixelFormat::Rgba32F => 16,
        }
    }

    pub fn is_color(self) -> bool {
        !self.has_depth() && !self.has_stencil()
    }

    pub fn has_depth(self) -> bool {
        matches!(self, PixelFormat::Depth32F | PixelFormat::Depth24Stencil8)
    }

    pub fn has_stencil(self) -> bool {
        matches!(
            self,
            PixelFormat::Depth24Stencil8 | PixelFormat::StencilIndex8
        )
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Wrap {
    Repeat,
    MirroredRepeat,
    ClampToEdge,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Filter {
    Nearest,
    Linear,
    NearestMipmapNearest,
    LinearMipmapNearest,
    LinearMipmapLinear,
}

/// Integer/float texture parameters.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum TextureParam {
    WrapS(Wrap),
    WrapT(Wrap),
    MinFilter(Filter),
    MagFilter(Filter),
    LodBias(f32),
}

/// Framebuffer attachment points.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum AttachmentPoint {
    Color(u8),
    Depth,
    Stencil,
    DepthStencil,
}

impl AttachmentPoint {
    /// Whether a pixel format may be attached at this point.
    pub fn accepts(self, format: PixelFormat) -> bool {
        match self {
            AttachmentPoint::Color(_) => format.is_color(),
            AttachmentPoint::Depth => format.has_depth(),
            AttachmentPoint::Stencil => format.has_stencil(),
            AttachmentPoint::DepthStencil => format.has_depth() && format.has_stencil(),
        }
    }
}

/// Planes copied by a framebuffer blit.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BlitMask {
    pub color: bool,
    pub depth: bool,
    pub stencil: bool,
}

impl BlitMask {
    pub const ALL: BlitMask = BlitMask {
        color: true,
        depth: true,
        stencil: true,
    };

    pub const COLOR: BlitMask = BlitMask {
        color: true,
        depth: false,
        stencil: false,
    };
}

/// Result of a framebuffer completeness query.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FramebufferStatus {
    Complete,
    IncompleteAttachment,
    MissingAttachment,
    IncompleteDimensions,
    Unsupported,
}

impl FramebufferStatus {
    /// GL enum value of the status.
    pub fn code(self) -> u32 {
        match self {
            FramebufferStatus::Complete => 0x8CD5,
            FramebufferStatus::IncompleteAttachment => 0x8CD6,
            FramebufferStatus::MissingAttachment => 0x8CD7,
            FramebufferStatus::IncompleteDimensions => 0x8CD9,
            FramebufferStatus::Unsupported => 0x8CDD,
        }
    }

    pub fn is_complete(self) -> bool {
        self == FramebufferStatus::Complete
    }
}

/// GL-style error codes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GlErrorCode {
    InvalidEnum,
    InvalidValue,
    InvalidOperation,
    OutOfMemory,
    InvalidFramebufferOperation,
}

impl GlErrorCode {
    pub fn code(self) -> u32 {
        match self {
            GlErrorCode::InvalidEnum => 0x0500,
            GlErrorCode::InvalidValue => 0x0501,
            GlErrorCode::InvalidOperation => 0x0502,
            GlErrorCode::OutOfMemory => 0x0505,
            GlErrorCode::InvalidFramebufferOperation => 0x0506,
        }
    }

    pub fn name(self) -> &'static str {
        match self {
            GlErrorCode::InvalidEnum => "GL_INVALID_ENUM",
            GlErrorCode::InvalidValue => "GL_INVALID_VALUE",
            GlErrorCode::InvalidOperation => "GL_INVALID_OPERATION",
            GlErrorCode::OutOfMemory => "GL_OUT_OF_MEMORY",
            GlErrorCode::InvalidFramebufferOperation => "GL_INVALID_FRAMEBUFFER_OPERATION",
        }
    }
}

/// Error raised by a graphics API call.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("OpenGL Error: {} in {call}", .code.name())]
pub struct GlError {
    pub call: &'static str,
    pub code: GlErrorCode,
}

impl GlError {
    pub fn new(call: &'static str, code: GlErrorCode) -> Self {
        Self { call, code }
    }
}

pub type GlResult<T> = Result<T, GlError>;

/// Raster pipeline operations needed by the render-target manager and by
/// compute interop.
///
/// Framebuffer completeness is queried on the currently bound framebuffer,
/// everything else addresses objects by id.
pub trait GraphicsApi: Send + Sync {
    /// Handles of the active rendering surface, `None` when headless.
    fn current_surface(&self) -> Option<SurfaceHandles>;

    /// Dimensions of the default (display) framebuffer.
    fn surface_size(&self) -> (u32, u32);

    fn create_texture(&self, target: TextureTarget) -> GlResult<NativeId>;
    fn delete_texture(&self, texture: NativeId) -> GlResult<()>;
    fn bind_texture(
        &self,
        unit: u32,
        target: TextureTarget,
        texture: Option<NativeId>,
    ) -> GlResult<()>;
    fn texture_parameter(&self, texture: NativeId, param: TextureParam) -> GlResult<()>;

    /// Allocates (and optionally fills) one mip level. `None` leaves the
    /// contents undefined.
    fn texture_image_2d(
        &self,
        texture: NativeId,
        level: u32,
        format: PixelFormat,
        width: u32,
        height: u32,
        data: Option<&[u8]>,
    ) -> GlResult<()>;
    fn generate_mipmap(&self, texture: NativeId) -> GlResult<()>;
    fn read_texture(&self, texture: NativeId, level: u32) -> GlResult<Vec<u8>>;

    fn create_renderbuffer(
        &self,
        format: PixelFormat,
        width: u32,
        height: u32,
    ) -> GlResult<NativeId>;
    fn delete_renderbuffer(&self, renderbuffer: NativeId) -> GlResult<()>;
    fn bind_renderbuffer(&self, renderbuffer: Option<NativeId>) -> GlResult<()>;

    fn create_framebuffer(&self) -> GlResult<NativeId>;
    fn delete_framebuffer(&self, framebuffer: NativeId) -> GlResult<()>;
    fn bind_framebuffer(&self, framebuffer: Option<NativeId>) -> GlResult<()>;
    fn framebuffer_texture(
        &self,
        framebuffer: NativeId,
        point: AttachmentPoint,
        texture: Option<NativeId>,
        level: u32,
    ) -> GlResult<()>;
    fn framebuffer_renderbuffer(
        &self,
        framebuffer: NativeId,
        point: AttachmentPoint,
        renderbuffer: Option<NativeId>,
    ) -> GlResult<()>;
    /// Completeness of the currently bound framebuffer.
    fn check_framebuffer_status(&self) -> GlResult<FramebufferStatus>;

    /// Copies planes from `src` into `dst` (`None` = default surface) with
    /// nearest-neighbour resampling.
    fn blit_framebuffer(
        &self,
        src: NativeId,
        dst: Option<NativeId>,
        src_size: (u32, u32),
        dst_size: (u32, u32),
        mask: BlitMask,
    ) -> GlResult<()>;
    fn read_framebuffer(
        &self,
        framebuffer: Option<NativeId>,
        point: AttachmentPoint,
    ) -> GlResult<Vec<u8>>;

    fn create_vertex_buffer(&self, data: &[u8]) -> GlResult<NativeId>;
    fn read_vertex_buffer(&self, buffer: NativeId) -> GlResult<Vec<u8>>;
    fn delete_vertex_buffer(&self, buffer: NativeId) -> GlResult<()>;
}
