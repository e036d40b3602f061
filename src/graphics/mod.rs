//! Render-target manager.
//!
//! Textures, renderbuffers and framebuffers used as compute write targets and
//! raster read sources (or the other way round).

pub mod api;
mod framebuffer;
pub(crate) mod pixels;
mod targets;
mod texture;

pub use api::{
    AttachmentPoint, BlitMask, Filter, FramebufferStatus, GlError, GlErrorCode, GlResult,
    GraphicsApi, NativeId, PixelFormat, SurfaceHandles, TextureParam, TextureTarget, Wrap,
};
pub use framebuffer::Framebuffer;
pub use targets::{
    RenderTargetError, RenderTargetResult, RenderTargets, RenderbufferKey, TargetInfo, TargetRef,
    TextureKey,
};
pub use texture::{Renderbuffer, Storage, Texture};
