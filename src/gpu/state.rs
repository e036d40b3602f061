//! Object tables of the wgpu device.

use std::collections::{BTreeMap, BTreeSet};

use crate::compute::{ChannelOrder, ChannelType, ImageFormat, Status};
use crate::graphics::pixels;
use crate::graphics::{
    AttachmentPoint, FramebufferStatus, GlError, GlErrorCode, GlResult, PixelFormat, Storage,
    SurfaceHandles, TextureTarget,
};
use crate::host::TextureParams;

pub(super) fn texture_format(format: PixelFormat) -> wgpu::TextureFormat {
    match format {
        PixelFormat::R8 => wgpu::TextureFormat::R8Unorm,
        PixelFormat::Rg8 => wgpu::TextureFormat::Rg8Unorm,
        PixelFormat::Rgba8 => wgpu::TextureFormat::Rgba8Unorm,
        PixelFormat::R32F => wgpu::TextureFormat::R32Float,
        PixelFormat::Rgba32F => wgpu::TextureFormat::Rgba32Float,
        PixelFormat::Depth32F => wgpu::TextureFormat::Depth32Float,
        PixelFormat::Depth24Stencil8 => wgpu::TextureFormat::Depth24PlusStencil8,
        PixelFormat::StencilIndex8 => wgpu::TextureFormat::Stencil8,
    }
}

/// Storage-capable texture format for a compute image, if supported.
pub(super) fn image_texture_format(format: &ImageFormat) -> Option<wgpu::TextureFormat> {
    let format = match (format.order, format.data_type) {
        (ChannelOrder::Rgba, ChannelType::UnormInt8) => wgpu::TextureFormat::Rgba8Unorm,
        (ChannelOrder::Rgba, ChannelType::UnsignedInt8) => wgpu::TextureFormat::Rgba8Uint,
        (ChannelOrder::Rgba, ChannelType::SignedInt32) => wgpu::TextureFormat::Rgba32Sint,
        (ChannelOrder::Rgba, ChannelType::Float) => wgpu::TextureFormat::Rgba32Float,
        (ChannelOrder::R, ChannelType::Float) => wgpu::TextureFormat::R32Float,
        (ChannelOrder::R, ChannelType::SignedInt32) => wgpu::TextureFormat::R32Sint,
        _ => return None,
    };
    Some(format)
}

/// Formats that can back a storage binding without optional features.
fn storage_capable(format: PixelFormat) -> bool {
    matches!(
        format,
        PixelFormat::Rgba8 | PixelFormat::R32F | PixelFormat::Rgba32F
    )
}

fn plane_usage(format: PixelFormat) -> wgpu::TextureUsages {
    let mut usage = wgpu::TextureUsages::RENDER_ATTACHMENT
        | wgpu::TextureUsages::COPY_SRC
        | wgpu::TextureUsages::COPY_DST;
    if format.is_color() {
        usage |= wgpu::TextureUsages::TEXTURE_BINDING;
    }
    if storage_capable(format) {
        usage |= wgpu::TextureUsages::STORAGE_BINDING;
    }
    usage
}

/// Number of levels in a full mip chain.
pub(super) fn full_chain(width: u32, height: u32) -> u32 {
    32 - width.max(height).max(1).leading_zeros()
}

/// A wgpu texture standing in for a texture's level chain, a renderbuffer or
/// a surface plane.
pub(super) struct Plane {
    pub texture: wgpu::Texture,
    pub width: u32,
    pub height: u32,
    pub format: PixelFormat,
}

impl Plane {
    pub fn new(
        device: &wgpu::Device,
        label: &str,
        width: u32,
        height: u32,
        format: PixelFormat,
        mip_levels: u32,
    ) -> Self {
        let texture = device.create_texture(&wgpu::TextureDescriptor {
            label: Some(label),
            size: wgpu::Extent3d {
                width,
                height,
                depth_or_array_layers: 1,
            },
            mip_level_count: mip_levels,
            sample_count: 1,
            dimension: wgpu::TextureDimension::D2,
            format: texture_format(format),
            usage: plane_usage(format),
            view_formats: &[],
        });
        Self {
            texture,
            width,
            height,
            format,
        }
    }

    pub fn level_size(&self, level: u32) -> (u32, u32) {
        ((self.width >> level).max(1), (self.height >> level).max(1))
    }

    pub fn mip_levels(&self) -> u32 {
        self.texture.mip_level_count()
    }
}

pub(super) struct GpuTexture {
    pub target: TextureTarget,
    pub params: TextureParams,
    pub plane: Option<Plane>,
    /// Levels holding defined contents.
    pub defined: BTreeSet<u32>,
}

impl GpuTexture {
    pub fn new(target: TextureTarget) -> Self {
        Self {
            target,
            params: TextureParams::default(),
            plane: None,
            defined: BTreeSet::new(),
        }
    }

    /// The backing plane if `level` is defined.
    pub fn level(&self, level: u32) -> Option<&Plane> {
        self.plane.as_ref().filter(|_| self.defined.contains(&level))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(super) enum Attached {
    Texture { id: u32, level: u32 },
    Renderbuffer(u32),
}

/// Graphics object a compute view may alias.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(super) enum GlObject {
    Buffer(u32),
    Texture(u32),
    Renderbuffer(u32),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(super) enum PlaneLoc {
    DefaultColor,
    DefaultDepth,
    Texture { id: u32, level: u32 },
    Renderbuffer(u32),
}

impl PlaneLoc {
    pub fn object(self) -> Option<GlObject> {
        match self {
            PlaneLoc::Texture { id, .. } => Some(GlObject::Texture(id)),
            PlaneLoc::Renderbuffer(id) => Some(GlObject::Renderbuffer(id)),
            PlaneLoc::DefaultColor | PlaneLoc::DefaultDepth => None,
        }
    }
}

impl From<Attached> for PlaneLoc {
    fn from(attached: Attached) -> Self {
        match attached {
            Attached::Texture { id, level } => PlaneLoc::Texture { id, level },
            Attached::Renderbuffer(id) => PlaneLoc::Renderbuffer(id),
        }
    }
}

/// One level of a plane, resolved for copying.
#[derive(Clone, Copy)]
pub(super) struct PlaneView<'a> {
    pub texture: &'a wgpu::Texture,
    pub level: u32,
    pub width: u32,
    pub height: u32,
    pub format: PixelFormat,
}

pub(super) enum Backing {
    Buffer {
        buffer: wgpu::Buffer,
        size: u64,
    },
    Image {
        texture: wgpu::Texture,
        format: ImageFormat,
        width: u32,
        height: u32,
    },
    GlBuffer(u32),
    GlTexture {
        id: u32,
        level: u32,
    },
    GlRenderbuffer(u32),
}

impl Backing {
    pub fn gl_object(&self) -> Option<GlObject> {
        match self {
            Backing::GlBuffer(id) => Some(GlObject::Buffer(*id)),
            Backing::GlTexture { id, .. } => Some(GlObject::Texture(*id)),
            Backing::GlRenderbuffer(id) => Some(GlObject::Renderbuffer(*id)),
            Backing::Buffer { .. } | Backing::Image { .. } => None,
        }
    }
}

pub(super) struct GpuMem {
    pub context: u64,
    pub backing: Backing,
    pub acquired: bool,
}

impl GpuMem {
    pub fn is_shared(&self) -> bool {
        self.backing.gl_object().is_some()
    }
}

/// wgpu resource behind a memory object.
pub(super) enum Resource<'a> {
    Buffer {
        buffer: &'a wgpu::Buffer,
        size: u64,
    },
    Texture {
        texture: &'a wgpu::Texture,
        level: u32,
        width: u32,
        height: u32,
        pixel_size: usize,
    },
}

pub(super) struct GpuProgram {
    pub context: u64,
    pub source: String,
    pub module: Option<wgpu::ShaderModule>,
    pub log: String,
}

pub(super) enum KernelArg {
    Mem(u64),
    Bytes(Vec<u8>),
}

pub(super) struct GpuKernel {
    pub program: u64,
    pub name: String,
    pub pipeline: wgpu::ComputePipeline,
    pub args: BTreeMap<u32, KernelArg>,
}

pub(super) struct VertexBuffer {
    pub buffer: wgpu::Buffer,
    pub size: u64,
}

pub(super) struct GpuState {
    next_handle: u64,
    next_native: u32,
    /// Context handle to the surface it shares.
    pub contexts: BTreeMap<u64, Option<SurfaceHandles>>,
    /// Queue handle to owning context.
    pub queues: BTreeMap<u64, u64>,
    pub programs: BTreeMap<u64, GpuProgram>,
    pub kernels: BTreeMap<u64, GpuKernel>,
    pub mems: BTreeMap<u64, GpuMem>,
    pub textures: BTreeMap<u32, GpuTexture>,
    pub renderbuffers: BTreeMap<u32, Plane>,
    pub framebuffers: BTreeMap<u32, BTreeMap<AttachmentPoint, Attached>>,
    pub vertex_buffers: BTreeMap<u32, VertexBuffer>,
    pub texture_units: BTreeMap<u32, u32>,
    pub bound_framebuffer: Option<u32>,
    pub bound_renderbuffer: Option<u32>,
    pub surface_color: Plane,
    pub surface_depth: Plane,
}

impl GpuState {
    pub fn new(device: &wgpu::Device, (width, height): (u32, u32)) -> Self {
        Self {
            next_handle: 1,
            next_native: 1,
            contexts: BTreeMap::new(),
            queues: BTreeMap::new(),
            programs: BTreeMap::new(),
            kernels: BTreeMap::new(),
            mems: BTreeMap::new(),
            textures: BTreeMap::new(),
            renderbuffers: BTreeMap::new(),
            framebuffers: BTreeMap::new(),
            vertex_buffers: BTreeMap::new(),
            texture_units: BTreeMap::new(),
            bound_framebuffer: None,
            bound_renderbuffer: None,
            surface_color: Plane::new(device, "surface_color", width, height, PixelFormat::Rgba8, 1),
            surface_depth: Plane::new(
                device,
                "surface_depth",
                width,
                height,
                PixelFormat::Depth24Stencil8,
                1,
            ),
        }
    }

    pub fn next_handle(&mut self) -> u64 {
        let handle = self.next_handle;
        self.next_handle += 1;
        handle
    }

    pub fn next_native(&mut self) -> u32 {
        let id = self.next_native;
        self.next_native += 1;
        id
    }

    pub fn gl_views(&self, object: GlObject) -> usize {
        self.mems
            .values()
            .filter(|m| m.backing.gl_object() == Some(object))
            .count()
    }

    /// Fails with `GL_INVALID_OPERATION` while compute holds `object`.
    pub fn check_not_acquired(&self, object: GlObject, call: &'static str) -> GlResult<()> {
        let held = self
            .mems
            .values()
            .any(|m| m.acquired && m.backing.gl_object() == Some(object));
        if held {
            log::warn!("{} on {:?} while acquired by compute", call, object);
            return Err(GlError::new(call, GlErrorCode::InvalidOperation));
        }
        Ok(())
    }

    pub fn view(&self, loc: PlaneLoc) -> Option<PlaneView<'_>> {
        let (plane, level) = match loc {
            PlaneLoc::DefaultColor => (&self.surface_color, 0),
            PlaneLoc::DefaultDepth => (&self.surface_depth, 0),
            PlaneLoc::Texture { id, level } => (self.textures.get(&id)?.level(level)?, level),
            PlaneLoc::Renderbuffer(id) => (self.renderbuffers.get(&id)?, 0),
        };
        let (width, height) = plane.level_size(level);
        Some(PlaneView {
            texture: &plane.texture,
            level,
            width,
            height,
            format: plane.format,
        })
    }

    /// Plane read or written at `point` of `framebuffer` (`None` = surface).
    pub fn plane(
        &self,
        framebuffer: Option<u32>,
        point: AttachmentPoint,
        call: &'static str,
    ) -> GlResult<Option<PlaneLoc>> {
        let Some(id) = framebuffer else {
            return Ok(match point {
                AttachmentPoint::Color(0) => Some(PlaneLoc::DefaultColor),
                AttachmentPoint::Color(_) => None,
                _ => Some(PlaneLoc::DefaultDepth),
            });
        };
        let fb = self
            .framebuffers
            .get(&id)
            .ok_or(GlError::new(call, GlErrorCode::InvalidOperation))?;
        let lookup = |p: AttachmentPoint| fb.get(&p).copied();
        let attached = match point {
            AttachmentPoint::Depth => {
                lookup(AttachmentPoint::Depth).or_else(|| lookup(AttachmentPoint::DepthStencil))
            }
            AttachmentPoint::Stencil => lookup(AttachmentPoint::Stencil)
                .or_else(|| lookup(AttachmentPoint::DepthStencil)),
            other => lookup(other),
        };
        Ok(attached.map(PlaneLoc::from))
    }

    pub fn framebuffer_status(&self, id: u32) -> FramebufferStatus {
        let Some(fb) = self.framebuffers.get(&id) else {
            return FramebufferStatus::Unsupported;
        };
        pixels::completeness(fb.iter().map(|(point, attached)| {
            let storage = self.view(PlaneLoc::from(*attached)).map(|v| Storage {
                width: v.width,
                height: v.height,
                format: v.format,
            });
            (*point, storage)
        }))
    }

    /// wgpu resource behind a memory object.
    pub fn resource(&self, id: u64) -> Result<Resource<'_>, Status> {
        let mem = self.mems.get(&id).ok_or(Status::INVALID_MEM_OBJECT)?;
        let loc = match &mem.backing {
            Backing::Buffer { buffer, size } => {
                return Ok(Resource::Buffer {
                    buffer,
                    size: *size,
                })
            }
            Backing::Image {
                texture,
                format,
                width,
                height,
            } => {
                return Ok(Resource::Texture {
                    texture,
                    level: 0,
                    width: *width,
                    height: *height,
                    pixel_size: format.pixel_size(),
                })
            }
            Backing::GlBuffer(buffer) => {
                let vb = self
                    .vertex_buffers
                    .get(buffer)
                    .ok_or(Status::INVALID_MEM_OBJECT)?;
                return Ok(Resource::Buffer {
                    buffer: &vb.buffer,
                    size: vb.size,
                });
            }
            Backing::GlTexture { id, level } => PlaneLoc::Texture {
                id: *id,
                level: *level,
            },
            Backing::GlRenderbuffer(rb) => PlaneLoc::Renderbuffer(*rb),
        };
        let view = self.view(loc).ok_or(Status::INVALID_MEM_OBJECT)?;
        Ok(Resource::Texture {
            texture: view.texture,
            level: view.level,
            width: view.width,
            height: view.height,
            pixel_size: view.format.bytes_per_pixel(),
        })
    }
}
