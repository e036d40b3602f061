//! Object store shared by both halves of the host device.

use std::collections::{BTreeMap, VecDeque};

use super::{HostKernelFn, HostStats};
use crate::compute::{ImageFormat, MemAccess, NdRange, Status};
use crate::graphics::pixels;
use crate::graphics::{
    AttachmentPoint, Filter, FramebufferStatus, GlError, GlErrorCode, GlResult, PixelFormat,
    Storage, SurfaceHandles, TextureTarget, Wrap,
};

/// Pixel storage of one texture level, renderbuffer or surface plane.
#[derive(Debug, Clone)]
pub(super) struct Surface {
    pub width: u32,
    pub height: u32,
    pub format: PixelFormat,
    pub data: Vec<u8>,
}

impl Surface {
    pub fn new(width: u32, height: u32, format: PixelFormat) -> Self {
        let len = width as usize * height as usize * format.bytes_per_pixel();
        Self {
            width,
            height,
            format,
            data: vec![0; len],
        }
    }

    pub fn byte_len(&self) -> usize {
        self.data.len()
    }
}

/// Sampling state of a texture.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TextureParams {
    pub wrap_s: Wrap,
    pub wrap_t: Wrap,
    pub min_filter: Filter,
    pub mag_filter: Filter,
    pub lod_bias: f32,
}

impl Default for TextureParams {
    fn default() -> Self {
        Self {
            wrap_s: Wrap::Repeat,
            wrap_t: Wrap::Repeat,
            min_filter: Filter::NearestMipmapNearest,
            mag_filter: Filter::Linear,
            lod_bias: 0.0,
        }
    }
}

#[derive(Debug)]
pub(super) struct HostTexture {
    pub target: TextureTarget,
    pub params: TextureParams,
    pub levels: Vec<Option<Surface>>,
}

impl HostTexture {
    pub fn level(&self, level: u32) -> Option<&Surface> {
        self.levels.get(level as usize).and_then(Option::as_ref)
    }

    pub fn level_mut(&mut self, level: u32) -> Option<&mut Surface> {
        self.levels.get_mut(level as usize).and_then(Option::as_mut)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(super) enum Attached {
    Texture { id: u32, level: u32 },
    Renderbuffer(u32),
}

#[derive(Debug, Default)]
pub(super) struct HostFramebuffer {
    pub attachments: BTreeMap<AttachmentPoint, Attached>,
}

/// Graphics object a compute view may alias.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(super) enum GlObject {
    Buffer(u32),
    Texture(u32),
    Renderbuffer(u32),
}

/// Location of a pixel plane.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(super) enum PlaneLoc {
    DefaultColor,
    DefaultDepth,
    Texture { id: u32, level: u32 },
    Renderbuffer(u32),
}

impl From<Attached> for PlaneLoc {
    fn from(attached: Attached) -> Self {
        match attached {
            Attached::Texture { id, level } => PlaneLoc::Texture { id, level },
            Attached::Renderbuffer(id) => PlaneLoc::Renderbuffer(id),
        }
    }
}

#[derive(Debug)]
pub(super) enum Backing {
    Buffer(Vec<u8>),
    Image {
        format: ImageFormat,
        width: u32,
        height: u32,
        data: Vec<u8>,
    },
    GlBuffer(u32),
    GlTexture { id: u32, level: u32 },
    GlRenderbuffer(u32),
}

impl Backing {
    pub fn gl_object(&self) -> Option<GlObject> {
        match self {
            Backing::GlBuffer(id) => Some(GlObject::Buffer(*id)),
            Backing::GlTexture { id, .. } => Some(GlObject::Texture(*id)),
            Backing::GlRenderbuffer(id) => Some(GlObject::Renderbuffer(*id)),
            Backing::Buffer(_) | Backing::Image { .. } => None,
        }
    }
}

#[derive(Debug)]
pub(super) struct HostMem {
    pub context: u64,
    pub access: MemAccess,
    pub backing: Backing,
    pub acquired: bool,
}

impl HostMem {
    pub fn is_shared(&self) -> bool {
        self.backing.gl_object().is_some()
    }
}

/// Row-major image shape of a memory object.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(super) struct ImageShape {
    pub width: u32,
    pub height: u32,
    pub pixel_size: usize,
}

/// Bytes behind a memory object, wherever they live.
pub(super) struct MemStorage<'a> {
    pub data: &'a [u8],
    pub image: Option<ImageShape>,
}

#[derive(Debug, Clone)]
pub(super) enum ArgBinding {
    Mem(u64),
    Bytes(Vec<u8>),
}

pub(super) struct Pending {
    pub kernel: String,
    pub func: HostKernelFn,
    pub args: Vec<ArgBinding>,
    pub range: NdRange,
}

pub(super) struct HostQueue {
    pub context: u64,
    pub pending: VecDeque<Pending>,
}

#[derive(Debug)]
pub(super) struct HostContext {
    pub surface: Option<SurfaceHandles>,
}

/// Entry point found in program source: name and argument count.
#[derive(Debug)]
pub(super) struct HostProgram {
    pub context: u64,
    pub source: String,
    pub built: bool,
    pub log: String,
    pub entries: BTreeMap<String, usize>,
}

pub(super) struct HostKernel {
    pub program: u64,
    pub name: String,
    pub args: Vec<Option<ArgBinding>>,
    pub func: HostKernelFn,
}

pub(super) struct HostState {
    next_handle: u64,
    next_native: u32,
    pub contexts: BTreeMap<u64, HostContext>,
    pub queues: BTreeMap<u64, HostQueue>,
    pub programs: BTreeMap<u64, HostProgram>,
    pub kernels: BTreeMap<u64, HostKernel>,
    pub mems: BTreeMap<u64, HostMem>,
    pub textures: BTreeMap<u32, HostTexture>,
    pub renderbuffers: BTreeMap<u32, Surface>,
    pub framebuffers: BTreeMap<u32, HostFramebuffer>,
    pub vertex_buffers: BTreeMap<u32, Vec<u8>>,
    pub texture_units: BTreeMap<u32, u32>,
    pub bound_framebuffer: Option<u32>,
    pub bound_renderbuffer: Option<u32>,
    pub surface_color: Surface,
    pub surface_depth: Surface,
    pub stats: HostStats,
}

impl HostState {
    pub fn new((width, height): (u32, u32)) -> Self {
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
            surface_color: Surface::new(width, height, PixelFormat::Rgba8),
            surface_depth: Surface::new(width, height, PixelFormat::Depth24Stencil8),
            stats: HostStats::default(),
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

    /// Whether compute currently holds `object`.
    pub fn gl_acquired(&self, object: GlObject) -> bool {
        self.mems
            .values()
            .any(|m| m.acquired && m.backing.gl_object() == Some(object))
    }

    /// Live compute views of `object`.
    pub fn gl_views(&self, object: GlObject) -> usize {
        self.mems
            .values()
            .filter(|m| m.backing.gl_object() == Some(object))
            .count()
    }

    /// Fails with `GL_INVALID_OPERATION` while compute holds `object`.
    pub fn check_not_acquired(&self, object: GlObject, call: &'static str) -> GlResult<()> {
        if self.gl_acquired(object) {
            log::warn!("{} on {:?} while acquired by compute", call, object);
            return Err(GlError::new(call, GlErrorCode::InvalidOperation));
        }
        Ok(())
    }

    pub fn plane_object(loc: PlaneLoc) -> Option<GlObject> {
        match loc {
            PlaneLoc::Texture { id, .. } => Some(GlObject::Texture(id)),
            PlaneLoc::Renderbuffer(id) => Some(GlObject::Renderbuffer(id)),
            PlaneLoc::DefaultColor | PlaneLoc::DefaultDepth => None,
        }
    }

    pub fn surface(&self, loc: PlaneLoc) -> Option<&Surface> {
        match loc {
            PlaneLoc::DefaultColor => Some(&self.surface_color),
            PlaneLoc::DefaultDepth => Some(&self.surface_depth),
            PlaneLoc::Texture { id, level } => self.textures.get(&id)?.level(level),
            PlaneLoc::Renderbuffer(id) => self.renderbuffers.get(&id),
        }
    }

    pub fn surface_mut(&mut self, loc: PlaneLoc) -> Option<&mut Surface> {
        match loc {
            PlaneLoc::DefaultColor => Some(&mut self.surface_color),
            PlaneLoc::DefaultDepth => Some(&mut self.surface_depth),
            PlaneLoc::Texture { id, level } => self.textures.get_mut(&id)?.level_mut(level),
            PlaneLoc::Renderbuffer(id) => self.renderbuffers.get_mut(&id),
        }
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
        let lookup = |p: AttachmentPoint| fb.attachments.get(&p).copied();
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

    /// Completeness of a framebuffer object.
    pub fn framebuffer_status(&self, id: u32) -> FramebufferStatus {
        let Some(fb) = self.framebuffers.get(&id) else {
            return FramebufferStatus::Unsupported;
        };
        pixels::completeness(fb.attachments.iter().map(|(point, attached)| {
            let storage = self.surface(PlaneLoc::from(*attached)).map(|s| Storage {
                width: s.width,
                height: s.height,
                format: s.format,
            });
            (*point, storage)
        }))
    }

    /// Bytes and shape behind a memory object.
    pub fn mem_storage(&self, id: u64) -> Result<MemStorage<'_>, Status> {
        let mem = self.mems.get(&id).ok_or(Status::INVALID_MEM_OBJECT)?;
        match &mem.backing {
            Backing::Buffer(data) => Ok(MemStorage { data, image: None }),
            Backing::Image {
                format,
                width,
                height,
                data,
            } => Ok(MemStorage {
                data,
                image: Some(ImageShape {
                    width: *width,
                    height: *height,
                    pixel_size: format.pixel_size(),
                }),
            }),
            Backing::GlBuffer(buffer) => {
                let data = self
                    .vertex_buffers
                    .get(buffer)
                    .ok_or(Status::INVALID_MEM_OBJECT)?;
                Ok(MemStorage { data, image: None })
            }
            Backing::GlTexture { id, level } => {
                let surface = self
                    .surface(PlaneLoc::Texture {
                        id: *id,
                        level: *level,
                    })
                    .ok_or(Status::INVALID_MEM_OBJECT)?;
                Ok(surface_storage(surface))
            }
            Backing::GlRenderbuffer(rb) => {
                let surface = self
                    .renderbuffers
                    .get(rb)
                    .ok_or(Status::INVALID_MEM_OBJECT)?;
                Ok(surface_storage(surface))
            }
        }
    }

    /// Mutable bytes behind a memory object.
    pub fn mem_data_mut(&mut self, id: u64) -> Result<&mut Vec<u8>, Status> {
        let mem = self.mems.get(&id).ok_or(Status::INVALID_MEM_OBJECT)?;
        let loc = match mem.backing {
            Backing::GlBuffer(buffer) => {
                return self
                    .vertex_buffers
                    .get_mut(&buffer)
                    .ok_or(Status::INVALID_MEM_OBJECT)
            }
            Backing::GlTexture { id, level } => PlaneLoc::Texture { id, level },
            Backing::GlRenderbuffer(rb) => PlaneLoc::Renderbuffer(rb),
            Backing::Buffer(_) | Backing::Image { .. } => {
                return match self.mems.get_mut(&id).map(|m| &mut m.backing) {
                    Some(Backing::Buffer(data)) | Some(Backing::Image { data, .. }) => Ok(data),
                    _ => Err(Status::INVALID_MEM_OBJECT),
                };
            }
        };
        self.surface_mut(loc)
            .map(|s| &mut s.data)
            .ok_or(Status::INVALID_MEM_OBJECT)
    }
}

fn surface_storage(surface: &Surface) -> MemStorage<'_> {
    MemStorage {
        data: &surface.data,
        image: Some(ImageShape {
            width: surface.width,
            height: surface.height,
            pixel_size: surface.format.bytes_per_pixel(),
        }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn attach(state: &mut HostState, fb: u32, point: AttachmentPoint, attached: Attached) {
        state
            .framebuffers
            .entry(fb)
            .or_default()
            .attachments
            .insert(point, attached);
    }

    #[test]
    fn test_status_rules() {
        let mut state = HostState::new((4, 4));
        state.framebuffers.insert(1, HostFramebuffer::default());
        assert_eq!(
            state.framebuffer_status(1),
            FramebufferStatus::MissingAttachment
        );

        state
            .renderbuffers
            .insert(10, Surface::new(8, 8, PixelFormat::Rgba8));
        attach(&mut state, 1, AttachmentPoint::Color(0), Attached::Renderbuffer(10));
        assert_eq!(state.framebuffer_status(1), FramebufferStatus::Complete);

        state
            .renderbuffers
            .insert(11, Surface::new(4, 4, PixelFormat::Depth24Stencil8));
        attach(&mut state, 1, AttachmentPoint::DepthStencil, Attached::Renderbuffer(11));
        assert_eq!(
            state.framebuffer_status(1),
            FramebufferStatus::IncompleteDimensions
        );

        attach(&mut state, 1, AttachmentPoint::DepthStencil, Attached::Renderbuffer(10));
        assert_eq!(
            state.framebuffer_status(1),
            FramebufferStatus::IncompleteAttachment
        );

        attach(&mut state, 1, AttachmentPoint::DepthStencil, Attached::Renderbuffer(99));
        assert_eq!(
            state.framebuffer_status(1),
            FramebufferStatus::IncompleteAttachment
        );
    }

    #[test]
    fn test_depth_lookup_falls_back_to_depth_stencil() {
        let mut state = HostState::new((4, 4));
        attach(&mut state, 1, AttachmentPoint::DepthStencil, Attached::Renderbuffer(3));
        let plane = state.plane(Some(1), AttachmentPoint::Depth, "test").unwrap();
        assert_eq!(plane, Some(PlaneLoc::Renderbuffer(3)));
        let none = state.plane(Some(1), AttachmentPoint::Color(0), "test").unwrap();
        assert_eq!(none, None);
        assert_eq!(
            state.plane(None, AttachmentPoint::Stencil, "test").unwrap(),
            Some(PlaneLoc::DefaultDepth)
        );
    }
}
