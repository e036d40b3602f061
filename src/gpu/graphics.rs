//! Graphics half of the wgpu device.
//!
//! Texture level chains, renderbuffers and the offscreen surface are wgpu
//! textures. Framebuffers are attachment tables. Blits of equal size and
//! format are GPU copies; scaled color blits are resampled on the CPU.

use wgpu::util::DeviceExt;

use super::context::{GpuError, WgpuDevice};
use super::readback;
use super::state::{
    full_chain, Attached, GlObject, GpuState, GpuTexture, Plane, PlaneView, VertexBuffer,
};
use crate::graphics::pixels;
use crate::graphics::{
    AttachmentPoint, BlitMask, FramebufferStatus, GlError, GlErrorCode, GlResult, GraphicsApi,
    NativeId, PixelFormat, SurfaceHandles, TextureParam, TextureTarget,
};

fn err(call: &'static str, code: GlErrorCode) -> GlError {
    GlError::new(call, code)
}

fn out_of_memory(call: &'static str) -> impl Fn(GpuError) -> GlError {
    move |e| {
        log::error!("{}: {}", call, e);
        err(call, GlErrorCode::OutOfMemory)
    }
}

fn texture<'a>(state: &'a GpuState, id: NativeId, call: &'static str) -> GlResult<&'a GpuTexture> {
    state
        .textures
        .get(&id.0)
        .ok_or(err(call, GlErrorCode::InvalidOperation))
}

fn warn_orphans(state: &GpuState, object: GlObject) {
    let views = state.gl_views(object);
    if views > 0 {
        log::warn!("{:?} deleted with {} compute views alive", object, views);
    }
}

fn copy_info<'a>(view: &PlaneView<'a>) -> wgpu::TexelCopyTextureInfo<'a> {
    wgpu::TexelCopyTextureInfo {
        texture: view.texture,
        mip_level: view.level,
        origin: wgpu::Origin3d::ZERO,
        aspect: wgpu::TextureAspect::All,
    }
}

/// Whole same-size, same-format planes copy on the device.
fn direct_copy(from: &PlaneView<'_>, to: &PlaneView<'_>, src: (u32, u32), dst: (u32, u32)) -> bool {
    src == dst
        && src == (from.width, from.height)
        && dst == (to.width, to.height)
        && from.format == to.format
}

/// Planes that are not copied directly go through a color read-back.
fn blit_supported(
    from: &PlaneView<'_>,
    to: &PlaneView<'_>,
    src: (u32, u32),
    dst: (u32, u32),
) -> bool {
    direct_copy(from, to, src, dst) || pixels::Plane::Color.compatible(from.format, to.format)
}

impl WgpuDevice {
    fn read_plane(&self, view: &PlaneView<'_>, call: &'static str) -> GlResult<Vec<u8>> {
        if !view.format.is_color() {
            return Err(err(call, GlErrorCode::InvalidOperation));
        }
        readback::read_texture(
            &self.device,
            &self.queue,
            view.texture,
            view.level,
            (view.width, view.height),
            view.format.bytes_per_pixel(),
        )
        .map_err(out_of_memory(call))
    }

    fn blit_plane(
        &self,
        from: &PlaneView<'_>,
        to: &PlaneView<'_>,
        src_size: (u32, u32),
        dst_size: (u32, u32),
        call: &'static str,
    ) -> GlResult<()> {
        if direct_copy(from, to, src_size, dst_size) {
            let mut encoder = self
                .device
                .create_command_encoder(&wgpu::CommandEncoderDescriptor {
                    label: Some("blit_copy"),
                });
            encoder.copy_texture_to_texture(
                copy_info(from),
                copy_info(to),
                wgpu::Extent3d {
                    width: from.width,
                    height: from.height,
                    depth_or_array_layers: 1,
                },
            );
            self.queue.submit(Some(encoder.finish()));
            return Ok(());
        }

        let bpp = from.format.bytes_per_pixel();
        let source = self.read_plane(from, call)?;
        let mut target = self.read_plane(to, call)?;
        pixels::blit_component(
            pixels::Plane::Color,
            &source,
            from.format,
            (from.width, from.height),
            src_size,
            &mut target,
            to.format,
            (to.width, to.height),
            dst_size,
        );
        readback::write_texture(
            &self.queue,
            to.texture,
            to.level,
            (to.width, to.height),
            bpp,
            &target,
        );
        Ok(())
    }
}

impl GraphicsApi for WgpuDevice {
    fn current_surface(&self) -> Option<SurfaceHandles> {
        Some(self.surface_handles())
    }

    fn surface_size(&self) -> (u32, u32) {
        let state = self.lock();
        (state.surface_color.width, state.surface_color.height)
    }

    fn create_texture(&self, target: TextureTarget) -> GlResult<NativeId> {
        let mut state = self.lock();
        let id = state.next_native();
        state.textures.insert(id, GpuTexture::new(target));
        Ok(NativeId(id))
    }

    fn delete_texture(&self, id: NativeId) -> GlResult<()> {
        const CALL: &str = "glDeleteTextures";
        let mut state = self.lock();
        texture(&state, id, CALL)?;
        let object = GlObject::Texture(id.0);
        state.check_not_acquired(object, CALL)?;
        warn_orphans(&state, object);
        state.textures.remove(&id.0);
        state.texture_units.retain(|_, bound| *bound != id.0);
        Ok(())
    }

    fn bind_texture(
        &self,
        unit: u32,
        target: TextureTarget,
        id: Option<NativeId>,
    ) -> GlResult<()> {
        const CALL: &str = "glBindTexture";
        let mut state = self.lock();
        let Some(id) = id else {
            state.texture_units.remove(&unit);
            return Ok(());
        };
        if texture(&state, id, CALL)?.target != target {
            return Err(err(CALL, GlErrorCode::InvalidOperation));
        }
        state.check_not_acquired(GlObject::Texture(id.0), CALL)?;
        state.texture_units.insert(unit, id.0);
        Ok(())
    }

    fn texture_parameter(&self, id: NativeId, param: TextureParam) -> GlResult<()> {
        const CALL: &str = "glTexParameter";
        let mut state = self.lock();
        let entry = state
            .textures
            .get_mut(&id.0)
            .ok_or(err(CALL, GlErrorCode::InvalidOperation))?;
        let params = &mut entry.params;
        match param {
            TextureParam::WrapS(wrap) => params.wrap_s = wrap,
            TextureParam::WrapT(wrap) => params.wrap_t = wrap,
            TextureParam::MinFilter(filter) => params.min_filter = filter,
            TextureParam::MagFilter(filter) => params.mag_filter = filter,
            TextureParam::LodBias(bias) => params.lod_bias = bias,
        }
        Ok(())
    }

    /// Level 0 (re)allocates the whole chain; other levels must match the
    /// chain's format and size.
    fn texture_image_2d(
        &self,
        id: NativeId,
        level: u32,
        format: PixelFormat,
        width: u32,
        height: u32,
        data: Option<&[u8]>,
    ) -> GlResult<()> {
        const CALL: &str = "glTexImage2D";
        let mut state = self.lock();
        texture(&state, id, CALL)?;
        state.check_not_acquired(GlObject::Texture(id.0), CALL)?;
        if width == 0 || height == 0 {
            return Err(err(CALL, GlErrorCode::InvalidValue));
        }
        let bpp = format.bytes_per_pixel();
        if let Some(data) = data {
            if data.len() != width as usize * height as usize * bpp {
                return Err(err(CALL, GlErrorCode::InvalidValue));
            }
            if !format.is_color() {
                return Err(err(CALL, GlErrorCode::InvalidOperation));
            }
        }

        let entry = state
            .textures
            .get_mut(&id.0)
            .ok_or(err(CALL, GlErrorCode::InvalidOperation))?;
        if level == 0 {
            let plane = Plane::new(
                &self.device,
                "texture",
                width,
                height,
                format,
                full_chain(width, height),
            );
            entry.plane = Some(plane);
            entry.defined.clear();
        } else {
            let fits = entry.plane.as_ref().is_some_and(|p| {
                p.format == format && level < p.mip_levels() && p.level_size(level) == (width, height)
            });
            if !fits {
                return Err(err(CALL, GlErrorCode::InvalidValue));
            }
        }
        entry.defined.insert(level);

        if let (Some(data), Some(plane)) = (data, &entry.plane) {
            readback::write_texture(&self.queue, &plane.texture, level, (width, height), bpp, data);
        }
        Ok(())
    }

    fn generate_mipmap(&self, id: NativeId) -> GlResult<()> {
        const CALL: &str = "glGenerateMipmap";
        let mut state = self.lock();
        state.check_not_acquired(GlObject::Texture(id.0), CALL)?;
        let entry = state
            .textures
            .get_mut(&id.0)
            .ok_or(err(CALL, GlErrorCode::InvalidOperation))?;
        let plane = entry
            .level(0)
            .ok_or(err(CALL, GlErrorCode::InvalidOperation))?;
        if !plane.format.is_color() {
            return Err(err(CALL, GlErrorCode::InvalidOperation));
        }

        let bpp = plane.format.bytes_per_pixel();
        let mut data = readback::read_texture(
            &self.device,
            &self.queue,
            &plane.texture,
            0,
            (plane.width, plane.height),
            bpp,
        )
        .map_err(out_of_memory(CALL))?;
        let (mut width, mut height) = (plane.width, plane.height);
        let levels = plane.mip_levels();
        for level in 1..levels {
            let (next, w, h) = pixels::downsample(&data, width, height, plane.format);
            readback::write_texture(&self.queue, &plane.texture, level, (w, h), bpp, &next);
            (data, width, height) = (next, w, h);
        }
        entry.defined = (0..levels).collect();
        Ok(())
    }

    fn read_texture(&self, id: NativeId, level: u32) -> GlResult<Vec<u8>> {
        const CALL: &str = "glGetTexImage";
        let state = self.lock();
        let entry = texture(&state, id, CALL)?;
        state.check_not_acquired(GlObject::Texture(id.0), CALL)?;
        let plane = entry
            .level(level)
            .ok_or(err(CALL, GlErrorCode::InvalidValue))?;
        let (width, height) = plane.level_size(level);
        self.read_plane(
            &PlaneView {
                texture: &plane.texture,
                level,
                width,
                height,
                format: plane.format,
            },
            CALL,
        )
    }

    fn create_renderbuffer(
        &self,
        format: PixelFormat,
        width: u32,
        height: u32,
    ) -> GlResult<NativeId> {
        if width == 0 || height == 0 {
            return Err(err("glRenderbufferStorage", GlErrorCode::InvalidValue));
        }
        let mut state = self.lock();
        let id = state.next_native();
        let plane = Plane::new(&self.device, "renderbuffer", width, height, format, 1);
        state.renderbuffers.insert(id, plane);
        Ok(NativeId(id))
    }

    fn delete_renderbuffer(&self, id: NativeId) -> GlResult<()> {
        const CALL: &str = "glDeleteRenderbuffers";
        let mut state = self.lock();
        if !state.renderbuffers.contains_key(&id.0) {
            return Err(err(CALL, GlErrorCode::InvalidOperation));
        }
        let object = GlObject::Renderbuffer(id.0);
        state.check_not_acquired(object, CALL)?;
        warn_orphans(&state, object);
        state.renderbuffers.remove(&id.0);
        if state.bound_renderbuffer == Some(id.0) {
            state.bound_renderbuffer = None;
        }
        Ok(())
    }

    fn bind_renderbuffer(&self, id: Option<NativeId>) -> GlResult<()> {
        let mut state = self.lock();
        if let Some(id) = id {
            if !state.renderbuffers.contains_key(&id.0) {
                return Err(err("glBindRenderbuffer", GlErrorCode::InvalidOperation));
            }
        }
        state.bound_renderbuffer = id.map(|id| id.0);
        Ok(())
    }

    fn create_framebuffer(&self) -> GlResult<NativeId> {
        let mut state = self.lock();
        let id = state.next_native();
        state.framebuffers.insert(id, Default::default());
        Ok(NativeId(id))
    }

    fn delete_framebuffer(&self, id: NativeId) -> GlResult<()> {
        let mut state = self.lock();
        if state.framebuffers.remove(&id.0).is_none() {
            return Err(err("glDeleteFramebuffers", GlErrorCode::InvalidOperation));
        }
        if state.bound_framebuffer == Some(id.0) {
            state.bound_framebuffer = None;
        }
        Ok(())
    }

    fn bind_framebuffer(&self, id: Option<NativeId>) -> GlResult<()> {
        let mut state = self.lock();
        if let Some(id) = id {
            if !state.framebuffers.contains_key(&id.0) {
                return Err(err("glBindFramebuffer", GlErrorCode::InvalidOperation));
            }
        }
        state.bound_framebuffer = id.map(|id| id.0);
        Ok(())
    }

    fn framebuffer_texture(
        &self,
        framebuffer: NativeId,
        point: AttachmentPoint,
        id: Option<NativeId>,
        level: u32,
    ) -> GlResult<()> {
        const CALL: &str = "glFramebufferTexture2D";
        let mut state = self.lock();
        if let Some(id) = id {
            texture(&state, id, CALL)?;
        }
        let fb = state
            .framebuffers
            .get_mut(&framebuffer.0)
            .ok_or(err(CALL, GlErrorCode::InvalidOperation))?;
        match id {
            Some(id) => {
                fb.insert(point, Attached::Texture { id: id.0, level });
            }
            None => {
                fb.remove(&point);
            }
        }
        Ok(())
    }

    fn framebuffer_renderbuffer(
        &self,
        framebuffer: NativeId,
        point: AttachmentPoint,
        id: Option<NativeId>,
    ) -> GlResult<()> {
        const CALL: &str = "glFramebufferRenderbuffer";
        let mut state = self.lock();
        if let Some(id) = id {
            if !state.renderbuffers.contains_key(&id.0) {
                return Err(err(CALL, GlErrorCode::InvalidOperation));
            }
        }
        let fb = state
            .framebuffers
            .get_mut(&framebuffer.0)
            .ok_or(err(CALL, GlErrorCode::InvalidOperation))?;
        match id {
            Some(id) => {
                fb.insert(point, Attached::Renderbuffer(id.0));
            }
            None => {
                fb.remove(&point);
            }
        }
        Ok(())
    }

    fn check_framebuffer_status(&self) -> GlResult<FramebufferStatus> {
        let state = self.lock();
        Ok(match state.bound_framebuffer {
            None => FramebufferStatus::Complete,
            Some(id) => state.framebuffer_status(id),
        })
    }

    fn blit_framebuffer(
        &self,
        src: NativeId,
        dst: Option<NativeId>,
        src_size: (u32, u32),
        dst_size: (u32, u32),
        mask: BlitMask,
    ) -> GlResult<()> {
        const CALL: &str = "glBlitFramebuffer";
        let state = self.lock();
        for fb in std::iter::once(src.0).chain(dst.map(|d| d.0)) {
            if !state.framebuffers.contains_key(&fb) {
                return Err(err(CALL, GlErrorCode::InvalidOperation));
            }
            if !state.framebuffer_status(fb).is_complete() {
                return Err(err(CALL, GlErrorCode::InvalidFramebufferOperation));
            }
        }

        let planes = [
            (mask.color, AttachmentPoint::Color(0)),
            (mask.depth, AttachmentPoint::Depth),
            (mask.stencil, AttachmentPoint::Stencil),
        ];
        // Every plane is checked before any is written.
        let mut copies = Vec::new();
        for (enabled, point) in planes {
            if !enabled {
                continue;
            }
            let (Some(from), Some(to)) = (
                state.plane(Some(src.0), point, CALL)?,
                state.plane(dst.map(|d| d.0), point, CALL)?,
            ) else {
                continue;
            };
            // A combined depth-stencil plane is copied once.
            if copies.iter().any(|(f, t, _, _)| (*f, *t) == (from, to)) {
                continue;
            }
            for object in [from, to].into_iter().filter_map(|loc| loc.object()) {
                state.check_not_acquired(object, CALL)?;
            }
            let (Some(source), Some(target)) = (state.view(from), state.view(to)) else {
                return Err(err(CALL, GlErrorCode::InvalidFramebufferOperation));
            };
            if !blit_supported(&source, &target, src_size, dst_size) {
                return Err(err(CALL, GlErrorCode::InvalidOperation));
            }
            copies.push((from, to, source, target));
        }
        for (_, _, source, target) in &copies {
            self.blit_plane(source, target, src_size, dst_size, CALL)?;
        }
        Ok(())
    }

    fn read_framebuffer(
        &self,
        framebuffer: Option<NativeId>,
        point: AttachmentPoint,
    ) -> GlResult<Vec<u8>> {
        const CALL: &str = "glReadPixels";
        let state = self.lock();
        let loc = state
            .plane(framebuffer.map(|f| f.0), point, CALL)?
            .ok_or(err(CALL, GlErrorCode::InvalidOperation))?;
        if let Some(object) = loc.object() {
            state.check_not_acquired(object, CALL)?;
        }
        let view = state
            .view(loc)
            .ok_or(err(CALL, GlErrorCode::InvalidFramebufferOperation))?;
        self.read_plane(&view, CALL)
    }

    fn create_vertex_buffer(&self, data: &[u8]) -> GlResult<NativeId> {
        if data.is_empty() {
            return Err(err("glBufferData", GlErrorCode::InvalidValue));
        }
        let align = wgpu::COPY_BUFFER_ALIGNMENT as usize;
        let mut contents = data.to_vec();
        contents.resize(data.len().div_ceil(align) * align, 0);
        let buffer = self
            .device
            .create_buffer_init(&wgpu::util::BufferInitDescriptor {
                label: Some("vertex_buffer"),
                contents: &contents,
                usage: wgpu::BufferUsages::VERTEX
                    | wgpu::BufferUsages::STORAGE
                    | wgpu::BufferUsages::COPY_SRC
                    | wgpu::BufferUsages::COPY_DST,
            });

        let mut state = self.lock();
        let id = state.next_native();
        state.vertex_buffers.insert(
            id,
            VertexBuffer {
                buffer,
                size: data.len() as u64,
            },
        );
        Ok(NativeId(id))
    }

    fn read_vertex_buffer(&self, id: NativeId) -> GlResult<Vec<u8>> {
        const CALL: &str = "glGetBufferSubData";
        let state = self.lock();
        state.check_not_acquired(GlObject::Buffer(id.0), CALL)?;
        let vb = state
            .vertex_buffers
            .get(&id.0)
            .ok_or(err(CALL, GlErrorCode::InvalidOperation))?;
        readback::read_buffer(&self.device, &self.queue, &vb.buffer, 0, vb.size)
            .map_err(out_of_memory(CALL))
    }

    fn delete_vertex_buffer(&self, id: NativeId) -> GlResult<()> {
        const CALL: &str = "glDeleteBuffers";
        let mut state = self.lock();
        if !state.vertex_buffers.contains_key(&id.0) {
            return Err(err(CALL, GlErrorCode::InvalidOperation));
        }
        let object = GlObject::Buffer(id.0);
        state.check_not_acquired(object, CALL)?;
        warn_orphans(&state, object);
        state.vertex_buffers.remove(&id.0);
        Ok(())
    }
}
