//! Graphics half of the host device.

use super::state::{
    Attached, GlObject, HostFramebuffer, HostState, HostTexture, PlaneLoc, Surface,
    TextureParams,
};
use super::HostDevice;
use crate::graphics::pixels::{self, Plane};
use crate::graphics::{
    AttachmentPoint, BlitMask, FramebufferStatus, GlError, GlErrorCode, GlResult, GraphicsApi,
    NativeId, PixelFormat, SurfaceHandles, TextureParam, TextureTarget,
};

fn err(call: &'static str, code: GlErrorCode) -> GlError {
    GlError::new(call, code)
}

fn texture<'a>(state: &'a HostState, id: NativeId, call: &'static str) -> GlResult<&'a HostTexture> {
    state
        .textures
        .get(&id.0)
        .ok_or(err(call, GlErrorCode::InvalidOperation))
}

/// Counts a deletion that leaves compute views dangling.
fn note_orphans(state: &mut HostState, object: GlObject) {
    let views = state.gl_views(object);
    if views > 0 {
        log::warn!("{:?} deleted with {} compute views alive", object, views);
        state.stats.orphaned_views += 1;
    }
}

fn check_size(width: u32, height: u32, call: &'static str) -> GlResult<()> {
    if width == 0 || height == 0 {
        return Err(err(call, GlErrorCode::InvalidValue));
    }
    Ok(())
}

fn downsample(src: &Surface) -> Surface {
    let (data, width, height) = pixels::downsample(&src.data, src.width, src.height, src.format);
    Surface {
        width,
        height,
        format: src.format,
        data,
    }
}

impl GraphicsApi for HostDevice {
    fn current_surface(&self) -> Option<SurfaceHandles> {
        self.surface
    }

    fn surface_size(&self) -> (u32, u32) {
        let state = self.lock();
        (state.surface_color.width, state.surface_color.height)
    }

    fn create_texture(&self, target: TextureTarget) -> GlResult<NativeId> {
        let mut state = self.lock();
        let id = state.next_native();
        state.textures.insert(
            id,
            HostTexture {
                target,
                params: TextureParams::default(),
                levels: Vec::new(),
            },
        );
        state.stats.textures_created += 1;
        Ok(NativeId(id))
    }

    fn delete_texture(&self, id: NativeId) -> GlResult<()> {
        const CALL: &str = "glDeleteTextures";
        let mut state = self.lock();
        texture(&state, id, CALL)?;
        let object = GlObject::Texture(id.0);
        state.check_not_acquired(object, CALL)?;
        note_orphans(&mut state, object);
        state.textures.remove(&id.0);
        state.texture_units.retain(|_, bound| *bound != id.0);
        state.stats.textures_deleted += 1;
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
        check_size(width, height, CALL)?;

        let mut surface = Surface::new(width, height, format);
        if let Some(data) = data {
            if data.len() != surface.byte_len() {
                return Err(err(CALL, GlErrorCode::InvalidValue));
            }
            surface.data.copy_from_slice(data);
        }

        let entry = state
            .textures
            .get_mut(&id.0)
            .ok_or(err(CALL, GlErrorCode::InvalidOperation))?;
        let level = level as usize;
        if entry.levels.len() <= level {
            entry.levels.resize_with(level + 1, || None);
        }
        entry.levels[level] = Some(surface);
        Ok(())
    }

    fn generate_mipmap(&self, id: NativeId) -> GlResult<()> {
        const CALL: &str = "glGenerateMipmap";
        let mut state = self.lock();
        texture(&state, id, CALL)?;
        state.check_not_acquired(GlObject::Texture(id.0), CALL)?;
        let entry = state
            .textures
            .get_mut(&id.0)
            .ok_or(err(CALL, GlErrorCode::InvalidOperation))?;
        let base = entry
            .level(0)
            .cloned()
            .ok_or(err(CALL, GlErrorCode::InvalidOperation))?;

        let mut levels = vec![Some(base)];
        while let Some(Some(last)) = levels.last() {
            if last.width == 1 && last.height == 1 {
                break;
            }
            let next = downsample(last);
            levels.push(Some(next));
        }
        entry.levels = levels;
        Ok(())
    }

    fn read_texture(&self, id: NativeId, level: u32) -> GlResult<Vec<u8>> {
        const CALL: &str = "glGetTexImage";
        let state = self.lock();
        let entry = texture(&state, id, CALL)?;
        state.check_not_acquired(GlObject::Texture(id.0), CALL)?;
        entry
            .level(level)
            .map(|s| s.data.clone())
            .ok_or(err(CALL, GlErrorCode::InvalidValue))
    }

    fn create_renderbuffer(
        &self,
        format: PixelFormat,
        width: u32,
        height: u32,
    ) -> GlResult<NativeId> {
        check_size(width, height, "glRenderbufferStorage")?;
        let mut state = self.lock();
        let id = state.next_native();
        state
            .renderbuffers
            .insert(id, Surface::new(width, height, format));
        state.stats.renderbuffers_created += 1;
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
        note_orphans(&mut state, object);
        state.renderbuffers.remove(&id.0);
        if state.bound_renderbuffer == Some(id.0) {
            state.bound_renderbuffer = None;
        }
        state.stats.renderbuffers_deleted += 1;
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
        state.framebuffers.insert(id, HostFramebuffer::default());
        state.stats.framebuffers_created += 1;
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
        state.stats.framebuffers_deleted += 1;
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
                fb.attachments
                    .insert(point, Attached::Texture { id: id.0, level });
            }
            None => {
                fb.attachments.remove(&point);
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
                fb.attachments.insert(point, Attached::Renderbuffer(id.0));
            }
            None => {
                fb.attachments.remove(&point);
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
        let mut state = self.lock();
        for fb in std::iter::once(src.0).chain(dst.map(|d| d.0)) {
            if !state.framebuffers.contains_key(&fb) {
                return Err(err(CALL, GlErrorCode::InvalidOperation));
            }
            if !state.framebuffer_status(fb).is_complete() {
                return Err(err(CALL, GlErrorCode::InvalidFramebufferOperation));
            }
        }

        let planes = [
            (mask.color, AttachmentPoint::Color(0), Plane::Color),
            (mask.depth, AttachmentPoint::Depth, Plane::Depth),
            (mask.stencil, AttachmentPoint::Stencil, Plane::Stencil),
        ];
        // Every plane is checked before any is written.
        let mut copies: Vec<(Plane, PlaneLoc, PlaneLoc)> = Vec::new();
        for (enabled, point, plane) in planes {
            if !enabled {
                continue;
            }
            let (Some(from), Some(to)) = (
                state.plane(Some(src.0), point, CALL)?,
                state.plane(dst.map(|d| d.0), point, CALL)?,
            ) else {
                continue;
            };
            for object in [from, to].into_iter().filter_map(HostState::plane_object) {
                state.check_not_acquired(object, CALL)?;
            }
            let (Some(source), Some(target)) = (state.surface(from), state.surface(to)) else {
                return Err(err(CALL, GlErrorCode::InvalidFramebufferOperation));
            };
            if !plane.compatible(source.format, target.format) {
                return Err(err(CALL, GlErrorCode::InvalidOperation));
            }
            copies.push((plane, from, to));
        }

        for (plane, from, to) in copies {
            let source = state
                .surface(from)
                .cloned()
                .ok_or(err(CALL, GlErrorCode::InvalidFramebufferOperation))?;
            let target = state
                .surface_mut(to)
                .ok_or(err(CALL, GlErrorCode::InvalidFramebufferOperation))?;
            let (dst_dims, dst_format) = ((target.width, target.height), target.format);
            pixels::blit_component(
                plane,
                &source.data,
                source.format,
                (source.width, source.height),
                src_size,
                &mut target.data,
                dst_format,
                dst_dims,
                dst_size,
            );
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
        if let Some(object) = HostState::plane_object(loc) {
            state.check_not_acquired(object, CALL)?;
        }
        state
            .surface(loc)
            .map(|s| s.data.clone())
            .ok_or(err(CALL, GlErrorCode::InvalidFramebufferOperation))
    }

    fn create_vertex_buffer(&self, data: &[u8]) -> GlResult<NativeId> {
        if data.is_empty() {
            return Err(err("glBufferData", GlErrorCode::InvalidValue));
        }
        let mut state = self.lock();
        let id = state.next_native();
        state.vertex_buffers.insert(id, data.to_vec());
        Ok(NativeId(id))
    }

    fn read_vertex_buffer(&self, id: NativeId) -> GlResult<Vec<u8>> {
        const CALL: &str = "glGetBufferSubData";
        let state = self.lock();
        state.check_not_acquired(GlObject::Buffer(id.0), CALL)?;
        state
            .vertex_buffers
            .get(&id.0)
            .cloned()
            .ok_or(err(CALL, GlErrorCode::InvalidOperation))
    }

    fn delete_vertex_buffer(&self, id: NativeId) -> GlResult<()> {
        const CALL: &str = "glDeleteBuffers";
        let mut state = self.lock();
        if !state.vertex_buffers.contains_key(&id.0) {
            return Err(err(CALL, GlErrorCode::InvalidOperation));
        }
        let object = GlObject::Buffer(id.0);
        state.check_not_acquired(object, CALL)?;
        note_orphans(&mut state, object);
        state.vertex_buffers.remove(&id.0);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn filled(device: &HostDevice, format: PixelFormat, w: u32, h: u32, byte: u8) -> NativeId {
        let id = device.create_texture(TextureTarget::Texture2d).unwrap();
        let data = vec![byte; w as usize * h as usize * format.bytes_per_pixel()];
        device
            .texture_image_2d(id, 0, format, w, h, Some(&data))
            .unwrap();
        id
    }

    #[test]
    fn test_texture_image_size_checked() {
        let device = HostDevice::new();
        let id = device.create_texture(TextureTarget::Texture2d).unwrap();
        let err = device
            .texture_image_2d(id, 0, PixelFormat::Rgba8, 2, 2, Some(&[0; 3]))
            .unwrap_err();
        assert_eq!(err.code, GlErrorCode::InvalidValue);
        assert!(device.read_texture(id, 0).is_err());
    }

    #[test]
    fn test_generate_mipmap_box_filters() {
        let device = HostDevice::new();
        let id = device.create_texture(TextureTarget::Texture2d).unwrap();
        let data = [0u8, 100, 200, 100];
        device
            .texture_image_2d(id, 0, PixelFormat::R8, 2, 2, Some(&data))
            .unwrap();
        device.generate_mipmap(id).unwrap();
        assert_eq!(device.texture_levels(id), Some(2));
        assert_eq!(device.read_texture(id, 1).unwrap(), vec![100]);
    }

    #[test]
    fn test_blit_nearest_to_surface() {
        let device = HostDevice::builder().surface_size(4, 4).build();
        let color = filled(&device, PixelFormat::Rgba8, 2, 2, 0);
        device
            .texture_image_2d(
                color,
                0,
                PixelFormat::Rgba8,
                2,
                2,
                Some(&[1, 1, 1, 1, 2, 2, 2, 2, 3, 3, 3, 3, 4, 4, 4, 4]),
            )
            .unwrap();
        let fb = device.create_framebuffer().unwrap();
        device
            .framebuffer_texture(fb, AttachmentPoint::Color(0), Some(color), 0)
            .unwrap();
        device
            .blit_framebuffer(fb, None, (2, 2), (4, 4), BlitMask::COLOR)
            .unwrap();

        let surface = device
            .read_framebuffer(None, AttachmentPoint::Color(0))
            .unwrap();
        let pixel = |x: usize, y: usize| surface[(y * 4 + x) * 4];
        assert_eq!(pixel(0, 0), 1);
        assert_eq!(pixel(1, 1), 1);
        assert_eq!(pixel(2, 0), 2);
        assert_eq!(pixel(0, 3), 3);
        assert_eq!(pixel(3, 3), 4);
    }

    #[test]
    fn test_blit_requires_complete_source() {
        let device = HostDevice::new();
        let fb = device.create_framebuffer().unwrap();
        let err = device
            .blit_framebuffer(fb, None, (1, 1), (1, 1), BlitMask::ALL)
            .unwrap_err();
        assert_eq!(err.code, GlErrorCode::InvalidFramebufferOperation);
    }

    #[test]
    fn test_delete_with_live_view_counts_orphan() {
        use crate::compute::{ComputeApi, ContextProperties, MemAccess};

        let device = HostDevice::new();
        let platform = device.platform_ids().unwrap()[0];
        let gpu = device
            .device_ids(platform, crate::compute::DeviceType::Gpu)
            .unwrap()[0];
        let context = device
            .create_context(
                gpu,
                &ContextProperties {
                    platform,
                    surface: device.current_surface(),
                },
            )
            .unwrap();
        let buffer = device.create_vertex_buffer(&[0; 16]).unwrap();
        let view = device
            .create_from_gl_buffer(context, MemAccess::ReadWrite, buffer)
            .unwrap();

        device.delete_vertex_buffer(buffer).unwrap();
        assert_eq!(device.stats().orphaned_views, 1);
        device.release_mem(view).unwrap();
        device.release_context(context).unwrap();
    }
}
