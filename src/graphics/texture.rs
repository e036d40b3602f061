//! Textures and renderbuffers: graphics-owned images that compute may alias.

use std::sync::Arc;

use super::api::{
    Filter, GlResult, GraphicsApi, NativeId, PixelFormat, TextureParam, TextureTarget, Wrap,
};

/// Dimensions and format of an allocated image.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Storage {
    pub width: u32,
    pub height: u32,
    pub format: PixelFormat,
}

/// A texture object. Storage is allocated separately through
/// [`store_2d`](Self::store_2d).
pub struct Texture {
    api: Arc<dyn GraphicsApi>,
    id: NativeId,
    target: TextureTarget,
    name: String,
    storage: Option<Storage>,
    deleted: bool,
}

impl Texture {
    /// Creates an empty texture with repeat wrapping, mipmapped minification
    /// and nearest magnification.
    pub fn new(api: Arc<dyn GraphicsApi>, name: &str, target: TextureTarget) -> GlResult<Self> {
        let id = api.create_texture(target)?;
        let texture = Self {
            api,
            id,
            target,
            name: name.to_string(),
            storage: None,
            deleted: false,
        };

        texture.bind(0)?;
        texture.set_param(TextureParam::WrapS(Wrap::Repeat))?;
        texture.set_param(TextureParam::WrapT(Wrap::Repeat))?;
        texture.set_param(TextureParam::MinFilter(Filter::LinearMipmapNearest))?;
        texture.set_param(TextureParam::MagFilter(Filter::Nearest))?;
        texture.unbind(0)?;

        log::debug!("Created Texture: {}", texture.name);
        Ok(texture)
    }

    pub fn id(&self) -> NativeId {
        self.id
    }

    pub fn target(&self) -> TextureTarget {
        self.target
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Level-0 storage, `None` until allocated.
    pub fn storage(&self) -> Option<Storage> {
        self.storage
    }

    /// Binds this texture to texture unit `unit`.
    pub fn bind(&self, unit: u32) -> GlResult<()> {
        self.api.bind_texture(unit, self.target, Some(self.id))
    }

    /// Clears texture unit `unit`.
    pub fn unbind(&self, unit: u32) -> GlResult<()> {
        self.api.bind_texture(unit, self.target, None)
    }

    pub fn set_param(&self, param: TextureParam) -> GlResult<()> {
        self.api.texture_parameter(self.id, param)
    }

    /// Generates the mip chain from level 0. Never done implicitly.
    pub fn generate_mipmaps(&self) -> GlResult<()> {
        self.set_param(TextureParam::LodBias(-1.0))?;
        self.api.generate_mipmap(self.id)
    }

    /// Allocates storage for mip `level`; `data: None` leaves it undefined
    /// (for images the compute pipeline fills).
    pub fn store_2d(
        &mut self,
        width: u32,
        height: u32,
        level: u32,
        format: PixelFormat,
        data: Option<&[u8]>,
    ) -> GlResult<()> {
        self.api
            .texture_image_2d(self.id, level, format, width, height, data)?;
        if level == 0 {
            self.storage = Some(Storage {
                width,
                height,
                format,
            });
        }
        Ok(())
    }

    /// Reads back the pixels of mip `level`.
    pub fn read_pixels(&self, level: u32) -> GlResult<Vec<u8>> {
        self.api.read_texture(self.id, level)
    }

    pub fn destroy(mut self) -> GlResult<()> {
        self.delete()
    }

    fn delete(&mut self) -> GlResult<()> {
        if self.deleted {
            return Ok(());
        }
        self.deleted = true;
        self.api.delete_texture(self.id)?;
        log::debug!("Destroyed Texture: {}", self.name);
        Ok(())
    }
}

impl Drop for Texture {
    fn drop(&mut self) {
        if let Err(e) = self.delete() {
            log::error!("Failed to delete texture {}: {}", self.name, e);
        }
    }
}

impl std::fmt::Debug for Texture {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Texture")
            .field("name", &self.name)
            .field("id", &self.id)
            .field("storage", &self.storage)
            .finish()
    }
}

/// A renderbuffer with fixed dimensions and format.
pub struct Renderbuffer {
    api: Arc<dyn GraphicsApi>,
    id: NativeId,
    storage: Storage,
    deleted: bool,
}

impl Renderbuffer {
    pub fn new(
        api: Arc<dyn GraphicsApi>,
        width: u32,
        height: u32,
        format: PixelFormat,
    ) -> GlResult<Self> {
        let id = api.create_renderbuffer(format, width, height)?;
        log::debug!("Created Renderbuffer {} ({}x{} {:?})", id, width, height, format);
        Ok(Self {
            api,
            id,
            storage: Storage {
                width,
                height,
                format,
            },
            deleted: false,
        })
    }

    pub fn id(&self) -> NativeId {
        self.id
    }

    pub fn width(&self) -> u32 {
        self.storage.width
    }

    pub fn height(&self) -> u32 {
        self.storage.height
    }

    pub fn format(&self) -> PixelFormat {
        self.storage.format
    }

    pub fn storage(&self) -> Storage {
        self.storage
    }

    pub fn bind(&self) -> GlResult<()> {
        self.api.bind_renderbuffer(Some(self.id))
    }

    pub fn unbind(&self) -> GlResult<()> {
        self.api.bind_renderbuffer(None)
    }

    pub fn destroy(mut self) -> GlResult<()> {
        self.delete()
    }

    fn delete(&mut self) -> GlResult<()> {
        if self.deleted {
            return Ok(());
        }
        self.deleted = true;
        self.api.delete_renderbuffer(self.id)?;
        log::debug!("Destroyed Renderbuffer {}", self.id);
        Ok(())
    }
}

impl Drop for Renderbuffer {
    fn drop(&mut self) {
        if let Err(e) = self.delete() {
            log::error!("Failed to delete renderbuffer {}: {}", self.id, e);
        }
    }
}

impl std::fmt::Debug for Renderbuffer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Renderbuffer")
            .field("id", &self.id)
            .field("storage", &self.storage)
            .finish()
    }
}
