//! Table of render targets that framebuffers reference by key.
//!
//! Framebuffer attachments never own what they point at. They hold a
//! [`TargetRef`] into this table; keys are never reused, so a reference to a
//! destroyed target fails the lookup instead of aliasing a newer object.

use std::collections::BTreeMap;
use std::sync::Arc;

use super::api::{GlError, GraphicsApi, NativeId, PixelFormat, TextureTarget};
use super::texture::{Renderbuffer, Texture};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TextureKey(u64);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct RenderbufferKey(u64);

/// Weak reference to an attachable target.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TargetRef {
    Texture(TextureKey),
    Renderbuffer(RenderbufferKey),
}

impl From<TextureKey> for TargetRef {
    fn from(key: TextureKey) -> Self {
        TargetRef::Texture(key)
    }
}

impl From<RenderbufferKey> for TargetRef {
    fn from(key: RenderbufferKey) -> Self {
        TargetRef::Renderbuffer(key)
    }
}

/// Errors raised by render-target operations.
#[derive(Debug, thiserror::Error)]
pub enum RenderTargetError {
    #[error("Render target {0:?} does not exist")]
    Missing(TargetRef),
    #[error(transparent)]
    Graphics(#[from] GlError),
}

pub type RenderTargetResult<T> = Result<T, RenderTargetError>;

/// What a framebuffer needs to know about an attached target.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TargetInfo {
    pub id: NativeId,
    pub renderbuffer: bool,
    /// `None` for a texture without storage.
    pub size: Option<(u32, u32)>,
    pub format: Option<PixelFormat>,
}

/// Owner of textures and renderbuffers used as render targets.
pub struct RenderTargets {
    api: Arc<dyn GraphicsApi>,
    next_key: u64,
    textures: BTreeMap<TextureKey, Texture>,
    renderbuffers: BTreeMap<RenderbufferKey, Renderbuffer>,
}

impl RenderTargets {
    pub fn new(api: Arc<dyn GraphicsApi>) -> Self {
        Self {
            api,
            next_key: 0,
            textures: BTreeMap::new(),
            renderbuffers: BTreeMap::new(),
        }
    }

    pub fn api(&self) -> &Arc<dyn GraphicsApi> {
        &self.api
    }

    pub fn create_texture(
        &mut self,
        name: &str,
        target: TextureTarget,
    ) -> RenderTargetResult<TextureKey> {
        let texture = Texture::new(self.api.clone(), name, target)?;
        Ok(self.insert_texture(texture))
    }

    /// Takes ownership of an existing texture.
    pub fn insert_texture(&mut self, texture: Texture) -> TextureKey {
        let key = TextureKey(self.next());
        self.textures.insert(key, texture);
        key
    }

    pub fn texture(&self, key: TextureKey) -> RenderTargetResult<&Texture> {
        self.textures
            .get(&key)
            .ok_or(RenderTargetError::Missing(key.into()))
    }

    pub fn texture_mut(&mut self, key: TextureKey) -> RenderTargetResult<&mut Texture> {
        self.textures
            .get_mut(&key)
            .ok_or(RenderTargetError::Missing(key.into()))
    }

    pub fn destroy_texture(&mut self, key: TextureKey) -> RenderTargetResult<()> {
        let texture = self
            .textures
            .remove(&key)
            .ok_or(RenderTargetError::Missing(key.into()))?;
        Ok(texture.destroy()?)
    }

    pub fn create_renderbuffer(
        &mut self,
        width: u32,
        height: u32,
        format: PixelFormat,
    ) -> RenderTargetResult<RenderbufferKey> {
        let renderbuffer = Renderbuffer::new(self.api.clone(), width, height, format)?;
        let key = RenderbufferKey(self.next());
        self.renderbuffers.insert(key, renderbuffer);
        Ok(key)
    }

    pub fn renderbuffer(&self, key: RenderbufferKey) -> RenderTargetResult<&Renderbuffer> {
        self.renderbuffers
            .get(&key)
            .ok_or(RenderTargetError::Missing(key.into()))
    }

    pub fn destroy_renderbuffer(&mut self, key: RenderbufferKey) -> RenderTargetResult<()> {
        let renderbuffer = self
            .renderbuffers
            .remove(&key)
            .ok_or(RenderTargetError::Missing(key.into()))?;
        Ok(renderbuffer.destroy()?)
    }

    /// Looks up an attachment reference.
    pub fn resolve(&self, target: TargetRef) -> RenderTargetResult<TargetInfo> {
        match target {
            TargetRef::Texture(key) => {
                let texture = self.texture(key)?;
                let storage = texture.storage();
                Ok(TargetInfo {
                    id: texture.id(),
                    renderbuffer: false,
                    size: storage.map(|s| (s.width, s.height)),
                    format: storage.map(|s| s.format),
                })
            }
            TargetRef::Renderbuffer(key) => {
                let renderbuffer = self.renderbuffer(key)?;
                Ok(TargetInfo {
                    id: renderbuffer.id(),
                    renderbuffer: true,
                    size: Some((renderbuffer.width(), renderbuffer.height())),
                    format: Some(renderbuffer.format()),
                })
            }
        }
    }

    pub fn len(&self) -> usize {
        self.textures.len() + self.renderbuffers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Destroys every target; returns the first failure.
    pub fn clear(&mut self) -> RenderTargetResult<()> {
        let mut first: Option<RenderTargetError> = None;
        let textures = std::mem::take(&mut self.textures);
        let renderbuffers = std::mem::take(&mut self.renderbuffers);
        let results = textures
            .into_values()
            .map(Texture::destroy)
            .chain(renderbuffers.into_values().map(Renderbuffer::destroy));
        for result in results {
            if let Err(e) = result {
                if first.is_none() {
                    first = Some(e.into());
                } else {
                    log::error!("Additional render target teardown failure: {}", e);
                }
            }
        }
        first.map_or(Ok(()), Err)
    }

    fn next(&mut self) -> u64 {
        let key = self.next_key;
        self.next_key += 1;
        key
    }
}

impl std::fmt::Debug for RenderTargets {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RenderTargets")
            .field("textures", &self.textures)
            .field("renderbuffers", &self.renderbuffers)
            .finish()
    }
}
