//! Framebuffers: containers of non-owning attachment references.

use std::collections::BTreeMap;
use std::sync::Arc;

use super::api::{AttachmentPoint, BlitMask, FramebufferStatus, GlResult, GraphicsApi, NativeId};
use super::targets::{RenderTargetError, RenderTargetResult, RenderTargets, TargetRef};

/// A framebuffer. Destroying it releases only the container; attached
/// textures and renderbuffers stay owned by [`RenderTargets`].
pub struct Framebuffer {
    api: Arc<dyn GraphicsApi>,
    id: NativeId,
    width: u32,
    height: u32,
    attachments: BTreeMap<AttachmentPoint, TargetRef>,
    deleted: bool,
}

impl Framebuffer {
    pub fn new(api: Arc<dyn GraphicsApi>, width: u32, height: u32) -> GlResult<Self> {
        let id = api.create_framebuffer()?;
        log::debug!("Created Framebuffer {}", id);
        Ok(Self {
            api,
            id,
            width,
            height,
            attachments: BTreeMap::new(),
            deleted: false,
        })
    }

    pub fn id(&self) -> NativeId {
        self.id
    }

    pub fn width(&self) -> u32 {
        self.width
    }

    pub fn height(&self) -> u32 {
        self.height
    }

    pub fn bind(&self) -> GlResult<()> {
        self.api.bind_framebuffer(Some(self.id))
    }

    /// Restores the default (display) framebuffer.
    pub fn unbind(&self) -> GlResult<()> {
        self.api.bind_framebuffer(None)
    }

    /// Attaches `target` at `point`, replacing any previous attachment there.
    pub fn attach(
        &mut self,
        targets: &RenderTargets,
        target: impl Into<TargetRef>,
        point: AttachmentPoint,
    ) -> RenderTargetResult<()> {
        let target = target.into();
        let info = targets.resolve(target)?;
        if info.renderbuffer {
            self.api
                .framebuffer_renderbuffer(self.id, point, Some(info.id))?;
        } else {
            self.api
                .framebuffer_texture(self.id, point, Some(info.id), 0)?;
        }
        self.attachments.insert(point, target);
        Ok(())
    }

    /// Removes the attachment at `point`, returning what was attached.
    pub fn detach(&mut self, point: AttachmentPoint) -> GlResult<Option<TargetRef>> {
        let Some(previous) = self.attachments.remove(&point) else {
            return Ok(None);
        };
        match previous {
            TargetRef::Texture(_) => self.api.framebuffer_texture(self.id, point, None, 0)?,
            TargetRef::Renderbuffer(_) => self.api.framebuffer_renderbuffer(self.id, point, None)?,
        }
        Ok(Some(previous))
    }

    pub fn attachment(&self, point: AttachmentPoint) -> Option<TargetRef> {
        self.attachments.get(&point).copied()
    }

    pub fn attachments(&self) -> impl Iterator<Item = (AttachmentPoint, TargetRef)> + '_ {
        self.attachments.iter().map(|(p, t)| (*p, *t))
    }

    /// Queries completeness: every reference must still resolve, then the
    /// framebuffer is bound, checked and unbound.
    pub fn status(&self, targets: &RenderTargets) -> RenderTargetResult<FramebufferStatus> {
        for target in self.attachments.values() {
            targets.resolve(*target)?;
        }
        self.bind()?;
        let status = self.api.check_framebuffer_status();
        let unbound = self.unbind();
        let status = status?;
        unbound?;
        Ok(status)
    }

    /// Reports whether the framebuffer is complete. Incompleteness is logged,
    /// not raised: it is expected while attachments are still being added.
    pub fn complete(&self, targets: &RenderTargets) -> bool {
        match self.status(targets) {
            Ok(FramebufferStatus::Complete) => true,
            Ok(status) => {
                log::warn!(
                    "Invalid framebuffer {}! errCode={:#x} ({:?})",
                    self.id,
                    status.code(),
                    status
                );
                false
            }
            Err(RenderTargetError::Missing(target)) => {
                log::warn!(
                    "Invalid framebuffer {}! attachment {:?} no longer exists",
                    self.id,
                    target
                );
                false
            }
            Err(e) => {
                log::warn!("Invalid framebuffer {}! {}", self.id, e);
                false
            }
        }
    }

    /// Copies color, depth and stencil planes into `target`, nearest-sampled.
    pub fn draw_to(&self, target: &Framebuffer) -> GlResult<()> {
        self.api.blit_framebuffer(
            self.id,
            Some(target.id),
            (self.width, self.height),
            (target.width, target.height),
            BlitMask::ALL,
        )
    }

    /// Copies this framebuffer onto the display surface of `width`×`height`.
    pub fn draw(&self, width: u32, height: u32) -> GlResult<()> {
        self.api.blit_framebuffer(
            self.id,
            None,
            (self.width, self.height),
            (width, height),
            BlitMask::ALL,
        )
    }

    /// Reads back the plane attached at `point`.
    pub fn read_pixels(&self, point: AttachmentPoint) -> GlResult<Vec<u8>> {
        self.api.read_framebuffer(Some(self.id), point)
    }

    pub fn destroy(mut self) -> GlResult<()> {
        self.delete()
    }

    fn delete(&mut self) -> GlResult<()> {
        if self.deleted {
            return Ok(());
        }
        self.deleted = true;
        self.api.delete_framebuffer(self.id)?;
        log::debug!("Destroyed Framebuffer {}", self.id);
        Ok(())
    }
}

impl Drop for Framebuffer {
    fn drop(&mut self) {
        if let Err(e) = self.delete() {
            log::error!("Failed to delete framebuffer {}: {}", self.id, e);
        }
    }
}

impl std::fmt::Debug for Framebuffer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Framebuffer")
            .field("id", &self.id)
            .field("size", &(self.width, self.height))
            .field("attachments", &self.attachments)
            .finish()
    }
}
