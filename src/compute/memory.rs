//! Memory objects tracked by kernels.

use super::api::{ImageDesc, ImageFormat, MemAccess, MemHandle};
use crate::graphics::{NativeId, TextureTarget};

/// What a memory object is backed by.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MemKind {
    /// Device-private allocation of `size` bytes.
    Buffer { size: usize },
    /// Device-private image.
    Image { format: ImageFormat, desc: ImageDesc },
    /// View of a graphics vertex/array buffer.
    SharedBuffer { buffer: NativeId },
    /// View of one mip level of a graphics texture.
    SharedImage {
        texture: NativeId,
        target: TextureTarget,
        mip_level: u32,
    },
    /// View of a graphics renderbuffer.
    SharedRenderbuffer { renderbuffer: NativeId },
}

impl MemKind {
    /// Shared objects alias graphics memory and must be acquired before use.
    pub fn is_shared(&self) -> bool {
        matches!(
            self,
            MemKind::SharedBuffer { .. }
                | MemKind::SharedImage { .. }
                | MemKind::SharedRenderbuffer { .. }
        )
    }

    pub fn is_image(&self) -> bool {
        matches!(
            self,
            MemKind::Image { .. } | MemKind::SharedImage { .. } | MemKind::SharedRenderbuffer { .. }
        )
    }
}

/// Non-owning reference to a memory object owned by a [`Kernel`](super::Kernel).
///
/// Valid until the owning kernel is destroyed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MemRef {
    handle: MemHandle,
    kind: MemKind,
}

impl MemRef {
    pub(crate) fn new(handle: MemHandle, kind: MemKind) -> Self {
        Self { handle, kind }
    }

    pub fn handle(&self) -> MemHandle {
        self.handle
    }

    pub fn kind(&self) -> &MemKind {
        &self.kind
    }

    pub fn is_shared(&self) -> bool {
        self.kind.is_shared()
    }
}

/// Tracking record for an allocation made through a kernel.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MemObject {
    pub mem: MemRef,
    /// Argument slot the object was bound to at creation.
    pub slot: u32,
    pub access: MemAccess,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_shared_kinds() {
        assert!(!MemKind::Buffer { size: 4 }.is_shared());
        assert!(MemKind::SharedBuffer {
            buffer: NativeId(1)
        }
        .is_shared());
        let image = MemKind::SharedImage {
            texture: NativeId(2),
            target: TextureTarget::Texture2d,
            mip_level: 0,
        };
        assert!(image.is_shared());
        assert!(image.is_image());
        assert!(MemKind::SharedRenderbuffer {
            renderbuffer: NativeId(3)
        }
        .is_image());
    }
}
