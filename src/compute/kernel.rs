//! Kernels: named entry points of a compiled program and the memory objects
//! they allocate.

use std::collections::BTreeMap;
use std::sync::Arc;

use super::api::{
    ComputeApi, ContextHandle, ImageDesc, ImageFormat, KernelHandle, MemAccess, ProgramHandle,
};
use super::error::{keep_first, ComputeError, ComputeResult, StatusExt};
use super::memory::{MemKind, MemObject, MemRef};
use super::status::Status;
use crate::graphics::{NativeId, TextureTarget};

/// A named, invocable entry point within a [`Program`](super::Program).
///
/// Every memory object created through a kernel is tracked and released
/// exactly once, when the kernel is destroyed. Rebinding an argument slot
/// does not release whatever was bound there before.
pub struct Kernel {
    api: Arc<dyn ComputeApi>,
    context: ContextHandle,
    program: ProgramHandle,
    program_name: String,
    name: String,
    handle: KernelHandle,
    memory: Vec<MemObject>,
    bindings: BTreeMap<u32, MemRef>,
    released: bool,
}

impl Kernel {
    pub(crate) fn new(
        api: Arc<dyn ComputeApi>,
        context: ContextHandle,
        program: ProgramHandle,
        program_name: &str,
        name: &str,
    ) -> ComputeResult<Self> {
        let handle = api.create_kernel(program, name).map_err(|status| {
            if status == Status::INVALID_KERNEL_NAME {
                ComputeError::KernelNotFound {
                    program: program_name.to_string(),
                    kernel: name.to_string(),
                }
            } else {
                ComputeError::Device {
                    call: "clCreateKernel",
                    status,
                }
            }
        })?;
        log::debug!("Created Compute Kernel: {}", name);

        Ok(Self {
            api,
            context,
            program,
            program_name: program_name.to_string(),
            name: name.to_string(),
            handle,
            memory: Vec::new(),
            bindings: BTreeMap::new(),
            released: false,
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn handle(&self) -> KernelHandle {
        self.handle
    }

    /// Handle of the owning program.
    pub fn program(&self) -> ProgramHandle {
        self.program
    }

    pub fn program_name(&self) -> &str {
        &self.program_name
    }

    /// Every memory object allocated through this kernel, in creation order.
    pub fn memory_objects(&self) -> &[MemObject] {
        &self.memory
    }

    /// Memory object currently bound at `index`, if any.
    pub fn binding(&self, index: u32) -> Option<MemRef> {
        self.bindings.get(&index).copied()
    }

    /// Currently bound objects that alias graphics resources.
    pub fn shared_bindings(&self) -> Vec<MemRef> {
        self.bindings
            .values()
            .filter(|m| m.is_shared())
            .copied()
            .collect()
    }

    /// Allocates a device-private buffer of `size` bytes bound at `index`.
    pub fn create_buffer(
        &mut self,
        index: u32,
        access: MemAccess,
        size: usize,
    ) -> ComputeResult<MemRef> {
        let handle = self
            .api
            .create_buffer(self.context, access, size)
            .call("clCreateBuffer")?;
        self.track(index, access, MemRef::new(handle, MemKind::Buffer { size }))
    }

    /// Allocates a device-private image bound at `index`.
    pub fn create_image(
        &mut self,
        index: u32,
        access: MemAccess,
        format: ImageFormat,
        desc: ImageDesc,
    ) -> ComputeResult<MemRef> {
        let handle = self
            .api
            .create_image(self.context, access, &format, &desc)
            .call("clCreateImage")?;
        self.track(index, access, MemRef::new(handle, MemKind::Image { format, desc }))
    }

    /// Aliases a graphics vertex/array buffer and binds it at `index`.
    pub fn create_shared_buffer(
        &mut self,
        index: u32,
        access: MemAccess,
        buffer: NativeId,
    ) -> ComputeResult<MemRef> {
        let handle = self
            .api
            .create_from_gl_buffer(self.context, access, buffer)
            .call("clCreateFromGLBuffer")?;
        self.track(
            index,
            access,
            MemRef::new(handle, MemKind::SharedBuffer { buffer }),
        )
    }

    /// Aliases one mip level of a graphics texture and binds it at `index`.
    pub fn create_shared_image(
        &mut self,
        index: u32,
        access: MemAccess,
        target: TextureTarget,
        mip_level: u32,
        texture: NativeId,
    ) -> ComputeResult<MemRef> {
        let handle = self
            .api
            .create_from_gl_texture(self.context, access, target, mip_level, texture)
            .call("clCreateFromGLTexture")?;
        self.track(
            index,
            access,
            MemRef::new(
                handle,
                MemKind::SharedImage {
                    texture,
                    target,
                    mip_level,
                },
            ),
        )
    }

    /// Aliases a graphics renderbuffer and binds it at `index`.
    pub fn create_shared_renderbuffer(
        &mut self,
        index: u32,
        access: MemAccess,
        renderbuffer: NativeId,
    ) -> ComputeResult<MemRef> {
        let handle = self
            .api
            .create_from_gl_renderbuffer(self.context, access, renderbuffer)
            .call("clCreateFromGLRenderbuffer")?;
        self.track(
            index,
            access,
            MemRef::new(handle, MemKind::SharedRenderbuffer { renderbuffer }),
        )
    }

    /// Binds `mem` at argument slot `index`, replacing the device-side binding.
    ///
    /// The object previously bound there stays tracked and is only released
    /// when this kernel is destroyed.
    pub fn set_memory_arg(&mut self, index: u32, mem: MemRef) -> ComputeResult<()> {
        self.api
            .set_kernel_arg_mem(self.handle, index, mem.handle())
            .call("clSetKernelArg")?;
        self.bindings.insert(index, mem);
        Ok(())
    }

    /// Binds a plain value (e.g. an element count) at argument slot `index`.
    pub fn set_scalar_arg<T: bytemuck::Pod>(&mut self, index: u32, value: &T) -> ComputeResult<()> {
        self.api
            .set_kernel_arg_bytes(self.handle, index, bytemuck::bytes_of(value))
            .call("clSetKernelArg")?;
        self.bindings.remove(&index);
        Ok(())
    }

    fn track(&mut self, index: u32, access: MemAccess, mem: MemRef) -> ComputeResult<MemRef> {
        // Recorded before binding: an allocation whose bind fails is still ours to release.
        self.memory.push(MemObject {
            mem,
            slot: index,
            access,
        });
        self.set_memory_arg(index, mem)?;
        Ok(mem)
    }

    /// Releases every tracked memory object, then the kernel itself.
    pub(crate) fn release(&mut self) -> ComputeResult<()> {
        if self.released {
            return Ok(());
        }
        self.released = true;

        let mut first = None;
        for object in self.memory.drain(..) {
            keep_first(
                &mut first,
                self.api
                    .release_mem(object.mem.handle())
                    .call("clReleaseMemObject"),
            );
        }
        self.bindings.clear();
        keep_first(
            &mut first,
            self.api.release_kernel(self.handle).call("clReleaseKernel"),
        );
        log::debug!("Destroyed Compute Kernel: {}", self.name);

        first.map_or(Ok(()), Err)
    }
}

impl Drop for Kernel {
    fn drop(&mut self) {
        if let Err(e) = self.release() {
            log::error!("Failed to destroy compute kernel {}: {}", self.name, e);
        }
    }
}

impl std::fmt::Debug for Kernel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Kernel")
            .field("name", &self.name)
            .field("handle", &self.handle)
            .field("program", &self.program_name)
            .field("memory_objects", &self.memory.len())
            .finish()
    }
}
