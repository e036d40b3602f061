//! Command queues: FIFO channels for transfers, dispatch and interop hand-off.

use std::sync::Arc;

use super::api::{ComputeApi, MemHandle, QueueHandle};
use super::error::{ComputeResult, StatusExt};
use super::interop::SharedScope;
use super::kernel::Kernel;
use super::memory::MemRef;
use super::range::NdRange;

/// A command queue owned by the [`DeviceContext`](super::DeviceContext).
///
/// Work on one queue runs in submission order; nothing orders two queues
/// against each other besides an explicit [`finish`](Self::finish).
pub struct CommandQueue {
    api: Arc<dyn ComputeApi>,
    handle: QueueHandle,
}

impl CommandQueue {
    pub(crate) fn new(api: Arc<dyn ComputeApi>, handle: QueueHandle) -> Self {
        Self { api, handle }
    }

    pub fn handle(&self) -> QueueHandle {
        self.handle
    }

    pub(crate) fn api(&self) -> &Arc<dyn ComputeApi> {
        &self.api
    }

    /// Blocking upload of `data` into a buffer at byte `offset`.
    pub fn write_buffer<T: bytemuck::Pod>(
        &self,
        mem: MemRef,
        offset: usize,
        data: &[T],
    ) -> ComputeResult<()> {
        self.api
            .enqueue_write_buffer(self.handle, mem.handle(), offset, bytemuck::cast_slice(data))
            .call("clEnqueueWriteBuffer")
    }

    /// Blocking read-back of a buffer starting at byte `offset`.
    pub fn read_buffer<T: bytemuck::Pod>(
        &self,
        mem: MemRef,
        offset: usize,
        out: &mut [T],
    ) -> ComputeResult<()> {
        self.api
            .enqueue_read_buffer(
                self.handle,
                mem.handle(),
                offset,
                bytemuck::cast_slice_mut(out),
            )
            .call("clEnqueueReadBuffer")
    }

    /// Blocking upload of a whole image (mip level 0, tightly packed rows).
    pub fn write_image(&self, mem: MemRef, data: &[u8]) -> ComputeResult<()> {
        self.api
            .enqueue_write_image(self.handle, mem.handle(), data)
            .call("clEnqueueWriteImage")
    }

    /// Blocking read-back of a whole image.
    pub fn read_image(&self, mem: MemRef) -> ComputeResult<Vec<u8>> {
        self.api
            .enqueue_read_image(self.handle, mem.handle())
            .call("clEnqueueReadImage")
    }

    /// Enqueues `kernel` over `range`. Returns before the work completes.
    ///
    /// Kernels with shared objects bound must go through
    /// [`run_shared`](Self::run_shared).
    pub fn dispatch(&self, kernel: &Kernel, range: &NdRange) -> ComputeResult<()> {
        self.api
            .enqueue_nd_range(self.handle, kernel.handle(), range)
            .call("clEnqueueNDRangeKernel")
    }

    /// Blocks until every command enqueued on this queue has completed.
    pub fn finish(&self) -> ComputeResult<()> {
        self.api.finish(self.handle).call("clFinish")
    }

    /// Takes shared objects away from the graphics pipeline.
    pub fn acquire(&self, mems: &[MemRef]) -> ComputeResult<()> {
        self.api
            .enqueue_acquire_gl_objects(self.handle, &handles(mems))
            .call("clEnqueueAcquireGLObjects")
    }

    /// Hands shared objects back to the graphics pipeline.
    pub fn release(&self, mems: &[MemRef]) -> ComputeResult<()> {
        self.api
            .enqueue_release_gl_objects(self.handle, &handles(mems))
            .call("clEnqueueReleaseGLObjects")
    }

    /// Acquires `mems` for the lifetime of the returned scope.
    pub fn acquire_scope(&self, mems: &[MemRef]) -> ComputeResult<SharedScope<'_>> {
        SharedScope::acquire(self, mems)
    }

    /// Runs `kernel` over `range` as one acquire → dispatch → wait → release
    /// sequence covering every shared object currently bound to it.
    ///
    /// The objects are handed back to the graphics pipeline on every exit
    /// path; when the dispatch fails, that error is reported.
    pub fn run_shared(&self, kernel: &Kernel, range: &NdRange) -> ComputeResult<()> {
        let shared = kernel.shared_bindings();
        let scope = SharedScope::acquire(self, &shared)?;
        let outcome = self.dispatch(kernel, range).and_then(|()| self.finish());
        let released = scope.release();
        outcome.and(released)
    }
}

impl std::fmt::Debug for CommandQueue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CommandQueue")
            .field("handle", &self.handle)
            .finish()
    }
}

pub(crate) fn handles(mems: &[MemRef]) -> Vec<MemHandle> {
    mems.iter().map(MemRef::handle).collect()
}
