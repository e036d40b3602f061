//! Hand-off of shared memory objects between the compute and graphics
//! pipelines.
//!
//! A shared object may be touched by one pipeline at a time. The compute side
//! acquires it on a queue, dispatches, waits for completion and releases it
//! again; only then may the graphics side bind, sample or blit the aliased
//! resource. [`SharedScope`] ties the release to scope exit so no path leaves
//! an object acquired.

use super::api::MemHandle;
use super::error::{ComputeResult, StatusExt};
use super::memory::MemRef;
use super::queue::{handles, CommandQueue};

/// Shared objects acquired by compute on one queue.
///
/// [`release`](Self::release) waits for the queue, hands the objects back
/// and waits again, so the graphics side never observes a partial hand-off.
/// Dropping the scope without releasing does the same and logs failures.
#[must_use = "dropping the scope immediately releases the shared objects"]
pub struct SharedScope<'q> {
    queue: &'q CommandQueue,
    mems: Vec<MemHandle>,
    active: bool,
}

impl<'q> SharedScope<'q> {
    pub(crate) fn acquire(queue: &'q CommandQueue, mems: &[MemRef]) -> ComputeResult<Self> {
        let mems = handles(mems);
        if !mems.is_empty() {
            queue
                .api()
                .enqueue_acquire_gl_objects(queue.handle(), &mems)
                .call("clEnqueueAcquireGLObjects")?;
        }
        Ok(Self {
            queue,
            mems,
            active: true,
        })
    }

    pub fn queue(&self) -> &CommandQueue {
        self.queue
    }

    /// Number of objects held by this scope.
    pub fn len(&self) -> usize {
        self.mems.len()
    }

    pub fn is_empty(&self) -> bool {
        self.mems.is_empty()
    }

    /// Waits for outstanding work and returns the objects to graphics.
    pub fn release(mut self) -> ComputeResult<()> {
        self.release_inner()
    }

    fn release_inner(&mut self) -> ComputeResult<()> {
        if !self.active {
            return Ok(());
        }
        self.active = false;
        if self.mems.is_empty() {
            return Ok(());
        }

        let api = self.queue.api();
        let handle = self.queue.handle();
        // Wait before and after: release must follow the dispatch, and graphics
        // may only proceed once the release itself has completed.
        let drained = api.finish(handle).call("clFinish");
        let released = api
            .enqueue_release_gl_objects(handle, &self.mems)
            .call("clEnqueueReleaseGLObjects");
        let settled = api.finish(handle).call("clFinish");
        drained.and(released).and(settled)
    }
}

impl Drop for SharedScope<'_> {
    fn drop(&mut self) {
        if let Err(e) = self.release_inner() {
            log::error!("Failed to release shared objects: {}", e);
        }
    }
}
