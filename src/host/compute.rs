//! Compute half of the host device.

use std::collections::VecDeque;

use super::kernels::{scan_kernels, ArgValue, HostImage, KernelArgs};
use super::state::{
    ArgBinding, Backing, HostContext, HostKernel, HostMem, HostProgram, HostQueue, HostState,
    Pending,
};
use super::{HostDevice, HOST_DEVICE_NAME};
use crate::compute::{
    ApiResult, ComputeApi, ContextHandle, ContextProperties, DeviceHandle, DeviceType,
    ImageDesc, ImageFormat, KernelHandle, MemAccess, MemHandle, NdRange, PlatformHandle,
    ProgramHandle, QueueHandle, QueueProperties, Status,
};
use crate::graphics::{NativeId, TextureTarget};

pub(super) const HOST_PLATFORM: PlatformHandle = PlatformHandle(1);
pub(super) const HOST_DEVICE: DeviceHandle = DeviceHandle(1);

impl HostDevice {
    fn check_device(&self, device: DeviceHandle) -> ApiResult<()> {
        if self.gpu && device == HOST_DEVICE {
            Ok(())
        } else {
            Err(Status::INVALID_DEVICE)
        }
    }
}

fn check_context(state: &HostState, context: ContextHandle) -> ApiResult<&HostContext> {
    state
        .contexts
        .get(&context.0)
        .ok_or(Status::INVALID_CONTEXT)
}

/// Shared objects need a context created against the graphics surface.
fn check_sharegroup(state: &HostState, context: ContextHandle) -> ApiResult<()> {
    match check_context(state, context)?.surface {
        Some(_) => Ok(()),
        None => Err(Status::INVALID_GL_SHAREGROUP_REFERENCE_KHR),
    }
}

fn check_queue(state: &HostState, queue: QueueHandle) -> ApiResult<()> {
    if state.queues.contains_key(&queue.0) {
        Ok(())
    } else {
        Err(Status::INVALID_COMMAND_QUEUE)
    }
}

fn invalid_release(state: &mut HostState, what: &str, handle: u64, status: Status) -> Status {
    state.stats.invalid_releases += 1;
    log::error!("Release of invalid {} handle {}", what, handle);
    status
}

fn insert_mem(state: &mut HostState, context: ContextHandle, access: MemAccess, backing: Backing) -> MemHandle {
    let handle = state.next_handle();
    state.mems.insert(
        handle,
        HostMem {
            context: context.0,
            access,
            backing,
            acquired: false,
        },
    );
    state.stats.mems_created += 1;
    MemHandle(handle)
}

/// Fails with `CL_INVALID_OPERATION` when a shared object is used unacquired.
fn check_acquired(state: &HostState, mem: u64) -> ApiResult<&HostMem> {
    let object = state.mems.get(&mem).ok_or(Status::INVALID_MEM_OBJECT)?;
    if object.is_shared() && !object.acquired {
        log::warn!("Shared memory object {} used without acquire", mem);
        return Err(Status::INVALID_OPERATION);
    }
    Ok(object)
}

/// Runs every pending command of `queue` in order; reports the first failure.
fn flush(state: &mut HostState, queue: u64) -> ApiResult<()> {
    let mut first = None;
    while let Some(pending) = state.queues.get_mut(&queue).and_then(|q| q.pending.pop_front()) {
        let kernel = pending.kernel.clone();
        if let Err(status) = execute(state, pending) {
            log::error!("Kernel {} failed: {}", kernel, status);
            first.get_or_insert(status);
        }
    }
    first.map_or(Ok(()), Err)
}

fn execute(state: &mut HostState, pending: Pending) -> ApiResult<()> {
    let mut values = Vec::with_capacity(pending.args.len());
    for arg in &pending.args {
        let value = match arg {
            ArgBinding::Bytes(bytes) => ArgValue::Scalar(bytes.clone()),
            ArgBinding::Mem(id) => {
                let access = check_acquired(state, *id)?.access;
                let storage = state.mem_storage(*id)?;
                match storage.image {
                    Some(shape) => ArgValue::Image {
                        image: HostImage::new(
                            shape.width,
                            shape.height,
                            shape.pixel_size,
                            storage.data.to_vec(),
                        ),
                        access,
                        dirty: false,
                    },
                    None => ArgValue::Buffer {
                        data: storage.data.to_vec(),
                        access,
                        dirty: false,
                    },
                }
            }
        };
        values.push(value);
    }

    let mut args = KernelArgs::new(values);
    (pending.func)(&mut args, &pending.range)?;

    for (arg, written) in pending.args.iter().zip(args.into_written()) {
        if let (ArgBinding::Mem(id), Some(bytes)) = (arg, written) {
            let data = state.mem_data_mut(*id)?;
            if data.len() != bytes.len() {
                return Err(Status::INVALID_MEM_OBJECT);
            }
            data.copy_from_slice(&bytes);
        }
    }
    Ok(())
}

/// Flushes `queue` and checks `mem` may be transferred.
fn prepare_transfer(state: &mut HostState, queue: QueueHandle, mem: MemHandle) -> ApiResult<()> {
    check_queue(state, queue)?;
    flush(state, queue.0)?;
    check_acquired(state, mem.0)?;
    Ok(())
}

impl ComputeApi for HostDevice {
    fn platform_ids(&self) -> ApiResult<Vec<PlatformHandle>> {
        if self.platform {
            Ok(vec![HOST_PLATFORM])
        } else {
            Err(Status::PLATFORM_NOT_FOUND_KHR)
        }
    }

    fn device_ids(
        &self,
        platform: PlatformHandle,
        kind: DeviceType,
    ) -> ApiResult<Vec<DeviceHandle>> {
        if !self.platform || platform != HOST_PLATFORM {
            return Err(Status::INVALID_PLATFORM);
        }
        match kind {
            DeviceType::Gpu | DeviceType::All if self.gpu => Ok(vec![HOST_DEVICE]),
            _ => Err(Status::DEVICE_NOT_FOUND),
        }
    }

    fn device_name(&self, device: DeviceHandle) -> ApiResult<String> {
        self.check_device(device)?;
        Ok(HOST_DEVICE_NAME.to_string())
    }

    fn create_context(
        &self,
        device: DeviceHandle,
        properties: &ContextProperties,
    ) -> ApiResult<ContextHandle> {
        self.check_device(device)?;
        if properties.platform != HOST_PLATFORM {
            return Err(Status::INVALID_PLATFORM);
        }
        if self.refuse_context {
            return Err(Status::DEVICE_NOT_AVAILABLE);
        }
        if properties.surface.is_some() && properties.surface != self.surface {
            return Err(Status::INVALID_GL_SHAREGROUP_REFERENCE_KHR);
        }

        let mut state = self.lock();
        let handle = state.next_handle();
        state.contexts.insert(
            handle,
            HostContext {
                surface: properties.surface,
            },
        );
        state.stats.contexts_created += 1;
        Ok(ContextHandle(handle))
    }

    fn release_context(&self, context: ContextHandle) -> ApiResult<()> {
        let mut state = self.lock();
        if !state.contexts.contains_key(&context.0) {
            return Err(invalid_release(
                &mut state,
                "context",
                context.0,
                Status::INVALID_CONTEXT,
            ));
        }
        let id = context.0;
        let dependents = state.queues.values().filter(|q| q.context == id).count()
            + state.programs.values().filter(|p| p.context == id).count()
            + state.mems.values().filter(|m| m.context == id).count();
        if dependents > 0 {
            log::error!(
                "Context {} released with {} dependent objects alive",
                id,
                dependents
            );
            return Err(Status::INVALID_OPERATION);
        }
        state.contexts.remove(&id);
        state.stats.contexts_released += 1;
        Ok(())
    }

    fn create_queue(
        &self,
        context: ContextHandle,
        device: DeviceHandle,
        properties: QueueProperties,
    ) -> ApiResult<QueueHandle> {
        self.check_device(device)?;
        if properties.out_of_order {
            return Err(Status::INVALID_QUEUE_PROPERTIES);
        }
        let mut state = self.lock();
        check_context(&state, context)?;
        let handle = state.next_handle();
        state.queues.insert(
            handle,
            HostQueue {
                context: context.0,
                pending: VecDeque::new(),
            },
        );
        state.stats.queues_created += 1;
        Ok(QueueHandle(handle))
    }

    fn release_queue(&self, queue: QueueHandle) -> ApiResult<()> {
        let mut state = self.lock();
        if !state.queues.contains_key(&queue.0) {
            return Err(invalid_release(
                &mut state,
                "queue",
                queue.0,
                Status::INVALID_COMMAND_QUEUE,
            ));
        }
        // Outstanding work completes before the queue goes away.
        if let Err(status) = flush(&mut state, queue.0) {
            log::error!("Pending work on released queue {} failed: {}", queue.0, status);
        }
        state.queues.remove(&queue.0);
        state.stats.queues_released += 1;
        Ok(())
    }

    fn create_program_with_source(
        &self,
        context: ContextHandle,
        source: &str,
    ) -> ApiResult<ProgramHandle> {
        let mut state = self.lock();
        check_context(&state, context)?;
        if source.trim().is_empty() {
            return Err(Status::INVALID_VALUE);
        }
        let handle = state.next_handle();
        state.programs.insert(
            handle,
            HostProgram {
                context: context.0,
                source: source.to_string(),
                built: false,
                log: String::new(),
                entries: Default::default(),
            },
        );
        state.stats.programs_created += 1;
        Ok(ProgramHandle(handle))
    }

    fn build_program(&self, program: ProgramHandle, device: DeviceHandle) -> ApiResult<()> {
        self.check_device(device)?;
        let mut state = self.lock();
        let entry = state
            .programs
            .get_mut(&program.0)
            .ok_or(Status::INVALID_PROGRAM)?;

        let mut errors = Vec::new();
        match scan_kernels(&entry.source) {
            Ok(signatures) => {
                for signature in signatures {
                    if !self.kernels.contains_key(&signature.name) {
                        errors.push(format!(
                            "error: kernel `{}` has no host implementation",
                            signature.name
                        ));
                    }
                    entry.entries.insert(signature.name, signature.arity);
                }
            }
            Err(lines) => errors = lines,
        }

        if errors.is_empty() {
            entry.built = true;
            entry.log.clear();
            Ok(())
        } else {
            entry.built = false;
            entry.entries.clear();
            entry.log = errors.join("\n");
            Err(Status::BUILD_PROGRAM_FAILURE)
        }
    }

    fn program_build_log(
        &self,
        program: ProgramHandle,
        device: DeviceHandle,
    ) -> ApiResult<String> {
        self.check_device(device)?;
        self.lock()
            .programs
            .get(&program.0)
            .map(|p| p.log.clone())
            .ok_or(Status::INVALID_PROGRAM)
    }

    fn release_program(&self, program: ProgramHandle) -> ApiResult<()> {
        let mut state = self.lock();
        if !state.programs.contains_key(&program.0) {
            return Err(invalid_release(
                &mut state,
                "program",
                program.0,
                Status::INVALID_PROGRAM,
            ));
        }
        let live = state
            .kernels
            .values()
            .filter(|k| k.program == program.0)
            .count();
        if live > 0 {
            log::error!(
                "Program {} released with {} kernels alive",
                program.0,
                live
            );
            return Err(Status::INVALID_OPERATION);
        }
        state.programs.remove(&program.0);
        state.stats.programs_released += 1;
        Ok(())
    }

    fn create_kernel(&self, program: ProgramHandle, name: &str) -> ApiResult<KernelHandle> {
        let mut state = self.lock();
        let entry = state
            .programs
            .get(&program.0)
            .ok_or(Status::INVALID_PROGRAM)?;
        if !entry.built {
            return Err(Status::INVALID_PROGRAM_EXECUTABLE);
        }
        let arity = *entry
            .entries
            .get(name)
            .ok_or(Status::INVALID_KERNEL_NAME)?;
        let func = self
            .kernels
            .get(name)
            .cloned()
            .ok_or(Status::INVALID_KERNEL_NAME)?;

        let handle = state.next_handle();
        state.kernels.insert(
            handle,
            HostKernel {
                program: program.0,
                name: name.to_string(),
                args: vec![None; arity],
                func,
            },
        );
        state.stats.kernels_created += 1;
        Ok(KernelHandle(handle))
    }

    fn release_kernel(&self, kernel: KernelHandle) -> ApiResult<()> {
        let mut state = self.lock();
        if state.kernels.remove(&kernel.0).is_none() {
            return Err(invalid_release(
                &mut state,
                "kernel",
                kernel.0,
                Status::INVALID_KERNEL,
            ));
        }
        state.stats.kernels_released += 1;
        Ok(())
    }

    fn set_kernel_arg_mem(
        &self,
        kernel: KernelHandle,
        index: u32,
        mem: MemHandle,
    ) -> ApiResult<()> {
        let mut state = self.lock();
        if !state.mems.contains_key(&mem.0) {
            return Err(Status::INVALID_MEM_OBJECT);
        }
        let slot = state
            .kernels
            .get_mut(&kernel.0)
            .ok_or(Status::INVALID_KERNEL)?
            .args
            .get_mut(index as usize)
            .ok_or(Status::INVALID_ARG_INDEX)?;
        *slot = Some(ArgBinding::Mem(mem.0));
        Ok(())
    }

    fn set_kernel_arg_bytes(
        &self,
        kernel: KernelHandle,
        index: u32,
        bytes: &[u8],
    ) -> ApiResult<()> {
        if bytes.is_empty() {
            return Err(Status::INVALID_ARG_SIZE);
        }
        let mut state = self.lock();
        let slot = state
            .kernels
            .get_mut(&kernel.0)
            .ok_or(Status::INVALID_KERNEL)?
            .args
            .get_mut(index as usize)
            .ok_or(Status::INVALID_ARG_INDEX)?;
        *slot = Some(ArgBinding::Bytes(bytes.to_vec()));
        Ok(())
    }

    fn create_buffer(
        &self,
        context: ContextHandle,
        access: MemAccess,
        size: usize,
    ) -> ApiResult<MemHandle> {
        if size == 0 {
            return Err(Status::INVALID_BUFFER_SIZE);
        }
        let mut state = self.lock();
        check_context(&state, context)?;
        Ok(insert_mem(
            &mut state,
            context,
            access,
            Backing::Buffer(vec![0; size]),
        ))
    }

    fn create_image(
        &self,
        context: ContextHandle,
        access: MemAccess,
        format: &ImageFormat,
        desc: &ImageDesc,
    ) -> ApiResult<MemHandle> {
        if desc.width == 0 || desc.height == 0 {
            return Err(Status::INVALID_IMAGE_SIZE);
        }
        if desc.mip_levels == 0 {
            return Err(Status::INVALID_IMAGE_FORMAT_DESCRIPTOR);
        }
        let mut state = self.lock();
        check_context(&state, context)?;
        let len = desc.width as usize * desc.height as usize * format.pixel_size();
        Ok(insert_mem(
            &mut state,
            context,
            access,
            Backing::Image {
                format: *format,
                width: desc.width,
                height: desc.height,
                data: vec![0; len],
            },
        ))
    }

    fn create_from_gl_buffer(
        &self,
        context: ContextHandle,
        access: MemAccess,
        buffer: NativeId,
    ) -> ApiResult<MemHandle> {
        let mut state = self.lock();
        check_sharegroup(&state, context)?;
        if !state.vertex_buffers.contains_key(&buffer.0) {
            return Err(Status::INVALID_GL_OBJECT);
        }
        Ok(insert_mem(
            &mut state,
            context,
            access,
            Backing::GlBuffer(buffer.0),
        ))
    }

    fn create_from_gl_texture(
        &self,
        context: ContextHandle,
        access: MemAccess,
        target: TextureTarget,
        mip_level: u32,
        texture: NativeId,
    ) -> ApiResult<MemHandle> {
        let mut state = self.lock();
        check_sharegroup(&state, context)?;
        let entry = state
            .textures
            .get(&texture.0)
            .filter(|t| t.target == target)
            .ok_or(Status::INVALID_GL_OBJECT)?;
        let surface = entry.level(mip_level).ok_or(Status::INVALID_MIP_LEVEL)?;
        ImageFormat::from_pixel_format(surface.format)
            .ok_or(Status::INVALID_IMAGE_FORMAT_DESCRIPTOR)?;
        Ok(insert_mem(
            &mut state,
            context,
            access,
            Backing::GlTexture {
                id: texture.0,
                level: mip_level,
            },
        ))
    }

    fn create_from_gl_renderbuffer(
        &self,
        context: ContextHandle,
        access: MemAccess,
        renderbuffer: NativeId,
    ) -> ApiResult<MemHandle> {
        let mut state = self.lock();
        check_sharegroup(&state, context)?;
        let surface = state
            .renderbuffers
            .get(&renderbuffer.0)
            .ok_or(Status::INVALID_GL_OBJECT)?;
        ImageFormat::from_pixel_format(surface.format)
            .ok_or(Status::INVALID_IMAGE_FORMAT_DESCRIPTOR)?;
        Ok(insert_mem(
            &mut state,
            context,
            access,
            Backing::GlRenderbuffer(renderbuffer.0),
        ))
    }

    fn release_mem(&self, mem: MemHandle) -> ApiResult<()> {
        let mut state = self.lock();
        match state.mems.remove(&mem.0) {
            Some(object) => {
                if object.acquired {
                    log::warn!("Memory object {} released while acquired", mem.0);
                }
                state.stats.mems_released += 1;
                Ok(())
            }
            None => Err(invalid_release(
                &mut state,
                "memory object",
                mem.0,
                Status::INVALID_MEM_OBJECT,
            )),
        }
    }

    fn enqueue_write_buffer(
        &self,
        queue: QueueHandle,
        mem: MemHandle,
        offset: usize,
        data: &[u8],
    ) -> ApiResult<()> {
        let mut state = self.lock();
        prepare_transfer(&mut state, queue, mem)?;
        if state.mem_storage(mem.0)?.image.is_some() {
            return Err(Status::INVALID_MEM_OBJECT);
        }
        let target = state
            .mem_data_mut(mem.0)?
            .get_mut(offset..)
            .and_then(|tail| tail.get_mut(..data.len()))
            .ok_or(Status::INVALID_VALUE)?;
        target.copy_from_slice(data);
        Ok(())
    }

    fn enqueue_read_buffer(
        &self,
        queue: QueueHandle,
        mem: MemHandle,
        offset: usize,
        out: &mut [u8],
    ) -> ApiResult<()> {
        let mut state = self.lock();
        prepare_transfer(&mut state, queue, mem)?;
        let storage = state.mem_storage(mem.0)?;
        if storage.image.is_some() {
            return Err(Status::INVALID_MEM_OBJECT);
        }
        let source = storage
            .data
            .get(offset..)
            .and_then(|tail| tail.get(..out.len()))
            .ok_or(Status::INVALID_VALUE)?;
        out.copy_from_slice(source);
        Ok(())
    }

    fn enqueue_write_image(
        &self,
        queue: QueueHandle,
        mem: MemHandle,
        data: &[u8],
    ) -> ApiResult<()> {
        let mut state = self.lock();
        prepare_transfer(&mut state, queue, mem)?;
        if state.mem_storage(mem.0)?.image.is_none() {
            return Err(Status::INVALID_MEM_OBJECT);
        }
        let target = state.mem_data_mut(mem.0)?;
        if target.len() != data.len() {
            return Err(Status::INVALID_VALUE);
        }
        target.copy_from_slice(data);
        Ok(())
    }

    fn enqueue_read_image(&self, queue: QueueHandle, mem: MemHandle) -> ApiResult<Vec<u8>> {
        let mut state = self.lock();
        prepare_transfer(&mut state, queue, mem)?;
        let storage = state.mem_storage(mem.0)?;
        if storage.image.is_none() {
            return Err(Status::INVALID_MEM_OBJECT);
        }
        Ok(storage.data.to_vec())
    }

    fn enqueue_nd_range(
        &self,
        queue: QueueHandle,
        kernel: KernelHandle,
        range: &NdRange,
    ) -> ApiResult<()> {
        let mut state = self.lock();
        check_queue(&state, queue)?;
        range.validate()?;

        let entry = state.kernels.get(&kernel.0).ok_or(Status::INVALID_KERNEL)?;
        let args = entry
            .args
            .iter()
            .cloned()
            .collect::<Option<Vec<_>>>()
            .ok_or(Status::INVALID_KERNEL_ARGS)?;
        for arg in &args {
            if let ArgBinding::Mem(id) = arg {
                check_acquired(&state, *id)?;
                state.mem_storage(*id)?;
            }
        }
        let pending = Pending {
            kernel: entry.name.clone(),
            func: entry.func.clone(),
            args,
            range: *range,
        };

        state
            .queues
            .get_mut(&queue.0)
            .ok_or(Status::INVALID_COMMAND_QUEUE)?
            .pending
            .push_back(pending);
        state.stats.dispatches += 1;
        Ok(())
    }

    fn enqueue_acquire_gl_objects(&self, queue: QueueHandle, mems: &[MemHandle]) -> ApiResult<()> {
        let mut state = self.lock();
        check_queue(&state, queue)?;
        flush(&mut state, queue.0)?;
        for mem in mems {
            let object = state.mems.get(&mem.0).ok_or(Status::INVALID_MEM_OBJECT)?;
            if !object.is_shared() {
                return Err(Status::INVALID_GL_OBJECT);
            }
            if object.acquired {
                log::warn!("Memory object {} acquired twice", mem.0);
                return Err(Status::INVALID_OPERATION);
            }
        }
        for mem in mems {
            if let Some(object) = state.mems.get_mut(&mem.0) {
                object.acquired = true;
            }
        }
        state.stats.acquires += mems.len();
        Ok(())
    }

    fn enqueue_release_gl_objects(&self, queue: QueueHandle, mems: &[MemHandle]) -> ApiResult<()> {
        let mut state = self.lock();
        check_queue(&state, queue)?;
        // Release is ordered after everything already enqueued.
        flush(&mut state, queue.0)?;
        for mem in mems {
            let object = state.mems.get(&mem.0).ok_or(Status::INVALID_MEM_OBJECT)?;
            if !object.is_shared() {
                return Err(Status::INVALID_GL_OBJECT);
            }
            if !object.acquired {
                log::warn!("Memory object {} released without acquire", mem.0);
                return Err(Status::INVALID_OPERATION);
            }
        }
        for mem in mems {
            if let Some(object) = state.mems.get_mut(&mem.0) {
                object.acquired = false;
            }
        }
        state.stats.gl_releases += mems.len();
        Ok(())
    }

    fn finish(&self, queue: QueueHandle) -> ApiResult<()> {
        let mut state = self.lock();
        check_queue(&state, queue)?;
        flush(&mut state, queue.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::graphics::{GraphicsApi, PixelFormat, SurfaceHandles};

    const SOURCE: &str = "__kernel void vecAdd(__global float* a, __global float* b, \
                          __global float* c, const unsigned int n) { }";

    fn setup(device: &HostDevice) -> (ContextHandle, QueueHandle) {
        let surface = device.current_surface();
        let context = device
            .create_context(
                HOST_DEVICE,
                &ContextProperties {
                    platform: HOST_PLATFORM,
                    surface,
                },
            )
            .unwrap();
        let queue = device
            .create_queue(context, HOST_DEVICE, QueueProperties::default())
            .unwrap();
        (context, queue)
    }

    fn vec_add_kernel(device: &HostDevice, context: ContextHandle) -> (ProgramHandle, KernelHandle) {
        let program = device.create_program_with_source(context, SOURCE).unwrap();
        device.build_program(program, HOST_DEVICE).unwrap();
        let kernel = device.create_kernel(program, "vecAdd").unwrap();
        (program, kernel)
    }

    #[test]
    fn test_failure_injection() {
        let device = HostDevice::builder().no_platform().build();
        assert_eq!(device.platform_ids(), Err(Status::PLATFORM_NOT_FOUND_KHR));

        let device = HostDevice::builder().no_gpu().build();
        assert_eq!(
            device.device_ids(HOST_PLATFORM, DeviceType::Gpu),
            Err(Status::DEVICE_NOT_FOUND)
        );
    }

    #[test]
    fn test_context_rejects_foreign_surface() {
        let device = HostDevice::new();
        let result = device.create_context(
            HOST_DEVICE,
            &ContextProperties {
                platform: HOST_PLATFORM,
                surface: Some(SurfaceHandles {
                    gl_context: 0xdead,
                    display: 0xbeef,
                }),
            },
        );
        assert_eq!(result, Err(Status::INVALID_GL_SHAREGROUP_REFERENCE_KHR));
    }

    #[test]
    fn test_dispatch_is_deferred_until_finish() {
        let device = HostDevice::new();
        let (context, queue) = setup(&device);
        let (_, kernel) = vec_add_kernel(&device, context);

        let bytes = 4 * std::mem::size_of::<f32>();
        let a = device.create_buffer(context, MemAccess::ReadOnly, bytes).unwrap();
        let b = device.create_buffer(context, MemAccess::ReadOnly, bytes).unwrap();
        let c = device.create_buffer(context, MemAccess::WriteOnly, bytes).unwrap();
        device
            .enqueue_write_buffer(queue, a, 0, bytemuck::cast_slice(&[1.0f32; 4]))
            .unwrap();
        device
            .enqueue_write_buffer(queue, b, 0, bytemuck::cast_slice(&[2.0f32; 4]))
            .unwrap();
        for (i, mem) in [a, b, c].into_iter().enumerate() {
            device.set_kernel_arg_mem(kernel, i as u32, mem).unwrap();
        }
        device
            .set_kernel_arg_bytes(kernel, 3, &4u32.to_ne_bytes())
            .unwrap();

        device
            .enqueue_nd_range(queue, kernel, &NdRange::linear(4, 2))
            .unwrap();
        assert_eq!(device.pending(queue), 1);
        device.finish(queue).unwrap();
        assert_eq!(device.pending(queue), 0);

        let mut out = [0.0f32; 4];
        device
            .enqueue_read_buffer(queue, c, 0, bytemuck::cast_slice_mut(&mut out))
            .unwrap();
        assert_eq!(out, [3.0; 4]);
    }

    #[test]
    fn test_unbound_args_rejected() {
        let device = HostDevice::new();
        let (context, queue) = setup(&device);
        let (_, kernel) = vec_add_kernel(&device, context);
        assert_eq!(
            device.set_kernel_arg_bytes(kernel, 4, &[0; 4]),
            Err(Status::INVALID_ARG_INDEX)
        );
        assert_eq!(
            device.enqueue_nd_range(queue, kernel, &NdRange::linear(4, 2)),
            Err(Status::INVALID_KERNEL_ARGS)
        );
    }

    #[test]
    fn test_build_failure_keeps_log() {
        let device = HostDevice::new();
        let (context, _) = setup(&device);
        let program = device
            .create_program_with_source(context, "__kernel void missing(int x) {}")
            .unwrap();
        assert_eq!(
            device.build_program(program, HOST_DEVICE),
            Err(Status::BUILD_PROGRAM_FAILURE)
        );
        let log = device.program_build_log(program, HOST_DEVICE).unwrap();
        assert!(log.contains("`missing` has no host implementation"));
        assert_eq!(
            device.create_kernel(program, "missing"),
            Err(Status::INVALID_PROGRAM_EXECUTABLE)
        );
    }

    #[test]
    fn test_release_order_enforced() {
        let device = HostDevice::new();
        let (context, queue) = setup(&device);
        let (program, kernel) = vec_add_kernel(&device, context);

        assert_eq!(device.release_program(program), Err(Status::INVALID_OPERATION));
        assert_eq!(device.release_context(context), Err(Status::INVALID_OPERATION));

        device.release_kernel(kernel).unwrap();
        device.release_program(program).unwrap();
        device.release_queue(queue).unwrap();
        device.release_context(context).unwrap();

        assert_eq!(device.release_kernel(kernel), Err(Status::INVALID_KERNEL));
        let stats = device.stats();
        assert_eq!(stats.invalid_releases, 1);
        assert_eq!(stats.contexts_released, 1);
    }

    #[test]
    fn test_shared_object_requires_acquire() {
        let device = HostDevice::new();
        let (context, queue) = setup(&device);
        let texture = device.create_texture(TextureTarget::Texture2d).unwrap();
        device
            .texture_image_2d(texture, 0, PixelFormat::Rgba8, 2, 2, None)
            .unwrap();
        let image = device
            .create_from_gl_texture(context, MemAccess::WriteOnly, TextureTarget::Texture2d, 0, texture)
            .unwrap();

        assert_eq!(
            device.enqueue_read_image(queue, image),
            Err(Status::INVALID_OPERATION)
        );
        assert_eq!(
            device.enqueue_release_gl_objects(queue, &[image]),
            Err(Status::INVALID_OPERATION)
        );
        device.enqueue_acquire_gl_objects(queue, &[image]).unwrap();
        assert_eq!(device.is_acquired(image), Some(true));
        assert_eq!(device.enqueue_read_image(queue, image).unwrap().len(), 16);
        device.enqueue_release_gl_objects(queue, &[image]).unwrap();
        assert_eq!(device.is_acquired(image), Some(false));
    }
}
