//! Compute half of the wgpu device.
//!
//! Programs are WGSL modules and kernels are compute entry points with an
//! automatic layout. Kernel argument `i` binds to `@group(0) @binding(i)`:
//! buffers as storage buffers, images as storage textures and scalar bytes
//! as uniform buffers padded to 16 bytes. A range without a local size
//! assumes `@workgroup_size(64)` in one dimension and `(8, 8)` otherwise.

use wgpu::util::DeviceExt;

use super::context::{GpuError, WgpuDevice};
use super::readback;
use super::state::{
    image_texture_format, Backing, GpuKernel, GpuMem, GpuProgram, GpuState, KernelArg, Resource,
};
use crate::compute::{
    ApiResult, ComputeApi, ContextHandle, ContextProperties, DeviceHandle, DeviceType,
    ImageDesc, ImageFormat, KernelHandle, MemAccess, MemHandle, NdRange, PlatformHandle,
    ProgramHandle, QueueHandle, QueueProperties, Status,
};
use crate::graphics::{NativeId, TextureTarget};

const WGPU_PLATFORM: PlatformHandle = PlatformHandle(1);
const WGPU_DEVICE: DeviceHandle = DeviceHandle(1);

/// Uniform buffer sizes must be a multiple of this.
const UNIFORM_ALIGN: usize = 16;

fn lost(error: GpuError) -> Status {
    log::error!("{}", error);
    Status::OUT_OF_RESOURCES
}

fn check_device(device: DeviceHandle) -> ApiResult<()> {
    if device != WGPU_DEVICE {
        return Err(Status::INVALID_DEVICE);
    }
    Ok(())
}

fn check_context(state: &GpuState, context: ContextHandle) -> ApiResult<()> {
    if !state.contexts.contains_key(&context.0) {
        return Err(Status::INVALID_CONTEXT);
    }
    Ok(())
}

fn check_sharegroup(state: &GpuState, context: ContextHandle) -> ApiResult<()> {
    match state.contexts.get(&context.0) {
        None => Err(Status::INVALID_CONTEXT),
        Some(None) => Err(Status::INVALID_GL_SHAREGROUP_REFERENCE_KHR),
        Some(Some(_)) => Ok(()),
    }
}

fn check_queue(state: &GpuState, queue: QueueHandle) -> ApiResult<()> {
    if !state.queues.contains_key(&queue.0) {
        return Err(Status::INVALID_COMMAND_QUEUE);
    }
    Ok(())
}

/// Fails with `CL_INVALID_OPERATION` when a shared object is used unacquired.
fn check_acquired(state: &GpuState, mem: u64) -> ApiResult<&GpuMem> {
    let object = state.mems.get(&mem).ok_or(Status::INVALID_MEM_OBJECT)?;
    if object.is_shared() && !object.acquired {
        log::warn!("Shared memory object {} used without acquire", mem);
        return Err(Status::INVALID_OPERATION);
    }
    Ok(object)
}

fn insert_mem(
    state: &mut GpuState,
    context: ContextHandle,
    access: MemAccess,
    backing: Backing,
) -> MemHandle {
    let handle = state.next_handle();
    log::debug!("Created {:?} memory object {}", access, handle);
    state.mems.insert(
        handle,
        GpuMem {
            context: context.0,
            backing,
            acquired: false,
        },
    );
    MemHandle(handle)
}

fn workgroups(range: &NdRange) -> [u32; 3] {
    let local = range.local().unwrap_or(if range.dims() == 1 {
        [64, 1, 1]
    } else {
        [8, 8, 1]
    });
    let global = range.global();
    [0, 1, 2].map(|i| global[i].div_ceil(local[i].max(1)) as u32)
}

fn padded_uniform(bytes: &[u8]) -> Vec<u8> {
    let mut padded = bytes.to_vec();
    padded.resize(bytes.len().div_ceil(UNIFORM_ALIGN) * UNIFORM_ALIGN, 0);
    padded
}

/// Resource bound to one kernel argument for a dispatch.
enum Bound<'a> {
    Buffer(&'a wgpu::Buffer),
    View(wgpu::TextureView),
    Uniform(wgpu::Buffer),
}

impl Bound<'_> {
    fn resource(&self) -> wgpu::BindingResource<'_> {
        match self {
            Bound::Buffer(buffer) => buffer.as_entire_binding(),
            Bound::View(view) => wgpu::BindingResource::TextureView(view),
            Bound::Uniform(buffer) => buffer.as_entire_binding(),
        }
    }
}

impl WgpuDevice {
    fn bind_args<'a>(
        &self,
        state: &'a GpuState,
        kernel: &GpuKernel,
    ) -> ApiResult<Vec<(u32, Bound<'a>)>> {
        let mut bound = Vec::with_capacity(kernel.args.len());
        for (&index, arg) in &kernel.args {
            let resource = match arg {
                KernelArg::Bytes(bytes) => {
                    let buffer = self
                        .device
                        .create_buffer_init(&wgpu::util::BufferInitDescriptor {
                            label: Some("kernel_scalar"),
                            contents: &padded_uniform(bytes),
                            usage: wgpu::BufferUsages::UNIFORM,
                        });
                    Bound::Uniform(buffer)
                }
                KernelArg::Mem(mem) => {
                    check_acquired(state, *mem)?;
                    match state.resource(*mem)? {
                        Resource::Buffer { buffer, .. } => Bound::Buffer(buffer),
                        Resource::Texture { texture, level, .. } => {
                            Bound::View(texture.create_view(&wgpu::TextureViewDescriptor {
                                base_mip_level: level,
                                mip_level_count: Some(1),
                                ..Default::default()
                            }))
                        }
                    }
                }
            };
            bound.push((index, resource));
        }
        Ok(bound)
    }
}

impl ComputeApi for WgpuDevice {
    fn platform_ids(&self) -> ApiResult<Vec<PlatformHandle>> {
        Ok(vec![WGPU_PLATFORM])
    }

    fn device_ids(
        &self,
        platform: PlatformHandle,
        kind: DeviceType,
    ) -> ApiResult<Vec<DeviceHandle>> {
        if platform != WGPU_PLATFORM {
            return Err(Status::INVALID_PLATFORM);
        }
        let device_type = self.adapter_info().device_type;
        let matches = match kind {
            DeviceType::Gpu => matches!(
                device_type,
                wgpu::DeviceType::DiscreteGpu
                    | wgpu::DeviceType::IntegratedGpu
                    | wgpu::DeviceType::VirtualGpu
            ),
            DeviceType::Cpu => device_type == wgpu::DeviceType::Cpu,
            DeviceType::All => true,
        };
        if !matches {
            return Err(Status::DEVICE_NOT_FOUND);
        }
        Ok(vec![WGPU_DEVICE])
    }

    fn device_name(&self, device: DeviceHandle) -> ApiResult<String> {
        check_device(device)?;
        Ok(self.adapter_info().name)
    }

    fn create_context(
        &self,
        device: DeviceHandle,
        properties: &ContextProperties,
    ) -> ApiResult<ContextHandle> {
        check_device(device)?;
        if properties.platform != WGPU_PLATFORM {
            return Err(Status::INVALID_PLATFORM);
        }
        if let Some(surface) = properties.surface {
            if surface != self.surface_handles() {
                return Err(Status::INVALID_GL_SHAREGROUP_REFERENCE_KHR);
            }
        }
        let mut state = self.lock();
        let handle = state.next_handle();
        state.contexts.insert(handle, properties.surface);
        Ok(ContextHandle(handle))
    }

    fn release_context(&self, context: ContextHandle) -> ApiResult<()> {
        let mut state = self.lock();
        check_context(&state, context)?;
        let dependents = state.queues.values().any(|c| *c == context.0)
            || state.programs.values().any(|p| p.context == context.0)
            || state.mems.values().any(|m| m.context == context.0);
        if dependents {
            log::warn!("Context {} released with live dependents", context.0);
            return Err(Status::INVALID_OPERATION);
        }
        state.contexts.remove(&context.0);
        Ok(())
    }

    fn create_queue(
        &self,
        context: ContextHandle,
        device: DeviceHandle,
        properties: QueueProperties,
    ) -> ApiResult<QueueHandle> {
        check_device(device)?;
        let mut state = self.lock();
        check_context(&state, context)?;
        if properties.out_of_order {
            return Err(Status::INVALID_QUEUE_PROPERTIES);
        }
        let handle = state.next_handle();
        state.queues.insert(handle, context.0);
        Ok(QueueHandle(handle))
    }

    fn release_queue(&self, queue: QueueHandle) -> ApiResult<()> {
        let mut state = self.lock();
        if state.queues.remove(&queue.0).is_none() {
            return Err(Status::INVALID_COMMAND_QUEUE);
        }
        drop(state);
        self.wait_idle().map_err(lost)
    }

    fn create_program_with_source(
        &self,
        context: ContextHandle,
        source: &str,
    ) -> ApiResult<ProgramHandle> {
        if source.trim().is_empty() {
            return Err(Status::INVALID_VALUE);
        }
        let mut state = self.lock();
        check_context(&state, context)?;
        let handle = state.next_handle();
        state.programs.insert(
            handle,
            GpuProgram {
                context: context.0,
                source: source.to_string(),
                module: None,
                log: String::new(),
            },
        );
        Ok(ProgramHandle(handle))
    }

    fn build_program(&self, program: ProgramHandle, device: DeviceHandle) -> ApiResult<()> {
        check_device(device)?;
        let mut state = self.lock();
        let entry = state
            .programs
            .get_mut(&program.0)
            .ok_or(Status::INVALID_PROGRAM)?;

        let (module, error) = self.validated(|device| {
            device.create_shader_module(wgpu::ShaderModuleDescriptor {
                label: Some("program"),
                source: wgpu::ShaderSource::Wgsl(entry.source.as_str().into()),
            })
        });
        match error {
            Some(message) => {
                entry.module = None;
                entry.log = message;
                Err(Status::BUILD_PROGRAM_FAILURE)
            }
            None => {
                entry.module = Some(module);
                entry.log.clear();
                Ok(())
            }
        }
    }

    fn program_build_log(
        &self,
        program: ProgramHandle,
        device: DeviceHandle,
    ) -> ApiResult<String> {
        check_device(device)?;
        let state = self.lock();
        state
            .programs
            .get(&program.0)
            .map(|p| p.log.clone())
            .ok_or(Status::INVALID_PROGRAM)
    }

    fn release_program(&self, program: ProgramHandle) -> ApiResult<()> {
        let mut state = self.lock();
        if !state.programs.contains_key(&program.0) {
            return Err(Status::INVALID_PROGRAM);
        }
        if state.kernels.values().any(|k| k.program == program.0) {
            log::warn!("Program {} released with live kernels", program.0);
            return Err(Status::INVALID_OPERATION);
        }
        state.programs.remove(&program.0);
        Ok(())
    }

    fn create_kernel(&self, program: ProgramHandle, name: &str) -> ApiResult<KernelHandle> {
        let mut state = self.lock();
        let entry = state
            .programs
            .get(&program.0)
            .ok_or(Status::INVALID_PROGRAM)?;
        let module = entry
            .module
            .as_ref()
            .ok_or(Status::INVALID_PROGRAM_EXECUTABLE)?;

        let (pipeline, error) = self.validated(|device| {
            device.create_compute_pipeline(&wgpu::ComputePipelineDescriptor {
                label: Some(name),
                layout: None,
                module,
                entry_point: Some(name),
                compilation_options: Default::default(),
                cache: None,
            })
        });
        if let Some(message) = error {
            log::warn!("Kernel {} rejected: {}", name, message);
            return Err(Status::INVALID_KERNEL_NAME);
        }

        let handle = state.next_handle();
        state.kernels.insert(
            handle,
            GpuKernel {
                program: program.0,
                name: name.to_string(),
                pipeline,
                args: Default::default(),
            },
        );
        Ok(KernelHandle(handle))
    }

    fn release_kernel(&self, kernel: KernelHandle) -> ApiResult<()> {
        let mut state = self.lock();
        state
            .kernels
            .remove(&kernel.0)
            .map(|_| ())
            .ok_or(Status::INVALID_KERNEL)
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
        let entry = state
            .kernels
            .get_mut(&kernel.0)
            .ok_or(Status::INVALID_KERNEL)?;
        entry.args.insert(index, KernelArg::Mem(mem.0));
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
        let entry = state
            .kernels
            .get_mut(&kernel.0)
            .ok_or(Status::INVALID_KERNEL)?;
        entry.args.insert(index, KernelArg::Bytes(bytes.to_vec()));
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
        let size = size as u64;
        let buffer = self.device.create_buffer(&wgpu::BufferDescriptor {
            label: Some("mem_buffer"),
            size: size.div_ceil(wgpu::COPY_BUFFER_ALIGNMENT) * wgpu::COPY_BUFFER_ALIGNMENT,
            usage: wgpu::BufferUsages::STORAGE
                | wgpu::BufferUsages::COPY_SRC
                | wgpu::BufferUsages::COPY_DST,
            mapped_at_creation: false,
        });
        Ok(insert_mem(
            &mut state,
            context,
            access,
            Backing::Buffer { buffer, size },
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
        let texture_format = image_texture_format(format).ok_or(Status::IMAGE_FORMAT_NOT_SUPPORTED)?;
        let mut state = self.lock();
        check_context(&state, context)?;
        let texture = self.device.create_texture(&wgpu::TextureDescriptor {
            label: Some("mem_image"),
            size: wgpu::Extent3d {
                width: desc.width,
                height: desc.height,
                depth_or_array_layers: 1,
            },
            mip_level_count: 1,
            sample_count: 1,
            dimension: wgpu::TextureDimension::D2,
            format: texture_format,
            usage: wgpu::TextureUsages::STORAGE_BINDING
                | wgpu::TextureUsages::TEXTURE_BINDING
                | wgpu::TextureUsages::COPY_SRC
                | wgpu::TextureUsages::COPY_DST,
            view_formats: &[],
        });
        Ok(insert_mem(
            &mut state,
            context,
            access,
            Backing::Image {
                texture,
                format: *format,
                width: desc.width,
                height: desc.height,
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
        let plane = entry.level(mip_level).ok_or(Status::INVALID_MIP_LEVEL)?;
        ImageFormat::from_pixel_format(plane.format)
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
        let plane = state
            .renderbuffers
            .get(&renderbuffer.0)
            .ok_or(Status::INVALID_GL_OBJECT)?;
        ImageFormat::from_pixel_format(plane.format)
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
        let object = state.mems.remove(&mem.0).ok_or(Status::INVALID_MEM_OBJECT)?;
        if object.acquired {
            log::warn!("Memory object {} released while acquired", mem.0);
        }
        Ok(())
    }

    fn enqueue_write_buffer(
        &self,
        queue: QueueHandle,
        mem: MemHandle,
        offset: usize,
        data: &[u8],
    ) -> ApiResult<()> {
        let state = self.lock();
        check_queue(&state, queue)?;
        check_acquired(&state, mem.0)?;
        let Resource::Buffer { buffer, size } = state.resource(mem.0)? else {
            return Err(Status::INVALID_MEM_OBJECT);
        };
        let (offset, len) = (offset as u64, data.len() as u64);
        if offset + len > size {
            return Err(Status::INVALID_VALUE);
        }
        let align = wgpu::COPY_BUFFER_ALIGNMENT;
        if offset % align != 0 || len % align != 0 {
            return Err(Status::INVALID_VALUE);
        }
        self.queue.write_buffer(buffer, offset, data);
        self.queue.submit(None);
        drop(state);
        self.wait_idle().map_err(lost)
    }

    fn enqueue_read_buffer(
        &self,
        queue: QueueHandle,
        mem: MemHandle,
        offset: usize,
        out: &mut [u8],
    ) -> ApiResult<()> {
        let state = self.lock();
        check_queue(&state, queue)?;
        check_acquired(&state, mem.0)?;
        let Resource::Buffer { buffer, size } = state.resource(mem.0)? else {
            return Err(Status::INVALID_MEM_OBJECT);
        };
        let (offset, len) = (offset as u64, out.len() as u64);
        if offset + len > size {
            return Err(Status::INVALID_VALUE);
        }
        let data = readback::read_buffer(&self.device, &self.queue, buffer, offset, len)
            .map_err(lost)?;
        out.copy_from_slice(&data);
        Ok(())
    }

    fn enqueue_write_image(
        &self,
        queue: QueueHandle,
        mem: MemHandle,
        data: &[u8],
    ) -> ApiResult<()> {
        let state = self.lock();
        check_queue(&state, queue)?;
        check_acquired(&state, mem.0)?;
        let Resource::Texture {
            texture,
            level,
            width,
            height,
            pixel_size,
        } = state.resource(mem.0)?
        else {
            return Err(Status::INVALID_MEM_OBJECT);
        };
        if data.len() != width as usize * height as usize * pixel_size {
            return Err(Status::INVALID_VALUE);
        }
        readback::write_texture(&self.queue, texture, level, (width, height), pixel_size, data);
        self.queue.submit(None);
        drop(state);
        self.wait_idle().map_err(lost)
    }

    fn enqueue_read_image(&self, queue: QueueHandle, mem: MemHandle) -> ApiResult<Vec<u8>> {
        let state = self.lock();
        check_queue(&state, queue)?;
        check_acquired(&state, mem.0)?;
        let Resource::Texture {
            texture,
            level,
            width,
            height,
            pixel_size,
        } = state.resource(mem.0)?
        else {
            return Err(Status::INVALID_MEM_OBJECT);
        };
        readback::read_texture(
            &self.device,
            &self.queue,
            texture,
            level,
            (width, height),
            pixel_size,
        )
        .map_err(lost)
    }

    fn enqueue_nd_range(
        &self,
        queue: QueueHandle,
        kernel: KernelHandle,
        range: &NdRange,
    ) -> ApiResult<()> {
        let state = self.lock();
        check_queue(&state, queue)?;
        range.validate()?;
        let entry = state.kernels.get(&kernel.0).ok_or(Status::INVALID_KERNEL)?;
        let bound = self.bind_args(&state, entry)?;
        let [x, y, z] = workgroups(range);

        let (commands, error) = self.validated(|device| {
            let bind_group = (!bound.is_empty()).then(|| {
                let entries: Vec<wgpu::BindGroupEntry> = bound
                    .iter()
                    .map(|(binding, resource)| wgpu::BindGroupEntry {
                        binding: *binding,
                        resource: resource.resource(),
                    })
                    .collect();
                device.create_bind_group(&wgpu::BindGroupDescriptor {
                    label: Some("kernel_args"),
                    layout: &entry.pipeline.get_bind_group_layout(0),
                    entries: &entries,
                })
            });

            let mut encoder = device.create_command_encoder(&wgpu::CommandEncoderDescriptor {
                label: Some(entry.name.as_str()),
            });
            {
                let mut pass = encoder.begin_compute_pass(&wgpu::ComputePassDescriptor {
                    label: Some(entry.name.as_str()),
                    timestamp_writes: None,
                });
                pass.set_pipeline(&entry.pipeline);
                if let Some(bind_group) = &bind_group {
                    pass.set_bind_group(0, bind_group, &[]);
                }
                pass.dispatch_workgroups(x, y, z);
            }
            encoder.finish()
        });
        if let Some(message) = error {
            log::warn!("Dispatch of {} rejected: {}", entry.name, message);
            return Err(Status::INVALID_KERNEL_ARGS);
        }
        self.queue.submit(Some(commands));
        Ok(())
    }

    fn enqueue_acquire_gl_objects(
        &self,
        queue: QueueHandle,
        mems: &[MemHandle],
    ) -> ApiResult<()> {
        let mut state = self.lock();
        check_queue(&state, queue)?;
        for mem in mems {
            let object = state.mems.get(&mem.0).ok_or(Status::INVALID_MEM_OBJECT)?;
            if !object.is_shared() {
                return Err(Status::INVALID_GL_OBJECT);
            }
            if object.acquired {
                return Err(Status::INVALID_OPERATION);
            }
        }
        for mem in mems {
            if let Some(object) = state.mems.get_mut(&mem.0) {
                object.acquired = true;
            }
        }
        Ok(())
    }

    fn enqueue_release_gl_objects(
        &self,
        queue: QueueHandle,
        mems: &[MemHandle],
    ) -> ApiResult<()> {
        let mut state = self.lock();
        check_queue(&state, queue)?;
        for mem in mems {
            let object = state.mems.get(&mem.0).ok_or(Status::INVALID_MEM_OBJECT)?;
            if !object.is_shared() {
                return Err(Status::INVALID_GL_OBJECT);
            }
            if !object.acquired {
                return Err(Status::INVALID_OPERATION);
            }
        }
        for mem in mems {
            if let Some(object) = state.mems.get_mut(&mem.0) {
                object.acquired = false;
            }
        }
        drop(state);
        self.wait_idle().map_err(lost)
    }

    fn finish(&self, queue: QueueHandle) -> ApiResult<()> {
        check_queue(&self.lock(), queue)?;
        self.wait_idle().map_err(lost)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const DOUBLE: &str = r#"
@group(0) @binding(0) var<storage, read_write> data: array<f32>;

@compute @workgroup_size(64)
fn double(@builtin(global_invocation_id) id: vec3<u32>) {
    if (id.x < arrayLength(&data)) {
        data[id.x] = data[id.x] * 2.0;
    }
}
"#;

    #[test]
    fn test_workgroups() {
        assert_eq!(workgroups(&NdRange::linear(1024, 64)), [16, 1, 1]);
        assert_eq!(workgroups(&NdRange::planar(20, 16)), [3, 2, 1]);
    }

    #[test]
    fn test_padded_uniform() {
        assert_eq!(padded_uniform(&[1, 2, 3, 4]).len(), 16);
        assert_eq!(padded_uniform(&[0; 17]).len(), 32);
    }

    #[tokio::test]
    async fn test_dispatch_doubles_buffer() {
        let Ok(device) = WgpuDevice::new((16, 16)).await else {
            return;
        };
        let context = device
            .create_context(
                WGPU_DEVICE,
                &ContextProperties {
                    platform: WGPU_PLATFORM,
                    surface: None,
                },
            )
            .unwrap();
        let queue = device
            .create_queue(context, WGPU_DEVICE, QueueProperties::default())
            .unwrap();
        let program = device.create_program_with_source(context, DOUBLE).unwrap();
        device.build_program(program, WGPU_DEVICE).unwrap();
        let kernel = device.create_kernel(program, "double").unwrap();

        let input: Vec<f32> = (0..128).map(|i| i as f32).collect();
        let mem = device
            .create_buffer(context, MemAccess::ReadWrite, input.len() * 4)
            .unwrap();
        device
            .enqueue_write_buffer(queue, mem, 0, bytemuck::cast_slice(&input))
            .unwrap();
        device.set_kernel_arg_mem(kernel, 0, mem).unwrap();
        device
            .enqueue_nd_range(queue, kernel, &NdRange::linear(128, 64))
            .unwrap();
        device.finish(queue).unwrap();

        let mut out = vec![0u8; input.len() * 4];
        device.enqueue_read_buffer(queue, mem, 0, &mut out).unwrap();
        let values: Vec<f32> = out
            .chunks_exact(4)
            .map(bytemuck::pod_read_unaligned)
            .collect();
        assert_eq!(values[10], 20.0);
        assert_eq!(values[127], 254.0);

        device.release_kernel(kernel).unwrap();
        device.release_mem(mem).unwrap();
        device.release_program(program).unwrap();
        device.release_queue(queue).unwrap();
        device.release_context(context).unwrap();
    }

    #[tokio::test]
    async fn test_build_failure_reports_log() {
        let Ok(device) = WgpuDevice::new((16, 16)).await else {
            return;
        };
        let context = device
            .create_context(
                WGPU_DEVICE,
                &ContextProperties {
                    platform: WGPU_PLATFORM,
                    surface: None,
                },
            )
            .unwrap();
        let program = device
            .create_program_with_source(context, "fn broken( {")
            .unwrap();
        assert_eq!(
            device.build_program(program, WGPU_DEVICE),
            Err(Status::BUILD_PROGRAM_FAILURE)
        );
        assert!(!device
            .program_build_log(program, WGPU_DEVICE)
            .unwrap()
            .is_empty());
        assert_eq!(
            device.create_kernel(program, "broken"),
            Err(Status::INVALID_PROGRAM_EXECUTABLE)
        );
        device.release_program(program).unwrap();
        device.release_context(context).unwrap();
    }
}
