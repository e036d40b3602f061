//! Integration tests for dispatch and the acquire/release hand-off between
//! compute and graphics.

use std::sync::Arc;

use phobz_interop::graphics::GlErrorCode;
use phobz_interop::{
    AttachmentPoint, ComputeError, HostDevice, MemAccess, NdRange, PixelFormat, Runtime,
    RuntimeConfig, Status, TextureKey, TextureTarget,
};

const WIDTH: u32 = 32;
const HEIGHT: u32 = 24;

fn runtime() -> (Arc<HostDevice>, Runtime) {
    let device = Arc::new(
        HostDevice::builder()
            .standard_kernels()
            .surface_size(WIDTH, HEIGHT)
            .build(),
    );
    let mut runtime = Runtime::with_device(device.clone(), RuntimeConfig::default()).unwrap();
    runtime.create_context().unwrap();
    (device, runtime)
}

/// Pixel bytes written by `xyPattern` for `frame`.
fn expected_pattern(width: u32, height: u32, frame: u32) -> Vec<u8> {
    let mut out = Vec::with_capacity((width * height * 4) as usize);
    for y in 0..height {
        for x in 0..width {
            let value = ((x + y + frame) % 256) as u8;
            out.extend_from_slice(&[value; 4]);
        }
    }
    out
}

fn pattern_texture(runtime: &mut Runtime) -> TextureKey {
    let targets = runtime.targets_mut();
    let key = targets
        .create_texture("pattern", TextureTarget::Texture2d)
        .unwrap();
    targets
        .texture_mut(key)
        .unwrap()
        .store_2d(WIDTH, HEIGHT, 0, PixelFormat::Rgba8, None)
        .unwrap();
    key
}

// ==================== Dispatch ====================

#[test]
fn test_vector_add_1024() {
    let (device, mut runtime) = runtime();
    let context = runtime.context_mut().unwrap();
    let program = context.create_program_from_file("cl/vec_add.cl").unwrap();
    let key = context.create_kernel(program, "vecAdd").unwrap();

    const N: usize = 1024;
    let a: Vec<f32> = (0..N).map(|i| i as f32).collect();
    let b: Vec<f32> = (0..N).map(|i| (N - i) as f32).collect();

    let kernel = context.kernel_mut(key).unwrap();
    let bytes = N * std::mem::size_of::<f32>();
    let a_mem = kernel.create_buffer(0, MemAccess::ReadOnly, bytes).unwrap();
    let b_mem = kernel.create_buffer(1, MemAccess::ReadOnly, bytes).unwrap();
    let c_mem = kernel.create_buffer(2, MemAccess::WriteOnly, bytes).unwrap();
    kernel.set_scalar_arg(3, &(N as u32)).unwrap();

    let queue = context.queue(0).unwrap();
    let kernel = context.kernel(key).unwrap();
    queue.write_buffer(a_mem, 0, &a).unwrap();
    queue.write_buffer(b_mem, 0, &b).unwrap();
    queue.dispatch(kernel, &NdRange::linear(N, 64)).unwrap();
    assert_eq!(device.pending(queue.handle()), 1);
    queue.finish().unwrap();
    assert_eq!(device.pending(queue.handle()), 0);

    let mut c = vec![0.0f32; N];
    queue.read_buffer(c_mem, 0, &mut c).unwrap();
    assert!(c.iter().all(|&v| v == N as f32));
    let sum: f32 = c.iter().sum();
    assert_eq!(sum, 1_048_576.0);

    runtime.shutdown().unwrap();
    assert!(device.stats().compute_clean());
}

#[test]
fn test_invalid_ranges_rejected() {
    let (_device, mut runtime) = runtime();
    let context = runtime.context_mut().unwrap();
    let program = context.create_program_from_file("cl/vec_add.cl").unwrap();
    let key = context.create_kernel(program, "vecAdd").unwrap();
    let kernel = context.kernel_mut(key).unwrap();
    for slot in 0..3 {
        kernel.create_buffer(slot, MemAccess::ReadWrite, 256).unwrap();
    }
    kernel.set_scalar_arg(3, &64u32).unwrap();

    let queue = context.queue(0).unwrap();
    let kernel = context.kernel(key).unwrap();

    // Global size not a multiple of the local size.
    let err = queue
        .dispatch(kernel, &NdRange::new(&[100], Some(&[64][..])))
        .unwrap_err();
    assert_eq!(err.status(), Some(Status::INVALID_WORK_GROUP_SIZE));

    let err = queue.dispatch(kernel, &NdRange::linear(0, 1)).unwrap_err();
    assert_eq!(err.status(), Some(Status::INVALID_GLOBAL_WORK_SIZE));
}

#[test]
fn test_unset_arguments_rejected() {
    let (_device, mut runtime) = runtime();
    let context = runtime.context_mut().unwrap();
    let program = context.create_program_from_file("cl/vec_add.cl").unwrap();
    let key = context.create_kernel(program, "vecAdd").unwrap();
    context
        .kernel_mut(key)
        .unwrap()
        .create_buffer(0, MemAccess::ReadOnly, 16)
        .unwrap();

    let queue = context.queue(0).unwrap();
    let err = queue
        .dispatch(context.kernel(key).unwrap(), &NdRange::linear(4, 1))
        .unwrap_err();
    assert!(matches!(
        err,
        ComputeError::Device {
            call: "clEnqueueNDRangeKernel",
            status: Status::INVALID_KERNEL_ARGS,
        }
    ));
}

// ==================== Shared Images ====================

#[test]
fn test_shared_texture_pattern_repeated() {
    let (device, mut runtime) = runtime();
    let texture = pattern_texture(&mut runtime);

    let (context, targets) = runtime.split_mut().unwrap();
    let texture_id = targets.texture(texture).unwrap().id();
    let program = context.create_program_from_file("cl/xy_pattern.cl").unwrap();
    let key = context.create_kernel(program, "xyPattern").unwrap();
    let image = context
        .kernel_mut(key)
        .unwrap()
        .create_shared_image(0, MemAccess::WriteOnly, TextureTarget::Texture2d, 0, texture_id)
        .unwrap();
    assert!(image.is_shared());

    for frame in 0..8u32 {
        context
            .kernel_mut(key)
            .unwrap()
            .set_scalar_arg(1, &frame)
            .unwrap();
        let queue = context.queue(0).unwrap();
        queue
            .run_shared(context.kernel(key).unwrap(), &NdRange::planar(WIDTH, HEIGHT))
            .unwrap();
        assert_eq!(device.is_acquired(image.handle()), Some(false));

        // Graphics sees each cycle's output, never a stale one.
        let pixels = targets.texture(texture).unwrap().read_pixels(0).unwrap();
        assert_eq!(pixels, expected_pattern(WIDTH, HEIGHT, frame), "frame {}", frame);
    }

    let stats = device.stats();
    assert_eq!(stats.acquires, 8);
    assert_eq!(stats.gl_releases, 8);
    assert_eq!(stats.dispatches, 8);

    runtime.shutdown().unwrap();
    let stats = device.stats();
    assert!(stats.compute_clean(), "{:?}", stats);
    assert!(stats.graphics_clean(), "{:?}", stats);
}

#[test]
fn test_shared_texture_through_framebuffer() {
    let (device, mut runtime) = runtime();
    let texture = pattern_texture(&mut runtime);

    {
        let (context, targets) = runtime.split_mut().unwrap();
        let texture_id = targets.texture(texture).unwrap().id();
        let program = context.create_program_from_file("cl/xy_pattern.cl").unwrap();
        let key = context.create_kernel(program, "xyPattern").unwrap();
        let kernel = context.kernel_mut(key).unwrap();
        kernel
            .create_shared_image(0, MemAccess::WriteOnly, TextureTarget::Texture2d, 0, texture_id)
            .unwrap();
        kernel.set_scalar_arg(1, &0u32).unwrap();
        context
            .queue(0)
            .unwrap()
            .run_shared(context.kernel(key).unwrap(), &NdRange::planar(WIDTH, HEIGHT))
            .unwrap();
    }

    let mut framebuffer = runtime.create_framebuffer(WIDTH, HEIGHT).unwrap();
    framebuffer
        .attach(runtime.targets(), texture, AttachmentPoint::Color(0))
        .unwrap();
    assert!(framebuffer.complete(runtime.targets()));

    let expected = expected_pattern(WIDTH, HEIGHT, 0);
    assert_eq!(
        framebuffer.read_pixels(AttachmentPoint::Color(0)).unwrap(),
        expected
    );

    // Same-size blit onto the display surface is an exact copy.
    framebuffer.draw(WIDTH, HEIGHT).unwrap();
    let shown = runtime
        .graphics_api()
        .read_framebuffer(None, AttachmentPoint::Color(0))
        .unwrap();
    assert_eq!(shown, expected);

    framebuffer.destroy().unwrap();
    runtime.shutdown().unwrap();
    assert!(device.stats().graphics_clean());
}

#[test]
fn test_shared_renderbuffer() {
    let (device, mut runtime) = runtime();
    let renderbuffer = runtime
        .targets_mut()
        .create_renderbuffer(WIDTH, HEIGHT, PixelFormat::Rgba8)
        .unwrap();

    {
        let (context, targets) = runtime.split_mut().unwrap();
        let id = targets.renderbuffer(renderbuffer).unwrap().id();
        let program = context.create_program_from_file("cl/xy_pattern.cl").unwrap();
        let key = context.create_kernel(program, "xyPattern").unwrap();
        let kernel = context.kernel_mut(key).unwrap();
        kernel
            .create_shared_renderbuffer(0, MemAccess::WriteOnly, id)
            .unwrap();
        kernel.set_scalar_arg(1, &5u32).unwrap();
        context
            .queue(0)
            .unwrap()
            .run_shared(context.kernel(key).unwrap(), &NdRange::planar(WIDTH, HEIGHT))
            .unwrap();
    }

    let mut framebuffer = runtime.create_framebuffer(WIDTH, HEIGHT).unwrap();
    framebuffer
        .attach(runtime.targets(), renderbuffer, AttachmentPoint::Color(0))
        .unwrap();
    assert_eq!(
        framebuffer.read_pixels(AttachmentPoint::Color(0)).unwrap(),
        expected_pattern(WIDTH, HEIGHT, 5)
    );

    drop(framebuffer);
    runtime.shutdown().unwrap();
    let stats = device.stats();
    assert!(stats.compute_clean());
    assert!(stats.graphics_clean());
}

#[test]
fn test_shared_image_of_generated_mip_level() {
    let (device, mut runtime) = runtime();
    let texture = pattern_texture(&mut runtime);

    let (context, targets) = runtime.split_mut().unwrap();
    let texture_ref = targets.texture(texture).unwrap();
    let id = texture_ref.id();
    let program = context.create_program_from_file("cl/xy_pattern.cl").unwrap();
    let key = context.create_kernel(program, "xyPattern").unwrap();
    let kernel = context.kernel_mut(key).unwrap();

    // Level 1 does not exist until mipmaps are generated.
    let err = kernel
        .create_shared_image(0, MemAccess::WriteOnly, TextureTarget::Texture2d, 1, id)
        .unwrap_err();
    assert_eq!(err.status(), Some(Status::INVALID_MIP_LEVEL));

    texture_ref.generate_mipmaps().unwrap();
    assert!(device.texture_levels(id).unwrap() > 1);
    let level = kernel
        .create_shared_image(0, MemAccess::WriteOnly, TextureTarget::Texture2d, 1, id)
        .unwrap();
    kernel.set_scalar_arg(1, &0u32).unwrap();

    context
        .queue(0)
        .unwrap()
        .run_shared(
            context.kernel(key).unwrap(),
            &NdRange::planar(WIDTH / 2, HEIGHT / 2),
        )
        .unwrap();
    assert_eq!(device.is_acquired(level.handle()), Some(false));
    assert_eq!(
        targets.texture(texture).unwrap().read_pixels(1).unwrap(),
        expected_pattern(WIDTH / 2, HEIGHT / 2, 0)
    );
}

#[test]
fn test_shared_image_requires_graphics_object() {
    let (device, mut runtime) = runtime();
    let context = runtime.context_mut().unwrap();
    let program = context.create_program_from_file("cl/xy_pattern.cl").unwrap();
    let key = context.create_kernel(program, "xyPattern").unwrap();
    let kernel = context.kernel_mut(key).unwrap();

    let err = kernel
        .create_shared_image(
            0,
            MemAccess::WriteOnly,
            TextureTarget::Texture2d,
            0,
            phobz_interop::NativeId(9999),
        )
        .unwrap_err();
    assert_eq!(err.status(), Some(Status::INVALID_GL_OBJECT));
    assert!(kernel.memory_objects().is_empty());
    assert_eq!(device.stats().mems_created, 0);
}

// ==================== Shared Buffers ====================

#[test]
fn test_shared_vertex_buffers() {
    let (device, mut runtime) = runtime();
    let graphics = runtime.graphics_api().clone();

    const N: usize = 256;
    let a: Vec<f32> = (0..N).map(|i| i as f32).collect();
    let zeros = vec![0.0f32; N];
    let a_id = graphics
        .create_vertex_buffer(bytemuck::cast_slice(&a))
        .unwrap();
    let c_id = graphics
        .create_vertex_buffer(bytemuck::cast_slice(&zeros))
        .unwrap();

    let context = runtime.context_mut().unwrap();
    let program = context.create_program_from_file("cl/vec_add.cl").unwrap();
    let key = context.create_kernel(program, "vecAdd").unwrap();
    let kernel = context.kernel_mut(key).unwrap();
    kernel
        .create_shared_buffer(0, MemAccess::ReadOnly, a_id)
        .unwrap();
    let b_mem = kernel
        .create_buffer(1, MemAccess::ReadOnly, N * 4)
        .unwrap();
    kernel
        .create_shared_buffer(2, MemAccess::WriteOnly, c_id)
        .unwrap();
    kernel.set_scalar_arg(3, &(N as u32)).unwrap();
    assert_eq!(kernel.shared_bindings().len(), 2);

    let queue = context.queue(0).unwrap();
    queue.write_buffer(b_mem, 0, &vec![1.0f32; N]).unwrap();
    queue
        .run_shared(context.kernel(key).unwrap(), &NdRange::linear(N, 64))
        .unwrap();

    let c: Vec<f32> = graphics
        .read_vertex_buffer(c_id)
        .unwrap()
        .chunks_exact(4)
        .map(bytemuck::pod_read_unaligned)
        .collect();
    let expected: Vec<f32> = (0..N).map(|i| i as f32 + 1.0).collect();
    assert_eq!(c, expected);

    runtime.shutdown().unwrap();
    graphics.delete_vertex_buffer(a_id).unwrap();
    graphics.delete_vertex_buffer(c_id).unwrap();
    assert!(device.stats().graphics_clean());
}

// ==================== Protocol Violations ====================

#[test]
fn test_dispatch_without_acquire_rejected() {
    let (device, mut runtime) = runtime();
    let texture = pattern_texture(&mut runtime);
    let (context, targets) = runtime.split_mut().unwrap();
    let id = targets.texture(texture).unwrap().id();
    let program = context.create_program_from_file("cl/xy_pattern.cl").unwrap();
    let key = context.create_kernel(program, "xyPattern").unwrap();
    let kernel = context.kernel_mut(key).unwrap();
    kernel
        .create_shared_image(0, MemAccess::WriteOnly, TextureTarget::Texture2d, 0, id)
        .unwrap();
    kernel.set_scalar_arg(1, &0u32).unwrap();

    let queue = context.queue(0).unwrap();
    let err = queue
        .dispatch(context.kernel(key).unwrap(), &NdRange::planar(WIDTH, HEIGHT))
        .unwrap_err();
    assert_eq!(err.status(), Some(Status::INVALID_OPERATION));
    assert_eq!(device.stats().dispatches, 0);
}

#[test]
fn test_graphics_blocked_while_acquired() {
    let (device, mut runtime) = runtime();
    let texture = pattern_texture(&mut runtime);
    let (context, targets) = runtime.split_mut().unwrap();
    let id = targets.texture(texture).unwrap().id();
    let program = context.create_program_from_file("cl/xy_pattern.cl").unwrap();
    let key = context.create_kernel(program, "xyPattern").unwrap();
    let image = context
        .kernel_mut(key)
        .unwrap()
        .create_shared_image(0, MemAccess::WriteOnly, TextureTarget::Texture2d, 0, id)
        .unwrap();

    let queue = context.queue(0).unwrap();
    let scope = queue.acquire_scope(&[image]).unwrap();
    assert_eq!(scope.len(), 1);
    assert_eq!(device.is_acquired(image.handle()), Some(true));

    let err = targets.texture(texture).unwrap().read_pixels(0).unwrap_err();
    assert_eq!(err.code, GlErrorCode::InvalidOperation);

    scope.release().unwrap();
    assert_eq!(device.is_acquired(image.handle()), Some(false));
    assert!(targets.texture(texture).unwrap().read_pixels(0).is_ok());
}

#[test]
fn test_scope_drop_releases() {
    let (device, mut runtime) = runtime();
    let texture = pattern_texture(&mut runtime);
    let (context, targets) = runtime.split_mut().unwrap();
    let id = targets.texture(texture).unwrap().id();
    let program = context.create_program_from_file("cl/xy_pattern.cl").unwrap();
    let key = context.create_kernel(program, "xyPattern").unwrap();
    let image = context
        .kernel_mut(key)
        .unwrap()
        .create_shared_image(0, MemAccess::ReadWrite, TextureTarget::Texture2d, 0, id)
        .unwrap();

    let queue = context.queue(0).unwrap();
    {
        let _scope = queue.acquire_scope(&[image]).unwrap();
        assert_eq!(device.is_acquired(image.handle()), Some(true));
    }
    assert_eq!(device.is_acquired(image.handle()), Some(false));
    assert_eq!(device.stats().gl_releases, 1);
}

#[test]
fn test_double_acquire_and_unmatched_release() {
    let (_device, mut runtime) = runtime();
    let texture = pattern_texture(&mut runtime);
    let (context, targets) = runtime.split_mut().unwrap();
    let id = targets.texture(texture).unwrap().id();
    let program = context.create_program_from_file("cl/xy_pattern.cl").unwrap();
    let key = context.create_kernel(program, "xyPattern").unwrap();
    let image = context
        .kernel_mut(key)
        .unwrap()
        .create_shared_image(0, MemAccess::WriteOnly, TextureTarget::Texture2d, 0, id)
        .unwrap();

    let queue = context.queue(0).unwrap();
    let err = queue.release(&[image]).unwrap_err();
    assert_eq!(err.status(), Some(Status::INVALID_OPERATION));

    queue.acquire(&[image]).unwrap();
    let err = queue.acquire(&[image]).unwrap_err();
    assert_eq!(err.status(), Some(Status::INVALID_OPERATION));
    queue.release(&[image]).unwrap();
    queue.finish().unwrap();
}

#[test]
fn test_private_objects_cannot_be_acquired() {
    let (_device, mut runtime) = runtime();
    let context = runtime.context_mut().unwrap();
    let program = context.create_program_from_file("cl/vec_add.cl").unwrap();
    let key = context.create_kernel(program, "vecAdd").unwrap();
    let buffer = context
        .kernel_mut(key)
        .unwrap()
        .create_buffer(0, MemAccess::ReadWrite, 64)
        .unwrap();

    let queue = context.queue(0).unwrap();
    let err = queue.acquire(&[buffer]).unwrap_err();
    assert_eq!(err.status(), Some(Status::INVALID_GL_OBJECT));
}

#[test]
fn test_run_shared_releases_after_failed_dispatch() {
    let (device, mut runtime) = runtime();
    let texture = pattern_texture(&mut runtime);
    let (context, targets) = runtime.split_mut().unwrap();
    let id = targets.texture(texture).unwrap().id();
    let program = context.create_program_from_file("cl/xy_pattern.cl").unwrap();
    let key = context.create_kernel(program, "xyPattern").unwrap();
    // Frame argument left unset.
    let image = context
        .kernel_mut(key)
        .unwrap()
        .create_shared_image(0, MemAccess::WriteOnly, TextureTarget::Texture2d, 0, id)
        .unwrap();

    let queue = context.queue(0).unwrap();
    let err = queue
        .run_shared(context.kernel(key).unwrap(), &NdRange::planar(WIDTH, HEIGHT))
        .unwrap_err();
    assert_eq!(err.status(), Some(Status::INVALID_KERNEL_ARGS));
    assert_eq!(device.is_acquired(image.handle()), Some(false));
    assert!(targets.texture(texture).unwrap().read_pixels(0).is_ok());
}
