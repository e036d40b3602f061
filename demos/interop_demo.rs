//! Example: vector add and a compute-written texture shown through a
//! framebuffer.
//!
//! Runs on the host-emulated device, loading kernels from `res/`.
//!
//! Run with:
//!     cargo run --example interop_demo

use anyhow::Context as _;
use phobz_interop::{
    init_logging, AttachmentPoint, HostDevice, LoggingConfig, MemAccess, NdRange, PixelFormat,
    Runtime, RuntimeConfig, TextureTarget,
};

const N: usize = 1024;
const WIDTH: u32 = 512;
const HEIGHT: u32 = 512;
const FRAMES: u32 = 4;

fn main() {
    let config = RuntimeConfig::default();
    init_logging(LoggingConfig::from(&config));

    // Failures are reported, not turned into an exit status.
    if let Err(e) = run(config) {
        eprintln!("Error: {:#}", e);
    }
}

fn run(config: RuntimeConfig) -> anyhow::Result<()> {
    println!("Phobz Interop - Host Device Demo");
    println!("================================\n");

    let device = HostDevice::shared();
    let mut runtime = Runtime::with_device(device.clone(), config)?;
    let context = runtime.create_context()?;
    println!("Device: {}\n", context.device_name());

    // Vector add
    let program = context
        .create_program_from_file("cl/vec_add.cl")
        .context("loading vector add program")?;
    let key = context.create_kernel(program, "vecAdd")?;

    let a: Vec<f32> = (0..N).map(|i| i as f32).collect();
    let b: Vec<f32> = (0..N).map(|i| (N - i) as f32).collect();
    let bytes = N * std::mem::size_of::<f32>();

    let kernel = context.kernel_mut(key)?;
    let a_mem = kernel.create_buffer(0, MemAccess::ReadOnly, bytes)?;
    let b_mem = kernel.create_buffer(1, MemAccess::ReadOnly, bytes)?;
    let c_mem = kernel.create_buffer(2, MemAccess::WriteOnly, bytes)?;
    kernel.set_scalar_arg(3, &(N as u32))?;

    let queue = context.queue(0)?;
    queue.write_buffer(a_mem, 0, &a)?;
    queue.write_buffer(b_mem, 0, &b)?;
    queue.dispatch(context.kernel(key)?, &NdRange::linear(N, 64))?;
    queue.finish()?;

    let mut c = vec![0.0f32; N];
    queue.read_buffer(c_mem, 0, &mut c)?;
    let sum: f32 = c.iter().sum();
    println!("Result = {}, True = {}\n", sum, N * N);

    // Shared texture written by compute, shown by graphics
    let texture = runtime
        .targets_mut()
        .create_texture("pattern", TextureTarget::Texture2d)?;
    runtime
        .targets_mut()
        .texture_mut(texture)?
        .store_2d(WIDTH, HEIGHT, 0, PixelFormat::Rgba8, None)?;

    let (context, targets) = runtime.split_mut()?;
    let id = targets.texture(texture)?.id();
    let program = context.create_program_from_file("cl/xy_pattern.cl")?;
    let key = context.create_kernel(program, "xyPattern")?;
    context.kernel_mut(key)?.create_shared_image(
        0,
        MemAccess::WriteOnly,
        TextureTarget::Texture2d,
        0,
        id,
    )?;

    println!("Rendering {} frames at {}x{}...", FRAMES, WIDTH, HEIGHT);
    for frame in 0..FRAMES {
        context.kernel_mut(key)?.set_scalar_arg(1, &frame)?;
        context
            .queue(0)?
            .run_shared(context.kernel(key)?, &NdRange::planar(WIDTH, HEIGHT))?;

        let pixels = targets.texture(texture)?.read_pixels(0)?;
        println!("  Frame {}: pixel(1, 2) = {}", frame, pixels[(2 * WIDTH as usize + 1) * 4]);
    }

    let mut framebuffer = runtime.create_framebuffer(WIDTH, HEIGHT)?;
    framebuffer.attach(runtime.targets(), texture, AttachmentPoint::Color(0))?;
    if framebuffer.complete(runtime.targets()) {
        framebuffer.draw(WIDTH, HEIGHT)?;
        println!("  Drawn to display surface");
    }
    framebuffer.destroy()?;

    runtime.shutdown()?;
    let stats = device.stats();
    println!(
        "\nDone! {} dispatches, {} acquire/release pairs, all released: {}",
        stats.dispatches,
        stats.acquires,
        stats.compute_clean() && stats.graphics_clean()
    );

    Ok(())
}
