//! Integration tests for the compute context, program registry and teardown.

use std::sync::Arc;

use phobz_interop::compute::status::UNKNOWN_STATUS;
use phobz_interop::compute::QueueProperties;
use phobz_interop::host::HOST_DEVICE_NAME;
use phobz_interop::{
    status_name, ComputeError, HostDevice, MemAccess, Runtime, RuntimeConfig, Status,
};

fn runtime() -> (Arc<HostDevice>, Runtime) {
    let device = HostDevice::shared();
    let runtime = Runtime::with_device(device.clone(), RuntimeConfig::default()).unwrap();
    (device, runtime)
}

const VEC_ADD: &str = r#"
__kernel void vecAdd(__global float* a, __global float* b,
                     __global float* c, const unsigned int n)
{
    int i = get_global_id(0);
    if (i < n) { c[i] = a[i] + b[i]; }
}
"#;

// ==================== Status Decoder ====================

#[test]
fn test_status_names() {
    assert_eq!(status_name(0), "CL_SUCCESS");
    assert_eq!(status_name(-5), "CL_OUT_OF_RESOURCES");
    assert_eq!(status_name(-11), "CL_BUILD_PROGRAM_FAILURE");
    assert_eq!(status_name(-30), "CL_INVALID_VALUE");
    assert_eq!(status_name(-46), "CL_INVALID_KERNEL_NAME");
    assert_eq!(status_name(-60), "CL_INVALID_GL_OBJECT");
    assert_eq!(status_name(-1000), "CL_INVALID_GL_SHAREGROUP_REFERENCE_KHR");
    assert_eq!(status_name(-1001), "CL_PLATFORM_NOT_FOUND_KHR");
}

#[test]
fn test_status_unknown_codes() {
    // Gaps in the table and positive values fall through.
    for code in [1, -20, -29, -70, -999, -1100, i32::MIN] {
        assert_eq!(status_name(code), UNKNOWN_STATUS, "code {}", code);
    }
}

#[test]
fn test_device_error_message_names_call_and_status() {
    let err = ComputeError::Device {
        call: "clCreateBuffer",
        status: Status::INVALID_BUFFER_SIZE,
    };
    let message = err.to_string();
    assert!(message.contains("clCreateBuffer"));
    assert!(message.contains("CL_INVALID_BUFFER_SIZE"));
    assert_eq!(err.status(), Some(Status::INVALID_BUFFER_SIZE));
}

// ==================== Context Lifecycle ====================

#[test]
fn test_create_context() {
    let (device, mut runtime) = runtime();
    let context = runtime.create_context().unwrap();
    assert_eq!(context.device_name(), HOST_DEVICE_NAME);
    assert_eq!(context.queues().len(), 1);
    assert!(context.queue(0).is_ok());
    assert!(matches!(context.queue(1), Err(ComputeError::UnknownQueue(1))));

    let stats = device.stats();
    assert_eq!(stats.contexts_created, 1);
    assert_eq!(stats.queues_created, 1);
}

#[test]
fn test_second_context_rejected() {
    let (device, mut runtime) = runtime();
    runtime.create_context().unwrap();
    assert!(matches!(
        runtime.create_context(),
        Err(ComputeError::DuplicateContext)
    ));
    // The first context is untouched.
    assert!(runtime.has_context());
    assert_eq!(device.stats().contexts_created, 1);
}

#[test]
fn test_context_recreated_after_destroy() {
    let (device, mut runtime) = runtime();
    runtime.create_context().unwrap();
    runtime.destroy_context().unwrap();
    assert!(!runtime.has_context());
    assert!(matches!(runtime.context(), Err(ComputeError::NoContext)));

    runtime.create_context().unwrap();
    let stats = device.stats();
    assert_eq!(stats.contexts_created, 2);
    assert_eq!(stats.contexts_released, 1);
}

#[test]
fn test_context_creation_failures() {
    let cases: [(HostDevice, fn(&ComputeError) -> bool); 4] = [
        (HostDevice::builder().no_platform().build(), |e| {
            matches!(e, ComputeError::NoPlatform)
        }),
        (HostDevice::builder().no_gpu().build(), |e| {
            matches!(e, ComputeError::NoDevice)
        }),
        (HostDevice::builder().headless().build(), |e| {
            matches!(e, ComputeError::NoSurface)
        }),
        (HostDevice::builder().refuse_context().build(), |e| {
            e.status() == Some(Status::DEVICE_NOT_AVAILABLE)
        }),
    ];

    for (device, expected) in cases {
        let device = Arc::new(device);
        let mut runtime = Runtime::with_device(device.clone(), RuntimeConfig::default()).unwrap();
        let err = runtime.create_context().unwrap_err();
        assert!(expected(&err), "unexpected error: {}", err);
        assert!(!runtime.has_context());
        assert!(device.stats().compute_clean());
    }
}

#[test]
fn test_extra_queues() {
    let device = HostDevice::shared();
    let config = RuntimeConfig {
        queue_count: 3,
        ..Default::default()
    };
    let mut runtime = Runtime::with_device(device.clone(), config).unwrap();
    let context = runtime.create_context().unwrap();
    assert_eq!(context.queues().len(), 3);

    let index = context.create_queue(QueueProperties::default()).unwrap();
    assert_eq!(index, 3);

    let out_of_order = QueueProperties {
        out_of_order: true,
        ..Default::default()
    };
    let err = context.create_queue(out_of_order).unwrap_err();
    assert_eq!(err.status(), Some(Status::INVALID_QUEUE_PROPERTIES));

    runtime.shutdown().unwrap();
    let stats = device.stats();
    assert_eq!(stats.queues_created, 4);
    assert!(stats.compute_clean());
}

// ==================== Programs and Kernels ====================

#[test]
fn test_program_from_source() {
    let (_device, mut runtime) = runtime();
    let context = runtime.create_context().unwrap();
    let program = context.create_program("vec_add", VEC_ADD).unwrap();
    let kernel = context.create_kernel(program, "vecAdd").unwrap();

    assert_eq!(context.program(program).unwrap().name(), "vec_add");
    let kernel = context.kernel(kernel).unwrap();
    assert_eq!(kernel.name(), "vecAdd");
    assert_eq!(kernel.program_name(), "vec_add");
    assert_eq!(context.programs().count(), 1);
}

#[test]
fn test_program_from_resource_root() {
    let dir = tempfile::tempdir().unwrap();
    std::fs::create_dir_all(dir.path().join("cl")).unwrap();
    std::fs::write(dir.path().join("cl/vec_add.cl"), VEC_ADD).unwrap();

    let device = HostDevice::shared();
    let config = RuntimeConfig::default().with_resource_root(dir.path());
    let mut runtime = Runtime::with_device(device, config).unwrap();
    let context = runtime.create_context().unwrap();

    let program = context.create_program_from_file("cl/vec_add.cl").unwrap();
    assert_eq!(context.program(program).unwrap().name(), "cl/vec_add.cl");
    assert!(context.create_kernel(program, "vecAdd").is_ok());
}

#[test]
fn test_program_from_bundled_resources() {
    let (_device, mut runtime) = runtime();
    let context = runtime.create_context().unwrap();
    let program = context.create_program_from_file("cl/xy_pattern.cl").unwrap();
    assert!(context.create_kernel(program, "xyPattern").is_ok());
}

#[test]
fn test_missing_source_file() {
    let dir = tempfile::tempdir().unwrap();
    let device = HostDevice::shared();
    let config = RuntimeConfig::default().with_resource_root(dir.path());
    let mut runtime = Runtime::with_device(device.clone(), config).unwrap();
    let context = runtime.create_context().unwrap();

    let err = context.create_program_from_file("cl/absent.cl").unwrap_err();
    match err {
        ComputeError::Source { path, .. } => assert!(path.ends_with("cl/absent.cl")),
        other => panic!("unexpected error: {}", other),
    }
    assert_eq!(device.stats().programs_created, 0);
}

#[test]
fn test_build_failure_reports_log() {
    let (device, mut runtime) = runtime();
    let context = runtime.create_context().unwrap();
    let broken = "__kernel void vecAdd(__global float* a) {\n    a[0] = 1.0f;\n";

    let err = context.create_program("broken", broken).unwrap_err();
    match &err {
        ComputeError::Build {
            program,
            status,
            log,
        } => {
            assert_eq!(program, "broken");
            assert_eq!(*status, Status::BUILD_PROGRAM_FAILURE);
            assert!(log.contains("expected '}'"), "log: {}", log);
        }
        other => panic!("unexpected error: {}", other),
    }
    assert!(err.to_string().contains("CL_BUILD_PROGRAM_FAILURE"));

    // The unbuilt program is released and never registered.
    assert_eq!(context.programs().count(), 0);
    let stats = device.stats();
    assert_eq!(stats.programs_created, 1);
    assert_eq!(stats.programs_released, 1);
}

#[test]
fn test_build_log_capacity() {
    let device = HostDevice::shared();
    let config = RuntimeConfig {
        build_log_capacity: 8,
        ..Default::default()
    };
    let mut runtime = Runtime::with_device(device, config).unwrap();
    let context = runtime.create_context().unwrap();

    match context.create_program("broken", "}}}}") {
        Err(ComputeError::Build { log, .. }) => assert!(log.chars().count() <= 8),
        other => panic!("unexpected result: {:?}", other.map(|_| ())),
    }
}

#[test]
fn test_kernel_not_found() {
    let (_device, mut runtime) = runtime();
    let context = runtime.create_context().unwrap();
    let program = context.create_program("vec_add", VEC_ADD).unwrap();

    match context.create_kernel(program, "vecSub") {
        Err(ComputeError::KernelNotFound { program, kernel }) => {
            assert_eq!(program, "vec_add");
            assert_eq!(kernel, "vecSub");
        }
        other => panic!("unexpected result: {:?}", other),
    }
    assert_eq!(context.program(program).unwrap().kernels().len(), 0);
}

#[test]
fn test_rebinding_keeps_previous_objects_until_kernel_destroyed() {
    let (device, mut runtime) = runtime();
    let context = runtime.create_context().unwrap();
    let program = context.create_program("vec_add", VEC_ADD).unwrap();
    let key = context.create_kernel(program, "vecAdd").unwrap();

    let kernel = context.kernel_mut(key).unwrap();
    let first = kernel.create_buffer(0, MemAccess::ReadOnly, 64).unwrap();
    kernel.create_buffer(1, MemAccess::ReadOnly, 64).unwrap();
    kernel.create_buffer(2, MemAccess::WriteOnly, 64).unwrap();
    let second = kernel.create_buffer(0, MemAccess::ReadOnly, 64).unwrap();

    assert_eq!(kernel.binding(0), Some(second));
    assert_ne!(first, second);
    assert_eq!(kernel.memory_objects().len(), 4);
    assert_eq!(kernel.memory_objects()[0].mem, first);
    assert_eq!(device.stats().live_mem_objects(), 4);
    assert_eq!(device.stats().mems_released, 0);

    context.destroy_program(program).unwrap();
    let stats = device.stats();
    assert_eq!(stats.mems_released, 4);
    assert_eq!(stats.kernels_released, 1);
    assert_eq!(stats.invalid_releases, 0);
}

#[test]
fn test_program_destroy_cascades() {
    let (device, mut runtime) = runtime();
    let context = runtime.create_context().unwrap();
    let keep = context.create_program("keep", VEC_ADD).unwrap();
    let dropped = context.create_program("drop", VEC_ADD).unwrap();

    for program in [keep, dropped] {
        for _ in 0..2 {
            let key = context.create_kernel(program, "vecAdd").unwrap();
            let kernel = context.kernel_mut(key).unwrap();
            kernel.create_buffer(0, MemAccess::ReadWrite, 16).unwrap();
        }
    }
    assert_eq!(device.stats().live_kernels(), 4);

    context.destroy_program(dropped).unwrap();
    let stats = device.stats();
    assert_eq!(stats.live_programs(), 1);
    assert_eq!(stats.live_kernels(), 2);
    assert_eq!(stats.live_mem_objects(), 2);
    assert!(matches!(
        context.program(dropped),
        Err(ComputeError::UnknownProgram(_))
    ));
    assert!(matches!(
        context.destroy_program(dropped),
        Err(ComputeError::UnknownProgram(_))
    ));
    assert_eq!(context.program(keep).unwrap().kernels().len(), 2);

    // A later program does not take over the destroyed key.
    let again = context.create_program("again", VEC_ADD).unwrap();
    assert_ne!(again, dropped);
    assert!(context.program(dropped).is_err());
    assert_eq!(context.program(again).unwrap().name(), "again");

    runtime.shutdown().unwrap();
    let stats = device.stats();
    assert!(stats.compute_clean());
    assert_eq!(stats.programs_released, 3);
    assert_eq!(stats.kernels_released, 4);
    assert_eq!(stats.mems_released, 4);
}

#[test]
fn test_shutdown_releases_everything_once() {
    let (device, mut runtime) = runtime();
    runtime.create_context().unwrap();
    let (context, targets) = runtime.split_mut().unwrap();
    let program = context.create_program("vec_add", VEC_ADD).unwrap();
    let key = context.create_kernel(program, "vecAdd").unwrap();
    context
        .kernel_mut(key)
        .unwrap()
        .create_buffer(0, MemAccess::ReadOnly, 32)
        .unwrap();
    targets
        .create_renderbuffer(16, 16, phobz_interop::PixelFormat::Depth24Stencil8)
        .unwrap();

    runtime.shutdown().unwrap();
    let stats = device.stats();
    assert!(stats.compute_clean(), "{:?}", stats);
    assert!(stats.graphics_clean(), "{:?}", stats);
}

#[test]
fn test_drop_releases_everything() {
    let (device, mut runtime) = runtime();
    {
        let context = runtime.create_context().unwrap();
        let program = context.create_program("vec_add", VEC_ADD).unwrap();
        context.create_kernel(program, "vecAdd").unwrap();
    }
    drop(runtime);
    assert!(device.stats().compute_clean());
}

// ==================== Configuration ====================

#[test]
fn test_config_from_json_file() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("runtime.json");
    std::fs::write(
        &path,
        r#"{ "resource_root": "assets", "queue_count": 2, "queue_profiling": true }"#,
    )
    .unwrap();

    let config = RuntimeConfig::from_json_file(&path).unwrap();
    assert_eq!(config.resource_root, std::path::PathBuf::from("assets"));
    assert_eq!(config.queue_count, 2);
    assert!(config.queue_profiling);
    assert_eq!(config.build_log_capacity, 10_000);
}

#[test]
fn test_invalid_config_rejected_by_runtime() {
    let config = RuntimeConfig {
        queue_count: 0,
        ..Default::default()
    };
    assert!(Runtime::with_device(HostDevice::shared(), config).is_err());
    assert!(RuntimeConfig::from_json_str(r#"{ "build_log_capacity": 0 }"#).is_err());
    assert!(RuntimeConfig::from_json_str("not json").is_err());
}
