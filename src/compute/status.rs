//! Compute device status codes and their symbolic names.

use std::fmt;

/// Numeric status returned by a compute device API call.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Status(pub i32);

impl Status {
    pub const SUCCESS: Status = Status(0);
    pub const DEVICE_NOT_FOUND: Status = Status(-1);
    pub const DEVICE_NOT_AVAILABLE: Status = Status(-2);
    pub const MEM_OBJECT_ALLOCATION_FAILURE: Status = Status(-4);
    pub const OUT_OF_RESOURCES: Status = Status(-5);
    pub const OUT_OF_HOST_MEMORY: Status = Status(-6);
    pub const IMAGE_FORMAT_NOT_SUPPORTED: Status = Status(-10);
    pub const BUILD_PROGRAM_FAILURE: Status = Status(-11);
    pub const INVALID_VALUE: Status = Status(-30);
    pub const INVALID_DEVICE_TYPE: Status = Status(-31);
    pub const INVALID_PLATFORM: Status = Status(-32);
    pub const INVALID_DEVICE: Status = Status(-33);
    pub const INVALID_CONTEXT: Status = Status(-34);
    pub const INVALID_QUEUE_PROPERTIES: Status = Status(-35);
    pub const INVALID_COMMAND_QUEUE: Status = Status(-36);
    pub const INVALID_MEM_OBJECT: Status = Status(-38);
    pub const INVALID_IMAGE_FORMAT_DESCRIPTOR: Status = Status(-39);
    pub const INVALID_IMAGE_SIZE: Status = Status(-40);
    pub const INVALID_PROGRAM: Status = Status(-44);
    pub const INVALID_PROGRAM_EXECUTABLE: Status = Status(-45);
    pub const INVALID_KERNEL_NAME: Status = Status(-46);
    pub const INVALID_KERNEL: Status = Status(-48);
    pub const INVALID_ARG_INDEX: Status = Status(-49);
    pub const INVALID_ARG_VALUE: Status = Status(-50);
    pub const INVALID_ARG_SIZE: Status = Status(-51);
    pub const INVALID_KERNEL_ARGS: Status = Status(-52);
    pub const INVALID_WORK_DIMENSION: Status = Status(-53);
    pub const INVALID_WORK_GROUP_SIZE: Status = Status(-54);
    pub const INVALID_OPERATION: Status = Status(-59);
    pub const INVALID_GL_OBJECT: Status = Status(-60);
    pub const INVALID_BUFFER_SIZE: Status = Status(-61);
    pub const INVALID_MIP_LEVEL: Status = Status(-62);
    pub const INVALID_GLOBAL_WORK_SIZE: Status = Status(-63);
    pub const INVALID_GL_SHAREGROUP_REFERENCE_KHR: Status = Status(-1000);
    pub const PLATFORM_NOT_FOUND_KHR: Status = Status(-1001);

    pub fn code(self) -> i32 {
        self.0
    }

    pub fn is_success(self) -> bool {
        self.0 == 0
    }

    /// Symbolic name of this status, see [`status_name`].
    pub fn name(self) -> &'static str {
        status_name(self.0)
    }

    /// Converts a raw status into `Ok(())` on success.
    pub fn check(self) -> Result<(), Status> {
        if self.is_success() {
            Ok(())
        } else {
            Err(self)
        }
    }
}

impl fmt::Display for Status {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} ({})", self.name(), self.0)
    }
}

/// Fallback symbol for codes outside the table.
pub const UNKNOWN_STATUS: &str = "Unknown OpenCL error";

/// Maps a device status code to its symbolic name.
pub fn status_name(code: i32) -> &'static str {
    match code {
        // run-time and JIT compiler errors
        0 => "CL_SUCCESS",
        -1 => "CL_DEVICE_NOT_FOUND",
        -2 => "CL_DEVICE_NOT_AVAILABLE",
        -3 => "CL_COMPILER_NOT_AVAILABLE",
        -4 => "CL_MEM_OBJECT_ALLOCATION_FAILURE",
        -5 => "CL_OUT_OF_RESOURCES",
        -6 => "CL_OUT_OF_HOST_MEMORY",
        -7 => "CL_PROFILING_INFO_NOT_AVAILABLE",
        -8 => "CL_MEM_COPY_OVERLAP",
        -9 => "CL_IMAGE_FORMAT_MISMATCH",
        -10 => "CL_IMAGE_FORMAT_NOT_SUPPORTED",
        -11 => "CL_BUILD_PROGRAM_FAILURE",
        -12 => "CL_MAP_FAILURE",
        -13 => "CL_MISALIGNED_SUB_BUFFER_OFFSET",
        -14 => "CL_EXEC_STATUS_ERROR_FOR_EVENTS_IN_WAIT_LIST",
        -15 => "CL_COMPILE_PROGRAM_FAILURE",
        -16 => "CL_LINKER_NOT_AVAILABLE",
        -17 => "CL_LINK_PROGRAM_FAILURE",
        -18 => "CL_DEVICE_PARTITION_FAILED",
        -19 => "CL_KERNEL_ARG_INFO_NOT_AVAILABLE",

        // compile-time errors
        -30 => "CL_INVALID_VALUE",
        -31 => "CL_INVALID_DEVICE_TYPE",
        -32 => "CL_INVALID_PLATFORM",
        -33 => "CL_INVALID_DEVICE",
        -34 => "CL_INVALID_CONTEXT",
        -35 => "CL_INVALID_QUEUE_PROPERTIES",
        -36 => "CL_INVALID_COMMAND_QUEUE",
        -37 => "CL_INVALID_HOST_PTR",
        -38 => "CL_INVALID_MEM_OBJECT",
        -39 => "CL_INVALID_IMAGE_FORMAT_DESCRIPTOR",
        -40 => "CL_INVALID_IMAGE_SIZE",
        -41 => "CL_INVALID_SAMPLER",
        -42 => "CL_INVALID_BINARY",
        -43 => "CL_INVALID_BUILD_OPTIONS",
        -44 => "CL_INVALID_PROGRAM",
        -45 => "CL_INVALID_PROGRAM_EXECUTABLE",
        -46 => "CL_INVALID_KERNEL_NAME",
        -47 => "CL_INVALID_KERNEL_DEFINITION",
        -48 => "CL_INVALID_KERNEL",
        -49 => "CL_INVALID_ARG_INDEX",
        -50 => "CL_INVALID_ARG_VALUE",
        -51 => "CL_INVALID_ARG_SIZE",
        -52 => "CL_INVALID_KERNEL_ARGS",
        -53 => "CL_INVALID_WORK_DIMENSION",
        -54 => "CL_INVALID_WORK_GROUP_SIZE",
        -55 => "CL_INVALID_WORK_ITEM_SIZE",
        -56 => "CL_INVALID_GLOBAL_OFFSET",
        -57 => "CL_INVALID_EVENT_WAIT_LIST",
        -58 => "CL_INVALID_EVENT",
        -59 => "CL_INVALID_OPERATION",
        -60 => "CL_INVALID_GL_OBJECT",
        -61 => "CL_INVALID_BUFFER_SIZE",
        -62 => "CL_INVALID_MIP_LEVEL",
        -63 => "CL_INVALID_GLOBAL_WORK_SIZE",
        -64 => "CL_INVALID_PROPERTY",
        -65 => "CL_INVALID_IMAGE_DESCRIPTOR",
        -66 => "CL_INVALID_COMPILER_OPTIONS",
        -67 => "CL_INVALID_LINKER_OPTIONS",
        -68 => "CL_INVALID_DEVICE_PARTITION_COUNT",

        // extension errors
        -1000 => "CL_INVALID_GL_SHAREGROUP_REFERENCE_KHR",
        -1001 => "CL_PLATFORM_NOT_FOUND_KHR",
        -1002 => "CL_INVALID_D3D10_DEVICE_KHR",
        -1003 => "CL_INVALID_D3D10_RESOURCE_KHR",
        -1004 => "CL_D3D10_RESOURCE_ALREADY_ACQUIRED_KHR",
        -1005 => "CL_D3D10_RESOURCE_NOT_ACQUIRED_KHR",
        _ => UNKNOWN_STATUS,
    }
}
