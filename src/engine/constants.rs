// Constants for the memory engine

/// Size of the reserved region at address 0
/// No allocation ever starts inside it, so a pointer value of 0 always means null
pub const NULL_GUARD_SIZE: u32 = 8;

/// Default byte store capacity (64 KiB)
pub const DEFAULT_CAPACITY: u32 = 64 * 1024;

/// Default number of string characters / array elements / object fields shown in previews
pub const DEFAULT_PREVIEW_LIMIT: usize = 8;

/// Default width of one RAM row in a snapshot
pub const DEFAULT_BYTES_PER_ROW: u32 = 16;

/// Default memory budget for snapshot history (16 MiB)
pub const DEFAULT_SNAPSHOT_BUDGET: usize = 16 * 1024 * 1024;

/// Id and name of the persistent frame every engine starts with
pub const GLOBAL_FRAME_ID: u32 = 0;
pub const GLOBAL_FRAME_NAME: &str = "global";

/// Width of a pointer cell (reference slots, ref32 array cells, object reference fields)
pub const POINTER_SIZE: u32 = 4;

/// `{ length: u32, dataPtr: u32 }` header of strings and arrays
pub const STRING_HEADER_SIZE: u32 = 8;
pub const ARRAY_HEADER_SIZE: u32 = 8;

/// `{ length/tag: u32 }` prefix of compact objects
pub const OBJECT_TAG_SIZE: u32 = 4;
