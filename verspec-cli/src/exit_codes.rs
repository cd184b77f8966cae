/// Exit codes for CI/automation.
pub const SUCCESS: i32 = 0;
/// An assertion, HTTP, parse, resolution or version-graph failure.
pub const FAILED: i32 = 1;
/// Bad arguments, a bad tag expression or an unknown version.
pub const INVALID_INVOCATION: i32 = 2;
