//! Exit code constants for the taskman CLI.
//!
//! - 0: Success
//! - 1: User error (bad args, unknown task, store/config failure)
//! - 2: Validation failure or forbidden operation
//! - 3: Task failed or internal engine error
//! - 4: Lock acquisition failure or wait timeout

/// Successful execution.
pub const SUCCESS: i32 = 0;

/// User error: bad arguments, unknown task, store or config failure.
pub const USER_ERROR: i32 = 1;

/// Validation failure or capability check failure.
pub const VALIDATION_FAILURE: i32 = 2;

/// Task ended in failure or the engine hit an internal error.
pub const TASK_FAILURE: i32 = 3;

/// Lock acquisition failure: lock could not be acquired before the deadline.
pub const LOCK_FAILURE: i32 = 4;
