//! Default value functions used by the EngineConfig struct.

// Default value functions for serde
pub(crate) fn default_lock_poll_interval_ms() -> u64 {
    50
}
pub(crate) fn default_lock_stale_minutes() -> u32 {
    120
}
pub(crate) fn default_lock_timeout_ms() -> u64 {
    30_000
}
/// Floor for `record_guard_timeout_ms`; the stale threshold is derived from it.
pub const MIN_RECORD_GUARD_TIMEOUT_MS: u64 = 100;

pub(crate) fn default_record_guard_timeout_ms() -> u64 {
    5_000
}
pub(crate) fn default_resume_interval_ms() -> u64 {
    1_000
}
pub(crate) fn default_max_workers() -> usize {
    4
}
pub(crate) fn default_max_transitions() -> u32 {
    1_000
}
pub(crate) fn default_retry_delay_ms() -> u64 {
    1_000
}
