//! Serde default functions for configuration sections.

pub(super) fn default_min_providers() -> usize {
    2
}

pub(super) fn default_per_adapter_timeout_ms() -> u64 {
    30_000
}

pub(super) fn default_whole_dispatch_timeout_ms() -> u64 {
    90_000
}

pub(super) fn default_tool_invocation_timeout_ms() -> u64 {
    25_000
}

pub(super) fn default_mode() -> String {
    "parallel".to_string()
}

pub(super) fn default_depth() -> u32 {
    3
}

pub(super) fn default_confidence_floor() -> f64 {
    0.7
}

pub(super) fn default_consensus_floor() -> f64 {
    0.6
}

pub(super) fn default_require_consensus() -> bool {
    true
}

pub(super) fn default_session_ttl_seconds() -> u64 {
    2_592_000 // 30 days
}

pub(super) fn default_context_window_turns() -> usize {
    4
}

pub(super) fn default_turn2_min_providers() -> usize {
    2
}

pub(super) fn default_turn3_min_providers() -> usize {
    3
}

pub(super) fn default_turn_min_cap() -> usize {
    4
}

pub(super) fn default_approval_timeout_ms() -> u64 {
    60_000
}

pub(super) fn default_sandbox_level() -> String {
    "read-only".to_string()
}

pub(super) fn default_event_buffer_size() -> usize {
    64
}

pub(super) fn default_storage_backend() -> String {
    "memory".to_string()
}

pub(super) fn default_db_path() -> String {
    "~/.wallbounce/wallbounce.db".to_string()
}

pub(super) fn default_log_level() -> String {
    "info".to_string()
}

pub(super) fn default_provider_tier() -> u8 {
    2
}

pub(super) fn default_provider_capabilities() -> Vec<String> {
    vec!["analysis".to_string()]
}

pub(super) fn default_output_format() -> String {
    "raw".to_string()
}
