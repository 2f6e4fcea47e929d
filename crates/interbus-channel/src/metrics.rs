//! Metric names recorded by channel operations.
//!
//! Recording goes through the `metrics` facade; nothing is exported unless
//! the process installs a recorder (the broker installs Prometheus).

/// Channels created (counter).
pub const CHANNELS_CREATED_TOTAL: &str = "channels_created_total";
/// Channels currently registered (gauge).
pub const CHANNELS_ACTIVE: &str = "channels_active";
/// Members currently connected across all channels (gauge).
pub const CHANNEL_MEMBERS_ACTIVE: &str = "channel_members_active";
/// Accepted connect handshakes (counter).
pub const CHANNEL_CONNECTIONS_TOTAL: &str = "channel_connections_total";
/// Completed disconnections, either side (counter).
pub const CHANNEL_DISCONNECTIONS_TOTAL: &str = "channel_disconnections_total";
/// Dispatches sent, labeled by `topic` (counter).
pub const DISPATCH_TOTAL: &str = "dispatch_total";
/// Dispatches that failed, labeled by `topic` and `error_type` (counter).
pub const DISPATCH_ERRORS_TOTAL: &str = "dispatch_errors_total";
/// Dispatch round-trip time in seconds (histogram).
pub const DISPATCH_DURATION_SECONDS: &str = "dispatch_duration_seconds";
/// Publish fan-outs (counter).
pub const PUBLISH_TOTAL: &str = "publish_total";
