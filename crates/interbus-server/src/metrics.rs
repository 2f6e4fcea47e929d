//! Prometheus metrics recorder and broker metric names.
//!
//! Channel-level metrics are named in [`interbus_channel::metrics`]; this
//! module adds the broker's socket counters.

use metrics_exporter_prometheus::{BuildError, PrometheusBuilder, PrometheusHandle};
use tracing::info;

/// Install the Prometheus metrics recorder (global).
///
/// Returns the handle used to render `/metrics`. Fails if a global recorder
/// is already installed.
pub fn install_recorder() -> Result<PrometheusHandle, BuildError> {
    let handle = PrometheusBuilder::new().install_recorder()?;
    info!("prometheus metrics recorder installed");
    Ok(handle)
}

/// Broker WebSocket connections accepted (counter).
pub const BROKER_SOCKETS_TOTAL: &str = "broker_sockets_total";
/// Open broker WebSocket connections (gauge).
pub const BROKER_SOCKETS_ACTIVE: &str = "broker_sockets_active";
/// Upgrades refused at the connection limit (counter).
pub const BROKER_SOCKETS_REFUSED_TOTAL: &str = "broker_sockets_refused_total";
/// Handshakes rejected by the broker before reaching a provider (counter, labels: error_type).
pub const BROKER_HANDSHAKE_REJECTS_TOTAL: &str = "broker_handshake_rejects_total";

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn render_without_global_install() {
        let handle = PrometheusBuilder::new().build_recorder().handle();
        let output = handle.render();
        assert!(output.is_empty() || output.contains('\n'));
    }

    #[test]
    fn metric_constants_are_snake_case() {
        let names = [
            BROKER_SOCKETS_TOTAL,
            BROKER_SOCKETS_ACTIVE,
            BROKER_SOCKETS_REFUSED_TOTAL,
            BROKER_HANDSHAKE_REJECTS_TOTAL,
        ];
        for name in names {
            assert!(
                name.chars().all(|c| c.is_ascii_lowercase() || c == '_'),
                "metric name '{name}' must be snake_case"
            );
        }
    }
}
