//! Configuration loading via environment variables
//!
//! `EXCHANGE_AUDIT_*` variables overlay the defaults of [`AuditConfig`].
//! Legacy names used by earlier deployments are still honoured with a
//! deprecation warning.

use exchange_audit_common::{AuditConfig, AuditError, SinkKind};

/// Get an environment variable with fallback to a deprecated name
///
/// If the new variable name is set, returns its value.
/// If only the old (deprecated) variable name is set, returns its value
/// and logs a deprecation warning.
pub fn get_env_with_fallback(new_name: &str, old_name: &str) -> Option<String> {
    if let Ok(val) = std::env::var(new_name) {
        return Some(val);
    }
    if new_name == old_name {
        return None;
    }
    if let Ok(val) = std::env::var(old_name) {
        tracing::warn!(
            "Environment variable '{}' is deprecated, use '{}' instead",
            old_name,
            new_name
        );
        return Some(val);
    }
    None
}

/// Get an environment variable with fallback and default value
pub fn get_env_with_fallback_or(new_name: &str, old_name: &str, default: &str) -> String {
    get_env_with_fallback(new_name, old_name).unwrap_or_else(|| default.to_string())
}

/// Get an environment variable with fallback, parsing to a specific type
///
/// Returns `default` if neither is set or parsing fails.
pub fn get_env_with_fallback_parse<T: std::str::FromStr>(
    new_name: &str,
    old_name: &str,
    default: T,
) -> T {
    get_env_with_fallback(new_name, old_name)
        .and_then(|s| s.trim().parse().ok())
        .unwrap_or(default)
}

/// Load the audit configuration from environment variables
///
/// | variable | legacy | field |
/// |---|---|---|
/// | `EXCHANGE_AUDIT_SERVICE_NAME` | `SERVICE_NAME` | `service_name` |
/// | `EXCHANGE_AUDIT_FORWARDED_HEADER` | | `forwarded_header` |
/// | `EXCHANGE_AUDIT_IDENTITY_HEADER` | | `identity_header` |
/// | `EXCHANGE_AUDIT_EXCLUDED_PATHS` | | `excluded_paths` (comma separated) |
/// | `EXCHANGE_AUDIT_BUFFER_CAPACITY` | | `dispatch_buffer_capacity` |
/// | `EXCHANGE_AUDIT_DELIVERY_TIMEOUT_MS` | | `delivery_timeout_ms` |
/// | `EXCHANGE_AUDIT_SINK` | | `sink.kind` (`queue` / `index`) |
/// | `EXCHANGE_AUDIT_QUEUE_URL` | `SQS_AUDIT_QUEUE` | `sink.queue_url` |
/// | `EXCHANGE_AUDIT_INDEX_ENDPOINT` | `ES_AUDIT` | `sink.index_endpoint` |
/// | `EXCHANGE_AUDIT_CONNECT_TIMEOUT_MS` | | `sink.connect_timeout_ms` |
/// | `EXCHANGE_AUDIT_REQUEST_TIMEOUT_MS` | | `sink.request_timeout_ms` |
pub fn from_env() -> Result<AuditConfig, AuditError> {
    let defaults = AuditConfig::default();
    let mut config = defaults.clone();

    config.service_name = get_env_with_fallback_or(
        "EXCHANGE_AUDIT_SERVICE_NAME",
        "SERVICE_NAME",
        &defaults.service_name,
    );
    config.forwarded_header = get_env_with_fallback_or(
        "EXCHANGE_AUDIT_FORWARDED_HEADER",
        "EXCHANGE_AUDIT_FORWARDED_HEADER",
        &defaults.forwarded_header,
    );
    config.identity_header = get_env_with_fallback_or(
        "EXCHANGE_AUDIT_IDENTITY_HEADER",
        "EXCHANGE_AUDIT_IDENTITY_HEADER",
        &defaults.identity_header,
    );
    if let Some(paths) =
        get_env_with_fallback("EXCHANGE_AUDIT_EXCLUDED_PATHS", "EXCHANGE_AUDIT_EXCLUDED_PATHS")
    {
        config.excluded_paths = paths
            .split(',')
            .map(str::trim)
            .filter(|p| !p.is_empty())
            .map(str::to_string)
            .collect();
    }
    config.dispatch_buffer_capacity = get_env_with_fallback_parse(
        "EXCHANGE_AUDIT_BUFFER_CAPACITY",
        "EXCHANGE_AUDIT_BUFFER_CAPACITY",
        defaults.dispatch_buffer_capacity,
    );
    config.delivery_timeout_ms = get_env_with_fallback_parse(
        "EXCHANGE_AUDIT_DELIVERY_TIMEOUT_MS",
        "EXCHANGE_AUDIT_DELIVERY_TIMEOUT_MS",
        defaults.delivery_timeout_ms,
    );

    if let Some(kind) = get_env_with_fallback("EXCHANGE_AUDIT_SINK", "EXCHANGE_AUDIT_SINK") {
        config.sink.kind = SinkKind::parse(&kind)
            .ok_or_else(|| AuditError::Config(format!("unknown sink kind '{kind}'")))?;
    }
    if let Some(url) = get_env_with_fallback("EXCHANGE_AUDIT_QUEUE_URL", "SQS_AUDIT_QUEUE") {
        config.sink.queue_url = Some(url);
    }
    if let Some(endpoint) = get_env_with_fallback("EXCHANGE_AUDIT_INDEX_ENDPOINT", "ES_AUDIT") {
        config.sink.index_endpoint = Some(endpoint);
    }
    config.sink.connect_timeout_ms = get_env_with_fallback_parse(
        "EXCHANGE_AUDIT_CONNECT_TIMEOUT_MS",
        "EXCHANGE_AUDIT_CONNECT_TIMEOUT_MS",
        defaults.sink.connect_timeout_ms,
    );
    config.sink.request_timeout_ms = get_env_with_fallback_parse(
        "EXCHANGE_AUDIT_REQUEST_TIMEOUT_MS",
        "EXCHANGE_AUDIT_REQUEST_TIMEOUT_MS",
        defaults.sink.request_timeout_ms,
    );

    Ok(config)
}
