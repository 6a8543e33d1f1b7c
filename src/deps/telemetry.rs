use crate::config::TelemetryConfig;

/// Environment overrides that point the telemetry library at the configured
/// exporter, through the library's own configuration variables.
pub fn telemetry_env(config: &TelemetryConfig) -> Vec<(String, String)> {
    let mut env = Vec::new();

    if let Some(endpoint) = &config.endpoint {
        let base = endpoint.trim_end_matches('/');
        env.push(("LOGFIRE_BASE_URL".to_string(), base.to_string()));
        env.push((
            "OTEL_EXPORTER_OTLP_TRACES_ENDPOINT".to_string(),
            format!("{}/v1/traces", base),
        ));
    }

    match &config.token {
        Some(token) => env.push(("LOGFIRE_TOKEN".to_string(), token.clone())),
        None => env.push(("LOGFIRE_SEND_TO_LOGFIRE".to_string(), "false".to_string())),
    }

    env
}

/// Write-once switch guarding telemetry configuration.
#[derive(Debug, Clone, Default)]
pub struct TelemetryLatch {
    env: Option<Vec<(String, String)>>,
}

impl TelemetryLatch {
    pub fn is_set(&self) -> bool {
        self.env.is_some()
    }

    /// Configure from `config` unless already configured. Returns whether this
    /// call did the configuring.
    pub fn set(&mut self, config: &TelemetryConfig) -> bool {
        if self.env.is_some() {
            return false;
        }
        self.env = Some(telemetry_env(config));
        true
    }

    /// Overrides to export to executions; empty until set.
    pub fn env(&self) -> &[(String, String)] {
        self.env.as_deref().unwrap_or_default()
    }
}
