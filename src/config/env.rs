use super::GatewatchConfig;

/// Apply env var overrides on top of file/default values.
///
/// Unparseable values are ignored and the existing value is kept.
pub fn apply_env_overrides(config: &mut GatewatchConfig) {
    apply_overrides(config, |key| std::env::var(key).ok());
}

fn apply_overrides<F>(config: &mut GatewatchConfig, lookup: F)
where
    F: Fn(&str) -> Option<String>,
{
    if let Some(v) = lookup("GATEWATCH_LISTEN_ADDR") {
        config.bridge.listen_addr = v;
    }
    if let Some(v) = lookup("GATEWATCH_ALLOWED_ORIGINS") {
        config.bridge.allowed_origins = v
            .split(',')
            .map(str::trim)
            .filter(|origin| !origin.is_empty())
            .map(String::from)
            .collect();
    }
    if let Some(v) = lookup("GATEWATCH_GATEWAY_URL") {
        config.session.gateway_url = v;
    }
    if let Some(v) = lookup("GATEWATCH_AUTO_REINITIALIZE") {
        if let Ok(b) = v.parse::<bool>() {
            config.session.auto_reinitialize = b;
        }
    }
    if let Some(v) = lookup("GATEWATCH_DRY_RUN") {
        if let Ok(b) = v.parse::<bool>() {
            config.session.dry_run = b;
        }
    }
    if let Some(v) = lookup("GATEWATCH_BACKEND_URL") {
        config.backend.base_url = v;
    }
    if let Some(v) = lookup("GATEWATCH_STREAM_URL") {
        config.stream.url = v;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    #[test]
    fn test_overrides_replace_values() {
        let vars: HashMap<&str, &str> = [
            ("GATEWATCH_GATEWAY_URL", "ws://10.0.0.2:3100/link"),
            ("GATEWATCH_AUTO_REINITIALIZE", "true"),
            ("GATEWATCH_STREAM_URL", "ws://10.0.0.3:8000/ws/alerts"),
        ]
        .into_iter()
        .collect();

        let mut config = GatewatchConfig::default();
        apply_overrides(&mut config, |k| vars.get(k).map(|v| v.to_string()));

        assert_eq!(config.session.gateway_url, "ws://10.0.0.2:3100/link");
        assert!(config.session.auto_reinitialize);
        assert_eq!(config.stream.url, "ws://10.0.0.3:8000/ws/alerts");
        assert_eq!(config.bridge.listen_addr, "0.0.0.0:3000");
    }

    #[test]
    fn test_allowed_origins_and_dry_run() {
        let vars: HashMap<&str, &str> = [
            (
                "GATEWATCH_ALLOWED_ORIGINS",
                "http://localhost:5173, https://dashboard.site.example,",
            ),
            ("GATEWATCH_DRY_RUN", "true"),
        ]
        .into_iter()
        .collect();

        let mut config = GatewatchConfig::default();
        assert!(config.bridge.allowed_origins.is_empty());
        assert!(!config.session.dry_run);

        apply_overrides(&mut config, |k| vars.get(k).map(|v| v.to_string()));
        assert_eq!(
            config.bridge.allowed_origins,
            vec!["http://localhost:5173", "https://dashboard.site.example"]
        );
        assert!(config.session.dry_run);
    }

    #[test]
    fn test_unparseable_bool_is_ignored() {
        let mut config = GatewatchConfig::default();
        apply_overrides(&mut config, |k| {
            (k == "GATEWATCH_AUTO_REINITIALIZE").then(|| "sometimes".to_string())
        });
        assert!(!config.session.auto_reinitialize);
    }
}
