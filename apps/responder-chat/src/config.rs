use chat_sync::SyncConfig;
use config::{Config, ConfigError, Environment};

pub const SYNC_ENV_PREFIX: &str = "RESPONDER_SYNC";

/// Reads engine tunables from `RESPONDER_SYNC__*` variables, e.g.
/// `RESPONDER_SYNC__POLL_INTERVAL_MS=5000`. Unset keys keep their defaults.
pub fn sync_config_from_env() -> Result<SyncConfig, ConfigError> {
    Config::builder()
        .add_source(
            Environment::with_prefix(SYNC_ENV_PREFIX)
                .prefix_separator("__")
                .try_parsing(true),
        )
        .build()?
        .try_deserialize::<SyncConfig>()
        .map(normalize)
}

fn normalize(mut cfg: SyncConfig) -> SyncConfig {
    let defaults = SyncConfig::default();
    cfg.self_marker = non_blank(cfg.self_marker).unwrap_or(defaults.self_marker);
    cfg.temp_id_prefix = non_blank(cfg.temp_id_prefix).unwrap_or(defaults.temp_id_prefix);
    cfg
}

fn non_blank(value: String) -> Option<String> {
    let trimmed = value.trim();
    if trimmed.is_empty() {
        None
    } else {
        Some(trimmed.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serial_test::serial;

    const KEYS: &[&str] = &[
        "RESPONDER_SYNC__POLL_INTERVAL_MS",
        "RESPONDER_SYNC__POLL_START_DELAY_MS",
        "RESPONDER_SYNC__SELF_MARKER",
        "RESPONDER_SYNC__TEMP_ID_PREFIX",
    ];

    fn clear() {
        for key in KEYS {
            std::env::remove_var(key);
        }
    }

    #[test]
    #[serial]
    fn defaults_without_environment() {
        clear();
        let cfg = sync_config_from_env().expect("config");
        assert_eq!(cfg, SyncConfig::default());
    }

    #[test]
    #[serial]
    fn environment_overrides_selected_keys() {
        clear();
        std::env::set_var("RESPONDER_SYNC__POLL_INTERVAL_MS", "5000");
        std::env::set_var("RESPONDER_SYNC__SELF_MARKER", " agent ");
        let cfg = sync_config_from_env();
        clear();

        let cfg = cfg.expect("config");
        assert_eq!(cfg.poll_interval_ms, 5000);
        assert_eq!(cfg.poll_start_delay_ms, 1000);
        assert_eq!(cfg.self_marker, "agent");
    }

    #[test]
    #[serial]
    fn blank_values_fall_back() {
        clear();
        std::env::set_var("RESPONDER_SYNC__TEMP_ID_PREFIX", "   ");
        let cfg = sync_config_from_env();
        clear();
        assert_eq!(cfg.expect("config").temp_id_prefix, "temp-");
    }

    #[test]
    #[serial]
    fn malformed_numbers_are_errors() {
        clear();
        std::env::set_var("RESPONDER_SYNC__POLL_INTERVAL_MS", "soon");
        let cfg = sync_config_from_env();
        clear();
        assert!(cfg.is_err());
    }
}
