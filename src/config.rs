//! Persistent application configuration model and defaults.

/// Root configuration persisted to `config.toml`.
#[derive(Debug, Clone, Default, PartialEq, serde::Deserialize, serde::Serialize)]
pub struct Config {
    #[serde(default)]
    /// Subsonic/Navidrome server connection settings.
    pub subsonic: SubsonicConfig,
}

/// Subsonic/Navidrome server settings persisted between sessions.
///
/// The password is never written to the config file; it lives in the OS
/// keyring (see `integration_keyring`).
#[derive(Debug, Clone, Default, PartialEq, serde::Deserialize, serde::Serialize)]
pub struct SubsonicConfig {
    #[serde(default)]
    pub enabled: bool,
    #[serde(default)]
    pub server_url: String,
    #[serde(default)]
    pub username: String,
}

#[cfg(test)]
mod tests {
    use super::Config;

    #[test]
    fn test_default_config_round_trips_through_toml() {
        let config = Config::default();
        let serialized = toml::to_string(&config).expect("default config should serialize");
        let parsed: Config = toml::from_str(&serialized).expect("serialized config should parse");
        assert_eq!(parsed, config);
    }

    #[test]
    fn test_missing_subsonic_section_falls_back_to_defaults() {
        let parsed: Config = toml::from_str("").expect("empty config should parse");
        assert!(!parsed.subsonic.enabled);
        assert!(parsed.subsonic.server_url.is_empty());
        assert!(parsed.subsonic.username.is_empty());
    }

    #[test]
    fn test_subsonic_section_parses() {
        let parsed: Config = toml::from_str(
            r#"
            [subsonic]
            enabled = true
            server_url = "https://music.example.com"
            username = "alice"
            "#,
        )
        .expect("config with subsonic section should parse");
        assert!(parsed.subsonic.enabled);
        assert_eq!(parsed.subsonic.server_url, "https://music.example.com");
        assert_eq!(parsed.subsonic.username, "alice");
    }
}
