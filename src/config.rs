use crate::hotlink::HotlinkMode;
use anyhow::Result;
use clap::Parser;
use serde::{Deserialize, Serialize};
use std::path::Path;

/// Main configuration structure that can be loaded from CLI, config file,
/// or both (CLI wins for non-default values).
///
/// Example configuration file content
/// # Media Gate Configuration
///
/// # Server configuration
/// listen_on_port = 31820
/// internal_port = 31821
///
/// # Access control
/// admin_api_key = "change-me-please!"
/// token_ttl_secs = 900
/// session_ttl_secs = 3600
///
/// # Rate limiting (fixed windows)
/// rate_window_secs = 60
/// ip_rate_limit = 600
/// session_rate_limit = 240
///
/// # Hotlink protection: "disabled", "log_only" or "block_strict"
/// hotlink_mode = "log_only"
/// blocked_domains = ["evil.example"]
/// blocked_ips = []
///
/// # Streaming
/// stream_chunk_cap_bytes = 4194304
/// download_chunk_cap_bytes = 52428800
#[derive(Debug, Clone, Serialize, Deserialize, Parser)]
#[command(version, about, long_about = None)]
#[serde(default)]
pub struct Config {
    /// Port the external content API listens on
    #[arg(short, long, default_value_t = 31820)]
    #[serde(default = "default_port")]
    pub listen_on_port: u16,

    /// Port the internal control API listens on
    #[arg(short, long, default_value_t = 31821)]
    #[serde(default = "default_internal_port")]
    pub internal_port: u16,

    /// Admin bearer credential; unset disables the admin principal
    #[arg(long)]
    #[serde(skip_serializing_if = "Option::is_none")]
    pub admin_api_key: Option<String>,

    /// Default access-token TTL in seconds
    #[arg(long, default_value_t = 900)]
    #[serde(default = "default_token_ttl")]
    pub token_ttl_secs: u64,

    /// Session TTL in seconds (sliding)
    #[arg(long, default_value_t = 3600)]
    #[serde(default = "default_session_ttl")]
    pub session_ttl_secs: u64,

    /// Rate-limit window length in seconds
    #[arg(long, default_value_t = 60)]
    #[serde(default = "default_rate_window")]
    pub rate_window_secs: u64,

    /// Per-IP requests allowed per window (0 = disabled)
    #[arg(long, default_value_t = 600)]
    #[serde(default = "default_ip_rate_limit")]
    pub ip_rate_limit: u64,

    /// Per-session requests allowed per window (0 = disabled)
    #[arg(long, default_value_t = 240)]
    #[serde(default = "default_session_rate_limit")]
    pub session_rate_limit: u64,

    /// Hotlink enforcement: disabled, log_only or block_strict
    #[arg(long, default_value = "log_only")]
    #[serde(default = "default_hotlink_mode")]
    pub hotlink_mode: String,

    /// Referrer domains that are always treated as hotlinkers
    #[arg(long, value_delimiter = ',')]
    #[serde(default)]
    pub blocked_domains: Vec<String>,

    /// Client IPs that are always denied
    #[arg(long, value_delimiter = ',')]
    #[serde(default)]
    pub blocked_ips: Vec<String>,

    /// Maximum bytes per open-ended streaming range response
    #[arg(long, default_value_t = 4 * 1024 * 1024)]
    #[serde(default = "default_stream_cap")]
    pub stream_chunk_cap_bytes: u64,

    /// Maximum bytes per open-ended download range response
    #[arg(long, default_value_t = 50 * 1024 * 1024)]
    #[serde(default = "default_download_cap")]
    pub download_chunk_cap_bytes: u64,

    /// Mark session cookies Secure (set when HTTPS is enforced upstream)
    #[arg(long, default_value_t = false)]
    #[serde(default)]
    pub secure_cookies: bool,

    /// Trust the first X-Forwarded-For hop as the client address. Only set
    /// this when a reverse proxy in front overwrites the header
    #[arg(long, default_value_t = false)]
    #[serde(default)]
    pub trust_forwarded_for: bool,

    /// Configuration file path
    #[arg(short, long)]
    #[serde(skip)]
    pub config: Option<String>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            listen_on_port: default_port(),
            internal_port: default_internal_port(),
            admin_api_key: None,
            token_ttl_secs: default_token_ttl(),
            session_ttl_secs: default_session_ttl(),
            rate_window_secs: default_rate_window(),
            ip_rate_limit: default_ip_rate_limit(),
            session_rate_limit: default_session_rate_limit(),
            hotlink_mode: default_hotlink_mode(),
            blocked_domains: Vec::new(),
            blocked_ips: Vec::new(),
            stream_chunk_cap_bytes: default_stream_cap(),
            download_chunk_cap_bytes: default_download_cap(),
            secure_cookies: false,
            trust_forwarded_for: false,
            config: None,
        }
    }
}

impl Config {
    /// Load configuration from CLI args, optionally merging with a config file
    pub fn load() -> Result<Self> {
        let mut config = Config::parse();

        if let Some(config_path) = &config.config {
            let file_config = Self::from_file(Path::new(config_path))?;
            config = config.merge_with_file(file_config);
        }

        config.validate()?;
        Ok(config)
    }

    /// Load configuration from a TOML file
    pub fn from_file(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;
        let config: Config = toml::from_str(&content)?;
        Ok(config)
    }

    /// Merge with file config; CLI args at non-default values take precedence
    fn merge_with_file(mut self, file_config: Config) -> Self {
        if self.listen_on_port == default_port() {
            self.listen_on_port = file_config.listen_on_port;
        }
        if self.internal_port == default_internal_port() {
            self.internal_port = file_config.internal_port;
        }
        if self.token_ttl_secs == default_token_ttl() {
            self.token_ttl_secs = file_config.token_ttl_secs;
        }
        if self.session_ttl_secs == default_session_ttl() {
            self.session_ttl_secs = file_config.session_ttl_secs;
        }
        if self.rate_window_secs == default_rate_window() {
            self.rate_window_secs = file_config.rate_window_secs;
        }
        if self.ip_rate_limit == default_ip_rate_limit() {
            self.ip_rate_limit = file_config.ip_rate_limit;
        }
        if self.session_rate_limit == default_session_rate_limit() {
            self.session_rate_limit = file_config.session_rate_limit;
        }
        if self.hotlink_mode == default_hotlink_mode() {
            self.hotlink_mode = file_config.hotlink_mode;
        }
        if self.blocked_domains.is_empty() {
            self.blocked_domains = file_config.blocked_domains;
        }
        if self.blocked_ips.is_empty() {
            self.blocked_ips = file_config.blocked_ips;
        }
        if self.stream_chunk_cap_bytes == default_stream_cap() {
            self.stream_chunk_cap_bytes = file_config.stream_chunk_cap_bytes;
        }
        if self.download_chunk_cap_bytes == default_download_cap() {
            self.download_chunk_cap_bytes = file_config.download_chunk_cap_bytes;
        }
        if !self.secure_cookies {
            self.secure_cookies = file_config.secure_cookies;
        }
        if !self.trust_forwarded_for {
            self.trust_forwarded_for = file_config.trust_forwarded_for;
        }
        if self.admin_api_key.is_none() {
            self.admin_api_key = file_config.admin_api_key;
        }

        self
    }

    /// Validate the configuration
    pub fn validate(&self) -> Result<()> {
        self.hotlink_mode()?;

        if self.token_ttl_secs == 0 {
            return Err(anyhow::anyhow!("token_ttl_secs must be positive"));
        }
        if self.session_ttl_secs == 0 {
            return Err(anyhow::anyhow!("session_ttl_secs must be positive"));
        }
        if self.rate_window_secs == 0 {
            return Err(anyhow::anyhow!("rate_window_secs must be positive"));
        }
        if self.stream_chunk_cap_bytes == 0 || self.download_chunk_cap_bytes == 0 {
            return Err(anyhow::anyhow!("chunk caps must be positive"));
        }
        if let Some(key) = &self.admin_api_key
            && key.len() < 16
        {
            return Err(anyhow::anyhow!(
                "admin_api_key must be at least 16 characters"
            ));
        }

        Ok(())
    }

    pub fn hotlink_mode(&self) -> Result<HotlinkMode> {
        self.hotlink_mode
            .parse()
            .map_err(|e: String| anyhow::anyhow!(e))
    }
}

// Default value functions
fn default_port() -> u16 {
    31820
}

fn default_internal_port() -> u16 {
    31821
}

fn default_token_ttl() -> u64 {
    900
}

fn default_session_ttl() -> u64 {
    3600
}

fn default_rate_window() -> u64 {
    60
}

fn default_ip_rate_limit() -> u64 {
    600
}

fn default_session_rate_limit() -> u64 {
    240
}

fn default_hotlink_mode() -> String {
    "log_only".to_string()
}

fn default_stream_cap() -> u64 {
    4 * 1024 * 1024
}

fn default_download_cap() -> u64 {
    50 * 1024 * 1024
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_validate() {
        Config::default().validate().unwrap();
    }

    #[test]
    fn bad_hotlink_mode_fails_validation() {
        let config = Config {
            hotlink_mode: "paranoid".into(),
            ..Default::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn short_admin_key_fails_validation() {
        let config = Config {
            admin_api_key: Some("short".into()),
            ..Default::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn toml_file_merge_prefers_cli_non_defaults() {
        let file: Config = toml::from_str(
            r#"
            listen_on_port = 9000
            ip_rate_limit = 10
            hotlink_mode = "block_strict"
            blocked_domains = ["evil.example"]
            "#,
        )
        .unwrap();

        let cli = Config {
            ip_rate_limit: 999, // non-default, must survive the merge
            ..Default::default()
        };

        let merged = cli.merge_with_file(file);
        assert_eq!(merged.listen_on_port, 9000);
        assert_eq!(merged.ip_rate_limit, 999);
        assert_eq!(merged.hotlink_mode, "block_strict");
        assert_eq!(merged.blocked_domains, vec!["evil.example".to_string()]);
    }

    #[test]
    fn zero_chunk_cap_rejected() {
        let config = Config {
            stream_chunk_cap_bytes: 0,
            ..Default::default()
        };
        assert!(config.validate().is_err());
    }
}
