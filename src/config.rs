//! TOML configuration for the `tlx` client.
//!
//! ```toml
//! [server]
//! url = "http://127.0.0.1:5000"
//! timeout_secs = 30
//!
//! [push]
//! reconnect_secs = 5
//!
//! [sync]
//! debounce_ms = 1000
//! ```
//!
//! Only `[server].url` is required. When `[push].url` is absent the push
//! channel address is derived from the server URL
//! (`ws(s)://host/socket.io/?EIO=4&transport=websocket`).

use anyhow::{bail, Context, Result};
use reqwest::Url;
use serde::Deserialize;
use std::path::Path;

#[derive(Debug, Deserialize, Clone)]
pub struct Config {
    pub server: ServerConfig,
    #[serde(default)]
    pub push: PushConfig,
    #[serde(default)]
    pub sync: SyncConfig,
}

#[derive(Debug, Deserialize, Clone)]
pub struct ServerConfig {
    pub url: String,
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
}

fn default_timeout_secs() -> u64 {
    30
}

#[derive(Debug, Deserialize, Clone)]
pub struct PushConfig {
    #[serde(default)]
    pub url: Option<String>,
    #[serde(default = "default_reconnect_secs")]
    pub reconnect_secs: u64,
}

impl Default for PushConfig {
    fn default() -> Self {
        Self {
            url: None,
            reconnect_secs: default_reconnect_secs(),
        }
    }
}

fn default_reconnect_secs() -> u64 {
    5
}

#[derive(Debug, Deserialize, Clone)]
pub struct SyncConfig {
    #[serde(default = "default_debounce_ms")]
    pub debounce_ms: u64,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            debounce_ms: default_debounce_ms(),
        }
    }
}

/// Lower bound for the config upload debounce.
pub const MIN_DEBOUNCE_MS: u64 = 1000;

fn default_debounce_ms() -> u64 {
    MIN_DEBOUNCE_MS
}

impl Config {
    /// In-memory configuration pointing at `url`, with defaults elsewhere.
    pub fn minimal(url: &str) -> Self {
        Self {
            server: ServerConfig {
                url: url.to_string(),
                timeout_secs: default_timeout_secs(),
            },
            push: PushConfig::default(),
            sync: SyncConfig::default(),
        }
    }

    pub fn server_url(&self) -> Result<Url> {
        Url::parse(&self.server.url)
            .with_context(|| format!("Invalid server.url: '{}'", self.server.url))
    }

    /// Push channel address, explicit or derived from `server.url`.
    pub fn push_url(&self) -> Result<Url> {
        if let Some(url) = &self.push.url {
            return Url::parse(url).with_context(|| format!("Invalid push.url: '{}'", url));
        }
        let mut url = self.server_url()?;
        let scheme = if url.scheme() == "https" { "wss" } else { "ws" };
        url.set_scheme(scheme)
            .map_err(|_| anyhow::anyhow!("cannot derive push url from '{}'", self.server.url))?;
        url.set_path("/socket.io/");
        url.set_query(Some("EIO=4&transport=websocket"));
        Ok(url)
    }

    fn validate(&self) -> Result<()> {
        let url = self.server_url()?;
        match url.scheme() {
            "http" | "https" => {}
            other => bail!("server.url must be http or https, got '{}'", other),
        }
        if self.server.timeout_secs == 0 {
            bail!("server.timeout_secs must be > 0");
        }

        if let Some(push) = &self.push.url {
            let url = self.push_url()?;
            if !matches!(url.scheme(), "ws" | "wss") {
                bail!("push.url must be ws or wss, got '{}'", push);
            }
        }
        if self.push.reconnect_secs == 0 {
            bail!("push.reconnect_secs must be > 0");
        }

        if self.sync.debounce_ms < MIN_DEBOUNCE_MS {
            bail!("sync.debounce_ms must be >= {}", MIN_DEBOUNCE_MS);
        }
        Ok(())
    }
}

pub fn parse_config(content: &str) -> Result<Config> {
    let config: Config = toml::from_str(content).with_context(|| "Failed to parse config file")?;
    config.validate()?;
    Ok(config)
}

pub fn load_config(path: &Path) -> Result<Config> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read config file: {}", path.display()))?;
    parse_config(&content)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_minimal_file() {
        let cfg = parse_config("[server]\nurl = \"http://localhost:5000\"\n").unwrap();
        assert_eq!(cfg.server.timeout_secs, 30);
        assert_eq!(cfg.push.reconnect_secs, 5);
        assert_eq!(cfg.sync.debounce_ms, 1000);
        assert_eq!(
            cfg.push_url().unwrap().as_str(),
            "ws://localhost:5000/socket.io/?EIO=4&transport=websocket"
        );
    }

    #[test]
    fn test_https_derives_wss() {
        let cfg = Config::minimal("https://tex.example.org/base");
        assert_eq!(
            cfg.push_url().unwrap().as_str(),
            "wss://tex.example.org/socket.io/?EIO=4&transport=websocket"
        );
    }

    #[test]
    fn test_explicit_push_url() {
        let cfg = parse_config(
            r#"
[server]
url = "http://a:1"

[push]
url = "ws://b:2/socket.io/?EIO=4&transport=websocket"
reconnect_secs = 1
"#,
        )
        .unwrap();
        assert_eq!(cfg.push_url().unwrap().host_str(), Some("b"));
    }

    #[test]
    fn test_rejects_bad_values() {
        let cases = [
            "[server]\nurl = \"ftp://x\"\n",
            "[server]\nurl = \"not a url\"\n",
            "[server]\nurl = \"http://x\"\ntimeout_secs = 0\n",
            "[server]\nurl = \"http://x\"\n[push]\nreconnect_secs = 0\n",
            "[server]\nurl = \"http://x\"\n[push]\nurl = \"http://y\"\n",
            "[server]\nurl = \"http://x\"\n[sync]\ndebounce_ms = 999\n",
            "[push]\nreconnect_secs = 3\n",
        ];
        for case in cases {
            assert!(parse_config(case).is_err(), "accepted: {}", case);
        }
    }

    #[test]
    fn test_load_missing_file() {
        let err = load_config(Path::new("/nonexistent/tlx.toml")).unwrap_err();
        assert!(err.to_string().contains("Failed to read config file"));
    }
}
