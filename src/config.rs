use std::fmt;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::str::FromStr;

use anyhow::{bail, Context, Result};
use serde::{Deserialize, Serialize};
use tracing::info;

#[derive(Debug, Deserialize, Serialize, Clone, Copy, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum Action {
    #[default]
    On,
    Off,
    Color,
    Effect,
    Preset,
}

impl fmt::Display for Action {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Action::On => write!(f, "on"),
            Action::Off => write!(f, "off"),
            Action::Color => write!(f, "color"),
            Action::Effect => write!(f, "effect"),
            Action::Preset => write!(f, "preset"),
        }
    }
}

/// 24-bit RGB color, stored in the config file as "#rrggbb".
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Rgb {
    pub r: u8,
    pub g: u8,
    pub b: u8,
}

impl fmt::Display for Rgb {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{:02x}{:02x}{:02x}", self.r, self.g, self.b)
    }
}

impl FromStr for Rgb {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self> {
        let hex = s.strip_prefix('#').unwrap_or(s);
        if hex.len() != 6 || !hex.chars().all(|c| c.is_ascii_hexdigit()) {
            bail!("invalid color '{}': expected #rrggbb", s);
        }
        Ok(Rgb {
            r: u8::from_str_radix(&hex[0..2], 16)?,
            g: u8::from_str_radix(&hex[2..4], 16)?,
            b: u8::from_str_radix(&hex[4..6], 16)?,
        })
    }
}

impl Serialize for Rgb {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for Rgb {
    fn deserialize<D: serde::Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        s.parse().map_err(serde::de::Error::custom)
    }
}

#[derive(Debug, Deserialize, Serialize, Clone, PartialEq)]
pub struct Config {
    #[serde(default = "default_wled_ip")]
    pub wled_ip: String,
    #[serde(default)]
    pub action: Action,
    #[serde(default = "default_color")]
    pub color: Rgb,
    #[serde(default)]
    pub effect: u8,
    #[serde(default)]
    pub preset: u8,
    #[serde(default)]
    pub bot_token: String,
    #[serde(default)]
    pub chat_id: String,
    #[serde(default)]
    pub last_message_id: i64,
    #[serde(default = "default_polling_rate")]
    pub polling_rate: u64,
}

impl Default for Config {
    fn default() -> Self {
        Config {
            wled_ip: default_wled_ip(),
            action: Action::On,
            color: default_color(),
            effect: 0,
            preset: 0,
            bot_token: String::new(),
            chat_id: String::new(),
            last_message_id: 0,
            polling_rate: default_polling_rate(),
        }
    }
}

fn default_wled_ip() -> String {
    "192.168.1.50".to_string()
}

fn default_color() -> Rgb {
    Rgb {
        r: 255,
        g: 255,
        b: 255,
    }
}

fn default_polling_rate() -> u64 {
    2
}

impl Config {
    /// Checks the Telegram credential fields before the worker connects.
    ///
    /// A bot token must look like `123456789:ABCdefGHI...` (numeric id,
    /// colon, secret). Failing this check is fatal to startup.
    pub fn validate_source(&self) -> Result<()> {
        if self.bot_token.is_empty() || self.chat_id.is_empty() {
            bail!("Telegram bot token or chat ID not set!");
        }
        let mut parts = self.bot_token.splitn(2, ':');
        let id = parts.next().unwrap_or_default();
        let secret = parts.next().unwrap_or_default();
        if id.is_empty() || secret.is_empty() || !id.chars().all(|c| c.is_ascii_digit()) {
            bail!("Invalid bot token format! Should be like: 123456789:ABCdefGHI...");
        }
        Ok(())
    }

    /// Polling interval, clamped to at least one second.
    pub fn polling_interval(&self) -> std::time::Duration {
        std::time::Duration::from_secs(self.polling_rate.max(1))
    }
}

/// Persistence seam for the config record.
///
/// The poll worker is the only writer of `last_message_id`; it saves the
/// whole record synchronously after every accepted message, before the next
/// fetch begins.
pub trait ConfigStore: Send + Sync {
    fn save(&self, config: &Config) -> Result<()>;
}

/// Whole-file JSON store, rewritten atomically on every save.
pub struct JsonConfigStore {
    path: PathBuf,
}

impl JsonConfigStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Loads the config file, creating it with defaults when absent.
    pub fn load_or_create(&self) -> Result<Config> {
        if self.path.exists() {
            let content = std::fs::read_to_string(&self.path)
                .with_context(|| format!("Failed to read config file: {}", self.path.display()))?;
            let config: Config = serde_json::from_str(&content)
                .with_context(|| format!("Failed to parse config file: {}", self.path.display()))?;
            return Ok(config);
        }

        info!(
            "Config file not found, creating default: {}",
            self.path.display()
        );
        let config = Config::default();
        self.save(&config)?;
        Ok(config)
    }
}

impl ConfigStore for JsonConfigStore {
    fn save(&self, config: &Config) -> Result<()> {
        let json = serde_json::to_string_pretty(config).context("Failed to serialize config")?;

        // Write to a temp file in the same directory, then rename over the
        // target so a crash mid-write can never leave a truncated file.
        let dir = self.path.parent().unwrap_or_else(|| Path::new("."));
        let mut tmp = tempfile::NamedTempFile::new_in(dir)
            .with_context(|| format!("Failed to create temp file in {}", dir.display()))?;
        tmp.write_all(json.as_bytes())
            .context("Failed to write config")?;
        tmp.persist(&self.path)
            .with_context(|| format!("Failed to replace config file: {}", self.path.display()))?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_round_trips() {
        let config = Config::default();
        let json = serde_json::to_string(&config).unwrap();
        let back: Config = serde_json::from_str(&json).unwrap();
        assert_eq!(config, back);
    }

    #[test]
    fn partial_file_fills_defaults() {
        let config: Config =
            serde_json::from_str(r#"{"bot_token":"1:a","chat_id":"-100"}"#).unwrap();
        assert_eq!(config.wled_ip, "192.168.1.50");
        assert_eq!(config.polling_rate, 2);
        assert_eq!(config.last_message_id, 0);
    }

    #[test]
    fn color_parses_hex() {
        let c: Rgb = "#ff0080".parse().unwrap();
        assert_eq!(c, Rgb { r: 255, g: 0, b: 128 });
        assert_eq!(c.to_string(), "#ff0080");
        assert!("#12345".parse::<Rgb>().is_err());
        assert!("zzzzzz".parse::<Rgb>().is_err());
    }

    #[test]
    fn validate_rejects_empty_credentials() {
        let config = Config::default();
        assert!(config.validate_source().is_err());
    }

    #[test]
    fn validate_rejects_malformed_tokens() {
        for token in ["no-colon", ":secret", "123:", "abc:def", "12 3:xy"] {
            let config = Config {
                bot_token: token.to_string(),
                chat_id: "-1001234567890".to_string(),
                ..Config::default()
            };
            assert!(
                config.validate_source().is_err(),
                "token '{}' should be rejected",
                token
            );
        }
    }

    #[test]
    fn validate_accepts_well_formed_token() {
        let config = Config {
            bot_token: "123456789:ABCdefGHIjklMNOpqrsTUVwxyz".to_string(),
            chat_id: "-1001234567890".to_string(),
            ..Config::default()
        };
        assert!(config.validate_source().is_ok());
    }

    #[test]
    fn load_or_create_writes_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let store = JsonConfigStore::new(dir.path().join("config.json"));
        assert!(!store.path().exists());

        let config = store.load_or_create().unwrap();
        assert_eq!(config, Config::default());
        assert!(store.path().exists());

        // Second load reads the file it just wrote.
        let again = store.load_or_create().unwrap();
        assert_eq!(again, config);
    }

    #[test]
    fn save_rewrites_whole_file() {
        let dir = tempfile::tempdir().unwrap();
        let store = JsonConfigStore::new(dir.path().join("config.json"));
        let mut config = store.load_or_create().unwrap();

        config.last_message_id = 42;
        store.save(&config).unwrap();

        let content = std::fs::read_to_string(store.path()).unwrap();
        let back: Config = serde_json::from_str(&content).unwrap();
        assert_eq!(back.last_message_id, 42);
    }
}
