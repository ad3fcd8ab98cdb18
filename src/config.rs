//! Loading and interpretation of `server.json`, the top-level
//! configuration file.
//!
//! The raw JSON also lands at `status://server` so rules and actions can
//! read anything from it; this module only types the fields the process
//! itself needs. Unknown fields are ignored.

use std::path::{Path, PathBuf};

use chrono::{FixedOffset, Local, Offset};
use serde::Deserialize;
use serde_json::Value;
use thiserror::Error;

pub const SERVER_CONFIG_FILE: &str = "server.json";
pub const DEFAULT_PORT: u16 = 8080;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("could not read {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("could not parse {path}: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },

    #[error("bad timezone '{0}', expected \u{00b1}hh:mm")]
    BadTimezone(String),
}

/// The typed slice of `server.json` the process reads directly.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    pub config_dir: PathBuf,
    pub port: u16,
    pub smtp_host: String,
    pub downloads: PathBuf,
    pub static_dir: PathBuf,
    /// Local zone for daily rules, fixed for the process lifetime.
    pub timezone: FixedOffset,
    /// The whole parsed file, stored at `status://server`.
    pub raw: Value,
}

#[derive(Debug, Deserialize)]
struct RawServerConfig {
    port: Option<u16>,
    smtp_host: Option<String>,
    downloads: Option<PathBuf>,
    static_dir: Option<PathBuf>,
    timezone: Option<String>,
}

/// Reads `<config_dir>/server.json`.
pub fn load_server_config(config_dir: &Path) -> Result<ServerConfig, ConfigError> {
    let path = config_dir.join(SERVER_CONFIG_FILE);

    let text = std::fs::read_to_string(&path).map_err(|source| ConfigError::Io {
        path: path.clone(),
        source,
    })?;
    let raw: Value = serde_json::from_str(&text).map_err(|source| ConfigError::Parse {
        path: path.clone(),
        source,
    })?;
    let typed: RawServerConfig =
        serde_json::from_value(raw.clone()).map_err(|source| ConfigError::Parse {
            path,
            source,
        })?;

    let timezone = match typed.timezone {
        Some(text) => parse_fixed_offset(&text).ok_or(ConfigError::BadTimezone(text))?,
        None => Local::now().offset().fix(),
    };

    let absolute = |p: PathBuf| {
        if p.is_absolute() {
            p
        } else {
            config_dir.join(p)
        }
    };

    Ok(ServerConfig {
        config_dir: config_dir.to_path_buf(),
        port: typed.port.unwrap_or(DEFAULT_PORT),
        smtp_host: typed.smtp_host.unwrap_or_else(|| "localhost".to_owned()),
        downloads: absolute(typed.downloads.unwrap_or_else(|| PathBuf::from("downloads"))),
        static_dir: absolute(typed.static_dir.unwrap_or_else(|| PathBuf::from("static"))),
        timezone,
        raw,
    })
}

/// Parses a `±hh:mm` offset, e.g. `-08:00`.
fn parse_fixed_offset(text: &str) -> Option<FixedOffset> {
    let (sign, rest) = match text.as_bytes().first()? {
        b'+' => (1, &text[1..]),
        b'-' => (-1, &text[1..]),
        _ => return None,
    };

    let (hours, minutes) = rest.split_once(':')?;
    let hours: i32 = hours.parse().ok().filter(|h| (0..=14).contains(h))?;
    let minutes: i32 = minutes.parse().ok().filter(|m| (0..60).contains(m))?;

    FixedOffset::east_opt(sign * (hours * 3600 + minutes * 60))
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;
    use serde_json::json;

    use super::*;

    fn write_config(dir: &Path, value: &Value) {
        std::fs::write(
            dir.join(SERVER_CONFIG_FILE),
            serde_json::to_string(value).unwrap(),
        )
        .unwrap();
    }

    #[test]
    fn loads_defaults_for_missing_fields() {
        let dir = tempfile::tempdir().unwrap();
        write_config(dir.path(), &json!({ "email_address": "home@example.com" }));

        let config = load_server_config(dir.path()).unwrap();
        assert_eq!(config.port, DEFAULT_PORT);
        assert_eq!(config.smtp_host, "localhost");
        assert_eq!(config.downloads, dir.path().join("downloads"));
        assert_eq!(config.static_dir, dir.path().join("static"));
        assert_eq!(config.raw["email_address"], json!("home@example.com"));
    }

    #[test]
    fn loads_explicit_fields() {
        let dir = tempfile::tempdir().unwrap();
        write_config(
            dir.path(),
            &json!({
                "port": 9090,
                "smtp_host": "mail.example.com",
                "downloads": "/srv/downloads",
                "timezone": "-08:00",
                "mystery_field": [1, 2, 3],
            }),
        );

        let config = load_server_config(dir.path()).unwrap();
        assert_eq!(config.port, 9090);
        assert_eq!(config.smtp_host, "mail.example.com");
        assert_eq!(config.downloads, PathBuf::from("/srv/downloads"));
        assert_eq!(
            config.timezone,
            FixedOffset::west_opt(8 * 3600).unwrap()
        );
    }

    #[test]
    fn rejects_bad_timezones() {
        let dir = tempfile::tempdir().unwrap();
        for bad in ["PST", "8:00", "+25:00", "-08:61"] {
            write_config(dir.path(), &json!({ "timezone": bad }));
            assert!(
                matches!(
                    load_server_config(dir.path()),
                    Err(ConfigError::BadTimezone(_))
                ),
                "accepted {:?}",
                bad
            );
        }
    }

    #[test]
    fn missing_file_is_an_io_error() {
        let dir = tempfile::tempdir().unwrap();
        assert!(matches!(
            load_server_config(dir.path()),
            Err(ConfigError::Io { .. })
        ));
    }
}
