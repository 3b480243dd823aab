//! Client configuration.
//!
//! A [`ClientConfig`] can be built three ways:
//! - fluently through [`ClientBuilder`](crate::ClientBuilder)
//! - from ADBC-style string options ([`ClientConfig::from_options`])
//! - from JSON ([`ClientConfig::from_json`])
//!
//! # Example
//!
//! ```
//! use cube_native_client::ClientConfig;
//!
//! let config = ClientConfig::from_options([
//!     ("uri", "cube.internal:4445"),
//!     ("adbc.cube.token", "secret"),
//! ])
//! .unwrap();
//! assert_eq!(config.host, "cube.internal");
//! assert_eq!(config.token.as_deref(), Some("secret"));
//! ```

use std::time::Duration;

use serde::{Deserialize, Deserializer};

use crate::error::{CubeError, Result};
use crate::ipc::{ChunkLayout, ReassemblerConfig, DEFAULT_MAX_BODY_LENGTH};
use crate::protocol::{DEFAULT_MAX_FRAME_LENGTH, PROTOCOL_VERSION};

/// Default Arrow Native port.
pub const DEFAULT_PORT: u16 = 4445;

/// Default host.
pub const DEFAULT_HOST: &str = "localhost";

/// Default connect timeout.
pub const DEFAULT_CONNECT_TIMEOUT: Duration = Duration::from_secs(10);

/// ADBC option keys.
pub mod options {
    pub const HOST: &str = "adbc.cube.host";
    pub const PORT: &str = "adbc.cube.port";
    pub const TOKEN: &str = "adbc.cube.token";
    pub const DATABASE: &str = "adbc.cube.database";
    pub const USER: &str = "adbc.cube.user";
    pub const PASSWORD: &str = "adbc.cube.password";
    /// Only `native` (alias `arrow_native`) is supported.
    pub const CONNECTION_MODE: &str = "adbc.cube.connection_mode";
    /// `host:port`.
    pub const URI: &str = "uri";
}

/// Connection and protocol settings.
#[derive(Debug, Clone, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ClientConfig {
    pub host: String,
    pub port: u16,
    /// Bearer token sent in the `Auth` message.
    pub token: Option<String>,
    pub database: Option<String>,
    /// Accepted for ADBC compatibility; the `Auth` message only carries the
    /// token.
    pub user: Option<String>,
    pub password: Option<String>,
    /// Version sent in the `Handshake` message.
    pub handshake_version: u32,
    /// Ceiling for a frame's declared length.
    pub max_frame_length: u32,
    /// Ceiling for a single Arrow IPC chunk body.
    pub max_body_length: u32,
    pub chunk_layout: ChunkLayout,
    /// Fail a query whose result lacks the end-of-stream marker.
    pub require_end_of_stream: bool,
    #[serde(rename = "connect_timeout_ms", deserialize_with = "millis")]
    pub connect_timeout: Option<Duration>,
    /// Deadline per frame read or write. `None` waits forever.
    #[serde(rename = "io_timeout_ms", deserialize_with = "millis")]
    pub io_timeout: Option<Duration>,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            host: DEFAULT_HOST.to_string(),
            port: DEFAULT_PORT,
            token: None,
            database: None,
            user: None,
            password: None,
            handshake_version: PROTOCOL_VERSION,
            max_frame_length: DEFAULT_MAX_FRAME_LENGTH,
            max_body_length: DEFAULT_MAX_BODY_LENGTH,
            chunk_layout: ChunkLayout::default(),
            require_end_of_stream: true,
            connect_timeout: Some(DEFAULT_CONNECT_TIMEOUT),
            io_timeout: None,
        }
    }
}

impl ClientConfig {
    /// Build from ADBC-style key/value options.
    ///
    /// `uri` is applied first so explicit host/port keys win over it.
    /// Unknown keys are rejected.
    pub fn from_options<I, K, V>(options: I) -> Result<Self>
    where
        I: IntoIterator<Item = (K, V)>,
        K: AsRef<str>,
        V: AsRef<str>,
    {
        let mut pairs: Vec<(String, String)> = options
            .into_iter()
            .map(|(k, v)| (k.as_ref().to_string(), v.as_ref().to_string()))
            .collect();
        pairs.sort_by_key(|(key, _)| key != options::URI);

        let mut config = Self::default();
        for (key, value) in pairs {
            config.set_option(&key, &value)?;
        }
        Ok(config)
    }

    /// Apply a single ADBC option.
    pub fn set_option(&mut self, key: &str, value: &str) -> Result<()> {
        match key {
            options::HOST => self.host = non_empty(key, value)?.to_string(),
            options::PORT => self.port = parse_port(value)?,
            options::TOKEN => self.token = Some(value.to_string()),
            options::DATABASE => self.database = Some(value.to_string()),
            options::USER => self.user = Some(value.to_string()),
            options::PASSWORD => self.password = Some(value.to_string()),
            options::CONNECTION_MODE => check_connection_mode(value)?,
            options::URI => {
                let (host, port) = parse_uri(value)?;
                self.host = host.to_string();
                self.port = port;
            }
            other => return Err(CubeError::Config(format!("unknown option '{other}'"))),
        }
        Ok(())
    }

    /// Parse a JSON configuration document.
    pub fn from_json(json: &str) -> Result<Self> {
        let config: Self =
            serde_json::from_str(json).map_err(|e| CubeError::Config(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    /// Check limits are usable.
    pub fn validate(&self) -> Result<()> {
        if self.host.is_empty() {
            return Err(CubeError::Config("host must not be empty".to_string()));
        }
        if self.max_frame_length == 0 {
            return Err(CubeError::Config(
                "max_frame_length must be positive".to_string(),
            ));
        }
        if self.max_body_length == 0 {
            return Err(CubeError::Config(
                "max_body_length must be positive".to_string(),
            ));
        }
        Ok(())
    }

    /// Reassembler settings derived from this config.
    pub fn reassembler(&self) -> ReassemblerConfig {
        ReassemblerConfig {
            layout: self.chunk_layout,
            max_body_length: self.max_body_length,
            require_end_of_stream: self.require_end_of_stream,
        }
    }
}

fn non_empty<'a>(key: &str, value: &'a str) -> Result<&'a str> {
    if value.is_empty() {
        return Err(CubeError::Config(format!("option '{key}' must not be empty")));
    }
    Ok(value)
}

fn check_connection_mode(value: &str) -> Result<()> {
    match value.to_ascii_lowercase().as_str() {
        "native" | "arrow_native" => Ok(()),
        _ => Err(CubeError::Config(format!(
            "unsupported connection mode '{value}', expected 'native'"
        ))),
    }
}

fn parse_port(value: &str) -> Result<u16> {
    value
        .parse::<u16>()
        .ok()
        .filter(|port| *port != 0)
        .ok_or_else(|| CubeError::Config(format!("invalid port '{value}'")))
}

/// Split `host:port`. Bracketed IPv6 hosts (`[::1]:4445`) are accepted.
fn parse_uri(uri: &str) -> Result<(&str, u16)> {
    let invalid = || CubeError::Config(format!("invalid uri '{uri}', expected host:port"));

    let (host, port) = uri.rsplit_once(':').ok_or_else(invalid)?;
    let host = host
        .strip_prefix('[')
        .and_then(|h| h.strip_suffix(']'))
        .unwrap_or(host);
    if host.is_empty() {
        return Err(invalid());
    }
    Ok((host, parse_port(port)?))
}

fn millis<'de, D>(deserializer: D) -> std::result::Result<Option<Duration>, D::Error>
where
    D: Deserializer<'de>,
{
    Ok(Option::<u64>::deserialize(deserializer)?.map(Duration::from_millis))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = ClientConfig::default();
        assert_eq!(config.host, "localhost");
        assert_eq!(config.port, 4445);
        assert_eq!(config.handshake_version, 1);
        assert_eq!(config.max_frame_length, 256 * 1024 * 1024);
        assert_eq!(config.chunk_layout, ChunkLayout::ArrowMessage);
        assert!(config.require_end_of_stream);
        assert!(config.io_timeout.is_none());
    }

    #[test]
    fn test_from_options() {
        let config = ClientConfig::from_options([
            ("adbc.cube.host", "db.example"),
            ("adbc.cube.port", "5000"),
            ("adbc.cube.token", "abc"),
            ("adbc.cube.database", "analytics"),
        ])
        .unwrap();

        assert_eq!(config.host, "db.example");
        assert_eq!(config.port, 5000);
        assert_eq!(config.token.as_deref(), Some("abc"));
        assert_eq!(config.database.as_deref(), Some("analytics"));
    }

    #[test]
    fn test_from_driver_options() {
        let config = ClientConfig::from_options([
            ("adbc.cube.host", "localhost"),
            ("adbc.cube.port", "4445"),
            ("adbc.cube.connection_mode", "native"),
            ("adbc.cube.database", "db"),
            ("adbc.cube.token", "tok"),
            ("adbc.cube.user", "root"),
            ("adbc.cube.password", "pw"),
        ])
        .unwrap();

        assert_eq!(config.token.as_deref(), Some("tok"));
        assert_eq!(config.user.as_deref(), Some("root"));
        assert_eq!(config.password.as_deref(), Some("pw"));

        assert!(ClientConfig::from_options([("adbc.cube.connection_mode", "ARROW_NATIVE")]).is_ok());
    }

    #[test]
    fn test_postgres_connection_mode_rejected() {
        let err = ClientConfig::from_options([("adbc.cube.connection_mode", "postgresql")])
            .unwrap_err();
        assert!(matches!(err, CubeError::Config(ref m) if m.contains("postgresql")));
    }

    #[test]
    fn test_explicit_port_overrides_uri() {
        let config =
            ClientConfig::from_options([("adbc.cube.port", "7000"), ("uri", "localhost:4445")])
                .unwrap();
        assert_eq!(config.port, 7000);
        assert_eq!(config.host, "localhost");
    }

    #[test]
    fn test_uri_ipv6() {
        let config = ClientConfig::from_options([("uri", "[::1]:4445")]).unwrap();
        assert_eq!(config.host, "::1");
    }

    #[test]
    fn test_invalid_options() {
        assert!(ClientConfig::from_options([("uri", "localhost")]).is_err());
        assert!(ClientConfig::from_options([("adbc.cube.port", "0")]).is_err());
        assert!(ClientConfig::from_options([("adbc.cube.port", "99999")]).is_err());
        assert!(ClientConfig::from_options([("adbc.cube.host", "")]).is_err());

        let err = ClientConfig::from_options([("adbc.cube.colour", "blue")]).unwrap_err();
        assert!(err.to_string().contains("adbc.cube.colour"));
    }

    #[test]
    fn test_from_json() {
        let config = ClientConfig::from_json(
            r#"{
                "host": "cube",
                "token": "t",
                "chunk_layout": "opaque",
                "io_timeout_ms": 1500
            }"#,
        )
        .unwrap();

        assert_eq!(config.host, "cube");
        assert_eq!(config.port, DEFAULT_PORT);
        assert_eq!(config.chunk_layout, ChunkLayout::Opaque);
        assert_eq!(config.io_timeout, Some(Duration::from_millis(1500)));
        assert_eq!(config.connect_timeout, Some(DEFAULT_CONNECT_TIMEOUT));
    }

    #[test]
    fn test_from_json_rejects_bad_values() {
        assert!(ClientConfig::from_json(r#"{"max_frame_length": 0}"#).is_err());
        assert!(ClientConfig::from_json(r#"{"hots": "typo"}"#).is_err());
    }

    #[test]
    fn test_reassembler_settings() {
        let config = ClientConfig {
            require_end_of_stream: false,
            max_body_length: 1024,
            ..ClientConfig::default()
        };
        let settings = config.reassembler();
        assert!(!settings.require_end_of_stream);
        assert_eq!(settings.max_body_length, 1024);
    }
}
