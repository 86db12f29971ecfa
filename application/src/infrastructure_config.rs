use serde::{Deserialize, Serialize};
use url::Url;

use domain::coords::CanvasSize;
use domain::participant::MAX_USERNAME_BYTES;

use crate::error::{AppError, AppResult};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    pub session: SessionConfig,
    pub canvas: CanvasConfig,
    pub client: ClientConfig,
    pub logging: LoggingConfig,
    pub environment: EnvironmentConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionConfig {
    /// Base endpoint of the relay, e.g. `wss://example.net`. The client
    /// appends `/collaborate/{session_id}/ws`.
    pub ws_base_url: String,
    pub session_id: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CanvasConfig {
    pub width: u16,
    pub height: u16,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClientConfig {
    /// Session-scoped identity; generated when absent.
    pub user_id: Option<String>,
    pub username: String,
    pub flip_horizontal: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    pub level: String,
    pub format: LogFormat,
    pub include_location: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EnvironmentConfig {
    pub env: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum LogFormat {
    #[serde(rename = "json")]
    Json,
    #[serde(rename = "pretty")]
    Pretty,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            session: SessionConfig {
                ws_base_url: "ws://localhost:8080".to_string(),
                session_id: "local".to_string(),
            },
            canvas: CanvasConfig {
                width: 800,
                height: 600,
            },
            client: ClientConfig {
                user_id: None,
                username: "anonymous".to_string(),
                flip_horizontal: false,
            },
            logging: LoggingConfig {
                level: "info".to_string(),
                format: LogFormat::Pretty,
                include_location: false,
            },
            environment: EnvironmentConfig {
                env: "development".to_string(),
            },
        }
    }
}

impl Config {
    pub fn validate(&self) -> AppResult<()> {
        let parsed = Url::parse(&self.session.ws_base_url).map_err(|e| AppError::Config {
            message: format!("Invalid ws_base_url: {e}"),
        })?;
        if !matches!(parsed.scheme(), "ws" | "wss") {
            return Err(AppError::Config {
                message: format!("ws_base_url must use ws:// or wss://, got {}", parsed.scheme()),
            });
        }
        if self.session.session_id.is_empty() {
            return Err(AppError::Config {
                message: "session_id must not be empty".to_string(),
            });
        }
        self.canvas_size().validate()?;
        if self.client.username.len() > MAX_USERNAME_BYTES {
            return Err(AppError::Config {
                message: format!("username exceeds {MAX_USERNAME_BYTES} bytes"),
            });
        }
        Ok(())
    }

    #[must_use]
    pub fn canvas_size(&self) -> CanvasSize {
        CanvasSize::new(self.canvas.width, self.canvas.height)
    }

    #[must_use]
    pub fn session_url(&self) -> String {
        format!(
            "{}/collaborate/{}/ws",
            self.session.ws_base_url.trim_end_matches('/'),
            self.session.session_id
        )
    }
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used, clippy::indexing_slicing, clippy::panic)]

    use super::*;

    #[test]
    fn default_config_validates() {
        let config = Config::default();
        config.validate().unwrap();
        assert_eq!(config.session_url(), "ws://localhost:8080/collaborate/local/ws");
    }

    #[test]
    fn rejects_http_scheme() {
        let mut config = Config::default();
        config.session.ws_base_url = "http://localhost".to_string();
        assert!(config.validate().is_err());
    }

    #[test]
    fn rejects_oversized_username() {
        let mut config = Config::default();
        config.client.username = "x".repeat(65);
        assert!(config.validate().is_err());
    }
}
