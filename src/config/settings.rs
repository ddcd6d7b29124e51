use serde::Deserialize;

use crate::messages::LatencyMode;

/// Top-level configuration settings for the application.
#[derive(Debug, Deserialize, Clone, PartialEq)]
pub struct Settings {
    pub server: ServerSettings,
    pub auth: AuthSettings,
    pub database: DatabaseSettings,
    pub session: SessionSettings,
    pub log: LogSettings,
}

/// Whether the token endpoint binds its own listener or is served by an
/// outer process that embeds the router.
#[derive(Debug, Deserialize, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum ListenMode {
    Direct,
    Fronted,
}

/// HTTP listener for the token endpoint.
#[derive(Debug, Deserialize, Clone, PartialEq)]
pub struct ServerSettings {
    pub host: String,
    pub port: u16,
    pub mode: ListenMode,
}

/// Token issuance: where clients find it, who may call it, and how tokens
/// are signed.
#[derive(Debug, Deserialize, Clone, PartialEq)]
pub struct AuthSettings {
    pub backend_url: String,
    pub allowed_origins: Vec<String>,
    pub token_secret: String,
    pub token_ttl_secs: u64,
}

/// Recognized for deployments that run an auxiliary store; nothing in the
/// session core reads it.
#[derive(Debug, Deserialize, Clone, PartialEq, Default)]
pub struct DatabaseSettings {
    pub uri: Option<String>,
}

#[derive(Debug, Deserialize, Clone, PartialEq)]
pub struct SessionSettings {
    pub channel_prefix: String,
    pub ping_interval_ms: u64,
    pub probe_timeout_ms: u64,
    pub connect_timeout_ms: u64,
    pub latency_mode: LatencyMode,
}

#[derive(Debug, Deserialize, Clone, PartialEq)]
pub struct LogSettings {
    pub level: String,
}

/// Partial configuration loaded from files or environment. Missing values
/// are filled from `Settings::default()`.
#[derive(Debug, Deserialize, Default)]
pub struct PartialSettings {
    pub server: Option<PartialServerSettings>,
    pub auth: Option<PartialAuthSettings>,
    pub database: Option<PartialDatabaseSettings>,
    pub session: Option<PartialSessionSettings>,
    pub log: Option<PartialLogSettings>,
}

#[derive(Debug, Deserialize)]
pub struct PartialServerSettings {
    pub host: Option<String>,
    pub port: Option<u16>,
    pub mode: Option<ListenMode>,
}

#[derive(Debug, Deserialize)]
pub struct PartialAuthSettings {
    pub backend_url: Option<String>,
    pub allowed_origins: Option<Vec<String>>,
    pub token_secret: Option<String>,
    pub token_ttl_secs: Option<u64>,
}

#[derive(Debug, Deserialize)]
pub struct PartialDatabaseSettings {
    pub uri: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct PartialSessionSettings {
    pub channel_prefix: Option<String>,
    pub ping_interval_ms: Option<u64>,
    pub probe_timeout_ms: Option<u64>,
    pub connect_timeout_ms: Option<u64>,
    pub latency_mode: Option<LatencyMode>,
}

#[derive(Debug, Deserialize)]
pub struct PartialLogSettings {
    pub level: Option<String>,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            server: ServerSettings {
                host: "127.0.0.1".to_string(),
                port: 7000,
                mode: ListenMode::Direct,
            },
            auth: AuthSettings {
                backend_url: "http://localhost:7000".to_string(),
                allowed_origins: vec!["http://localhost:5173".to_string()],
                token_secret: "roomlink-dev-secret".to_string(),
                token_ttl_secs: 3600,
            },
            database: DatabaseSettings::default(),
            session: SessionSettings {
                channel_prefix: "chat:".to_string(),
                ping_interval_ms: 5000,
                probe_timeout_ms: 3000,
                connect_timeout_ms: 10_000,
                latency_mode: LatencyMode::SenderEmbedded,
            },
            log: LogSettings {
                level: "info".to_string(),
            },
        }
    }
}

impl PartialSettings {
    /// Overlay the values that were provided onto `default`.
    pub fn merge_onto(self, default: Settings) -> Settings {
        let server = self.server;
        let auth = self.auth;
        let session = self.session;

        Settings {
            server: ServerSettings {
                host: server
                    .as_ref()
                    .and_then(|s| s.host.clone())
                    .unwrap_or(default.server.host),
                port: server
                    .as_ref()
                    .and_then(|s| s.port)
                    .unwrap_or(default.server.port),
                mode: server
                    .as_ref()
                    .and_then(|s| s.mode)
                    .unwrap_or(default.server.mode),
            },
            auth: AuthSettings {
                backend_url: auth
                    .as_ref()
                    .and_then(|a| a.backend_url.clone())
                    .unwrap_or(default.auth.backend_url),
                allowed_origins: auth
                    .as_ref()
                    .and_then(|a| a.allowed_origins.clone())
                    .unwrap_or(default.auth.allowed_origins),
                token_secret: auth
                    .as_ref()
                    .and_then(|a| a.token_secret.clone())
                    .unwrap_or(default.auth.token_secret),
                token_ttl_secs: auth
                    .as_ref()
                    .and_then(|a| a.token_ttl_secs)
                    .unwrap_or(default.auth.token_ttl_secs),
            },
            database: DatabaseSettings {
                uri: self
                    .database
                    .and_then(|d| d.uri)
                    .or(default.database.uri),
            },
            session: SessionSettings {
                channel_prefix: session
                    .as_ref()
                    .and_then(|s| s.channel_prefix.clone())
                    .unwrap_or(default.session.channel_prefix),
                ping_interval_ms: session
                    .as_ref()
                    .and_then(|s| s.ping_interval_ms)
                    .unwrap_or(default.session.ping_interval_ms),
                probe_timeout_ms: session
                    .as_ref()
                    .and_then(|s| s.probe_timeout_ms)
                    .unwrap_or(default.session.probe_timeout_ms),
                connect_timeout_ms: session
                    .as_ref()
                    .and_then(|s| s.connect_timeout_ms)
                    .unwrap_or(default.session.connect_timeout_ms),
                latency_mode: session
                    .as_ref()
                    .and_then(|s| s.latency_mode)
                    .unwrap_or(default.session.latency_mode),
            },
            log: LogSettings {
                level: self
                    .log
                    .and_then(|l| l.level)
                    .unwrap_or(default.log.level),
            },
        }
    }
}
