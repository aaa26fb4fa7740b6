// Конфигурация приложения: командная строка + переменные окружения

use crate::error::CallError;
use crate::peer::types::{ServerConfig, SessionId};
use crate::utils::random_id;
use clap::Parser;
use std::time::Duration;
use url::Url;

pub const DEFAULT_RELAY: &str = "ws://127.0.0.1:8080";

/// STUN серверы по умолчанию
pub const DEFAULT_ICE_SERVERS: [&str; 2] = [
    "stun:stun.l.google.com:19302",
    "stun:stun1.l.google.com:19302",
];

/// Фильтр логов, если `RUST_LOG` не задан
#[cfg(debug_assertions)]
pub const DEFAULT_LOG_FILTER: &str = "info,peercall_lib=debug,peercall=debug";

#[cfg(not(debug_assertions))]
pub const DEFAULT_LOG_FILTER: &str = "info";

#[derive(Debug, Parser)]
#[command(name = "peercall", version, about = "Two-party audio/video call over a signaling relay")]
pub struct Cli {
    /// Session id shared by both peers; used verbatim in the relay address
    pub session_id: String,

    /// Signaling relay base address
    #[arg(long, env = "PEERCALL_RELAY", default_value = DEFAULT_RELAY)]
    pub relay: String,

    /// ICE servers, comma separated. Entries without a scheme are STUN.
    #[arg(long = "ice", env = "PEERCALL_ICE_SERVERS", value_delimiter = ',')]
    pub ice: Vec<String>,

    #[arg(long, env = "PEERCALL_TURN_USERNAME")]
    pub turn_username: Option<String>,

    #[arg(long, env = "PEERCALL_TURN_CREDENTIAL")]
    pub turn_credential: Option<String>,

    /// Audio only
    #[arg(long)]
    pub no_video: bool,

    /// Keep-alive ping period of the signaling channel, seconds
    #[arg(long, default_value_t = 54)]
    pub ping_secs: u64,
}

/// Проверенная конфигурация звонка
#[derive(Debug, Clone)]
pub struct CallConfig {
    pub session_id: SessionId,
    pub relay: String,
    pub ice_servers: Vec<ServerConfig>,
    pub video: bool,
    pub ping_period: Duration,
}

impl CallConfig {
    pub fn from_cli(cli: Cli) -> Result<Self, CallError> {
        let session_id = SessionId::parse(&cli.session_id)?;

        let relay = Url::parse(&cli.relay)
            .map_err(|e| CallError::Config(format!("relay address {}: {e}", cli.relay)))?;
        if relay.scheme() != "ws" {
            return Err(CallError::Config(format!(
                "relay address must use ws://, got {}://",
                relay.scheme()
            )));
        }

        if cli.ping_secs == 0 {
            return Err(CallError::Config("ping period must be positive".into()));
        }

        let entries: Vec<&str> = cli
            .ice
            .iter()
            .map(|s| s.trim())
            .filter(|s| !s.is_empty())
            .collect();
        let ice_servers = if entries.is_empty() {
            default_ice_servers()
        } else {
            entries
                .into_iter()
                .map(|url| ice_server(url, &cli.turn_username, &cli.turn_credential))
                .collect()
        };
        validate_ice_servers(&ice_servers)?;

        Ok(Self {
            session_id,
            relay: cli.relay.trim_end_matches('/').to_string(),
            ice_servers,
            video: !cli.no_video,
            ping_period: Duration::from_secs(cli.ping_secs),
        })
    }
}

fn ice_server(url: &str, username: &Option<String>, credential: &Option<String>) -> ServerConfig {
    let turn = url.starts_with("turn:") || url.starts_with("turns:");
    ServerConfig {
        id: random_id(),
        r#type: if turn { "turn" } else { "stun" }.into(),
        url: url.to_string(),
        username: if turn { username.clone() } else { None },
        credential: if turn { credential.clone() } else { None },
    }
}

pub fn default_ice_servers() -> Vec<ServerConfig> {
    DEFAULT_ICE_SERVERS
        .iter()
        .enumerate()
        .map(|(i, url)| ServerConfig {
            id: format!("default-stun-{i}"),
            r#type: "stun".into(),
            url: (*url).to_string(),
            username: None,
            credential: None,
        })
        .collect()
}

/// Валидация серверов
pub fn validate_ice_servers(servers: &[ServerConfig]) -> Result<(), CallError> {
    for server in servers {
        if server.url.is_empty() {
            return Err(CallError::Config("ICE server URL cannot be empty".into()));
        }
        if server.r#type == "turn" && (server.username.is_none() || server.credential.is_none()) {
            return Err(CallError::Config(format!(
                "TURN server {} requires --turn-username and --turn-credential",
                server.url
            )));
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(args: &[&str]) -> Result<CallConfig, CallError> {
        let mut argv = vec!["peercall"];
        argv.extend_from_slice(args);
        CallConfig::from_cli(Cli::try_parse_from(argv).unwrap())
    }

    #[test]
    fn defaults() {
        let config = parse(&["room42"]).unwrap();
        assert_eq!(config.session_id.as_str(), "room42");
        assert_eq!(config.relay, DEFAULT_RELAY);
        assert!(config.video);
        assert_eq!(config.ping_period, Duration::from_secs(54));
        let urls: Vec<_> = config.ice_servers.iter().map(|s| s.url.as_str()).collect();
        assert_eq!(urls, DEFAULT_ICE_SERVERS);
    }

    #[test]
    fn empty_session_id_is_rejected() {
        assert!(matches!(parse(&[""]), Err(CallError::EmptySessionId)));
    }

    #[test]
    fn relay_must_be_websocket() {
        assert!(matches!(
            parse(&["room42", "--relay", "http://relay.example.org"]),
            Err(CallError::Config(_))
        ));
        assert!(matches!(
            parse(&["room42", "--relay", "not a url"]),
            Err(CallError::Config(_))
        ));
        let config = parse(&["room42", "--relay", "ws://relay.example.org:9000/"]).unwrap();
        assert_eq!(config.relay, "ws://relay.example.org:9000");
    }

    #[test]
    fn turn_needs_credentials() {
        assert!(matches!(
            parse(&["room42", "--ice", "turn:turn.example.org:3478"]),
            Err(CallError::Config(_))
        ));

        let config = parse(&[
            "room42",
            "--ice",
            "stun.example.org:3478,turn:turn.example.org:3478",
            "--turn-username",
            "alice",
            "--turn-credential",
            "secret",
        ])
        .unwrap();
        assert_eq!(config.ice_servers.len(), 2);
        assert_eq!(config.ice_servers[0].r#type, "stun");
        assert_eq!(config.ice_servers[0].username, None);
        assert_eq!(config.ice_servers[1].r#type, "turn");
        assert_eq!(config.ice_servers[1].username.as_deref(), Some("alice"));
    }

    #[test]
    fn audio_only_and_ping_period() {
        let config = parse(&["room42", "--no-video", "--ping-secs", "20"]).unwrap();
        assert!(!config.video);
        assert_eq!(config.ping_period, Duration::from_secs(20));
        assert!(matches!(
            parse(&["room42", "--ping-secs", "0"]),
            Err(CallError::Config(_))
        ));
    }
}
