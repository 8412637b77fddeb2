//! Transports for the desktop agent.
//!
//! Provides:
//! - Wire protocol (JSON, `type`-tagged)
//! - WebSocket connector (feature: websocket)
//! - HTTP pairing service (feature: pairing)

pub mod protocol;

#[cfg(feature = "websocket")]
pub mod websocket;

#[cfg(feature = "pairing")]
pub mod pairing;

use thiserror::Error;
use url::Url;

pub use protocol::{ClientMessage, ServerMessage};

#[cfg(feature = "pairing")]
pub use pairing::HttpPairingService;
#[cfg(feature = "websocket")]
pub use websocket::WebSocketConnector;

/// Endpoint configuration error.
#[derive(Debug, Error)]
pub enum EndpointError {
    #[error("Invalid endpoint URL: {0}")]
    InvalidUrl(String),
}

/// HTTP API base matching a WebSocket endpoint: same host and port,
/// `ws`→`http`, `wss`→`https`, path and query dropped.
///
/// # Errors
/// Returns an error if `ws_url` is not a `ws://` or `wss://` URL.
pub fn api_base_for(ws_url: &str) -> Result<Url, EndpointError> {
    let mut url = Url::parse(ws_url).map_err(|e| EndpointError::InvalidUrl(e.to_string()))?;
    let scheme = match url.scheme() {
        "ws" => "http",
        "wss" => "https",
        other => {
            return Err(EndpointError::InvalidUrl(format!(
                "expected ws:// or wss://, got {other}://"
            )));
        }
    };
    url.set_scheme(scheme)
        .map_err(|()| EndpointError::InvalidUrl(ws_url.to_string()))?;
    url.set_path("/");
    url.set_query(None);
    url.set_fragment(None);
    Ok(url)
}

/// Human label for the environment an endpoint points at.
#[must_use]
pub fn environment_label(ws_url: &str) -> &'static str {
    if ws_url.contains("sandbox") {
        "Sandbox"
    } else if ws_url.contains("localhost") || ws_url.contains("127.0.0.1") {
        "Local Dev"
    } else {
        "Production"
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_api_base_for() {
        assert_eq!(
            api_base_for("wss://api.thebeakr.com/v1/desktop-agent/ws")
                .unwrap()
                .as_str(),
            "https://api.thebeakr.com/"
        );
        assert_eq!(
            api_base_for("ws://localhost:8000/v1/desktop-agent/ws?x=1")
                .unwrap()
                .as_str(),
            "http://localhost:8000/"
        );
        assert!(api_base_for("https://example.com").is_err());
    }

    #[test]
    fn test_environment_label() {
        assert_eq!(environment_label("wss://sandbox.api.thebeakr.com/ws"), "Sandbox");
        assert_eq!(environment_label("ws://localhost:8000/ws"), "Local Dev");
        assert_eq!(environment_label("wss://api.thebeakr.com/ws"), "Production");
    }
}
