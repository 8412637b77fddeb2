//! WebSocket connector to the service.

use async_trait::async_trait;
use desktop_agent_core::{
    CloseReason, Connector, Credential, Established, HandshakeError, Inbound, Link, Outbound,
    Registration, ToolError, TransportError,
};
use futures::{
    SinkExt, StreamExt,
    stream::{SplitSink, SplitStream},
};
use tokio::net::TcpStream;
use tokio_tungstenite::{
    MaybeTlsStream, WebSocketStream, connect_async,
    tungstenite::{self, Message, client::IntoClientRequest, http::HeaderValue},
};
use url::Url;

use crate::{
    EndpointError,
    protocol::{ClientMessage, ServerMessage},
};

/// Subprotocol announced alongside the bearer token.
pub const SUBPROTOCOL: &str = "beakr-v1";

/// Query parameters the service accepts in place of a token in development.
const DEV_IDENTITY: &[(&str, &str)] = &[
    ("identity_id", "dev_local"),
    ("email", "dev@localhost"),
    ("identity_name", "dev"),
    ("display_name", "Dev User"),
];

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;

/// Opens authenticated WebSocket connections and performs registration.
///
/// The token travels in `Sec-WebSocket-Protocol` as
/// `beakr-v1, bearer.<token>`. With the development identity enabled and no
/// credential, the development query parameters are sent instead.
#[derive(Debug, Clone)]
pub struct WebSocketConnector {
    url: Url,
    user_agent: String,
    development: bool,
}

impl WebSocketConnector {
    /// Create a connector for a `ws://` or `wss://` endpoint.
    ///
    /// # Errors
    /// Returns an error if the URL does not parse or has another scheme.
    pub fn new(url: &str) -> Result<Self, EndpointError> {
        let url = Url::parse(url).map_err(|e| EndpointError::InvalidUrl(format!("{url}: {e}")))?;
        if url.scheme() != "ws" && url.scheme() != "wss" {
            return Err(EndpointError::InvalidUrl(format!(
                "URL must use ws:// or wss:// scheme, got: {}",
                url.scheme()
            )));
        }
        Ok(Self {
            url,
            user_agent: format!("DesktopAgent/{}", env!("CARGO_PKG_VERSION")),
            development: false,
        })
    }

    /// Fall back to the development identity when no credential is supplied.
    #[must_use]
    pub const fn with_development_identity(mut self, enabled: bool) -> Self {
        self.development = enabled;
        self
    }

    #[must_use]
    pub fn with_user_agent(mut self, user_agent: impl Into<String>) -> Self {
        self.user_agent = user_agent.into();
        self
    }

    #[must_use]
    pub const fn url(&self) -> &Url {
        &self.url
    }

    /// URL used when connecting without a credential.
    #[must_use]
    pub fn development_url(&self) -> Url {
        let mut url = self.url.clone();
        url.query_pairs_mut().extend_pairs(DEV_IDENTITY);
        url
    }

    fn build_request(
        &self,
        credential: Option<&Credential>,
    ) -> Result<tungstenite::handshake::client::Request, HandshakeError> {
        let (url, protocol) = match credential {
            Some(credential) => (
                self.url.clone(),
                Some(format!("{SUBPROTOCOL}, bearer.{}", credential.token())),
            ),
            None if self.development => (self.development_url(), None),
            None => return Err(HandshakeError::MissingCredential),
        };

        let mut request = url
            .as_str()
            .into_client_request()
            .map_err(|e| HandshakeError::Protocol(e.to_string()))?;
        let headers = request.headers_mut();
        if let Some(protocol) = protocol {
            headers.insert(
                "Sec-WebSocket-Protocol",
                HeaderValue::from_str(&protocol).map_err(|_| {
                    HandshakeError::Protocol("token is not a valid header value".into())
                })?,
            );
        }
        headers.insert(
            "User-Agent",
            HeaderValue::from_str(&self.user_agent)
                .map_err(|e| HandshakeError::Protocol(e.to_string()))?,
        );
        Ok(request)
    }
}

#[async_trait]
impl Connector for WebSocketConnector {
    async fn open(
        &self,
        credential: Option<&Credential>,
        registration: &Registration,
    ) -> Result<Established, HandshakeError> {
        let request = self.build_request(credential)?;
        tracing::debug!(url = %self.url, "opening websocket");

        let (ws, _response) = connect_async(request).await.map_err(classify_connect_error)?;
        let (mut sink, mut stream) = ws.split();

        send_json(&mut sink, &ClientMessage::register(registration))
            .await
            .map_err(|e| HandshakeError::Network(e.to_string()))?;

        loop {
            let frame = match stream.next().await {
                Some(Ok(frame)) => frame,
                Some(Err(e)) => return Err(HandshakeError::Network(e.to_string())),
                None => {
                    return Err(HandshakeError::Network(
                        "connection closed before registration".into(),
                    ));
                }
            };

            match frame {
                // Check close frames before parsing: their reason text is not JSON.
                Message::Close(frame) => {
                    let code = frame.as_ref().map(|f| u16::from(f.code));
                    tracing::info!(?code, "server closed connection during registration");
                    return Err(match CloseReason::from_code(code) {
                        CloseReason::Revoked => HandshakeError::Rejected("device revoked".into()),
                        CloseReason::SessionExpired => HandshakeError::SessionExpired,
                        _ => HandshakeError::Network(format!(
                            "closed during registration (code {code:?})"
                        )),
                    });
                }
                Message::Text(text) => match serde_json::from_str::<ServerMessage>(&text) {
                    Ok(ServerMessage::Registered { device_id }) => {
                        return Ok(Established {
                            device_id,
                            link: Box::new(WebSocketLink {
                                sink,
                                stream,
                                closed: None,
                            }),
                        });
                    }
                    Ok(ServerMessage::Request { request_id, tool, .. }) => {
                        tracing::warn!(%request_id, %tool, "request before registration, rejecting");
                        let reply = ClientMessage::response(request_id, Err(ToolError::NotReady));
                        send_json(&mut sink, &reply)
                            .await
                            .map_err(|e| HandshakeError::Network(e.to_string()))?;
                    }
                    Err(e) => {
                        return Err(HandshakeError::Protocol(format!(
                            "Failed to parse registration response: {e} (raw: {text:?})"
                        )));
                    }
                },
                _ => {}
            }
        }
    }
}

/// Map an upgrade failure to a handshake error. 401/403 mean the credential
/// was refused; everything else is worth retrying.
fn classify_connect_error(error: tungstenite::Error) -> HandshakeError {
    match error {
        tungstenite::Error::Http(response) => {
            let status = response.status();
            if status == 401 || status == 403 {
                HandshakeError::Rejected(format!("HTTP {status}"))
            } else {
                HandshakeError::Network(format!("HTTP {status}"))
            }
        }
        other => HandshakeError::Network(other.to_string()),
    }
}

async fn send_json(
    sink: &mut SplitSink<WsStream, Message>,
    message: &ClientMessage,
) -> Result<(), TransportError> {
    let json = serde_json::to_string(message)?;
    sink.send(Message::Text(json))
        .await
        .map_err(|e| TransportError::Network(e.to_string()))
}

/// A registered WebSocket connection.
struct WebSocketLink {
    sink: SplitSink<WsStream, Message>,
    stream: SplitStream<WsStream>,
    closed: Option<CloseReason>,
}

impl WebSocketLink {
    fn mark_closed(&mut self, reason: CloseReason) -> Inbound {
        self.closed = Some(reason.clone());
        Inbound::Closed(reason)
    }
}

#[async_trait]
impl Link for WebSocketLink {
    async fn send(&mut self, frame: Outbound) -> Result<(), TransportError> {
        if self.closed.is_some() {
            return Err(TransportError::Closed);
        }
        send_json(&mut self.sink, &ClientMessage::from(frame)).await
    }

    async fn recv(&mut self) -> Inbound {
        if let Some(reason) = &self.closed {
            return Inbound::Closed(reason.clone());
        }

        loop {
            match self.stream.next().await {
                Some(Ok(Message::Text(text))) => {
                    match serde_json::from_str::<ServerMessage>(&text) {
                        Ok(message) => match message.into_request() {
                            Some(request) => return Inbound::Request(request),
                            None => {
                                tracing::warn!("Unexpected 'registered' message on live link");
                            }
                        },
                        Err(e) => tracing::warn!("Failed to parse incoming message: {e}"),
                    }
                }
                Some(Ok(Message::Close(frame))) => {
                    let code = frame.as_ref().map(|f| u16::from(f.code));
                    tracing::info!(?code, "websocket closed by server");
                    return self.mark_closed(CloseReason::from_code(code));
                }
                Some(Ok(_)) => {}
                Some(Err(e)) => {
                    tracing::error!("WebSocket read error: {e}");
                    return self.mark_closed(CloseReason::Error(e.to_string()));
                }
                None => return self.mark_closed(CloseReason::Error("stream ended".into())),
            }
        }
    }

    async fn close(&mut self) {
        let _ = self.sink.send(Message::Close(None)).await;
        let _ = self.sink.close().await;
        self.closed = Some(CloseReason::Normal(None));
    }
}
