use async_trait::async_trait;
use futures::{Sink, Stream};
use tokio_tungstenite::tungstenite::{handshake::client::generate_key, Message};

use crate::error::Error;

pub type WsError = tokio_tungstenite::tungstenite::Error;

/// A connected websocket: both a source of inbound messages and a sink for the rare
/// outbound frame (explicit close). Anything satisfying this (e.g. a split
/// `tokio-tungstenite` `WebSocketStream`, or a test double) can back a [`Connector`].
pub trait WsConnection:
    Stream<Item = Result<Message, WsError>> + Sink<Message, Error = WsError> + Send + Unpin
{
}

impl<T> WsConnection for T where
    T: Stream<Item = Result<Message, WsError>> + Sink<Message, Error = WsError> + Send + Unpin
{
}

pub type BoxedWsConnection = Box<dyn WsConnection>;

/// Pluggable collaborator: `(url, headers) -> connected socket`. The default
/// implementation ([`TungsteniteConnector`]) wraps `tokio-tungstenite`; callers may
/// supply their own for testing or for platforms with a different websocket stack.
#[async_trait]
pub trait Connector: Send + Sync {
    async fn connect(
        &self,
        url: &str,
        headers: &[(String, String)],
    ) -> Result<BoxedWsConnection, Error>;
}

/// Default [`Connector`] backed by `tokio-tungstenite`.
#[derive(Debug, Default, Clone, Copy)]
pub struct TungsteniteConnector;

#[async_trait]
impl Connector for TungsteniteConnector {
    async fn connect(
        &self,
        url: &str,
        headers: &[(String, String)],
    ) -> Result<BoxedWsConnection, Error> {
        use tokio_tungstenite::tungstenite::client::IntoClientRequest;

        let mut request = url
            .into_client_request()
            .map_err(|e| Error::Connect(format!("invalid tail url {url}: {e}")))?;
        // `into_client_request` doesn't set Sec-WebSocket-Key on all versions; make sure
        // it's present so non-browser peers that check it strictly are satisfied.
        request
            .headers_mut()
            .entry("Sec-WebSocket-Key")
            .or_insert_with(|| generate_key().parse().expect("generated key is valid"));
        for (name, value) in headers {
            let header_name: tokio_tungstenite::tungstenite::http::HeaderName =
                name.parse().map_err(|_| {
                    Error::Connect(format!("invalid header name in connect headers: {name}"))
                })?;
            let header_value = value
                .parse()
                .map_err(|_| Error::Connect(format!("invalid header value for {name}")))?;
            request.headers_mut().insert(header_name, header_value);
        }

        let (stream, _response) = tokio_tungstenite::connect_async(request).await?;
        Ok(Box::new(stream))
    }
}
