//! HTTP/1.1 upgrade exchange that opens a chat connection.
//!
//! The client sends `GET /chat?name=<name>&id=<id>` with a random
//! `Sec-WebSocket-Key`; the server answers `101 Switching Protocols` with
//! `Sec-WebSocket-Accept` set to `base64(SHA-1(key + GUID))`. After that the
//! socket carries frames only.

use base64::{Engine as _, engine::general_purpose::STANDARD};
use bytes::Bytes;
use http::{
    Method, Request, Response, StatusCode,
    header::{
        CONNECTION, HOST, HeaderMap, HeaderName, HeaderValue, SEC_WEBSOCKET_ACCEPT,
        SEC_WEBSOCKET_KEY, SEC_WEBSOCKET_PROTOCOL, UPGRADE,
    },
};
use http_body_util::{Empty, Full};
use hyper::upgrade::Upgraded;
use hyper_util::rt::TokioIo;
use sha1::{Digest, Sha1};
use tokio::net::TcpStream;
use tracing::debug;
use url::form_urlencoded;

use crate::{error::HandshakeError, message::Identity};

pub const WEBSOCKET_GUID: &str = "258EAFA5-E914-47DA-95CA-C5AB0DC85B11";

/// The only path the server upgrades.
pub const CHAT_PATH: &str = "/chat";

pub const CHAT_PROTOCOL: &str = "chat";

/// The socket left behind by a successful upgrade.
pub type UpgradedIo = TokioIo<Upgraded>;

/// `base64(SHA-1(key + GUID))`.
pub fn accept_key(key: &str) -> String {
    let mut hasher = Sha1::new();
    hasher.update(key.as_bytes());
    hasher.update(WEBSOCKET_GUID.as_bytes());
    STANDARD.encode(hasher.finalize())
}

/// 16 random bytes, base64 encoded.
pub fn generate_key() -> String {
    STANDARD.encode(rand::random::<[u8; 16]>())
}

/// A validated upgrade request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UpgradeRequest {
    pub key: String,
    pub identity: Identity,
    pub wants_chat_protocol: bool,
}

/// Checks an incoming upgrade request and extracts the caller's identity.
pub fn parse_upgrade_request<B>(request: &Request<B>) -> Result<UpgradeRequest, HandshakeError> {
    let path = request.uri().path();
    if path != CHAT_PATH {
        return Err(HandshakeError::UnknownPath(path.to_string()));
    }

    let key = request
        .headers()
        .get(SEC_WEBSOCKET_KEY)
        .and_then(|value| value.to_str().ok())
        .map(str::trim)
        .filter(|key| !key.is_empty())
        .ok_or(HandshakeError::MissingKey)?
        .to_string();

    let mut name = None;
    let mut id = None;
    let query = request.uri().query().unwrap_or_default();
    for (field, value) in form_urlencoded::parse(query.as_bytes()) {
        match field.as_ref() {
            "name" => name = Some(value.into_owned()),
            "id" => id = Some(value.into_owned()),
            _ => {}
        }
    }
    let name = name.ok_or(HandshakeError::MissingIdentity("name"))?;
    let id = id.ok_or(HandshakeError::MissingIdentity("id"))?;

    let wants_chat_protocol = request
        .headers()
        .get(SEC_WEBSOCKET_PROTOCOL)
        .is_some_and(|value| header_has_token(value, CHAT_PROTOCOL));

    Ok(UpgradeRequest {
        key,
        identity: Identity::new(name, id)?,
        wants_chat_protocol,
    })
}

/// The `101 Switching Protocols` answer to a validated request.
pub fn switching_protocols(request: &UpgradeRequest) -> Response<Full<Bytes>> {
    let mut response = Response::new(Full::new(Bytes::new()));
    *response.status_mut() = StatusCode::SWITCHING_PROTOCOLS;

    let headers = response.headers_mut();
    headers.insert(UPGRADE, HeaderValue::from_static("websocket"));
    headers.insert(CONNECTION, HeaderValue::from_static("Upgrade"));
    if let Ok(accept) = HeaderValue::try_from(accept_key(&request.key)) {
        headers.insert(SEC_WEBSOCKET_ACCEPT, accept);
    }
    if request.wants_chat_protocol {
        headers.insert(SEC_WEBSOCKET_PROTOCOL, HeaderValue::from_static(CHAT_PROTOCOL));
    }
    response
}

/// Error response for a refused upgrade; the body is the reason.
pub fn rejection(err: &HandshakeError) -> Response<Full<Bytes>> {
    let mut response = Response::new(Full::new(Bytes::from(err.to_string())));
    *response.status_mut() = err.status();
    response
}

/// Builds the client's upgrade request for `identity`.
pub fn upgrade_request(
    host: &str,
    port: u16,
    identity: &Identity,
    key: &str,
) -> Result<Request<Empty<Bytes>>, HandshakeError> {
    let query = form_urlencoded::Serializer::new(String::new())
        .append_pair("name", identity.name())
        .append_pair("id", identity.id())
        .finish();

    let request = Request::builder()
        .method(Method::GET)
        .uri(format!("{CHAT_PATH}?{query}"))
        .header(HOST, format!("{host}:{port}"))
        .header(UPGRADE, "websocket")
        .header(CONNECTION, "websocket")
        .header(SEC_WEBSOCKET_KEY, key)
        .header(SEC_WEBSOCKET_PROTOCOL, CHAT_PROTOCOL)
        .body(Empty::new())?;
    Ok(request)
}

/// Accepts only a 101 whose upgrade headers and accept key match `key`.
pub fn verify_response<B>(response: &Response<B>, key: &str) -> Result<(), HandshakeError> {
    if response.status() != StatusCode::SWITCHING_PROTOCOLS {
        return Err(HandshakeError::Status(response.status()));
    }

    let headers = response.headers();
    if !has_token(headers, UPGRADE, "websocket") || !has_token(headers, CONNECTION, "upgrade") {
        return Err(HandshakeError::NotUpgrade);
    }

    let accept = headers
        .get(SEC_WEBSOCKET_ACCEPT)
        .and_then(|value| value.to_str().ok())
        .ok_or(HandshakeError::KeyMismatch)?;
    if accept.trim() != accept_key(key) {
        return Err(HandshakeError::KeyMismatch);
    }
    Ok(())
}

/// Dials `host:port` and performs the client side of the upgrade.
pub async fn connect(host: &str, port: u16, identity: &Identity) -> Result<UpgradedIo, HandshakeError> {
    let addr = format!("{host}:{port}");
    let stream = TcpStream::connect(&addr)
        .await
        .map_err(|source| HandshakeError::Dial {
            addr: addr.clone(),
            source,
        })?;

    let (mut sender, connection) = hyper::client::conn::http1::handshake(TokioIo::new(stream)).await?;
    tokio::spawn(async move {
        if let Err(err) = connection.with_upgrades().await {
            debug!(error = %err, "handshake connection ended with error");
        }
    });

    let key = generate_key();
    let request = upgrade_request(host, port, identity, &key)?;
    let mut response = sender.send_request(request).await?;
    verify_response(&response, &key)?;

    let upgraded = hyper::upgrade::on(&mut response).await?;
    debug!(%addr, %identity, "connection upgraded");
    Ok(TokioIo::new(upgraded))
}

fn has_token(headers: &HeaderMap, name: HeaderName, token: &str) -> bool {
    headers
        .get_all(name)
        .iter()
        .any(|value| header_has_token(value, token))
}

fn header_has_token(value: &HeaderValue, token: &str) -> bool {
    value
        .to_str()
        .map(|value| {
            value
                .split(',')
                .any(|part| part.trim().eq_ignore_ascii_case(token))
        })
        .unwrap_or(false)
}
