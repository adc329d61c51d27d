//! Long-lived websocket connection feeding an [`EventHub`].

use std::time::Duration;

use futures::{SinkExt, StreamExt};
use serde_json::{Value, json};
use tokio::net::TcpStream;
use tokio::task::JoinHandle;
use tokio_tungstenite::tungstenite::client::IntoClientRequest;
use tokio_tungstenite::tungstenite::http::HeaderValue;
use tokio_tungstenite::tungstenite::http::header::AUTHORIZATION;
use tokio_tungstenite::tungstenite::protocol::Message;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream, connect_async};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, trace, warn};
use url::Url;

use crate::bus::{EventBus, EventHandler, EventHub, Subscription};
use crate::config::{Framing, MonitorConfig};
use crate::error::{MonitorError, Result};

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;

/// One decoded inbound text frame.
#[derive(Debug, Clone, PartialEq)]
pub enum Packet {
    /// Engine.IO handshake; the namespace connect must follow.
    Open,
    Ping,
    /// Namespace connect acknowledged.
    Connected,
    Event { name: String, data: Value },
    Disconnect,
    Ignored,
}

impl Framing {
    /// Decode one text frame.
    pub fn decode(self, text: &str) -> Packet {
        match self {
            Framing::SocketIo => decode_socket_io(text),
            Framing::Json => decode_json_envelope(text),
        }
    }

    /// Encode an outbound event emit.
    pub fn encode_event(self, name: &str, data: &Value) -> String {
        match self {
            Framing::SocketIo => format!("42{}", json!([name, data])),
            Framing::Json => json!({ "event": name, "data": data }).to_string(),
        }
    }
}

fn decode_socket_io(text: &str) -> Packet {
    let mut chars = text.chars();
    match chars.next() {
        Some('0') => Packet::Open,
        Some('2') => Packet::Ping,
        Some('1') => Packet::Disconnect,
        Some('4') => {
            let body = chars.as_str();
            match body.chars().next() {
                Some('0') => Packet::Connected,
                Some('1') => Packet::Disconnect,
                Some('2') => decode_socket_io_event(&body[1..]),
                _ => Packet::Ignored,
            }
        }
        _ => Packet::Ignored,
    }
}

/// `[/namespace,][ack id]["name", data]`
fn decode_socket_io_event(body: &str) -> Packet {
    let mut rest = body;
    if rest.starts_with('/') {
        match rest.find(',') {
            Some(pos) => rest = &rest[pos + 1..],
            None => return Packet::Ignored,
        }
    }
    let rest = rest.trim_start_matches(|c: char| c.is_ascii_digit());
    let Ok(Value::Array(mut items)) = serde_json::from_str::<Value>(rest) else {
        return Packet::Ignored;
    };
    if items.is_empty() {
        return Packet::Ignored;
    }
    let data = if items.len() > 1 {
        items.swap_remove(1)
    } else {
        Value::Null
    };
    match items.swap_remove(0) {
        Value::String(name) => Packet::Event { name, data },
        _ => Packet::Ignored,
    }
}

fn decode_json_envelope(text: &str) -> Packet {
    let Ok(mut value) = serde_json::from_str::<Value>(text) else {
        return Packet::Ignored;
    };
    match value.get("event").and_then(Value::as_str) {
        Some(name) => Packet::Event {
            name: name.to_string(),
            data: value.get_mut("data").map(Value::take).unwrap_or(Value::Null),
        },
        None => Packet::Ignored,
    }
}

/// Websocket URL for `base`: `http` becomes `ws`, `https` becomes `wss`.
pub fn websocket_url(base: &Url, path: &str, framing: Framing) -> Result<Url> {
    let mut url = base.clone();
    let scheme = match base.scheme() {
        "http" | "ws" => "ws",
        "https" | "wss" => "wss",
        other => {
            return Err(MonitorError::InvalidUrl {
                reason: format!("unsupported scheme `{other}`"),
            });
        }
    };
    url.set_scheme(scheme).map_err(|_| MonitorError::InvalidUrl {
        reason: format!("cannot use scheme `{scheme}` for {base}"),
    })?;
    if !url.path().ends_with('/') {
        let joined = format!("{}/", url.path());
        url.set_path(&joined);
    }
    let mut url = url
        .join(path.trim_start_matches('/'))
        .map_err(|e| MonitorError::InvalidUrl {
            reason: format!("{path}: {e}"),
        })?;
    if framing == Framing::SocketIo {
        url.query_pairs_mut()
            .append_pair("EIO", "4")
            .append_pair("transport", "websocket");
    }
    Ok(url)
}

#[derive(Debug, Clone)]
struct ConnectOptions {
    url: Url,
    token: Option<String>,
    framing: Framing,
    reconnect_attempts: u32,
    reconnect_delay: Duration,
}

/// Realtime transport with connect/reconnect/disconnect lifecycle.
///
/// Reconnects with a fixed delay up to the configured attempt count; the
/// counter resets after every successful connect. Once attempts are exhausted
/// the connection stays down and [`EventBus::connection_state`] reports
/// `false` for good.
pub struct RealtimeConnection {
    hub: EventHub,
    shutdown: CancellationToken,
    task: Option<JoinHandle<()>>,
}

impl RealtimeConnection {
    /// Start connecting in the background.
    pub fn connect(base_url: &Url, token: Option<String>, config: &MonitorConfig) -> Result<Self> {
        let options = ConnectOptions {
            url: websocket_url(base_url, &config.realtime_path, config.framing)?,
            token: token.filter(|t| !t.is_empty()),
            framing: config.framing,
            reconnect_attempts: config.reconnect_attempts,
            reconnect_delay: config.reconnect_delay(),
        };
        let hub = EventHub::new();
        let shutdown = CancellationToken::new();
        let task = tokio::spawn(run_connection(options, hub.clone(), shutdown.clone()));
        Ok(Self {
            hub,
            shutdown,
            task: Some(task),
        })
    }

    pub fn hub(&self) -> &EventHub {
        &self.hub
    }

    pub fn is_connected(&self) -> bool {
        self.hub.is_connected()
    }

    /// Close the socket and stop reconnecting.
    pub async fn disconnect(&mut self) {
        self.shutdown.cancel();
        if let Some(task) = self.task.take()
            && let Err(e) = task.await
            && !e.is_cancelled()
        {
            warn!("Realtime task ended abnormally: {e}");
        }
        self.hub.set_connected(false);
    }
}

impl Drop for RealtimeConnection {
    fn drop(&mut self) {
        self.shutdown.cancel();
        if let Some(task) = self.task.take() {
            task.abort();
        }
    }
}

impl EventBus for RealtimeConnection {
    fn subscribe(&self, event: &str, handler: EventHandler) -> Subscription {
        self.hub.subscribe(event, handler)
    }

    fn connection_state(&self) -> tokio::sync::watch::Receiver<bool> {
        self.hub.connection_state()
    }
}

async fn open_stream(options: &ConnectOptions) -> Result<WsStream> {
    let mut request = options.url.as_str().into_client_request()?;
    if let Some(token) = &options.token {
        let value = HeaderValue::from_str(&format!("Bearer {token}"))
            .map_err(|_| MonitorError::configuration("token is not a valid header value"))?;
        request.headers_mut().insert(AUTHORIZATION, value);
    }
    let (stream, _) = connect_async(request).await?;
    Ok(stream)
}

/// Clears the connected flag however the transport task ends, including a
/// panic or an abort.
struct DisconnectOnDrop(EventHub);

impl Drop for DisconnectOnDrop {
    fn drop(&mut self) {
        self.0.set_connected(false);
    }
}

async fn run_connection(options: ConnectOptions, hub: EventHub, shutdown: CancellationToken) {
    let _disconnect = DisconnectOnDrop(hub.clone());
    let mut attempt = 0;

    loop {
        if shutdown.is_cancelled() {
            break;
        }

        info!(url = %options.url, "Connecting to realtime endpoint");
        let connected = tokio::select! {
            _ = shutdown.cancelled() => break,
            result = open_stream(&options) => result,
        };

        match connected {
            Ok(stream) => {
                attempt = 0;
                let closed_by_us = serve_stream(stream, &options, &hub, &shutdown).await;
                hub.set_connected(false);
                if closed_by_us {
                    break;
                }
                warn!("Realtime connection lost");
            }
            Err(e) => {
                warn!(error = %e, "Realtime connection failed");
            }
        }

        if attempt >= options.reconnect_attempts {
            error!(
                attempts = attempt,
                "Max reconnect attempts reached, realtime updates disabled"
            );
            break;
        }
        attempt += 1;
        debug!(attempt, delay = ?options.reconnect_delay, "Reconnecting");
        tokio::select! {
            _ = tokio::time::sleep(options.reconnect_delay) => {},
            _ = shutdown.cancelled() => break,
        }
    }
    debug!("Realtime task stopped");
}

/// Pump one open socket. Returns `true` when the shutdown token closed it.
async fn serve_stream(
    mut stream: WsStream,
    options: &ConnectOptions,
    hub: &EventHub,
    shutdown: &CancellationToken,
) -> bool {
    if options.framing == Framing::Json {
        if !authenticate(&mut stream, options).await {
            return false;
        }
        hub.set_connected(true);
        info!("Realtime connection established");
    }

    loop {
        tokio::select! {
            _ = shutdown.cancelled() => {
                let _ = stream.close(None).await;
                return true;
            }
            msg = stream.next() => {
                let text = match msg {
                    Some(Ok(Message::Text(text))) => text,
                    Some(Ok(Message::Close(frame))) => {
                        debug!(?frame, "Server closed realtime connection");
                        return false;
                    }
                    Some(Ok(_)) => continue,
                    Some(Err(e)) => {
                        error!("WebSocket error: {e}");
                        return false;
                    }
                    None => return false,
                };

                match options.framing.decode(text.as_str()) {
                    Packet::Open => {
                        if let Err(e) = stream.send(Message::text("40")).await {
                            error!("Failed to join namespace: {e}");
                            return false;
                        }
                    }
                    Packet::Ping => {
                        if let Err(e) = stream.send(Message::text("3")).await {
                            error!("Failed to answer ping: {e}");
                            return false;
                        }
                        trace!("Answered ping");
                    }
                    Packet::Connected => {
                        if !authenticate(&mut stream, options).await {
                            return false;
                        }
                        hub.set_connected(true);
                        info!("Realtime connection established");
                    }
                    Packet::Event { name, data } => {
                        let delivered = hub.dispatch(&name, &data);
                        trace!(event = %name, delivered, "Realtime event");
                    }
                    Packet::Disconnect => {
                        debug!("Server disconnected namespace");
                        return false;
                    }
                    Packet::Ignored => {}
                }
            }
        }
    }
}

async fn authenticate(stream: &mut WsStream, options: &ConnectOptions) -> bool {
    let Some(token) = &options.token else {
        return true;
    };
    let frame = options
        .framing
        .encode_event("authenticate", &Value::String(token.clone()));
    match stream.send(Message::text(frame)).await {
        Ok(()) => true,
        Err(e) => {
            error!("Failed to authenticate realtime connection: {e}");
            false
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    #[rstest]
    #[case("0{\"sid\":\"abc\",\"pingInterval\":25000}", Packet::Open)]
    #[case("2", Packet::Ping)]
    #[case("40{\"sid\":\"xyz\"}", Packet::Connected)]
    #[case("41", Packet::Disconnect)]
    #[case("3", Packet::Ignored)]
    fn socket_io_control_packets(#[case] frame: &str, #[case] expected: Packet) {
        assert_eq!(Framing::SocketIo.decode(frame), expected);
    }

    #[rstest]
    #[case(r#"42["job:progress:job-42",{"progress":40}]"#)]
    #[case(r#"42/admin,["job:progress:job-42",{"progress":40}]"#)]
    #[case(r#"4217["job:progress:job-42",{"progress":40}]"#)]
    fn socket_io_events(#[case] frame: &str) {
        assert_eq!(
            Framing::SocketIo.decode(frame),
            Packet::Event {
                name: "job:progress:job-42".to_string(),
                data: json!({"progress": 40}),
            }
        );
    }

    #[test]
    fn socket_io_event_without_payload() {
        assert_eq!(
            Framing::SocketIo.decode(r#"42["job:completed:job-42"]"#),
            Packet::Event {
                name: "job:completed:job-42".to_string(),
                data: Value::Null,
            }
        );
    }

    #[test]
    fn json_envelope_event() {
        let frame = r#"{"event":"job:started:7","data":{"totalClips":3}}"#;
        assert_eq!(
            Framing::Json.decode(frame),
            Packet::Event {
                name: "job:started:7".to_string(),
                data: json!({"totalClips": 3}),
            }
        );
        assert_eq!(Framing::Json.decode("not json"), Packet::Ignored);
    }

    #[test]
    fn authenticate_emit_encoding() {
        let frame = Framing::SocketIo.encode_event("authenticate", &json!("secret"));
        assert_eq!(frame, r#"42["authenticate","secret"]"#);
    }

    #[rstest]
    #[case("http://localhost:3000", "ws://localhost:3000/socket.io/?EIO=4&transport=websocket")]
    #[case("https://api.example.com/backend", "wss://api.example.com/backend/socket.io/?EIO=4&transport=websocket")]
    fn websocket_url_from_api_base(#[case] base: &str, #[case] expected: &str) {
        let base = Url::parse(base).unwrap();
        let url = websocket_url(&base, "socket.io/", Framing::SocketIo).unwrap();
        assert_eq!(url.as_str(), expected);
    }

    #[test]
    fn websocket_url_rejects_unknown_scheme() {
        let base = Url::parse("ftp://example.com").unwrap();
        assert!(websocket_url(&base, "ws", Framing::Json).is_err());
    }

    #[tokio::test]
    async fn gives_up_after_reconnect_attempts() {
        // Nothing listens on port 9 of localhost; every attempt is refused.
        let config = MonitorConfig {
            framing: Framing::Json,
            reconnect_attempts: 2,
            reconnect_delay_ms: 10,
            ..Default::default()
        };
        let base = Url::parse("http://127.0.0.1:9").unwrap();
        let mut connection = RealtimeConnection::connect(&base, None, &config).unwrap();
        let task = connection.task.take().unwrap();
        tokio::time::timeout(Duration::from_secs(10), task)
            .await
            .expect("task should stop")
            .unwrap();
        assert!(!connection.is_connected());
    }

    #[tokio::test]
    async fn aborted_transport_clears_connected_flag() {
        let hub = EventHub::new();
        hub.set_connected(true);
        let guard = DisconnectOnDrop(hub.clone());
        let task = tokio::spawn(async move {
            let _guard = guard;
            std::future::pending::<()>().await;
        });
        tokio::task::yield_now().await;
        assert!(hub.is_connected());

        task.abort();
        assert!(task.await.unwrap_err().is_cancelled());
        assert!(!hub.is_connected());
    }
}
