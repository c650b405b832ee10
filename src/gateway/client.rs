//! Live gateway session
//!
//! Connects, waits for Hello, sends Identify with the shard tuple, then runs a
//! single connection task that heartbeats and forwards `READY` / `GUILD_CREATE`
//! to the shard. There is no resume or reconnect: if the connection drops, the
//! shard's deadline settles it.

use {
    super::{
        event::{
            decode_dispatch, heartbeat_payload, identify_payload, GatewayPayload, Hello,
            OP_DISPATCH, OP_HEARTBEAT, OP_HEARTBEAT_ACK, OP_HELLO, OP_INVALID_SESSION,
            OP_RECONNECT,
        },
        GatewayError, GatewayEvent, Session, SessionFactory, ShardInfo,
    },
    async_trait::async_trait,
    futures_util::{
        stream::{SplitSink, SplitStream},
        SinkExt, StreamExt,
    },
    std::time::Duration,
    tokio::{
        net::TcpStream,
        sync::{mpsc, oneshot},
        task::JoinHandle,
        time::{interval_at, Instant},
    },
    tokio_tungstenite::{connect_async, tungstenite::Message, MaybeTlsStream, WebSocketStream},
};

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;
type WsSink = SplitSink<WsStream, Message>;
type WsSource = SplitStream<WsStream>;

const GATEWAY_QUERY: &str = "?v=10&encoding=json";
const EVENT_BUFFER: usize = 256;

pub struct GatewaySessionFactory {
    url: String,
    token: String,
}

impl GatewaySessionFactory {
    /// `gateway_url` is the `url` field from `/gateway/bot`
    pub fn new(gateway_url: &str, token: &str) -> Self {
        Self {
            url: format!("{}/{}", gateway_url.trim_end_matches('/'), GATEWAY_QUERY),
            token: token.to_string(),
        }
    }
}

impl SessionFactory for GatewaySessionFactory {
    fn create(&self, shard: ShardInfo) -> Box<dyn Session> {
        Box::new(GatewaySession::new(self.url.clone(), self.token.clone(), shard))
    }
}

pub struct GatewaySession {
    url: String,
    token: String,
    shard: ShardInfo,
    stop: Option<oneshot::Sender<()>>,
    task: Option<JoinHandle<()>>,
}

impl GatewaySession {
    pub fn new(url: String, token: String, shard: ShardInfo) -> Self {
        Self {
            url,
            token,
            shard,
            stop: None,
            task: None,
        }
    }
}

#[async_trait]
impl Session for GatewaySession {
    async fn open(&mut self) -> Result<mpsc::Receiver<GatewayEvent>, GatewayError> {
        log::debug!("🔌 Shard {} connecting to {}", self.shard.id, self.url);
        let (socket, _) = connect_async(self.url.as_str()).await?;
        let (mut sink, mut source) = socket.split();

        let heartbeat = read_hello(&mut source).await?;
        let identify = identify_payload(&self.token, self.shard.id, self.shard.count);
        sink.send(Message::Text(identify.to_string())).await?;

        let (events_tx, events_rx) = mpsc::channel(EVENT_BUFFER);
        let (stop_tx, stop_rx) = oneshot::channel();
        self.stop = Some(stop_tx);
        self.task = Some(tokio::spawn(connection_loop(
            self.shard, sink, source, heartbeat, events_tx, stop_rx,
        )));

        log::debug!(
            "Shard {} identified (heartbeat every {}ms)",
            self.shard.id,
            heartbeat.as_millis()
        );
        Ok(events_rx)
    }

    async fn close(&mut self) {
        if let Some(stop) = self.stop.take() {
            let _ = stop.send(());
        }
        if let Some(task) = self.task.take() {
            if let Err(e) = task.await {
                log::debug!("Shard {} connection task ended abnormally: {}", self.shard.id, e);
            }
        }
    }
}

async fn read_hello(source: &mut WsSource) -> Result<Duration, GatewayError> {
    while let Some(message) = source.next().await {
        if let Message::Text(text) = message? {
            let payload: GatewayPayload = serde_json::from_str(&text)?;
            if payload.op == OP_HELLO {
                let hello: Hello = serde_json::from_value(payload.d)?;
                return Ok(Duration::from_millis(hello.heartbeat_interval.max(1)));
            }
        }
    }
    Err(GatewayError::ClosedBeforeHello)
}

async fn send_heartbeat(sink: &mut WsSink, last_sequence: Option<u64>) -> Result<(), GatewayError> {
    sink.send(Message::Text(heartbeat_payload(last_sequence).to_string()))
        .await?;
    Ok(())
}

async fn connection_loop(
    shard: ShardInfo,
    mut sink: WsSink,
    mut source: WsSource,
    heartbeat: Duration,
    events: mpsc::Sender<GatewayEvent>,
    mut stop: oneshot::Receiver<()>,
) {
    let mut last_sequence: Option<u64> = None;
    let jitter = heartbeat.mul_f64(rand::random::<f64>());
    let mut ticker = interval_at(Instant::now() + jitter, heartbeat);

    loop {
        tokio::select! {
            _ = &mut stop => {
                let _ = sink.send(Message::Close(None)).await;
                break;
            }
            _ = ticker.tick() => {
                if let Err(e) = send_heartbeat(&mut sink, last_sequence).await {
                    log::warn!("⚠️  Shard {} heartbeat failed: {}", shard.id, e);
                    break;
                }
            }
            message = source.next() => {
                let text = match message {
                    Some(Ok(Message::Text(text))) => text,
                    Some(Ok(Message::Close(frame))) => {
                        log::warn!("⚠️  Shard {} closed by gateway: {:?}", shard.id, frame);
                        break;
                    }
                    Some(Ok(_)) => continue,
                    Some(Err(e)) => {
                        log::warn!("⚠️  Shard {} connection error: {}", shard.id, e);
                        break;
                    }
                    None => break,
                };

                let payload: GatewayPayload = match serde_json::from_str(&text) {
                    Ok(payload) => payload,
                    Err(e) => {
                        log::debug!("Shard {} skipped malformed frame: {}", shard.id, e);
                        continue;
                    }
                };
                if payload.s.is_some() {
                    last_sequence = payload.s;
                }

                match payload.op {
                    OP_DISPATCH => match decode_dispatch(payload.t.as_deref(), payload.d) {
                        Ok(Some(event)) => {
                            // Receiver dropped means the shard is done with us
                            if events.send(event).await.is_err() {
                                let _ = sink.send(Message::Close(None)).await;
                                break;
                            }
                        }
                        Ok(None) => {}
                        Err(e) => {
                            log::debug!("Shard {} failed to decode {:?}: {}", shard.id, payload.t, e);
                        }
                    },
                    OP_HEARTBEAT => {
                        if let Err(e) = send_heartbeat(&mut sink, last_sequence).await {
                            log::warn!("⚠️  Shard {} heartbeat failed: {}", shard.id, e);
                            break;
                        }
                    }
                    OP_HEARTBEAT_ACK => {}
                    OP_RECONNECT | OP_INVALID_SESSION => {
                        log::warn!("⚠️  Shard {} asked to reconnect (op {}); giving up", shard.id, payload.op);
                        break;
                    }
                    other => log::trace!("Shard {} ignored op {}", shard.id, other),
                }
            }
        }
    }

    log::debug!("Shard {} connection task stopped", shard.id);
}
