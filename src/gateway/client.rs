//! Long-lived gateway connection
//!
//! One outbound websocket per process: connect, authenticate via
//! challenge/response, heartbeat, dispatch inbound frames into the
//! event store, and reconnect with a fixed delay on any transport
//! failure. The transport sits behind a trait so the state machine is
//! testable against a scripted fake.

use std::future::Future;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use futures::{SinkExt, StreamExt};
use serde_json::json;
use tokio::net::TcpStream;
use tokio::sync::{broadcast, watch};
use tokio_tungstenite::tungstenite::protocol::Message;
use tokio_tungstenite::{connect_async, MaybeTlsStream, WebSocketStream};
use tracing::{debug, info, warn};

use super::auth::{self, Signer};
use super::messages::{classify, Inbound};
use crate::config::Config;
use crate::error::{Error, Result};
use crate::store::EventStore;
use crate::types::{Allowance, AuthContext};

/// Connection lifecycle. Every transition is logged.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Disconnected,
    Connecting,
    AwaitingChallenge,
    Authenticating,
    Streaming,
    AuthFailed,
    Closing,
    Reconnecting,
}

/// Notifications surfaced to client listeners
#[derive(Debug, Clone)]
pub enum ClientEvent {
    Connected,
    Authenticated {
        session_key: String,
        token: Option<String>,
    },
    AuthenticationFailed,
    GatewayError(String),
    Disconnected,
}

/// One inbound transport frame, already stripped to what dispatch needs
#[derive(Debug, Clone, PartialEq)]
pub enum Frame {
    Text(String),
    Ping(Vec<u8>),
    Pong,
    Close,
}

/// Minimal transport the client runs over. Implemented by the real
/// websocket and by scripted fakes in tests.
pub trait Transport: Send {
    fn send(&mut self, text: String) -> impl Future<Output = Result<()>> + Send;
    fn pong(&mut self, data: Vec<u8>) -> impl Future<Output = Result<()>> + Send;
    fn recv(&mut self) -> impl Future<Output = Option<Result<Frame>>> + Send;
    fn close(&mut self) -> impl Future<Output = ()> + Send;
}

/// Produces a fresh transport per connection attempt
pub trait Connector: Send + Sync + 'static {
    type Transport: Transport + 'static;
    fn connect(&self) -> impl Future<Output = Result<Self::Transport>> + Send;
}

/// Real websocket transport
pub struct WsTransport {
    ws: WebSocketStream<MaybeTlsStream<TcpStream>>,
}

impl Transport for WsTransport {
    async fn send(&mut self, text: String) -> Result<()> {
        self.ws
            .send(Message::Text(text))
            .await
            .map_err(Error::transport)
    }

    async fn pong(&mut self, data: Vec<u8>) -> Result<()> {
        self.ws
            .send(Message::Pong(data))
            .await
            .map_err(Error::transport)
    }

    async fn recv(&mut self) -> Option<Result<Frame>> {
        loop {
            return match self.ws.next().await? {
                Ok(Message::Text(text)) => Some(Ok(Frame::Text(text))),
                Ok(Message::Binary(data)) => {
                    Some(Ok(Frame::Text(String::from_utf8_lossy(&data).into_owned())))
                }
                Ok(Message::Ping(data)) => Some(Ok(Frame::Ping(data))),
                Ok(Message::Pong(_)) => Some(Ok(Frame::Pong)),
                Ok(Message::Close(_)) => Some(Ok(Frame::Close)),
                Ok(Message::Frame(_)) => continue,
                Err(err) => Some(Err(Error::transport(err))),
            };
        }
    }

    async fn close(&mut self) {
        let _ = self.ws.close(None).await;
    }
}

/// Connects to a configured websocket endpoint
pub struct WsConnector {
    url: String,
}

impl WsConnector {
    pub fn new(url: impl Into<String>) -> Self {
        Self { url: url.into() }
    }
}

impl Connector for WsConnector {
    type Transport = WsTransport;

    async fn connect(&self) -> Result<WsTransport> {
        let (ws, _response) = connect_async(&self.url).await.map_err(Error::transport)?;
        Ok(WsTransport { ws })
    }
}

/// Client knobs, usually taken from [`Config`]
#[derive(Debug, Clone)]
pub struct GatewayOptions {
    /// Participant address; the signer's own address when `None`
    pub participant: Option<String>,
    pub session_key: Option<String>,
    pub app_name: String,
    pub scope: String,
    pub allowances: Vec<Allowance>,
    pub auth_ttl: chrono::Duration,
    pub auth_timeout: Duration,
    pub heartbeat_interval: Duration,
    pub reconnect_delay: Duration,
}

impl GatewayOptions {
    pub fn from_config(config: &Config) -> Self {
        Self {
            participant: (!config.participant.is_empty()).then(|| config.participant.clone()),
            session_key: config.session_key.clone(),
            app_name: config.app_name.clone(),
            scope: config.scope.clone(),
            allowances: config.allowances.clone(),
            auth_ttl: chrono::Duration::from_std(config.auth_ttl)
                .unwrap_or_else(|_| chrono::Duration::seconds(300)),
            auth_timeout: config.auth_timeout,
            heartbeat_interval: config.heartbeat_interval,
            reconnect_delay: config.reconnect_delay,
        }
    }
}

enum ConnectionOutcome {
    Dropped,
    AuthFailed,
    Shutdown,
}

enum DispatchOutcome {
    Continue,
    AuthFailed,
    Fatal,
}

/// The gateway client. Built once, then [`spawn`](Self::spawn)ed; the
/// returned handle's `disconnect()` resolves only after the run loop
/// has fully stopped, so no events are emitted afterwards.
pub struct GatewayClient<C: Connector> {
    connector: C,
    signer: Arc<dyn Signer>,
    options: GatewayOptions,
    store: Arc<EventStore>,
    events: broadcast::Sender<ClientEvent>,
    state: watch::Sender<ConnectionState>,
    request_id: AtomicU64,
}

/// Handle to a running client
pub struct GatewayHandle {
    shutdown: watch::Sender<bool>,
    task: tokio::task::JoinHandle<()>,
}

impl GatewayHandle {
    /// Stop the client: cancels reconnect desire, closes the transport,
    /// and waits for the run loop to finish.
    pub async fn disconnect(self) {
        let _ = self.shutdown.send(true);
        let _ = self.task.await;
    }
}

impl<C: Connector> GatewayClient<C> {
    pub fn new(
        connector: C,
        signer: Arc<dyn Signer>,
        options: GatewayOptions,
        store: Arc<EventStore>,
    ) -> Self {
        let (events, _) = broadcast::channel(64);
        let (state, _) = watch::channel(ConnectionState::Disconnected);
        Self {
            connector,
            signer,
            options,
            store,
            events,
            state,
            request_id: AtomicU64::new(1),
        }
    }

    /// Listen for client events (auth outcomes, gateway errors, ...)
    pub fn subscribe_events(&self) -> broadcast::Receiver<ClientEvent> {
        self.events.subscribe()
    }

    /// Observe connection state transitions
    pub fn watch_state(&self) -> watch::Receiver<ConnectionState> {
        self.state.subscribe()
    }

    /// Start the connect/auth/stream/reconnect loop on the runtime
    pub fn spawn(self) -> GatewayHandle {
        let (shutdown, shutdown_rx) = watch::channel(false);
        let task = tokio::spawn(self.run(shutdown_rx));
        GatewayHandle { shutdown, task }
    }

    async fn run(self, mut shutdown: watch::Receiver<bool>) {
        let mut last_outcome = ConnectionOutcome::Dropped;
        loop {
            if *shutdown.borrow() {
                break;
            }
            self.set_state(ConnectionState::Connecting);

            let connected = tokio::select! {
                result = self.connector.connect() => result,
                _ = shutdown.changed() => break,
            };

            let outcome = match connected {
                Ok(mut transport) => {
                    info!("gateway connected");
                    let _ = self.events.send(ClientEvent::Connected);
                    self.run_connection(&mut transport, &mut shutdown).await
                }
                Err(err) => {
                    warn!(%err, "gateway connect failed");
                    ConnectionOutcome::Dropped
                }
            };

            match outcome {
                ConnectionOutcome::Shutdown => {
                    last_outcome = ConnectionOutcome::Shutdown;
                    break;
                }
                // Auth rejection is not retried; the caller decides.
                ConnectionOutcome::AuthFailed => {
                    last_outcome = ConnectionOutcome::AuthFailed;
                    break;
                }
                ConnectionOutcome::Dropped => {
                    self.set_state(ConnectionState::Reconnecting);
                    tokio::select! {
                        _ = tokio::time::sleep(self.options.reconnect_delay) => {}
                        _ = shutdown.changed() => break,
                    }
                }
            }
        }

        if !matches!(last_outcome, ConnectionOutcome::AuthFailed) {
            self.set_state(ConnectionState::Disconnected);
        }
        let _ = self.events.send(ClientEvent::Disconnected);
    }

    async fn run_connection(
        &self,
        transport: &mut C::Transport,
        shutdown: &mut watch::Receiver<bool>,
    ) -> ConnectionOutcome {
        let participant = self
            .options
            .participant
            .clone()
            .unwrap_or_else(|| self.signer.address());
        let ctx = AuthContext::new(
            participant,
            self.options.session_key.clone(),
            self.options.app_name.clone(),
            self.options.scope.clone(),
            self.options.auth_ttl,
            self.options.allowances.clone(),
        );

        self.set_state(ConnectionState::AwaitingChallenge);
        let request = auth::auth_request(&ctx);
        if let Err(err) = transport.send(request.to_string()).await {
            warn!(%err, "auth request send failed");
            return ConnectionOutcome::Dropped;
        }

        let mut heartbeat = tokio::time::interval(self.options.heartbeat_interval);
        heartbeat.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
        heartbeat.tick().await; // immediate first tick

        let auth_deadline = tokio::time::sleep(self.options.auth_timeout);
        tokio::pin!(auth_deadline);
        let mut streaming = false;

        loop {
            tokio::select! {
                inbound = transport.recv() => {
                    match inbound {
                        None => {
                            info!("gateway connection closed");
                            return ConnectionOutcome::Dropped;
                        }
                        Some(Err(err)) => {
                            warn!(%err, "gateway read error");
                            return ConnectionOutcome::Dropped;
                        }
                        Some(Ok(Frame::Close)) => {
                            info!("gateway sent close");
                            return ConnectionOutcome::Dropped;
                        }
                        Some(Ok(Frame::Ping(data))) => {
                            if let Err(err) = transport.pong(data).await {
                                warn!(%err, "pong send failed");
                            }
                        }
                        Some(Ok(Frame::Pong)) => {}
                        Some(Ok(Frame::Text(text))) => {
                            match self.dispatch(&ctx, &text, transport, &mut streaming).await {
                                DispatchOutcome::Continue => {}
                                DispatchOutcome::AuthFailed => return ConnectionOutcome::AuthFailed,
                                DispatchOutcome::Fatal => return ConnectionOutcome::Dropped,
                            }
                        }
                    }
                }
                _ = heartbeat.tick(), if streaming => {
                    let probe = json!({"type": "ping", "id": self.next_request_id()});
                    if let Err(err) = transport.send(probe.to_string()).await {
                        warn!(%err, "heartbeat send failed");
                    }
                }
                _ = &mut auth_deadline, if !streaming => {
                    warn!("no auth result before timeout, dropping connection");
                    transport.close().await;
                    return ConnectionOutcome::Dropped;
                }
                _ = shutdown.changed() => {
                    self.set_state(ConnectionState::Closing);
                    transport.close().await;
                    return ConnectionOutcome::Shutdown;
                }
            }
        }
    }

    async fn dispatch(
        &self,
        ctx: &AuthContext,
        text: &str,
        transport: &mut C::Transport,
        streaming: &mut bool,
    ) -> DispatchOutcome {
        let Some(inbound) = classify(text) else {
            debug!("dropping non-JSON frame");
            return DispatchOutcome::Continue;
        };

        match inbound {
            Inbound::Challenge { challenge } => {
                self.set_state(ConnectionState::Authenticating);
                match auth::challenge_response(ctx, &challenge, self.signer.as_ref()) {
                    Ok(frame) => {
                        if let Err(err) = transport.send(frame.to_string()).await {
                            warn!(%err, "challenge response send failed");
                            return DispatchOutcome::Fatal;
                        }
                    }
                    Err(err) => {
                        warn!(%err, "challenge signing failed");
                        let _ = self
                            .events
                            .send(ClientEvent::GatewayError(err.to_string()));
                    }
                }
            }
            Inbound::ChallengeUnreadable => {
                warn!("challenge carried no recognizable challenge string, ignoring");
            }
            Inbound::AuthResult {
                success: true,
                session_key,
                token,
            } => {
                if !*streaming {
                    *streaming = true;
                    self.set_state(ConnectionState::Streaming);
                    info!("gateway authentication succeeded");
                    let _ = self.events.send(ClientEvent::Authenticated {
                        session_key: session_key.unwrap_or_else(|| ctx.session_key.clone()),
                        token,
                    });
                }
            }
            Inbound::AuthResult { success: false, .. } => {
                warn!("gateway rejected authentication");
                self.set_state(ConnectionState::AuthFailed);
                let _ = self.events.send(ClientEvent::AuthenticationFailed);
                return DispatchOutcome::AuthFailed;
            }
            // Update frames are only trusted once the handshake has
            // completed; anything earlier is dropped.
            Inbound::SingleUpdate(payload) => {
                if *streaming {
                    self.store.record_single_update(payload);
                } else {
                    warn!("dropping single update received before authentication");
                }
            }
            Inbound::BatchUpdate(updates) => {
                if *streaming {
                    self.store.record_batch_update(updates);
                } else {
                    warn!("dropping batch update received before authentication");
                }
            }
            Inbound::AggregateUpdate(records) => {
                if *streaming {
                    self.store.record_aggregate_update(records);
                } else {
                    warn!("dropping aggregate update received before authentication");
                }
            }
            Inbound::GatewayError(err) => {
                warn!(error = %err, "gateway reported an error");
                let _ = self.events.send(ClientEvent::GatewayError(err.to_string()));
            }
            Inbound::Ping => {
                let reply = json!({"type": "pong", "id": self.next_request_id()});
                if let Err(err) = transport.send(reply.to_string()).await {
                    warn!(%err, "pong reply send failed");
                }
            }
            Inbound::Pong => {}
            Inbound::Unknown(kind) => {
                debug!(kind, "dropping unrecognized message kind");
            }
        }
        DispatchOutcome::Continue
    }

    fn next_request_id(&self) -> u64 {
        self.request_id.fetch_add(1, Ordering::SeqCst)
    }

    fn set_state(&self, state: ConnectionState) {
        let previous = self.state.send_replace(state);
        if previous != state {
            debug!(from = ?previous, to = ?state, "connection state");
        }
    }
}
