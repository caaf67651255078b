//! Reconnecting notification client.
//!
//! A supervisor task owns the socket. Per connection it runs one `select!`
//! loop over inbound frames, the heartbeat ticker, the queue's retry timer,
//! the expiry sweep and shutdown. When the socket closes the
//! [`ConnectionStateMachine`] decides whether to reconnect.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use futures_util::stream::SplitSink;
use futures_util::{SinkExt, StreamExt};
use serde_json::Value;
use tokio::net::TcpStream;
use tokio::sync::{mpsc, watch, Mutex};
use tokio::task::JoinHandle;
use tokio::time::{interval_at, sleep, sleep_until, Instant as TokioInstant, MissedTickBehavior};
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream};
use tracing::{debug, info, warn};

use super::config::WsConfig;
use super::dispatcher::{Dispatcher, SendOutcome};
use super::error::WsError;
use super::messages::{encode_frame, Notification, NotificationCount, ServerMessage, SessionInfo};
use super::state::{CloseCause, ConnectionState, ConnectionStateMachine, ReconnectDecision};
use crate::clock::{Clock, SystemClock};
use crate::queue::{EnqueueOptions, MessageQueue};
use crate::transport::FrameSink;

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;
type WsSink = SplitSink<WsStream, Message>;

/// Capacity of the event channel.
const EVENT_BUFFER: usize = 1000;

/// Event surfaced to the application.
#[derive(Debug, Clone, PartialEq)]
pub enum ClientEvent {
    /// Socket opened. After a reconnect the application should re-fetch
    /// notifications it may have missed.
    Connected {
        /// True unless this is the first connection.
        reconnected: bool,
    },
    /// Handshake accepted.
    Authenticated(SessionInfo),
    /// A new notification.
    Notification(Notification),
    /// Updated counters.
    NotificationCount(NotificationCount),
    /// Reply to a ping.
    Pong,
    /// Loopback of an echo.
    Echo(Value),
    /// The server reported an error.
    ServerError {
        /// Error code.
        code: String,
        /// Error message.
        message: String,
    },
    /// Waiting before a reconnect attempt.
    Reconnecting {
        /// 1-based attempt number.
        attempt: u32,
        /// Wait before the attempt.
        delay: Duration,
    },
    /// Reconnect attempts exhausted.
    Disconnected {
        /// Consecutive attempts made.
        attempts: u32,
    },
    /// Closed by [`NotifyClient::close`].
    Closed,
}

/// Write half of an open socket.
struct SocketChannel {
    sink: Mutex<WsSink>,
}

impl SocketChannel {
    fn new(sink: WsSink) -> Self {
        Self {
            sink: Mutex::new(sink),
        }
    }

    async fn close(&self) {
        let mut sink = self.sink.lock().await;
        let _ = sink.send(Message::Close(None)).await;
        let _ = sink.close().await;
    }
}

#[async_trait]
impl FrameSink for SocketChannel {
    async fn send_frame(&self, kind: &str, payload: &Value) -> Result<(), WsError> {
        let text = encode_frame(kind, payload);
        self.sink
            .lock()
            .await
            .send(Message::Text(text.into()))
            .await
            .map_err(|e| WsError::SendFailed(e.to_string()))
    }
}

/// State shared by the client handle and its supervisor task.
struct Runtime {
    config: WsConfig,
    dispatcher: Arc<Dispatcher>,
    machine: Arc<Mutex<ConnectionStateMachine>>,
    clock: Arc<dyn Clock>,
    events: mpsc::Sender<ClientEvent>,
    shutdown: watch::Receiver<bool>,
}

impl Runtime {
    async fn supervise(mut self, mut stream: WsStream) {
        let mut reconnected = false;

        loop {
            let cause = self.run_connection(stream, reconnected).await;
            self.dispatcher.on_close().await;

            match self.reconnect(cause).await {
                Some(next) => {
                    stream = next;
                    reconnected = true;
                }
                None => break,
            }
        }
    }

    /// Runs one open socket until it closes.
    async fn run_connection(&mut self, stream: WsStream, reconnected: bool) -> CloseCause {
        self.machine.lock().await.on_open();

        let (sink, mut source) = stream.split();
        let channel = Arc::new(SocketChannel::new(sink));

        info!(reconnected, "connected");
        self.emit(ClientEvent::Connected { reconnected });
        self.dispatcher
            .on_open(Arc::clone(&channel) as Arc<dyn FrameSink>)
            .await;

        let heartbeat_every = self.config.heartbeat_interval;
        let mut heartbeat = interval_at(TokioInstant::now() + heartbeat_every, heartbeat_every);
        heartbeat.set_missed_tick_behavior(MissedTickBehavior::Delay);

        let sweep_every = self.config.queue.expiry_sweep_interval;
        let mut expiry = interval_at(TokioInstant::now() + sweep_every, sweep_every);
        expiry.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            let retry_at = self.next_retry_deadline().await;
            let retry = async move {
                match retry_at {
                    Some(at) => sleep_until(at).await,
                    None => std::future::pending().await,
                }
            };

            tokio::select! {
                incoming = source.next() => match incoming {
                    Some(Ok(Message::Text(text))) => self.handle_text(text.as_str()),
                    Some(Ok(Message::Close(frame))) => {
                        info!(?frame, "server closed connection");
                        return CloseCause::Remote;
                    }
                    Some(Ok(_)) => {}
                    Some(Err(e)) => {
                        warn!(error = %e, "WebSocket error");
                        return CloseCause::Error;
                    }
                    None => return CloseCause::Remote,
                },
                _ = heartbeat.tick() => {
                    self.dispatcher.ping().await;
                }
                () = retry => {
                    if let Some(report) = self.dispatcher.redeliver().await {
                        debug!(
                            delivered = report.delivered,
                            retried = report.retried,
                            dropped = report.dropped,
                            "redelivery pass"
                        );
                    }
                }
                () = self.dispatcher.queued() => {}
                _ = expiry.tick() => {
                    self.dispatcher.sweep_expired().await;
                }
                _ = self.shutdown.changed() => {
                    channel.close().await;
                    return CloseCause::Deliberate;
                }
            }
        }
    }

    /// Walks the reconnect policy until a socket opens or the policy stops.
    async fn reconnect(&mut self, mut cause: CloseCause) -> Option<WsStream> {
        loop {
            let decision = self.machine.lock().await.on_close(cause);

            match decision {
                ReconnectDecision::Stop => {
                    info!("connection closed");
                    self.emit(ClientEvent::Closed);
                    return None;
                }
                ReconnectDecision::GiveUp { attempts } => {
                    warn!(attempts, "giving up on reconnecting");
                    self.emit(ClientEvent::Disconnected { attempts });
                    return None;
                }
                ReconnectDecision::Retry { attempt, delay } => {
                    info!(
                        attempt,
                        delay_ms = u64::try_from(delay.as_millis()).unwrap_or(u64::MAX),
                        "reconnecting"
                    );
                    self.emit(ClientEvent::Reconnecting { attempt, delay });

                    tokio::select! {
                        () = sleep(delay) => {}
                        _ = self.shutdown.changed() => {
                            self.emit(ClientEvent::Closed);
                            return None;
                        }
                    }

                    self.machine.lock().await.connect();
                    match tokio_tungstenite::connect_async(self.config.connection_url()).await {
                        Ok((stream, _)) => return Some(stream),
                        Err(e) => {
                            warn!(attempt, error = %e, "reconnect attempt failed");
                            cause = CloseCause::Error;
                        }
                    }
                }
            }
        }
    }

    /// Converts the queue's next ready instant to a timer deadline.
    async fn next_retry_deadline(&self) -> Option<TokioInstant> {
        let at = self.dispatcher.queue().next_ready_at().await?;
        Some(TokioInstant::now() + at.saturating_duration_since(self.clock.now()))
    }

    fn handle_text(&self, text: &str) {
        let message = match ServerMessage::parse(text) {
            Ok(message) => message,
            Err(e) => {
                warn!(error = %e, "ignoring undecodable frame");
                return;
            }
        };

        let event = match message {
            ServerMessage::Authenticated(session) => {
                debug!(connection_id = session.connection_id, "authenticated");
                ClientEvent::Authenticated(session)
            }
            ServerMessage::Notification(notification) => ClientEvent::Notification(notification),
            ServerMessage::NotificationCount(count) => ClientEvent::NotificationCount(count),
            ServerMessage::Pong => ClientEvent::Pong,
            ServerMessage::Echo(data) => ClientEvent::Echo(data),
            ServerMessage::Error { code, message } => {
                warn!(code = %code, message = %message, "server error");
                ClientEvent::ServerError { code, message }
            }
        };
        self.emit(event);
    }

    fn emit(&self, event: ClientEvent) {
        if let Err(e) = self.events.try_send(event) {
            warn!(error = %e, "event dropped");
        }
    }
}

/// Reconnecting WebSocket client for staff notifications.
#[derive(Debug)]
pub struct NotifyClient {
    config: WsConfig,
    clock: Arc<dyn Clock>,
    dispatcher: Arc<Dispatcher>,
    machine: Arc<Mutex<ConnectionStateMachine>>,
    event_tx: mpsc::Sender<ClientEvent>,
    event_rx: Arc<Mutex<mpsc::Receiver<ClientEvent>>>,
    shutdown: watch::Sender<bool>,
    supervisor: Mutex<Option<JoinHandle<()>>>,
}

impl NotifyClient {
    /// Creates a new client with the given configuration.
    ///
    /// # Errors
    ///
    /// Returns an error if the configuration is invalid.
    pub fn new(config: WsConfig) -> Result<Self, WsError> {
        Self::with_clock(config, Arc::new(SystemClock))
    }

    /// Creates a new client reading time from `clock`.
    ///
    /// # Errors
    ///
    /// Returns an error if the configuration is invalid.
    pub fn with_clock(config: WsConfig, clock: Arc<dyn Clock>) -> Result<Self, WsError> {
        config.validate()?;

        let queue = MessageQueue::new(config.queue.clone(), Arc::clone(&clock))
            .map_err(|e| WsError::InvalidConfig(e.to_string()))?;
        let machine =
            ConnectionStateMachine::new(config.reconnect_backoff(), config.max_reconnect_attempts);
        let (event_tx, event_rx) = mpsc::channel(EVENT_BUFFER);
        let (shutdown, _) = watch::channel(false);

        Ok(Self {
            config,
            clock,
            dispatcher: Arc::new(Dispatcher::new(Arc::new(queue))),
            machine: Arc::new(Mutex::new(machine)),
            event_tx,
            event_rx: Arc::new(Mutex::new(event_rx)),
            shutdown,
            supervisor: Mutex::new(None),
        })
    }

    /// Creates a new client with the given URL and token.
    ///
    /// # Errors
    ///
    /// Returns an error if the configuration is invalid.
    pub fn with_url(url: impl Into<String>, token: impl Into<String>) -> Result<Self, WsError> {
        Self::new(WsConfig::new(url).with_token(token))
    }

    /// Returns the client configuration.
    #[must_use]
    pub fn config(&self) -> &WsConfig {
        &self.config
    }

    /// Returns the dispatcher.
    #[must_use]
    pub fn dispatcher(&self) -> &Arc<Dispatcher> {
        &self.dispatcher
    }

    /// Returns the connection state.
    pub async fn state(&self) -> ConnectionState {
        self.machine.lock().await.state()
    }

    /// Returns true if a socket is open.
    pub async fn is_connected(&self) -> bool {
        self.state().await == ConnectionState::Open
    }

    /// Returns the number of queued outbound messages.
    pub async fn queue_len(&self) -> usize {
        self.dispatcher.queue().len().await
    }

    /// Connects to the server and keeps reconnecting until [`close`] or
    /// until the attempt limit is reached.
    ///
    /// [`close`]: Self::close
    ///
    /// # Errors
    ///
    /// Returns an error if the first connection attempt fails.
    pub async fn connect(&self) -> Result<(), WsError> {
        let mut supervisor = self.supervisor.lock().await;
        if supervisor.as_ref().is_some_and(|task| !task.is_finished()) {
            return Ok(());
        }

        self.machine.lock().await.connect();

        let stream = match tokio_tungstenite::connect_async(self.config.connection_url()).await {
            Ok((stream, _)) => stream,
            Err(e) => {
                self.machine.lock().await.on_connect_failed();
                return Err(WsError::Connection(e.to_string()));
            }
        };

        self.shutdown.send_replace(false);
        let runtime = Runtime {
            config: self.config.clone(),
            dispatcher: Arc::clone(&self.dispatcher),
            machine: Arc::clone(&self.machine),
            clock: Arc::clone(&self.clock),
            events: self.event_tx.clone(),
            shutdown: self.shutdown.subscribe(),
        };
        *supervisor = Some(tokio::spawn(runtime.supervise(stream)));

        Ok(())
    }

    /// Closes the connection without reconnecting.
    ///
    /// # Errors
    ///
    /// Returns an error if the supervisor task panicked.
    pub async fn close(&self) -> Result<(), WsError> {
        self.machine.lock().await.request_disconnect();
        self.shutdown.send_replace(true);

        let task = self.supervisor.lock().await.take();
        if let Some(task) = task {
            task.await.map_err(|e| WsError::Protocol(e.to_string()))?;
        }

        Ok(())
    }

    /// Returns the next event.
    ///
    /// # Errors
    ///
    /// Returns an error if the event channel is closed.
    pub async fn next_event(&self) -> Result<ClientEvent, WsError> {
        self.event_rx
            .lock()
            .await
            .recv()
            .await
            .ok_or(WsError::Closed)
    }

    /// Sends a frame now if connected, otherwise queues it.
    pub async fn send_message(
        &self,
        kind: &str,
        payload: Value,
        options: EnqueueOptions,
    ) -> SendOutcome {
        self.dispatcher.send_message(kind, payload, options).await
    }

    /// Sends a diagnostic echo.
    pub async fn echo(&self, data: Value) -> SendOutcome {
        self.dispatcher.echo(data).await
    }

    /// Acknowledges a notification.
    pub async fn acknowledge(&self, notification_id: i64) -> SendOutcome {
        self.dispatcher.acknowledge(notification_id).await
    }
}
