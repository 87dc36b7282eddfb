//! Connection manager.
//!
//! One manager owns at most one transport. Its state lives in a single actor
//! task; the handle sends it control messages over a channel. Every input
//! (control, handshake result, transport event, backoff timer) is fed through
//! [`ConnectionMachine`] and the resulting commands are executed in order,
//! so a timer or handshake that resolves after `disconnect()` finds the
//! machine already `Closed` and does nothing.

use staffpulse_core::{
    ClientMessage, RoomName, ServerEvent, SupportMessage, Typing, CLOSE_SERVER_DISCONNECT,
};
use std::future::pending;
use std::pin::Pin;
use std::sync::Arc;
use tokio::sync::{mpsc, oneshot, watch};
use tokio::task::JoinHandle;
use tokio::time::{sleep, timeout, Sleep};
use tracing::{debug, info, warn};

use crate::config::ClientConfig;
use crate::error::{ClientError, Result};
use crate::listeners::Listeners;
use crate::machine::{Command, ConnectionMachine};
use crate::state::{ConnectionState, ConnectionStatus, DisconnectReason};
use crate::transport::{Connector, TransportEvent, TransportLink};

/// Credentials for one authenticated session
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Credentials {
    pub token: String,
    /// When set, `join-user-room` is sent after every successful connect
    pub user_id: Option<String>,
}

impl Credentials {
    pub fn new(token: impl Into<String>) -> Self {
        Self {
            token: token.into(),
            user_id: None,
        }
    }

    pub fn with_user(mut self, user_id: impl Into<String>) -> Self {
        self.user_id = Some(user_id.into());
        self
    }
}

enum Control {
    Connect(Credentials),
    Disconnect,
    Send(ClientMessage, oneshot::Sender<Result<()>>),
    Shutdown,
}

type OpenResult = std::result::Result<Result<TransportLink>, tokio::time::error::Elapsed>;

/// Handle to a running connection manager
pub struct ConnectionManager {
    control: mpsc::UnboundedSender<Control>,
    status: watch::Receiver<ConnectionStatus>,
    listeners: Listeners,
    task: JoinHandle<()>,
}

impl ConnectionManager {
    /// Spawn the manager task. The manager starts `Idle`.
    ///
    /// # Errors
    ///
    /// `ClientError::Config` when the configuration does not validate; no
    /// task is spawned.
    pub fn start<C: Connector>(
        config: ClientConfig,
        connector: C,
        listeners: Listeners,
    ) -> Result<Self> {
        config.validate()?;

        let (control_tx, control_rx) = mpsc::unbounded_channel();
        let (status_tx, status_rx) = watch::channel(ConnectionStatus::idle());

        let actor = Actor {
            machine: ConnectionMachine::new(&config),
            config,
            connector: Arc::new(connector),
            credentials: None,
            outbound: None,
            inbound: None,
            pending_open: None,
            reconnect: None,
            status: status_tx,
            listeners: listeners.clone(),
        };
        let task = tokio::spawn(actor.run(control_rx));

        Ok(Self {
            control: control_tx,
            status: status_rx,
            listeners,
            task,
        })
    }

    /// Listener registry fed by this manager
    pub fn listeners(&self) -> &Listeners {
        &self.listeners
    }

    /// Open a connection. No-op while connecting or connected; logs a
    /// warning and does nothing when the token is empty.
    pub fn connect(&self, credentials: Credentials) {
        if self.control.send(Control::Connect(credentials)).is_err() {
            warn!("Connection manager stopped, connect ignored");
        }
    }

    /// Voluntary teardown. No reconnect follows.
    pub fn disconnect(&self) {
        if self.control.send(Control::Disconnect).is_err() {
            debug!("Connection manager already stopped");
        }
    }

    /// Send a message on the current connection.
    ///
    /// # Errors
    ///
    /// `ClientError::NotConnected` unless the manager is `Connected`.
    pub async fn send(&self, message: ClientMessage) -> Result<()> {
        let (reply_tx, reply_rx) = oneshot::channel();
        self.control
            .send(Control::Send(message, reply_tx))
            .map_err(|_| ClientError::Stopped)?;
        reply_rx.await.map_err(|_| ClientError::Stopped)?
    }

    pub async fn join_user_room(&self, user_id: impl Into<String>) -> Result<()> {
        self.send(ClientMessage::JoinUserRoom {
            user_id: user_id.into(),
        })
        .await
    }

    pub async fn join_room(&self, room: RoomName) -> Result<()> {
        self.send(ClientMessage::JoinRoom { room }).await
    }

    pub async fn leave_room(&self, room: RoomName) -> Result<()> {
        self.send(ClientMessage::LeaveRoom { room }).await
    }

    pub async fn send_support_message(&self, message: SupportMessage) -> Result<()> {
        self.send(ClientMessage::SupportMessage(message)).await
    }

    pub async fn send_typing(&self, typing: Typing) -> Result<()> {
        self.send(ClientMessage::Typing(typing)).await
    }

    pub async fn mark_notification_read(&self, notification_id: impl Into<String>) -> Result<()> {
        self.send(ClientMessage::MarkNotificationRead {
            notification_id: notification_id.into(),
        })
        .await
    }

    /// Current state
    pub fn state(&self) -> ConnectionState {
        self.status.borrow().state
    }

    /// Latest published status
    pub fn status(&self) -> ConnectionStatus {
        self.status.borrow().clone()
    }

    /// Watch every status change
    pub fn status_receiver(&self) -> watch::Receiver<ConnectionStatus> {
        self.status.clone()
    }

    /// Close the connection and stop the manager task
    pub async fn teardown(self) {
        let _ = self.control.send(Control::Shutdown);
        if let Err(e) = self.task.await {
            warn!(error = %e, "Connection manager task failed");
        }
    }
}

struct Actor<C> {
    config: ClientConfig,
    connector: Arc<C>,
    machine: ConnectionMachine,
    credentials: Option<Credentials>,
    outbound: Option<mpsc::Sender<String>>,
    inbound: Option<mpsc::Receiver<TransportEvent>>,
    pending_open: Option<JoinHandle<OpenResult>>,
    reconnect: Option<(u32, Pin<Box<Sleep>>)>,
    status: watch::Sender<ConnectionStatus>,
    listeners: Listeners,
}

impl<C: Connector> Actor<C> {
    async fn run(mut self, mut control: mpsc::UnboundedReceiver<Control>) {
        loop {
            tokio::select! {
                message = control.recv() => match message {
                    Some(Control::Connect(credentials)) => self.handle_connect(credentials),
                    Some(Control::Disconnect) => {
                        let commands = self.machine.disconnect();
                        self.credentials = None;
                        self.apply(commands);
                    }
                    Some(Control::Send(message, reply)) => {
                        let _ = reply.send(self.handle_send(&message));
                    }
                    Some(Control::Shutdown) | None => {
                        let commands = self.machine.disconnect();
                        self.apply(commands);
                        break;
                    }
                },

                result = wait_open(&mut self.pending_open) => {
                    self.pending_open = None;
                    self.handle_open(result);
                }

                event = wait_inbound(&mut self.inbound) => {
                    self.handle_transport(event);
                }

                attempt = wait_reconnect(&mut self.reconnect) => {
                    self.reconnect = None;
                    let commands = self.machine.on_reconnect_due(attempt);
                    self.apply(commands);
                }
            }
        }
        debug!("Connection manager stopped");
    }

    fn handle_connect(&mut self, credentials: Credentials) {
        let commands = self.machine.connect(&credentials.token);
        if !commands.is_empty() {
            self.credentials = Some(credentials);
        }
        self.apply(commands);
    }

    fn handle_send(&self, message: &ClientMessage) -> Result<()> {
        if !self.machine.state().is_connected() {
            return Err(ClientError::NotConnected);
        }
        let outbound = self.outbound.as_ref().ok_or(ClientError::NotConnected)?;
        let frame = message.to_frame()?;
        outbound
            .try_send(frame)
            .map_err(|e| ClientError::transport(e.to_string()))
    }

    fn handle_open(&mut self, result: OpenResult) {
        let commands = match result {
            Ok(Ok(link)) => {
                self.outbound = Some(link.outbound);
                self.inbound = Some(link.inbound);
                self.machine.on_open()
            }
            Ok(Err(ClientError::Rejected)) => {
                warn!("Handshake credential rejected");
                self.machine.on_failure(DisconnectReason::Rejected)
            }
            Ok(Err(e)) => {
                warn!(error = %e, "Handshake failed");
                self.machine
                    .on_failure(DisconnectReason::TransportError(e.to_string()))
            }
            Err(_) => {
                warn!(timeout_ms = self.config.handshake_timeout_ms, "Handshake timed out");
                self.machine.on_failure(DisconnectReason::HandshakeTimeout)
            }
        };
        self.apply(commands);
    }

    fn handle_transport(&mut self, event: Option<TransportEvent>) {
        let reason = match event {
            Some(TransportEvent::Frame(text)) => {
                match ServerEvent::from_frame(&text) {
                    Ok(event) => {
                        debug!(event = %event.kind(), "Event received");
                        self.listeners.dispatch(&event);
                    }
                    Err(e) => warn!(error = %e, "Dropping undecodable frame"),
                }
                return;
            }
            Some(TransportEvent::Closed { code, reason }) => {
                info!(?code, %reason, "Connection closed");
                if code == Some(CLOSE_SERVER_DISCONNECT) {
                    DisconnectReason::ServerClosed
                } else {
                    DisconnectReason::ConnectionLost
                }
            }
            Some(TransportEvent::Error(e)) => DisconnectReason::TransportError(e),
            None => DisconnectReason::ConnectionLost,
        };

        self.outbound = None;
        self.inbound = None;
        let commands = self.machine.on_failure(reason);
        self.apply(commands);
    }

    fn apply(&mut self, commands: Vec<Command>) {
        for command in commands {
            match command {
                Command::Open => self.open(),
                Command::Close => {
                    self.outbound = None;
                    self.inbound = None;
                    if let Some(handle) = self.pending_open.take() {
                        handle.abort();
                    }
                }
                Command::ScheduleReconnect { attempt, delay } => {
                    self.reconnect = Some((attempt, Box::pin(sleep(delay))));
                }
                Command::CancelReconnect => self.reconnect = None,
                Command::Resubscribe => self.resubscribe(),
                Command::Publish(status) => {
                    self.status.send_replace(status.clone());
                    self.listeners.dispatch_status(&status);
                }
            }
        }
    }

    fn open(&mut self) {
        let Some(credentials) = &self.credentials else {
            warn!("Open requested without credentials");
            return;
        };

        if let Some(previous) = self.pending_open.take() {
            previous.abort();
        }

        let connector = Arc::clone(&self.connector);
        let url = self.config.url.clone();
        let token = credentials.token.clone();
        let limit = self.config.handshake_timeout();

        debug!(url = %url, "Opening transport");
        self.pending_open = Some(tokio::spawn(async move {
            timeout(limit, connector.open(&url, &token)).await
        }));
    }

    fn resubscribe(&mut self) {
        let mut messages = Vec::new();
        if let Some(user_id) = self.credentials.as_ref().and_then(|c| c.user_id.clone()) {
            messages.push(ClientMessage::JoinUserRoom { user_id });
        }
        messages.extend(self.config.default_subscriptions.iter().cloned());

        for message in &messages {
            if let Err(e) = self.handle_send(message) {
                warn!(event = message.name(), error = %e, "Failed to resubscribe");
            }
        }
    }
}

async fn wait_open(pending_open: &mut Option<JoinHandle<OpenResult>>) -> OpenResult {
    match pending_open {
        Some(handle) => match handle.await {
            Ok(result) => result,
            Err(e) => Ok(Err(ClientError::transport(format!("handshake task failed: {e}")))),
        },
        None => pending().await,
    }
}

async fn wait_inbound(
    inbound: &mut Option<mpsc::Receiver<TransportEvent>>,
) -> Option<TransportEvent> {
    match inbound {
        Some(receiver) => receiver.recv().await,
        None => pending().await,
    }
}

async fn wait_reconnect(reconnect: &mut Option<(u32, Pin<Box<Sleep>>)>) -> u32 {
    match reconnect {
        Some((attempt, timer)) => {
            timer.as_mut().await;
            *attempt
        }
        None => pending().await,
    }
}
