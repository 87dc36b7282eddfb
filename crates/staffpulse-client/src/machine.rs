//! Connection state machine.
//!
//! Pure transition logic with no IO and no timers: every input returns the
//! commands the manager must carry out. Stale inputs (a reconnect timer that
//! fires after `disconnect`, a handshake that completes after the manager
//! was closed) are answered with nothing, or with `Close`.

use std::time::Duration;
use tracing::{debug, info, warn};

use crate::config::{backoff, ClientConfig};
use crate::state::{ConnectionState, ConnectionStatus, DisconnectReason};

/// Side effect requested by a transition.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    /// Start a handshake with the stored credential.
    Open,
    /// Drop the transport and any in-flight handshake.
    Close,
    /// Arm the backoff timer for `attempt`.
    ScheduleReconnect { attempt: u32, delay: Duration },
    /// Disarm the backoff timer.
    CancelReconnect,
    /// Send `join-user-room` and the default subscriptions.
    Resubscribe,
    /// Report a new status.
    Publish(ConnectionStatus),
}

pub struct ConnectionMachine {
    state: ConnectionState,
    attempt: u32,
    base_delay_ms: u64,
    max_attempts: u32,
    reason: Option<DisconnectReason>,
    fatal: bool,
}

impl ConnectionMachine {
    pub fn new(config: &ClientConfig) -> Self {
        Self {
            state: ConnectionState::Idle,
            attempt: 0,
            base_delay_ms: config.base_delay_ms,
            max_attempts: config.max_attempts,
            reason: None,
            fatal: false,
        }
    }

    pub fn state(&self) -> ConnectionState {
        self.state
    }

    pub fn attempt(&self) -> u32 {
        self.attempt
    }

    pub fn status(&self) -> ConnectionStatus {
        let next_retry = (self.state == ConnectionState::Reconnecting)
            .then(|| self.delay_for(self.attempt));
        ConnectionStatus {
            state: self.state,
            attempt: self.attempt,
            reason: self.reason.clone(),
            next_retry,
            fatal: self.fatal,
        }
    }

    pub fn delay_for(&self, attempt: u32) -> Duration {
        backoff(self.base_delay_ms, attempt)
    }

    /// Explicit connect request.
    pub fn connect(&mut self, credential: &str) -> Vec<Command> {
        match self.state {
            ConnectionState::Connecting | ConnectionState::Connected => {
                debug!(state = %self.state, "Connect ignored");
                Vec::new()
            }
            _ if credential.trim().is_empty() => {
                warn!("No credential available, not connecting");
                Vec::new()
            }
            ConnectionState::Reconnecting => {
                // Skip the remaining backoff
                self.state = ConnectionState::Connecting;
                vec![
                    Command::CancelReconnect,
                    Command::Open,
                    Command::Publish(self.status()),
                ]
            }
            ConnectionState::Idle | ConnectionState::Disconnected | ConnectionState::Closed => {
                self.state = ConnectionState::Connecting;
                self.attempt = 0;
                self.reason = None;
                self.fatal = false;
                vec![Command::Open, Command::Publish(self.status())]
            }
        }
    }

    /// Handshake completed.
    pub fn on_open(&mut self) -> Vec<Command> {
        if self.state != ConnectionState::Connecting {
            debug!(state = %self.state, "Discarding late handshake");
            return vec![Command::Close];
        }

        self.state = ConnectionState::Connected;
        self.attempt = 0;
        self.reason = None;
        info!("Connected");
        vec![Command::Resubscribe, Command::Publish(self.status())]
    }

    /// Handshake failed or an established transport went away.
    pub fn on_failure(&mut self, reason: DisconnectReason) -> Vec<Command> {
        if !matches!(
            self.state,
            ConnectionState::Connecting | ConnectionState::Connected
        ) {
            debug!(state = %self.state, %reason, "Ignoring failure outside an active connection");
            return Vec::new();
        }

        let mut commands = vec![Command::Close];

        self.state = ConnectionState::Disconnected;
        self.reason = Some(reason.clone());
        commands.push(Command::Publish(self.status()));

        if !reason.is_recoverable() {
            match reason {
                DisconnectReason::Rejected => warn!("Handshake rejected, not reconnecting"),
                _ => warn!(%reason, "Connection closed by server, not reconnecting"),
            }
            self.state = ConnectionState::Closed;
            commands.push(Command::Publish(self.status()));
            return commands;
        }

        self.attempt += 1;
        if self.attempt > self.max_attempts {
            warn!(attempts = self.max_attempts, "Reconnect budget exhausted");
            self.state = ConnectionState::Closed;
            self.fatal = true;
            commands.push(Command::Publish(self.status()));
            return commands;
        }

        let delay = self.delay_for(self.attempt);
        info!(
            attempt = self.attempt,
            delay_ms = delay.as_millis() as u64,
            %reason,
            "Scheduling reconnect"
        );
        self.state = ConnectionState::Reconnecting;
        commands.push(Command::ScheduleReconnect {
            attempt: self.attempt,
            delay,
        });
        commands.push(Command::Publish(self.status()));
        commands
    }

    /// Backoff timer for `attempt` elapsed.
    pub fn on_reconnect_due(&mut self, attempt: u32) -> Vec<Command> {
        if self.state != ConnectionState::Reconnecting || attempt != self.attempt {
            debug!(state = %self.state, attempt, "Stale reconnect timer");
            return Vec::new();
        }

        self.state = ConnectionState::Connecting;
        vec![Command::Open, Command::Publish(self.status())]
    }

    /// Voluntary teardown.
    pub fn disconnect(&mut self) -> Vec<Command> {
        self.state = ConnectionState::Closed;
        self.attempt = 0;
        self.fatal = false;
        self.reason = Some(DisconnectReason::Voluntary);
        vec![
            Command::CancelReconnect,
            Command::Close,
            Command::Publish(self.status()),
        ]
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn machine(max_attempts: u32) -> ConnectionMachine {
        let config = ClientConfig::builder()
            .base_delay_ms(1_000)
            .max_attempts(max_attempts)
            .build();
        ConnectionMachine::new(&config)
    }

    fn scheduled(commands: &[Command]) -> Option<(u32, Duration)> {
        commands.iter().find_map(|c| match c {
            Command::ScheduleReconnect { attempt, delay } => Some((*attempt, *delay)),
            _ => None,
        })
    }

    #[test]
    fn test_connect_requires_credential() {
        let mut m = machine(5);
        assert!(m.connect("  ").is_empty());
        assert_eq!(m.state(), ConnectionState::Idle);
    }

    #[test]
    fn test_connect_is_noop_while_active() {
        let mut m = machine(5);
        assert_eq!(m.connect("tok")[0], Command::Open);
        assert!(m.connect("tok").is_empty());

        m.on_open();
        assert!(m.connect("tok").is_empty());
        assert_eq!(m.state(), ConnectionState::Connected);
    }

    #[test]
    fn test_open_resets_attempts_and_resubscribes() {
        let mut m = machine(5);
        m.connect("tok");
        m.on_failure(DisconnectReason::ConnectionLost);
        m.on_reconnect_due(1);
        let commands = m.on_open();
        assert_eq!(commands[0], Command::Resubscribe);
        assert_eq!(m.attempt(), 0);
        assert_eq!(m.state(), ConnectionState::Connected);
    }

    #[test]
    fn test_backoff_sequence_then_closed() {
        let mut m = machine(5);
        m.connect("tok");
        m.on_open();

        let mut delays = Vec::new();
        let mut commands = m.on_failure(DisconnectReason::ConnectionLost);
        while let Some((attempt, delay)) = scheduled(&commands) {
            delays.push(delay.as_millis() as u64);
            m.on_reconnect_due(attempt);
            commands = m.on_failure(DisconnectReason::TransportError("refused".into()));
        }

        assert_eq!(delays, vec![1_000, 2_000, 4_000, 8_000, 16_000]);
        assert_eq!(m.state(), ConnectionState::Closed);
        assert!(m.status().fatal);
        assert!(m.status().requires_refresh());
    }

    #[test]
    fn test_server_close_does_not_reconnect() {
        let mut m = machine(5);
        m.connect("tok");
        m.on_open();
        let commands = m.on_failure(DisconnectReason::ServerClosed);
        assert!(scheduled(&commands).is_none());
        assert_eq!(m.state(), ConnectionState::Closed);
        assert!(m.status().requires_refresh());
    }

    #[test]
    fn test_rejected_handshake_is_terminal_and_quiet() {
        let mut m = machine(5);
        m.connect("bad");
        let commands = m.on_failure(DisconnectReason::Rejected);
        assert!(scheduled(&commands).is_none());
        assert_eq!(m.state(), ConnectionState::Closed);
        assert!(!m.status().requires_refresh());
    }

    #[test]
    fn test_disconnect_makes_pending_timer_stale() {
        let mut m = machine(5);
        m.connect("tok");
        m.on_failure(DisconnectReason::HandshakeTimeout);
        assert_eq!(m.state(), ConnectionState::Reconnecting);

        let commands = m.disconnect();
        assert!(commands.contains(&Command::CancelReconnect));
        assert_eq!(m.attempt(), 0);

        assert!(m.on_reconnect_due(1).is_empty());
        assert_eq!(m.state(), ConnectionState::Closed);
    }

    #[test]
    fn test_late_handshake_after_disconnect_is_closed() {
        let mut m = machine(5);
        m.connect("tok");
        m.disconnect();
        assert_eq!(m.on_open(), vec![Command::Close]);
        assert!(m.on_failure(DisconnectReason::ConnectionLost).is_empty());
    }

    #[test]
    fn test_connect_after_close_starts_fresh() {
        let mut m = machine(1);
        m.connect("tok");
        m.on_failure(DisconnectReason::ConnectionLost);
        m.on_reconnect_due(1);
        m.on_failure(DisconnectReason::ConnectionLost);
        assert!(m.status().fatal);

        assert_eq!(m.connect("tok")[0], Command::Open);
        assert!(!m.status().fatal);
        assert_eq!(m.attempt(), 0);
    }

    #[test]
    fn test_reconnecting_status_reports_next_retry() {
        let mut m = machine(5);
        m.connect("tok");
        m.on_failure(DisconnectReason::ConnectionLost);
        m.on_reconnect_due(1);
        m.on_failure(DisconnectReason::ConnectionLost);
        let status = m.status();
        assert_eq!(status.state, ConnectionState::Reconnecting);
        assert_eq!(status.attempt, 2);
        assert_eq!(status.next_retry, Some(Duration::from_millis(2_000)));
    }
}
