//! The lobby session client.
//!
//! [`LobbyClient`] owns the connection, the state model, the callback
//! registries and the pending-request table, and exposes the embedding
//! program's entire surface: connect, send, request, receive, timeout
//! sweeping and start-script generation.
//!
//! The client is single-flow: one task calls [`receive`](LobbyClient::receive)
//! in a loop (interleaving sends as it pleases) and everything dispatches on
//! that task. Callbacks therefore see a settled state model and queue their
//! replies through an [`Outbox`] instead of re-entering the client.

use std::time::Instant;

use tas_proto::{BattleStatus, Color, Command};
use tokio::net::TcpStream;
use tracing::{debug, info, warn};

use crate::config::ClientConfig;
use crate::dispatch::{
    CallbackId, CallbackRegistry, EventCallback, Outbox, PendingTable, Priority, ResponseCallback,
    TimeoutCallback, TlsCallback,
};
use crate::error::{ConnectError, DisconnectReason, ScriptError, SessionError};
use crate::handlers;
use crate::script::{self, StartScript, StartScriptOverlay};
use crate::state::{normalize_requested_status, InconsistencySink, LobbyState, NoopSink};
use crate::transport::tls::{self, TlsDetails, TlsPhase};
use crate::transport::{Framer, ReadBatch, Stream};

/// Payload marker of the server's TLS upgrade acknowledgement.
const UPGRADE_SENTINEL: &str = "cmd=starttls";

/// Where the session stands.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionPhase {
    /// No live connection.
    Disconnected,
    /// Connected, not yet accepted by the server.
    Connected,
    /// The server accepted our login.
    Authenticated,
}

/// What one [`LobbyClient::receive`] call accomplished.
#[derive(Debug)]
pub enum ReceiveOutcome {
    /// Nothing arrived within the receive timeout.
    Idle,
    /// A batch of lines was dispatched.
    Batch(BatchSummary),
    /// The TLS handshake is in flight and made no final progress this cycle.
    HandshakePending,
    /// The TLS handshake completed; traffic is encrypted from here on.
    TlsEstablished(TlsDetails),
    /// The session ended. All session state has been reset.
    Disconnected(DisconnectReason),
}

/// Aggregate outcome of one dispatched batch.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct BatchSummary {
    /// Non-empty lines dispatched.
    pub lines: usize,
    /// Lines whose internal handler rejected the event.
    pub failures: usize,
    /// Lines no handler, callback or pending request claimed.
    pub unhandled: usize,
}

impl BatchSummary {
    /// True when every line was claimed and none failed.
    pub fn clean(&self) -> bool {
        self.failures == 0 && self.unhandled == 0
    }
}

struct LineOutcome {
    handled: bool,
    failed: bool,
}

/// A TAS lobby protocol client engine.
pub struct LobbyClient {
    config: ClientConfig,
    state: LobbyState,
    registry: CallbackRegistry,
    pending: PendingTable,
    framer: Option<Framer>,
    tls: TlsPhase,
    phase: SessionPhase,
    sink: Box<dyn InconsistencySink>,
}

impl LobbyClient {
    /// A disconnected client with the given configuration.
    pub fn new(config: ClientConfig) -> Self {
        Self {
            config,
            state: LobbyState::default(),
            registry: CallbackRegistry::default(),
            pending: PendingTable::default(),
            framer: None,
            tls: TlsPhase::PlainText,
            phase: SessionPhase::Disconnected,
            sink: Box::new(NoopSink),
        }
    }

    /// The active configuration.
    pub fn config(&self) -> &ClientConfig {
        &self.config
    }

    /// Current session phase.
    pub fn phase(&self) -> SessionPhase {
        self.phase
    }

    /// The state model. All collection accessors on it return deep copies.
    pub fn state(&self) -> &LobbyState {
        &self.state
    }

    /// Facts about the TLS layer, once established.
    pub fn tls_details(&self) -> Option<&TlsDetails> {
        match &self.tls {
            TlsPhase::Established(details) => Some(details),
            _ => None,
        }
    }

    /// When the last line went out, while connected.
    pub fn last_send(&self) -> Option<Instant> {
        self.framer.as_ref().map(Framer::last_send)
    }

    /// When the last read returned data, while connected.
    pub fn last_recv(&self) -> Option<Instant> {
        self.framer.as_ref().map(Framer::last_recv)
    }

    /// Replace the collaborator that observes state-handler rejections.
    pub fn set_inconsistency_sink(&mut self, sink: Box<dyn InconsistencySink>) {
        self.sink = sink;
    }

    // ========================================================================
    // Callback registration
    // ========================================================================

    /// Register a pre-callback: runs before the internal state handler.
    /// `name` is a command name or [`WILDCARD`](crate::dispatch::WILDCARD);
    /// `max_calls` of 0 means unbounded.
    pub fn add_pre_callback(
        &mut self,
        name: &str,
        priority: Priority,
        max_calls: u32,
        cb: EventCallback,
    ) -> CallbackId {
        self.registry.add_pre(name, priority, max_calls, cb)
    }

    /// Remove a pre-callback registration.
    pub fn remove_pre_callback(&mut self, id: CallbackId) -> bool {
        self.registry.remove_pre(id)
    }

    /// Register a callback: runs after the internal state handler. `name` is
    /// a command name, a `#<n> NAME` prefixed name, or
    /// [`DEFAULT_BUCKET`](crate::dispatch::DEFAULT_BUCKET) for commands with
    /// no specific registration.
    pub fn add_callback(
        &mut self,
        name: &str,
        priority: Priority,
        max_calls: u32,
        cb: EventCallback,
    ) -> CallbackId {
        self.registry.add_post(name, priority, max_calls, cb)
    }

    /// Remove a callback registration.
    pub fn remove_callback(&mut self, id: CallbackId) -> bool {
        self.registry.remove_post(id)
    }

    // ========================================================================
    // Connection lifecycle
    // ========================================================================

    /// Open the TCP connection to the configured server.
    pub async fn connect(&mut self) -> Result<(), ConnectError> {
        if self.framer.is_some() || matches!(self.tls, TlsPhase::Handshaking(_)) {
            return Err(ConnectError::AlreadyConnected);
        }
        let addr = (self.config.host.as_str(), self.config.port);
        let stream = tokio::time::timeout(self.config.connect_timeout(), TcpStream::connect(addr))
            .await
            .map_err(|_| ConnectError::Timeout(self.config.connect_timeout_secs))??;
        stream.set_nodelay(true)?;

        self.framer = Some(Framer::new(Stream::Tcp(stream), self.config.max_line_len));
        self.tls = TlsPhase::PlainText;
        self.phase = SessionPhase::Connected;
        info!(host = %self.config.host, port = self.config.port, "connected to lobby server");
        Ok(())
    }

    /// Close the connection gracefully and reset all session state. Safe to
    /// call when already disconnected.
    pub async fn disconnect(&mut self) {
        if let Some(framer) = self.framer.take() {
            framer
                .graceful_close(self.config.close_drain(), self.config.close_drain_reads)
                .await;
            info!("disconnected from lobby server");
        }
        self.reset_session();
    }

    fn reset_session(&mut self) {
        self.framer = None;
        self.tls = TlsPhase::PlainText;
        self.phase = SessionPhase::Disconnected;
        self.state.reset();
        self.pending.clear();
    }

    // ========================================================================
    // Sending
    // ========================================================================

    /// Marshall and send one command.
    pub async fn send_command(&mut self, cmd: &Command) -> Result<(), SessionError> {
        let line = tas_proto::marshall(cmd)?;
        let Some(framer) = self.framer.as_mut() else {
            return Err(SessionError::NotConnected);
        };
        framer.send_line(&line).await?;
        debug!(command = cmd.name(), "sent");

        // The server's join echo carries no script password; remember ours
        // so the member detail can pick it up.
        if cmd.name() == "JOINBATTLE" {
            if let Some(script_password) = cmd.arg(2) {
                self.state.note_script_password(script_password.to_string());
            }
        }
        Ok(())
    }

    /// Send a command and correlate it with expected responses. When one of
    /// `expected` arrives, `callback` fires once and every other expectation
    /// of this request is cleared. An expired deadline instead fires
    /// `on_timeout` with the request token during
    /// [`check_timeouts`](Self::check_timeouts).
    pub async fn request(
        &mut self,
        cmd: &Command,
        expected: &[&str],
        callback: ResponseCallback,
        on_timeout: Option<TimeoutCallback>,
    ) -> Result<(), SessionError> {
        self.send_command(cmd).await?;
        let deadline = Instant::now() + self.config.request_timeout();
        self.pending.register(
            cmd.name().to_string(),
            expected.iter().map(|s| (*s).to_string()).collect(),
            callback,
            deadline,
            on_timeout,
        );
        Ok(())
    }

    /// Announce our own battle status and team color.
    ///
    /// Under the narrow status layout, wide player/ally numbers are sent
    /// modulo 16 and remembered at full width so the server echo can be
    /// reconciled against them.
    pub async fn my_battle_status(
        &mut self,
        status: BattleStatus,
        color: Color,
    ) -> Result<(), SessionError> {
        let mode = self.state.status_mode();
        let value = normalize_requested_status(status, mode).marshall(mode)?;
        let cmd = Command::new("MYBATTLESTATUS")
            .word(value.to_string())
            .word(color.marshall().to_string());
        self.send_command(&cmd).await?;
        self.state.note_requested_self_status(status, color);
        Ok(())
    }

    /// Add an AI to the joined battle. `ai_label` is the combined
    /// `ShortName|Version` identifier.
    pub async fn add_bot(
        &mut self,
        name: &str,
        status: BattleStatus,
        color: Color,
        ai_label: &str,
    ) -> Result<(), SessionError> {
        let mode = self.state.status_mode();
        let value = normalize_requested_status(status, mode).marshall(mode)?;
        let cmd = Command::new("ADDBOT")
            .word(name)
            .word(value.to_string())
            .word(color.marshall().to_string())
            .sentence(ai_label);
        self.send_command(&cmd).await?;
        self.state.note_requested_bot_status(name, status);
        Ok(())
    }

    /// Update an AI's battle status and color.
    pub async fn update_bot(
        &mut self,
        name: &str,
        status: BattleStatus,
        color: Color,
    ) -> Result<(), SessionError> {
        let mode = self.state.status_mode();
        let value = normalize_requested_status(status, mode).marshall(mode)?;
        let cmd = Command::new("UPDATEBOT")
            .word(name)
            .word(value.to_string())
            .word(color.marshall().to_string());
        self.send_command(&cmd).await?;
        self.state.note_requested_bot_status(name, status);
        Ok(())
    }

    /// Join a battle. `password` answers a passworded battle; a generated
    /// `script_password` authenticates us towards the host in-game.
    pub async fn join_battle(
        &mut self,
        id: u32,
        password: Option<&str>,
        script_password: Option<&str>,
    ) -> Result<(), SessionError> {
        let mut cmd = Command::new("JOINBATTLE").word(id.to_string());
        match (password, script_password) {
            (Some(password), Some(script)) => cmd = cmd.word(password).word(script),
            (Some(password), None) => cmd = cmd.word(password),
            // The password slot cannot be skipped positionally.
            (None, Some(script)) => cmd = cmd.word("empty").word(script),
            (None, None) => {}
        }
        self.send_command(&cmd).await
    }

    /// Request the in-band TLS upgrade. The handshake begins when the server
    /// acknowledges; `callback` (if any) fires with the final outcome.
    pub async fn request_tls_upgrade(
        &mut self,
        callback: Option<TlsCallback>,
    ) -> Result<(), SessionError> {
        if !matches!(self.tls, TlsPhase::PlainText) {
            return Err(SessionError::TlsAlreadyRequested(self.tls.label()));
        }
        self.send_command(&Command::new("STARTTLS")).await?;
        self.tls = TlsPhase::Requested { callback };
        info!("tls upgrade requested");
        Ok(())
    }

    // ========================================================================
    // Receiving
    // ========================================================================

    /// Drive the session one cycle: poll an in-flight TLS handshake, or
    /// perform one bounded read and dispatch every line it completed.
    ///
    /// Dispatch order per line: wildcard pre-callbacks, specific
    /// pre-callbacks, the internal state handler, the callback bucket
    /// (full prefixed name, else canonical name, else default), then pending
    /// request resolution. Handler failures are forwarded to the
    /// inconsistency sink and counted in the batch summary; the batch always
    /// runs to completion.
    pub async fn receive(&mut self) -> Result<ReceiveOutcome, SessionError> {
        match std::mem::replace(&mut self.tls, TlsPhase::PlainText) {
            TlsPhase::Handshaking(handshake) => return self.drive_handshake(handshake).await,
            other => self.tls = other,
        }

        let Some(framer) = self.framer.as_mut() else {
            return Err(SessionError::NotConnected);
        };
        let batch = framer.read_batch(self.config.recv_timeout()).await;
        let lines = match batch {
            ReadBatch::Idle => return Ok(ReceiveOutcome::Idle),
            ReadBatch::Closed(reason) => {
                warn!(%reason, "session closed");
                self.reset_session();
                return Ok(ReceiveOutcome::Disconnected(reason));
            }
            ReadBatch::Lines(lines) => lines,
        };

        let mut summary = BatchSummary::default();
        for line in lines {
            if line.is_empty() {
                continue;
            }
            // The upgrade acknowledgement takes the socket away from line
            // traffic; nothing may follow it in plain text.
            if matches!(self.tls, TlsPhase::Requested { .. }) {
                if let Ok(cmd) = tas_proto::unmarshall(&line) {
                    if is_upgrade_ack(&cmd) {
                        summary.lines += 1;
                        self.begin_handshake();
                        break;
                    }
                }
            }
            summary.lines += 1;
            let outcome = self.dispatch_line(&line).await;
            if outcome.failed {
                summary.failures += 1;
            }
            if !outcome.handled {
                summary.unhandled += 1;
            }
        }
        Ok(ReceiveOutcome::Batch(summary))
    }

    /// Sweep pending requests and fire the timeout callback of every
    /// expired one. The embedding program schedules this.
    pub async fn check_timeouts(&mut self) {
        for (token, on_timeout) in self.pending.sweep(Instant::now()) {
            warn!(token = %token, "request timed out");
            if let Some(cb) = on_timeout {
                let mut outbox = Outbox::default();
                cb(&token, &self.state, &mut outbox);
                self.flush_outbox(outbox).await;
            }
        }
    }

    /// Generate a start script from the stored in-game snapshot, or from the
    /// live joined battle when none is stored.
    pub fn start_script(
        &self,
        sides: &[String],
        autohost: bool,
        overlay: &StartScriptOverlay,
    ) -> Result<StartScript, ScriptError> {
        script::for_state(&self.state, sides, autohost, overlay)
    }

    // ========================================================================
    // Internals
    // ========================================================================

    async fn dispatch_line(&mut self, line: &str) -> LineOutcome {
        let cmd = match tas_proto::unmarshall(line) {
            Ok(cmd) => cmd,
            Err(e) => {
                debug!(error = %e, line, "undecodable line, dispatching as a single token");
                Command {
                    prefix: None,
                    words: vec![line.to_string()],
                    tails: Vec::new(),
                }
            }
        };
        let full_name = cmd.full_name();
        let mut outbox = Outbox::default();

        let mut handled = self.registry.run_pre(&cmd, &self.state, &mut outbox);

        let mut failed = false;
        let mut notes = Vec::new();
        match handlers::dispatch(&mut self.state, &cmd, &mut notes) {
            Some(Ok(())) => handled = true,
            Some(Err(e)) => {
                handled = true;
                failed = true;
                warn!(command = cmd.name(), error = %e, "event rejected by state handler");
                self.sink.on_inconsistency(cmd.name(), &e.to_string());
            }
            None => {}
        }
        for note in &notes {
            self.sink.on_inconsistency(cmd.name(), note);
        }

        if cmd.name() == "ACCEPTED" && !failed {
            self.phase = SessionPhase::Authenticated;
        }

        if self.registry.run_post(&full_name, &cmd, &self.state, &mut outbox) {
            handled = true;
        }

        let resolved = self
            .pending
            .resolve(&full_name)
            .or_else(|| self.pending.resolve(cmd.name()));
        if let Some((token, callback)) = resolved {
            handled = true;
            debug!(token = %token, response = cmd.name(), "pending request resolved");
            if let Some(cb) = callback {
                cb(&cmd, &self.state, &mut outbox);
            }
        }

        if !handled && self.config.warn_unhandled {
            warn!(command = cmd.name(), "unhandled server command");
        }

        self.flush_outbox(outbox).await;
        LineOutcome { handled, failed }
    }

    async fn flush_outbox(&mut self, mut outbox: Outbox) {
        for cmd in outbox.drain() {
            if let Err(e) = self.send_command(&cmd).await {
                warn!(error = %e, command = cmd.name(), "dropping queued replies after send failure");
                break;
            }
        }
    }

    fn begin_handshake(&mut self) {
        let Some(framer) = self.framer.take() else {
            return;
        };
        let TlsPhase::Requested { callback } = std::mem::replace(&mut self.tls, TlsPhase::PlainText)
        else {
            self.framer = Some(framer);
            return;
        };
        match framer.into_stream() {
            Stream::Tcp(tcp) => match tls::start_handshake(&self.config.host, tcp, callback) {
                Ok(handshake) => {
                    info!("tls upgrade acknowledged, handshake started");
                    self.tls = TlsPhase::Handshaking(handshake);
                }
                Err(e) => {
                    warn!(error = %e, "cannot start tls handshake");
                    self.reset_session();
                }
            },
            Stream::Tls(stream) => {
                // The upgrade request is only accepted in plain text, so the
                // stream cannot already be encrypted; keep the session alive
                // if it somehow is.
                warn!("tls upgrade acknowledged on an encrypted stream");
                self.framer = Some(Framer::new(Stream::Tls(stream), self.config.max_line_len));
            }
        }
    }

    async fn drive_handshake(
        &mut self,
        mut handshake: tls::HandshakeInFlight,
    ) -> Result<ReceiveOutcome, SessionError> {
        match tokio::time::timeout(self.config.handshake_poll(), &mut handshake.fut).await {
            // Elapsing the poll budget is the normal in-progress outcome.
            Err(_) => {
                self.tls = TlsPhase::Handshaking(handshake);
                Ok(ReceiveOutcome::HandshakePending)
            }
            Ok(Ok(stream)) => {
                let details = TlsDetails {
                    fingerprint_sha256: tls::peer_fingerprint(&stream).unwrap_or_default(),
                    hostname_verified: handshake.hostname_verified(),
                };
                self.framer = Some(Framer::new(
                    Stream::Tls(Box::new(stream)),
                    self.config.max_line_len,
                ));
                self.tls = TlsPhase::Established(details.clone());
                info!(
                    fingerprint = %details.fingerprint_sha256,
                    verified = details.hostname_verified,
                    "tls established"
                );
                if let Some(cb) = handshake.callback.take() {
                    let mut outbox = Outbox::default();
                    cb(true, &mut outbox);
                    self.flush_outbox(outbox).await;
                }
                Ok(ReceiveOutcome::TlsEstablished(details))
            }
            Ok(Err(e)) => {
                warn!(error = %e, "tls handshake failed, dropping session");
                if let Some(cb) = handshake.callback.take() {
                    // The connection is gone; queued replies have nowhere
                    // to go.
                    let mut outbox = Outbox::default();
                    cb(false, &mut outbox);
                }
                self.reset_session();
                Ok(ReceiveOutcome::Disconnected(
                    DisconnectReason::HandshakeFailed(e.to_string()),
                ))
            }
        }
    }
}

fn is_upgrade_ack(cmd: &Command) -> bool {
    cmd.name() == "OK"
        && cmd
            .rest(0)
            .is_some_and(|payload| payload.to_lowercase().contains(UPGRADE_SENTINEL))
}
