//! Async client for one bingo room subscription.
//!
//! [`BingoClient`] is a thin handle that talks to a background transport loop
//! over an unbounded command channel. The loop exclusively owns the
//! [`RoomSession`]; the handle reads state through a
//! [`watch`](tokio::sync::watch) channel of [`RoomView`] snapshots and
//! receives [`BingoEvent`]s on the bounded channel returned from
//! [`BingoClient::start`].
//!
//! # Example
//!
//! ```rust,ignore
//! let connector = WebSocketConnector::new("wss://bingo.example/rooms");
//! let config = BingoClientConfig::new("room-42")
//!     .with_auth_token(token)
//!     .with_user_id("user-7")
//!     .with_auto_mark(true);
//! let (client, mut events) = BingoClient::start(connector, config);
//!
//! while let Some(event) = events.recv().await {
//!     match event {
//!         BingoEvent::ClaimRejected { message, insufficient_balance, .. } => { /* … */ }
//!         BingoEvent::Disconnected { .. } => break,
//!         _ => render(&client.view()),
//!     }
//! }
//! ```

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{mpsc, oneshot, watch};
use tokio::time::{Instant, MissedTickBehavior};
use tracing::{debug, error, info, warn};

use crate::countdown::RoundTiming;
use crate::error::{BingoSyncError, Result};
use crate::event::BingoEvent;
use crate::modal::{ModalKind, NotificationKind, DEFAULT_NOTIFICATION_DURATION};
use crate::normalizer::{DiscardHook, Normalized, Normalizer};
use crate::number::NumberCode;
use crate::protocol::{CardIndex, ClientMessage, RoomEvent, RoomId, UserId};
use crate::round::DEFAULT_LAST_NUMBERS_WINDOW;
use crate::session::{self, RoomSession, RoomView, SessionSettings};
use crate::sync::{Admission, Synchronizer, DEFAULT_SYNC_TIMEOUT};
use crate::transport::{Connector, Transport};

/// Default capacity of the bounded event channel.
const DEFAULT_EVENT_CHANNEL_CAPACITY: usize = 256;

/// Default timeout for the graceful shutdown.
const DEFAULT_SHUTDOWN_TIMEOUT: Duration = Duration::from_secs(1);

/// Default period of the countdown/notification tick.
const DEFAULT_TICK_INTERVAL: Duration = Duration::from_millis(250);

const DEFAULT_RECONNECT_INITIAL_BACKOFF: Duration = Duration::from_millis(500);
const DEFAULT_RECONNECT_MAX_BACKOFF: Duration = Duration::from_secs(10);

const SHUTDOWN_REASON: &str = "client shut down";

// ── Configuration ───────────────────────────────────────────────────

/// Configuration for a [`BingoClient`].
///
/// The only required field is the room to subscribe to.
///
/// # Example
///
/// ```
/// use bingo_sync_client::client::BingoClientConfig;
/// use std::time::Duration;
///
/// let config = BingoClientConfig::new("room-42")
///     .with_auth_token("secret")
///     .with_event_channel_capacity(0)
///     .with_reconnect_backoff(Duration::from_secs(1), Duration::from_secs(30));
/// assert_eq!(config.room_id, "room-42");
/// assert_eq!(config.event_channel_capacity, 1);
/// assert!(config.auth_token.is_some());
/// ```
#[derive(Clone)]
pub struct BingoClientConfig {
    /// Room to subscribe to at start.
    pub room_id: RoomId,
    /// Sent with `join-room`. Without a token the client does not reconnect.
    pub auth_token: Option<String>,
    /// The local player's user id, used to recognize local winners.
    pub user_id: Option<UserId>,
    /// Capacity of the bounded event channel.
    ///
    /// When the consumer cannot keep up, events are dropped (with a warning)
    /// rather than blocking the transport loop. `Disconnected` is always
    /// delivered. Defaults to **256**; values below 1 are clamped to 1.
    pub event_channel_capacity: usize,
    /// Time the transport loop gets to close cleanly on
    /// [`BingoClient::shutdown`] before it is aborted. Defaults to **1 second**.
    pub shutdown_timeout: Duration,
    /// Period of the countdown and notification tick. Defaults to **250 ms**.
    pub tick_interval: Duration,
    /// How long to wait for `room-state-sync` before retrying. Defaults to
    /// **5 seconds**.
    pub sync_timeout: Duration,
    pub reconnect_initial_backoff: Duration,
    pub reconnect_max_backoff: Duration,
    /// Failed sync requests before the persistent banner is shown. Retries
    /// continue regardless. Defaults to **1**.
    pub sync_banner_after: u32,
    pub timing: RoundTiming,
    /// Base on-screen time of transient notifications. Defaults to **3 seconds**.
    pub notification_duration: Duration,
    pub last_numbers_window: usize,
    /// Mark called numbers on local cards automatically.
    pub auto_mark: bool,
    /// Server clock minus local clock in milliseconds; display only.
    pub server_clock_offset_ms: i64,
    /// Observer for frames the normalizer drops.
    pub discard_hook: Option<DiscardHook>,
}

impl BingoClientConfig {
    /// Create a configuration for `room_id` with default values.
    pub fn new(room_id: impl Into<RoomId>) -> Self {
        Self {
            room_id: room_id.into(),
            auth_token: None,
            user_id: None,
            event_channel_capacity: DEFAULT_EVENT_CHANNEL_CAPACITY,
            shutdown_timeout: DEFAULT_SHUTDOWN_TIMEOUT,
            tick_interval: DEFAULT_TICK_INTERVAL,
            sync_timeout: DEFAULT_SYNC_TIMEOUT,
            reconnect_initial_backoff: DEFAULT_RECONNECT_INITIAL_BACKOFF,
            reconnect_max_backoff: DEFAULT_RECONNECT_MAX_BACKOFF,
            sync_banner_after: 1,
            timing: RoundTiming::default(),
            notification_duration: DEFAULT_NOTIFICATION_DURATION,
            last_numbers_window: DEFAULT_LAST_NUMBERS_WINDOW,
            auto_mark: false,
            server_clock_offset_ms: 0,
            discard_hook: None,
        }
    }

    #[must_use]
    pub fn with_auth_token(mut self, token: impl Into<String>) -> Self {
        self.auth_token = Some(token.into());
        self
    }

    #[must_use]
    pub fn with_user_id(mut self, user_id: impl Into<UserId>) -> Self {
        self.user_id = Some(user_id.into());
        self
    }

    /// Values below 1 are clamped to 1.
    #[must_use]
    pub fn with_event_channel_capacity(mut self, capacity: usize) -> Self {
        self.event_channel_capacity = capacity.max(1);
        self
    }

    /// A zero timeout aborts the transport loop without a graceful close.
    #[must_use]
    pub fn with_shutdown_timeout(mut self, timeout: Duration) -> Self {
        self.shutdown_timeout = timeout;
        self
    }

    /// Values below 1 ms are clamped to 1 ms.
    #[must_use]
    pub fn with_tick_interval(mut self, interval: Duration) -> Self {
        self.tick_interval = interval.max(Duration::from_millis(1));
        self
    }

    #[must_use]
    pub fn with_sync_timeout(mut self, timeout: Duration) -> Self {
        self.sync_timeout = timeout;
        self
    }

    /// Exponential backoff bounds. `max` is raised to `initial` if lower.
    #[must_use]
    pub fn with_reconnect_backoff(mut self, initial: Duration, max: Duration) -> Self {
        self.reconnect_initial_backoff = initial;
        self.reconnect_max_backoff = max.max(initial);
        self
    }

    /// Values below 1 are clamped to 1.
    #[must_use]
    pub fn with_sync_banner_after(mut self, failed_attempts: u32) -> Self {
        self.sync_banner_after = failed_attempts.max(1);
        self
    }

    #[must_use]
    pub fn with_round_timing(mut self, timing: RoundTiming) -> Self {
        self.timing = timing;
        self
    }

    #[must_use]
    pub fn with_notification_duration(mut self, duration: Duration) -> Self {
        self.notification_duration = duration;
        self
    }

    #[must_use]
    pub fn with_last_numbers_window(mut self, window: usize) -> Self {
        self.last_numbers_window = window.max(1);
        self
    }

    #[must_use]
    pub fn with_auto_mark(mut self, enabled: bool) -> Self {
        self.auto_mark = enabled;
        self
    }

    #[must_use]
    pub fn with_server_clock_offset_ms(mut self, offset_ms: i64) -> Self {
        self.server_clock_offset_ms = offset_ms;
        self
    }

    #[must_use]
    pub fn with_discard_hook(mut self, hook: DiscardHook) -> Self {
        self.discard_hook = Some(hook);
        self
    }

    fn session_settings(&self) -> SessionSettings {
        SessionSettings {
            user_id: self.user_id.clone(),
            timing: self.timing,
            last_numbers_window: self.last_numbers_window,
            notification_duration: self.notification_duration,
            auto_mark: self.auto_mark,
            server_clock_offset_ms: self.server_clock_offset_ms,
        }
    }

    fn normalizer(&self) -> Normalizer {
        match &self.discard_hook {
            Some(hook) => Normalizer::new().with_hook(Arc::clone(hook)),
            None => Normalizer::new(),
        }
    }
}

impl std::fmt::Debug for BingoClientConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BingoClientConfig")
            .field("room_id", &self.room_id)
            .field("has_auth_token", &self.auth_token.is_some())
            .field("user_id", &self.user_id)
            .field("event_channel_capacity", &self.event_channel_capacity)
            .field("shutdown_timeout", &self.shutdown_timeout)
            .field("tick_interval", &self.tick_interval)
            .field("sync_timeout", &self.sync_timeout)
            .field("reconnect_initial_backoff", &self.reconnect_initial_backoff)
            .field("reconnect_max_backoff", &self.reconnect_max_backoff)
            .field("auto_mark", &self.auto_mark)
            .field("has_discard_hook", &self.discard_hook.is_some())
            .finish_non_exhaustive()
    }
}

/// Delay before reconnect attempt `attempt` (1-based): doubling from
/// `initial`, capped at `max`.
fn backoff_delay(initial: Duration, max: Duration, attempt: u32) -> Duration {
    let doublings = attempt.saturating_sub(1).min(16);
    initial.saturating_mul(1 << doublings).min(max)
}

// ── Commands and shared state ───────────────────────────────────────

/// Requests from the handle; only the transport loop mutates the session.
#[derive(Debug)]
enum Command {
    Send(ClientMessage),
    Mark {
        card_index: CardIndex,
        number: NumberCode,
    },
    Unmark {
        card_index: CardIndex,
        number: NumberCode,
    },
    OpenModal(ModalKind),
    CloseModal(ModalKind),
    Dismiss(NotificationKind),
    SwitchRoom(RoomId),
    Resync,
}

struct ClientState {
    connected: AtomicBool,
    synchronized: AtomicBool,
}

// ── Client handle ───────────────────────────────────────────────────

/// Async client handle for one room subscription at a time.
///
/// Methods queue a command to the transport loop and return immediately.
/// [`claim_bingo`](Self::claim_bingo) additionally marks the claim flag
/// before it returns, so the loop sees the claim even if a `bingo-claimed`
/// is already queued behind it.
pub struct BingoClient {
    cmd_tx: mpsc::UnboundedSender<Command>,
    state: Arc<ClientState>,
    view_rx: watch::Receiver<RoomView>,
    task: Option<tokio::task::JoinHandle<()>>,
    shutdown_tx: Option<oneshot::Sender<()>>,
    shutdown_timeout: Duration,
}

impl BingoClient {
    /// Spawn the transport loop and return a handle plus event receiver.
    ///
    /// The loop connects through `connector`, joins the configured room and
    /// requests its state. The receiver yields [`BingoEvent`]s until the
    /// client stops; the last one is always
    /// [`Disconnected`](BingoEvent::Disconnected).
    #[must_use = "the event receiver must be used to receive events"]
    pub fn start<C: Connector>(
        connector: C,
        config: BingoClientConfig,
    ) -> (Self, mpsc::Receiver<BingoEvent>) {
        let (cmd_tx, cmd_rx) = mpsc::unbounded_channel::<Command>();
        let capacity = config.event_channel_capacity.max(1);
        let (event_tx, event_rx) = mpsc::channel::<BingoEvent>(capacity);
        let (shutdown_tx, shutdown_rx) = oneshot::channel::<()>();

        let now = Instant::now();
        let session = RoomSession::new(config.room_id.clone(), config.session_settings());
        let (view_tx, view_rx) = watch::channel(session.view(now, false));

        let state = Arc::new(ClientState {
            connected: AtomicBool::new(false),
            synchronized: AtomicBool::new(false),
        });

        let shutdown_timeout = config.shutdown_timeout;
        let driver = Driver {
            connector,
            normalizer: config.normalizer(),
            sync: Synchronizer::awaiting(config.sync_timeout, now),
            config,
            session,
            cmd_rx,
            event_tx,
            view_tx,
            state: Arc::clone(&state),
            shutdown_rx,
        };
        let task = tokio::spawn(driver.run());

        let client = Self {
            cmd_tx,
            state,
            view_rx,
            task: Some(task),
            shutdown_tx: Some(shutdown_tx),
            shutdown_timeout,
        };
        (client, event_rx)
    }

    // ── Room actions ────────────────────────────────────────────────

    /// Claim bingo on the local card at `card_index`.
    ///
    /// The claim flag is set before the request is queued. A claim the server
    /// later rejects still counts for this round.
    ///
    /// # Errors
    ///
    /// - [`BingoSyncError::NotConnected`] if the transport is down.
    /// - [`BingoSyncError::UnknownCard`] if there is no card at the index.
    /// - [`BingoSyncError::Blocked`] if the card cannot be edited right now,
    ///   including a second claim in the same round.
    pub fn claim_bingo(&self, card_index: CardIndex) -> Result<()> {
        if !self.is_connected() {
            return Err(BingoSyncError::NotConnected);
        }
        let msg = {
            let view = self.view_rx.borrow();
            let card = view
                .card(card_index)
                .ok_or(BingoSyncError::UnknownCard(card_index))?;
            session::claim_request(
                &view.room_id,
                view.round_number,
                card,
                view.gate(),
                view.claim_flag(),
            )?
        };
        self.send(msg)
    }

    /// Mark a called number on a local card.
    ///
    /// # Errors
    ///
    /// Fails with the same checks the session applies, evaluated against the
    /// latest published view.
    pub fn mark_number(&self, card_index: CardIndex, number: NumberCode) -> Result<()> {
        {
            let view = self.view_rx.borrow();
            let card = view
                .card(card_index)
                .ok_or(BingoSyncError::UnknownCard(card_index))?;
            session::ensure_editable(view.can_open(card_index))?;
            if !card.contains(number) || !view.called_numbers.contains(&number) {
                return Err(BingoSyncError::NotCalled(number));
            }
        }
        self.command(Command::Mark { card_index, number })
    }

    /// Remove a mark from a local card.
    ///
    /// # Errors
    ///
    /// Returns [`BingoSyncError::NotConnected`] if the loop has stopped.
    pub fn unmark_number(&self, card_index: CardIndex, number: NumberCode) -> Result<()> {
        self.command(Command::Unmark { card_index, number })
    }

    /// Open a modal on the player's request.
    ///
    /// # Errors
    ///
    /// Returns [`BingoSyncError::NotConnected`] if the loop has stopped.
    pub fn open_modal(&self, kind: ModalKind) -> Result<()> {
        self.command(Command::OpenModal(kind))
    }

    /// Close a modal on the player's request. This is the only way the
    /// pattern modal closes.
    ///
    /// # Errors
    ///
    /// Returns [`BingoSyncError::NotConnected`] if the loop has stopped.
    pub fn close_modal(&self, kind: ModalKind) -> Result<()> {
        self.command(Command::CloseModal(kind))
    }

    /// # Errors
    ///
    /// Returns [`BingoSyncError::NotConnected`] if the loop has stopped.
    pub fn dismiss_notification(&self, kind: NotificationKind) -> Result<()> {
        self.command(Command::Dismiss(kind))
    }

    /// Leave the current room and subscribe to `room_id` with a fresh session.
    ///
    /// # Errors
    ///
    /// Returns [`BingoSyncError::NotConnected`] if the loop has stopped.
    pub fn switch_room(&self, room_id: impl Into<RoomId>) -> Result<()> {
        self.command(Command::SwitchRoom(room_id.into()))
    }

    /// Ask for a fresh authoritative snapshot.
    ///
    /// # Errors
    ///
    /// Returns [`BingoSyncError::NotConnected`] if the transport is down.
    pub fn request_resync(&self) -> Result<()> {
        if !self.is_connected() {
            return Err(BingoSyncError::NotConnected);
        }
        self.command(Command::Resync)
    }

    /// Send a heartbeat ping to the server.
    ///
    /// # Errors
    ///
    /// Returns [`BingoSyncError::NotConnected`] if the transport is down.
    pub fn ping(&self) -> Result<()> {
        self.send(ClientMessage::Ping)
    }

    /// Shut down the client, closing the transport and stopping the loop.
    ///
    /// The event receiver yields `None` once the loop exits.
    pub async fn shutdown(&mut self) {
        debug!("BingoClient: shutdown requested");

        if let Some(tx) = self.shutdown_tx.take() {
            let _ = tx.send(());
        }

        if let Some(mut task) = self.task.take() {
            match tokio::time::timeout(self.shutdown_timeout, &mut task).await {
                Ok(Ok(())) => {}
                Ok(Err(join_err)) => {
                    warn!("transport loop terminated with join error: {join_err}");
                }
                Err(_) => {
                    warn!("transport loop did not exit within timeout; aborting task");
                    task.abort();
                    if let Err(join_err) = task.await {
                        debug!("transport loop aborted: {join_err}");
                    }
                }
            }
        }

        self.state.connected.store(false, Ordering::Release);
        self.state.synchronized.store(false, Ordering::Release);
    }

    // ── State accessors ─────────────────────────────────────────────

    /// Returns `true` if the transport is believed to be connected.
    pub fn is_connected(&self) -> bool {
        self.state.connected.load(Ordering::Acquire)
    }

    /// Returns `true` once the authoritative snapshot for the current
    /// subscription has landed since the last (re)connect.
    pub fn is_synchronized(&self) -> bool {
        self.state.synchronized.load(Ordering::Acquire)
    }

    /// The latest published view.
    pub fn view(&self) -> RoomView {
        self.view_rx.borrow().clone()
    }

    /// A receiver that is notified on every published view.
    pub fn subscribe(&self) -> watch::Receiver<RoomView> {
        self.view_rx.clone()
    }

    // ── Internal helpers ────────────────────────────────────────────

    fn send(&self, msg: ClientMessage) -> Result<()> {
        if !self.is_connected() {
            return Err(BingoSyncError::NotConnected);
        }
        self.command(Command::Send(msg))
    }

    fn command(&self, cmd: Command) -> Result<()> {
        self.cmd_tx
            .send(cmd)
            .map_err(|_| BingoSyncError::NotConnected)
    }
}

impl std::fmt::Debug for BingoClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BingoClient")
            .field("room_id", &self.view_rx.borrow().room_id)
            .field("connected", &self.is_connected())
            .field("synchronized", &self.is_synchronized())
            .field("has_task", &self.task.is_some())
            .finish()
    }
}

impl Drop for BingoClient {
    fn drop(&mut self) {
        // No executor to drive a graceful close from `Drop`; abort instead.
        if let Some(task) = self.task.take() {
            task.abort();
        }
    }
}

// ── Transport loop ──────────────────────────────────────────────────

/// How a connected stretch of the loop ended.
enum Exit {
    /// Shutdown or handle dropped; close and stop.
    Stopped,
    /// The link failed; reconnect if allowed.
    Lost(String),
}

enum Next {
    Retry,
    Stop(Option<String>),
}

struct Driver<C: Connector> {
    connector: C,
    config: BingoClientConfig,
    normalizer: Normalizer,
    session: RoomSession,
    sync: Synchronizer,
    cmd_rx: mpsc::UnboundedReceiver<Command>,
    event_tx: mpsc::Sender<BingoEvent>,
    view_tx: watch::Sender<RoomView>,
    state: Arc<ClientState>,
    shutdown_rx: oneshot::Receiver<()>,
}

impl<C: Connector> Driver<C> {
    /// Connect, drive, and reconnect until shutdown or an unrecoverable loss.
    async fn run(mut self) {
        debug!(room_id = %self.session.room_id(), "transport loop started");
        let mut attempt: u32 = 0;

        loop {
            let connected = tokio::select! {
                result = self.connector.connect() => result,
                _ = &mut self.shutdown_rx => {
                    self.finish(Some(SHUTDOWN_REASON.into())).await;
                    return;
                }
            };

            let mut transport = match connected {
                Ok(transport) => {
                    attempt = 0;
                    transport
                }
                Err(e) => {
                    error!("connect failed: {e}");
                    match self.wait_to_reconnect(&mut attempt, format!("connect failed: {e}")).await {
                        Next::Retry => continue,
                        Next::Stop(reason) => {
                            self.finish(reason).await;
                            return;
                        }
                    }
                }
            };

            match self.drive(&mut transport).await {
                Exit::Stopped => {
                    let _ = transport.close().await;
                    self.finish(Some(SHUTDOWN_REASON.into())).await;
                    return;
                }
                Exit::Lost(reason) => {
                    self.state.connected.store(false, Ordering::Release);
                    self.state.synchronized.store(false, Ordering::Release);
                    self.publish(Instant::now());
                    match self.wait_to_reconnect(&mut attempt, reason).await {
                        Next::Retry => {}
                        Next::Stop(reason) => {
                            self.finish(reason).await;
                            return;
                        }
                    }
                }
            }
        }
    }

    /// Run one connected stretch: join, request state, then multiplex
    /// commands, shutdown, inbound frames and the tick.
    async fn drive(&mut self, transport: &mut C::Transport) -> Exit {
        self.state.connected.store(true, Ordering::Release);
        self.state.synchronized.store(false, Ordering::Release);
        info!(room_id = %self.session.room_id(), "connected");
        emit_event(&self.event_tx, BingoEvent::Connected).await;

        if let Some(reason) = self.subscribe(transport).await {
            return Exit::Lost(reason);
        }
        self.publish(Instant::now());

        let mut ticker = tokio::time::interval(self.config.tick_interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                cmd = self.cmd_rx.recv() => {
                    match cmd {
                        Some(cmd) => {
                            if let Some(reason) = self.handle_command(cmd, Some(&mut *transport)).await {
                                return Exit::Lost(reason);
                            }
                        }
                        None => {
                            debug!("command channel closed, shutting down transport loop");
                            return Exit::Stopped;
                        }
                    }
                }

                _ = &mut self.shutdown_rx => {
                    debug!("shutdown signal received");
                    return Exit::Stopped;
                }

                incoming = transport.recv() => {
                    match incoming {
                        Some(Ok(text)) => self.on_frame(&text).await,
                        Some(Err(e)) => {
                            error!("transport receive error: {e}");
                            return Exit::Lost(format!("transport receive error: {e}"));
                        }
                        None => {
                            debug!("transport closed by server");
                            return Exit::Lost("connection closed by server".into());
                        }
                    }
                }

                _ = ticker.tick() => {
                    if let Some(reason) = self.on_tick(transport).await {
                        return Exit::Lost(reason);
                    }
                }
            }
        }
    }

    /// Join the session's room and request its snapshot.
    async fn subscribe(&mut self, transport: &mut C::Transport) -> Option<String> {
        let room_id = self.session.room_id().to_owned();
        let join = ClientMessage::JoinRoom {
            room_id: room_id.clone(),
            auth_token: self.config.auth_token.clone(),
        };
        if let Some(reason) = send_message(transport, &join).await {
            return Some(reason);
        }
        let request = self.sync.restart(&room_id, Instant::now());
        send_message(transport, &request).await
    }

    /// Back off before the next connection attempt. UI commands keep being
    /// applied while offline; outbound messages are dropped.
    async fn wait_to_reconnect(&mut self, attempt: &mut u32, reason: String) -> Next {
        if self.config.auth_token.is_none() {
            debug!("no auth token; not reconnecting");
            return Next::Stop(Some(reason));
        }
        *attempt = attempt.saturating_add(1);
        let delay = backoff_delay(
            self.config.reconnect_initial_backoff,
            self.config.reconnect_max_backoff,
            *attempt,
        );
        warn!(attempt = *attempt, ?delay, %reason, "reconnecting");
        emit_event(
            &self.event_tx,
            BingoEvent::Reconnecting {
                attempt: *attempt,
                delay,
            },
        )
        .await;

        let sleep = tokio::time::sleep(delay);
        tokio::pin!(sleep);
        loop {
            tokio::select! {
                _ = &mut sleep => return Next::Retry,
                _ = &mut self.shutdown_rx => return Next::Stop(Some(SHUTDOWN_REASON.into())),
                cmd = self.cmd_rx.recv() => match cmd {
                    Some(cmd) => {
                        self.handle_command(cmd, None).await;
                    }
                    None => return Next::Stop(Some(SHUTDOWN_REASON.into())),
                },
            }
        }
    }

    /// Apply one command. Returns the failure reason if the transport broke.
    async fn handle_command(
        &mut self,
        cmd: Command,
        transport: Option<&mut C::Transport>,
    ) -> Option<String> {
        let now = Instant::now();
        let mut failure = None;
        match cmd {
            Command::Send(msg) => match transport {
                Some(transport) => failure = send_message(transport, &msg).await,
                None => warn!(?msg, "dropping outbound message while disconnected"),
            },
            Command::Mark { card_index, number } => {
                if let Err(e) = self.session.mark(card_index, number) {
                    warn!(card_index, %number, "mark refused: {e}");
                }
            }
            Command::Unmark { card_index, number } => {
                if let Err(e) = self.session.unmark(card_index, number) {
                    warn!(card_index, %number, "unmark refused: {e}");
                }
            }
            Command::OpenModal(kind) => self.session.open_modal(kind),
            Command::CloseModal(kind) => self.session.close_modal(kind),
            Command::Dismiss(kind) => {
                self.session.dismiss(kind);
            }
            Command::SwitchRoom(room_id) => {
                failure = self.switch_room(room_id, transport).await;
            }
            Command::Resync => {
                if let Some(transport) = transport {
                    let request = self.sync.restart(self.session.room_id(), now);
                    self.state.synchronized.store(false, Ordering::Release);
                    failure = send_message(transport, &request).await;
                }
            }
        }
        self.publish(now);
        failure
    }

    /// Dispose the current session and subscribe to `room_id`.
    async fn switch_room(
        &mut self,
        room_id: RoomId,
        transport: Option<&mut C::Transport>,
    ) -> Option<String> {
        let now = Instant::now();
        let next = RoomSession::new(room_id.clone(), self.config.session_settings());
        let previous = std::mem::replace(&mut self.session, next);
        info!(from = %previous.room_id(), to = %room_id, "switching room");
        let leave = ClientMessage::LeaveRoom {
            room_id: previous.room_id().to_owned(),
        };
        previous.dispose();

        self.sync = Synchronizer::awaiting(self.config.sync_timeout, now);
        self.state.synchronized.store(false, Ordering::Release);
        self.publish(now);
        emit_event(
            &self.event_tx,
            BingoEvent::RoomSwitched {
                room_id,
                subscription_id: self.session.id(),
            },
        )
        .await;

        // Offline, the next connect joins the new room.
        let transport = transport?;
        if let Some(reason) = send_message(transport, &leave).await {
            return Some(reason);
        }
        self.subscribe(transport).await
    }

    /// Normalize and route one inbound frame. The view is published before
    /// the resulting events go out, so consumers always read fresh state.
    async fn on_frame(&mut self, text: &str) {
        let now = Instant::now();
        let event = match self.normalizer.normalize_text(text) {
            Normalized::Event(event) => event,
            Normalized::Discard(discarded) => {
                emit_event(&self.event_tx, BingoEvent::EventDiscarded(discarded)).await;
                return;
            }
        };
        if !event.room_id().is_empty() && event.room_id() != self.session.room_id() {
            debug!(kind = %event.kind(), room = event.room_id(), "ignoring event for another room");
            return;
        }

        let mut out = Vec::new();
        match self.sync.admit(event) {
            Admission::Buffered => return,
            Admission::Apply(event) => self.apply(&event, now, &mut out),
            Admission::Snapshot { event, discarded } => {
                self.apply(&event, now, &mut out);
                self.state.synchronized.store(true, Ordering::Release);
                let round_number = self.session.round().round_number();
                info!(
                    room_id = %self.session.room_id(),
                    round = round_number,
                    discarded,
                    "room state synchronized"
                );
                out.push(BingoEvent::Synchronized {
                    round_number,
                    discarded_events: discarded,
                });
            }
        }
        self.publish(now);
        for event in out {
            emit_event(&self.event_tx, event).await;
        }
    }

    fn apply(&mut self, event: &RoomEvent, now: Instant, out: &mut Vec<BingoEvent>) {
        let handled = self.session.handle(event, now);
        out.push(BingoEvent::RoomUpdated {
            kind: event.kind(),
            outcome: handled.outcome,
        });
        out.extend(handled.notices.into_iter().map(BingoEvent::from));
    }

    async fn on_tick(&mut self, transport: &mut C::Transport) -> Option<String> {
        let now = Instant::now();
        let mut out: Vec<BingoEvent> = self
            .session
            .tick(now)
            .into_iter()
            .map(BingoEvent::from)
            .collect();

        let mut failure = None;
        if let Some(retry) = self.sync.poll_timeout(self.session.room_id(), now) {
            let failed = self.sync.attempts().saturating_sub(1);
            let reason = format!(
                "room state not received within {:?}",
                self.config.sync_timeout
            );
            if failed >= self.config.sync_banner_after {
                self.session.on_sync_failed(&reason, now);
            }
            out.push(BingoEvent::SyncFailed {
                attempt: failed,
                reason,
            });
            failure = send_message(transport, &retry).await;
        }
        self.publish(now);
        for event in out {
            emit_event(&self.event_tx, event).await;
        }
        failure
    }

    fn publish(&self, now: Instant) {
        self.view_tx
            .send_replace(self.session.view(now, self.sync.is_live()));
    }

    /// Emit the final [`Disconnected`](BingoEvent::Disconnected).
    ///
    /// Uses `send().await` instead of `try_send`: it is always the last event
    /// and must never be dropped.
    async fn finish(&mut self, reason: Option<String>) {
        self.state.connected.store(false, Ordering::Release);
        self.state.synchronized.store(false, Ordering::Release);
        self.publish(Instant::now());
        if self
            .event_tx
            .send(BingoEvent::Disconnected { reason })
            .await
            .is_err()
        {
            debug!("event channel closed, receiver dropped");
        }
        debug!("transport loop exited");
    }
}

/// Serialize and send one message. Returns the failure reason on error.
async fn send_message<T: Transport>(transport: &mut T, msg: &ClientMessage) -> Option<String> {
    let json = match serde_json::to_string(msg) {
        Ok(json) => json,
        Err(e) => {
            error!("failed to serialize ClientMessage: {e}");
            return None;
        }
    };
    match transport.send(json).await {
        Ok(()) => None,
        Err(e) => {
            error!("transport send error: {e}");
            Some(format!("transport send error: {e}"))
        }
    }
}

/// Non-blocking emit; a full channel drops the event with a warning.
async fn emit_event(event_tx: &mpsc::Sender<BingoEvent>, event: BingoEvent) {
    match event_tx.try_send(event) {
        Ok(()) => {}
        Err(mpsc::error::TrySendError::Full(dropped)) => {
            warn!("event channel full, dropping event: {dropped:?}");
        }
        Err(mpsc::error::TrySendError::Closed(_)) => {
            debug!("event channel closed, receiver dropped");
        }
    }
}

// ── Tests ───────────────────────────────────────────────────────────

#[cfg(test)]
#[allow(
    clippy::unwrap_used,
    clippy::expect_used,
    clippy::panic,
    clippy::todo,
    clippy::unimplemented,
    clippy::indexing_slicing
)]
mod tests {
    use super::*;
    use async_trait::async_trait;

    #[test]
    fn config_defaults() {
        let config = BingoClientConfig::new("room-1");
        assert_eq!(config.room_id, "room-1");
        assert!(config.auth_token.is_none());
        assert_eq!(config.event_channel_capacity, 256);
        assert_eq!(config.shutdown_timeout, Duration::from_secs(1));
        assert_eq!(config.tick_interval, Duration::from_millis(250));
        assert_eq!(config.sync_timeout, Duration::from_secs(5));
        assert_eq!(config.reconnect_initial_backoff, Duration::from_millis(500));
        assert_eq!(config.reconnect_max_backoff, Duration::from_secs(10));
        assert_eq!(config.notification_duration, Duration::from_secs(3));
        assert_eq!(config.last_numbers_window, 5);
        assert!(!config.auto_mark);
    }

    #[test]
    fn builder_clamps_degenerate_values() {
        let config = BingoClientConfig::new("r")
            .with_event_channel_capacity(0)
            .with_tick_interval(Duration::ZERO)
            .with_sync_banner_after(0)
            .with_last_numbers_window(0)
            .with_reconnect_backoff(Duration::from_secs(2), Duration::from_secs(1));
        assert_eq!(config.event_channel_capacity, 1);
        assert_eq!(config.tick_interval, Duration::from_millis(1));
        assert_eq!(config.sync_banner_after, 1);
        assert_eq!(config.last_numbers_window, 1);
        assert_eq!(config.reconnect_max_backoff, Duration::from_secs(2));
    }

    #[test]
    fn debug_redacts_auth_token() {
        let config = BingoClientConfig::new("r").with_auth_token("hunter2");
        let debug = format!("{config:?}");
        assert!(!debug.contains("hunter2"));
        assert!(debug.contains("has_auth_token: true"));
    }

    #[test]
    fn backoff_doubles_up_to_the_cap() {
        let initial = Duration::from_millis(500);
        let max = Duration::from_secs(10);
        let delays: Vec<_> = (1..=7).map(|a| backoff_delay(initial, max, a)).collect();
        assert_eq!(
            delays,
            vec![
                Duration::from_millis(500),
                Duration::from_secs(1),
                Duration::from_secs(2),
                Duration::from_secs(4),
                Duration::from_secs(8),
                max,
                max,
            ]
        );
        assert_eq!(backoff_delay(initial, max, u32::MAX), max);
    }

    /// Connects instantly to a transport whose `close()` never returns.
    struct HangingConnector {
        close_called: Arc<AtomicBool>,
    }

    struct HangingCloseTransport {
        close_called: Arc<AtomicBool>,
    }

    #[async_trait]
    impl Transport for HangingCloseTransport {
        async fn send(&mut self, _message: String) -> std::result::Result<(), BingoSyncError> {
            Ok(())
        }

        async fn recv(&mut self) -> Option<std::result::Result<String, BingoSyncError>> {
            std::future::pending().await
        }

        async fn close(&mut self) -> std::result::Result<(), BingoSyncError> {
            self.close_called.store(true, Ordering::Release);
            std::future::pending().await
        }
    }

    #[async_trait]
    impl Connector for HangingConnector {
        type Transport = HangingCloseTransport;

        async fn connect(&mut self) -> std::result::Result<HangingCloseTransport, BingoSyncError> {
            Ok(HangingCloseTransport {
                close_called: Arc::clone(&self.close_called),
            })
        }
    }

    #[tokio::test]
    async fn shutdown_timeout_aborts_stuck_transport_task() {
        let close_called = Arc::new(AtomicBool::new(false));
        let connector = HangingConnector {
            close_called: Arc::clone(&close_called),
        };
        let config = BingoClientConfig::new("room-1").with_shutdown_timeout(Duration::from_millis(20));
        let (mut client, mut events) = BingoClient::start(connector, config);

        let event = events.recv().await.unwrap();
        assert!(matches!(event, BingoEvent::Connected));

        client.shutdown().await;
        assert!(close_called.load(Ordering::Acquire));
        assert!(!client.is_connected());
    }

    /// `Send` but not `Sync`: the loop must never hold a shared borrow of
    /// itself across an await.
    struct CellConnector {
        attempts: std::cell::Cell<u32>,
    }

    struct CellTransport {
        sent: std::cell::Cell<u32>,
    }

    #[async_trait]
    impl Transport for CellTransport {
        async fn send(&mut self, _message: String) -> std::result::Result<(), BingoSyncError> {
            self.sent.set(self.sent.get() + 1);
            Ok(())
        }

        async fn recv(&mut self) -> Option<std::result::Result<String, BingoSyncError>> {
            std::future::pending().await
        }

        async fn close(&mut self) -> std::result::Result<(), BingoSyncError> {
            Ok(())
        }
    }

    #[async_trait]
    impl Connector for CellConnector {
        type Transport = CellTransport;

        async fn connect(&mut self) -> std::result::Result<CellTransport, BingoSyncError> {
            self.attempts.set(self.attempts.get() + 1);
            Ok(CellTransport {
                sent: std::cell::Cell::new(0),
            })
        }
    }

    #[tokio::test]
    async fn loop_runs_with_non_sync_connector() {
        let connector = CellConnector {
            attempts: std::cell::Cell::new(0),
        };
        let (mut client, mut events) =
            BingoClient::start(connector, BingoClientConfig::new("room-1"));
        assert!(matches!(events.recv().await.unwrap(), BingoEvent::Connected));
        client.shutdown().await;
        let mut last = None;
        while let Some(event) = events.recv().await {
            last = Some(event);
        }
        assert!(matches!(last, Some(BingoEvent::Disconnected { .. })));
    }

    #[tokio::test]
    async fn claim_is_refused_before_connecting() {
        struct NeverConnects;

        #[async_trait]
        impl Connector for NeverConnects {
            type Transport = HangingCloseTransport;

            async fn connect(
                &mut self,
            ) -> std::result::Result<HangingCloseTransport, BingoSyncError> {
                std::future::pending().await
            }
        }

        let (mut client, _events) = BingoClient::start(NeverConnects, BingoClientConfig::new("r"));
        assert!(matches!(
            client.claim_bingo(0),
            Err(BingoSyncError::NotConnected)
        ));
        assert!(!client.view().has_claimed_this_round());
        client.shutdown().await;
    }
}
