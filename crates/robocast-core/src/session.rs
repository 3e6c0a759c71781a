use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use rand::Rng;
use serde::Serialize;
use tokio::sync::{mpsc, watch, Mutex};
use tokio::task::JoinHandle;

use crate::compositor::Compositor;
use crate::display::DisplaySet;
use crate::errors::RobocastError;
use crate::events::{
    ChannelEvent, ConnectionState, EventEmitter, MediaKind, Participant, ParticipantId,
    RawChannelEvent, SessionEvent, SessionEventListener, TrackRef,
};
use crate::layout::{CompositeLayoutRenderer, Layout, LayoutConfig};
use crate::roles::{IdFloor, SourcePolicy};
use crate::surfaces::MediaRenderer;
use crate::token::{TokenRequest, TokenRole, TokenService};

/// Real-time video/audio channel provider.
#[async_trait]
pub trait ChannelProvider: Send + Sync {
    /// Join `channel` as `uid`. `token` is `None` for open (development)
    /// channels. Returns the provider's raw event stream.
    async fn join(
        &self,
        channel: &str,
        uid: ParticipantId,
        token: Option<&str>,
    ) -> Result<mpsc::UnboundedReceiver<RawChannelEvent>, RobocastError>;

    /// Subscribe to a media kind a remote participant has published.
    async fn subscribe(&self, uid: ParticipantId, kind: MediaKind)
        -> Result<TrackRef, RobocastError>;

    /// Close local capture tracks, if any were opened.
    async fn release_local_media(&self);

    async fn leave(&self) -> Result<(), RobocastError>;
}

#[derive(Debug, Clone)]
pub struct SessionConfig {
    pub layout: LayoutConfig,
    pub token_timeout: Duration,
    /// Participant ids at or above this value are device sources.
    pub privileged_id_floor: u64,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            layout: LayoutConfig::default(),
            token_timeout: Duration::from_secs(5),
            privileged_id_floor: 100_000,
        }
    }
}

/// Latest session state, republished after every processed event.
#[derive(Debug, Clone, Serialize)]
pub struct SessionSnapshot {
    pub state: ConnectionState,
    pub layout: Layout,
    pub display: DisplaySet,
    pub participants: Vec<Participant>,
    pub host: Option<ParticipantId>,
}

/// A raw provider event after validation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum NormalizedEvent {
    Apply(ChannelEvent),
    /// Media was published; the track handle arrives once subscribed.
    Subscribe {
        participant: ParticipantId,
        kind: MediaKind,
    },
    ConnectionLost(Option<String>),
}

pub fn normalize(raw: RawChannelEvent) -> Result<NormalizedEvent, RobocastError> {
    Ok(match raw {
        RawChannelEvent::UserJoined { uid } => NormalizedEvent::Apply(ChannelEvent::Joined(uid)),
        RawChannelEvent::UserPublished { uid, media_type } => NormalizedEvent::Subscribe {
            participant: uid,
            kind: media_type.parse()?,
        },
        RawChannelEvent::UserUnpublished { uid, media_type } => {
            NormalizedEvent::Apply(ChannelEvent::Unpublished {
                participant: uid,
                kind: media_type.parse()?,
            })
        }
        RawChannelEvent::UserLeft { uid, .. } => NormalizedEvent::Apply(ChannelEvent::Left(uid)),
        RawChannelEvent::ConnectionLost { reason } => NormalizedEvent::ConnectionLost(reason),
    })
}

enum Command {
    SwapPrimary,
    Shutdown,
}

struct SubscribeResult {
    participant: ParticipantId,
    kind: MediaKind,
    ticket: u64,
    result: Result<TrackRef, RobocastError>,
}

struct PendingSubscribe {
    ticket: u64,
    task: JoinHandle<()>,
}

/// Connection state shared between the controller and its event loop.
#[derive(Clone)]
struct SharedState {
    state: Arc<Mutex<ConnectionState>>,
    emitter: EventEmitter,
    snapshot: Arc<watch::Sender<SessionSnapshot>>,
    placeholder: CompositeLayoutRenderer,
}

impl SharedState {
    fn new(layout: LayoutConfig) -> Self {
        let placeholder = CompositeLayoutRenderer::new(layout);
        let initial = SessionSnapshot {
            state: ConnectionState::Disconnected,
            layout: placeholder.empty(&ConnectionState::Disconnected),
            display: DisplaySet::default(),
            participants: Vec::new(),
            host: None,
        };
        let (snapshot, _) = watch::channel(initial);
        Self {
            state: Arc::new(Mutex::new(ConnectionState::Disconnected)),
            emitter: EventEmitter::new(),
            snapshot: Arc::new(snapshot),
            placeholder,
        }
    }

    async fn get(&self) -> ConnectionState {
        self.state.lock().await.clone()
    }

    /// Move to `next` only if currently in `expected`.
    async fn transition(&self, expected: &ConnectionState, next: ConnectionState) -> bool {
        {
            let mut state = self.state.lock().await;
            if *state != *expected {
                return false;
            }
            *state = next.clone();
        }
        self.announce(next);
        true
    }

    /// Enter the terminal state. Repeated calls are no-ops.
    async fn close(&self) {
        {
            let mut state = self.state.lock().await;
            if *state == ConnectionState::Closed {
                return;
            }
            *state = ConnectionState::Closed;
        }
        self.announce(ConnectionState::Closed);
    }

    fn announce(&self, state: ConnectionState) {
        tracing::info!(?state, "session state changed");
        let connected = state == ConnectionState::Connected;
        let layout = self.placeholder.empty(&state);
        self.snapshot.send_modify(|snapshot| {
            snapshot.state = state.clone();
            if !connected {
                snapshot.layout = layout;
                snapshot.display = DisplaySet::default();
                snapshot.participants.clear();
                snapshot.host = None;
            }
        });
        self.emitter.emit(SessionEvent::ConnectionStateChanged(state));
    }
}

/// Drives one channel session: credential fetch, join, the serialized event
/// loop and teardown.
pub struct SessionController {
    provider: Arc<dyn ChannelProvider>,
    tokens: Arc<dyn TokenService>,
    media: Arc<dyn MediaRenderer>,
    policy: Arc<dyn SourcePolicy>,
    config: SessionConfig,
    local_id: ParticipantId,
    shared: SharedState,
    commands: Mutex<Option<mpsc::UnboundedSender<Command>>>,
    event_loop: Mutex<Option<JoinHandle<()>>>,
}

impl SessionController {
    pub fn new(
        provider: Arc<dyn ChannelProvider>,
        tokens: Arc<dyn TokenService>,
        media: Arc<dyn MediaRenderer>,
        config: SessionConfig,
    ) -> Self {
        // Browser clients live below the device id range.
        let upper = config.privileged_id_floor.max(2);
        let local_id = ParticipantId(rand::thread_rng().gen_range(1..upper));
        Self {
            provider,
            tokens,
            media,
            policy: Arc::new(IdFloor(config.privileged_id_floor)),
            shared: SharedState::new(config.layout.clone()),
            config,
            local_id,
            commands: Mutex::new(None),
            event_loop: Mutex::new(None),
        }
    }

    /// Replace the default id-floor policy for host election.
    pub fn with_policy(mut self, policy: Arc<dyn SourcePolicy>) -> Self {
        self.policy = policy;
        self
    }

    pub fn with_local_id(mut self, local_id: ParticipantId) -> Self {
        self.local_id = local_id;
        self
    }

    pub fn local_id(&self) -> ParticipantId {
        self.local_id
    }

    /// Register a listener for session events.
    pub fn add_listener(&self, listener: Arc<dyn SessionEventListener>) {
        self.shared.emitter.add_listener(listener);
    }

    pub async fn connection_state(&self) -> ConnectionState {
        self.shared.get().await
    }

    pub fn snapshot(&self) -> SessionSnapshot {
        self.shared.snapshot.borrow().clone()
    }

    /// Receiver that observes every published snapshot.
    pub fn watch_snapshots(&self) -> watch::Receiver<SessionSnapshot> {
        self.shared.snapshot.subscribe()
    }

    /// Join `channel_name`.
    ///
    /// A missing or failing token service degrades to a null-credential
    /// join. A failing join leaves the session `Disconnected` and returns
    /// `ConnectionFailure`; nothing is retried.
    pub async fn connect(&self, channel_name: &str, role: TokenRole) -> Result<(), RobocastError> {
        let request = TokenRequest::new(channel_name, self.local_id, role)?;
        if !self
            .shared
            .transition(&ConnectionState::Disconnected, ConnectionState::Connecting)
            .await
        {
            let state = self.shared.get().await;
            return Err(RobocastError::Session(format!("cannot connect while {state:?}")));
        }

        let token = self.fetch_token(&request).await;
        if token.is_none() {
            tracing::warn!(channel = %request.channel_name, "joining without a credential");
        }

        let events = match self
            .provider
            .join(&request.channel_name, self.local_id, token.as_deref())
            .await
        {
            Ok(events) => events,
            Err(e) => {
                tracing::error!(channel = %request.channel_name, "channel join failed: {e}");
                self.shared
                    .transition(&ConnectionState::Connecting, ConnectionState::Disconnected)
                    .await;
                self.shared.emitter.emit(SessionEvent::ConnectionFailed(e.to_string()));
                return Err(match e {
                    RobocastError::ConnectionFailure(_) => e,
                    other => RobocastError::ConnectionFailure(other.to_string()),
                });
            }
        };

        let (commands_tx, commands_rx) = mpsc::unbounded_channel();
        let (results_tx, results_rx) = mpsc::unbounded_channel();
        let mut compositor = Compositor::new(
            self.policy.clone(),
            self.media.clone(),
            self.config.layout.clone(),
        );
        compositor.set_status(ConnectionState::Connected);

        let event_loop = EventLoop {
            provider: self.provider.clone(),
            compositor,
            shared: self.shared.clone(),
            pending: HashMap::new(),
            next_ticket: 0,
            results_tx,
            last_layout: None,
        };
        let handle = tokio::spawn(event_loop.run(events, commands_rx, results_rx));
        *self.commands.lock().await = Some(commands_tx);
        *self.event_loop.lock().await = Some(handle);

        if !self
            .shared
            .transition(&ConnectionState::Connecting, ConnectionState::Connected)
            .await
        {
            self.teardown().await;
            return Err(RobocastError::Session(
                "session torn down while connecting".into(),
            ));
        }
        tracing::info!(channel = %request.channel_name, uid = %self.local_id, "session connected");
        Ok(())
    }

    async fn fetch_token(&self, request: &TokenRequest) -> Option<String> {
        let reason = match tokio::time::timeout(
            self.config.token_timeout,
            self.tokens.request_token(request),
        )
        .await
        {
            Ok(Ok(token)) => return Some(token.token),
            Ok(Err(e)) => e.to_string(),
            Err(_) => format!(
                "token request timed out after {}ms",
                self.config.token_timeout.as_millis()
            ),
        };
        let err = RobocastError::CredentialUnavailable(reason);
        tracing::warn!("{err}");
        self.shared
            .emitter
            .emit(SessionEvent::CredentialUnavailable(err.to_string()));
        None
    }

    /// Ask the event loop to flip primary and secondary feeds.
    /// Returns `false` when no session is running.
    pub async fn swap_primary(&self) -> bool {
        match self.commands.lock().await.as_ref() {
            Some(tx) => tx.send(Command::SwapPrimary).is_ok(),
            None => false,
        }
    }

    /// Release media, leave the channel and enter the terminal state.
    /// Safe to call any number of times.
    pub async fn teardown(&self) {
        let commands = self.commands.lock().await.take();
        let handle = self.event_loop.lock().await.take();
        if let Some(commands) = commands {
            let _ = commands.send(Command::Shutdown);
        }
        if let Some(handle) = handle {
            if let Err(e) = handle.await {
                tracing::warn!("session event loop ended abnormally: {e}");
            }
        }
        self.shared.close().await;
    }
}

/// Single writer over all per-session state.
struct EventLoop {
    provider: Arc<dyn ChannelProvider>,
    compositor: Compositor,
    shared: SharedState,
    pending: HashMap<(ParticipantId, MediaKind), PendingSubscribe>,
    next_ticket: u64,
    results_tx: mpsc::UnboundedSender<SubscribeResult>,
    last_layout: Option<Layout>,
}

impl EventLoop {
    async fn run(
        mut self,
        mut events: mpsc::UnboundedReceiver<RawChannelEvent>,
        mut commands: mpsc::UnboundedReceiver<Command>,
        mut results: mpsc::UnboundedReceiver<SubscribeResult>,
    ) {
        self.publish();

        loop {
            tokio::select! {
                biased;

                command = commands.recv() => match command {
                    Some(Command::SwapPrimary) => {
                        if self.compositor.swap_primary() {
                            tracing::debug!("primary and secondary swapped");
                            self.publish();
                        }
                    }
                    Some(Command::Shutdown) | None => {
                        tracing::info!("session teardown requested");
                        break;
                    }
                },

                Some(result) = results.recv() => self.on_subscribe_result(result),

                raw = events.recv() => match raw {
                    Some(raw) => {
                        if !self.on_raw(raw) {
                            break;
                        }
                    }
                    None => {
                        tracing::info!("channel event stream ended");
                        break;
                    }
                },
            }
        }

        self.shutdown().await;
        tracing::info!("session event loop ended");
    }

    /// Returns `false` once the channel is gone.
    fn on_raw(&mut self, raw: RawChannelEvent) -> bool {
        match normalize(raw) {
            Err(e) => {
                tracing::warn!("dropping raw channel event: {e}");
            }
            Ok(NormalizedEvent::ConnectionLost(reason)) => {
                tracing::warn!(?reason, "channel connection lost");
                return false;
            }
            Ok(NormalizedEvent::Subscribe { participant, kind }) => {
                self.start_subscribe(participant, kind);
            }
            Ok(NormalizedEvent::Apply(event)) => {
                match &event {
                    ChannelEvent::Unpublished { participant, kind } => {
                        self.cancel_pending(*participant, Some(*kind));
                    }
                    ChannelEvent::Left(participant) => self.cancel_pending(*participant, None),
                    ChannelEvent::Joined(_) | ChannelEvent::Published(_) => {}
                }
                self.apply(event);
            }
        }
        true
    }

    fn start_subscribe(&mut self, participant: ParticipantId, kind: MediaKind) {
        self.next_ticket += 1;
        let ticket = self.next_ticket;
        let provider = self.provider.clone();
        let tx = self.results_tx.clone();
        let task = tokio::spawn(async move {
            let result = provider.subscribe(participant, kind).await;
            let _ = tx.send(SubscribeResult {
                participant,
                kind,
                ticket,
                result,
            });
        });
        tracing::debug!(%participant, %kind, ticket, "subscribe started");
        if let Some(previous) = self
            .pending
            .insert((participant, kind), PendingSubscribe { ticket, task })
        {
            previous.task.abort();
        }
    }

    fn cancel_pending(&mut self, participant: ParticipantId, kind: Option<MediaKind>) {
        self.pending.retain(|(id, k), pending| {
            let matches = *id == participant && kind.is_none_or(|kind| kind == *k);
            if matches {
                pending.task.abort();
                tracing::debug!(%participant, kind = %k, "pending subscribe cancelled");
            }
            !matches
        });
    }

    fn on_subscribe_result(&mut self, result: SubscribeResult) {
        let key = (result.participant, result.kind);
        match self.pending.get(&key) {
            Some(pending) if pending.ticket == result.ticket => {
                self.pending.remove(&key);
            }
            _ => {
                tracing::debug!(
                    participant = %result.participant,
                    kind = %result.kind,
                    "discarding stale subscribe result"
                );
                return;
            }
        }

        match result.result {
            Ok(track) if track.participant == result.participant && track.kind == result.kind => {
                self.apply(ChannelEvent::Published(track));
            }
            Ok(track) => {
                let err = RobocastError::InvalidEvent(format!(
                    "subscribe for {} {} returned {} track of {}",
                    result.participant, result.kind, track.kind, track.participant
                ));
                tracing::warn!("{err}");
            }
            Err(e) => {
                let err = RobocastError::SubscriptionFailure {
                    participant: result.participant,
                    kind: result.kind,
                    reason: e.to_string(),
                };
                tracing::warn!("{err}");
                self.shared.emitter.emit(SessionEvent::SubscriptionFailed {
                    participant: result.participant,
                    kind: result.kind,
                });
                self.apply(ChannelEvent::Joined(result.participant));
                self.apply(ChannelEvent::Unpublished {
                    participant: result.participant,
                    kind: result.kind,
                });
            }
        }
    }

    fn apply(&mut self, event: ChannelEvent) {
        match self.compositor.apply(event) {
            Ok(applied) => {
                if let Some(id) = applied.joined {
                    self.shared.emitter.emit(SessionEvent::ParticipantJoined(id));
                }
                if let Some(id) = applied.left {
                    self.shared.emitter.emit(SessionEvent::ParticipantLeft(id));
                }
                if applied.host_changed {
                    let host = self.compositor.host();
                    tracing::info!(?host, "host changed");
                    self.shared.emitter.emit(SessionEvent::HostChanged(host));
                }
                self.publish();
            }
            Err(e) => tracing::warn!("rejected channel event: {e}"),
        }
    }

    fn publish(&mut self) {
        let layout = self.compositor.layout();
        if self.last_layout.as_ref() != Some(&layout) {
            self.shared
                .emitter
                .emit(SessionEvent::LayoutChanged(layout.clone()));
            self.last_layout = Some(layout.clone());
        }
        let snapshot = SessionSnapshot {
            state: self.compositor.status().clone(),
            layout,
            display: self.compositor.display_set(),
            participants: self.compositor.participants(),
            host: self.compositor.host(),
        };
        self.shared.snapshot.send_replace(snapshot);
    }

    async fn shutdown(&mut self) {
        for (_, pending) in self.pending.drain() {
            pending.task.abort();
        }
        self.compositor.reset();
        self.compositor.set_status(ConnectionState::Closed);
        self.publish();

        self.provider.release_local_media().await;
        if let Err(e) = self.provider.leave().await {
            tracing::warn!("error leaving channel: {e}");
        }
        self.shared.close().await;
    }
}
