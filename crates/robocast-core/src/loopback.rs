use std::collections::HashSet;
use std::sync::{Mutex, MutexGuard};
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::mpsc;

use crate::errors::RobocastError;
use crate::events::{MediaKind, ParticipantId, RawChannelEvent, TrackRef};
use crate::session::ChannelProvider;

/// Arguments of the last successful join.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct JoinRecord {
    pub channel: String,
    pub uid: ParticipantId,
    pub token: Option<String>,
}

#[derive(Default)]
struct Inner {
    sender: Option<mpsc::UnboundedSender<RawChannelEvent>>,
    joined: Option<JoinRecord>,
    join_failure: Option<String>,
    failing: HashSet<(ParticipantId, MediaKind)>,
    subscribe_delay: Option<Duration>,
    track_seq: u64,
    leave_calls: usize,
    media_releases: usize,
}

/// In-process channel provider.
///
/// Raw events are injected by the caller instead of arriving over the
/// network; subscribes hand out deterministic track ids
/// (`<kind>-<uid>-<n>`). Used by the replay shell and by tests.
#[derive(Default)]
pub struct LoopbackChannel {
    inner: Mutex<Inner>,
}

impl LoopbackChannel {
    pub fn new() -> Self {
        Self::default()
    }

    fn inner(&self) -> MutexGuard<'_, Inner> {
        self.inner.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Make the next joins fail with `reason`.
    pub fn fail_join(&self, reason: &str) {
        self.inner().join_failure = Some(reason.to_string());
    }

    pub fn fail_subscribe(&self, uid: ParticipantId, kind: MediaKind) {
        self.inner().failing.insert((uid, kind));
    }

    /// Delay every subscribe by `delay` before it resolves.
    pub fn set_subscribe_delay(&self, delay: Duration) {
        self.inner().subscribe_delay = Some(delay);
    }

    /// Deliver a raw event to the joined session. Returns `false` when no
    /// session is listening.
    pub fn inject(&self, event: RawChannelEvent) -> bool {
        match &self.inner().sender {
            Some(tx) => tx.send(event).is_ok(),
            None => false,
        }
    }

    pub fn joined_with(&self) -> Option<JoinRecord> {
        self.inner().joined.clone()
    }

    pub fn is_joined(&self) -> bool {
        self.inner().sender.is_some()
    }

    pub fn leave_calls(&self) -> usize {
        self.inner().leave_calls
    }

    pub fn media_releases(&self) -> usize {
        self.inner().media_releases
    }
}

#[async_trait]
impl ChannelProvider for LoopbackChannel {
    async fn join(
        &self,
        channel: &str,
        uid: ParticipantId,
        token: Option<&str>,
    ) -> Result<mpsc::UnboundedReceiver<RawChannelEvent>, RobocastError> {
        let mut inner = self.inner();
        if let Some(reason) = &inner.join_failure {
            return Err(RobocastError::ConnectionFailure(reason.clone()));
        }
        let (tx, rx) = mpsc::unbounded_channel();
        inner.sender = Some(tx);
        inner.joined = Some(JoinRecord {
            channel: channel.to_string(),
            uid,
            token: token.map(str::to_string),
        });
        tracing::debug!(channel, %uid, "loopback channel joined");
        Ok(rx)
    }

    async fn subscribe(
        &self,
        uid: ParticipantId,
        kind: MediaKind,
    ) -> Result<TrackRef, RobocastError> {
        let delay = self.inner().subscribe_delay;
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }
        let mut inner = self.inner();
        if inner.failing.contains(&(uid, kind)) {
            return Err(RobocastError::SubscriptionFailure {
                participant: uid,
                kind,
                reason: "remote track unavailable".into(),
            });
        }
        inner.track_seq += 1;
        Ok(TrackRef {
            participant: uid,
            kind,
            track_id: format!("{kind}-{uid}-{}", inner.track_seq),
        })
    }

    async fn release_local_media(&self) {
        self.inner().media_releases += 1;
    }

    async fn leave(&self) -> Result<(), RobocastError> {
        let mut inner = self.inner();
        inner.leave_calls += 1;
        inner.sender = None;
        Ok(())
    }
}
