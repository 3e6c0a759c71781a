use std::fmt;
use std::str::FromStr;
use std::sync::{Arc, RwLock};

use serde::{Deserialize, Serialize};

use crate::errors::RobocastError;
use crate::layout::Layout;

/// Identifier assigned by the channel provider at join time.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ParticipantId(pub u64);

impl fmt::Display for ParticipantId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<u64> for ParticipantId {
    fn from(id: u64) -> Self {
        Self(id)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MediaKind {
    Video,
    Audio,
}

impl fmt::Display for MediaKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MediaKind::Video => f.write_str("video"),
            MediaKind::Audio => f.write_str("audio"),
        }
    }
}

impl FromStr for MediaKind {
    type Err = RobocastError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "video" => Ok(MediaKind::Video),
            "audio" => Ok(MediaKind::Audio),
            other => Err(RobocastError::InvalidEvent(format!(
                "unknown media kind '{other}'"
            ))),
        }
    }
}

/// Handle to one published media track.
///
/// `track_id` changes every time the publisher republishes.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct TrackRef {
    pub participant: ParticipantId,
    pub kind: MediaKind,
    pub track_id: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    Unclassified,
    Host,
    Viewer,
}

/// Known media state of a remote participant.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Participant {
    pub id: ParticipantId,
    pub has_video: bool,
    pub has_audio: bool,
    pub video_track: Option<TrackRef>,
    pub audio_track: Option<TrackRef>,
    pub role: Role,
}

impl Participant {
    pub fn new(id: ParticipantId) -> Self {
        Self {
            id,
            has_video: false,
            has_audio: false,
            video_track: None,
            audio_track: None,
            role: Role::Unclassified,
        }
    }
}

/// Event as delivered by the real-time channel provider, before normalisation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum RawChannelEvent {
    UserJoined {
        uid: ParticipantId,
    },
    UserPublished {
        uid: ParticipantId,
        media_type: String,
    },
    UserUnpublished {
        uid: ParticipantId,
        media_type: String,
    },
    UserLeft {
        uid: ParticipantId,
        #[serde(default)]
        reason: Option<String>,
    },
    ConnectionLost {
        #[serde(default)]
        reason: Option<String>,
    },
}

/// Normalised event consumed by the registry, classifier and selector.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ChannelEvent {
    Joined(ParticipantId),
    Published(TrackRef),
    Unpublished {
        participant: ParticipantId,
        kind: MediaKind,
    },
    Left(ParticipantId),
}

impl ChannelEvent {
    pub fn participant(&self) -> ParticipantId {
        match self {
            ChannelEvent::Joined(id) | ChannelEvent::Left(id) => *id,
            ChannelEvent::Published(track) => track.participant,
            ChannelEvent::Unpublished { participant, .. } => *participant,
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            ChannelEvent::Joined(_) => "joined",
            ChannelEvent::Published(_) => "published",
            ChannelEvent::Unpublished { .. } => "unpublished",
            ChannelEvent::Left(_) => "left",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub enum ConnectionState {
    Disconnected,
    Connecting,
    Connected,
    /// Terminal: the session was torn down or the channel was lost.
    Closed,
}

/// Events emitted by the core to UI listeners.
#[derive(Debug, Clone)]
pub enum SessionEvent {
    ConnectionStateChanged(ConnectionState),
    ConnectionFailed(String),
    CredentialUnavailable(String),
    ParticipantJoined(ParticipantId),
    ParticipantLeft(ParticipantId),
    HostChanged(Option<ParticipantId>),
    SubscriptionFailed {
        participant: ParticipantId,
        kind: MediaKind,
    },
    LayoutChanged(Layout),
}

/// Trait for receiving events from the core.
/// Implementations must be Send + Sync (called from tokio tasks).
pub trait SessionEventListener: Send + Sync {
    fn on_event(&self, event: SessionEvent);
}

/// Internal event emitter that dispatches to registered listeners.
#[derive(Clone, Default)]
pub struct EventEmitter {
    listeners: Arc<RwLock<Vec<Arc<dyn SessionEventListener>>>>,
}

impl EventEmitter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_listener(&self, listener: Arc<dyn SessionEventListener>) {
        self.listeners
            .write()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .push(listener);
    }

    pub fn emit(&self, event: SessionEvent) {
        let listeners = self
            .listeners
            .read()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        for listener in listeners.iter() {
            listener.on_event(event.clone());
        }
    }
}
