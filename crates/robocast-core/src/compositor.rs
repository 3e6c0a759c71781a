use std::sync::Arc;

use crate::display::{DisplaySet, DisplaySetSelector};
use crate::errors::RobocastError;
use crate::events::{ChannelEvent, ConnectionState, MediaKind, Participant, ParticipantId, Role, TrackRef};
use crate::layout::{CompositeLayoutRenderer, Layout, LayoutConfig};
use crate::participants::ParticipantRegistry;
use crate::roles::{RoleClassifier, SourcePolicy};
use crate::surfaces::{MediaRenderer, RenderElementCache};

/// What a single normalised event changed.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Applied {
    pub joined: Option<ParticipantId>,
    pub left: Option<ParticipantId>,
    pub display_changed: bool,
    pub host_changed: bool,
}

/// All per-session video state, owned by exactly one writer.
///
/// Events are applied one at a time; nothing in here performs network I/O.
/// Media side effects go through the [`MediaRenderer`] held by the cache.
pub struct Compositor {
    registry: ParticipantRegistry,
    classifier: RoleClassifier,
    selector: DisplaySetSelector,
    cache: RenderElementCache,
    renderer: CompositeLayoutRenderer,
    status: ConnectionState,
}

impl Compositor {
    pub fn new(
        policy: Arc<dyn SourcePolicy>,
        media: Arc<dyn MediaRenderer>,
        layout: LayoutConfig,
    ) -> Self {
        Self {
            registry: ParticipantRegistry::new(),
            classifier: RoleClassifier::new(policy),
            selector: DisplaySetSelector::new(),
            cache: RenderElementCache::new(media),
            renderer: CompositeLayoutRenderer::new(layout),
            status: ConnectionState::Disconnected,
        }
    }

    pub fn apply(&mut self, event: ChannelEvent) -> Result<Applied, RobocastError> {
        let id = event.participant();
        let name = event.name();
        tracing::debug!(participant = %id, event = name, "applying channel event");

        match event {
            ChannelEvent::Joined(id) => Ok(Applied {
                joined: self.registry.upsert_join(id).then_some(id),
                ..Applied::default()
            }),
            ChannelEvent::Published(track) => self.on_published(track),
            ChannelEvent::Unpublished { participant, kind } => {
                if !self.registry.contains(participant) {
                    return Ok(self.out_of_order(participant, name));
                }
                Ok(self.on_unpublished(participant, kind))
            }
            ChannelEvent::Left(id) => {
                if !self.registry.contains(id) {
                    return Ok(self.out_of_order(id, name));
                }
                Ok(self.on_left(id))
            }
        }
    }

    fn on_published(&mut self, track: TrackRef) -> Result<Applied, RobocastError> {
        let id = track.participant;
        let mut applied = Applied {
            joined: (!self.registry.contains(id)).then_some(id),
            ..Applied::default()
        };
        let newly_available = self.registry.upsert_publish(track.clone())?;

        match track.kind {
            MediaKind::Video => {
                let host_before = self.registry.host();
                let role = self.classify_if_unclassified(id);
                applied.display_changed = if role == Some(Role::Host) {
                    self.selector.admit_host(id)
                } else {
                    self.selector.on_video_available(id)
                };
                applied.host_changed = host_before != self.registry.host();
                if !newly_available {
                    tracing::debug!(participant = %id, track = %track.track_id, "video track refreshed");
                }
            }
            MediaKind::Audio => {
                if let Err(e) = self.cache.play_audio_if_new(&track) {
                    tracing::warn!(participant = %id, "audio playback failed, marking unavailable: {e}");
                    self.registry.upsert_unpublish(id, MediaKind::Audio);
                }
            }
        }
        Ok(applied)
    }

    fn on_unpublished(&mut self, id: ParticipantId, kind: MediaKind) -> Applied {
        let host_before = self.registry.host();
        self.registry.upsert_unpublish(id, kind);
        let mut applied = Applied::default();
        match kind {
            MediaKind::Video => {
                if self.selector.on_video_unavailable(id) {
                    applied.display_changed = true;
                    self.backfill();
                }
            }
            MediaKind::Audio => {
                self.cache.stop_audio(id);
            }
        }
        applied.host_changed = host_before != self.registry.host();
        applied
    }

    fn on_left(&mut self, id: ParticipantId) -> Applied {
        let host_before = self.registry.host();
        self.registry.remove(id);
        self.cache.release_participant(id);
        let display_changed = self.selector.on_participant_left(id);
        if display_changed {
            self.backfill();
        }
        Applied {
            joined: None,
            left: Some(id),
            display_changed,
            host_changed: host_before != self.registry.host(),
        }
    }

    fn out_of_order(&self, participant: ParticipantId, event: &'static str) -> Applied {
        let err = RobocastError::OutOfOrderEvent { participant, event };
        tracing::warn!("ignoring event: {err}");
        Applied::default()
    }

    /// Elect a role for a participant that just started publishing video.
    /// Roles are never reassigned while video stays up.
    fn classify_if_unclassified(&mut self, id: ParticipantId) -> Option<Role> {
        let participant = self.registry.get(id)?;
        if participant.role != Role::Unclassified {
            return None;
        }
        let role = self.classifier.classify_in(participant, &self.registry);
        self.registry.set_role(id, role);
        tracing::info!(participant = %id, ?role, "participant classified");
        Some(role)
    }

    /// Fill freed display slots with participants that already have video.
    fn backfill(&mut self) {
        let candidates: Vec<(ParticipantId, Role)> = self
            .registry
            .iter()
            .filter(|p| p.has_video && !self.selector.display_set().contains(p.id))
            .map(|p| (p.id, p.role))
            .collect();
        for (id, role) in candidates {
            if self.selector.is_full() {
                break;
            }
            if self.selector.on_video_available(id) {
                tracing::debug!(participant = %id, "backfilled into display set");
                if role == Role::Host {
                    self.selector.promote(id);
                }
            }
        }
    }

    pub fn swap_primary(&mut self) -> bool {
        self.selector.swap_primary()
    }

    pub fn set_status(&mut self, status: ConnectionState) {
        self.status = status;
    }

    pub fn status(&self) -> &ConnectionState {
        &self.status
    }

    /// Lay out the current display set. Surfaces are reused across passes.
    pub fn layout(&mut self) -> Layout {
        self.renderer.render(
            &self.status,
            self.selector.display_set(),
            &self.registry,
            &mut self.cache,
        )
    }

    pub fn display_set(&self) -> DisplaySet {
        let mut set = self.selector.display_set().clone();
        set.primary_index = self.selector.primary_index();
        set
    }

    pub fn participants(&self) -> Vec<Participant> {
        self.registry.all()
    }

    pub fn registry(&self) -> &ParticipantRegistry {
        &self.registry
    }

    pub fn cache(&self) -> &RenderElementCache {
        &self.cache
    }

    pub fn host(&self) -> Option<ParticipantId> {
        self.registry.host()
    }

    /// Drop every participant and release every surface.
    pub fn reset(&mut self) {
        self.cache.release_all();
        self.registry.clear();
        self.selector.clear();
    }
}
