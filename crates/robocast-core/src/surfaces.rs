use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use serde::Serialize;

use crate::errors::RobocastError;
use crate::events::{MediaKind, ParticipantId, TrackRef};

/// Identity of one renderable surface. Never reused within a cache.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(transparent)]
pub struct SurfaceId(pub u64);

impl fmt::Display for SurfaceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "surface-{}", self.0)
    }
}

/// Platform side of media playback.
///
/// The cache decides *when* to call these; implementations only perform the
/// side effect (create a video element, attach and play a track, ...).
pub trait MediaRenderer: Send + Sync {
    fn create_surface(&self, participant: ParticipantId, surface: SurfaceId);
    fn attach(&self, surface: SurfaceId, track: &TrackRef) -> Result<(), RobocastError>;
    fn destroy_surface(&self, surface: SurfaceId);
    fn play_audio(&self, track: &TrackRef) -> Result<(), RobocastError>;
    fn stop_audio(&self, participant: ParticipantId);
}

/// Renderer that only records what it would do. Used by headless shells.
#[derive(Debug, Default)]
pub struct LoggingRenderer;

impl MediaRenderer for LoggingRenderer {
    fn create_surface(&self, participant: ParticipantId, surface: SurfaceId) {
        tracing::info!(%participant, %surface, "create surface");
    }

    fn attach(&self, surface: SurfaceId, track: &TrackRef) -> Result<(), RobocastError> {
        tracing::info!(%surface, track = %track.track_id, "attach video track");
        Ok(())
    }

    fn destroy_surface(&self, surface: SurfaceId) {
        tracing::info!(%surface, "destroy surface");
    }

    fn play_audio(&self, track: &TrackRef) -> Result<(), RobocastError> {
        tracing::info!(participant = %track.participant, track = %track.track_id, "play audio");
        Ok(())
    }

    fn stop_audio(&self, participant: ParticipantId) {
        tracing::info!(%participant, "stop audio");
    }
}

/// Persistent per-participant render target.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RenderSurface {
    pub id: SurfaceId,
    pub participant: ParticipantId,
    /// The exact track currently playing on this surface.
    pub attached_track_key: Option<(ParticipantId, String)>,
}

/// Owns one surface per participant and remembers what is attached to it.
///
/// Surfaces outlive unpublish/republish cycles and are only destroyed when
/// the participant leaves, so toggling a camera never recreates an element.
pub struct RenderElementCache {
    renderer: Arc<dyn MediaRenderer>,
    surfaces: HashMap<ParticipantId, RenderSurface>,
    playing_audio: HashMap<ParticipantId, String>,
    next_surface: u64,
}

impl RenderElementCache {
    pub fn new(renderer: Arc<dyn MediaRenderer>) -> Self {
        Self {
            renderer,
            surfaces: HashMap::new(),
            playing_audio: HashMap::new(),
            next_surface: 1,
        }
    }

    pub fn get_or_create_surface(&mut self, participant: ParticipantId) -> &RenderSurface {
        let renderer = &self.renderer;
        let next = &mut self.next_surface;
        self.surfaces.entry(participant).or_insert_with(|| {
            let id = SurfaceId(*next);
            *next += 1;
            renderer.create_surface(participant, id);
            tracing::debug!(%participant, surface = %id, "surface created");
            RenderSurface {
                id,
                participant,
                attached_track_key: None,
            }
        })
    }

    /// Attach `track` to its participant's surface unless it is already
    /// playing there. Returns whether an attach actually happened.
    pub fn attach_if_new(&mut self, track: &TrackRef) -> Result<bool, RobocastError> {
        if track.kind != MediaKind::Video {
            return Err(RobocastError::InvalidEvent(format!(
                "cannot attach {} track {} to a surface",
                track.kind, track.track_id
            )));
        }
        let key = (track.participant, track.track_id.clone());
        let surface_id = {
            let surface = self.get_or_create_surface(track.participant);
            if surface.attached_track_key.as_ref() == Some(&key) {
                return Ok(false);
            }
            surface.id
        };

        self.renderer.attach(surface_id, track)?;
        if let Some(surface) = self.surfaces.get_mut(&track.participant) {
            surface.attached_track_key = Some(key);
        }
        tracing::debug!(participant = %track.participant, surface = %surface_id, track = %track.track_id, "track attached");
        Ok(true)
    }

    /// Start audio playback unless this exact track is already playing.
    pub fn play_audio_if_new(&mut self, track: &TrackRef) -> Result<bool, RobocastError> {
        if track.kind != MediaKind::Audio {
            return Err(RobocastError::InvalidEvent(format!(
                "cannot play {} track {} as audio",
                track.kind, track.track_id
            )));
        }
        if self.playing_audio.get(&track.participant) == Some(&track.track_id) {
            return Ok(false);
        }
        self.renderer.play_audio(track)?;
        self.playing_audio
            .insert(track.participant, track.track_id.clone());
        Ok(true)
    }

    pub fn stop_audio(&mut self, participant: ParticipantId) -> bool {
        if self.playing_audio.remove(&participant).is_some() {
            self.renderer.stop_audio(participant);
            true
        } else {
            false
        }
    }

    /// Destroy the participant's surface and forget its attachments.
    pub fn release_participant(&mut self, participant: ParticipantId) -> bool {
        self.stop_audio(participant);
        match self.surfaces.remove(&participant) {
            Some(surface) => {
                self.renderer.destroy_surface(surface.id);
                tracing::debug!(%participant, surface = %surface.id, "surface released");
                true
            }
            None => false,
        }
    }

    pub fn release_all(&mut self) {
        let participants: Vec<ParticipantId> = self
            .surfaces
            .keys()
            .chain(self.playing_audio.keys())
            .copied()
            .collect();
        for participant in participants {
            self.release_participant(participant);
        }
    }

    pub fn surface(&self, participant: ParticipantId) -> Option<&RenderSurface> {
        self.surfaces.get(&participant)
    }

    pub fn surface_count(&self) -> usize {
        self.surfaces.len()
    }
}
