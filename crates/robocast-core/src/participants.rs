use crate::errors::RobocastError;
use crate::events::{MediaKind, Participant, ParticipantId, Role, TrackRef};

/// Authoritative media state of every remote participant in the channel.
///
/// Mutated only by the session's single writer. Arrival order is preserved,
/// which keeps display backfill deterministic.
#[derive(Debug, Clone, Default)]
pub struct ParticipantRegistry {
    participants: Vec<Participant>,
}

impl ParticipantRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a join. Returns `true` if the participant was unseen.
    pub fn upsert_join(&mut self, id: ParticipantId) -> bool {
        if self.contains(id) {
            return false;
        }
        self.participants.push(Participant::new(id));
        true
    }

    /// Record a publish, creating the participant if needed.
    ///
    /// Returns `true` when the media kind became available, `false` when it
    /// was already available and only the track reference was refreshed.
    pub fn upsert_publish(&mut self, track: TrackRef) -> Result<bool, RobocastError> {
        if track.track_id.trim().is_empty() {
            return Err(RobocastError::InvalidEvent(format!(
                "{} publish from {} carries an empty track id",
                track.kind, track.participant
            )));
        }
        self.upsert_join(track.participant);
        let Some(p) = self.participant_mut(track.participant) else {
            return Ok(false);
        };
        let newly_available = match track.kind {
            MediaKind::Video => {
                let was = p.has_video;
                p.has_video = true;
                p.video_track = Some(track);
                !was
            }
            MediaKind::Audio => {
                let was = p.has_audio;
                p.has_audio = true;
                p.audio_track = Some(track);
                !was
            }
        };
        Ok(newly_available)
    }

    /// Record an unpublish. Unknown participants are left untouched.
    ///
    /// Losing video also drops the participant's role, so a Host stops being
    /// Host the moment its video goes away.
    pub fn upsert_unpublish(&mut self, id: ParticipantId, kind: MediaKind) -> bool {
        let Some(p) = self.participant_mut(id) else {
            return false;
        };
        match kind {
            MediaKind::Video => {
                let was = p.has_video;
                p.has_video = false;
                p.video_track = None;
                p.role = Role::Unclassified;
                was
            }
            MediaKind::Audio => {
                let was = p.has_audio;
                p.has_audio = false;
                p.audio_track = None;
                was
            }
        }
    }

    pub fn remove(&mut self, id: ParticipantId) -> Option<Participant> {
        let idx = self.participants.iter().position(|p| p.id == id)?;
        Some(self.participants.remove(idx))
    }

    pub fn set_role(&mut self, id: ParticipantId, role: Role) {
        if let Some(p) = self.participant_mut(id) {
            p.role = role;
        }
    }

    pub fn get(&self, id: ParticipantId) -> Option<&Participant> {
        self.participants.iter().find(|p| p.id == id)
    }

    pub fn contains(&self, id: ParticipantId) -> bool {
        self.get(id).is_some()
    }

    pub fn all(&self) -> Vec<Participant> {
        self.participants.clone()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Participant> {
        self.participants.iter()
    }

    /// The current Host, if one is elected.
    pub fn host(&self) -> Option<ParticipantId> {
        self.participants
            .iter()
            .find(|p| p.role == Role::Host)
            .map(|p| p.id)
    }

    pub fn len(&self) -> usize {
        self.participants.len()
    }

    pub fn is_empty(&self) -> bool {
        self.participants.is_empty()
    }

    pub fn clear(&mut self) {
        self.participants.clear();
    }

    fn participant_mut(&mut self, id: ParticipantId) -> Option<&mut Participant> {
        self.participants.iter_mut().find(|p| p.id == id)
    }
}
