use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use robocast_core::events::SessionEvent;
use robocast_core::session::SessionSnapshot;
use robocast_core::surfaces::MediaRenderer;
use robocast_core::token::{SessionToken, TokenRequest};
use robocast_core::{
    ConnectionState, LoopbackChannel, ParticipantId, RawChannelEvent, RobocastError, Role,
    SessionConfig, SessionController, SessionEventListener, SurfaceId, TokenRole, TokenService,
    TrackRef,
};
use tokio::sync::watch;

#[derive(Debug, Clone, PartialEq, Eq)]
enum MediaCall {
    Create(ParticipantId, SurfaceId),
    Attach(SurfaceId, String),
    Destroy(SurfaceId),
    PlayAudio(ParticipantId, String),
    StopAudio(ParticipantId),
}

#[derive(Default)]
struct RecordingRenderer {
    calls: Mutex<Vec<MediaCall>>,
}

impl RecordingRenderer {
    fn calls(&self) -> Vec<MediaCall> {
        self.calls.lock().unwrap().clone()
    }

    fn surfaces_for(&self, participant: ParticipantId) -> Vec<SurfaceId> {
        self.calls()
            .into_iter()
            .filter_map(|call| match call {
                MediaCall::Create(p, s) if p == participant => Some(s),
                _ => None,
            })
            .collect()
    }

    fn attaches_on(&self, surface: SurfaceId) -> Vec<String> {
        self.calls()
            .into_iter()
            .filter_map(|call| match call {
                MediaCall::Attach(s, track) if s == surface => Some(track),
                _ => None,
            })
            .collect()
    }
}

impl MediaRenderer for RecordingRenderer {
    fn create_surface(&self, participant: ParticipantId, surface: SurfaceId) {
        self.calls.lock().unwrap().push(MediaCall::Create(participant, surface));
    }

    fn attach(&self, surface: SurfaceId, track: &TrackRef) -> Result<(), RobocastError> {
        self.calls
            .lock()
            .unwrap()
            .push(MediaCall::Attach(surface, track.track_id.clone()));
        Ok(())
    }

    fn destroy_surface(&self, surface: SurfaceId) {
        self.calls.lock().unwrap().push(MediaCall::Destroy(surface));
    }

    fn play_audio(&self, track: &TrackRef) -> Result<(), RobocastError> {
        self.calls
            .lock()
            .unwrap()
            .push(MediaCall::PlayAudio(track.participant, track.track_id.clone()));
        Ok(())
    }

    fn stop_audio(&self, participant: ParticipantId) {
        self.calls.lock().unwrap().push(MediaCall::StopAudio(participant));
    }
}

#[derive(Default)]
struct EventLog {
    events: Mutex<Vec<SessionEvent>>,
}

impl SessionEventListener for EventLog {
    fn on_event(&self, event: SessionEvent) {
        self.events.lock().unwrap().push(event);
    }
}

struct NoToken;

#[async_trait]
impl TokenService for NoToken {
    async fn request_token(&self, _request: &TokenRequest) -> Result<SessionToken, RobocastError> {
        Err(RobocastError::CredentialUnavailable("no token server".into()))
    }
}

struct Harness {
    channel: Arc<LoopbackChannel>,
    media: Arc<RecordingRenderer>,
    events: Arc<EventLog>,
    session: SessionController,
    snapshots: watch::Receiver<SessionSnapshot>,
}

impl Harness {
    async fn connected() -> Self {
        let channel = Arc::new(LoopbackChannel::new());
        let media = Arc::new(RecordingRenderer::default());
        let events = Arc::new(EventLog::default());
        let session = SessionController::new(
            channel.clone(),
            Arc::new(NoToken),
            media.clone(),
            SessionConfig::default(),
        )
        .with_local_id(ParticipantId(500));
        session.add_listener(events.clone());
        let snapshots = session.watch_snapshots();
        session.connect("room-a", TokenRole::Host).await.unwrap();
        Self {
            channel,
            media,
            events,
            session,
            snapshots,
        }
    }

    fn send(&self, event: RawChannelEvent) {
        assert!(self.channel.inject(event), "no session listening");
    }

    fn join(&self, uid: u64) {
        self.send(RawChannelEvent::UserJoined { uid: ParticipantId(uid) });
    }

    fn publish(&self, uid: u64, media_type: &str) {
        self.send(RawChannelEvent::UserPublished {
            uid: ParticipantId(uid),
            media_type: media_type.into(),
        });
    }

    fn unpublish(&self, uid: u64, media_type: &str) {
        self.send(RawChannelEvent::UserUnpublished {
            uid: ParticipantId(uid),
            media_type: media_type.into(),
        });
    }

    fn leave(&self, uid: u64) {
        self.send(RawChannelEvent::UserLeft {
            uid: ParticipantId(uid),
            reason: Some("Quit".into()),
        });
    }

    async fn wait_for(&mut self, what: &str, pred: impl Fn(&SessionSnapshot) -> bool) -> SessionSnapshot {
        let waited = tokio::time::timeout(Duration::from_secs(2), async {
            loop {
                {
                    let snapshot = self.snapshots.borrow_and_update();
                    if pred(&snapshot) {
                        return snapshot.clone();
                    }
                }
                if self.snapshots.changed().await.is_err() {
                    return self.snapshots.borrow().clone();
                }
            }
        })
        .await;
        match waited {
            Ok(snapshot) if pred(&snapshot) => snapshot,
            _ => panic!("timed out waiting for {what}: {:?}", self.session.snapshot()),
        }
    }

    async fn wait_video(&mut self, uid: u64) -> SessionSnapshot {
        self.wait_for("video", move |s| has_video(s, uid)).await
    }
}

fn has_video(snapshot: &SessionSnapshot, uid: u64) -> bool {
    snapshot
        .participants
        .iter()
        .any(|p| p.id == ParticipantId(uid) && p.has_video)
}

fn role_of(snapshot: &SessionSnapshot, uid: u64) -> Option<Role> {
    snapshot
        .participants
        .iter()
        .find(|p| p.id == ParticipantId(uid))
        .map(|p| p.role)
}

fn ids(entries: &[u64]) -> Vec<ParticipantId> {
    entries.iter().map(|id| ParticipantId(*id)).collect()
}

#[tokio::test]
async fn first_publisher_holds_host_against_later_device() {
    let mut h = Harness::connected().await;
    h.join(100001);
    h.join(5);
    h.wait_for("joins", |s| s.participants.len() == 2).await;

    h.publish(5, "video");
    let s = h.wait_video(5).await;
    assert_eq!(s.host, Some(ParticipantId(5)));

    h.publish(100001, "video");
    let s = h.wait_video(100001).await;
    assert_eq!(s.host, Some(ParticipantId(5)));
    assert_eq!(role_of(&s, 100001), Some(Role::Viewer));
    assert_eq!(s.layout.primary.participant(), Some(ParticipantId(5)));
    assert_eq!(s.layout.secondary.participant(), Some(ParticipantId(100001)));

    h.session.teardown().await;
}

#[tokio::test]
async fn host_leaving_does_not_promote_existing_viewer() {
    let mut h = Harness::connected().await;
    h.publish(100001, "video");
    h.wait_video(100001).await;
    h.publish(7, "video");
    let s = h.wait_video(7).await;
    assert_eq!(s.host, Some(ParticipantId(100001)));
    assert_eq!(role_of(&s, 7), Some(Role::Viewer));

    h.leave(100001);
    let s = h
        .wait_for("host to leave", |s| role_of(s, 100001).is_none())
        .await;
    assert_eq!(s.host, None);
    assert_eq!(role_of(&s, 7), Some(Role::Viewer));
    assert_eq!(s.display.entries, ids(&[7]));

    // Only a fresh publish triggers classification again.
    h.unpublish(7, "video");
    h.wait_for("unpublish", |s| !has_video(s, 7)).await;
    h.publish(7, "video");
    let s = h.wait_video(7).await;
    assert_eq!(s.host, Some(ParticipantId(7)));

    let host_changes = h
        .events
        .events
        .lock()
        .unwrap()
        .iter()
        .filter(|e| matches!(e, SessionEvent::HostChanged(_)))
        .count();
    assert!(host_changes >= 3);

    h.session.teardown().await;
}

#[tokio::test]
async fn display_set_never_exceeds_two_feeds() {
    let mut h = Harness::connected().await;
    for uid in [1, 2, 3, 4] {
        h.publish(uid, "video");
        let s = h.wait_video(uid).await;
        assert!(s.display.entries.len() <= 2);
    }
    let s = h.session.snapshot();
    assert_eq!(s.display.entries, ids(&[1, 2]));

    h.leave(1);
    let s = h.wait_for("backfill", |s| role_of(s, 1).is_none()).await;
    assert_eq!(s.display.entries, ids(&[2, 3]));

    h.session.teardown().await;
}

#[tokio::test]
async fn republish_reuses_surface_and_attaches_each_track_once() {
    let mut h = Harness::connected().await;
    h.publish(3, "video");
    h.wait_video(3).await;

    h.unpublish(3, "video");
    h.wait_for("unpublish", |s| !has_video(s, 3)).await;
    h.publish(3, "video");
    h.wait_video(3).await;

    // A second swap-less layout pass must not attach again.
    h.join(8);
    h.wait_for("join", |s| role_of(s, 8).is_some()).await;

    let surfaces = h.media.surfaces_for(ParticipantId(3));
    assert_eq!(surfaces.len(), 1);
    let attaches = h.media.attaches_on(surfaces[0]);
    assert_eq!(attaches.len(), 2);
    assert_ne!(attaches[0], attaches[1]);

    h.session.teardown().await;
}

#[tokio::test]
async fn swap_flips_primary_without_reordering() {
    let mut h = Harness::connected().await;
    h.publish(100001, "video");
    h.wait_video(100001).await;
    h.publish(2, "video");
    let s = h.wait_video(2).await;
    assert!(s.layout.swap_enabled());
    assert_eq!(s.display.primary_index, 0);

    assert!(h.session.swap_primary().await);
    let s = h.wait_for("swap", |s| s.display.primary_index == 1).await;
    assert_eq!(s.display.entries, ids(&[100001, 2]));
    assert_eq!(s.layout.primary.participant(), Some(ParticipantId(2)));

    assert!(h.session.swap_primary().await);
    let s = h.wait_for("swap back", |s| s.display.primary_index == 0).await;
    assert_eq!(s.layout.primary.participant(), Some(ParticipantId(100001)));

    h.session.teardown().await;
}

#[tokio::test]
async fn leave_releases_surface_and_rejoin_starts_fresh() {
    let mut h = Harness::connected().await;
    h.publish(9, "video");
    h.publish(9, "audio");
    h.wait_for("media", |s| {
        s.participants
            .iter()
            .any(|p| p.id == ParticipantId(9) && p.has_video && p.has_audio)
    })
    .await;
    let first = h.media.surfaces_for(ParticipantId(9));
    assert_eq!(first.len(), 1);

    h.leave(9);
    let s = h.wait_for("leave", |s| role_of(s, 9).is_none()).await;
    assert!(!s.display.contains(ParticipantId(9)));
    let calls = h.media.calls();
    assert!(calls.contains(&MediaCall::Destroy(first[0])));
    assert!(calls.contains(&MediaCall::StopAudio(ParticipantId(9))));

    h.join(9);
    h.publish(9, "video");
    h.wait_video(9).await;
    let surfaces = h.media.surfaces_for(ParticipantId(9));
    assert_eq!(surfaces.len(), 2);
    assert_ne!(surfaces[0], surfaces[1]);
    assert_eq!(h.media.attaches_on(surfaces[1]).len(), 1);

    h.session.teardown().await;
}

#[tokio::test]
async fn unpublish_for_unknown_participant_is_ignored() {
    let mut h = Harness::connected().await;
    h.publish(1, "video");
    let before = h.wait_video(1).await;

    h.unpublish(77, "video");
    h.leave(78);
    h.send(RawChannelEvent::UserPublished {
        uid: ParticipantId(79),
        media_type: "screen".into(),
    });
    h.join(2);
    let after = h.wait_for("join", |s| role_of(s, 2).is_some()).await;

    assert_eq!(after.display, before.display);
    assert!(role_of(&after, 77).is_none());
    assert!(role_of(&after, 79).is_none());
    assert_eq!(h.session.connection_state().await, ConnectionState::Connected);

    h.session.teardown().await;
}

#[tokio::test]
async fn failed_subscribe_leaves_participant_without_media() {
    let mut h = Harness::connected().await;
    h.channel.fail_subscribe(ParticipantId(4), robocast_core::MediaKind::Video);
    h.publish(4, "video");
    let s = h.wait_for("participant", |s| role_of(s, 4).is_some()).await;
    assert!(!has_video(&s, 4));
    assert!(s.display.entries.is_empty());

    let failed = h.events.events.lock().unwrap().iter().any(|e| {
        matches!(e, SessionEvent::SubscriptionFailed { participant, .. } if *participant == ParticipantId(4))
    });
    assert!(failed);

    h.session.teardown().await;
}

#[tokio::test]
async fn unpublish_cancels_pending_subscribe() {
    let mut h = Harness::connected().await;
    h.channel.set_subscribe_delay(Duration::from_millis(100));
    h.join(6);
    h.publish(6, "video");
    h.unpublish(6, "video");
    h.wait_for("join", |s| role_of(s, 6).is_some()).await;

    tokio::time::sleep(Duration::from_millis(250)).await;
    let s = h.session.snapshot();
    assert!(!has_video(&s, 6));
    assert!(s.display.entries.is_empty());
    assert!(h.media.surfaces_for(ParticipantId(6)).is_empty());

    h.session.teardown().await;
}

#[tokio::test]
async fn leave_cancels_pending_subscribe() {
    let mut h = Harness::connected().await;
    h.channel.set_subscribe_delay(Duration::from_millis(100));
    h.join(11);
    h.publish(11, "video");
    h.leave(11);
    h.join(12);
    h.wait_for("later join", |s| role_of(s, 12).is_some()).await;

    tokio::time::sleep(Duration::from_millis(250)).await;
    let s = h.session.snapshot();
    assert!(role_of(&s, 11).is_none());
    assert!(!s.display.contains(ParticipantId(11)));
    assert!(h.media.surfaces_for(ParticipantId(11)).is_empty());

    h.session.teardown().await;
}

#[tokio::test]
async fn teardown_cancels_pending_subscribe() {
    let h = Harness::connected().await;
    h.channel.set_subscribe_delay(Duration::from_millis(100));
    h.join(13);
    h.publish(13, "video");
    tokio::time::sleep(Duration::from_millis(10)).await;

    h.session.teardown().await;
    tokio::time::sleep(Duration::from_millis(250)).await;

    let s = h.session.snapshot();
    assert_eq!(s.state, ConnectionState::Closed);
    assert!(s.participants.is_empty());
    assert!(s.display.entries.is_empty());
    assert!(h.media.surfaces_for(ParticipantId(13)).is_empty());
    assert_eq!(h.session.connection_state().await, ConnectionState::Closed);
}

#[tokio::test]
async fn lost_connection_closes_session() {
    let mut h = Harness::connected().await;
    h.publish(1, "video");
    let s = h.wait_video(1).await;
    let surface = s.layout.primary.surface().unwrap();

    h.send(RawChannelEvent::ConnectionLost {
        reason: Some("network".into()),
    });
    let s = h
        .wait_for("close", |s| s.state == ConnectionState::Closed)
        .await;
    assert!(s.participants.is_empty());
    assert!(h.media.calls().contains(&MediaCall::Destroy(surface)));
    assert_eq!(h.channel.leave_calls(), 1);

    h.session.teardown().await;
    assert_eq!(h.channel.leave_calls(), 1);
    assert_eq!(h.session.connection_state().await, ConnectionState::Closed);
}

#[tokio::test]
async fn teardown_releases_everything_and_ignores_late_events() {
    let mut h = Harness::connected().await;
    h.publish(1, "video");
    h.publish(2, "video");
    h.wait_video(1).await;
    h.wait_video(2).await;

    h.session.teardown().await;
    let destroyed = h
        .media
        .calls()
        .into_iter()
        .filter(|c| matches!(c, MediaCall::Destroy(_)))
        .count();
    assert_eq!(destroyed, 2);
    assert_eq!(h.channel.media_releases(), 1);
    assert!(!h.channel.inject(RawChannelEvent::UserJoined { uid: ParticipantId(3) }));

    let s = h.session.snapshot();
    assert_eq!(s.state, ConnectionState::Closed);
    assert!(s.display.entries.is_empty());
}

#[tokio::test]
async fn missing_token_server_joins_without_credential() {
    let h = Harness::connected().await;
    assert_eq!(h.channel.joined_with().unwrap().token, None);
    let credential_warned = h
        .events
        .events
        .lock()
        .unwrap()
        .iter()
        .any(|e| matches!(e, SessionEvent::CredentialUnavailable(_)));
    assert!(credential_warned);
    h.session.teardown().await;
}
