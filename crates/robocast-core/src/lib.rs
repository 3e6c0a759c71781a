//! Robocast session core.
//!
//! Joins a real-time channel, tracks remote publishers, elects the robot
//! feed as host and composes at most two feeds into a picture-in-picture
//! layout. Pure Rust with no platform dependencies; the channel provider
//! and media renderer are supplied by the shell.

pub mod compositor;
pub mod controls;
pub mod display;
pub mod errors;
pub mod events;
pub mod layout;
pub mod loopback;
pub mod oauth;
pub mod participants;
pub mod roles;
pub mod rooms;
pub mod session;
pub mod settings;
pub mod surfaces;
pub mod token;

pub use compositor::Compositor;
pub use controls::{Command, CommandLog, ControlPad};
pub use display::{DisplaySet, DisplaySetSelector};
pub use errors::RobocastError;
pub use events::{
    ChannelEvent, ConnectionState, MediaKind, Participant, ParticipantId, RawChannelEvent, Role,
    SessionEvent, SessionEventListener, TrackRef,
};
pub use layout::{CompositeLayoutRenderer, Layout, LayoutConfig, Slot};
pub use loopback::LoopbackChannel;
pub use oauth::OAuthClient;
pub use participants::ParticipantRegistry;
pub use roles::{RoleClassifier, SourcePolicy};
pub use rooms::{Room, RoomKind};
pub use session::{ChannelProvider, SessionConfig, SessionController, SessionSnapshot};
pub use settings::{Settings, SettingsStore};
pub use surfaces::{LoggingRenderer, MediaRenderer, RenderElementCache, SurfaceId};
pub use token::{HttpTokenService, TokenRole, TokenService};
