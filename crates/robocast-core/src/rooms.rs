use serde::{Deserialize, Serialize};

use crate::errors::RobocastError;
use crate::token::TokenRole;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RoomKind {
    /// Watch the robot feed and drive it with the control pad.
    StreamAndControl,
    WatchOnly,
}

/// A selectable streaming room. The room id doubles as channel name.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Room {
    pub id: String,
    pub title: String,
    pub kind: RoomKind,
    /// Label of the plan the user picked before choosing a room.
    #[serde(default)]
    pub plan: Option<String>,
}

impl Room {
    pub fn catalogue() -> Vec<Room> {
        vec![
            Room {
                id: "room-a".into(),
                title: "Room A - Stream & Control".into(),
                kind: RoomKind::StreamAndControl,
                plan: None,
            },
            Room {
                id: "room-b".into(),
                title: "Room B - Watch Only".into(),
                kind: RoomKind::WatchOnly,
                plan: None,
            },
        ]
    }

    pub fn from_id(id: &str) -> Result<Room, RobocastError> {
        Self::catalogue()
            .into_iter()
            .find(|room| room.id == id.trim())
            .ok_or_else(|| RobocastError::InvalidRoom(format!("unknown room '{id}'")))
    }

    pub fn with_plan(mut self, plan: &str) -> Self {
        self.plan = Some(plan.to_string());
        self
    }

    pub fn channel_name(&self) -> &str {
        &self.id
    }

    pub fn controls_enabled(&self) -> bool {
        self.kind == RoomKind::StreamAndControl
    }

    pub fn token_role(&self) -> TokenRole {
        match self.kind {
            RoomKind::StreamAndControl => TokenRole::Host,
            RoomKind::WatchOnly => TokenRole::Viewer,
        }
    }
}
