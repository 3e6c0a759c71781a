use std::collections::VecDeque;
use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::errors::RobocastError;
use crate::rooms::Room;

/// Number of entries kept in the command log.
pub const COMMAND_LOG_CAPACITY: usize = 20;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Command {
    Up,
    Down,
    Left,
    Right,
    Scoop,
}

impl Command {
    pub fn is_directional(&self) -> bool {
        !matches!(self, Command::Scoop)
    }

    fn as_str(&self) -> &'static str {
        match self {
            Command::Up => "up",
            Command::Down => "down",
            Command::Left => "left",
            Command::Right => "right",
            Command::Scoop => "scoop",
        }
    }
}

impl fmt::Display for Command {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Command {
    type Err = RobocastError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "up" => Ok(Command::Up),
            "down" => Ok(Command::Down),
            "left" => Ok(Command::Left),
            "right" => Ok(Command::Right),
            "scoop" => Ok(Command::Scoop),
            other => Err(RobocastError::InvalidEvent(format!("unknown command '{other}'"))),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum CommandStatus {
    Sent,
    Acknowledged,
    Failed,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum CommandSource {
    Websocket,
    Blockchain,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CommandEntry {
    pub id: String,
    pub timestamp: DateTime<Utc>,
    pub text: String,
    pub status: CommandStatus,
    pub source: CommandSource,
}

/// Newest-first log of the most recent commands.
#[derive(Debug, Clone, Default)]
pub struct CommandLog {
    entries: VecDeque<CommandEntry>,
}

impl CommandLog {
    pub fn push(&mut self, entry: CommandEntry) {
        self.entries.push_front(entry);
        self.entries.truncate(COMMAND_LOG_CAPACITY);
    }

    pub fn entries(&self) -> impl Iterator<Item = &CommandEntry> {
        self.entries.iter()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

#[derive(Debug, Clone)]
struct InFlight {
    id: String,
    command: Command,
}

/// Gate for robot commands.
///
/// One command may be in flight at a time; the pad is ready again once the
/// command is acknowledged or failed. Watch-only rooms never accept
/// commands. Independent of the video session.
#[derive(Debug)]
pub struct ControlPad {
    enabled: bool,
    in_flight: Option<InFlight>,
    log: CommandLog,
    seq: u64,
}

impl ControlPad {
    pub fn new(room: &Room) -> Self {
        Self {
            enabled: room.controls_enabled(),
            in_flight: None,
            log: CommandLog::default(),
            seq: 0,
        }
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled
    }

    pub fn is_ready(&self) -> bool {
        self.enabled && self.in_flight.is_none()
    }

    /// Record a command as sent and return its id.
    pub fn send(&mut self, command: Command) -> Result<String, RobocastError> {
        if !self.enabled {
            return Err(RobocastError::ControlDisabled);
        }
        if self.in_flight.is_some() {
            return Err(RobocastError::ControlBusy);
        }

        self.seq += 1;
        let now = Utc::now();
        let prefix = if command.is_directional() { "cmd" } else { "scoop" };
        let id = format!("{prefix}-{}-{}", now.timestamp_millis(), self.seq);
        let (text, source) = if command.is_directional() {
            (
                format!("Sending transaction: {}", command.as_str().to_uppercase()),
                CommandSource::Blockchain,
            )
        } else {
            ("Sending SCOOP".to_string(), CommandSource::Websocket)
        };

        self.log.push(CommandEntry {
            id: id.clone(),
            timestamp: now,
            text,
            status: CommandStatus::Sent,
            source,
        });
        self.in_flight = Some(InFlight {
            id: id.clone(),
            command,
        });
        tracing::info!(%command, id = %id, "command sent");
        Ok(id)
    }

    /// Confirm the in-flight command. `receipt` identifies the confirmation
    /// for directional commands (e.g. a transaction reference).
    pub fn acknowledge(&mut self, id: &str, receipt: &str) -> Result<(), RobocastError> {
        let in_flight = self.take_in_flight(id)?;
        let now = Utc::now();
        if in_flight.command.is_directional() {
            self.log.push(CommandEntry {
                id: format!("{id}-confirmed"),
                timestamp: now,
                text: format!("Confirmed: {receipt}"),
                status: CommandStatus::Acknowledged,
                source: CommandSource::Blockchain,
            });
            self.log.push(CommandEntry {
                id: format!("{id}-robot"),
                timestamp: now,
                text: format!("Robot command sent: {}", in_flight.command),
                status: CommandStatus::Acknowledged,
                source: CommandSource::Websocket,
            });
        } else {
            self.log.push(CommandEntry {
                id: format!("{id}-success"),
                timestamp: now,
                text: "SCOOP command sent successfully".to_string(),
                status: CommandStatus::Acknowledged,
                source: CommandSource::Websocket,
            });
        }
        tracing::info!(command = %in_flight.command, id, "command acknowledged");
        Ok(())
    }

    pub fn fail(&mut self, id: &str, reason: &str) -> Result<(), RobocastError> {
        let in_flight = self.take_in_flight(id)?;
        let source = if in_flight.command.is_directional() {
            CommandSource::Blockchain
        } else {
            CommandSource::Websocket
        };
        self.log.push(CommandEntry {
            id: format!("{id}-failed"),
            timestamp: Utc::now(),
            text: format!("{} failed: {reason}", in_flight.command),
            status: CommandStatus::Failed,
            source,
        });
        tracing::warn!(command = %in_flight.command, id, "command failed: {reason}");
        Ok(())
    }

    pub fn log(&self) -> &CommandLog {
        &self.log
    }

    fn take_in_flight(&mut self, id: &str) -> Result<InFlight, RobocastError> {
        match self.in_flight.take() {
            Some(in_flight) if in_flight.id == id => Ok(in_flight),
            other => {
                self.in_flight = other;
                Err(RobocastError::Session(format!("no command '{id}' in flight")))
            }
        }
    }
}
