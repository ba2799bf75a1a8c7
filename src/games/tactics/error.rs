//! Error taxonomy shared by every battle system.

use std::fmt;

use serde::Serialize;
use thiserror::Error;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ErrorKind {
    InvalidStageData,
    CharacterLoadFailed,
    UnitNotFound,
    InvalidAction,
    InvalidTurnState,
    InvalidCharacterSelection,
    InvalidPosition,
    DestinationOccupied,
    DestinationUnreachable,
    StageAlreadyComplete,
    StageNotInitialized,
    ObjectiveNotFound,
    BossNotFound,
}

impl ErrorKind {
    pub fn as_str(self) -> &'static str {
        match self {
            ErrorKind::InvalidStageData => "INVALID_STAGE_DATA",
            ErrorKind::CharacterLoadFailed => "CHARACTER_LOAD_FAILED",
            ErrorKind::UnitNotFound => "UNIT_NOT_FOUND",
            ErrorKind::InvalidAction => "INVALID_ACTION",
            ErrorKind::InvalidTurnState => "INVALID_TURN_STATE",
            ErrorKind::InvalidCharacterSelection => "INVALID_CHARACTER_SELECTION",
            ErrorKind::InvalidPosition => "INVALID_POSITION",
            ErrorKind::DestinationOccupied => "DESTINATION_OCCUPIED",
            ErrorKind::DestinationUnreachable => "DESTINATION_UNREACHABLE",
            ErrorKind::StageAlreadyComplete => "STAGE_ALREADY_COMPLETE",
            ErrorKind::StageNotInitialized => "STAGE_NOT_INITIALIZED",
            ErrorKind::ObjectiveNotFound => "OBJECTIVE_NOT_FOUND",
            ErrorKind::BossNotFound => "BOSS_NOT_FOUND",
        }
    }
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A failed battle operation. State is never partially mutated when one of
/// these is returned.
#[derive(Clone, Debug, PartialEq, Error)]
#[error("{kind}: {message}")]
pub struct GameError {
    pub kind: ErrorKind,
    pub message: String,
    /// Underlying cause, when the failure wraps another error.
    pub details: Option<String>,
}

impl GameError {
    pub fn new(kind: ErrorKind, message: impl Into<String>) -> Self {
        Self { kind, message: message.into(), details: None }
    }

    pub fn with_details(mut self, details: impl Into<String>) -> Self {
        self.details = Some(details.into());
        self
    }

    pub fn unit_not_found(id: &str) -> Self {
        Self::new(ErrorKind::UnitNotFound, format!("unit '{id}' is not in the turn order"))
    }

    pub fn invalid_action(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::InvalidAction, message)
    }

    pub fn invalid_turn_state(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::InvalidTurnState, message)
    }
}

pub type GameResult<T> = Result<T, GameError>;
