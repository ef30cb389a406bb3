//! Controller lifecycle states.

use std::fmt;

use serde::{Deserialize, Serialize};

/// Lifecycle of one controller instance.
///
/// `Installing → Waiting → Activating → Active → Redundant`, with
/// `Installing`/`Waiting` also able to drop straight to `Redundant` when an
/// install fails or a newer instance replaces a waiting one. There is no way
/// back; a redundant instance is replaced wholesale by a new install.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ControllerState {
    Installing,
    Waiting,
    Activating,
    Active,
    Redundant,
}

impl ControllerState {
    pub fn can_transition_to(self, next: ControllerState) -> bool {
        use ControllerState::*;
        matches!(
            (self, next),
            (Installing, Waiting)
                | (Installing, Redundant)
                | (Waiting, Activating)
                | (Waiting, Redundant)
                | (Activating, Active)
                | (Activating, Redundant)
                | (Active, Redundant)
        )
    }

    pub fn as_str(self) -> &'static str {
        match self {
            ControllerState::Installing => "installing",
            ControllerState::Waiting => "waiting",
            ControllerState::Activating => "activating",
            ControllerState::Active => "active",
            ControllerState::Redundant => "redundant",
        }
    }
}

impl fmt::Display for ControllerState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}
