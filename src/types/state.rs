// Copyright 2026, Jeroen van Erp <jeroen@geeko.me>
// SPDX-License-Identifier: Apache-2.0

use std::fmt;

/// Lifecycle of the controller process.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ControllerState {
    Initializing,
    WaitingForSync,
    Running,
    ShuttingDown,
    Stopped,
}

impl ControllerState {
    /// Whether the lifecycle may move from `self` to `next`.
    pub fn can_transition_to(self, next: ControllerState) -> bool {
        use ControllerState::*;
        matches!(
            (self, next),
            (Initializing, WaitingForSync)
                | (Initializing, Stopped)
                | (WaitingForSync, Running)
                | (WaitingForSync, ShuttingDown)
                | (WaitingForSync, Stopped)
                | (Running, ShuttingDown)
                | (ShuttingDown, Stopped)
        )
    }
}

impl fmt::Display for ControllerState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            ControllerState::Initializing => "Initializing",
            ControllerState::WaitingForSync => "WaitingForSync",
            ControllerState::Running => "Running",
            ControllerState::ShuttingDown => "ShuttingDown",
            ControllerState::Stopped => "Stopped",
        };
        f.write_str(s)
    }
}
