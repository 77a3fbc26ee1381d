use serde::{Deserialize, Serialize};
use std::fmt;

/// The three production states a line can be in while a session is open.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "camelCase")]
pub enum MachineState {
    Production,
    Setup,
    Downtime,
}

impl MachineState {
    pub const ALL: [MachineState; 3] = [
        MachineState::Production,
        MachineState::Setup,
        MachineState::Downtime,
    ];

    /// External signal code, as sent by the stack light and written to the log.
    pub fn code(&self) -> &'static str {
        match self {
            MachineState::Production => "GREEN",
            MachineState::Setup => "YELLOW",
            MachineState::Downtime => "RED",
        }
    }

    pub fn label(&self) -> &'static str {
        match self {
            MachineState::Production => "PRODUCTION",
            MachineState::Setup => "SETUP",
            MachineState::Downtime => "DOWNTIME",
        }
    }
}

impl fmt::Display for MachineState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

/// Value of the `State` column of a durable row.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "camelCase")]
pub enum RowState {
    Machine(MachineState),
    /// Marker written once, by the row that closes the session.
    Stopped,
}

impl RowState {
    pub fn code(&self) -> &'static str {
        match self {
            RowState::Machine(state) => state.code(),
            RowState::Stopped => "STOPPED",
        }
    }

    pub fn from_code(code: &str) -> Option<Self> {
        match code {
            "GREEN" => Some(RowState::Machine(MachineState::Production)),
            "YELLOW" => Some(RowState::Machine(MachineState::Setup)),
            "RED" => Some(RowState::Machine(MachineState::Downtime)),
            "STOPPED" => Some(RowState::Stopped),
            _ => None,
        }
    }

    pub fn machine_state(&self) -> Option<MachineState> {
        match self {
            RowState::Machine(state) => Some(*state),
            RowState::Stopped => None,
        }
    }
}

impl From<MachineState> for RowState {
    fn from(state: MachineState) -> Self {
        RowState::Machine(state)
    }
}

impl fmt::Display for RowState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.code())
    }
}
