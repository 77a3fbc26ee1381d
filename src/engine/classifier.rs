use serde::{Deserialize, Serialize};

use crate::models::MachineState;

/// A raw reading from the signal link, before classification.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum RawSignal {
    Code(String),
    /// Nothing readable right now: the link stalled, timed out or dropped.
    Unavailable,
}

impl RawSignal {
    pub fn code(code: impl Into<String>) -> Self {
        RawSignal::Code(code.into())
    }
}

const SIGNAL_TABLE: [(&str, MachineState); 3] = [
    ("GREEN", MachineState::Production),
    ("YELLOW", MachineState::Setup),
    ("RED", MachineState::Downtime),
];

/// Map a raw signal to a production state.
///
/// `None` means "no confirmed state": the caller keeps attributing time to the
/// last confirmed state. Unknown codes are treated exactly like an unavailable
/// link so a noisy line never forces a transition.
pub fn classify(raw: &RawSignal) -> Option<MachineState> {
    let RawSignal::Code(code) = raw else {
        return None;
    };
    let code = code.trim();
    SIGNAL_TABLE
        .iter()
        .find(|(known, _)| known.eq_ignore_ascii_case(code))
        .map(|(_, state)| *state)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn known_codes_map_to_states() {
        assert_eq!(
            classify(&RawSignal::code("GREEN")),
            Some(MachineState::Production)
        );
        assert_eq!(classify(&RawSignal::code("YELLOW")), Some(MachineState::Setup));
        assert_eq!(classify(&RawSignal::code("RED")), Some(MachineState::Downtime));
    }

    #[test]
    fn codes_are_trimmed_and_case_insensitive() {
        assert_eq!(
            classify(&RawSignal::code("  green\r")),
            Some(MachineState::Production)
        );
        assert_eq!(classify(&RawSignal::code("Red")), Some(MachineState::Downtime));
    }

    #[test]
    fn unavailable_and_unknown_codes_never_force_a_state() {
        assert_eq!(classify(&RawSignal::Unavailable), None);
        assert_eq!(classify(&RawSignal::code("BLUE")), None);
        assert_eq!(classify(&RawSignal::code("")), None);
        assert_eq!(classify(&RawSignal::code("GRE")), None);
    }
}
