//! Events pushed by the agent to every connected client.

use serde::{Deserialize, Serialize};

use crate::types::{OutputLine, Status};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Event {
    #[serde(flatten)]
    pub body: EventBody,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "event", content = "body", rename_all = "camelCase")]
pub enum EventBody {
    /// The VM paused, resumed, or the client asked for a status refresh.
    Status(Status),
    /// One line of program output.
    Output(OutputLine),
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::RunState;

    #[test]
    fn status_event_is_tagged() {
        let ev = Event {
            body: EventBody::Status(Status {
                run_state: RunState::Paused,
                ..Default::default()
            }),
        };
        let json = serde_json::to_value(&ev).unwrap();
        assert_eq!(json["event"], "status");
        assert_eq!(json["body"]["runState"], "paused");
    }
}
