//! Requests sent by a remote client to the agent.

use serde::{Deserialize, Serialize};

use crate::types::PaginationInfo;

pub type Seq = i64;

/// Envelope for one client request.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Request {
    pub seq: Seq,
    #[serde(flatten)]
    pub body: RequestBody,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "command", content = "arguments", rename_all = "camelCase")]
pub enum RequestBody {
    Pause,
    Continue,
    StepIn,
    StepOver,
    StepOut,
    /// Ask the agent to broadcast a fresh status event.
    Status,
    StackVariables(StackVariablesArguments),
    GlobalVariables(GlobalVariablesArguments),
    SetStackVariable(SetStackVariableArguments),
    Evaluate(EvaluateArguments),
    SetBreakpoints(SetBreakpointsArguments),
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StackVariablesArguments {
    pub frame: u32,
    /// Comma-separated variable path; empty addresses the frame's locals.
    pub path: String,
    pub pagination: PaginationInfo,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GlobalVariablesArguments {
    /// Comma-separated variable path; empty addresses the root table.
    pub path: String,
    pub pagination: PaginationInfo,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SetStackVariableArguments {
    pub frame: u32,
    /// Must address a child value (at least two path elements).
    pub path: String,
    pub value: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EvaluateArguments {
    /// Frame to resolve identifiers in; -1 resolves against globals only.
    pub frame: i32,
    pub expression: String,
    pub pagination: PaginationInfo,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SetBreakpointsArguments {
    pub file: String,
    pub breakpoints: Vec<crate::types::CreateBreakpoint>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn command_tag_round_trips() {
        let req = Request {
            seq: 7,
            body: RequestBody::StackVariables(StackVariablesArguments {
                frame: 0,
                path: "3,17".to_string(),
                pagination: PaginationInfo {
                    begin_iterator: 0,
                    count: 100,
                },
            }),
        };
        let json = serde_json::to_value(&req).unwrap();
        assert_eq!(json["command"], "stackVariables");
        assert_eq!(json["arguments"]["path"], "3,17");

        let back: Request = serde_json::from_value(json).unwrap();
        assert!(matches!(back.body, RequestBody::StackVariables(_)));
    }

    #[test]
    fn unit_commands_need_no_arguments() {
        let back: Request =
            serde_json::from_str(r#"{"seq": 1, "command": "pause"}"#).unwrap();
        assert!(matches!(back.body, RequestBody::Pause));
    }
}
