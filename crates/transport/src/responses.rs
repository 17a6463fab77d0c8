//! Responses sent by the agent in reply to [`crate::requests`].

use serde::{Deserialize, Serialize};

use crate::requests::Seq;
use crate::types::{ImmediateValue, ResolvedBreakpoint, ReturnCode, Variable};

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Response {
    /// Sequence number of the request this response answers.
    pub request_seq: Seq,
    pub success: bool,
    pub return_code: ReturnCode,
    /// Human-readable failure detail; never present on success.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    #[serde(flatten)]
    pub body: Option<ResponseBody>,
}

impl Response {
    pub fn success(request_seq: Seq, body: Option<ResponseBody>) -> Self {
        Self {
            request_seq,
            success: true,
            return_code: ReturnCode::Success,
            message: None,
            body,
        }
    }

    pub fn failure(request_seq: Seq, return_code: ReturnCode, message: impl Into<String>) -> Self {
        Self {
            request_seq,
            success: false,
            return_code,
            message: Some(message.into()),
            body: None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "kind", content = "body", rename_all = "camelCase")]
pub enum ResponseBody {
    Variables(Vec<Variable>),
    Variable(Variable),
    Immediate(ImmediateValue),
    Breakpoints(Vec<ResolvedBreakpoint>),
}
