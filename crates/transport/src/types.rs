//! Data model shared by the agent core and remote clients.
//!
//! The numeric values of [`ReturnCode`] and the ordinals of
//! [`VariableType`] are part of the wire contract and must not be
//! reordered.

use serde::{Deserialize, Serialize};

pub type BreakpointId = u64;
pub type FrameIndex = u32;
pub type PathIterator = u64;

/// Upper bound on both variable-path length and page size. Requests above
/// the cap fail with [`ReturnCode::InvalidParameter`].
pub const MAX_PATH_ELEMENTS: usize = 1000;
pub const MAX_PAGE_SIZE: u32 = 1000;

/// Result code returned by every agent operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReturnCode {
    Success,
    /// User input caused the call to fail.
    Invalid,
    InvalidNotPaused,
    InvalidParameter,
    /// Something went wrong inside the implementation.
    ErrorInternal,
}

impl ReturnCode {
    pub fn as_u16(self) -> u16 {
        match self {
            ReturnCode::Success => 0,
            ReturnCode::Invalid => 100,
            ReturnCode::InvalidNotPaused => 101,
            ReturnCode::InvalidParameter => 102,
            ReturnCode::ErrorInternal => 200,
        }
    }

    pub fn from_u16(value: u16) -> Option<Self> {
        match value {
            0 => Some(ReturnCode::Success),
            100 => Some(ReturnCode::Invalid),
            101 => Some(ReturnCode::InvalidNotPaused),
            102 => Some(ReturnCode::InvalidParameter),
            200 => Some(ReturnCode::ErrorInternal),
            _ => None,
        }
    }

    pub fn is_success(self) -> bool {
        self == ReturnCode::Success
    }

    /// The status code an HTTP front-end should answer with for this
    /// return code.
    pub fn http_status(self) -> u16 {
        match self {
            ReturnCode::Success => 200,
            ReturnCode::ErrorInternal => 500,
            _ => 400,
        }
    }
}

impl Serialize for ReturnCode {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_u16(self.as_u16())
    }
}

impl<'de> Deserialize<'de> for ReturnCode {
    fn deserialize<D: serde::Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let value = u16::deserialize(deserializer)?;
        ReturnCode::from_u16(value)
            .ok_or_else(|| serde::de::Error::custom(format!("unknown return code {value}")))
    }
}

/// Execution state of the attached VM as observed by the client.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum RunState {
    Running,
    /// A pause was requested but the VM has not reached a pausable line
    /// yet.
    Pausing,
    Paused,
    /// A step was requested and the VM is executing towards the target
    /// line.
    Stepping,
}

/// Type tag of a VM value.
///
/// The ordinal of each variant is the wire representation and matches the
/// VM's own object-type ordering.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum VariableType {
    #[default]
    Null,
    Integer,
    Float,
    Bool,
    String,
    Table,
    Array,
    UserData,
    Closure,
    NativeClosure,
    Generator,
    UserPointer,
    Thread,
    FuncProto,
    Class,
    Instance,
    WeakRef,
    Outer,
}

impl VariableType {
    const ALL: [VariableType; 18] = [
        VariableType::Null,
        VariableType::Integer,
        VariableType::Float,
        VariableType::Bool,
        VariableType::String,
        VariableType::Table,
        VariableType::Array,
        VariableType::UserData,
        VariableType::Closure,
        VariableType::NativeClosure,
        VariableType::Generator,
        VariableType::UserPointer,
        VariableType::Thread,
        VariableType::FuncProto,
        VariableType::Class,
        VariableType::Instance,
        VariableType::WeakRef,
        VariableType::Outer,
    ];

    pub fn as_u8(self) -> u8 {
        Self::ALL.iter().position(|t| *t == self).unwrap_or(0) as u8
    }

    pub fn from_u8(value: u8) -> Option<Self> {
        Self::ALL.get(usize::from(value)).copied()
    }

    /// Whether a value of this type can be overwritten through
    /// `SetStackVariableValue`.
    pub fn is_editable_primitive(self) -> bool {
        matches!(
            self,
            VariableType::Bool
                | VariableType::Integer
                | VariableType::Float
                | VariableType::String
        )
    }
}

impl Serialize for VariableType {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_u8(self.as_u8())
    }
}

impl<'de> Deserialize<'de> for VariableType {
    fn deserialize<D: serde::Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let value = u8::deserialize(deserializer)?;
        VariableType::from_u8(value)
            .ok_or_else(|| serde::de::Error::custom(format!("unknown variable type {value}")))
    }
}

/// One frame of the paused call stack, captured at pause time.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StackEntry {
    pub file: String,
    pub line: u32,
    pub function: String,
}

/// Snapshot of the VM's run state, produced on every pause and on every
/// explicit status request.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Status {
    pub run_state: RunState,
    pub stack: Vec<StackEntry>,
    /// Id of the breakpoint the VM paused at, 0 when the pause was not
    /// caused by a breakpoint.
    pub paused_at_breakpoint_id: BreakpointId,
}

impl Default for Status {
    fn default() -> Self {
        Self {
            run_state: RunState::Running,
            stack: Vec::new(),
            paused_at_breakpoint_id: 0,
        }
    }
}

/// Client-facing description of one VM value.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Variable {
    /// Iterator the client uses to re-address this value through its
    /// parent container.
    pub path_iterator: PathIterator,
    /// Human readable key or index of this value in its parent.
    pub path_ui_string: String,
    /// Type of the key that refers to this value in its parent.
    pub path_table_key_type: VariableType,
    pub value_type: VariableType,
    /// Bounded human-readable summary of the value.
    pub value: String,
    /// Object identity for ref-counted values, 0 otherwise.
    pub value_raw_address: u64,
    /// Number of children a subsequent listing would enumerate.
    pub child_count: u32,
    /// Fully qualified class name, populated only for instances.
    pub instance_class_name: String,
    pub editable: bool,
}

/// Scope a watch expression resolved in.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum VariableScope {
    Local,
    Global,
    /// The expression was a literal and did not address VM state.
    Evaluation,
}

/// Result of a watch-expression evaluation.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ImmediateValue {
    pub variable: Variable,
    pub scope: VariableScope,
    /// Fully resolved variable path, suitable for subsequent
    /// `GetStackVariables` / `GetGlobalVariables` calls.
    pub iterator_path: Vec<PathIterator>,
}

/// Window into a container's children.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PaginationInfo {
    /// Array index or native iterator of the first child of the page.
    pub begin_iterator: PathIterator,
    pub count: u32,
}

impl PaginationInfo {
    pub fn first_page() -> Self {
        Self {
            begin_iterator: 0,
            count: MAX_PAGE_SIZE,
        }
    }
}

/// Breakpoint as sent by the client. Both ids and lines start at 1.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateBreakpoint {
    pub id: BreakpointId,
    pub line: u32,
}

/// Breakpoint as acknowledged by the agent.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ResolvedBreakpoint {
    pub id: BreakpointId,
    pub line: u32,
    pub verified: bool,
}

/// One line of program output captured from the VM's print or error
/// callback.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OutputLine {
    pub text: String,
    pub is_err: bool,
    /// Source position of the VM when the line was written; empty/0 when
    /// no frame was active.
    pub file: String,
    pub line: u32,
}

/// Parse a comma-separated variable path (`"3,17,2"`).
///
/// The empty string addresses the root. Paths longer than
/// [`MAX_PATH_ELEMENTS`] or with non-numeric elements are rejected.
pub fn parse_path(path: &str) -> Result<Vec<PathIterator>, PathError> {
    if path.is_empty() {
        return Ok(Vec::new());
    }

    let mut elements = Vec::new();
    for part in path.split(',') {
        if elements.len() >= MAX_PATH_ELEMENTS {
            return Err(PathError::TooLong);
        }
        let value = part
            .trim()
            .parse::<PathIterator>()
            .map_err(|_| PathError::BadElement {
                element: part.to_string(),
            })?;
        elements.push(value);
    }
    Ok(elements)
}

/// Render a variable path in its wire form.
pub fn format_path(path: &[PathIterator]) -> String {
    path.iter()
        .map(|p| p.to_string())
        .collect::<Vec<_>>()
        .join(",")
}

#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum PathError {
    #[error("path element {element:?} is not an unsigned integer")]
    BadElement { element: String },

    #[error("path exceeds {MAX_PATH_ELEMENTS} elements")]
    TooLong,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_empty_path_is_root() {
        assert_eq!(parse_path("").unwrap(), Vec::<PathIterator>::new());
    }

    #[test]
    fn parse_path_round_trips() {
        let path = vec![3, 17, 2];
        assert_eq!(parse_path(&format_path(&path)).unwrap(), path);
    }

    #[test]
    fn parse_path_rejects_garbage() {
        assert!(matches!(
            parse_path("1,x,3"),
            Err(PathError::BadElement { .. })
        ));
        assert!(matches!(parse_path("-1"), Err(PathError::BadElement { .. })));
    }

    #[test]
    fn parse_path_rejects_overlong() {
        let long = format_path(&vec![1; MAX_PATH_ELEMENTS + 1]);
        assert_eq!(parse_path(&long), Err(PathError::TooLong));
    }

    #[test]
    fn return_codes_keep_wire_values() {
        assert_eq!(ReturnCode::Success.as_u16(), 0);
        assert_eq!(ReturnCode::Invalid.as_u16(), 100);
        assert_eq!(ReturnCode::InvalidNotPaused.as_u16(), 101);
        assert_eq!(ReturnCode::InvalidParameter.as_u16(), 102);
        assert_eq!(ReturnCode::ErrorInternal.as_u16(), 200);
    }

    #[test]
    fn variable_type_ordinals_are_stable() {
        assert_eq!(VariableType::Null.as_u8(), 0);
        assert_eq!(VariableType::String.as_u8(), 4);
        assert_eq!(VariableType::Instance.as_u8(), 15);
        assert_eq!(VariableType::Outer.as_u8(), 17);
        for raw in 0..18 {
            let ty = VariableType::from_u8(raw).unwrap();
            assert_eq!(ty.as_u8(), raw);
        }
        assert!(VariableType::from_u8(18).is_none());
    }

    #[test]
    fn variable_serializes_camel_case() {
        let var = Variable {
            path_ui_string: "x".to_string(),
            value_type: VariableType::Integer,
            value: "1".to_string(),
            editable: true,
            ..Default::default()
        };
        let json = serde_json::to_value(&var).unwrap();
        assert_eq!(json["pathUiString"], "x");
        assert_eq!(json["valueType"], 1);
        assert_eq!(json["editable"], true);
    }
}
