//! The two narrow interfaces between the agent and the endpoint.
//!
//! [`Commands`] is what request threads call into; [`DebugEvent`] is what
//! the agent pushes back out. Keeping both small lets the endpoint hold a
//! plain trait object without knowing which VM the agent drives.

use transport::types::{
    CreateBreakpoint, ImmediateValue, OutputLine, PaginationInfo, ResolvedBreakpoint, Status,
    Variable,
};

use crate::error::RequestResult;

/// Request operations exposed by the agent.
///
/// All methods are callable from any request thread and never block on
/// the VM beyond the coordinator's short critical sections.
pub trait Commands: Send + Sync {
    /// Ask the VM to pause at the next executed line. Idempotent.
    fn pause(&self) -> RequestResult<()>;

    /// Resume a paused (or pausing) VM.
    fn continue_execution(&self) -> RequestResult<()>;

    /// Pause again at the next executed line, regardless of depth.
    fn step_in(&self) -> RequestResult<()>;

    /// Pause at the next line in the current frame (or above it).
    fn step_over(&self) -> RequestResult<()>;

    /// Pause at the next line after the current frame returns.
    fn step_out(&self) -> RequestResult<()>;

    /// Broadcast a fresh status snapshot to all subscribers.
    fn send_status(&self) -> RequestResult<()>;

    fn stack_variables(
        &self,
        frame: u32,
        path: &str,
        pagination: PaginationInfo,
    ) -> RequestResult<Vec<Variable>>;

    fn global_variables(
        &self,
        path: &str,
        pagination: PaginationInfo,
    ) -> RequestResult<Vec<Variable>>;

    /// Overwrite the primitive addressed by `path` (which must have at
    /// least two elements) and return its updated description.
    fn set_stack_variable(&self, frame: u32, path: &str, value: &str) -> RequestResult<Variable>;

    /// Evaluate a watch expression against `frame`, or against globals
    /// only when `frame` is -1.
    fn evaluate(
        &self,
        frame: i32,
        expression: &str,
        pagination: PaginationInfo,
    ) -> RequestResult<ImmediateValue>;

    /// Replace the breakpoint set of `file` atomically.
    fn set_file_breakpoints(
        &self,
        file: &str,
        breakpoints: &[CreateBreakpoint],
    ) -> RequestResult<Vec<ResolvedBreakpoint>>;
}

/// Event pushed from the agent to every subscriber.
#[derive(Debug, Clone)]
pub enum DebugEvent {
    StatusChanged(Status),
    Output(OutputLine),
}
