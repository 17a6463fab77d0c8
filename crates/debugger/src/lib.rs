//! Debug control plane for an embedded scripting VM.
//!
//! The [`Agent`] is the façade a host embeds: request threads drive it
//! through the [`Commands`] trait (pause, step, inspect, breakpoints,
//! watches) while the VM thread feeds it hook and print callbacks through
//! the [`DebugHook`] handle returned by [`Agent::attach_vm`].
//!
//! Internally the crate is organised the way the responsibilities split:
//! `pause` coordinates parking the VM thread and owns the breakpoint
//! store, `breakpoints` interns file identities for line-keyed lookup,
//! `walk` holds the VM-stack inspection primitives, `inspector` builds
//! the client-facing variable descriptions, and [`expr`] parses watch
//! expressions.

mod agent;
mod breakpoints;
mod commands;
mod error;
pub mod expr;
mod hook;
mod inspector;
mod pause;
mod walk;

pub use agent::Agent;
pub use breakpoints::{Breakpoint, BreakpointStore, FileIdentity};
pub use commands::{Commands, DebugEvent};
pub use error::{RequestError, RequestResult};
pub use hook::DebugHook;
