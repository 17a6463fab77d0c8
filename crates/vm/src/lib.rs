//! The seam between the debug agent and an embedded scripting VM.
//!
//! The agent never talks to a concrete VM directly; it goes through the
//! [`Vm`] trait, which mirrors the stack-machine C API the usual
//! embeddable scripting engines expose: an operand stack, integer-driven
//! container iteration, keyed slot access and positional locals.
//!
//! Production hosts implement [`Vm`] over their FFI handle. The
//! [`scripted`] module provides an in-memory implementation driven by a
//! replayable step program, which is what the test-suite and the sample
//! host run against.
//!
//! # Quiescence
//!
//! Every method of [`Vm`] assumes the VM thread is either the caller or
//! parked inside the debug hook. The trait cannot enforce this; the pause
//! coordinator in the `debugger` crate does.

pub mod scripted;
mod types;
mod vm;

pub use types::{FrameInfo, HookEvent, ObjectType};
pub use vm::{HookSink, StackIndex, StackScope, Vm};
