//! Wire layer for the remote debug agent.
//!
//! This crate contains everything that crosses the network boundary:
//!
//! - the shared data model ([`types`]) used by both the agent core and
//!   remote clients,
//! - the request/response/event envelopes ([`requests`], [`responses`],
//!   [`events`]),
//! - the Content-Length framed JSON codec ([`codec`]).
//!
//! Dispatch, pause coordination and VM inspection belong in the
//! `debugger` crate; connection handling belongs in `server`.

pub mod bindings;
pub mod codec;
pub mod events;
pub mod requests;
pub mod responses;
pub mod types;

pub use codec::{write_message, CodecError, FramedReader};

/// The default port the debug agent listens on.
pub const DEFAULT_DEBUG_PORT: u16 = 8172;
