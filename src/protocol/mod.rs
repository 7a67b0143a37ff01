//! Engine protocol surface.
//!
//! The transport is external; this module defines the messages it carries
//! and the per-call streams the engine writes them to.

pub mod messages;
pub mod stream;

pub use messages::{Channel, InitRequest, LogLevel, RunRequest, StreamMessage};
pub use stream::{response_channel, ResponseSender, ResponseStream, Transcript};
