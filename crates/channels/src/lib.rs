//! Platform-neutral chat types.
//!
//! Platform bindings translate their payloads into [`NormalizedMessage`] at
//! the boundary and implement [`ChatClient`] for everything outbound. The
//! pipeline and [`PendingReply`] only ever see these types.

pub mod card;
pub mod client;
pub mod command;
pub mod error;
pub mod message;
pub mod pending;
pub mod target;

pub use {
    card::{Button, CardBlock, OutboundCard},
    client::{ChatClient, Contact, send_image, send_text},
    command::{CommandOutcome, command_args, is_forwardable, parse_command},
    error::{Error, Result},
    message::{MessageId, MessageKind, NormalizedMessage},
    pending::PendingReply,
    target::SendTarget,
};
