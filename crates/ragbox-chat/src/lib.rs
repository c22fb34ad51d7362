//! # ragbox-chat
//!
//! The per-turn decision layer between the conversation and the engine:
//!
//! - [`Router`]: decides whether a turn gets document context, manages the
//!   document lock across a multi-turn document conversation, and builds
//!   the final templated prompt
//! - [`window_messages`]: history windowing that preserves the first system
//!   message
//! - [`collect_reply`]: drains the model's token stream and trims the
//!   end-of-turn marker

mod router;
mod window;

pub use router::{Route, Router, RouterConfig};
pub use window::{collect_reply, window_messages};
