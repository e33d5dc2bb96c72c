//! The dispatch core.
//!
//! A [`Server`] resolves one Source and any number of Handlers from a
//! [`Registry`](mstatus_core::Registry), loads them against a shared
//! [`Session`](mstatus_core::Session), and fans every status event the
//! Source emits out to every Handler in configured order.
//!
//! # Fan-out
//!
//! Each Handler gets its own single-slot channel. The dispatcher writes an
//! event to every handler channel in turn before reading the next one, so a
//! slow Handler holds back the dispatcher and, through the Source's own
//! channel, the Source itself. Nothing is dropped or duplicated and every
//! Handler observes the same sequence; a stalled Handler stalls the stream.

mod dispatch;
mod server;

pub use server::{Server, ServerBuilder, ServerError, ServerState, SOURCE_KEY, TARGETS_KEY};
