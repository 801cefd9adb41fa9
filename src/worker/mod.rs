//! Worker execution framework.
//!
//! A worker pairs an owner-side handle with an isolated execution unit (its own
//! Tokio task) that loops until told to stop. Producers generate values and fan
//! them out to consumer inboxes; consumers drain their inbox in batches.
//!
//! ```text
//! Producer unit ──offer──┬──> ReadyQueue ──> Consumer unit ──result──> owner callback
//!        │               └──> ReadyQueue ──> Consumer unit ──result──> owner callback
//!        └──result──> owner callback
//! ```
//!
//! The owner never touches resources inside a unit. It writes the shared
//! [`WorkerState`] to request shutdown and observes the unit through two
//! channels per run: results and [`ControlMessage`]s. Each channel has a
//! listener task on the owner side that invokes the registered callback, so
//! callbacks run on the listener, not on the caller of `start_new`.
//!
//! Faults never escape a unit. Hooks report them with [`UnitControl::fail`];
//! panics are caught and turned into [`ControlMessage::Panicked`].

mod lifecycle;
pub mod consumer;
pub mod message;
pub mod producer;
pub mod ready_queue;
pub mod state;

pub use lifecycle::{MessageCallback, ResultCallback};
pub use consumer::{Batch, Consume, Consumer};
pub use message::{ControlMessage, UnitControl};
pub use producer::{Produce, Producer};
pub use ready_queue::{Offer, ReadyQueue};
pub use state::{SharedState, WorkerState};
