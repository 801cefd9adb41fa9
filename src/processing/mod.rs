//! Consumers that transform frames, and the store holding the latest result.
pub mod forwarder;
pub mod frame_parser;
pub mod frame_store;

pub use forwarder::Forwarder;
pub use frame_parser::{parse_numeric_line, FrameParser, ParsedFrame};
pub use frame_store::{FrameCommand, FrameStore};
