//! Engine library for recording a live MPEG-DASH broadcast to a single
//! muxed file.
//!
//! The CLI binary (`dashrec-cli`) is a thin shell around [`engine::run`]:
//! it parses arguments, resolves identity and interactive selection, and
//! wires up logging. Everything that touches the network, the manifest, or
//! disk staging lives here, split from the CLI binary the same way a
//! library crate is split from its command-line front end.

pub mod discover;
pub mod engine;
pub mod error;
pub mod fetch;
pub mod finalize;
pub mod http;
pub mod manifest;
pub mod probe;
pub mod session;
pub mod store;
pub mod summary;
pub mod workers;

pub use engine::{run, RecordingRequest};
pub use error::{Error, Result};
pub use session::Config;
