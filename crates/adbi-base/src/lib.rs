//! Wire types and the job-prefix data model shared by the client, dispatcher, and worker.
//!
//! Nothing in this crate talks to a blob store or a queue; it only describes the shapes that
//! travel over them, in the spirit of `maelstrom-base`'s role in its own workspace.

pub mod envelope;
pub mod layout;
pub mod process_id;
pub mod progress;
pub mod status;
pub mod worker_info;

pub use envelope::{Envelope, EnvelopeError};
pub use progress::ProgressLogEntry;
pub use status::StatusToken;
pub use worker_info::{RuntimeConfig, WorkerInfo};
