//! The client side of the job-dispatch protocol: compose a job prefix, upload inputs,
//! enqueue the envelope, and poll for status/progress/output. Plays the role
//! `maelstrom-client`/`maelstrom-client-process` play for their workspace, minus the
//! broker-socket transport: here the "wire" is the shared blob store and queue.

pub mod client;
pub mod config;
pub mod job;

pub use client::{Client, ClientError, Request};
pub use job::{EventHandler, Job, JobError, JobEvent, Output, WaitOutcome, EVENT_CHANGE_PROGRESS, EVENT_CHANGE_STATUS};
