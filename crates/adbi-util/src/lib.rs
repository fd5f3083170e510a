//! Utilities shared by the client, dispatcher, and worker SDK: the blob and queue
//! backends, environment-variable configuration loading, structured logging setup, and
//! a small async filesystem helper. Plays the same supporting role `maelstrom-util`
//! plays for its workspace's binaries.

pub mod blob;
pub mod config;
pub mod fs;
pub mod log;
pub mod queue;
