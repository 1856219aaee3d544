//! Templar provisions a destination repository from a public template
//! (fork first, then create-and-replicate fallbacks) and hands the
//! result to an autonomous coding agent, streaming progress to the
//! caller along the way.

pub mod config;
pub mod content;
pub mod dispatch;
pub mod errors;
pub mod host;
pub mod job;
pub mod progress;
pub mod provision;
pub mod replicate;
pub mod server;
