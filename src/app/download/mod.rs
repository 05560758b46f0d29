//! Download agents and the download queue

pub mod agent;
pub mod queue;

pub use agent::{Aria2Agent, DownloadAgent, DownloadTask, HttpAgent};
pub use queue::{DownloadQueue, QueueReport, TaskOutcome};
