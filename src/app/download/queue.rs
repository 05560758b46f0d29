//! Download queue
//!
//! Collects download tasks and runs them through a [`DownloadAgent`] with
//! bounded concurrency. Every task is attempted; the batch succeeds only if
//! all of them did.

use std::sync::Arc;

use futures::stream::{self, StreamExt};
use tracing::{error, info};

use super::agent::{DownloadAgent, DownloadTask};
use crate::app::operation::ProgressSink;

/// Outcome of one queued task
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TaskOutcome {
    pub task: DownloadTask,
    pub error: Option<String>,
}

/// Aggregate outcome of a processed queue
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct QueueReport {
    pub outcomes: Vec<TaskOutcome>,
}

impl QueueReport {
    /// Whether every task succeeded
    pub fn all_succeeded(&self) -> bool {
        self.outcomes.iter().all(|o| o.error.is_none())
    }

    /// Tasks that failed
    pub fn failures(&self) -> impl Iterator<Item = &TaskOutcome> {
        self.outcomes.iter().filter(|o| o.error.is_some())
    }
}

/// Batch of downloads sharing one agent
pub struct DownloadQueue {
    agent: Arc<dyn DownloadAgent>,
    tasks: Vec<DownloadTask>,
    concurrency: usize,
}

impl std::fmt::Debug for DownloadQueue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DownloadQueue")
            .field("agent", &self.agent.name())
            .field("tasks", &self.tasks.len())
            .field("concurrency", &self.concurrency)
            .finish()
    }
}

impl DownloadQueue {
    /// Create an empty queue running one task at a time
    pub fn new(agent: Arc<dyn DownloadAgent>) -> Self {
        Self {
            agent,
            tasks: Vec::new(),
            concurrency: 1,
        }
    }

    /// Run up to `concurrency` tasks at once (minimum 1)
    pub fn with_concurrency(mut self, concurrency: usize) -> Self {
        self.concurrency = concurrency.max(1);
        self
    }

    /// Queue a task
    pub fn add_task(&mut self, task: DownloadTask) {
        self.tasks.push(task);
    }

    /// Drop all queued tasks
    pub fn clear(&mut self) {
        self.tasks.clear();
    }

    /// Number of queued tasks
    pub fn len(&self) -> usize {
        self.tasks.len()
    }

    /// Whether nothing is queued
    pub fn is_empty(&self) -> bool {
        self.tasks.is_empty()
    }

    /// Run every queued task and report each outcome
    ///
    /// Progress events from the agent are forwarded to `progress` from
    /// whichever task produced them.
    pub async fn process_all(&self, progress: &ProgressSink) -> QueueReport {
        info!(
            "Processing {} downloads with {} (concurrency {})",
            self.tasks.len(),
            self.agent.name(),
            self.concurrency
        );

        let outcomes: Vec<TaskOutcome> = stream::iter(self.tasks.iter().cloned())
            .map(|task| {
                let agent = Arc::clone(&self.agent);
                async move {
                    let result = agent.download(&task, progress).await;
                    if let Err(e) = &result {
                        error!("Download of {} failed: {}", task.url, e);
                    }
                    TaskOutcome {
                        task,
                        error: result.err().map(|e| e.to_string()),
                    }
                }
            })
            .buffer_unordered(self.concurrency)
            .collect()
            .await;

        QueueReport { outcomes }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::app::operation::{silent_sink, ProgressEvent};
    use crate::errors::{DownloadError, DownloadResult};
    use async_trait::async_trait;
    use std::sync::Mutex;

    struct ScriptedAgent {
        fail_urls: Vec<String>,
        seen: Mutex<Vec<String>>,
    }

    #[async_trait]
    impl DownloadAgent for ScriptedAgent {
        async fn download(
            &self,
            task: &DownloadTask,
            progress: &ProgressSink,
        ) -> DownloadResult<()> {
            self.seen.lock().unwrap().push(task.url.clone());
            progress(ProgressEvent::Downloading {
                percentage: 100,
                speed: "1MiB".to_string(),
                eta: "0s".to_string(),
            });
            if self.fail_urls.contains(&task.url) {
                Err(DownloadError::AgentFailed {
                    url: task.url.clone(),
                    code: Some(3),
                })
            } else {
                Ok(())
            }
        }

        fn name(&self) -> &str {
            "scripted"
        }
    }

    #[tokio::test]
    async fn test_all_tasks_attempted_after_failure() {
        let agent = Arc::new(ScriptedAgent {
            fail_urls: vec!["http://x/a".to_string()],
            seen: Mutex::new(Vec::new()),
        });
        let mut queue = DownloadQueue::new(agent.clone());
        queue.add_task(DownloadTask::new("http://x/a", "/tmp/a"));
        queue.add_task(DownloadTask::new("http://x/b", "/tmp/b"));

        let report = queue.process_all(&silent_sink()).await;
        assert!(!report.all_succeeded());
        assert_eq!(report.failures().count(), 1);
        assert_eq!(agent.seen.lock().unwrap().len(), 2);
    }

    #[tokio::test]
    async fn test_progress_forwarded_and_clear() {
        let agent = Arc::new(ScriptedAgent {
            fail_urls: Vec::new(),
            seen: Mutex::new(Vec::new()),
        });
        let mut queue = DownloadQueue::new(agent).with_concurrency(4);
        for i in 0..3 {
            queue.add_task(DownloadTask::new(format!("http://x/{}", i), "/tmp/x"));
        }

        let events = Arc::new(Mutex::new(0usize));
        let counter = Arc::clone(&events);
        let sink: ProgressSink = Arc::new(move |_| *counter.lock().unwrap() += 1);

        let report = queue.process_all(&sink).await;
        assert!(report.all_succeeded());
        assert_eq!(*events.lock().unwrap(), 3);

        queue.clear();
        assert!(queue.is_empty());
        assert!(queue.process_all(&sink).await.all_succeeded());
    }
}
