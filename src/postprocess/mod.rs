//! Post-processing of published partitions
//!
//! Vacuuming and aggregation level overrides run after a build has
//! published its partitions. They are queued to one background worker so
//! the build can report its result immediately; each task yields a
//! [`PostProcessHandle`] that resolves once the task has run.
//!
//! A failed task is logged and surfaces only through its handle. It never
//! changes the outcome of the build that scheduled it.

use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::sync::mpsc;
use std::task::{Context, Poll};
use std::thread::JoinHandle;
use std::time::Instant;

use once_cell::sync::Lazy;
use regex::Regex;
use serde::Serialize;
use tokio::sync::oneshot;
use tracing::{debug, info, warn};

use crate::database::{AnalyticsStore, DatabaseError};
use crate::table::sql::{literal_list, quote};

static ORG_UNIT_LEVEL_COLUMN: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^uidlevel(\d+)$").expect("valid level column pattern"));

/// Error type for post-processing tasks
#[derive(Debug, Clone, thiserror::Error, Serialize)]
pub enum PostProcessError {
    /// The task's SQL failed
    #[error("Post-processing failed: {0}")]
    Database(#[from] DatabaseError),

    /// The worker thread could not be started
    #[error("Failed to start post-processing worker: {0}")]
    Spawn(String),

    /// The scheduler was shut down before the task was queued
    #[error("Post-processing queue is closed")]
    QueueClosed,

    /// The worker stopped before reporting the task's result
    #[error("Post-processing worker stopped before completing the task")]
    WorkerGone,
}

/// One unit of post-processing work
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase", tag = "type")]
pub enum PostProcessTask {
    /// Reclaim space and refresh statistics of the given tables
    Vacuum { partitions: Vec<String> },

    /// Clear org unit level columns deeper than `level` for the given data
    /// elements
    AggregationLevels {
        partitions: Vec<String>,
        data_elements: Vec<String>,
        level: i32,
    },
}

impl PostProcessTask {
    fn describe(&self) -> String {
        match self {
            PostProcessTask::Vacuum { partitions } => {
                format!("vacuum of {} table(s)", partitions.len())
            }
            PostProcessTask::AggregationLevels {
                partitions, level, ..
            } => format!(
                "aggregation level {} on {} table(s)",
                level,
                partitions.len()
            ),
        }
    }

    fn run(&self, store: &dyn AnalyticsStore) -> Result<(), PostProcessError> {
        match self {
            PostProcessTask::Vacuum { partitions } => {
                for table in partitions {
                    store.execute(&format!("VACUUM ANALYZE {}", quote(table)))?;
                }
            }
            PostProcessTask::AggregationLevels {
                partitions,
                data_elements,
                level,
            } => {
                if data_elements.is_empty() {
                    return Ok(());
                }

                for table in partitions {
                    let deeper: Vec<String> = store
                        .table_columns(table)?
                        .into_iter()
                        .filter(|column| {
                            ORG_UNIT_LEVEL_COLUMN
                                .captures(column)
                                .and_then(|c| c[1].parse::<i32>().ok())
                                .is_some_and(|n| n > *level)
                        })
                        .collect();

                    if deeper.is_empty() {
                        continue;
                    }

                    let assignments: Vec<String> = deeper
                        .iter()
                        .map(|column| format!("{} = null", quote(column)))
                        .collect();

                    store.execute(&format!(
                        "UPDATE {} SET {} WHERE \"dx\" IN {}",
                        quote(table),
                        assignments.join(", "),
                        literal_list(data_elements)
                    ))?;
                }
            }
        }
        Ok(())
    }
}

/// Completion handle of a post-processing task
///
/// Await it from async code, or call [`wait`](Self::wait) from a plain
/// thread.
#[derive(Debug)]
pub struct PostProcessHandle {
    receiver: oneshot::Receiver<Result<(), PostProcessError>>,
}

impl PostProcessHandle {
    fn channel() -> (oneshot::Sender<Result<(), PostProcessError>>, Self) {
        let (sender, receiver) = oneshot::channel();
        (sender, Self { receiver })
    }

    /// A handle that is already resolved with `result`
    pub fn ready(result: Result<(), PostProcessError>) -> Self {
        let (sender, handle) = Self::channel();
        let _ = sender.send(result);
        handle
    }

    /// A handle for work that needed nothing done
    pub fn completed() -> Self {
        Self::ready(Ok(()))
    }

    /// Block the current thread until the task has run
    ///
    /// Must not be called from inside an async runtime.
    pub fn wait(self) -> Result<(), PostProcessError> {
        self.receiver
            .blocking_recv()
            .unwrap_or(Err(PostProcessError::WorkerGone))
    }
}

impl Future for PostProcessHandle {
    type Output = Result<(), PostProcessError>;

    fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        Pin::new(&mut self.receiver)
            .poll(cx)
            .map(|result| result.unwrap_or(Err(PostProcessError::WorkerGone)))
    }
}

struct Job {
    task: PostProcessTask,
    done: oneshot::Sender<Result<(), PostProcessError>>,
}

/// Queue of post-processing tasks drained by one background thread
///
/// Dropping the scheduler closes the queue, lets the worker finish what is
/// already queued and joins it.
pub struct PostProcessScheduler {
    sender: Option<mpsc::Sender<Job>>,
    worker: Option<JoinHandle<()>>,
}

impl PostProcessScheduler {
    /// Start the worker thread
    pub fn start(store: Arc<dyn AnalyticsStore>) -> Result<Self, PostProcessError> {
        let (sender, receiver) = mpsc::channel::<Job>();

        let worker = std::thread::Builder::new()
            .name("analytics-postprocess".to_string())
            .spawn(move || {
                for job in receiver {
                    let start = Instant::now();
                    let description = job.task.describe();
                    let result = job.task.run(store.as_ref());

                    match &result {
                        Ok(()) => info!(
                            "Completed {} in {} ms",
                            description,
                            start.elapsed().as_millis()
                        ),
                        Err(e) => warn!("Failed {}: {}", description, e),
                    }

                    if job.done.send(result).is_err() {
                        debug!("Result of {} was not awaited", description);
                    }
                }
            })
            .map_err(|e| PostProcessError::Spawn(e.to_string()))?;

        Ok(Self {
            sender: Some(sender),
            worker: Some(worker),
        })
    }

    /// Queue a task
    pub fn submit(&self, task: PostProcessTask) -> PostProcessHandle {
        let (done, handle) = PostProcessHandle::channel();

        let Some(sender) = &self.sender else {
            return PostProcessHandle::ready(Err(PostProcessError::QueueClosed));
        };

        if let Err(mpsc::SendError(job)) = sender.send(Job { task, done }) {
            let _ = job.done.send(Err(PostProcessError::QueueClosed));
        }

        handle
    }

    /// Close the queue and wait for queued tasks to finish
    pub fn shutdown(mut self) {
        self.stop();
    }

    fn stop(&mut self) {
        self.sender.take();
        if let Some(worker) = self.worker.take()
            && worker.join().is_err()
        {
            warn!("Post-processing worker panicked");
        }
    }
}

impl Drop for PostProcessScheduler {
    fn drop(&mut self) {
        self.stop();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::database::DuckDbStore;

    fn store() -> Arc<dyn AnalyticsStore> {
        let store = DuckDbStore::in_memory().unwrap();
        store
            .execute_batch(
                "CREATE TABLE analytics_x_2020 (dx TEXT, uidlevel1 TEXT, uidlevel2 TEXT, uidlevel3 TEXT); \
                 INSERT INTO analytics_x_2020 VALUES \
                 ('fbfJHSPpUQD', 'a', 'b', 'c'), ('cYeuwXTCPkU', 'a', 'b', 'c');",
            )
            .unwrap();
        Arc::new(store)
    }

    #[tokio::test]
    async fn test_completed_handle() {
        assert!(PostProcessHandle::completed().await.is_ok());
    }

    #[test]
    fn test_vacuum_task() {
        let scheduler = PostProcessScheduler::start(store()).unwrap();
        let handle = scheduler.submit(PostProcessTask::Vacuum {
            partitions: vec!["analytics_x_2020".to_string()],
        });
        assert!(handle.wait().is_ok());
    }

    #[test]
    fn test_aggregation_levels_task() {
        let store = store();
        let scheduler = PostProcessScheduler::start(store.clone()).unwrap();

        scheduler
            .submit(PostProcessTask::AggregationLevels {
                partitions: vec!["analytics_x_2020".to_string()],
                data_elements: vec!["fbfJHSPpUQD".to_string()],
                level: 1,
            })
            .wait()
            .unwrap();

        let cleared = store
            .query(
                "SELECT dx FROM analytics_x_2020 \
                 WHERE uidlevel2 IS NULL AND uidlevel3 IS NULL AND uidlevel1 = 'a'",
            )
            .unwrap();
        assert_eq!(cleared.first_column_strings(), vec!["fbfJHSPpUQD"]);
    }

    #[tokio::test]
    async fn test_failed_task_reports_through_handle() {
        let scheduler = PostProcessScheduler::start(store()).unwrap();
        let handle = scheduler.submit(PostProcessTask::Vacuum {
            partitions: vec!["missing_table".to_string()],
        });

        assert!(matches!(handle.await, Err(PostProcessError::Database(_))));
    }

    #[test]
    fn test_shutdown_drains_queue() {
        let scheduler = PostProcessScheduler::start(store()).unwrap();
        let handles: Vec<_> = (0..3)
            .map(|_| {
                scheduler.submit(PostProcessTask::Vacuum {
                    partitions: vec!["analytics_x_2020".to_string()],
                })
            })
            .collect();

        scheduler.shutdown();

        for handle in handles {
            assert!(handle.wait().is_ok());
        }
    }
}
