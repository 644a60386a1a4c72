//! Waiting on long-running server-side tasks.
//!
//! Batch ingestion and graph cloning return a task id. [`TaskWaiter`] polls
//! that task on a fixed interval until it completes, fails, or the deadline
//! passes. One fetch is in flight at a time and the deadline always wins a
//! tie with the ticker.

use crate::client::ClientError;
use crate::types::{TaskRecord, TaskStatus};
use async_trait::async_trait;
use std::time::Duration;
use tokio::time::{Instant, MissedTickBehavior, interval_at, sleep_until};
use tracing::debug;

/// Reads the current state of a task.
#[async_trait]
pub trait TaskSource: Send + Sync {
    async fn fetch_task(&self, task_id: &str) -> Result<TaskRecord, ClientError>;
}

/// Receives human-readable progress messages. Must not block.
pub trait StatusSink: Send + Sync {
    fn notify(&self, message: &str);
}

/// Writes progress to stderr unless quiet.
pub struct StderrSink {
    quiet: bool,
}

impl StderrSink {
    pub fn new(quiet: bool) -> Self {
        Self { quiet }
    }
}

impl StatusSink for StderrSink {
    fn notify(&self, message: &str) {
        if !self.quiet {
            eprintln!("{}", message);
        }
    }
}

#[derive(thiserror::Error, Debug)]
pub enum WaitError {
    #[error("timeout waiting for task {task_id} after {timeout:?}")]
    Timeout { task_id: String, timeout: Duration },

    #[error("task {task_id} failed: {message}")]
    TaskFailed { task_id: String, message: String },

    #[error("getting task: {0}")]
    Transport(#[from] ClientError),

    #[error("timeout and poll interval must both be greater than zero")]
    InvalidDuration,
}

pub struct TaskWaiter<'a> {
    source: &'a dyn TaskSource,
    sink: &'a dyn StatusSink,
}

impl<'a> TaskWaiter<'a> {
    pub fn new(source: &'a dyn TaskSource, sink: &'a dyn StatusSink) -> Self {
        Self { source, sink }
    }

    /// Poll `task_id` every `poll_interval` until it reaches a terminal status
    /// or `timeout` elapses. Returns the completed task record.
    ///
    /// Any status other than `completed` or `failed` keeps the loop going.
    /// Fetch errors end the wait immediately.
    pub async fn wait(
        &self,
        task_id: &str,
        timeout: Duration,
        poll_interval: Duration,
    ) -> Result<TaskRecord, WaitError> {
        if timeout.is_zero() || poll_interval.is_zero() {
            return Err(WaitError::InvalidDuration);
        }

        let start = Instant::now();
        let deadline = sleep_until(start + timeout);
        tokio::pin!(deadline);
        let mut ticker = interval_at(start + poll_interval, poll_interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        let timed_out = || WaitError::Timeout {
            task_id: task_id.to_string(),
            timeout,
        };

        self.sink.notify(&format!("Waiting for task {}...", task_id));

        let mut polls: u32 = 0;
        loop {
            tokio::select! {
                biased;
                _ = &mut deadline => return Err(timed_out()),
                _ = ticker.tick() => {}
            }

            polls += 1;
            debug!(task_id, polls, "polling task status");

            // The fetch races the deadline so a slow request cannot outlive it.
            let task = tokio::select! {
                biased;
                _ = &mut deadline => return Err(timed_out()),
                fetched = self.source.fetch_task(task_id) => fetched?,
            };

            match &task.status {
                TaskStatus::Completed => {
                    self.sink
                        .notify(&format!("Task {} completed successfully", task_id));
                    return Ok(task);
                }
                TaskStatus::Failed => {
                    let message = task.error_message().unwrap_or("unknown error").to_string();
                    return Err(WaitError::TaskFailed {
                        task_id: task_id.to_string(),
                        message,
                    });
                }
                other => {
                    debug!(task_id, status = %other, "task not finished");
                    self.sink.notify(&format!("Status: {}", other));
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::TaskErrorInfo;
    use std::sync::Mutex;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn record(status: &str, error: Option<&str>) -> TaskRecord {
        TaskRecord {
            task_id: "task-1".to_string(),
            status: TaskStatus::from(status.to_string()),
            error: error.map(|m| TaskErrorInfo {
                message: Some(m.to_string()),
            }),
            task_type: None,
            created_at: None,
            started_at: None,
            completed_at: None,
        }
    }

    /// Replays a fixed script of statuses; the last one repeats forever.
    struct ScriptedSource {
        script: Vec<TaskRecord>,
        calls: AtomicUsize,
        fetch_delay: Option<Duration>,
    }

    impl ScriptedSource {
        fn new(script: Vec<TaskRecord>) -> Self {
            Self {
                script,
                calls: AtomicUsize::new(0),
                fetch_delay: None,
            }
        }

        fn calls(&self) -> usize {
            self.calls.load(Ordering::SeqCst)
        }
    }

    #[async_trait]
    impl TaskSource for ScriptedSource {
        async fn fetch_task(&self, _task_id: &str) -> Result<TaskRecord, ClientError> {
            let n = self.calls.fetch_add(1, Ordering::SeqCst);
            if let Some(delay) = self.fetch_delay {
                tokio::time::sleep(delay).await;
            }
            let idx = n.min(self.script.len() - 1);
            Ok(self.script[idx].clone())
        }
    }

    struct FailingSource;

    #[async_trait]
    impl TaskSource for FailingSource {
        async fn fetch_task(&self, _task_id: &str) -> Result<TaskRecord, ClientError> {
            Err(ClientError::MissingApiKey)
        }
    }

    #[derive(Default)]
    struct RecordingSink {
        messages: Mutex<Vec<String>>,
    }

    impl StatusSink for RecordingSink {
        fn notify(&self, message: &str) {
            self.messages.lock().unwrap().push(message.to_string());
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_wait_completes_after_two_polls() {
        let source = ScriptedSource::new(vec![
            record("processing", None),
            record("completed", None),
        ]);
        let sink = RecordingSink::default();
        let started = Instant::now();

        let task = TaskWaiter::new(&source, &sink)
            .wait("task-1", Duration::from_secs(10), Duration::from_secs(1))
            .await
            .unwrap();

        assert_eq!(task.status, TaskStatus::Completed);
        assert_eq!(source.calls(), 2);
        let elapsed = started.elapsed();
        assert!(elapsed >= Duration::from_secs(2) && elapsed < Duration::from_secs(10));
        assert_eq!(
            *sink.messages.lock().unwrap(),
            vec![
                "Waiting for task task-1...".to_string(),
                "Status: processing".to_string(),
                "Task task-1 completed successfully".to_string(),
            ]
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_wait_reports_server_failure_message() {
        let source = ScriptedSource::new(vec![record("failed", Some("boom"))]);
        let sink = RecordingSink::default();

        let err = TaskWaiter::new(&source, &sink)
            .wait("task-1", Duration::from_secs(10), Duration::from_secs(1))
            .await
            .unwrap_err();

        match &err {
            WaitError::TaskFailed { task_id, message } => {
                assert_eq!(task_id, "task-1");
                assert_eq!(message, "boom");
            }
            other => panic!("expected TaskFailed, got {:?}", other),
        }
        assert!(err.to_string().contains("boom"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_wait_failure_without_message() {
        let source = ScriptedSource::new(vec![record("failed", None)]);
        let sink = RecordingSink::default();

        let err = TaskWaiter::new(&source, &sink)
            .wait("task-1", Duration::from_secs(10), Duration::from_secs(1))
            .await
            .unwrap_err();

        assert!(matches!(err, WaitError::TaskFailed { ref message, .. } if message == "unknown error"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_wait_times_out_while_pending() {
        let source = ScriptedSource::new(vec![record("pending", None)]);
        let sink = RecordingSink::default();
        let started = Instant::now();

        let err = TaskWaiter::new(&source, &sink)
            .wait("task-1", Duration::from_millis(2500), Duration::from_secs(1))
            .await
            .unwrap_err();

        assert!(matches!(err, WaitError::Timeout { .. }));
        assert_eq!(source.calls(), 2);
        let elapsed = started.elapsed();
        assert!(elapsed >= Duration::from_millis(2500) && elapsed < Duration::from_secs(3));
        let msg = err.to_string();
        assert!(msg.contains("task-1"), "{}", msg);
        assert!(msg.contains("2.5s"), "{}", msg);
    }

    #[tokio::test(start_paused = true)]
    async fn test_wait_deadline_wins_tie_with_ticker() {
        let source = ScriptedSource::new(vec![record("pending", None)]);
        let sink = RecordingSink::default();
        let started = Instant::now();

        let err = TaskWaiter::new(&source, &sink)
            .wait("task-1", Duration::from_secs(2), Duration::from_secs(1))
            .await
            .unwrap_err();

        assert!(matches!(err, WaitError::Timeout { .. }));
        assert_eq!(source.calls(), 1);
        let elapsed = started.elapsed();
        assert!(elapsed >= Duration::from_secs(2) && elapsed < Duration::from_millis(2500));
    }

    #[tokio::test(start_paused = true)]
    async fn test_wait_keeps_polling_on_unknown_status() {
        let source = ScriptedSource::new(vec![
            record("queued", None),
            record("", None),
            record("completed", None),
        ]);
        let sink = RecordingSink::default();

        TaskWaiter::new(&source, &sink)
            .wait("task-1", Duration::from_secs(10), Duration::from_secs(1))
            .await
            .unwrap();

        assert_eq!(source.calls(), 3);
        assert!(
            sink.messages
                .lock()
                .unwrap()
                .contains(&"Status: queued".to_string())
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_wait_abandons_in_flight_fetch_at_deadline() {
        let mut source = ScriptedSource::new(vec![record("completed", None)]);
        source.fetch_delay = Some(Duration::from_secs(30));
        let sink = RecordingSink::default();
        let started = Instant::now();

        let err = TaskWaiter::new(&source, &sink)
            .wait("task-1", Duration::from_millis(1500), Duration::from_secs(1))
            .await
            .unwrap_err();

        assert!(matches!(err, WaitError::Timeout { .. }));
        assert_eq!(source.calls(), 1);
        let elapsed = started.elapsed();
        assert!(elapsed >= Duration::from_millis(1500) && elapsed < Duration::from_secs(2));
    }

    #[tokio::test(start_paused = true)]
    async fn test_wait_surfaces_fetch_errors_without_retry() {
        let sink = RecordingSink::default();

        let err = TaskWaiter::new(&FailingSource, &sink)
            .wait("task-1", Duration::from_secs(10), Duration::from_secs(1))
            .await
            .unwrap_err();

        assert!(matches!(
            err,
            WaitError::Transport(ClientError::MissingApiKey)
        ));
    }

    #[tokio::test]
    async fn test_wait_rejects_zero_durations() {
        let source = ScriptedSource::new(vec![record("completed", None)]);
        let sink = RecordingSink::default();
        let waiter = TaskWaiter::new(&source, &sink);

        assert!(matches!(
            waiter
                .wait("task-1", Duration::ZERO, Duration::from_secs(1))
                .await,
            Err(WaitError::InvalidDuration)
        ));
        assert!(matches!(
            waiter
                .wait("task-1", Duration::from_secs(1), Duration::ZERO)
                .await,
            Err(WaitError::InvalidDuration)
        ));
        assert_eq!(source.calls(), 0);
        assert!(sink.messages.lock().unwrap().is_empty());
    }
}
