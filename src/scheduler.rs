//! A fixed-size worker pool with a completion channel.
//!
//! Work is submitted as named closures returning `Result<O>`. Every task
//! delivers exactly one [`Completion`] on the scheduler's channel, in
//! completion order, whatever happened inside it.

use crate::error::{Result, ThesaurusError};
use crate::trace_time;

use crossbeam::channel::{unbounded, Receiver, Sender};
use rayon::{ThreadPool, ThreadPoolBuilder};
use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::Arc;
use std::time::Instant;
use tracing::debug;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum TaskState {
    Pending = 0,
    Running = 1,
    Completed = 2,
    Failed = 3,
}

impl TaskState {
    fn from_u8(value: u8) -> TaskState {
        match value {
            0 => TaskState::Pending,
            1 => TaskState::Running,
            2 => TaskState::Completed,
            _ => TaskState::Failed,
        }
    }
}

#[derive(Debug, Clone)]
pub struct TaskHandle {
    id: u64,
    name: String,
    state: Arc<AtomicU8>,
}

impl TaskHandle {
    pub fn id(&self) -> u64 {
        self.id
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn state(&self) -> TaskState {
        TaskState::from_u8(self.state.load(Ordering::Acquire))
    }
}

/// What a finished task hands back. Failures are already wrapped in
/// [`ThesaurusError::Task`].
#[derive(Debug)]
pub struct Completion<O> {
    pub id: u64,
    pub name: String,
    pub result: Result<O>,
}

pub struct Scheduler<O> {
    pool: ThreadPool,
    sender: Sender<Completion<O>>,
    receiver: Receiver<Completion<O>>,
    next_id: u64,
    pending: usize,
}

impl<O: Send + 'static> Scheduler<O> {
    /// `threads == 0` lets rayon pick the number of workers.
    pub fn new(threads: usize) -> Result<Scheduler<O>> {
        let pool = ThreadPoolBuilder::new()
            .num_threads(threads)
            .thread_name(|i| format!("worker-{}", i))
            .build()?;
        let (sender, receiver) = unbounded();
        Ok(Scheduler {
            pool,
            sender,
            receiver,
            next_id: 0,
            pending: 0,
        })
    }

    pub fn threads(&self) -> usize {
        self.pool.current_num_threads()
    }

    /// Tasks submitted whose completion has not been settled yet.
    pub fn pending(&self) -> usize {
        self.pending
    }

    pub fn submit<F>(&mut self, name: impl Into<String>, work: F) -> TaskHandle
    where
        F: FnOnce() -> Result<O> + Send + 'static,
    {
        let handle = TaskHandle {
            id: self.next_id,
            name: name.into(),
            state: Arc::new(AtomicU8::new(TaskState::Pending as u8)),
        };
        self.next_id += 1;
        self.pending += 1;
        debug!(task = %handle.name, id = handle.id, "submit");

        let task = handle.clone();
        let sender = self.sender.clone();
        self.pool.spawn(move || {
            task.state.store(TaskState::Running as u8, Ordering::Release);
            let start = Instant::now();

            let result = match panic::catch_unwind(AssertUnwindSafe(work)) {
                Ok(result) => result,
                Err(_) => Err(ThesaurusError::Internal("task panicked".into())),
            };
            let result = result.map_err(|e| ThesaurusError::Task {
                task: task.name.clone(),
                source: Box::new(e),
            });

            let state = if result.is_ok() {
                TaskState::Completed
            } else {
                TaskState::Failed
            };
            task.state.store(state as u8, Ordering::Release);
            trace_time!(start, task = %task.name, ?state, "task finished");

            // the orchestrator may already have given up on the run
            let _ = sender.send(Completion {
                id: task.id,
                name: task.name,
                result,
            });
        });

        handle
    }

    /// The completion channel, for use in `select!`. Every completion
    /// received from it must be passed to [`Scheduler::settle`].
    pub fn completions(&self) -> &Receiver<Completion<O>> {
        &self.receiver
    }

    pub fn settle(&mut self, completion: &Completion<O>) {
        debug!(task = %completion.name, id = completion.id, ok = completion.result.is_ok(), "settled");
        self.pending = self.pending.saturating_sub(1);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::BTreeSet;

    fn next<O: Send + 'static>(scheduler: &mut Scheduler<O>) -> Option<Completion<O>> {
        if scheduler.pending() == 0 {
            return None;
        }
        let completion = scheduler.completions().recv().ok()?;
        scheduler.settle(&completion);
        Some(completion)
    }

    #[test]
    fn every_task_completes_once_test() {
        let mut scheduler = Scheduler::<u64>::new(3).unwrap();
        let handles: Vec<TaskHandle> = (0..20u64)
            .map(|i| scheduler.submit(format!("square-{}", i), move || Ok(i * i)))
            .collect();
        assert_eq!(scheduler.pending(), 20);

        let mut seen = BTreeSet::new();
        while let Some(completion) = next(&mut scheduler) {
            let value = completion.result.unwrap();
            assert_eq!(value, completion.id * completion.id);
            assert!(seen.insert(completion.id));
        }
        assert_eq!(seen.len(), 20);
        assert!(handles.iter().all(|h| h.state() == TaskState::Completed));
    }

    #[test]
    fn failures_and_panics_are_captured_test() {
        let mut scheduler = Scheduler::<()>::new(2).unwrap();
        let failing = scheduler.submit("fails", || Err(ThesaurusError::Internal("boom".into())));
        scheduler.submit("panics", || panic!("worker panic"));

        let mut names = Vec::new();
        while let Some(completion) = next(&mut scheduler) {
            match completion.result {
                Err(ThesaurusError::Task { task, .. }) => names.push(task),
                other => panic!("unexpected {:?}", other),
            }
        }
        names.sort();
        assert_eq!(names, vec!["fails", "panics"]);
        assert_eq!(failing.state(), TaskState::Failed);
    }
}
