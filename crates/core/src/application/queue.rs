// Job Queue: FIFO of job IDs awaiting the worker

use crate::domain::JobId;
use std::collections::VecDeque;
use std::sync::Mutex;
use tokio::sync::Notify;

/// Unbounded FIFO, single consumer
///
/// The queue holds IDs only; the store owns the job records.
#[derive(Default)]
pub struct JobQueue {
    items: Mutex<VecDeque<JobId>>,
    notify: Notify,
}

impl JobQueue {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&self, id: impl Into<JobId>) {
        self.lock().push_back(id.into());
        self.notify.notify_one();
    }

    /// Take a job out before the worker reaches it
    pub fn remove(&self, id: &str) -> bool {
        let mut items = self.lock();
        match items.iter().position(|queued| queued == id) {
            Some(index) => {
                items.remove(index);
                true
            }
            None => false,
        }
    }

    pub fn try_pop(&self) -> Option<JobId> {
        self.lock().pop_front()
    }

    /// Wait for the next job ID
    pub async fn pop(&self) -> JobId {
        loop {
            if let Some(id) = self.try_pop() {
                return id;
            }
            self.notify.notified().await;
        }
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }

    /// Zero-based position, `None` when not queued
    pub fn position(&self, id: &str) -> Option<usize> {
        self.lock().iter().position(|queued| queued == id)
    }

    pub fn snapshot(&self) -> Vec<JobId> {
        self.lock().iter().cloned().collect()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, VecDeque<JobId>> {
        // A poisoned queue still holds valid IDs
        self.items.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}
