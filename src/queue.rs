//! FIFO task queue.
//!
//! No priority ordering: admission order is preserved, and a re-enqueued
//! retry goes to the tail, same as any newly admitted task.

use std::collections::VecDeque;
use std::sync::Mutex;

use crate::model::Task;

#[derive(Default)]
pub struct TaskQueue {
    inner: Mutex<VecDeque<Task>>,
}

impl TaskQueue {
    pub fn new() -> Self {
        Self {
            inner: Mutex::new(VecDeque::new()),
        }
    }

    pub fn enqueue(&self, task: Task) {
        self.inner.lock().unwrap().push_back(task);
    }

    pub fn try_dequeue(&self) -> Option<Task> {
        self.inner.lock().unwrap().pop_front()
    }

    pub fn len(&self) -> usize {
        self.inner.lock().unwrap().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Remove every queued task, marking none of them (the caller decides
    /// the resulting state), returning them in original order.
    pub fn drain(&self) -> Vec<Task> {
        self.inner.lock().unwrap().drain(..).collect()
    }
}
