use super::types::ContainerTask;
use log::debug;
use std::{
    collections::VecDeque,
    sync::{Mutex, MutexGuard, PoisonError},
};
use tokio::sync::Notify;

/// FIFO of pending container operations that never holds two equal tasks.
#[derive(Debug, Default)]
pub struct TaskQueue {
    tasks: Mutex<VecDeque<ContainerTask>>,
    available: Notify,
}

impl TaskQueue {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, VecDeque<ContainerTask>> {
        self.tasks.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Queues `task` unless an equal one is already waiting. Returns whether
    /// it was queued.
    pub fn add(&self, task: ContainerTask) -> bool {
        {
            let mut tasks = self.lock();
            if tasks.contains(&task) {
                debug!("Task already queued: {}", task);
                return false;
            }
            debug!("Task queued: {}", task);
            tasks.push_back(task);
        }
        self.available.notify_one();
        true
    }

    /// Waits until a task is available and removes the oldest one.
    pub async fn take(&self) -> ContainerTask {
        loop {
            if let Some(task) = self.lock().pop_front() {
                return task;
            }
            self.available.notified().await;
        }
    }

    pub fn try_take(&self) -> Option<ContainerTask> {
        self.lock().pop_front()
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::lib::tasks::types::TaskAction;
    use std::{sync::Arc, time::Duration};

    #[test]
    fn equal_tasks_collapse() {
        let queue = TaskQueue::new();
        assert!(queue.add(ContainerTask::add("ms-1")));
        assert!(!queue.add(ContainerTask::add("ms-1")));

        let mut retried = ContainerTask::add("ms-1");
        retried.retries = 3;
        assert!(!queue.add(retried));

        assert_eq!(queue.len(), 1);
    }

    #[test]
    fn different_actions_are_distinct() {
        let queue = TaskQueue::new();
        queue.add(ContainerTask::add("ms-1"));
        queue.add(ContainerTask::update("ms-1"));
        queue.add(ContainerTask::remove("ms-1", false));
        queue.add(ContainerTask::remove("ms-1", true));
        assert_eq!(queue.len(), 4);
    }

    #[tokio::test]
    async fn take_is_fifo() {
        let queue = TaskQueue::new();
        queue.add(ContainerTask::add("a"));
        queue.add(ContainerTask::update("b"));

        assert_eq!(queue.take().await.target, "a");
        let second = queue.take().await;
        assert_eq!(second.action, TaskAction::Update);
        assert!(queue.is_empty());
    }

    #[tokio::test]
    async fn take_waits_for_add() {
        let queue = Arc::new(TaskQueue::new());

        let consumer = {
            let queue = queue.clone();
            tokio::spawn(async move { queue.take().await })
        };

        tokio::time::sleep(Duration::from_millis(20)).await;
        queue.add(ContainerTask::remove("c1", false));

        let task = tokio::time::timeout(Duration::from_secs(1), consumer)
            .await
            .expect("consumer woke up")
            .expect("consumer task finished");
        assert_eq!(task.target, "c1");
    }

    #[test]
    fn a_taken_task_can_be_queued_again() {
        let queue = TaskQueue::new();
        queue.add(ContainerTask::add("a"));
        let task = queue.try_take();
        assert!(task.is_some());
        assert!(queue.add(ContainerTask::add("a")));
    }
}
