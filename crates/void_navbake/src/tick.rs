//! Editor update registration.
//!
//! Services that need to be polled every editor update register a task here
//! and drop it again once they are idle, so an idle editor has nothing to poll.

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicU64, Ordering};

use parking_lot::Mutex;

/// Registered update task
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct TaskId(pub u64);

/// Set of tasks the host must tick on its next update
pub struct UpdateQueue {
    tasks: Mutex<BTreeMap<TaskId, &'static str>>,
    next_id: AtomicU64,
}

impl UpdateQueue {
    /// Create an empty queue
    pub fn new() -> Self {
        Self {
            tasks: Mutex::new(BTreeMap::new()),
            next_id: AtomicU64::new(1),
        }
    }

    /// Register a task under a descriptive name
    pub fn register(&self, name: &'static str) -> TaskId {
        let id = TaskId(self.next_id.fetch_add(1, Ordering::Relaxed));
        self.tasks.lock().insert(id, name);
        log::debug!("Registered update task '{}' ({:?})", name, id);
        id
    }

    /// Remove a task. Returns `false` if it was not registered.
    pub fn deregister(&self, id: TaskId) -> bool {
        match self.tasks.lock().remove(&id) {
            Some(name) => {
                log::debug!("Deregistered update task '{}' ({:?})", name, id);
                true
            }
            None => false,
        }
    }

    /// Check if a task is registered
    pub fn is_registered(&self, id: TaskId) -> bool {
        self.tasks.lock().contains_key(&id)
    }

    /// Names of the registered tasks
    pub fn task_names(&self) -> Vec<&'static str> {
        self.tasks.lock().values().copied().collect()
    }

    /// Number of registered tasks
    pub fn len(&self) -> usize {
        self.tasks.lock().len()
    }

    /// Check if nothing needs ticking
    pub fn is_empty(&self) -> bool {
        self.tasks.lock().is_empty()
    }
}

impl Default for UpdateQueue {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_register_deregister() {
        let queue = UpdateQueue::new();
        assert!(queue.is_empty());

        let a = queue.register("bake");
        let b = queue.register("preview");
        assert_ne!(a, b);
        assert_eq!(queue.len(), 2);
        assert!(queue.is_registered(a));

        assert!(queue.deregister(a));
        assert!(!queue.deregister(a));
        assert!(!queue.is_registered(a));
        assert_eq!(queue.task_names(), vec!["preview"]);
    }
}
