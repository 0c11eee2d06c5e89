use std::{
    fmt,
    hash::{Hash, Hasher},
};

/// Attempts a failed task gets beyond its first run.
pub const MAX_RETRIES: u32 = 5;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TaskAction {
    Add,
    Update,
    Remove,
    RemoveWithCleanup,
}

impl TaskAction {
    pub fn is_remove(&self) -> bool {
        matches!(self, TaskAction::Remove | TaskAction::RemoveWithCleanup)
    }
}

impl fmt::Display for TaskAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TaskAction::Add => write!(f, "ADD"),
            TaskAction::Update => write!(f, "UPDATE"),
            TaskAction::Remove => write!(f, "REMOVE"),
            TaskAction::RemoveWithCleanup => write!(f, "REMOVE_WITH_CLEANUP"),
        }
    }
}

/// One queued container operation.
///
/// `target` is a microservice uuid for ADD/UPDATE and a runtime container id
/// for the remove actions. The retry counter takes no part in equality.
#[derive(Debug, Clone)]
pub struct ContainerTask {
    pub action: TaskAction,
    pub target: String,
    pub retries: u32,
}

impl ContainerTask {
    pub fn new(action: TaskAction, target: &str) -> Self {
        ContainerTask {
            action,
            target: target.to_string(),
            retries: 0,
        }
    }

    pub fn add(uuid: &str) -> Self {
        Self::new(TaskAction::Add, uuid)
    }

    pub fn update(uuid: &str) -> Self {
        Self::new(TaskAction::Update, uuid)
    }

    pub fn remove(container_id: &str, with_cleanup: bool) -> Self {
        let action = if with_cleanup {
            TaskAction::RemoveWithCleanup
        } else {
            TaskAction::Remove
        };
        Self::new(action, container_id)
    }
}

impl PartialEq for ContainerTask {
    fn eq(&self, other: &Self) -> bool {
        self.action == other.action && self.target == other.target
    }
}

impl Eq for ContainerTask {}

impl Hash for ContainerTask {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.action.hash(state);
        self.target.hash(state);
    }
}

impl fmt::Display for ContainerTask {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {} (retries: {})", self.action, self.target, self.retries)
    }
}
