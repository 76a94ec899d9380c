use thiserror::Error;

/// Structural problems found while building a [`Workflow`](crate::Workflow).
///
/// Every variant names the offending nodes by their display label so the
/// caller can find them in the dependency set it supplied.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum GraphError {
    #[error("Task '{task}' is the transform of more than one dependency ('{first}' and '{second}')")]
    Duplicate {
        task: String,
        first: String,
        second: String,
    },

    #[error("Dependency '{dependency}' takes input from task '{input}', which no dependency provides")]
    Dangling { dependency: String, input: String },

    #[error("Cyclic dependency, these nodes can never run: {}", .remaining.join(", "))]
    Cycle { remaining: Vec<String> },
}

#[derive(Debug, Error)]
pub enum ExecutionError {
    /// The task itself failed, `source` is the error it returned unchanged.
    #[error("Task '{name}':\n{source}")]
    Task {
        name: String,
        #[source]
        source: anyhow::Error,
    },

    #[error("Task '{name}' panicked: {message}")]
    Panicked { name: String, message: String },

    #[error("Failed to build thread pool")]
    ThreadPool(#[from] rayon::ThreadPoolBuildError),
}

impl ExecutionError {
    /// Name of the task that failed, if the failure belongs to a task.
    pub fn task_name(&self) -> Option<&str> {
        match self {
            ExecutionError::Task { name, .. } | ExecutionError::Panicked { name, .. } => {
                Some(name)
            }
            ExecutionError::ThreadPool(_) => None,
        }
    }
}

/// Raised by [`Inputs`](crate::Inputs) when a task reads its positional
/// inputs the wrong way.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum InputError {
    #[error("Input {index} requested, but only {len} inputs were supplied")]
    OutOfRange { index: usize, len: usize },

    #[error("Input {index} is not of type {expected}")]
    WrongType {
        index: usize,
        expected: &'static str,
    },
}

#[derive(Debug, Error)]
pub enum OptionsError {
    #[error("Option '{0}' is required but was not supplied")]
    Missing(String),

    #[error("Option '{key}' has an unexpected shape:\n{source}")]
    Shape {
        key: String,
        #[source]
        source: serde_json::Error,
    },

    #[error("Option '{key}' could not be serialized:\n{source}")]
    Serialize {
        key: String,
        #[source]
        source: serde_json::Error,
    },
}
