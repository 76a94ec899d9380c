#![forbid(unsafe_code)]
#![doc = include_str!("../README.md")]

mod dependency;
mod error;
mod executor;
pub mod graph;
#[cfg(feature = "logging")]
mod logging;
mod options;
mod results;
pub mod task;
mod workflow;

pub use crate::dependency::Dependency;
pub use crate::error::*;
pub use crate::executor::{Diagnostics, Mode, Settings, TaskExecution};
pub use crate::graph::{Dag, GraphExport};
#[cfg(feature = "logging")]
pub use crate::logging::init_logging;
pub use crate::options::{Arguments, Options};
pub use crate::results::WorkflowResults;
pub use crate::task::{Dynamic, Handle, Inputs, Task, TaskResult, TypedTask};
pub use crate::workflow::{Workflow, WorkflowBuilder};
