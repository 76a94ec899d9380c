use std::collections::{HashMap, HashSet};

use crate::dependency::Dependency;
use crate::error::{ExecutionError, GraphError};
use crate::executor::{self, Settings};
use crate::graph::{Dag, GraphExport};
use crate::options::Arguments;
use crate::results::WorkflowResults;
use crate::task::Handle;

/// A validated set of dependencies, ready to be executed any number of times.
///
/// The graph is checked and ordered once, when the workflow is built. Every
/// call to [`Workflow::execute`] gets its own store for intermediate outputs
/// and leaves the workflow untouched, so a workflow can be shared between
/// threads and reused with different [`Arguments`].
///
/// # Example
///
/// ```rust
/// use kumiki::{Arguments, Dependency, Options, Workflow, task};
///
/// let input = task::from_fn("input", |_, options| Ok(options.require::<i64>("value")?));
/// let double = task::from_fn("double", |inputs, _| Ok(inputs.get::<i64>(0)? * 2));
///
/// let output = Dependency::new(&double, [&input]);
/// let workflow = Workflow::new([Dependency::source(&input), output.clone()])?;
///
/// let arguments = Arguments::new().with(&input, Options::new().with("value", 21));
/// let results = workflow.execute(&arguments)?;
///
/// assert_eq!(results.downcast::<i64>(&output), Some(&42));
/// # Ok::<(), anyhow::Error>(())
/// ```
#[derive(Debug)]
pub struct Workflow {
    dag: Dag,
}

impl Workflow {
    pub fn new(dependencies: impl IntoIterator<Item = Dependency>) -> Result<Self, GraphError> {
        Self::with_labels(dependencies, HashMap::new())
    }

    /// Like [`Workflow::new`], with display labels for some of the tasks.
    /// Labels only show up in errors, logs and exports.
    pub fn with_labels(
        dependencies: impl IntoIterator<Item = Dependency>,
        labels: HashMap<Handle, String>,
    ) -> Result<Self, GraphError> {
        let dag = Dag::build(dependencies, &labels)?;
        Ok(Self { dag })
    }

    pub fn builder() -> WorkflowBuilder {
        WorkflowBuilder::default()
    }

    /// Chains `tasks` so that every task receives the output of the previous
    /// one as its only input.
    pub fn linear<'a>(tasks: impl IntoIterator<Item = &'a Handle>) -> Result<Self, GraphError> {
        let mut previous: Option<&Handle> = None;
        let mut dependencies = Vec::new();

        for task in tasks {
            dependencies.push(Dependency::new(task, previous));
            previous = Some(task);
        }

        Self::new(dependencies)
    }

    /// The underlying validated graph.
    pub fn dag(&self) -> &Dag {
        &self.dag
    }

    /// Dependencies in the order they run.
    pub fn ordered_dependencies(&self) -> &[Dependency] {
        self.dag.ordered()
    }

    /// The number of declared inputs of every dependency.
    pub fn indegrees(&self) -> HashMap<Dependency, usize> {
        self.dag
            .indegrees()
            .map(|(dependency, count)| (dependency.clone(), count))
            .collect()
    }

    /// Every task under a unique name, in execution order.
    ///
    /// Labels that occur more than once get a `_1`, `_2`, ... suffix after
    /// their first occurrence.
    pub fn tasks(&self) -> Vec<(String, Handle)> {
        let mut taken = HashSet::new();
        let mut counters: HashMap<&str, usize> = HashMap::new();
        let mut tasks = Vec::with_capacity(self.dag.len());

        for dependency in self.dag.ordered() {
            let label = self.dag.label(dependency).unwrap_or_default();
            let mut name = label.to_string();

            while taken.contains(&name) {
                let counter = counters.entry(label).or_default();
                *counter += 1;
                name = format!("{label}_{counter}");
            }

            taken.insert(name.clone());
            tasks.push((name, dependency.task().clone()));
        }

        tasks
    }

    pub fn export(&self) -> GraphExport {
        self.dag.export()
    }

    pub fn to_dot(&self) -> String {
        self.dag.to_dot()
    }

    pub fn to_mermaid(&self) -> String {
        self.dag.to_mermaid()
    }

    /// Runs every task once, one at a time, and returns the outputs of the
    /// sinks.
    ///
    /// The first task failure aborts the call, tasks not yet started never
    /// run and no partial results are returned.
    pub fn execute(&self, arguments: &Arguments) -> Result<WorkflowResults, ExecutionError> {
        self.execute_with(arguments, &Settings::default())
    }

    pub fn execute_with(
        &self,
        arguments: &Arguments,
        settings: &Settings,
    ) -> Result<WorkflowResults, ExecutionError> {
        executor::run(&self.dag, arguments, settings)
    }
}

/// Collects dependencies and labels before validating them into a
/// [`Workflow`].
#[derive(Default)]
pub struct WorkflowBuilder {
    dependencies: Vec<Dependency>,
    labels: HashMap<Handle, String>,
}

impl WorkflowBuilder {
    pub fn dependency(mut self, dependency: Dependency) -> Self {
        self.dependencies.push(dependency);
        self
    }

    pub fn dependencies(mut self, dependencies: impl IntoIterator<Item = Dependency>) -> Self {
        self.dependencies.extend(dependencies);
        self
    }

    /// Adds a node running `task` on the outputs of `inputs` and returns it
    /// for later lookups in the results.
    pub fn add<'a>(
        &mut self,
        task: &Handle,
        inputs: impl IntoIterator<Item = &'a Handle>,
    ) -> Dependency {
        let dependency = Dependency::new(task, inputs);
        self.dependencies.push(dependency.clone());
        dependency
    }

    pub fn label(mut self, task: &Handle, label: impl Into<String>) -> Self {
        self.labels.insert(task.clone(), label.into());
        self
    }

    pub fn build(self) -> Result<Workflow, GraphError> {
        Workflow::with_labels(self.dependencies, self.labels)
    }
}
