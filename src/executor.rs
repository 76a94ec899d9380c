mod diagnostics;

use std::collections::HashMap;
use std::sync::{Mutex, PoisonError};
use std::time::{Duration, Instant};

use indicatif::ProgressStyle;
use petgraph::graph::NodeIndex;
use serde::{Deserialize, Serialize};
use tracing::Level;
use tracing_indicatif::span_ext::IndicatifSpanExt;

use crate::dependency::Dependency;
use crate::error::ExecutionError;
use crate::graph::Dag;
use crate::options::Arguments;
use crate::results::WorkflowResults;
use crate::task::{Dynamic, Inputs};

pub use diagnostics::{Diagnostics, TaskExecution};

/// How a workflow schedules its tasks.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Mode {
    /// One task at a time, in execution order.
    #[default]
    Sequential,
    /// Independent tasks run concurrently on a thread pool.
    Parallel,
}

/// Execution settings, deserializable from any `serde` format.
///
/// ```rust
/// use kumiki::{Mode, Settings};
///
/// let settings: Settings = serde_json::from_str(r#"{"mode": "parallel", "threads": 4}"#).unwrap();
/// assert_eq!(settings.mode, Mode::Parallel);
/// assert_eq!(settings.threads, Some(4));
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Settings {
    pub mode: Mode,
    /// Size of a dedicated thread pool for `Parallel` mode, the global rayon
    /// pool is used when unset.
    pub threads: Option<usize>,
}

impl Settings {
    pub fn sequential() -> Self {
        Self::default()
    }

    pub fn parallel() -> Self {
        Self {
            mode: Mode::Parallel,
            threads: None,
        }
    }

    pub fn threads(mut self, threads: usize) -> Self {
        self.threads = Some(threads);
        self
    }
}

pub(crate) fn run(
    dag: &Dag,
    arguments: &Arguments,
    settings: &Settings,
) -> Result<WorkflowResults, ExecutionError> {
    let total = dag.len() as u64;

    let root_span = tracing::span!(Level::INFO, "run_workflow", tasks = total);
    root_span.pb_set_length(total);
    if let Some(style) = style_run() {
        root_span.pb_set_style(&style);
    }
    root_span.pb_set_message("Running tasks...");
    let _enter = root_span.enter();

    let (store, diagnostics) = match (settings.mode, settings.threads) {
        (Mode::Sequential, _) => run_sequential(dag, arguments, &root_span)?,
        (Mode::Parallel, threads) => {
            let parallel = Parallel::new(dag, arguments, &root_span);
            match threads {
                None => rayon::in_place_scope(|s| parallel.start(s)),
                Some(threads) => rayon::ThreadPoolBuilder::new()
                    .num_threads(threads)
                    .build()?
                    .in_place_scope(|s| parallel.start(s)),
            }
            parallel.finish()?
        }
    };

    tracing::debug!("workflow run complete");
    Ok(collect_sinks(dag, store, diagnostics))
}

/// Runs every task on the calling thread in execution order.
fn run_sequential(
    dag: &Dag,
    arguments: &Arguments,
    root_span: &tracing::Span,
) -> Result<(Vec<Option<Dynamic>>, Diagnostics), ExecutionError> {
    let mut store: Vec<Option<Dynamic>> = vec![None; dag.len()];
    let mut execution_times = HashMap::new();

    for &index in dag.order_indices() {
        let dependencies = resolve_inputs(dag, &store, index);

        let start = Instant::now();
        let output = run_task(dag, arguments, index, &dependencies)?;
        let duration = start.elapsed();

        store[index.index()] = Some(output);
        execution_times.insert(dag.node(index).clone(), TaskExecution { start, duration });
        root_span.pb_inc(1);
    }

    Ok((store, Diagnostics { execution_times }))
}

/// Mutable bookkeeping of a parallel run, shared by every worker.
struct State {
    store: Vec<Option<Dynamic>>,
    /// Inputs still missing for every node.
    pending: Vec<usize>,
    execution_times: HashMap<Dependency, TaskExecution>,
    failure: Option<(usize, ExecutionError)>,
}

/// This executes the task graph on a thread pool. Tasks run as soon as their
/// inputs are available and nothing ever blocks waiting for a worker.
///
/// The algorithm works as follows:
/// 1. The tasks without inputs are spawned onto the scope, in execution order.
/// 2. A worker that finishes a task stores its output and decrements the
///    pending input counts of its successors.
/// 3. Every successor whose count reaches zero is spawned by that same
///    worker.
/// 4. After a failure nothing new is spawned. Tasks already spawned still
///    run and the failure of the earliest node in execution order wins.
///
/// The scope returns once the last spawned task finished. A caller that is
/// itself a rayon worker keeps executing jobs while it waits, so nested
/// parallel runs cannot starve the pool.
struct Parallel<'a> {
    dag: &'a Dag,
    arguments: &'a Arguments,
    root_span: tracing::Span,
    state: Mutex<State>,
}

impl<'a> Parallel<'a> {
    fn new(dag: &'a Dag, arguments: &'a Arguments, root_span: &tracing::Span) -> Self {
        let pending = (0..dag.len())
            .map(|i| dag.inputs_of(NodeIndex::new(i)).len())
            .collect();

        Self {
            dag,
            arguments,
            root_span: root_span.clone(),
            state: Mutex::new(State {
                store: vec![None; dag.len()],
                pending,
                execution_times: HashMap::new(),
                failure: None,
            }),
        }
    }

    fn start<'scope>(&'scope self, s: &rayon::Scope<'scope>) {
        for &index in self.dag.order_indices() {
            if self.dag.inputs_of(index).is_empty() {
                self.spawn(s, index, Vec::new());
            }
        }
    }

    fn spawn<'scope>(
        &'scope self,
        s: &rayon::Scope<'scope>,
        index: NodeIndex,
        inputs: Vec<Dynamic>,
    ) {
        s.spawn(move |s| {
            let _enter = self.root_span.enter();
            let start = Instant::now();

            let output = std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| {
                run_task(self.dag, self.arguments, index, &inputs)
            }))
            .unwrap_or_else(|panic| {
                Err(ExecutionError::Panicked {
                    name: self.dag.label_of(index).to_string(),
                    message: panic_message(panic.as_ref()),
                })
            });

            let ready = self.complete(index, output, start, start.elapsed());
            for (next, inputs) in ready {
                self.spawn(s, next, inputs);
            }
        });
    }

    /// Records the outcome of `index` and returns the successors that became
    /// ready, together with their resolved inputs.
    fn complete(
        &self,
        index: NodeIndex,
        output: Result<Dynamic, ExecutionError>,
        start: Instant,
        duration: Duration,
    ) -> Vec<(NodeIndex, Vec<Dynamic>)> {
        let mut state = self.state.lock().unwrap_or_else(PoisonError::into_inner);
        self.root_span.pb_inc(1);

        let output = match output {
            Ok(output) => output,
            Err(error) => {
                let position = self.dag.position_of(index);
                if state.failure.as_ref().is_none_or(|(first, _)| position < *first) {
                    state.failure = Some((position, error));
                }
                return Vec::new();
            }
        };

        state.store[index.index()] = Some(output);
        state
            .execution_times
            .insert(self.dag.node(index).clone(), TaskExecution { start, duration });

        if state.failure.is_some() {
            return Vec::new();
        }

        let mut ready = Vec::new();
        for &next in self.dag.successors_of(index) {
            state.pending[next.index()] -= 1;
            if state.pending[next.index()] == 0 {
                ready.push((next, resolve_inputs(self.dag, &state.store, next)));
            }
        }

        ready
    }

    fn finish(self) -> Result<(Vec<Option<Dynamic>>, Diagnostics), ExecutionError> {
        let state = self.state.into_inner().unwrap_or_else(PoisonError::into_inner);

        match state.failure {
            Some((_, error)) => Err(error),
            None => Ok((
                state.store,
                Diagnostics {
                    execution_times: state.execution_times,
                },
            )),
        }
    }
}

/// Collects the outputs of the inputs of `index`, in declaration order.
///
/// Inputs always precede their consumers, so every slot is filled.
fn resolve_inputs(dag: &Dag, store: &[Option<Dynamic>], index: NodeIndex) -> Vec<Dynamic> {
    dag.inputs_of(index)
        .iter()
        .filter_map(|input| store[input.index()].clone())
        .collect()
}

fn run_task(
    dag: &Dag,
    arguments: &Arguments,
    index: NodeIndex,
    dependencies: &[Dynamic],
) -> Result<Dynamic, ExecutionError> {
    let dependency = dag.node(index);
    let name = dag.label_of(index);

    let span = tracing::span!(Level::INFO, "task", name = name);
    span.pb_set_message(&format!("Running {name}"));
    let _enter = span.enter();

    let options = arguments.options_for(dependency.task());
    tracing::trace!(inputs = dependencies.len(), options = options.len(), "invoking task");

    dependency
        .task()
        .task()
        .execute(Inputs::new(dependencies), options)
        .map_err(|source| ExecutionError::Task {
            name: name.to_string(),
            source,
        })
}

/// Keeps the outputs of the sinks, in execution order, and drops the rest.
fn collect_sinks(
    dag: &Dag,
    mut store: Vec<Option<Dynamic>>,
    diagnostics: Diagnostics,
) -> WorkflowResults {
    let outputs = dag
        .order_indices()
        .iter()
        .filter(|&&index| dag.is_sink(index))
        .filter_map(|&index| {
            store[index.index()]
                .take()
                .map(|output| (dag.node(index).clone(), output))
        })
        .collect();

    WorkflowResults::new(outputs, diagnostics)
}

fn panic_message(panic: &(dyn std::any::Any + Send)) -> String {
    if let Some(s) = panic.downcast_ref::<&str>() {
        s.to_string()
    } else if let Some(s) = panic.downcast_ref::<String>() {
        s.clone()
    } else {
        String::from("unknown payload")
    }
}

fn style_run() -> Option<ProgressStyle> {
    ProgressStyle::default_bar()
        .template("{spinner:.green} [{elapsed}] [{bar:40.cyan/blue}] {pos}/{len} ({eta}) {msg}")
        .ok()
        .map(|style| style.progress_chars("=>-"))
}
