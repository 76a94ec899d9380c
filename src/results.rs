use std::ops::Index;

use crate::dependency::Dependency;
use crate::executor::Diagnostics;
use crate::task::{Dynamic, Handle};

/// Outputs of the sink nodes of a single workflow run.
///
/// Only nodes whose output no other node consumes are kept, in execution
/// order. Intermediate outputs are dropped together with the run that
/// produced them.
#[derive(Debug)]
pub struct WorkflowResults {
    outputs: Vec<(Dependency, Dynamic)>,
    diagnostics: Diagnostics,
}

impl WorkflowResults {
    pub(crate) fn new(outputs: Vec<(Dependency, Dynamic)>, diagnostics: Diagnostics) -> Self {
        Self {
            outputs,
            diagnostics,
        }
    }

    pub fn get(&self, dependency: &Dependency) -> Option<&Dynamic> {
        self.outputs
            .iter()
            .find(|(key, _)| key == dependency)
            .map(|(_, value)| value)
    }

    /// Output of the sink that runs `task`.
    pub fn get_by_task(&self, task: &Handle) -> Option<&Dynamic> {
        self.outputs
            .iter()
            .find(|(key, _)| key.task() == task)
            .map(|(_, value)| value)
    }

    /// Output of the sink that was given `name` with
    /// [`Dependency::named`].
    ///
    /// Names are not required to be unique. When several sinks share one,
    /// the first of them in execution order is returned; use
    /// [`WorkflowResults::get`] to reach the others.
    pub fn get_by_name(&self, name: &str) -> Option<&Dynamic> {
        self.outputs
            .iter()
            .find(|(key, _)| key.name() == Some(name))
            .map(|(_, value)| value)
    }

    /// Typed access to the output of `dependency`.
    pub fn downcast<T: 'static>(&self, dependency: &Dependency) -> Option<&T> {
        self.get(dependency)?.downcast_ref()
    }

    pub fn downcast_by_name<T: 'static>(&self, name: &str) -> Option<&T> {
        self.get_by_name(name)?.downcast_ref()
    }

    pub fn contains(&self, dependency: &Dependency) -> bool {
        self.get(dependency).is_some()
    }

    pub fn keys(&self) -> impl Iterator<Item = &Dependency> {
        self.outputs.iter().map(|(key, _)| key)
    }

    /// Names of the sinks that were given one.
    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.outputs.iter().filter_map(|(key, _)| key.name())
    }

    pub fn iter(&self) -> impl Iterator<Item = (&Dependency, &Dynamic)> {
        self.outputs.iter().map(|(key, value)| (key, value))
    }

    pub fn len(&self) -> usize {
        self.outputs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.outputs.is_empty()
    }

    /// Timing of every task that ran during this call.
    pub fn diagnostics(&self) -> &Diagnostics {
        &self.diagnostics
    }
}

impl Index<&Dependency> for WorkflowResults {
    type Output = Dynamic;

    /// # Panics
    /// Panics if `dependency` is not a sink of the workflow that produced these
    /// results.
    fn index(&self, dependency: &Dependency) -> &Dynamic {
        match self.get(dependency) {
            Some(value) => value,
            None => panic!("{dependency:?} is not a sink of this workflow"),
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::*;
    use crate::task;

    #[test]
    fn lookups_by_dependency_task_and_name() {
        let a = task::from_fn("a", |_, _| Ok(()));
        let b = task::from_fn("b", |_, _| Ok(()));
        let first = Dependency::source(&a).named("first");
        let second = Dependency::source(&b);

        let results = WorkflowResults::new(
            vec![
                (first.clone(), Arc::new(1i32) as Dynamic),
                (second.clone(), Arc::new("two") as Dynamic),
            ],
            Diagnostics::default(),
        );

        assert_eq!(results.len(), 2);
        assert_eq!(results.downcast::<i32>(&first), Some(&1));
        assert_eq!(results.downcast::<&str>(&second), Some(&"two"));
        assert_eq!(results.downcast::<i32>(&second), None);
        assert!(results.get_by_task(&b).is_some());
        assert_eq!(results.downcast_by_name::<i32>("first"), Some(&1));
        assert_eq!(results.names().collect::<Vec<_>>(), vec!["first"]);
        assert_eq!(results[&first].downcast_ref::<i32>(), Some(&1));
        assert_eq!(results.iter().count(), 2);
        assert!(!results.contains(&Dependency::source(&a)));
    }

    #[test]
    fn shared_names_resolve_to_the_first_sink() {
        let a = task::from_fn("a", |_, _| Ok(()));
        let b = task::from_fn("b", |_, _| Ok(()));
        let first = Dependency::source(&a).named("out");
        let second = Dependency::source(&b).named("out");

        let results = WorkflowResults::new(
            vec![
                (first.clone(), Arc::new(1i32) as Dynamic),
                (second.clone(), Arc::new(2i32) as Dynamic),
            ],
            Diagnostics::default(),
        );

        assert_eq!(results.downcast_by_name::<i32>("out"), Some(&1));
        assert_eq!(results.downcast::<i32>(&second), Some(&2));
        assert_eq!(results.names().collect::<Vec<_>>(), vec!["out", "out"]);
    }
}
