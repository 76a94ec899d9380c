use std::borrow::Cow;
use std::fmt::Debug;
use std::hash::{Hash, Hasher};
use std::sync::Arc;

use crate::task::Handle;

struct Inner {
    task: Handle,
    inputs: Vec<Handle>,
    name: Option<Cow<'static, str>>,
}

/// Binds a task to the ordered list of tasks whose outputs it consumes.
///
/// A `Dependency` is a node of the workflow graph. It is immutable once built
/// and cheap to clone; clones share identity, so two dependencies are equal
/// only when one was cloned from the other.
///
/// ```rust
/// use kumiki::{Dependency, task};
///
/// let load = task::from_fn("load", |_, _| Ok(1));
/// let save = task::from_fn("save", |inputs, _| Ok(*inputs.get::<i32>(0)?));
///
/// let source = Dependency::source(&load);
/// let sink = Dependency::new(&save, [&load]).named("output");
///
/// assert_eq!(sink.inputs(), &[load]);
/// assert_eq!(sink.name(), Some("output"));
/// assert_ne!(source, Dependency::source(source.task()));
/// ```
#[derive(Clone)]
pub struct Dependency(Arc<Inner>);

impl Dependency {
    pub fn new<'a>(task: &Handle, inputs: impl IntoIterator<Item = &'a Handle>) -> Self {
        Self(Arc::new(Inner {
            task: task.clone(),
            inputs: inputs.into_iter().cloned().collect(),
            name: None,
        }))
    }

    /// A node without inputs, typically fed through run-time options.
    pub fn source(task: &Handle) -> Self {
        Self::new(task, std::iter::empty())
    }

    /// Returns a new dependency with the same task and inputs, carrying a
    /// human-readable name. The result has its own identity.
    pub fn named(self, name: impl Into<Cow<'static, str>>) -> Self {
        let inner = Arc::try_unwrap(self.0).unwrap_or_else(|shared| Inner {
            task: shared.task.clone(),
            inputs: shared.inputs.clone(),
            name: shared.name.clone(),
        });

        Self(Arc::new(Inner {
            name: Some(name.into()),
            ..inner
        }))
    }

    /// The task this node runs.
    pub fn task(&self) -> &Handle {
        &self.0.task
    }

    /// The tasks whose outputs are passed positionally, in declaration order.
    pub fn inputs(&self) -> &[Handle] {
        &self.0.inputs
    }

    pub fn name(&self) -> Option<&str> {
        self.0.name.as_deref()
    }

    /// Explicit name if one was given, otherwise the task's own name.
    pub fn label(&self) -> Cow<'_, str> {
        match self.name() {
            Some(name) => Cow::Borrowed(name),
            None => self.0.task.name(),
        }
    }

    fn addr(&self) -> usize {
        Arc::as_ptr(&self.0) as usize
    }
}

impl PartialEq for Dependency {
    fn eq(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.0, &other.0)
    }
}

impl Eq for Dependency {}

impl Hash for Dependency {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.addr().hash(state);
    }
}

impl Debug for Dependency {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Dependency")
            .field("label", &self.label())
            .field("inputs", &self.0.inputs.len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::task;

    #[test]
    fn identity_is_per_dependency() {
        let t = task::from_fn("t", |_, _| Ok(()));
        let a = Dependency::source(&t);
        let b = Dependency::source(&t);

        assert_eq!(a, a.clone());
        assert_ne!(a, b);
    }

    #[test]
    fn inputs_keep_declaration_order() {
        let x = task::from_fn("x", |_, _| Ok(()));
        let y = task::from_fn("y", |_, _| Ok(()));
        let z = task::from_fn("z", |_, _| Ok(()));

        let dep = Dependency::new(&z, [&y, &x, &y]);
        assert_eq!(dep.inputs(), &[y.clone(), x, y]);
    }

    #[test]
    fn label_prefers_explicit_name() {
        let t = task::from_fn("task name", |_, _| Ok(()));

        assert_eq!(Dependency::source(&t).label(), "task name");
        assert_eq!(Dependency::source(&t).named("node").label(), "node");
    }
}
