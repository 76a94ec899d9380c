//! All the task related abstractions.
//!
//! A [`Task`] is an opaque unit of work. The workflow never looks inside a
//! task, it only hands it the outputs of its declared inputs (positionally,
//! through [`Inputs`]) together with the per-call [`Options`] registered for
//! it, and stores whatever comes back.
//!
//! ## Type erasure
//!
//! Outputs travel through the graph as [`Dynamic`] values, the same way every
//! node of the graph can produce a different type. Most users implement
//! [`TypedTask`] instead of [`Task`]; a blanket implementation bridges the
//! two and performs the erasure.
//!
//! ## Identity
//!
//! Tasks are compared by identity, never by structure. A [`Handle`] wraps the
//! task in an `Arc` and two handles are equal only when they point at the
//! very same allocation.

use std::any::{Any, type_name};
use std::borrow::Cow;
use std::fmt::Debug;
use std::hash::{Hash, Hasher};
use std::sync::Arc;

use crate::error::InputError;
use crate::options::Options;

/// A type-erased, thread-safe task output.
pub type Dynamic = Arc<dyn Any + Send + Sync>;

/// Result from a single executed task.
pub type TaskResult<T> = anyhow::Result<T, anyhow::Error>;

/// The type-erased foundation for every node in a workflow.
pub trait Task: Send + Sync {
    /// Human readable name used in errors, logs and graph exports.
    fn name(&self) -> Cow<'_, str> {
        Cow::Borrowed(type_name::<Self>())
    }

    /// Name of the produced type, only used for introspection.
    fn output_type_name(&self) -> &'static str {
        "?"
    }

    fn execute(&self, inputs: Inputs<'_>, options: &Options) -> TaskResult<Dynamic>;
}

/// A task with a concrete output type.
pub trait TypedTask: Send + Sync {
    type Output: Send + Sync + 'static;

    fn name(&self) -> Cow<'_, str> {
        Cow::Borrowed(type_name::<Self>())
    }

    fn execute(&self, inputs: Inputs<'_>, options: &Options) -> TaskResult<Self::Output>;
}

// A blanket implementation to automatically bridge the two. This is where the
// type erasure actually happens.
impl<T> Task for T
where
    T: TypedTask,
{
    fn name(&self) -> Cow<'_, str> {
        T::name(self)
    }

    fn output_type_name(&self) -> &'static str {
        type_name::<T::Output>()
    }

    fn execute(&self, inputs: Inputs<'_>, options: &Options) -> TaskResult<Dynamic> {
        Ok(Arc::new(T::execute(self, inputs, options)?))
    }
}

/// Positional view over the outputs of a task's declared inputs, in the order
/// they were declared.
#[derive(Clone, Copy)]
pub struct Inputs<'a> {
    values: &'a [Dynamic],
}

impl<'a> Inputs<'a> {
    pub(crate) fn new(values: &'a [Dynamic]) -> Self {
        Self { values }
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    /// The raw, type-erased output at `index`.
    pub fn raw(&self, index: usize) -> Option<&'a Dynamic> {
        self.values.get(index)
    }

    /// Reads the output at `index` as `T`.
    pub fn get<T: 'static>(&self, index: usize) -> Result<&'a T, InputError> {
        let value = self.values.get(index).ok_or(InputError::OutOfRange {
            index,
            len: self.values.len(),
        })?;

        value.downcast_ref::<T>().ok_or(InputError::WrongType {
            index,
            expected: type_name::<T>(),
        })
    }

    /// Reads every input as `T`, useful for aggregators taking any number of
    /// inputs.
    pub fn iter<T: 'static>(&self) -> impl Iterator<Item = Result<&'a T, InputError>> + 'a {
        let values = self.values;
        (0..values.len()).map(move |index| Inputs { values }.get::<T>(index))
    }

    /// Collects every input as `T`, failing on the first mismatch.
    pub fn all<T: 'static>(&self) -> Result<Vec<&'a T>, InputError> {
        self.iter::<T>().collect()
    }
}

impl Debug for Inputs<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "Inputs({})", self.values.len())
    }
}

/// A cloneable token identifying a task by identity.
///
/// The handle keeps the task alive for as long as any workflow refers to it.
#[derive(Clone)]
pub struct Handle(Arc<dyn Task>);

impl Handle {
    pub fn new<T: Task + 'static>(task: T) -> Self {
        Self(Arc::new(task))
    }

    pub fn from_arc(task: Arc<dyn Task>) -> Self {
        Self(task)
    }

    pub fn name(&self) -> Cow<'_, str> {
        self.0.name()
    }

    pub fn task(&self) -> &dyn Task {
        self.0.as_ref()
    }

    pub(crate) fn addr(&self) -> usize {
        Arc::as_ptr(&self.0) as *const () as usize
    }
}

impl PartialEq for Handle {
    fn eq(&self, other: &Self) -> bool {
        self.addr() == other.addr()
    }
}

impl Eq for Handle {}

impl Hash for Handle {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.addr().hash(state);
    }
}

impl Debug for Handle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "Handle({} @ {:#x})", self.name(), self.addr())
    }
}

/// Task built from a closure, see [`from_fn`].
pub struct FnTask<F, R> {
    name: Cow<'static, str>,
    func: F,
    _phantom: std::marker::PhantomData<fn() -> R>,
}

impl<F, R> TypedTask for FnTask<F, R>
where
    F: Fn(Inputs<'_>, &Options) -> TaskResult<R> + Send + Sync,
    R: Send + Sync + 'static,
{
    type Output = R;

    fn name(&self) -> Cow<'_, str> {
        Cow::Borrowed(self.name.as_ref())
    }

    fn execute(&self, inputs: Inputs<'_>, options: &Options) -> TaskResult<R> {
        (self.func)(inputs, options)
    }
}

/// Wraps a closure into a task handle.
///
/// ```rust
/// use kumiki::task;
///
/// let double = task::from_fn("double", |inputs, _| Ok(inputs.get::<i64>(0)? * 2));
/// assert_eq!(double.name(), "double");
/// ```
pub fn from_fn<F, R>(name: impl Into<Cow<'static, str>>, func: F) -> Handle
where
    F: Fn(Inputs<'_>, &Options) -> TaskResult<R> + Send + Sync + 'static,
    R: Send + Sync + 'static,
{
    Handle::new(FnTask {
        name: name.into(),
        func,
        _phantom: std::marker::PhantomData,
    })
}
