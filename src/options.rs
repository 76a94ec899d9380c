use std::collections::{BTreeMap, HashMap};

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::OptionsError;
use crate::task::Handle;

static EMPTY: Options = Options {
    values: BTreeMap::new(),
};

/// Named, per-call values handed to a single task next to its positional
/// inputs.
///
/// Values are stored as JSON and read back with a concrete type chosen by the
/// task, so a missing or badly shaped option is reported as an
/// [`OptionsError`] instead of a panic.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Options {
    values: BTreeMap<String, Value>,
}

impl Options {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.values.insert(key.into(), value.into());
        self
    }

    /// Like [`Options::with`], for values that only implement `Serialize`.
    pub fn try_with<T>(mut self, key: impl Into<String>, value: &T) -> Result<Self, OptionsError>
    where
        T: Serialize + ?Sized,
    {
        self.insert(key, value)?;
        Ok(self)
    }

    pub fn insert<T>(&mut self, key: impl Into<String>, value: &T) -> Result<(), OptionsError>
    where
        T: Serialize + ?Sized,
    {
        let key = key.into();
        let value = serde_json::to_value(value).map_err(|source| OptionsError::Serialize {
            key: key.clone(),
            source,
        })?;
        self.values.insert(key, value);
        Ok(())
    }

    /// Reads an optional value.
    pub fn get<T: DeserializeOwned>(&self, key: &str) -> Result<Option<T>, OptionsError> {
        self.values
            .get(key)
            .map(|value| {
                T::deserialize(value).map_err(|source| OptionsError::Shape {
                    key: key.to_string(),
                    source,
                })
            })
            .transpose()
    }

    /// Reads a value the task cannot run without.
    pub fn require<T: DeserializeOwned>(&self, key: &str) -> Result<T, OptionsError> {
        self.get(key)?
            .ok_or_else(|| OptionsError::Missing(key.to_string()))
    }

    pub fn raw(&self, key: &str) -> Option<&Value> {
        self.values.get(key)
    }

    pub fn contains(&self, key: &str) -> bool {
        self.values.contains_key(key)
    }

    pub fn keys(&self) -> impl Iterator<Item = &str> {
        self.values.keys().map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }
}

impl<K, V> FromIterator<(K, V)> for Options
where
    K: Into<String>,
    V: Into<Value>,
{
    fn from_iter<I: IntoIterator<Item = (K, V)>>(iter: I) -> Self {
        Self {
            values: iter
                .into_iter()
                .map(|(key, value)| (key.into(), value.into()))
                .collect(),
        }
    }
}

/// Run-time arguments for one call to
/// [`Workflow::execute`](crate::Workflow::execute), keyed by task identity.
///
/// Tasks without an entry receive empty [`Options`]. Entries for tasks that
/// are not part of the workflow are ignored.
#[derive(Debug, Clone, Default)]
pub struct Arguments {
    options: HashMap<Handle, Options>,
}

impl Arguments {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, task: &Handle, options: Options) -> Self {
        self.set(task, options);
        self
    }

    pub fn set(&mut self, task: &Handle, options: Options) -> Option<Options> {
        self.options.insert(task.clone(), options)
    }

    /// Options registered for `task`, or an empty set.
    pub fn options_for(&self, task: &Handle) -> &Options {
        self.options.get(task).unwrap_or(&EMPTY)
    }

    pub fn len(&self) -> usize {
        self.options.len()
    }

    pub fn is_empty(&self) -> bool {
        self.options.is_empty()
    }
}

impl FromIterator<(Handle, Options)> for Arguments {
    fn from_iter<I: IntoIterator<Item = (Handle, Options)>>(iter: I) -> Self {
        Self {
            options: iter.into_iter().collect(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::task;

    #[test]
    fn typed_reads() {
        let options = Options::new()
            .with("value", 5)
            .with("label", "north")
            .try_with("bands", &[1u8, 2, 3])
            .unwrap();

        assert_eq!(options.require::<i64>("value").unwrap(), 5);
        assert_eq!(options.get::<String>("label").unwrap().as_deref(), Some("north"));
        assert_eq!(options.require::<Vec<u8>>("bands").unwrap(), vec![1, 2, 3]);
        assert_eq!(options.get::<i64>("absent").unwrap(), None);
        assert_eq!(options.len(), 3);
        assert_eq!(options.keys().collect::<Vec<_>>(), vec!["bands", "label", "value"]);
        assert!(options.contains("label"));
        assert!(!options.contains("absent"));
        assert_eq!(options.raw("value"), Some(&Value::from(5)));
        assert_eq!(options.raw("absent"), None);
    }

    #[test]
    fn missing_and_misshapen_options() {
        let options = Options::new().with("value", "not a number");

        assert!(matches!(
            options.require::<i64>("other"),
            Err(OptionsError::Missing(key)) if key == "other"
        ));
        assert!(matches!(
            options.require::<i64>("value"),
            Err(OptionsError::Shape { key, .. }) if key == "value"
        ));
    }

    #[test]
    fn options_deserialize_from_json_object() {
        let options: Options = serde_json::from_str(r#"{"value": 3, "scale": 0.5}"#).unwrap();
        assert_eq!(options.require::<f64>("scale").unwrap(), 0.5);
    }

    #[test]
    fn unlisted_tasks_get_empty_options() {
        let listed = task::from_fn("listed", |_, _| Ok(()));
        let unlisted = task::from_fn("unlisted", |_, _| Ok(()));

        let arguments = Arguments::new().with(&listed, Options::new().with("value", 1));

        assert_eq!(arguments.options_for(&listed).len(), 1);
        assert!(arguments.options_for(&unlisted).is_empty());
    }
}
