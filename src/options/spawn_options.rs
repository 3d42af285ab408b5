//! Ordered option set handed to the node on its command line.

/// Ordered mapping of option name to optional value.
///
/// A `None` value is a bare flag. Re-inserting an existing key updates the
/// value in place and keeps the key's original position, so the argument
/// order stays stable across merges.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SpawnOptions {
    entries: Vec<(String, Option<String>)>,
}

impl SpawnOptions {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Builder form of [`SpawnOptions::insert`] with a value.
    #[must_use]
    pub fn with(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.insert(key, Some(value.into()));
        self
    }

    /// Builder form of [`SpawnOptions::insert`] for a bare flag.
    #[must_use]
    pub fn with_flag(mut self, key: impl Into<String>) -> Self {
        self.insert(key, None);
        self
    }

    /// Insert or update an option.
    pub fn insert(&mut self, key: impl Into<String>, value: Option<String>) {
        let key = key.into();
        if let Some(slot) = self.entries.iter_mut().find(|(k, _)| *k == key) {
            slot.1 = value;
        } else {
            self.entries.push((key, value));
        }
    }

    /// Overlay every entry of `other`, in its order.
    pub fn extend(&mut self, other: &SpawnOptions) {
        for (key, value) in other.iter() {
            self.insert(key, value.map(str::to_string));
        }
    }

    /// Remove an option, returning its value slot if it was present.
    pub fn remove(&mut self, key: &str) -> Option<Option<String>> {
        let index = self.entries.iter().position(|(k, _)| k == key)?;
        Some(self.entries.remove(index).1)
    }

    #[must_use]
    pub fn contains(&self, key: &str) -> bool {
        self.entries.iter().any(|(k, _)| k == key)
    }

    /// Value of `key`, `None` when absent or a bare flag.
    #[must_use]
    pub fn value(&self, key: &str) -> Option<&str> {
        self.entries
            .iter()
            .find(|(k, _)| k == key)
            .and_then(|(_, v)| v.as_deref())
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, Option<&str>)> {
        self.entries.iter().map(|(k, v)| (k.as_str(), v.as_deref()))
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Flatten into `--key [value]` arguments, in insertion order.
    ///
    /// Empty values are treated like bare flags.
    #[must_use]
    pub fn to_argv(&self) -> Vec<String> {
        let mut args = Vec::with_capacity(self.entries.len() * 2);
        for (key, value) in &self.entries {
            args.push(format!("--{key}"));
            if let Some(value) = value.as_deref().filter(|v| !v.is_empty()) {
                args.push(value.to_string());
            }
        }
        args
    }
}

impl<K: Into<String>> FromIterator<(K, Option<String>)> for SpawnOptions {
    fn from_iter<I: IntoIterator<Item = (K, Option<String>)>>(iter: I) -> Self {
        let mut options = Self::new();
        for (key, value) in iter {
            options.insert(key, value);
        }
        options
    }
}
