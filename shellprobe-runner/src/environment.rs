use std::collections::BTreeMap;
use std::ffi::{OsStr, OsString};

/// A frozen copy of process environment variables handed to child processes
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Environment {
    vars: BTreeMap<OsString, OsString>,
}

impl Environment {
    /// Clone every variable of the current process.
    pub fn snapshot() -> Self {
        Self {
            vars: std::env::vars_os().collect(),
        }
    }

    pub fn empty() -> Self {
        Self::default()
    }

    pub fn with_var<K, V>(mut self, key: K, value: V) -> Self
    where
        K: AsRef<OsStr>,
        V: AsRef<OsStr>,
    {
        self.set(key, value);
        self
    }

    pub fn set<K, V>(&mut self, key: K, value: V)
    where
        K: AsRef<OsStr>,
        V: AsRef<OsStr>,
    {
        self.vars
            .insert(key.as_ref().to_os_string(), value.as_ref().to_os_string());
    }

    pub fn get<K: AsRef<OsStr>>(&self, key: K) -> Option<&OsStr> {
        self.vars.get(key.as_ref()).map(|v| v.as_os_str())
    }

    pub fn len(&self) -> usize {
        self.vars.len()
    }

    pub fn is_empty(&self) -> bool {
        self.vars.is_empty()
    }

    /// Variables in key order
    pub fn iter(&self) -> impl Iterator<Item = (&OsStr, &OsStr)> {
        self.vars.iter().map(|(k, v)| (k.as_os_str(), v.as_os_str()))
    }
}
