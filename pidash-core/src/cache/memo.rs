//! Memoization over an explicitly passed [`TieredCache`].
//!
//! Keys are built from the function name and its stringified arguments:
//! `"{prefix}{name}:pos1:pos2:k1=v1:k2=v2"`, keywords sorted. `:`, `=` and
//! `\` inside arguments are backslash-escaped. Only `Ok(Some(_))` results
//! are stored, so failures and empty results are recomputed on every call.

use super::tiered::TieredCache;
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::collections::BTreeMap;
use std::fmt::Display;
use std::sync::Arc;
use std::time::Duration;

/// Arguments that identify one memoized call.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CallArgs {
    positional: Vec<String>,
    keyword: BTreeMap<String, String>,
}

impl CallArgs {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn arg(mut self, value: impl Display) -> Self {
        self.positional.push(value.to_string());
        self
    }

    pub fn kwarg(mut self, name: impl Into<String>, value: impl Display) -> Self {
        self.keyword.insert(name.into(), value.to_string());
        self
    }

    fn render(&self, out: &mut String) {
        for value in &self.positional {
            out.push(':');
            push_escaped(out, value);
        }
        for (name, value) in &self.keyword {
            out.push(':');
            push_escaped(out, name);
            out.push('=');
            push_escaped(out, value);
        }
    }
}

fn push_escaped(out: &mut String, text: &str) {
    for c in text.chars() {
        if matches!(c, ':' | '=' | '\\') {
            out.push('\\');
        }
        out.push(c);
    }
}

pub struct Memoizer<V> {
    cache: Arc<TieredCache<V>>,
    ttl: Duration,
    key_prefix: String,
}

impl<V> Memoizer<V>
where
    V: Serialize + DeserializeOwned + Clone,
{
    pub fn new(cache: Arc<TieredCache<V>>, ttl: Duration, key_prefix: impl Into<String>) -> Self {
        Self {
            cache,
            ttl,
            key_prefix: key_prefix.into(),
        }
    }

    pub fn key(&self, name: &str, args: &CallArgs) -> String {
        let mut key = format!("{}{}", self.key_prefix, name);
        args.render(&mut key);
        key
    }

    /// Return the cached result for `(name, args)` or compute it with `f`.
    pub fn call<E, F>(&self, name: &str, args: &CallArgs, f: F) -> Result<Option<V>, E>
    where
        F: FnOnce() -> Result<Option<V>, E>,
    {
        let key = self.key(name, args);
        if let Some(hit) = self.cache.get(&key) {
            return Ok(Some(hit));
        }

        let result = f()?;
        if let Some(value) = &result {
            self.cache.set(key, value.clone(), self.ttl);
        }
        Ok(result)
    }

    pub fn invalidate(&self, name: &str, args: &CallArgs) {
        self.cache.delete(&self.key(name, args));
    }

    pub fn cache(&self) -> &Arc<TieredCache<V>> {
        &self.cache
    }

    pub fn ttl(&self) -> Duration {
        self.ttl
    }
}
