//! Typed result of a gateway read.
//!
//! Callers never see quota failures, but they can always ask which branch of
//! the fallback chain produced their value and how old it is.

use crate::{ReadSource, Timestamp};
use std::time::Duration;

/// A value returned by the read gateway together with its provenance.
#[derive(Debug, Clone, PartialEq)]
pub struct CacheRead<T> {
    value: T,
    source: ReadSource,
    /// When the value was fetched from the store. `None` for defaults.
    cached_at: Option<Timestamp>,
}

impl<T> CacheRead<T> {
    /// Fresh cache hit.
    pub fn fresh(value: T, cached_at: Timestamp) -> Self {
        Self {
            value,
            source: ReadSource::Fresh,
            cached_at: Some(cached_at),
        }
    }

    /// Value just returned by the fetch function.
    pub fn fetched(value: T, fetched_at: Timestamp) -> Self {
        Self {
            value,
            source: ReadSource::Fetched,
            cached_at: Some(fetched_at),
        }
    }

    /// Expired but retained cache entry.
    pub fn stale(value: T, cached_at: Timestamp) -> Self {
        Self {
            value,
            source: ReadSource::Stale,
            cached_at: Some(cached_at),
        }
    }

    /// Declared default for the key.
    pub fn default_value(value: T) -> Self {
        Self {
            value,
            source: ReadSource::Default,
            cached_at: None,
        }
    }

    pub fn into_value(self) -> T {
        self.value
    }

    pub fn value(&self) -> &T {
        &self.value
    }

    pub fn source(&self) -> ReadSource {
        self.source
    }

    pub fn cached_at(&self) -> Option<Timestamp> {
        self.cached_at
    }

    /// Age of the value at `now`; `None` for defaults.
    pub fn staleness(&self, now: Timestamp) -> Option<Duration> {
        self.cached_at.map(|at| {
            now.signed_duration_since(at)
                .to_std()
                .unwrap_or(Duration::ZERO)
        })
    }

    /// Map the inner value to a new type.
    pub fn map<U, F>(self, f: F) -> CacheRead<U>
    where
        F: FnOnce(T) -> U,
    {
        CacheRead {
            value: f(self.value),
            source: self.source,
            cached_at: self.cached_at,
        }
    }
}

impl<T> AsRef<T> for CacheRead<T> {
    fn as_ref(&self) -> &T {
        &self.value
    }
}
