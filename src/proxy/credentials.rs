//! Credential pool
//!
//! Holds the upstream credentials and hands out one per request, chosen
//! uniformly at random. The pool is immutable once built and is shared
//! read-only across connections.

use std::fmt;
use std::sync::Arc;

use rand::Rng;

/// Source of uniform indices, injectable so selection can be made
/// deterministic.
pub trait RandomSource: Send + Sync {
    /// Returns an index in `0..len`. `len` is never zero.
    fn pick(&self, len: usize) -> usize;
}

/// Production source backed by the thread-local RNG.
#[derive(Debug, Default, Clone, Copy)]
pub struct ThreadRandom;

impl RandomSource for ThreadRandom {
    fn pick(&self, len: usize) -> usize {
        rand::thread_rng().gen_range(0..len)
    }
}

/// Split a comma-separated list, trimming entries and dropping blanks.
pub fn parse_credential_list(raw: &str) -> Vec<String> {
    raw.split(',')
        .map(str::trim)
        .filter(|key| !key.is_empty())
        .map(str::to_string)
        .collect()
}

#[derive(Clone)]
pub struct CredentialPool {
    credentials: Arc<[String]>,
    random: Arc<dyn RandomSource>,
}

impl CredentialPool {
    /// Build a pool using the thread-local RNG.
    ///
    /// Entries are trimmed and blanks are discarded.
    pub fn new<I, S>(credentials: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        Self::with_random_source(credentials, Arc::new(ThreadRandom))
    }

    pub fn with_random_source<I, S>(credentials: I, random: Arc<dyn RandomSource>) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let credentials: Vec<String> = credentials
            .into_iter()
            .map(|c| c.as_ref().trim().to_string())
            .filter(|c| !c.is_empty())
            .collect();

        Self {
            credentials: credentials.into(),
            random,
        }
    }

    /// An empty pool; requests pass through without credential injection.
    pub fn empty() -> Self {
        Self::new(std::iter::empty::<&str>())
    }

    /// Pick one credential, or `None` when the pool is empty.
    pub fn select(&self) -> Option<&str> {
        match self.credentials.len() {
            0 => None,
            1 => Some(self.credentials[0].as_str()),
            len => {
                // Clamp so a misbehaving source cannot index out of range.
                let index = self.random.pick(len).min(len - 1);
                Some(self.credentials[index].as_str())
            }
        }
    }

    pub fn len(&self) -> usize {
        self.credentials.len()
    }

    pub fn is_empty(&self) -> bool {
        self.credentials.is_empty()
    }
}

impl fmt::Debug for CredentialPool {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CredentialPool")
            .field("len", &self.credentials.len())
            .finish_non_exhaustive()
    }
}
