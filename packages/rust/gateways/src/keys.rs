//! API-key rotation by least usage.
//!
//! [`KeyPool`] is a min-priority queue keyed by usage count: [`KeyPool::next`]
//! hands out the least-used key and [`KeyPool::record_use`] bumps its count.
//! [`KeyPool::checkout`] does both under one lock, so concurrent callers spread
//! across keys. Ties go to the key loaded first.

use std::collections::BTreeSet;

use parking_lot::Mutex;

#[derive(Debug)]
struct Inner {
    keys: Vec<String>,
    counts: Vec<u64>,
    /// `(count, index)` for every key; the first element is the least used.
    queue: BTreeSet<(u64, usize)>,
}

impl Inner {
    fn bump(&mut self, idx: usize) {
        let count = self.counts[idx];
        self.queue.remove(&(count, idx));
        self.counts[idx] = count + 1;
        self.queue.insert((count + 1, idx));
    }
}

/// Thread-safe pool of API keys.
#[derive(Debug)]
pub struct KeyPool {
    inner: Mutex<Inner>,
}

/// Usage snapshot for one key.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KeyStats {
    /// Masked key, safe to log.
    pub hint: String,
    pub uses: u64,
}

impl KeyPool {
    /// Build a pool from `keys`, dropping blanks and duplicates.
    pub fn new<I, S>(keys: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let mut unique: Vec<String> = Vec::new();
        for key in keys {
            let key = key.into().trim().to_string();
            if !key.is_empty() && !unique.contains(&key) {
                unique.push(key);
            }
        }
        let queue = (0..unique.len()).map(|idx| (0, idx)).collect();
        let counts = vec![0; unique.len()];
        Self {
            inner: Mutex::new(Inner {
                keys: unique,
                counts,
                queue,
            }),
        }
    }

    /// Load keys from `<prefix>1`, `<prefix>2`, ... stopping at the first
    /// variable that is not set. Set but empty variables are skipped.
    pub fn from_env(prefix: &str) -> Self {
        Self::from_lookup(prefix, |name| std::env::var(name).ok())
    }

    /// Like [`KeyPool::from_env`] with a custom variable lookup.
    pub fn from_lookup(prefix: &str, lookup: impl Fn(&str) -> Option<String>) -> Self {
        let mut keys = Vec::new();
        for n in 1.. {
            match lookup(&format!("{prefix}{n}")) {
                Some(value) => keys.push(value),
                None => break,
            }
        }
        let pool = Self::new(keys);
        tracing::info!(keys = pool.len(), prefix, "loaded API keys");
        pool
    }

    pub fn len(&self) -> usize {
        self.inner.lock().keys.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// The least-used key, or `None` when the pool is empty.
    pub fn next(&self) -> Option<String> {
        let inner = self.inner.lock();
        inner
            .queue
            .first()
            .map(|&(_, idx)| inner.keys[idx].clone())
    }

    /// Take the least-used key and count one request against it.
    pub fn checkout(&self) -> Option<String> {
        let mut inner = self.inner.lock();
        let &(_, idx) = inner.queue.first()?;
        inner.bump(idx);
        Some(inner.keys[idx].clone())
    }

    /// Count one request against `key`. Unknown keys are ignored.
    pub fn record_use(&self, key: &str) {
        let mut inner = self.inner.lock();
        if let Some(idx) = inner.keys.iter().position(|k| k == key) {
            inner.bump(idx);
        }
    }

    /// Usage counts in load order.
    pub fn stats(&self) -> Vec<KeyStats> {
        let inner = self.inner.lock();
        inner
            .keys
            .iter()
            .zip(&inner.counts)
            .map(|(key, &uses)| KeyStats {
                hint: mask(key),
                uses,
            })
            .collect()
    }

    /// Zero every usage count.
    pub fn reset(&self) {
        let mut inner = self.inner.lock();
        let len = inner.keys.len();
        inner.counts = vec![0; len];
        inner.queue = (0..len).map(|idx| (0, idx)).collect();
    }
}

fn mask(key: &str) -> String {
    let tail: String = key
        .chars()
        .rev()
        .take(4)
        .collect::<Vec<_>>()
        .into_iter()
        .rev()
        .collect();
    format!("***{tail}")
}
