use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use chrono::TimeDelta;
use parking_lot::Mutex;
use tracing::debug;

use crate::limits::MAX_TEMPLATE_CACHE_SIZE;
use crate::model::{HoursConfig, TimeWindow};

/// Ordered, contiguous windows covering a business's operating hours.
pub type Template = Arc<[TimeWindow]>;

/// Divide `[opening, closing)` into back-to-back windows of `slot_minutes`.
/// A trailing remainder shorter than one slot is not offered.
pub fn build_template(config: &HoursConfig) -> Vec<TimeWindow> {
    let step = TimeDelta::minutes(i64::from(config.slot_minutes));
    let mut windows = Vec::with_capacity(config.window_count());
    if config.slot_minutes == 0 {
        return windows;
    }

    let mut start = config.opening;
    loop {
        let (end, wrapped) = start.overflowing_add_signed(step);
        if wrapped != 0 || end > config.closing {
            break;
        }
        windows.push(TimeWindow::new(start, end));
        start = end;
    }
    windows
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct CacheStats {
    pub hits: u64,
    pub misses: u64,
    pub evictions: u64,
}

struct Entry {
    windows: Template,
    last_used: u64,
}

struct Inner {
    entries: HashMap<HoursConfig, Entry>,
    /// Logical clock; bumped on every access.
    tick: u64,
}

/// Bounded LRU of computed templates keyed by hours configuration.
///
/// Misses compute outside the lock; two concurrent misses on the same key may
/// both compute, and the second insert defers to the first.
pub struct TemplateCache {
    capacity: usize,
    inner: Mutex<Inner>,
    hits: AtomicU64,
    misses: AtomicU64,
    evictions: AtomicU64,
}

impl TemplateCache {
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity: capacity.clamp(1, MAX_TEMPLATE_CACHE_SIZE),
            inner: Mutex::new(Inner {
                entries: HashMap::new(),
                tick: 0,
            }),
            hits: AtomicU64::new(0),
            misses: AtomicU64::new(0),
            evictions: AtomicU64::new(0),
        }
    }

    pub fn get(&self, config: &HoursConfig) -> Template {
        if let Some(windows) = self.lookup(config) {
            self.hits.fetch_add(1, Ordering::Relaxed);
            metrics::counter!(crate::observability::TEMPLATE_CACHE_HITS_TOTAL).increment(1);
            return windows;
        }

        self.misses.fetch_add(1, Ordering::Relaxed);
        metrics::counter!(crate::observability::TEMPLATE_CACHE_MISSES_TOTAL).increment(1);
        let computed: Template = build_template(config).into();

        let mut guard = self.inner.lock();
        let inner = &mut *guard;
        inner.tick += 1;
        if let Some(entry) = inner.entries.get_mut(config) {
            entry.last_used = inner.tick;
            return entry.windows.clone();
        }

        if inner.entries.len() >= self.capacity
            && let Some(victim) = inner
                .entries
                .iter()
                .min_by_key(|(_, e)| e.last_used)
                .map(|(k, _)| *k)
        {
            inner.entries.remove(&victim);
            self.evictions.fetch_add(1, Ordering::Relaxed);
            metrics::counter!(crate::observability::TEMPLATE_CACHE_EVICTIONS_TOTAL).increment(1);
            debug!(?victim, "template evicted");
        }

        inner.entries.insert(
            *config,
            Entry {
                windows: computed.clone(),
                last_used: inner.tick,
            },
        );
        metrics::gauge!(crate::observability::TEMPLATE_CACHE_ENTRIES)
            .set(inner.entries.len() as f64);
        computed
    }

    fn lookup(&self, config: &HoursConfig) -> Option<Template> {
        let mut guard = self.inner.lock();
        let inner = &mut *guard;
        inner.tick += 1;
        let entry = inner.entries.get_mut(config)?;
        entry.last_used = inner.tick;
        Some(entry.windows.clone())
    }

    /// Whether `config` is cached. Does not count as a use.
    pub fn contains(&self, config: &HoursConfig) -> bool {
        self.inner.lock().entries.contains_key(config)
    }

    pub fn len(&self) -> usize {
        self.inner.lock().entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn stats(&self) -> CacheStats {
        CacheStats {
            hits: self.hits.load(Ordering::Relaxed),
            misses: self.misses.load(Ordering::Relaxed),
            evictions: self.evictions.load(Ordering::Relaxed),
        }
    }
}
