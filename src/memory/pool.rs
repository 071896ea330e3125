//! Host allocator pool.
//!
//! Freed host regions are cached per element type and element count and
//! handed out again on a matching allocation. The pool is the only state
//! shared between independent graphs and sits behind a mutex.

use crate::numeric::Numeric;
use once_cell::sync::Lazy;
use serde::Deserialize;
use std::any::{Any, TypeId};
use std::collections::HashMap;
use std::mem::size_of;
use std::sync::{Mutex, PoisonError};

const DEFAULT_MAX_CACHED_BYTES: usize = 1 << 30;

/// Configuration of the host allocator pool.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct PoolConfig {
    /// Upper bound on the bytes kept alive by cached regions.
    pub max_cached_bytes: usize,
    /// When false every free returns memory to the system immediately.
    pub enabled: bool,
}

impl Default for PoolConfig {
    fn default() -> Self {
        PoolConfig {
            max_cached_bytes: DEFAULT_MAX_CACHED_BYTES,
            enabled: true,
        }
    }
}

impl PoolConfig {
    /// Reads `TAPEGRAD_POOL_MAX_BYTES` and `TAPEGRAD_POOL_DISABLED`,
    /// falling back to the defaults for missing or malformed values.
    pub fn from_env() -> Self {
        let mut config = PoolConfig::default();
        if let Some(bytes) = std::env::var("TAPEGRAD_POOL_MAX_BYTES")
            .ok()
            .and_then(|value| value.trim().parse().ok())
        {
            config.max_cached_bytes = bytes;
        }
        if let Ok(value) = std::env::var("TAPEGRAD_POOL_DISABLED") {
            config.enabled = !matches!(value.trim(), "1" | "true" | "yes");
        }
        config
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PoolStatistics {
    pub cached_bytes: usize,
    pub cached_regions: usize,
    pub hits: usize,
    pub misses: usize,
}

type RegionKey = (TypeId, usize);

pub(crate) struct HostPool {
    config: PoolConfig,
    regions: HashMap<RegionKey, Vec<Box<dyn Any + Send>>>,
    statistics: PoolStatistics,
}

impl HostPool {
    pub(crate) fn new(config: PoolConfig) -> Self {
        HostPool {
            config,
            regions: HashMap::new(),
            statistics: PoolStatistics::default(),
        }
    }

    pub(crate) fn acquire<N: Numeric>(&mut self, count: usize) -> Vec<N> {
        let key = (TypeId::of::<N>(), count);
        let recycled = self
            .regions
            .get_mut(&key)
            .and_then(|cached| cached.pop())
            .and_then(|region| region.downcast::<Vec<N>>().ok());

        match recycled {
            Some(region) => {
                self.statistics.hits += 1;
                self.statistics.cached_regions -= 1;
                self.statistics.cached_bytes -= count * size_of::<N>();
                tracing::trace!(count, "reusing cached host region");
                *region
            }
            None => {
                self.statistics.misses += 1;
                vec![N::ZERO; count]
            }
        }
    }

    pub(crate) fn release<N: Numeric>(&mut self, region: Vec<N>) {
        let count = region.len();
        let bytes = count * size_of::<N>();
        if !self.config.enabled || count == 0 || self.statistics.cached_bytes + bytes > self.config.max_cached_bytes {
            tracing::trace!(count, "returning host region to the system");
            return;
        }

        self.regions
            .entry((TypeId::of::<N>(), count))
            .or_insert_with(Vec::new)
            .push(Box::new(region));
        self.statistics.cached_regions += 1;
        self.statistics.cached_bytes += bytes;
    }

    pub(crate) fn configure(&mut self, config: PoolConfig) {
        self.config = config;
        if !config.enabled || self.statistics.cached_bytes > config.max_cached_bytes {
            self.clear();
        }
    }

    pub(crate) fn clear(&mut self) {
        self.regions.clear();
        self.statistics.cached_bytes = 0;
        self.statistics.cached_regions = 0;
    }

    pub(crate) fn statistics(&self) -> PoolStatistics {
        self.statistics
    }
}

static POOL: Lazy<Mutex<HostPool>> = Lazy::new(|| Mutex::new(HostPool::new(PoolConfig::from_env())));

fn with_pool<R>(f: impl FnOnce(&mut HostPool) -> R) -> R {
    let mut pool = POOL.lock().unwrap_or_else(PoisonError::into_inner);
    f(&mut pool)
}

pub(crate) fn acquire<N: Numeric>(count: usize) -> Vec<N> {
    with_pool(|pool| pool.acquire(count))
}

pub(crate) fn release<N: Numeric>(region: Vec<N>) {
    with_pool(|pool| pool.release(region))
}

/// Replaces the configuration of the global host pool. Cached regions
/// are dropped when the new configuration cannot hold them.
pub fn configure_pool(config: PoolConfig) {
    with_pool(|pool| pool.configure(config))
}

/// Drops every cached region of the global host pool.
pub fn clear_pool() {
    with_pool(|pool| pool.clear())
}

pub fn pool_statistics() -> PoolStatistics {
    with_pool(|pool| pool.statistics())
}
