//! Management channel cache.
//!
//! Opening a management channel is slow (TLS, credentials), so channels are
//! kept per endpoint and shared. A caller obtains a channel with
//! [`ChannelCache::acquire`] and holds the returned [`ChannelGuard`] for the
//! duration of its call. Dropping the guard releases it; [`ChannelGuard::fault`]
//! releases it and evicts the channel so the next acquisition reconnects.

use std::collections::HashMap;
use std::ops::Deref;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use tracing::{debug, warn};

use crate::error::ManagementResult;

/// Cache statistics.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct ChannelStats {
    /// Channels currently cached.
    pub cached: usize,
    /// Guards currently held.
    pub in_use: usize,
    /// Channels opened over the cache lifetime.
    pub opened: u64,
    /// Channels evicted after a fault.
    pub evicted: u64,
}

pub struct ChannelCache<C: ?Sized> {
    channels: Mutex<HashMap<String, Arc<C>>>,
    in_use: AtomicU64,
    opened: AtomicU64,
    evicted: AtomicU64,
}

impl<C: ?Sized> Default for ChannelCache<C> {
    fn default() -> Self {
        Self::new()
    }
}

impl<C: ?Sized> ChannelCache<C> {
    pub fn new() -> Self {
        Self {
            channels: Mutex::new(HashMap::new()),
            in_use: AtomicU64::new(0),
            opened: AtomicU64::new(0),
            evicted: AtomicU64::new(0),
        }
    }

    /// Borrow the channel for `endpoint`, opening it with `open` if none is
    /// cached. Opening happens under the cache lock, so concurrent callers
    /// never open the same endpoint twice.
    pub fn acquire<F>(&self, endpoint: &str, open: F) -> ManagementResult<ChannelGuard<'_, C>>
    where
        F: FnOnce(&str) -> ManagementResult<Arc<C>>,
    {
        let mut channels = self.lock();
        let channel = match channels.get(endpoint) {
            Some(channel) => channel.clone(),
            None => {
                let channel = open(endpoint)?;
                self.opened.fetch_add(1, Ordering::Relaxed);
                debug!(%endpoint, "management channel opened");
                channels.insert(endpoint.to_string(), channel.clone());
                channel
            }
        };
        drop(channels);

        self.in_use.fetch_add(1, Ordering::Relaxed);
        Ok(ChannelGuard {
            cache: self,
            endpoint: endpoint.to_string(),
            channel,
            faulted: false,
        })
    }

    /// Drop the cached channel for `endpoint`. Guards already handed out keep
    /// their channel until released.
    pub fn invalidate(&self, endpoint: &str) -> bool {
        self.lock().remove(endpoint).is_some()
    }

    pub fn clear(&self) {
        self.lock().clear();
    }

    pub fn stats(&self) -> ChannelStats {
        ChannelStats {
            cached: self.lock().len(),
            in_use: self.in_use.load(Ordering::Relaxed) as usize,
            opened: self.opened.load(Ordering::Relaxed),
            evicted: self.evicted.load(Ordering::Relaxed),
        }
    }

    fn lock(&self) -> MutexGuard<'_, HashMap<String, Arc<C>>> {
        self.channels.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn release(&self, endpoint: &str, channel: &Arc<C>, faulted: bool) {
        self.in_use.fetch_sub(1, Ordering::Relaxed);
        if !faulted {
            return;
        }
        let mut channels = self.lock();
        // Only evict if nobody replaced the channel in the meantime.
        if channels
            .get(endpoint)
            .is_some_and(|cached| Arc::ptr_eq(cached, channel))
        {
            channels.remove(endpoint);
            self.evicted.fetch_add(1, Ordering::Relaxed);
            warn!(%endpoint, "management channel faulted, evicted");
        }
    }
}

/// A channel borrowed from a [`ChannelCache`]; released on drop.
pub struct ChannelGuard<'a, C: ?Sized> {
    cache: &'a ChannelCache<C>,
    endpoint: String,
    channel: Arc<C>,
    faulted: bool,
}

impl<C: ?Sized> ChannelGuard<'_, C> {
    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }

    /// Owned handle to the channel, usable beyond the guard's borrow.
    pub fn handle(&self) -> Arc<C> {
        self.channel.clone()
    }

    /// Release the guard and evict the channel from the cache.
    pub fn fault(mut self) {
        self.faulted = true;
    }
}

impl<C: ?Sized> Deref for ChannelGuard<'_, C> {
    type Target = C;

    fn deref(&self) -> &C {
        &self.channel
    }
}

impl<C: ?Sized> Drop for ChannelGuard<'_, C> {
    fn drop(&mut self) {
        self.cache.release(&self.endpoint, &self.channel, self.faulted);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ManagementError;
    use std::thread;

    #[derive(Debug)]
    struct Channel(u64);

    fn opener(counter: &AtomicU64) -> impl FnOnce(&str) -> ManagementResult<Arc<Channel>> + '_ {
        move |_| Ok(Arc::new(Channel(counter.fetch_add(1, Ordering::SeqCst))))
    }

    #[test]
    fn acquire_reuses_cached_channel() {
        let cache = ChannelCache::new();
        let counter = AtomicU64::new(0);

        let first = cache.acquire("mgmt.local", opener(&counter)).unwrap();
        let second = cache.acquire("mgmt.local", opener(&counter)).unwrap();
        assert_eq!(first.0, second.0);
        assert_eq!(cache.stats().in_use, 2);

        drop(first);
        drop(second);
        let stats = cache.stats();
        assert_eq!((stats.cached, stats.in_use, stats.opened), (1, 0, 1));
    }

    #[test]
    fn endpoints_get_separate_channels() {
        let cache = ChannelCache::new();
        let counter = AtomicU64::new(0);
        let a = cache.acquire("east", opener(&counter)).unwrap();
        let b = cache.acquire("west", opener(&counter)).unwrap();
        assert_ne!(a.0, b.0);
        assert_eq!(b.endpoint(), "west");
    }

    #[test]
    fn fault_evicts_and_next_acquire_reconnects() {
        let cache = ChannelCache::new();
        let counter = AtomicU64::new(0);

        cache.acquire("mgmt.local", opener(&counter)).unwrap().fault();
        assert_eq!(cache.stats().cached, 0);
        assert_eq!(cache.stats().evicted, 1);

        let fresh = cache.acquire("mgmt.local", opener(&counter)).unwrap();
        assert_eq!(fresh.0, 1);
    }

    #[test]
    fn stale_fault_keeps_replacement() {
        let cache = ChannelCache::new();
        let counter = AtomicU64::new(0);

        let stale = cache.acquire("mgmt.local", opener(&counter)).unwrap();
        assert!(cache.invalidate("mgmt.local"));
        let replacement = cache.acquire("mgmt.local", opener(&counter)).unwrap();
        stale.fault();

        assert_eq!(cache.stats().cached, 1);
        assert_eq!(cache.stats().evicted, 0);
        drop(replacement);
        assert_eq!(cache.acquire("mgmt.local", opener(&counter)).unwrap().0, 1);
    }

    #[test]
    fn open_failure_caches_nothing() {
        let cache: ChannelCache<Channel> = ChannelCache::new();
        let err = cache
            .acquire("mgmt.local", |endpoint| {
                Err(ManagementError::Connect {
                    endpoint: endpoint.to_string(),
                    reason: "refused".to_string(),
                })
            })
            .err()
            .unwrap();
        assert!(matches!(err, ManagementError::Connect { .. }));
        assert_eq!(cache.stats(), ChannelStats::default());
    }

    #[test]
    fn concurrent_acquire_opens_once() {
        let cache = Arc::new(ChannelCache::new());
        let counter = Arc::new(AtomicU64::new(0));
        let handles: Vec<_> = (0..8)
            .map(|_| {
                let cache = cache.clone();
                let counter = counter.clone();
                thread::spawn(move || {
                    let guard = cache.acquire("mgmt.local", opener(&counter)).unwrap();
                    guard.0
                })
            })
            .collect();
        for handle in handles {
            assert_eq!(handle.join().unwrap(), 0);
        }
        assert_eq!(counter.load(Ordering::SeqCst), 1);
    }
}
