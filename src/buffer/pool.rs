//! Buffer pool and claim-counted handles

use parking_lot::Mutex;
use std::fmt;
use std::ops::Deref;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;

/// Pool statistics snapshot
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PoolStats {
    /// Buffers handed out since the pool was created
    pub rented: u64,
    /// Buffers whose last claim was released
    pub returned: u64,
    /// Buffers currently held by at least one claim
    pub outstanding: u64,
    /// Allocations sitting in the free list
    pub pooled: usize,
}

struct PoolInner {
    free: Mutex<Vec<Vec<u8>>>,
    max_pooled: usize,
    /// Allocations larger than this are not kept for reuse
    max_capacity: usize,
    rented: AtomicU64,
    returned: AtomicU64,
}

impl PoolInner {
    fn give_back(&self, mut data: Vec<u8>) {
        self.returned.fetch_add(1, Ordering::Relaxed);
        if data.capacity() > self.max_capacity {
            return;
        }
        data.clear();
        let mut free = self.free.lock();
        if free.len() < self.max_pooled {
            free.push(data);
        }
    }
}

/// Shared pool of byte buffers
#[derive(Clone)]
pub struct BufferPool {
    inner: Arc<PoolInner>,
}

impl BufferPool {
    /// Pool keeping at most `max_pooled` idle allocations
    pub fn new(max_pooled: usize) -> Self {
        Self::with_max_capacity(max_pooled, 1024 * 1024)
    }

    pub fn with_max_capacity(max_pooled: usize, max_capacity: usize) -> Self {
        Self {
            inner: Arc::new(PoolInner {
                free: Mutex::new(Vec::with_capacity(max_pooled)),
                max_pooled,
                max_capacity,
                rented: AtomicU64::new(0),
                returned: AtomicU64::new(0),
            }),
        }
    }

    /// Copy `src` into a pooled buffer. The returned handle holds the
    /// first claim.
    pub fn rent_copy(&self, src: &[u8]) -> RentedBuffer {
        let mut data = self.inner.free.lock().pop().unwrap_or_default();
        data.extend_from_slice(src);
        self.inner.rented.fetch_add(1, Ordering::Relaxed);

        RentedBuffer {
            inner: Arc::new(RentedInner {
                data,
                claims: AtomicUsize::new(1),
                pool: Arc::clone(&self.inner),
            }),
        }
    }

    pub fn stats(&self) -> PoolStats {
        let rented = self.inner.rented.load(Ordering::Relaxed);
        let returned = self.inner.returned.load(Ordering::Relaxed);
        PoolStats {
            rented,
            returned,
            outstanding: rented.saturating_sub(returned),
            pooled: self.inner.free.lock().len(),
        }
    }
}

impl Default for BufferPool {
    fn default() -> Self {
        Self::new(256)
    }
}

impl fmt::Debug for BufferPool {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BufferPool").field("stats", &self.stats()).finish()
    }
}

struct RentedInner {
    data: Vec<u8>,
    claims: AtomicUsize,
    pool: Arc<PoolInner>,
}

impl Drop for RentedInner {
    fn drop(&mut self) {
        debug_assert_eq!(self.claims.load(Ordering::Acquire), 0);
        let data = std::mem::take(&mut self.data);
        self.pool.give_back(data);
    }
}

/// One claim on a pooled buffer
///
/// Every handle is a claim: [`RentedBuffer::claim`] takes another one and
/// dropping (or [`RentedBuffer::unclaim`]) releases it, so early returns and
/// error paths release automatically. The allocation returns to its pool
/// exactly once, after the final claim is gone.
pub struct RentedBuffer {
    inner: Arc<RentedInner>,
}

impl RentedBuffer {
    /// Take an additional claim for another consumer
    pub fn claim(&self) -> RentedBuffer {
        self.inner.claims.fetch_add(1, Ordering::AcqRel);
        RentedBuffer {
            inner: Arc::clone(&self.inner),
        }
    }

    /// Release this claim
    pub fn unclaim(self) {
        drop(self);
    }

    /// Claims currently outstanding, this one included
    pub fn claims(&self) -> usize {
        self.inner.claims.load(Ordering::Acquire)
    }

    pub fn as_slice(&self) -> &[u8] {
        &self.inner.data
    }

    pub fn len(&self) -> usize {
        self.inner.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.data.is_empty()
    }

    /// Same allocation as `other`
    pub fn ptr_eq(&self, other: &RentedBuffer) -> bool {
        Arc::ptr_eq(&self.inner, &other.inner)
    }
}

impl Drop for RentedBuffer {
    fn drop(&mut self) {
        let previous = self.inner.claims.fetch_sub(1, Ordering::AcqRel);
        debug_assert!(previous > 0, "buffer unclaimed more often than claimed");
    }
}

impl Deref for RentedBuffer {
    type Target = [u8];

    fn deref(&self) -> &[u8] {
        self.as_slice()
    }
}

impl AsRef<[u8]> for RentedBuffer {
    fn as_ref(&self) -> &[u8] {
        self.as_slice()
    }
}

impl fmt::Debug for RentedBuffer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RentedBuffer")
            .field("len", &self.len())
            .field("claims", &self.claims())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::thread;

    #[test]
    fn test_rent_and_return() {
        let pool = BufferPool::new(4);
        let buf = pool.rent_copy(b"hello");
        assert_eq!(&buf[..], b"hello");
        assert_eq!(buf.claims(), 1);
        assert_eq!(pool.stats().outstanding, 1);

        buf.unclaim();
        let stats = pool.stats();
        assert_eq!(stats.returned, 1);
        assert_eq!(stats.outstanding, 0);
        assert_eq!(stats.pooled, 1);

        // The recycled allocation comes back empty
        let again = pool.rent_copy(b"ab");
        assert_eq!(&again[..], b"ab");
        assert_eq!(pool.stats().pooled, 0);
    }

    #[test]
    fn test_returned_only_after_last_claim() {
        let pool = BufferPool::new(4);
        let producer = pool.rent_copy(&[1, 2, 3]);
        let cached = producer.claim();
        let sub_a = producer.claim();
        let sub_b = cached.claim();
        assert_eq!(producer.claims(), 4);

        producer.unclaim();
        sub_a.unclaim();
        cached.unclaim();
        assert_eq!(pool.stats().returned, 0);
        assert_eq!(&sub_b[..], &[1, 2, 3]);

        sub_b.unclaim();
        assert_eq!(pool.stats().returned, 1);
    }

    #[test]
    fn test_claims_across_threads() {
        let pool = BufferPool::new(16);
        for _ in 0..20 {
            let buf = pool.rent_copy(&[7u8; 512]);
            let handles: Vec<_> = (0..8)
                .map(|_| {
                    let claim = buf.claim();
                    thread::spawn(move || {
                        let extra = claim.claim();
                        assert_eq!(extra.len(), 512);
                        drop(extra);
                        claim.unclaim();
                    })
                })
                .collect();
            buf.unclaim();
            for handle in handles {
                handle.join().unwrap();
            }
        }

        let stats = pool.stats();
        assert_eq!(stats.rented, 20);
        assert_eq!(stats.returned, 20);
        assert_eq!(stats.outstanding, 0);
    }

    #[test]
    fn test_pool_bounds() {
        let pool = BufferPool::with_max_capacity(1, 16);
        let big = pool.rent_copy(&[0u8; 64]);
        let a = pool.rent_copy(b"a");
        let b = pool.rent_copy(b"b");
        drop(big);
        assert_eq!(pool.stats().pooled, 0);
        drop(a);
        drop(b);
        assert_eq!(pool.stats().pooled, 1);
        assert_eq!(pool.stats().returned, 3);
    }
}
