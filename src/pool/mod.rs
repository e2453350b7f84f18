//! Object Pools
//!
//! Free-list recycling for Session and Message instances. Ownership is
//! strict: exactly one owner holds an instance between `acquire` and
//! `release`. Every instance is reset on acquire, so no state can leak
//! from a previous owner even if a release path forgot to clean up.

use std::sync::Mutex;

/// Types that can be recycled through a [`Pool`].
pub trait Reusable: Default + Send {
    /// Clear all state carried over from a previous owner.
    fn reset(&mut self);
}

/// A synchronized free list of reusable instances.
pub struct Pool<T: Reusable> {
    items: Mutex<Vec<T>>,
}

impl<T: Reusable> Pool<T> {
    /// Create an empty pool.
    pub fn new() -> Self {
        Self {
            items: Mutex::new(Vec::new()),
        }
    }

    /// Take an instance from the pool, or construct a fresh one if the
    /// pool is empty. The instance is reset before it is handed out.
    pub fn acquire(&self) -> T {
        let mut item = {
            let mut items = self.items.lock().unwrap();
            items.pop().unwrap_or_default()
        };
        item.reset();
        item
    }

    /// Return an instance to the pool.
    pub fn release(&self, item: T) {
        let mut items = self.items.lock().unwrap();
        items.push(item);
    }

    /// Number of idle instances currently held.
    pub fn idle(&self) -> usize {
        self.items.lock().unwrap().len()
    }
}

impl<T: Reusable> Default for Pool<T> {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Default)]
    struct Scratch {
        data: Vec<u8>,
        generation: u32,
    }

    impl Reusable for Scratch {
        fn reset(&mut self) {
            self.data.clear();
            self.generation = 0;
        }
    }

    #[test]
    fn test_acquire_from_empty_pool() {
        let pool: Pool<Scratch> = Pool::new();
        let item = pool.acquire();
        assert!(item.data.is_empty());
        assert_eq!(pool.idle(), 0);
    }

    #[test]
    fn test_release_and_recycle() {
        let pool: Pool<Scratch> = Pool::new();

        let mut item = pool.acquire();
        item.data.extend_from_slice(b"stale state");
        item.generation = 9;
        pool.release(item);
        assert_eq!(pool.idle(), 1);

        // Recycled instance must carry nothing over.
        let item = pool.acquire();
        assert!(item.data.is_empty());
        assert_eq!(item.generation, 0);
        assert_eq!(pool.idle(), 0);
    }
}
