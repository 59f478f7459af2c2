use std::collections::BTreeSet;
use std::sync::Mutex;

/// Allocator over the fixed host-port range handed to workers.
///
/// A port is held by at most one live session; release is idempotent so the
/// cleanup path can run more than once without corrupting the pool.
pub struct PortAllocator {
    lo: u16,
    hi: u16,
    used: Mutex<BTreeSet<u16>>,
}

impl PortAllocator {
    pub fn new(lo: u16, hi: u16) -> Self {
        Self {
            lo,
            hi,
            used: Mutex::new(BTreeSet::new()),
        }
    }

    /// Lowest free port in the range, or `None` when the pool is exhausted.
    pub fn allocate(&self) -> Option<u16> {
        let mut used = self.used.lock().unwrap();
        for port in self.lo..=self.hi {
            if !used.contains(&port) {
                used.insert(port);
                return Some(port);
            }
        }
        None
    }

    /// Return a port to the pool. Releasing a free port is a no-op.
    pub fn release(&self, port: u16) {
        self.used.lock().unwrap().remove(&port);
    }

    pub fn in_use(&self) -> usize {
        self.used.lock().unwrap().len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    #[test]
    fn allocates_lowest_free_first() {
        let pool = PortAllocator::new(4300, 4302);
        assert_eq!(pool.allocate(), Some(4300));
        assert_eq!(pool.allocate(), Some(4301));
        pool.release(4300);
        assert_eq!(pool.allocate(), Some(4300));
    }

    #[test]
    fn exhaustion_returns_none() {
        let pool = PortAllocator::new(4300, 4301);
        assert!(pool.allocate().is_some());
        assert!(pool.allocate().is_some());
        assert_eq!(pool.allocate(), None);
    }

    #[test]
    fn release_is_idempotent() {
        let pool = PortAllocator::new(4300, 4300);
        assert_eq!(pool.allocate(), Some(4300));
        pool.release(4300);
        pool.release(4300);
        assert_eq!(pool.in_use(), 0);
        assert_eq!(pool.allocate(), Some(4300));
    }

    #[test]
    fn single_port_range_has_exactly_one_winner() {
        let pool = Arc::new(PortAllocator::new(4200, 4200));
        let mut handles = Vec::new();
        for _ in 0..8 {
            let pool = Arc::clone(&pool);
            handles.push(std::thread::spawn(move || pool.allocate()));
        }
        let winners: Vec<u16> = handles
            .into_iter()
            .filter_map(|h| h.join().unwrap())
            .collect();
        assert_eq!(winners, vec![4200]);
    }
}
