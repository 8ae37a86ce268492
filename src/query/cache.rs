use std::any::Any;
use std::sync::Arc;
use std::time::{Duration, Instant};

/// Type-erased value stored by the query client. Shared so a whole entry can
/// be snapshotted regardless of the type it holds.
pub(crate) type AnyValue = Arc<dyn Any + Send + Sync>;

/// A cached value with its fetch time and staleness.
#[derive(Debug, Clone, PartialEq)]
pub struct CacheEntry<T> {
    pub data: T,
    pub fetched_at: Instant,
    pub is_stale: bool,
}

impl<T> CacheEntry<T> {
    /// Creates a fresh entry for `data`, fetched now.
    pub fn new(data: T) -> Self {
        Self {
            data,
            fetched_at: Instant::now(),
            is_stale: false,
        }
    }

    /// Checks whether this entry is stale under `stale_time`, latching the flag.
    pub fn check_staleness(&mut self, stale_time: Duration) -> bool {
        if self.fetched_at.elapsed() > stale_time {
            self.is_stale = true;
        }
        self.is_stale
    }

    /// Marks this entry as stale.
    pub const fn mark_stale(&mut self) {
        self.is_stale = true;
    }

    /// Checks if this entry should be garbage collected based on cache time.
    pub fn should_gc(&self, cache_time: Duration) -> bool {
        self.fetched_at.elapsed() > cache_time
    }

    /// Replaces the data, keeping the fetch metadata.
    pub fn with_data<U>(&self, data: U) -> CacheEntry<U> {
        CacheEntry {
            data,
            fetched_at: self.fetched_at,
            is_stale: self.is_stale,
        }
    }
}

impl CacheEntry<AnyValue> {
    /// Returns a typed copy of this entry, or `None` if it holds another type.
    pub(crate) fn downcast<T: Clone + 'static>(&self) -> Option<CacheEntry<T>> {
        self.data
            .downcast_ref::<T>()
            .map(|data| self.with_data(data.clone()))
    }
}

impl<T: Send + Sync + 'static> CacheEntry<T> {
    /// Erases the value type for storage.
    pub(crate) fn erase(self) -> CacheEntry<AnyValue> {
        let data: AnyValue = Arc::new(self.data);
        CacheEntry {
            data,
            fetched_at: self.fetched_at,
            is_stale: self.is_stale,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::thread::sleep;

    #[test]
    fn test_new_entry() {
        let entry = CacheEntry::new(42);
        assert_eq!(entry.data, 42);
        assert!(!entry.is_stale);
    }

    #[test]
    fn test_check_staleness() {
        let mut entry = CacheEntry::new(42);
        assert!(!entry.check_staleness(Duration::from_secs(1)));

        sleep(Duration::from_millis(10));
        assert!(entry.check_staleness(Duration::from_millis(5)));
        // Latched even under a longer stale time
        assert!(entry.check_staleness(Duration::from_secs(60)));
    }

    #[test]
    fn test_should_gc() {
        let entry = CacheEntry::new("x");
        assert!(!entry.should_gc(Duration::from_secs(60)));
        sleep(Duration::from_millis(10));
        assert!(entry.should_gc(Duration::from_millis(5)));
    }

    #[test]
    fn test_erase_and_downcast() {
        let mut entry = CacheEntry::new(vec![1, 2]);
        entry.mark_stale();
        let fetched_at = entry.fetched_at;

        let erased = entry.erase();
        let typed = erased.downcast::<Vec<i32>>().expect("same type");
        assert_eq!(typed.data, vec![1, 2]);
        assert!(typed.is_stale);
        assert_eq!(typed.fetched_at, fetched_at);

        assert!(erased.downcast::<String>().is_none());
    }

    #[test]
    fn test_erased_entry_clones_share_value() {
        let erased = CacheEntry::new("kept".to_string()).erase();
        let copy = erased.clone();

        assert!(Arc::ptr_eq(&erased.data, &copy.data));
        assert_eq!(copy.fetched_at, erased.fetched_at);
        assert_eq!(
            copy.downcast::<String>().map(|entry| entry.data),
            Some("kept".to_string())
        );
    }
}
