//! Per-user traffic counters with consuming reads

use dashmap::DashMap;
use std::sync::atomic::{AtomicU64, Ordering};

/// Counters for one tag-qualified user key
#[derive(Debug, Default)]
struct TrafficData {
    upload_bytes: AtomicU64,
    download_bytes: AtomicU64,
}

/// Traffic counters keyed by `tag|email|uid`.
///
/// `take` swaps both counters to zero, so every recorded byte is returned by
/// exactly one `take`. Writes racing with a `take` land in the next one.
#[derive(Debug, Default)]
pub struct TrafficCounters {
    counters: DashMap<String, TrafficData>,
}

impl TrafficCounters {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record upload bytes (client -> remote)
    pub fn record_upload(&self, key: &str, bytes: u64) {
        self.entry(key).upload_bytes.fetch_add(bytes, Ordering::Relaxed);
    }

    /// Record download bytes (remote -> client)
    pub fn record_download(&self, key: &str, bytes: u64) {
        self.entry(key).download_bytes.fetch_add(bytes, Ordering::Relaxed);
    }

    fn entry(&self, key: &str) -> dashmap::mapref::one::RefMut<'_, String, TrafficData> {
        if let Some(entry) = self.counters.get_mut(key) {
            return entry;
        }
        self.counters.entry(key.to_string()).or_default()
    }

    /// Read and reset the `(upload, download)` counters of `key`
    pub fn take(&self, key: &str) -> (u64, u64) {
        let taken = match self.counters.get(key) {
            Some(entry) => {
                let data = entry.value();
                (
                    data.upload_bytes.swap(0, Ordering::AcqRel),
                    data.download_bytes.swap(0, Ordering::AcqRel),
                )
            }
            None => return (0, 0),
        };

        // The shard lock held by remove_if keeps writers out while checking.
        self.counters.remove_if(key, |_, data| {
            data.upload_bytes.load(Ordering::Relaxed) == 0
                && data.download_bytes.load(Ordering::Relaxed) == 0
        });

        taken
    }

    /// Read without resetting
    pub fn peek(&self, key: &str) -> (u64, u64) {
        self.counters
            .get(key)
            .map(|entry| {
                let data = entry.value();
                (
                    data.upload_bytes.load(Ordering::Relaxed),
                    data.download_bytes.load(Ordering::Relaxed),
                )
            })
            .unwrap_or((0, 0))
    }

    /// Drop every counter whose key starts with `prefix`
    pub fn purge_prefix(&self, prefix: &str) {
        self.counters.retain(|key, _| !key.starts_with(prefix));
    }

    /// Number of keys with pending traffic
    pub fn len(&self) -> usize {
        self.counters.len()
    }

    pub fn is_empty(&self) -> bool {
        self.counters.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    #[test]
    fn test_record_and_take() {
        let counters = TrafficCounters::new();
        counters.record_upload("T_1|a|1", 100);
        counters.record_download("T_1|a|1", 200);
        counters.record_upload("T_1|a|1", 50);

        assert_eq!(counters.peek("T_1|a|1"), (150, 200));
        assert_eq!(counters.take("T_1|a|1"), (150, 200));
    }

    #[test]
    fn test_take_consumes_once() {
        let counters = TrafficCounters::new();
        counters.record_upload("k", 10);

        assert_eq!(counters.take("k"), (10, 0));
        assert_eq!(counters.take("k"), (0, 0));
        assert!(counters.is_empty());
    }

    #[test]
    fn test_take_unknown_key() {
        let counters = TrafficCounters::new();
        assert_eq!(counters.take("missing"), (0, 0));
    }

    #[test]
    fn test_purge_prefix() {
        let counters = TrafficCounters::new();
        counters.record_upload("V2ray_443|a|1", 1);
        counters.record_upload("V2ray_4430|b|2", 1);
        counters.record_upload("Trojan_443|c|3", 1);

        counters.purge_prefix("V2ray_443|");
        assert_eq!(counters.len(), 2);
        assert_eq!(counters.peek("V2ray_4430|b|2"), (1, 0));
    }

    #[test]
    fn test_concurrent_writes_with_take_lose_nothing() {
        use std::thread;

        let counters = Arc::new(TrafficCounters::new());
        let mut writers = vec![];
        for _ in 0..4 {
            let c = Arc::clone(&counters);
            writers.push(thread::spawn(move || {
                for _ in 0..1000 {
                    c.record_upload("k", 1);
                    c.record_download("k", 2);
                }
            }));
        }

        let c = Arc::clone(&counters);
        let reader = thread::spawn(move || {
            let mut total = (0u64, 0u64);
            for _ in 0..50 {
                let (u, d) = c.take("k");
                total.0 += u;
                total.1 += d;
                thread::yield_now();
            }
            total
        });

        for w in writers {
            w.join().unwrap();
        }
        let (mut up, mut down) = reader.join().unwrap();
        let (u, d) = counters.take("k");
        up += u;
        down += d;

        assert_eq!(up, 4000);
        assert_eq!(down, 8000);
    }
}
