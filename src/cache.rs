//! Cache for the combined measurement.
//!
//! Holds the most recent result of the expensive combined probe so one
//! system call serves every fast-cadence sensor in a tick. Refreshes are
//! single-flight: the probe runs under the lock, and a caller that waited
//! out someone else's refresh reuses that result instead of probing again.

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use tokio::sync::Mutex;
use tracing::debug;

use crate::error::ProbeError;
use crate::measurement::Measurement;
use crate::probe::MetricSource;

/// Outcome of a cache read.
#[derive(Debug)]
pub enum CacheLookup {
    /// A measurement younger than the freshness window.
    Fresh(Measurement),
    /// The stored measurement aged out; the caller should refresh.
    Stale,
    /// Nothing sampled yet for that probe.
    Missing,
}

pub struct MeasurementCache {
    /// Freshness window: 1.5x the fast interval, so one delayed tick does
    /// not already count as stale.
    ttl: Duration,
    /// Bumped after every completed refresh; read before waiting on the
    /// lock so a waiter can tell a refresh finished in the meantime.
    epoch: AtomicU64,
    current: Mutex<Option<Measurement>>,
}

impl MeasurementCache {
    pub fn new(fast_interval: Duration) -> Self {
        Self {
            ttl: fast_interval * 3 / 2,
            epoch: AtomicU64::new(0),
            current: Mutex::new(None),
        }
    }

    /// Last measurement for `probe`, if still within the freshness window.
    pub async fn get(&self, probe: &str) -> CacheLookup {
        let current = self.current.lock().await;
        match &*current {
            Some(m) if m.probe == probe => {
                if m.age() <= self.ttl {
                    CacheLookup::Fresh(m.clone())
                } else {
                    CacheLookup::Stale
                }
            }
            _ => CacheLookup::Missing,
        }
    }

    /// Run the combined probe and atomically replace the stored
    /// measurement. Concurrent callers are serialized; whoever waited out
    /// an in-flight refresh gets that refresh's measurement back rather
    /// than starting a duplicate probe.
    pub async fn refresh(&self, source: &dyn MetricSource) -> Result<Measurement, ProbeError> {
        let epoch_seen = self.epoch.load(Ordering::Acquire);
        let mut current = self.current.lock().await;

        if self.epoch.load(Ordering::Acquire) != epoch_seen {
            if let Some(m) = &*current {
                debug!("refresh completed while waiting, reusing measurement");
                return Ok(m.clone());
            }
        }

        let measurement = source.sample_fast().await?;
        *current = Some(measurement.clone());
        self.epoch.fetch_add(1, Ordering::Release);
        Ok(measurement)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::probe::FixedSource;
    use std::collections::BTreeMap;
    use std::sync::Arc;
    use std::time::Instant;

    fn measurement(cpu_idle: f64) -> Measurement {
        Measurement::new(cpu_idle, BTreeMap::new())
    }

    #[tokio::test]
    async fn get_reports_missing_then_fresh() {
        let cache = MeasurementCache::new(Duration::from_secs(10));
        assert!(matches!(cache.get("iostat").await, CacheLookup::Missing));

        let source = FixedSource::new(measurement(80.0));
        cache.refresh(&source).await.unwrap();
        match cache.get("iostat").await {
            CacheLookup::Fresh(m) => assert_eq!(m.cpu_idle, 80.0),
            other => panic!("expected fresh measurement, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn aged_out_measurement_is_stale() {
        let cache = MeasurementCache::new(Duration::from_secs(10));
        let source = FixedSource::new(measurement(80.0));
        cache.refresh(&source).await.unwrap();

        // Backdate the stored measurement past the freshness window.
        {
            let mut current = cache.current.lock().await;
            let m = current.as_mut().unwrap();
            m.taken_at = Instant::now() - Duration::from_secs(60);
        }

        assert!(matches!(cache.get("iostat").await, CacheLookup::Stale));
    }

    #[tokio::test]
    async fn concurrent_refreshes_run_the_probe_once() {
        let cache = Arc::new(MeasurementCache::new(Duration::from_secs(10)));
        let source = Arc::new(
            FixedSource::new(measurement(50.0)).with_sample_delay(Duration::from_millis(50)),
        );

        let mut handles = Vec::new();
        for _ in 0..4 {
            let cache = Arc::clone(&cache);
            let source = Arc::clone(&source);
            handles.push(tokio::spawn(async move {
                cache.refresh(source.as_ref()).await.unwrap()
            }));
        }

        let mut results = Vec::new();
        for handle in handles {
            results.push(handle.await.unwrap());
        }

        // One probe served everyone, and all callers saw its measurement.
        assert_eq!(source.sample_count(), 1);
        for m in &results {
            assert_eq!(m.cpu_idle, 50.0);
        }
    }

    #[tokio::test]
    async fn sequential_refreshes_probe_again() {
        let cache = MeasurementCache::new(Duration::from_secs(10));
        let source = FixedSource::new(measurement(50.0));

        let first = cache.refresh(&source).await.unwrap();
        let second = cache.refresh(&source).await.unwrap();
        assert_eq!(source.sample_count(), 2);
        assert_ne!(first.cpu_idle, second.cpu_idle);
    }
}
