//! Group of sensors polled together on a fixed interval.

use std::sync::Arc;
use std::sync::atomic::{AtomicU8, Ordering};
use std::time::Duration;

use chrono::Utc;
use futures::future::join_all;
use serde::Serialize;
use strum_macros::{AsRefStr, Display};
use tokio::sync::RwLock;
use tokio::time::{Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;

use super::sensor::SensorRef;
use super::traits::{DEFAULT_INTERVAL, Fetcher, GroupError, Lifecycle, MIN_INTERVAL, ReadingSink};

/// Lifecycle state of a group's collection loop.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Display, AsRefStr)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase")]
#[repr(u8)]
pub enum GroupState {
    /// Constructed, loop not started.
    Created = 0,
    /// Loop is ticking.
    Running = 1,
    /// Loop has exited (or was stopped before it started). Terminal.
    Stopped = 2,
}

impl GroupState {
    fn from_u8(value: u8) -> Self {
        match value {
            0 => Self::Created,
            1 => Self::Running,
            _ => Self::Stopped,
        }
    }
}

/// Serializable snapshot of a group.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct GroupView {
    pub id: String,
    pub state: GroupState,
    pub sensors: Vec<SensorRef>,
}

/// Counters of one collection cycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CycleSummary {
    /// Sensors polled in the cycle.
    pub sensors: usize,
    /// Sensors whose fetch failed.
    pub failed: usize,
    /// Readings delivered to the sink.
    pub readings: usize,
}

/// A named set of sensors with its own collection loop.
///
/// The sensor list may grow while the loop runs; each cycle works on a
/// snapshot taken at the cycle boundary.
pub struct Group {
    id: String,
    sensors: RwLock<Vec<SensorRef>>,
    fetcher: Arc<dyn Fetcher>,
    sink: Arc<dyn ReadingSink>,
    interval: Duration,
    cancel: CancellationToken,
    state: AtomicU8,
}

impl Group {
    /// Create an empty group polling at [`DEFAULT_INTERVAL`].
    pub fn new(
        id: impl Into<String>,
        fetcher: Arc<dyn Fetcher>,
        sink: Arc<dyn ReadingSink>,
    ) -> Self {
        Self {
            id: id.into(),
            sensors: RwLock::new(Vec::new()),
            fetcher,
            sink,
            interval: DEFAULT_INTERVAL,
            cancel: CancellationToken::new(),
            state: AtomicU8::new(GroupState::Created as u8),
        }
    }

    /// Set the polling interval.
    ///
    /// Interval is clamped to a minimum of [`MIN_INTERVAL`].
    pub fn with_interval(mut self, interval: Duration) -> Self {
        if interval < MIN_INTERVAL {
            tracing::warn!(group = %self.id, min_interval = ?MIN_INTERVAL,
                "Interval is less than minimum allowed. Using minimum interval."
            );
            self.interval = MIN_INTERVAL;
        } else {
            self.interval = interval;
        }
        self
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn interval(&self) -> Duration {
        self.interval
    }

    pub fn state(&self) -> GroupState {
        GroupState::from_u8(self.state.load(Ordering::Acquire))
    }

    /// Copy of the current sensor list.
    pub async fn sensors(&self) -> Vec<SensorRef> {
        self.sensors.read().await.clone()
    }

    pub async fn snapshot(&self) -> GroupView {
        GroupView {
            id: self.id.clone(),
            state: self.state(),
            sensors: self.sensors().await,
        }
    }

    /// Append a sensor. It is polled from the next cycle on.
    ///
    /// # Errors
    /// Returns `GroupError::DuplicateSensor` if the id is already taken.
    pub async fn add(&self, sensor: SensorRef) -> Result<(), GroupError> {
        let mut sensors = self.sensors.write().await;
        if sensors.iter().any(|s| s.id() == sensor.id()) {
            return Err(GroupError::DuplicateSensor(sensor.id().to_string()));
        }
        tracing::debug!(group = %self.id, sensor = %sensor, "Sensor added");
        sensors.push(sensor);
        Ok(())
    }

    /// Run the collection loop until [`stop`](Self::stop) is called.
    ///
    /// Meant to be spawned as its own task. The first cycle runs one interval
    /// after the call. A group that was stopped before it ever ran returns
    /// immediately.
    ///
    /// # Errors
    /// Returns `GroupError::AlreadyStarted` if the loop is already running.
    pub async fn run(&self) -> Result<(), GroupError> {
        if let Err(current) = self.state.compare_exchange(
            GroupState::Created as u8,
            GroupState::Running as u8,
            Ordering::AcqRel,
            Ordering::Acquire,
        ) {
            return match GroupState::from_u8(current) {
                GroupState::Stopped => {
                    tracing::debug!(group = %self.id, "Group stopped before start, not running");
                    Ok(())
                }
                _ => Err(GroupError::AlreadyStarted(self.id.clone())),
            };
        }

        tracing::info!(group = %self.id, interval = ?self.interval, "Group collection started");
        self.sink.report_lifecycle(&self.id, Lifecycle::Started);

        let mut ticker = tokio::time::interval_at(Instant::now() + self.interval, self.interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                biased;
                _ = self.cancel.cancelled() => break,
                _ = ticker.tick() => {
                    self.collect_once().await;
                }
            }
        }

        self.state.store(GroupState::Stopped as u8, Ordering::Release);
        self.sink.report_lifecycle(&self.id, Lifecycle::Stopped);
        tracing::info!(group = %self.id, "Group collection stopped");
        Ok(())
    }

    /// Request the collection loop to stop.
    ///
    /// Idempotent. A cycle already in flight finishes and delivers its batch;
    /// no cycle starts afterwards.
    pub fn stop(&self) {
        self.cancel.cancel();
        // Never-started groups become terminal right away.
        let _ = self.state.compare_exchange(
            GroupState::Created as u8,
            GroupState::Stopped as u8,
            Ordering::AcqRel,
            Ordering::Acquire,
        );
    }

    /// Whether a stop was requested.
    pub fn is_stopping(&self) -> bool {
        self.cancel.is_cancelled()
    }

    /// Execute a single collection cycle.
    ///
    /// Fetches every sensor concurrently, waits for all of them and delivers
    /// the successful readings in sensor order. Returns `None` without
    /// touching the sink when the group has no sensors.
    pub async fn collect_once(&self) -> Option<CycleSummary> {
        let sensors = self.sensors().await;
        if sensors.is_empty() {
            tracing::trace!(group = %self.id, "No sensors, skipping cycle");
            return None;
        }

        let collected_at = Utc::now();
        let start = std::time::Instant::now();
        let results = join_all(sensors.iter().map(|sensor| self.fetcher.fetch(sensor))).await;

        let mut batch = Vec::new();
        let mut failed = 0;
        for (sensor, result) in sensors.iter().zip(results) {
            match result {
                Ok(readings) => batch.extend(readings),
                Err(e) => {
                    failed += 1;
                    tracing::warn!(
                        group = %self.id,
                        sensor = %sensor.id(),
                        endpoint = %sensor.endpoint(),
                        error = %e,
                        "Sensor fetch failed"
                    );
                    self.sink.report_failure(&self.id, sensor, &e);
                }
            }
        }

        let summary = CycleSummary {
            sensors: sensors.len(),
            failed,
            readings: batch.len(),
        };
        tracing::debug!(
            group = %self.id,
            sensors = summary.sensors,
            failed = summary.failed,
            readings = summary.readings,
            duration_ms = start.elapsed().as_millis() as u64,
            "Cycle collected"
        );

        self.sink.deliver(&self.id, collected_at, batch).await;
        Some(summary)
    }
}

impl std::fmt::Debug for Group {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Group")
            .field("id", &self.id)
            .field("state", &self.state())
            .field("interval", &self.interval)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::group::testing::{RecordingSink, StubFetcher, reading};
    use crate::group::traits::FetchError;
    use serde_json::json;

    const TICK: Duration = Duration::from_millis(100);

    fn group_with(fetcher: StubFetcher) -> (Arc<Group>, Arc<RecordingSink>) {
        let sink = Arc::new(RecordingSink::default());
        let group = Group::new("g1", Arc::new(fetcher), sink.clone()).with_interval(TICK);
        (Arc::new(group), sink)
    }

    #[tokio::test]
    async fn test_cycle_skips_failed_sensor() {
        let fetcher = StubFetcher::default()
            .respond("a", Ok(vec![reading(json!({"v": 1}))]))
            .respond("b", Err(FetchError::Network("connection refused".into())));
        let (group, sink) = group_with(fetcher);
        group.add(SensorRef::new("a", "http://h1")).await.unwrap();
        group.add(SensorRef::new("b", "http://h2")).await.unwrap();

        let summary = group.collect_once().await.unwrap();
        assert_eq!(
            summary,
            CycleSummary {
                sensors: 2,
                failed: 1,
                readings: 1
            }
        );

        let batches = sink.batches();
        assert_eq!(batches.len(), 1);
        assert_eq!(batches[0].0, "g1");
        assert_eq!(batches[0].1, vec![reading(json!({"v": 1}))]);

        let failures = sink.failures();
        assert_eq!(failures.len(), 1);
        assert_eq!(failures[0].1, "b");
        assert!(failures[0].2.is_network());
    }

    #[tokio::test]
    async fn test_cycle_preserves_sensor_order() {
        let fetcher = StubFetcher::default()
            .respond("s1", Err(FetchError::Decode("bad".into())))
            .respond("s3", Err(FetchError::Timeout(TICK)))
            .delay("s0", Duration::from_millis(80));
        let (group, sink) = group_with(fetcher);
        for i in 0..5 {
            group
                .add(SensorRef::new(format!("s{i}"), "http://h"))
                .await
                .unwrap();
        }

        let summary = group.collect_once().await.unwrap();
        assert_eq!(summary.failed, 2);
        assert_eq!(summary.readings, 3);

        let batches = sink.batches();
        assert_eq!(batches.len(), 1);
        let order: Vec<_> = batches[0]
            .1
            .iter()
            .map(|r| r.get("sensor").unwrap().as_str().unwrap().to_string())
            .collect();
        assert_eq!(order, vec!["s0", "s2", "s4"]);
    }

    #[tokio::test]
    async fn test_all_failed_delivers_empty_batch() {
        let fetcher = StubFetcher::default().respond("a", Err(FetchError::Network("down".into())));
        let (group, sink) = group_with(fetcher);
        group.add(SensorRef::new("a", "http://h1")).await.unwrap();

        group.collect_once().await.unwrap();
        let batches = sink.batches();
        assert_eq!(batches.len(), 1);
        assert!(batches[0].1.is_empty());
    }

    #[tokio::test]
    async fn test_batch_stamped_with_cycle_start() {
        let slow = Duration::from_millis(150);
        let (group, sink) = group_with(StubFetcher::default().delay("a", slow));
        group.add(SensorRef::new("a", "http://h1")).await.unwrap();

        let before = chrono::Utc::now();
        group.collect_once().await.unwrap();
        let after = chrono::Utc::now();

        let stamps = sink.collected_at();
        assert_eq!(stamps.len(), 1);
        assert!(stamps[0] >= before);
        assert!(stamps[0] - before < chrono::Duration::milliseconds(100));
        assert!(after - stamps[0] >= chrono::Duration::milliseconds(150));
    }

    #[tokio::test]
    async fn test_empty_group_never_delivers() {
        let (group, sink) = group_with(StubFetcher::default());
        assert!(group.collect_once().await.is_none());

        let handle = tokio::spawn({
            let group = Arc::clone(&group);
            async move { group.run().await }
        });
        tokio::time::sleep(TICK * 4).await;
        group.stop();
        handle.await.unwrap().unwrap();

        assert!(sink.batches().is_empty());
    }

    #[tokio::test]
    async fn test_run_and_stop_is_bounded() {
        let (group, sink) = group_with(StubFetcher::default());
        group.add(SensorRef::new("a", "http://h1")).await.unwrap();

        let handle = tokio::spawn({
            let group = Arc::clone(&group);
            async move { group.run().await }
        });

        tokio::time::timeout(Duration::from_secs(2), async {
            while sink.batches().len() < 2 {
                tokio::time::sleep(Duration::from_millis(10)).await;
            }
        })
        .await
        .expect("group should deliver batches while running");
        assert_eq!(group.state(), GroupState::Running);

        group.stop();
        tokio::time::timeout(TICK * 2, handle)
            .await
            .expect("run should return within two intervals")
            .unwrap()
            .unwrap();
        assert_eq!(group.state(), GroupState::Stopped);

        let delivered = sink.batches().len();
        tokio::time::sleep(TICK * 3).await;
        assert_eq!(sink.batches().len(), delivered);

        let lifecycle = sink.lifecycle();
        assert_eq!(
            lifecycle,
            vec![
                ("g1".to_string(), Lifecycle::Started),
                ("g1".to_string(), Lifecycle::Stopped)
            ]
        );
    }

    #[tokio::test]
    async fn test_sensor_added_while_running_is_polled() {
        let (group, sink) = group_with(StubFetcher::default());
        group.add(SensorRef::new("a", "http://h1")).await.unwrap();

        let handle = tokio::spawn({
            let group = Arc::clone(&group);
            async move { group.run().await }
        });
        group.add(SensorRef::new("b", "http://h2")).await.unwrap();

        tokio::time::timeout(Duration::from_secs(2), async {
            loop {
                let seen_b = sink
                    .batches()
                    .iter()
                    .any(|(_, batch)| batch.iter().any(|r| r.get("sensor") == Some(&json!("b"))));
                if seen_b {
                    break;
                }
                tokio::time::sleep(Duration::from_millis(10)).await;
            }
        })
        .await
        .expect("appended sensor should be polled");

        group.stop();
        handle.await.unwrap().unwrap();
    }

    #[tokio::test]
    async fn test_concurrent_add_during_run() {
        let (group, _sink) = group_with(StubFetcher::default());
        let runner = tokio::spawn({
            let group = Arc::clone(&group);
            async move { group.run().await }
        });

        let adds: Vec<_> = (0..100)
            .map(|i| {
                let group = Arc::clone(&group);
                tokio::spawn(async move {
                    group
                        .add(SensorRef::new(format!("s{i}"), "http://h"))
                        .await
                })
            })
            .collect();
        for add in adds {
            add.await.unwrap().unwrap();
        }

        let sensors = group.sensors().await;
        assert_eq!(sensors.len(), 100);
        let unique: std::collections::HashSet<_> = sensors.iter().map(|s| s.id()).collect();
        assert_eq!(unique.len(), 100);

        group.stop();
        runner.await.unwrap().unwrap();
    }

    #[tokio::test]
    async fn test_duplicate_sensor_rejected() {
        let (group, _sink) = group_with(StubFetcher::default());
        group.add(SensorRef::new("a", "http://h1")).await.unwrap();
        let err = group
            .add(SensorRef::new("a", "http://other"))
            .await
            .unwrap_err();
        assert_eq!(err, GroupError::DuplicateSensor("a".into()));
        assert_eq!(group.sensors().await.len(), 1);
    }

    #[tokio::test]
    async fn test_run_at_most_once() {
        let (group, _sink) = group_with(StubFetcher::default());
        let handle = tokio::spawn({
            let group = Arc::clone(&group);
            async move { group.run().await }
        });

        tokio::time::sleep(Duration::from_millis(20)).await;
        assert_eq!(
            group.run().await,
            Err(GroupError::AlreadyStarted("g1".into()))
        );

        group.stop();
        group.stop();
        handle.await.unwrap().unwrap();
        assert!(group.is_stopping());
    }

    #[tokio::test]
    async fn test_stop_before_run() {
        let (group, sink) = group_with(StubFetcher::default());
        group.add(SensorRef::new("a", "http://h1")).await.unwrap();

        group.stop();
        assert_eq!(group.state(), GroupState::Stopped);

        tokio::time::timeout(Duration::from_millis(50), group.run())
            .await
            .expect("stopped group should return immediately")
            .unwrap();
        assert!(sink.batches().is_empty());
        assert!(sink.lifecycle().is_empty());
    }

    #[test]
    fn test_interval_minimum() {
        let group = Group::new(
            "g",
            Arc::new(StubFetcher::default()),
            Arc::new(RecordingSink::default()),
        )
        .with_interval(Duration::from_millis(1));
        assert_eq!(group.interval(), MIN_INTERVAL);
    }

    #[tokio::test]
    async fn test_snapshot_serialization() {
        let (group, _sink) = group_with(StubFetcher::default());
        group.add(SensorRef::new("a", "http://h1")).await.unwrap();

        let value = serde_json::to_value(group.snapshot().await).unwrap();
        assert_eq!(
            value,
            json!({
                "id": "g1",
                "state": "created",
                "sensors": [{"id": "a", "endpoint": "http://h1"}]
            })
        );
    }
}
