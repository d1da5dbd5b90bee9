use crate::protocol::{ProgressEvent, ProgressStatus};
use std::collections::BTreeMap;

/// Download state of one artifact
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct ProgressRecord {
    /// Bytes received
    pub loaded: u64,
    /// Total bytes (0 while unknown)
    pub total: u64,
    /// Percent complete (0-100)
    pub percent: f64,
}

/// Aggregates per-artifact download events into an overall percentage
#[derive(Debug, Clone, Default)]
pub struct ProgressTracker {
    records: BTreeMap<String, ProgressRecord>,
}

impl ProgressTracker {
    /// Fold one event into the matching record
    #[allow(clippy::cast_precision_loss)]
    pub fn apply(&mut self, event: &ProgressEvent) {
        match event.status {
            ProgressStatus::Initiate => {
                self.records.insert(
                    event.file.clone(),
                    ProgressRecord {
                        loaded: 0,
                        total: event.total.unwrap_or(0),
                        percent: 0.0,
                    },
                );
            }
            ProgressStatus::Progress => {
                let record = self.records.entry(event.file.clone()).or_default();
                record.loaded = event.loaded.unwrap_or(record.loaded);
                record.total = event.total.unwrap_or(record.total);
                record.percent = match event.progress {
                    Some(percent) => percent.clamp(0.0, 100.0),
                    None if record.total > 0 => {
                        (record.loaded as f64 / record.total as f64 * 100.0).min(100.0)
                    }
                    None => record.percent,
                };
            }
            ProgressStatus::Done | ProgressStatus::Ready => {
                let record = self.records.entry(event.file.clone()).or_default();
                let total = event
                    .total
                    .filter(|&t| t > 0)
                    .or_else(|| (record.total > 0).then_some(record.total))
                    .unwrap_or(record.loaded);
                record.total = total;
                record.loaded = total;
                record.percent = 100.0;
            }
        }
    }

    /// Overall percent complete
    ///
    /// Byte-weighted when any total is known, otherwise the plain average of
    /// per-artifact percentages. 0 with no artifacts.
    #[must_use]
    #[allow(clippy::cast_precision_loss)]
    pub fn overall_percent(&self) -> f64 {
        if self.records.is_empty() {
            return 0.0;
        }

        let total: u64 = self.records.values().map(|r| r.total).sum();
        if total > 0 {
            let loaded: u64 = self.records.values().map(|r| r.loaded.min(r.total)).sum();
            return (loaded as f64 / total as f64 * 100.0).min(100.0);
        }

        self.records.values().map(|r| r.percent).sum::<f64>() / self.records.len() as f64
    }

    /// Record for one artifact
    #[must_use]
    pub fn record(&self, file: &str) -> Option<&ProgressRecord> {
        self.records.get(file)
    }

    /// All records, ordered by artifact name
    pub fn records(&self) -> impl Iterator<Item = (&str, &ProgressRecord)> {
        self.records.iter().map(|(file, record)| (file.as_str(), record))
    }

    /// Number of artifacts seen
    #[must_use]
    pub fn len(&self) -> usize {
        self.records.len()
    }

    /// True when no artifact has been seen
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    /// Forget all artifacts
    pub fn clear(&mut self) {
        self.records.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn event(file: &str, status: ProgressStatus, loaded: Option<u64>, total: Option<u64>) -> ProgressEvent {
        ProgressEvent {
            file: file.to_owned(),
            status,
            name: None,
            progress: None,
            loaded,
            total,
        }
    }

    #[test]
    fn test_initiate_progress_done_ends_at_full() {
        let mut tracker = ProgressTracker::default();
        tracker.apply(&ProgressEvent::initiate("model.onnx"));
        for loaded in [10, 250, 900] {
            tracker.apply(&ProgressEvent::progress("model.onnx", loaded, Some(1000)));
        }
        tracker.apply(&event("model.onnx", ProgressStatus::Done, None, None));

        let record = tracker.record("model.onnx").unwrap();
        assert_eq!(record.loaded, 1000);
        assert_eq!(record.total, 1000);
        assert!((record.percent - 100.0).abs() < f64::EPSILON);
    }

    #[test]
    fn test_initiate_uses_known_total() {
        let mut tracker = ProgressTracker::default();
        tracker.apply(&event("a", ProgressStatus::Initiate, None, Some(64)));

        let record = tracker.record("a").unwrap();
        assert_eq!(record.total, 64);
        assert_eq!(record.loaded, 0);
    }

    #[test]
    fn test_progress_without_percent_is_computed() {
        let mut tracker = ProgressTracker::default();
        tracker.apply(&event("a", ProgressStatus::Progress, Some(25), Some(100)));
        assert!((tracker.record("a").unwrap().percent - 25.0).abs() < f64::EPSILON);
    }

    #[test]
    fn test_overall_is_byte_weighted() {
        let mut tracker = ProgressTracker::default();
        tracker.apply(&ProgressEvent::progress("small", 100, Some(100)));
        tracker.apply(&ProgressEvent::progress("large", 0, Some(900)));

        assert!((tracker.overall_percent() - 10.0).abs() < 1e-9);
    }

    #[test]
    fn test_overall_falls_back_to_average_without_totals() {
        let mut tracker = ProgressTracker::default();
        tracker.apply(&ProgressEvent::initiate("a"));
        tracker.apply(&ProgressEvent::initiate("b"));
        tracker.apply(&event("a", ProgressStatus::Done, None, None));

        assert!((tracker.overall_percent() - 50.0).abs() < 1e-9);
    }

    #[test]
    fn test_overall_empty_is_zero() {
        assert!(ProgressTracker::default().overall_percent().abs() < f64::EPSILON);
    }

    #[test]
    fn test_overall_monotonic_under_forward_progress() {
        let files = [("a", 300), ("b", 1200), ("c", 50)];
        let mut tracker = ProgressTracker::default();
        for (file, total) in files {
            tracker.apply(&event(file, ProgressStatus::Initiate, None, Some(total)));
        }

        let mut last = tracker.overall_percent();
        for step in 1..=10_u64 {
            for (file, total) in files {
                tracker.apply(&ProgressEvent::progress(file, total * step / 10, Some(total)));
                let now = tracker.overall_percent();
                assert!(now >= last, "overall went backwards: {last} -> {now}");
                last = now;
            }
        }
        for (file, total) in files {
            tracker.apply(&ProgressEvent::done(file, Some(total)));
        }
        assert!((tracker.overall_percent() - 100.0).abs() < 1e-9);
    }

    #[test]
    fn test_ready_forces_full_with_loaded_as_total() {
        let mut tracker = ProgressTracker::default();
        tracker.apply(&event("a", ProgressStatus::Progress, Some(42), None));
        tracker.apply(&event("a", ProgressStatus::Ready, None, None));

        let record = tracker.record("a").unwrap();
        assert_eq!(record.total, 42);
        assert_eq!(record.loaded, 42);
    }

    #[test]
    fn test_clear() {
        let mut tracker = ProgressTracker::default();
        tracker.apply(&ProgressEvent::initiate("a"));
        assert_eq!(tracker.len(), 1);

        tracker.clear();
        assert!(tracker.is_empty());
    }
}
