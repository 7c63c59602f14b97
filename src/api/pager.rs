use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::time::Duration;
use tracing::{debug, info, warn};

use crate::error::FetchError;
use crate::utils::config::FetchSettings;

/// One record exactly as the catalog returned it.
pub type RawRecord = Map<String, Value>;

/// What a single page request produced.
#[derive(Debug, Clone, PartialEq)]
pub enum PageOutcome {
    Records(Vec<RawRecord>),
    RateLimited,
}

/// Anything that can serve numbered pages of catalog records.
pub trait PageSource {
    fn fetch_page(
        &self,
        classification: &str,
        page: u32,
        page_size: u32,
    ) -> Result<PageOutcome, FetchError>;
}

pub trait Sleeper {
    fn sleep(&self, duration: Duration);
}

pub struct ThreadSleeper;

impl Sleeper for ThreadSleeper {
    fn sleep(&self, duration: Duration) {
        if !duration.is_zero() {
            std::thread::sleep(duration);
        }
    }
}

/// Receives the collected fraction of the target after each page.
pub trait Progress {
    fn update(&self, fraction: f64);
}

/// The result of one collection run, handed explicitly to the store writer.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CollectedBatch {
    pub classification: String,
    pub records: Vec<RawRecord>,
    pub pages_fetched: u32,
    #[serde(skip)]
    pub error: Option<FetchError>,
}

impl CollectedBatch {
    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }
}

/// Pages through `source` until `target` records are collected, the source
/// runs dry, or a request fails. Failures keep whatever was already collected.
pub fn collect_batch<S: PageSource + ?Sized>(
    source: &S,
    sleeper: &dyn Sleeper,
    progress: &dyn Progress,
    settings: &FetchSettings,
    classification: &str,
    target: usize,
) -> CollectedBatch {
    let mut records: Vec<RawRecord> = Vec::with_capacity(target.min(10_000));
    let mut page: u32 = 1;
    let mut attempt: u32 = 0;
    let mut pages_fetched = 0;
    let mut error = None;

    while records.len() < target {
        match source.fetch_page(classification, page, settings.page_size) {
            Ok(PageOutcome::RateLimited) => {
                if attempt + 1 >= settings.max_attempts {
                    warn!("Page {} still rate limited after {} attempts, giving up", page, attempt + 1);
                    error = Some(FetchError::RateLimited { attempts: attempt + 1 });
                    break;
                }
                let delay = settings.backoff_delay(attempt);
                debug!("Page {} rate limited, retrying in {:?}", page, delay);
                sleeper.sleep(delay);
                attempt += 1;
            }
            Ok(PageOutcome::Records(chunk)) => {
                attempt = 0;
                if chunk.is_empty() {
                    info!("Source exhausted at page {} with {} records", page, records.len());
                    break;
                }
                debug!("Page {}: {} records", page, chunk.len());
                records.extend(chunk);
                pages_fetched += 1;
                page += 1;
                progress.update((records.len() as f64 / target as f64).min(1.0));
                sleeper.sleep(settings.page_pause);
            }
            Err(e) => {
                warn!("Fetch stopped at page {}: {}", page, e);
                error = Some(e);
                break;
            }
        }
    }

    records.truncate(target);

    CollectedBatch {
        classification: classification.to_string(),
        records,
        pages_fetched,
        error,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::cell::{Cell, RefCell};
    use std::collections::VecDeque;

    /// Replays scripted replies and remembers which pages were asked for.
    struct ScriptedSource {
        replies: RefCell<VecDeque<Result<PageOutcome, FetchError>>>,
        requested: RefCell<Vec<u32>>,
    }

    impl ScriptedSource {
        fn new(replies: Vec<Result<PageOutcome, FetchError>>) -> Self {
            Self {
                replies: RefCell::new(replies.into()),
                requested: RefCell::new(Vec::new()),
            }
        }
    }

    impl PageSource for ScriptedSource {
        fn fetch_page(&self, _: &str, page: u32, _: u32) -> Result<PageOutcome, FetchError> {
            self.requested.borrow_mut().push(page);
            self.replies
                .borrow_mut()
                .pop_front()
                .unwrap_or(Ok(PageOutcome::Records(Vec::new())))
        }
    }

    #[derive(Default)]
    struct RecordingSleeper {
        slept: RefCell<Vec<Duration>>,
    }

    impl Sleeper for RecordingSleeper {
        fn sleep(&self, duration: Duration) {
            self.slept.borrow_mut().push(duration);
        }
    }

    struct NoProgress;

    impl Progress for NoProgress {
        fn update(&self, _fraction: f64) {}
    }

    #[derive(Default)]
    struct RecordingProgress {
        last: Cell<f64>,
        calls: Cell<usize>,
    }

    impl Progress for RecordingProgress {
        fn update(&self, fraction: f64) {
            self.last.set(fraction);
            self.calls.set(self.calls.get() + 1);
        }
    }

    fn page(start: i64, count: i64) -> Result<PageOutcome, FetchError> {
        let records = (start..start + count)
            .map(|id| json!({ "id": id }).as_object().cloned().unwrap())
            .collect();
        Ok(PageOutcome::Records(records))
    }

    fn ids(batch: &CollectedBatch) -> Vec<i64> {
        batch.records.iter().map(|r| r["id"].as_i64().unwrap()).collect()
    }

    #[test]
    fn test_collects_exact_target_in_page_order() {
        let source = ScriptedSource::new(vec![page(1, 100), page(101, 100), page(201, 100), page(301, 50)]);
        let sleeper = RecordingSleeper::default();
        let progress = RecordingProgress::default();
        let settings = FetchSettings::default();

        let batch = collect_batch(&source, &sleeper, &progress, &settings, "Coins", 250);

        assert_eq!(batch.len(), 250);
        assert_eq!(ids(&batch), (1..=250).collect::<Vec<_>>());
        assert_eq!(*source.requested.borrow(), vec![1, 2, 3]);
        assert_eq!(batch.pages_fetched, 3);
        assert_eq!(*sleeper.slept.borrow(), vec![settings.page_pause; 3]);
        assert_eq!(progress.calls.get(), 3);
        assert_eq!(progress.last.get(), 1.0);
        assert!(batch.error.is_none());
        assert_eq!(batch.classification, "Coins");
    }

    #[test]
    fn test_stops_when_source_exhausted() {
        let source = ScriptedSource::new(vec![page(1, 100), page(101, 100), page(201, 120), page(321, 0)]);
        let sleeper = RecordingSleeper::default();
        let progress = RecordingProgress::default();

        let batch = collect_batch(&source, &sleeper, &progress, &FetchSettings::default(), "Paintings", 500);

        assert_eq!(batch.len(), 320);
        assert!(batch.error.is_none());
        assert_eq!(*source.requested.borrow(), vec![1, 2, 3, 4]);
        assert!((progress.last.get() - 0.64).abs() < 1e-9);
    }

    #[test]
    fn test_rate_limit_retries_same_page_with_backoff() {
        let source = ScriptedSource::new(vec![
            page(1, 100),
            Ok(PageOutcome::RateLimited),
            Ok(PageOutcome::RateLimited),
            page(101, 100),
        ]);
        let sleeper = RecordingSleeper::default();
        let settings = FetchSettings::default();

        let batch = collect_batch(&source, &sleeper, &NoProgress, &settings, "Coins", 200);

        assert_eq!(ids(&batch), (1..=200).collect::<Vec<_>>());
        assert_eq!(*source.requested.borrow(), vec![1, 2, 2, 2]);
        assert_eq!(
            *sleeper.slept.borrow(),
            vec![
                settings.page_pause,
                Duration::from_secs(1),
                Duration::from_secs(2),
                settings.page_pause,
            ]
        );
        assert!(batch.error.is_none());
    }

    #[test]
    fn test_rate_limit_gives_up_after_max_attempts() {
        let mut replies = vec![page(1, 100)];
        replies.extend((0..10).map(|_| Ok(PageOutcome::RateLimited)));
        let source = ScriptedSource::new(replies);
        let sleeper = RecordingSleeper::default();
        let settings = FetchSettings {
            max_attempts: 3,
            ..FetchSettings::default()
        };

        let batch = collect_batch(&source, &sleeper, &NoProgress, &settings, "Coins", 300);

        assert_eq!(batch.len(), 100);
        assert_eq!(batch.error, Some(FetchError::RateLimited { attempts: 3 }));
        assert_eq!(*source.requested.borrow(), vec![1, 2, 2, 2]);
    }

    #[test]
    fn test_hard_error_keeps_partial_records() {
        let source = ScriptedSource::new(vec![page(1, 100), Err(FetchError::Status(500)), page(101, 100)]);
        let sleeper = RecordingSleeper::default();

        let batch = collect_batch(&source, &sleeper, &NoProgress, &FetchSettings::default(), "Prints", 300);

        assert_eq!(batch.len(), 100);
        assert_eq!(batch.error, Some(FetchError::Status(500)));
        assert_eq!(*source.requested.borrow(), vec![1, 2]);
    }

    #[test]
    fn test_zero_target_sends_no_request() {
        let source = ScriptedSource::new(vec![page(1, 100)]);

        let batch = collect_batch(&source, &ThreadSleeper, &NoProgress, &FetchSettings::default(), "Coins", 0);

        assert!(batch.is_empty());
        assert!(source.requested.borrow().is_empty());
    }

    #[test]
    fn test_batch_roundtrips_through_json_without_error() -> anyhow::Result<()> {
        let source = ScriptedSource::new(vec![page(1, 3), Err(FetchError::Status(503))]);
        let batch = collect_batch(&source, &RecordingSleeper::default(), &NoProgress, &FetchSettings::default(), "Coins", 10);
        assert!(batch.error.is_some());

        let text = serde_json::to_string(&batch)?;
        let loaded: CollectedBatch = serde_json::from_str(&text)?;
        assert_eq!(ids(&loaded), vec![1, 2, 3]);
        assert_eq!(loaded.pages_fetched, 1);
        assert!(loaded.error.is_none());
        Ok(())
    }
}
