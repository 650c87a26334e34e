// src/pipeline/batch.rs

//! Bounded-concurrency download of a resource list into a payload sink.

use chrono::{DateTime, Utc};
use futures::{StreamExt, stream};
use serde::Serialize;

use crate::error::Result;
use crate::models::ResourceRef;
use crate::storage::PayloadSink;
use crate::utils::http::FetchClient;
use crate::utils::progress::item_bar;

/// Counters for one batch run.
#[derive(Debug, Clone, Serialize)]
pub struct BatchReport {
    pub total: usize,
    /// Destinations that already existed; no request was sent for them
    pub skipped: usize,
    /// Resources downloaded by this run
    pub fetched: usize,
    /// Requests sent, retries included
    pub attempts: u64,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
}

enum ItemOutcome {
    Skipped,
    Fetched { attempts: u32 },
}

/// Downloads every resource whose destination is missing.
///
/// Up to `concurrency` downloads are in flight at once and complete in any
/// order. The first failure ends the run: the stream is dropped, which
/// cancels the downloads still in flight, so nothing is stored after it.
pub struct BatchFetcher<'a> {
    client: &'a FetchClient,
    sink: &'a dyn PayloadSink,
    concurrency: usize,
    show_progress: bool,
}

impl<'a> BatchFetcher<'a> {
    pub fn new(client: &'a FetchClient, sink: &'a dyn PayloadSink, concurrency: usize) -> Self {
        Self {
            client,
            sink,
            concurrency: concurrency.max(1),
            show_progress: false,
        }
    }

    pub fn with_progress(mut self, show: bool) -> Self {
        self.show_progress = show;
        self
    }

    pub async fn run(&self, refs: &[ResourceRef]) -> Result<BatchReport> {
        let started_at = Utc::now();
        let progress = item_bar(refs.len() as u64, "Downloading", self.show_progress);

        let mut report = BatchReport {
            total: refs.len(),
            skipped: 0,
            fetched: 0,
            attempts: 0,
            started_at,
            finished_at: started_at,
        };

        let mut items = stream::iter(refs)
            .map(|r| self.process(r))
            .buffer_unordered(self.concurrency);

        while let Some(result) = items.next().await {
            match result {
                Ok(ItemOutcome::Skipped) => report.skipped += 1,
                Ok(ItemOutcome::Fetched { attempts }) => {
                    report.fetched += 1;
                    report.attempts += u64::from(attempts);
                }
                Err(e) => {
                    progress.abandon();
                    log::error!(
                        "Batch aborted after {} of {} items",
                        report.skipped + report.fetched,
                        report.total
                    );
                    return Err(e);
                }
            }
            progress.inc(1);
        }

        progress.finish_and_clear();
        report.finished_at = Utc::now();
        log::info!(
            "Downloaded {} of {} ({} already present, {} requests)",
            report.fetched,
            report.total,
            report.skipped,
            report.attempts
        );
        Ok(report)
    }

    async fn process(&self, r: &ResourceRef) -> Result<ItemOutcome> {
        if self.sink.exists(&r.key).await? {
            log::debug!("{} already present, skipping", r.key);
            return Ok(ItemOutcome::Skipped);
        }

        let fetched = self.client.download(&r.url).await?;
        self.sink.store(&r.key, &fetched.bytes).await?;
        Ok(ItemOutcome::Fetched {
            attempts: fetched.attempts,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::AppError;
    use crate::storage::FileSink;
    use crate::utils::http::tests::fast_config;
    use tempfile::TempDir;
    use wiremock::matchers::{method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn refs(server: &MockServer, keys: &[&str]) -> Vec<ResourceRef> {
        keys.iter()
            .map(|k| ResourceRef::from_url(&format!("{}/tiles/{k}", server.uri())).unwrap())
            .collect()
    }

    async fn serve(server: &MockServer, key: &str, body: &str, hits: u64) {
        Mock::given(method("GET"))
            .and(path(format!("/tiles/{key}")))
            .respond_with(ResponseTemplate::new(200).set_body_string(body))
            .expect(hits)
            .mount(server)
            .await;
    }

    #[tokio::test]
    async fn test_resume_scenario() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/tiles/a.zip"))
            .respond_with(ResponseTemplate::new(503))
            .up_to_n_times(3)
            .with_priority(1)
            .mount(&server)
            .await;
        serve(&server, "a.zip", "A", 1).await;
        serve(&server, "b.zip", "B", 0).await;
        serve(&server, "c.zip", "C", 1).await;

        let tmp = TempDir::new().unwrap();
        std::fs::write(tmp.path().join("b.zip"), b"old B").unwrap();
        let sink = FileSink::new(tmp.path());
        let client = FetchClient::new(&fast_config(5)).unwrap();

        let report = BatchFetcher::new(&client, &sink, 100)
            .run(&refs(&server, &["a.zip", "b.zip", "c.zip"]))
            .await
            .unwrap();

        assert_eq!(report.total, 3);
        assert_eq!(report.skipped, 1);
        assert_eq!(report.fetched, 2);
        assert_eq!(report.attempts, 5);

        let requests = server.received_requests().await.unwrap();
        let a_hits = requests.iter().filter(|r| r.url.path() == "/tiles/a.zip").count();
        assert_eq!(a_hits, 4);

        assert_eq!(std::fs::read(tmp.path().join("a.zip")).unwrap(), b"A");
        assert_eq!(std::fs::read(tmp.path().join("b.zip")).unwrap(), b"old B");
        assert_eq!(std::fs::read(tmp.path().join("c.zip")).unwrap(), b"C");
    }

    #[tokio::test]
    async fn test_rerun_fetches_nothing() {
        let server = MockServer::start().await;
        serve(&server, "x.zip", "X", 1).await;
        serve(&server, "y.zip", "Y", 1).await;

        let tmp = TempDir::new().unwrap();
        let sink = FileSink::new(tmp.path());
        let client = FetchClient::new(&fast_config(2)).unwrap();
        let fetcher = BatchFetcher::new(&client, &sink, 4);
        let list = refs(&server, &["x.zip", "y.zip"]);

        let first = fetcher.run(&list).await.unwrap();
        let second = fetcher.run(&list).await.unwrap();

        assert_eq!(first.fetched, 2);
        assert_eq!(second.fetched, 0);
        assert_eq!(second.skipped, 2);
        assert_eq!(second.attempts, 0);
    }

    #[tokio::test]
    async fn test_failure_stops_batch() {
        let server = MockServer::start().await;
        serve(&server, "1.zip", "one", 1).await;
        Mock::given(method("GET"))
            .and(path("/tiles/2.zip"))
            .respond_with(ResponseTemplate::new(403))
            .expect(1)
            .mount(&server)
            .await;
        serve(&server, "3.zip", "three", 0).await;

        let tmp = TempDir::new().unwrap();
        let sink = FileSink::new(tmp.path());
        let client = FetchClient::new(&fast_config(3)).unwrap();

        let err = BatchFetcher::new(&client, &sink, 1)
            .run(&refs(&server, &["1.zip", "2.zip", "3.zip"]))
            .await
            .unwrap_err();

        assert!(matches!(err, AppError::Status { .. }));
        assert!(tmp.path().join("1.zip").exists());
        assert!(!tmp.path().join("2.zip").exists());
        assert!(!tmp.path().join("3.zip").exists());
    }

    #[tokio::test]
    async fn test_empty_list() {
        let tmp = TempDir::new().unwrap();
        let sink = FileSink::new(tmp.path());
        let client = FetchClient::new(&fast_config(1)).unwrap();

        let report = BatchFetcher::new(&client, &sink, 8).run(&[]).await.unwrap();
        assert_eq!(report.total, 0);
        assert_eq!(report.fetched + report.skipped, 0);
    }
}
