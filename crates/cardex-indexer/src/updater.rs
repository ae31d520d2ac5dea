//! The index updater.
//!
//! This is the entry point for keeping a realm's index current. It turns
//! "index everything" and "this URL changed" into jobs on the realm's
//! [`JobQueue`], and remembers the stats and ignore rules of the last pass
//! that succeeded.

use crate::config::IndexerConfig;
use crate::error::IndexerError;
use crate::ignore::{is_ignore_file, IgnoreData, IgnoreMatcher};
use crate::job::{FromScratchArgs, IncrementalArgs, IndexRunner, Operation, Stats};
use crate::queue::{Completion, Job, JobOutcome, JobQueue, JobRunner, LocalRunner, OnComplete, OnStart};
use crate::realm::RealmAdapter;
use cardex_core::url::RealmUrl;
use cardex_core::{ModuleLoader, Renderer};
use cardex_index::IndexWriter;
use parking_lot::RwLock;
use std::sync::Arc;
use tracing::{info, warn};

/// Knobs for an [`IndexUpdater`].
#[derive(Debug, Clone)]
pub struct UpdaterOptions {
    pub realm_username: String,
    pub queue_capacity: usize,
    pub always_ignore: Vec<String>,
}

impl Default for UpdaterOptions {
    fn default() -> Self {
        Self {
            realm_username: "indexer".to_string(),
            queue_capacity: 64,
            always_ignore: vec!["node_modules".to_string()],
        }
    }
}

impl From<&IndexerConfig> for UpdaterOptions {
    fn from(config: &IndexerConfig) -> Self {
        Self {
            realm_username: config.realm_username.clone(),
            queue_capacity: config.queue_capacity,
            always_ignore: config.always_ignore.clone(),
        }
    }
}

/// Options for [`IndexUpdater::update`].
#[derive(Debug, Clone, Copy, Default)]
pub struct UpdateOptions {
    /// The file was deleted.
    pub delete: bool,
}

struct State {
    stats: Stats,
    ignore_data: IgnoreData,
    matcher: IgnoreMatcher,
    /// The pass the queue most recently started.
    in_flight: Option<Completion>,
}

pub struct IndexUpdater {
    realm_url: RealmUrl,
    writer: Arc<IndexWriter>,
    options: UpdaterOptions,
    queue: JobQueue,
    state: Arc<RwLock<State>>,
}

impl IndexUpdater {
    /// An updater running jobs in this process. Must be called inside a
    /// tokio runtime.
    pub fn new(
        realm: Arc<dyn RealmAdapter>,
        writer: Arc<IndexWriter>,
        loader: Arc<dyn ModuleLoader>,
        renderer: Arc<dyn Renderer>,
        options: UpdaterOptions,
    ) -> Self {
        let realm_url = realm.realm_url().clone();
        let runner = IndexRunner::new(realm, writer.clone(), loader, renderer)
            .with_always_ignore(options.always_ignore.clone());
        let runner: Arc<dyn JobRunner> = Arc::new(LocalRunner::new(Arc::new(runner)));
        Self::with_runner(realm_url, writer, runner, options)
    }

    /// An updater handing its jobs to any [`JobRunner`].
    pub fn with_runner(
        realm_url: RealmUrl,
        writer: Arc<IndexWriter>,
        runner: Arc<dyn JobRunner>,
        options: UpdaterOptions,
    ) -> Self {
        let state = Arc::new(RwLock::new(State {
            stats: Stats::default(),
            ignore_data: IgnoreData::new(),
            matcher: IgnoreMatcher::empty(&realm_url, &options.always_ignore),
            in_flight: None,
        }));

        let on_complete: OnComplete = {
            let state = state.clone();
            let realm_url = realm_url.clone();
            let always_ignore = options.always_ignore.clone();
            Arc::new(move |outcome: &JobOutcome| {
                let mut state = state.write();
                state.stats = *outcome.stats();
                if state.ignore_data != *outcome.ignore_data() {
                    match IgnoreMatcher::new(&realm_url, outcome.ignore_data(), &always_ignore) {
                        Ok(matcher) => {
                            state.matcher = matcher;
                            state.ignore_data = outcome.ignore_data().clone();
                        }
                        Err(e) => warn!("Keeping previous ignore rules for {}: {}", realm_url, e),
                    }
                }
            })
        };

        let on_start: OnStart = {
            let state = state.clone();
            Arc::new(move |completion: &Completion| {
                state.write().in_flight = Some(completion.clone());
            })
        };

        let queue = JobQueue::with_hooks(runner, options.queue_capacity, on_start, on_complete);
        Self {
            realm_url,
            writer,
            options,
            queue,
            state,
        }
    }

    pub fn realm_url(&self) -> &RealmUrl {
        &self.realm_url
    }

    pub fn writer(&self) -> &Arc<IndexWriter> {
        &self.writer
    }

    fn full_job(&self) -> Job {
        Job::FromScratch(FromScratchArgs {
            realm_url: self.realm_url.clone(),
            realm_username: self.options.realm_username.clone(),
        })
    }

    /// The job for a changed URL. Ignore files change what's indexed at
    /// all, so they get a full pass.
    fn job_for(&self, url: &str, delete: bool) -> Job {
        if is_ignore_file(url) {
            info!("Ignore rules changed at {}, reindexing {}", url, self.realm_url);
            return self.full_job();
        }
        Job::Incremental(IncrementalArgs {
            url: url.to_string(),
            realm_url: self.realm_url.clone(),
            realm_username: self.options.realm_username.clone(),
            operation: if delete {
                Operation::Delete
            } else {
                Operation::Update
            },
            ignore_data: self.state.read().ignore_data.clone(),
        })
    }

    /// Keeps a pass polled, so it counts as finished even if nobody
    /// awaits it.
    fn track(&self, completion: Completion) -> Completion {
        let driver = completion.clone();
        tokio::spawn(async move {
            let _ = driver.await;
        });
        completion
    }

    /// Indexes the realm from scratch. A realm that was never indexed
    /// blocks until the pass finishes; otherwise the pass runs in the
    /// background and [`IndexUpdater::indexing`] reports on it.
    pub async fn run(&self) -> Result<(), Arc<IndexerError>> {
        let is_new = self.writer.is_new_index(self.realm_url.as_str());
        let completion = self
            .queue
            .submit(self.full_job())
            .await
            .map_err(Arc::new)?;
        let completion = self.track(completion);
        if is_new {
            info!("Indexing new realm {}", self.realm_url);
            completion.await?;
            return Ok(());
        }
        // With nothing running, this pass is next; report it right away
        // rather than after the queue gets to it.
        let mut state = self.state.write();
        if state.in_flight.as_ref().map_or(true, |c| c.peek().is_some()) {
            state.in_flight = Some(completion);
        }
        Ok(())
    }

    /// The pass currently running, if any.
    pub fn indexing(&self) -> Option<Completion> {
        self.state
            .read()
            .in_flight
            .as_ref()
            .filter(|completion| completion.peek().is_none())
            .cloned()
    }

    /// Reindexes after a change to `url` and waits for the pass.
    pub async fn update(
        &self,
        url: &str,
        options: UpdateOptions,
    ) -> Result<JobOutcome, Arc<IndexerError>> {
        let job = self.job_for(url, options.delete);
        let completion = self.queue.submit(job).await.map_err(Arc::new)?;
        self.track(completion).await
    }

    /// Queues a reindex after a change to `url`, waiting for room in the
    /// queue but not for the pass.
    pub async fn schedule(&self, url: &str, delete: bool) -> Result<Completion, IndexerError> {
        let completion = self.queue.submit(self.job_for(url, delete)).await?;
        Ok(self.track(completion))
    }

    /// Queues a reindex after a change to `url` without waiting. Must be
    /// called inside a tokio runtime.
    pub fn enqueue(&self, url: &str, delete: bool) -> Result<Completion, IndexerError> {
        let completion = self.queue.try_submit(self.job_for(url, delete))?;
        Ok(self.track(completion))
    }

    /// True if the URL is excluded from the index.
    pub fn is_ignored(&self, url: &str) -> bool {
        self.state.read().matcher.is_ignored(url)
    }

    /// Stats of the last successful pass.
    pub fn stats(&self) -> Stats {
        self.state.read().stats
    }

    /// Ignore rules of the last successful pass.
    pub fn ignore_data(&self) -> IgnoreData {
        self.state.read().ignore_data.clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::job::IncrementalResult;
    use async_trait::async_trait;
    use tokio::sync::{Notify, Semaphore};

    const REALM: &str = "http://test-realm/test/";

    /// Each job waits for one permit before finishing.
    struct Gated {
        started: Notify,
        gate: Semaphore,
    }

    #[async_trait]
    impl JobRunner for Gated {
        async fn run(&self, job: Job) -> Result<JobOutcome, IndexerError> {
            self.started.notify_one();
            self.gate
                .acquire()
                .await
                .map_err(|_| IndexerError::WorkerGone)?
                .forget();
            let Job::Incremental(args) = job else {
                return Err(IndexerError::Runner("unexpected full pass".into()));
            };
            Ok(JobOutcome::Incremental(IncrementalResult {
                invalidations: vec![args.url.clone()],
                ignore_data: args.ignore_data,
                stats: Stats::default(),
            }))
        }
    }

    #[tokio::test]
    async fn test_indexing_reports_the_running_pass() {
        let runner = Arc::new(Gated {
            started: Notify::new(),
            gate: Semaphore::new(0),
        });
        let updater = IndexUpdater::with_runner(
            RealmUrl::new(REALM).unwrap(),
            Arc::new(IndexWriter::temporary().unwrap()),
            runner.clone(),
            UpdaterOptions::default(),
        );
        let a = format!("{}a.json", REALM);
        let b = format!("{}b.json", REALM);

        updater.schedule(&a, false).await.unwrap();
        runner.started.notified().await;
        // Queued behind a.json; a.json is still the one running.
        updater.schedule(&b, false).await.unwrap();

        let running = updater.indexing().unwrap();
        runner.gate.add_permits(1);
        assert_eq!(running.await.unwrap().invalidations().to_vec(), vec![a]);

        runner.started.notified().await;
        let running = updater.indexing().unwrap();
        runner.gate.add_permits(1);
        assert_eq!(running.await.unwrap().invalidations().to_vec(), vec![b]);
    }
}
