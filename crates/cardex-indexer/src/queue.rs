//! The job queue.
//!
//! Jobs for a realm run one at a time, in submission order, on a single
//! drain task. Submitting returns a [`Completion`]: a shared future every
//! interested caller can await, which resolves to the job's outcome or
//! rejects with its error.
//!
//! Jobs that are still waiting get merged:
//! - a later request for the same URL replaces an earlier one (latest wins),
//! - a full pass replaces everything queued before it,
//!
//! and the callers waiting on the replaced jobs settle with the job that
//! replaced them.

use crate::error::IndexerError;
use crate::ignore::IgnoreData;
use crate::job::{FromScratchArgs, FromScratchResult, IncrementalArgs, IncrementalResult, IndexRunner, Stats};
use async_trait::async_trait;
use futures_util::future::{BoxFuture, FutureExt, Shared};
use std::collections::VecDeque;
use std::fmt;
use std::sync::Arc;
use tokio::sync::{mpsc, oneshot};
use tracing::{debug, error, info};
use uuid::Uuid;

/// A unit of indexing work.
#[derive(Debug, Clone, PartialEq)]
pub enum Job {
    FromScratch(FromScratchArgs),
    Incremental(IncrementalArgs),
}

impl fmt::Display for Job {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::FromScratch(args) => write!(f, "full index of {}", args.realm_url),
            Self::Incremental(args) => write!(f, "{} {}", args.operation, args.url),
        }
    }
}

/// What a finished job produced.
#[derive(Debug, Clone, PartialEq)]
pub enum JobOutcome {
    FromScratch(FromScratchResult),
    Incremental(IncrementalResult),
}

impl JobOutcome {
    pub fn stats(&self) -> &Stats {
        match self {
            Self::FromScratch(result) => &result.stats,
            Self::Incremental(result) => &result.stats,
        }
    }

    pub fn ignore_data(&self) -> &IgnoreData {
        match self {
            Self::FromScratch(result) => &result.ignore_data,
            Self::Incremental(result) => &result.ignore_data,
        }
    }

    /// URLs recomputed by an incremental pass; empty for a full pass.
    pub fn invalidations(&self) -> &[String] {
        match self {
            Self::FromScratch(_) => &[],
            Self::Incremental(result) => &result.invalidations,
        }
    }
}

/// Executes jobs. The queue doesn't care where.
#[async_trait]
pub trait JobRunner: Send + Sync {
    async fn run(&self, job: Job) -> Result<JobOutcome, IndexerError>;
}

/// Runs jobs in this process on tokio's blocking pool.
pub struct LocalRunner {
    runner: Arc<IndexRunner>,
}

impl LocalRunner {
    pub fn new(runner: Arc<IndexRunner>) -> Self {
        Self { runner }
    }
}

#[async_trait]
impl JobRunner for LocalRunner {
    async fn run(&self, job: Job) -> Result<JobOutcome, IndexerError> {
        let runner = self.runner.clone();
        tokio::task::spawn_blocking(move || match job {
            Job::FromScratch(args) => runner.from_scratch(&args).map(JobOutcome::FromScratch),
            Job::Incremental(args) => runner.incremental(&args).map(JobOutcome::Incremental),
        })
        .await
        .map_err(|e| IndexerError::JobPanicked(e.to_string()))?
    }
}

/// How a job ended, as seen by its waiters.
pub type JobResult = Result<JobOutcome, Arc<IndexerError>>;

/// Resolves when a submitted job (or the job that replaced it) finishes.
pub type Completion = Shared<BoxFuture<'static, JobResult>>;

/// Called with every successful outcome, before waiters are released.
pub type OnComplete = Arc<dyn Fn(&JobOutcome) + Send + Sync>;

/// Called with the completion of each job as it starts running.
pub type OnStart = Arc<dyn Fn(&Completion) + Send + Sync>;

struct Pending {
    id: Uuid,
    job: Job,
    /// Settles when this job finishes; handed to [`OnStart`].
    completion: Completion,
    waiters: Vec<oneshot::Sender<JobResult>>,
}

impl Pending {
    fn new(job: Job) -> (Self, Completion) {
        let (tx, rx) = oneshot::channel();
        let completion = async move {
            rx.await
                .unwrap_or_else(|_| Err(Arc::new(IndexerError::WorkerGone)))
        }
        .boxed()
        .shared();
        let pending = Self {
            id: Uuid::new_v4(),
            job,
            completion: completion.clone(),
            waiters: vec![tx],
        };
        (pending, completion)
    }
}

/// A FIFO job queue with a single consumer.
pub struct JobQueue {
    tx: mpsc::Sender<Pending>,
}

impl JobQueue {
    /// Starts the drain task. Must be called inside a tokio runtime.
    pub fn new(runner: Arc<dyn JobRunner>, capacity: usize, on_complete: OnComplete) -> Self {
        Self::with_hooks(runner, capacity, Arc::new(|_: &Completion| {}), on_complete)
    }

    /// Like [`JobQueue::new`], also reporting each job as it starts.
    pub fn with_hooks(
        runner: Arc<dyn JobRunner>,
        capacity: usize,
        on_start: OnStart,
        on_complete: OnComplete,
    ) -> Self {
        let (tx, rx) = mpsc::channel(capacity.max(1));
        tokio::spawn(drain(rx, runner, on_start, on_complete));
        Self { tx }
    }

    /// Queues a job, waiting for room if the queue is full.
    pub async fn submit(&self, job: Job) -> Result<Completion, IndexerError> {
        let (pending, completion) = Pending::new(job);
        debug!("Queued job {} ({})", pending.id, pending.job);
        self.tx
            .send(pending)
            .await
            .map_err(|_| IndexerError::WorkerGone)?;
        Ok(completion)
    }

    /// Queues a job without waiting.
    pub fn try_submit(&self, job: Job) -> Result<Completion, IndexerError> {
        let (pending, completion) = Pending::new(job);
        debug!("Queued job {} ({})", pending.id, pending.job);
        self.tx.try_send(pending).map_err(|e| match e {
            mpsc::error::TrySendError::Full(_) => IndexerError::QueueFull,
            mpsc::error::TrySendError::Closed(_) => IndexerError::WorkerGone,
        })?;
        Ok(completion)
    }
}

/// Adds a job to the backlog, merging it with what's already waiting.
fn coalesce(backlog: &mut VecDeque<Pending>, mut incoming: Pending) {
    match &incoming.job {
        Job::FromScratch(_) => {
            for absorbed in backlog.drain(..) {
                debug!("Job {} absorbed by full pass {}", absorbed.id, incoming.id);
                incoming.waiters.extend(absorbed.waiters);
            }
            backlog.push_back(incoming);
        }
        Job::Incremental(args) => {
            let same_url = backlog.iter().position(|pending| {
                matches!(&pending.job, Job::Incremental(earlier) if earlier.url == args.url)
            });
            match same_url {
                Some(pos) => {
                    let earlier = std::mem::replace(&mut backlog[pos], incoming);
                    debug!("Job {} replaced by {}", earlier.id, backlog[pos].id);
                    backlog[pos].waiters.extend(earlier.waiters);
                }
                None => backlog.push_back(incoming),
            }
        }
    }
}

async fn drain(
    mut rx: mpsc::Receiver<Pending>,
    runner: Arc<dyn JobRunner>,
    on_start: OnStart,
    on_complete: OnComplete,
) {
    let mut backlog: VecDeque<Pending> = VecDeque::new();
    // Ignore rules from the newest outcome; jobs queued before a full pass
    // changed them would otherwise carry stale rules.
    let mut ignore_data: Option<IgnoreData> = None;

    loop {
        if backlog.is_empty() {
            match rx.recv().await {
                Some(pending) => coalesce(&mut backlog, pending),
                None => break,
            }
        }
        while let Ok(pending) = rx.try_recv() {
            coalesce(&mut backlog, pending);
        }
        let Some(mut next) = backlog.pop_front() else {
            continue;
        };

        if let (Job::Incremental(args), Some(data)) = (&mut next.job, &ignore_data) {
            args.ignore_data = data.clone();
        }
        info!("Starting job {} ({})", next.id, next.job);
        on_start(&next.completion);
        let result: JobResult = runner.run(next.job.clone()).await.map_err(Arc::new);
        match &result {
            Ok(outcome) => {
                ignore_data = Some(outcome.ignore_data().clone());
                on_complete(outcome);
                info!("Finished job {} ({}): {}", next.id, next.job, outcome.stats());
            }
            Err(e) => error!("Job {} ({}) failed: {}", next.id, next.job, e),
        }
        for waiter in next.waiters {
            let _ = waiter.send(result.clone());
        }
    }
    debug!("Job queue closed");
}
