//! Upload Queue - bounded-concurrency job runner with retry and cooldown
//!
//! Jobs run up to `concurrency` at a time. A failed job goes back to the end
//! of the pending list and is tried again, by default forever. Failures are
//! counted globally across all jobs: once more than `max_consecutive_errors`
//! failures happen in a row, new job starts are held for a cooldown period
//! that doubles with every further episode. Any success resets both the
//! failure count and the cooldown length.
//!
//! All counters live in the single task driving [`UploadQueue::run`]; jobs
//! report back through their join handles.

use anyhow::{anyhow, Result};
use futures::future::BoxFuture;
use std::collections::VecDeque;
use std::future::Future;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::Notify;
use tokio::task::JoinSet;
use tokio::time::Instant;
use tracing::{debug, error, info, warn};

use crate::config::Config;

type JobAction = Arc<dyn Fn() -> BoxFuture<'static, Result<()>> + Send + Sync>;

/// One retryable unit of work, identified by the file it handles
///
/// The action may run several times and must tolerate a previous attempt
/// having partially succeeded.
#[derive(Clone)]
pub struct UploadJob {
    file_key: String,
    action: JobAction,
    attempts: u32,
}

impl UploadJob {
    pub fn new<F, Fut>(file_key: impl Into<String>, action: F) -> Self
    where
        F: Fn() -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<()>> + Send + 'static,
    {
        Self {
            file_key: file_key.into(),
            action: Arc::new(move || -> BoxFuture<'static, Result<()>> { Box::pin(action()) }),
            attempts: 0,
        }
    }

    pub fn file_key(&self) -> &str {
        &self.file_key
    }
}

impl std::fmt::Debug for UploadJob {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("UploadJob")
            .field("file_key", &self.file_key)
            .field("attempts", &self.attempts)
            .finish()
    }
}

/// Upload queue tuning
#[derive(Debug, Clone)]
pub struct QueueConfig {
    pub concurrency: usize,
    pub max_consecutive_errors: u32,
    pub first_cooldown: Duration,
    /// Abandon a job after this many failed attempts; `None` retries forever
    pub max_attempts: Option<u32>,
}

impl Default for QueueConfig {
    fn default() -> Self {
        Self {
            concurrency: 5,
            max_consecutive_errors: 10,
            first_cooldown: Duration::from_secs(10),
            max_attempts: None,
        }
    }
}

impl QueueConfig {
    pub fn from_config(config: &Config) -> Result<Self> {
        Ok(Self {
            concurrency: config.queue.concurrency.max(1),
            max_consecutive_errors: config.queue.max_consecutive_errors,
            first_cooldown: config.first_cooldown()?,
            max_attempts: config.queue.max_attempts,
        })
    }
}

/// Outcome of a queue run
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct QueueStats {
    /// Jobs that eventually succeeded
    pub completed: usize,
    /// Failed attempts across all jobs
    pub failed_attempts: usize,
    /// Jobs dropped after reaching `max_attempts`
    pub abandoned: Vec<String>,
    /// Length of every cooldown pause, in the order they happened
    pub cooldowns: Vec<Duration>,
}

struct Shared {
    pending: Mutex<VecDeque<UploadJob>>,
    running: AtomicUsize,
    job_added: Notify,
}

impl Shared {
    fn pending(&self) -> std::sync::MutexGuard<'_, VecDeque<UploadJob>> {
        self.pending
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

/// Bounded-concurrency runner for [`UploadJob`]s
pub struct UploadQueue {
    config: QueueConfig,
    shared: Arc<Shared>,
}

/// Mutable bookkeeping owned by the task driving the queue
struct RunState {
    consecutive_errors: u32,
    next_cooldown: Duration,
    resume_at: Option<Instant>,
    stats: QueueStats,
}

impl UploadQueue {
    pub fn new(config: QueueConfig) -> Self {
        Self {
            config,
            shared: Arc::new(Shared {
                pending: Mutex::new(VecDeque::new()),
                running: AtomicUsize::new(0),
                job_added: Notify::new(),
            }),
        }
    }

    /// Append a job; allowed before and during [`run`](Self::run)
    pub fn add_job(&self, job: UploadJob) {
        self.shared.pending().push_back(job);
        self.shared.job_added.notify_one();
    }

    /// Jobs not yet completed, queued or running
    pub fn len(&self) -> usize {
        self.shared.pending().len() + self.shared.running.load(Ordering::SeqCst)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Run jobs until nothing is queued, running, or waiting on a cooldown
    ///
    /// A panic inside a job is propagated to the caller.
    pub async fn run(&self) -> Result<QueueStats> {
        let mut in_flight: JoinSet<(UploadJob, Result<()>)> = JoinSet::new();
        let mut run = RunState {
            consecutive_errors: 0,
            next_cooldown: self.config.first_cooldown,
            resume_at: None,
            stats: QueueStats::default(),
        };

        loop {
            if run.resume_at.is_none() {
                self.start_jobs(&mut in_flight);
            }

            if in_flight.is_empty() && run.resume_at.is_none() && self.shared.pending().is_empty()
            {
                break;
            }

            let resume_at = run.resume_at;
            tokio::select! {
                Some(joined) = in_flight.join_next() => {
                    match joined {
                        Ok((job, outcome)) => self.handle_outcome(&mut run, job, outcome),
                        Err(e) => {
                            self.shared.running.fetch_sub(1, Ordering::SeqCst);
                            if e.is_panic() {
                                std::panic::resume_unwind(e.into_panic());
                            }
                            return Err(anyhow!("Upload task was cancelled: {}", e));
                        }
                    }
                }
                _ = sleep_until_resume(resume_at), if resume_at.is_some() => {
                    info!("cooldown over, resuming uploads");
                    run.resume_at = None;
                }
                _ = self.shared.job_added.notified() => {}
            }
        }

        Ok(run.stats)
    }

    fn start_jobs(&self, in_flight: &mut JoinSet<(UploadJob, Result<()>)>) {
        while in_flight.len() < self.config.concurrency {
            // Move the job from pending to running under one lock so `len` never dips
            let next = {
                let mut pending = self.shared.pending();
                let job = pending.pop_front();
                if job.is_some() {
                    self.shared.running.fetch_add(1, Ordering::SeqCst);
                }
                job
            };
            let Some(mut job) = next else {
                break;
            };
            job.attempts += 1;
            debug!(file = %job.file_key, attempt = job.attempts, "starting upload job");
            let action = job.action.clone();
            in_flight.spawn(async move {
                let outcome = action().await;
                (job, outcome)
            });
        }
    }

    fn handle_outcome(&self, run: &mut RunState, job: UploadJob, outcome: Result<()>) {
        match outcome {
            Ok(()) => {
                self.shared.running.fetch_sub(1, Ordering::SeqCst);
                run.consecutive_errors = 0;
                run.next_cooldown = self.config.first_cooldown;
                run.stats.completed += 1;
            }
            Err(err) => {
                run.consecutive_errors += 1;
                run.stats.failed_attempts += 1;
                let is_final = run.consecutive_errors > self.config.max_consecutive_errors;
                warn!(
                    file = %job.file_key,
                    attempt = job.attempts,
                    is_final,
                    "error during upload/append to album: {:#}",
                    err
                );

                match self.config.max_attempts {
                    Some(max) if job.attempts >= max => {
                        self.shared.running.fetch_sub(1, Ordering::SeqCst);
                        error!(file = %job.file_key, attempts = job.attempts, "giving up on file");
                        run.stats.abandoned.push(job.file_key);
                    }
                    _ => {
                        let mut pending = self.shared.pending();
                        pending.push_back(job);
                        self.shared.running.fetch_sub(1, Ordering::SeqCst);
                    }
                }

                if is_final && run.resume_at.is_none() {
                    let cooldown = run.next_cooldown;
                    info!(
                        cooldown_secs = cooldown.as_secs_f64(),
                        "too many errors, pausing uploads"
                    );
                    run.resume_at = Some(Instant::now() + cooldown);
                    run.stats.cooldowns.push(cooldown);
                    run.next_cooldown = cooldown.saturating_mul(2);
                }
            }
        }
    }
}

async fn sleep_until_resume(resume_at: Option<Instant>) {
    if let Some(deadline) = resume_at {
        tokio::time::sleep_until(deadline).await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicU32;

    fn test_config(concurrency: usize) -> QueueConfig {
        QueueConfig {
            concurrency,
            ..Default::default()
        }
    }

    /// Shared scripted outcomes: attempt N (across all jobs) fails when
    /// `script[N]` is false. Attempts past the end of the script succeed.
    fn scripted_job(key: &str, script: Arc<Vec<bool>>, attempts: Arc<AtomicU32>) -> UploadJob {
        UploadJob::new(key, move || {
            let script = script.clone();
            let attempts = attempts.clone();
            async move {
                let n = attempts.fetch_add(1, Ordering::SeqCst) as usize;
                if script.get(n).copied().unwrap_or(true) {
                    Ok(())
                } else {
                    Err(anyhow!("transient failure #{}", n))
                }
            }
        })
    }

    fn failures_then_success(failures: usize) -> Arc<Vec<bool>> {
        let mut script = vec![false; failures];
        script.push(true);
        Arc::new(script)
    }

    #[tokio::test]
    async fn test_empty_queue_resolves_immediately() {
        let queue = UploadQueue::new(test_config(5));
        let stats = queue.run().await.unwrap();
        assert_eq!(stats, QueueStats::default());
        assert!(queue.is_empty());
    }

    #[tokio::test]
    async fn test_all_jobs_complete() {
        let queue = UploadQueue::new(test_config(5));
        let done = Arc::new(AtomicU32::new(0));
        for i in 0..20 {
            let done = done.clone();
            queue.add_job(UploadJob::new(format!("file-{}", i), move || {
                let done = done.clone();
                async move {
                    done.fetch_add(1, Ordering::SeqCst);
                    Ok(())
                }
            }));
        }
        assert_eq!(queue.len(), 20);

        let stats = queue.run().await.unwrap();
        assert_eq!(stats.completed, 20);
        assert_eq!(done.load(Ordering::SeqCst), 20);
        assert_eq!(queue.len(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_concurrency_is_bounded() {
        let queue = UploadQueue::new(test_config(5));
        let active = Arc::new(AtomicU32::new(0));
        let peak = Arc::new(AtomicU32::new(0));

        for i in 0..17 {
            let active = active.clone();
            let peak = peak.clone();
            queue.add_job(UploadJob::new(format!("file-{}", i), move || {
                let active = active.clone();
                let peak = peak.clone();
                async move {
                    let now = active.fetch_add(1, Ordering::SeqCst) + 1;
                    peak.fetch_max(now, Ordering::SeqCst);
                    tokio::time::sleep(Duration::from_millis(50)).await;
                    active.fetch_sub(1, Ordering::SeqCst);
                    Ok(())
                }
            }));
        }

        let stats = queue.run().await.unwrap();
        assert_eq!(stats.completed, 17);
        assert_eq!(peak.load(Ordering::SeqCst), 5);
    }

    #[tokio::test(start_paused = true)]
    async fn test_failed_job_is_retried_not_dropped() {
        let queue = UploadQueue::new(test_config(5));
        let attempts = Arc::new(AtomicU32::new(0));
        queue.add_job(scripted_job("a.jpg", failures_then_success(3), attempts.clone()));

        let stats = queue.run().await.unwrap();
        assert_eq!(stats.completed, 1);
        assert_eq!(stats.failed_attempts, 3);
        assert_eq!(attempts.load(Ordering::SeqCst), 4);
        assert!(stats.cooldowns.is_empty());
        assert!(stats.abandoned.is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_eleven_failures_trigger_one_first_cooldown() {
        let queue = UploadQueue::new(test_config(1));
        let attempts = Arc::new(AtomicU32::new(0));
        queue.add_job(scripted_job("a.jpg", failures_then_success(11), attempts.clone()));

        let started = Instant::now();
        let stats = queue.run().await.unwrap();

        assert_eq!(stats.cooldowns, vec![Duration::from_secs(10)]);
        assert_eq!(stats.completed, 1);
        assert!(started.elapsed() >= Duration::from_secs(10));
    }

    #[tokio::test(start_paused = true)]
    async fn test_ten_failures_do_not_trigger_cooldown() {
        let queue = UploadQueue::new(test_config(1));
        let attempts = Arc::new(AtomicU32::new(0));
        queue.add_job(scripted_job("a.jpg", failures_then_success(10), attempts));

        let stats = queue.run().await.unwrap();
        assert!(stats.cooldowns.is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_second_episode_doubles_cooldown() {
        let queue = UploadQueue::new(test_config(1));
        let attempts = Arc::new(AtomicU32::new(0));
        queue.add_job(scripted_job("a.jpg", failures_then_success(12), attempts));

        let started = Instant::now();
        let stats = queue.run().await.unwrap();

        assert_eq!(
            stats.cooldowns,
            vec![Duration::from_secs(10), Duration::from_secs(20)]
        );
        assert!(started.elapsed() >= Duration::from_secs(30));
    }

    #[tokio::test(start_paused = true)]
    async fn test_success_resets_cooldown() {
        let queue = UploadQueue::new(test_config(1));
        let attempts = Arc::new(AtomicU32::new(0));
        let mut script = vec![false; 11];
        script.push(true);
        script.extend(vec![false; 11]);
        script.push(true);
        let script = Arc::new(script);
        queue.add_job(scripted_job("a.jpg", script.clone(), attempts.clone()));
        queue.add_job(scripted_job("b.jpg", script, attempts));

        let stats = queue.run().await.unwrap();

        assert_eq!(stats.completed, 2);
        assert_eq!(
            stats.cooldowns,
            vec![Duration::from_secs(10), Duration::from_secs(10)]
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_running_jobs_finish_during_cooldown() {
        let queue = UploadQueue::new(QueueConfig {
            concurrency: 2,
            max_consecutive_errors: 0,
            ..Default::default()
        });
        let slow_done = Arc::new(AtomicU32::new(0));
        let attempts = Arc::new(AtomicU32::new(0));

        let flag = slow_done.clone();
        queue.add_job(UploadJob::new("slow.mov", move || {
            let flag = flag.clone();
            async move {
                tokio::time::sleep(Duration::from_secs(1)).await;
                flag.fetch_add(1, Ordering::SeqCst);
                Ok(())
            }
        }));
        queue.add_job(scripted_job("bad.jpg", failures_then_success(1), attempts));

        let stats = queue.run().await.unwrap();

        assert_eq!(slow_done.load(Ordering::SeqCst), 1);
        assert_eq!(stats.completed, 2);
        assert_eq!(stats.cooldowns.len(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_max_attempts_abandons_job() {
        let queue = UploadQueue::new(QueueConfig {
            concurrency: 2,
            max_attempts: Some(3),
            ..Default::default()
        });
        queue.add_job(UploadJob::new("broken.jpg", || async {
            Err(anyhow!("permanently broken"))
        }));
        queue.add_job(UploadJob::new("fine.jpg", || async { Ok(()) }));

        let stats = queue.run().await.unwrap();
        assert_eq!(stats.completed, 1);
        assert_eq!(stats.failed_attempts, 3);
        assert_eq!(stats.abandoned, vec!["broken.jpg".to_string()]);
    }

    #[tokio::test]
    async fn test_len_counts_running_and_requeued_jobs() {
        let queue = Arc::new(UploadQueue::new(test_config(1)));
        let observed = Arc::new(Mutex::new(Vec::new()));
        let attempts = Arc::new(AtomicU32::new(0));

        for key in ["a.jpg", "b.jpg"] {
            let queue_ref = Arc::downgrade(&queue);
            let observed = observed.clone();
            let attempts = attempts.clone();
            queue.add_job(UploadJob::new(key, move || {
                let queue_ref = queue_ref.clone();
                let observed = observed.clone();
                let attempts = attempts.clone();
                async move {
                    if let Some(queue) = queue_ref.upgrade() {
                        observed.lock().unwrap().push(queue.len());
                    }
                    // Only the very first attempt fails
                    if attempts.fetch_add(1, Ordering::SeqCst) == 0 {
                        Err(anyhow!("first attempt fails"))
                    } else {
                        Ok(())
                    }
                }
            }));
        }

        let stats = queue.run().await.unwrap();
        assert_eq!(stats.completed, 2);
        // a (fails, requeued), b, then a again
        assert_eq!(*observed.lock().unwrap(), vec![2, 2, 1]);
        assert_eq!(queue.len(), 0);
    }

    #[tokio::test]
    async fn test_jobs_added_while_running() {
        let queue = Arc::new(UploadQueue::new(test_config(2)));
        let done = Arc::new(AtomicU32::new(0));

        let inner_queue = queue.clone();
        let inner_done = done.clone();
        queue.add_job(UploadJob::new("first.jpg", move || {
            let queue = inner_queue.clone();
            let done = inner_done.clone();
            async move {
                let follow_done = done.clone();
                queue.add_job(UploadJob::new("second.jpg", move || {
                    let done = follow_done.clone();
                    async move {
                        done.fetch_add(1, Ordering::SeqCst);
                        Ok(())
                    }
                }));
                done.fetch_add(1, Ordering::SeqCst);
                Ok(())
            }
        }));

        let stats = queue.run().await.unwrap();
        assert_eq!(stats.completed, 2);
        assert_eq!(done.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    #[should_panic(expected = "job exploded")]
    async fn test_job_panic_propagates() {
        let queue = UploadQueue::new(test_config(1));
        queue.add_job(UploadJob::new("boom.jpg", || async {
            if true {
                panic!("job exploded");
            }
            Ok(())
        }));
        let _ = queue.run().await;
    }
}
