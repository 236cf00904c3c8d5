//! Dispatch Queue
//!
//! Bounded job channel between the orchestrators (producers) and the
//! worker pool (consumer). A full queue never blocks the caller: the record
//! stays `Pending` and the reconciliation poller picks it up later.
//!
//! Delayed jobs (retry backoff) go through a second bounded channel into a
//! single [`RetryScheduler`] task owned by the worker pool, which moves
//! them onto the dispatch queue once due.

use std::cmp::Reverse;
use std::collections::BinaryHeap;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::time::Instant;
use tracing::{debug, warn};

use super::shutdown::ShutdownSignal;
use crate::core_types::{SignatureRequestId, TransactionId};

/// One unit of orchestration work
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum Job {
    Transaction(TransactionId),
    Signature(SignatureRequestId),
}

fn try_send(tx: &mpsc::Sender<Job>, job: Job) -> bool {
    match tx.try_send(job) {
        Ok(()) => true,
        Err(mpsc::error::TrySendError::Full(job)) => {
            warn!(?job, "Dispatch queue full, leaving job for the poller");
            false
        }
        Err(mpsc::error::TrySendError::Closed(job)) => {
            debug!(?job, "Dispatch queue closed");
            false
        }
    }
}

/// Producer side, cheap to clone
#[derive(Debug, Clone)]
pub struct JobQueue {
    tx: mpsc::Sender<Job>,
    delayed: mpsc::Sender<(Instant, Job)>,
}

impl JobQueue {
    /// Create the queue and its single receiver
    pub fn bounded(capacity: usize) -> (JobQueue, JobReceiver) {
        let capacity = capacity.max(1);
        let (tx, rx) = mpsc::channel(capacity);
        let (delayed_tx, delayed_rx) = mpsc::channel(capacity);
        let scheduler = RetryScheduler {
            rx: delayed_rx,
            tx: tx.clone(),
            capacity,
        };
        (
            JobQueue {
                tx,
                delayed: delayed_tx,
            },
            JobReceiver {
                rx,
                scheduler: Some(scheduler),
            },
        )
    }

    /// Non-blocking enqueue; `false` when the queue is full or closed
    pub fn try_enqueue(&self, job: Job) -> bool {
        try_send(&self.tx, job)
    }

    /// Hand `job` to the retry scheduler, due after `delay`. Dropped with a
    /// warning when the scheduler is saturated; the poller covers it.
    pub fn enqueue_after(&self, job: Job, delay: Duration) -> bool {
        match self.delayed.try_send((Instant::now() + delay, job)) {
            Ok(()) => true,
            Err(mpsc::error::TrySendError::Full((_, job))) => {
                warn!(?job, "Retry scheduler full, leaving job for the poller");
                false
            }
            Err(mpsc::error::TrySendError::Closed((_, job))) => {
                debug!(?job, "Retry scheduler stopped");
                false
            }
        }
    }

    pub fn is_closed(&self) -> bool {
        self.tx.is_closed()
    }
}

/// Consumer side, owned by the worker pool
#[derive(Debug)]
pub struct JobReceiver {
    rx: mpsc::Receiver<Job>,
    scheduler: Option<RetryScheduler>,
}

impl JobReceiver {
    pub async fn recv(&mut self) -> Option<Job> {
        self.rx.recv().await
    }

    pub fn try_recv(&mut self) -> Option<Job> {
        self.rx.try_recv().ok()
    }

    pub fn close(&mut self) {
        self.rx.close();
    }

    /// Detach the retry scheduler so its owner can run it
    pub fn take_scheduler(&mut self) -> Option<RetryScheduler> {
        self.scheduler.take()
    }
}

/// Timer heap feeding delayed jobs into the dispatch queue
#[derive(Debug)]
pub struct RetryScheduler {
    rx: mpsc::Receiver<(Instant, Job)>,
    tx: mpsc::Sender<Job>,
    capacity: usize,
}

impl RetryScheduler {
    /// Run until shutdown or until every producer is gone and no timer is left
    pub async fn run(mut self, mut shutdown: ShutdownSignal) {
        let mut timers: BinaryHeap<Reverse<(Instant, Job)>> = BinaryHeap::new();
        let mut intake_open = true;

        loop {
            if !intake_open && timers.is_empty() {
                break;
            }
            let next_due = timers.peek().map(|Reverse((at, _))| *at);

            tokio::select! {
                _ = shutdown.triggered() => break,
                entry = self.rx.recv(), if intake_open => match entry {
                    Some(entry) if timers.len() < self.capacity => timers.push(Reverse(entry)),
                    Some((_, job)) => warn!(?job, "Retry timers full, leaving job for the poller"),
                    None => intake_open = false,
                },
                _ = sleep_until(next_due) => {
                    let now = Instant::now();
                    while let Some(Reverse((at, job))) = timers.peek().copied() {
                        if at > now {
                            break;
                        }
                        timers.pop();
                        try_send(&self.tx, job);
                    }
                }
            }
        }

        if !timers.is_empty() {
            debug!(pending = timers.len(), "Retry scheduler stopped with timers left");
        }
    }
}

async fn sleep_until(at: Option<Instant>) {
    match at {
        Some(at) => tokio::time::sleep_until(at).await,
        None => std::future::pending::<()>().await,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::worker::Shutdown;

    #[tokio::test]
    async fn test_full_queue_does_not_block() {
        let (queue, mut rx) = JobQueue::bounded(1);
        let a = Job::Transaction(TransactionId::new());
        let b = Job::Signature(SignatureRequestId::new());

        assert!(queue.try_enqueue(a));
        assert!(!queue.try_enqueue(b));
        assert_eq!(rx.try_recv(), Some(a));
        assert!(queue.try_enqueue(b));
        assert_eq!(rx.recv().await, Some(b));
    }

    #[tokio::test]
    async fn test_delayed_enqueue_in_due_order() {
        let (queue, mut rx) = JobQueue::bounded(4);
        let shutdown = Shutdown::new();
        let scheduler = rx.take_scheduler().unwrap();
        let task = tokio::spawn(scheduler.run(shutdown.subscribe()));

        let late = Job::Transaction(TransactionId::new());
        let early = Job::Signature(SignatureRequestId::new());
        assert!(queue.enqueue_after(late, Duration::from_millis(60)));
        assert!(queue.enqueue_after(early, Duration::from_millis(10)));

        assert_eq!(rx.try_recv(), None);
        let first = tokio::time::timeout(Duration::from_secs(2), rx.recv())
            .await
            .unwrap();
        let second = tokio::time::timeout(Duration::from_secs(2), rx.recv())
            .await
            .unwrap();
        assert_eq!(first, Some(early));
        assert_eq!(second, Some(late));

        shutdown.trigger();
        tokio::time::timeout(Duration::from_secs(1), task)
            .await
            .unwrap()
            .unwrap();
    }

    #[tokio::test]
    async fn test_delayed_jobs_wait_for_a_scheduler() {
        let (queue, mut rx) = JobQueue::bounded(1);
        let job = Job::Transaction(TransactionId::new());
        assert!(queue.enqueue_after(job, Duration::ZERO));
        // Bounded: the next one is refused instead of spawning anything
        assert!(!queue.enqueue_after(job, Duration::ZERO));

        tokio::time::sleep(Duration::from_millis(20)).await;
        assert_eq!(rx.try_recv(), None);
    }

    #[tokio::test]
    async fn test_closed_receiver() {
        let (queue, rx) = JobQueue::bounded(4);
        drop(rx);
        assert!(queue.is_closed());
        assert!(!queue.try_enqueue(Job::Transaction(TransactionId::new())));
    }
}
