//! Waitlist promotion: the algorithm and the background worker that runs it.
//!
//! Callers never run promotion inline. They submit a `PromotionRequest` to a
//! `PromotionQueue`; a single `PromotionWorker` task drains the channel,
//! runs `WaitlistPromoter::promote`, and logs and counts any failure. Nothing
//! is retried here.

use std::time::Instant;

use common::{EventId, UserId};
use registration_store::{
    CapacityOracle, RegistrationStore, RsvpStatus, SeatClaim, WaitlistQueue, timestamp_now,
};
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;

use crate::config::PromotionPolicy;
use crate::error::RegistrationError;

/// Why a promotion was requested.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PromotionReason {
    /// A `going` registration moved to another status.
    RsvpChanged,
    /// A registration was cancelled.
    Cancelled,
}

impl std::fmt::Display for PromotionReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            PromotionReason::RsvpChanged => write!(f, "rsvp_changed"),
            PromotionReason::Cancelled => write!(f, "cancelled"),
        }
    }
}

/// A request to promote from one event's waitlist.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PromotionRequest {
    pub event_id: EventId,
    pub reason: PromotionReason,
}

impl PromotionRequest {
    pub fn new(event_id: EventId, reason: PromotionReason) -> Self {
        Self { event_id, reason }
    }
}

/// Result of one promotion pass.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PromotionOutcome {
    /// Users moved from `waitlist` to `going`, in queue order.
    pub promoted: Vec<UserId>,
    /// Head entries discarded because their registration was gone or no
    /// longer waitlisted.
    pub stale_removed: u32,
    /// Waitlisted registrations that had lost their queue entry and were
    /// queued again before the pass. Only `reconcile` does this.
    pub requeued: u32,
}

impl PromotionOutcome {
    /// Returns true if the pass changed nothing.
    pub fn is_noop(&self) -> bool {
        self.promoted.is_empty() && self.stale_removed == 0 && self.requeued == 0
    }
}

/// Moves the head of an event's waitlist to `going` when a seat is free.
///
/// A registration is only ever flipped from `waitlist`; none is created here.
#[derive(Clone)]
pub struct WaitlistPromoter<R, W, C> {
    registrations: R,
    waitlist: W,
    capacities: C,
    policy: PromotionPolicy,
}

impl<R, W, C> WaitlistPromoter<R, W, C>
where
    R: RegistrationStore,
    W: WaitlistQueue,
    C: CapacityOracle,
{
    pub fn new(registrations: R, waitlist: W, capacities: C, policy: PromotionPolicy) -> Self {
        Self {
            registrations,
            waitlist,
            capacities,
            policy,
        }
    }

    /// Runs one promotion pass for the event.
    ///
    /// With `PromotionPolicy::Single` at most one user is promoted. An empty
    /// waitlist or a full event is a no-op. Entries that another promoter
    /// already removed are skipped.
    #[tracing::instrument(skip(self))]
    pub async fn promote(&self, event_id: EventId) -> Result<PromotionOutcome, RegistrationError> {
        let capacity = self.capacities.capacity(event_id).await?;
        let mut outcome = PromotionOutcome::default();

        while let Some(head) = self.waitlist.oldest(event_id).await? {
            let waiting = self
                .registrations
                .get(event_id, head.user_id)
                .await?
                .is_some_and(|r| r.status == RsvpStatus::Waitlist);

            if !waiting {
                if self.waitlist.remove(head.id).await? {
                    outcome.stale_removed += 1;
                    metrics::counter!("waitlist_stale_entries_total").increment(1);
                    tracing::warn!(user_id = %head.user_id, "discarded stale waitlist entry");
                }
                continue;
            }

            let claim = self
                .registrations
                .claim_seat(
                    event_id,
                    head.user_id,
                    RsvpStatus::Waitlist,
                    capacity,
                    timestamp_now(),
                )
                .await?;

            match claim {
                SeatClaim::Claimed => {
                    self.waitlist.remove(head.id).await?;
                    outcome.promoted.push(head.user_id);
                    tracing::info!(user_id = %head.user_id, "promoted from waitlist");
                    if self.policy == PromotionPolicy::Single {
                        break;
                    }
                }
                SeatClaim::Full => break,
                // Status changed between the read and the claim.
                SeatClaim::Missing => {
                    if self.waitlist.remove(head.id).await? {
                        outcome.stale_removed += 1;
                        metrics::counter!("waitlist_stale_entries_total").increment(1);
                    }
                }
            }
        }

        Ok(outcome)
    }
}

enum PromotionMessage {
    Promote(PromotionRequest),
    Flush(oneshot::Sender<()>),
}

/// Sending side of the promotion channel. Cheap to clone.
#[derive(Clone)]
pub struct PromotionQueue {
    sender: mpsc::Sender<PromotionMessage>,
}

impl PromotionQueue {
    /// Submits a request without waiting.
    ///
    /// Returns false if the request was dropped because the queue is full or
    /// the worker has stopped. Dropped requests are logged and counted.
    pub fn submit(&self, request: PromotionRequest) -> bool {
        match self.sender.try_send(PromotionMessage::Promote(request)) {
            Ok(()) => true,
            Err(err) => {
                let cause = match err {
                    mpsc::error::TrySendError::Full(_) => "queue_full",
                    mpsc::error::TrySendError::Closed(_) => "worker_stopped",
                };
                metrics::counter!("promotion_requests_dropped_total", "cause" => cause)
                    .increment(1);
                tracing::warn!(
                    event_id = %request.event_id,
                    reason = %request.reason,
                    cause,
                    "promotion request dropped"
                );
                false
            }
        }
    }

    /// Waits until every request submitted before this call has been handled.
    pub async fn flush(&self) {
        let (done, wait) = oneshot::channel();
        if self.sender.send(PromotionMessage::Flush(done)).await.is_ok() {
            let _ = wait.await;
        }
    }
}

/// Handle to the spawned promotion worker task.
///
/// The worker stops once every `PromotionQueue` clone has been dropped.
pub struct PromotionHandle {
    task: JoinHandle<()>,
}

impl PromotionHandle {
    /// Waits for the worker to finish its remaining requests and stop.
    pub async fn join(self) {
        if let Err(err) = self.task.await {
            tracing::error!(error = %err, "promotion worker panicked");
        }
    }

    /// Returns true if the worker task has exited.
    pub fn is_finished(&self) -> bool {
        self.task.is_finished()
    }
}

/// Background task that executes promotion requests one at a time.
pub struct PromotionWorker<R, W, C> {
    promoter: WaitlistPromoter<R, W, C>,
    receiver: mpsc::Receiver<PromotionMessage>,
}

impl<R, W, C> PromotionWorker<R, W, C>
where
    R: RegistrationStore + 'static,
    W: WaitlistQueue + 'static,
    C: CapacityOracle + 'static,
{
    /// Spawns the worker on the current tokio runtime.
    ///
    /// # Panics
    ///
    /// Panics if called outside a tokio runtime.
    pub fn spawn(
        promoter: WaitlistPromoter<R, W, C>,
        queue_capacity: usize,
    ) -> (PromotionQueue, PromotionHandle) {
        let (sender, receiver) = mpsc::channel(queue_capacity.max(1));
        let worker = Self { promoter, receiver };
        let task = tokio::spawn(worker.run());
        (PromotionQueue { sender }, PromotionHandle { task })
    }

    async fn run(mut self) {
        while let Some(message) = self.receiver.recv().await {
            match message {
                PromotionMessage::Promote(request) => self.handle(request).await,
                PromotionMessage::Flush(done) => {
                    let _ = done.send(());
                }
            }
        }
        tracing::debug!("promotion worker stopped");
    }

    async fn handle(&self, request: PromotionRequest) {
        let started = Instant::now();

        match self.promoter.promote(request.event_id).await {
            Ok(outcome) => {
                metrics::counter!("waitlist_promotions_total")
                    .increment(outcome.promoted.len() as u64);
                if outcome.is_noop() {
                    tracing::debug!(
                        event_id = %request.event_id,
                        reason = %request.reason,
                        "nothing to promote"
                    );
                }
            }
            Err(err) => {
                metrics::counter!("waitlist_promotion_failures_total").increment(1);
                tracing::warn!(
                    event_id = %request.event_id,
                    reason = %request.reason,
                    error = %err,
                    "waitlist promotion failed"
                );
            }
        }

        metrics::histogram!("waitlist_promotion_duration_seconds")
            .record(started.elapsed().as_secs_f64());
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use registration_store::{
        CapacityRegistry, InMemoryCapacityOracle, InMemoryRegistrationStore,
        InMemoryWaitlistQueue, Registration, WaitlistEntry,
    };

    struct Fixture {
        registrations: InMemoryRegistrationStore,
        waitlist: InMemoryWaitlistQueue,
        capacities: InMemoryCapacityOracle,
        event_id: EventId,
    }

    impl Fixture {
        async fn new(capacity: i64) -> Self {
            let capacities = InMemoryCapacityOracle::new();
            let event_id = EventId::new();
            capacities.set_capacity(event_id, capacity).await.unwrap();
            Self {
                registrations: InMemoryRegistrationStore::new(),
                waitlist: InMemoryWaitlistQueue::new(),
                capacities,
                event_id,
            }
        }

        fn promoter(
            &self,
            policy: PromotionPolicy,
        ) -> WaitlistPromoter<InMemoryRegistrationStore, InMemoryWaitlistQueue, InMemoryCapacityOracle>
        {
            WaitlistPromoter::new(
                self.registrations.clone(),
                self.waitlist.clone(),
                self.capacities.clone(),
                policy,
            )
        }

        async fn add(&self, status: RsvpStatus) -> UserId {
            let user_id = UserId::new();
            let reg = Registration::new(self.event_id, user_id, "test", serde_json::Value::Null)
                .with_status(status);
            self.registrations.create(&reg).await.unwrap();
            if status == RsvpStatus::Waitlist {
                self.waitlist
                    .enqueue(&WaitlistEntry::new(self.event_id, user_id))
                    .await
                    .unwrap();
            }
            user_id
        }

        async fn status(&self, user_id: UserId) -> Option<RsvpStatus> {
            self.registrations
                .get(self.event_id, user_id)
                .await
                .unwrap()
                .map(|r| r.status)
        }
    }

    #[tokio::test]
    async fn empty_waitlist_is_noop() {
        let fx = Fixture::new(2).await;
        let outcome = fx
            .promoter(PromotionPolicy::Single)
            .promote(fx.event_id)
            .await
            .unwrap();
        assert!(outcome.is_noop());
    }

    #[tokio::test]
    async fn single_policy_promotes_one_in_fifo_order() {
        let fx = Fixture::new(3).await;
        fx.add(RsvpStatus::Going).await;
        let first = fx.add(RsvpStatus::Waitlist).await;
        let second = fx.add(RsvpStatus::Waitlist).await;

        let outcome = fx
            .promoter(PromotionPolicy::Single)
            .promote(fx.event_id)
            .await
            .unwrap();

        assert_eq!(outcome.promoted, vec![first]);
        assert_eq!(fx.status(first).await, Some(RsvpStatus::Going));
        assert_eq!(fx.status(second).await, Some(RsvpStatus::Waitlist));
        assert_eq!(fx.waitlist.count(fx.event_id).await.unwrap(), 1);
    }

    #[tokio::test]
    async fn drain_policy_fills_free_seats_only() {
        let fx = Fixture::new(3).await;
        fx.add(RsvpStatus::Going).await;
        let a = fx.add(RsvpStatus::Waitlist).await;
        let b = fx.add(RsvpStatus::Waitlist).await;
        let c = fx.add(RsvpStatus::Waitlist).await;

        let outcome = fx
            .promoter(PromotionPolicy::DrainWhileRoom)
            .promote(fx.event_id)
            .await
            .unwrap();

        assert_eq!(outcome.promoted, vec![a, b]);
        assert_eq!(fx.status(c).await, Some(RsvpStatus::Waitlist));
        assert_eq!(fx.waitlist.oldest(fx.event_id).await.unwrap().unwrap().user_id, c);
    }

    #[tokio::test]
    async fn full_event_promotes_nobody() {
        let fx = Fixture::new(1).await;
        fx.add(RsvpStatus::Going).await;
        let waiting = fx.add(RsvpStatus::Waitlist).await;

        let outcome = fx
            .promoter(PromotionPolicy::Single)
            .promote(fx.event_id)
            .await
            .unwrap();

        assert!(outcome.is_noop());
        assert_eq!(fx.status(waiting).await, Some(RsvpStatus::Waitlist));
    }

    #[tokio::test]
    async fn stale_head_is_discarded_without_creating_registration() {
        let fx = Fixture::new(2).await;
        let ghost = UserId::new();
        fx.waitlist
            .enqueue(&WaitlistEntry::new(fx.event_id, ghost))
            .await
            .unwrap();
        let waiting = fx.add(RsvpStatus::Waitlist).await;

        let outcome = fx
            .promoter(PromotionPolicy::Single)
            .promote(fx.event_id)
            .await
            .unwrap();

        assert_eq!(outcome.stale_removed, 1);
        assert_eq!(outcome.promoted, vec![waiting]);
        assert_eq!(fx.status(ghost).await, None);
    }

    #[tokio::test]
    async fn unknown_event_fails() {
        let fx = Fixture::new(2).await;
        let result = fx
            .promoter(PromotionPolicy::Single)
            .promote(EventId::new())
            .await;
        assert!(matches!(result, Err(RegistrationError::EventNotFound(_))));
    }

    #[tokio::test]
    async fn worker_runs_submitted_requests() {
        let fx = Fixture::new(1).await;
        let waiting = fx.add(RsvpStatus::Waitlist).await;

        let (queue, handle) = PromotionWorker::spawn(fx.promoter(PromotionPolicy::Single), 8);
        assert!(queue.submit(PromotionRequest::new(fx.event_id, PromotionReason::RsvpChanged)));
        queue.flush().await;

        assert_eq!(fx.status(waiting).await, Some(RsvpStatus::Going));

        drop(queue);
        handle.join().await;
    }

    #[tokio::test]
    async fn worker_survives_failed_promotions() {
        let fx = Fixture::new(1).await;
        let waiting = fx.add(RsvpStatus::Waitlist).await;

        let (queue, handle) = PromotionWorker::spawn(fx.promoter(PromotionPolicy::Single), 8);
        assert!(queue.submit(PromotionRequest::new(EventId::new(), PromotionReason::Cancelled)));
        assert!(queue.submit(PromotionRequest::new(fx.event_id, PromotionReason::Cancelled)));
        queue.flush().await;

        assert_eq!(fx.status(waiting).await, Some(RsvpStatus::Going));
        assert!(!handle.is_finished());

        drop(queue);
        handle.join().await;
    }
}
