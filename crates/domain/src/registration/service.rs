//! Registration service: register, RSVP, cancel, and operator reads.

use std::collections::HashSet;

use common::{EventId, UserId};
use registration_store::{
    CapacityOracle, Registration, RegistrationStore, RsvpStatus, SeatClaim, StoreError,
    WaitlistEntry, WaitlistQueue, timestamp_now,
};
use serde::Serialize;

use crate::config::EngineConfig;
use crate::error::RegistrationError;

use super::promotion::{
    PromotionHandle, PromotionOutcome, PromotionQueue, PromotionReason, PromotionRequest,
    PromotionWorker, WaitlistPromoter,
};

/// Reads of a registration an RSVP update takes before giving up on a row
/// that keeps changing underneath it.
const MAX_RSVP_ATTEMPTS: usize = 3;

/// Per-event counts for operator views.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct EventSummary {
    pub event_id: EventId,
    /// Configured limit, or None when unlimited.
    pub capacity: Option<u32>,
    pub going: u64,
    pub maybe: u64,
    pub not_going: u64,
    pub waitlisted: u64,
    /// Entries currently queued.
    pub waitlist_length: u64,
    /// Free seats, or None when unlimited.
    pub remaining: Option<u64>,
}

/// The single authority on who is registered for an event, at what status,
/// and whether the event has room.
///
/// Seat-freeing operations hand promotion off to a background worker and
/// return without waiting for it.
pub struct RegistrationService<R, W, C> {
    registrations: R,
    waitlist: W,
    capacities: C,
    config: EngineConfig,
    promoter: WaitlistPromoter<R, W, C>,
    promotions: PromotionQueue,
}

impl<R, W, C> RegistrationService<R, W, C>
where
    R: RegistrationStore + Clone + 'static,
    W: WaitlistQueue + Clone + 'static,
    C: CapacityOracle + Clone + 'static,
{
    /// Creates the service and spawns its promotion worker.
    ///
    /// The worker runs until the service is dropped; await the returned
    /// handle to let it finish queued requests.
    ///
    /// # Panics
    ///
    /// Panics if called outside a tokio runtime.
    pub fn new(
        registrations: R,
        waitlist: W,
        capacities: C,
        config: EngineConfig,
    ) -> (Self, PromotionHandle) {
        let promoter = WaitlistPromoter::new(
            registrations.clone(),
            waitlist.clone(),
            capacities.clone(),
            config.promotion_policy,
        );
        let (promotions, handle) =
            PromotionWorker::spawn(promoter.clone(), config.promotion_queue_capacity);

        let service = Self {
            registrations,
            waitlist,
            capacities,
            config,
            promoter,
            promotions,
        };
        (service, handle)
    }

    /// Returns the engine configuration.
    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    /// Registers a user for an event.
    ///
    /// The user is `going` if a seat is free (or the event is unlimited),
    /// otherwise `waitlist` with a queue entry. A user who is already
    /// registered gets `AlreadyRegistered` carrying the current registration.
    #[tracing::instrument(skip(self, utm))]
    pub async fn register(
        &self,
        event_id: EventId,
        user_id: UserId,
        source: String,
        utm: serde_json::Value,
    ) -> Result<Registration, RegistrationError> {
        if let Some(existing) = self.registrations.get(event_id, user_id).await? {
            return Err(RegistrationError::AlreadyRegistered(Box::new(existing)));
        }

        let capacity = self.capacities.capacity(event_id).await?;
        let registration = Registration::new(event_id, user_id, source, utm);

        match self
            .registrations
            .create_within_capacity(&registration, capacity)
            .await
        {
            Ok(true) => {
                metrics::counter!("registrations_created_total", "status" => "going").increment(1);
                tracing::info!("registered as going");
                return Ok(registration);
            }
            Ok(false) => {}
            Err(StoreError::Conflict { .. }) => {
                return Err(self.already_registered(event_id, user_id).await);
            }
            Err(err) => return Err(err.into()),
        }

        // Full: the registration row goes in first so a concurrent duplicate
        // cannot leave a queue entry behind.
        let registration = registration.with_status(RsvpStatus::Waitlist);
        match self.registrations.create(&registration).await {
            Ok(()) => {}
            Err(StoreError::Conflict { .. }) => {
                return Err(self.already_registered(event_id, user_id).await);
            }
            Err(err) => return Err(err.into()),
        }
        if let Err(err) = self.enqueue(event_id, user_id).await {
            // A waitlisted row without a queue entry would never be promoted.
            if let Err(cleanup) = self.registrations.delete(event_id, user_id).await {
                tracing::error!(error = %cleanup, "waitlisted without a queue entry");
            }
            return Err(err);
        }

        metrics::counter!("registrations_created_total", "status" => "waitlist").increment(1);
        tracing::info!("event full, waitlisted");
        Ok(registration)
    }

    /// Changes a user's RSVP status.
    ///
    /// Leaving `going` frees a seat and triggers promotion in the background.
    /// Entering `going` needs a free seat when `rsvp_capacity_check` is on.
    ///
    /// The write only applies if the status is still the one just read; a
    /// concurrent change (another RSVP, a promotion) makes it re-read and
    /// decide again, so bookkeeping follows the status actually replaced.
    #[tracing::instrument(skip(self))]
    pub async fn update_rsvp(
        &self,
        event_id: EventId,
        user_id: UserId,
        status: RsvpStatus,
    ) -> Result<Registration, RegistrationError> {
        for _ in 0..MAX_RSVP_ATTEMPTS {
            let mut registration = self
                .registrations
                .get(event_id, user_id)
                .await?
                .ok_or(RegistrationError::RegistrationNotFound { event_id, user_id })?;
            let previous = registration.status;
            let at = timestamp_now();

            let needs_seat = status == RsvpStatus::Going && previous != RsvpStatus::Going;
            let applied = if needs_seat && self.config.rsvp_capacity_check {
                let capacity = self.capacities.capacity(event_id).await?;
                match self
                    .registrations
                    .claim_seat(event_id, user_id, previous, capacity, at)
                    .await?
                {
                    SeatClaim::Claimed => true,
                    SeatClaim::Full => return Err(RegistrationError::CapacityReached(event_id)),
                    SeatClaim::Missing => false,
                }
            } else {
                self.registrations
                    .update_status(event_id, user_id, previous, status, at)
                    .await?
            };

            if !applied {
                tracing::debug!(%previous, "registration changed concurrently, re-reading");
                continue;
            }

            registration.status = status;
            registration.updated_at = at;
            self.settle_waitlist(event_id, user_id, previous, status).await?;

            metrics::counter!("rsvp_updates_total", "status" => status.as_str()).increment(1);
            tracing::info!(%previous, "rsvp updated");

            if previous.holds_seat() && !status.holds_seat() {
                self.request_promotion(event_id, PromotionReason::RsvpChanged);
            }
            return Ok(registration);
        }

        Err(RegistrationError::ConcurrentUpdate { event_id, user_id })
    }

    /// Cancels a user's registration.
    ///
    /// Deleting a missing registration is not an error. Promotion is always
    /// requested afterwards.
    #[tracing::instrument(skip(self))]
    pub async fn cancel(&self, event_id: EventId, user_id: UserId) -> Result<(), RegistrationError> {
        let deleted = self.registrations.delete(event_id, user_id).await?;
        if let Err(err) = self.waitlist.remove_for_user(event_id, user_id).await {
            // The promoter discards the leftover entry when it reaches the head.
            tracing::warn!(error = %err, "failed to remove waitlist entry");
        }

        if deleted {
            metrics::counter!("registrations_cancelled_total").increment(1);
            tracing::info!("registration cancelled");
        }

        self.request_promotion(event_id, PromotionReason::Cancelled);
        Ok(())
    }

    /// Loads a user's registration.
    pub async fn get_registration(
        &self,
        event_id: EventId,
        user_id: UserId,
    ) -> Result<Registration, RegistrationError> {
        self.registrations
            .get(event_id, user_id)
            .await?
            .ok_or(RegistrationError::RegistrationNotFound { event_id, user_id })
    }

    /// Lists registrations with any of `statuses`, newest first.
    ///
    /// An empty slice means every status.
    pub async fn list_registrations(
        &self,
        event_id: EventId,
        statuses: &[RsvpStatus],
    ) -> Result<Vec<Registration>, RegistrationError> {
        let statuses = if statuses.is_empty() {
            &RsvpStatus::ALL[..]
        } else {
            statuses
        };
        Ok(self.registrations.list_by_status(event_id, statuses).await?)
    }

    /// Returns the event's waitlist in queue order.
    pub async fn waitlist(&self, event_id: EventId) -> Result<Vec<WaitlistEntry>, RegistrationError> {
        Ok(self.waitlist.list(event_id).await?)
    }

    /// Returns the user's 1-based position in the event's waitlist.
    pub async fn waitlist_position(
        &self,
        event_id: EventId,
        user_id: UserId,
    ) -> Result<Option<u64>, RegistrationError> {
        Ok(self.waitlist.position(event_id, user_id).await?)
    }

    /// Counts registrations per status for the event.
    #[tracing::instrument(skip(self))]
    pub async fn summary(&self, event_id: EventId) -> Result<EventSummary, RegistrationError> {
        let capacity = self.capacities.capacity(event_id).await?;
        let going = self
            .registrations
            .count_by_status(event_id, RsvpStatus::Going)
            .await?;
        let maybe = self
            .registrations
            .count_by_status(event_id, RsvpStatus::Maybe)
            .await?;
        let not_going = self
            .registrations
            .count_by_status(event_id, RsvpStatus::NotGoing)
            .await?;
        let waitlisted = self
            .registrations
            .count_by_status(event_id, RsvpStatus::Waitlist)
            .await?;
        let waitlist_length = self.waitlist.count(event_id).await?;

        Ok(EventSummary {
            event_id,
            capacity: capacity.limit(),
            going,
            maybe,
            not_going,
            waitlisted,
            waitlist_length,
            remaining: capacity.remaining(going),
        })
    }

    /// Runs a promotion pass inline and reports what it did.
    ///
    /// Used by operators to reconcile a waitlist after dropped or failed
    /// background promotions. Waitlisted registrations missing from the
    /// queue are queued again first, at the time they became waitlisted.
    #[tracing::instrument(skip(self))]
    pub async fn reconcile(&self, event_id: EventId) -> Result<PromotionOutcome, RegistrationError> {
        let requeued = self.requeue_orphans(event_id).await?;
        let mut outcome = self.promoter.promote(event_id).await?;
        outcome.requeued = requeued;
        metrics::counter!("waitlist_promotions_total").increment(outcome.promoted.len() as u64);
        Ok(outcome)
    }

    /// Waits until all promotion requests submitted so far have been handled.
    pub async fn flush_promotions(&self) {
        self.promotions.flush().await;
    }

    fn request_promotion(&self, event_id: EventId, reason: PromotionReason) {
        self.promotions.submit(PromotionRequest::new(event_id, reason));
    }

    /// Keeps the queue in step with a status change that was just written.
    async fn settle_waitlist(
        &self,
        event_id: EventId,
        user_id: UserId,
        previous: RsvpStatus,
        status: RsvpStatus,
    ) -> Result<(), RegistrationError> {
        if previous == RsvpStatus::Waitlist && status != RsvpStatus::Waitlist {
            if let Err(err) = self.waitlist.remove_for_user(event_id, user_id).await {
                tracing::warn!(error = %err, "failed to remove waitlist entry");
            }
            return Ok(());
        }
        if status != RsvpStatus::Waitlist || previous == RsvpStatus::Waitlist {
            return Ok(());
        }

        let Err(err) = self.enqueue(event_id, user_id).await else {
            return Ok(());
        };
        // Undo the move into waitlist; reconcile picks up a row that stays.
        let reverted = match self.leave_waitlist(event_id, user_id, previous).await {
            Ok(reverted) => reverted,
            Err(revert_err) => {
                tracing::warn!(error = %revert_err, "failed to undo move into waitlist");
                false
            }
        };
        if !reverted {
            tracing::error!(%previous, "waitlisted without a queue entry");
            if previous.holds_seat() {
                self.request_promotion(event_id, PromotionReason::RsvpChanged);
            }
        }
        Err(err)
    }

    /// Moves a `waitlist` row back to `to`, taking a seat again for `going`.
    async fn leave_waitlist(
        &self,
        event_id: EventId,
        user_id: UserId,
        to: RsvpStatus,
    ) -> Result<bool, RegistrationError> {
        let at = timestamp_now();
        if to == RsvpStatus::Going {
            let capacity = self.capacities.capacity(event_id).await?;
            let claim = self
                .registrations
                .claim_seat(event_id, user_id, RsvpStatus::Waitlist, capacity, at)
                .await?;
            return Ok(claim == SeatClaim::Claimed);
        }
        Ok(self
            .registrations
            .update_status(event_id, user_id, RsvpStatus::Waitlist, to, at)
            .await?)
    }

    /// Queues waitlisted registrations that have no entry.
    async fn requeue_orphans(&self, event_id: EventId) -> Result<u32, RegistrationError> {
        let waitlisted = self
            .registrations
            .list_by_status(event_id, &[RsvpStatus::Waitlist])
            .await?;
        if waitlisted.is_empty() {
            return Ok(0);
        }

        let queued: HashSet<UserId> = self
            .waitlist
            .list(event_id)
            .await?
            .into_iter()
            .map(|e| e.user_id)
            .collect();

        let mut requeued = 0;
        for registration in waitlisted {
            if queued.contains(&registration.user_id) {
                continue;
            }
            let mut entry = WaitlistEntry::new(event_id, registration.user_id);
            entry.created_at = registration.updated_at;
            match self.waitlist.enqueue(&entry).await {
                Ok(()) => {
                    requeued += 1;
                    tracing::warn!(
                        user_id = %registration.user_id,
                        "requeued orphaned waitlist registration"
                    );
                }
                Err(StoreError::Conflict { .. }) => {}
                Err(err) => return Err(err.into()),
            }
        }
        Ok(requeued)
    }

    async fn enqueue(&self, event_id: EventId, user_id: UserId) -> Result<(), RegistrationError> {
        match self
            .waitlist
            .enqueue(&WaitlistEntry::new(event_id, user_id))
            .await
        {
            // Already queued: keep the original position.
            Ok(()) | Err(StoreError::Conflict { .. }) => Ok(()),
            Err(err) => Err(err.into()),
        }
    }

    async fn already_registered(&self, event_id: EventId, user_id: UserId) -> RegistrationError {
        match self.registrations.get(event_id, user_id).await {
            Ok(Some(existing)) => RegistrationError::AlreadyRegistered(Box::new(existing)),
            Ok(None) => RegistrationError::Store(StoreError::Conflict { event_id, user_id }),
            Err(err) => err.into(),
        }
    }
}
