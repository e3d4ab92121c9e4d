//! FIFO bookkeeping for waitlisted registrations.
//!
//! Positions are assigned as `max + 1` on entry and compacted back to
//! `1..=N` (ordered by `registered_at`) after any removal or promotion.

use std::cmp::Ordering;
use tracing::debug;
use uuid::Uuid;

use crate::models::{Registration, RegistrationStatus};
use crate::store::{EntityStore, RegistrationQuery, TransactOutcome, WriteOp};
use crate::utils::error::{AppError, AppResult};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PositionChange {
    pub registration_id: Uuid,
    pub position: u32,
}

fn by_arrival(a: &Registration, b: &Registration) -> Ordering {
    a.registered_at
        .cmp(&b.registered_at)
        .then_with(|| a.waitlist_position.cmp(&b.waitlist_position))
        .then_with(|| a.id.cmp(&b.id))
}

fn by_position(a: &Registration, b: &Registration) -> Ordering {
    a.waitlist_position
        .unwrap_or(u32::MAX)
        .cmp(&b.waitlist_position.unwrap_or(u32::MAX))
        .then_with(|| a.registered_at.cmp(&b.registered_at))
        .then_with(|| a.id.cmp(&b.id))
}

/// The waitlisted registration that gets the next free seat.
pub fn next_in_line(registrations: &[Registration]) -> Option<&Registration> {
    registrations
        .iter()
        .filter(|r| r.is_waitlisted())
        .min_by(|a, b| by_position(a, b))
}

/// Position updates that turn `registrations` into a gap-free 1..N queue.
/// Entries already in place are left out.
pub fn plan_renumber(registrations: &[Registration]) -> Vec<PositionChange> {
    let mut waitlisted: Vec<&Registration> =
        registrations.iter().filter(|r| r.is_waitlisted()).collect();
    waitlisted.sort_by(|a, b| by_arrival(a, b));

    waitlisted
        .into_iter()
        .zip(1u32..)
        .filter(|(registration, position)| registration.waitlist_position != Some(*position))
        .map(|(registration, position)| PositionChange {
            registration_id: registration.id,
            position,
        })
        .collect()
}

/// Brings a local copy of the waitlist in line with `changes`.
pub fn apply_changes(registrations: &mut [Registration], changes: &[PositionChange]) {
    for change in changes {
        if let Some(registration) = registrations
            .iter_mut()
            .find(|r| r.id == change.registration_id)
        {
            registration.waitlist_position = Some(change.position);
        }
    }
}

pub fn renumber_ops(changes: &[PositionChange]) -> Vec<WriteOp> {
    changes
        .iter()
        .map(|change| WriteOp::SetWaitlistPosition {
            registration_id: change.registration_id,
            position: change.position,
        })
        .collect()
}

/// Confirmed first (oldest first), then the waitlist in queue order.
pub fn sort_for_event(registrations: &mut [Registration]) {
    registrations.sort_by(|a, b| match (a.status, b.status) {
        (RegistrationStatus::Confirmed, RegistrationStatus::Waitlisted) => Ordering::Less,
        (RegistrationStatus::Waitlisted, RegistrationStatus::Confirmed) => Ordering::Greater,
        (RegistrationStatus::Confirmed, RegistrationStatus::Confirmed) => by_arrival(a, b),
        (RegistrationStatus::Waitlisted, RegistrationStatus::Waitlisted) => by_position(a, b),
    });
}

pub fn sort_for_user(registrations: &mut [Registration]) {
    registrations.sort_by(by_arrival);
}

/// Compacts the waitlist of `event_id`, writing only the positions that
/// change. Returns how many registrations were renumbered.
pub async fn renumber(store: &dyn EntityStore, event_id: &str) -> AppResult<usize> {
    let waitlisted = store
        .query_registrations(
            &RegistrationQuery::by_event(event_id).with_status(Some(RegistrationStatus::Waitlisted)),
        )
        .await?;

    let changes = plan_renumber(&waitlisted);
    if changes.is_empty() {
        return Ok(0);
    }

    match store.transact_write(renumber_ops(&changes)).await? {
        TransactOutcome::Committed => {
            debug!(event_id, renumbered = changes.len(), "Waitlist renumbered");
            Ok(changes.len())
        }
        TransactOutcome::Rejected { op_index, reason } => Err(AppError::InternalServerError(
            format!(
                "Waitlist of event '{}' changed while renumbering (op {}: {:?})",
                event_id, op_index, reason
            ),
        )),
    }
}
