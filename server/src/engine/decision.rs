//! Side-effect free rules of the registration state machine.

use super::waitlist;
use crate::models::{Event, Registration};
use crate::store::{AttendeeChange, ConditionFailure, WriteOp};
use crate::utils::error::AppError;

/// Result of trying to take a seat. Losing the race for the last seat is an
/// ordinary outcome, not an error.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConfirmAttempt {
    Confirmed(Registration),
    CapacityConflict,
}

pub fn ensure_open(event: &Event) -> Result<(), AppError> {
    if event.status.accepts_registrations() {
        Ok(())
    } else {
        Err(AppError::EventInactive(event.id.clone()))
    }
}

/// Writes that reserve a seat and record the confirmed registration as one
/// unit.
pub fn confirm_ops(registration: &Registration) -> Vec<WriteOp> {
    vec![
        WriteOp::AdjustAttendees {
            event_id: registration.event_id.clone(),
            change: AttendeeChange::Reserve,
        },
        WriteOp::PutRegistration(registration.clone()),
    ]
}

/// Position the next waitlisted registration gets, or why there is none.
pub fn waitlist_position(event: &Event, waitlisted: &[Registration]) -> Result<u32, AppError> {
    if !event.has_waitlist {
        return Err(AppError::EventFull(event.id.clone()));
    }
    let count = waitlisted.iter().filter(|r| r.is_waitlisted()).count();
    if let Some(limit) = event.waitlist_capacity {
        if count >= limit as usize {
            return Err(AppError::WaitlistFull(event.id.clone()));
        }
    }
    let highest = waitlisted
        .iter()
        .filter_map(|r| r.waitlist_position)
        .max()
        .unwrap_or(0);
    Ok(highest + 1)
}

/// Writes needed to cancel `removed`, optionally handing its seat to the
/// head of the waitlist. The waitlist left behind is renumbered inside the
/// same transaction, so no committed state ever shows a gap.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CancellationPlan {
    pub removed: Registration,
    /// The promoted registration as it will look once committed.
    pub promotion: Option<Registration>,
    remaining: Vec<Registration>,
}

impl CancellationPlan {
    /// `waitlisted` is the event's waitlist as currently stored; it may
    /// include `removed` itself.
    pub fn new(removed: Registration, waitlisted: &[Registration]) -> Self {
        let remaining: Vec<Registration> = waitlisted
            .iter()
            .filter(|r| r.is_waitlisted() && r.id != removed.id)
            .cloned()
            .collect();
        let promotion = if removed.is_confirmed() {
            waitlist::next_in_line(&remaining).map(|head| {
                let mut promoted = head.clone();
                promoted.promote();
                promoted
            })
        } else {
            None
        };
        Self {
            removed,
            promotion,
            remaining,
        }
    }

    pub fn ops(&self) -> Vec<WriteOp> {
        let Some(promoted) = &self.promotion else {
            return self.release_ops();
        };
        let queue: Vec<Registration> = self
            .remaining
            .iter()
            .filter(|r| r.id != promoted.id)
            .cloned()
            .collect();

        let mut ops = vec![
            self.delete_op(),
            WriteOp::PromoteRegistration {
                registration_id: promoted.id,
            },
            WriteOp::AdjustAttendees {
                event_id: self.removed.event_id.clone(),
                change: AttendeeChange::Transfer,
            },
        ];
        ops.extend(waitlist::renumber_ops(&waitlist::plan_renumber(&queue)));
        ops
    }

    /// Cancellation without promotion.
    pub fn release_ops(&self) -> Vec<WriteOp> {
        let mut ops = vec![self.delete_op()];
        if self.removed.is_confirmed() {
            ops.push(WriteOp::AdjustAttendees {
                event_id: self.removed.event_id.clone(),
                change: AttendeeChange::Release,
            });
        }
        ops.extend(waitlist::renumber_ops(&waitlist::plan_renumber(
            &self.remaining,
        )));
        ops
    }

    /// Whether a rejection at `op_index` of [`ops`](Self::ops) came from
    /// handing the seat over rather than from the removal itself.
    pub fn is_handover_step(&self, op_index: usize) -> bool {
        self.promotion.is_some() && (op_index == 1 || op_index == 2)
    }

    fn delete_op(&self) -> WriteOp {
        WriteOp::DeleteRegistration {
            registration_id: self.removed.id,
            expected: self.removed.status,
        }
    }
}

/// Maps a store condition failure to the error the caller sees.
pub fn condition_error(reason: ConditionFailure, event_id: &str, user_id: &str) -> AppError {
    match reason {
        ConditionFailure::EventMissing => AppError::EventNotFound(event_id.to_string()),
        ConditionFailure::NoCapacity => AppError::EventFull(event_id.to_string()),
        ConditionFailure::DuplicateRegistration => AppError::AlreadyRegistered {
            event_id: event_id.to_string(),
            user_id: user_id.to_string(),
        },
        ConditionFailure::RegistrationMissing => AppError::NotRegistered {
            event_id: event_id.to_string(),
            user_id: user_id.to_string(),
        },
        ConditionFailure::NoAttendees | ConditionFailure::StatusMismatch => {
            AppError::InternalServerError(format!(
                "Unexpected store condition {:?} for event '{}'",
                reason, event_id
            ))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{CreateEventRequest, EventStatus};
    use chrono::Utc;

    fn event(has_waitlist: bool, waitlist_capacity: Option<u32>) -> Event {
        CreateEventRequest {
            event_id: Some("evt".to_string()),
            title: "Workshop".to_string(),
            description: "Hands-on".to_string(),
            date: "2026-11-20".to_string(),
            location: "Lyon".to_string(),
            organizer: "Crab Club".to_string(),
            capacity: 1,
            status: EventStatus::Active,
            has_waitlist,
            waitlist_capacity,
        }
        .into_event(Utc::now())
    }

    #[test]
    fn test_inactive_event_is_rejected() {
        let mut draft = event(false, None);
        draft.status = EventStatus::Draft;
        assert_eq!(ensure_open(&draft).unwrap_err().code(), "EVENT_INACTIVE");
        assert!(ensure_open(&event(false, None)).is_ok());
    }

    #[test]
    fn test_full_event_without_waitlist_is_full() {
        let err = waitlist_position(&event(false, None), &[]).unwrap_err();
        assert_eq!(err.code(), "EVENT_FULL");
    }

    #[test]
    fn test_waitlist_capacity_is_enforced() {
        let now = Utc::now();
        let waitlisted: Vec<Registration> = (1..=3)
            .map(|p| Registration::waitlisted("evt", &format!("user-{}", p), p, now))
            .collect();

        let err = waitlist_position(&event(true, Some(3)), &waitlisted).unwrap_err();
        assert_eq!(err.code(), "WAITLIST_FULL");
        assert_eq!(waitlist_position(&event(true, Some(4)), &waitlisted).unwrap(), 4);
        assert_eq!(waitlist_position(&event(true, None), &waitlisted).unwrap(), 4);
    }

    #[test]
    fn test_first_waitlist_position_is_one() {
        assert_eq!(waitlist_position(&event(true, None), &[]).unwrap(), 1);
    }

    #[test]
    fn test_confirm_reserves_before_insert() {
        let registration = Registration::confirmed("evt", "ada", Utc::now());
        let ops = confirm_ops(&registration);
        assert!(matches!(
            ops[0],
            WriteOp::AdjustAttendees {
                change: AttendeeChange::Reserve,
                ..
            }
        ));
        assert_eq!(ops[1], WriteOp::PutRegistration(registration));
    }

    fn set_positions(ops: &[WriteOp]) -> Vec<(uuid::Uuid, u32)> {
        ops.iter()
            .filter_map(|op| match op {
                WriteOp::SetWaitlistPosition {
                    registration_id,
                    position,
                } => Some((*registration_id, *position)),
                _ => None,
            })
            .collect()
    }

    #[test]
    fn test_cancelling_confirmed_hands_seat_to_head() {
        let now = Utc::now();
        let removed = Registration::confirmed("evt", "ada", now);
        let head = Registration::waitlisted("evt", "grace", 1, now);
        let next = Registration::waitlisted("evt", "linus", 2, now + chrono::Duration::seconds(1));

        let plan = CancellationPlan::new(removed, &[head.clone(), next.clone()]);
        let promoted = plan.promotion.clone().unwrap();
        assert_eq!(promoted.id, head.id);
        assert!(promoted.is_confirmed());

        let ops = plan.ops();
        assert_eq!(ops.len(), 4);
        assert!(matches!(
            ops[2],
            WriteOp::AdjustAttendees {
                change: AttendeeChange::Transfer,
                ..
            }
        ));
        assert_eq!(set_positions(&ops), vec![(next.id, 1)]);
        assert!(plan.is_handover_step(1));
        assert!(!plan.is_handover_step(0));

        let fallback = plan.release_ops();
        assert!(matches!(
            fallback[1],
            WriteOp::AdjustAttendees {
                change: AttendeeChange::Release,
                ..
            }
        ));
        assert!(set_positions(&fallback).is_empty());
    }

    #[test]
    fn test_cancelling_waitlisted_renumbers_in_the_same_writes() {
        let now = Utc::now();
        let removed = Registration::waitlisted("evt", "ada", 1, now);
        let second = Registration::waitlisted("evt", "grace", 2, now + chrono::Duration::seconds(1));
        let third = Registration::waitlisted("evt", "linus", 3, now + chrono::Duration::seconds(2));

        let plan = CancellationPlan::new(removed.clone(), &[removed, second.clone(), third.clone()]);
        assert!(plan.promotion.is_none());
        assert!(!plan.is_handover_step(1));

        let ops = plan.ops();
        assert!(matches!(ops[0], WriteOp::DeleteRegistration { .. }));
        assert_eq!(set_positions(&ops), vec![(second.id, 1), (third.id, 2)]);
    }

    #[test]
    fn test_cancelling_last_in_line_writes_no_positions() {
        let now = Utc::now();
        let first = Registration::waitlisted("evt", "ada", 1, now);
        let removed = Registration::waitlisted("evt", "grace", 2, now + chrono::Duration::seconds(1));

        let plan = CancellationPlan::new(removed.clone(), &[first, removed]);
        assert_eq!(plan.ops().len(), 1);
    }

    #[test]
    fn test_condition_errors_map_to_domain_codes() {
        assert_eq!(
            condition_error(ConditionFailure::DuplicateRegistration, "e", "u").code(),
            "ALREADY_REGISTERED"
        );
        assert_eq!(
            condition_error(ConditionFailure::RegistrationMissing, "e", "u").code(),
            "NOT_REGISTERED"
        );
        assert_eq!(
            condition_error(ConditionFailure::StatusMismatch, "e", "u").code(),
            "INTERNAL_SERVER_ERROR"
        );
    }
}
