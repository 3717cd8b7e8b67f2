//! Guarded request transitions.
//!
//! `Pending` is the only non-terminal state. Both voting and owner
//! cancellation leave it through these functions, which refuse to touch a
//! request that has already been decided.

use crate::error::Error;
use chrono::{DateTime, Utc};
use ledger::{Request, Resolution};
use uuid::Uuid;

/// Move a pending request to the status implied by `resolution`.
pub fn finalize(
    request: &mut Request,
    resolution: Resolution,
    now: DateTime<Utc>,
) -> Result<(), Error> {
    let target = resolution.status();
    if !request.status.can_transition_to(target) {
        return Err(Error::InvalidState(format!(
            "request {} is {} and cannot become {}",
            request.id, request.status, target
        )));
    }

    request.status = target;
    request.resolution = Some(resolution);
    request.processed_at = Some(now);
    Ok(())
}

/// Owner cancellation: `Pending -> Rejected` with resolution `Cancelled`.
pub fn cancel(request: &mut Request, by: Uuid, now: DateTime<Utc>) -> Result<(), Error> {
    if request.user_id != by {
        return Err(Error::Forbidden(
            "only the requester can cancel a request".to_string(),
        ));
    }
    if !request.is_pending() {
        return Err(Error::InvalidState(format!(
            "request {} is {}; only pending requests can be cancelled",
            request.id, request.status
        )));
    }
    finalize(request, Resolution::Cancelled, now)
}
