use tracing::info;
use uuid::Uuid;

use crate::auth::jwt::AuthUser;
use crate::error::AppError;
use crate::opportunities::repo::{OpportunityStore, MAX_WRITE_ATTEMPTS};
use crate::opportunities::repo_types::{Opportunity, Stamp, Volunteer};
use crate::state::AppState;
use crate::users::repo::UserStore;

/// Signs the caller up for the slot starting at `slot_start`. Idempotent: a
/// caller already in the slot gets a silent success. A full slot is a
/// conflict and writes nothing.
///
/// The capacity check and the append are made atomic against concurrent
/// signups by the store's revision compare-and-swap: a lost race reloads the
/// opportunity and re-checks against fresh state, so two racing callers can
/// never both claim the last seat.
pub async fn sign_up(
    state: &AppState,
    opportunity_id: Uuid,
    slot_start: i64,
    caller: AuthUser,
) -> Result<(), AppError> {
    caller.require_volunteer()?;

    let user = state
        .users
        .find_by_id(caller.user_id)
        .await?
        .ok_or_else(|| AppError::not_found(format!("No user with id {}", caller.user_id)))?;

    for _ in 0..MAX_WRITE_ATTEMPTS {
        let mut opportunity = load(state, opportunity_id).await?;
        let revision = opportunity.revision;
        let slot = opportunity
            .slot_at_mut(slot_start)
            .ok_or_else(|| AppError::validation("No slot at that start time"))?;

        if slot.volunteer_index(caller.user_id).is_some() {
            return Ok(());
        }

        if slot.is_full() {
            return Err(AppError::conflict("Volunteer limit reached for slot"));
        }

        slot.volunteers.push(Volunteer {
            id: user.id,
            name: user.name.clone(),
        });
        opportunity.last_modified = Stamp::now(caller.user_id);

        if state.opportunities.update(&opportunity, revision).await? {
            info!(
                opportunity_id = %opportunity_id,
                user_id = %caller.user_id,
                slot_start,
                "volunteer signed up"
            );
            return Ok(());
        }
    }
    Err(AppError::conflict(
        "The opportunity was modified concurrently, please retry",
    ))
}

/// Removes the caller's signup from the slot. Idempotent: an absent entry is
/// a silent success.
pub async fn cancel_signup(
    state: &AppState,
    opportunity_id: Uuid,
    slot_start: i64,
    caller: AuthUser,
) -> Result<(), AppError> {
    caller.require_volunteer()?;

    for _ in 0..MAX_WRITE_ATTEMPTS {
        let mut opportunity = load(state, opportunity_id).await?;
        let revision = opportunity.revision;
        let slot = opportunity
            .slot_at_mut(slot_start)
            .ok_or_else(|| AppError::validation("No slot at that start time"))?;

        let Some(index) = slot.volunteer_index(caller.user_id) else {
            return Ok(());
        };

        slot.volunteers.remove(index);
        opportunity.last_modified = Stamp::now(caller.user_id);

        if state.opportunities.update(&opportunity, revision).await? {
            info!(
                opportunity_id = %opportunity_id,
                user_id = %caller.user_id,
                slot_start,
                "volunteer signup cancelled"
            );
            return Ok(());
        }
    }
    Err(AppError::conflict(
        "The opportunity was modified concurrently, please retry",
    ))
}

async fn load(state: &AppState, id: Uuid) -> Result<Opportunity, AppError> {
    state
        .opportunities
        .find_by_id(id)
        .await?
        .ok_or_else(|| AppError::not_found(format!("No opportunity with id {id}")))
}
