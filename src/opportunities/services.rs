use serde::Deserialize;
use serde_json::{Map, Value};
use tracing::info;
use uuid::Uuid;

use crate::error::AppError;
use crate::offices;
use crate::opportunities::dto::OpportunitySummary;
use crate::opportunities::repo::{ListQuery, OpportunityStore, MAX_WRITE_ATTEMPTS};
use crate::opportunities::repo_types::{Location, Opportunity, Slot, Stamp, Status};
use crate::state::AppState;
use crate::validate;

const CREATE_REQUIRED: [&str; 6] = [
    "title",
    "description",
    "office",
    "location",
    "deadline",
    "slots",
];
const CREATE_ALLOWED: [&str; 7] = [
    "title",
    "description",
    "office",
    "location",
    "deadline",
    "slots",
    "waiver",
];
const UPDATE_ALLOWED: [&str; 8] = [
    "_id",
    "title",
    "description",
    "office",
    "location",
    "deadline",
    "slots",
    "waiver",
];
const LOCATION_REQUIRED: [&str; 2] = ["name", "address"];
const SLOT_ALLOWED: [&str; 3] = ["start", "limit", "volunteers"];

fn as_object(body: &Value) -> Result<&Map<String, Value>, AppError> {
    body.as_object()
        .ok_or_else(|| AppError::validation("Payload must be a JSON object"))
}

fn parse_id(obj: &Map<String, Value>) -> Result<Uuid, AppError> {
    let raw = obj
        .get("_id")
        .and_then(Value::as_str)
        .ok_or_else(|| AppError::validation("The '_id' property must be a string"))?;
    Uuid::parse_str(raw).map_err(|_| AppError::validation(format!("Invalid id: {raw}")))
}

fn not_found(id: Uuid) -> AppError {
    AppError::not_found(format!("No opportunity with id {id}"))
}

fn lost_race() -> AppError {
    AppError::conflict("The opportunity was modified concurrently, please retry")
}

/// Typed checks for whichever of the opportunity fields are present. Check
/// order is fixed: title, description, office, location, deadline, waiver,
/// slots.
fn check_fields(obj: &Map<String, Value>) -> Result<(), AppError> {
    validate::check_string(obj, "title", None)?;
    validate::check_string(obj, "description", None)?;

    let office_codes = offices::codes();
    validate::check_string(obj, "office", Some(&office_codes))?;

    check_location(obj)?;
    validate::check_number(obj, "deadline", None, None)?;
    validate::check_string(obj, "waiver", None)?;
    check_slots(obj)?;
    Ok(())
}

fn check_location(obj: &Map<String, Value>) -> Result<(), AppError> {
    validate::check_object(obj, "location")?;
    let Some(location) = obj.get("location").and_then(Value::as_object) else {
        return Ok(());
    };
    validate::require_properties(location, &LOCATION_REQUIRED)?;
    validate::restrict_properties(location, &LOCATION_REQUIRED)?;
    validate::check_string(location, "name", None)?;
    validate::check_string(location, "address", None)?;
    Ok(())
}

fn check_slots(obj: &Map<String, Value>) -> Result<(), AppError> {
    validate::check_array(obj, "slots", None)?;
    let Some(slots) = obj.get("slots").and_then(Value::as_array) else {
        return Ok(());
    };
    for slot in slots {
        let Some(slot) = slot.as_object() else {
            return Err(AppError::validation(format!(
                "Each slot must be a plain object, not this: {slot}"
            )));
        };
        validate::require_properties(slot, &["start", "limit"])?;
        validate::restrict_properties(slot, &SLOT_ALLOWED)?;
        validate::check_number(slot, "start", None, None)?;
        validate::check_number(slot, "limit", Some(1.0), None)?;
    }
    Ok(())
}

/// Caller-supplied slot. Any `volunteers` in the input are dropped here:
/// signups only ever enter a slot through the signup operations.
#[derive(Clone, Deserialize)]
struct SlotInput {
    start: i64,
    limit: i64,
}

#[derive(Deserialize)]
struct CreateFields {
    title: String,
    description: String,
    office: String,
    location: Location,
    deadline: i64,
    waiver: Option<String>,
    slots: Vec<SlotInput>,
}

#[derive(Clone, Deserialize)]
struct UpdateFields {
    title: Option<String>,
    description: Option<String>,
    office: Option<String>,
    location: Option<Location>,
    deadline: Option<i64>,
    slots: Option<Vec<SlotInput>>,
}

/// Creates an opportunity. The stored record always starts out `pending` with
/// empty volunteer lists; the caller cannot pre-seed either.
pub async fn create(state: &AppState, body: &Value, creator: Uuid) -> Result<Opportunity, AppError> {
    let obj = as_object(body)?;
    validate::require_properties(obj, &CREATE_REQUIRED)?;
    validate::restrict_properties(obj, &CREATE_ALLOWED)?;
    check_fields(obj)?;

    let fields: CreateFields = serde_json::from_value(Value::Object(obj.clone()))
        .map_err(|e| AppError::validation(format!("Invalid payload: {e}")))?;

    let stamp = Stamp::now(creator);
    let opportunity = Opportunity {
        id: Uuid::new_v4(),
        title: fields.title,
        description: fields.description,
        office: fields.office,
        location: fields.location,
        deadline: fields.deadline,
        waiver: fields.waiver,
        status: Status::Pending,
        slots: fields
            .slots
            .into_iter()
            .map(|slot| Slot {
                start: slot.start,
                limit: slot.limit,
                volunteers: Vec::new(),
            })
            .collect(),
        created: stamp.clone(),
        last_modified: stamp,
        revision: 0,
    };
    state.opportunities.insert(&opportunity).await?;
    info!(opportunity_id = %opportunity.id, office = %opportunity.office, "opportunity created");
    Ok(opportunity)
}

/// Lists opportunities as summaries. `status` defaults to `open` when the key
/// is absent; an explicit null or empty value disables the status filter.
/// Callers without the champion or admin role have any `status` key stripped
/// first, so they only ever see open opportunities.
pub async fn list(
    state: &AppState,
    filter: &Value,
    privileged: bool,
) -> Result<Vec<OpportunitySummary>, AppError> {
    let mut obj = as_object(filter)?.clone();
    if !privileged {
        obj.remove("status");
    }

    validate::check_string(&obj, "q", None)?;
    validate::check_string(&obj, "office", None)?;
    validate::check_string(&obj, "status", None)?;

    let status = match obj.get("status") {
        None => Some(Status::Open),
        Some(Value::Null) => None,
        Some(value) => match value.as_str().map(str::trim) {
            Some("") | None => None,
            Some(name) => Some(name.parse()?),
        },
    };

    let string_filter = |key: &str| {
        obj.get(key)
            .and_then(Value::as_str)
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .map(str::to_string)
    };
    let query = ListQuery {
        title_contains: string_filter("q"),
        office: string_filter("office"),
        status,
    };

    let found = state.opportunities.find(&query).await?;
    Ok(found.into_iter().map(OpportunitySummary::from).collect())
}

pub async fn get(state: &AppState, id: Uuid) -> Result<Opportunity, AppError> {
    state
        .opportunities
        .find_by_id(id)
        .await?
        .ok_or_else(|| not_found(id))
}

/// Partial update. Only the supplied fields are checked and written. `status`
/// is not in the allowed set: lifecycle changes go through [`set_status`]
/// only. Writes go through the revision compare-and-swap, reloading and
/// re-applying on a lost race.
pub async fn update(state: &AppState, body: &Value, editor: Uuid) -> Result<Opportunity, AppError> {
    let obj = as_object(body)?;
    validate::require_properties(obj, &["_id"])?;
    validate::restrict_properties(obj, &UPDATE_ALLOWED)?;
    validate::check_string(obj, "_id", None)?;
    check_fields(obj)?;

    let id = parse_id(obj)?;
    let fields: UpdateFields = serde_json::from_value(Value::Object(obj.clone()))
        .map_err(|e| AppError::validation(format!("Invalid payload: {e}")))?;

    for _ in 0..MAX_WRITE_ATTEMPTS {
        let mut opportunity = get(state, id).await?;
        let revision = opportunity.revision;

        apply_fields(&mut opportunity, obj, fields.clone())?;
        opportunity.last_modified = Stamp::now(editor);

        if state.opportunities.update(&opportunity, revision).await? {
            opportunity.revision = revision + 1;
            info!(opportunity_id = %id, "opportunity updated");
            return Ok(opportunity);
        }
    }
    Err(lost_race())
}

fn apply_fields(
    opportunity: &mut Opportunity,
    obj: &Map<String, Value>,
    fields: UpdateFields,
) -> Result<(), AppError> {
    if let Some(title) = fields.title {
        opportunity.title = title;
    }
    if let Some(description) = fields.description {
        opportunity.description = description;
    }
    if let Some(office) = fields.office {
        opportunity.office = office;
    }
    if let Some(location) = fields.location {
        opportunity.location = location;
    }
    if let Some(deadline) = fields.deadline {
        opportunity.deadline = deadline;
    }
    // A supplied null clears the waiver; every other field ignores null.
    if let Some(value) = obj.get("waiver") {
        opportunity.waiver = value.as_str().map(str::to_string);
    }
    if let Some(slots) = fields.slots {
        apply_slots(opportunity, slots)?;
    }
    Ok(())
}

/// Replaces the slot list. Volunteers already recorded for a slot carry over
/// to the replacement with the same `start`; a replacement whose limit cannot
/// hold them is rejected so the capacity invariant survives the edit.
fn apply_slots(opportunity: &mut Opportunity, inputs: Vec<SlotInput>) -> Result<(), AppError> {
    let mut next = Vec::with_capacity(inputs.len());
    for input in inputs {
        let volunteers = opportunity
            .slot_at(input.start)
            .map(|slot| slot.volunteers.clone())
            .unwrap_or_default();

        if volunteers.len() as i64 > input.limit {
            return Err(AppError::conflict(format!(
                "Slot starting at {} already has {} volunteers, cannot set its limit to {}",
                input.start,
                volunteers.len(),
                input.limit
            )));
        }

        next.push(Slot {
            start: input.start,
            limit: input.limit,
            volunteers,
        });
    }
    opportunity.slots = next;
    Ok(())
}

/// Moves the opportunity along the lifecycle table. An illegal transition is
/// a conflict and leaves the stored status untouched.
pub async fn set_status(
    state: &AppState,
    id: Uuid,
    new_status: &str,
    editor: Uuid,
) -> Result<Opportunity, AppError> {
    let new_status: Status = new_status.trim().parse()?;

    for _ in 0..MAX_WRITE_ATTEMPTS {
        let mut opportunity = get(state, id).await?;
        let revision = opportunity.revision;

        if !opportunity.status.can_transition_to(new_status) {
            return Err(AppError::conflict(format!(
                "Cannot change status from {} to {}",
                opportunity.status, new_status
            )));
        }

        opportunity.status = new_status;
        opportunity.last_modified = Stamp::now(editor);

        if state.opportunities.update(&opportunity, revision).await? {
            opportunity.revision = revision + 1;
            info!(opportunity_id = %id, status = %new_status, "opportunity status changed");
            return Ok(opportunity);
        }
    }
    Err(lost_race())
}

/// Deletes an opportunity that has never been opened. Anything past `pending`
/// must be archived instead, preserving history for anyone already signed up.
pub async fn delete(state: &AppState, id: Uuid) -> Result<(), AppError> {
    for _ in 0..MAX_WRITE_ATTEMPTS {
        let opportunity = get(state, id).await?;

        if opportunity.status != Status::Pending {
            return Err(AppError::conflict(format!(
                "Only pending opportunities can be deleted, this one is {}",
                opportunity.status
            )));
        }

        if state
            .opportunities
            .delete(id, opportunity.revision)
            .await?
        {
            info!(opportunity_id = %id, "opportunity deleted");
            return Ok(());
        }
    }
    Err(lost_race())
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn state() -> AppState {
        AppState::fake()
    }

    fn creator() -> Uuid {
        Uuid::new_v4()
    }

    fn valid_body() -> Value {
        json!({
            "title": "Park Cleanup",
            "description": "Bring gloves and water",
            "office": "MIDV",
            "location": { "name": "Liberty Park", "address": "600 E 900 S" },
            "deadline": 1_760_000_000_000i64,
            "slots": [
                { "start": 1_760_100_000_000i64, "limit": 5 },
                { "start": 1_760_200_000_000i64, "limit": 2 }
            ]
        })
    }

    #[tokio::test]
    async fn create_starts_pending_and_stamps_the_creator() {
        let state = state();
        let user = creator();
        let opportunity = create(&state, &valid_body(), user).await.expect("create");

        assert_eq!(opportunity.status, Status::Pending);
        assert_eq!(opportunity.created.user, user);
        assert_eq!(opportunity.last_modified.user, user);
        assert_eq!(opportunity.slots.len(), 2);

        let stored = get(&state, opportunity.id).await.expect("get");
        assert_eq!(stored.title, "Park Cleanup");
    }

    #[tokio::test]
    async fn create_discards_caller_supplied_volunteers() {
        let state = state();
        let mut body = valid_body();
        body["slots"] = json!([{
            "start": 1_760_100_000_000i64,
            "limit": 5,
            "volunteers": [{ "id": Uuid::new_v4().to_string(), "name": "Bogus" }]
        }]);

        let opportunity = create(&state, &body, creator()).await.expect("create");
        assert!(opportunity.slots[0].volunteers.is_empty());
    }

    #[tokio::test]
    async fn create_rejects_bad_shapes() {
        let state = state();

        let mut body = valid_body();
        body["office"] = json!("NOPE");
        assert!(matches!(
            create(&state, &body, creator()).await.unwrap_err(),
            AppError::Validation(_)
        ));

        let mut body = valid_body();
        body["location"] = json!({ "name": "No address" });
        let err = create(&state, &body, creator()).await.unwrap_err();
        assert!(err.to_string().contains("address"));

        let mut body = valid_body();
        body["slots"] = json!([{ "start": 1, "limit": 0 }]);
        let err = create(&state, &body, creator()).await.unwrap_err();
        assert!(err.to_string().contains("less than 1"));

        let mut body = valid_body();
        body.as_object_mut().unwrap().remove("deadline");
        let err = create(&state, &body, creator()).await.unwrap_err();
        assert!(err.to_string().contains("deadline"));

        let mut body = valid_body();
        body["status"] = json!("open");
        let err = create(&state, &body, creator()).await.unwrap_err();
        assert!(err.to_string().contains("status"));
    }

    #[tokio::test]
    async fn list_defaults_to_open_and_strips_status_for_unprivileged_callers() {
        let state = state();
        let user = creator();
        let pending = create(&state, &valid_body(), user).await.expect("create");
        let opened = create(&state, &valid_body(), user).await.expect("create");
        set_status(&state, opened.id, "open", user).await.expect("open");

        // Key absent: only open opportunities, regardless of privilege.
        let found = list(&state, &json!({}), true).await.expect("list");
        assert_eq!(found.len(), 1);
        assert_eq!(found[0].id, opened.id);

        // A privileged caller can ask for another status, or disable the
        // filter with an empty value.
        let found = list(&state, &json!({ "status": "pending" }), true)
            .await
            .expect("list");
        assert_eq!(found.len(), 1);
        assert_eq!(found[0].id, pending.id);

        let found = list(&state, &json!({ "status": "" }), true).await.expect("list");
        assert_eq!(found.len(), 2);

        // An unprivileged caller's status key is stripped before filtering.
        let found = list(&state, &json!({ "status": "pending" }), false)
            .await
            .expect("list");
        assert_eq!(found.len(), 1);
        assert_eq!(found[0].id, opened.id);
    }

    #[tokio::test]
    async fn list_matches_title_as_a_literal_substring() {
        let state = state();
        let user = creator();

        let mut body = valid_body();
        body["title"] = json!("50% Off Gala (fundraiser)");
        let gala = create(&state, &body, user).await.expect("create");
        set_status(&state, gala.id, "open", user).await.expect("open");

        let other = create(&state, &valid_body(), user).await.expect("create");
        set_status(&state, other.id, "open", user).await.expect("open");

        // Regex metacharacters match themselves.
        let found = list(&state, &json!({ "q": "50% off gala (" }), false)
            .await
            .expect("list");
        assert_eq!(found.len(), 1);
        assert_eq!(found[0].id, gala.id);

        // `.` is not a wildcard.
        let found = list(&state, &json!({ "q": "50. Off" }), false)
            .await
            .expect("list");
        assert!(found.is_empty());
    }

    #[tokio::test]
    async fn list_replaces_slot_detail_with_open_seat_counts() {
        let state = state();
        let user = creator();
        let opportunity = create(&state, &valid_body(), user).await.expect("create");
        set_status(&state, opportunity.id, "open", user)
            .await
            .expect("open");

        let found = list(&state, &json!({}), false).await.expect("list");
        assert_eq!(found.len(), 1);
        // limit 5 + limit 2, nobody signed up yet
        assert_eq!(found[0].needed_volunteers, 7);
    }

    #[tokio::test]
    async fn list_rejects_bad_filter_values() {
        let state = state();

        let err = list(&state, &json!({ "q": 42 }), true).await.unwrap_err();
        assert!(matches!(err, AppError::Validation(_)));

        let err = list(&state, &json!({ "status": "bogus" }), true)
            .await
            .unwrap_err();
        assert!(err.to_string().contains("Invalid status"));

        // Filtering by office is exact.
        let user = creator();
        let opportunity = create(&state, &valid_body(), user).await.expect("create");
        set_status(&state, opportunity.id, "open", user)
            .await
            .expect("open");
        let found = list(&state, &json!({ "office": "BOCA" }), false)
            .await
            .expect("list");
        assert!(found.is_empty());
        let found = list(&state, &json!({ "office": "MIDV" }), false)
            .await
            .expect("list");
        assert_eq!(found.len(), 1);
    }

    #[tokio::test]
    async fn update_writes_only_the_supplied_fields() {
        let state = state();
        let user = creator();
        let opportunity = create(&state, &valid_body(), user).await.expect("create");

        let editor = Uuid::new_v4();
        let body = json!({ "_id": opportunity.id.to_string(), "title": "New Title" });
        let updated = update(&state, &body, editor).await.expect("update");

        assert_eq!(updated.title, "New Title");
        assert_eq!(updated.description, "Bring gloves and water");
        assert_eq!(updated.last_modified.user, editor);
        assert_eq!(updated.created.user, user);
    }

    #[tokio::test]
    async fn update_does_not_accept_a_status_field() {
        let state = state();
        let opportunity = create(&state, &valid_body(), creator()).await.expect("create");

        let body = json!({ "_id": opportunity.id.to_string(), "status": "open" });
        let err = update(&state, &body, creator()).await.unwrap_err();
        assert!(matches!(err, AppError::Validation(_)));
        assert!(err.to_string().contains("status"));

        let stored = get(&state, opportunity.id).await.expect("get");
        assert_eq!(stored.status, Status::Pending);
    }

    #[tokio::test]
    async fn update_requires_a_resolvable_id() {
        let state = state();

        let body = json!({ "_id": Uuid::new_v4().to_string(), "title": "x" });
        assert!(matches!(
            update(&state, &body, creator()).await.unwrap_err(),
            AppError::NotFound(_)
        ));

        let body = json!({ "title": "No id" });
        assert!(matches!(
            update(&state, &body, creator()).await.unwrap_err(),
            AppError::Validation(_)
        ));
    }

    #[tokio::test]
    async fn update_carries_signups_across_a_slot_edit() {
        let state = state();
        let user = creator();
        let opportunity = create(&state, &valid_body(), user).await.expect("create");

        // Record two signups directly, then raise the slot's limit.
        let mut seeded = get(&state, opportunity.id).await.expect("get");
        for name in ["Pat", "Sam"] {
            seeded.slots[0]
                .volunteers
                .push(crate::opportunities::repo_types::Volunteer {
                    id: Uuid::new_v4(),
                    name: name.into(),
                });
        }
        let revision = seeded.revision;
        assert!(state.opportunities.update(&seeded, revision).await.unwrap());

        let body = json!({
            "_id": opportunity.id.to_string(),
            "slots": [{ "start": 1_760_100_000_000i64, "limit": 9 }]
        });
        let updated = update(&state, &body, user).await.expect("update");
        assert_eq!(updated.slots.len(), 1);
        assert_eq!(updated.slots[0].limit, 9);
        assert_eq!(updated.slots[0].volunteers.len(), 2);

        // Lowering the limit below the current signups is a conflict.
        let body = json!({
            "_id": opportunity.id.to_string(),
            "slots": [{ "start": 1_760_100_000_000i64, "limit": 1 }]
        });
        let err = update(&state, &body, user).await.unwrap_err();
        assert!(matches!(err, AppError::Conflict(_)));
    }

    #[tokio::test]
    async fn set_status_walks_the_lifecycle_and_rejects_the_rest() {
        let state = state();
        let user = creator();
        let opportunity = create(&state, &valid_body(), user).await.expect("create");

        set_status(&state, opportunity.id, "open", user).await.expect("open");
        let err = set_status(&state, opportunity.id, "pending", user)
            .await
            .unwrap_err();
        assert!(matches!(err, AppError::Conflict(_)));
        assert_eq!(get(&state, opportunity.id).await.unwrap().status, Status::Open);

        set_status(&state, opportunity.id, "closed", user).await.expect("close");
        set_status(&state, opportunity.id, "archived", user)
            .await
            .expect("archive");

        // Archived is terminal.
        for next in ["pending", "open", "closed", "archived"] {
            let err = set_status(&state, opportunity.id, next, user)
                .await
                .unwrap_err();
            assert!(matches!(err, AppError::Conflict(_)));
        }
        assert_eq!(
            get(&state, opportunity.id).await.unwrap().status,
            Status::Archived
        );
    }

    #[tokio::test]
    async fn set_status_validates_its_inputs() {
        let state = state();
        let opportunity = create(&state, &valid_body(), creator()).await.expect("create");

        let err = set_status(&state, opportunity.id, "bogus", creator())
            .await
            .unwrap_err();
        assert!(matches!(err, AppError::Validation(_)));

        let err = set_status(&state, Uuid::new_v4(), "open", creator())
            .await
            .unwrap_err();
        assert!(matches!(err, AppError::NotFound(_)));
    }

    #[tokio::test]
    async fn delete_only_removes_pending_opportunities() {
        let state = state();
        let user = creator();

        let pending = create(&state, &valid_body(), user).await.expect("create");
        delete(&state, pending.id).await.expect("delete pending");
        assert!(matches!(
            get(&state, pending.id).await.unwrap_err(),
            AppError::NotFound(_)
        ));

        let opened = create(&state, &valid_body(), user).await.expect("create");
        set_status(&state, opened.id, "open", user).await.expect("open");
        let err = delete(&state, opened.id).await.unwrap_err();
        assert!(matches!(err, AppError::Conflict(_)));
        assert!(get(&state, opened.id).await.is_ok());
    }
}
