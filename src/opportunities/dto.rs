use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::opportunities::repo_types::{Location, Opportunity, Stamp, Status};

#[derive(Debug, Deserialize)]
pub struct SetStatusRequest {
    pub status: String,
}

/// List view of an opportunity: slot detail is not exposed, only the total
/// number of open seats.
#[derive(Debug, Serialize)]
pub struct OpportunitySummary {
    pub id: Uuid,
    pub title: String,
    pub description: String,
    pub office: String,
    pub location: Location,
    pub deadline: i64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub waiver: Option<String>,
    pub status: Status,
    pub needed_volunteers: i64,
    pub created: Stamp,
    pub last_modified: Stamp,
}

impl From<Opportunity> for OpportunitySummary {
    fn from(opportunity: Opportunity) -> Self {
        let needed_volunteers = opportunity.needed_volunteers();
        Self {
            id: opportunity.id,
            title: opportunity.title,
            description: opportunity.description,
            office: opportunity.office,
            location: opportunity.location,
            deadline: opportunity.deadline,
            waiver: opportunity.waiver,
            status: opportunity.status,
            needed_volunteers,
            created: opportunity.created,
            last_modified: opportunity.last_modified,
        }
    }
}
