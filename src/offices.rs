//! Office reference data. Opportunities must name one of these codes.

use axum::{routing::get, Json, Router};
use serde::Serialize;

use crate::auth::jwt::AuthUser;
use crate::state::AppState;

#[derive(Debug, Clone, Serialize)]
pub struct Office {
    pub code: &'static str,
    pub name: &'static str,
}

pub const OFFICES: [Office; 10] = [
    Office { code: "MIDV", name: "Midvale" },
    Office { code: "BOCA", name: "Boca Raton" },
    Office { code: "DRAP", name: "Draper" },
    Office { code: "DURH", name: "Durham" },
    Office { code: "EDMO", name: "Edmonton" },
    Office { code: "FTLD", name: "Fort Lauderdale" },
    Office { code: "GRAN", name: "Grand Rapids" },
    Office { code: "OKLA", name: "Oklahoma City" },
    Office { code: "RALE", name: "Raleigh" },
    Office { code: "STLO", name: "St. Louis" },
];

pub fn codes() -> Vec<&'static str> {
    OFFICES.iter().map(|office| office.code).collect()
}

pub fn router() -> Router<AppState> {
    Router::new().route("/offices", get(list_offices))
}

async fn list_offices(_auth: AuthUser) -> Json<&'static [Office]> {
    Json(&OFFICES)
}
