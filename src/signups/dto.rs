use serde::Deserialize;

/// Body of a signup request: the start time identifies the slot within the
/// opportunity named in the path.
#[derive(Debug, Deserialize)]
pub struct SignupRequest {
    pub start: i64,
}
