use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use time::OffsetDateTime;
use uuid::Uuid;

use crate::error::AppError;

/// Lifecycle state of an opportunity. Transitions are strict:
///
/// ```text
/// pending  -> open
/// open     -> closed | archived
/// closed   -> archived
/// archived -> (terminal)
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Status {
    Pending,
    Open,
    Closed,
    Archived,
}

impl Status {
    pub const ALL: [Status; 4] = [Status::Pending, Status::Open, Status::Closed, Status::Archived];

    pub fn as_str(self) -> &'static str {
        match self {
            Status::Pending => "pending",
            Status::Open => "open",
            Status::Closed => "closed",
            Status::Archived => "archived",
        }
    }

    pub fn can_transition_to(self, next: Status) -> bool {
        use Status::*;
        matches!(
            (self, next),
            (Pending, Open) | (Open, Closed) | (Open, Archived) | (Closed, Archived)
        )
    }
}

impl fmt::Display for Status {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Status {
    type Err = AppError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(Status::Pending),
            "open" => Ok(Status::Open),
            "closed" => Ok(Status::Closed),
            "archived" => Ok(Status::Archived),
            other => Err(AppError::validation(format!("Invalid status: {other}"))),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Location {
    pub name: String,
    pub address: String,
}

/// Snapshot of a user at signup time. Renaming the user later does not
/// rewrite entries already recorded; membership equality is by `id` only.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Volunteer {
    pub id: Uuid,
    pub name: String,
}

/// A time slot embedded in an opportunity, identified within it by `start`
/// (epoch milliseconds). Invariant: `volunteers.len() <= limit`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Slot {
    pub start: i64,
    pub limit: i64,
    #[serde(default)]
    pub volunteers: Vec<Volunteer>,
}

impl Slot {
    /// Open seats left, floored at zero so an inconsistent record never
    /// reports a negative count.
    pub fn needed_volunteers(&self) -> i64 {
        (self.limit - self.volunteers.len() as i64).max(0)
    }

    pub fn volunteer_index(&self, id: Uuid) -> Option<usize> {
        self.volunteers.iter().position(|v| v.id == id)
    }

    pub fn is_full(&self) -> bool {
        self.volunteers.len() as i64 >= self.limit
    }
}

/// Who touched the record, and when.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Stamp {
    pub user: Uuid,
    #[serde(with = "time::serde::rfc3339")]
    pub time: OffsetDateTime,
}

impl Stamp {
    pub fn now(user: Uuid) -> Self {
        Self {
            user,
            time: OffsetDateTime::now_utc(),
        }
    }
}

/// The aggregate root. Owns its slots exclusively; all mutations flow through
/// the store's conditional update keyed on `revision`.
#[derive(Debug, Clone, Serialize)]
pub struct Opportunity {
    pub id: Uuid,
    pub title: String,
    pub description: String,
    pub office: String,
    pub location: Location,
    pub deadline: i64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub waiver: Option<String>,
    pub status: Status,
    pub slots: Vec<Slot>,
    pub created: Stamp,
    pub last_modified: Stamp,
    #[serde(skip_serializing)]
    pub revision: i64,
}

impl Opportunity {
    pub fn slot_at(&self, start: i64) -> Option<&Slot> {
        self.slots.iter().find(|slot| slot.start == start)
    }

    pub fn slot_at_mut(&mut self, start: i64) -> Option<&mut Slot> {
        self.slots.iter_mut().find(|slot| slot.start == start)
    }

    /// Total open seats across all slots, used by the list view in place of
    /// slot detail.
    pub fn needed_volunteers(&self) -> i64 {
        self.slots.iter().map(Slot::needed_volunteers).sum()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn the_transition_table_is_strict() {
        use Status::*;

        let legal = [(Pending, Open), (Open, Closed), (Open, Archived), (Closed, Archived)];
        for from in Status::ALL {
            for to in Status::ALL {
                let expected = legal.contains(&(from, to));
                assert_eq!(
                    from.can_transition_to(to),
                    expected,
                    "{from} -> {to} should be {}allowed",
                    if expected { "" } else { "dis" }
                );
            }
        }
    }

    #[test]
    fn archived_is_terminal() {
        for to in Status::ALL {
            assert!(!Status::Archived.can_transition_to(to));
        }
    }

    #[test]
    fn needed_volunteers_is_never_negative() {
        let volunteer = |n: &str| Volunteer {
            id: Uuid::new_v4(),
            name: n.to_string(),
        };

        let slot = Slot {
            start: 0,
            limit: 5,
            volunteers: vec![volunteer("a"), volunteer("b"), volunteer("c")],
        };
        assert_eq!(slot.needed_volunteers(), 2);

        // Inconsistent state: more volunteers than seats.
        let slot = Slot {
            start: 0,
            limit: 3,
            volunteers: (0..5).map(|i| volunteer(&i.to_string())).collect(),
        };
        assert_eq!(slot.needed_volunteers(), 0);
    }

    #[test]
    fn status_parses_its_own_names() {
        for status in Status::ALL {
            assert_eq!(status.as_str().parse::<Status>().unwrap(), status);
        }
        assert!("bogus".parse::<Status>().is_err());
    }
}
