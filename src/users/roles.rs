use std::str::FromStr;

use serde::{Deserialize, Deserializer, Serialize, Serializer};

use crate::error::AppError;

/// A capability a user can hold.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    Volunteer,
    Champion,
    Admin,
}

impl Role {
    pub const ALL: [Role; 3] = [Role::Volunteer, Role::Champion, Role::Admin];

    pub fn as_str(self) -> &'static str {
        match self {
            Role::Volunteer => "volunteer",
            Role::Champion => "champion",
            Role::Admin => "admin",
        }
    }

    fn bit(self) -> u8 {
        match self {
            Role::Volunteer => 0b001,
            Role::Champion => 0b010,
            Role::Admin => 0b100,
        }
    }
}

impl FromStr for Role {
    type Err = AppError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "volunteer" => Ok(Role::Volunteer),
            "champion" => Ok(Role::Champion),
            "admin" => Ok(Role::Admin),
            other => Err(AppError::validation(format!("Unknown role: {other}"))),
        }
    }
}

/// The set of roles held by a user, packed into a bit set. Computed once per
/// request from the verified token and consulted through the named predicates
/// rather than by scanning a string array at every call site.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RoleSet {
    bits: u8,
}

impl RoleSet {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn only(role: Role) -> Self {
        let mut set = Self::new();
        set.insert(role);
        set
    }

    pub fn insert(&mut self, role: Role) {
        self.bits |= role.bit();
    }

    pub fn contains(self, role: Role) -> bool {
        self.bits & role.bit() != 0
    }

    pub fn is_empty(self) -> bool {
        self.bits == 0
    }

    pub fn is_volunteer(self) -> bool {
        self.contains(Role::Volunteer)
    }

    pub fn is_champion(self) -> bool {
        self.contains(Role::Champion)
    }

    pub fn is_admin(self) -> bool {
        self.contains(Role::Admin)
    }

    pub fn to_vec(self) -> Vec<Role> {
        Role::ALL
            .iter()
            .copied()
            .filter(|role| self.contains(*role))
            .collect()
    }

    pub fn to_strings(self) -> Vec<String> {
        self.to_vec()
            .into_iter()
            .map(|role| role.as_str().to_string())
            .collect()
    }

    /// Parses a stored list of role names, e.g. a `TEXT[]` column.
    pub fn from_strings<S: AsRef<str>>(names: &[S]) -> Result<Self, AppError> {
        names
            .iter()
            .map(|name| name.as_ref().parse::<Role>())
            .collect()
    }
}

impl FromIterator<Role> for RoleSet {
    fn from_iter<I: IntoIterator<Item = Role>>(iter: I) -> Self {
        let mut set = Self::new();
        for role in iter {
            set.insert(role);
        }
        set
    }
}

impl Serialize for RoleSet {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        self.to_vec().serialize(serializer)
    }
}

impl<'de> Deserialize<'de> for RoleSet {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let roles = Vec::<Role>::deserialize(deserializer)?;
        Ok(roles.into_iter().collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn predicates_reflect_membership() {
        let mut set = RoleSet::new();
        assert!(set.is_empty());
        set.insert(Role::Volunteer);
        set.insert(Role::Admin);
        assert!(set.is_volunteer());
        assert!(!set.is_champion());
        assert!(set.is_admin());
    }

    #[test]
    fn inserting_twice_is_a_no_op() {
        let mut set = RoleSet::only(Role::Champion);
        set.insert(Role::Champion);
        assert_eq!(set.to_vec(), vec![Role::Champion]);
    }

    #[test]
    fn serde_round_trips_as_a_name_array() {
        let set: RoleSet = [Role::Admin, Role::Volunteer].into_iter().collect();
        let json = serde_json::to_string(&set).unwrap();
        assert_eq!(json, r#"["volunteer","admin"]"#);

        let back: RoleSet = serde_json::from_str(&json).unwrap();
        assert_eq!(back, set);
    }

    #[test]
    fn from_strings_rejects_unknown_names() {
        assert!(RoleSet::from_strings(&["volunteer", "champion"]).is_ok());
        assert!(RoleSet::from_strings(&["superuser"]).is_err());
    }
}
