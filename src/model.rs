use std::fmt;

use serde::{Deserialize, Serialize};

pub const VALIDATION_REQUIRED: &str = "VALIDATION/REQUIRED";
pub const VALIDATION_DATE_FORMAT: &str = "VALIDATION/DATE_FORMAT";
pub const VALIDATION_REFERENCE_MISSING: &str = "VALIDATION/REFERENCE_MISSING";
pub const VALIDATION_SELF_REFERENCE: &str = "VALIDATION/SELF_REFERENCE";

pub const ENTITY_UNKNOWN: &str = "ENTITY/UNKNOWN";
pub const ENTITY_UNKNOWN_FIELD: &str = "ENTITY/UNKNOWN_FIELD";
pub const ENTITY_INVALID_VALUE: &str = "ENTITY/INVALID_VALUE";
pub const ENTITY_INVALID_SORT: &str = "ENTITY/INVALID_SORT";
pub const ENTITY_EMPTY_UPDATE: &str = "ENTITY/EMPTY_UPDATE";
pub const ENTITY_NOT_FOUND: &str = "ENTITY/NOT_FOUND";
pub const ENTITY_HAS_DEPENDENTS: &str = "ENTITY/HAS_DEPENDENTS";

pub const CENSUS_INCOMPLETE: &str = "CENSUS/RECONCILE_INCOMPLETE";

pub const LINKAGE_UNKNOWN_PERSON: &str = "LINKAGE/UNKNOWN_PERSON";
pub const LINKAGE_NOT_A_MEMBER: &str = "LINKAGE/NOT_A_MEMBER";
pub const LINKAGE_STALE_SESSION: &str = "LINKAGE/STALE_SESSION";
pub const LINKAGE_CANCELLED: &str = "LINKAGE/CANCELLED";

pub const GEO_PARSE: &str = "GEO/PARSE";
pub const GEO_EMPTY_PARENT: &str = "GEO/EMPTY_PARENT";
pub const GEO_BAD_COORDINATES: &str = "GEO/BAD_COORDINATES";
pub const GEO_NOT_FOUND: &str = "GEO/NOT_FOUND";

/// `res_groups.event_type` for households synthesized from census rows.
pub const CENSUS_EVENT_TYPE: &str = "Census";

/// One census household instance: a dwelling number within a census year.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct HouseholdKey {
    pub census_year: i64,
    pub dwelling: String,
}

impl HouseholdKey {
    pub fn new(census_year: i64, dwelling: impl Into<String>) -> Self {
        Self {
            census_year,
            dwelling: dwelling.into(),
        }
    }
}

impl fmt::Display for HouseholdKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.census_year, self.dwelling)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, sqlx::FromRow)]
pub struct PersonSummary {
    pub id: i64,
    pub first_name: Option<String>,
    pub middle_name: Option<String>,
    pub last_name: Option<String>,
    pub married_name: Option<String>,
    pub birth_date: Option<String>,
    pub death_date: Option<String>,
    pub father: Option<i64>,
    pub mother: Option<i64>,
}

impl PersonSummary {
    pub fn display_name(&self) -> String {
        let parts: Vec<&str> = [&self.first_name, &self.middle_name, &self.last_name]
            .into_iter()
            .filter_map(|p| p.as_deref())
            .map(str::trim)
            .filter(|p| !p.is_empty())
            .collect();
        if parts.is_empty() {
            format!("Person #{}", self.id)
        } else {
            parts.join(" ")
        }
    }
}

/// Census-specific attributes collected when a person joins a household.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CensusDetails {
    pub householdnum: Option<String>,
    pub person_age: Option<i64>,
    pub sex: Option<String>,
    pub marital_status: Option<String>,
    pub relation_to_head: Option<String>,
    pub occupation: Option<String>,
    pub birth_place: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn person(first: Option<&str>, last: Option<&str>) -> PersonSummary {
        PersonSummary {
            id: 7,
            first_name: first.map(String::from),
            middle_name: None,
            last_name: last.map(String::from),
            married_name: None,
            birth_date: None,
            death_date: None,
            father: None,
            mother: None,
        }
    }

    #[test]
    fn display_name_joins_known_parts() {
        assert_eq!(person(Some("Ada"), Some("Byrne")).display_name(), "Ada Byrne");
        assert_eq!(person(None, Some("Byrne")).display_name(), "Byrne");
        assert_eq!(person(Some("  "), None).display_name(), "Person #7");
    }

    #[test]
    fn household_key_displays_year_and_dwelling() {
        assert_eq!(HouseholdKey::new(1900, "12").to_string(), "1900/12");
    }
}
