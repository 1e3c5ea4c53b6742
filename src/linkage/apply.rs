use std::fmt;

use serde::Serialize;
use serde_json::json;
use sqlx::{SqliteConnection, SqlitePool};
use tracing::error;

use super::session::read_household;
use super::{LinkageError, LinkageSession};
use crate::census::find_or_create_group;
use crate::model::{CensusDetails, HouseholdKey, PersonSummary};
use crate::op_log::LogScope;
use crate::people::{get_person, get_person_conn};
use crate::time::estimate_age;
use crate::AppResult;

/// Supplies census attributes for each person being added to a household.
///
/// Returning `None` cancels the whole save.
pub trait CensusDetailsSource {
    fn details_for(
        &mut self,
        person: &PersonSummary,
        key: &HouseholdKey,
        defaults: CensusDetails,
    ) -> Option<CensusDetails>;
}

/// Takes the suggested defaults for everyone.
#[derive(Debug, Clone, Copy, Default)]
pub struct AcceptDefaults;

impl CensusDetailsSource for AcceptDefaults {
    fn details_for(
        &mut self,
        _person: &PersonSummary,
        _key: &HouseholdKey,
        defaults: CensusDetails,
    ) -> Option<CensusDetails> {
        Some(defaults)
    }
}

impl<F> CensusDetailsSource for F
where
    F: FnMut(&PersonSummary, &HouseholdKey, CensusDetails) -> Option<CensusDetails>,
{
    fn details_for(
        &mut self,
        person: &PersonSummary,
        key: &HouseholdKey,
        defaults: CensusDetails,
    ) -> Option<CensusDetails> {
        self(person, key, defaults)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct MemberChange {
    pub person_id: i64,
    pub name: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct OrderChange {
    pub person_id: i64,
    pub name: String,
    pub from: i64,
    pub to: i64,
}

/// What a save would do, for confirmation before [`apply`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ChangeSummary {
    pub household: HouseholdKey,
    pub additions: Vec<MemberChange>,
    pub removals: Vec<MemberChange>,
    pub reorders: Vec<OrderChange>,
}

impl ChangeSummary {
    pub fn is_empty(&self) -> bool {
        self.additions.is_empty() && self.removals.is_empty() && self.reorders.is_empty()
    }

    pub fn change_count(&self) -> usize {
        self.additions.len() + self.removals.len() + self.reorders.len()
    }
}

impl fmt::Display for ChangeSummary {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_empty() {
            return write!(f, "No changes to household {}.", self.household);
        }
        writeln!(f, "Changes to household {}:", self.household)?;
        for add in &self.additions {
            writeln!(f, "  + add {} (#{})", add.name, add.person_id)?;
        }
        for removal in &self.removals {
            writeln!(f, "  - remove {} (#{})", removal.name, removal.person_id)?;
        }
        for order in &self.reorders {
            writeln!(
                f,
                "  ~ move {} (#{}) from position {} to {}",
                order.name, order.person_id, order.from, order.to
            )?;
        }
        Ok(())
    }
}

/// Describes the staged changes without writing anything.
pub async fn summary(pool: &SqlitePool, session: &LinkageSession) -> AppResult<ChangeSummary> {
    let mut additions = Vec::with_capacity(session.temp_links().len());
    for id in session.temp_links() {
        let name = get_person(pool, *id)
            .await?
            .map(|p| p.display_name())
            .unwrap_or_else(|| format!("Person #{id}"));
        additions.push(MemberChange {
            person_id: *id,
            name,
        });
    }

    let removals = session
        .temp_unlinks()
        .iter()
        .filter_map(|id| session.member(*id))
        .map(|m| MemberChange {
            person_id: m.person.id,
            name: m.person.display_name(),
        })
        .collect();

    let reorders = session
        .temp_orders()
        .iter()
        .filter_map(|(id, to)| {
            let member = session.member(*id)?;
            let from = session.baseline_rank(*id)?;
            Some(OrderChange {
                person_id: *id,
                name: member.person.display_name(),
                from,
                to: *to,
            })
        })
        .collect();

    Ok(ChangeSummary {
        household: session.key().clone(),
        additions,
        removals,
        reorders,
    })
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ApplyReport {
    pub res_group_id: Option<i64>,
    pub added: usize,
    pub removed: usize,
    pub reordered: usize,
    pub census_ids: Vec<i64>,
}

async fn write_changes<S>(
    conn: &mut SqliteConnection,
    session: &LinkageSession,
    source: &mut S,
) -> Result<ApplyReport, LinkageError>
where
    S: CensusDetailsSource + ?Sized,
{
    let key = session.key();
    let stored = read_household(conn, key).await?;
    if stored.res_group_id != session.res_group_id() || &stored.fingerprint() != session.fingerprint()
    {
        return Err(LinkageError::StaleSession(key.clone()));
    }

    let mut report = ApplyReport {
        res_group_id: stored.res_group_id,
        ..ApplyReport::default()
    };

    for &person_id in session.temp_unlinks() {
        if let Some(group) = stored.res_group_id {
            sqlx::query("DELETE FROM res_group_members WHERE res_group_id = ? AND person_id = ?")
                .bind(group)
                .bind(person_id)
                .execute(&mut *conn)
                .await?;
        }
        sqlx::query("DELETE FROM census WHERE person_id = ? AND census_year = ? AND census_dwellnum = ?")
            .bind(person_id)
            .bind(key.census_year)
            .bind(&key.dwelling)
            .execute(&mut *conn)
            .await?;
        report.removed += 1;
    }

    let effective = session.effective_members();
    if effective.is_empty() {
        return Ok(report);
    }
    let (group, _) = find_or_create_group(conn, key).await?;
    report.res_group_id = Some(group);

    for &person_id in session.temp_links() {
        let person = get_person_conn(conn, person_id)
            .await?
            .ok_or(LinkageError::UnknownPerson(person_id))?;
        let defaults = CensusDetails {
            householdnum: session.householdnum().map(str::to_string),
            person_age: estimate_age(person.birth_date.as_deref(), key.census_year),
            ..CensusDetails::default()
        };
        let details = source
            .details_for(&person, key, defaults)
            .ok_or(LinkageError::Cancelled(person_id))?;
        let census_id = sqlx::query(
            "INSERT INTO census (person_id, census_year, census_dwellnum, census_householdnum, \
             person_age, sex, marital_status, relation_to_head, occupation, birth_place, res_group_id) \
             VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)",
        )
        .bind(person_id)
        .bind(key.census_year)
        .bind(&key.dwelling)
        .bind(details.householdnum)
        .bind(details.person_age)
        .bind(details.sex)
        .bind(details.marital_status)
        .bind(details.relation_to_head)
        .bind(details.occupation)
        .bind(details.birth_place)
        .bind(group)
        .execute(&mut *conn)
        .await?
        .last_insert_rowid();
        report.census_ids.push(census_id);
        report.added += 1;
    }

    for (idx, &person_id) in effective.iter().enumerate() {
        sqlx::query(
            "INSERT INTO res_group_members (res_group_id, person_id, display_order) VALUES (?, ?, ?) \
             ON CONFLICT(res_group_id, person_id) DO UPDATE SET display_order = excluded.display_order",
        )
        .bind(group)
        .bind(person_id)
        .bind(idx as i64 + 1)
        .execute(&mut *conn)
        .await?;
        sqlx::query(
            "UPDATE census SET res_group_id = ? \
             WHERE person_id = ? AND census_year = ? AND census_dwellnum = ? \
               AND (res_group_id IS NULL OR res_group_id <> ?)",
        )
        .bind(group)
        .bind(person_id)
        .bind(key.census_year)
        .bind(&key.dwelling)
        .bind(group)
        .execute(&mut *conn)
        .await?;
    }
    report.reordered = session
        .temp_orders()
        .keys()
        .filter(|id| session.is_original(**id))
        .count();

    Ok(report)
}

/// Writes every staged change in one transaction.
///
/// The stored household must still match what the session loaded. Unlinked
/// people lose their membership and their census row for this household;
/// linked people get a census row built from `source` and a membership; all
/// remaining members are then renumbered in their effective order.
pub async fn apply<S>(
    pool: &SqlitePool,
    session: &LinkageSession,
    source: &mut S,
) -> Result<ApplyReport, LinkageError>
where
    S: CensusDetailsSource + ?Sized,
{
    let scope = LogScope::new(
        "linkage",
        "apply",
        Some(session.key().to_string()),
        Some(session.anchor()),
    );
    if !session.has_changes() {
        scope.success(json!({ "changes": 0 }));
        return Ok(ApplyReport {
            res_group_id: session.res_group_id(),
            ..ApplyReport::default()
        });
    }

    let mut tx = pool.begin().await?;
    match write_changes(&mut tx, session, source).await {
        Ok(report) => {
            tx.commit().await?;
            scope.success(json!({
                "res_group_id": report.res_group_id,
                "added": report.added,
                "removed": report.removed,
                "reordered": report.reordered,
            }));
            Ok(report)
        }
        Err(err) => {
            if let Err(rb) = tx.rollback().await {
                error!(target: "kinledger", event = "db_tx_rollback_failed", error = %rb);
            }
            match &err {
                LinkageError::Database(_) => error!(
                    target: "kinledger",
                    event = "linkage_apply_failed",
                    household = %session.key(),
                    error = %err
                ),
                _ => scope.warn(json!({ "outcome": "rolled_back", "error": err.to_string() })),
            }
            Err(err)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_summary_renders_no_changes() {
        let summary = ChangeSummary {
            household: HouseholdKey::new(1900, "12"),
            additions: vec![],
            removals: vec![],
            reorders: vec![],
        };
        assert!(summary.is_empty());
        assert_eq!(summary.to_string(), "No changes to household 1900/12.");
    }

    #[test]
    fn summary_lists_each_kind_of_change() {
        let summary = ChangeSummary {
            household: HouseholdKey::new(1910, "3"),
            additions: vec![MemberChange {
                person_id: 4,
                name: "Ada Byrne".into(),
            }],
            removals: vec![MemberChange {
                person_id: 2,
                name: "Tom Byrne".into(),
            }],
            reorders: vec![OrderChange {
                person_id: 3,
                name: "Kate Byrne".into(),
                from: 2,
                to: 1,
            }],
        };
        let text = summary.to_string();
        assert!(text.contains("+ add Ada Byrne (#4)"));
        assert!(text.contains("- remove Tom Byrne (#2)"));
        assert!(text.contains("~ move Kate Byrne (#3) from position 2 to 1"));
        assert_eq!(summary.change_count(), 3);
    }

    #[test]
    fn closures_act_as_details_sources() {
        let mut calls = 0;
        let mut source = |_: &PersonSummary, _: &HouseholdKey, mut d: CensusDetails| {
            calls += 1;
            d.occupation = Some("Farmer".into());
            Some(d)
        };
        let person = LinkageSession::for_tests(HouseholdKey::new(1900, "1"), 1, &[1])
            .members()[0]
            .person
            .clone();
        let details = source
            .details_for(&person, &HouseholdKey::new(1900, "1"), CensusDetails::default())
            .unwrap();
        assert_eq!(details.occupation.as_deref(), Some("Farmer"));
        assert_eq!(calls, 1);
    }
}
