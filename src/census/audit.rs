use std::collections::BTreeMap;

use serde::Serialize;
use sqlx::SqlitePool;

use super::{group_unlinked, scan_unlinked};
use crate::model::HouseholdKey;
use crate::AppResult;

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct OrphanGroupSummary {
    pub key: HouseholdKey,
    pub census_ids: Vec<i64>,
    pub person_ids: Vec<i64>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SplitHousehold {
    pub key: HouseholdKey,
    pub res_group_ids: Vec<i64>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct AuditReport {
    pub total_rows: i64,
    pub unlinked_rows: i64,
    pub orphan_groups: Vec<OrphanGroupSummary>,
    pub missing_memberships: i64,
    pub split_households: Vec<SplitHousehold>,
}

impl AuditReport {
    pub fn is_clean(&self) -> bool {
        self.unlinked_rows == 0 && self.missing_memberships == 0 && self.split_households.is_empty()
    }
}

/// Reports household-linkage problems without changing anything.
pub async fn audit(pool: &SqlitePool) -> AppResult<AuditReport> {
    let mut conn = pool.acquire().await?;

    let total_rows: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM census")
        .fetch_one(&mut *conn)
        .await?;

    let rows = scan_unlinked(&mut conn).await?;
    let unlinked_rows = rows.len() as i64;
    let orphan_groups = group_unlinked(rows)
        .into_iter()
        .map(|g| OrphanGroupSummary {
            key: g.key,
            census_ids: g.rows.iter().map(|r| r.id).collect(),
            person_ids: g.rows.iter().map(|r| r.person_id).collect(),
        })
        .collect();

    let missing_memberships: i64 = sqlx::query_scalar(
        "SELECT COUNT(*) FROM census c \
         WHERE c.res_group_id IS NOT NULL \
           AND NOT EXISTS (SELECT 1 FROM res_group_members m \
                           WHERE m.res_group_id = c.res_group_id AND m.person_id = c.person_id)",
    )
    .fetch_one(&mut *conn)
    .await?;

    let linked: Vec<(i64, String, i64)> = sqlx::query_as(
        "SELECT DISTINCT census_year, census_dwellnum, res_group_id FROM census \
         WHERE res_group_id IS NOT NULL \
         ORDER BY census_year, census_dwellnum, res_group_id",
    )
    .fetch_all(&mut *conn)
    .await?;
    let mut by_key: BTreeMap<HouseholdKey, Vec<i64>> = BTreeMap::new();
    for (year, dwelling, group) in linked {
        by_key
            .entry(HouseholdKey::new(year, dwelling))
            .or_default()
            .push(group);
    }
    let split_households = by_key
        .into_iter()
        .filter(|(_, ids)| ids.len() > 1)
        .map(|(key, res_group_ids)| SplitHousehold { key, res_group_ids })
        .collect();

    Ok(AuditReport {
        total_rows,
        unlinked_rows,
        orphan_groups,
        missing_memberships,
        split_households,
    })
}
