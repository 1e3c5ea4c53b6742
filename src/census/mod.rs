//! Census households: the reconciliation engine that links orphaned census
//! rows into household groups, and a read-only audit of the same invariants.

pub mod audit;
pub mod reconcile;

use sqlx::SqliteConnection;

use crate::model::{HouseholdKey, CENSUS_EVENT_TYPE};

pub use audit::{audit, AuditReport, OrphanGroupSummary, SplitHousehold};
pub use reconcile::{reconcile, ReconcileError, ReconcileReport};

/// A census row with no household group yet.
#[derive(Debug, Clone, PartialEq, Eq, sqlx::FromRow)]
pub struct UnlinkedRow {
    pub id: i64,
    pub person_id: i64,
    pub census_year: i64,
    pub census_dwellnum: String,
    pub census_householdnum: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UnlinkedGroup {
    pub key: HouseholdKey,
    pub rows: Vec<UnlinkedRow>,
}

pub(crate) async fn scan_unlinked(
    conn: &mut SqliteConnection,
) -> Result<Vec<UnlinkedRow>, sqlx::Error> {
    sqlx::query_as::<_, UnlinkedRow>(
        "SELECT id, person_id, census_year, census_dwellnum, census_householdnum \
         FROM census WHERE res_group_id IS NULL \
         ORDER BY census_year, census_dwellnum, census_householdnum, id",
    )
    .fetch_all(&mut *conn)
    .await
}

pub(crate) async fn count_unlinked(conn: &mut SqliteConnection) -> Result<i64, sqlx::Error> {
    sqlx::query_scalar("SELECT COUNT(*) FROM census WHERE res_group_id IS NULL")
        .fetch_one(&mut *conn)
        .await
}

/// Partitions rows already ordered by (year, dwelling) into consecutive groups.
pub fn group_unlinked(rows: Vec<UnlinkedRow>) -> Vec<UnlinkedGroup> {
    let mut groups: Vec<UnlinkedGroup> = Vec::new();
    for row in rows {
        match groups.last_mut() {
            Some(group)
                if group.key.census_year == row.census_year
                    && group.key.dwelling == row.census_dwellnum =>
            {
                group.rows.push(row);
            }
            _ => groups.push(UnlinkedGroup {
                key: HouseholdKey::new(row.census_year, row.census_dwellnum.clone()),
                rows: vec![row],
            }),
        }
    }
    groups
}

pub(crate) async fn find_group(
    conn: &mut SqliteConnection,
    key: &HouseholdKey,
) -> Result<Option<i64>, sqlx::Error> {
    sqlx::query_scalar(
        "SELECT id FROM res_groups \
         WHERE event_type = ? AND event_year = ? AND event_dwellnum = ? \
         ORDER BY id LIMIT 1",
    )
    .bind(CENSUS_EVENT_TYPE)
    .bind(key.census_year)
    .bind(&key.dwelling)
    .fetch_optional(&mut *conn)
    .await
}

/// Returns the Census group for `key`, creating it when absent. The flag is true when created.
pub(crate) async fn find_or_create_group(
    conn: &mut SqliteConnection,
    key: &HouseholdKey,
) -> Result<(i64, bool), sqlx::Error> {
    if let Some(id) = find_group(conn, key).await? {
        return Ok((id, false));
    }
    let id = sqlx::query(
        "INSERT INTO res_groups (event_type, event_year, event_dwellnum, created_at) \
         VALUES (?, ?, ?, ?)",
    )
    .bind(CENSUS_EVENT_TYPE)
    .bind(key.census_year)
    .bind(&key.dwelling)
    .bind(crate::time::now_ms())
    .execute(&mut *conn)
    .await?
    .last_insert_rowid();
    Ok((id, true))
}

pub(crate) async fn next_display_order(
    conn: &mut SqliteConnection,
    res_group_id: i64,
) -> Result<i64, sqlx::Error> {
    let max: Option<i64> =
        sqlx::query_scalar("SELECT MAX(display_order) FROM res_group_members WHERE res_group_id = ?")
            .bind(res_group_id)
            .fetch_one(&mut *conn)
            .await?;
    Ok(max.unwrap_or(0) + 1)
}
