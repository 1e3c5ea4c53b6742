use serde::Serialize;
use serde_json::json;
use sqlx::{SqliteConnection, SqlitePool};
use thiserror::Error;
use tracing::{info, warn};

use super::{count_unlinked, find_or_create_group, group_unlinked, next_display_order, scan_unlinked, UnlinkedGroup};
use crate::model::{HouseholdKey, CENSUS_INCOMPLETE};
use crate::op_log::LogScope;
use crate::AppError;

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ReconcileReport {
    pub scanned_rows: usize,
    pub groups_created: usize,
    pub groups_reused: usize,
    pub rows_linked: u64,
    pub memberships_inserted: u64,
    pub memberships_backfilled: u64,
}

impl ReconcileReport {
    pub fn changed_anything(&self) -> bool {
        self.rows_linked > 0
            || self.groups_created > 0
            || self.memberships_inserted > 0
            || self.memberships_backfilled > 0
    }
}

#[derive(Error, Debug)]
pub enum ReconcileError {
    #[error("{remaining} census rows still unlinked after reconciliation; all changes rolled back")]
    Incomplete {
        remaining: i64,
        failed_groups: Vec<HouseholdKey>,
    },
    #[error(transparent)]
    Database(#[from] sqlx::Error),
}

impl From<ReconcileError> for AppError {
    fn from(err: ReconcileError) -> Self {
        match err {
            ReconcileError::Incomplete {
                remaining,
                failed_groups,
            } => {
                let keys: Vec<String> = failed_groups.iter().map(ToString::to_string).collect();
                AppError::new(
                    CENSUS_INCOMPLETE,
                    "Some census rows could not be linked; nothing was saved.",
                )
                .with_context("remaining", remaining.to_string())
                .with_context("failed_groups", keys.join(", "))
            }
            ReconcileError::Database(db) => AppError::from(db),
        }
    }
}

struct GroupOutcome {
    created: bool,
    rows_linked: u64,
    memberships_inserted: u64,
}

async fn link_group(
    conn: &mut SqliteConnection,
    group: &UnlinkedGroup,
) -> Result<GroupOutcome, sqlx::Error> {
    let (res_group_id, created) = find_or_create_group(conn, &group.key).await?;
    let mut order = next_display_order(conn, res_group_id).await?;
    let mut outcome = GroupOutcome {
        created,
        rows_linked: 0,
        memberships_inserted: 0,
    };

    for row in &group.rows {
        outcome.rows_linked += sqlx::query("UPDATE census SET res_group_id = ? WHERE id = ?")
            .bind(res_group_id)
            .bind(row.id)
            .execute(&mut *conn)
            .await?
            .rows_affected();

        let inserted = sqlx::query(
            "INSERT OR IGNORE INTO res_group_members (res_group_id, person_id, display_order) \
             VALUES (?, ?, ?)",
        )
        .bind(res_group_id)
        .bind(row.person_id)
        .bind(order)
        .execute(&mut *conn)
        .await?
        .rows_affected();
        if inserted > 0 {
            outcome.memberships_inserted += inserted;
            order += 1;
        }
    }
    Ok(outcome)
}

/// Linked census rows whose person has no membership row in that group.
async fn backfill_memberships(conn: &mut SqliteConnection) -> Result<u64, sqlx::Error> {
    let res = sqlx::query(
        "INSERT OR IGNORE INTO res_group_members (res_group_id, person_id) \
         SELECT DISTINCT c.res_group_id, c.person_id FROM census c \
         WHERE c.res_group_id IS NOT NULL \
           AND NOT EXISTS (SELECT 1 FROM res_group_members m \
                           WHERE m.res_group_id = c.res_group_id AND m.person_id = c.person_id)",
    )
    .execute(&mut *conn)
    .await?;
    Ok(res.rows_affected())
}

/// Links every census row lacking a household group.
///
/// Rows are grouped by (census year, dwelling number); each group gets one
/// Census household group (reused when one already exists for the key) and a
/// membership row per person. A group that fails is skipped under its own
/// savepoint. Afterwards the unlinked scan is repeated: if anything is still
/// unlinked the whole transaction is rolled back, including the groups that
/// succeeded, and [`ReconcileError::Incomplete`] is returned.
pub async fn reconcile(pool: &SqlitePool) -> Result<ReconcileReport, ReconcileError> {
    let scope = LogScope::new("census", "reconcile", None, None);
    let result = reconcile_inner(pool).await;
    match &result {
        Ok(report) => scope.success(json!({
            "groups_created": report.groups_created,
            "groups_reused": report.groups_reused,
            "rows_linked": report.rows_linked,
            "memberships_inserted": report.memberships_inserted,
            "memberships_backfilled": report.memberships_backfilled,
        })),
        Err(ReconcileError::Incomplete {
            remaining,
            failed_groups,
        }) => scope.warn(json!({
            "outcome": "rolled_back",
            "remaining": remaining,
            "failed_groups": failed_groups.len(),
        })),
        Err(ReconcileError::Database(err)) => scope.fail(&storage_failure(err)),
    }
    result
}

/// `AppError` for logging a database failure the caller still owns.
fn storage_failure(err: &sqlx::Error) -> AppError {
    let code = err
        .as_database_error()
        .and_then(|db| db.code())
        .map(|code| format!("Sqlite/{code}"))
        .unwrap_or_else(|| "SQLX/ERROR".to_string());
    AppError::new(code, err.to_string())
}

async fn reconcile_inner(pool: &SqlitePool) -> Result<ReconcileReport, ReconcileError> {
    let mut tx = pool.begin().await?;

    let rows = scan_unlinked(&mut tx).await?;
    let mut report = ReconcileReport {
        scanned_rows: rows.len(),
        ..ReconcileReport::default()
    };
    let groups = group_unlinked(rows);
    let mut failed_groups: Vec<HouseholdKey> = Vec::new();

    for group in &groups {
        sqlx::query("SAVEPOINT reconcile_group")
            .execute(&mut *tx)
            .await?;
        match link_group(&mut tx, group).await {
            Ok(outcome) => {
                sqlx::query("RELEASE SAVEPOINT reconcile_group")
                    .execute(&mut *tx)
                    .await?;
                if outcome.created {
                    report.groups_created += 1;
                } else {
                    report.groups_reused += 1;
                }
                report.rows_linked += outcome.rows_linked;
                report.memberships_inserted += outcome.memberships_inserted;
            }
            Err(err) => {
                warn!(
                    target: "kinledger",
                    event = "census_reconcile_group_failed",
                    household = %group.key,
                    rows = group.rows.len(),
                    error = %err
                );
                sqlx::query("ROLLBACK TO SAVEPOINT reconcile_group")
                    .execute(&mut *tx)
                    .await?;
                sqlx::query("RELEASE SAVEPOINT reconcile_group")
                    .execute(&mut *tx)
                    .await?;
                failed_groups.push(group.key.clone());
            }
        }
    }

    report.memberships_backfilled = backfill_memberships(&mut tx).await?;

    let remaining = count_unlinked(&mut tx).await?;
    if remaining > 0 {
        tx.rollback().await?;
        return Err(ReconcileError::Incomplete {
            remaining,
            failed_groups,
        });
    }

    tx.commit().await?;
    info!(
        target: "kinledger",
        event = "census_reconcile_committed",
        groups = groups.len(),
        rows_linked = report.rows_linked
    );
    Ok(report)
}
