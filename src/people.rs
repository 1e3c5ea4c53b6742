use futures::FutureExt;
use serde::{Deserialize, Serialize};
use sqlx::{SqliteConnection, SqlitePool};

use crate::db::run_in_tx;
use crate::entity::{self, repo::row_exists, schema::PEOPLE};
use crate::model::{
    PersonSummary, VALIDATION_DATE_FORMAT, VALIDATION_REFERENCE_MISSING, VALIDATION_REQUIRED,
    VALIDATION_SELF_REFERENCE,
};
use crate::time::{now_ms, PartialDate};
use crate::{AppError, AppResult};

pub(crate) const SUMMARY_COLUMNS: &str =
    "id, first_name, middle_name, last_name, married_name, birth_date, death_date, father, mother";

/// Input for creating a person inline, optionally married to an existing person.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct NewPerson {
    pub first_name: Option<String>,
    pub middle_name: Option<String>,
    pub last_name: Option<String>,
    pub married_name: Option<String>,
    pub birth_date: Option<String>,
    pub birth_location: Option<String>,
    pub death_date: Option<String>,
    pub death_location: Option<String>,
    pub father: Option<i64>,
    pub mother: Option<i64>,
    pub spouse: Option<i64>,
    pub marriage_date: Option<String>,
    pub notes: Option<String>,
}

fn clean(value: &Option<String>) -> Option<String> {
    value
        .as_deref()
        .map(str::trim)
        .filter(|v| !v.is_empty())
        .map(str::to_string)
}

fn check_date(field: &'static str, value: &Option<String>) -> AppResult<()> {
    if let Some(raw) = clean(value) {
        if PartialDate::parse(&raw).is_none() {
            return Err(AppError::new(
                VALIDATION_DATE_FORMAT,
                "Dates must be YYYY, YYYY-MM or YYYY-MM-DD.",
            )
            .with_context("field", field)
            .with_context("value", raw));
        }
    }
    Ok(())
}

impl NewPerson {
    /// Checks that need no database access.
    pub fn validate(&self) -> AppResult<()> {
        let named = [&self.first_name, &self.middle_name, &self.last_name]
            .into_iter()
            .any(|part| clean(part).is_some());
        if !named {
            return Err(AppError::new(
                VALIDATION_REQUIRED,
                "A person needs at least one name part.",
            )
            .with_context("field", "first_name"));
        }
        check_date("birth_date", &self.birth_date)?;
        check_date("death_date", &self.death_date)?;
        check_date("marriage_date", &self.marriage_date)?;
        if let (Some(f), Some(m)) = (self.father, self.mother) {
            if f == m {
                return Err(AppError::new(
                    VALIDATION_SELF_REFERENCE,
                    "Father and mother cannot be the same person.",
                )
                .with_context("id", f.to_string()));
            }
        }
        Ok(())
    }
}

pub async fn get_person(pool: &SqlitePool, id: i64) -> AppResult<Option<PersonSummary>> {
    let sql = format!("SELECT {SUMMARY_COLUMNS} FROM people WHERE id = ?");
    let person = sqlx::query_as::<_, PersonSummary>(&sql)
        .bind(id)
        .fetch_optional(pool)
        .await?;
    Ok(person)
}

pub(crate) async fn get_person_conn(
    conn: &mut SqliteConnection,
    id: i64,
) -> AppResult<Option<PersonSummary>> {
    let sql = format!("SELECT {SUMMARY_COLUMNS} FROM people WHERE id = ?");
    let person = sqlx::query_as::<_, PersonSummary>(&sql)
        .bind(id)
        .fetch_optional(&mut *conn)
        .await?;
    Ok(person)
}

pub async fn person_exists(pool: &SqlitePool, id: i64) -> AppResult<bool> {
    let found: Option<i64> = sqlx::query_scalar("SELECT 1 FROM people WHERE id = ?")
        .bind(id)
        .fetch_optional(pool)
        .await?;
    Ok(found.is_some())
}

/// Name search for arbitrary (non-family) additions. Numeric terms also match the id.
pub async fn search_people(
    pool: &SqlitePool,
    term: &str,
    limit: i64,
) -> AppResult<Vec<PersonSummary>> {
    let term = term.trim();
    if term.is_empty() {
        return Ok(Vec::new());
    }
    let id_match: i64 = term.parse().unwrap_or(-1);
    let pattern = format!(
        "%{}%",
        term.replace('\\', "\\\\")
            .replace('%', "\\%")
            .replace('_', "\\_")
    );
    let sql = format!(
        "SELECT {SUMMARY_COLUMNS} FROM people \
         WHERE id = ?1 \
            OR first_name LIKE ?2 ESCAPE '\\' \
            OR middle_name LIKE ?2 ESCAPE '\\' \
            OR last_name LIKE ?2 ESCAPE '\\' \
            OR married_name LIKE ?2 ESCAPE '\\' \
            OR (COALESCE(first_name, '') || ' ' || COALESCE(last_name, '')) LIKE ?2 ESCAPE '\\' \
         ORDER BY last_name, first_name, id LIMIT ?3"
    );
    let people = sqlx::query_as::<_, PersonSummary>(&sql)
        .bind(id_match)
        .bind(pattern)
        .bind(limit.clamp(1, 500))
        .fetch_all(pool)
        .await?;
    Ok(people)
}

async fn require_person(conn: &mut SqliteConnection, field: &'static str, id: i64) -> AppResult<()> {
    if row_exists(conn, "people", id).await? {
        Ok(())
    } else {
        Err(AppError::new(
            VALIDATION_REFERENCE_MISSING,
            "Referenced person does not exist.",
        )
        .with_context("field", field)
        .with_context("id", id.to_string()))
    }
}

/// Creates the person (and a marriage when a spouse is given) in one transaction.
pub async fn create_person(pool: &SqlitePool, person: NewPerson) -> AppResult<i64> {
    person.validate()?;
    run_in_tx(pool, move |tx| {
        async move {
            if let Some(id) = person.father {
                require_person(tx, "father", id).await?;
            }
            if let Some(id) = person.mother {
                require_person(tx, "mother", id).await?;
            }
            if let Some(id) = person.spouse {
                require_person(tx, "spouse", id).await?;
            }

            let now = now_ms();
            let res = sqlx::query(
                "INSERT INTO people (first_name, middle_name, last_name, married_name, \
                 birth_date, birth_location, death_date, death_location, father, mother, \
                 notes, created_at, updated_at) \
                 VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)",
            )
            .bind(clean(&person.first_name))
            .bind(clean(&person.middle_name))
            .bind(clean(&person.last_name))
            .bind(clean(&person.married_name))
            .bind(clean(&person.birth_date))
            .bind(clean(&person.birth_location))
            .bind(clean(&person.death_date))
            .bind(clean(&person.death_location))
            .bind(person.father)
            .bind(person.mother)
            .bind(clean(&person.notes))
            .bind(now)
            .bind(now)
            .execute(&mut **tx)
            .await?;
            let id = res.last_insert_rowid();

            if let Some(spouse) = person.spouse {
                let marriage = sqlx::query(
                    "INSERT INTO marriages (person1_id, person2_id, marriage_date) VALUES (?, ?, ?)",
                )
                .bind(id)
                .bind(spouse)
                .bind(clean(&person.marriage_date))
                .execute(&mut **tx)
                .await?
                .last_insert_rowid();
                sqlx::query("UPDATE people SET marriage_id = ? WHERE id = ?")
                    .bind(marriage)
                    .bind(id)
                    .execute(&mut **tx)
                    .await?;
                sqlx::query(
                    "UPDATE people SET marriage_id = ?, updated_at = ? \
                     WHERE id = ? AND marriage_id IS NULL",
                )
                .bind(marriage)
                .bind(now)
                .bind(spouse)
                .execute(&mut **tx)
                .await?;
            }

            tracing::info!(target: "kinledger", event = "person_created", person_id = id);
            Ok::<_, AppError>(id)
        }
        .boxed()
    })
    .await
}

/// Deletes a person unless residency, marriage or parentage rows still point at them.
pub async fn delete_person(pool: &SqlitePool, id: i64) -> AppResult<()> {
    entity::delete(pool, &PEOPLE, id).await
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn new_person_needs_a_name() {
        let err = NewPerson::default().validate().unwrap_err();
        assert_eq!(err.code(), VALIDATION_REQUIRED);
        let named = NewPerson {
            last_name: Some("Keane".into()),
            ..NewPerson::default()
        };
        assert!(named.validate().is_ok());
    }

    #[test]
    fn new_person_rejects_bad_dates_and_same_parents() {
        let bad_date = NewPerson {
            first_name: Some("Mary".into()),
            birth_date: Some("c. 1850".into()),
            ..NewPerson::default()
        };
        assert_eq!(bad_date.validate().unwrap_err().code(), VALIDATION_DATE_FORMAT);

        let same_parents = NewPerson {
            first_name: Some("Mary".into()),
            father: Some(3),
            mother: Some(3),
            ..NewPerson::default()
        };
        assert_eq!(
            same_parents.validate().unwrap_err().code(),
            VALIDATION_SELF_REFERENCE
        );
    }
}
