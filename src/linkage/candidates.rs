use std::collections::HashSet;
use std::fmt;

use serde::Serialize;
use sqlx::SqlitePool;

use super::{LinkageError, LinkageSession};
use crate::model::PersonSummary;
use crate::people::{create_person, get_person, person_exists, NewPerson, SUMMARY_COLUMNS};
use crate::AppResult;

/// How a candidate relates to the session's anchor person. Declaration order is precedence.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Relationship {
    Father,
    Mother,
    Spouse,
    Child,
    Sibling,
}

impl Relationship {
    pub fn label(self) -> &'static str {
        match self {
            Relationship::Father => "Father",
            Relationship::Mother => "Mother",
            Relationship::Spouse => "Spouse",
            Relationship::Child => "Child",
            Relationship::Sibling => "Sibling",
        }
    }
}

impl fmt::Display for Relationship {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Candidate {
    pub relationship: Relationship,
    pub person: PersonSummary,
}

async fn people_where(
    pool: &SqlitePool,
    filter: &str,
    binds: &[Option<i64>],
) -> AppResult<Vec<PersonSummary>> {
    let sql = format!(
        "SELECT {SUMMARY_COLUMNS} FROM people WHERE {filter} \
         ORDER BY birth_date IS NULL, birth_date, id"
    );
    let mut query = sqlx::query_as::<_, PersonSummary>(&sql);
    for value in binds {
        query = query.bind(*value);
    }
    Ok(query.fetch_all(pool).await?)
}

/// Family of the anchor person not already in the household, labelled and
/// deduplicated in [`Relationship`] order.
pub async fn family_candidates(
    pool: &SqlitePool,
    session: &LinkageSession,
) -> AppResult<Vec<Candidate>> {
    let anchor_id = session.anchor();
    let Some(anchor) = get_person(pool, anchor_id).await? else {
        return Err(LinkageError::UnknownPerson(anchor_id).into());
    };

    let mut found: Vec<(Relationship, PersonSummary)> = Vec::new();
    if let Some(father) = anchor.father {
        if let Some(p) = get_person(pool, father).await? {
            found.push((Relationship::Father, p));
        }
    }
    if let Some(mother) = anchor.mother {
        if let Some(p) = get_person(pool, mother).await? {
            found.push((Relationship::Mother, p));
        }
    }

    let spouses = people_where(
        pool,
        "id IN (SELECT person2_id FROM marriages WHERE person1_id = ?1 \
                UNION SELECT person1_id FROM marriages WHERE person2_id = ?1)",
        &[Some(anchor_id)],
    )
    .await?;
    found.extend(spouses.into_iter().map(|p| (Relationship::Spouse, p)));

    let children = people_where(pool, "father = ?1 OR mother = ?1", &[Some(anchor_id)]).await?;
    found.extend(children.into_iter().map(|p| (Relationship::Child, p)));

    if anchor.father.is_some() || anchor.mother.is_some() {
        let siblings = people_where(
            pool,
            "id <> ?1 AND ((?2 IS NOT NULL AND father = ?2) OR (?3 IS NOT NULL AND mother = ?3))",
            &[Some(anchor_id), anchor.father, anchor.mother],
        )
        .await?;
        found.extend(siblings.into_iter().map(|p| (Relationship::Sibling, p)));
    }

    let mut seen: HashSet<i64> = HashSet::new();
    seen.insert(anchor_id);
    let candidates = found
        .into_iter()
        .filter(|(_, p)| !session.is_effective_member(p.id))
        .filter(|(_, p)| seen.insert(p.id))
        .map(|(relationship, person)| Candidate {
            relationship,
            person,
        })
        .collect();
    Ok(candidates)
}

/// Stages an arbitrary existing person, e.g. one picked from a name search.
pub async fn stage_person(
    pool: &SqlitePool,
    session: &mut LinkageSession,
    person_id: i64,
) -> AppResult<bool> {
    if !person_exists(pool, person_id).await? {
        return Err(LinkageError::UnknownPerson(person_id).into());
    }
    Ok(session.link(person_id))
}

/// Creates a person (and marriage, when a spouse is given) and stages them.
pub async fn stage_new_person(
    pool: &SqlitePool,
    session: &mut LinkageSession,
    person: NewPerson,
) -> AppResult<i64> {
    let id = create_person(pool, person).await?;
    session.link(id);
    Ok(id)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn relationships_order_by_precedence() {
        let mut all = vec![
            Relationship::Sibling,
            Relationship::Child,
            Relationship::Father,
            Relationship::Spouse,
            Relationship::Mother,
        ];
        all.sort();
        let labels: Vec<&str> = all.iter().map(|r| r.label()).collect();
        assert_eq!(labels, ["Father", "Mother", "Spouse", "Child", "Sibling"]);
    }
}
