use std::collections::{BTreeMap, BTreeSet};

use serde::Serialize;
use sqlx::{SqliteConnection, SqlitePool};

use super::LinkageError;
use crate::census::find_group;
use crate::model::{HouseholdKey, PersonSummary, ENTITY_NOT_FOUND};
use crate::people::get_person_conn;
use crate::AppError;

/// A person in the household as it was stored when the session was loaded.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Member {
    pub person: PersonSummary,
    pub census_id: i64,
    pub display_order: i64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    Up,
    Down,
}

/// (person_id, census_id, stored display_order) for each person in a household.
pub(crate) type Fingerprint = Vec<(i64, i64, Option<i64>)>;

pub(crate) struct StoredHousehold {
    pub res_group_id: Option<i64>,
    /// person_id, census_id, householdnum, display_order; in stored order.
    pub rows: Vec<(i64, i64, Option<String>, Option<i64>)>,
}

impl StoredHousehold {
    pub fn fingerprint(&self) -> Fingerprint {
        let mut entries: Fingerprint = self
            .rows
            .iter()
            .map(|(p, c, _, order)| (*p, *c, *order))
            .collect();
        entries.sort_unstable();
        entries
    }
}

pub(crate) async fn read_household(
    conn: &mut SqliteConnection,
    key: &HouseholdKey,
) -> Result<StoredHousehold, sqlx::Error> {
    let res_group_id = find_group(conn, key).await?;
    let rows = sqlx::query_as(
        "SELECT c.person_id, MIN(c.id) AS census_id, MIN(c.census_householdnum), m.display_order \
         FROM census c \
         LEFT JOIN res_group_members m ON m.person_id = c.person_id AND m.res_group_id = ?3 \
         WHERE c.census_year = ?1 AND c.census_dwellnum = ?2 \
         GROUP BY c.person_id \
         ORDER BY m.display_order IS NULL, m.display_order, census_id",
    )
    .bind(key.census_year)
    .bind(&key.dwelling)
    .bind(res_group_id)
    .fetch_all(&mut *conn)
    .await?;
    Ok(StoredHousehold { res_group_id, rows })
}

/// One editing session over a single census household.
///
/// `temp_links` and `temp_unlinks` are disjoint. `temp_orders` only holds
/// people whose position differs from where they would sit without any
/// reordering, so undoing a move leaves it empty again.
#[derive(Debug, Clone)]
pub struct LinkageSession {
    key: HouseholdKey,
    anchor: i64,
    res_group_id: Option<i64>,
    householdnum: Option<String>,
    members: Vec<Member>,
    fingerprint: Fingerprint,
    temp_links: BTreeSet<i64>,
    temp_unlinks: BTreeSet<i64>,
    temp_orders: BTreeMap<i64, i64>,
}

impl LinkageSession {
    pub async fn load(
        pool: &SqlitePool,
        key: HouseholdKey,
        anchor: i64,
    ) -> Result<Self, LinkageError> {
        let mut conn = pool.acquire().await?;
        if get_person_conn(&mut conn, anchor).await?.is_none() {
            return Err(LinkageError::UnknownPerson(anchor));
        }

        let stored = read_household(&mut conn, &key).await?;
        let mut members = Vec::with_capacity(stored.rows.len());
        for (idx, (person_id, census_id, _, _)) in stored.rows.iter().enumerate() {
            let person = get_person_conn(&mut conn, *person_id)
                .await?
                .ok_or(LinkageError::UnknownPerson(*person_id))?;
            members.push(Member {
                person,
                census_id: *census_id,
                display_order: idx as i64 + 1,
            });
        }
        let householdnum = stored.rows.iter().find_map(|(_, _, h, _)| h.clone());

        tracing::debug!(
            target: "kinledger",
            event = "linkage_session_loaded",
            household = %key,
            anchor,
            members = members.len()
        );

        Ok(Self {
            key,
            anchor,
            res_group_id: stored.res_group_id,
            householdnum,
            fingerprint: stored.fingerprint(),
            members,
            temp_links: BTreeSet::new(),
            temp_unlinks: BTreeSet::new(),
            temp_orders: BTreeMap::new(),
        })
    }

    /// Loads the household anchored on its first stored member.
    pub async fn open(pool: &SqlitePool, key: HouseholdKey) -> Result<Self, LinkageError> {
        let mut conn = pool.acquire().await?;
        let stored = read_household(&mut conn, &key).await?;
        drop(conn);
        let Some((anchor, _, _, _)) = stored.rows.first() else {
            return Err(AppError::new(ENTITY_NOT_FOUND, "No census rows for that household.")
                .with_context("household", key.to_string())
                .into());
        };
        Self::load(pool, key, *anchor).await
    }

    pub fn key(&self) -> &HouseholdKey {
        &self.key
    }

    pub fn anchor(&self) -> i64 {
        self.anchor
    }

    pub fn res_group_id(&self) -> Option<i64> {
        self.res_group_id
    }

    /// Household number shared by the stored members, used as a default for new rows.
    pub fn householdnum(&self) -> Option<&str> {
        self.householdnum.as_deref()
    }

    /// Members as loaded, display orders normalised to 1..n.
    pub fn members(&self) -> &[Member] {
        &self.members
    }

    pub fn temp_links(&self) -> &BTreeSet<i64> {
        &self.temp_links
    }

    pub fn temp_unlinks(&self) -> &BTreeSet<i64> {
        &self.temp_unlinks
    }

    pub fn temp_orders(&self) -> &BTreeMap<i64, i64> {
        &self.temp_orders
    }

    pub(crate) fn fingerprint(&self) -> &Fingerprint {
        &self.fingerprint
    }

    pub fn member(&self, person_id: i64) -> Option<&Member> {
        self.members.iter().find(|m| m.person.id == person_id)
    }

    pub fn is_original(&self, person_id: i64) -> bool {
        self.member(person_id).is_some()
    }

    pub fn is_effective_member(&self, person_id: i64) -> bool {
        self.temp_links.contains(&person_id)
            || (self.is_original(person_id) && !self.temp_unlinks.contains(&person_id))
    }

    pub fn has_changes(&self) -> bool {
        !self.temp_links.is_empty() || !self.temp_unlinks.is_empty() || !self.temp_orders.is_empty()
    }

    /// Stages `person_id` for addition. Returns false when they are already in.
    pub fn link(&mut self, person_id: i64) -> bool {
        if self.is_effective_member(person_id) {
            return false;
        }
        let mut order = self.effective_members();
        if self.temp_unlinks.remove(&person_id) {
            let snapshot_pos = self
                .member(person_id)
                .map(|m| (m.display_order - 1) as usize)
                .unwrap_or(order.len());
            order.insert(snapshot_pos.min(order.len()), person_id);
        } else {
            self.temp_links.insert(person_id);
            order.push(person_id);
        }
        self.restage(&order);
        true
    }

    /// Stages `person_id` for removal, or drops a pending addition.
    pub fn unlink(&mut self, person_id: i64) -> Result<bool, LinkageError> {
        if !self.is_effective_member(person_id) {
            if self.is_original(person_id) {
                return Ok(false);
            }
            return Err(LinkageError::NotAMember(person_id));
        }
        let order: Vec<i64> = self
            .effective_members()
            .into_iter()
            .filter(|p| *p != person_id)
            .collect();
        if !self.temp_links.remove(&person_id) {
            self.temp_unlinks.insert(person_id);
        }
        self.temp_orders.remove(&person_id);
        self.restage(&order);
        Ok(true)
    }

    /// Swaps `person_id` with its neighbour. Returns false at either end of the list.
    pub fn reorder(&mut self, person_id: i64, direction: Direction) -> Result<bool, LinkageError> {
        let mut order = self.effective_members();
        let pos = order
            .iter()
            .position(|p| *p == person_id)
            .ok_or(LinkageError::NotAMember(person_id))?;
        let target = match direction {
            Direction::Up => pos.checked_sub(1),
            Direction::Down => (pos + 1 < order.len()).then_some(pos + 1),
        };
        let Some(target) = target else {
            return Ok(false);
        };
        order.swap(pos, target);
        self.restage(&order);
        Ok(true)
    }

    /// Effective household after staged changes, in display order.
    pub fn effective_members(&self) -> Vec<i64> {
        let baseline = self.baseline();
        let mut keyed: Vec<(i64, usize, i64)> = baseline
            .iter()
            .enumerate()
            .map(|(idx, p)| {
                let rank = idx as i64 + 1;
                (self.temp_orders.get(p).copied().unwrap_or(rank), idx, *p)
            })
            .collect();
        keyed.sort_unstable();
        keyed.into_iter().map(|(_, _, p)| p).collect()
    }

    /// Position 1..n of each effective member without any reordering applied.
    pub fn baseline_rank(&self, person_id: i64) -> Option<i64> {
        self.baseline()
            .iter()
            .position(|p| *p == person_id)
            .map(|idx| idx as i64 + 1)
    }

    fn baseline(&self) -> Vec<i64> {
        self.members
            .iter()
            .map(|m| m.person.id)
            .filter(|p| !self.temp_unlinks.contains(p))
            .chain(self.temp_links.iter().copied())
            .collect()
    }

    fn restage(&mut self, order: &[i64]) {
        let baseline = self.baseline();
        self.temp_orders.clear();
        for (idx, person_id) in order.iter().enumerate() {
            let rank = idx as i64 + 1;
            let base = baseline.iter().position(|p| p == person_id).map(|i| i as i64 + 1);
            if base != Some(rank) {
                self.temp_orders.insert(*person_id, rank);
            }
        }
    }

    #[cfg(test)]
    pub(crate) fn for_tests(key: HouseholdKey, anchor: i64, member_ids: &[i64]) -> Self {
        let members = member_ids
            .iter()
            .enumerate()
            .map(|(idx, id)| Member {
                person: PersonSummary {
                    id: *id,
                    first_name: Some(format!("P{id}")),
                    middle_name: None,
                    last_name: None,
                    married_name: None,
                    birth_date: None,
                    death_date: None,
                    father: None,
                    mother: None,
                },
                census_id: 100 + *id,
                display_order: idx as i64 + 1,
            })
            .collect();
        Self {
            key,
            anchor,
            res_group_id: None,
            householdnum: None,
            members,
            fingerprint: Vec::new(),
            temp_links: BTreeSet::new(),
            temp_unlinks: BTreeSet::new(),
            temp_orders: BTreeMap::new(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn session() -> LinkageSession {
        LinkageSession::for_tests(HouseholdKey::new(1900, "12"), 1, &[1, 2, 3])
    }

    #[test]
    fn link_then_unlink_is_a_no_op() {
        let mut s = session();
        assert!(s.link(9));
        assert!(s.unlink(9).unwrap());
        assert!(s.temp_links().is_empty());
        assert!(s.temp_unlinks().is_empty());
        assert!(s.temp_orders().is_empty());
        assert!(!s.has_changes());
    }

    #[test]
    fn unlink_then_link_restores_original_member() {
        let mut s = session();
        s.unlink(2).unwrap();
        assert_eq!(s.effective_members(), vec![1, 3]);
        assert!(s.link(2));
        assert_eq!(s.effective_members(), vec![1, 2, 3]);
        assert!(!s.has_changes());
    }

    #[test]
    fn links_and_unlinks_stay_disjoint() {
        let mut s = session();
        s.unlink(1).unwrap();
        s.link(7);
        assert!(s.temp_links().is_disjoint(s.temp_unlinks()));
        assert_eq!(s.effective_members(), vec![2, 3, 7]);
    }

    #[test]
    fn unlinking_a_stranger_is_an_error() {
        let mut s = session();
        assert!(matches!(s.unlink(42), Err(LinkageError::NotAMember(42))));
    }

    #[test]
    fn reorder_swaps_neighbours_and_reverts_cleanly() {
        let mut s = session();
        assert!(s.reorder(3, Direction::Up).unwrap());
        assert_eq!(s.effective_members(), vec![1, 3, 2]);
        assert_eq!(s.temp_orders().get(&3), Some(&2));
        assert_eq!(s.temp_orders().get(&2), Some(&3));

        assert!(s.reorder(3, Direction::Down).unwrap());
        assert_eq!(s.effective_members(), vec![1, 2, 3]);
        assert!(s.temp_orders().is_empty());
    }

    #[test]
    fn reorder_at_the_edges_does_nothing() {
        let mut s = session();
        assert!(!s.reorder(1, Direction::Up).unwrap());
        assert!(!s.reorder(3, Direction::Down).unwrap());
        assert!(s.temp_orders().is_empty());
    }

    #[test]
    fn reorder_survives_later_removals() {
        let mut s = session();
        s.reorder(3, Direction::Up).unwrap();
        s.reorder(3, Direction::Up).unwrap();
        assert_eq!(s.effective_members(), vec![3, 1, 2]);
        s.unlink(1).unwrap();
        assert_eq!(s.effective_members(), vec![3, 2]);
        s.link(8);
        assert_eq!(s.effective_members(), vec![3, 2, 8]);
        s.reorder(8, Direction::Up).unwrap();
        assert_eq!(s.effective_members(), vec![3, 8, 2]);
    }
}
