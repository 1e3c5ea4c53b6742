//! Interactive household editing.
//!
//! A [`LinkageSession`] snapshots one census household and stages additions,
//! removals and reorderings in memory. Nothing touches the database until
//! [`apply`] runs, which writes the whole diff in a single transaction.

mod apply;
mod candidates;
mod session;

use thiserror::Error;

use crate::model::{
    HouseholdKey, LINKAGE_CANCELLED, LINKAGE_NOT_A_MEMBER, LINKAGE_STALE_SESSION,
    LINKAGE_UNKNOWN_PERSON,
};
use crate::AppError;

pub use apply::{
    apply, summary, AcceptDefaults, ApplyReport, CensusDetailsSource, ChangeSummary, MemberChange,
    OrderChange,
};
pub use candidates::{family_candidates, stage_new_person, stage_person, Candidate, Relationship};
pub use session::{Direction, LinkageSession, Member};

#[derive(Error, Debug)]
pub enum LinkageError {
    #[error("person {0} does not exist")]
    UnknownPerson(i64),
    #[error("person {0} is not a member of this household")]
    NotAMember(i64),
    #[error("household {0} changed since the session was loaded")]
    StaleSession(HouseholdKey),
    #[error("census details for person {0} were not provided")]
    Cancelled(i64),
    #[error(transparent)]
    App(#[from] AppError),
    #[error(transparent)]
    Database(#[from] sqlx::Error),
}

impl From<LinkageError> for AppError {
    fn from(err: LinkageError) -> Self {
        match err {
            LinkageError::UnknownPerson(id) => {
                AppError::new(LINKAGE_UNKNOWN_PERSON, "That person does not exist.")
                    .with_context("person_id", id.to_string())
            }
            LinkageError::NotAMember(id) => AppError::new(
                LINKAGE_NOT_A_MEMBER,
                "That person is not part of this household.",
            )
            .with_context("person_id", id.to_string()),
            LinkageError::StaleSession(key) => AppError::new(
                LINKAGE_STALE_SESSION,
                "The household was changed elsewhere; reload it and try again.",
            )
            .with_context("household", key.to_string()),
            LinkageError::Cancelled(id) => AppError::new(
                LINKAGE_CANCELLED,
                "Saving was cancelled; no changes were made.",
            )
            .with_context("person_id", id.to_string()),
            LinkageError::App(app) => app,
            LinkageError::Database(db) => AppError::from(db),
        }
    }
}
