#![allow(clippy::unwrap_used, clippy::expect_used, dead_code)]

use kinledger_lib::migrate::apply_migrations;
use sqlx::{sqlite::SqlitePoolOptions, SqlitePool};

pub async fn temp_pool() -> SqlitePool {
    let pool = SqlitePoolOptions::new()
        .max_connections(1)
        .connect("sqlite::memory:")
        .await
        .expect("connect sqlite::memory:");
    sqlx::query("PRAGMA foreign_keys=ON;")
        .execute(&pool)
        .await
        .unwrap();
    pool
}

pub async fn migrated_pool() -> SqlitePool {
    let pool = temp_pool().await;
    apply_migrations(&pool).await.expect("apply migrations");
    pool
}

pub async fn add_person(pool: &SqlitePool, first: &str, last: &str) -> i64 {
    sqlx::query("INSERT INTO people (first_name, last_name) VALUES (?, ?)")
        .bind(first)
        .bind(last)
        .execute(pool)
        .await
        .unwrap()
        .last_insert_rowid()
}

pub async fn add_child(pool: &SqlitePool, first: &str, last: &str, father: i64, mother: i64) -> i64 {
    sqlx::query("INSERT INTO people (first_name, last_name, father, mother) VALUES (?, ?, ?, ?)")
        .bind(first)
        .bind(last)
        .bind(father)
        .bind(mother)
        .execute(pool)
        .await
        .unwrap()
        .last_insert_rowid()
}

pub async fn marry(pool: &SqlitePool, a: i64, b: i64) -> i64 {
    sqlx::query("INSERT INTO marriages (person1_id, person2_id) VALUES (?, ?)")
        .bind(a)
        .bind(b)
        .execute(pool)
        .await
        .unwrap()
        .last_insert_rowid()
}

/// Census row with no household group.
pub async fn add_census(pool: &SqlitePool, person: i64, year: i64, dwelling: &str) -> i64 {
    sqlx::query(
        "INSERT INTO census (person_id, census_year, census_dwellnum, census_householdnum) \
         VALUES (?, ?, ?, '1')",
    )
    .bind(person)
    .bind(year)
    .bind(dwelling)
    .execute(pool)
    .await
    .unwrap()
    .last_insert_rowid()
}

pub async fn count(pool: &SqlitePool, sql: &str) -> i64 {
    sqlx::query_scalar(sql).fetch_one(pool).await.unwrap()
}

/// Person ids of a group's members in display order.
pub async fn member_order(pool: &SqlitePool, res_group_id: i64) -> Vec<i64> {
    sqlx::query_scalar(
        "SELECT person_id FROM res_group_members WHERE res_group_id = ? \
         ORDER BY display_order, id",
    )
    .bind(res_group_id)
    .fetch_all(pool)
    .await
    .unwrap()
}
