use std::path::Path;

use anyhow::Result;
use assert_cmd::Command;
use sqlx::sqlite::SqliteConnectOptions;
use sqlx::{ConnectOptions, Connection};
use tempfile::tempdir;

fn kinledger(db: &Path) -> Command {
    let mut cmd = Command::cargo_bin("kinledger").expect("binary built");
    cmd.arg("--db")
        .arg(db)
        .env("KINLEDGER_LOG_FILE", "0")
        .env("KINLEDGER_LOG", "kinledger=warn");
    cmd
}

fn stdout_of(cmd: &mut Command) -> String {
    let output = cmd.assert().success().get_output().stdout.clone();
    String::from_utf8(output).expect("utf8 stdout")
}

fn stderr_of(assert: assert_cmd::assert::Assert) -> String {
    String::from_utf8(assert.get_output().stderr.clone()).expect("utf8 stderr")
}

fn add_person(db: &Path, first: &str, last: &str) -> i64 {
    let out = stdout_of(kinledger(db).args(["people", "add", "--first", first, "--last", last]));
    out.trim().parse().expect("person id")
}

fn add_census(db: &Path, person: i64, year: i64, dwelling: &str) {
    let data = serde_json::json!({
        "person_id": person,
        "census_year": year,
        "census_dwellnum": dwelling,
    })
    .to_string();
    kinledger(db)
        .args(["entity", "create", "census", data.as_str()])
        .assert()
        .success();
}

#[test]
fn status_then_migrate() {
    let dir = tempdir().unwrap();
    let db = dir.path().join("kin.sqlite3");

    let before = stdout_of(kinledger(&db).args(["db", "status"]));
    assert!(before.contains("pending"));
    assert!(!before.contains("applied"));

    let out = stdout_of(kinledger(&db).args(["db", "migrate"]));
    assert!(out.contains("up to date"));

    let status: serde_json::Value =
        serde_json::from_str(&stdout_of(kinledger(&db).args(["db", "status", "--json"]))).unwrap();
    let states = status.as_array().unwrap();
    assert_eq!(states.len(), 3);
    assert!(states.iter().all(|s| s["applied"] == true));
}

#[test]
fn reconcile_then_edit_a_household() {
    let dir = tempdir().unwrap();
    let db = dir.path().join("kin.sqlite3");

    let john = add_person(&db, "John", "Walsh");
    let mary = add_person(&db, "Mary", "Walsh");
    add_census(&db, john, 1900, "12");

    let audit: serde_json::Value =
        serde_json::from_str(&stdout_of(kinledger(&db).args(["census", "audit", "--json"]))).unwrap();
    assert_eq!(audit["unlinked_rows"], 1);

    let out = stdout_of(kinledger(&db).args(["census", "reconcile"]));
    assert!(out.contains("Linked 1 census rows"), "{out}");
    let out = stdout_of(kinledger(&db).args(["census", "reconcile"]));
    assert!(out.contains("Nothing to reconcile."));

    let shown = stdout_of(kinledger(&db).args(["household", "show", "--year", "1900", "--dwelling", "12"]));
    assert!(shown.contains("John Walsh"));

    let mary_arg = mary.to_string();
    let anchor = john.to_string();
    let preview = stdout_of(kinledger(&db).args([
        "household", "edit", "--year", "1900", "--dwelling", "12", "--anchor", anchor.as_str(),
        "--link", mary_arg.as_str(),
    ]));
    assert!(preview.contains(&format!("+ add Mary Walsh (#{mary})")), "{preview}");
    assert!(preview.contains("--yes"));

    let saved = stdout_of(kinledger(&db).args([
        "household", "edit", "--year", "1900", "--dwelling", "12", "--anchor", anchor.as_str(),
        "--link", mary_arg.as_str(), "--yes",
    ]));
    assert!(saved.contains("Saved: 1 added, 0 removed, 0 moved."), "{saved}");

    let shown = stdout_of(kinledger(&db).args(["household", "show", "--year", "1900", "--dwelling", "12"]));
    assert!(shown.contains("Mary Walsh"));

    let err = stderr_of(kinledger(&db).args(["people", "delete", mary_arg.as_str()]).assert().failure());
    assert!(err.contains("ENTITY/HAS_DEPENDENTS"), "{err}");
}

#[tokio::test]
async fn incomplete_reconcile_exits_with_code_two() -> Result<()> {
    let dir = tempdir()?;
    let db = dir.path().join("kin.sqlite3");
    let john = add_person(&db, "John", "Walsh");
    add_census(&db, john, 1900, "12");

    let mut conn = SqliteConnectOptions::new().filename(&db).connect().await?;
    sqlx::query(
        "CREATE TRIGGER block_member BEFORE INSERT ON res_group_members \
         BEGIN SELECT RAISE(ABORT, 'blocked'); END",
    )
    .execute(&mut conn)
    .await?;
    conn.close().await?;

    let err = stderr_of(kinledger(&db).args(["census", "reconcile"]).assert().code(2));
    assert!(err.contains("CENSUS/RECONCILE_INCOMPLETE"), "{err}");
    Ok(())
}

#[test]
fn geo_commands_print_links_and_reject_bad_text() {
    let dir = tempdir().unwrap();
    let db = dir.path().join("kin.sqlite3");

    let out = stdout_of(kinledger(&db).args(["geo", "tile", "--lat", "51.5074", "--lon", "-0.1278", "--zoom", "10"]));
    assert!(out.contains("https://www.google.com/maps/search/?api=1&query=51.507400,-0.127800"));
    assert!(out.contains("https://tile.openstreetmap.org/10/511/340.png"));

    let parsed: serde_json::Value = serde_json::from_str(&stdout_of(kinledger(&db).args([
        "geo",
        "parse",
        "E 1/2 of the SW 1/4 of Section 26, T12N, R5W",
    ])))
    .unwrap();
    assert_eq!(parsed["section"], 26);
    assert_eq!(parsed["steps"], serde_json::json!(["SW 1/4", "E 1/2"]));

    let err = stderr_of(kinledger(&db).args(["geo", "parse", "the old mill lot"]).assert().failure());
    assert!(err.contains("GEO/PARSE"), "{err}");
}
