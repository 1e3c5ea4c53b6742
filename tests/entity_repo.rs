use anyhow::Result;
use kinledger_lib::entity::{self, schema, ListQuery};
use serde_json::{json, Map, Value};

#[path = "util.rs"]
mod util;

fn payload(value: Value) -> Map<String, Value> {
    match value {
        Value::Object(map) => map,
        other => panic!("not an object: {other}"),
    }
}

#[tokio::test]
async fn crud_round_trip_for_addresses() -> Result<()> {
    let pool = util::migrated_pool().await;
    let addresses = schema("addresses")?;

    let id = entity::create(
        &pool,
        addresses,
        payload(json!({ "street": " Main St ", "city": "Clonmel", "latitude": "52.355" })),
    )
    .await?;
    let row = entity::get(&pool, addresses, id).await?.expect("created");
    assert_eq!(row["street"], "Main St");
    assert_eq!(row["latitude"], 52.355);

    entity::update(&pool, addresses, id, payload(json!({ "county": "Tipperary" }))).await?;
    let row = entity::get(&pool, addresses, id).await?.expect("still there");
    assert_eq!(row["county"], "Tipperary");
    assert_eq!(row["city"], "Clonmel");

    entity::delete(&pool, addresses, id).await?;
    assert!(entity::get(&pool, addresses, id).await?.is_none());
    Ok(())
}

#[tokio::test]
async fn list_sorts_searches_and_pages() -> Result<()> {
    let pool = util::migrated_pool().await;
    let churches = schema("churches")?;
    for name in ["St Mary's", "Holy Cross", "St Patrick's"] {
        entity::create(&pool, churches, payload(json!({ "name": name }))).await?;
    }

    let all = entity::list(&pool, churches, &ListQuery::default()).await?;
    let names: Vec<&str> = all.iter().filter_map(|r| r["name"].as_str()).collect();
    assert_eq!(names, ["Holy Cross", "St Mary's", "St Patrick's"]);

    let saints = entity::list(
        &pool,
        churches,
        &ListQuery {
            search: Some("st".into()),
            descending: true,
            ..ListQuery::default()
        },
    )
    .await?;
    let names: Vec<&str> = saints.iter().filter_map(|r| r["name"].as_str()).collect();
    assert_eq!(names, ["St Patrick's", "St Mary's"]);

    let page = entity::list(
        &pool,
        churches,
        &ListQuery {
            limit: Some(1),
            offset: Some(1),
            ..ListQuery::default()
        },
    )
    .await?;
    assert_eq!(page.len(), 1);
    assert_eq!(page[0]["name"], "St Mary's");
    Ok(())
}

#[tokio::test]
async fn invalid_requests_carry_codes() -> Result<()> {
    let pool = util::migrated_pool().await;
    let people = schema("people")?;

    let err = entity::list(
        &pool,
        people,
        &ListQuery {
            sort: Some("id; DROP TABLE people".into()),
            ..ListQuery::default()
        },
    )
    .await
    .expect_err("not sortable");
    assert_eq!(err.code(), "ENTITY/INVALID_SORT");

    let err = entity::create(&pool, people, payload(json!({ "shoe_size": 9 })))
        .await
        .expect_err("unknown field");
    assert_eq!(err.code(), "ENTITY/UNKNOWN_FIELD");

    let err = entity::create(&pool, people, payload(json!({ "birth_date": "March 1870" })))
        .await
        .expect_err("bad date");
    assert_eq!(err.code(), "VALIDATION/DATE_FORMAT");

    let err = entity::create(&pool, people, payload(json!({ "father": 77 })))
        .await
        .expect_err("missing father");
    assert_eq!(err.code(), "VALIDATION/REFERENCE_MISSING");

    let id = util::add_person(&pool, "John", "Walsh").await;
    let err = entity::update(&pool, people, id, Map::new())
        .await
        .expect_err("empty update");
    assert_eq!(err.code(), "ENTITY/EMPTY_UPDATE");

    let err = entity::update(&pool, people, id, payload(json!({ "father": id })))
        .await
        .expect_err("own father");
    assert_eq!(err.code(), "VALIDATION/SELF_REFERENCE");

    let err = schema("spaceships").expect_err("unknown entity");
    assert_eq!(err.code(), "ENTITY/UNKNOWN");
    Ok(())
}

#[tokio::test]
async fn dependents_are_counted_per_relation() -> Result<()> {
    let pool = util::migrated_pool().await;
    let people = schema("people")?;
    let john = util::add_person(&pool, "John", "Walsh").await;
    let mary = util::add_person(&pool, "Mary", "Walsh").await;
    util::marry(&pool, john, mary).await;
    util::add_child(&pool, "Ellen", "Walsh", john, mary).await;
    util::add_child(&pool, "Tom", "Walsh", john, mary).await;

    let mut conn = pool.acquire().await?;
    let found = entity::dependents(&mut conn, people, john).await?;
    drop(conn);
    assert_eq!(found, vec![("marriage", 1), ("parentage", 2)]);

    let err = entity::delete(&pool, people, john).await.expect_err("blocked");
    assert_eq!(err.code(), "ENTITY/HAS_DEPENDENTS");
    assert_eq!(
        err.context().get("count.parentage").map(String::as_str),
        Some("2")
    );
    Ok(())
}
