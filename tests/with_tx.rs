use anyhow::Result;
use futures::FutureExt;
use kinledger_lib::db::run_in_tx;

#[path = "util.rs"]
mod util;

#[tokio::test]
async fn commit_happy_path() -> Result<()> {
    let pool = util::temp_pool().await;
    sqlx::query("CREATE TABLE t (val TEXT UNIQUE);")
        .execute(&pool)
        .await?;
    let id = run_in_tx(&pool, |tx| {
        async move {
            let res = sqlx::query("INSERT INTO t (val) VALUES ('ok');")
                .execute(&mut **tx)
                .await?;
            Ok::<_, anyhow::Error>(res.last_insert_rowid())
        }
        .boxed()
    })
    .await?;
    assert_eq!(id, 1);
    assert_eq!(util::count(&pool, "SELECT COUNT(*) FROM t").await, 1);
    Ok(())
}

#[tokio::test]
async fn rollback_on_unique_violation() -> Result<()> {
    let pool = util::temp_pool().await;
    sqlx::query("CREATE TABLE t (val TEXT UNIQUE);")
        .execute(&pool)
        .await?;
    let res = run_in_tx(&pool, |tx| {
        async move {
            sqlx::query("INSERT INTO t (val) VALUES ('dup');")
                .execute(&mut **tx)
                .await?;
            sqlx::query("INSERT INTO t (val) VALUES ('dup');")
                .execute(&mut **tx)
                .await?;
            Ok::<_, anyhow::Error>(())
        }
        .boxed()
    })
    .await;
    assert!(res.is_err());
    assert_eq!(util::count(&pool, "SELECT COUNT(*) FROM t").await, 0);
    Ok(())
}

#[tokio::test]
async fn rollback_on_application_error() -> Result<()> {
    let pool = util::temp_pool().await;
    sqlx::query("CREATE TABLE t (val TEXT);")
        .execute(&pool)
        .await?;
    let res: Result<(), anyhow::Error> = run_in_tx(&pool, |tx| {
        async move {
            sqlx::query("INSERT INTO t (val) VALUES ('kept?');")
                .execute(&mut **tx)
                .await?;
            Err::<(), _>(anyhow::anyhow!("validation failed after the insert"))
        }
        .boxed()
    })
    .await;
    assert!(res.is_err());
    assert_eq!(util::count(&pool, "SELECT COUNT(*) FROM t").await, 0);
    Ok(())
}
