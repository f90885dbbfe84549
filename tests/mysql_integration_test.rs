// ABOUTME: Integration tests against live MySQL servers
// ABOUTME: Exercises catalog probes and orphan cleanup, binary keys included; run with --ignored and TEST_* variables

use mysql_async::prelude::Queryable;
use mysql_async::{Conn, OptsBuilder};
use std::env;
use table_mirror::catalog::{Catalog, MySqlCatalog};
use table_mirror::config::Endpoint;
use table_mirror::reconciler::{OrphanReport, Reconciler};
use table_mirror::Watermark;

/// Endpoint from TEST_<PREFIX>_HOST, _PORT, _USER, _PASSWORD and _DB.
fn endpoint_from_env(prefix: &str) -> Option<Endpoint> {
    let var = |name: &str| env::var(format!("TEST_{}_{}", prefix, name)).ok();
    Some(Endpoint {
        host: var("HOST")?,
        port: var("PORT").and_then(|p| p.parse().ok()).unwrap_or(3306),
        user: var("USER")?,
        password: var("PASSWORD").unwrap_or_default(),
        database: var("DB")?,
        charset: "utf8mb4".to_string(),
    })
}

fn get_test_endpoints() -> Option<(Endpoint, Endpoint)> {
    Some((endpoint_from_env("SOURCE")?, endpoint_from_env("DEST")?))
}

async fn raw_conn(endpoint: &Endpoint) -> Conn {
    let opts = OptsBuilder::default()
        .ip_or_hostname(endpoint.host.clone())
        .tcp_port(endpoint.port)
        .user(Some(endpoint.user.clone()))
        .pass(Some(endpoint.password.clone()))
        .db_name(Some(endpoint.database.clone()));
    Conn::new(opts).await.expect("Failed to connect")
}

async fn setup(conn: &mut Conn, table: &str, rows: &str) {
    conn.query_drop(format!("DROP TABLE IF EXISTS `{}`", table))
        .await
        .unwrap();
    conn.query_drop(format!(
        "CREATE TABLE `{}` (
            order_id INT NOT NULL,
            line VARCHAR(16) NOT NULL,
            qty INT,
            editTime DATETIME NULL,
            PRIMARY KEY (order_id, line)
        )",
        table
    ))
    .await
    .unwrap();
    if !rows.is_empty() {
        conn.query_drop(format!(
            "INSERT INTO `{}` (order_id, line, qty, editTime) VALUES {}",
            table, rows
        ))
        .await
        .unwrap();
    }
}

#[tokio::test]
#[ignore]
async fn test_catalog_probes() {
    let (source, _dest) =
        get_test_endpoints().expect("TEST_SOURCE_* and TEST_DEST_* must be set");
    let table = "mirror_test_probes";

    let mut raw = raw_conn(&source).await;
    setup(
        &mut raw,
        table,
        "(1, 'a', 5, '2024-01-01 00:00:00'), (1, 'b', 7, '2024-01-02 12:30:00')",
    )
    .await;

    let mut catalog = MySqlCatalog::connect(&source).await.unwrap();
    assert!(catalog.table_exists(table).await.unwrap());
    assert!(catalog.list_tables().await.unwrap().contains(&table.to_string()));
    assert_eq!(
        catalog.columns(table).await.unwrap(),
        vec!["order_id", "line", "qty", "editTime"]
    );
    assert_eq!(
        catalog.primary_key(table).await.unwrap(),
        vec!["order_id", "line"]
    );
    assert!(catalog.has_column(table, "editTime").await.unwrap());
    assert!(!catalog.has_column(table, "missing").await.unwrap());
    assert!(catalog.row_count_nonzero(table).await.unwrap());
    assert_eq!(
        catalog.max_value(table, "editTime").await.unwrap(),
        Some(Watermark::from("2024-01-02 12:30:00"))
    );

    raw.query_drop(format!("DELETE FROM `{}`", table)).await.unwrap();
    assert!(!catalog.row_count_nonzero(table).await.unwrap());
    assert_eq!(catalog.max_value(table, "editTime").await.unwrap(), None);

    Box::new(catalog).close().await.unwrap();
    let _ = raw
        .query_drop(format!("DROP TABLE IF EXISTS `{}`", table))
        .await;
}

#[tokio::test]
#[ignore]
async fn test_composite_key_orphans_deleted() {
    let (source, dest) =
        get_test_endpoints().expect("TEST_SOURCE_* and TEST_DEST_* must be set");
    let table = "mirror_test_orphans";

    let mut raw_source = raw_conn(&source).await;
    let mut raw_dest = raw_conn(&dest).await;
    setup(&mut raw_source, table, "(1, 'a', 5, NULL), (3, 'x', 1, NULL)").await;
    setup(
        &mut raw_dest,
        table,
        "(1, 'a', 5, NULL), (1, 'b', 7, NULL), (2, 'a', 1, NULL), (3, 'x', 1, NULL)",
    )
    .await;

    let mut src = MySqlCatalog::connect(&source).await.unwrap();
    let mut dst = MySqlCatalog::connect(&dest).await.unwrap();
    let report = Reconciler::new(&mut src, &mut dst, 1)
        .reconcile_table(table)
        .await
        .unwrap();
    assert_eq!(report, OrphanReport::Deleted(2));

    let remaining: Vec<(i32, String)> = raw_dest
        .query(format!(
            "SELECT order_id, line FROM `{}` ORDER BY order_id, line",
            table
        ))
        .await
        .unwrap();
    assert_eq!(remaining, vec![(1, "a".to_string()), (3, "x".to_string())]);

    let rerun = Reconciler::new(&mut src, &mut dst, 1000)
        .reconcile_table(table)
        .await
        .unwrap();
    assert_eq!(rerun, OrphanReport::Deleted(0));

    for conn in [&mut raw_source, &mut raw_dest] {
        let _ = conn
            .query_drop(format!("DROP TABLE IF EXISTS `{}`", table))
            .await;
    }
}

#[tokio::test]
#[ignore]
async fn test_binary_key_orphans_deleted() {
    let (source, dest) =
        get_test_endpoints().expect("TEST_SOURCE_* and TEST_DEST_* must be set");
    let table = "mirror_test_binary_keys";

    let mut raw_source = raw_conn(&source).await;
    let mut raw_dest = raw_conn(&dest).await;
    for conn in [&mut raw_source, &mut raw_dest] {
        conn.query_drop(format!("DROP TABLE IF EXISTS `{}`", table))
            .await
            .unwrap();
        conn.query_drop(format!(
            "CREATE TABLE `{}` (id VARBINARY(16) NOT NULL PRIMARY KEY, qty INT)",
            table
        ))
        .await
        .unwrap();
    }
    raw_source
        .query_drop(format!(
            "INSERT INTO `{}` VALUES (X'DEADBEEFFF', 1), (X'00C3', 2)",
            table
        ))
        .await
        .unwrap();
    raw_dest
        .query_drop(format!(
            "INSERT INTO `{}` VALUES (X'DEADBEEFFF', 1), (X'00C3', 2), (X'FFFE01', 3)",
            table
        ))
        .await
        .unwrap();

    let mut src = MySqlCatalog::connect(&source).await.unwrap();
    let mut dst = MySqlCatalog::connect(&dest).await.unwrap();
    let keys = src.primary_key_values(table, &["id".to_string()]).await.unwrap();
    assert!(keys.contains(&vec![vec![0xde, 0xad, 0xbe, 0xef, 0xff]]));

    let report = Reconciler::new(&mut src, &mut dst, 1000)
        .reconcile_table(table)
        .await
        .unwrap();
    assert_eq!(report, OrphanReport::Deleted(1));

    let remaining: Vec<i32> = raw_dest
        .query(format!("SELECT qty FROM `{}` ORDER BY qty", table))
        .await
        .unwrap();
    assert_eq!(remaining, vec![1, 2]);

    for conn in [&mut raw_source, &mut raw_dest] {
        let _ = conn
            .query_drop(format!("DROP TABLE IF EXISTS `{}`", table))
            .await;
    }
}
