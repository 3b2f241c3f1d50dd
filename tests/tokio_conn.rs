//! The async driver against the mock backend.

mod common;

use common::{connect_async, stats};
use zero_pgx::{Error, Opts, PromotionState, QueryMode};

#[tokio::test]
async fn test_query_and_promotion() {
    let (mut conn, server) = connect_async(Opts {
        prepare_threshold: 2,
        ..Opts::default()
    });

    for i in 0..4 {
        let row: Option<(i32, String)> = conn.query_first("SELECT ?, ?", &(i, "x")).await.unwrap();
        assert_eq!(row, Some((i, "x".to_string())));
    }
    assert_eq!(conn.promotion_state("SELECT ?, ?"), PromotionState::Promoted);
    let stats = stats(&server);
    assert_eq!(stats.named_parses.len(), 1);
    assert_eq!(stats.unnamed_parses, 1);
}

#[tokio::test]
async fn test_batch_with_rewrite() {
    let (mut conn, server) = connect_async(Opts {
        rewrite_batched_inserts: true,
        ..Opts::default()
    });
    let stmt = conn.prepare("INSERT INTO items (a, b) VALUES (?, ?)").unwrap();
    let frames: Vec<_> = (0..3)
        .map(|i| conn.bind(&stmt, &(format!("a{}", i), format!("b{}", i))).unwrap())
        .collect();
    let counts = conn.execute_batch(&frames).await.unwrap();
    assert_eq!(counts, vec![Some(1); 3]);
    assert_eq!(server.lock().unwrap().rows.len(), 3);

    let rows: Vec<(String, String)> = conn.query_collect("SELECT * FROM items", &()).await.unwrap();
    assert_eq!(rows[0], ("a0".to_string(), "b0".to_string()));
}

#[tokio::test]
async fn test_protocol_violation_breaks_connection() {
    let (mut conn, _server) = connect_async(Opts::default());
    let err = conn.query_drop("SELECT GARBAGE", &()).await.unwrap_err();
    assert!(matches!(err, Error::Protocol(_)));
    assert!(conn.is_broken());
    assert!(matches!(
        conn.query_drop("SELECT 1", &()).await.unwrap_err(),
        Error::ConnectionBroken
    ));
}

#[tokio::test]
async fn test_simple_mode() {
    let (mut conn, server) = connect_async(Opts {
        query_mode: QueryMode::Simple,
        ..Opts::default()
    });
    conn.query_drop("BEGIN", &()).await.unwrap();
    assert!(conn.in_transaction());
    let rows: Vec<(String,)> = conn.query_collect("SELECT ?", &("a\\b",)).await.unwrap();
    assert_eq!(rows, vec![("a\\b".to_string(),)]);
    conn.query_drop("ROLLBACK", &()).await.unwrap();
    assert!(!conn.in_transaction());
    assert_eq!(stats(&server).queries.len(), 3);
}

#[tokio::test]
async fn test_close() {
    let (mut conn, server) = connect_async(Opts {
        prepare_threshold: 1,
        ..Opts::default()
    });
    let stmt = conn.prepare("SELECT 1").unwrap();
    let frame = conn.bind(&stmt, &()).unwrap();
    assert_eq!(conn.execute_drop(&frame).await.unwrap(), Some(1));
    conn.close(&stmt).await.unwrap();
    assert_eq!(stats(&server).closes, vec!["_zpgx_1".to_string()]);
}
