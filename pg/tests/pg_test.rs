use pg::{Connection, QueryResult};

#[tokio::test]
async fn test_ping() {
  let mut conn = Connection::connect(&default_conn_string()).await.unwrap();
  conn.ping().await.unwrap();
  conn.close().await.unwrap();
}

#[tokio::test]
async fn test_query() {
  let mut conn = Connection::connect(&default_conn_string()).await.unwrap();
  let results = conn.query("SELECT 1,2,3 UNION ALL SELECT 4,5,6;").await.unwrap();
  let selected = results.results.front().unwrap();
  match selected {
    QueryResult::Selected(selected) => {
      assert_eq!(selected.columns.len(), 3);
      assert_eq!(selected.rows.len(), 2);
    }
    _ => panic!("expected a selected query result"),
  }
  conn.close().await.unwrap();
}

#[tokio::test]
async fn test_error_query() {
  let mut conn = Connection::connect(&default_conn_string()).await.unwrap();
  let err = conn.query_first("SELECT 1/0;").await.unwrap().as_backend_error().unwrap();
  assert!(err.contains("division by zero"));
  conn.close().await.unwrap();
}

#[tokio::test]
async fn test_connection_server_info() {
  let mut conn = Connection::connect(&default_conn_string()).await.unwrap();
  let identify_system = conn.identify_system().await.unwrap();
  assert_eq!(identify_system.dbname, Some("test".to_string()));
  conn.close().await.unwrap();
}

#[tokio::test]
async fn test_invalid_password_is_rejected() {
  let err = Connection::connect("host=localhost port=5432 user=md5_user password=invalid dbname=test").await.unwrap_err();
  assert!(err.to_string().contains("password authentication failed"));
}

fn default_conn_string() -> String {
  "host=localhost port=5432 user=postgres password=password dbname=test".to_string()
}
