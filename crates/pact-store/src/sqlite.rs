use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::FromRow;
use sqlx::SqlitePool;
use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePoolOptions};
use sqlx::types::Json;
use tokio::sync::watch;
use tracing::debug;

use crate::{Error, Promise, PromiseState, PromiseStore};

const COLUMNS: &str =
  "key, step_name, args, state, result, error, created_at, started_at, completed_at";

/// A promise as stored in the database.
#[derive(Debug, FromRow)]
struct PromiseRow {
  key: String,
  step_name: String,
  args: Json<serde_json::Value>,
  state: PromiseState,
  result: Option<Json<serde_json::Value>>,
  error: Option<String>,
  created_at: DateTime<Utc>,
  started_at: Option<DateTime<Utc>>,
  completed_at: Option<DateTime<Utc>>,
}

impl From<PromiseRow> for Promise {
  fn from(row: PromiseRow) -> Self {
    Self {
      key: row.key,
      step_name: row.step_name,
      args: row.args.0,
      state: row.state,
      result: row.result.map(|r| r.0),
      error: row.error,
      created_at: row.created_at,
      started_at: row.started_at,
      completed_at: row.completed_at,
    }
  }
}

/// SQLite-based promise store.
///
/// Transitions are single compare-and-swap statements, so several processes
/// can share one database file: one submits and executes, others poll.
#[derive(Clone)]
pub struct SqliteStore {
  pool: SqlitePool,
  completions: Arc<watch::Sender<u64>>,
}

impl SqliteStore {
  /// Create a new SQLite store with the given connection pool.
  ///
  /// The schema is not created; call [`SqliteStore::migrate`] first.
  pub fn new(pool: SqlitePool) -> Self {
    let (completions, _) = watch::channel(0);
    Self {
      pool,
      completions: Arc::new(completions),
    }
  }

  /// Open (creating if missing) the database at `path` and run migrations.
  pub async fn connect(path: impl AsRef<Path>) -> Result<Self, Error> {
    let options = SqliteConnectOptions::new()
      .filename(path.as_ref())
      .create_if_missing(true)
      .journal_mode(SqliteJournalMode::Wal)
      .busy_timeout(Duration::from_secs(5));

    let pool = SqlitePoolOptions::new()
      .max_connections(4)
      .connect_with(options)
      .await?;

    let store = Self::new(pool);
    store.migrate().await?;
    debug!(path = %path.as_ref().display(), "opened promise store");
    Ok(store)
  }

  /// Run database migrations.
  pub async fn migrate(&self) -> Result<(), Error> {
    sqlx::migrate!("../../migrations").run(&self.pool).await?;
    Ok(())
  }

  /// Turn a CAS miss into the precise error for the caller.
  async fn explain_miss(&self, key: &str, to: PromiseState) -> Error {
    match self.get(key).await {
      Ok(current) => Error::InvalidTransition {
        key: key.to_string(),
        from: current.state,
        to,
      },
      Err(e) => e,
    }
  }

  fn notify_completion(&self) {
    self.completions.send_modify(|n| *n += 1);
  }
}

#[async_trait]
impl PromiseStore for SqliteStore {
  async fn create_if_absent(
    &self,
    key: &str,
    step_name: &str,
    args: &serde_json::Value,
  ) -> Result<Promise, Error> {
    sqlx::query(
      r#"
            INSERT INTO promises (key, step_name, args, state, created_at)
            VALUES (?, ?, ?, ?, ?)
            ON CONFLICT(key) DO NOTHING
            "#,
    )
    .bind(key)
    .bind(step_name)
    .bind(Json(args))
    .bind(PromiseState::Pending)
    .bind(Utc::now())
    .execute(&self.pool)
    .await?;

    self.get(key).await
  }

  async fn mark_running(&self, key: &str) -> Result<Promise, Error> {
    let row: Option<PromiseRow> = sqlx::query_as(&format!(
      r#"
            UPDATE promises
            SET state = ?, started_at = ?
            WHERE key = ? AND state = ?
            RETURNING {COLUMNS}
            "#
    ))
    .bind(PromiseState::Running)
    .bind(Utc::now())
    .bind(key)
    .bind(PromiseState::Pending)
    .fetch_optional(&self.pool)
    .await?;

    match row {
      Some(row) => Ok(row.into()),
      None => Err(self.explain_miss(key, PromiseState::Running).await),
    }
  }

  async fn resolve(&self, key: &str, result: serde_json::Value) -> Result<Promise, Error> {
    let row: Option<PromiseRow> = sqlx::query_as(&format!(
      r#"
            UPDATE promises
            SET state = ?, result = ?, completed_at = ?
            WHERE key = ? AND state = ?
            RETURNING {COLUMNS}
            "#
    ))
    .bind(PromiseState::Resolved)
    .bind(Json(result))
    .bind(Utc::now())
    .bind(key)
    .bind(PromiseState::Running)
    .fetch_optional(&self.pool)
    .await?;

    match row {
      Some(row) => {
        self.notify_completion();
        Ok(row.into())
      }
      None => Err(self.explain_miss(key, PromiseState::Resolved).await),
    }
  }

  async fn reject(&self, key: &str, error: String) -> Result<Promise, Error> {
    let row: Option<PromiseRow> = sqlx::query_as(&format!(
      r#"
            UPDATE promises
            SET state = ?, error = ?, completed_at = ?
            WHERE key = ? AND state = ?
            RETURNING {COLUMNS}
            "#
    ))
    .bind(PromiseState::Rejected)
    .bind(error)
    .bind(Utc::now())
    .bind(key)
    .bind(PromiseState::Running)
    .fetch_optional(&self.pool)
    .await?;

    match row {
      Some(row) => {
        self.notify_completion();
        Ok(row.into())
      }
      None => Err(self.explain_miss(key, PromiseState::Rejected).await),
    }
  }

  async fn get(&self, key: &str) -> Result<Promise, Error> {
    let row: Option<PromiseRow> =
      sqlx::query_as(&format!("SELECT {COLUMNS} FROM promises WHERE key = ?"))
        .bind(key)
        .fetch_optional(&self.pool)
        .await?;

    row
      .map(Promise::from)
      .ok_or_else(|| Error::NotFound(key.to_string()))
  }

  async fn list(&self, state: Option<PromiseState>) -> Result<Vec<Promise>, Error> {
    let rows: Vec<PromiseRow> = sqlx::query_as(&format!(
      r#"
            SELECT {COLUMNS}
            FROM promises
            WHERE ?1 IS NULL OR state = ?1
            ORDER BY created_at ASC, key ASC
            "#
    ))
    .bind(state)
    .fetch_all(&self.pool)
    .await?;

    Ok(rows.into_iter().map(Promise::from).collect())
  }

  fn subscribe(&self) -> watch::Receiver<u64> {
    self.completions.subscribe()
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use serde_json::json;

  async fn open(dir: &tempfile::TempDir) -> SqliteStore {
    SqliteStore::connect(dir.path().join("promises.db"))
      .await
      .unwrap()
  }

  #[tokio::test]
  async fn test_lifecycle_round_trips_through_database() {
    let dir = tempfile::tempdir().unwrap();
    let store = open(&dir).await;

    let created = store
      .create_if_absent("forecast-1-2", "forecast", &json!({"lat": 1, "lon": 2}))
      .await
      .unwrap();
    assert_eq!(created.state, PromiseState::Pending);
    assert_eq!(created.args, json!({"lat": 1, "lon": 2}));

    store.mark_running("forecast-1-2").await.unwrap();
    let resolved = store
      .resolve("forecast-1-2", json!({"temp": 20}))
      .await
      .unwrap();

    assert_eq!(resolved.state, PromiseState::Resolved);
    assert_eq!(resolved.result, Some(json!({"temp": 20})));
    assert!(resolved.started_at.is_some());
    assert!(resolved.completed_at.is_some());
  }

  #[tokio::test]
  async fn test_create_if_absent_keeps_first_submission() {
    let dir = tempfile::tempdir().unwrap();
    let store = open(&dir).await;

    store.create_if_absent("k", "echo", &json!(1)).await.unwrap();
    let again = store.create_if_absent("k", "fail", &json!(2)).await.unwrap();

    assert_eq!(again.step_name, "echo");
    assert_eq!(again.args, json!(1));
    assert_eq!(store.list(None).await.unwrap().len(), 1);
  }

  #[tokio::test]
  async fn test_cas_guards_transitions() {
    let dir = tempfile::tempdir().unwrap();
    let store = open(&dir).await;
    store.create_if_absent("k", "echo", &json!(null)).await.unwrap();

    assert!(matches!(
      store.reject("k", "early".to_string()).await,
      Err(Error::InvalidTransition {
        from: PromiseState::Pending,
        to: PromiseState::Rejected,
        ..
      })
    ));

    store.mark_running("k").await.unwrap();
    assert!(matches!(
      store.mark_running("k").await,
      Err(Error::InvalidTransition {
        from: PromiseState::Running,
        ..
      })
    ));

    store.reject("k", "boom".to_string()).await.unwrap();
    assert!(matches!(
      store.resolve("k", json!(1)).await,
      Err(Error::InvalidTransition {
        from: PromiseState::Rejected,
        ..
      })
    ));
    assert!(matches!(
      store.mark_running("missing").await,
      Err(Error::NotFound(_))
    ));
  }

  #[tokio::test]
  async fn test_second_connection_sees_writes() {
    let dir = tempfile::tempdir().unwrap();
    let writer = open(&dir).await;
    let reader = open(&dir).await;

    writer.create_if_absent("k", "echo", &json!(null)).await.unwrap();
    writer.mark_running("k").await.unwrap();
    assert_eq!(reader.get("k").await.unwrap().state, PromiseState::Running);

    writer.resolve("k", json!("done")).await.unwrap();
    let seen = reader.get("k").await.unwrap();
    assert_eq!(seen.state, PromiseState::Resolved);
    assert_eq!(seen.result, Some(json!("done")));
  }

  #[tokio::test]
  async fn test_list_by_state() {
    let dir = tempfile::tempdir().unwrap();
    let store = open(&dir).await;
    store.create_if_absent("a", "echo", &json!(null)).await.unwrap();
    store.create_if_absent("b", "echo", &json!(null)).await.unwrap();
    store.mark_running("a").await.unwrap();

    let running = store.list(Some(PromiseState::Running)).await.unwrap();
    assert_eq!(running.len(), 1);
    assert_eq!(running[0].key, "a");
    assert_eq!(store.list(None).await.unwrap().len(), 2);
  }

  #[tokio::test]
  async fn test_terminal_write_notifies_subscribers() {
    let dir = tempfile::tempdir().unwrap();
    let store = open(&dir).await;
    let rx = store.subscribe();

    store.create_if_absent("k", "echo", &json!(null)).await.unwrap();
    store.mark_running("k").await.unwrap();
    store.reject("k", "boom".to_string()).await.unwrap();

    assert!(rx.has_changed().unwrap());
  }
}
