use std::collections::HashMap;
use std::io;

use once_cell::sync::Lazy;
use sqlx::query::Query;
use sqlx::sqlite::{Sqlite, SqliteArguments, SqlitePool, SqliteRow};
use sqlx::Transaction;
use tokio::sync::Mutex;

/// Side effect queued with [`Store::on_commit`], executed only after the
/// outermost transaction physically commits.
pub type DeferredAction = Box<dyn FnOnce() -> io::Result<()> + Send + 'static>;

#[derive(thiserror::Error, Debug)]
pub enum StoreError {
    #[error("Table \"{0}\" does not exist")]
    BadTable(String),

    #[error("Column \"{column}\" does not exist in table \"{table}\"")]
    BadColumn { table: String, column: String },

    #[error("Database is out of date: {existing} should be {required}. Run the migration step before starting")]
    OutOfDate { existing: i64, required: i64 },

    #[error("Transaction was already marked for rollback")]
    Doomed,

    #[error("Deferred commit action failed: {0}")]
    DeferredAction(#[source] io::Error),

    #[error(transparent)]
    Sqlx(#[from] sqlx::Error),
}

/// Static schema map. Insert/update/delete helpers refuse to touch any
/// table or column not listed here, before issuing SQL.
static SCHEMA: Lazy<HashMap<&'static str, &'static [&'static str]>> = Lazy::new(|| {
    HashMap::from([
        (
            "channels",
            &[
                "id",
                "name",
                "uploads_playlist",
                "download_directory",
                "queuefile_extension",
                "automark",
                "autorefresh",
            ][..],
        ),
        (
            "videos",
            &[
                "id",
                "published",
                "author_id",
                "title",
                "description",
                "duration",
                "views",
                "thumbnail",
                "live_broadcast",
                "state",
            ][..],
        ),
    ])
});

fn table_columns(table: &str) -> Result<&'static [&'static str], StoreError> {
    SCHEMA
        .get(table)
        .copied()
        .ok_or_else(|| StoreError::BadTable(table.to_string()))
}

fn assert_column(
    table: &str,
    columns: &[&str],
    column: &str,
) -> Result<(), StoreError> {
    if columns.contains(&column) {
        Ok(())
    } else {
        Err(StoreError::BadColumn {
            table: table.to_string(),
            column: column.to_string(),
        })
    }
}

/// A bound SQL parameter. The raw helpers take these instead of generics so
/// a row can be assembled as a plain list of (column, value) pairs.
#[derive(Debug, Clone)]
pub enum Arg {
    Text(String),
    Int(i64),
    Bool(bool),
    Null,
}

impl From<&str> for Arg {
    fn from(value: &str) -> Self {
        Arg::Text(value.to_string())
    }
}

impl From<String> for Arg {
    fn from(value: String) -> Self {
        Arg::Text(value)
    }
}

impl From<i64> for Arg {
    fn from(value: i64) -> Self {
        Arg::Int(value)
    }
}

impl From<bool> for Arg {
    fn from(value: bool) -> Self {
        Arg::Bool(value)
    }
}

impl From<Option<String>> for Arg {
    fn from(value: Option<String>) -> Self {
        match value {
            Some(text) => Arg::Text(text),
            None => Arg::Null,
        }
    }
}

impl From<Option<i64>> for Arg {
    fn from(value: Option<i64>) -> Self {
        match value {
            Some(number) => Arg::Int(number),
            None => Arg::Null,
        }
    }
}

fn bind_all<'q>(sql: &'q str, args: &'q [Arg]) -> Query<'q, Sqlite, SqliteArguments<'q>> {
    let mut query = sqlx::query(sql);
    for arg in args {
        query = match arg {
            Arg::Text(value) => query.bind(value.as_str()),
            Arg::Int(value) => query.bind(*value),
            Arg::Bool(value) => query.bind(*value),
            Arg::Null => query.bind(None::<String>),
        };
    }
    query
}

struct TxState {
    tx: Option<Transaction<'static, Sqlite>>,
    depth: u32,
    doomed: bool,
    on_commit: Vec<DeferredAction>,
}

/// Store access with reference-counted transaction nesting.
///
/// Only the outermost `begin` opens a physical transaction and only the
/// outermost `commit` closes it. A `rollback` at any depth dooms the whole
/// transaction; deferred actions registered with `on_commit` run after a
/// successful physical commit and are discarded otherwise.
///
/// All statements issued through the helpers run on the open transaction
/// when there is one, so writes are visible to subsequent reads inside the
/// same unit of work. The internal mutex serializes statements; it does not
/// make interleaved multi-writer use meaningful (single-writer model).
pub struct Store {
    pool: SqlitePool,
    state: Mutex<TxState>,
}

impl Store {
    pub fn new(pool: SqlitePool) -> Self {
        Store {
            pool,
            state: Mutex::new(TxState {
                tx: None,
                depth: 0,
                doomed: false,
                on_commit: Vec::new(),
            }),
        }
    }

    pub async fn begin(&self) -> Result<(), StoreError> {
        let mut state = self.state.lock().await;
        if state.depth == 0 {
            state.tx = Some(self.pool.begin().await?);
            state.doomed = false;
        }
        state.depth += 1;
        Ok(())
    }

    pub async fn commit(&self) -> Result<(), StoreError> {
        let mut state = self.state.lock().await;
        if state.depth == 0 {
            tracing::debug!("Commit outside of any transaction; nothing to do");
            return Ok(());
        }
        state.depth -= 1;
        if state.depth > 0 {
            return Ok(());
        }

        let actions = std::mem::take(&mut state.on_commit);
        let Some(tx) = state.tx.take() else {
            return Ok(());
        };
        if state.doomed {
            state.doomed = false;
            tx.rollback().await?;
            return Err(StoreError::Doomed);
        }
        tx.commit().await?;
        drop(state);
        run_deferred(actions)
    }

    pub async fn rollback(&self) -> Result<(), StoreError> {
        let mut state = self.state.lock().await;
        if state.depth == 0 {
            tracing::debug!("Rollback outside of any transaction; nothing to do");
            return Ok(());
        }
        state.depth -= 1;
        state.doomed = true;
        if state.depth > 0 {
            return Ok(());
        }

        state.on_commit.clear();
        state.doomed = false;
        let Some(tx) = state.tx.take() else {
            return Ok(());
        };
        tx.rollback().await?;
        Ok(())
    }

    pub async fn in_transaction(&self) -> bool {
        self.state.lock().await.depth > 0
    }

    /// Queue `action` to run after the outermost commit. Outside of any
    /// transaction the action runs immediately.
    pub async fn on_commit(&self, action: DeferredAction) -> Result<(), StoreError> {
        let mut state = self.state.lock().await;
        if state.depth == 0 {
            drop(state);
            return action().map_err(StoreError::DeferredAction);
        }
        state.on_commit.push(action);
        Ok(())
    }

    pub async fn execute(&self, sql: &str, args: &[Arg]) -> Result<u64, StoreError> {
        let mut state = self.state.lock().await;
        let query = bind_all(sql, args);
        let result = match state.tx.as_mut() {
            Some(tx) => query.execute(&mut **tx).await?,
            None => query.execute(&self.pool).await?,
        };
        Ok(result.rows_affected())
    }

    pub async fn fetch_optional(
        &self,
        sql: &str,
        args: &[Arg],
    ) -> Result<Option<SqliteRow>, StoreError> {
        let mut state = self.state.lock().await;
        let query = bind_all(sql, args);
        let row = match state.tx.as_mut() {
            Some(tx) => query.fetch_optional(&mut **tx).await?,
            None => query.fetch_optional(&self.pool).await?,
        };
        Ok(row)
    }

    pub async fn fetch_all(&self, sql: &str, args: &[Arg]) -> Result<Vec<SqliteRow>, StoreError> {
        let mut state = self.state.lock().await;
        let query = bind_all(sql, args);
        let rows = match state.tx.as_mut() {
            Some(tx) => query.fetch_all(&mut **tx).await?,
            None => query.fetch_all(&self.pool).await?,
        };
        Ok(rows)
    }

    pub async fn insert(&self, table: &str, pairs: &[(&str, Arg)]) -> Result<(), StoreError> {
        let columns = table_columns(table)?;
        for (column, _) in pairs {
            assert_column(table, columns, column)?;
        }

        let column_list = pairs.iter().map(|(column, _)| *column).collect::<Vec<_>>().join(", ");
        let placeholders = vec!["?"; pairs.len()].join(", ");
        let sql = format!("INSERT INTO {table}({column_list}) VALUES({placeholders})");
        let args: Vec<Arg> = pairs.iter().map(|(_, arg)| arg.clone()).collect();
        self.execute(&sql, &args).await?;
        Ok(())
    }

    /// Updates the row whose `where_key` column matches the pair of the same
    /// name; every other pair becomes an assignment.
    pub async fn update(
        &self,
        table: &str,
        pairs: &[(&str, Arg)],
        where_key: &str,
    ) -> Result<u64, StoreError> {
        let columns = table_columns(table)?;
        for (column, _) in pairs {
            assert_column(table, columns, column)?;
        }
        let where_arg = pairs
            .iter()
            .find(|(column, _)| *column == where_key)
            .map(|(_, arg)| arg.clone())
            .ok_or_else(|| StoreError::BadColumn {
                table: table.to_string(),
                column: where_key.to_string(),
            })?;

        let assignments = pairs
            .iter()
            .filter(|(column, _)| *column != where_key)
            .map(|(column, _)| format!("{column} = ?"))
            .collect::<Vec<_>>()
            .join(", ");
        let sql = format!("UPDATE {table} SET {assignments} WHERE {where_key} = ?");
        let mut args: Vec<Arg> = pairs
            .iter()
            .filter(|(column, _)| *column != where_key)
            .map(|(_, arg)| arg.clone())
            .collect();
        args.push(where_arg);
        self.execute(&sql, &args).await
    }

    pub async fn delete(&self, table: &str, pairs: &[(&str, Arg)]) -> Result<u64, StoreError> {
        let columns = table_columns(table)?;
        for (column, _) in pairs {
            assert_column(table, columns, column)?;
        }

        let conditions = pairs
            .iter()
            .map(|(column, _)| format!("{column} = ?"))
            .collect::<Vec<_>>()
            .join(" AND ");
        let sql = format!("DELETE FROM {table} WHERE {conditions}");
        let args: Vec<Arg> = pairs.iter().map(|(_, arg)| arg.clone()).collect();
        self.execute(&sql, &args).await
    }
}

fn run_deferred(actions: Vec<DeferredAction>) -> Result<(), StoreError> {
    let mut first_failure = None;
    for action in actions {
        if let Err(error) = action() {
            tracing::error!(%error, "Deferred commit action failed");
            if first_failure.is_none() {
                first_failure = Some(error);
            }
        }
    }
    match first_failure {
        None => Ok(()),
        Some(error) => Err(StoreError::DeferredAction(error)),
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    use super::*;
    use crate::db::init_db_in_memory;

    async fn test_store() -> Store {
        Store::new(init_db_in_memory().await.unwrap())
    }

    fn channel_pairs(id: &str) -> Vec<(&'static str, Arg)> {
        vec![
            ("id", Arg::from(id)),
            ("name", Arg::from("test channel")),
            ("uploads_playlist", Arg::Null),
            ("download_directory", Arg::Null),
            ("queuefile_extension", Arg::Null),
            ("automark", Arg::from("pending")),
            ("autorefresh", Arg::from(true)),
        ]
    }

    async fn count_channels(store: &Store) -> i64 {
        use sqlx::Row;
        let row = store
            .fetch_optional("SELECT COUNT(*) AS n FROM channels", &[])
            .await
            .unwrap()
            .unwrap();
        row.try_get("n").unwrap()
    }

    #[tokio::test]
    async fn insert_rejects_unknown_table() {
        let store = test_store().await;
        let result = store.insert("nonsense", &[("id", Arg::from("x"))]).await;
        assert!(matches!(result, Err(StoreError::BadTable(t)) if t == "nonsense"));
    }

    #[tokio::test]
    async fn insert_rejects_unknown_column() {
        let store = test_store().await;
        let result = store.insert("channels", &[("bogus", Arg::from("x"))]).await;
        assert!(matches!(
            result,
            Err(StoreError::BadColumn { table, column }) if table == "channels" && column == "bogus"
        ));
    }

    #[tokio::test]
    async fn nested_commit_only_commits_at_outermost() {
        let store = test_store().await;
        store.begin().await.unwrap();
        store.begin().await.unwrap();
        store.insert("channels", &channel_pairs("UC1")).await.unwrap();
        store.commit().await.unwrap();
        assert!(store.in_transaction().await);
        store.commit().await.unwrap();
        assert!(!store.in_transaction().await);
        assert_eq!(count_channels(&store).await, 1);
    }

    #[tokio::test]
    async fn rollback_discards_writes() {
        let store = test_store().await;
        store.begin().await.unwrap();
        store.insert("channels", &channel_pairs("UC1")).await.unwrap();
        store.rollback().await.unwrap();
        assert_eq!(count_channels(&store).await, 0);
    }

    #[tokio::test]
    async fn inner_rollback_dooms_outer_commit() {
        let store = test_store().await;
        store.begin().await.unwrap();
        store.begin().await.unwrap();
        store.insert("channels", &channel_pairs("UC1")).await.unwrap();
        store.rollback().await.unwrap();
        let result = store.commit().await;
        assert!(matches!(result, Err(StoreError::Doomed)));
        assert_eq!(count_channels(&store).await, 0);
    }

    #[tokio::test]
    async fn on_commit_runs_after_commit_in_order() {
        let store = test_store().await;
        let counter = Arc::new(AtomicUsize::new(0));
        store.begin().await.unwrap();
        for expected in 0..3 {
            let counter = Arc::clone(&counter);
            store
                .on_commit(Box::new(move || {
                    assert_eq!(counter.fetch_add(1, Ordering::SeqCst), expected);
                    Ok(())
                }))
                .await
                .unwrap();
        }
        assert_eq!(counter.load(Ordering::SeqCst), 0);
        store.commit().await.unwrap();
        assert_eq!(counter.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn on_commit_discarded_on_rollback() {
        let store = test_store().await;
        let counter = Arc::new(AtomicUsize::new(0));
        store.begin().await.unwrap();
        let inner = Arc::clone(&counter);
        store
            .on_commit(Box::new(move || {
                inner.fetch_add(1, Ordering::SeqCst);
                Ok(())
            }))
            .await
            .unwrap();
        store.rollback().await.unwrap();
        assert_eq!(counter.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn on_commit_outside_transaction_runs_immediately() {
        let store = test_store().await;
        let counter = Arc::new(AtomicUsize::new(0));
        let inner = Arc::clone(&counter);
        store
            .on_commit(Box::new(move || {
                inner.fetch_add(1, Ordering::SeqCst);
                Ok(())
            }))
            .await
            .unwrap();
        assert_eq!(counter.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn update_requires_where_key_pair() {
        let store = test_store().await;
        let result = store
            .update("channels", &[("name", Arg::from("x"))], "id")
            .await;
        assert!(matches!(result, Err(StoreError::BadColumn { .. })));
    }

    #[tokio::test]
    async fn update_and_delete_round_trip() {
        use sqlx::Row;
        let store = test_store().await;
        store.insert("channels", &channel_pairs("UC1")).await.unwrap();
        store
            .update(
                "channels",
                &[("id", Arg::from("UC1")), ("name", Arg::from("renamed"))],
                "id",
            )
            .await
            .unwrap();
        let row = store
            .fetch_optional("SELECT name FROM channels WHERE id = ?", &[Arg::from("UC1")])
            .await
            .unwrap()
            .unwrap();
        let name: String = row.try_get("name").unwrap();
        assert_eq!(name, "renamed");

        let deleted = store.delete("channels", &[("id", Arg::from("UC1"))]).await.unwrap();
        assert_eq!(deleted, 1);
        assert_eq!(count_channels(&store).await, 0);
    }
}
