use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use futures::FutureExt;
use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::{Map, Value};
use sqlx::sqlite::SqliteRow;
use sqlx::{Pool, Row, Sqlite, SqliteConnection};
use tokio::sync::broadcast;

use crate::db::run_in_tx;
use crate::error::{AppError, AppResult};
use crate::time::now_ms;

/// Upper bound of a prefix range scan. Everything that starts with the
/// prefix sorts strictly below `prefix + SENTINEL`.
pub const PREFIX_SENTINEL: char = '\u{f8ff}';

const WATCH_CHANNEL_CAPACITY: usize = 32;

/// Queryable document fields. Closed set: an unknown field cannot be named,
/// so a filter can never silently match nothing because of a typo.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Field {
    Id,
    NameLowercased,
    ModelType,
    ListType,
    Status,
    AddressId,
    ListId,
    ModelId,
    IsAvailable,
    CreatedDate,
    RoomName,
}

impl Field {
    /// Wire name of the field inside a document.
    pub fn key(self) -> &'static str {
        match self {
            Field::Id => "id",
            Field::NameLowercased => "nameLowercased",
            Field::ModelType => "type",
            Field::ListType => "listType",
            Field::Status => "status",
            Field::AddressId => "addressId",
            Field::ListId => "listId",
            Field::ModelId => "modelId",
            Field::IsAvailable => "isAvailable",
            Field::CreatedDate => "createdDate",
            Field::RoomName => "roomName",
        }
    }

    /// `json_extract` path for SQL. Static strings only; never interpolate
    /// caller input into query text.
    fn json_path(self) -> &'static str {
        match self {
            Field::Id => "$.id",
            Field::NameLowercased => "$.nameLowercased",
            Field::ModelType => "$.type",
            Field::ListType => "$.listType",
            Field::Status => "$.status",
            Field::AddressId => "$.addressId",
            Field::ListId => "$.listId",
            Field::ModelId => "$.modelId",
            Field::IsAvailable => "$.isAvailable",
            Field::CreatedDate => "$.createdDate",
            Field::RoomName => "$.roomName",
        }
    }
}

/// Closed filter set per the store's query surface.
#[derive(Debug, Clone, PartialEq)]
pub enum Filter {
    /// Scalar equality on a named field.
    Equals(Field, Value),
    /// Half-open lexicographic range `[prefix, prefix + PREFIX_SENTINEL)`.
    Prefix(Field, String),
    /// Document id membership, the batched join-key lookup.
    IdIn(Vec<String>),
}

/// Composite keyset cursor: the sort-key value and id of the last record of
/// the previous page. The id tiebreak is what keeps pagination gap-free when
/// sort keys collide.
#[derive(Debug, Clone, PartialEq)]
pub struct Cursor {
    pub key: Value,
    pub id: String,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Query {
    pub collection: String,
    pub filters: Vec<Filter>,
    pub order_by: Field,
    pub start_after: Option<Cursor>,
    pub limit: Option<i64>,
}

impl Query {
    pub fn new(collection: impl Into<String>, order_by: Field) -> Self {
        Query {
            collection: collection.into(),
            filters: Vec::new(),
            order_by,
            start_after: None,
            limit: None,
        }
    }
}

/// A stored document: its id plus the decoded JSON payload.
#[derive(Debug, Clone, PartialEq)]
pub struct Document {
    pub id: String,
    pub data: Value,
}

impl Document {
    pub fn decode<T: DeserializeOwned>(&self) -> AppResult<T> {
        serde_json::from_value(self.data.clone()).map_err(AppError::from)
    }

    /// Raw value of a field, for cursor bookkeeping.
    pub fn field(&self, field: Field) -> Value {
        self.data.get(field.key()).cloned().unwrap_or(Value::Null)
    }
}

/// Serialize a domain record into its document payload.
pub fn encode<T: Serialize>(record: &T) -> AppResult<Value> {
    serde_json::to_value(record).map_err(AppError::from)
}

/// Rooms subcollection path under a list document.
pub fn rooms_collection(list_collection: &str, list_id: &str) -> String {
    format!("{list_collection}/{list_id}/rooms")
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChangeKind {
    Updated,
    Deleted,
}

/// Change notification delivered to `watch` subscribers.
#[derive(Debug, Clone)]
pub struct DocChange {
    pub kind: ChangeKind,
    pub collection: String,
    pub id: String,
    pub data: Option<Value>,
}

/// Live handle on a single document's change feed. Dropping or calling
/// `cancel` releases the subscription.
pub struct Subscription {
    rx: broadcast::Receiver<DocChange>,
}

impl Subscription {
    /// Next change, or `None` once the subscription lags out or closes.
    pub async fn recv(&mut self) -> Option<DocChange> {
        self.rx.recv().await.ok()
    }

    pub fn cancel(self) {}
}

type Watchers = Arc<Mutex<HashMap<String, broadcast::Sender<DocChange>>>>;

/// Document store gateway backed by SQLite.
///
/// Documents are rows in a single `documents` table keyed by
/// `(collection, id)` with the payload stored as JSON text; filters and
/// ordering go through `json_extract`. Collections are plain path strings so
/// subcollections (`pull_lists/{id}/rooms`) need no special casing.
#[derive(Clone)]
pub struct Store {
    pool: Pool<Sqlite>,
    watchers: Watchers,
}

impl Store {
    /// Wrap a pool and make sure the documents table exists.
    pub async fn open(pool: Pool<Sqlite>) -> AppResult<Self> {
        sqlx::query(
            "CREATE TABLE IF NOT EXISTS documents (
  collection TEXT NOT NULL,
  id TEXT NOT NULL,
  data TEXT NOT NULL,
  updated_at INTEGER NOT NULL,
  PRIMARY KEY (collection, id)
);",
        )
        .execute(&pool)
        .await
        .map_err(AppError::from)?;
        Ok(Store {
            pool,
            watchers: Arc::new(Mutex::new(HashMap::new())),
        })
    }

    pub fn pool(&self) -> &Pool<Sqlite> {
        &self.pool
    }

    pub async fn get(&self, collection: &str, id: &str) -> AppResult<Option<Document>> {
        let row = sqlx::query("SELECT id, data FROM documents WHERE collection = ? AND id = ?")
            .bind(collection)
            .bind(id)
            .fetch_optional(&self.pool)
            .await
            .map_err(AppError::from)?;
        row.map(row_to_document).transpose()
    }

    /// Full overwrite upsert of one document.
    pub async fn set(&self, collection: &str, id: &str, data: &Value) -> AppResult<()> {
        upsert(&self.pool, collection, id, data).await?;
        self.notify(ChangeKind::Updated, collection, id, Some(data.clone()));
        Ok(())
    }

    /// Shallow merge of top-level fields into a document, creating it when
    /// absent. This is the partial field update: unrelated fields are left
    /// untouched.
    pub async fn merge_set(
        &self,
        collection: &str,
        id: &str,
        fields: Map<String, Value>,
    ) -> AppResult<Value> {
        let collection_owned = collection.to_string();
        let id_owned = id.to_string();
        let merged = run_in_tx::<Value, AppError, _>(&self.pool, move |conn: &mut SqliteConnection| {
            async move {
                let row = sqlx::query(
                    "SELECT data FROM documents WHERE collection = ? AND id = ?",
                )
                .bind(&collection_owned)
                .bind(&id_owned)
                .fetch_optional(&mut *conn)
                .await
                .map_err(AppError::from)?;

                let mut data = match row {
                    Some(row) => parse_data(&row)?,
                    None => Map::new(),
                };
                for (key, value) in fields {
                    data.insert(key, value);
                }
                let merged = Value::Object(data);
                let text = merged.to_string();
                sqlx::query(
                    "INSERT INTO documents (collection, id, data, updated_at) VALUES (?, ?, ?, ?)
                     ON CONFLICT(collection, id) DO UPDATE SET data = excluded.data, updated_at = excluded.updated_at",
                )
                .bind(&collection_owned)
                .bind(&id_owned)
                .bind(text)
                .bind(now_ms())
                .execute(&mut *conn)
                .await
                .map_err(AppError::from)?;
                Ok(merged)
            }
            .boxed()
        })
        .await?;
        self.notify(ChangeKind::Updated, collection, id, Some(merged.clone()));
        Ok(merged)
    }

    pub async fn delete(&self, collection: &str, id: &str) -> AppResult<()> {
        sqlx::query("DELETE FROM documents WHERE collection = ? AND id = ?")
            .bind(collection)
            .bind(id)
            .execute(&self.pool)
            .await
            .map_err(AppError::from)?;
        self.notify(ChangeKind::Deleted, collection, id, None);
        Ok(())
    }

    pub async fn query(&self, query: &Query) -> AppResult<Vec<Document>> {
        let (sql, binds) = build_query_sql(query);
        let mut q = sqlx::query(&sql).bind(&query.collection);
        for value in &binds {
            q = bind_value(q, value);
        }
        let rows = q.fetch_all(&self.pool).await.map_err(AppError::from)?;
        rows.into_iter().map(row_to_document).collect()
    }

    /// Stage writes for an atomic commit.
    pub fn batch(&self) -> WriteBatch {
        WriteBatch { ops: Vec::new() }
    }

    /// Commit a staged batch in one transaction. Either every write lands or
    /// none do; watchers are notified only after the commit.
    pub async fn commit_batch(&self, batch: WriteBatch) -> AppResult<()> {
        let ops = batch.ops.clone();
        run_in_tx::<(), AppError, _>(&self.pool, move |conn: &mut SqliteConnection| {
            async move {
                for op in &ops {
                    apply_batch_op(conn, op).await?;
                }
                Ok(())
            }
            .boxed()
        })
        .await?;
        for op in batch.ops {
            match op {
                BatchOp::Set {
                    collection,
                    id,
                    data,
                } => self.notify(ChangeKind::Updated, &collection, &id, Some(data)),
                BatchOp::Delete { collection, id } => {
                    self.notify(ChangeKind::Deleted, &collection, &id, None)
                }
            }
        }
        Ok(())
    }

    /// Subscribe to changes of a single document.
    pub fn watch(&self, collection: &str, id: &str) -> Subscription {
        let key = watch_key(collection, id);
        let mut watchers = self.watchers.lock().expect("watchers lock poisoned");
        let tx = watchers
            .entry(key)
            .or_insert_with(|| broadcast::channel(WATCH_CHANNEL_CAPACITY).0);
        Subscription { rx: tx.subscribe() }
    }

    /// Number of documents with at least one registered subscription.
    /// Cancelled subscriptions are reaped on the next notification for
    /// their document, so this is an upper bound between writes.
    pub fn watch_count(&self) -> usize {
        self.watchers.lock().expect("watchers lock poisoned").len()
    }

    fn notify(&self, kind: ChangeKind, collection: &str, id: &str, data: Option<Value>) {
        let key = watch_key(collection, id);
        let mut watchers = self.watchers.lock().expect("watchers lock poisoned");
        if let Some(tx) = watchers.get(&key) {
            let change = DocChange {
                kind,
                collection: collection.to_string(),
                id: id.to_string(),
                data,
            };
            if tx.send(change).is_err() {
                // No live receivers left.
                watchers.remove(&key);
            }
        }
    }
}

fn watch_key(collection: &str, id: &str) -> String {
    format!("{collection}/{id}")
}

#[derive(Debug, Clone)]
enum BatchOp {
    Set {
        collection: String,
        id: String,
        data: Value,
    },
    Delete {
        collection: String,
        id: String,
    },
}

/// Staged multi-document write, committed atomically by `commit_batch`.
#[derive(Default)]
pub struct WriteBatch {
    ops: Vec<BatchOp>,
}

impl WriteBatch {
    pub fn set(&mut self, collection: &str, id: &str, data: Value) -> &mut Self {
        self.ops.push(BatchOp::Set {
            collection: collection.to_string(),
            id: id.to_string(),
            data,
        });
        self
    }

    pub fn delete(&mut self, collection: &str, id: &str) -> &mut Self {
        self.ops.push(BatchOp::Delete {
            collection: collection.to_string(),
            id: id.to_string(),
        });
        self
    }

    pub fn is_empty(&self) -> bool {
        self.ops.is_empty()
    }

    pub fn len(&self) -> usize {
        self.ops.len()
    }
}

async fn apply_batch_op(conn: &mut SqliteConnection, op: &BatchOp) -> AppResult<()> {
    match op {
        BatchOp::Set {
            collection,
            id,
            data,
        } => {
            sqlx::query(
                "INSERT INTO documents (collection, id, data, updated_at) VALUES (?, ?, ?, ?)
                 ON CONFLICT(collection, id) DO UPDATE SET data = excluded.data, updated_at = excluded.updated_at",
            )
            .bind(collection)
            .bind(id)
            .bind(data.to_string())
            .bind(now_ms())
            .execute(&mut *conn)
            .await
            .map_err(AppError::from)?;
        }
        BatchOp::Delete { collection, id } => {
            sqlx::query("DELETE FROM documents WHERE collection = ? AND id = ?")
                .bind(collection)
                .bind(id)
                .execute(&mut *conn)
                .await
                .map_err(AppError::from)?;
        }
    }
    Ok(())
}

async fn upsert(pool: &Pool<Sqlite>, collection: &str, id: &str, data: &Value) -> AppResult<()> {
    sqlx::query(
        "INSERT INTO documents (collection, id, data, updated_at) VALUES (?, ?, ?, ?)
         ON CONFLICT(collection, id) DO UPDATE SET data = excluded.data, updated_at = excluded.updated_at",
    )
    .bind(collection)
    .bind(id)
    .bind(data.to_string())
    .bind(now_ms())
    .execute(pool)
    .await
    .map_err(AppError::from)?;
    Ok(())
}

fn row_to_document(row: SqliteRow) -> AppResult<Document> {
    let id: String = row.try_get("id").map_err(AppError::from)?;
    let data = parse_data(&row)?;
    Ok(Document {
        id,
        data: Value::Object(data),
    })
}

fn parse_data(row: &SqliteRow) -> AppResult<Map<String, Value>> {
    let text: String = row.try_get("data").map_err(AppError::from)?;
    match serde_json::from_str::<Value>(&text).map_err(AppError::from)? {
        Value::Object(map) => Ok(map),
        other => Err(AppError::new(
            "STORE/DECODE",
            "Document payload is not a JSON object",
        )
        .with_context("found", other.to_string())),
    }
}

/// Assemble query text plus the bind values in positional order. The
/// collection itself is always the first bind; callers bind it before the
/// values returned here.
fn build_query_sql(query: &Query) -> (String, Vec<Value>) {
    let mut sql = String::from("SELECT id, data FROM documents WHERE collection = ?");
    let mut binds: Vec<Value> = Vec::new();

    for filter in &query.filters {
        match filter {
            Filter::Equals(field, value) => {
                sql.push_str(&format!(
                    " AND json_extract(data, '{}') = ?",
                    field.json_path()
                ));
                binds.push(value.clone());
            }
            Filter::Prefix(field, prefix) => {
                let path = field.json_path();
                sql.push_str(&format!(
                    " AND json_extract(data, '{path}') >= ? AND json_extract(data, '{path}') < ?"
                ));
                binds.push(Value::String(prefix.clone()));
                binds.push(Value::String(format!("{prefix}{PREFIX_SENTINEL}")));
            }
            Filter::IdIn(ids) => {
                let placeholders = vec!["?"; ids.len().max(1)].join(",");
                sql.push_str(&format!(" AND id IN ({placeholders})"));
                if ids.is_empty() {
                    // Empty membership matches nothing.
                    binds.push(Value::Null);
                } else {
                    binds.extend(ids.iter().cloned().map(Value::String));
                }
            }
        }
    }

    let order_path = query.order_by.json_path();
    if let Some(cursor) = &query.start_after {
        if cursor.key.is_null() {
            // The last record had no sort key. NULL keys sort first, and a
            // NULL comparison matches nothing, so resume on id alone:
            // everything with a real key, plus later NULL-key records.
            sql.push_str(&format!(
                " AND (json_extract(data, '{order_path}') IS NOT NULL OR id > ?)"
            ));
            binds.push(Value::String(cursor.id.clone()));
        } else {
            sql.push_str(&format!(
                " AND (json_extract(data, '{order_path}') > ? OR (json_extract(data, '{order_path}') = ? AND id > ?))"
            ));
            binds.push(cursor.key.clone());
            binds.push(cursor.key.clone());
            binds.push(Value::String(cursor.id.clone()));
        }
    }

    sql.push_str(&format!(
        " ORDER BY json_extract(data, '{order_path}') ASC, id ASC"
    ));

    if let Some(limit) = query.limit {
        sql.push_str(&format!(" LIMIT {limit}"));
    }

    (sql, binds)
}

fn bind_value<'q>(
    q: sqlx::query::Query<'q, Sqlite, sqlx::sqlite::SqliteArguments<'q>>,
    v: &Value,
) -> sqlx::query::Query<'q, Sqlite, sqlx::sqlite::SqliteArguments<'q>> {
    match v {
        Value::Null => q.bind(Option::<i64>::None),
        Value::Number(n) => {
            if let Some(i) = n.as_i64() {
                q.bind(i)
            } else if let Some(f) = n.as_f64() {
                q.bind(f)
            } else {
                q.bind(Option::<i64>::None)
            }
        }
        Value::Bool(b) => q.bind(*b as i64),
        Value::String(s) => q.bind(s.clone()),
        _ => q.bind(v.to_string()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn rooms_subcollection_path() {
        assert_eq!(
            rooms_collection("pull_lists", "L1"),
            "pull_lists/L1/rooms"
        );
    }

    #[test]
    fn prefix_filter_expands_to_half_open_range() {
        let mut query = Query::new("models", Field::NameLowercased);
        query
            .filters
            .push(Filter::Prefix(Field::NameLowercased, "cha".into()));
        let (sql, binds) = build_query_sql(&query);
        assert!(sql.contains(">= ?"));
        assert!(sql.contains("< ?"));
        assert_eq!(binds[0], json!("cha"));
        assert_eq!(binds[1], json!(format!("cha{PREFIX_SENTINEL}")));
    }

    #[test]
    fn cursor_adds_keyset_predicate_with_id_tiebreak() {
        let mut query = Query::new("models", Field::NameLowercased);
        query.start_after = Some(Cursor {
            key: json!("sofa"),
            id: "M9".into(),
        });
        query.limit = Some(20);
        let (sql, binds) = build_query_sql(&query);
        assert!(sql.contains("id > ?"));
        assert!(sql.ends_with("LIMIT 20"));
        assert_eq!(binds, vec![json!("sofa"), json!("sofa"), json!("M9")]);
    }

    #[test]
    fn null_cursor_key_falls_back_to_id_only_resumption() {
        let mut query = Query::new("models", Field::NameLowercased);
        query.start_after = Some(Cursor {
            key: Value::Null,
            id: "M5".into(),
        });
        let (sql, binds) = build_query_sql(&query);
        assert!(sql.contains("IS NOT NULL OR id > ?"));
        assert_eq!(binds, vec![json!("M5")]);
    }

    #[test]
    fn id_in_filter_uses_one_placeholder_per_id() {
        let mut query = Query::new("items", Field::CreatedDate);
        query
            .filters
            .push(Filter::IdIn(vec!["a".into(), "b".into(), "c".into()]));
        let (sql, binds) = build_query_sql(&query);
        assert!(sql.contains("id IN (?,?,?)"));
        assert_eq!(binds.len(), 3);
    }

    #[test]
    fn field_keys_match_wire_names() {
        assert_eq!(Field::NameLowercased.key(), "nameLowercased");
        assert_eq!(Field::ModelType.key(), "type");
        assert_eq!(Field::IsAvailable.key(), "isAvailable");
    }
}
