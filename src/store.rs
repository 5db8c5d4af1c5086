use std::cmp::Ordering;
use std::collections::{BTreeMap, HashMap};
use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex as SyncMutex, PoisonError};

use anyhow::{anyhow, bail, Context, Result};
use log::debug;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use tokio::sync::Mutex;

/// A row type stored in its own table.
pub trait Record: Serialize + DeserializeOwned + Send + Sync {
    const TABLE: &'static str;

    fn id(&self) -> Option<i64>;
    fn set_id(&mut self, id: i64);
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
struct Snapshot {
    next_id: i64,
    tables: BTreeMap<String, BTreeMap<i64, Value>>,
}

/// JSON-backed table store. Changes reach it only through `Session::commit`.
pub struct Store {
    data: Mutex<Snapshot>,
    path: Option<PathBuf>,
}

impl Store {
    pub fn open(path: &Path) -> Result<Arc<Store>> {
        let snapshot = if path.exists() {
            let data = fs::read_to_string(path)
                .with_context(|| format!("read store {}", path.display()))?;
            serde_json::from_str(&data)
                .with_context(|| format!("parse store {}", path.display()))?
        } else {
            Snapshot::default()
        };
        Ok(Arc::new(Store {
            data: Mutex::new(snapshot),
            path: Some(path.to_path_buf()),
        }))
    }

    pub fn in_memory() -> Arc<Store> {
        Arc::new(Store {
            data: Mutex::new(Snapshot::default()),
            path: None,
        })
    }

    pub fn begin(self: &Arc<Self>) -> Session {
        Session {
            store: self.clone(),
            pending: Vec::new(),
            loaded: SyncMutex::new(HashMap::new()),
            closed: false,
        }
    }

    async fn allocate_id(&self) -> i64 {
        let mut data = self.data.lock().await;
        data.next_id += 1;
        data.next_id
    }

    /// Copies out only the rows `keep` accepts.
    async fn matching(
        &self,
        table: &str,
        keep: impl Fn(i64, &Value) -> bool,
    ) -> BTreeMap<i64, Value> {
        let data = self.data.lock().await;
        data.tables
            .get(table)
            .map(|rows| {
                rows.iter()
                    .filter(|(id, row)| keep(**id, row))
                    .map(|(id, row)| (*id, row.clone()))
                    .collect()
            })
            .unwrap_or_default()
    }

    async fn apply(&self, changes: Vec<Change>) -> Result<()> {
        let mut data = self.data.lock().await;
        let mut next = data.clone();
        for change in changes {
            change.apply(&mut next.tables)?;
        }
        if let Some(path) = &self.path {
            let bytes = serde_json::to_vec_pretty(&next).context("serialize store")?;
            let path = path.clone();
            tokio::task::spawn_blocking(move || atomic_write(&path, &bytes))
                .await
                .context("store writer panicked")??;
        }
        *data = next;
        Ok(())
    }
}

fn atomic_write(path: &Path, data: &[u8]) -> Result<()> {
    let dir = match path.parent() {
        Some(dir) if !dir.as_os_str().is_empty() => dir,
        _ => Path::new("."),
    };
    fs::create_dir_all(dir).with_context(|| format!("create dir {}", dir.display()))?;
    let mut tmp = tempfile::NamedTempFile::new_in(dir)
        .with_context(|| format!("create temp file in {}", dir.display()))?;
    tmp.write_all(data).context("write temp file")?;
    tmp.flush().context("flush temp file")?;
    tmp.as_file_mut().sync_all().context("sync temp file")?;
    tmp.persist(path)
        .map_err(|e| anyhow!("persist temp file: {}", e))?;
    Ok(())
}

/// A pending write. Rows the session has read are written back as `Patch`,
/// which touches only the fields the session changed.
#[derive(Debug, Clone)]
enum Change {
    Upsert {
        table: &'static str,
        id: i64,
        row: Value,
    },
    Patch {
        table: &'static str,
        id: i64,
        fields: Map<String, Value>,
    },
    Delete {
        table: &'static str,
        id: i64,
    },
}

impl Change {
    fn table(&self) -> &'static str {
        match self {
            Change::Upsert { table, .. }
            | Change::Patch { table, .. }
            | Change::Delete { table, .. } => table,
        }
    }

    fn id(&self) -> i64 {
        match self {
            Change::Upsert { id, .. } | Change::Patch { id, .. } | Change::Delete { id, .. } => {
                *id
            }
        }
    }

    /// Returns false when a patch finds no row to update.
    fn apply_to_rows(&self, rows: &mut BTreeMap<i64, Value>) -> bool {
        match self {
            Change::Upsert { id, row, .. } => {
                rows.insert(*id, row.clone());
            }
            Change::Patch { id, fields, .. } => match rows.get_mut(id) {
                Some(Value::Object(row)) => {
                    for (name, value) in fields {
                        row.insert(name.clone(), value.clone());
                    }
                }
                _ => return false,
            },
            Change::Delete { id, .. } => {
                rows.remove(id);
            }
        }
        true
    }

    fn apply(self, tables: &mut BTreeMap<String, BTreeMap<i64, Value>>) -> Result<()> {
        let rows = tables.entry(self.table().to_string()).or_default();
        if !self.apply_to_rows(rows) {
            bail!(
                "{} row {} was deleted by another session",
                self.table(),
                self.id()
            );
        }
        Ok(())
    }
}

/// Top-level fields of `row` that differ from `base`, or `None` when either
/// side is not an object.
fn changed_fields(base: &Value, row: &Value) -> Option<Map<String, Value>> {
    let (Value::Object(base), Value::Object(row)) = (base, row) else {
        return None;
    };
    Some(
        row.iter()
            .filter(|(name, value)| base.get(*name) != Some(*value))
            .map(|(name, value)| (name.clone(), value.clone()))
            .collect(),
    )
}

/// Row predicate over top-level JSON fields.
#[derive(Debug, Clone, PartialEq)]
pub enum Filter {
    Eq(String, Value),
    In(String, Vec<Value>),
    And(Vec<Filter>),
    Or(Vec<Filter>),
}

impl Filter {
    pub fn eq(field: &str, value: impl Into<Value>) -> Filter {
        Filter::Eq(field.to_string(), value.into())
    }

    pub fn is_in<V: Into<Value>>(field: &str, values: impl IntoIterator<Item = V>) -> Filter {
        Filter::In(
            field.to_string(),
            values.into_iter().map(Into::into).collect(),
        )
    }

    pub fn and(self, other: Filter) -> Filter {
        match self {
            Filter::And(mut filters) => {
                filters.push(other);
                Filter::And(filters)
            }
            filter => Filter::And(vec![filter, other]),
        }
    }

    pub fn or(self, other: Filter) -> Filter {
        match self {
            Filter::Or(mut filters) => {
                filters.push(other);
                Filter::Or(filters)
            }
            filter => Filter::Or(vec![filter, other]),
        }
    }

    pub fn matches(&self, row: &Value) -> bool {
        let field = |name: &str| row.get(name).unwrap_or(&Value::Null);
        match self {
            Filter::Eq(name, value) => field(name) == value,
            Filter::In(name, values) => values.contains(field(name)),
            Filter::And(filters) => filters.iter().all(|f| f.matches(row)),
            Filter::Or(filters) => filters.iter().any(|f| f.matches(row)),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Order {
    Asc,
    Desc,
}

#[derive(Debug, Clone, Default)]
pub struct Query {
    filter: Option<Filter>,
    order: Vec<(String, Order)>,
    limit: Option<usize>,
}

impl Query {
    pub fn all() -> Query {
        Query::default()
    }

    pub fn filter(filter: Filter) -> Query {
        Query {
            filter: Some(filter),
            ..Query::default()
        }
    }

    pub fn order_by(mut self, field: &str, order: Order) -> Query {
        self.order.push((field.to_string(), order));
        self
    }

    pub fn limit(mut self, limit: usize) -> Query {
        self.limit = Some(limit);
        self
    }

    fn accepts(&self, row: &Value) -> bool {
        self.filter.as_ref().map_or(true, |f| f.matches(row))
    }

    fn run(&self, rows: BTreeMap<i64, Value>) -> Vec<Value> {
        let mut matched: Vec<Value> = rows
            .into_values()
            .filter(|row| self.accepts(row))
            .collect();
        if !self.order.is_empty() {
            matched.sort_by(|a, b| {
                for (field, order) in &self.order {
                    let left = a.get(field).unwrap_or(&Value::Null);
                    let right = b.get(field).unwrap_or(&Value::Null);
                    let ordering = match order {
                        Order::Asc => cmp_values(left, right),
                        Order::Desc => cmp_values(right, left),
                    };
                    if ordering != Ordering::Equal {
                        return ordering;
                    }
                }
                Ordering::Equal
            });
        }
        if let Some(limit) = self.limit {
            matched.truncate(limit);
        }
        matched
    }
}

fn cmp_values(a: &Value, b: &Value) -> Ordering {
    match (a, b) {
        (Value::Null, Value::Null) => Ordering::Equal,
        (Value::Null, _) => Ordering::Less,
        (_, Value::Null) => Ordering::Greater,
        (Value::Number(x), Value::Number(y)) => match (x.as_i64(), y.as_i64()) {
            (Some(x), Some(y)) => x.cmp(&y),
            _ => {
                let x = x.as_f64().unwrap_or(0.0);
                let y = y.as_f64().unwrap_or(0.0);
                x.partial_cmp(&y).unwrap_or(Ordering::Equal)
            }
        },
        (Value::String(x), Value::String(y)) => x.cmp(y),
        (Value::Bool(x), Value::Bool(y)) => x.cmp(y),
        _ => a.to_string().cmp(&b.to_string()),
    }
}

/// Unit of work over a `Store`. Reads see this session's own uncommitted
/// writes; dropping the session discards them.
///
/// Rows read through the session are remembered, so writing one back only
/// commits the fields that changed. Two sessions editing different fields of
/// the same row both keep their edits.
pub struct Session {
    store: Arc<Store>,
    pending: Vec<Change>,
    loaded: SyncMutex<HashMap<(&'static str, i64), Value>>,
    closed: bool,
}

impl Session {
    fn check_open(&self) -> Result<()> {
        if self.closed {
            bail!("session is closed");
        }
        Ok(())
    }

    pub fn is_closed(&self) -> bool {
        self.closed
    }

    pub fn has_pending(&self) -> bool {
        !self.pending.is_empty()
    }

    /// Inserts or updates `record`, assigning its id when it has none.
    pub async fn add<R: Record>(&mut self, record: &mut R) -> Result<i64> {
        self.check_open()?;
        let id = match record.id() {
            Some(id) => id,
            None => {
                let id = self.store.allocate_id().await;
                record.set_id(id);
                id
            }
        };
        let row = serde_json::to_value(&*record)
            .with_context(|| format!("serialize {} row", R::TABLE))?;
        let mut loaded = self.loaded.lock().unwrap_or_else(PoisonError::into_inner);
        let fields = loaded
            .get(&(R::TABLE, id))
            .and_then(|base| changed_fields(base, &row));
        let change = match fields {
            Some(fields) if fields.is_empty() => return Ok(id),
            Some(fields) => Change::Patch {
                table: R::TABLE,
                id,
                fields,
            },
            None => Change::Upsert {
                table: R::TABLE,
                id,
                row: row.clone(),
            },
        };
        loaded.insert((R::TABLE, id), row);
        drop(loaded);
        self.pending.push(change);
        Ok(id)
    }

    pub fn delete<R: Record>(&mut self, record: &R) -> Result<()> {
        let id = record
            .id()
            .ok_or_else(|| anyhow!("cannot delete unsaved {} row", R::TABLE))?;
        self.delete_by_id::<R>(id)
    }

    pub fn delete_by_id<R: Record>(&mut self, id: i64) -> Result<()> {
        self.check_open()?;
        self.loaded
            .get_mut()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(&(R::TABLE, id));
        self.pending.push(Change::Delete { table: R::TABLE, id });
        Ok(())
    }

    pub async fn delete_where<R: Record>(&mut self, filter: Filter) -> Result<usize> {
        self.check_open()?;
        let ids: Vec<i64> = self
            .rows(R::TABLE, |_, row| filter.matches(row))
            .await
            .into_keys()
            .collect();
        for id in &ids {
            self.delete_by_id::<R>(*id)?;
        }
        Ok(ids.len())
    }

    /// This session's view of the rows of `table` that satisfy `keep`.
    async fn rows(
        &self,
        table: &'static str,
        keep: impl Fn(i64, &Value) -> bool,
    ) -> BTreeMap<i64, Value> {
        let changes: Vec<&Change> = self.pending.iter().filter(|c| c.table() == table).collect();
        let mut rows = self
            .store
            .matching(table, |id, row| {
                keep(id, row) || changes.iter().any(|change| change.id() == id)
            })
            .await;
        for change in &changes {
            change.apply_to_rows(&mut rows);
        }
        rows.retain(|id, row| keep(*id, row));
        rows
    }

    fn remember(&self, table: &'static str, rows: &BTreeMap<i64, Value>) {
        let mut loaded = self.loaded.lock().unwrap_or_else(PoisonError::into_inner);
        for (id, row) in rows {
            loaded.entry((table, *id)).or_insert_with(|| row.clone());
        }
    }

    pub async fn get<R: Record>(&self, id: i64) -> Result<Option<R>> {
        self.check_open()?;
        let mut rows = self.rows(R::TABLE, |row_id, _| row_id == id).await;
        self.remember(R::TABLE, &rows);
        match rows.remove(&id) {
            Some(row) => Ok(Some(decode(row)?)),
            None => Ok(None),
        }
    }

    pub async fn select<R: Record>(&self, query: &Query) -> Result<Vec<R>> {
        self.check_open()?;
        let rows = self.rows(R::TABLE, |_, row| query.accepts(row)).await;
        self.remember(R::TABLE, &rows);
        query.run(rows).into_iter().map(decode).collect()
    }

    pub async fn first<R: Record>(&self, query: Query) -> Result<Option<R>> {
        let mut rows = self.select::<R>(&query.limit(1)).await?;
        Ok(rows.pop())
    }

    pub async fn count<R: Record>(&self, filter: Filter) -> Result<usize> {
        self.check_open()?;
        let rows = self.rows(R::TABLE, |_, row| filter.matches(row)).await;
        Ok(rows.len())
    }

    pub async fn commit(&mut self) -> Result<()> {
        self.check_open()?;
        if self.pending.is_empty() {
            return Ok(());
        }
        let changes = std::mem::take(&mut self.pending);
        debug!("committing {} change(s)", changes.len());
        self.store.apply(changes).await.context("commit session")
    }

    pub fn rollback(&mut self) {
        if !self.pending.is_empty() {
            debug!("rolling back {} change(s)", self.pending.len());
        }
        self.pending.clear();
        self.loaded
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clear();
    }

    /// Discards uncommitted changes and refuses further use.
    pub fn close(&mut self) {
        self.rollback();
        self.closed = true;
    }
}

fn decode<R: Record>(row: Value) -> Result<R> {
    serde_json::from_value(row).with_context(|| format!("decode {} row", R::TABLE))
}
