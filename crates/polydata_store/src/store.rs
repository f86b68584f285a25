use std::collections::{BTreeMap, BTreeSet};
use std::path::Path;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use sea_orm::sea_query;
use sea_orm::sea_query::{
    Alias, Expr, Func, LikeExpr, OnConflict, Order, Query, QueryStatementWriter,
    SqliteQueryBuilder, Value as SeaValue,
};
use sea_orm::{
    ConnectOptions, ConnectionTrait, Database, DatabaseConnection, QueryResult, Statement,
    TransactionTrait,
};
use sea_orm_migration::MigratorTrait;

use crate::db::{PolyTable, RowKind};
use crate::migration::Migrator;
use crate::StorageConfig;
use polydata_core::{Poly, PolyError, PolyList, PolyQuery, PolyResult, TAGS_KEY};

/// Logical id of the per-container tag aggregate row (`_type = polymap`).
const TAGS_AGGREGATE_ID: &str = "tags";
/// Logical id of the per-container metadata row (`_type = metadata`).
const METADATA_ID: &str = "metadata";

/// Tag-indexed document storage over a single sqlite file.
///
/// One instance owns the connection pool for one physical database. All
/// logical entities share the `poly` table, partitioned by the `_type`
/// discriminator; writes that touch more than one partition (document plus
/// tag aggregate plus index entries) run inside a single transaction, so the
/// denormalized state never drifts from the primary rows.
pub struct PolyStorage {
    conn: DatabaseConnection,
}

impl PolyStorage {
    /// Connect to the configured database, applying pool knobs, and bring the
    /// schema up to date.
    pub async fn connect(config: &StorageConfig, base_dir: &Path) -> PolyResult<Self> {
        let path = config.sqlite_path(base_dir)?;
        let url = format!("sqlite://{}?mode=rwc", path.display());
        let mut options = ConnectOptions::new(url);
        if let Some(pool) = &config.pool {
            if let Some(max) = pool.max_connections {
                options.max_connections(max);
            }
            if let Some(min) = pool.min_connections {
                options.min_connections(min);
            }
            if let Some(timeout_ms) = pool.connect_timeout_ms {
                options.connect_timeout(Duration::from_millis(timeout_ms));
            }
            if let Some(timeout_ms) = pool.acquire_timeout_ms {
                options.acquire_timeout(Duration::from_millis(timeout_ms));
            }
            if let Some(timeout_ms) = pool.idle_timeout_ms {
                options.idle_timeout(Duration::from_millis(timeout_ms));
            }
        }
        let conn = Database::connect(options).await.map_err(PolyError::from)?;
        let store = Self { conn };
        Migrator::up(&store.conn, None)
            .await
            .map_err(PolyError::from)?;
        Ok(store)
    }

    pub async fn connect_sqlite(path: &Path) -> PolyResult<Self> {
        // The base dir is the file's parent, so only the file name goes into
        // the config; a path with directory components must not be joined
        // onto its own parent again.
        let base = path.parent().unwrap_or_else(|| Path::new("."));
        let name = path
            .file_name()
            .map(|name| name.to_string_lossy().into_owned())
            .ok_or_else(|| PolyError::invalid(format!("not a database file: {}", path.display())))?;
        let config = StorageConfig::default_sqlite(name);
        Self::connect(&config, base).await
    }

    /// Release the connection pool.
    pub async fn close(self) -> PolyResult<()> {
        self.conn.close().await.map_err(PolyError::from)
    }

    // Raw record operations against one (container, _type, _id) partition.

    pub async fn exists(&self, kind: RowKind, container: &str, id: &str) -> PolyResult<bool> {
        exists_in(&self.conn, kind, container, id).await
    }

    pub async fn fetch_raw(
        &self,
        kind: RowKind,
        container: &str,
        id: &str,
    ) -> PolyResult<Option<Poly>> {
        fetch_raw_in(&self.conn, kind, container, id).await
    }

    /// Atomic insert-or-update keyed by the logical `(container, _type, _id)`
    /// tuple. A concurrent writer racing on the same key resolves to exactly
    /// one physical row; no separate existence probe is made.
    pub async fn upsert_raw(
        &self,
        kind: RowKind,
        container: &str,
        id: &str,
        poly: Poly,
    ) -> PolyResult<Poly> {
        upsert_raw_in(&self.conn, kind, container, id, poly).await
    }

    /// Delete one logical row; true iff a row was actually deleted.
    pub async fn remove_raw(&self, kind: RowKind, container: &str, id: &str) -> PolyResult<bool> {
        remove_raw_in(&self.conn, kind, container, id).await
    }

    /// Number of rows in one (container, _type) partition.
    pub async fn count_raw(&self, kind: RowKind, container: &str) -> PolyResult<u64> {
        count_in(&self.conn, kind, container).await
    }

    // Document operations.

    /// Persist a document and maintain the tag aggregate and secondary index
    /// in the same transaction. Re-persisting an existing id is
    /// last-write-wins: counts are incremented only for newly added tags,
    /// decremented for tags dropped by the update, and stale index entries
    /// for dropped tags are deleted.
    pub async fn persist(&self, container: &str, poly: Poly) -> PolyResult<Poly> {
        let id = require_id(&poly)?;
        let tx = self.conn.begin().await?;

        let previous = fetch_raw_in(&tx, RowKind::Data, container, &id).await?;
        let poly = upsert_raw_in(&tx, RowKind::Data, container, &id, poly).await?;

        let old_tags: BTreeSet<String> = previous
            .as_ref()
            .map(Poly::tags)
            .unwrap_or_default()
            .into_iter()
            .collect();
        let new_tags: BTreeSet<String> = poly.tags().into_iter().collect();

        let added: BTreeSet<&str> = new_tags.difference(&old_tags).map(String::as_str).collect();
        let removed: BTreeSet<&str> = old_tags.difference(&new_tags).map(String::as_str).collect();

        if !added.is_empty() || !removed.is_empty() {
            bump_tag_counts(&tx, container, &added, &removed).await?;
        }
        for tag in &new_tags {
            let reference = Poly::new(id.clone());
            persist_index_in(&tx, container, &tag_dimensions(tag), reference).await?;
        }
        for tag in &removed {
            remove_index_in(&tx, container, &tag_dimensions(tag), &id).await?;
        }

        tx.commit().await?;
        Ok(poly)
    }

    pub async fn fetch_by_id(&self, container: &str, id: &str) -> PolyResult<Option<Poly>> {
        fetch_raw_in(&self.conn, RowKind::Data, container, id).await
    }

    /// Batch fetch; ids that do not resolve are absent from the result map.
    pub async fn fetch_poly_batch(
        &self,
        container: &str,
        ids: &[String],
    ) -> PolyResult<BTreeMap<String, Poly>> {
        let mut result = BTreeMap::new();
        for id in ids {
            if let Some(poly) = self.fetch_by_id(container, id).await? {
                result.insert(id.clone(), poly);
            }
        }
        Ok(result)
    }

    /// Remove a document and repair the tag aggregate and index entries for
    /// its tags, all in one transaction. False when no such document exists.
    pub async fn remove(&self, container: &str, id: &str) -> PolyResult<bool> {
        let tx = self.conn.begin().await?;
        let Some(existing) = fetch_raw_in(&tx, RowKind::Data, container, id).await? else {
            return Ok(false);
        };
        remove_raw_in(&tx, RowKind::Data, container, id).await?;

        let tags: BTreeSet<String> = existing.tags().into_iter().collect();
        if !tags.is_empty() {
            let removed: BTreeSet<&str> = tags.iter().map(String::as_str).collect();
            bump_tag_counts(&tx, container, &BTreeSet::new(), &removed).await?;
            for tag in &removed {
                remove_index_in(&tx, container, &tag_dimensions(tag), id).await?;
            }
        }
        tx.commit().await?;
        Ok(true)
    }

    /// Paginated listing of the `data` partition, most recently updated
    /// first, or engine-randomized when `random_order` is set. A page past
    /// the end yields an empty list. `count` carries the total row count
    /// ignoring pagination.
    pub async fn query(&self, container: &str, query: &PolyQuery) -> PolyResult<PolyList> {
        let count = count_in(&self.conn, RowKind::Data, container).await?;
        let mut select = Query::select()
            .column(PolyTable::Data)
            .from(PolyTable::Table)
            .and_where(Expr::col(PolyTable::Container).eq(container))
            .and_where(Expr::col(PolyTable::Type).eq(RowKind::Data.as_str()))
            .to_owned();
        if query.random_order {
            select.order_by_expr(Func::random().into(), Order::Asc);
        } else {
            select
                .order_by(PolyTable::UpdateDate, Order::Desc)
                .order_by(PolyTable::Id, Order::Desc);
        }
        select
            .limit(query.effective_item_per_page())
            .offset(query.offset());
        let rows = query_all(&self.conn, &select).await?;
        Ok(PolyList::new(rows_to_polys(rows)?, count))
    }

    pub async fn fetch_poly_count(&self, container: &str) -> PolyResult<u64> {
        count_in(&self.conn, RowKind::Data, container).await
    }

    // Tag aggregation.

    /// The per-container tag aggregate: a poly mapping tag value to the
    /// number of documents carrying it. An empty mapping when no tagged
    /// document was ever persisted; absence is never an error.
    pub async fn fetch_tags(&self, container: &str) -> PolyResult<Poly> {
        let aggregate =
            fetch_raw_in(&self.conn, RowKind::Polymap, container, TAGS_AGGREGATE_ID).await?;
        Ok(aggregate.unwrap_or_else(|| Poly::new(TAGS_AGGREGATE_ID)))
    }

    // Secondary index.

    /// Store an index entry for `reference` under the composite dimension
    /// key. One entry exists per (key, referenced id) pair, so several
    /// documents may share one tag value.
    pub async fn persist_index(
        &self,
        container: &str,
        dimensions: &BTreeMap<String, String>,
        reference: Poly,
    ) -> PolyResult<Poly> {
        persist_index_in(&self.conn, container, dimensions, reference).await
    }

    pub async fn remove_index(
        &self,
        container: &str,
        dimensions: &BTreeMap<String, String>,
        document_id: &str,
    ) -> PolyResult<bool> {
        remove_index_in(&self.conn, container, dimensions, document_id).await
    }

    /// Resolve a tag filter through the secondary index: fetch the index
    /// entries for the tag's composite key (most recently written first,
    /// paginated like `query`), then resolve each referenced document by
    /// primary id. References that no longer resolve are skipped with a
    /// warning rather than repaired. `count` is the total number of index
    /// entries for the key.
    pub async fn query_index(&self, container: &str, query: &PolyQuery) -> PolyResult<PolyList> {
        let tag = query
            .tag
            .as_deref()
            .ok_or_else(|| PolyError::invalid("index query requires a tag"))?;
        let dimensions = tag_dimensions(tag);
        let prefix = format!("{}/", escape_key_segment(&index_key(&dimensions)));
        let pattern = format!("{}%", escape_like(&prefix));

        let count_select = Query::select()
            .expr_as(
                Func::count(Expr::col((PolyTable::Table, PolyTable::Id))),
                Alias::new("item_count"),
            )
            .from(PolyTable::Table)
            .and_where(Expr::col(PolyTable::Container).eq(container))
            .and_where(Expr::col(PolyTable::Type).eq(RowKind::PolyIndex.as_str()))
            .and_where(
                Expr::col(PolyTable::LogicalId).like(LikeExpr::new(pattern.clone()).escape('\\')),
            )
            .to_owned();
        let count = read_count(query_one(&self.conn, &count_select).await?)?;

        let select = Query::select()
            .column(PolyTable::Data)
            .from(PolyTable::Table)
            .and_where(Expr::col(PolyTable::Container).eq(container))
            .and_where(Expr::col(PolyTable::Type).eq(RowKind::PolyIndex.as_str()))
            .and_where(Expr::col(PolyTable::LogicalId).like(LikeExpr::new(pattern).escape('\\')))
            .order_by(PolyTable::UpdateDate, Order::Desc)
            .order_by(PolyTable::Id, Order::Desc)
            .limit(query.effective_item_per_page())
            .offset(query.offset())
            .to_owned();
        let entries = rows_to_polys(query_all(&self.conn, &select).await?)?;

        let mut list = Vec::with_capacity(entries.len());
        for entry in entries {
            let document_id = require_id(&entry)?;
            match self.fetch_by_id(container, &document_id).await? {
                Some(poly) => list.push(poly),
                None => {
                    log::warn!(
                        "stale index entry in {container}: tag {tag} references missing {document_id}"
                    );
                }
            }
        }
        Ok(PolyList::new(list, count))
    }

    // Metadata.

    pub async fn persist_metadata(&self, container: &str, poly: Poly) -> PolyResult<Poly> {
        upsert_raw_in(&self.conn, RowKind::Metadata, container, METADATA_ID, poly).await
    }

    pub async fn fetch_metadata(&self, container: &str) -> PolyResult<Option<Poly>> {
        fetch_raw_in(&self.conn, RowKind::Metadata, container, METADATA_ID).await
    }
}

/// Composite index key: dimension names sorted lexicographically, `name:value`
/// pairs concatenated with no separator between pairs.
pub fn index_key(dimensions: &BTreeMap<String, String>) -> String {
    let mut key = String::new();
    for (name, value) in dimensions {
        key.push_str(name);
        key.push(':');
        key.push_str(value);
    }
    key
}

fn tag_dimensions(tag: &str) -> BTreeMap<String, String> {
    BTreeMap::from([(TAGS_KEY.to_string(), tag.to_string())])
}

fn require_id(poly: &Poly) -> PolyResult<String> {
    poly.id()
        .map(str::to_string)
        .ok_or_else(|| PolyError::invalid("poly is missing _id"))
}

fn now_millis() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|elapsed| elapsed.as_millis() as i64)
        .unwrap_or(0)
}

/// Escape the `/` separator inside one segment of an index-entry id, so a
/// slash in a tag value or a document id can never shift the boundary between
/// the composite key and the referenced id.
fn escape_key_segment(value: &str) -> String {
    let mut escaped = String::with_capacity(value.len());
    for ch in value.chars() {
        if matches!(ch, '\\' | '/') {
            escaped.push('\\');
        }
        escaped.push(ch);
    }
    escaped
}

fn escape_like(value: &str) -> String {
    let mut escaped = String::with_capacity(value.len());
    for ch in value.chars() {
        if matches!(ch, '\\' | '%' | '_') {
            escaped.push('\\');
        }
        escaped.push(ch);
    }
    escaped
}

async fn exists_in<C: ConnectionTrait>(
    conn: &C,
    kind: RowKind,
    container: &str,
    id: &str,
) -> PolyResult<bool> {
    let select = Query::select()
        .expr(Expr::val(1))
        .from(PolyTable::Table)
        .and_where(Expr::col(PolyTable::Container).eq(container))
        .and_where(Expr::col(PolyTable::Type).eq(kind.as_str()))
        .and_where(Expr::col(PolyTable::LogicalId).eq(id))
        .limit(1)
        .to_owned();
    Ok(query_one(conn, &select).await?.is_some())
}

async fn fetch_raw_in<C: ConnectionTrait>(
    conn: &C,
    kind: RowKind,
    container: &str,
    id: &str,
) -> PolyResult<Option<Poly>> {
    let select = Query::select()
        .column(PolyTable::Data)
        .from(PolyTable::Table)
        .and_where(Expr::col(PolyTable::Container).eq(container))
        .and_where(Expr::col(PolyTable::Type).eq(kind.as_str()))
        .and_where(Expr::col(PolyTable::LogicalId).eq(id))
        .limit(1)
        .to_owned();
    let row = query_one(conn, &select).await?;
    row.map(|row| {
        let raw: String = row.try_get("", &col_name(PolyTable::Data))?;
        Poly::from_json_str(&raw)
    })
    .transpose()
}

async fn upsert_raw_in<C: ConnectionTrait>(
    conn: &C,
    kind: RowKind,
    container: &str,
    id: &str,
    poly: Poly,
) -> PolyResult<Poly> {
    let raw = poly.to_json_string()?;
    let insert = Query::insert()
        .into_table(PolyTable::Table)
        .columns([
            PolyTable::Container,
            PolyTable::Type,
            PolyTable::LogicalId,
            PolyTable::Data,
            PolyTable::UpdateDate,
        ])
        .values_panic([
            SeaValue::from(container).into(),
            SeaValue::from(kind.as_str()).into(),
            SeaValue::from(id).into(),
            SeaValue::from(raw).into(),
            SeaValue::from(now_millis()).into(),
        ])
        .on_conflict(
            OnConflict::columns([
                PolyTable::Container,
                PolyTable::Type,
                PolyTable::LogicalId,
            ])
            .update_columns([PolyTable::Data, PolyTable::UpdateDate])
            .to_owned(),
        )
        .to_owned();
    exec(conn, &insert).await?;
    Ok(poly)
}

async fn remove_raw_in<C: ConnectionTrait>(
    conn: &C,
    kind: RowKind,
    container: &str,
    id: &str,
) -> PolyResult<bool> {
    let delete = Query::delete()
        .from_table(PolyTable::Table)
        .and_where(Expr::col(PolyTable::Container).eq(container))
        .and_where(Expr::col(PolyTable::Type).eq(kind.as_str()))
        .and_where(Expr::col(PolyTable::LogicalId).eq(id))
        .to_owned();
    Ok(exec(conn, &delete).await? != 0)
}

async fn count_in<C: ConnectionTrait>(
    conn: &C,
    kind: RowKind,
    container: &str,
) -> PolyResult<u64> {
    let select = Query::select()
        .expr_as(
            Func::count(Expr::col((PolyTable::Table, PolyTable::Id))),
            Alias::new("item_count"),
        )
        .from(PolyTable::Table)
        .and_where(Expr::col(PolyTable::Container).eq(container))
        .and_where(Expr::col(PolyTable::Type).eq(kind.as_str()))
        .to_owned();
    read_count(query_one(conn, &select).await?)
}

/// Apply tag additions and removals to the container's aggregate row. A tag
/// dropping to zero is deleted from the mapping; a decrement for a tag the
/// aggregate does not know is logged and ignored.
async fn bump_tag_counts<C: ConnectionTrait>(
    conn: &C,
    container: &str,
    added: &BTreeSet<&str>,
    removed: &BTreeSet<&str>,
) -> PolyResult<()> {
    let mut counts = fetch_raw_in(conn, RowKind::Polymap, container, TAGS_AGGREGATE_ID)
        .await?
        .unwrap_or_else(|| Poly::new(TAGS_AGGREGATE_ID));
    for tag in added {
        let current = counts.get(tag).and_then(serde_json::Value::as_i64);
        if current.is_none() && counts.contains(tag) {
            log::warn!("tag aggregate in {container} has a non-numeric count for {tag}");
        }
        counts.put(tag.to_string(), current.unwrap_or(0) + 1);
    }
    for tag in removed {
        match counts.get(tag).and_then(serde_json::Value::as_i64) {
            Some(current) if current > 1 => {
                counts.put(tag.to_string(), current - 1);
            }
            Some(_) => {
                counts.remove(tag);
            }
            None if counts.contains(tag) => {
                log::warn!("tag aggregate in {container} has a non-numeric count for {tag}");
                counts.remove(tag);
            }
            None => {
                log::warn!("tag aggregate in {container} has no count for removed tag {tag}");
            }
        }
    }
    upsert_raw_in(conn, RowKind::Polymap, container, TAGS_AGGREGATE_ID, counts).await?;
    Ok(())
}

async fn persist_index_in<C: ConnectionTrait>(
    conn: &C,
    container: &str,
    dimensions: &BTreeMap<String, String>,
    reference: Poly,
) -> PolyResult<Poly> {
    let document_id = require_id(&reference)?;
    let entry_id = index_entry_id(dimensions, &document_id);
    upsert_raw_in(conn, RowKind::PolyIndex, container, &entry_id, reference).await
}

async fn remove_index_in<C: ConnectionTrait>(
    conn: &C,
    container: &str,
    dimensions: &BTreeMap<String, String>,
    document_id: &str,
) -> PolyResult<bool> {
    let entry_id = index_entry_id(dimensions, document_id);
    remove_raw_in(conn, RowKind::PolyIndex, container, &entry_id).await
}

fn index_entry_id(dimensions: &BTreeMap<String, String>, document_id: &str) -> String {
    format!(
        "{}/{}",
        escape_key_segment(&index_key(dimensions)),
        escape_key_segment(document_id)
    )
}

fn rows_to_polys(rows: Vec<QueryResult>) -> PolyResult<Vec<Poly>> {
    rows.into_iter()
        .map(|row| {
            let raw: String = row.try_get("", &col_name(PolyTable::Data))?;
            Poly::from_json_str(&raw)
        })
        .collect()
}

fn read_count(row: Option<QueryResult>) -> PolyResult<u64> {
    let Some(row) = row else {
        return Ok(0);
    };
    let count: i64 = row.try_get("", "item_count")?;
    Ok(count.max(0) as u64)
}

fn col_name(column: impl sea_query::Iden) -> String {
    column.to_string()
}

fn build_stmt<S: QueryStatementWriter>(stmt: &S) -> (String, sea_query::Values) {
    stmt.build(SqliteQueryBuilder)
}

async fn exec<C, S>(conn: &C, stmt: &S) -> PolyResult<u64>
where
    C: ConnectionTrait,
    S: QueryStatementWriter,
{
    let backend = conn.get_database_backend();
    let (sql, values) = build_stmt(stmt);
    let result = conn
        .execute(Statement::from_sql_and_values(backend, sql, values))
        .await?;
    Ok(result.rows_affected())
}

async fn query_all<C, S>(conn: &C, stmt: &S) -> PolyResult<Vec<QueryResult>>
where
    C: ConnectionTrait,
    S: QueryStatementWriter,
{
    let backend = conn.get_database_backend();
    let (sql, values) = build_stmt(stmt);
    let rows = conn
        .query_all(Statement::from_sql_and_values(backend, sql, values))
        .await?;
    Ok(rows)
}

async fn query_one<C, S>(conn: &C, stmt: &S) -> PolyResult<Option<QueryResult>>
where
    C: ConnectionTrait,
    S: QueryStatementWriter,
{
    let backend = conn.get_database_backend();
    let (sql, values) = build_stmt(stmt);
    let row = conn
        .query_one(Statement::from_sql_and_values(backend, sql, values))
        .await?;
    Ok(row)
}
