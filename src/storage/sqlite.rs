//! SQLite graph database client

use super::traits::{
    validate_identifier, AuthToken, GraphClient, StoreError, StoreResult, StoreSummary,
};
use crate::graph::{Attributes, GuacNode, Graph, NodeRef, PropertyValue};
use rusqlite::{params, Connection, OptionalExtension, Transaction};
use std::collections::{BTreeMap, BTreeSet};
use std::path::Path;
use std::sync::Mutex;
use tracing::{debug, info};

/// Address that selects a private in-memory database.
pub const MEMORY_ADDRESS: &str = ":memory:";

/// Prefix of the per-label attribute indices, `idx_node__<label>__<attribute>`.
const INDEX_PREFIX: &str = "idx_node__";

/// Graph database in a single SQLite file.
///
/// Nodes are rows with a label and a JSON attribute map; edges join two
/// node rows. Everything is scoped by the realm of the token used to
/// connect, so several realms can share one file.
///
/// Node identity comes from the indices: a stored node matches an
/// incoming node with the same label when an indexed attribute has the
/// same value and no other indexed attribute present on both differs.
/// Labels without indices are never deduplicated.
pub struct SqliteGraphClient {
    conn: Mutex<Connection>,
    realm: String,
    /// label -> indexed attributes
    indexed: Mutex<BTreeMap<String, BTreeSet<String>>>,
}

impl SqliteGraphClient {
    fn init_schema(conn: &Connection) -> StoreResult<()> {
        conn.execute_batch(
            r#"
            CREATE TABLE IF NOT EXISTS nodes (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                realm TEXT NOT NULL,
                label TEXT NOT NULL,
                attributes_json TEXT NOT NULL,
                created_at TEXT NOT NULL,
                updated_at TEXT NOT NULL
            );

            CREATE INDEX IF NOT EXISTS idx_nodes_label
                ON nodes(realm, label);

            CREATE TABLE IF NOT EXISTS edges (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                realm TEXT NOT NULL,
                label TEXT NOT NULL,
                source_id INTEGER NOT NULL,
                target_id INTEGER NOT NULL,
                attributes_json TEXT NOT NULL,
                created_at TEXT NOT NULL,
                UNIQUE (realm, label, source_id, target_id),
                FOREIGN KEY (source_id) REFERENCES nodes(id) ON DELETE CASCADE,
                FOREIGN KEY (target_id) REFERENCES nodes(id) ON DELETE CASCADE
            );

            CREATE INDEX IF NOT EXISTS idx_edges_source
                ON edges(realm, source_id);
            CREATE INDEX IF NOT EXISTS idx_edges_target
                ON edges(realm, target_id);

            PRAGMA foreign_keys = ON;
            PRAGMA journal_mode = WAL;
            "#,
        )?;
        Ok(())
    }

    /// Attribute indices already present in the file.
    fn load_indices(conn: &Connection) -> StoreResult<BTreeMap<String, BTreeSet<String>>> {
        let mut stmt = conn.prepare("SELECT name FROM sqlite_master WHERE type = 'index'")?;
        let names = stmt
            .query_map([], |row| row.get::<_, String>(0))?
            .collect::<Result<Vec<_>, _>>()?;

        let mut indexed: BTreeMap<String, BTreeSet<String>> = BTreeMap::new();
        for name in names {
            if let Some((label, attribute)) = name
                .strip_prefix(INDEX_PREFIX)
                .and_then(|rest| rest.split_once("__"))
            {
                indexed
                    .entry(label.to_string())
                    .or_default()
                    .insert(attribute.to_string());
            }
        }
        Ok(indexed)
    }

    fn from_connection(conn: Connection, realm: &str) -> StoreResult<Self> {
        Self::init_schema(&conn)?;
        let indexed = Self::load_indices(&conn)?;
        Ok(Self {
            conn: Mutex::new(conn),
            realm: realm.to_string(),
            indexed: Mutex::new(indexed),
        })
    }

    /// Connect to the database at `address` on behalf of `token`.
    ///
    /// `address` is a file path, or [`MEMORY_ADDRESS`]. Parent
    /// directories are created as needed.
    pub fn connect(address: &str, token: &AuthToken) -> StoreResult<Self> {
        let conn = if address == MEMORY_ADDRESS {
            Connection::open_in_memory()
        } else {
            if let Some(parent) = Path::new(address).parent() {
                if !parent.as_os_str().is_empty() {
                    std::fs::create_dir_all(parent)?;
                }
            }
            Connection::open(address)
        }
        .map_err(|source| StoreError::Connect {
            address: address.to_string(),
            source,
        })?;

        let client = Self::from_connection(conn, token.realm())?;
        info!(
            address = %address,
            principal = %token.principal(),
            realm = %token.realm(),
            "Connected to graph database"
        );
        Ok(client)
    }

    /// Private in-memory database for `realm`.
    pub fn open_in_memory(realm: &str) -> StoreResult<Self> {
        Self::from_connection(Connection::open_in_memory()?, realm)
    }

    pub fn realm(&self) -> &str {
        &self.realm
    }

    /// `(label, attribute)` pairs with an index in the database.
    pub fn indices(&self) -> StoreResult<Vec<(String, String)>> {
        let conn = self.conn.lock().unwrap();
        Ok(Self::load_indices(&conn)?
            .into_iter()
            .flat_map(|(label, attributes)| {
                attributes
                    .into_iter()
                    .map(move |attribute| (label.clone(), attribute))
            })
            .collect())
    }

    pub fn node_count(&self) -> StoreResult<usize> {
        let conn = self.conn.lock().unwrap();
        let count: i64 = conn.query_row(
            "SELECT COUNT(*) FROM nodes WHERE realm = ?1",
            params![self.realm],
            |row| row.get(0),
        )?;
        Ok(count as usize)
    }

    pub fn count_nodes_labelled(&self, label: &str) -> StoreResult<usize> {
        let conn = self.conn.lock().unwrap();
        let count: i64 = conn.query_row(
            "SELECT COUNT(*) FROM nodes WHERE realm = ?1 AND label = ?2",
            params![self.realm, label],
            |row| row.get(0),
        )?;
        Ok(count as usize)
    }

    pub fn edge_count(&self) -> StoreResult<usize> {
        let conn = self.conn.lock().unwrap();
        let count: i64 = conn.query_row(
            "SELECT COUNT(*) FROM edges WHERE realm = ?1",
            params![self.realm],
            |row| row.get(0),
        )?;
        Ok(count as usize)
    }

    pub fn count_edges_labelled(&self, label: &str) -> StoreResult<usize> {
        let conn = self.conn.lock().unwrap();
        let count: i64 = conn.query_row(
            "SELECT COUNT(*) FROM edges WHERE realm = ?1 AND label = ?2",
            params![self.realm, label],
            |row| row.get(0),
        )?;
        Ok(count as usize)
    }

    /// Load the node `reference` resolves to.
    pub fn find_node(&self, reference: &NodeRef) -> StoreResult<Option<GuacNode>> {
        let conn = self.conn.lock().unwrap();
        let Some((_, attributes)) = find_by(&conn, &self.realm, reference)? else {
            return Ok(None);
        };
        Ok(Some(GuacNode {
            label: reference.label.clone(),
            attributes,
        }))
    }

    /// Labels of edges leaving the node `reference` resolves to, with the
    /// label of each target.
    pub fn outgoing(&self, reference: &NodeRef) -> StoreResult<Vec<(String, String)>> {
        let conn = self.conn.lock().unwrap();
        let Some((id, _)) = find_by(&conn, &self.realm, reference)? else {
            return Ok(Vec::new());
        };
        let mut stmt = conn.prepare(
            r#"
            SELECT e.label, n.label FROM edges e
            JOIN nodes n ON n.id = e.target_id
            WHERE e.realm = ?1 AND e.source_id = ?2
            ORDER BY e.id
            "#,
        )?;
        let rows = stmt
            .query_map(params![self.realm, id], |row| Ok((row.get(0)?, row.get(1)?)))?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(rows)
    }

    fn upsert_node(
        tx: &Transaction<'_>,
        realm: &str,
        indexed: &BTreeMap<String, BTreeSet<String>>,
        node: &GuacNode,
        now: &str,
    ) -> StoreResult<bool> {
        let keys = indexed.get(&node.label);
        let mut existing = None;
        'search: for attribute in keys.into_iter().flatten() {
            let Some(value) = node.attribute_str(attribute) else {
                continue;
            };
            let reference = NodeRef::new(&node.label, attribute, value);
            for (id, attributes) in find_all_by(tx, realm, &reference)? {
                if agrees_on(keys.into_iter().flatten(), &node.attributes, &attributes) {
                    existing = Some((id, attributes));
                    break 'search;
                }
            }
        }

        match existing {
            Some((id, mut attributes)) => {
                attributes.extend(node.attributes.clone());
                tx.execute(
                    "UPDATE nodes SET attributes_json = ?1, updated_at = ?2 WHERE id = ?3",
                    params![serde_json::to_string(&attributes)?, now, id],
                )?;
                Ok(true)
            }
            None => {
                insert_node(tx, realm, &node.label, &node.attributes, now)?;
                Ok(false)
            }
        }
    }

    /// Row id for `reference`, inserting a stub node when nothing matches.
    fn resolve_endpoint(
        tx: &Transaction<'_>,
        realm: &str,
        reference: &NodeRef,
        now: &str,
        summary: &mut StoreSummary,
    ) -> StoreResult<i64> {
        if let Some((id, _)) = find_by(tx, realm, reference)? {
            return Ok(id);
        }
        debug!(endpoint = %reference, "Creating stub node for edge endpoint");
        let mut attributes = Attributes::new();
        attributes.insert(
            reference.attribute.clone(),
            PropertyValue::String(reference.value.clone()),
        );
        summary.nodes_created += 1;
        insert_node(tx, realm, &reference.label, &attributes, now)
    }
}

fn insert_node(
    tx: &Connection,
    realm: &str,
    label: &str,
    attributes: &Attributes,
    now: &str,
) -> StoreResult<i64> {
    tx.execute(
        r#"
        INSERT INTO nodes (realm, label, attributes_json, created_at, updated_at)
        VALUES (?1, ?2, ?3, ?4, ?4)
        "#,
        params![realm, label, serde_json::to_string(attributes)?, now],
    )?;
    Ok(tx.last_insert_rowid())
}

/// No indexed attribute present on both sides has different values.
fn agrees_on<'a>(
    keys: impl IntoIterator<Item = &'a String>,
    incoming: &Attributes,
    stored: &Attributes,
) -> bool {
    keys.into_iter().all(|key| match (incoming.get(key), stored.get(key)) {
        (Some(a), Some(b)) => a == b,
        _ => true,
    })
}

fn select_by(reference: &NodeRef, limit: Option<usize>) -> StoreResult<String> {
    let label = validate_identifier(&reference.label)?;
    let attribute = validate_identifier(&reference.attribute)?;
    let mut sql = format!(
        "SELECT id, attributes_json FROM nodes \
         WHERE realm = ?1 AND label = '{label}' \
         AND json_extract(attributes_json, '$.{attribute}') = ?2 \
         ORDER BY id"
    );
    if let Some(limit) = limit {
        sql.push_str(&format!(" LIMIT {limit}"));
    }
    Ok(sql)
}

/// First node in `realm` whose `reference.attribute` equals `reference.value`.
fn find_by(
    conn: &Connection,
    realm: &str,
    reference: &NodeRef,
) -> StoreResult<Option<(i64, Attributes)>> {
    let row: Option<(i64, String)> = conn
        .query_row(&select_by(reference, Some(1))?, params![realm, reference.value], |row| {
            Ok((row.get(0)?, row.get(1)?))
        })
        .optional()?;
    match row {
        Some((id, json)) => Ok(Some((id, serde_json::from_str(&json)?))),
        None => Ok(None),
    }
}

/// Every node in `realm` whose `reference.attribute` equals `reference.value`.
fn find_all_by(
    conn: &Connection,
    realm: &str,
    reference: &NodeRef,
) -> StoreResult<Vec<(i64, Attributes)>> {
    let mut stmt = conn.prepare(&select_by(reference, None)?)?;
    let rows = stmt
        .query_map(params![realm, reference.value], |row| {
            Ok((row.get::<_, i64>(0)?, row.get::<_, String>(1)?))
        })?
        .collect::<Result<Vec<_>, _>>()?;
    rows.into_iter()
        .map(|(id, json)| Ok((id, serde_json::from_str(&json)?)))
        .collect()
}

impl GraphClient for SqliteGraphClient {
    fn create_index(&self, label: &str, attribute: &str) -> StoreResult<()> {
        let label = validate_identifier(label)?;
        let attribute = validate_identifier(attribute)?;

        let conn = self.conn.lock().unwrap();
        conn.execute_batch(&format!(
            "CREATE INDEX IF NOT EXISTS {INDEX_PREFIX}{label}__{attribute} \
             ON nodes(realm, json_extract(attributes_json, '$.{attribute}')) \
             WHERE label = '{label}'"
        ))?;
        self.indexed
            .lock()
            .unwrap()
            .entry(label.to_string())
            .or_default()
            .insert(attribute.to_string());

        debug!(label = %label, attribute = %attribute, "Index ensured");
        Ok(())
    }

    fn store_graph(&self, graph: &Graph) -> StoreResult<StoreSummary> {
        let mut conn = self.conn.lock().unwrap();
        let indexed = self.indexed.lock().unwrap().clone();
        let now = chrono::Utc::now().to_rfc3339();
        let mut summary = StoreSummary::default();

        let tx = conn.transaction()?;
        for node in &graph.nodes {
            if Self::upsert_node(&tx, &self.realm, &indexed, node, &now)? {
                summary.nodes_merged += 1;
            } else {
                summary.nodes_created += 1;
            }
        }
        for edge in &graph.edges {
            let source = Self::resolve_endpoint(&tx, &self.realm, &edge.source, &now, &mut summary)?;
            let target = Self::resolve_endpoint(&tx, &self.realm, &edge.target, &now, &mut summary)?;
            tx.execute(
                r#"
                INSERT INTO edges (realm, label, source_id, target_id, attributes_json, created_at)
                VALUES (?1, ?2, ?3, ?4, ?5, ?6)
                ON CONFLICT(realm, label, source_id, target_id) DO UPDATE SET
                    attributes_json = excluded.attributes_json
                "#,
                params![
                    self.realm,
                    edge.label,
                    source,
                    target,
                    serde_json::to_string(&edge.attributes)?,
                    now
                ],
            )?;
            summary.edges_written += 1;
        }
        tx.commit()?;

        Ok(summary)
    }
}
