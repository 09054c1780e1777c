//! Vector similarity layer
//!
//! Every embeddable table has exactly one vector column, stored as a
//! little-endian `f32` BLOB. Nearest-neighbour queries use the sqlite-vec
//! extension (`vec_distance_cosine`) when it is loaded, and an in-process
//! cosine scan otherwise.

use std::path::Path;
use rusqlite::{Connection, params};
use crate::identity::BusinessKey;
use crate::node::NodeKind;
use crate::{Error, Result};

/// A designated vector column. Table and column names are compile-time
/// constants, which is what makes formatting them into SQL safe.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct VectorColumn {
    pub table: &'static str,
    pub column: &'static str,
    /// Column holding the surrogate node id
    pub id_column: &'static str,
}

impl VectorColumn {
    pub const REPOSITORY: VectorColumn = VectorColumn { table: "repositories", column: "description_embedding", id_column: "node_id" };
    pub const FILE: VectorColumn = VectorColumn { table: "files", column: "content_embedding", id_column: "node_id" };
    pub const FUNCTION: VectorColumn = VectorColumn { table: "functions", column: "signature_embedding", id_column: "node_id" };
    pub const COMMIT: VectorColumn = VectorColumn { table: "commits", column: "message_embedding", id_column: "node_id" };
    pub const TEST: VectorColumn = VectorColumn { table: "test_nodes", column: "test_embedding", id_column: "node_id" };
    pub const PULL_REQUEST: VectorColumn = VectorColumn { table: "pull_requests", column: "body_embedding", id_column: "node_id" };
    /// Kinds without a typed table keep their vector on the generic node row
    pub const GRAPH_NODE: VectorColumn = VectorColumn { table: "graph_nodes", column: "embedding", id_column: "id" };

    /// The column a node kind's embedding is stored in
    pub fn for_kind(kind: NodeKind) -> VectorColumn {
        match kind {
            NodeKind::Repository => Self::REPOSITORY,
            NodeKind::File => Self::FILE,
            NodeKind::Function | NodeKind::ArrowFunction => Self::FUNCTION,
            NodeKind::Commit => Self::COMMIT,
            NodeKind::Test => Self::TEST,
            NodeKind::PullRequest => Self::PULL_REQUEST,
            NodeKind::Variable | NodeKind::Class | NodeKind::Import | NodeKind::Export => Self::GRAPH_NODE,
        }
    }

    pub fn all() -> &'static [VectorColumn] {
        &[
            Self::REPOSITORY,
            Self::FILE,
            Self::FUNCTION,
            Self::COMMIT,
            Self::TEST,
            Self::PULL_REQUEST,
            Self::GRAPH_NODE,
        ]
    }
}

impl std::fmt::Display for VectorColumn {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}.{}", self.table, self.column)
    }
}

/// A nearest-neighbour hit
#[derive(Debug, Clone, PartialEq)]
pub struct Neighbor {
    pub node_id: String,
    pub business_key: BusinessKey,
    pub similarity: f32,
}

pub fn encode_vector(vector: &[f32]) -> Vec<u8> {
    vector.iter().flat_map(|f| f.to_le_bytes()).collect()
}

pub fn decode_vector(blob: &[u8]) -> Result<Vec<f32>> {
    if blob.len() % 4 != 0 {
        return Err(Error::InvalidInput(format!(
            "vector blob length {} is not a multiple of 4",
            blob.len()
        )));
    }
    Ok(blob
        .chunks_exact(4)
        .map(|chunk| f32::from_le_bytes([chunk[0], chunk[1], chunk[2], chunk[3]]))
        .collect())
}

/// Cosine similarity; `0.0` when either vector has zero norm.
/// Vectors of different lengths are rejected, never truncated.
pub fn cosine_similarity(a: &[f32], b: &[f32]) -> Result<f32> {
    if a.len() != b.len() {
        return Err(Error::VectorDimension { expected: a.len(), actual: b.len() });
    }
    let dot_product: f32 = a.iter().zip(b.iter()).map(|(x, y)| x * y).sum();
    let norm_a: f32 = a.iter().map(|x| x * x).sum::<f32>().sqrt();
    let norm_b: f32 = b.iter().map(|x| x * x).sum::<f32>().sqrt();

    if norm_a == 0.0 || norm_b == 0.0 {
        Ok(0.0)
    } else {
        Ok(dot_product / (norm_a * norm_b))
    }
}

/// Load the sqlite-vec extension from `path`.
pub fn load_vector_extension(conn: &Connection, path: &Path) -> Result<()> {
    // SAFETY: the path comes from operator configuration, and extension
    // loading is switched off again before returning.
    unsafe {
        conn.load_extension_enable()?;
        let loaded = conn.load_extension(path, None::<&str>);
        conn.load_extension_disable()?;
        loaded?;
    }
    Ok(())
}

/// Whether the native vector functions are callable on this connection
pub fn probe_native_support(conn: &Connection) -> bool {
    conn.query_row("SELECT vec_version()", [], |row| row.get::<_, String>(0))
        .is_ok()
}

/// Write a vector into its designated column for the row with `key`.
///
/// Fails when the dimensionality does not match `expected_dims` or when no
/// row exists for the key.
pub fn store_vector(
    conn: &Connection,
    column: VectorColumn,
    key: &BusinessKey,
    vector: &[f32],
    expected_dims: Option<usize>,
) -> Result<()> {
    if let Some(expected) = expected_dims {
        if vector.len() != expected {
            return Err(Error::VectorDimension { expected, actual: vector.len() });
        }
    }
    let sql = format!(
        "UPDATE {} SET {} = ?1 WHERE business_key = ?2",
        column.table, column.column
    );
    let changed = conn.execute(&sql, params![encode_vector(vector), key.as_str()])?;
    if changed == 0 {
        return Err(Error::NotFound(format!("no {} row for {}", column.table, key)));
    }
    Ok(())
}

/// Read back a stored vector
pub fn get_vector(conn: &Connection, column: VectorColumn, key: &BusinessKey) -> Result<Option<Vec<f32>>> {
    use rusqlite::OptionalExtension;

    let sql = format!(
        "SELECT {} FROM {} WHERE business_key = ?1",
        column.column, column.table
    );
    let blob: Option<Option<Vec<u8>>> = conn
        .query_row(&sql, [key.as_str()], |row| row.get(0))
        .optional()?;
    blob.flatten().map(|b| decode_vector(&b)).transpose()
}

/// Top-`k` rows of `column` by cosine similarity to `query`, dropping any
/// below `min_similarity`. Ties are broken by business key so results are
/// stable for a fixed store. Stored vectors of another length never match.
pub fn nearest_neighbors(
    conn: &Connection,
    native: bool,
    column: VectorColumn,
    query: &[f32],
    k: usize,
    min_similarity: f32,
    scan_limit: usize,
) -> Result<Vec<Neighbor>> {
    if query.is_empty() {
        return Err(Error::InvalidInput("query vector is empty".to_string()));
    }
    if k == 0 {
        return Ok(Vec::new());
    }

    if native {
        match native_neighbors(conn, column, query, k, min_similarity) {
            Ok(hits) => return Ok(hits),
            Err(e) => tracing::warn!("native vector search on {} failed, scanning instead: {}", column, e),
        }
    }
    scan_neighbors(conn, column, query, k, min_similarity, scan_limit)
}

fn native_neighbors(
    conn: &Connection,
    column: VectorColumn,
    query: &[f32],
    k: usize,
    min_similarity: f32,
) -> Result<Vec<Neighbor>> {
    let sql = format!(
        "SELECT {id}, business_key, 1.0 - vec_distance_cosine({col}, ?1) AS similarity
         FROM {table}
         WHERE {col} IS NOT NULL AND length({col}) = ?2
         ORDER BY similarity DESC, business_key ASC
         LIMIT ?3",
        id = column.id_column,
        col = column.column,
        table = column.table,
    );
    let mut stmt = conn.prepare(&sql)?;
    let rows = stmt.query_map(
        params![encode_vector(query), (query.len() * 4) as i64, k as i64],
        |row| {
            let node_id: String = row.get(0)?;
            let key: String = row.get(1)?;
            let similarity: f64 = row.get(2)?;
            Ok((node_id, key, similarity as f32))
        },
    )?;

    let mut hits = Vec::new();
    for row in rows {
        let (node_id, key, similarity) = row?;
        if similarity >= min_similarity {
            hits.push(Neighbor { node_id, business_key: key.parse()?, similarity });
        }
    }
    Ok(hits)
}

/// In-process cosine scan. Only the first `scan_limit` rows of `column` in
/// business-key order are read, so rows past that cap are never candidates.
/// Rows whose vector length differs from the query are skipped and counted.
fn scan_neighbors(
    conn: &Connection,
    column: VectorColumn,
    query: &[f32],
    k: usize,
    min_similarity: f32,
    scan_limit: usize,
) -> Result<Vec<Neighbor>> {
    let sql = format!(
        "SELECT {id}, business_key, {col} FROM {table} WHERE {col} IS NOT NULL ORDER BY business_key LIMIT ?1",
        id = column.id_column,
        col = column.column,
        table = column.table,
    );
    let mut stmt = conn.prepare(&sql)?;
    let candidates = stmt.query_map([scan_limit as i64], |row| {
        let node_id: String = row.get(0)?;
        let key: String = row.get(1)?;
        let blob: Vec<u8> = row.get(2)?;
        Ok((node_id, key, blob))
    })?;

    let mut scored = Vec::new();
    let mut mismatched = 0usize;
    for candidate in candidates {
        let (node_id, key, blob) = candidate?;
        let vector = decode_vector(&blob)?;
        if vector.len() != query.len() {
            tracing::debug!("skipping {} in {}: {} dimensions", key, column, vector.len());
            mismatched += 1;
            continue;
        }
        let similarity = cosine_similarity(query, &vector)?;
        if similarity >= min_similarity {
            scored.push(Neighbor { node_id, business_key: key.parse()?, similarity });
        }
    }

    if mismatched > 0 {
        tracing::warn!(
            "skipped {} vector(s) in {} whose length differs from the {}-dimension query",
            mismatched,
            column,
            query.len()
        );
    }

    sort_by_similarity(&mut scored);
    scored.truncate(k);
    Ok(scored)
}

/// Descending similarity, ties by business key
pub fn sort_by_similarity(hits: &mut [Neighbor]) {
    hits.sort_by(|a, b| {
        b.similarity
            .total_cmp(&a.similarity)
            .then_with(|| a.business_key.cmp(&b.business_key))
    });
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cosine_similarity() {
        assert!((cosine_similarity(&[1.0, 0.0], &[1.0, 0.0]).unwrap() - 1.0).abs() < 1e-6);
        assert!(cosine_similarity(&[1.0, 0.0], &[0.0, 1.0]).unwrap().abs() < 1e-6);
        assert!((cosine_similarity(&[1.0, 0.0], &[-1.0, 0.0]).unwrap() + 1.0).abs() < 1e-6);
        assert_eq!(cosine_similarity(&[0.0, 0.0], &[1.0, 2.0]).unwrap(), 0.0);
    }

    #[test]
    fn test_cosine_rejects_unequal_lengths() {
        let err = cosine_similarity(&[1.0, 0.0], &[1.0, 0.0, 0.0]).unwrap_err();
        assert!(matches!(err, Error::VectorDimension { expected: 2, actual: 3 }));
    }

    #[test]
    fn test_blob_roundtrip() {
        let vector = vec![0.25, -1.5, 3.0];
        let decoded = decode_vector(&encode_vector(&vector)).unwrap();
        assert_eq!(decoded, vector);
        assert!(decode_vector(&[0, 1, 2]).is_err());
    }

    #[test]
    fn test_every_kind_has_a_column() {
        for kind in NodeKind::all() {
            let column = VectorColumn::for_kind(*kind);
            assert!(VectorColumn::all().contains(&column));
        }
        assert_eq!(VectorColumn::for_kind(NodeKind::ArrowFunction), VectorColumn::FUNCTION);
    }

    fn scratch_column(conn: &Connection, rows: &[(&str, &[f32])]) -> VectorColumn {
        conn.execute_batch("CREATE TABLE scratch (id TEXT, business_key TEXT, embedding BLOB)")
            .unwrap();
        for (key, vector) in rows {
            conn.execute(
                "INSERT INTO scratch (id, business_key, embedding) VALUES (?1, ?2, ?3)",
                params![key, format!("fn:{}", key), encode_vector(vector)],
            )
            .unwrap();
        }
        VectorColumn { table: "scratch", column: "embedding", id_column: "id" }
    }

    #[test]
    fn test_scan_skips_mismatched_lengths() {
        let conn = Connection::open_in_memory().unwrap();
        let column = scratch_column(
            &conn,
            &[("a", &[1.0, 0.0][..]), ("b", &[1.0, 0.0, 0.0][..]), ("c", &[0.0, 1.0][..])],
        );

        let hits = nearest_neighbors(&conn, false, column, &[1.0, 0.0], 10, -1.0, 100).unwrap();
        let ids: Vec<&str> = hits.iter().map(|h| h.node_id.as_str()).collect();
        assert_eq!(ids, vec!["a", "c"]);
    }

    #[test]
    fn test_scan_reads_first_rows_by_business_key() {
        let conn = Connection::open_in_memory().unwrap();
        let column = scratch_column(&conn, &[("b", &[1.0, 0.0][..]), ("a", &[0.0, 1.0][..])]);

        let hits = nearest_neighbors(&conn, false, column, &[1.0, 0.0], 10, -1.0, 1).unwrap();
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].node_id, "a");
    }

    #[test]
    fn test_probe_without_extension() {
        let conn = Connection::open_in_memory().unwrap();
        assert!(!probe_native_support(&conn));
    }
}
