//! The supported vector-search extensions and their embedding indexes.

use std::fmt;
use std::str::FromStr;

use keel_schema::quote_ident;

/// A vector-search Postgres extension.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum VectorExtension {
    /// pgvector
    Vector,
    /// pgvecto.rs
    Vectors,
    /// VectorChord
    VectorChord,
}

impl VectorExtension {
    /// Every supported extension, in the order an installed one is preferred.
    pub const ALL: [VectorExtension; 3] = [
        VectorExtension::VectorChord,
        VectorExtension::Vectors,
        VectorExtension::Vector,
    ];

    /// Used when nothing is configured or installed.
    pub const DEFAULT: VectorExtension = VectorExtension::VectorChord;

    /// The name in `pg_extension` / `CREATE EXTENSION`.
    pub fn name(&self) -> &'static str {
        match self {
            VectorExtension::Vector => "vector",
            VectorExtension::Vectors => "vectors",
            VectorExtension::VectorChord => "vchord",
        }
    }

    /// The name shown to operators.
    pub fn display_name(&self) -> &'static str {
        match self {
            VectorExtension::Vector => "pgvector",
            VectorExtension::Vectors => "pgvecto.rs",
            VectorExtension::VectorChord => "VectorChord",
        }
    }

    /// The supported version range, in semver requirement syntax.
    pub fn version_range(&self) -> &'static str {
        match self {
            VectorExtension::Vector => ">=0.7, <0.9",
            VectorExtension::Vectors => ">=0.2, <0.4",
            VectorExtension::VectorChord => ">=0.3, <0.6",
        }
    }

    /// The index access method embedding indexes use with this extension.
    pub fn index_method(&self) -> &'static str {
        match self {
            VectorExtension::Vector => "hnsw",
            VectorExtension::Vectors => "vectors",
            VectorExtension::VectorChord => "vchordrq",
        }
    }

    /// Whether an update always needs a Postgres restart, regardless of the
    /// versions involved.
    pub fn update_requires_restart(&self) -> bool {
        matches!(self, VectorExtension::Vectors)
    }
}

impl fmt::Display for VectorExtension {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UnknownVectorExtension(pub String);

impl fmt::Display for UnknownVectorExtension {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "unknown vector extension '{}' (expected pgvector, pgvecto.rs or vectorchord)",
            self.0
        )
    }
}

impl std::error::Error for UnknownVectorExtension {}

impl FromStr for VectorExtension {
    type Err = UnknownVectorExtension;

    /// Accepts both database names and display names, case-insensitively.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "vector" | "pgvector" => Ok(VectorExtension::Vector),
            "vectors" | "pgvecto.rs" | "pgvectors" => Ok(VectorExtension::Vectors),
            "vchord" | "vectorchord" => Ok(VectorExtension::VectorChord),
            _ => Err(UnknownVectorExtension(s.to_string())),
        }
    }
}

/// An embedding index managed by the reindex step.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum VectorIndex {
    /// CLIP embeddings for smart search
    Clip,
    /// Face recognition embeddings
    Face,
}

impl VectorIndex {
    pub const ALL: [VectorIndex; 2] = [VectorIndex::Clip, VectorIndex::Face];

    pub fn name(&self) -> &'static str {
        match self {
            VectorIndex::Clip => "clip_index",
            VectorIndex::Face => "face_index",
        }
    }

    pub fn table(&self) -> &'static str {
        match self {
            VectorIndex::Clip => "smart_search",
            VectorIndex::Face => "face_search",
        }
    }

    pub fn column(&self) -> &'static str {
        "embedding"
    }
}

impl fmt::Display for VectorIndex {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// The number of IVF lists a VectorChord index should have for `rows` rows.
pub fn target_list_count(rows: u64) -> u32 {
    if rows < 128_000 {
        return 1;
    }
    if rows < 2_048_000 {
        let thousands = (rows / 1000) as u32;
        return 1 << (32 - thousands.leading_zeros());
    }
    let root = (rows as f64).sqrt() as u32;
    1 << (33 - root.leading_zeros())
}

/// Read the `lists = [N]` setting out of a VectorChord index definition.
pub fn parse_lists(definition: &str) -> Option<u32> {
    let after = &definition[definition.find("lists")? + "lists".len()..];
    let after = after.trim_start().strip_prefix('=')?.trim_start();
    let inner = after.strip_prefix('[')?;
    let end = inner.find(']')?;
    inner[..end].trim().parse().ok()
}

/// Whether an existing index definition is unusable with `extension`.
///
/// `definition` is the `pg_indexes.indexdef` text, or `None` when the index
/// does not exist. `target_lists` is only consulted for VectorChord.
pub fn needs_reindex(
    definition: Option<&str>,
    extension: VectorExtension,
    target_lists: Option<u32>,
) -> bool {
    let Some(definition) = definition else {
        return true;
    };

    let using = format!("using {}", extension.index_method());
    if !definition.to_ascii_lowercase().contains(&using) {
        return true;
    }

    match (extension, target_lists) {
        (VectorExtension::VectorChord, Some(target)) => {
            parse_lists(definition).unwrap_or(1) != target
        }
        _ => false,
    }
}

/// `CREATE INDEX` for an embedding index under `extension`, on the table in
/// `schema_name`.
pub fn vector_index_sql(
    schema_name: &str,
    extension: VectorExtension,
    index: VectorIndex,
    lists: u32,
) -> String {
    let prefix = format!(
        "CREATE INDEX IF NOT EXISTS {} ON {}.{} USING {} ({}",
        quote_ident(index.name()),
        quote_ident(schema_name),
        quote_ident(index.table()),
        extension.index_method(),
        index.column()
    );
    match extension {
        VectorExtension::Vector => format!(
            "{} vector_cosine_ops) WITH (ef_construction = 300, m = 16)",
            prefix
        ),
        VectorExtension::Vectors => format!(
            "{} vector_cos_ops) WITH (options = $$\n[indexing.hnsw]\nm = 16\nef_construction = 300\n$$)",
            prefix
        ),
        VectorExtension::VectorChord => format!(
            "{} vector_cosine_ops) WITH (options = $$\nresidual_quantization = false\n[build.internal]\nlists = [{}]\nspherical_centroids = true\nbuild_threads = 4\nsampling_factor = 1024\n$$)",
            prefix, lists
        ),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_names() {
        assert_eq!(VectorExtension::Vector.display_name(), "pgvector");
        assert_eq!(VectorExtension::Vectors.display_name(), "pgvecto.rs");
        assert_eq!(VectorExtension::VectorChord.display_name(), "VectorChord");
        assert_eq!(VectorExtension::VectorChord.to_string(), "vchord");
    }

    #[test]
    fn test_parse() {
        assert_eq!("pgvector".parse(), Ok(VectorExtension::Vector));
        assert_eq!("vectors".parse(), Ok(VectorExtension::Vectors));
        assert_eq!("VectorChord".parse(), Ok(VectorExtension::VectorChord));
        assert!("pgvectorscale".parse::<VectorExtension>().is_err());
    }

    #[test]
    fn test_target_list_count() {
        assert_eq!(target_list_count(0), 1);
        assert_eq!(target_list_count(127_999), 1);
        assert_eq!(target_list_count(128_000), 256);
        assert_eq!(target_list_count(500_000), 512);
        assert_eq!(target_list_count(2_047_999), 2048);
        assert_eq!(target_list_count(2_048_000), 4096);
        assert_eq!(target_list_count(10_000_000), 8192);
    }

    #[test]
    fn test_parse_lists() {
        let definition = vector_index_sql("public", VectorExtension::VectorChord, VectorIndex::Clip, 256);
        assert_eq!(parse_lists(&definition), Some(256));
        assert_eq!(parse_lists("lists = []"), None);
        assert_eq!(parse_lists("USING hnsw (embedding vector_cosine_ops)"), None);
    }

    #[test]
    fn test_needs_reindex() {
        let hnsw = "CREATE INDEX clip_index ON public.smart_search USING hnsw (embedding vector_cosine_ops) WITH (m='16', ef_construction='300')";
        assert!(needs_reindex(None, VectorExtension::Vector, None));
        assert!(!needs_reindex(Some(hnsw), VectorExtension::Vector, None));
        assert!(needs_reindex(Some(hnsw), VectorExtension::VectorChord, Some(1)));

        let vchord = vector_index_sql("public", VectorExtension::VectorChord, VectorIndex::Clip, 1);
        assert!(!needs_reindex(Some(&vchord), VectorExtension::VectorChord, Some(1)));
        assert!(needs_reindex(Some(&vchord), VectorExtension::VectorChord, Some(256)));
    }

    #[test]
    fn snapshot_vector_index_sql() {
        insta::assert_snapshot!(
            vector_index_sql("public", VectorExtension::Vector, VectorIndex::Face, 1),
            @r#"CREATE INDEX IF NOT EXISTS "face_index" ON "public"."face_search" USING hnsw (embedding vector_cosine_ops) WITH (ef_construction = 300, m = 16)"#
        );
    }

    #[test]
    fn test_vector_index_targets_schema_table() {
        let sql = vector_index_sql("immich", VectorExtension::VectorChord, VectorIndex::Clip, 1);
        assert!(
            sql.starts_with(
                "CREATE INDEX IF NOT EXISTS \"clip_index\" ON \"immich\".\"smart_search\" USING vchordrq"
            ),
            "{}",
            sql
        );
    }
}
