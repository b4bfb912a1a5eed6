//! On-disk object index: the Tantivy directory behind [`TantivySearchStorage`].
//!
//! An index directory holds exactly one object index. Opening a directory
//! written with another schema is refused rather than silently extended.
//!
//! [`TantivySearchStorage`]: crate::TantivySearchStorage

use std::path::PathBuf;

use tantivy::directory::MmapDirectory;
use tantivy::{Index, IndexReader, IndexSettings, IndexWriter, ReloadPolicy, TantivyError};
use tracing::{debug, info};

use crate::error::SearchError;
use crate::schema::{build_object_schema, SearchSchema};

const DEFAULT_WRITER_MEMORY_MB: usize = 50;

/// Smallest writer budget Tantivy accepts for its single indexing thread.
const MIN_WRITER_MEMORY_MB: usize = 15;

/// Where the object index lives and how much memory its writer may buffer.
#[derive(Debug, Clone)]
pub struct SearchIndexConfig {
    pub index_path: PathBuf,
    pub writer_memory_mb: usize,
}

impl SearchIndexConfig {
    pub fn new(index_path: impl Into<PathBuf>) -> Self {
        Self {
            index_path: index_path.into(),
            writer_memory_mb: DEFAULT_WRITER_MEMORY_MB,
        }
    }

    pub fn with_memory_mb(mut self, mb: usize) -> Self {
        self.writer_memory_mb = mb;
        self
    }
}

pub(crate) struct ObjectIndex {
    index: Index,
    schema: SearchSchema,
    writer_memory_mb: usize,
}

impl ObjectIndex {
    /// Open the object index in `config.index_path`, creating the directory
    /// and an empty index when there is none yet.
    pub(crate) fn open(config: SearchIndexConfig) -> Result<Self, SearchError> {
        if config.writer_memory_mb < MIN_WRITER_MEMORY_MB {
            return Err(SearchError::InvalidConfig(format!(
                "writer memory {} MB is below the {} MB minimum",
                config.writer_memory_mb, MIN_WRITER_MEMORY_MB
            )));
        }

        std::fs::create_dir_all(&config.index_path)?;
        let directory = MmapDirectory::open(&config.index_path).map_err(TantivyError::from)?;

        let (index, schema) = if Index::exists(&directory).map_err(TantivyError::from)? {
            let index = Index::open(directory)?;
            let schema = SearchSchema::from_schema(index.schema())?;
            debug!(path = %config.index_path.display(), "Opened existing object index");
            (index, schema)
        } else {
            let schema = build_object_schema();
            let index =
                Index::create(directory, schema.schema().clone(), IndexSettings::default())?;
            info!(path = %config.index_path.display(), "Created object index");
            (index, schema)
        };

        Ok(Self {
            index,
            schema,
            writer_memory_mb: config.writer_memory_mb,
        })
    }

    pub(crate) fn schema(&self) -> &SearchSchema {
        &self.schema
    }

    /// The single writer of this index. Mutations are serialized by the
    /// storage, so one indexing thread is enough.
    pub(crate) fn writer(&self) -> Result<IndexWriter, SearchError> {
        let budget = self.writer_memory_mb * 1024 * 1024;
        Ok(self.index.writer_with_num_threads(1, budget)?)
    }

    /// Reader reloaded explicitly after each commit, so a write is visible
    /// to the next read on the same storage.
    pub(crate) fn reader(&self) -> Result<IndexReader, SearchError> {
        Ok(self
            .index
            .reader_builder()
            .reload_policy(ReloadPolicy::Manual)
            .try_into()?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tantivy::schema::{Schema, STRING};
    use tempfile::TempDir;

    #[test]
    fn test_open_creates_missing_directory() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("nested").join("index");

        let index = ObjectIndex::open(SearchIndexConfig::new(&path)).unwrap();
        assert!(path.join("meta.json").exists());
        assert!(index.schema().schema().get_field("record").is_ok());
        index.writer().unwrap();
        index.reader().unwrap();
    }

    #[test]
    fn test_reopen_keeps_documents() {
        let temp_dir = TempDir::new().unwrap();
        let config = SearchIndexConfig::new(temp_dir.path());

        {
            let index = ObjectIndex::open(config.clone()).unwrap();
            let mut writer = index.writer().unwrap();
            let mut doc = tantivy::TantivyDocument::default();
            doc.add_text(index.schema().doc_id, "Genome_1|WS:1/2/3");
            writer.add_document(doc).unwrap();
            writer.commit().unwrap();
        }

        let index = ObjectIndex::open(config).unwrap();
        assert_eq!(index.reader().unwrap().searcher().num_docs(), 1);
    }

    #[test]
    fn test_foreign_index_rejected() {
        let temp_dir = TempDir::new().unwrap();
        let mut builder = Schema::builder();
        builder.add_text_field("title", STRING);
        Index::create_in_dir(temp_dir.path(), builder.build()).unwrap();

        let err = ObjectIndex::open(SearchIndexConfig::new(temp_dir.path()))
            .err()
            .unwrap();
        assert!(matches!(err, SearchError::SchemaMismatch(_)));
    }

    #[test]
    fn test_writer_budget_below_minimum_rejected() {
        let temp_dir = TempDir::new().unwrap();
        let config = SearchIndexConfig::new(temp_dir.path()).with_memory_mb(4);
        let err = ObjectIndex::open(config).err().unwrap();
        assert!(matches!(err, SearchError::InvalidConfig(_)));
        assert!(!temp_dir.path().join("meta.json").exists());
    }
}
