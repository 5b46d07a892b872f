//! Persistence for documents and attributes.
//!
//! Both record kinds live in one store and are told apart by their `kind`
//! field, so a delete keyed only on `(namespace, entryId)` removes a
//! document together with every attribute of that entry.

mod memory;
mod tantivy_store;

use std::sync::Arc;

use async_trait::async_trait;

pub use memory::MemoryDocStore;
pub use tantivy_store::TantivyDocStore;

use crate::{
    config::{ChainConfig, StoreKind},
    data_dir::DataDir,
    error::{Error, Result},
    model::{Document, DocumentAttr, Record},
    query::{AttrQuery, DocumentAttrQuery, DocumentQuery},
};

pub(crate) const TRACING_TARGET: &str = "docchain::store";

#[async_trait]
pub trait DocStore: Send + Sync {
    /// Insert or replace a record by id. An empty id is assigned one.
    async fn store(&self, record: Record) -> Result<()>;

    /// Persist `doc` unless a document already exists for its
    /// `(namespace, entryId)`. Returns whether it was written.
    ///
    /// The check and the write are atomic with respect to other writers
    /// of the same store.
    async fn insert_document_if_absent(&self, doc: Document) -> Result<bool>;

    async fn search(&self, query: &DocumentQuery) -> Result<Vec<Document>>;

    async fn filter_attr(
        &self,
        query: &DocumentAttrQuery,
    ) -> Result<Vec<DocumentAttr>>;

    /// Remove every record, of either kind, matching all `filters`.
    async fn delete_by_filter(&self, filters: &[AttrQuery]) -> Result<()>;
}

/// Open the store selected by `config`.
pub fn open_store(
    config: &ChainConfig,
    data_dir: &DataDir,
) -> Result<Arc<dyn DocStore>> {
    let store: Arc<dyn DocStore> = match config.store {
        StoreKind::Tantivy => Arc::new(TantivyDocStore::open(
            &data_dir.index_dir()?,
            config.writer_memory_budget,
        )?),
        StoreKind::Memory => Arc::new(MemoryDocStore::new()),
    };
    Ok(store)
}

pub(crate) fn ensure_id(record: &mut Record) {
    let id = match record {
        Record::Document(d) => &mut d.id,
        Record::Attr(a) => &mut a.id,
    };
    if id.is_empty() {
        *id = uuid::Uuid::new_v4().to_string();
    }
}

pub(crate) fn require_filters(filters: &[AttrQuery]) -> Result<()> {
    if filters.is_empty() {
        return Err(Error::InvalidQuery(
            "refusing to delete without a filter".into(),
        ));
    }
    Ok(())
}
