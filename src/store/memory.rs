use async_trait::async_trait;
use tokio::sync::Mutex;

use super::{DocStore, TRACING_TARGET, ensure_id, require_filters};
use crate::{
    error::Result,
    model::{DocPtr, Document, DocumentAttr, Record},
    query::{ATTR_QUERY_LIMIT, AttrQuery, DocumentAttrQuery, DocumentQuery},
};

/// A record kept next to the JSON form predicates are evaluated against.
#[derive(Debug)]
struct Row {
    json: serde_json::Value,
    record: Record,
}

impl Row {
    fn new(record: Record) -> Result<Self> {
        Ok(Self {
            json: record.to_json()?,
            record,
        })
    }
}

/// In-process store, in insertion order. Free text matches
/// case-insensitively against the name and content.
#[derive(Debug, Default)]
pub struct MemoryDocStore {
    rows: Mutex<Vec<Row>>,
}

impl MemoryDocStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn len(&self) -> usize {
        self.rows.lock().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.rows.lock().await.is_empty()
    }
}

fn matches_text(doc: &Document, needle: &str) -> bool {
    [&doc.name, &doc.pure_content, &doc.content]
        .iter()
        .any(|field| field.to_lowercase().contains(needle))
}

#[async_trait]
impl DocStore for MemoryDocStore {
    async fn store(&self, mut record: Record) -> Result<()> {
        ensure_id(&mut record);
        let row = Row::new(record)?;
        let mut rows = self.rows.lock().await;
        rows.retain(|r| r.record.id() != row.record.id());
        tracing::debug!(target: TRACING_TARGET, record = %row.record, "stored");
        rows.push(row);
        Ok(())
    }

    async fn insert_document_if_absent(&self, doc: Document) -> Result<bool> {
        let mut record = Record::Document(doc);
        ensure_id(&mut record);
        let row = Row::new(record)?;

        let mut rows = self.rows.lock().await;
        let exists = rows.iter().any(|r| match (&r.record, &row.record) {
            (Record::Document(a), Record::Document(b)) => {
                a.namespace == b.namespace && a.entry_id == b.entry_id
            }
            _ => false,
        });
        if exists {
            return Ok(false);
        }
        rows.push(row);
        Ok(true)
    }

    async fn search(&self, query: &DocumentQuery) -> Result<Vec<Document>> {
        let needle = query.search.trim().to_lowercase();
        let rows = self.rows.lock().await;
        let mut docs: Vec<Document> = rows
            .iter()
            .filter(|r| query.matches(&r.json))
            .filter_map(|r| match &r.record {
                Record::Document(d) => Some(d),
                Record::Attr(_) => None,
            })
            .filter(|d| needle.is_empty() || matches_text(d, &needle))
            .cloned()
            .collect();
        drop(rows);

        query.sort_documents(&mut docs);
        Ok(query.paginate(docs))
    }

    async fn filter_attr(
        &self,
        query: &DocumentAttrQuery,
    ) -> Result<Vec<DocumentAttr>> {
        let rows = self.rows.lock().await;
        Ok(rows
            .iter()
            .filter(|r| query.matches(&r.json))
            .filter_map(|r| match &r.record {
                Record::Attr(a) => Some(a.clone()),
                Record::Document(_) => None,
            })
            .take(ATTR_QUERY_LIMIT)
            .collect())
    }

    async fn delete_by_filter(&self, filters: &[AttrQuery]) -> Result<()> {
        require_filters(filters)?;
        let mut rows = self.rows.lock().await;
        let before = rows.len();
        rows.retain(|r| !filters.iter().all(|aq| aq.matches(&r.json)));
        tracing::debug!(
            target: TRACING_TARGET,
            removed = before - rows.len(),
            "deleted by filter"
        );
        Ok(())
    }
}
