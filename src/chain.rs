//! The document/attribute indexing chain.
//!
//! Writes go through the [`AdmissionPool`]; reads race the store call
//! against the caller's [`CancellationToken`] and are never pooled.

use std::{future::Future, sync::Arc};

use chrono::Utc;
use serde::{Deserialize, Serialize};
use tokio_util::sync::CancellationToken;

use crate::{
    config::ChainConfig,
    error::{Error, Phase, Result},
    model::{
        AttrKey,
        AttrValue,
        Document,
        DocumentAttr,
        Entry,
        Kind,
        Record,
        entry_key,
    },
    plugin::Pipeline,
    pool::AdmissionPool,
    query::{
        AttrQuery,
        DocumentAttrQuery,
        DocumentQuery,
        JoinPolicy,
        SearchFilter,
        fields,
    },
    store::DocStore,
    text_util::{search_context, strip_markup},
};

pub(crate) const TRACING_TARGET: &str = "docchain::chain";

/// Result of [`Chain::store`].
#[derive(Debug, Clone, PartialEq)]
pub enum StoreOutcome {
    /// The document was enriched and persisted.
    Created(Document),
    /// A document for the entry already existed; nothing was written.
    AlreadyExists,
}

impl StoreOutcome {
    pub fn is_created(&self) -> bool {
        matches!(self, StoreOutcome::Created(_))
    }
}

/// Attribute changes for one entry. `None` leaves an attribute untouched.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct AttrUpdate {
    pub parent_id: Option<String>,
    pub mark: Option<bool>,
    pub unread: Option<bool>,
}

impl AttrUpdate {
    pub fn is_empty(&self) -> bool {
        self.parent_id.is_none() && self.mark.is_none() && self.unread.is_none()
    }

    fn attrs(&self, namespace: &str, entry_id: &str) -> Vec<DocumentAttr> {
        let values = [
            (AttrKey::ParentId, self.parent_id.clone().map(AttrValue::from)),
            (AttrKey::Mark, self.mark.map(AttrValue::from)),
            (AttrKey::UnRead, self.unread.map(AttrValue::from)),
        ];
        values
            .into_iter()
            .filter_map(|(key, value)| {
                value.map(|v| DocumentAttr::new(namespace, entry_id, key, v))
            })
            .collect()
    }
}

/// Stable id of the single live row for `(namespace, entryId, key)`.
fn attr_id(attr: &DocumentAttr) -> String {
    format!("{}/{}", attr.entry_key(), attr.key)
}

#[derive(Clone)]
pub struct Chain {
    store: Arc<dyn DocStore>,
    pipeline: Arc<Pipeline>,
    pool: Arc<AdmissionPool>,
    join_policy: JoinPolicy,
}

impl Chain {
    pub fn new(
        store: Arc<dyn DocStore>,
        pipeline: Pipeline,
        pool: Arc<AdmissionPool>,
    ) -> Self {
        Self {
            store,
            pipeline: Arc::new(pipeline),
            pool,
            join_policy: JoinPolicy::default(),
        }
    }

    pub fn from_config(
        config: &ChainConfig,
        store: Arc<dyn DocStore>,
    ) -> Result<Self> {
        Ok(Self::new(store, config.pipeline()?, Arc::new(config.pool()))
            .with_join_policy(config.join_policy))
    }

    pub fn with_join_policy(mut self, join_policy: JoinPolicy) -> Self {
        self.join_policy = join_policy;
        self
    }

    pub fn join_policy(&self) -> JoinPolicy {
        self.join_policy
    }

    pub fn pipeline(&self) -> &Pipeline {
        &self.pipeline
    }

    pub fn pool(&self) -> &AdmissionPool {
        &self.pool
    }

    /// Enrich and persist `doc` unless its entry already has a document.
    ///
    /// A later call for the same `(namespace, entryId)` never overwrites
    /// the first document, even when both race.
    pub async fn store(
        &self,
        cancel: &CancellationToken,
        doc: Document,
    ) -> Result<StoreOutcome> {
        let chain = self.clone();
        self.pool
            .run(cancel, move |token| async move {
                chain.store_worker(token, doc).await
            })
            .await
    }

    async fn store_worker(
        &self,
        token: CancellationToken,
        mut doc: Document,
    ) -> Result<StoreOutcome> {
        let entry = doc.entry_key();

        let existing = self
            .store
            .search(&DocumentQuery::of_entry(&doc.namespace, &doc.entry_id))
            .await
            .map_err(|e| self.failed(e, Phase::DedupCheck, &entry))?;
        if !existing.is_empty() {
            tracing::debug!(
                target: TRACING_TARGET,
                %entry,
                "document exists, skipping"
            );
            return Ok(StoreOutcome::AlreadyExists);
        }

        if doc.id.is_empty() {
            doc.id = uuid::Uuid::new_v4().to_string();
        }
        if doc.created_at.timestamp() == 0 {
            doc.created_at = Utc::now();
        }
        if doc.updated_at < doc.created_at {
            doc.updated_at = doc.created_at;
        }

        self.pipeline.run(&token, &mut doc)?;
        if token.is_cancelled() {
            return Err(Error::Timeout);
        }

        let created = self
            .store
            .insert_document_if_absent(doc.clone())
            .await
            .map_err(|e| self.failed(e, Phase::Persist, &entry))?;
        if !created {
            tracing::debug!(
                target: TRACING_TARGET,
                %entry,
                "lost first-writer race, skipping"
            );
            return Ok(StoreOutcome::AlreadyExists);
        }

        tracing::debug!(
            target: TRACING_TARGET,
            %entry,
            id = %doc.id,
            "document stored"
        );
        Ok(StoreOutcome::Created(doc))
    }

    /// Replace the value of one attribute of an entry.
    pub async fn store_attr(
        &self,
        cancel: &CancellationToken,
        attr: DocumentAttr,
    ) -> Result<()> {
        let chain = self.clone();
        self.pool
            .run(cancel, move |_| async move {
                chain.store_attr_worker(attr).await
            })
            .await
    }

    async fn store_attr_worker(&self, mut attr: DocumentAttr) -> Result<()> {
        let entry = attr.entry_key();

        let (namespace, entry_id) = (&attr.namespace, &attr.entry_id);
        let stale = DocumentAttrQuery::of_key(namespace, entry_id, attr.key);
        self.store
            .delete_by_filter(&stale.attr_queries)
            .await
            .map_err(|e| self.failed(e, Phase::ReplaceAttr, &entry))?;

        attr.id = attr_id(&attr);
        tracing::debug!(
            target: TRACING_TARGET,
            %entry,
            key = %attr.key,
            value = %attr.value,
            "storing attr"
        );
        self.store
            .store(Record::Attr(attr))
            .await
            .map_err(|e| self.failed(e, Phase::Persist, &entry))
    }

    /// Apply every attribute set in `update`.
    pub async fn update_attrs(
        &self,
        cancel: &CancellationToken,
        namespace: &str,
        entry_id: &str,
        update: &AttrUpdate,
    ) -> Result<()> {
        for attr in update.attrs(namespace, entry_id) {
            self.store_attr(cancel, attr).await?;
        }
        Ok(())
    }

    /// Remove every record matching all `filters`. No kind constraint is
    /// added, so an entry filter removes its document and its attributes.
    pub async fn delete_by_filter(
        &self,
        cancel: &CancellationToken,
        filters: Vec<AttrQuery>,
    ) -> Result<()> {
        let chain = self.clone();
        self.pool
            .run(cancel, move |_| async move {
                let label = filters
                    .iter()
                    .map(AttrQuery::to_filter)
                    .collect::<Vec<_>>()
                    .join(" AND ");
                chain
                    .store
                    .delete_by_filter(&filters)
                    .await
                    .map_err(|e| chain.failed(e, Phase::Delete, &label))?;
                tracing::debug!(
                    target: TRACING_TARGET,
                    filter = %label,
                    "deleted"
                );
                Ok(())
            })
            .await
    }

    pub async fn delete_entry(
        &self,
        cancel: &CancellationToken,
        namespace: &str,
        entry_id: &str,
    ) -> Result<()> {
        self.delete_by_filter(
            cancel,
            vec![
                AttrQuery::eq(fields::NAMESPACE, namespace),
                AttrQuery::eq(fields::ENTRY_ID, entry_id),
            ],
        )
        .await
    }

    pub async fn find_document(
        &self,
        cancel: &CancellationToken,
        namespace: &str,
        entry_id: &str,
    ) -> Result<Option<Document>> {
        let query = DocumentQuery::of_entry(namespace, entry_id);
        let docs = read(cancel, self.store.search(&query)).await?;
        Ok(docs.into_iter().next())
    }

    /// Like [`find_document`](Self::find_document), but a missing document
    /// is [`Error::NotFound`].
    pub async fn get_document(
        &self,
        cancel: &CancellationToken,
        namespace: &str,
        entry_id: &str,
    ) -> Result<Document> {
        self.find_document(cancel, namespace, entry_id)
            .await?
            .ok_or_else(|| Error::NotFound {
                kind: "document",
                name: entry_key(namespace, entry_id),
            })
    }

    pub async fn get_document_attrs(
        &self,
        cancel: &CancellationToken,
        namespace: &str,
        entry_id: &str,
    ) -> Result<Vec<DocumentAttr>> {
        let query = DocumentAttrQuery::of_entry(namespace, entry_id);
        read(cancel, self.store.filter_attr(&query)).await
    }

    pub async fn list_document_attrs(
        &self,
        cancel: &CancellationToken,
        namespace: &str,
        entry_ids: &[String],
    ) -> Result<Vec<DocumentAttr>> {
        let query = DocumentAttrQuery::of_entries(namespace, entry_ids);
        read(cancel, self.store.filter_attr(&query)).await
    }

    /// The document of an entry merged with its attributes.
    pub async fn get_entry(
        &self,
        cancel: &CancellationToken,
        namespace: &str,
        entry_id: &str,
    ) -> Result<Entry> {
        let document = self.get_document(cancel, namespace, entry_id).await?;
        let attrs = self.get_document_attrs(cancel, namespace, entry_id).await?;
        Ok(Entry::from_parts(document, &attrs))
    }

    /// Search documents, restricted to entries matched by `attr_queries`.
    ///
    /// Each attribute group resolves to candidate entry ids on its own;
    /// the join policy combines them. When groups were given but no
    /// candidate survives, the result is empty.
    pub async fn search(
        &self,
        cancel: &CancellationToken,
        mut query: DocumentQuery,
        attr_queries: Vec<DocumentAttrQuery>,
    ) -> Result<Vec<Document>> {
        if !query.attr_queries.iter().any(|aq| aq.attr == fields::KIND) {
            query.attr_queries.push(AttrQuery::kind(Kind::Document));
        }

        if !attr_queries.is_empty() {
            let mut groups = Vec::with_capacity(attr_queries.len());
            for group in &attr_queries {
                let attrs = read(cancel, self.store.filter_attr(group)).await?;
                tracing::debug!(
                    target: TRACING_TARGET,
                    group = %group,
                    hits = attrs.len(),
                    "attr group"
                );
                groups.push(attrs.into_iter().map(|a| a.entry_id).collect());
            }

            let candidates = self.join_policy.combine(groups);
            if candidates.is_empty() {
                tracing::debug!(target: TRACING_TARGET, "no candidate entries");
                return Ok(Vec::new());
            }
            query
                .attr_queries
                .push(AttrQuery::is_in(fields::ENTRY_ID, candidates));
        }

        tracing::debug!(target: TRACING_TARGET, query = %query, "searching");
        read(cancel, self.store.search(&query)).await
    }

    /// Search with a [`SearchFilter`], attaching highlighted snippets when
    /// the filter has free text.
    pub async fn search_filter(
        &self,
        cancel: &CancellationToken,
        filter: &SearchFilter,
    ) -> Result<Vec<Document>> {
        let mut docs = self
            .search(cancel, filter.document_query(), filter.attr_queries())
            .await?;
        let term = filter.search.trim();
        if !term.is_empty() {
            for doc in &mut docs {
                let plain = if doc.pure_content.is_empty() {
                    strip_markup(&doc.content)
                } else {
                    doc.pure_content.clone()
                };
                doc.search_context = search_context(&plain, term);
            }
        }
        Ok(docs)
    }

    fn failed(&self, err: Error, phase: Phase, entry: &str) -> Error {
        tracing::warn!(
            target: TRACING_TARGET,
            %entry,
            %phase,
            error = %err,
            "store call failed"
        );
        err.in_phase(phase, entry)
    }
}

impl std::fmt::Debug for Chain {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Chain")
            .field("pipeline", &self.pipeline)
            .field("pool", &self.pool.num())
            .field("join_policy", &self.join_policy)
            .finish_non_exhaustive()
    }
}

async fn read<T, F>(cancel: &CancellationToken, call: F) -> Result<T>
where
    F: Future<Output = Result<T>>,
{
    tokio::select! {
        biased;

        () = cancel.cancelled() => Err(Error::Timeout),
        result = call => result,
    }
}
