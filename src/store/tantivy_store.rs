use std::{
    collections::HashSet,
    ops::Bound,
    path::Path,
    sync::{Arc, Mutex},
};

use async_trait::async_trait;
use tantivy::{
    Index,
    IndexReader,
    IndexWriter,
    ReloadPolicy,
    TantivyDocument,
    Term,
    collector::{Count, TopDocs},
    query::{
        AllQuery,
        BooleanQuery,
        BoostQuery,
        EmptyQuery,
        Occur,
        Query,
        RangeQuery,
        RegexQuery,
        TermQuery,
    },
    schema::*,
    tokenizer::{LowerCaser, TextAnalyzer, WhitespaceTokenizer},
};

use super::{DocStore, TRACING_TARGET, ensure_id, require_filters};
use crate::{
    error::{Error, Result},
    model::{DocPtr, Document, DocumentAttr, Kind, Record},
    query::{
        ATTR_QUERY_LIMIT,
        AttrQuery,
        DocumentAttrQuery,
        DocumentQuery,
        FilterOp,
        fields,
    },
    text_util::segment,
};

/// Index-only field names that are not record attributes.
mod index_fields {
    pub const NAME_LOWER: &str = "nameLower";
    pub const TITLE_TOKENS: &str = "titleTokens";
    pub const CONTENT_TOKENS: &str = "contentTokens";
    pub const RECORD: &str = "record";
}

const TOKENIZER: &str = "search_tokens";
const TITLE_BOOST: f32 = 2.0;

#[derive(Clone, Copy)]
struct SchemaFields {
    id: Field,
    kind: Field,
    namespace: Field,
    entry_id: Field,
    name: Field,
    source: Field,
    web_url: Field,
    key: Field,
    value: Field,
    created_at: Field,
    updated_at: Field,
    name_lower: Field,
    title_tokens: Field,
    content_tokens: Field,
    record: Field,
}

impl SchemaFields {
    fn resolve(schema: &Schema) -> Result<Self> {
        Ok(Self {
            id: schema.get_field(fields::ID)?,
            kind: schema.get_field(fields::KIND)?,
            namespace: schema.get_field(fields::NAMESPACE)?,
            entry_id: schema.get_field(fields::ENTRY_ID)?,
            name: schema.get_field(fields::NAME)?,
            source: schema.get_field(fields::SOURCE)?,
            web_url: schema.get_field(fields::WEB_URL)?,
            key: schema.get_field(fields::KEY)?,
            value: schema.get_field(fields::VALUE)?,
            created_at: schema.get_field(fields::CREATED_AT)?,
            updated_at: schema.get_field(fields::UPDATED_AT)?,
            name_lower: schema.get_field(index_fields::NAME_LOWER)?,
            title_tokens: schema.get_field(index_fields::TITLE_TOKENS)?,
            content_tokens: schema.get_field(index_fields::CONTENT_TOKENS)?,
            record: schema.get_field(index_fields::RECORD)?,
        })
    }

    /// The field a predicate on `attr` is evaluated against.
    fn filterable(&self, attr: &str) -> Option<(Field, FieldKind)> {
        let found = match attr {
            fields::ID => (self.id, FieldKind::Text),
            fields::KIND => (self.kind, FieldKind::Text),
            fields::NAMESPACE => (self.namespace, FieldKind::Text),
            fields::ENTRY_ID => (self.entry_id, FieldKind::Text),
            fields::NAME => (self.name, FieldKind::Text),
            fields::SOURCE => (self.source, FieldKind::Text),
            fields::WEB_URL => (self.web_url, FieldKind::Text),
            fields::KEY => (self.key, FieldKind::Text),
            fields::VALUE => (self.value, FieldKind::Json),
            fields::CREATED_AT => (self.created_at, FieldKind::Timestamp),
            fields::UPDATED_AT => (self.updated_at, FieldKind::Timestamp),
            _ => return None,
        };
        Some(found)
    }
}

/// How a filterable field stores its value.
#[derive(Clone, Copy, PartialEq, Eq)]
enum FieldKind {
    /// Raw string.
    Text,
    /// JSON text of the value, so `"1"` and `1` stay distinct.
    Json,
    /// Unix seconds.
    Timestamp,
}

fn build_schema() -> Schema {
    let mut builder = Schema::builder();

    for name in [
        fields::ID,
        fields::KIND,
        fields::NAMESPACE,
        fields::ENTRY_ID,
        fields::NAME,
        fields::SOURCE,
        fields::WEB_URL,
        fields::KEY,
        fields::VALUE,
        index_fields::NAME_LOWER,
    ] {
        builder.add_text_field(name, STRING);
    }
    builder.add_i64_field(fields::CREATED_AT, INDEXED | FAST);
    builder.add_i64_field(fields::UPDATED_AT, INDEXED | FAST);

    let token_opts = TextOptions::default().set_indexing_options(
        TextFieldIndexing::default()
            .set_tokenizer(TOKENIZER)
            .set_index_option(IndexRecordOption::WithFreqs),
    );
    builder.add_text_field(index_fields::TITLE_TOKENS, token_opts.clone());
    builder.add_text_field(index_fields::CONTENT_TOKENS, token_opts);

    builder.add_text_field(index_fields::RECORD, STORED);
    builder.build()
}

/// Tokens arrive pre-segmented, so splitting on whitespace is enough.
fn register_tokenizers(index: &Index) {
    let analyzer = TextAnalyzer::builder(WhitespaceTokenizer::default())
        .filter(LowerCaser)
        .build();
    index.tokenizers().register(TOKENIZER, analyzer);
}

struct Inner {
    reader: IndexReader,
    writer: Mutex<IndexWriter>,
    fields: SchemaFields,
}

/// A Tantivy index holding both record kinds.
///
/// Every write commits and reloads the reader before returning, so reads
/// issued afterwards observe it. Index work runs on the blocking pool.
#[derive(Clone)]
pub struct TantivyDocStore {
    inner: Arc<Inner>,
}

impl TantivyDocStore {
    /// Open or create an index at the given directory.
    pub fn open(dir: &Path, memory_budget: usize) -> Result<Self> {
        std::fs::create_dir_all(dir)?;

        let mmap_dir = tantivy::directory::MmapDirectory::open(dir)
            .map_err(|e| tantivy::TantivyError::SystemError(e.to_string()))?;
        let index = if Index::exists(&mmap_dir)
            .map_err(|e| tantivy::TantivyError::SystemError(e.to_string()))?
        {
            Index::open(mmap_dir)?
        } else {
            Index::create(
                mmap_dir,
                build_schema(),
                tantivy::IndexSettings::default(),
            )?
        };

        tracing::debug!(
            target: TRACING_TARGET,
            dir = %dir.display(),
            "opened index"
        );
        Self::from_index(index, memory_budget)
    }

    /// Create an in-memory index.
    pub fn open_in_ram(memory_budget: usize) -> Result<Self> {
        Self::from_index(Index::create_in_ram(build_schema()), memory_budget)
    }

    fn from_index(index: Index, memory_budget: usize) -> Result<Self> {
        register_tokenizers(&index);
        let fields = SchemaFields::resolve(&index.schema())?;
        let reader: IndexReader = index
            .reader_builder()
            .reload_policy(ReloadPolicy::Manual)
            .try_into()?;
        let writer = index.writer(memory_budget)?;

        Ok(Self {
            inner: Arc::new(Inner {
                reader,
                writer: Mutex::new(writer),
                fields,
            }),
        })
    }

    async fn blocking<F, T>(&self, work: F) -> Result<T>
    where
        F: FnOnce(&Inner) -> Result<T> + Send + 'static,
        T: Send + 'static,
    {
        let inner = self.inner.clone();
        tokio::task::spawn_blocking(move || work(&inner))
            .await
            .map_err(|e| Error::Worker(e.to_string()))?
    }
}

impl std::fmt::Debug for TantivyDocStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TantivyDocStore").finish_non_exhaustive()
    }
}

impl Inner {
    fn lock_writer(&self) -> Result<std::sync::MutexGuard<'_, IndexWriter>> {
        self.writer
            .lock()
            .map_err(|_| Error::Worker("index writer lock poisoned".into()))
    }

    fn commit(&self, writer: &mut IndexWriter) -> Result<()> {
        writer.commit()?;
        self.reader.reload()?;
        Ok(())
    }

    fn to_tantivy(&self, record: &Record) -> Result<TantivyDocument> {
        let f = &self.fields;
        let mut doc = TantivyDocument::default();
        doc.add_text(f.id, record.id());
        doc.add_text(f.kind, record.kind().as_str());
        doc.add_text(f.namespace, record.namespace());
        doc.add_text(f.entry_id, record.entry_id());

        match record {
            Record::Document(d) => {
                doc.add_text(f.name, &d.name);
                doc.add_text(f.name_lower, d.name.to_lowercase());
                doc.add_text(f.source, &d.source);
                doc.add_text(f.web_url, &d.web_url);
                doc.add_i64(f.created_at, d.created_at.timestamp());
                doc.add_i64(f.updated_at, d.updated_at.timestamp());

                // Fall back to segmenting here when docProcess did not run.
                let title = if d.title_tokens.is_empty() {
                    segment(&d.name)
                } else {
                    d.title_tokens.clone()
                };
                let content = if d.content_tokens.is_empty() {
                    segment(&d.pure_content)
                } else {
                    d.content_tokens.clone()
                };
                doc.add_text(f.title_tokens, title.join(" "));
                doc.add_text(f.content_tokens, content.join(" "));
            }
            Record::Attr(a) => {
                doc.add_text(f.key, a.key.as_str());
                doc.add_text(f.value, serde_json::to_string(&a.value)?);
            }
        }

        doc.add_text(f.record, serde_json::to_string(record)?);
        Ok(doc)
    }

    fn upsert(&self, writer: &IndexWriter, record: &Record) -> Result<()> {
        writer.delete_term(Term::from_field_text(self.fields.id, record.id()));
        writer.add_document(self.to_tantivy(record)?)?;
        Ok(())
    }

    fn term(
        &self,
        field: Field,
        kind: FieldKind,
        aq: &AttrQuery,
        value: &serde_json::Value,
    ) -> Result<Term> {
        let wrong_shape =
            || Error::InvalidQuery(format!("{aq}: unexpected value {value}"));
        match kind {
            FieldKind::Text => {
                let text = value.as_str().ok_or_else(wrong_shape)?;
                Ok(Term::from_field_text(field, text))
            }
            FieldKind::Json => {
                Ok(Term::from_field_text(field, &value.to_string()))
            }
            FieldKind::Timestamp => {
                let secs = value.as_i64().ok_or_else(wrong_shape)?;
                Ok(Term::from_field_i64(field, secs))
            }
        }
    }

    /// Translate one predicate into a Tantivy query.
    fn filter_query(&self, aq: &AttrQuery) -> Result<Box<dyn Query>> {
        let (field, kind) =
            self.fields.filterable(&aq.attr).ok_or_else(|| {
                Error::InvalidQuery(format!("cannot filter on {}", aq.attr))
            })?;

        let query: Box<dyn Query> = match aq.op {
            FilterOp::Eq => Box::new(TermQuery::new(
                self.term(field, kind, aq, &aq.value)?,
                IndexRecordOption::Basic,
            )),
            FilterOp::In => {
                let values = aq.value.as_array().ok_or_else(|| {
                    Error::InvalidQuery(format!("{aq}: IN expects a list"))
                })?;
                if values.is_empty() {
                    return Ok(Box::new(EmptyQuery));
                }
                let clauses = values
                    .iter()
                    .map(|v| -> Result<(Occur, Box<dyn Query>)> {
                        let term = self.term(field, kind, aq, v)?;
                        let q: Box<dyn Query> = Box::new(TermQuery::new(
                            term,
                            IndexRecordOption::Basic,
                        ));
                        Ok((Occur::Should, q))
                    })
                    .collect::<Result<Vec<_>>>()?;
                Box::new(BooleanQuery::new(clauses))
            }
            FilterOp::Gte => Box::new(RangeQuery::new(
                Bound::Included(self.term(field, kind, aq, &aq.value)?),
                Bound::Unbounded,
            )),
            FilterOp::Lte => Box::new(RangeQuery::new(
                Bound::Unbounded,
                Bound::Included(self.term(field, kind, aq, &aq.value)?),
            )),
            FilterOp::Contains => self.contains_query(aq)?,
        };
        Ok(query)
    }

    /// Substring match on the lowercased raw name.
    fn contains_query(&self, aq: &AttrQuery) -> Result<Box<dyn Query>> {
        if aq.attr != fields::NAME {
            return Err(Error::InvalidQuery(format!(
                "{aq}: CONTAINS is only supported on {}",
                fields::NAME
            )));
        }
        let needle = aq.value.as_str().ok_or_else(|| {
            Error::InvalidQuery(format!("{aq}: CONTAINS expects text"))
        })?;
        let pattern = format!(".*{}.*", regex::escape(&needle.to_lowercase()));
        Ok(Box::new(RegexQuery::from_pattern(
            &pattern,
            self.fields.name_lower,
        )?))
    }

    /// Any segmented token of `search` in the title or content, title
    /// matches weighted higher.
    fn text_query(&self, search: &str) -> Option<Box<dyn Query>> {
        let f = &self.fields;
        let mut seen = HashSet::new();
        let mut clauses: Vec<(Occur, Box<dyn Query>)> = Vec::new();
        for token in segment(search) {
            let token = token.to_lowercase();
            if !seen.insert(token.clone()) {
                continue;
            }
            let title = TermQuery::new(
                Term::from_field_text(f.title_tokens, &token),
                IndexRecordOption::WithFreqs,
            );
            clauses.push((
                Occur::Should,
                Box::new(BoostQuery::new(Box::new(title), TITLE_BOOST)),
            ));
            clauses.push((
                Occur::Should,
                Box::new(TermQuery::new(
                    Term::from_field_text(f.content_tokens, &token),
                    IndexRecordOption::WithFreqs,
                )),
            ));
        }
        if clauses.is_empty() {
            None
        } else {
            Some(Box::new(BooleanQuery::new(clauses)))
        }
    }

    fn conjunction(
        &self,
        filters: &[AttrQuery],
        search: &str,
    ) -> Result<Box<dyn Query>> {
        let mut clauses = filters
            .iter()
            .map(|aq| -> Result<(Occur, Box<dyn Query>)> {
                Ok((Occur::Must, self.filter_query(aq)?))
            })
            .collect::<Result<Vec<_>>>()?;
        if let Some(text) = self.text_query(search) {
            clauses.push((Occur::Must, text));
        }
        if clauses.is_empty() {
            return Ok(Box::new(AllQuery));
        }
        Ok(Box::new(BooleanQuery::new(clauses)))
    }

    /// Matching records, best score first.
    fn collect(
        &self,
        query: &dyn Query,
        limit: Option<usize>,
    ) -> Result<Vec<Record>> {
        let searcher = self.reader.searcher();
        let total = searcher.search(query, &Count)?;
        let limit = limit.map_or(total, |l| l.min(total));
        if limit == 0 {
            return Ok(Vec::new());
        }

        let top_docs = searcher.search(query, &TopDocs::with_limit(limit))?;
        let mut records = Vec::with_capacity(top_docs.len());
        for (_score, address) in top_docs {
            let doc: TantivyDocument = searcher.doc(address)?;
            let json = doc
                .get_first(self.fields.record)
                .and_then(|v| v.as_str())
                .unwrap_or("");
            records.push(serde_json::from_str(json)?);
        }
        Ok(records)
    }

    fn document_exists(&self, namespace: &str, entry_id: &str) -> Result<bool> {
        let filters = DocumentQuery::of_entry(namespace, entry_id).attr_queries;
        let query = self.conjunction(&filters, "")?;
        Ok(self.reader.searcher().search(&*query, &Count)? > 0)
    }
}

#[async_trait]
impl DocStore for TantivyDocStore {
    async fn store(&self, mut record: Record) -> Result<()> {
        ensure_id(&mut record);
        self.blocking(move |inner| {
            let mut writer = inner.lock_writer()?;
            inner.upsert(&writer, &record)?;
            inner.commit(&mut writer)?;
            tracing::debug!(target: TRACING_TARGET, record = %record, "stored");
            Ok(())
        })
        .await
    }

    async fn insert_document_if_absent(&self, doc: Document) -> Result<bool> {
        let mut record = Record::Document(doc);
        ensure_id(&mut record);
        self.blocking(move |inner| {
            // Writes only happen under this lock and always reload the
            // reader, so the check sees every committed document.
            let mut writer = inner.lock_writer()?;
            if inner.document_exists(record.namespace(), record.entry_id())? {
                return Ok(false);
            }
            inner.upsert(&writer, &record)?;
            inner.commit(&mut writer)?;
            Ok(true)
        })
        .await
    }

    async fn search(&self, query: &DocumentQuery) -> Result<Vec<Document>> {
        let query = query.clone();
        self.blocking(move |inner| {
            let tantivy_query =
                inner.conjunction(&query.attr_queries, &query.search)?;
            let mut docs: Vec<Document> = inner
                .collect(&*tantivy_query, None)?
                .into_iter()
                .filter_map(|record| match record {
                    Record::Document(d) => Some(d),
                    Record::Attr(_) => None,
                })
                .collect();
            query.sort_documents(&mut docs);
            Ok(query.paginate(docs))
        })
        .await
    }

    async fn filter_attr(
        &self,
        query: &DocumentAttrQuery,
    ) -> Result<Vec<DocumentAttr>> {
        let mut filters = query.attr_queries.clone();
        if !filters.iter().any(|aq| aq.attr == fields::KIND) {
            filters.push(AttrQuery::kind(Kind::Attr));
        }
        self.blocking(move |inner| {
            let tantivy_query = inner.conjunction(&filters, "")?;
            Ok(inner
                .collect(&*tantivy_query, Some(ATTR_QUERY_LIMIT))?
                .into_iter()
                .filter_map(|record| match record {
                    Record::Attr(a) => Some(a),
                    Record::Document(_) => None,
                })
                .collect())
        })
        .await
    }

    async fn delete_by_filter(&self, filters: &[AttrQuery]) -> Result<()> {
        require_filters(filters)?;
        let filters = filters.to_vec();
        self.blocking(move |inner| {
            let query = inner.conjunction(&filters, "")?;
            let mut writer = inner.lock_writer()?;
            writer.delete_query(query)?;
            inner.commit(&mut writer)?;
            tracing::debug!(
                target: TRACING_TARGET,
                filters = filters.len(),
                "deleted by filter"
            );
            Ok(())
        })
        .await
    }
}
