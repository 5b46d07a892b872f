//! Filter predicates and their translation into store requests.
//!
//! An [`AttrQuery`] is one `attr op value` predicate. A [`DocumentQuery`]
//! ANDs a list of them with free text, sort and pagination. A
//! [`DocumentAttrQuery`] is one attribute-match group, resolved on its own
//! into candidate entry ids; [`JoinPolicy`] decides how the candidates of
//! several groups are combined.

use std::{cmp::Ordering, collections::HashSet, fmt};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::model::{AttrKey, AttrValue, Document, Kind};

/// Record field names the stores can filter on.
pub mod fields {
    pub const ID: &str = "id";
    pub const KIND: &str = "kind";
    pub const NAMESPACE: &str = "namespace";
    pub const ENTRY_ID: &str = "entryId";
    pub const NAME: &str = "name";
    pub const SOURCE: &str = "source";
    pub const WEB_URL: &str = "webUrl";
    pub const KEY: &str = "key";
    pub const VALUE: &str = "value";
    pub const CREATED_AT: &str = "createdAt";
    pub const UPDATED_AT: &str = "updatedAt";
}

/// Upper bound on hits returned for one attribute group.
pub const ATTR_QUERY_LIMIT: usize = 10_000;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FilterOp {
    Eq,
    In,
    Gte,
    Lte,
    /// Case-insensitive substring of a text field.
    Contains,
}

impl fmt::Display for FilterOp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            FilterOp::Eq => "=",
            FilterOp::In => "IN",
            FilterOp::Gte => ">=",
            FilterOp::Lte => "<=",
            FilterOp::Contains => "CONTAINS",
        };
        f.write_str(s)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct AttrQuery {
    pub attr: String,
    pub op: FilterOp,
    pub value: Value,
}

impl AttrQuery {
    pub fn new(
        attr: impl Into<String>,
        op: FilterOp,
        value: impl Into<Value>,
    ) -> Self {
        Self {
            attr: attr.into(),
            op,
            value: value.into(),
        }
    }

    pub fn eq(attr: impl Into<String>, value: impl Into<Value>) -> Self {
        Self::new(attr, FilterOp::Eq, value)
    }

    pub fn is_in<I, S>(attr: impl Into<String>, values: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let values = values
            .into_iter()
            .map(|v| Value::String(v.into()))
            .collect::<Vec<_>>();
        Self::new(attr, FilterOp::In, Value::Array(values))
    }

    pub fn gte(attr: impl Into<String>, value: i64) -> Self {
        Self::new(attr, FilterOp::Gte, value)
    }

    pub fn lte(attr: impl Into<String>, value: i64) -> Self {
        Self::new(attr, FilterOp::Lte, value)
    }

    pub fn contains(
        attr: impl Into<String>,
        needle: impl Into<String>,
    ) -> Self {
        Self::new(attr, FilterOp::Contains, needle.into())
    }

    pub fn kind(kind: Kind) -> Self {
        Self::eq(fields::KIND, kind.as_str())
    }

    /// Render as `<attr> <op> <json(value)>`.
    pub fn to_filter(&self) -> String {
        format!("{} {} {}", self.attr, self.op, self.value)
    }

    /// Evaluate against a record's JSON form. A missing field never matches.
    pub fn matches(&self, record: &Value) -> bool {
        let Some(field) = record.get(&self.attr) else {
            return false;
        };
        match self.op {
            FilterOp::Eq => field == &self.value,
            FilterOp::In => self
                .value
                .as_array()
                .is_some_and(|values| values.contains(field)),
            FilterOp::Gte => compare(field, &self.value)
                .is_some_and(|o| o != Ordering::Less),
            FilterOp::Lte => compare(field, &self.value)
                .is_some_and(|o| o != Ordering::Greater),
            FilterOp::Contains => match (field, &self.value) {
                (Value::String(haystack), Value::String(needle)) => haystack
                    .to_lowercase()
                    .contains(&needle.to_lowercase()),
                _ => false,
            },
        }
    }
}

impl fmt::Display for AttrQuery {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_filter())
    }
}

fn compare(a: &Value, b: &Value) -> Option<Ordering> {
    match (a, b) {
        (Value::Number(x), Value::Number(y)) => {
            x.as_f64()?.partial_cmp(&y.as_f64()?)
        }
        (Value::String(x), Value::String(y)) => Some(x.cmp(y)),
        _ => None,
    }
}

fn write_filters(
    f: &mut fmt::Formatter<'_>,
    queries: &[AttrQuery],
) -> fmt::Result {
    for (i, aq) in queries.iter().enumerate() {
        if i > 0 {
            f.write_str(" AND ")?;
        }
        write!(f, "{aq}")?;
    }
    Ok(())
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Sort {
    pub attr: String,
    pub asc: bool,
}

impl fmt::Display for Sort {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let dir = if self.asc { "asc" } else { "desc" };
        write!(f, "{}:{dir}", self.attr)
    }
}

/// A document search: ANDed predicates, free text, sort and paging.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct DocumentQuery {
    pub attr_queries: Vec<AttrQuery>,
    pub search: String,
    pub hits_per_page: usize,
    pub page: usize,
    pub offset: usize,
    pub limit: usize,
    pub sort: Vec<Sort>,
}

impl DocumentQuery {
    /// The single document stored for `(namespace, entry_id)`.
    pub fn of_entry(namespace: &str, entry_id: &str) -> Self {
        Self {
            attr_queries: vec![
                AttrQuery::eq(fields::NAMESPACE, namespace),
                AttrQuery::eq(fields::ENTRY_ID, entry_id),
                AttrQuery::kind(Kind::Document),
            ],
            hits_per_page: 1,
            page: 1,
            ..Default::default()
        }
    }

    pub fn with_filter(mut self, aq: AttrQuery) -> Self {
        self.attr_queries.push(aq);
        self
    }

    pub fn matches(&self, record: &Value) -> bool {
        self.attr_queries.iter().all(|aq| aq.matches(record))
    }

    /// Order documents by the query's sort keys, first key first.
    pub fn sort_documents(&self, docs: &mut [Document]) {
        if self.sort.is_empty() {
            return;
        }
        docs.sort_by(|a, b| {
            for s in &self.sort {
                let ord = match s.attr.as_str() {
                    fields::NAME => a.name.cmp(&b.name),
                    fields::CREATED_AT => a.created_at.cmp(&b.created_at),
                    fields::UPDATED_AT => a.updated_at.cmp(&b.updated_at),
                    _ => Ordering::Equal,
                };
                let ord = if s.asc { ord } else { ord.reverse() };
                if ord != Ordering::Equal {
                    return ord;
                }
            }
            Ordering::Equal
        });
    }

    /// Apply `page`/`hits_per_page` when both are set, otherwise
    /// `offset`/`limit` (a zero limit keeps everything after the offset).
    /// A page past the addressable range is empty.
    pub fn paginate<T>(&self, items: Vec<T>) -> Vec<T> {
        if self.page > 0 && self.hits_per_page > 0 {
            let Some(skip) = (self.page - 1).checked_mul(self.hits_per_page)
            else {
                return Vec::new();
            };
            return items
                .into_iter()
                .skip(skip)
                .take(self.hits_per_page)
                .collect();
        }
        let iter = items.into_iter().skip(self.offset);
        if self.limit > 0 {
            iter.take(self.limit).collect()
        } else {
            iter.collect()
        }
    }
}

impl fmt::Display for DocumentQuery {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "search: [{}], attr query: [", self.search)?;
        write_filters(f, &self.attr_queries)?;
        f.write_str("]")
    }
}

/// One attribute-match group, resolved into matching entry ids.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct DocumentAttrQuery {
    pub attr_queries: Vec<AttrQuery>,
}

impl DocumentAttrQuery {
    pub fn new(attr_queries: Vec<AttrQuery>) -> Self {
        Self { attr_queries }
    }

    /// Every attribute of one entry.
    pub fn of_entry(namespace: &str, entry_id: &str) -> Self {
        Self::new(vec![
            AttrQuery::eq(fields::NAMESPACE, namespace),
            AttrQuery::eq(fields::ENTRY_ID, entry_id),
            AttrQuery::kind(Kind::Attr),
        ])
    }

    /// Every attribute of several entries.
    pub fn of_entries(namespace: &str, entry_ids: &[String]) -> Self {
        Self::new(vec![
            AttrQuery::eq(fields::NAMESPACE, namespace),
            AttrQuery::is_in(fields::ENTRY_ID, entry_ids.iter().cloned()),
            AttrQuery::kind(Kind::Attr),
        ])
    }

    /// The single live attribute row for `(namespace, entry_id, key)`.
    pub fn of_key(namespace: &str, entry_id: &str, key: AttrKey) -> Self {
        Self::new(vec![
            AttrQuery::eq(fields::NAMESPACE, namespace),
            AttrQuery::eq(fields::ENTRY_ID, entry_id),
            AttrQuery::eq(fields::KEY, key.as_str()),
            AttrQuery::kind(Kind::Attr),
        ])
    }

    /// Entries of `namespace` whose `key` attribute equals `value`.
    pub fn with_value(
        namespace: &str,
        key: AttrKey,
        value: &AttrValue,
    ) -> Self {
        Self::new(vec![
            AttrQuery::kind(Kind::Attr),
            AttrQuery::eq(fields::NAMESPACE, namespace),
            AttrQuery::eq(fields::KEY, key.as_str()),
            AttrQuery::eq(fields::VALUE, value.to_json()),
        ])
    }

    pub fn matches(&self, record: &Value) -> bool {
        self.attr_queries.iter().all(|aq| aq.matches(record))
    }
}

impl fmt::Display for DocumentAttrQuery {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write_filters(f, &self.attr_queries)
    }
}

/// How candidate entry ids from several attribute groups are combined.
///
/// `Union` pools every group's ids, so filters on different dimensions
/// behave as OR. `Intersect` keeps only ids present in every group.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum JoinPolicy {
    #[default]
    Union,
    Intersect,
}

impl JoinPolicy {
    /// Combine per-group candidates, keeping first-seen order without
    /// duplicates.
    pub fn combine(&self, groups: Vec<Vec<String>>) -> Vec<String> {
        let mut seen = HashSet::new();
        match self {
            JoinPolicy::Union => groups
                .into_iter()
                .flatten()
                .filter(|id| seen.insert(id.clone()))
                .collect(),
            JoinPolicy::Intersect => {
                let mut iter = groups.into_iter();
                let Some(first) = iter.next() else {
                    return Vec::new();
                };
                let rest: Vec<HashSet<String>> =
                    iter.map(|g| g.into_iter().collect()).collect();
                first
                    .into_iter()
                    .filter(|id| rest.iter().all(|g| g.contains(id)))
                    .filter(|id| seen.insert(id.clone()))
                    .collect()
            }
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum SortField {
    Name,
    CreatedAt,
    UpdatedAt,
}

impl SortField {
    pub fn attr(&self) -> &'static str {
        match self {
            SortField::Name => fields::NAME,
            SortField::CreatedAt => fields::CREATED_AT,
            SortField::UpdatedAt => fields::UPDATED_AT,
        }
    }
}

pub const DEFAULT_PAGE_SIZE: usize = 10;

/// Caller-facing search request, translated into one [`DocumentQuery`]
/// plus one [`DocumentAttrQuery`] per requested attribute dimension.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct SearchFilter {
    pub namespace: String,
    pub search: String,
    pub source: Option<String>,
    pub web_url: Option<String>,
    pub parent_id: Option<String>,
    pub mark: Option<bool>,
    pub unread: Option<bool>,
    /// Substring the document name must contain, ignoring case.
    pub fuzzy_name: Option<String>,
    pub created_at_start: Option<DateTime<Utc>>,
    pub created_at_end: Option<DateTime<Utc>>,
    pub updated_at_start: Option<DateTime<Utc>>,
    pub updated_at_end: Option<DateTime<Utc>>,
    pub page: usize,
    pub page_size: usize,
    pub sort: Option<SortField>,
    pub desc: bool,
}

impl SearchFilter {
    pub fn new(namespace: impl Into<String>) -> Self {
        Self {
            namespace: namespace.into(),
            page: 1,
            page_size: DEFAULT_PAGE_SIZE,
            ..Default::default()
        }
    }

    pub fn document_query(&self) -> DocumentQuery {
        let mut q = DocumentQuery {
            attr_queries: vec![AttrQuery::kind(Kind::Document)],
            search: self.search.clone(),
            page: self.page.max(1),
            hits_per_page: if self.page_size == 0 {
                DEFAULT_PAGE_SIZE
            } else {
                self.page_size
            },
            ..Default::default()
        };
        if !self.namespace.is_empty() {
            q.attr_queries.push(AttrQuery::eq(
                fields::NAMESPACE,
                self.namespace.as_str(),
            ));
        }
        let fuzzy_name = self.fuzzy_name.as_deref().filter(|n| !n.is_empty());
        if let Some(name) = fuzzy_name {
            q.attr_queries.push(AttrQuery::contains(fields::NAME, name));
        }
        if let Some(source) = &self.source {
            q.attr_queries
                .push(AttrQuery::eq(fields::SOURCE, source.as_str()));
        }
        if let Some(web_url) = &self.web_url {
            q.attr_queries
                .push(AttrQuery::eq(fields::WEB_URL, web_url.as_str()));
        }
        let ranges = [
            (fields::CREATED_AT, self.created_at_start, FilterOp::Gte),
            (fields::CREATED_AT, self.created_at_end, FilterOp::Lte),
            (fields::UPDATED_AT, self.updated_at_start, FilterOp::Gte),
            (fields::UPDATED_AT, self.updated_at_end, FilterOp::Lte),
        ];
        for (attr, bound, op) in ranges {
            if let Some(t) = bound {
                q.attr_queries.push(AttrQuery::new(attr, op, t.timestamp()));
            }
        }
        if let Some(field) = self.sort {
            q.sort.push(Sort {
                attr: field.attr().to_string(),
                asc: !self.desc,
            });
        }
        q
    }

    pub fn attr_queries(&self) -> Vec<DocumentAttrQuery> {
        let mut groups = Vec::new();
        if let Some(parent_id) = &self.parent_id {
            groups.push(DocumentAttrQuery::with_value(
                &self.namespace,
                AttrKey::ParentId,
                &AttrValue::Text(parent_id.clone()),
            ));
        }
        if let Some(mark) = self.mark {
            groups.push(DocumentAttrQuery::with_value(
                &self.namespace,
                AttrKey::Mark,
                &AttrValue::Bool(mark),
            ));
        }
        if let Some(unread) = self.unread {
            groups.push(DocumentAttrQuery::with_value(
                &self.namespace,
                AttrKey::UnRead,
                &AttrValue::Bool(unread),
            ));
        }
        groups
    }
}
