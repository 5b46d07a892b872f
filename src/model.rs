//! The two record kinds kept in a [`DocStore`](crate::store::DocStore).
//!
//! A [`Document`] is written once per `(namespace, entryId)`. Everything
//! that changes afterwards (read state, marks, grouping) lives in sparse
//! [`DocumentAttr`] rows keyed by `(namespace, entryId, key)`. Both kinds
//! share one store and are told apart by the `kind` tag of [`Record`].

use std::{fmt, str::FromStr};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

/// Discriminator stored in the `kind` field of every record.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Kind {
    Document,
    Attr,
}

impl Kind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Kind::Document => "document",
            Kind::Attr => "attr",
        }
    }
}

impl fmt::Display for Kind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Shared view over anything persisted through `DocStore::store`.
pub trait DocPtr: fmt::Display {
    fn id(&self) -> &str;
    fn entry_id(&self) -> &str;
    fn kind(&self) -> Kind;
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Document {
    #[serde(default)]
    pub id: String,
    pub namespace: String,
    pub entry_id: String,
    #[serde(default)]
    pub name: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub source: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub web_url: String,

    #[serde(default)]
    pub content: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub summary: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub header_image: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub sub_content: String,

    /// Markup-free content, filled by the `docProcess` plugin.
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub pure_content: String,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub title_tokens: Vec<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub content_tokens: Vec<String>,

    #[serde(default, with = "chrono::serde::ts_seconds")]
    pub created_at: DateTime<Utc>,
    #[serde(default, with = "chrono::serde::ts_seconds")]
    pub updated_at: DateTime<Utc>,

    /// Highlighted snippets around the search term. Only set on search
    /// results, never persisted.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub search_context: Vec<String>,
}

impl Document {
    pub fn new(
        namespace: impl Into<String>,
        entry_id: impl Into<String>,
        name: impl Into<String>,
        content: impl Into<String>,
    ) -> Self {
        let now = Utc::now();
        Self {
            namespace: namespace.into(),
            entry_id: entry_id.into(),
            name: name.into(),
            content: content.into(),
            created_at: now,
            updated_at: now,
            ..Default::default()
        }
    }

    /// `namespace/entryId`, used in logs and error messages.
    pub fn entry_key(&self) -> String {
        entry_key(&self.namespace, &self.entry_id)
    }
}

impl DocPtr for Document {
    fn id(&self) -> &str {
        &self.id
    }

    fn entry_id(&self) -> &str {
        &self.entry_id
    }

    fn kind(&self) -> Kind {
        Kind::Document
    }
}

impl fmt::Display for Document {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "EntryId({}) {}", self.entry_id, self.name)
    }
}

/// The attribute keys an entry can carry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum AttrKey {
    #[serde(rename = "parentId")]
    ParentId,
    #[serde(rename = "mark")]
    Mark,
    #[serde(rename = "unRead")]
    UnRead,
}

impl AttrKey {
    pub const ALL: [AttrKey; 3] =
        [AttrKey::ParentId, AttrKey::Mark, AttrKey::UnRead];

    pub fn as_str(&self) -> &'static str {
        match self {
            AttrKey::ParentId => "parentId",
            AttrKey::Mark => "mark",
            AttrKey::UnRead => "unRead",
        }
    }
}

impl fmt::Display for AttrKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for AttrKey {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        AttrKey::ALL
            .into_iter()
            .find(|k| k.as_str().eq_ignore_ascii_case(s))
            .ok_or_else(|| Error::Config(format!("unknown attribute key: {s}")))
    }
}

/// Scalar attribute value. `parentId` holds text, `mark` and `unRead`
/// hold booleans.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum AttrValue {
    Bool(bool),
    Text(String),
}

impl AttrValue {
    pub fn as_bool(&self) -> Option<bool> {
        match self {
            AttrValue::Bool(b) => Some(*b),
            AttrValue::Text(_) => None,
        }
    }

    pub fn as_text(&self) -> Option<&str> {
        match self {
            AttrValue::Text(s) => Some(s),
            AttrValue::Bool(_) => None,
        }
    }

    pub fn to_json(&self) -> serde_json::Value {
        match self {
            AttrValue::Bool(b) => serde_json::Value::Bool(*b),
            AttrValue::Text(s) => serde_json::Value::String(s.clone()),
        }
    }
}

impl From<bool> for AttrValue {
    fn from(b: bool) -> Self {
        AttrValue::Bool(b)
    }
}

impl From<&str> for AttrValue {
    fn from(s: &str) -> Self {
        AttrValue::Text(s.to_string())
    }
}

impl From<String> for AttrValue {
    fn from(s: String) -> Self {
        AttrValue::Text(s)
    }
}

impl fmt::Display for AttrValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AttrValue::Bool(b) => write!(f, "{b}"),
            AttrValue::Text(s) => f.write_str(s),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DocumentAttr {
    #[serde(default)]
    pub id: String,
    pub namespace: String,
    pub entry_id: String,
    pub key: AttrKey,
    pub value: AttrValue,
}

impl DocumentAttr {
    pub fn new(
        namespace: impl Into<String>,
        entry_id: impl Into<String>,
        key: AttrKey,
        value: impl Into<AttrValue>,
    ) -> Self {
        Self {
            id: String::new(),
            namespace: namespace.into(),
            entry_id: entry_id.into(),
            key,
            value: value.into(),
        }
    }

    pub fn entry_key(&self) -> String {
        entry_key(&self.namespace, &self.entry_id)
    }
}

impl DocPtr for DocumentAttr {
    fn id(&self) -> &str {
        &self.id
    }

    fn entry_id(&self) -> &str {
        &self.entry_id
    }

    fn kind(&self) -> Kind {
        Kind::Attr
    }
}

impl fmt::Display for DocumentAttr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "EntryId({}) {}: {}", self.entry_id, self.key, self.value)
    }
}

/// A single persisted row, tagged by its `kind`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "lowercase")]
pub enum Record {
    Document(Document),
    Attr(DocumentAttr),
}

impl Record {
    pub fn namespace(&self) -> &str {
        match self {
            Record::Document(d) => &d.namespace,
            Record::Attr(a) => &a.namespace,
        }
    }

    /// The camelCase JSON object the store filters against.
    pub fn to_json(&self) -> Result<serde_json::Value> {
        Ok(serde_json::to_value(self)?)
    }
}

impl DocPtr for Record {
    fn id(&self) -> &str {
        match self {
            Record::Document(d) => d.id(),
            Record::Attr(a) => a.id(),
        }
    }

    fn entry_id(&self) -> &str {
        match self {
            Record::Document(d) => d.entry_id(),
            Record::Attr(a) => a.entry_id(),
        }
    }

    fn kind(&self) -> Kind {
        match self {
            Record::Document(_) => Kind::Document,
            Record::Attr(_) => Kind::Attr,
        }
    }
}

impl fmt::Display for Record {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Record::Document(d) => d.fmt(f),
            Record::Attr(a) => a.fmt(f),
        }
    }
}

impl From<Document> for Record {
    fn from(d: Document) -> Self {
        Record::Document(d)
    }
}

impl From<DocumentAttr> for Record {
    fn from(a: DocumentAttr) -> Self {
        Record::Attr(a)
    }
}

/// A document together with its attributes.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Entry {
    #[serde(flatten)]
    pub document: Document,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub parent_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub marked: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub unread: Option<bool>,
}

impl Entry {
    pub fn from_parts(document: Document, attrs: &[DocumentAttr]) -> Self {
        let mut entry = Self {
            document,
            parent_id: None,
            marked: None,
            unread: None,
        };
        for attr in attrs {
            match attr.key {
                AttrKey::ParentId => {
                    entry.parent_id = Some(attr.value.to_string())
                }
                AttrKey::Mark => entry.marked = attr.value.as_bool(),
                AttrKey::UnRead => entry.unread = attr.value.as_bool(),
            }
        }
        entry
    }
}

pub fn entry_key(namespace: &str, entry_id: &str) -> String {
    format!("{namespace}/{entry_id}")
}
