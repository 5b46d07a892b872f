use std::sync::{
    Arc,
    atomic::{AtomicUsize, Ordering},
};

use async_trait::async_trait;
use docchain::{
    AdmissionPool,
    AttrKey,
    AttrUpdate,
    AttrValue,
    Chain,
    DocStore,
    Document,
    DocumentAttr,
    Error,
    Record,
    StoreOutcome,
    error::Phase,
    plugin::{Pipeline, Plugin},
    query::{
        AttrQuery,
        DocumentAttrQuery,
        DocumentQuery,
        JoinPolicy,
        SearchFilter,
        SortField,
        fields,
    },
    store::{MemoryDocStore, TantivyDocStore},
};
use tokio_util::sync::CancellationToken;

const NS: &str = "ns";

fn stores() -> Vec<(&'static str, Arc<dyn DocStore>)> {
    let memory: Arc<dyn DocStore> = Arc::new(MemoryDocStore::new());
    let tantivy: Arc<dyn DocStore> =
        Arc::new(TantivyDocStore::open_in_ram(15_000_000).unwrap());
    vec![("memory", memory), ("tantivy", tantivy)]
}

fn chain_over(store: Arc<dyn DocStore>) -> Chain {
    Chain::new(store, Pipeline::standard(), Arc::new(AdmissionPool::new(10)))
}

fn doc(entry: &str, name: &str, content: &str) -> Document {
    Document::new(NS, entry, name, content)
}

fn attr(
    entry: &str,
    key: AttrKey,
    value: impl Into<AttrValue>,
) -> DocumentAttr {
    DocumentAttr::new(NS, entry, key, value)
}

async fn entry_ids(
    chain: &Chain,
    query: DocumentQuery,
    groups: Vec<DocumentAttrQuery>,
) -> Vec<String> {
    let cancel = CancellationToken::new();
    let mut ids: Vec<String> = chain
        .search(&cancel, query, groups)
        .await
        .unwrap()
        .into_iter()
        .map(|d| d.entry_id)
        .collect();
    ids.sort();
    ids
}

fn parent_is(parent: &str) -> DocumentAttrQuery {
    DocumentAttrQuery::with_value(NS, AttrKey::ParentId, &parent.into())
}

fn marked() -> DocumentAttrQuery {
    DocumentAttrQuery::with_value(NS, AttrKey::Mark, &true.into())
}

/// Entries 11 and 12 under parent 1, entry 21 under parent 2; 11 and 21
/// are marked.
async fn seed(chain: &Chain) {
    let cancel = CancellationToken::new();
    for (entry, parent) in [("11", "1"), ("12", "1"), ("21", "2")] {
        chain
            .store(&cancel, doc(entry, &format!("doc {entry}"), "<p>body</p>"))
            .await
            .unwrap();
        chain
            .store_attr(&cancel, attr(entry, AttrKey::ParentId, parent))
            .await
            .unwrap();
    }
    for entry in ["11", "21"] {
        chain
            .store_attr(&cancel, attr(entry, AttrKey::Mark, true))
            .await
            .unwrap();
    }
}

#[tokio::test]
async fn second_store_keeps_first_content() {
    for (name, store) in stores() {
        let chain = chain_over(store);
        let cancel = CancellationToken::new();

        let first = chain
            .store(&cancel, doc("11", "title", "<p>first</p>"))
            .await
            .unwrap();
        assert!(first.is_created(), "{name}");

        let second = chain
            .store(&cancel, doc("11", "title", "<p>second</p>"))
            .await
            .unwrap();
        assert_eq!(second, StoreOutcome::AlreadyExists, "{name}");

        let stored = chain.get_document(&cancel, NS, "11").await.unwrap();
        assert_eq!(stored.content, "<p>first</p>", "{name}");
        assert_eq!(stored.sub_content, "first", "{name}");
    }
}

#[tokio::test]
async fn same_entry_in_other_namespace_is_separate() {
    for (name, store) in stores() {
        let chain = chain_over(store);
        let cancel = CancellationToken::new();

        chain.store(&cancel, doc("11", "a", "")).await.unwrap();
        let other = chain
            .store(&cancel, Document::new("other", "11", "b", ""))
            .await
            .unwrap();
        assert!(other.is_created(), "{name}");
        assert_eq!(
            chain.get_document(&cancel, "other", "11").await.unwrap().name,
            "b",
            "{name}"
        );
    }
}

#[tokio::test]
async fn store_attr_replaces_value() {
    for (name, store) in stores() {
        let chain = chain_over(store);
        let cancel = CancellationToken::new();

        chain
            .store_attr(&cancel, attr("11", AttrKey::ParentId, "1"))
            .await
            .unwrap();
        chain
            .store_attr(&cancel, attr("11", AttrKey::ParentId, "2"))
            .await
            .unwrap();

        let attrs = chain.get_document_attrs(&cancel, NS, "11").await.unwrap();
        assert_eq!(attrs.len(), 1, "{name}");
        assert_eq!(attrs[0].key, AttrKey::ParentId, "{name}");
        assert_eq!(attrs[0].value.as_text(), Some("2"), "{name}");
    }
}

#[tokio::test]
async fn update_attrs_touches_only_given_keys() {
    for (name, store) in stores() {
        let chain = chain_over(store);
        let cancel = CancellationToken::new();
        seed(&chain).await;

        let update = AttrUpdate {
            unread: Some(false),
            ..Default::default()
        };
        chain.update_attrs(&cancel, NS, "11", &update).await.unwrap();

        let entry = chain.get_entry(&cancel, NS, "11").await.unwrap();
        assert_eq!(entry.parent_id.as_deref(), Some("1"), "{name}");
        assert_eq!(entry.marked, Some(true), "{name}");
        assert_eq!(entry.unread, Some(false), "{name}");

        let listed = chain
            .list_document_attrs(&cancel, NS, &["11".into(), "12".into()])
            .await
            .unwrap();
        assert_eq!(listed.len(), 4, "{name}");
    }
}

#[tokio::test]
async fn search_by_single_attribute() {
    for (name, store) in stores() {
        let chain = chain_over(store);
        seed(&chain).await;

        let ids =
            entry_ids(&chain, DocumentQuery::default(), vec![parent_is("1")])
                .await;
        assert_eq!(ids, vec!["11", "12"], "{name}");
    }
}

#[tokio::test]
async fn attribute_groups_union_by_default() {
    for (name, store) in stores() {
        let chain = chain_over(store);
        seed(&chain).await;

        let ids = entry_ids(
            &chain,
            DocumentQuery::default(),
            vec![parent_is("1"), marked()],
        )
        .await;
        assert_eq!(ids, vec!["11", "12", "21"], "{name}");
    }
}

#[tokio::test]
async fn attribute_groups_intersect_when_asked() {
    for (name, store) in stores() {
        let chain = chain_over(store).with_join_policy(JoinPolicy::Intersect);
        seed(&chain).await;

        let ids = entry_ids(
            &chain,
            DocumentQuery::default(),
            vec![parent_is("1"), marked()],
        )
        .await;
        assert_eq!(ids, vec!["11"], "{name}");
    }
}

#[tokio::test]
async fn unmatched_attribute_group_returns_nothing() {
    for (name, store) in stores() {
        let chain = chain_over(store);
        seed(&chain).await;

        let groups = vec![parent_is("404")];
        let ids = entry_ids(&chain, DocumentQuery::default(), groups).await;
        assert!(ids.is_empty(), "{name}");

        // Without attribute groups every document is returned.
        let ids = entry_ids(&chain, DocumentQuery::default(), Vec::new()).await;
        assert_eq!(ids.len(), 3, "{name}");
    }
}

#[tokio::test]
async fn search_filter_combines_everything() {
    for (name, store) in stores() {
        let chain = chain_over(store);
        let cancel = CancellationToken::new();
        for (entry, title, source) in [
            ("1", "Rust weekly", "rss"),
            ("2", "Rust daily", "mail"),
            ("3", "Zig weekly", "rss"),
            ("4", "Another rust digest", "rss"),
        ] {
            let mut d = doc(entry, title, &format!("<p>{title} body</p>"));
            d.source = source.into();
            chain.store(&cancel, d).await.unwrap();
        }
        chain
            .store_attr(&cancel, attr("4", AttrKey::UnRead, true))
            .await
            .unwrap();
        chain
            .store_attr(&cancel, attr("1", AttrKey::UnRead, true))
            .await
            .unwrap();

        let mut filter = SearchFilter::new(NS);
        filter.search = "rust".into();
        filter.source = Some("rss".into());
        filter.unread = Some(true);
        filter.sort = Some(SortField::Name);
        let docs = chain.search_filter(&cancel, &filter).await.unwrap();

        let names: Vec<_> = docs.iter().map(|d| d.name.as_str()).collect();
        assert_eq!(names, vec!["Another rust digest", "Rust weekly"], "{name}");
        let highlighted = |d: &Document| {
            d.search_context.iter().any(|s| s.contains("<b>"))
        };
        assert!(docs.iter().all(highlighted), "{name}");

        filter.page_size = 1;
        filter.page = 2;
        let docs = chain.search_filter(&cancel, &filter).await.unwrap();
        assert_eq!(docs.len(), 1, "{name}");
        assert_eq!(docs[0].name, "Rust weekly", "{name}");

        filter.page = usize::MAX;
        let docs = chain.search_filter(&cancel, &filter).await.unwrap();
        assert!(docs.is_empty(), "{name}");
    }
}

#[tokio::test]
async fn fuzzy_name_matches_substring() {
    for (name, store) in stores() {
        let chain = chain_over(store);
        let cancel = CancellationToken::new();
        for (entry, title) in [
            ("1", "This Week in Rust"),
            ("2", "Weekly digest"),
            ("3", "Monthly digest"),
        ] {
            chain.store(&cancel, doc(entry, title, "")).await.unwrap();
        }

        let mut filter = SearchFilter::new(NS);
        filter.fuzzy_name = Some("WEEK".into());
        filter.sort = Some(SortField::Name);
        let docs = chain.search_filter(&cancel, &filter).await.unwrap();
        let titles: Vec<_> = docs.iter().map(|d| d.name.as_str()).collect();
        assert_eq!(
            titles,
            vec!["This Week in Rust", "Weekly digest"],
            "{name}"
        );

        filter.fuzzy_name = Some("yearly".into());
        let docs = chain.search_filter(&cancel, &filter).await.unwrap();
        assert!(docs.is_empty(), "{name}");
    }
}

#[tokio::test]
async fn delete_entry_removes_document_and_attrs() {
    for (name, store) in stores() {
        let chain = chain_over(store);
        let cancel = CancellationToken::new();
        seed(&chain).await;

        chain.delete_entry(&cancel, NS, "11").await.unwrap();

        let err = chain.get_document(&cancel, NS, "11").await.unwrap_err();
        assert!(err.is_not_found(), "{name}");
        assert!(
            chain.get_document_attrs(&cancel, NS, "11").await.unwrap().is_empty(),
            "{name}"
        );
        assert_eq!(
            chain.get_document_attrs(&cancel, NS, "12").await.unwrap().len(),
            1,
            "{name}"
        );
        assert!(chain.find_document(&cancel, NS, "21").await.unwrap().is_some());
    }
}

#[tokio::test]
async fn delete_by_kind_filter_keeps_documents() {
    for (name, store) in stores() {
        let chain = chain_over(store);
        let cancel = CancellationToken::new();
        seed(&chain).await;

        chain
            .delete_by_filter(
                &cancel,
                vec![
                    AttrQuery::eq(fields::NAMESPACE, NS),
                    AttrQuery::eq(fields::KIND, "attr"),
                ],
            )
            .await
            .unwrap();

        assert!(
            chain.get_document_attrs(&cancel, NS, "11").await.unwrap().is_empty(),
            "{name}"
        );
        assert!(chain.find_document(&cancel, NS, "11").await.unwrap().is_some());
    }
}

#[tokio::test]
async fn missing_document_is_not_found() {
    for (name, store) in stores() {
        let chain = chain_over(store);
        let cancel = CancellationToken::new();

        assert!(
            chain.find_document(&cancel, NS, "nope").await.unwrap().is_none(),
            "{name}"
        );
        let err = chain.get_document(&cancel, NS, "nope").await.unwrap_err();
        assert!(matches!(
            err,
            Error::NotFound { kind: "document", ref name } if name == "ns/nope"
        ));
    }
}

struct Refuse;

impl Plugin for Refuse {
    fn name(&self) -> &'static str {
        "refuse"
    }

    fn run(
        &self,
        _cancel: &CancellationToken,
        _doc: &mut Document,
    ) -> docchain::Result<()> {
        Err(Error::Markup("not today".into()))
    }
}

#[tokio::test]
async fn plugin_failure_persists_nothing() {
    for (name, store) in stores() {
        let pipeline = Pipeline::standard().with_plugin(Arc::new(Refuse));
        let chain =
            Chain::new(store, pipeline, Arc::new(AdmissionPool::new(5)));
        let cancel = CancellationToken::new();

        let err = chain
            .store(&cancel, doc("11", "title", "<p>x</p>"))
            .await
            .unwrap_err();
        assert!(
            matches!(
                err,
                Error::Plugin { plugin: "refuse", ref entry, .. }
                    if entry == "ns/11"
            ),
            "{name}: {err}"
        );
        assert!(
            chain.find_document(&cancel, NS, "11").await.unwrap().is_none(),
            "{name}"
        );
    }
}

/// Fails the chosen call and records how many writes reached it.
#[derive(Default)]
struct FailingStore {
    fail_search: bool,
    writes: AtomicUsize,
}

#[async_trait]
impl DocStore for FailingStore {
    async fn store(&self, _record: Record) -> docchain::Result<()> {
        self.writes.fetch_add(1, Ordering::SeqCst);
        Err(Error::Config("disk full".into()))
    }

    async fn insert_document_if_absent(
        &self,
        _doc: Document,
    ) -> docchain::Result<bool> {
        self.writes.fetch_add(1, Ordering::SeqCst);
        Err(Error::Config("disk full".into()))
    }

    async fn search(
        &self,
        _query: &DocumentQuery,
    ) -> docchain::Result<Vec<Document>> {
        if self.fail_search {
            return Err(Error::Config("unreachable".into()));
        }
        Ok(Vec::new())
    }

    async fn filter_attr(
        &self,
        _query: &DocumentAttrQuery,
    ) -> docchain::Result<Vec<DocumentAttr>> {
        Ok(Vec::new())
    }

    async fn delete_by_filter(
        &self,
        _filters: &[AttrQuery],
    ) -> docchain::Result<()> {
        Ok(())
    }
}

#[tokio::test]
async fn store_errors_name_the_phase() {
    let cancel = CancellationToken::new();

    let store = Arc::new(FailingStore {
        fail_search: true,
        ..Default::default()
    });
    let chain = chain_over(store.clone());
    let err = chain.store(&cancel, doc("11", "t", "")).await.unwrap_err();
    assert!(matches!(
        err,
        Error::Store { phase: Phase::DedupCheck, ref entry, .. }
            if entry == "ns/11"
    ));
    assert_eq!(store.writes.load(Ordering::SeqCst), 0);

    let store = Arc::new(FailingStore::default());
    let chain = chain_over(store.clone());
    let err = chain.store(&cancel, doc("11", "t", "")).await.unwrap_err();
    assert!(matches!(err, Error::Store { phase: Phase::Persist, .. }));
    assert!(err.to_string().contains("disk full"));

    let err = chain
        .store_attr(&cancel, attr("11", AttrKey::Mark, true))
        .await
        .unwrap_err();
    assert!(matches!(err, Error::Store { phase: Phase::Persist, .. }));
}

#[tokio::test]
async fn cancelled_store_writes_nothing() {
    for (name, store) in stores() {
        let chain = chain_over(store);
        let cancel = CancellationToken::new();
        cancel.cancel();

        let err = chain.store(&cancel, doc("11", "t", "")).await.unwrap_err();
        assert!(matches!(err, Error::Timeout), "{name}");

        let fresh = CancellationToken::new();
        assert!(
            chain.find_document(&fresh, NS, "11").await.unwrap().is_none(),
            "{name}"
        );
    }
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn concurrent_first_writers_store_one_document() {
    for (name, store) in stores() {
        let chain = chain_over(store);

        let mut tasks = Vec::new();
        for i in 0..16 {
            let chain = chain.clone();
            tasks.push(tokio::spawn(async move {
                let cancel = CancellationToken::new();
                let content = format!("<p>writer {i}</p>");
                chain.store(&cancel, doc("11", "race", &content)).await
            }));
        }

        let mut created = 0;
        for task in tasks {
            if task.await.unwrap().unwrap().is_created() {
                created += 1;
            }
        }
        assert_eq!(created, 1, "{name}");

        let ids = entry_ids(&chain, DocumentQuery::default(), Vec::new()).await;
        assert_eq!(ids, vec!["11"], "{name}");
    }
}

#[tokio::test]
async fn on_disk_store_survives_reopen() {
    let tmp = tempfile::tempdir().unwrap();
    let dir = tmp.path().join("index");
    let cancel = CancellationToken::new();

    {
        let store = Arc::new(TantivyDocStore::open(&dir, 15_000_000).unwrap());
        let chain = chain_over(store);
        chain.store(&cancel, doc("11", "kept", "<p>x</p>")).await.unwrap();
        chain
            .store_attr(&cancel, attr("11", AttrKey::Mark, true))
            .await
            .unwrap();
    }

    let store = Arc::new(TantivyDocStore::open(&dir, 15_000_000).unwrap());
    let chain = chain_over(store);
    let entry = chain.get_entry(&cancel, NS, "11").await.unwrap();
    assert_eq!(entry.document.name, "kept");
    assert_eq!(entry.marked, Some(true));
}
