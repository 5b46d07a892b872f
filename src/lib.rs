//! docchain - a deduplicating document and attribute index.
//!
//! Documents are written once per `(namespace, entryId)` and enriched by an
//! ordered plugin pipeline on the way in. Mutable state (read flags, marks,
//! grouping) lives in separate attribute records stored alongside, and
//! searches join the two through candidate entry ids.
//!
//! # Quick start
//!
//! ```no_run
//! # async fn run() -> docchain::Result<()> {
//! use docchain::{Chain, ChainConfig, DataDir, Document, store::open_store};
//! use docchain::query::SearchFilter;
//! use tokio_util::sync::CancellationToken;
//!
//! let data_dir = DataDir::resolve(None)?;
//! let config = ChainConfig::load(&data_dir.config_file())?;
//! let chain = Chain::from_config(&config, open_store(&config, &data_dir)?)?;
//! let cancel = CancellationToken::new();
//!
//! let doc =
//!     Document::new("feeds", "42", "Release notes", "<p>What changed</p>");
//! chain.store(&cancel, doc).await?;
//!
//! let mut filter = SearchFilter::new("feeds");
//! filter.search = "changed".into();
//! for doc in chain.search_filter(&cancel, &filter).await? {
//!     println!("{} {:?}", doc.entry_id, doc.search_context);
//! }
//! # Ok(())
//! # }
//! ```

pub mod chain;
pub mod config;
pub mod data_dir;
pub mod error;
pub mod model;
pub mod plugin;
pub mod pool;
pub mod query;
pub mod store;
pub mod text_util;

pub use chain::{AttrUpdate, Chain, StoreOutcome};
pub use config::ChainConfig;
pub use data_dir::DataDir;
pub use error::{Error, Result};
pub use model::{AttrKey, AttrValue, Document, DocumentAttr, Entry, Record};
pub use pool::AdmissionPool;
pub use store::DocStore;
