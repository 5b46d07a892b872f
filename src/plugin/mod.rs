//! Ordered, fail-fast enrichment of newly accepted documents.
//!
//! The [`Pipeline`] is built explicitly from plugin names (see
//! [`ChainConfig::plugins`](crate::config::ChainConfig)) and runs every
//! plugin in registration order. The first failure aborts the run, so a
//! document is never persisted half-enriched.

mod content;
mod header_image;
mod sub_content;

use std::sync::Arc;

use tokio_util::sync::CancellationToken;

pub use content::DocProcessPlugin;
pub use header_image::HeaderImagePlugin;
pub use sub_content::{SUB_CONTENT_MAX_CHARS, SubContentPlugin};

use crate::{
    error::{Error, Result},
    model::Document,
};

/// Plugin names in the default pipeline order.
pub const DEFAULT_PLUGINS: [&str; 3] = [
    DocProcessPlugin::NAME,
    HeaderImagePlugin::NAME,
    SubContentPlugin::NAME,
];

/// One enrichment step. Plugins mutate the document in place.
///
/// Long-running plugins should poll `cancel` and return
/// [`Error::Timeout`] once it fires.
pub trait Plugin: Send + Sync {
    fn name(&self) -> &'static str;

    fn run(
        &self,
        cancel: &CancellationToken,
        doc: &mut Document,
    ) -> Result<()>;
}

/// Look up a built-in plugin by its registered name.
pub fn plugin_by_name(name: &str) -> Result<Arc<dyn Plugin>> {
    let plugin: Arc<dyn Plugin> = match name {
        DocProcessPlugin::NAME => Arc::new(DocProcessPlugin),
        HeaderImagePlugin::NAME => Arc::new(HeaderImagePlugin),
        SubContentPlugin::NAME => Arc::new(SubContentPlugin),
        other => return Err(Error::Config(format!("unknown plugin: {other}"))),
    };
    Ok(plugin)
}

#[derive(Clone, Default)]
pub struct Pipeline {
    plugins: Vec<Arc<dyn Plugin>>,
}

impl Pipeline {
    /// An empty pipeline. Documents pass through untouched.
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_plugin(mut self, plugin: Arc<dyn Plugin>) -> Self {
        self.plugins.push(plugin);
        self
    }

    pub fn from_names<S: AsRef<str>>(names: &[S]) -> Result<Self> {
        let mut pipeline = Self::new();
        for name in names {
            pipeline = pipeline.with_plugin(plugin_by_name(name.as_ref())?);
        }
        Ok(pipeline)
    }

    /// docProcess, headerImg, subContent.
    pub fn standard() -> Self {
        Self::new()
            .with_plugin(Arc::new(DocProcessPlugin))
            .with_plugin(Arc::new(HeaderImagePlugin))
            .with_plugin(Arc::new(SubContentPlugin))
    }

    pub fn names(&self) -> Vec<&'static str> {
        self.plugins.iter().map(|p| p.name()).collect()
    }

    pub fn len(&self) -> usize {
        self.plugins.len()
    }

    pub fn is_empty(&self) -> bool {
        self.plugins.is_empty()
    }

    /// Run every plugin over `doc` in order.
    ///
    /// Checks `cancel` before each plugin and returns [`Error::Timeout`]
    /// once it has fired. A plugin's own timeout passes through unwrapped.
    pub fn run(
        &self,
        cancel: &CancellationToken,
        doc: &mut Document,
    ) -> Result<()> {
        for plugin in &self.plugins {
            if cancel.is_cancelled() {
                return Err(Error::Timeout);
            }
            match plugin.run(cancel, doc) {
                Ok(()) => {}
                Err(Error::Timeout) => return Err(Error::Timeout),
                Err(err) => {
                    tracing::warn!(
                        plugin = plugin.name(),
                        namespace = %doc.namespace,
                        entry_id = %doc.entry_id,
                        error = %err,
                        "plugin failed"
                    );
                    return Err(Error::Plugin {
                        plugin: plugin.name(),
                        entry: doc.entry_key(),
                        source: Box::new(err),
                    });
                }
            }
            tracing::trace!(
                plugin = plugin.name(),
                entry_id = %doc.entry_id,
                "plugin done"
            );
        }
        Ok(())
    }
}

impl std::fmt::Debug for Pipeline {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_list().entries(self.names()).finish()
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Mutex;

    use super::*;

    struct Recorder {
        name: &'static str,
        seen: Arc<Mutex<Vec<&'static str>>>,
        fail: bool,
    }

    impl Plugin for Recorder {
        fn name(&self) -> &'static str {
            self.name
        }

        fn run(
            &self,
            _cancel: &CancellationToken,
            doc: &mut Document,
        ) -> Result<()> {
            self.seen.lock().unwrap().push(self.name);
            if self.fail {
                return Err(Error::Markup("refused".into()));
            }
            doc.summary.push_str(self.name);
            Ok(())
        }
    }

    /// Cancels the shared token partway through its own work.
    struct CancelsMidway;

    impl Plugin for CancelsMidway {
        fn name(&self) -> &'static str {
            "midway"
        }

        fn run(
            &self,
            cancel: &CancellationToken,
            doc: &mut Document,
        ) -> Result<()> {
            doc.summary.push_str("started");
            cancel.cancel();
            if cancel.is_cancelled() {
                return Err(Error::Timeout);
            }
            doc.summary.push_str("finished");
            Ok(())
        }
    }

    fn recorder(
        name: &'static str,
        seen: &Arc<Mutex<Vec<&'static str>>>,
        fail: bool,
    ) -> Arc<dyn Plugin> {
        Arc::new(Recorder {
            name,
            seen: seen.clone(),
            fail,
        })
    }

    #[test]
    fn standard_order() {
        assert_eq!(
            Pipeline::standard().names(),
            vec!["docProcess", "headerImg", "subContent"]
        );
        assert_eq!(
            Pipeline::from_names(&DEFAULT_PLUGINS).unwrap().names(),
            Pipeline::standard().names()
        );
    }

    #[test]
    fn from_names_keeps_given_order() {
        let pipeline =
            Pipeline::from_names(&["subContent", "docProcess"]).unwrap();
        assert_eq!(pipeline.names(), vec!["subContent", "docProcess"]);
    }

    #[test]
    fn unknown_name_is_config_error() {
        let err =
            Pipeline::from_names(&["docProcess", "spellcheck"]).unwrap_err();
        assert!(
            matches!(err, Error::Config(ref m) if m.contains("spellcheck"))
        );
    }

    #[test]
    fn runs_in_registration_order() {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let pipeline = Pipeline::new()
            .with_plugin(recorder("a", &seen, false))
            .with_plugin(recorder("b", &seen, false));
        let mut doc = Document::new("ns", "1", "t", "");

        pipeline.run(&CancellationToken::new(), &mut doc).unwrap();
        assert_eq!(*seen.lock().unwrap(), vec!["a", "b"]);
        assert_eq!(doc.summary, "ab");
    }

    #[test]
    fn first_failure_stops_the_run() {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let pipeline = Pipeline::new()
            .with_plugin(recorder("a", &seen, true))
            .with_plugin(recorder("b", &seen, false));
        let mut doc = Document::new("ns", "1", "t", "");

        let err = pipeline
            .run(&CancellationToken::new(), &mut doc)
            .unwrap_err();
        assert!(matches!(
            err,
            Error::Plugin { plugin: "a", ref entry, ref source }
                if entry == "ns/1" && matches!(**source, Error::Markup(_))
        ));
        assert_eq!(*seen.lock().unwrap(), vec!["a"]);
    }

    #[test]
    fn plugin_timeout_is_not_wrapped() {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let pipeline = Pipeline::new()
            .with_plugin(Arc::new(CancelsMidway))
            .with_plugin(recorder("after", &seen, false));
        let mut doc = Document::new("ns", "1", "t", "");

        let err = pipeline
            .run(&CancellationToken::new(), &mut doc)
            .unwrap_err();
        assert!(matches!(err, Error::Timeout));
        assert_eq!(doc.summary, "started");
        assert!(seen.lock().unwrap().is_empty());
    }

    #[test]
    fn cancelled_token_stops_before_next_plugin() {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let pipeline = Pipeline::new().with_plugin(recorder("a", &seen, false));
        let cancel = CancellationToken::new();
        cancel.cancel();
        let mut doc = Document::new("ns", "1", "t", "");

        let err = pipeline.run(&cancel, &mut doc).unwrap_err();
        assert!(matches!(err, Error::Timeout));
        assert!(seen.lock().unwrap().is_empty());
    }

    #[test]
    fn standard_pipeline_enriches_html() {
        let html = r#"<html><body>
            <h1>Heading</h1>
            <p><img data-src="https://cdn.example/cover.jpg"></p>
            <p>It's the first paragraph.</p>
            <p>Second paragraph.</p>
        </body></html>"#;
        let mut doc = Document::new("ns", "1", "Rust notes", html);
        doc.web_url = "https://example.org/posts/1".into();

        Pipeline::standard()
            .run(&CancellationToken::new(), &mut doc)
            .unwrap();

        assert_eq!(doc.header_image, "https://cdn.example/cover.jpg");
        assert!(doc.pure_content.contains("Its the first paragraph."));
        assert_eq!(
            doc.sub_content,
            "It's the first paragraph. Second paragraph."
        );
        assert!(doc.title_tokens.iter().any(|t| t == "Rust"));
    }
}
