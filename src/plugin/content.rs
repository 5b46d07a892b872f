use scraper::{Html, Selector};
use tokio_util::sync::CancellationToken;

use super::Plugin;
use crate::{
    error::{Error, Result},
    model::Document,
    text_util::{segment, strip_markup},
};

/// Fills `pure_content`, `title_tokens` and `content_tokens`.
#[derive(Debug, Clone, Copy, Default)]
pub struct DocProcessPlugin;

impl DocProcessPlugin {
    pub const NAME: &'static str = "docProcess";
}

impl Plugin for DocProcessPlugin {
    fn name(&self) -> &'static str {
        Self::NAME
    }

    fn run(
        &self,
        cancel: &CancellationToken,
        doc: &mut Document,
    ) -> Result<()> {
        let pure_content = plain_content(&doc.content)?;
        // Segmenting a long body is the slow part.
        if cancel.is_cancelled() {
            return Err(Error::Timeout);
        }
        doc.title_tokens = segment(&doc.name);
        doc.content_tokens = segment(&pure_content);
        doc.pure_content = pure_content;
        Ok(())
    }
}

/// Text of `<body>` when there is any, otherwise the whole input with its
/// markup removed. Apostrophes are dropped.
fn plain_content(content: &str) -> Result<String> {
    let body =
        Selector::parse("body").map_err(|e| Error::Markup(e.to_string()))?;
    let html = Html::parse_document(content);

    let from_body = html
        .select(&body)
        .map(|el| strip_markup(&el.inner_html()))
        .find(|text| !text.is_empty());

    let text = from_body.unwrap_or_else(|| strip_markup(content));
    Ok(text.replace('\'', ""))
}
