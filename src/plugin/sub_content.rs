use scraper::{Html, Selector};
use tokio_util::sync::CancellationToken;

use super::Plugin;
use crate::{
    error::{Error, Result},
    model::Document,
    text_util::{clip_chars, strip_markup},
};

/// Longest `sub_content`, in characters.
pub const SUB_CONTENT_MAX_CHARS: usize = 400;

const MAX_PARAGRAPHS: usize = 11;
const MAX_LINES: usize = 3;

/// Builds a short plain-text preview into `sub_content`.
#[derive(Debug, Clone, Copy, Default)]
pub struct SubContentPlugin;

impl SubContentPlugin {
    pub const NAME: &'static str = "subContent";
}

impl Plugin for SubContentPlugin {
    fn name(&self) -> &'static str {
        Self::NAME
    }

    fn run(
        &self,
        _cancel: &CancellationToken,
        doc: &mut Document,
    ) -> Result<()> {
        doc.sub_content = sub_content(&doc.content)?;
        Ok(())
    }
}

/// Up to 11 non-empty paragraphs, or the first 3 non-empty lines when the
/// content has no paragraphs, clipped to [`SUB_CONTENT_MAX_CHARS`].
fn sub_content(content: &str) -> Result<String> {
    let p = Selector::parse("p").map_err(|e| Error::Markup(e.to_string()))?;
    let html = Html::parse_fragment(content);

    let paragraphs: Vec<String> = html
        .select(&p)
        .map(|el| el.text().collect::<String>())
        .map(|text| text.trim().replace('\n', " "))
        .filter(|text| !text.is_empty())
        .take(MAX_PARAGRAPHS)
        .collect();

    let preview = if paragraphs.is_empty() {
        strip_markup(content)
            .lines()
            .map(str::trim)
            .filter(|line| !line.is_empty())
            .take(MAX_LINES)
            .collect::<Vec<_>>()
            .join(" ")
    } else {
        paragraphs.join(" ")
    };

    let preview = strip_markup(&preview);
    Ok(clip_chars(&preview, SUB_CONTENT_MAX_CHARS).to_string())
}
