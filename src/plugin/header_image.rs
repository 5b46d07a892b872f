use scraper::{Html, Selector};
use tokio_util::sync::CancellationToken;
use url::Url;

use super::Plugin;
use crate::{
    error::{Error, Result},
    model::Document,
};

/// `<img>` attributes consulted for a URL, highest priority first.
const IMAGE_ATTRS: [&str; 4] =
    ["src", "data-src", "data-src-retina", "data-original"];

/// Picks the first usable image URL in the content as `header_image`.
#[derive(Debug, Clone, Copy, Default)]
pub struct HeaderImagePlugin;

impl HeaderImagePlugin {
    pub const NAME: &'static str = "headerImg";
}

impl Plugin for HeaderImagePlugin {
    fn name(&self) -> &'static str {
        Self::NAME
    }

    fn run(
        &self,
        _cancel: &CancellationToken,
        doc: &mut Document,
    ) -> Result<()> {
        let img =
            Selector::parse("img").map_err(|e| Error::Markup(e.to_string()))?;
        let html = Html::parse_fragment(&doc.content);
        let base = Url::parse(&doc.web_url).ok();

        doc.header_image = html
            .select(&img)
            .find_map(|el| {
                IMAGE_ATTRS
                    .iter()
                    .filter_map(|attr| el.value().attr(attr))
                    .find_map(|value| resolve(value, base.as_ref()))
            })
            .unwrap_or_default();
        Ok(())
    }
}

/// Absolute URLs are returned as written; relative ones are joined onto
/// `base`. Only http(s) URLs with a host are usable, which skips `data:`
/// placeholders left by lazy loaders.
fn resolve(value: &str, base: Option<&Url>) -> Option<String> {
    let value = value.trim();
    if value.is_empty() {
        return None;
    }
    match Url::parse(value) {
        Ok(url) if is_fetchable(&url) => Some(value.to_string()),
        Ok(_) => None,
        Err(url::ParseError::RelativeUrlWithoutBase) => base?
            .join(value)
            .ok()
            .filter(is_fetchable)
            .map(String::from),
        Err(_) => None,
    }
}

fn is_fetchable(url: &Url) -> bool {
    matches!(url.scheme(), "http" | "https") && url.host_str().is_some()
}
