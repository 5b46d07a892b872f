use std::sync::LazyLock;

use jieba_rs::Jieba;
use regex::Regex;

/// Bytes of surrounding text kept on each side of a search match.
pub const SEARCH_CONTEXT_BYTES: usize = 400;

static INVISIBLE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r"(?is)<script\b.*?</script\s*>|<style\b.*?</style\s*>|<!--.*?-->",
    )
    .expect("static regex")
});

static BLOCK_TAG: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(concat!(
        r"(?i)</?(p|div|br|li|ul|ol|tr|table|section|article|header|footer",
        r"|blockquote|pre|h[1-6])\b[^>]*>",
    ))
    .expect("static regex")
});

static JIEBA: LazyLock<Jieba> = LazyLock::new(Jieba::new);

static ANY_TAG: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?s)<[^>]*>").expect("static regex"));

const ENTITIES: &[(&str, &str)] = &[
    ("&nbsp;", " "),
    ("&lt;", "<"),
    ("&gt;", ">"),
    ("&quot;", "\""),
    ("&#39;", "'"),
    ("&amp;", "&"),
];

/// Remove markup from `input`, keeping one line per block element.
///
/// Scripts, styles and comments are dropped entirely, common entities are
/// decoded, runs of whitespace inside a line collapse to one space and
/// blank lines are removed.
pub fn strip_markup(input: &str) -> String {
    let text = INVISIBLE.replace_all(input, "");
    let text = BLOCK_TAG.replace_all(&text, "\n");
    let mut text = ANY_TAG.replace_all(&text, "").into_owned();
    for (entity, plain) in ENTITIES {
        if text.contains(entity) {
            text = text.replace(entity, plain);
        }
    }

    text.lines()
        .map(collapse_whitespace)
        .filter(|line| !line.is_empty())
        .collect::<Vec<_>>()
        .join("\n")
}

pub fn collapse_whitespace(text: &str) -> String {
    text.split_whitespace().collect::<Vec<_>>().join(" ")
}

/// Keep at most `max` characters, never splitting a code point.
pub fn clip_chars(text: &str, max: usize) -> &str {
    match text.char_indices().nth(max) {
        Some((idx, _)) => &text[..idx],
        None => text,
    }
}

/// Search-mode word segmentation. Order is kept and duplicates are
/// allowed; whitespace-only pieces are dropped.
pub fn segment(text: &str) -> Vec<String> {
    JIEBA
        .cut_for_search(text, true)
        .into_iter()
        .filter(|token| !token.trim().is_empty())
        .map(str::to_string)
        .collect()
}

fn next_boundary(text: &str, mut idx: usize) -> usize {
    while idx < text.len() && !text.is_char_boundary(idx) {
        idx += 1;
    }
    idx
}

/// Snippets around each case-insensitive occurrence of `term` in
/// `content`, with every occurrence wrapped in `<b>` tags.
///
/// Matches starting within [`SEARCH_CONTEXT_BYTES`] of the previous
/// reported match are skipped; clipped edges are marked with `..`.
pub fn search_context(content: &str, term: &str) -> Vec<String> {
    if term.trim().is_empty() || content.is_empty() {
        return Vec::new();
    }
    let Ok(re) = Regex::new(&format!("(?i){}", regex::escape(term))) else {
        return Vec::new();
    };
    let highlight = |text: &str| re.replace_all(text, "<b>$0</b>").into_owned();

    let mut snippets = Vec::new();
    let mut previous_end: Option<usize> = None;
    for m in re.find_iter(content) {
        let (start, end) = (m.start(), m.end());
        if let Some(prev) = previous_end
            && start - prev < SEARCH_CONTEXT_BYTES
        {
            continue;
        }

        let before_idx =
            next_boundary(content, start.saturating_sub(SEARCH_CONTEXT_BYTES));
        let after_idx = next_boundary(
            content,
            (end + SEARCH_CONTEXT_BYTES).min(content.len()),
        );

        let mut before = String::new();
        if before_idx > 0 {
            before.push_str("..");
        }
        before.push_str(&content[before_idx..start]);

        let mut after = content[end..after_idx].to_string();
        if after_idx < content.len() {
            after.push_str("..");
        }

        snippets.push(format!(
            "{}<b>{}</b>{}",
            highlight(&before),
            m.as_str(),
            highlight(&after)
        ));
        previous_end = Some(end);
    }
    snippets
}
