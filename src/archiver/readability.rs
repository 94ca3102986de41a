//! Readable-text extraction from a rendered page.
//!
//! Produces a JSON document shaped like Mozilla Readability's output so it can
//! be rendered by the same reader views.

use scraper::{ElementRef, Html, Selector};
use serde::{Deserialize, Serialize};

/// Containers tried, in order, for the main content.
const CONTENT_ROOTS: [&str; 4] = ["article", "main", "[role='main']", "body"];

/// Block elements whose text makes up the readable body.
const BLOCK_SELECTOR: &str = "p, h1, h2, h3, h4, h5, h6, li, pre, blockquote";

/// Ancestors whose text is never part of the readable body.
const SKIPPED_ANCESTORS: [&str; 6] = ["nav", "footer", "aside", "script", "style", "form"];

const EXCERPT_LEN: usize = 200;

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Readable {
    pub title: Option<String>,
    pub byline: Option<String>,
    pub excerpt: Option<String>,
    pub site_name: Option<String>,
    /// HTML of the chosen content container.
    pub content: String,
    pub text_content: String,
    /// Character count of `text_content`.
    pub length: usize,
}

impl Readable {
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.text_content.is_empty()
    }
}

fn selector(css: &str) -> Option<Selector> {
    Selector::parse(css).ok()
}

fn meta_content(document: &Html, css: &str) -> Option<String> {
    let sel = selector(css)?;
    document
        .select(&sel)
        .filter_map(|e| e.value().attr("content"))
        .map(str::trim)
        .find(|c| !c.is_empty())
        .map(ToString::to_string)
}

fn first_text(document: &Html, css: &str) -> Option<String> {
    let sel = selector(css)?;
    document
        .select(&sel)
        .map(|e| collapse_whitespace(&e.text().collect::<String>()))
        .find(|t| !t.is_empty())
}

fn collapse_whitespace(text: &str) -> String {
    text.split_whitespace().collect::<Vec<_>>().join(" ")
}

fn is_skipped(element: &ElementRef<'_>) -> bool {
    element
        .ancestors()
        .filter_map(ElementRef::wrap)
        .any(|a| SKIPPED_ANCESTORS.contains(&a.value().name()))
}

fn content_root(document: &Html) -> Option<ElementRef<'_>> {
    CONTENT_ROOTS.iter().find_map(|css| {
        let sel = selector(css)?;
        document
            .select(&sel)
            .find(|e| !collapse_whitespace(&e.text().collect::<String>()).is_empty())
    })
}

/// Extract readable content from page HTML.
#[must_use]
pub fn extract(html: &str) -> Readable {
    let document = Html::parse_document(html);

    let title = meta_content(&document, "meta[property='og:title']")
        .or_else(|| first_text(&document, "title"));
    let byline = meta_content(&document, "meta[name='author']")
        .or_else(|| first_text(&document, "[rel='author'], .byline, .author"));
    let site_name = meta_content(&document, "meta[property='og:site_name']");
    let description = meta_content(&document, "meta[property='og:description']")
        .or_else(|| meta_content(&document, "meta[name='description']"));

    let Some(root) = content_root(&document) else {
        return Readable {
            title,
            byline,
            excerpt: description,
            site_name,
            ..Readable::default()
        };
    };

    let mut blocks: Vec<String> = Vec::new();
    if let Some(block_sel) = selector(BLOCK_SELECTOR) {
        for block in root.select(&block_sel) {
            if is_skipped(&block) {
                continue;
            }
            // Nested blocks (li > p) would otherwise be emitted twice.
            let nested = block
                .ancestors()
                .filter_map(ElementRef::wrap)
                .take_while(|a| a.id() != root.id())
                .any(|a| block_sel.matches(&a));
            if nested {
                continue;
            }
            let text = collapse_whitespace(&block.text().collect::<String>());
            if !text.is_empty() {
                blocks.push(text);
            }
        }
    }

    if blocks.is_empty() {
        let text = collapse_whitespace(&root.text().collect::<String>());
        if !text.is_empty() {
            blocks.push(text);
        }
    }

    let text_content = blocks.join("\n\n");
    let excerpt = description.or_else(|| {
        blocks.first().map(|first| first.chars().take(EXCERPT_LEN).collect())
    });

    Readable {
        title,
        byline,
        excerpt,
        site_name,
        content: root.html(),
        length: text_content.chars().count(),
        text_content,
    }
}
