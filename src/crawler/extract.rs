use anyhow::{Context, Result};
use scraper::{ElementRef, Html, Selector};

/// Elements whose text is worth indexing, in document order
const CONTENT_SELECTOR: &str = "h1, h2, h3, h4, h5, h6, p, li";

/// Ancestor tags that mark boilerplate rather than page content
const BOILERPLATE_ANCESTORS: &[&str] = &[
    "nav", "footer", "header", "aside", "script", "style", "noscript", "svg", "form", "button",
];

/// Block elements whose nested content elements would double-count
const BLOCK_ANCESTORS: &[&str] = &["p", "li"];

/// Extract readable text from a page.
///
/// Rather than dumping the whole body, text is gathered from heading,
/// paragraph, and list-item elements in block order, skipping anything
/// nested under navigation/footer/etc. to cut boilerplate noise. Blocks are
/// joined with blank lines so paragraph structure survives into chunking.
pub fn extract_text(html: &str) -> Result<String> {
    let selector = Selector::parse(CONTENT_SELECTOR)
        .map_err(|e| anyhow::anyhow!("{:?}", e))
        .context("Content selector failed to parse")?;

    let document = Html::parse_document(html);
    let mut blocks = Vec::new();

    for element in document.select(&selector) {
        if has_ancestor_in(&element, BOILERPLATE_ANCESTORS) {
            continue;
        }
        // A p or li nested inside another block is already covered by it
        if has_ancestor_in(&element, BLOCK_ANCESTORS) {
            continue;
        }

        let text: String = element.text().collect::<Vec<_>>().join(" ");
        let text = text.split_whitespace().collect::<Vec<_>>().join(" ");
        if !text.is_empty() {
            blocks.push(text);
        }
    }

    Ok(blocks.join("\n\n"))
}

fn has_ancestor_in(element: &ElementRef, names: &[&str]) -> bool {
    element.ancestors().any(|node| {
        node.value()
            .as_element()
            .map(|el| names.contains(&el.name()))
            .unwrap_or(false)
    })
}
