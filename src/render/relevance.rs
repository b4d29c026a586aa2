//! Content relevance filtering
//!
//! Splits a page into text blocks (paragraphs, list items, headings, cells)
//! and keeps the blocks worth returning, either by BM25 relevance to a
//! query or by a minimum word count.

use scraper::{ElementRef, Html};
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};

/// Elements whose text forms one block
const BLOCK_TAGS: &[&str] = &[
    "p", "li", "h1", "h2", "h3", "h4", "h5", "h6", "pre", "blockquote", "td", "th", "dt", "dd",
    "figcaption",
];

/// Elements whose text is never content
const SKIPPED_TAGS: &[&str] = &["script", "style", "noscript", "template", "nav", "footer"];

const BM25_K1: f64 = 1.2;
const BM25_B: f64 = 0.75;

/// How a page's text is filtered
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ContentFilter {
    /// Keep blocks whose BM25 score against `query` reaches `threshold`
    Bm25 { query: String, threshold: f64 },
    /// Keep blocks with at least `min_words` words
    Pruning { min_words: usize },
}

/// A block of page text and the score it was kept with
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TextBlock {
    pub text: String,
    pub score: f64,
}

/// What a filter kept from one page
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct FilteredContent {
    /// Kept blocks in document order
    pub blocks: Vec<TextBlock>,
    /// Blocks the filter dropped
    pub dropped: usize,
}

impl FilteredContent {
    /// Kept text, one block per paragraph
    pub fn text(&self) -> String {
        self.blocks
            .iter()
            .map(|block| block.text.as_str())
            .collect::<Vec<_>>()
            .join("\n\n")
    }

    pub fn word_count(&self) -> usize {
        self.blocks
            .iter()
            .map(|block| block.text.split_whitespace().count())
            .sum()
    }
}

impl ContentFilter {
    /// Filters the text blocks of an HTML page
    ///
    /// A BM25 filter with a non-positive threshold or a query without any
    /// word keeps every block.
    pub fn apply(&self, html: &str) -> FilteredContent {
        let blocks = text_blocks(html);
        let scores = match self {
            Self::Bm25 { query, .. } => bm25_scores(&blocks, query),
            Self::Pruning { .. } => blocks
                .iter()
                .map(|block| block.split_whitespace().count() as f64)
                .collect(),
        };

        let keep_all = match self {
            Self::Bm25 { query, threshold } => *threshold <= 0.0 || tokenize(query).is_empty(),
            Self::Pruning { min_words } => *min_words == 0,
        };
        let minimum = match self {
            Self::Bm25 { threshold, .. } => *threshold,
            Self::Pruning { min_words } => *min_words as f64,
        };

        let total = blocks.len();
        let kept: Vec<TextBlock> = blocks
            .into_iter()
            .zip(scores)
            .filter(|(_, score)| keep_all || *score >= minimum)
            .map(|(text, score)| TextBlock { text, score })
            .collect();

        tracing::trace!("Content filter kept {} of {} blocks", kept.len(), total);
        FilteredContent {
            dropped: total - kept.len(),
            blocks: kept,
        }
    }
}

/// Whitespace-collapsed text of every outermost block element
pub fn text_blocks(html: &str) -> Vec<String> {
    let document = Html::parse_document(html);
    let mut blocks = Vec::new();

    for node in document.root_element().descendants() {
        let Some(element) = ElementRef::wrap(node) else {
            continue;
        };
        let name = element.value().name();
        if !BLOCK_TAGS.contains(&name) {
            continue;
        }

        let nested = element.ancestors().filter_map(ElementRef::wrap).any(|ancestor| {
            let name = ancestor.value().name();
            BLOCK_TAGS.contains(&name) || SKIPPED_TAGS.contains(&name)
        });
        if nested {
            continue;
        }

        let text = element
            .text()
            .flat_map(str::split_whitespace)
            .collect::<Vec<_>>()
            .join(" ");
        if !text.is_empty() {
            blocks.push(text);
        }
    }

    blocks
}

/// Lowercased alphanumeric words
fn tokenize(text: &str) -> Vec<String> {
    text.split(|c: char| !c.is_alphanumeric())
        .filter(|word| !word.is_empty())
        .map(str::to_lowercase)
        .collect()
}

/// Okapi BM25 score of every block, with the page's blocks as the corpus
fn bm25_scores(blocks: &[String], query: &str) -> Vec<f64> {
    let terms: HashSet<String> = tokenize(query).into_iter().collect();
    let documents: Vec<Vec<String>> = blocks.iter().map(|block| tokenize(block)).collect();
    if documents.is_empty() || terms.is_empty() {
        return vec![0.0; documents.len()];
    }

    let total = documents.len() as f64;
    let average_len =
        (documents.iter().map(Vec::len).sum::<usize>() as f64 / total).max(1.0);

    let idf: HashMap<&str, f64> = terms
        .iter()
        .map(|term| {
            let containing = documents
                .iter()
                .filter(|doc| doc.iter().any(|word| word == term))
                .count() as f64;
            let idf = ((total - containing + 0.5) / (containing + 0.5) + 1.0).ln();
            (term.as_str(), idf)
        })
        .collect();

    documents
        .iter()
        .map(|doc| {
            let len = doc.len() as f64;
            idf.iter()
                .map(|(term, weight)| {
                    let tf = doc.iter().filter(|word| word.as_str() == *term).count() as f64;
                    if tf == 0.0 {
                        return 0.0;
                    }
                    let norm = BM25_K1 * (1.0 - BM25_B + BM25_B * len / average_len);
                    weight * tf * (BM25_K1 + 1.0) / (tf + norm)
                })
                .sum()
        })
        .collect()
}
