use url::Url;

/// Weight of a keyword found in a link's anchor text
const ANCHOR_WEIGHT: f64 = 1.0;
/// Weight of a keyword found only in the link's path or query
const URL_WEIGHT: f64 = 0.5;

/// Scores discovered links against a set of focus keywords
///
/// Each distinct keyword contributes [`ANCHOR_WEIGHT`] if it appears in the
/// anchor text, otherwise [`URL_WEIGHT`] if it appears in the URL path or
/// query, otherwise nothing. The sum is divided by the number of keywords,
/// so scores fall in `0.0..=1.0`. Matching is case-insensitive substring
/// matching with no stemming.
#[derive(Debug, Clone, Default)]
pub struct KeywordScorer {
    keywords: Vec<String>,
}

impl KeywordScorer {
    pub fn new<I, S>(keywords: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let mut distinct: Vec<String> = Vec::new();
        for keyword in keywords {
            let keyword = keyword.as_ref().trim().to_lowercase();
            if !keyword.is_empty() && !distinct.contains(&keyword) {
                distinct.push(keyword);
            }
        }
        Self { keywords: distinct }
    }

    pub fn is_empty(&self) -> bool {
        self.keywords.is_empty()
    }

    pub fn score(&self, url: &Url, anchor_text: &str) -> f64 {
        if self.keywords.is_empty() {
            return 0.0;
        }

        let text = anchor_text.to_lowercase();
        let target = match url.query() {
            Some(query) => format!("{}?{}", url.path(), query),
            None => url.path().to_string(),
        }
        .to_lowercase();

        let total: f64 = self
            .keywords
            .iter()
            .map(|keyword| {
                if text.contains(keyword.as_str()) {
                    ANCHOR_WEIGHT
                } else if target.contains(keyword.as_str()) {
                    URL_WEIGHT
                } else {
                    0.0
                }
            })
            .sum();

        total / self.keywords.len() as f64
    }
}
