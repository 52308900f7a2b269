//! Weighted fuzzy search over title, resolved content and attributes.

use crate::config::SearchConfig;
use crate::item::{AttributeValue, Attributes, Item};
use std::collections::{HashMap, HashSet};
use strsim::jaro_winkler;

const PREFIX_SCORE: f64 = 0.9;
const SUBSTRING_SCORE: f64 = 0.8;
/// Fuzzy hits never reach an exact token match
const FUZZY_DISCOUNT: f64 = 0.85;
const MIN_FUZZY_TERM_LEN: usize = 3;

/// Ranks items against a free-text query
#[derive(Debug, Clone)]
pub struct SearchIndex {
    fuzzy_threshold: f64,
    min_score: f64,
    title_weight: f64,
    content_weight: f64,
    attribute_weight: f64,
}

impl Default for SearchIndex {
    fn default() -> Self {
        Self::new(&SearchConfig::default())
    }
}

impl SearchIndex {
    pub fn new(config: &SearchConfig) -> Self {
        Self {
            fuzzy_threshold: config.fuzzy_threshold,
            min_score: config.min_score,
            title_weight: config.title_weight,
            content_weight: config.content_weight,
            attribute_weight: config.attribute_weight,
        }
    }

    /// Filter and rank `items` for `text`.
    ///
    /// An empty query returns every item in its original order. Content is
    /// read from `content_by_id`, falling back to the item's own content;
    /// unresolved content searches as empty.
    pub fn query<'a>(
        &self,
        items: &'a [Item],
        content_by_id: &HashMap<String, String>,
        text: &str,
    ) -> Vec<&'a Item> {
        let query = text.trim().to_lowercase();
        let terms = split_terms(&query);
        if terms.is_empty() {
            return items.iter().collect();
        }

        let mut ranked: Vec<(&'a Item, f64)> = items
            .iter()
            .filter_map(|item| {
                let content = content_by_id
                    .get(&item.id)
                    .map(String::as_str)
                    .or(item.content.as_deref())
                    .unwrap_or("");
                let score = self.score(item, content, &query, &terms);
                (score >= self.min_score).then_some((item, score))
            })
            .collect();

        // Stable: equal scores keep store order
        ranked.sort_by(|a, b| b.1.total_cmp(&a.1));
        ranked.into_iter().map(|(item, _)| item).collect()
    }

    /// Weighted relevance of one item
    pub fn score(&self, item: &Item, content: &str, query: &str, terms: &[String]) -> f64 {
        let title = item.title.to_lowercase();
        let title_words = word_set(&title);
        let content_words = word_set(&content.to_lowercase());
        let attribute_words: HashSet<String> = flatten_attributes(&item.attributes)
            .iter()
            .flat_map(|token| {
                std::iter::once(token.clone()).chain(split_terms(token))
            })
            .collect();

        let mut score = self.title_weight * self.field_score(terms, &title_words)
            + self.content_weight * self.field_score(terms, &content_words)
            + self.attribute_weight * self.field_score(terms, &attribute_words);

        // Whole-query title hits outrank anything fuzzy
        if title.trim() == query {
            score += self.title_weight;
        } else if query.len() >= 2 && title.contains(query) {
            score += self.title_weight * 0.5;
        }
        score
    }

    fn field_score(&self, terms: &[String], words: &HashSet<String>) -> f64 {
        if words.is_empty() {
            return 0.0;
        }
        let total: f64 = terms
            .iter()
            .map(|term| {
                if words.contains(term) {
                    return 1.0;
                }
                words
                    .iter()
                    .map(|word| self.term_match(term, word))
                    .fold(0.0, f64::max)
            })
            .sum();
        total / terms.len() as f64
    }

    fn term_match(&self, term: &str, word: &str) -> f64 {
        if word == term {
            return 1.0;
        }
        if term.len() >= 2 && word.starts_with(term) {
            return PREFIX_SCORE;
        }
        if term.chars().count() < MIN_FUZZY_TERM_LEN {
            return 0.0;
        }
        if word.contains(term) {
            return SUBSTRING_SCORE;
        }
        let similarity = jaro_winkler(term, word);
        if similarity >= self.fuzzy_threshold {
            similarity * FUZZY_DISCOUNT
        } else {
            0.0
        }
    }
}

/// Flatten attributes into lower-cased search tokens.
///
/// List attributes yield the attribute name plus one token per element;
/// scalar attributes yield their value.
pub fn flatten_attributes(attributes: &Attributes) -> Vec<String> {
    let mut tokens = Vec::new();
    for (name, value) in attributes {
        match value {
            AttributeValue::List(values) => {
                tokens.push(name.to_lowercase());
                tokens.extend(values.iter().map(|v| v.to_lowercase()));
            }
            AttributeValue::Scalar(scalar) => tokens.push(scalar.to_string().to_lowercase()),
        }
    }
    tokens.retain(|t| !t.trim().is_empty());
    tokens
}

/// Split text into lower-cased alphanumeric terms
pub fn split_terms(text: &str) -> Vec<String> {
    text.split(|c: char| !c.is_alphanumeric())
        .filter(|t| !t.is_empty())
        .map(str::to_lowercase)
        .collect()
}

fn word_set(text: &str) -> HashSet<String> {
    split_terms(text).into_iter().collect()
}
