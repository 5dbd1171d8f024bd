//! Contains Index - word → ids lookup for `name~value` queries
//!
//! String property values are lowercased and split into words. A needle is
//! split the same way; every word of a matching value contains each needle
//! word, so collecting ids from all indexed words containing the needle's
//! longest word yields a superset of the real matches. Callers verify the
//! candidates against the actual values.

use crate::storage::{EntityId, IdSet, PropValue};
use regex::Regex;
use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::sync::OnceLock;

fn separators() -> &'static Regex {
    static SEPARATORS: OnceLock<Regex> = OnceLock::new();
    SEPARATORS.get_or_init(|| {
        Regex::new(r#"[\s|&;$%@"<>()+*,.\-=:?/]+"#).expect("separator pattern is valid")
    })
}

/// Split text into lowercase words
pub fn words(text: &str) -> BTreeSet<String> {
    separators()
        .split(&text.to_lowercase())
        .filter(|w| !w.is_empty())
        .map(str::to_string)
        .collect()
}

/// Words of every string value in a property bag
pub fn words_of<'a>(values: impl IntoIterator<Item = &'a PropValue>) -> BTreeSet<String> {
    values
        .into_iter()
        .filter_map(PropValue::as_str)
        .flat_map(words)
        .collect()
}

/// Word → ids index over string property values
#[derive(Debug, Default)]
pub struct ContainsIndex {
    word_ids: HashMap<String, IdSet>,
}

impl ContainsIndex {
    pub fn new() -> Self {
        Self::default()
    }

    /// Replace the words indexed for `id`
    pub fn reindex(&mut self, id: EntityId, old: &BTreeSet<String>, new: &BTreeSet<String>) {
        for word in old.difference(new) {
            if let Some(ids) = self.word_ids.get_mut(word) {
                ids.remove(&id);
                if ids.is_empty() {
                    self.word_ids.remove(word);
                }
            }
        }
        for word in new.difference(old) {
            self.word_ids.entry(word.clone()).or_default().insert(id);
        }
    }

    /// Ids whose words could contain `needle`, or None if the needle has no
    /// word characters and the index cannot help
    pub fn candidates(&self, needle: &str) -> Option<IdSet> {
        let needle_words = words(needle);
        let longest = needle_words.iter().max_by_key(|w| w.len())?;

        let mut result = IdSet::new();
        for (word, ids) in &self.word_ids {
            if word.contains(longest.as_str()) {
                result.extend(ids);
            }
        }
        Some(result)
    }

    /// Ids indexed under exactly `word`
    pub fn ids_for_word(&self, word: &str) -> Option<&IdSet> {
        self.word_ids.get(&word.to_lowercase())
    }

    /// Number of distinct words
    pub fn word_count(&self) -> usize {
        self.word_ids.len()
    }

    /// Build from scratch over existing property bags
    pub fn build<'a>(
        bags: impl IntoIterator<Item = (EntityId, &'a BTreeMap<String, PropValue>)>,
    ) -> Self {
        let mut index = Self::new();
        let empty = BTreeSet::new();
        for (id, bag) in bags {
            index.reindex(id, &empty, &words_of(bag.values()));
        }
        tracing::debug!("Built contains index with {} words", index.word_count());
        index
    }
}
