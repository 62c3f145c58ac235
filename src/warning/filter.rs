//! Word filters applied to chat messages

use regex::{Regex, RegexBuilder};

use crate::store::FilterRecord;

enum Matcher {
    Regex(Regex),
    /// Lowercased whole words, matched as a consecutive run
    Words(Vec<String>),
}

struct WordFilter {
    filter_id: i64,
    pattern: String,
    matcher: Matcher,
}

/// First filter that matched a message
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FilterMatch {
    pub filter_id: i64,
    pub pattern: String,
    /// Text of the message that triggered the filter
    pub matched: String,
}

#[derive(Default)]
pub struct FilterSet {
    filters: Vec<WordFilter>,
}

impl FilterSet {
    /// Build from stored filters. Disabled filters and invalid regex
    /// patterns are skipped.
    pub fn from_records(records: Vec<FilterRecord>) -> Self {
        let mut filters = Vec::with_capacity(records.len());

        for record in records.into_iter().filter(|r| r.is_enabled) {
            let matcher = if record.is_regex {
                match RegexBuilder::new(&record.pattern).case_insensitive(true).build() {
                    Ok(re) => Matcher::Regex(re),
                    Err(e) => {
                        tracing::warn!(filter_id = record.filter_id, error = %e, "Invalid filter pattern, skipping");
                        continue;
                    }
                }
            } else {
                let words = tokenize(&record.pattern.to_lowercase())
                    .map(str::to_string)
                    .collect::<Vec<_>>();
                if words.is_empty() {
                    tracing::warn!(filter_id = record.filter_id, "Filter pattern has no words, skipping");
                    continue;
                }
                Matcher::Words(words)
            };

            filters.push(WordFilter {
                filter_id: record.filter_id,
                pattern: record.pattern,
                matcher,
            });
        }

        Self { filters }
    }

    pub fn len(&self) -> usize {
        self.filters.len()
    }

    pub fn is_empty(&self) -> bool {
        self.filters.is_empty()
    }

    pub fn find_match(&self, message: &str) -> Option<FilterMatch> {
        let lowered = message.to_lowercase();
        let tokens: Vec<&str> = tokenize(&lowered).collect();

        for filter in &self.filters {
            let matched = match &filter.matcher {
                Matcher::Regex(re) => re.find(message).map(|m| m.as_str().to_string()),
                Matcher::Words(words) => tokens
                    .windows(words.len())
                    .find(|window| window.iter().eq(words.iter()))
                    .map(|window| window.join(" ")),
            };

            if let Some(matched) = matched {
                return Some(FilterMatch {
                    filter_id: filter.filter_id,
                    pattern: filter.pattern.clone(),
                    matched,
                });
            }
        }

        None
    }
}

fn tokenize(s: &str) -> impl Iterator<Item = &str> {
    s.split(|c: char| !c.is_alphanumeric()).filter(|w| !w.is_empty())
}
