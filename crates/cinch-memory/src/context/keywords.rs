//! Keyword extraction for archive entries.
//!
//! Keywords are content words longer than four characters, minus a stopword
//! list, ranked by frequency. Referenced file paths are always included and
//! listed first. At most [`MAX_KEYWORDS`] are kept.

use std::collections::HashMap;

/// Cap on keywords per archive entry.
pub const MAX_KEYWORDS: usize = 20;

/// Words must be longer than this to count.
const MIN_WORD_CHARS: usize = 4;

const STOPWORDS: &[&str] = &[
    "about", "above", "after", "again", "against", "already", "another", "anything", "because",
    "before", "being", "below", "between", "cannot", "could", "doing", "during", "every",
    "everything", "first", "further", "going", "having", "here's", "itself", "maybe", "might",
    "myself", "never", "other", "ourselves", "please", "really", "right", "should", "since",
    "something", "still", "thanks", "their", "theirs", "themselves", "there", "these", "thing",
    "things", "think", "those", "through", "under", "until", "using", "what's", "where",
    "which", "while", "within", "without", "would", "yourself", "yours",
];

fn is_word_char(c: char) -> bool {
    c.is_alphanumeric() || c == '_' || c == '\''
}

/// Extract up to [`MAX_KEYWORDS`] keywords from `texts`, with `files` first.
pub fn extract_keywords<'a>(
    texts: impl IntoIterator<Item = &'a str>,
    files: &[String],
) -> Vec<String> {
    let mut counts: HashMap<String, (usize, usize)> = HashMap::new();
    let mut order = 0usize;
    for text in texts {
        for raw in text.split(|c: char| !is_word_char(c)) {
            let word = raw.trim_matches('\'').to_lowercase();
            if word.chars().count() <= MIN_WORD_CHARS
                || word.chars().all(|c| c.is_ascii_digit() || c == '_')
                || STOPWORDS.contains(&word.as_str())
            {
                continue;
            }
            let entry = counts.entry(word).or_insert((0, order));
            entry.0 += 1;
            order += 1;
        }
    }

    let mut keywords: Vec<String> = Vec::new();
    for file in files {
        if keywords.len() == MAX_KEYWORDS {
            return keywords;
        }
        if !keywords.contains(file) {
            keywords.push(file.clone());
        }
    }

    let mut ranked: Vec<(String, (usize, usize))> = counts.into_iter().collect();
    ranked.sort_by(|a, b| b.1.0.cmp(&a.1.0).then(a.1.1.cmp(&b.1.1)));
    for (word, _) in ranked {
        if keywords.len() == MAX_KEYWORDS {
            break;
        }
        if !keywords.contains(&word) {
            keywords.push(word);
        }
    }
    keywords
}
