//! Deterministic keyword extraction, YAKE-style: candidate terms scored by
//! frequency and first-occurrence position, no model involved. Runs for
//! every research turn; the optional LLM expansion layers on top of this.

use std::collections::HashMap;

const STOPWORDS: &[&str] = &[
    "a", "an", "the", "and", "or", "but", "if", "then", "else", "when", "what", "which", "who",
    "whom", "this", "that", "these", "those", "is", "are", "was", "were", "be", "been", "being",
    "have", "has", "had", "do", "does", "did", "will", "would", "shall", "should", "may", "might",
    "can", "could", "of", "in", "on", "at", "to", "for", "with", "about", "from", "into", "over",
    "under", "how", "why", "it", "its", "as", "by", "not", "no", "so", "than", "too", "very",
    "just", "also", "me", "my", "we", "our", "you", "your", "they", "their", "he", "she", "his",
    "her", "i", "am", "up", "out", "all", "any", "some", "there", "here", "please", "tell",
];

/// Top-`max` content words of the query, best first.
///
/// Score: term frequency weighted by how early the term first appears —
/// query-leading terms carry the intent.
pub fn extract_keywords(text: &str, max: usize) -> Vec<String> {
    let tokens: Vec<String> = text
        .to_lowercase()
        .split(|c: char| !c.is_alphanumeric())
        .filter(|t| t.len() >= 3 && !STOPWORDS.contains(t))
        .map(str::to_string)
        .collect();

    let mut freq: HashMap<&str, (u32, usize)> = HashMap::new();
    for (pos, token) in tokens.iter().enumerate() {
        let entry = freq.entry(token.as_str()).or_insert((0, pos));
        entry.0 += 1;
    }

    let mut scored: Vec<(&str, f64)> = freq
        .iter()
        .map(|(&term, &(tf, first_pos))| {
            let position_weight = 1.0 + 1.0 / (first_pos as f64 + 1.0);
            (term, tf as f64 * position_weight)
        })
        .collect();
    // Deterministic: score desc, then alphabetical.
    scored.sort_by(|a, b| {
        b.1.partial_cmp(&a.1)
            .unwrap_or(std::cmp::Ordering::Equal)
            .then_with(|| a.0.cmp(b.0))
    });

    scored
        .into_iter()
        .take(max)
        .map(|(term, _)| term.to_string())
        .collect()
}

/// Build search sub-queries from the extracted keywords: the full keyword
/// string first, then sliding pairs.
pub fn expand_subqueries(query: &str, max_subqueries: usize) -> Vec<String> {
    let keywords = extract_keywords(query, 6);
    if keywords.is_empty() {
        return vec![query.trim().to_string()];
    }

    let mut out = vec![keywords.join(" ")];
    for pair in keywords.windows(2) {
        if out.len() >= max_subqueries {
            break;
        }
        let candidate = pair.join(" ");
        if !out.contains(&candidate) {
            out.push(candidate);
        }
    }
    out
}
