//! BM25 scoring over an in-memory inverted index.

use std::collections::HashMap;

const K1: f32 = 1.2;
const B: f32 = 0.75;

/// Lowercased alphanumeric tokens, two characters or longer.
pub fn tokenize(text: &str) -> Vec<String> {
    text.to_lowercase()
        .split(|c: char| !c.is_alphanumeric())
        .filter(|t| t.len() >= 2)
        .map(str::to_string)
        .collect()
}

/// Inverted index keyed by term, with per-chunk term frequencies.
#[derive(Debug, Default)]
pub struct LexicalIndex {
    /// term → (chunk slot, term frequency)
    postings: HashMap<String, Vec<(usize, u32)>>,
    /// chunk slot → token count
    lengths: Vec<usize>,
    total_tokens: usize,
}

impl LexicalIndex {
    /// Rebuild from every chunk's token list. Slot order must match the
    /// caller's chunk storage order.
    pub fn rebuild<'a>(token_lists: impl Iterator<Item = &'a [String]>) -> Self {
        let mut index = LexicalIndex::default();
        for tokens in token_lists {
            index.push(tokens);
        }
        index
    }

    fn push(&mut self, tokens: &[String]) {
        let slot = self.lengths.len();
        self.lengths.push(tokens.len());
        self.total_tokens += tokens.len();

        let mut freqs: HashMap<&str, u32> = HashMap::new();
        for t in tokens {
            *freqs.entry(t.as_str()).or_insert(0) += 1;
        }
        for (term, tf) in freqs {
            self.postings
                .entry(term.to_string())
                .or_default()
                .push((slot, tf));
        }
    }

    pub fn len(&self) -> usize {
        self.lengths.len()
    }

    pub fn is_empty(&self) -> bool {
        self.lengths.is_empty()
    }

    /// BM25 score of every chunk against the query terms. Slots without any
    /// query term score 0.
    pub fn score(&self, query_tokens: &[String]) -> Vec<f32> {
        let n = self.lengths.len();
        let mut scores = vec![0.0f32; n];
        if n == 0 {
            return scores;
        }
        let avg_len = self.total_tokens as f32 / n as f32;

        for term in query_tokens {
            let Some(postings) = self.postings.get(term) else {
                continue;
            };
            let df = postings.len() as f32;
            let idf = (1.0 + (n as f32 - df + 0.5) / (df + 0.5)).ln();
            for &(slot, tf) in postings {
                let tf = tf as f32;
                let len_norm = 1.0 - B + B * (self.lengths[slot] as f32 / avg_len.max(1.0));
                scores[slot] += idf * (tf * (K1 + 1.0)) / (tf + K1 * len_norm);
            }
        }
        scores
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn tokenize_lowercases_and_splits() {
        assert_eq!(
            tokenize("Rust's async-await, explained!"),
            vec!["rust", "async", "await", "explained"]
        );
    }

    #[test]
    fn tokenize_drops_single_chars() {
        assert_eq!(tokenize("a b cd"), vec!["cd"]);
    }

    #[test]
    fn rarer_terms_score_higher() {
        let docs: Vec<Vec<String>> = vec![
            tokenize("the cat sat on the mat"),
            tokenize("the dog sat on the log"),
            tokenize("quantum entanglement in cats"),
        ];
        let index = LexicalIndex::rebuild(docs.iter().map(|d| d.as_slice()));

        let scores = index.score(&tokenize("quantum"));
        assert!(scores[2] > scores[0]);
        assert!(scores[2] > scores[1]);
        assert_eq!(scores[0], 0.0);
    }

    #[test]
    fn term_frequency_raises_score() {
        let docs: Vec<Vec<String>> = vec![
            tokenize("rust rust rust language"),
            tokenize("rust language tutorial basics"),
        ];
        let index = LexicalIndex::rebuild(docs.iter().map(|d| d.as_slice()));
        let scores = index.score(&tokenize("rust"));
        assert!(scores[0] > scores[1]);
    }

    #[test]
    fn empty_index_scores_nothing() {
        let index = LexicalIndex::default();
        assert!(index.score(&tokenize("anything")).is_empty());
    }
}
