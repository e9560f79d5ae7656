/// Rough token estimate at ~4 characters per token.
pub fn approx_tokens(text: &str) -> u32 {
    (text.len() as u32).div_ceil(4)
}

/// One chunk produced by a `Chunker`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChunkPiece {
    pub text: String,
    pub token_count: u32,
    /// Slug of the nearest preceding markdown heading, when one exists.
    pub section_id: Option<String>,
}

/// Pure text → chunks interface.
pub trait Chunker: Send + Sync {
    fn chunk(&self, text: &str, token_budget: usize) -> Vec<ChunkPiece>;
}

/// Paragraph-aware splitter that packs paragraphs up to a token budget.
///
/// Markdown headings start a new chunk and set the section id for everything
/// until the next heading. Paragraphs larger than the budget are split on
/// sentence boundaries as a last resort.
pub struct BudgetChunker;

impl Chunker for BudgetChunker {
    fn chunk(&self, text: &str, token_budget: usize) -> Vec<ChunkPiece> {
        let budget = token_budget.max(16) as u32;
        let mut pieces: Vec<ChunkPiece> = Vec::new();
        let mut current = String::new();
        let mut section: Option<String> = None;

        let mut flush = |current: &mut String, section: &Option<String>, out: &mut Vec<ChunkPiece>| {
            let trimmed = current.trim();
            if !trimmed.is_empty() {
                out.push(ChunkPiece {
                    text: trimmed.to_string(),
                    token_count: approx_tokens(trimmed),
                    section_id: section.clone(),
                });
            }
            current.clear();
        };

        for paragraph in text.split("\n\n") {
            let paragraph = paragraph.trim();
            if paragraph.is_empty() {
                continue;
            }

            if let Some(heading) = heading_of(paragraph) {
                flush(&mut current, &section, &mut pieces);
                section = Some(slugify(&heading));
            }

            if approx_tokens(paragraph) > budget {
                flush(&mut current, &section, &mut pieces);
                for span in split_sentences(paragraph, budget) {
                    pieces.push(ChunkPiece {
                        token_count: approx_tokens(&span),
                        text: span,
                        section_id: section.clone(),
                    });
                }
                continue;
            }

            let joined_tokens = approx_tokens(&current) + approx_tokens(paragraph);
            if !current.is_empty() && joined_tokens > budget {
                flush(&mut current, &section, &mut pieces);
            }
            if !current.is_empty() {
                current.push_str("\n\n");
            }
            current.push_str(paragraph);
        }
        flush(&mut current, &section, &mut pieces);
        pieces
    }
}

fn heading_of(paragraph: &str) -> Option<String> {
    let first_line = paragraph.lines().next()?;
    let trimmed = first_line.trim_start();
    if trimmed.starts_with('#') {
        let heading = trimmed.trim_start_matches('#').trim();
        if !heading.is_empty() {
            return Some(heading.to_string());
        }
    }
    None
}

fn slugify(heading: &str) -> String {
    heading
        .to_lowercase()
        .chars()
        .map(|c| if c.is_alphanumeric() { c } else { '-' })
        .collect::<String>()
        .split('-')
        .filter(|s| !s.is_empty())
        .collect::<Vec<_>>()
        .join("-")
}

/// Greedy sentence packing for paragraphs that exceed the budget on their own.
fn split_sentences(paragraph: &str, budget: u32) -> Vec<String> {
    let mut out = Vec::new();
    let mut current = String::new();

    for sentence in paragraph.split_inclusive(['.', '!', '?']) {
        if !current.is_empty() && approx_tokens(&current) + approx_tokens(sentence) > budget {
            out.push(current.trim().to_string());
            current = String::new();
        }
        current.push_str(sentence);

        // A sentence alone can still exceed the budget: hard-split on chars.
        while approx_tokens(&current) > budget {
            let mut cut = ((budget * 4) as usize).min(current.len());
            while cut > 0 && !current.is_char_boundary(cut) {
                cut -= 1;
            }
            let cut = current[..cut].rfind(' ').unwrap_or(cut);
            if cut == 0 {
                break;
            }
            let head: String = current[..cut].to_string();
            out.push(head.trim().to_string());
            current = current[cut..].trim_start().to_string();
        }
    }
    if !current.trim().is_empty() {
        out.push(current.trim().to_string());
    }
    out.retain(|s| !s.is_empty());
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn short_text_is_one_chunk() {
        let pieces = BudgetChunker.chunk("Just one paragraph.", 256);
        assert_eq!(pieces.len(), 1);
        assert_eq!(pieces[0].text, "Just one paragraph.");
        assert!(pieces[0].section_id.is_none());
    }

    #[test]
    fn headings_set_section_ids() {
        let text = "# Intro\n\nFirst part.\n\n## Deep Dive\n\nSecond part.";
        let pieces = BudgetChunker.chunk(text, 16);
        let sections: Vec<Option<String>> =
            pieces.iter().map(|p| p.section_id.clone()).collect();
        assert!(sections.contains(&Some("intro".to_string())));
        assert!(sections.contains(&Some("deep-dive".to_string())));
    }

    #[test]
    fn paragraphs_pack_up_to_budget() {
        let text = "aaaa aaaa.\n\nbbbb bbbb.\n\ncccc cccc.";
        // Budget large enough for all three.
        let pieces = BudgetChunker.chunk(text, 256);
        assert_eq!(pieces.len(), 1);
        assert!(pieces[0].text.contains("aaaa") && pieces[0].text.contains("cccc"));
    }

    #[test]
    fn oversized_paragraph_splits_on_sentences() {
        let long = "This is a sentence. ".repeat(100);
        let pieces = BudgetChunker.chunk(&long, 32);
        assert!(pieces.len() > 1);
        for p in &pieces {
            assert!(p.token_count <= 40, "piece too large: {}", p.token_count);
        }
    }

    #[test]
    fn token_estimate_rounds_up() {
        assert_eq!(approx_tokens(""), 0);
        assert_eq!(approx_tokens("abc"), 1);
        assert_eq!(approx_tokens("abcde"), 2);
    }

    #[test]
    fn slugify_flattens_punctuation() {
        assert_eq!(slugify("Deep Dive: Part 2!"), "deep-dive-part-2");
    }
}
