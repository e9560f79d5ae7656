//! Code-fence-aware response splitter.
//!
//! When a split falls inside a fenced code block, the fence is closed before
//! the chunk boundary and re-opened at the start of the next chunk, so every
//! emitted chunk renders correctly on its own.

/// Split `text` into chunks of at most `max_chars` characters.
pub fn split_chunks(text: &str, max_chars: usize) -> Vec<String> {
    let max_chars = max_chars.max(32);
    if text.len() <= max_chars {
        return vec![text.to_string()];
    }

    let mut chunks: Vec<String> = Vec::new();
    let mut current = String::new();
    let mut fence_lang: Option<String> = None;

    for line in text.split('\n') {
        let cost = if current.is_empty() {
            line.len()
        } else {
            1 + line.len()
        };

        if !current.is_empty() && current.len() + cost > max_chars {
            if fence_lang.is_some() {
                current.push_str("\n```");
            }
            chunks.push(current);
            current = String::new();
            if let Some(lang) = &fence_lang {
                current.push_str("```");
                current.push_str(lang);
                current.push('\n');
            }
        }

        if !current.is_empty() {
            current.push('\n');
        }
        current.push_str(line);

        let trimmed = line.trim_start();
        if let Some(after_fence) = trimmed.strip_prefix("```") {
            if fence_lang.is_some() {
                fence_lang = None;
            } else {
                fence_lang = Some(after_fence.trim().to_string());
            }
        }
    }
    if !current.is_empty() {
        chunks.push(current);
    }

    // Safety net: force-split any chunk still over the limit (a single line
    // longer than max_chars).
    let mut result = Vec::new();
    for chunk in chunks {
        if chunk.len() <= max_chars {
            result.push(chunk);
            continue;
        }
        let mut remaining = chunk.as_str();
        while remaining.len() > max_chars {
            let window = floor_char_boundary(remaining, max_chars);
            let split_at = remaining[..window]
                .rfind('\n')
                .or_else(|| remaining[..window].rfind(' '))
                .unwrap_or(window);
            let split_at = if split_at == 0 { window } else { split_at };
            result.push(remaining[..split_at].to_string());
            remaining = remaining[split_at..].trim_start();
        }
        if !remaining.is_empty() {
            result.push(remaining.to_string());
        }
    }
    result
}

fn floor_char_boundary(s: &str, mut index: usize) -> usize {
    index = index.min(s.len());
    while index > 0 && !s.is_char_boundary(index) {
        index -= 1;
    }
    index
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn short_text_is_single_chunk() {
        assert_eq!(split_chunks("hello", 4000), vec!["hello"]);
    }

    #[test]
    fn over_limit_splits_on_newline() {
        let line = "a".repeat(300);
        let text = format!("{line}\n{line}\n{line}");
        let chunks = split_chunks(&text, 400);
        assert!(chunks.len() >= 2);
        for c in &chunks {
            assert!(c.len() <= 400, "chunk too large: {}", c.len());
        }
    }

    #[test]
    fn chunks_reassemble_in_order() {
        let text = (0..50)
            .map(|i| format!("line number {i:03}"))
            .collect::<Vec<_>>()
            .join("\n");
        let chunks = split_chunks(&text, 120);
        let joined = chunks.join("\n");
        assert!(joined.contains("line number 000"));
        assert!(joined.contains("line number 049"));
    }

    #[test]
    fn code_fence_reopens_across_chunks() {
        let mut text = String::from("Intro.\n```rust\n");
        for i in 0..60 {
            text.push_str(&format!("let v{i:03} = {i};\n"));
        }
        text.push_str("```\nAfter.");

        let chunks = split_chunks(&text, 300);
        assert!(chunks.len() >= 2);
        for c in &chunks[..chunks.len() - 1] {
            // Every non-final chunk that opened a fence also closes it.
            let fences = c.matches("```").count();
            assert_eq!(fences % 2, 0, "unbalanced fences in: {c}");
        }
        assert!(chunks[1].starts_with("```rust"));
    }

    #[test]
    fn very_long_single_line_force_splits() {
        let text = "x".repeat(1000);
        let chunks = split_chunks(&text, 300);
        assert!(chunks.len() >= 3);
        for c in &chunks {
            assert!(c.len() <= 300);
        }
    }
}
