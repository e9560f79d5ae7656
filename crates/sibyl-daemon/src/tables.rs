//! Markdown-table conversion for plain-text transports.
//!
//! Pipe tables don't survive proportional-font chat clients; they are
//! re-rendered as monospace ASCII inside a fenced code block. Other inline
//! styling is left to the transport's own body-styling syntax.

/// Replace every markdown table in `text` with a fenced ASCII rendition.
pub fn render_tables(text: &str) -> String {
    let lines: Vec<&str> = text.lines().collect();
    let mut out: Vec<String> = Vec::new();
    let mut i = 0;

    while i < lines.len() {
        if is_table_row(lines[i]) && i + 1 < lines.len() && is_separator_row(lines[i + 1]) {
            let mut rows: Vec<Vec<String>> = vec![parse_row(lines[i])];
            let mut j = i + 2;
            while j < lines.len() && is_table_row(lines[j]) {
                rows.push(parse_row(lines[j]));
                j += 1;
            }
            out.push(ascii_table(&rows));
            i = j;
        } else {
            out.push(lines[i].to_string());
            i += 1;
        }
    }
    out.join("\n")
}

fn is_table_row(line: &str) -> bool {
    let trimmed = line.trim();
    trimmed.starts_with('|') && trimmed.ends_with('|') && trimmed.len() > 2
}

fn is_separator_row(line: &str) -> bool {
    let trimmed = line.trim();
    is_table_row(trimmed)
        && trimmed
            .trim_matches('|')
            .chars()
            .all(|c| matches!(c, '-' | ':' | '|' | ' '))
}

fn parse_row(line: &str) -> Vec<String> {
    line.trim()
        .trim_matches('|')
        .split('|')
        .map(|cell| cell.trim().to_string())
        .collect()
}

fn ascii_table(rows: &[Vec<String>]) -> String {
    let columns = rows.iter().map(|r| r.len()).max().unwrap_or(0);
    let mut widths = vec![0usize; columns];
    for row in rows {
        for (i, cell) in row.iter().enumerate() {
            widths[i] = widths[i].max(cell.chars().count());
        }
    }

    let rule: String = {
        let mut s = String::from("+");
        for w in &widths {
            s.push_str(&"-".repeat(w + 2));
            s.push('+');
        }
        s
    };

    let mut out = String::from("```\n");
    out.push_str(&rule);
    out.push('\n');
    for (idx, row) in rows.iter().enumerate() {
        out.push('|');
        for (i, width) in widths.iter().enumerate() {
            let cell = row.get(i).map(String::as_str).unwrap_or("");
            out.push_str(&format!(" {cell:<width$} |"));
        }
        out.push('\n');
        // Rule under the header row and at the bottom.
        if idx == 0 || idx == rows.len() - 1 {
            out.push_str(&rule);
            out.push('\n');
        }
    }
    out.push_str("```");
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn converts_a_simple_table() {
        let text = "before\n| name | size |\n|---|---|\n| a | 1 |\n| bb | 22 |\nafter";
        let rendered = render_tables(text);
        assert!(rendered.contains("```"));
        assert!(rendered.contains("| name | size |"));
        assert!(rendered.contains("| bb   | 22   |"));
        assert!(rendered.starts_with("before"));
        assert!(rendered.ends_with("after"));
    }

    #[test]
    fn text_without_tables_is_unchanged() {
        let text = "no tables here\njust | a stray pipe";
        assert_eq!(render_tables(text), text);
    }

    #[test]
    fn column_widths_align() {
        let text = "| h | header2 |\n|---|---|\n| x | y |";
        let rendered = render_tables(text);
        // Both rows render with the same width for column 2.
        assert!(rendered.contains("| h | header2 |"));
        assert!(rendered.contains("| x | y       |"));
    }

    #[test]
    fn separator_detection_requires_dashes() {
        let text = "| a | b |\n| c | d |"; // no separator → not a table
        assert_eq!(render_tables(text), text);
    }
}
