use std::path::Path;

use crate::error::AdapterError;
use crate::fetch::strip_tags;

/// Supported local document kinds.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FileKind {
    Txt,
    Md,
    Html,
    Json,
    Csv,
    Pdf,
    Epub,
}

impl FileKind {
    /// Detect the kind from a file extension. Unknown extensions are not
    /// ingested at all.
    pub fn from_path(path: &Path) -> Option<Self> {
        let ext = path.extension()?.to_str()?.to_lowercase();
        Some(match ext.as_str() {
            "txt" | "text" | "log" => FileKind::Txt,
            "md" | "markdown" => FileKind::Md,
            "html" | "htm" => FileKind::Html,
            "json" => FileKind::Json,
            "csv" => FileKind::Csv,
            "pdf" => FileKind::Pdf,
            "epub" => FileKind::Epub,
            _ => return None,
        })
    }

    pub fn name(&self) -> &'static str {
        match self {
            FileKind::Txt => "txt",
            FileKind::Md => "md",
            FileKind::Html => "html",
            FileKind::Json => "json",
            FileKind::Csv => "csv",
            FileKind::Pdf => "pdf",
            FileKind::Epub => "epub",
        }
    }
}

/// Path + declared kind → plain text.
///
/// The root guard runs before this interface is ever invoked; implementations
/// may assume the path has already been vetted.
pub trait FileAdapter: Send + Sync {
    fn read(&self, path: &Path, kind: FileKind) -> Result<String, AdapterError>;
}

/// Callback that extracts text from binary formats (pdf, epub).
pub type BinaryExtractor = Box<dyn Fn(&Path) -> std::io::Result<String> + Send + Sync>;

/// Default file adapter: plain formats inline, binary formats through an
/// optional extractor callback.
pub struct PlainFileAdapter {
    pdf_extractor: Option<BinaryExtractor>,
    epub_extractor: Option<BinaryExtractor>,
}

impl PlainFileAdapter {
    pub fn new() -> Self {
        Self {
            pdf_extractor: None,
            epub_extractor: None,
        }
    }

    pub fn with_pdf_extractor(mut self, extractor: BinaryExtractor) -> Self {
        self.pdf_extractor = Some(extractor);
        self
    }

    pub fn with_epub_extractor(mut self, extractor: BinaryExtractor) -> Self {
        self.epub_extractor = Some(extractor);
        self
    }
}

impl Default for PlainFileAdapter {
    fn default() -> Self {
        Self::new()
    }
}

impl FileAdapter for PlainFileAdapter {
    fn read(&self, path: &Path, kind: FileKind) -> Result<String, AdapterError> {
        match kind {
            FileKind::Txt | FileKind::Md | FileKind::Csv => {
                Ok(std::fs::read_to_string(path)?)
            }
            FileKind::Html => {
                let raw = std::fs::read_to_string(path)?;
                Ok(strip_tags(&raw))
            }
            FileKind::Json => {
                let raw = std::fs::read_to_string(path)?;
                // Re-render compact JSON readably so chunk boundaries land
                // between fields instead of mid-line.
                match serde_json::from_str::<serde_json::Value>(&raw) {
                    Ok(v) => Ok(serde_json::to_string_pretty(&v).unwrap_or(raw)),
                    Err(_) => Ok(raw),
                }
            }
            FileKind::Pdf => match &self.pdf_extractor {
                Some(extract) => Ok(extract(path)?),
                None => Err(AdapterError::NoExtractor { kind: "pdf".into() }),
            },
            FileKind::Epub => match &self.epub_extractor {
                Some(extract) => Ok(extract(path)?),
                None => Err(AdapterError::NoExtractor { kind: "epub".into() }),
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn kind_detection_by_extension() {
        assert_eq!(FileKind::from_path(Path::new("a/b/notes.md")), Some(FileKind::Md));
        assert_eq!(FileKind::from_path(Path::new("doc.PDF")), Some(FileKind::Pdf));
        assert_eq!(FileKind::from_path(Path::new("binary.exe")), None);
        assert_eq!(FileKind::from_path(Path::new("no_extension")), None);
    }

    #[test]
    fn reads_plain_text() {
        let mut f = tempfile::Builder::new().suffix(".txt").tempfile().unwrap();
        writeln!(f, "hello").unwrap();
        let text = PlainFileAdapter::new().read(f.path(), FileKind::Txt).unwrap();
        assert_eq!(text.trim(), "hello");
    }

    #[test]
    fn html_is_stripped() {
        let mut f = tempfile::Builder::new().suffix(".html").tempfile().unwrap();
        write!(f, "<p>body text</p>").unwrap();
        let text = PlainFileAdapter::new().read(f.path(), FileKind::Html).unwrap();
        assert_eq!(text.trim(), "body text");
    }

    #[test]
    fn json_is_pretty_printed() {
        let mut f = tempfile::Builder::new().suffix(".json").tempfile().unwrap();
        write!(f, r#"{{"a":1,"b":[2,3]}}"#).unwrap();
        let text = PlainFileAdapter::new().read(f.path(), FileKind::Json).unwrap();
        assert!(text.contains("\"a\": 1"));
    }

    #[test]
    fn pdf_without_extractor_errors() {
        let f = tempfile::Builder::new().suffix(".pdf").tempfile().unwrap();
        let err = PlainFileAdapter::new()
            .read(f.path(), FileKind::Pdf)
            .unwrap_err();
        assert!(matches!(err, AdapterError::NoExtractor { .. }));
    }

    #[test]
    fn pdf_with_extractor_uses_it() {
        let f = tempfile::Builder::new().suffix(".pdf").tempfile().unwrap();
        let adapter = PlainFileAdapter::new()
            .with_pdf_extractor(Box::new(|_| Ok("extracted pdf text".to_string())));
        assert_eq!(
            adapter.read(f.path(), FileKind::Pdf).unwrap(),
            "extracted pdf text"
        );
    }
}
