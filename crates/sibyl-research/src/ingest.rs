use std::path::{Path, PathBuf};
use std::sync::Arc;

use sha2::{Digest, Sha256};
use tracing::{debug, info, warn};

use sibyl_adapters::{
    Chunker, EmbeddingAdapter, FetchRequest, Fetcher, FileAdapter, FileKind,
};
use sibyl_core::CorpusHandle;
use sibyl_index::{Chunk, VectorIndex};

use crate::error::Result;

/// Token budget per chunk during ingestion.
const CHUNK_TOKEN_BUDGET: usize = 400;

/// Stable document id for a local file: first 16 hex chars of the SHA-256 of
/// its canonical path. The path itself never leaves this function.
pub fn document_id_for_path(canonical: &Path) -> String {
    let digest = Sha256::digest(canonical.to_string_lossy().as_bytes());
    hex::encode(&digest[..8])
}

/// What one ingestion pass produced.
#[derive(Debug, Default)]
pub struct IngestReport {
    pub handles: Vec<CorpusHandle>,
    /// Documents that actually contributed chunk text this pass.
    pub content_documents: usize,
    pub chunks_indexed: usize,
    pub diagnostics: Vec<String>,
}

/// Local and seed-URL ingestion into the vector index.
pub struct Ingestor {
    index: Arc<VectorIndex>,
    embedder: Arc<dyn EmbeddingAdapter>,
    chunker: Arc<dyn Chunker>,
    files: Arc<dyn FileAdapter>,
    fetcher: Arc<dyn Fetcher>,
    /// Canonicalized allowed roots. Empty means no local ingestion at all.
    roots: Vec<PathBuf>,
    max_file_size: u64,
}

impl Ingestor {
    pub fn new(
        index: Arc<VectorIndex>,
        embedder: Arc<dyn EmbeddingAdapter>,
        chunker: Arc<dyn Chunker>,
        files: Arc<dyn FileAdapter>,
        fetcher: Arc<dyn Fetcher>,
        root_paths: &[String],
        max_file_size: u64,
    ) -> Self {
        let roots = root_paths
            .iter()
            .filter_map(|r| std::fs::canonicalize(r).ok())
            .collect();
        Self {
            index,
            embedder,
            chunker,
            files,
            fetcher,
            roots,
            max_file_size,
        }
    }

    /// Ingest every source pointer: URLs are fetched, paths are resolved
    /// under the configured roots. Directory pointers are discovery metadata
    /// only — each discovered file becomes its own document, the directory
    /// itself is never ingested.
    pub async fn ingest_sources(&self, sources: &[String]) -> Result<IngestReport> {
        let mut report = IngestReport::default();

        for source in sources {
            if source.starts_with("http://") || source.starts_with("https://") {
                self.ingest_url(source, &mut report).await;
            } else {
                self.ingest_path(Path::new(source), &mut report).await;
            }
        }

        info!(
            documents = report.content_documents,
            chunks = report.chunks_indexed,
            "ingestion pass complete"
        );
        Ok(report)
    }

    async fn ingest_path(&self, path: &Path, report: &mut IngestReport) {
        // Root guard first: the canonical path must sit under a configured
        // root before anything is read.
        let canonical = match std::fs::canonicalize(path) {
            Ok(p) => p,
            Err(e) => {
                warn!(path = %path.display(), error = %e, "source path unresolvable");
                report
                    .diagnostics
                    .push(format!("unresolvable path skipped: {}", path.display()));
                return;
            }
        };
        if !self.roots.iter().any(|root| canonical.starts_with(root)) {
            warn!(path = %canonical.display(), "source path outside document roots");
            report
                .diagnostics
                .push(format!("path outside document roots: {}", path.display()));
            return;
        }

        if canonical.is_dir() {
            for file in discover_files(&canonical) {
                self.ingest_file(&file, report).await;
            }
        } else {
            self.ingest_file(&canonical, report).await;
        }
    }

    async fn ingest_file(&self, canonical: &Path, report: &mut IngestReport) {
        let Some(kind) = FileKind::from_path(canonical) else {
            report
                .diagnostics
                .push(format!("unsupported file kind skipped: {}", canonical.display()));
            return;
        };

        if let Ok(meta) = std::fs::metadata(canonical) {
            if meta.len() > self.max_file_size {
                report.diagnostics.push(format!(
                    "file exceeds size cap ({} bytes): {}",
                    meta.len(),
                    canonical.display()
                ));
                return;
            }
        }

        let text = match self.files.read(canonical, kind) {
            Ok(t) => t,
            Err(e) => {
                warn!(path = %canonical.display(), error = %e, "file read failed");
                report
                    .diagnostics
                    .push(format!("read failed for {}: {e}", canonical.display()));
                return;
            }
        };

        let document_id = document_id_for_path(canonical);
        let handle = CorpusHandle::new(document_id.clone());
        match self.index_text(&document_id, &handle, &text).await {
            Ok(0) => {
                report
                    .diagnostics
                    .push(format!("no content extracted from {}", canonical.display()));
            }
            Ok(n) => {
                debug!(document = %document_id, chunks = n, kind = kind.name(), "file ingested");
                report.content_documents += 1;
                report.chunks_indexed += n;
                report.handles.push(handle);
            }
            Err(e) => {
                warn!(document = %document_id, error = %e, "indexing failed");
                report
                    .diagnostics
                    .push(format!("indexing failed for {}: {e}", canonical.display()));
            }
        }
    }

    async fn ingest_url(&self, url: &str, report: &mut IngestReport) {
        let page = match self.fetcher.fetch(&FetchRequest::text(url)).await {
            Ok(p) => p,
            Err(e) => {
                warn!(url, error = %e, "seed fetch failed");
                report.diagnostics.push(format!("fetch failed for {url}: {e}"));
                return;
            }
        };

        let handle = CorpusHandle::new(page.source_id.clone());
        match self
            .index_text(&page.source_id, &handle, &page.content_text)
            .await
        {
            Ok(0) => report.diagnostics.push(format!("no content at {url}")),
            Ok(n) => {
                report.content_documents += 1;
                report.chunks_indexed += n;
                report.handles.push(handle);
            }
            Err(e) => report.diagnostics.push(format!("indexing failed for {url}: {e}")),
        }
    }

    async fn index_text(
        &self,
        document_id: &str,
        handle: &CorpusHandle,
        text: &str,
    ) -> Result<usize> {
        let pieces = self.chunker.chunk(text, CHUNK_TOKEN_BUDGET);
        if pieces.is_empty() {
            return Ok(0);
        }

        let texts: Vec<String> = pieces.iter().map(|p| p.text.clone()).collect();
        let vectors = self.embedder.embed(&texts).await?;

        let chunks: Vec<Chunk> = pieces
            .into_iter()
            .zip(vectors)
            .enumerate()
            .map(|(ordinal, (piece, vector))| Chunk {
                document_id: document_id.to_string(),
                ordinal: ordinal as u32,
                text: piece.text,
                token_count: piece.token_count,
                section_id: piece.section_id,
                vector,
                provenance: handle.to_string(),
            })
            .collect();

        let count = chunks.len();
        self.index.upsert_chunks(document_id, &chunks)?;
        Ok(count)
    }
}

/// Recursive file discovery under a directory, deterministic order.
fn discover_files(dir: &Path) -> Vec<PathBuf> {
    let mut files = Vec::new();
    let mut stack = vec![dir.to_path_buf()];
    while let Some(current) = stack.pop() {
        let Ok(entries) = std::fs::read_dir(&current) else {
            continue;
        };
        for entry in entries.flatten() {
            let path = entry.path();
            if path.is_dir() {
                stack.push(path);
            } else if FileKind::from_path(&path).is_some() {
                files.push(path);
            }
        }
    }
    files.sort();
    files
}
