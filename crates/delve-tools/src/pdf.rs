use std::path::{Path, PathBuf};
use std::time::Duration;

use base64::Engine as _;
use futures::future::BoxFuture;
use tracing::{debug, info, warn};

use delve_core::config::PdfConfig;
use delve_core::error::{DelveError, Result};
use delve_core::traits::PdfExtractor;
use delve_core::types::PdfExtraction;

/// Extracts PDF text with poppler's `pdftotext -layout` and splits it
/// into text and table chunks.
///
/// When an image command is configured, embedded images are dumped as PNG
/// with `pdfimages -png` and returned base64-encoded in page order.
pub struct PdftotextExtractor {
    command: String,
    timeout_secs: u64,
    chunk_chars: usize,
    min_chunk_chars: usize,
    image_command: Option<String>,
    max_images: usize,
    min_image_bytes: u64,
}

impl PdftotextExtractor {
    pub fn new(config: &PdfConfig) -> Self {
        Self {
            command: config.command.clone(),
            timeout_secs: config.timeout_secs,
            chunk_chars: config.chunk_chars.max(1),
            min_chunk_chars: config.min_chunk_chars,
            image_command: config.image_command.clone(),
            max_images: config.max_images,
            min_image_bytes: config.min_image_bytes,
        }
    }

    async fn run_command(&self, file_path: &str) -> Result<String> {
        if !Path::new(file_path).is_file() {
            return Err(DelveError::PdfExtraction {
                path: file_path.to_string(),
                message: "file not found".into(),
            });
        }
        let mut cmd = tokio::process::Command::new(&self.command);
        cmd.arg("-layout")
            .arg("-enc")
            .arg("UTF-8")
            .arg(file_path)
            .arg("-");
        let stdout = self.run_tool(&self.command, cmd, file_path).await?;
        Ok(String::from_utf8_lossy(&stdout).into_owned())
    }

    async fn run_tool(
        &self,
        program: &str,
        mut cmd: tokio::process::Command,
        file_path: &str,
    ) -> Result<Vec<u8>> {
        let err = |message: String| DelveError::PdfExtraction {
            path: file_path.to_string(),
            message,
        };

        let output = tokio::time::timeout(
            Duration::from_secs(self.timeout_secs),
            cmd.kill_on_drop(true).output(),
        )
        .await
        .map_err(|_| DelveError::ToolTimeout {
            tool: program.to_string(),
            timeout_secs: self.timeout_secs,
        })?
        .map_err(|e| err(format!("failed to run {}: {}", program, e)))?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(err(format!(
                "{} exited with {}: {}",
                program,
                output.status,
                stderr.trim()
            )));
        }
        Ok(output.stdout)
    }

    /// Base64 PNGs of the document's embedded images, or none when no
    /// image command is configured.
    async fn extract_images(&self, file_path: &str) -> Result<Vec<String>> {
        let Some(program) = self.image_command.as_deref() else {
            return Ok(Vec::new());
        };
        let dir = std::env::temp_dir().join(format!("delve_images_{}", uuid::Uuid::new_v4()));
        tokio::fs::create_dir_all(&dir).await?;

        let mut cmd = tokio::process::Command::new(program);
        cmd.arg("-png").arg(file_path).arg(dir.join("img"));
        let images = match self.run_tool(program, cmd, file_path).await {
            Ok(_) => self.read_images(&dir).await,
            Err(e) => Err(e),
        };
        if let Err(e) = tokio::fs::remove_dir_all(&dir).await {
            warn!(dir = %dir.display(), error = %e, "Failed to remove image directory");
        }
        images
    }

    async fn read_images(&self, dir: &Path) -> Result<Vec<String>> {
        let mut paths: Vec<PathBuf> = Vec::new();
        let mut entries = tokio::fs::read_dir(dir).await?;
        while let Some(entry) = entries.next_entry().await? {
            if entry.metadata().await?.len() >= self.min_image_bytes {
                paths.push(entry.path());
            }
        }
        // pdfimages numbers its output (img-000.png, img-001.png, ...).
        paths.sort();

        let mut images = Vec::new();
        for path in paths.into_iter().take(self.max_images) {
            let bytes = tokio::fs::read(&path).await?;
            images.push(base64::engine::general_purpose::STANDARD.encode(bytes));
        }
        Ok(images)
    }
}

impl PdfExtractor for PdftotextExtractor {
    fn extract<'a>(&'a self, file_path: &'a str) -> BoxFuture<'a, Result<PdfExtraction>> {
        Box::pin(async move {
            debug!(path = file_path, command = %self.command, "Extracting PDF");
            let raw = self.run_command(file_path).await?;
            let mut extraction = chunk_document(&raw, self.chunk_chars, self.min_chunk_chars);
            extraction.image_chunks = self.extract_images(file_path).await?;
            if extraction.is_empty() {
                return Err(DelveError::PdfExtraction {
                    path: file_path.to_string(),
                    message: "no extractable text (scanned document?)".into(),
                });
            }
            info!(
                path = file_path,
                text_chunks = extraction.text_chunks.len(),
                table_chunks = extraction.table_chunks.len(),
                image_chunks = extraction.image_chunks.len(),
                "PDF extracted"
            );
            Ok(extraction)
        })
    }
}

/// A block is treated as a table when most of its lines have at least
/// two column gaps (runs of 2+ spaces between non-space text).
fn looks_like_table(block: &str) -> bool {
    let lines: Vec<&str> = block.lines().filter(|l| !l.trim().is_empty()).collect();
    if lines.len() < 3 {
        return false;
    }
    let columnar = lines.iter().filter(|l| column_gaps(l.trim()) >= 2).count();
    columnar * 3 >= lines.len() * 2
}

fn column_gaps(line: &str) -> usize {
    let mut gaps = 0;
    let mut run = 0;
    for c in line.chars() {
        if c == ' ' {
            run += 1;
        } else {
            if run >= 2 {
                gaps += 1;
            }
            run = 0;
        }
    }
    gaps
}

/// Paragraph text with layout padding collapsed.
fn normalize_paragraph(block: &str) -> String {
    block
        .lines()
        .map(|l| l.split_whitespace().collect::<Vec<_>>().join(" "))
        .filter(|l| !l.is_empty())
        .collect::<Vec<_>>()
        .join("\n")
}

fn split_hard(text: &str, max_chars: usize) -> Vec<String> {
    let chars: Vec<char> = text.chars().collect();
    chars
        .chunks(max_chars)
        .map(|c| c.iter().collect::<String>())
        .collect()
}

/// Split raw `pdftotext -layout` output into chunks.
///
/// Paragraphs are packed into text chunks of at most `chunk_chars`
/// characters; a trailing chunk shorter than `min_chunk_chars` is merged
/// into its predecessor. Table-like blocks become their own chunks with
/// layout preserved.
pub fn chunk_document(raw: &str, chunk_chars: usize, min_chunk_chars: usize) -> PdfExtraction {
    let mut extraction = PdfExtraction::default();
    let mut current = String::new();

    // Form feeds separate pages.
    let normalized = raw.replace('\u{c}', "\n\n");
    let blocks = normalized
        .split("\n\n")
        .map(|b| b.trim_matches('\n'))
        .filter(|b| !b.trim().is_empty());

    for block in blocks {
        if looks_like_table(block) {
            extraction.table_chunks.push(block.to_string());
            continue;
        }

        let paragraph = normalize_paragraph(block);
        let pieces = if paragraph.chars().count() > chunk_chars {
            split_hard(&paragraph, chunk_chars)
        } else {
            vec![paragraph]
        };

        for piece in pieces {
            if !current.is_empty()
                && current.chars().count() + 2 + piece.chars().count() > chunk_chars
            {
                extraction.text_chunks.push(std::mem::take(&mut current));
            }
            if !current.is_empty() {
                current.push_str("\n\n");
            }
            current.push_str(&piece);
        }
    }

    if !current.is_empty() {
        let short = current.chars().count() < min_chunk_chars;
        match extraction.text_chunks.last_mut() {
            Some(last) if short => {
                last.push_str("\n\n");
                last.push_str(&current);
            }
            _ => extraction.text_chunks.push(current),
        }
    }

    extraction
}

#[cfg(test)]
mod tests {
    use super::*;

    const TABLE: &str = "Year      Revenue     Margin\n2021      10.2        4%\n2022      12.9        6%\n2023      15.0        7%";

    #[test]
    fn test_table_detection() {
        assert!(looks_like_table(TABLE));
        assert!(!looks_like_table("Plain prose that spans\nseveral lines of the\ndocument body."));
    }

    #[test]
    fn test_chunk_document_separates_tables() {
        let raw = format!(
            "Introduction\n\nThe   company grew   steadily.\n\n{}\n\nConclusion text.",
            TABLE
        );
        let ex = chunk_document(&raw, 1000, 0);
        assert_eq!(ex.table_chunks.len(), 1);
        assert!(ex.table_chunks[0].contains("Revenue"));
        assert_eq!(ex.text_chunks.len(), 1);
        assert!(ex.text_chunks[0].contains("The company grew steadily."));
        assert!(ex.text_chunks[0].contains("Conclusion text."));
        assert!(ex.image_chunks.is_empty());
    }

    #[test]
    fn test_chunk_document_respects_chunk_size() {
        let para = "word ".repeat(40); // 200 chars
        let raw = vec![para.trim(); 6].join("\n\n");
        let ex = chunk_document(&raw, 450, 0);
        assert_eq!(ex.text_chunks.len(), 3);
        for chunk in &ex.text_chunks {
            assert!(chunk.chars().count() <= 450);
        }
    }

    #[test]
    fn test_short_tail_is_merged() {
        let para = "x".repeat(300);
        let raw = format!("{}\n\n{}\n\ntail", para, para);
        let ex = chunk_document(&raw, 305, 50);
        assert_eq!(ex.text_chunks.len(), 2);
        assert!(ex.text_chunks[1].ends_with("tail"));
    }

    #[test]
    fn test_oversized_paragraph_is_split() {
        let raw = "y".repeat(2500);
        let ex = chunk_document(&raw, 1000, 0);
        assert_eq!(ex.text_chunks.len(), 3);
    }

    #[test]
    fn test_page_breaks_split_blocks() {
        let ex = chunk_document("page one\u{c}page two", 10, 0);
        assert_eq!(ex.text_chunks, vec!["page one", "page two"]);
    }

    #[tokio::test]
    async fn test_images_skipped_without_image_command() {
        let extractor = PdftotextExtractor::new(&PdfConfig::default());
        let images = extractor.extract_images("paper.pdf").await.unwrap();
        assert!(images.is_empty());
    }

    #[tokio::test]
    async fn test_read_images_filters_orders_and_encodes() {
        let dir = std::env::temp_dir().join(format!("delve_images_test_{}", uuid::Uuid::new_v4()));
        std::fs::create_dir_all(&dir).unwrap();
        std::fs::write(dir.join("img-001.png"), b"second").unwrap();
        std::fs::write(dir.join("img-000.png"), b"image").unwrap();
        std::fs::write(dir.join("img-002.png"), b"ic").unwrap();

        let extractor = PdftotextExtractor::new(&PdfConfig {
            min_image_bytes: 4,
            ..PdfConfig::default()
        });
        let images = extractor.read_images(&dir).await.unwrap();
        assert_eq!(images, vec!["aW1hZ2U=", "c2Vjb25k"]);

        let capped = PdftotextExtractor::new(&PdfConfig {
            min_image_bytes: 0,
            max_images: 1,
            ..PdfConfig::default()
        });
        assert_eq!(capped.read_images(&dir).await.unwrap(), vec!["aW1hZ2U="]);

        std::fs::remove_dir_all(&dir).unwrap();
    }

    #[tokio::test]
    async fn test_missing_file_is_extraction_error() {
        let extractor = PdftotextExtractor::new(&PdfConfig::default());
        let err = extractor
            .extract("/nonexistent/definitely-missing.pdf")
            .await
            .unwrap_err();
        assert!(matches!(err, DelveError::PdfExtraction { .. }));
    }
}
