//! Step 1 of C6: read a source document into the flat block form the
//! prompt builder enumerates.
//!
//! File-format parsing itself (docx/pdf layout) is a storage-provider
//! concern left external to the fabric (§1 Non-goals); what belongs here
//! is the mechanical acceptance checks the pipeline is specified to apply
//! before ever calling the model.

use std::path::Path;

use crate::error::ErrorKind;

/// 50 MB cap per §4.6 step 1.
pub const MAX_FILE_BYTES: u64 = 50 * 1024 * 1024;

const SUPPORTED_EXTENSIONS: &[&str] = &["docx", "txt", "md"];

/// One paragraph or table, flattened to text for the prompt (§4.6 step 2
/// caps this to the first 200 paragraphs and first 5 tables upstream).
#[derive(Debug, Clone)]
pub enum Block {
    Paragraph { text: String, style_name: Option<String>, heading_level: u8 },
    Table { rows: Vec<Vec<String>> },
}

#[derive(Debug, Clone)]
pub struct ExtractedDocument {
    pub title: Option<String>,
    pub blocks: Vec<Block>,
}

impl ExtractedDocument {
    /// Flatten to the plain-text form the prompt builder enumerates,
    /// already capped to the first 200 paragraphs and 5 tables.
    #[must_use]
    pub fn to_prompt_text(&self) -> String {
        let mut paragraphs_seen = 0usize;
        let mut tables_seen = 0usize;
        let mut out = String::new();

        if let Some(title) = &self.title {
            out.push_str(&format!("# {title}\n\n"));
        }

        for block in &self.blocks {
            match block {
                Block::Paragraph { text, heading_level, .. } => {
                    if paragraphs_seen >= 200 {
                        continue;
                    }
                    paragraphs_seen += 1;
                    if *heading_level > 0 {
                        out.push_str(&"#".repeat(*heading_level as usize));
                        out.push(' ');
                    }
                    out.push_str(text);
                    out.push('\n');
                }
                Block::Table { rows } => {
                    if tables_seen >= 5 {
                        continue;
                    }
                    tables_seen += 1;
                    for row in rows {
                        out.push_str("| ");
                        out.push_str(&row.join(" | "));
                        out.push_str(" |\n");
                    }
                }
            }
        }
        out
    }
}

#[derive(Debug, thiserror::Error)]
pub enum ExtractError {
    #[error("file not found: {0}")]
    FileNotFound(String),
    #[error("file could not be read: {0}")]
    FileUnreadable(String),
    #[error("unsupported file format: {0}")]
    UnsupportedFormat(String),
    #[error("file exceeds the {MAX_FILE_BYTES} byte cap")]
    FileTooLarge,
}

impl ExtractError {
    #[must_use]
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::FileNotFound(_) => ErrorKind::FileNotFound,
            Self::FileUnreadable(_) => ErrorKind::FileUnreadable,
            Self::UnsupportedFormat(_) => ErrorKind::UnsupportedFileType,
            Self::FileTooLarge => ErrorKind::PayloadTooLarge,
        }
    }
}

/// Read `path` and split it into paragraph blocks. Only plain-text-shaped
/// formats are parsed directly; richer formats are rejected rather than
/// guessed at, since their binary layout is out of scope here.
pub async fn extract(path: &Path) -> Result<ExtractedDocument, ExtractError> {
    let extension = path.extension().and_then(|e| e.to_str()).unwrap_or("").to_ascii_lowercase();
    if !SUPPORTED_EXTENSIONS.contains(&extension.as_str()) {
        return Err(ExtractError::UnsupportedFormat(extension));
    }

    let metadata = tokio::fs::metadata(path).await.map_err(|e| {
        if e.kind() == std::io::ErrorKind::NotFound {
            ExtractError::FileNotFound(path.display().to_string())
        } else {
            ExtractError::FileUnreadable(e.to_string())
        }
    })?;
    if metadata.len() > MAX_FILE_BYTES {
        return Err(ExtractError::FileTooLarge);
    }

    let content = tokio::fs::read_to_string(path).await.map_err(|e| ExtractError::FileUnreadable(e.to_string()))?;

    let title = content.lines().next().map(str::to_string);
    let blocks = content
        .lines()
        .map(|line| {
            let heading_level = line.chars().take_while(|c| *c == '#').count().min(6) as u8;
            Block::Paragraph { text: line.trim_start_matches('#').trim().to_string(), style_name: None, heading_level }
        })
        .collect();

    Ok(ExtractedDocument { title, blocks })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn missing_file_is_file_not_found() {
        let err = extract(Path::new("/nonexistent/path.txt")).await.unwrap_err();
        assert!(matches!(err, ExtractError::FileNotFound(_)));
        assert_eq!(err.kind(), ErrorKind::FileNotFound);
    }

    #[tokio::test]
    async fn unsupported_extension_is_rejected_before_touching_disk() {
        let err = extract(Path::new("/nonexistent/path.exe")).await.unwrap_err();
        assert!(matches!(err, ExtractError::UnsupportedFormat(_)));
    }

    #[test]
    fn to_prompt_text_caps_paragraphs_at_200() {
        let doc = ExtractedDocument {
            title: Some("Doc".into()),
            blocks: (0..250).map(|i| Block::Paragraph { text: format!("line {i}"), style_name: None, heading_level: 0 }).collect(),
        };
        let text = doc.to_prompt_text();
        assert!(text.contains("line 0"));
        assert!(!text.contains("line 249"));
    }
}
