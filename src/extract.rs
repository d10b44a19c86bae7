//! Multi-format text extraction.
//!
//! The pipeline reads the file bytes and hands them here together with the
//! [`FileKind`] selected from the extension. Text and code are decoded as
//! UTF-8, PDFs go through `pdf-extract`, DOCX through `zip` + `quick-xml`,
//! and images are described by the vision-capable model provider.

use std::io::Read;
use std::path::Path;
use std::sync::Arc;

use crate::error::ExtractError;
use crate::provider::ModelProvider;

pub const MIME_PDF: &str = "application/pdf";
pub const MIME_DOCX: &str =
    "application/vnd.openxmlformats-officedocument.wordprocessingml.document";

/// Maximum decompressed bytes to read from a single ZIP entry (zip-bomb protection).
const MAX_XML_ENTRY_BYTES: u64 = 50 * 1024 * 1024;

const TEXT_EXTENSIONS: &[&str] = &[
    "txt", "md", "markdown", "rst", "log", "csv", "tsv", "rtf", "html", "htm", "css", "xml",
    "svg", "json", "yaml", "yml", "toml", "ini", "cfg", "conf", "env", "sh", "bash", "zsh", "bat",
    "ps1", "sql", "py", "js", "ts", "jsx", "tsx", "c", "h", "cpp", "hpp", "cc", "java", "go", "rs",
    "php", "rb", "swift", "kt", "scala", "r", "m", "lua", "pl",
];

/// File kinds the extractor knows how to turn into text.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FileKind {
    /// Prose, code, and configuration files read as UTF-8.
    Text,
    Pdf,
    Docx,
    /// Raster image with its MIME type.
    Image(&'static str),
}

impl FileKind {
    pub fn content_type(&self) -> &'static str {
        match *self {
            FileKind::Text => "text/plain",
            FileKind::Pdf => MIME_PDF,
            FileKind::Docx => MIME_DOCX,
            FileKind::Image(mime) => mime,
        }
    }
}

/// Select the file kind by extension. `None` means unsupported.
pub fn detect_kind(path: &Path) -> Option<FileKind> {
    let ext = path.extension()?.to_str()?.to_ascii_lowercase();
    let kind = match ext.as_str() {
        "pdf" => FileKind::Pdf,
        "docx" => FileKind::Docx,
        "png" => FileKind::Image("image/png"),
        "jpg" | "jpeg" => FileKind::Image("image/jpeg"),
        "gif" => FileKind::Image("image/gif"),
        "webp" => FileKind::Image("image/webp"),
        "bmp" => FileKind::Image("image/bmp"),
        "tif" | "tiff" => FileKind::Image("image/tiff"),
        other if TEXT_EXTENSIONS.contains(&other) => FileKind::Text,
        _ => return None,
    };
    Some(kind)
}

pub fn is_supported(path: &Path) -> bool {
    detect_kind(path).is_some()
}

/// Turns file bytes into plain text.
///
/// Holds the model provider for image description; all other kinds are
/// handled locally.
#[derive(Clone)]
pub struct ContentExtractor {
    vision: Arc<dyn ModelProvider>,
}

impl ContentExtractor {
    pub fn new(vision: Arc<dyn ModelProvider>) -> Self {
        Self { vision }
    }

    /// Extract plain text from `bytes` read from `path`.
    pub async fn extract(
        &self,
        path: &Path,
        bytes: Vec<u8>,
        kind: FileKind,
    ) -> Result<String, ExtractError> {
        tracing::debug!(path = %path.display(), content_type = kind.content_type(), "extracting");
        match kind {
            FileKind::Text => decode_text(bytes),
            FileKind::Pdf => tokio::task::spawn_blocking(move || extract_pdf(&bytes))
                .await
                .map_err(|e| ExtractError::Task(e.to_string()))?,
            FileKind::Docx => tokio::task::spawn_blocking(move || extract_docx(&bytes))
                .await
                .map_err(|e| ExtractError::Task(e.to_string()))?,
            FileKind::Image(_) => self
                .vision
                .describe_image(&bytes)
                .await
                .map_err(ExtractError::Vision),
        }
    }
}

/// Decode text content. NUL bytes mark binary data mislabeled as text;
/// other invalid sequences are replaced.
fn decode_text(bytes: Vec<u8>) -> Result<String, ExtractError> {
    match String::from_utf8(bytes) {
        Ok(s) => Ok(s),
        Err(e) => {
            let bytes = e.into_bytes();
            if bytes.contains(&0) {
                return Err(ExtractError::Encoding(
                    "content looks binary (contains NUL bytes)".to_string(),
                ));
            }
            Ok(String::from_utf8_lossy(&bytes).into_owned())
        }
    }
}

fn extract_pdf(bytes: &[u8]) -> Result<String, ExtractError> {
    pdf_extract::extract_text_from_mem(bytes).map_err(|e| ExtractError::Pdf(e.to_string()))
}

fn extract_docx(bytes: &[u8]) -> Result<String, ExtractError> {
    let mut archive = zip::ZipArchive::new(std::io::Cursor::new(bytes))
        .map_err(|e| ExtractError::Ooxml(e.to_string()))?;
    let entry = archive
        .by_name("word/document.xml")
        .map_err(|_| ExtractError::Ooxml("word/document.xml not found".to_string()))?;
    let mut doc_xml = Vec::new();
    entry
        .take(MAX_XML_ENTRY_BYTES)
        .read_to_end(&mut doc_xml)
        .map_err(|e| ExtractError::Ooxml(e.to_string()))?;
    if doc_xml.len() as u64 >= MAX_XML_ENTRY_BYTES {
        return Err(ExtractError::Ooxml(
            "word/document.xml exceeds size limit".to_string(),
        ));
    }
    extract_paragraphs(&doc_xml)
}

/// Collect `<w:t>` runs, separating `<w:p>` paragraphs with blank lines so
/// the chunker can split on them.
fn extract_paragraphs(xml: &[u8]) -> Result<String, ExtractError> {
    use quick_xml::events::Event;

    let mut out = String::new();
    let mut reader = quick_xml::Reader::from_reader(xml);
    let mut buf = Vec::new();
    let mut in_text = false;
    loop {
        match reader.read_event_into(&mut buf) {
            Ok(Event::Start(e)) if e.local_name().as_ref() == b"t" => in_text = true,
            Ok(Event::Text(te)) if in_text => {
                let text = te
                    .unescape()
                    .map_err(|e| ExtractError::Ooxml(e.to_string()))?;
                out.push_str(&text);
            }
            Ok(Event::End(e)) => match e.local_name().as_ref() {
                b"t" => in_text = false,
                b"p" if !out.is_empty() && !out.ends_with("\n\n") => out.push_str("\n\n"),
                _ => {}
            },
            Ok(Event::Eof) => break,
            Err(e) => return Err(ExtractError::Ooxml(e.to_string())),
            _ => {}
        }
        buf.clear();
    }
    Ok(out.trim_end().to_string())
}
