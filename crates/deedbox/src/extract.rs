//! Plain-text extraction for indexing.
//!
//! The extractor is picked by file extension: PDF through `pdf-extract`,
//! DOCX by reading `word/document.xml` out of the ZIP container, anything
//! else as (lossy) UTF-8 text. Legacy `.doc` files have no parser here;
//! their printable runs are kept so they still yield some searchable text.

use std::io::Read;

use thiserror::Error;

/// Maximum decompressed bytes read from a single ZIP entry.
const MAX_XML_ENTRY_BYTES: u64 = 50 * 1024 * 1024;

#[derive(Debug, Error)]
pub enum ExtractError {
    #[error("PDF extraction failed: {0}")]
    Pdf(String),
    #[error("DOCX extraction failed: {0}")]
    Docx(String),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DocumentKind {
    Pdf,
    Docx,
    LegacyDoc,
    Text,
}

impl DocumentKind {
    pub fn from_path(path: &str) -> Self {
        let ext = path
            .rsplit_once('.')
            .map(|(_, ext)| ext.to_ascii_lowercase())
            .unwrap_or_default();
        match ext.as_str() {
            "pdf" => DocumentKind::Pdf,
            "docx" => DocumentKind::Docx,
            "doc" => DocumentKind::LegacyDoc,
            _ => DocumentKind::Text,
        }
    }
}

/// Extract text from the bytes of the document at `path`.
pub fn extract_text(path: &str, bytes: &[u8]) -> Result<String, ExtractError> {
    match DocumentKind::from_path(path) {
        DocumentKind::Pdf => {
            pdf_extract::extract_text_from_mem(bytes).map_err(|e| ExtractError::Pdf(e.to_string()))
        }
        DocumentKind::Docx => extract_docx(bytes),
        DocumentKind::LegacyDoc => Ok(printable_text(bytes)),
        DocumentKind::Text => Ok(String::from_utf8_lossy(bytes).into_owned()),
    }
}

fn extract_docx(bytes: &[u8]) -> Result<String, ExtractError> {
    let mut archive = zip::ZipArchive::new(std::io::Cursor::new(bytes))
        .map_err(|e| ExtractError::Docx(e.to_string()))?;
    let entry = archive
        .by_name("word/document.xml")
        .map_err(|_| ExtractError::Docx("word/document.xml not found".to_string()))?;

    let mut xml = Vec::new();
    entry
        .take(MAX_XML_ENTRY_BYTES)
        .read_to_end(&mut xml)
        .map_err(|e| ExtractError::Docx(e.to_string()))?;
    if xml.len() as u64 >= MAX_XML_ENTRY_BYTES {
        return Err(ExtractError::Docx(
            "word/document.xml exceeds size limit".to_string(),
        ));
    }
    docx_paragraphs(&xml)
}

/// Concatenate `<w:t>` runs, one blank line after each `<w:p>` paragraph.
fn docx_paragraphs(xml: &[u8]) -> Result<String, ExtractError> {
    use quick_xml::events::Event;

    let mut out = String::new();
    let mut reader = quick_xml::Reader::from_reader(xml);
    reader.config_mut().trim_text(false);
    let mut buf = Vec::new();
    let mut in_text = false;
    loop {
        match reader.read_event_into(&mut buf) {
            Ok(Event::Start(e)) if e.local_name().as_ref() == b"t" => in_text = true,
            Ok(Event::End(e)) => match e.local_name().as_ref() {
                b"t" => in_text = false,
                b"p" => out.push_str("\n\n"),
                _ => {}
            },
            Ok(Event::Text(te)) if in_text => {
                out.push_str(te.unescape().unwrap_or_default().as_ref());
            }
            Ok(Event::Eof) => break,
            Err(e) => return Err(ExtractError::Docx(e.to_string())),
            _ => {}
        }
        buf.clear();
    }
    Ok(out.trim_end().to_string())
}

/// Keep runs of at least four printable characters from a binary blob.
fn printable_text(bytes: &[u8]) -> String {
    let decoded = String::from_utf8_lossy(bytes);
    let mut out = String::new();
    let mut run = String::new();
    for c in decoded.chars() {
        if (c.is_alphanumeric() || c.is_ascii_punctuation() || c == ' ') && c != '\u{FFFD}' {
            run.push(c);
            continue;
        }
        if run.trim().chars().count() >= 4 {
            out.push_str(run.trim());
            out.push('\n');
        }
        run.clear();
    }
    if run.trim().chars().count() >= 4 {
        out.push_str(run.trim());
    }
    out.trim_end().to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn docx_with(paragraphs: &[&str]) -> Vec<u8> {
        let body: String = paragraphs
            .iter()
            .map(|p| format!("<w:p><w:r><w:t>{}</w:t></w:r></w:p>", p))
            .collect();
        let xml = format!(
            "<?xml version=\"1.0\"?><w:document xmlns:w=\"http://schemas.openxmlformats.org/wordprocessingml/2006/main\"><w:body>{}</w:body></w:document>",
            body
        );
        let mut buf = Vec::new();
        {
            let mut zip = zip::ZipWriter::new(std::io::Cursor::new(&mut buf));
            zip.start_file("word/document.xml", zip::write::SimpleFileOptions::default())
                .unwrap();
            zip.write_all(xml.as_bytes()).unwrap();
            zip.finish().unwrap();
        }
        buf
    }

    #[test]
    fn test_kind_from_extension() {
        assert_eq!(DocumentKind::from_path("a/Lease.PDF"), DocumentKind::Pdf);
        assert_eq!(DocumentKind::from_path("a/lease.docx"), DocumentKind::Docx);
        assert_eq!(DocumentKind::from_path("a/lease.doc"), DocumentKind::LegacyDoc);
        assert_eq!(DocumentKind::from_path("notes.md"), DocumentKind::Text);
        assert_eq!(DocumentKind::from_path("README"), DocumentKind::Text);
    }

    #[test]
    fn test_docx_paragraphs() {
        let bytes = docx_with(&["Monthly rent: 900 EUR", "Deposit &amp; fees"]);
        let text = extract_text("leases/unit5.docx", &bytes).unwrap();
        assert_eq!(text, "Monthly rent: 900 EUR\n\nDeposit & fees");
    }

    #[test]
    fn test_docx_without_document_xml() {
        let mut buf = Vec::new();
        {
            let mut zip = zip::ZipWriter::new(std::io::Cursor::new(&mut buf));
            zip.start_file("other.xml", zip::write::SimpleFileOptions::default())
                .unwrap();
            zip.write_all(b"<x/>").unwrap();
            zip.finish().unwrap();
        }
        assert!(matches!(extract_text("a.docx", &buf), Err(ExtractError::Docx(_))));
    }

    #[test]
    fn test_text_is_lossy() {
        let text = extract_text("a.txt", b"Miete \xff 900").unwrap();
        assert!(text.starts_with("Miete "));
        assert!(text.ends_with(" 900"));
    }

    #[test]
    fn test_legacy_doc_keeps_printable_runs() {
        let text = extract_text("a.doc", b"\x00\x01Kaufvertrag Haus\x00\x02ab\x00").unwrap();
        assert_eq!(text, "Kaufvertrag Haus");
    }
}
