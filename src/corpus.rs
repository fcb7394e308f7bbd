//! Knowledge-base loading.
//!
//! The corpus is one plain-text file. Bytes that are not valid UTF-8 are
//! replaced rather than rejected, and the document records which decoding
//! was used so `index status` can report it.

use std::io::ErrorKind;
use std::path::Path;

use sha2::{Digest, Sha256};
use tracing::{debug, warn};

use travel_guide_core::models::{CorpusDocument, TextEncoding};

use crate::error::RagError;

/// Read the corpus file at `path`.
///
/// Fails with [`RagError::CorpusNotFound`] when nothing exists at `path`
/// and [`RagError::CorpusReadError`] for any other I/O failure (including
/// `path` being a directory).
pub fn load_corpus(path: &Path) -> Result<CorpusDocument, RagError> {
    let bytes = match std::fs::read(path) {
        Ok(bytes) => bytes,
        Err(e) if e.kind() == ErrorKind::NotFound => {
            return Err(RagError::CorpusNotFound(path.display().to_string()));
        }
        Err(e) => {
            return Err(RagError::CorpusReadError {
                path: path.display().to_string(),
                detail: e.to_string(),
            });
        }
    };

    let (text, encoding) = match String::from_utf8(bytes) {
        Ok(text) => (text, TextEncoding::Utf8),
        Err(e) => {
            warn!(
                path = %path.display(),
                valid_up_to = e.utf8_error().valid_up_to(),
                "corpus is not valid UTF-8; decoding lossily"
            );
            (
                String::from_utf8_lossy(e.as_bytes()).into_owned(),
                TextEncoding::Utf8Lossy,
            )
        }
    };

    debug!(path = %path.display(), chars = text.chars().count(), "loaded corpus");

    Ok(CorpusDocument {
        path: path.to_path_buf(),
        text,
        encoding,
    })
}

/// SHA-256 of the decoded corpus text, hex encoded.
pub fn corpus_hash(doc: &CorpusDocument) -> String {
    format!("{:x}", Sha256::digest(doc.text.as_bytes()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_missing_file() {
        let dir = tempfile::tempdir().unwrap();
        let err = load_corpus(&dir.path().join("rag.txt")).unwrap_err();
        assert!(matches!(err, RagError::CorpusNotFound(_)));
    }

    #[test]
    fn test_directory_is_read_error() {
        let dir = tempfile::tempdir().unwrap();
        let err = load_corpus(dir.path()).unwrap_err();
        assert!(matches!(err, RagError::CorpusReadError { .. }));
    }

    #[test]
    fn test_utf8_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("rag.txt");
        std::fs::write(&path, "Zürich: Altstadt, Üetliberg.").unwrap();
        let doc = load_corpus(&path).unwrap();
        assert_eq!(doc.encoding, TextEncoding::Utf8);
        assert_eq!(doc.text, "Zürich: Altstadt, Üetliberg.");
    }

    #[test]
    fn test_invalid_bytes_are_replaced() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("rag.txt");
        std::fs::write(&path, b"Lisbon \xff\xfe trams").unwrap();
        let doc = load_corpus(&path).unwrap();
        assert_eq!(doc.encoding, TextEncoding::Utf8Lossy);
        assert!(doc.text.starts_with("Lisbon "));
        assert!(doc.text.ends_with(" trams"));
        assert!(doc.text.contains('\u{FFFD}'));
    }

    #[test]
    fn test_hash_is_stable() {
        let doc = CorpusDocument {
            path: "x".into(),
            text: "abc".into(),
            encoding: TextEncoding::Utf8,
        };
        assert_eq!(
            corpus_hash(&doc),
            "ba7816bf8f01cfea414140de5dae2223b00361a396177a9cb410ff61f20015ad"
        );
    }
}
