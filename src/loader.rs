//! Document loading from the watched documents directory.
//!
//! Scans one directory level, dispatches to a format parser by file
//! extension, and tolerates per-file failures: a file that cannot be parsed
//! is logged and skipped, never aborting the rest of the load.

use anyhow::Result;
use std::path::Path;
use tracing::{debug, warn};
use walkdir::WalkDir;

use crate::extract;
use crate::models::{Document, SourceFormat};

/// Load every recognized document under `dir` (non-recursive).
///
/// The directory is created if absent. Files named `*.pdf`, `*.txt`,
/// `*.doc`/`*.docx` are parsed; everything else is silently ignored.
/// Returns an empty vec (not an error) when nothing is loadable.
pub fn load_documents(dir: &Path) -> Result<Vec<Document>> {
    if !dir.exists() {
        std::fs::create_dir_all(dir)?;
        debug!(dir = %dir.display(), "created documents directory");
        return Ok(Vec::new());
    }

    let mut entries: Vec<_> = WalkDir::new(dir)
        .min_depth(1)
        .max_depth(1)
        .into_iter()
        .filter_map(|e| e.ok())
        .filter(|e| e.file_type().is_file())
        .map(|e| e.into_path())
        .collect();

    // Sort for deterministic ordering
    entries.sort();

    let mut documents = Vec::new();
    for path in entries {
        let ext = path
            .extension()
            .and_then(|e| e.to_str())
            .map(|e| e.to_ascii_lowercase())
            .unwrap_or_default();

        let Some(format) = SourceFormat::from_extension(&ext) else {
            continue;
        };

        match load_file(&path, format) {
            Ok(doc) => documents.push(doc),
            Err(e) => {
                warn!(file = %path.display(), error = %e, "skipping unparseable file");
            }
        }
    }

    Ok(documents)
}

fn load_file(path: &Path, format: SourceFormat) -> Result<Document> {
    let text = match format {
        SourceFormat::Txt => std::fs::read_to_string(path)?,
        SourceFormat::Pdf => {
            let bytes = std::fs::read(path)?;
            extract::extract_pdf(&bytes)?
        }
        SourceFormat::Docx => {
            let bytes = std::fs::read(path)?;
            extract::extract_docx(&bytes)?
        }
    };

    Ok(Document {
        text,
        source_path: path.to_path_buf(),
        format,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::TempDir;

    #[test]
    fn missing_directory_is_created_and_empty() {
        let tmp = TempDir::new().unwrap();
        let dir = tmp.path().join("documents");
        assert!(!dir.exists());
        let docs = load_documents(&dir).unwrap();
        assert!(docs.is_empty());
        assert!(dir.exists());
    }

    #[test]
    fn empty_directory_loads_nothing() {
        let tmp = TempDir::new().unwrap();
        let docs = load_documents(tmp.path()).unwrap();
        assert!(docs.is_empty());
    }

    #[test]
    fn txt_files_are_loaded_with_metadata() {
        let tmp = TempDir::new().unwrap();
        fs::write(tmp.path().join("a.txt"), "Alpha. Beta. Gamma.").unwrap();
        let docs = load_documents(tmp.path()).unwrap();
        assert_eq!(docs.len(), 1);
        assert_eq!(docs[0].text, "Alpha. Beta. Gamma.");
        assert_eq!(docs[0].format, SourceFormat::Txt);
        assert!(docs[0].source_path.ends_with("a.txt"));
    }

    #[test]
    fn unrecognized_extensions_are_skipped() {
        let tmp = TempDir::new().unwrap();
        fs::write(tmp.path().join("notes.md"), "markdown").unwrap();
        fs::write(tmp.path().join("data.bin"), [0u8, 1, 2]).unwrap();
        fs::write(tmp.path().join("keep.txt"), "kept").unwrap();
        let docs = load_documents(tmp.path()).unwrap();
        assert_eq!(docs.len(), 1);
        assert_eq!(docs[0].text, "kept");
    }

    #[test]
    fn parse_failure_skips_file_but_keeps_rest() {
        let tmp = TempDir::new().unwrap();
        fs::write(tmp.path().join("broken.pdf"), "not a pdf at all").unwrap();
        fs::write(tmp.path().join("ok.txt"), "still here").unwrap();
        let docs = load_documents(tmp.path()).unwrap();
        assert_eq!(docs.len(), 1);
        assert_eq!(docs[0].text, "still here");
    }

    #[test]
    fn subdirectories_are_not_descended() {
        let tmp = TempDir::new().unwrap();
        let sub = tmp.path().join("nested");
        fs::create_dir(&sub).unwrap();
        fs::write(sub.join("deep.txt"), "nested").unwrap();
        fs::write(tmp.path().join("top.txt"), "top").unwrap();
        let docs = load_documents(tmp.path()).unwrap();
        assert_eq!(docs.len(), 1);
        assert_eq!(docs[0].text, "top");
    }

    #[test]
    fn ordering_is_deterministic() {
        let tmp = TempDir::new().unwrap();
        fs::write(tmp.path().join("b.txt"), "second").unwrap();
        fs::write(tmp.path().join("a.txt"), "first").unwrap();
        let docs = load_documents(tmp.path()).unwrap();
        let texts: Vec<&str> = docs.iter().map(|d| d.text.as_str()).collect();
        assert_eq!(texts, vec!["first", "second"]);
    }
}
