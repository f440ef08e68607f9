//! Artifact storage and the merge engine.
//!
//! One PDF per record, written once under the job's `pdfs/` directory with
//! an ordinal-prefixed name so a directory listing reproduces completion
//! order. After the queue drains, the succeeded artifacts are concatenated
//! into a single combined report.

use std::fs;
use std::path::{Path, PathBuf};

use lopdf::{Document, Object, ObjectId};
use thiserror::Error;
use tracing::{info, warn};

use crate::record::Record;

#[derive(Error, Debug)]
pub enum ArtifactError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("PDF error: {0}")]
    Pdf(#[from] lopdf::Error),

    #[error("CSV error: {0}")]
    Csv(#[from] csv::Error),

    #[error("no artifacts to merge")]
    NothingToMerge,
}

/// Reduce a record key to a filesystem-safe name component.
pub fn sanitize_component(raw: &str) -> String {
    let mut out: String = raw
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || c == '-' || c == '_' {
                c
            } else {
                '_'
            }
        })
        .collect();
    out.truncate(80);
    if out.is_empty() {
        out.push_str("record");
    }
    out
}

/// Per-record artifact sink, scoped to one job's output directory.
pub struct ArtifactStore {
    pdfs_dir: PathBuf,
}

impl ArtifactStore {
    pub fn new(pdfs_dir: impl Into<PathBuf>) -> std::io::Result<Self> {
        let pdfs_dir = pdfs_dir.into();
        fs::create_dir_all(&pdfs_dir)?;
        Ok(Self { pdfs_dir })
    }

    pub fn dir(&self) -> &Path {
        &self.pdfs_dir
    }

    /// Write one artifact. `ordinal` is the completion sequence number, so
    /// file names sort in the order records actually finished. Artifacts are
    /// write-once; a name collision is an error, never an overwrite.
    pub fn store(
        &self,
        ordinal: usize,
        key: &str,
        bytes: &[u8],
    ) -> Result<PathBuf, ArtifactError> {
        let name = format!("{:03}_{}.pdf", ordinal, sanitize_component(key));
        let path = self.pdfs_dir.join(name);

        if path.exists() {
            return Err(ArtifactError::Io(std::io::Error::new(
                std::io::ErrorKind::AlreadyExists,
                format!("artifact already exists: {}", path.display()),
            )));
        }

        fs::write(&path, bytes)?;
        info!("PDF saved: {}", path.display());
        Ok(path)
    }
}

/// Concatenate the artifacts at `paths` (in the given order) into `output`.
///
/// A path that no longer exists or fails to parse is skipped with a warning
/// rather than failing the whole merge. Returns the number of documents
/// merged.
pub fn merge_pdfs(paths: &[PathBuf], output: &Path) -> Result<usize, ArtifactError> {
    let mut merged = Document::with_version("1.5");
    let mut max_id = 1u32;
    let mut merged_count = 0usize;

    // (page object id, page object) in completion order, plus every other
    // object from each source document.
    let mut page_objects: Vec<(ObjectId, Object)> = Vec::new();
    let mut source_objects: Vec<(ObjectId, Object)> = Vec::new();

    for path in paths {
        if !path.exists() {
            warn!("Merge: artifact missing, skipping: {}", path.display());
            continue;
        }
        let mut doc = match Document::load(path) {
            Ok(d) => d,
            Err(e) => {
                warn!("Merge: unreadable artifact {} ({}), skipping", path.display(), e);
                continue;
            }
        };

        doc.renumber_objects_with(max_id);
        max_id = doc.max_id + 1;

        for (_, object_id) in doc.get_pages() {
            if let Ok(object) = doc.get_object(object_id) {
                page_objects.push((object_id, object.to_owned()));
            }
        }
        source_objects.extend(doc.objects.clone());
        merged_count += 1;
    }

    if merged_count == 0 {
        return Err(ArtifactError::NothingToMerge);
    }

    // One Catalog and one Pages node survive; everything else is carried
    // over verbatim. Outlines are dropped, they reference dead objects.
    let mut catalog_object: Option<(ObjectId, Object)> = None;
    let mut pages_object: Option<(ObjectId, Object)> = None;

    for (object_id, object) in source_objects {
        let type_name: Vec<u8> = object
            .as_dict()
            .ok()
            .and_then(|d| d.get(b"Type").ok())
            .and_then(|t| t.as_name().ok())
            .map(|n| n.to_vec())
            .unwrap_or_default();

        match type_name.as_slice() {
            b"Catalog" => {
                catalog_object.get_or_insert((object_id, object));
            }
            b"Pages" => {
                if let Ok(dict) = object.as_dict() {
                    let mut dict = dict.clone();
                    if let Some((_, ref existing)) = pages_object {
                        if let Ok(existing) = existing.as_dict() {
                            dict.extend(existing);
                        }
                    }
                    let id = pages_object.map(|(id, _)| id).unwrap_or(object_id);
                    pages_object = Some((id, Object::Dictionary(dict)));
                }
            }
            b"Page" | b"Outlines" | b"Outline" => {}
            _ => {
                merged.objects.insert(object_id, object);
            }
        }
    }

    let (catalog_id, catalog) = catalog_object.ok_or(ArtifactError::NothingToMerge)?;
    let (pages_id, pages) = pages_object.ok_or(ArtifactError::NothingToMerge)?;

    for (object_id, object) in &page_objects {
        if let Ok(dict) = object.as_dict() {
            let mut dict = dict.clone();
            dict.set("Parent", pages_id);
            merged
                .objects
                .insert(*object_id, Object::Dictionary(dict));
        }
    }

    if let Ok(dict) = pages.as_dict() {
        let mut dict = dict.clone();
        dict.set("Count", page_objects.len() as u32);
        dict.set(
            "Kids",
            page_objects
                .iter()
                .map(|(id, _)| Object::Reference(*id))
                .collect::<Vec<_>>(),
        );
        merged.objects.insert(pages_id, Object::Dictionary(dict));
    }

    if let Ok(dict) = catalog.as_dict() {
        let mut dict = dict.clone();
        dict.set("Pages", pages_id);
        dict.remove(b"Outlines");
        merged.objects.insert(catalog_id, Object::Dictionary(dict));
    }

    merged.trailer.set("Root", catalog_id);
    merged.max_id = merged.objects.len() as u32;
    merged.renumber_objects();
    merged.compress();
    merged.save(output)?;

    info!(
        "Combined PDF saved: {} ({} documents)",
        output.display(),
        merged_count
    );
    Ok(merged_count)
}

/// Export terminally-failed records with the same schema as the input file,
/// so they can be requeued as-is.
pub fn export_failed_rows(
    path: &Path,
    headers: &[String],
    failed: &[Record],
) -> Result<(), ArtifactError> {
    let mut writer = csv::Writer::from_path(path)?;
    writer.write_record(headers)?;
    for record in failed {
        writer.write_record(record.values())?;
    }
    writer.flush()?;
    info!("Failed rows saved: {} ({} rows)", path.display(), failed.len());
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use lopdf::content::{Content, Operation};
    use lopdf::{dictionary, Stream};
    use std::sync::Arc;

    fn minimal_pdf(path: &Path, label: &str) {
        let mut doc = Document::with_version("1.5");
        let pages_id = doc.new_object_id();
        let font_id = doc.add_object(dictionary! {
            "Type" => "Font",
            "Subtype" => "Type1",
            "BaseFont" => "Courier",
        });
        let resources_id = doc.add_object(dictionary! {
            "Font" => dictionary! { "F1" => font_id },
        });
        let content = Content {
            operations: vec![
                Operation::new("BT", vec![]),
                Operation::new("Tf", vec!["F1".into(), 24.into()]),
                Operation::new("Td", vec![100.into(), 600.into()]),
                Operation::new("Tj", vec![Object::string_literal(label)]),
                Operation::new("ET", vec![]),
            ],
        };
        let content_id = doc.add_object(Stream::new(
            dictionary! {},
            content.encode().unwrap(),
        ));
        let page_id = doc.add_object(dictionary! {
            "Type" => "Page",
            "Parent" => pages_id,
            "Contents" => content_id,
        });
        let pages = dictionary! {
            "Type" => "Pages",
            "Kids" => vec![page_id.into()],
            "Count" => 1,
            "Resources" => resources_id,
            "MediaBox" => vec![0.into(), 0.into(), 595.into(), 842.into()],
        };
        doc.objects.insert(pages_id, Object::Dictionary(pages));
        let catalog_id = doc.add_object(dictionary! {
            "Type" => "Catalog",
            "Pages" => pages_id,
        });
        doc.trailer.set("Root", catalog_id);
        doc.save(path).unwrap();
    }

    #[test]
    fn sanitize_replaces_unsafe_characters() {
        assert_eq!(sanitize_component("1234/EXP 55"), "1234_EXP_55");
        assert_eq!(sanitize_component(""), "record");
    }

    #[test]
    fn store_writes_once_and_never_overwrites() {
        let dir = tempfile::tempdir().unwrap();
        let store = ArtifactStore::new(dir.path().join("pdfs")).unwrap();

        let path = store.store(1, "CU/123", b"%PDF-fake").unwrap();
        assert!(path.ends_with("001_CU_123.pdf"));
        assert!(path.exists());

        let err = store.store(1, "CU/123", b"%PDF-other").unwrap_err();
        assert!(matches!(err, ArtifactError::Io(_)));
    }

    #[test]
    fn merge_concatenates_in_given_order_and_skips_missing() {
        let dir = tempfile::tempdir().unwrap();
        let a = dir.path().join("001_a.pdf");
        let b = dir.path().join("002_b.pdf");
        minimal_pdf(&a, "first");
        minimal_pdf(&b, "second");

        let missing = dir.path().join("003_gone.pdf");
        let output = dir.path().join("combined.pdf");

        let merged =
            merge_pdfs(&[a.clone(), missing, b.clone()], &output).unwrap();
        assert_eq!(merged, 2);

        let combined = Document::load(&output).unwrap();
        assert_eq!(combined.get_pages().len(), 2);
    }

    #[test]
    fn merge_with_no_inputs_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let output = dir.path().join("combined.pdf");
        let err = merge_pdfs(&[], &output).unwrap_err();
        assert!(matches!(err, ArtifactError::NothingToMerge));
    }

    #[test]
    fn failed_rows_reproduce_input_schema() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("failed_rows_test.csv");
        let headers: Arc<Vec<String>> =
            Arc::new(vec!["serial".into(), "year".into()]);
        let failed = vec![Record::new(
            0,
            headers.clone(),
            vec!["77".into(), "2024".into()],
        )];

        export_failed_rows(&path, &headers, &failed).unwrap();

        let text = std::fs::read_to_string(&path).unwrap();
        let mut lines = text.lines();
        assert_eq!(lines.next(), Some("serial,year"));
        assert_eq!(lines.next(), Some("77,2024"));
    }
}
