//! Embedded image metadata (EXIF) extraction.

use exif::{Context, In, Reader, Tag};
use serde::Serialize;
use std::{collections::BTreeMap, fs::File, io::BufReader, path::Path};

/// Result of reading a photo's metadata.
///
/// Serializes either as a flat `{"<group> <tag>": "<value>"}` object or as
/// `{"error": "..."}`.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum MetadataReport {
    Tags(BTreeMap<String, String>),
    Failed { error: String },
}

/// Reads the EXIF tags of the file at `path`.
///
/// Never fails: a file without EXIF data yields an empty tag map, and any
/// other problem is reported as [`MetadataReport::Failed`]. Thumbnail
/// fields and the maker note are skipped.
pub fn extract_metadata(path: &Path) -> MetadataReport {
    let file = match File::open(path) {
        Ok(file) => file,
        Err(e) => {
            return MetadataReport::Failed {
                error: e.to_string(),
            };
        }
    };

    let exif = match Reader::new().read_from_container(&mut BufReader::new(file)) {
        Ok(exif) => exif,
        Err(exif::Error::NotFound(_)) => return MetadataReport::Tags(BTreeMap::new()),
        Err(e) => {
            return MetadataReport::Failed {
                error: e.to_string(),
            };
        }
    };

    let tags = exif
        .fields()
        .filter(|field| field.ifd_num == In::PRIMARY && field.tag != Tag::MakerNote)
        .map(|field| {
            (
                field_key(field),
                field.display_value().with_unit(&exif).to_string(),
            )
        })
        .collect();

    MetadataReport::Tags(tags)
}

/// Async wrapper running [`extract_metadata`] on the blocking pool.
pub async fn extract_metadata_blocking(path: std::path::PathBuf) -> MetadataReport {
    tokio::task::spawn_blocking(move || extract_metadata(&path))
        .await
        .unwrap_or_else(|e| MetadataReport::Failed {
            error: format!("metadata task failed: {e}"),
        })
}

fn field_key(field: &exif::Field) -> String {
    let group = match field.tag.context() {
        Context::Exif => "EXIF",
        Context::Gps => "GPS",
        Context::Interop => "Interoperability",
        _ => "Image",
    };

    format!("{} {}", group, field.tag)
}
