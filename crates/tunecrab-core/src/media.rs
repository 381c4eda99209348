use std::path::{Path, PathBuf};

use tunecrab_schema::{MediaKind, MediaPayload};

use crate::error::FetchError;

/// A produced file small enough to send.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Deliverable {
    pub path: PathBuf,
    pub file_name: String,
    pub kind: MediaKind,
    pub mime_type: String,
    pub size: u64,
}

/// A produced file over the size ceiling.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Oversized {
    pub file_name: String,
    pub size: u64,
}

#[derive(Debug, Default)]
pub struct Classified {
    pub deliverables: Vec<Deliverable>,
    pub oversized: Vec<Oversized>,
}

pub fn classify(path: &Path) -> (MediaKind, String) {
    let mime = mime_guess::from_path(path).first_or_octet_stream();
    let top = mime.type_();
    let kind = if top == mime_guess::mime::IMAGE {
        MediaKind::Image
    } else if top == mime_guess::mime::VIDEO {
        MediaKind::Video
    } else if top == mime_guess::mime::AUDIO {
        MediaKind::Audio
    } else {
        MediaKind::Document
    };
    (kind, mime.essence_str().to_string())
}

/// Sort produced files into deliverables and oversized ones. An oversized
/// file is skipped with a warning, it never fails the batch.
pub fn classify_files(files: &[PathBuf], max_bytes: u64) -> Result<Classified, FetchError> {
    let mut classified = Classified::default();
    for path in files {
        let size = std::fs::metadata(path)
            .map_err(|source| FetchError::Io {
                path: path.clone(),
                source,
            })?
            .len();
        let file_name = path
            .file_name()
            .map(|n| n.to_string_lossy().to_string())
            .unwrap_or_default();

        if size > max_bytes {
            tracing::warn!(file = %file_name, size, max_bytes, "skipping oversized file");
            classified.oversized.push(Oversized { file_name, size });
            continue;
        }

        let (kind, mime_type) = classify(path);
        classified.deliverables.push(Deliverable {
            path: path.clone(),
            file_name,
            kind,
            mime_type,
            size,
        });
    }
    Ok(classified)
}

impl Deliverable {
    pub async fn load(&self, caption: Option<String>) -> Result<MediaPayload, FetchError> {
        let bytes = tokio::fs::read(&self.path)
            .await
            .map_err(|source| FetchError::Io {
                path: self.path.clone(),
                source,
            })?;
        Ok(MediaPayload {
            kind: self.kind,
            file_name: self.file_name.clone(),
            mime_type: self.mime_type.clone(),
            caption,
            title: None,
            performer: None,
            bytes,
        })
    }
}

pub fn size_mb(bytes: u64) -> f64 {
    bytes as f64 / (1024.0 * 1024.0)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn classify_by_extension() {
        assert_eq!(classify(Path::new("a.jpg")).0, MediaKind::Image);
        assert_eq!(classify(Path::new("a.PNG")).0, MediaKind::Image);
        assert_eq!(classify(Path::new("a.mp4")), (MediaKind::Video, "video/mp4".to_string()));
        assert_eq!(classify(Path::new("a.mp3")), (MediaKind::Audio, "audio/mpeg".to_string()));
        assert_eq!(classify(Path::new("a.pdf")).0, MediaKind::Document);
        assert_eq!(
            classify(Path::new("noext")),
            (MediaKind::Document, "application/octet-stream".to_string())
        );
    }

    #[test]
    fn oversized_files_are_skipped_not_fatal() {
        let dir = tempfile::TempDir::new().unwrap();
        let small = dir.path().join("small.jpg");
        let big = dir.path().join("big.mp4");
        std::fs::write(&small, vec![0u8; 10]).unwrap();
        std::fs::write(&big, vec![0u8; 100]).unwrap();

        let classified = classify_files(&[small.clone(), big], 50).unwrap();

        assert_eq!(classified.deliverables.len(), 1);
        assert_eq!(classified.deliverables[0].path, small);
        assert_eq!(classified.deliverables[0].size, 10);
        assert_eq!(
            classified.oversized,
            vec![Oversized {
                file_name: "big.mp4".into(),
                size: 100
            }]
        );
    }

    #[test]
    fn missing_file_is_io_error() {
        let err = classify_files(&[PathBuf::from("/nonexistent/x.mp4")], 10).unwrap_err();
        assert!(matches!(err, FetchError::Io { .. }));
    }

    #[tokio::test]
    async fn load_reads_bytes() {
        let dir = tempfile::TempDir::new().unwrap();
        let path = dir.path().join("clip.mp4");
        std::fs::write(&path, b"frames").unwrap();
        let classified = classify_files(&[path], 1024).unwrap();
        let payload = classified.deliverables[0]
            .load(Some("caption".into()))
            .await
            .unwrap();
        assert_eq!(payload.kind, MediaKind::Video);
        assert_eq!(payload.bytes, b"frames");
        assert_eq!(payload.caption.as_deref(), Some("caption"));
    }

    #[test]
    fn size_mb_converts() {
        assert!((size_mb(1024 * 1024 * 3) - 3.0).abs() < f64::EPSILON);
    }
}
