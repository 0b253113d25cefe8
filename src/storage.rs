//! Capture directory: naming, listing and retrieval of stored images

use std::path::{Path, PathBuf};
use std::time::SystemTime;

use bytes::Bytes;
use chrono::{DateTime, Local};
use serde::Serialize;
use tracing::{debug, info};

use crate::error::{AppError, Result};

/// Extensions listed as captures (compared case-insensitively)
const IMAGE_EXTENSIONS: [&str; 4] = ["png", "jpg", "jpeg", "gif"];

/// One page of the capture listing
#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct CapturePage {
    pub page: usize,
    pub per_page: usize,
    pub total: usize,
    pub files: Vec<String>,
}

/// Stored captures in a single flat directory
pub struct CaptureStore {
    dir: PathBuf,
}

impl CaptureStore {
    /// Open the store, creating the directory when missing
    pub async fn open(dir: impl Into<PathBuf>) -> Result<Self> {
        let dir = dir.into();
        tokio::fs::create_dir_all(&dir).await.map_err(|e| {
            AppError::Config(format!(
                "Cannot create capture directory {}: {}",
                dir.display(),
                e
            ))
        })?;
        info!("Capture directory: {}", dir.display());
        Ok(Self { dir })
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Create the file for a new capture taken at `at`.
    ///
    /// Names are `<prefix><YYYY-mm-ddTHH_MM_SS>.jpeg`; a capture within the
    /// same second gets a numeric suffix instead of overwriting. The file is
    /// created exclusively, so concurrent captures never share a name.
    pub async fn create_capture(
        &self,
        prefix: &str,
        at: DateTime<Local>,
    ) -> Result<(PathBuf, tokio::fs::File)> {
        let stem = format!("{}{}", prefix, at.format("%Y-%m-%dT%H_%M_%S"));
        let mut path = self.dir.join(format!("{}.jpeg", stem));
        let mut n = 1;
        loop {
            match tokio::fs::OpenOptions::new()
                .write(true)
                .create_new(true)
                .open(&path)
                .await
            {
                Ok(file) => return Ok((path, file)),
                Err(e) if e.kind() == std::io::ErrorKind::AlreadyExists => {
                    path = self.dir.join(format!("{}_{}.jpeg", stem, n));
                    n += 1;
                }
                Err(e) => {
                    return Err(AppError::CaptureFailure(format!(
                        "creating {} failed: {}",
                        path.display(),
                        e
                    )))
                }
            }
        }
    }

    /// List captures newest first, paginated.
    ///
    /// Pages are 1-based; a page below 1 is treated as 1 and a page past the
    /// end is empty.
    pub async fn list(&self, page: usize, per_page: usize) -> Result<CapturePage> {
        if per_page == 0 {
            return Err(AppError::BadRequest("per_page must be at least 1".into()));
        }
        let page = page.max(1);
        let dir = self.dir.clone();

        let mut entries = tokio::task::spawn_blocking(move || scan(&dir))
            .await
            .map_err(|e| AppError::Internal(format!("listing task failed: {}", e)))??;

        // Newest first; equal timestamps fall back to name, newest name first
        entries.sort_by(|a, b| b.1.cmp(&a.1).then_with(|| b.0.cmp(&a.0)));

        let total = entries.len();
        let files = entries
            .into_iter()
            .skip((page - 1).saturating_mul(per_page))
            .take(per_page)
            .map(|(name, _)| name)
            .collect();

        Ok(CapturePage {
            page,
            per_page,
            total,
            files,
        })
    }

    /// Read a stored capture by file name
    pub async fn read(&self, name: &str) -> Result<Bytes> {
        validate_name(name)?;
        let path = self.dir.join(name);
        match tokio::fs::read(&path).await {
            Ok(data) => Ok(Bytes::from(data)),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                Err(AppError::NotFound(format!("capture {}", name)))
            }
            Err(e) => Err(e.into()),
        }
    }
}

/// Content type for a stored capture, by extension
pub fn content_type(name: &str) -> &'static str {
    match extension(name).as_deref() {
        Some("png") => "image/png",
        Some("gif") => "image/gif",
        Some("jpg") | Some("jpeg") => "image/jpeg",
        _ => "application/octet-stream",
    }
}

fn extension(name: &str) -> Option<String> {
    Path::new(name)
        .extension()
        .and_then(|e| e.to_str())
        .map(|e| e.to_ascii_lowercase())
}

fn is_image(name: &str) -> bool {
    extension(name).is_some_and(|e| IMAGE_EXTENSIONS.contains(&e.as_str()))
}

/// Reject anything that could escape the capture directory
fn validate_name(name: &str) -> Result<()> {
    let bad = name.is_empty()
        || name.contains('/')
        || name.contains('\\')
        || name.contains("..")
        || name.contains('\0');
    if bad {
        debug!("Rejected capture name {:?}", name);
        return Err(AppError::BadRequest(format!("invalid file name: {}", name)));
    }
    Ok(())
}

fn scan(dir: &Path) -> Result<Vec<(String, SystemTime)>> {
    let mut entries = Vec::new();
    for entry in std::fs::read_dir(dir)? {
        let entry = entry?;
        let Ok(name) = entry.file_name().into_string() else {
            continue;
        };
        if !is_image(&name) {
            continue;
        }
        let metadata = entry.metadata()?;
        if !metadata.is_file() {
            continue;
        }
        entries.push((name, metadata.modified()?));
    }
    Ok(entries)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use std::time::Duration;

    fn touch(dir: &Path, name: &str, age_secs: u64) {
        let path = dir.join(name);
        std::fs::write(&path, name.as_bytes()).unwrap();
        let mtime = SystemTime::now() - Duration::from_secs(age_secs);
        std::fs::File::options()
            .write(true)
            .open(&path)
            .unwrap()
            .set_modified(mtime)
            .unwrap();
    }

    #[tokio::test]
    async fn test_listing_order_and_filter() {
        let tmp = tempfile::tempdir().unwrap();
        let store = CaptureStore::open(tmp.path()).await.unwrap();
        touch(tmp.path(), "old.jpeg", 300);
        touch(tmp.path(), "new.JPG", 10);
        touch(tmp.path(), "mid.png", 100);
        touch(tmp.path(), "notes.txt", 1);
        std::fs::create_dir(tmp.path().join("dir.jpg")).unwrap();

        let page = store.list(1, 10).await.unwrap();
        assert_eq!(page.total, 3);
        assert_eq!(page.files, vec!["new.JPG", "mid.png", "old.jpeg"]);
    }

    #[tokio::test]
    async fn test_pagination() {
        let tmp = tempfile::tempdir().unwrap();
        let store = CaptureStore::open(tmp.path()).await.unwrap();
        for i in 0..25u64 {
            touch(tmp.path(), &format!("img{:02}.jpeg", i), 100 - i);
        }

        let first = store.list(1, 10).await.unwrap();
        assert_eq!(first.total, 25);
        assert_eq!(first.files.len(), 10);
        assert_eq!(first.files[0], "img24.jpeg");

        let last = store.list(3, 10).await.unwrap();
        assert_eq!(last.files.len(), 5);
        assert_eq!(last.files[4], "img00.jpeg");

        assert!(store.list(4, 10).await.unwrap().files.is_empty());
        assert_eq!(store.list(0, 10).await.unwrap(), first);
        assert!(matches!(store.list(1, 0).await, Err(AppError::BadRequest(_))));
    }

    #[tokio::test]
    async fn test_read_rejects_traversal() {
        let tmp = tempfile::tempdir().unwrap();
        let store = CaptureStore::open(tmp.path().join("img")).await.unwrap();
        std::fs::write(tmp.path().join("secret.jpeg"), b"x").unwrap();
        std::fs::write(tmp.path().join("img/a.jpeg"), b"jpeg").unwrap();

        assert_eq!(&store.read("a.jpeg").await.unwrap()[..], b"jpeg");
        for name in ["../secret.jpeg", "..", "sub/a.jpeg", "..\\secret.jpeg", ""] {
            assert!(
                matches!(store.read(name).await, Err(AppError::BadRequest(_))),
                "{:?} accepted",
                name
            );
        }
        assert!(matches!(
            store.read("missing.jpeg").await,
            Err(AppError::NotFound(_))
        ));
    }

    #[tokio::test]
    async fn test_capture_names() {
        let tmp = tempfile::tempdir().unwrap();
        let store = CaptureStore::open(tmp.path()).await.unwrap();
        let at = Local.with_ymd_and_hms(2024, 3, 5, 14, 7, 9).unwrap();

        let (first, _) = store.create_capture("RF_pic_", at).await.unwrap();
        assert_eq!(
            first.file_name().unwrap(),
            "RF_pic_2024-03-05T14_07_09.jpeg"
        );
        let (second, _) = store.create_capture("RF_pic_", at).await.unwrap();
        assert_eq!(
            second.file_name().unwrap(),
            "RF_pic_2024-03-05T14_07_09_1.jpeg"
        );
    }

    #[tokio::test]
    async fn test_concurrent_captures_get_distinct_files() {
        let tmp = tempfile::tempdir().unwrap();
        let store = std::sync::Arc::new(CaptureStore::open(tmp.path()).await.unwrap());
        let at = Local.with_ymd_and_hms(2024, 3, 5, 14, 7, 9).unwrap();

        let mut tasks = Vec::new();
        for _ in 0..8 {
            let store = store.clone();
            tasks.push(tokio::spawn(async move {
                store.create_capture("RF_pic_", at).await.unwrap().0
            }));
        }
        let mut paths = Vec::new();
        for task in tasks {
            paths.push(task.await.unwrap());
        }
        paths.sort();
        paths.dedup();
        assert_eq!(paths.len(), 8);
        assert_eq!(std::fs::read_dir(tmp.path()).unwrap().count(), 8);
    }

    #[test]
    fn test_content_type() {
        assert_eq!(content_type("a.JPEG"), "image/jpeg");
        assert_eq!(content_type("a.png"), "image/png");
        assert_eq!(content_type("a.bin"), "application/octet-stream");
    }
}
