//! Dataset uploads: content checks and storage in the upload directory

mod clamav;

pub use clamav::{ClamAvScanner, ScanVerdict};

use crate::dataset::{load_path, secure_filename, DataFrame, DatasetError};
use std::fs;
use std::path::{Path, PathBuf};
use tracing::{info, warn};

/// Declared content types accepted for dataset files
pub const ALLOWED_MIME_TYPES: &[&str] = &[
    "text/csv",
    "text/plain",
    "application/vnd.ms-excel",
    "application/vnd.openxmlformats-officedocument.spreadsheetml.sheet",
];

const ZIP_MAGIC: &[u8] = b"PK\x03\x04";

/// Number of preview rows returned after an upload
pub const PREVIEW_ROWS: usize = 5;

/// Row count above which fetched quotes are logged as large
pub const LARGE_FETCH_ROWS: usize = 10_000;

/// Missing or `application/octet-stream` MIME types are tolerated
pub fn mime_allowed(content_type: Option<&str>) -> bool {
    match content_type {
        None => true,
        Some(ct) => {
            let essence = ct.split(';').next().unwrap_or_default().trim().to_lowercase();
            essence.is_empty()
                || essence == "application/octet-stream"
                || ALLOWED_MIME_TYPES.contains(&essence.as_str())
        }
    }
}

/// Text files have no NUL in their first bytes; xlsx files are zip archives
pub fn content_looks_valid(bytes: &[u8]) -> bool {
    if bytes.starts_with(ZIP_MAGIC) {
        return true;
    }
    let head = &bytes[..bytes.len().min(8)];
    !head.contains(&0)
}

/// File name used for fetched quotes: `{source}_{SYMBOL}_{interval}.csv`
pub fn api_filename(source: &str, symbol: &str, interval: Option<&str>) -> String {
    let symbol: String = symbol
        .chars()
        .filter(|c| c.is_ascii_alphanumeric() || matches!(c, '.' | '_' | '-'))
        .collect();
    let interval = interval.filter(|i| !i.is_empty()).unwrap_or("default");
    secure_filename(&format!("{}_{}_{}.csv", source, symbol.to_uppercase(), interval))
}

/// Where a stored dataset landed and what it parsed to
#[derive(Debug, Clone)]
pub struct StoredDataset {
    pub filename: String,
    pub path: PathBuf,
    pub frame: DataFrame,
    pub encoding: &'static str,
}

/// Write `bytes` under `dir/filename` (via a temp file then rename,
/// replacing any previous file) and parse it. The file is removed again
/// when it is empty or does not parse.
pub fn store_dataset(dir: &Path, filename: &str, bytes: &[u8]) -> Result<StoredDataset, DatasetError> {
    fs::create_dir_all(dir)?;
    let path = dir.join(filename);
    let tmp = dir.join(format!(".{}.{}.tmp", filename, uuid::Uuid::new_v4().simple()));
    fs::write(&tmp, bytes)?;
    if let Err(e) = fs::rename(&tmp, &path) {
        let _ = fs::remove_file(&tmp);
        return Err(e.into());
    }

    let discard = |path: &Path| {
        if let Err(e) = fs::remove_file(path) {
            warn!("Could not remove rejected upload {}: {}", path.display(), e);
        }
    };

    let empty = || DatasetError::Empty("File is empty or contains no valid data".into());
    match load_path(&path) {
        Ok(loaded) if loaded.frame.is_empty() => {
            discard(&path);
            Err(empty())
        }
        Ok(loaded) => {
            info!(
                "📁 Stored {} ({} rows, {} columns, {})",
                filename,
                loaded.frame.n_rows(),
                loaded.frame.column_names().len(),
                loaded.encoding
            );
            Ok(StoredDataset {
                filename: filename.to_string(),
                path,
                frame: loaded.frame,
                encoding: loaded.encoding,
            })
        }
        Err(DatasetError::Empty(_)) => {
            discard(&path);
            Err(empty())
        }
        Err(e) => {
            discard(&path);
            Err(e)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn temp_dir() -> PathBuf {
        std::env::temp_dir().join(format!("boursa_upload_{}", uuid::Uuid::new_v4()))
    }

    #[test]
    fn test_mime_rules() {
        assert!(mime_allowed(None));
        assert!(mime_allowed(Some("text/csv; charset=utf-8")));
        assert!(mime_allowed(Some("application/octet-stream")));
        assert!(mime_allowed(Some(
            "application/vnd.openxmlformats-officedocument.spreadsheetml.sheet"
        )));
        assert!(!mime_allowed(Some("image/png")));
        assert!(!mime_allowed(Some("application/x-msdownload")));
    }

    #[test]
    fn test_magic_bytes() {
        assert!(content_looks_valid(b"a,b\n1,2\n"));
        assert!(content_looks_valid(b"PK\x03\x04\x00\x00\x00\x00"));
        assert!(!content_looks_valid(b"MZ\x90\x00\x03\x00"));
        // NUL after the first 8 bytes is not inspected
        assert!(content_looks_valid(b"abcdefgh\x00"));
    }

    #[test]
    fn test_api_filename() {
        assert_eq!(api_filename("yahoo", "aapl", Some("1d")), "yahoo_AAPL_1d.csv");
        assert_eq!(api_filename("iex_cloud", "BRK.B", None), "iex_cloud_BRK.B_default.csv");
        assert_eq!(api_filename("yahoo", "../x y", Some("")), "yahoo_..XY_default.csv");
    }

    #[test]
    fn test_store_replaces_previous_file() {
        let dir = temp_dir();
        store_dataset(&dir, "data.csv", b"a,b\n1,2\n").unwrap();
        let stored = store_dataset(&dir, "data.csv", b"a,b,c\n1,2,3\n4,5,6\n").unwrap();
        assert_eq!(stored.frame.n_rows(), 2);
        assert_eq!(stored.frame.column_names(), vec!["a", "b", "c"]);
        assert_eq!(fs::read_dir(&dir).unwrap().count(), 1);
        fs::remove_dir_all(&dir).ok();
    }

    #[test]
    fn test_empty_file_is_removed() {
        let dir = temp_dir();
        let err = store_dataset(&dir, "empty.csv", b"").unwrap_err();
        assert!(matches!(err, DatasetError::Empty(_)));
        assert!(!dir.join("empty.csv").exists());
        fs::remove_dir_all(&dir).ok();
    }
}
