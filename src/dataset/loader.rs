//! CSV / Excel readers

use super::{is_na, DataFrame, DatasetError};
use calamine::{open_workbook_auto_from_rs, Data, Reader};
use std::io::Cursor;
use std::path::Path;
use tracing::debug;

/// A parsed file and the text encoding it was decoded with
#[derive(Debug, Clone)]
pub struct LoadedFile {
    pub frame: DataFrame,
    pub encoding: &'static str,
}

/// Load a dataset from disk, format picked from the extension
pub fn load_path(path: &Path) -> Result<LoadedFile, DatasetError> {
    if !path.exists() {
        return Err(DatasetError::NotFound(path.display().to_string()));
    }
    let bytes = std::fs::read(path)?;
    let name = path
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default();
    load_bytes(&name, &bytes)
}

/// Parse an in-memory file named `filename`
pub fn load_bytes(filename: &str, bytes: &[u8]) -> Result<LoadedFile, DatasetError> {
    let ext = filename
        .rsplit_once('.')
        .map(|(_, e)| e.to_lowercase())
        .unwrap_or_default();
    match ext.as_str() {
        "csv" => parse_csv(bytes),
        "xlsx" | "xls" => parse_excel(bytes),
        _ => Err(DatasetError::UnsupportedFormat(filename.to_string())),
    }
}

/// UTF-8 first, then a single-byte Latin-1 decode which accepts any input
fn decode(bytes: &[u8]) -> (String, &'static str) {
    let body = bytes.strip_prefix(b"\xEF\xBB\xBF").unwrap_or(bytes);
    match std::str::from_utf8(body) {
        Ok(text) => (text.to_string(), "utf-8"),
        Err(_) => (body.iter().map(|&b| b as char).collect(), "latin-1"),
    }
}

fn sniff_delimiter(text: &str) -> u8 {
    let header = text.lines().next().unwrap_or_default();
    if !header.contains(',') && header.contains(';') {
        b';'
    } else {
        b','
    }
}

fn parse_csv(bytes: &[u8]) -> Result<LoadedFile, DatasetError> {
    if bytes.iter().all(|b| b.is_ascii_whitespace()) {
        return Err(DatasetError::Empty("The file is empty".to_string()));
    }
    let (text, encoding) = decode(bytes);
    let mut reader = csv::ReaderBuilder::new()
        .delimiter(sniff_delimiter(&text))
        .flexible(true)
        .has_headers(true)
        .from_reader(text.as_bytes());

    let headers: Vec<String> = reader
        .headers()
        .map_err(|e| DatasetError::Parse(e.to_string()))?
        .iter()
        .map(str::to_string)
        .collect();
    if headers.is_empty() || headers.iter().all(|h| h.trim().is_empty()) {
        return Err(DatasetError::Empty("The file is empty".to_string()));
    }

    let mut rows = Vec::new();
    for record in reader.records() {
        let record = record.map_err(|e| DatasetError::Parse(e.to_string()))?;
        if record.iter().all(|cell| cell.trim().is_empty()) {
            continue;
        }
        rows.push(
            record
                .iter()
                .map(|cell| (!is_na(cell)).then(|| cell.to_string()))
                .collect(),
        );
    }

    debug!("Parsed CSV: {} columns, {} rows ({})", headers.len(), rows.len(), encoding);
    Ok(LoadedFile {
        frame: DataFrame::from_rows(headers, rows),
        encoding,
    })
}

fn cell_to_string(cell: &Data) -> Option<String> {
    match cell {
        Data::Empty | Data::Error(_) => None,
        Data::String(s) => (!is_na(s)).then(|| s.clone()),
        Data::Float(f) => f.is_finite().then(|| f.to_string()),
        Data::Int(i) => Some(i.to_string()),
        Data::Bool(b) => Some(if *b { "True" } else { "False" }.to_string()),
        Data::DateTime(dt) => Some(
            dt.as_datetime()
                .map(|d| d.format("%Y-%m-%d %H:%M:%S").to_string())
                .unwrap_or_else(|| dt.as_f64().to_string()),
        ),
        other => Some(other.to_string()),
    }
}

fn parse_excel(bytes: &[u8]) -> Result<LoadedFile, DatasetError> {
    if bytes.is_empty() {
        return Err(DatasetError::Empty("The file is empty".to_string()));
    }
    let mut workbook = open_workbook_auto_from_rs(Cursor::new(bytes.to_vec()))
        .map_err(|e| DatasetError::Parse(e.to_string()))?;
    let range = workbook
        .worksheet_range_at(0)
        .ok_or_else(|| DatasetError::Empty("The workbook has no sheet".to_string()))?
        .map_err(|e| DatasetError::Parse(e.to_string()))?;

    let mut rows = range.rows();
    let headers: Vec<String> = match rows.next() {
        Some(header) => header
            .iter()
            .map(|c| cell_to_string(c).unwrap_or_default())
            .collect(),
        None => return Err(DatasetError::Empty("The file is empty".to_string())),
    };
    let body: Vec<Vec<Option<String>>> = rows
        .map(|r| r.iter().map(cell_to_string).collect::<Vec<_>>())
        .filter(|r| r.iter().any(Option::is_some))
        .collect();

    Ok(LoadedFile {
        frame: DataFrame::from_rows(headers, body),
        encoding: "binary",
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_load_csv() {
        let loaded = load_bytes("test.csv", b"A,B\n1,4\n2,5\n3,6\n").unwrap();
        assert_eq!(loaded.frame.n_rows(), 3);
        assert_eq!(loaded.frame.column_names(), vec!["A", "B"]);
        assert_eq!(loaded.encoding, "utf-8");
    }

    #[test]
    fn test_load_latin1_csv() {
        // "Société" encoded as ISO-8859-1
        let bytes = b"Nom,Valeur\nSoci\xe9t\xe9,1\n";
        let loaded = load_bytes("data.csv", bytes).unwrap();
        assert_eq!(loaded.encoding, "latin-1");
        assert_eq!(loaded.frame.preview(1)[0][0], "Société");
    }

    #[test]
    fn test_bom_and_semicolons() {
        let loaded = load_bytes("data.csv", b"\xEF\xBB\xBFx;y\n1;2\n").unwrap();
        assert_eq!(loaded.frame.column_names(), vec!["x", "y"]);
        assert_eq!(loaded.frame.numeric("y").unwrap(), vec![Some(2.0)]);
    }

    #[test]
    fn test_na_tokens_are_missing() {
        let loaded = load_bytes("data.csv", b"v\n1\nNA\nnull\n\n4\n").unwrap();
        assert_eq!(loaded.frame.numeric("v").unwrap(), vec![Some(1.0), None, None, Some(4.0)]);
    }

    #[test]
    fn test_empty_file() {
        let err = load_bytes("empty.csv", b"").unwrap_err();
        assert!(matches!(err, DatasetError::Empty(_)));
        assert_eq!(err.to_string(), "The file is empty");
    }

    #[test]
    fn test_unsupported_extension() {
        assert!(matches!(
            load_bytes("notes.txt", b"a,b").unwrap_err(),
            DatasetError::UnsupportedFormat(_)
        ));
    }

    #[test]
    fn test_load_nonexistent_file() {
        let err = load_path(Path::new("nonexistent.csv")).unwrap_err();
        assert!(matches!(err, DatasetError::NotFound(_)));
    }

    #[test]
    fn test_load_path_roundtrip() {
        let path = std::env::temp_dir().join(format!("boursa_{}.csv", uuid::Uuid::new_v4()));
        std::fs::write(&path, "A,B\n1,2\n").unwrap();
        let loaded = load_path(&path).unwrap();
        assert_eq!(loaded.frame.n_rows(), 1);
        std::fs::remove_file(&path).ok();
    }

    #[test]
    fn test_garbage_excel_is_parse_error() {
        let err = load_bytes("broken.xlsx", b"PK\x03\x04not really a zip").unwrap_err();
        assert!(matches!(err, DatasetError::Parse(_)));
    }
}
