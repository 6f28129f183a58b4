//! History downloads (JSON, CSV)

use super::{Entry, TestRecord};
use anyhow::{bail, Result};
use serde::Serialize;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExportFormat {
    Json,
    Csv,
}

impl ExportFormat {
    /// Parse from string; missing means JSON
    pub fn from_str(s: Option<&str>) -> Result<Self> {
        match s.map(|v| v.trim().to_lowercase()).as_deref() {
            None | Some("") | Some("json") => Ok(ExportFormat::Json),
            Some("csv") => Ok(ExportFormat::Csv),
            Some(other) => bail!("Unsupported export format: {}", other),
        }
    }

    pub fn content_type(&self) -> &'static str {
        match self {
            ExportFormat::Json => "application/json",
            ExportFormat::Csv => "text/csv; charset=utf-8",
        }
    }

    pub fn extension(&self) -> &'static str {
        match self {
            ExportFormat::Json => "json",
            ExportFormat::Csv => "csv",
        }
    }
}

/// Flat CSV rendering of a history record
pub trait CsvRow {
    fn headers() -> Vec<&'static str>;
    fn row(&self) -> Vec<String>;
}

fn opt_num(v: Option<f64>) -> String {
    v.map(|x| x.to_string()).unwrap_or_default()
}

impl CsvRow for TestRecord {
    fn headers() -> Vec<&'static str> {
        vec![
            "test_name",
            "filename",
            "columns_used",
            "stat_value",
            "p_value",
            "interpretation",
        ]
    }

    fn row(&self) -> Vec<String> {
        vec![
            self.test_name.clone(),
            self.filename.clone().unwrap_or_default(),
            self.columns_used.join(";"),
            opt_num(self.stat_value),
            opt_num(self.p_value),
            self.interpretation.clone(),
        ]
    }
}

pub fn export_json<T: Serialize>(entries: &[Entry<T>]) -> Result<Vec<u8>> {
    Ok(serde_json::to_vec_pretty(entries)?)
}

pub fn export_csv<T: CsvRow>(entries: &[Entry<T>]) -> Result<Vec<u8>> {
    let mut writer = csv::Writer::from_writer(Vec::new());
    let mut headers = vec!["id", "timestamp"];
    headers.extend(T::headers());
    writer.write_record(&headers)?;
    for entry in entries {
        let mut row = vec![entry.id.clone(), entry.timestamp.clone()];
        row.extend(entry.record.row());
        writer.write_record(&row)?;
    }
    Ok(writer.into_inner().map_err(|e| anyhow::anyhow!(e.to_string()))?)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::history::History;

    #[test]
    fn test_format_parsing() {
        assert_eq!(ExportFormat::from_str(None).unwrap(), ExportFormat::Json);
        assert_eq!(ExportFormat::from_str(Some("CSV")).unwrap(), ExportFormat::Csv);
        assert!(ExportFormat::from_str(Some("pdf")).is_err());
    }

    #[test]
    fn test_csv_export() {
        let mut h = History::default();
        h.add(TestRecord {
            test_name: "mannwhitney".into(),
            filename: None,
            columns_used: vec!["A".into(), "B".into()],
            p_value: Some(0.1),
            stat_value: Some(0.0),
            interpretation: "No significant difference".into(),
            full_results: serde_json::Value::Null,
        });
        let text = String::from_utf8(export_csv(h.entries()).unwrap()).unwrap();
        let mut lines = text.lines();
        assert_eq!(
            lines.next(),
            Some("id,timestamp,test_name,filename,columns_used,stat_value,p_value,interpretation")
        );
        let row = lines.next().unwrap();
        assert!(row.starts_with("1,"));
        assert!(row.ends_with("mannwhitney,,A;B,0,0.1,No significant difference"));
    }
}
