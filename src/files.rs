// 📂 File Loading - Raw registry CSV and stored-period JSON
//
// Raw CSV columns: from,to,payload,source_ref
//   to         empty = open-ended
//   payload    JSON text, empty = null
//   source_ref empty = "<file>:<row>"

use crate::orchestrator::RawDataProvider;
use crate::period::{EntityKind, EntityRef, Period, RawSubPeriod};
use anyhow::{Context, Result};
use chrono::NaiveDate;
use serde::Deserialize;
use std::fs;
use std::path::{Path, PathBuf};
use tracing::debug;

#[derive(Debug, Deserialize)]
struct RawRow {
    from: NaiveDate,
    to: Option<NaiveDate>,
    #[serde(default)]
    payload: Option<String>,
    #[serde(default)]
    source_ref: Option<String>,
}

/// Load raw sub-periods from a registry CSV export
pub fn load_raw_csv(csv_path: &Path) -> Result<Vec<RawSubPeriod>> {
    let mut rdr = csv::ReaderBuilder::new()
        .trim(csv::Trim::All)
        .from_path(csv_path)
        .with_context(|| format!("Failed to open CSV file {}", csv_path.display()))?;

    let mut raw = Vec::new();

    for (index, result) in rdr.deserialize().enumerate() {
        // Header is line 1
        let line = index + 2;
        let row: RawRow = result
            .with_context(|| format!("Failed to deserialize raw sub-period on line {}", line))?;

        let payload = match row.payload.as_deref() {
            None | Some("") => serde_json::Value::Null,
            Some(text) => serde_json::from_str(text)
                .with_context(|| format!("Invalid JSON payload on line {}", line))?,
        };

        let source_ref = row
            .source_ref
            .filter(|s| !s.is_empty())
            .unwrap_or_else(|| format!("{}:{}", csv_path.display(), line));

        raw.push(RawSubPeriod {
            from: row.from,
            to: row.to,
            payload,
            source_ref: Some(source_ref),
        });
    }

    debug!("Loaded {} raw sub-periods from {}", raw.len(), csv_path.display());
    Ok(raw)
}

/// Load stored periods from a JSON array
pub fn load_periods_json(json_path: &Path) -> Result<Vec<Period>> {
    let text = fs::read_to_string(json_path)
        .with_context(|| format!("Failed to read periods file {}", json_path.display()))?;
    let periods: Vec<Period> = serde_json::from_str(&text)
        .with_context(|| format!("Failed to parse periods file {}", json_path.display()))?;

    Ok(periods)
}

/// Registry provider backed by one CSV export per entity
pub struct CsvRawDataProvider {
    path: PathBuf,
}

impl CsvRawDataProvider {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        CsvRawDataProvider { path: path.into() }
    }
}

impl RawDataProvider for CsvRawDataProvider {
    fn fetch(&self, entity_ref: &EntityRef, kind: EntityKind) -> Result<Vec<RawSubPeriod>> {
        load_raw_csv(&self.path)
            .with_context(|| format!("Fetching {} periods of {}", kind, entity_ref))
    }
}

// ============================================================================
// TESTS
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::period::DateSpan;
    use serde_json::json;
    use std::io::Write;
    use tempfile::NamedTempFile;

    fn d(y: i32, m: u32, day: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, day).unwrap()
    }

    fn write_temp(contents: &str) -> NamedTempFile {
        let mut file = NamedTempFile::new().unwrap();
        file.write_all(contents.as_bytes()).unwrap();
        file
    }

    #[test]
    fn test_load_raw_csv() {
        let file = write_temp(
            "from,to,payload,source_ref\n\
             2023-01-01,2023-06-30,\"{\"\"amount\"\": 450000}\",a-ordning-1\n\
             2023-07-01,,,\n",
        );

        let raw = load_raw_csv(file.path()).unwrap();

        assert_eq!(raw.len(), 2);
        assert_eq!(raw[0].span(), DateSpan::closed(d(2023, 1, 1), d(2023, 6, 30)));
        assert_eq!(raw[0].payload, json!({"amount": 450000}));
        assert_eq!(raw[0].source_ref.as_deref(), Some("a-ordning-1"));

        assert!(raw[1].to.is_none());
        assert_eq!(raw[1].payload, serde_json::Value::Null);
        assert!(raw[1].source_ref.as_deref().unwrap().ends_with(":3"));
    }

    #[test]
    fn test_bad_date_names_line() {
        let file = write_temp("from,to,payload,source_ref\n2023-13-01,,,\n");

        let err = load_raw_csv(file.path()).unwrap_err();
        assert!(format!("{:#}", err).contains("line 2"));
    }

    #[test]
    fn test_bad_payload_rejected() {
        let file = write_temp("from,to,payload,source_ref\n2023-01-01,,{not json},\n");
        assert!(load_raw_csv(file.path()).is_err());
    }

    #[test]
    fn test_load_periods_json() {
        let period = Period::ingested(
            EntityRef::new("case-1", "salary"),
            EntityKind::Income,
            DateSpan::open(d(2023, 1, 1)),
            json!({"amount": 1}),
        );
        let file = write_temp(&serde_json::to_string(&vec![period.clone()]).unwrap());

        assert_eq!(load_periods_json(file.path()).unwrap(), vec![period]);
    }

    #[test]
    fn test_csv_provider() {
        let file = write_temp("from,to,payload,source_ref\n2023-01-01,,,\n");
        let provider = CsvRawDataProvider::new(file.path());

        let raw = provider
            .fetch(&EntityRef::new("case-1", "child-a"), EntityKind::HouseholdMember)
            .unwrap();
        assert_eq!(raw.len(), 1);

        let missing = CsvRawDataProvider::new("/nonexistent/raw.csv");
        assert!(missing
            .fetch(&EntityRef::new("case-1", "child-a"), EntityKind::HouseholdMember)
            .is_err());
    }
}
