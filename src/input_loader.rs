use std::fs::File;
use std::path::Path;

use log::{info, warn};
use serde::{Deserialize, Serialize};
use url::Url;

use crate::error::ScrapeError;

/// One directory page to visit.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Record {
    #[serde(alias = "Office", alias = "name")]
    pub office: String,
    #[serde(alias = "URL", alias = "Url", alias = "link")]
    pub url: String,
}

/// Data files come either as a bare list or wrapped as `{ "url": [...] }`.
#[derive(Deserialize)]
#[serde(untagged)]
enum RecordFile {
    List(Vec<Record>),
    Wrapped { url: Vec<Record> },
}

/// Load every record from a `.json` or `.csv` file.
pub fn load_records<P: AsRef<Path>>(path: P) -> Result<Vec<Record>, ScrapeError> {
    let path = path.as_ref();
    let read_error = |reason: String| ScrapeError::InputRead {
        path: path.display().to_string(),
        reason,
    };

    if !path.exists() {
        return Err(read_error("file does not exist".to_string()));
    }

    let is_csv = path
        .extension()
        .map_or(false, |ext| ext.eq_ignore_ascii_case("csv"));

    let records = if is_csv {
        load_csv(path).map_err(read_error)?
    } else {
        let file = File::open(path).map_err(|e| read_error(e.to_string()))?;
        match serde_json::from_reader(file).map_err(|e| read_error(e.to_string()))? {
            RecordFile::List(records) => records,
            RecordFile::Wrapped { url } => url,
        }
    };

    info!("Loaded {} records from {:?}", records.len(), path);
    Ok(records)
}

fn load_csv(path: &Path) -> Result<Vec<Record>, String> {
    let mut rdr = csv::ReaderBuilder::new()
        .trim(csv::Trim::All)
        .from_path(path)
        .map_err(|e| e.to_string())?;

    let mut records = Vec::new();
    for (line, result) in rdr.deserialize::<Record>().enumerate() {
        match result {
            Ok(record) => records.push(record),
            Err(e) => warn!("Skipping CSV row {}: {}", line + 2, e),
        }
    }
    Ok(records)
}

/// Keep only records whose URL parses and ends with the page suffix.
pub fn processable(records: Vec<Record>, page_suffix: &str) -> Vec<Record> {
    let total = records.len();
    let kept: Vec<Record> = records
        .into_iter()
        .filter(|r| {
            let url = r.url.trim();
            let ok = url.ends_with(page_suffix) && Url::parse(url).is_ok();
            if !ok {
                warn!("Skipping '{}': not a page URL ({})", r.office, r.url);
            }
            ok
        })
        .collect();
    info!("Found {} of {} records to process", kept.len(), total);
    kept
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn write_temp(suffix: &str, content: &str) -> tempfile::NamedTempFile {
        let mut file = tempfile::Builder::new().suffix(suffix).tempfile().unwrap();
        file.write_all(content.as_bytes()).unwrap();
        file
    }

    #[test]
    fn test_load_plain_json_list() {
        let file = write_temp(
            ".json",
            r#"[{"office":"Arau","url":"https://postcode.my/perlis-arau-02600.html"}]"#,
        );
        let records = load_records(file.path()).unwrap();
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].office, "Arau");
    }

    #[test]
    fn test_load_wrapped_json() {
        let file = write_temp(
            ".json",
            r#"{"url":[{"office":"Kuantan","url":"https://postcode.my/pahang-kuantan-26080.html"}]}"#,
        );
        assert_eq!(load_records(file.path()).unwrap()[0].office, "Kuantan");
    }

    #[test]
    fn test_load_csv_with_header_aliases() {
        let file = write_temp(
            ".csv",
            "Office,URL\nArau,https://postcode.my/a.html\nKangar , https://postcode.my/b.html\n",
        );
        let records = load_records(file.path()).unwrap();
        assert_eq!(records.len(), 2);
        assert_eq!(records[1].office, "Kangar");
        assert_eq!(records[1].url, "https://postcode.my/b.html");
    }

    #[test]
    fn test_missing_and_malformed_input_are_read_errors() {
        let missing = load_records("/definitely/not/here.json");
        assert!(matches!(missing, Err(ScrapeError::InputRead { .. })));

        let file = write_temp(".json", "{ not json");
        assert!(matches!(load_records(file.path()), Err(ScrapeError::InputRead { .. })));
    }

    #[test]
    fn test_processable_filters_by_suffix() {
        let records = vec![
            Record { office: "A".into(), url: "https://postcode.my/a.html".into() },
            Record { office: "Index".into(), url: "https://postcode.my/perlis/".into() },
            Record { office: "Broken".into(), url: "not a url.html".into() },
            Record { office: "C".into(), url: "https://postcode.my/c.html".into() },
        ];
        let kept = processable(records, ".html");
        let offices: Vec<&str> = kept.iter().map(|r| r.office.as_str()).collect();
        assert_eq!(offices, vec!["A", "C"]);
    }
}
