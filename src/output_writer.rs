use std::fs::{self, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};

use log::info;

use crate::error::ScrapeError;
use crate::extractor::OfficeDetail;

/// `data/pahang_15.json` -> `data/pahang_15_details.json`.
pub fn details_path_for(input: &Path) -> PathBuf {
    let stem = input
        .file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_else(|| "results".to_string());
    input.with_file_name(format!("{}_details.json", stem))
}

/// Write results as a pretty JSON array, in the order given.
pub fn write_results(path: &Path, results: &[OfficeDetail]) -> Result<(), ScrapeError> {
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        fs::create_dir_all(parent)?;
    }

    let json = serde_json::to_string_pretty(results)?;
    let mut file = OpenOptions::new()
        .write(true)
        .create(true)
        .truncate(true)
        .open(path)?;
    file.write_all(json.as_bytes())?;
    file.flush()?;

    info!("Extracted {} records to {:?}", results.len(), path);
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::extractor::ExtractedDetail;

    #[test]
    fn test_details_path_keeps_directory() {
        assert_eq!(
            details_path_for(Path::new("data/pahang_15.json")),
            PathBuf::from("data/pahang_15_details.json")
        );
        assert_eq!(details_path_for(Path::new("perlis.csv")), PathBuf::from("perlis_details.json"));
    }

    #[test]
    fn test_write_results_preserves_order() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("out_details.json");
        let rows: Vec<OfficeDetail> = ["A", "C"]
            .iter()
            .map(|o| OfficeDetail {
                office: o.to_string(),
                detail: ExtractedDetail::sentinel(&format!("https://postcode.my/{}.html", o)),
            })
            .collect();

        write_results(&path, &rows).unwrap();

        let back: Vec<OfficeDetail> =
            serde_json::from_str(&fs::read_to_string(&path).unwrap()).unwrap();
        assert_eq!(back, rows);
    }
}
