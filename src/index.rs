use tracing::{debug, warn};

use crate::domain::{FileIndex, RemoteFileLocation, SampleAccession};
use crate::error::KiraError;

/// Groups a `sample_accession<TAB>submitted_ftp` report by sample.
///
/// The header row is dropped. Rows with fewer than two fields, an unusable
/// sample accession or unusable locations are skipped individually; only a
/// report without any data rows is an error.
pub fn parse_file_report(text: &str) -> Result<FileIndex, KiraError> {
    let mut lines = text.trim().lines();
    if lines.next().is_none() {
        return Err(KiraError::IndexParse("empty response".to_string()));
    }

    let mut index = FileIndex::new();
    let mut data_rows = 0usize;
    for (row, line) in lines.enumerate() {
        let line = line.trim_end_matches('\r');
        if line.trim().is_empty() {
            continue;
        }
        data_rows += 1;

        let mut fields = line.split('\t');
        let (Some(sample_field), Some(locations_field)) = (fields.next(), fields.next()) else {
            debug!(row = row + 1, "skipping row with fewer than two fields");
            continue;
        };
        let sample = match sample_field.parse::<SampleAccession>() {
            Ok(sample) => sample,
            Err(err) => {
                warn!(row = row + 1, "skipping row: {err}");
                continue;
            }
        };

        for token in locations_field.split(';') {
            let token = token.trim();
            if token.is_empty() {
                continue;
            }
            match token.parse::<RemoteFileLocation>() {
                Ok(location) => {
                    if !index.insert(sample.clone(), location) {
                        warn!(sample = %sample, location = token, "duplicate location ignored");
                    }
                }
                Err(err) => warn!(sample = %sample, "skipping location: {err}"),
            }
        }
    }

    if data_rows == 0 {
        return Err(KiraError::IndexParse("header only".to_string()));
    }
    Ok(index)
}
