use std::time::Duration;

use reqwest::blocking::Client;
use reqwest::header::{HeaderMap, HeaderValue, USER_AGENT};
use tracing::{debug, info};

use crate::domain::ProjectAccession;
use crate::error::KiraError;

pub const FILE_REPORT_FIELDS: &str = "sample_accession,submitted_ftp";

/// One lookup per project: the raw tab-separated file report.
pub trait MetadataClient: Send + Sync {
    fn fetch(&self, project: &ProjectAccession) -> Result<String, KiraError>;
}

#[derive(Clone)]
pub struct EnaHttpClient {
    client: Client,
    base_url: String,
}

impl EnaHttpClient {
    pub fn new(base_url: &str, timeout: Duration) -> Result<Self, KiraError> {
        let mut headers = HeaderMap::new();
        headers.insert(
            USER_AGENT,
            HeaderValue::from_str(&format!("kira-ep/{}", env!("CARGO_PKG_VERSION")))
                .map_err(|err| KiraError::MetadataHttp(err.to_string()))?,
        );
        let client = Client::builder()
            .default_headers(headers)
            .timeout(timeout)
            .build()
            .map_err(|err| KiraError::MetadataHttp(err.to_string()))?;
        Ok(Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
        })
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }
}

pub fn file_report_query(project: &ProjectAccession) -> [(&'static str, &str); 4] {
    [
        ("accession", project.as_str()),
        ("result", "read_run"),
        ("fields", FILE_REPORT_FIELDS),
        ("format", "tsv"),
    ]
}

impl MetadataClient for EnaHttpClient {
    fn fetch(&self, project: &ProjectAccession) -> Result<String, KiraError> {
        info!(project = %project, "fetching ENA file report");
        let response = self
            .client
            .get(&self.base_url)
            .query(&file_report_query(project))
            .send()
            .map_err(|err| KiraError::MetadataHttp(err.to_string()))?;
        if !response.status().is_success() {
            let status = response.status().as_u16();
            let message = response
                .text()
                .unwrap_or_else(|_| "ENA request failed".to_string());
            return Err(KiraError::MetadataStatus { status, message });
        }
        let text = response
            .text()
            .map_err(|err| KiraError::MetadataHttp(err.to_string()))?;
        debug!(project = %project, bytes = text.len(), "file report received");
        Ok(text)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn query_names_read_run_report() {
        let project: ProjectAccession = "PRJEB19970".parse().unwrap();
        let query = file_report_query(&project);
        assert_eq!(query[0], ("accession", "PRJEB19970"));
        assert_eq!(query[1], ("result", "read_run"));
        assert_eq!(query[2], ("fields", "sample_accession,submitted_ftp"));
        assert_eq!(query[3], ("format", "tsv"));
    }

    #[test]
    fn base_url_loses_trailing_slash() {
        let client =
            EnaHttpClient::new("https://example.org/filereport/", Duration::from_secs(1)).unwrap();
        assert_eq!(client.base_url(), "https://example.org/filereport");
    }
}
