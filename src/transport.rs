use std::fs::{self, File};
use std::io::{self, BufReader, Seek, SeekFrom};
use std::path::Path;
use std::time::Duration;

use flate2::read::MultiGzDecoder;
use reqwest::blocking::Client;
use reqwest::header::{HeaderMap, HeaderValue, USER_AGENT};

use crate::domain::RemoteFileLocation;
use crate::error::KiraError;

/// Black-box byte fetcher: `location` in, file at `destination` out.
pub trait Transport: Send + Sync {
    fn fetch(&self, location: &RemoteFileLocation, destination: &Path) -> Result<u64, KiraError>;
}

impl<T: Transport + ?Sized> Transport for &T {
    fn fetch(&self, location: &RemoteFileLocation, destination: &Path) -> Result<u64, KiraError> {
        (**self).fetch(location, destination)
    }
}

/// FTP hosts known to serve the same tree over HTTPS.
pub const HTTPS_MIRRORED_FTP_HOSTS: &[&str] = &["ftp.sra.ebi.ac.uk", "ftp.ebi.ac.uk"];

/// Fetches archive FTP paths through the HTTPS front the archive serves for
/// the same tree (`ftp://host/path` → `https://host/path`).
#[derive(Clone)]
pub struct HttpsMirrorTransport {
    client: Client,
    verify_gzip: bool,
}

impl HttpsMirrorTransport {
    pub fn new(verify_gzip: bool) -> Result<Self, KiraError> {
        let mut headers = HeaderMap::new();
        headers.insert(
            USER_AGENT,
            HeaderValue::from_str(&format!("kira-ep/{}", env!("CARGO_PKG_VERSION")))
                .map_err(|err| KiraError::Filesystem(err.to_string()))?,
        );
        // read files run to tens of gigabytes: only the connect is bounded
        let client = Client::builder()
            .default_headers(headers)
            .connect_timeout(Duration::from_secs(30))
            .timeout(None)
            .build()
            .map_err(|err| KiraError::Filesystem(err.to_string()))?;
        Ok(Self {
            client,
            verify_gzip,
        })
    }

    fn download_error(location: &RemoteFileLocation, message: impl Into<String>) -> KiraError {
        KiraError::Download {
            location: location.to_string(),
            message: message.into(),
        }
    }
}

pub fn resolve_target(location: &RemoteFileLocation) -> Result<String, KiraError> {
    match location.scheme() {
        "ftp" if HTTPS_MIRRORED_FTP_HOSTS.contains(&location.host()) => {
            Ok(format!("https://{}{}", location.host(), location.path()))
        }
        "ftp" => Err(KiraError::Download {
            location: location.to_string(),
            message: format!("no HTTPS mirror known for FTP host {}", location.host()),
        }),
        "http" | "https" => Ok(location.as_str().to_string()),
        other => Err(KiraError::Download {
            location: location.to_string(),
            message: format!("unsupported scheme {other}"),
        }),
    }
}

impl Transport for HttpsMirrorTransport {
    fn fetch(&self, location: &RemoteFileLocation, destination: &Path) -> Result<u64, KiraError> {
        let url = resolve_target(location)?;
        let parent = destination
            .parent()
            .ok_or_else(|| Self::download_error(location, "destination has no parent"))?;
        fs::create_dir_all(parent)
            .map_err(|err| Self::download_error(location, err.to_string()))?;

        let mut response = self
            .client
            .get(&url)
            .send()
            .map_err(|err| Self::download_error(location, err.to_string()))?;
        if !response.status().is_success() {
            return Err(Self::download_error(
                location,
                format!("status {}", response.status().as_u16()),
            ));
        }

        // the destination only appears once every byte is on disk
        let mut partial = tempfile::Builder::new()
            .prefix(".kira-ep-part")
            .tempfile_in(parent)
            .map_err(|err| Self::download_error(location, err.to_string()))?;
        let written = io::copy(&mut response, partial.as_file_mut())
            .map_err(|err| Self::download_error(location, err.to_string()))?;
        if let Some(expected) = response.content_length() {
            if expected != written {
                return Err(Self::download_error(
                    location,
                    format!("short read: {written} of {expected} bytes"),
                ));
            }
        }

        if self.verify_gzip {
            partial
                .as_file_mut()
                .seek(SeekFrom::Start(0))
                .map_err(|err| Self::download_error(location, err.to_string()))?;
            verify_gzip_stream(partial.as_file())
                .map_err(|err| Self::download_error(location, err))?;
        }

        partial
            .persist(destination)
            .map_err(|err| Self::download_error(location, err.to_string()))?;
        Ok(written)
    }
}

/// Decodes every gzip member to a sink; truncated or corrupt archives fail.
fn verify_gzip_stream(file: &File) -> Result<(), String> {
    let mut decoder = MultiGzDecoder::new(BufReader::new(file));
    io::copy(&mut decoder, &mut io::sink())
        .map(|_| ())
        .map_err(|err| format!("corrupt gzip: {err}"))
}
