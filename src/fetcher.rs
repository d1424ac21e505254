use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::sync::{Mutex, mpsc};
use std::thread;

use tracing::{error, info, warn};

use crate::domain::RemoteFileLocation;
use crate::error::KiraError;
use crate::transport::Transport;

#[derive(Debug)]
pub struct FetchOutcome {
    pub location: RemoteFileLocation,
    pub result: Result<PathBuf, KiraError>,
}

/// Per-location outcomes in completion order, plus what the content filter
/// left out.
#[derive(Debug, Default)]
pub struct FetchReport {
    pub outcomes: Vec<FetchOutcome>,
    pub excluded: Vec<RemoteFileLocation>,
}

impl FetchReport {
    pub fn artifacts(&self) -> Vec<PathBuf> {
        self.outcomes
            .iter()
            .filter_map(|outcome| outcome.result.as_ref().ok().cloned())
            .collect()
    }

    pub fn failures(&self) -> impl Iterator<Item = &FetchOutcome> {
        self.outcomes.iter().filter(|outcome| outcome.result.is_err())
    }
}

/// Downloads a sample's archive files over a fixed number of worker threads.
pub struct ParallelFetcher<T: Transport> {
    transport: T,
    workers: usize,
}

impl<T: Transport> ParallelFetcher<T> {
    pub fn new(transport: T, workers: usize) -> Self {
        Self {
            transport,
            workers: workers.max(1),
        }
    }

    pub fn fetch_all(&self, sample_dir: &Path, locations: &[RemoteFileLocation]) -> FetchReport {
        let mut report = FetchReport::default();
        let mut jobs = Vec::new();
        let mut taken = HashSet::new();
        for location in locations {
            if !location.is_archive() {
                report.excluded.push(location.clone());
                continue;
            }
            if !taken.insert(location.file_name().to_string()) {
                report.outcomes.push(FetchOutcome {
                    location: location.clone(),
                    result: Err(KiraError::Download {
                        location: location.to_string(),
                        message: format!("file name {} already taken", location.file_name()),
                    }),
                });
                continue;
            }
            jobs.push((location.clone(), sample_dir.join(location.file_name())));
        }
        if jobs.is_empty() {
            return report;
        }

        let workers = self.workers.min(jobs.len());
        let (job_tx, job_rx) = mpsc::sync_channel::<(RemoteFileLocation, PathBuf)>(workers);
        let job_rx = Mutex::new(job_rx);
        let (out_tx, out_rx) = mpsc::channel::<FetchOutcome>();

        thread::scope(|scope| {
            for _ in 0..workers {
                let out_tx = out_tx.clone();
                let job_rx = &job_rx;
                scope.spawn(move || {
                    loop {
                        let job = match job_rx.lock() {
                            Ok(rx) => rx.recv(),
                            Err(_) => break,
                        };
                        let Ok((location, destination)) = job else {
                            break;
                        };
                        let result = self.fetch_one(&location, &destination);
                        if out_tx.send(FetchOutcome { location, result }).is_err() {
                            break;
                        }
                    }
                });
            }
            drop(out_tx);

            for job in jobs {
                if job_tx.send(job).is_err() {
                    break;
                }
            }
            drop(job_tx);
        });

        report.outcomes.extend(out_rx.try_iter());
        report
    }

    fn fetch_one(
        &self,
        location: &RemoteFileLocation,
        destination: &Path,
    ) -> Result<PathBuf, KiraError> {
        info!(file = location.file_name(), destination = %destination.display(), "downloading");
        match self.transport.fetch(location, destination) {
            Ok(bytes) => {
                info!(file = location.file_name(), bytes, "downloaded");
                Ok(destination.to_path_buf())
            }
            Err(err) => {
                error!(location = %location, "download failed: {err}");
                // whatever a failed transfer left behind must not look like a download
                if destination.exists() {
                    if let Err(remove_err) = std::fs::remove_file(destination) {
                        warn!(destination = %destination.display(), "could not remove partial file: {remove_err}");
                    }
                }
                Err(err)
            }
        }
    }
}
