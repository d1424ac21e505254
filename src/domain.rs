use std::collections::{HashMap, HashSet};
use std::fmt;
use std::str::FromStr;

use serde::ser::{SerializeMap, Serializer};
use serde::{Deserialize, Serialize};

use crate::error::KiraError;

fn is_valid_accession(value: &str) -> bool {
    !value.is_empty()
        && value
            .chars()
            .all(|ch| ch.is_ascii_alphanumeric() || matches!(ch, '_' | '-' | '.'))
        && value != "."
        && value != ".."
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ProjectAccession(String);

impl ProjectAccession {
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ProjectAccession {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for ProjectAccession {
    type Err = KiraError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        let normalized = value.trim();
        if !is_valid_accession(normalized) {
            return Err(KiraError::InvalidAccession(value.to_string()));
        }
        Ok(Self(normalized.to_string()))
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct SampleAccession(String);

impl SampleAccession {
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for SampleAccession {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for SampleAccession {
    type Err = KiraError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        let normalized = value.trim();
        if !is_valid_accession(normalized) {
            return Err(KiraError::InvalidAccession(value.to_string()));
        }
        Ok(Self(normalized.to_string()))
    }
}

/// A transport URL with an explicit scheme. File reports list bare
/// `host/path` strings; those are read as `ftp://host/path`.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct RemoteFileLocation {
    url: String,
    scheme_len: usize,
    host_end: usize,
}

impl RemoteFileLocation {
    pub fn as_str(&self) -> &str {
        &self.url
    }

    pub fn scheme(&self) -> &str {
        &self.url[..self.scheme_len]
    }

    pub fn host(&self) -> &str {
        &self.url[self.scheme_len + 3..self.host_end]
    }

    /// Path on the server, always starting with `/`.
    pub fn path(&self) -> &str {
        &self.url[self.host_end..]
    }

    pub fn file_name(&self) -> &str {
        self.path().rsplit('/').next().unwrap_or_default()
    }

    /// Archive-format (gzip compressed) files are the only ones worth fetching.
    pub fn is_archive(&self) -> bool {
        self.file_name().ends_with(".gz")
    }
}

impl fmt::Display for RemoteFileLocation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.url)
    }
}

impl FromStr for RemoteFileLocation {
    type Err = KiraError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        let trimmed = value.trim();
        let url = if trimmed.contains("://") {
            trimmed.to_string()
        } else {
            format!("ftp://{trimmed}")
        };

        let scheme_len = url
            .find("://")
            .ok_or_else(|| KiraError::InvalidLocation(value.to_string()))?;
        let scheme = &url[..scheme_len];
        let valid_scheme = !scheme.is_empty()
            && scheme
                .chars()
                .all(|ch| ch.is_ascii_alphanumeric() || matches!(ch, '+' | '-' | '.'));
        if !valid_scheme {
            return Err(KiraError::InvalidLocation(value.to_string()));
        }

        let rest = &url[scheme_len + 3..];
        let host_len = rest
            .find('/')
            .ok_or_else(|| KiraError::InvalidLocation(value.to_string()))?;
        if host_len == 0 {
            return Err(KiraError::InvalidLocation(value.to_string()));
        }

        let location = Self {
            host_end: scheme_len + 3 + host_len,
            scheme_len,
            url,
        };
        if location.file_name().is_empty() {
            return Err(KiraError::InvalidLocation(value.to_string()));
        }
        Ok(location)
    }
}

impl Serialize for RemoteFileLocation {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.url)
    }
}

/// Sample accession → ordered remote locations, in first-seen order.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FileIndex {
    entries: Vec<(SampleAccession, Vec<RemoteFileLocation>)>,
    positions: HashMap<SampleAccession, usize>,
    owners: HashSet<RemoteFileLocation>,
}

impl FileIndex {
    pub fn new() -> Self {
        Self::default()
    }

    /// Appends `location` to `sample`. Returns false when the location is
    /// already indexed, under this sample or any other.
    pub fn insert(&mut self, sample: SampleAccession, location: RemoteFileLocation) -> bool {
        if self.owners.contains(&location) {
            return false;
        }
        self.owners.insert(location.clone());
        match self.positions.get(&sample) {
            Some(&idx) => self.entries[idx].1.push(location),
            None => {
                self.positions.insert(sample.clone(), self.entries.len());
                self.entries.push((sample, vec![location]));
            }
        }
        true
    }

    pub fn get(&self, sample: &SampleAccession) -> Option<&[RemoteFileLocation]> {
        self.positions
            .get(sample)
            .map(|&idx| self.entries[idx].1.as_slice())
    }

    pub fn samples(&self) -> impl Iterator<Item = &SampleAccession> {
        self.entries.iter().map(|(sample, _)| sample)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&SampleAccession, &[RemoteFileLocation])> {
        self.entries
            .iter()
            .map(|(sample, locations)| (sample, locations.as_slice()))
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn location_count(&self) -> usize {
        self.owners.len()
    }
}

impl Serialize for FileIndex {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut map = serializer.serialize_map(Some(self.entries.len()))?;
        for (sample, locations) in &self.entries {
            map.serialize_entry(sample, locations)?;
        }
        map.end()
    }
}
