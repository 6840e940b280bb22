// Trace store
// File system layout for per-event waveforms, reference traces and artifacts

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::fs;
use std::path::{Path, PathBuf};

use crate::error::{PickingError, PickingResult};
use crate::pipeline::config::PathsConfig;
use crate::trace::record::TraceRecord;
use crate::trace::sac;

/// A file produced by an external tool and moved into its final location
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Artifact {
    pub path: PathBuf,
    pub sha256: String,
    pub bytes: u64,
}

impl Artifact {
    /// Hash a file already in its final location
    pub fn from_file(path: PathBuf) -> PickingResult<Self> {
        let data = fs::read(&path)?;
        Ok(Artifact {
            sha256: calculate_sha256(&data),
            bytes: data.len() as u64,
            path,
        })
    }
}

/// Directory layout rooted at `PathsConfig::root`
#[derive(Debug, Clone)]
pub struct TraceStore {
    waveforms: PathBuf,
    containers: PathBuf,
    references: PathBuf,
    figures: PathBuf,
    refined: PathBuf,
}

impl TraceStore {
    /// Resolve every directory against `paths.root`; nothing is created until first use
    pub fn new(paths: &PathsConfig) -> Self {
        let root = Path::new(&paths.root);
        TraceStore {
            waveforms: root.join(&paths.waveforms),
            containers: root.join(&paths.containers),
            references: root.join(&paths.references),
            figures: root.join(&paths.figures),
            refined: root.join(&paths.refined),
        }
    }

    /// Directory holding the prepared waveforms of one event
    pub fn event_dir(&self, event_id: &str) -> PickingResult<PathBuf> {
        let dir = self.waveforms.join(event_id);
        fs::create_dir_all(&dir)?;
        Ok(dir)
    }

    /// Directory for alignment containers and the stacking outputs beside them
    pub fn containers_dir(&self) -> PickingResult<PathBuf> {
        fs::create_dir_all(&self.containers)?;
        Ok(self.containers.clone())
    }

    /// Directory for PostScript figures
    pub fn figures_dir(&self) -> PickingResult<PathBuf> {
        fs::create_dir_all(&self.figures)?;
        Ok(self.figures.clone())
    }

    /// Directory for refined waveforms unpacked from the stacked container
    pub fn refined_dir(&self, event_id: &str) -> PickingResult<PathBuf> {
        let dir = self.refined.join(event_id);
        fs::create_dir_all(&dir)?;
        Ok(dir)
    }

    /// Persist a prepared waveform under the event directory
    pub fn write_waveform(
        &self,
        event_id: &str,
        file_name: &str,
        record: &TraceRecord,
    ) -> PickingResult<PathBuf> {
        let path = self.event_dir(event_id)?.join(file_name);
        sac::write(&path, record)?;
        Ok(path)
    }

    /// All SAC files of an event, sorted by file name
    pub fn list_waveforms(&self, event_id: &str) -> PickingResult<Vec<PathBuf>> {
        list_sac_files(&self.waveforms.join(event_id))
    }

    /// Waveform files of an event whose dot-separated name contains `station`
    pub fn find_station_waveforms(
        &self,
        event_id: &str,
        station: &str,
    ) -> PickingResult<Vec<PathBuf>> {
        let files = self.list_waveforms(event_id)?;
        Ok(files
            .into_iter()
            .filter(|path| {
                file_name(path)
                    .split('.')
                    .any(|component| component == station)
            })
            .collect())
    }

    /// Persist the untouched reference trace as `<NET.STA.LOC.CHA>.<eventId>.sac`
    pub fn write_reference(&self, event_id: &str, record: &TraceRecord) -> PickingResult<PathBuf> {
        fs::create_dir_all(&self.references)?;
        let path = self
            .references
            .join(format!("{}.{}.sac", record.id(), event_id));
        sac::write(&path, record)?;
        Ok(path)
    }

    /// Locate the unique reference trace of an event
    pub fn find_reference(&self, event_id: &str) -> PickingResult<PathBuf> {
        let suffix = format!(".{}.sac", event_id);
        let mut matches: Vec<PathBuf> = list_sac_files(&self.references)?
            .into_iter()
            .filter(|path| file_name(path).ends_with(&suffix))
            .collect();

        match matches.len() {
            0 => Err(PickingError::ReferenceStationNotFound {
                event_id: event_id.to_string(),
                station: None,
            }),
            1 => Ok(matches.remove(0)),
            _ => Err(PickingError::AmbiguousReferenceMatch {
                event_id: event_id.to_string(),
                matches: matches.iter().map(|p| file_name(p).to_string()).collect(),
            }),
        }
    }
}

fn file_name(path: &Path) -> &str {
    path.file_name().and_then(|n| n.to_str()).unwrap_or("")
}

fn list_sac_files(dir: &Path) -> PickingResult<Vec<PathBuf>> {
    if !dir.is_dir() {
        return Ok(Vec::new());
    }

    let mut files = Vec::new();
    for entry in fs::read_dir(dir)? {
        let path = entry?.path();
        if path.is_file() && path.extension().and_then(|e| e.to_str()) == Some("sac") {
            files.push(path);
        }
    }
    files.sort();
    Ok(files)
}

/// Move a file into `dest_dir` (falling back to copy + remove across
/// file systems) and record its hash
pub fn store_artifact(source: &Path, dest_dir: &Path, name: &str) -> PickingResult<Artifact> {
    fs::create_dir_all(dest_dir)?;
    let dest = dest_dir.join(name);

    if fs::rename(source, &dest).is_err() {
        fs::copy(source, &dest)?;
        fs::remove_file(source)?;
    }

    Artifact::from_file(dest)
}

/// Calculate SHA256 hash of data
pub fn calculate_sha256(data: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(data);
    hex::encode(hasher.finalize())
}
