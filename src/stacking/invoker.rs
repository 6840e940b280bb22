// Stacking invoker
// Runs the external adaptive-stacking tool on one container inside a scratch directory

use serde::Serialize;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::error::{PickingError, PickingResult};
use crate::pipeline::config::StackingConfig;
use crate::stacking::scratch::{resolve_executable, ScratchDir};
use crate::trace::store::Artifact;

/// Length of the container name prefix (`rts`, `asi`, `asf`)
const PREFIX_LEN: usize = 3;
const EVENT_ID_LEN: usize = 14;

/// The three files the stacking tool produces for one container
#[derive(Debug, Clone, Serialize)]
pub struct StackingOutputs {
    pub event_id: String,
    /// `asi<eventId>.aq`, refined picks
    pub refined_picks: Artifact,
    /// `asf<eventId>.aq`, refined waveforms
    pub refined_waveform: Artifact,
    /// `rts<eventId>.ttr`, per-station timing corrections
    pub refined_timing: Artifact,
}

/// Output file names for a container: (picks, waveform, timing)
pub fn output_names(container_name: &str) -> (String, String, String) {
    let body = container_name.get(PREFIX_LEN..).unwrap_or(container_name);
    let stem = container_name
        .strip_suffix(".aq")
        .unwrap_or(container_name);
    (
        format!("asi{}", body),
        format!("asf{}", body),
        format!("{}.ttr", stem),
    )
}

/// Event id embedded in a container or timing file name
pub fn event_id_from_file_name(name: &str) -> String {
    name.get(PREFIX_LEN..PREFIX_LEN + EVENT_ID_LEN)
        .map(str::to_string)
        .unwrap_or_else(|| {
            let stem = name.split('.').next().unwrap_or(name);
            stem.get(PREFIX_LEN..).unwrap_or(stem).to_string()
        })
}

/// Runs the stacking tool on one container per call
pub struct StackingInvoker {
    config: StackingConfig,
    scratch_root: Option<PathBuf>,
}

impl StackingInvoker {
    /// Invoker for `config.executable`; scratch directories go under
    /// `scratch_root`, or the system temp directory when `None`
    pub fn new(config: StackingConfig, scratch_root: Option<PathBuf>) -> Self {
        StackingInvoker {
            config,
            scratch_root,
        }
    }

    /// Run the tool on `container_path`.
    ///
    /// Outputs are moved next to the container only when the tool exits
    /// cleanly and all three exist, and then all together. The scratch
    /// directory is removed on every path.
    pub fn run(&self, container_path: &Path) -> PickingResult<StackingOutputs> {
        let scratch = ScratchDir::new("aspick-tcas-", self.scratch_root.as_deref())?;
        let container_name = scratch.copy_in(container_path)?;
        let event_id = event_id_from_file_name(&container_name);
        let dest_dir = container_path
            .parent()
            .map(Path::to_path_buf)
            .unwrap_or_else(|| PathBuf::from("."));

        scratch.write_file(
            &self.config.command_file,
            &self.config.params.to_command_file(&container_name),
        )?;

        let executable = resolve_executable(&self.config.executable)?;
        log::info!(
            "Stacking event {} with {}",
            event_id,
            executable.display()
        );
        scratch.run(
            &executable,
            self.config.timeout_secs.map(Duration::from_secs),
            &event_id,
        )?;

        let (picks, waveform, timing) = output_names(&container_name);
        let missing: Vec<&str> = [&picks, &waveform, &timing]
            .into_iter()
            .filter(|name| !scratch.contains(name))
            .map(String::as_str)
            .collect();
        if !missing.is_empty() {
            return Err(PickingError::StackingExecution {
                event_id,
                status: Some(0),
                reason: format!("missing output {}", missing.join(", ")),
            });
        }

        let mut artifacts = scratch
            .take_all(&[&picks, &waveform, &timing], &dest_dir)?
            .into_iter();
        let (Some(refined_picks), Some(refined_waveform), Some(refined_timing)) =
            (artifacts.next(), artifacts.next(), artifacts.next())
        else {
            return Err(PickingError::StackingExecution {
                event_id,
                status: Some(0),
                reason: "outputs could not be collected".to_string(),
            });
        };
        let outputs = StackingOutputs {
            event_id,
            refined_picks,
            refined_waveform,
            refined_timing,
        };
        log::info!(
            "Stacking finished for event {}: {}",
            outputs.event_id,
            outputs.refined_timing.path.display()
        );
        Ok(outputs)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::TempDir;

    #[test]
    fn test_output_names() {
        let (picks, waveform, timing) = output_names("rts20040220055845.aq");
        assert_eq!(picks, "asi20040220055845.aq");
        assert_eq!(waveform, "asf20040220055845.aq");
        assert_eq!(timing, "rts20040220055845.ttr");
    }

    #[test]
    fn test_event_id_from_file_name() {
        assert_eq!(event_id_from_file_name("rts20040220055845.aq"), "20040220055845");
        assert_eq!(event_id_from_file_name("rts20040220055845.ttr"), "20040220055845");
        assert_eq!(event_id_from_file_name("rts123.aq"), "123");
    }

    fn container_file(dir: &Path) -> PathBuf {
        let path = dir.join("aqfiles").join("rts20040220055845.aq");
        fs::create_dir_all(path.parent().unwrap()).unwrap();
        fs::write(&path, "1\n").unwrap();
        path
    }

    #[test]
    fn test_missing_tool_leaves_no_outputs() {
        let temp_dir = TempDir::new().unwrap();
        let container = container_file(temp_dir.path());
        let scratch_root = temp_dir.path().join("scratch");
        let invoker = StackingInvoker::new(
            StackingConfig {
                executable: "/nonexistent/tcas".to_string(),
                ..StackingConfig::default()
            },
            Some(scratch_root.clone()),
        );

        match invoker.run(&container) {
            Err(PickingError::StackingExecution { event_id, .. }) => {
                assert_eq!(event_id, "20040220055845")
            }
            other => panic!("expected stacking failure, got {:?}", other),
        }
        assert!(!container.with_file_name("rts20040220055845.ttr").exists());
        assert_eq!(fs::read_dir(&scratch_root).unwrap().count(), 0);
    }

    #[cfg(unix)]
    fn tool(dir: &Path, body: &str) -> String {
        use std::os::unix::fs::PermissionsExt;
        let path = dir.join("fake-tcas.sh");
        fs::write(&path, format!("#!/bin/sh\n{}", body)).unwrap();
        let mut perms = fs::metadata(&path).unwrap().permissions();
        perms.set_mode(0o755);
        fs::set_permissions(&path, perms).unwrap();
        path.to_string_lossy().to_string()
    }

    #[cfg(unix)]
    #[test]
    fn test_successful_run_moves_outputs() {
        let temp_dir = TempDir::new().unwrap();
        let container = container_file(temp_dir.path());
        let executable = tool(
            temp_dir.path(),
            "name=$(sed -n 6p tcas.cmd)\nid=${name#rts}\nid=${id%.aq}\n\
             touch asi$id.aq asf$id.aq rts$id.ttr\n",
        );
        let invoker = StackingInvoker::new(
            StackingConfig {
                executable,
                ..StackingConfig::default()
            },
            None,
        );

        let outputs = invoker.run(&container).unwrap();
        assert_eq!(outputs.event_id, "20040220055845");
        assert!(outputs.refined_picks.path.ends_with("aqfiles/asi20040220055845.aq"));
        assert!(outputs.refined_waveform.path.exists());
        assert!(outputs.refined_timing.path.exists());
        assert_eq!(outputs.refined_timing.bytes, 0);
    }

    #[cfg(unix)]
    #[test]
    fn test_incomplete_outputs_are_an_error() {
        let temp_dir = TempDir::new().unwrap();
        let container = container_file(temp_dir.path());
        let executable = tool(temp_dir.path(), "touch asi20040220055845.aq\n");
        let invoker = StackingInvoker::new(
            StackingConfig {
                executable,
                ..StackingConfig::default()
            },
            None,
        );

        match invoker.run(&container) {
            Err(PickingError::StackingExecution { reason, .. }) => {
                assert!(reason.contains("asf20040220055845.aq"));
                assert!(reason.contains("rts20040220055845.ttr"));
            }
            other => panic!("expected stacking failure, got {:?}", other),
        }
        assert!(!container.with_file_name("asi20040220055845.aq").exists());
    }

    #[cfg(unix)]
    #[test]
    fn test_outputs_arrive_together_or_not_at_all() {
        let temp_dir = TempDir::new().unwrap();
        let container = container_file(temp_dir.path());
        let executable = tool(
            temp_dir.path(),
            "touch asi20040220055845.aq asf20040220055845.aq rts20040220055845.ttr\n",
        );
        // The timing output cannot be renamed onto a directory
        let blocker = container.with_file_name("rts20040220055845.ttr");
        fs::create_dir_all(blocker.join("occupied")).unwrap();

        let invoker = StackingInvoker::new(
            StackingConfig {
                executable,
                ..StackingConfig::default()
            },
            None,
        );
        assert!(invoker.run(&container).is_err());

        let mut names: Vec<String> = fs::read_dir(container.parent().unwrap())
            .unwrap()
            .map(|entry| entry.unwrap().file_name().to_string_lossy().to_string())
            .collect();
        names.sort();
        assert_eq!(names, vec!["rts20040220055845.aq", "rts20040220055845.ttr"]);
        assert!(blocker.is_dir());
    }

    #[cfg(unix)]
    #[test]
    fn test_nonzero_exit_is_an_error() {
        let temp_dir = TempDir::new().unwrap();
        let container = container_file(temp_dir.path());
        let executable = tool(temp_dir.path(), "echo diverged >&2\nexit 3\n");
        let invoker = StackingInvoker::new(
            StackingConfig {
                executable,
                ..StackingConfig::default()
            },
            None,
        );

        match invoker.run(&container) {
            Err(PickingError::StackingExecution { status, reason, .. }) => {
                assert_eq!(status, Some(3));
                assert!(reason.contains("diverged"));
            }
            other => panic!("expected stacking failure, got {:?}", other),
        }
    }
}
