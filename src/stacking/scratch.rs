// Scoped scratch directory for external tools
// Copy inputs in, run the tool inside, move outputs out; the directory is removed on drop

use std::fs::{self, File};
use std::path::{Path, PathBuf};
use std::process::{Command, ExitStatus, Stdio};
use std::thread;
use std::time::{Duration, Instant};
use tempfile::TempDir;

use crate::error::{PickingError, PickingResult};
use crate::trace::store::{store_artifact, Artifact};

const STDOUT_LOG: &str = "stdout.log";
const STDERR_LOG: &str = "stderr.log";
const POLL_INTERVAL: Duration = Duration::from_millis(20);

/// An isolated working directory owned by one tool invocation
pub struct ScratchDir {
    dir: TempDir,
}

impl ScratchDir {
    /// Create under `root`, or the system temp directory when `None`
    pub fn new(prefix: &str, root: Option<&Path>) -> PickingResult<Self> {
        let mut builder = tempfile::Builder::new();
        builder.prefix(prefix);
        let dir = match root {
            Some(root) => {
                fs::create_dir_all(root)?;
                builder.tempdir_in(root)?
            }
            None => builder.tempdir()?,
        };
        Ok(ScratchDir { dir })
    }

    pub fn path(&self) -> &Path {
        self.dir.path()
    }

    /// Copy a file in under its own name and return that name
    pub fn copy_in(&self, source: &Path) -> PickingResult<String> {
        let name = source
            .file_name()
            .and_then(|n| n.to_str())
            .ok_or_else(|| {
                std::io::Error::new(
                    std::io::ErrorKind::InvalidInput,
                    format!("no file name in {}", source.display()),
                )
            })?
            .to_string();
        fs::copy(source, self.path().join(&name))?;
        Ok(name)
    }

    pub fn write_file(&self, name: &str, contents: &str) -> PickingResult<PathBuf> {
        let path = self.path().join(name);
        fs::write(&path, contents)?;
        Ok(path)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.path().join(name).is_file()
    }

    /// Move a produced file to `dest_dir/dest_name`
    pub fn take(&self, name: &str, dest_dir: &Path, dest_name: &str) -> PickingResult<Artifact> {
        store_artifact(&self.path().join(name), dest_dir, dest_name)
    }

    /// Move several produced files into `dest_dir` as one unit.
    ///
    /// Every file is first copied to a temporary name inside `dest_dir`;
    /// only when all copies succeed are they renamed into place. A failed
    /// rename removes the files already renamed, so either all of `names`
    /// arrive or none do.
    pub fn take_all(&self, names: &[&str], dest_dir: &Path) -> PickingResult<Vec<Artifact>> {
        fs::create_dir_all(dest_dir)?;

        let mut staged = Vec::with_capacity(names.len());
        for name in names {
            let temp = tempfile::Builder::new()
                .prefix(&format!(".{}.", name))
                .tempfile_in(dest_dir)?;
            fs::copy(self.path().join(name), temp.path())?;
            staged.push((temp, dest_dir.join(name)));
        }

        let mut placed: Vec<PathBuf> = Vec::with_capacity(staged.len());
        for (temp, dest) in staged {
            if let Err(e) = temp.persist(&dest) {
                for path in &placed {
                    let _ = fs::remove_file(path);
                }
                return Err(PickingError::from(e.error));
            }
            placed.push(dest);
        }

        placed.into_iter().map(Artifact::from_file).collect()
    }

    /// Run `executable` with this directory as its working directory.
    ///
    /// A spawn failure, a non-zero exit or an expired timeout all surface
    /// as `StackingExecution` for `event_id`; output is captured to log
    /// files and the tail of stderr is included in the error.
    pub fn run(
        &self,
        executable: &Path,
        timeout: Option<Duration>,
        event_id: &str,
    ) -> PickingResult<()> {
        let failure = |status: Option<i32>, reason: String| PickingError::StackingExecution {
            event_id: event_id.to_string(),
            status,
            reason,
        };

        let stdout = File::create(self.path().join(STDOUT_LOG))?;
        let stderr = File::create(self.path().join(STDERR_LOG))?;

        log::debug!(
            "Running {} in {}",
            executable.display(),
            self.path().display()
        );
        let mut child = Command::new(executable)
            .current_dir(self.path())
            .stdin(Stdio::null())
            .stdout(stdout)
            .stderr(stderr)
            .spawn()
            .map_err(|e| failure(None, format!("failed to start {}: {}", executable.display(), e)))?;

        let status: ExitStatus = match timeout {
            None => child.wait()?,
            Some(limit) => {
                let deadline = Instant::now() + limit;
                loop {
                    if let Some(status) = child.try_wait()? {
                        break status;
                    }
                    if Instant::now() >= deadline {
                        let _ = child.kill();
                        let _ = child.wait();
                        return Err(failure(
                            None,
                            format!("timed out after {} s", limit.as_secs_f64()),
                        ));
                    }
                    thread::sleep(POLL_INTERVAL);
                }
            }
        };

        if !status.success() {
            return Err(failure(
                status.code(),
                format!("{} exited with {}{}", executable.display(), status, self.stderr_tail()),
            ));
        }
        Ok(())
    }

    fn stderr_tail(&self) -> String {
        let text = fs::read_to_string(self.path().join(STDERR_LOG)).unwrap_or_default();
        let lines: Vec<&str> = text.lines().rev().take(5).collect();
        if lines.is_empty() {
            String::new()
        } else {
            let tail: Vec<&str> = lines.into_iter().rev().collect();
            format!(": {}", tail.join(" | "))
        }
    }
}

/// Resolve a configured executable so it still works from inside a scratch directory.
/// Bare names are left for `PATH` lookup; relative paths are anchored at the current directory.
pub fn resolve_executable(configured: &str) -> PickingResult<PathBuf> {
    let path = Path::new(configured);
    if path.is_absolute() || path.components().count() == 1 {
        return Ok(path.to_path_buf());
    }
    Ok(std::env::current_dir()?.join(path))
}
