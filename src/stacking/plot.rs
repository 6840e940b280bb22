// Container plotting
// Renders a container to PostScript through the external plotting tool

use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::error::{FormatError, PickingError, PickingResult};
use crate::pipeline::config::PlotConfig;
use crate::stacking::invoker::event_id_from_file_name;
use crate::stacking::scratch::{resolve_executable, ScratchDir};
use crate::trace::store::Artifact;

/// Renders containers through the plotting tool, one scratch directory per call
pub struct PlotInvoker {
    config: PlotConfig,
    scratch_root: Option<PathBuf>,
}

impl PlotInvoker {
    /// Invoker for `config.executable`, with scratch directories under `scratch_root`
    pub fn new(config: PlotConfig, scratch_root: Option<PathBuf>) -> Self {
        PlotInvoker {
            config,
            scratch_root,
        }
    }

    /// Plot-tool input for a container holding `station_count` blocks
    pub fn input_text(&self, container_name: &str, station_count: usize) -> String {
        let height = station_count as f64 * 0.25 * self.config.height_scale.abs();
        format!(
            "{}\n{}\n{:.2}\t{:.2}\n{:.2}\n{}\n{}\n",
            container_name,
            self.config.device,
            self.config.width,
            height,
            self.config.char_height,
            self.config.line_thickness,
            self.config.label,
        )
    }

    /// Plot `container_path` into `figures_dir/<stem>.ps`
    pub fn run(&self, container_path: &Path, figures_dir: &Path) -> PickingResult<Artifact> {
        let station_count = read_station_count(container_path)?;
        let scratch = ScratchDir::new("aspick-plot-", self.scratch_root.as_deref())?;
        let container_name = scratch.copy_in(container_path)?;
        let event_id = event_id_from_file_name(&container_name);

        scratch.write_file(
            &self.config.input_file,
            &self.input_text(&container_name, station_count),
        )?;
        let executable = resolve_executable(&self.config.executable)?;
        scratch.run(
            &executable,
            self.config.timeout_secs.map(Duration::from_secs),
            &event_id,
        )?;

        if !scratch.contains(&self.config.output_file) {
            return Err(PickingError::StackingExecution {
                event_id,
                status: Some(0),
                reason: format!("plot tool produced no {}", self.config.output_file),
            });
        }

        let stem = container_name
            .strip_suffix(".aq")
            .unwrap_or(&container_name);
        let artifact = scratch.take(&self.config.output_file, figures_dir, &format!("{}.ps", stem))?;
        log::debug!("Plotted {} -> {}", container_name, artifact.path.display());
        Ok(artifact)
    }
}

/// Station count from the first line of a container file
fn read_station_count(path: &Path) -> PickingResult<usize> {
    let text = fs::read_to_string(path)?;
    let first = text.lines().next().map(str::trim).unwrap_or("");
    first.parse::<usize>().map_err(|_| PickingError::Format {
        kind: "alignment container",
        source: FormatError::InvalidNumber {
            line: 1,
            field: "station_count",
            value: first.to_string(),
        },
    })
}
