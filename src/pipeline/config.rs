// Pipeline configuration
// One explicit settings struct per stage, loadable from JSON, defaults from the field workflow

use serde::{Deserialize, Serialize};
use std::path::Path;

use crate::error::{PickingError, PickingResult};

/// Directory layout; every directory is relative to `root`
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PathsConfig {
    pub root: String,
    /// Prepared waveforms, one subdirectory per event id
    pub waveforms: String,
    /// Alignment containers and the stacking tool's outputs
    pub containers: String,
    /// Untouched reference traces, `<id>.<eventId>.sac`
    pub references: String,
    /// PostScript plots of every container
    pub figures: String,
    /// Per-station traces unpacked from the refined waveform container
    pub refined: String,
    /// JSONL stage journal
    pub journal: String,
    /// Parent of the per-invocation scratch directories; system temp when unset
    pub scratch: Option<String>,
}

impl Default for PathsConfig {
    fn default() -> Self {
        PathsConfig {
            root: "aspicking".to_string(),
            waveforms: "waveforms".to_string(),
            containers: "aqfiles".to_string(),
            references: "ref".to_string(),
            figures: "figures".to_string(),
            refined: "ts".to_string(),
            journal: "journal.jsonl".to_string(),
            scratch: None,
        }
    }
}

/// Unit of the event depth header in raw input traces
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum DepthUnit {
    #[serde(rename = "m")]
    Meters,
    #[serde(rename = "km")]
    Kilometers,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PrepareConfig {
    /// Seismic phase whose arrival is modelled and aligned
    pub phase: String,

    /// Raw depth unit; metres are converted to km before the travel-time lookup
    pub depth_unit: DepthUnit,

    /// Target sampling rate in Hz; traces at another rate go through the conditioner's resampler
    pub sample_rate: f64,

    /// Prepared traces keep `[arrival - w, arrival + w]` seconds
    pub trim_half_width: f64,

    /// JSON travel-time table used by the `prepare` command
    pub travel_time_table: Option<String>,
}

impl Default for PrepareConfig {
    fn default() -> Self {
        PrepareConfig {
            phase: "P".to_string(),
            depth_unit: DepthUnit::Meters,
            sample_rate: 40.0,
            trim_half_width: 100.0,
            travel_time_table: None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct QualityConfig {
    /// Noise window, seconds relative to the predicted arrival
    pub noise_window: [f64; 2],

    /// Signal window, seconds relative to the predicted arrival
    pub signal_window: [f64; 2],

    /// Traces with a lower signal-to-noise ratio are dropped
    pub snr_threshold: f64,
}

impl Default for QualityConfig {
    fn default() -> Self {
        QualityConfig {
            noise_window: [-50.0, -20.0],
            signal_window: [-10.0, 30.0],
            snr_threshold: 2.0,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ReferenceConfig {
    /// Events with fewer surviving stations are not aligned
    pub min_stations: usize,
}

impl Default for ReferenceConfig {
    fn default() -> Self {
        ReferenceConfig { min_stations: 10 }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AlignmentConfig {
    /// Half-width in seconds of every station window around its predicted arrival
    pub window_lead: f64,

    /// File name prefix of the container, `<prefix><eventId>.aq`
    pub container_prefix: String,
}

impl Default for AlignmentConfig {
    fn default() -> Self {
        AlignmentConfig {
            window_lead: 30.0,
            container_prefix: "rts".to_string(),
        }
    }
}

/// Parameters written to the stacking tool's command file
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct StackingParams {
    pub iterations: u32,
    pub stack_index: f64,
    pub power: f64,
    pub min_error: f64,
    pub max_error: f64,
    /// Start of the stacking window, seconds from the container start
    pub window_start: f64,
    pub window_length: f64,
    /// Bounds on the per-station correction, seconds
    pub min_diff: f64,
    pub max_diff: f64,
}

impl Default for StackingParams {
    fn default() -> Self {
        StackingParams {
            iterations: 10,
            stack_index: 3.0,
            power: 1.15,
            min_error: 0.0,
            max_error: 15000.0,
            window_start: 25.0,
            window_length: 20.0,
            min_diff: -3.0,
            max_diff: 3.0,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StackingConfig {
    pub executable: String,
    /// Command file name the executable reads from its working directory
    pub command_file: String,
    /// Kill the tool after this many seconds; `None` waits indefinitely
    pub timeout_secs: Option<u64>,
    pub params: StackingParams,
}

impl Default for StackingConfig {
    fn default() -> Self {
        StackingConfig {
            executable: "./tcas".to_string(),
            command_file: "tcas.cmd".to_string(),
            timeout_secs: None,
            params: StackingParams::default(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PlotConfig {
    pub enabled: bool,
    pub executable: String,
    pub input_file: String,
    /// File the plotting tool leaves behind in its working directory
    pub output_file: String,
    pub device: String,
    pub width: f64,
    /// Plot height per station is `0.25 * |height_scale|`
    pub height_scale: f64,
    pub char_height: f64,
    pub line_thickness: i32,
    pub label: i32,
    pub timeout_secs: Option<u64>,
}

impl Default for PlotConfig {
    fn default() -> Self {
        PlotConfig {
            enabled: true,
            executable: "./aqplot".to_string(),
            input_file: "aqplot.in".to_string(),
            output_file: "pgplot.ps".to_string(),
            device: "/vps".to_string(),
            width: 5.0,
            height_scale: 1.0,
            char_height: 1.0,
            line_thickness: 1,
            label: 0,
            timeout_secs: None,
        }
    }
}

/// Where the reference station's pick comes from before propagation
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReferencePickSource {
    /// The pick already stored on the reference trace; missing is an error
    Pick,
    /// The stored pick, or the modelled arrival when none was set upstream
    PickOrPredicted,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PropagationConfig {
    pub enabled: bool,
    /// Leading lines of the refined-timing file that carry no station rows
    pub timing_header_lines: usize,
    pub reference_pick: ReferencePickSource,
}

impl Default for PropagationConfig {
    fn default() -> Self {
        PropagationConfig {
            enabled: true,
            timing_header_lines: 8,
            reference_pick: ReferencePickSource::Pick,
        }
    }
}

/// Complete pipeline configuration, constructed once and passed to every stage
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct PipelineConfig {
    pub paths: PathsConfig,
    pub prepare: PrepareConfig,
    pub quality: QualityConfig,
    pub reference: ReferenceConfig,
    pub alignment: AlignmentConfig,
    pub stacking: StackingConfig,
    pub plot: PlotConfig,
    pub propagation: PropagationConfig,
    /// Unpack the refined waveform container into per-station SAC files
    pub export_refined_waveforms: bool,
}

impl PipelineConfig {
    /// Load from a JSON file; missing keys fall back to defaults
    pub fn from_file(path: &Path) -> PickingResult<Self> {
        let contents = std::fs::read_to_string(path)?;
        let config: PipelineConfig = serde_json::from_str(&contents)?;
        config.validate()?;
        Ok(config)
    }

    /// Load the file named by `ASPICK_CONFIG`, or defaults when unset
    pub fn from_env() -> PickingResult<Self> {
        match std::env::var("ASPICK_CONFIG") {
            Ok(path) => Self::from_file(Path::new(&path)),
            Err(_) => Ok(Self::default()),
        }
    }

    pub fn validate(&self) -> PickingResult<()> {
        let invalid = |msg: String| Err(PickingError::InvalidConfig(msg));

        for (name, window) in [
            ("quality.noise_window", self.quality.noise_window),
            ("quality.signal_window", self.quality.signal_window),
        ] {
            if !(window[0] < window[1]) {
                return invalid(format!("{} must be increasing, got {:?}", name, window));
            }
        }
        if self.quality.snr_threshold < 0.0 {
            return invalid("quality.snr_threshold must be non-negative".to_string());
        }
        if self.reference.min_stations == 0 {
            return invalid("reference.min_stations must be at least 1".to_string());
        }
        if !(self.alignment.window_lead > 0.0) {
            return invalid("alignment.window_lead must be positive".to_string());
        }
        if self.alignment.container_prefix.len() != 3 {
            // Event ids are recovered from the 14 characters after the prefix
            return invalid("alignment.container_prefix must be 3 characters".to_string());
        }
        if !(self.prepare.trim_half_width > 0.0) || !(self.prepare.sample_rate > 0.0) {
            return invalid("prepare.trim_half_width and sample_rate must be positive".to_string());
        }
        let params = &self.stacking.params;
        if params.min_error > params.max_error || params.min_diff > params.max_diff {
            return invalid("stacking bounds must satisfy min <= max".to_string());
        }
        if !(params.window_length > 0.0) {
            return invalid("stacking.params.window_length must be positive".to_string());
        }
        Ok(())
    }
}
