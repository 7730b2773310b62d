//! Agent configuration.
//!
//! Configuration is assembled once, validated once, and handed to the session
//! constructors. Every invalid combination is reported as a [`ConfigError`]
//! before any audio is processed.

use std::path::{Path, PathBuf};
use std::time::Duration;

use figment::{
    providers::{Env, Format, Serialized, Toml, Yaml},
    Figment,
};
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::constants::{features, policy};
use crate::error::{AgentError, ConfigError, Result};
use crate::simul::{GlobalCmvn, TextStyle};
use crate::types::{SampleRate, Task};

// Default value functions for serde defaults
fn default_shift_ms() -> u32 { features::SHIFT_MS }
fn default_window_ms() -> u32 { features::WINDOW_MS }
fn default_sample_rate_hz() -> u32 { features::INPUT_SAMPLE_RATE.value() }
fn default_target_sample_rate_hz() -> u32 { features::TARGET_SAMPLE_RATE.value() }
fn default_channels() -> u16 { 1 }
fn default_feature_dim() -> usize { features::FEATURE_DIM }
fn default_source_unit_ms() -> u32 { policy::SOURCE_UNIT_MS }
fn default_stride() -> usize { 1 }
fn default_max_len() -> usize { policy::MAX_LEN }

/// Sliding-window feature extraction parameters.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FeatureConfig {
    /// Frame shift in milliseconds
    #[serde(default = "default_shift_ms")]
    pub shift_ms: u32,

    /// Analysis window in milliseconds
    #[serde(default = "default_window_ms")]
    pub window_ms: u32,

    /// Rate of the incoming samples
    #[serde(default = "default_sample_rate_hz")]
    pub sample_rate_hz: u32,

    /// Rate the filterbank runs at; windows are resampled when it differs
    #[serde(default = "default_target_sample_rate_hz")]
    pub target_sample_rate_hz: u32,

    /// Interleaved channels in incoming chunks, mixed down to mono on append
    #[serde(default = "default_channels")]
    pub channels: u16,

    /// Width of every feature frame
    #[serde(default = "default_feature_dim")]
    pub feature_dim: usize,

    /// Inline normalization statistics
    #[serde(default)]
    pub global_cmvn: Option<GlobalCmvn>,

    /// JSON file holding `{"mean": [...], "std": [...]}`, used when no inline stats are given
    #[serde(default)]
    pub global_cmvn_path: Option<PathBuf>,
}

impl Default for FeatureConfig {
    fn default() -> Self {
        Self {
            shift_ms: default_shift_ms(),
            window_ms: default_window_ms(),
            sample_rate_hz: default_sample_rate_hz(),
            target_sample_rate_hz: default_target_sample_rate_hz(),
            channels: default_channels(),
            feature_dim: default_feature_dim(),
            global_cmvn: None,
            global_cmvn_path: None,
        }
    }
}

impl FeatureConfig {
    /// Validate the framing arithmetic and normalization statistics.
    pub fn validate(&self) -> std::result::Result<(), ConfigError> {
        if self.shift_ms == 0 {
            return Err(ConfigError::Zero("shift_ms"));
        }
        if self.window_ms < self.shift_ms {
            return Err(ConfigError::WindowShorterThanShift {
                window_ms: self.window_ms,
                shift_ms: self.shift_ms,
            });
        }
        let input = SampleRate::new(self.sample_rate_hz)?;
        SampleRate::new(self.target_sample_rate_hz)?;
        if self.channels == 0 {
            return Err(ConfigError::Zero("channels"));
        }
        if self.feature_dim == 0 {
            return Err(ConfigError::Zero("feature_dim"));
        }
        if input.samples_for_ms(self.shift_ms) == 0 {
            return Err(ConfigError::Validation(format!(
                "shift of {}ms is shorter than one sample at {}",
                self.shift_ms, input
            )));
        }
        if let Some(cmvn) = &self.global_cmvn {
            cmvn.validate(self.feature_dim)?;
        }
        Ok(())
    }

    /// Input sample rate.
    pub fn input_rate(&self) -> SampleRate {
        SampleRate(self.sample_rate_hz)
    }

    /// Filterbank sample rate.
    pub fn target_rate(&self) -> SampleRate {
        SampleRate(self.target_sample_rate_hz)
    }

    /// Resolve normalization statistics, reading `global_cmvn_path` if needed.
    pub fn resolve_cmvn(&self) -> Result<Option<GlobalCmvn>> {
        let cmvn = match (&self.global_cmvn, &self.global_cmvn_path) {
            (Some(inline), _) => Some(inline.clone()),
            (None, Some(path)) => Some(GlobalCmvn::load_json(path)?),
            (None, None) => None,
        };
        if let Some(cmvn) = &cmvn {
            cmvn.validate(self.feature_dim)?;
        }
        Ok(cmvn)
    }
}

/// READ/WRITE decision parameters.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PolicyConfig {
    /// Minimum lag, in source units, between consumed source and emitted target
    #[serde(default)]
    pub lagging_k: usize,

    /// Audio duration counted as one source unit
    #[serde(default = "default_source_unit_ms")]
    pub source_unit_ms: u32,

    /// Minimum number of new primary tokens before a non-final WRITE
    #[serde(default = "default_stride")]
    pub stride: usize,

    /// Maximum finalized tokens per track and utterance
    #[serde(default = "default_max_len")]
    pub max_len: usize,

    /// Mark the WRITE finished once the primary track reaches `max_len`
    #[serde(default)]
    pub finish_on_max_len: bool,

    /// Upper bound for each model call, unbounded when absent
    #[serde(default)]
    pub decode_timeout_ms: Option<u64>,
}

impl Default for PolicyConfig {
    fn default() -> Self {
        Self {
            lagging_k: 0,
            source_unit_ms: default_source_unit_ms(),
            stride: default_stride(),
            max_len: default_max_len(),
            finish_on_max_len: false,
            decode_timeout_ms: None,
        }
    }
}

impl PolicyConfig {
    /// Validate policy thresholds.
    pub fn validate(&self) -> std::result::Result<(), ConfigError> {
        if self.source_unit_ms == 0 {
            return Err(ConfigError::Zero("source_unit_ms"));
        }
        if self.stride == 0 {
            return Err(ConfigError::Zero("stride"));
        }
        if self.max_len == 0 {
            return Err(ConfigError::Zero("max_len"));
        }
        if self.decode_timeout_ms == Some(0) {
            return Err(ConfigError::Zero("decode_timeout_ms"));
        }
        Ok(())
    }

    /// Decode timeout as a duration.
    pub fn decode_timeout(&self) -> Option<Duration> {
        self.decode_timeout_ms.map(Duration::from_millis)
    }
}

/// One decoding stage of a session.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TrackConfig {
    /// Task decoded by this track
    pub task: Task,

    /// Track whose finalized tokens condition this one; must be listed earlier
    #[serde(default)]
    pub depends_on: Option<Task>,

    /// Whether this track's delta is the WRITE payload
    #[serde(default)]
    pub primary: bool,

    /// How tokens are rendered to text
    #[serde(default)]
    pub style: TextStyle,

    /// fairseq dictionary for rendering; the model must supply one otherwise
    #[serde(default)]
    pub dictionary_path: Option<PathBuf>,

    /// File name under the sink directory, defaults to `<task>.txt`
    #[serde(default)]
    pub sink_file: Option<String>,
}

impl TrackConfig {
    /// Primary track with no dependency.
    pub fn primary(task: Task) -> Self {
        Self {
            task,
            depends_on: None,
            primary: true,
            style: TextStyle::default(),
            dictionary_path: None,
            sink_file: None,
        }
    }

    /// Secondary track conditioned on `upstream`.
    pub fn dependent(task: Task, upstream: Task) -> Self {
        Self {
            task,
            depends_on: Some(upstream),
            primary: false,
            style: TextStyle::default(),
            dictionary_path: None,
            sink_file: None,
        }
    }

    /// Builder-style setter for the rendering style.
    pub fn with_style(mut self, style: TextStyle) -> Self {
        self.style = style;
        self
    }

    /// Builder-style setter for the primary flag.
    pub fn with_primary(mut self, primary: bool) -> Self {
        self.primary = primary;
        self
    }

    /// Name of this track's sink file.
    pub fn sink_file_name(&self) -> String {
        self.sink_file
            .clone()
            .unwrap_or_else(|| format!("{}.txt", self.task.as_str()))
    }
}

/// Validate the track graph: unique tasks, one primary, dependencies listed earlier.
pub fn validate_tracks(tracks: &[TrackConfig]) -> std::result::Result<(), ConfigError> {
    if tracks.is_empty() {
        return Err(ConfigError::Tracks("at least one track is required".into()));
    }

    let primaries = tracks.iter().filter(|t| t.primary).count();
    if primaries != 1 {
        return Err(ConfigError::Tracks(format!(
            "exactly one primary track is required, found {}",
            primaries
        )));
    }

    for (idx, track) in tracks.iter().enumerate() {
        if tracks[..idx].iter().any(|t| t.task == track.task) {
            return Err(ConfigError::Tracks(format!("duplicate track {}", track.task)));
        }
        if let Some(upstream) = track.depends_on {
            if upstream == track.task {
                return Err(ConfigError::Tracks(format!(
                    "track {} depends on itself",
                    track.task
                )));
            }
            if !tracks[..idx].iter().any(|t| t.task == upstream) {
                return Err(ConfigError::Tracks(format!(
                    "track {} depends on {}, which is not listed before it",
                    track.task, upstream
                )));
            }
        }
    }
    Ok(())
}

/// Where finished utterances are logged.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SinkConfig {
    /// Directory for per-task text logs; logging is off when absent
    #[serde(default)]
    pub output_dir: Option<PathBuf>,
}

/// Complete agent configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AgentConfig {
    /// Feature extraction
    #[serde(default)]
    pub features: FeatureConfig,

    /// READ/WRITE policy
    #[serde(default)]
    pub policy: PolicyConfig,

    /// Decode tracks in dependency order
    #[serde(default = "default_tracks")]
    pub tracks: Vec<TrackConfig>,

    /// Optional text sink
    #[serde(default)]
    pub sink: SinkConfig,
}

fn default_tracks() -> Vec<TrackConfig> {
    vec![TrackConfig::primary(Task::Asr)]
}

impl Default for AgentConfig {
    fn default() -> Self {
        Self {
            features: FeatureConfig::default(),
            policy: PolicyConfig::default(),
            tracks: default_tracks(),
            sink: SinkConfig::default(),
        }
    }
}

impl AgentConfig {
    /// Load configuration from multiple sources with precedence:
    /// 1. Environment variables prefixed `SIMULSTREAM_`, nested with `__` (highest priority)
    /// 2. simulstream.yaml (if exists)
    /// 3. simulstream.toml (if exists)
    /// 4. Built-in defaults (lowest priority)
    pub fn load() -> Result<Self> {
        Self::load_from(Path::new("simulstream.toml"), Path::new("simulstream.yaml"))
    }

    /// Same as [`AgentConfig::load`] with explicit file locations.
    pub fn load_from(toml_path: &Path, yaml_path: &Path) -> Result<Self> {
        let config: AgentConfig = Figment::from(Serialized::defaults(AgentConfig::default()))
            .merge(Toml::file(toml_path))
            .merge(Yaml::file(yaml_path))
            .merge(Env::prefixed("SIMULSTREAM_").split("__"))
            .extract()?;

        config.validate()?;
        debug!(
            shift_ms = config.features.shift_ms,
            window_ms = config.features.window_ms,
            tracks = config.tracks.len(),
            "Loaded agent configuration"
        );
        Ok(config)
    }

    /// Validate every section.
    pub fn validate(&self) -> std::result::Result<(), ConfigError> {
        self.features.validate()?;
        self.policy.validate()?;
        validate_tracks(&self.tracks)
    }

    /// Export configuration to TOML format
    pub fn to_toml(&self) -> Result<String> {
        toml::to_string_pretty(self).map_err(|e| {
            AgentError::Config(ConfigError::Validation(format!(
                "Failed to serialize to TOML: {}",
                e
            )))
        })
    }

    /// Export configuration to YAML format
    pub fn to_yaml(&self) -> Result<String> {
        serde_yaml::to_string(self).map_err(|e| {
            AgentError::Config(ConfigError::Validation(format!(
                "Failed to serialize to YAML: {}",
                e
            )))
        })
    }
}
