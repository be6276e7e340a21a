//! Leave-one-state-out evaluation
//!
//! Every state folder in turn plays the anomaly: models are trained on one
//! recording per other state and tested on everything else.

use super::{ClassificationReport, LocateTable};
use crate::anomaly::{get_model, ModelKind};
use crate::data::{list_files, load_recording, FeatureRef, LvmOptions, Recording};
use crate::error::{Result, TimelyError};
use crate::preprocessing::{apply_scaler, fit_scaler, resample, resample_with_features, BlockStat, Scaler, ScalerType};
use crate::windowing::{prepare_data, shuffle_windows};
use ndarray::{Array1, Axis};
use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use tracing::{info, warn};

fn default_kernel() -> usize {
    80
}

fn default_stride() -> usize {
    1
}

fn default_model_type() -> String {
    "lstm".to_string()
}

fn default_transform_type() -> Option<ScalerType> {
    Some(ScalerType::MinMax)
}

fn default_resample_rate() -> Option<usize> {
    Some(6400)
}

fn default_skip_list() -> Vec<usize> {
    vec![0]
}

fn default_train_list() -> Vec<usize> {
    vec![1]
}

fn default_file_extension() -> String {
    "lvm".to_string()
}

fn default_output_dir() -> PathBuf {
    PathBuf::from("./results")
}

fn default_true() -> bool {
    true
}

fn default_random_state() -> Option<u64> {
    Some(42)
}

/// Parameters of a hold-out evaluation run, read from JSON
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EvaluationParams {
    /// One folder per operating state; the position is the state id
    pub all_state_folder: Vec<PathBuf>,
    /// Columns kept from every recording
    pub features_list: Vec<FeatureRef>,
    #[serde(default = "default_kernel")]
    pub kernel: usize,
    #[serde(default = "default_stride")]
    pub stride: usize,
    #[serde(default = "default_model_type")]
    pub model_type: String,
    /// JSON file with model hyperparameters
    #[serde(default)]
    pub model_params: Option<PathBuf>,
    /// `null` disables scaling
    #[serde(default = "default_transform_type")]
    pub transform_type: Option<ScalerType>,
    /// `null` disables resampling
    #[serde(default = "default_resample_rate")]
    pub resample_rate: Option<usize>,
    /// Per-block statistics used instead of the block mean when resampling
    #[serde(default)]
    pub resample_stats: Option<Vec<BlockStat>>,
    /// File positions (per state folder) that are never loaded
    #[serde(default = "default_skip_list")]
    pub skip_list: Vec<usize>,
    /// File positions (per state folder) used for training
    #[serde(default = "default_train_list")]
    pub train_list: Vec<usize>,
    /// Only evaluate the first `max_states` folders
    #[serde(default)]
    pub max_states: Option<usize>,
    #[serde(default = "default_file_extension")]
    pub file_extension: String,
    #[serde(default)]
    pub use_channel_names: bool,
    #[serde(default = "default_output_dir")]
    pub output_dir: PathBuf,
    #[serde(default = "default_true")]
    pub save_result: bool,
    /// Seed of the training-window shuffle
    #[serde(default = "default_random_state")]
    pub random_state: Option<u64>,
}

impl EvaluationParams {
    pub fn new(all_state_folder: Vec<PathBuf>, features_list: Vec<FeatureRef>) -> Self {
        Self {
            all_state_folder,
            features_list,
            kernel: default_kernel(),
            stride: default_stride(),
            model_type: default_model_type(),
            model_params: None,
            transform_type: default_transform_type(),
            resample_rate: default_resample_rate(),
            resample_stats: None,
            skip_list: default_skip_list(),
            train_list: default_train_list(),
            max_states: None,
            file_extension: default_file_extension(),
            use_channel_names: false,
            output_dir: default_output_dir(),
            save_result: true,
            random_state: default_random_state(),
        }
    }

    /// Read parameters from a JSON file
    pub fn from_file(path: &Path) -> Result<Self> {
        let text = std::fs::read_to_string(path).map_err(|e| {
            TimelyError::ConfigError(format!("Impossible to read params {}: {}", path.display(), e))
        })?;
        let params: Self = serde_json::from_str(&text)?;
        params.validate()?;
        Ok(params)
    }

    pub fn validate(&self) -> Result<()> {
        if self.all_state_folder.is_empty() {
            return Err(TimelyError::ConfigError("all_state_folder is empty".to_string()));
        }
        if self.features_list.is_empty() {
            return Err(TimelyError::ConfigError("features_list is empty".to_string()));
        }
        if self.kernel == 0 {
            return Err(TimelyError::invalid_parameter("kernel", self.kernel, "must be at least 1"));
        }
        if self.stride == 0 {
            return Err(TimelyError::invalid_parameter("stride", self.stride, "must be at least 1"));
        }
        if self.resample_rate == Some(0) {
            return Err(TimelyError::invalid_parameter("resample_rate", 0, "must be at least 1"));
        }
        self.model_type.parse::<ModelKind>()?;
        Ok(())
    }

    pub fn with_kernel(mut self, kernel: usize) -> Self {
        self.kernel = kernel;
        self
    }

    pub fn with_stride(mut self, stride: usize) -> Self {
        self.stride = stride;
        self
    }

    pub fn with_model_type(mut self, model_type: impl Into<String>) -> Self {
        self.model_type = model_type.into();
        self
    }

    pub fn with_model_params(mut self, path: impl Into<PathBuf>) -> Self {
        self.model_params = Some(path.into());
        self
    }

    pub fn with_transform_type(mut self, transform_type: Option<ScalerType>) -> Self {
        self.transform_type = transform_type;
        self
    }

    pub fn with_resample_rate(mut self, rate: Option<usize>) -> Self {
        self.resample_rate = rate;
        self
    }

    pub fn with_file_lists(mut self, skip_list: Vec<usize>, train_list: Vec<usize>) -> Self {
        self.skip_list = skip_list;
        self.train_list = train_list;
        self
    }

    pub fn with_file_extension(mut self, ext: impl Into<String>) -> Self {
        self.file_extension = ext.into();
        self
    }

    pub fn with_output_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.output_dir = dir.into();
        self
    }

    pub fn with_save_result(mut self, save: bool) -> Self {
        self.save_result = save;
        self
    }

    pub fn with_max_states(mut self, max_states: usize) -> Self {
        self.max_states = Some(max_states);
        self
    }
}

/// A recording with its position inside its state folder
#[derive(Debug, Clone)]
pub struct StateFile {
    pub index: usize,
    pub path: PathBuf,
    pub recording: Recording,
}

/// All loaded recordings of one state folder
#[derive(Debug, Clone)]
pub struct StateData {
    pub name: String,
    pub files: Vec<StateFile>,
}

/// Results for one held-out state
#[derive(Debug, Clone)]
pub struct StateOutcome {
    pub state_id: usize,
    pub state_name: String,
    pub report: ClassificationReport,
    /// Absent when the model cannot reconstruct windows
    pub locate: Option<LocateTable>,
    pub threshold: f64,
    pub train_shape: (usize, usize, usize),
    pub test_shape: (usize, usize, usize),
    pub anomaly_file: Option<PathBuf>,
    pub locate_file: Option<PathBuf>,
}

pub struct HoldoutEvaluation {
    params: EvaluationParams,
}

impl HoldoutEvaluation {
    pub fn new(params: EvaluationParams) -> Result<Self> {
        params.validate()?;
        Ok(Self { params })
    }

    pub fn params(&self) -> &EvaluationParams {
        &self.params
    }

    fn state_folders(&self) -> &[PathBuf] {
        let folders = &self.params.all_state_folder;
        match self.params.max_states {
            Some(max) => &folders[..max.min(folders.len())],
            None => folders,
        }
    }

    fn load_file(&self, path: &Path, lvm_options: &LvmOptions) -> Result<Recording> {
        let recording = load_recording(path, lvm_options)?.select(&self.params.features_list)?;
        match (self.params.resample_rate, &self.params.resample_stats) {
            (Some(rate), Some(stats)) => resample_with_features(&recording, rate, stats),
            (Some(rate), None) => resample(&recording, rate),
            (None, _) => Ok(recording),
        }
    }

    /// Load every state folder once, skipping files at `skip_list` positions
    pub fn load_states(&self) -> Result<Vec<StateData>> {
        let lvm_options = LvmOptions::default().with_channel_names(self.params.use_channel_names);

        self.state_folders()
            .iter()
            .enumerate()
            .map(|(state_id, folder)| {
                let name = folder
                    .file_name()
                    .map(|n| n.to_string_lossy().into_owned())
                    .unwrap_or_else(|| folder.display().to_string());
                info!(state_id, state = %name, "Read state");

                let paths: Vec<(usize, PathBuf)> = list_files(folder, &self.params.file_extension)?
                    .into_iter()
                    .enumerate()
                    .filter(|(i, _)| !self.params.skip_list.contains(i))
                    .collect();

                let files = paths
                    .into_par_iter()
                    .map(|(index, path)| {
                        let recording = self.load_file(&path, &lvm_options)?;
                        Ok(StateFile { index, path, recording })
                    })
                    .collect::<Result<Vec<_>>>()?;

                Ok(StateData { name, files })
            })
            .collect()
    }

    /// Evaluate every state as the held-out anomaly
    pub fn run(&self) -> Result<Vec<StateOutcome>> {
        let states = self.load_states()?;
        (0..states.len())
            .map(|state_id| self.evaluate_state(&states, state_id))
            .collect()
    }

    /// Hold out `selected` and train on the `train_list` files of the other states
    pub fn evaluate_state(&self, states: &[StateData], selected: usize) -> Result<StateOutcome> {
        let p = &self.params;
        info!(state_id = selected, "Evaluation state");

        let mut train = Vec::new();
        let mut train_labels = Vec::new();
        let mut test = Vec::new();
        let mut test_labels = Vec::new();
        for (state_id, state) in states.iter().enumerate() {
            for file in &state.files {
                if p.train_list.contains(&file.index) && state_id != selected {
                    info!(state_id, file = %file.path.display(), "Train file");
                    train.push(file.recording.clone());
                    train_labels.push(state_id);
                } else {
                    info!(state_id, file = %file.path.display(), "Test file");
                    test.push(file.recording.clone());
                    test_labels.push(state_id);
                }
            }
        }
        if train.is_empty() {
            return Err(TimelyError::TrainingError(format!(
                "No training recordings when holding out state {}",
                selected
            )));
        }

        let scaler: Option<Scaler> = match p.transform_type {
            Some(kind) if kind != ScalerType::None => {
                info!(transform = ?kind, "Apply transform");
                let scaler = fit_scaler(&train, kind)?;
                train = apply_scaler(&scaler, &train)?;
                test = apply_scaler(&scaler, &test)?;
                Some(scaler)
            }
            _ => {
                info!("No transform selected");
                None
            }
        };

        let (x_train, y_train) = prepare_data(&train, &train_labels, p.kernel, p.stride)?;
        let (x_test, y_test) = prepare_data(&test, &test_labels, p.kernel, p.stride)?;
        info!(train = ?x_train.dim(), test = ?x_test.dim(), "Window sets");
        if x_train.len_of(Axis(0)) == 0 {
            return Err(TimelyError::TrainingError(format!(
                "Training recordings are shorter than the kernel ({})",
                p.kernel
            )));
        }

        let (x_train, _) = shuffle_windows(&x_train, &y_train, p.random_state);

        info!(model = %p.model_type, "Model initialization");
        let mut model = get_model(&p.model_type, p.model_params.as_deref())?;
        info!("Training");
        model.fit(&x_train)?;

        let y_pred = model.predict(&x_test)?;
        let y_true: Array1<bool> = y_test.mapv(|s| s == selected);
        let report = ClassificationReport::from_flags(&y_true.to_vec(), &y_pred.to_vec())?;
        info!(state_id = selected, accuracy = report.accuracy(), "Anomaly accuracy");

        let selected_idx: Vec<usize> = (0..y_test.len()).filter(|&i| y_test[i] == selected).collect();
        let locate = if selected_idx.is_empty() {
            warn!(state_id = selected, "No test windows for the held-out state");
            None
        } else {
            info!("Locate anomaly");
            let x_selected = x_test.select(Axis(0), &selected_idx);
            let y_selected = y_test.select(Axis(0), &selected_idx);
            match model.reconstruct(&x_selected) {
                Ok(x_reconstructed) => Some(LocateTable::build(
                    &x_selected,
                    &x_reconstructed,
                    &y_selected,
                    train[0].columns(),
                    model.threshold(),
                    scaler.as_ref(),
                )?),
                Err(TimelyError::Unsupported { .. }) => {
                    warn!(model = %p.model_type, "Model cannot reconstruct windows, skipping localization");
                    None
                }
                Err(e) => return Err(e),
            }
        };

        let mut outcome = StateOutcome {
            state_id: selected,
            state_name: states[selected].name.clone(),
            report,
            locate,
            threshold: model.threshold(),
            train_shape: x_train.dim(),
            test_shape: x_test.dim(),
            anomaly_file: None,
            locate_file: None,
        };

        if p.save_result {
            self.save(&mut outcome)?;
        }
        Ok(outcome)
    }

    fn save(&self, outcome: &mut StateOutcome) -> Result<()> {
        let dir = &self.params.output_dir;
        std::fs::create_dir_all(dir)?;
        let model = &self.params.model_type;

        let anomaly_path = dir.join(format!("results_anomaly_{}_{}_.csv", outcome.state_id, model));
        outcome.report.to_csv(&anomaly_path)?;
        info!(path = %anomaly_path.display(), "Saved classification report");
        outcome.anomaly_file = Some(anomaly_path);

        if let Some(locate) = &outcome.locate {
            let locate_path = dir.join(format!("results_locate_{}_{}_.csv", outcome.state_id, model));
            locate.to_csv(&locate_path)?;
            info!(path = %locate_path.display(), "Saved locate table");
            outcome.locate_file = Some(locate_path);
        }
        Ok(())
    }
}
