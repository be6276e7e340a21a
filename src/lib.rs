//! Timely - Hold-out anomaly detection for multi-sensor recordings
//!
//! This crate trains anomaly detectors on windows of normal operating
//! states and evaluates them on a held-out state, then reports which
//! sensors a reconstruction model failed to reproduce.
//!
//! # Modules
//!
//! ## Data
//! - [`data`] - LVM and CSV recording loaders, feature selection
//! - [`preprocessing`] - Block resampling and column scaling
//! - [`windowing`] - Sliding windows over recordings
//!
//! ## Models
//! - [`nn`] - Dense and LSTM layers, Adam, autoencoder training loop
//! - [`anomaly`] - Detectors (Isolation Forest, LOF, PCA, dense and LSTM autoencoders)
//!   and the model registry
//!
//! ## Evaluation
//! - [`detection`] - Per-sample anomaly flags for a whole recording
//! - [`evaluation`] - Leave-one-state-out protocol, reports and localization tables
//!
//! ## Interfaces
//! - [`cli`] - Command-line interface

// Core error handling
pub mod error;

// Data
pub mod data;
pub mod preprocessing;
pub mod windowing;

// Models
pub mod nn;
pub mod anomaly;

// Evaluation
pub mod detection;
pub mod evaluation;

// Interfaces
pub mod cli;

pub use error::{Result, TimelyError};

/// Re-export commonly used types
pub mod prelude {
    // Error handling
    pub use crate::error::{Result, TimelyError};

    // Data
    pub use crate::data::{load_recording, FeatureRef, LvmOptions, Recording};

    // Preprocessing
    pub use crate::preprocessing::{apply_scaler, fit_scaler, resample, BlockStat, Scaler, ScalerType};

    // Windowing
    pub use crate::windowing::{prepare_data, shuffle_windows, sliding_window_matrix};

    // Anomaly detection
    pub use crate::anomaly::{
        get_model, AnomalyDetector, AnomalyResult, DeepAutoencoder, IsolationForest,
        LocalOutlierFactor, LstmAutoencoder, ModelKind, PcaReconstructor, ThresholdConfig,
    };

    // Detection
    pub use crate::detection::predict_anomaly;

    // Evaluation
    pub use crate::evaluation::{ClassificationReport, EvaluationParams, HoldoutEvaluation, LocateTable};
}
