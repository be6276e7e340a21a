//! Model selection by name

use super::{
    AnomalyDetector, BiLstmAutoencoder, BiLstmAutoencoderConfig, DeepAutoencoder, DeepAutoencoderConfig,
    IsolationForest, IsolationForestConfig, LocalOutlierFactor, LofConfig, LstmAutoencoder, LstmAutoencoderConfig,
    PcaConfig, PcaReconstructor, ReconstructionDetector,
};
use crate::error::{Result, TimelyError};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::Path;
use std::str::FromStr;
use tracing::info;

/// Available detectors
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ModelKind {
    IsolationForest,
    Lof,
    Pca,
    Deep,
    Lstm,
    #[serde(rename = "bilstm")]
    BiLstm,
}

impl ModelKind {
    pub const ALL: [ModelKind; 6] = [
        ModelKind::IsolationForest,
        ModelKind::Lof,
        ModelKind::Pca,
        ModelKind::Deep,
        ModelKind::Lstm,
        ModelKind::BiLstm,
    ];

    pub fn key(&self) -> &'static str {
        match self {
            ModelKind::IsolationForest => "isolation_forest",
            ModelKind::Lof => "lof",
            ModelKind::Pca => "pca",
            ModelKind::Deep => "deep",
            ModelKind::Lstm => "lstm",
            ModelKind::BiLstm => "bilstm",
        }
    }

    /// Whether the detector can reconstruct windows (needed for localization)
    pub fn is_reconstruction(&self) -> bool {
        matches!(
            self,
            ModelKind::Pca | ModelKind::Deep | ModelKind::Lstm | ModelKind::BiLstm
        )
    }
}

impl fmt::Display for ModelKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.key())
    }
}

impl FromStr for ModelKind {
    type Err = TimelyError;

    fn from_str(s: &str) -> Result<Self> {
        ModelKind::ALL
            .into_iter()
            .find(|kind| kind.key() == s)
            .ok_or_else(|| TimelyError::UnknownModel(s.to_string()))
    }
}

/// Read model parameters; no file (or a path that does not exist) means defaults
fn load_params<T: DeserializeOwned + Default>(params_file: Option<&Path>) -> Result<T> {
    match params_file {
        Some(path) if path.exists() => {
            let text = std::fs::read_to_string(path)?;
            let params = serde_json::from_str(&text)?;
            info!(path = %path.display(), "Loaded model params");
            Ok(params)
        }
        _ => {
            info!("No provided params: use default one");
            Ok(T::default())
        }
    }
}

/// Build an unfitted detector from its registry key and optional JSON params
pub fn get_model(key: &str, params_file: Option<&Path>) -> Result<Box<dyn AnomalyDetector>> {
    let kind: ModelKind = key.parse()?;
    let detector: Box<dyn AnomalyDetector> = match kind {
        ModelKind::IsolationForest => {
            Box::new(IsolationForest::new(load_params::<IsolationForestConfig>(params_file)?))
        }
        ModelKind::Lof => Box::new(LocalOutlierFactor::new(load_params::<LofConfig>(params_file)?)),
        ModelKind::Pca => Box::new(ReconstructionDetector::new(PcaReconstructor::new(
            load_params::<PcaConfig>(params_file)?,
        ))),
        ModelKind::Deep => Box::new(ReconstructionDetector::new(DeepAutoencoder::new(
            load_params::<DeepAutoencoderConfig>(params_file)?,
        ))),
        ModelKind::Lstm => Box::new(ReconstructionDetector::new(LstmAutoencoder::new(
            load_params::<LstmAutoencoderConfig>(params_file)?,
        ))),
        ModelKind::BiLstm => Box::new(ReconstructionDetector::new(BiLstmAutoencoder::new(
            load_params::<BiLstmAutoencoderConfig>(params_file)?,
        ))),
    };
    Ok(detector)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_parse_keys() {
        for kind in ModelKind::ALL {
            assert_eq!(kind.key().parse::<ModelKind>().unwrap(), kind);
            assert_eq!(get_model(kind.key(), None).unwrap().name(), kind.key());
        }
    }

    #[test]
    fn test_serde_keys_match_registry() {
        for kind in ModelKind::ALL {
            assert_eq!(serde_json::to_value(kind).unwrap(), serde_json::json!(kind.key()));
        }
        assert!(ModelKind::BiLstm.is_reconstruction());
    }

    #[test]
    fn test_unknown_model() {
        let err = get_model("gru", None).err().unwrap();
        assert_eq!(err.to_string(), "gru does not exist");
    }

    #[test]
    fn test_params_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(file, r#"{{"n_neighbors": 3, "contamination": 0.2}}"#).unwrap();
        let config: LofConfig = load_params(Some(file.path())).unwrap();
        assert_eq!(config.n_neighbors, 3);

        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(file, r#"{{"encoder_units": [8], "with_lazy": false}}"#).unwrap();
        let config: LstmAutoencoderConfig = load_params(Some(file.path())).unwrap();
        assert_eq!(config.encoder_units, vec![8]);
        assert_eq!(config.decoder_units, vec![64, 100]);
        assert!(!config.threshold.with_lazy);
    }

    #[test]
    fn test_missing_and_malformed_params() {
        let config: PcaConfig = load_params(Some(Path::new("/nonexistent/params.json"))).unwrap();
        assert_eq!(config.n_components, PcaConfig::default().n_components);

        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(file, "not json").unwrap();
        assert!(matches!(
            get_model("pca", Some(file.path())),
            Err(TimelyError::SerializationError(_))
        ));
    }
}
