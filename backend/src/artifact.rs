//! Model artifact loading.
//!
//! An artifact is a JSON document holding everything needed to turn an
//! encoded feature vector into a prediction: the expected feature order,
//! the fitted label encoders, an optional standard scaler and the estimator
//! itself. Artifacts are checked against a hardcoded [`FeatureContract`]
//! when loaded so that a model trained on a different schema never serves
//! traffic.

use std::collections::{BTreeMap, HashMap};
use std::fs;
use std::path::{Path, PathBuf};

use log::info;
use serde::{Deserialize, Serialize};

use crate::error::{InferenceError, LoadError};
use crate::inference::{LinearRegressor, LogisticClassifier, OnnxModel, Predictor};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskKind {
    Regression,
    Classification,
}

/// The fixed agreement between an artifact and the endpoint that feeds it.
#[derive(Debug)]
pub struct FeatureContract {
    pub name: &'static str,
    pub features: &'static [&'static str],
    pub encoders: &'static [&'static str],
    pub task: TaskKind,
}

pub const IRRIGATION_CONTRACT: FeatureContract = FeatureContract {
    name: "irrigation volume",
    features: &["rainfall_mm", "soil_type", "crop", "area_hectares"],
    encoders: &["soil_type", "crop"],
    task: TaskKind::Regression,
};

pub const SENSOR_CONTRACT: FeatureContract = FeatureContract {
    name: "sensor irrigation class",
    features: &[
        "soil_moisture_percent",
        "temperature_celsius",
        "humidity_percent",
        "rainfall_mm_prediction_next_1h",
        "hour",
        "day_of_year",
        "month",
        "district",
        "zone",
        "season",
        "heat_stress",
        "drought_stress",
        "soil_temp_interaction",
        "humidity_rain_interaction",
    ],
    encoders: &["district", "zone", "season"],
    task: TaskKind::Classification,
};

/// Fitted label encoder. The code of a category is its index in `classes`.
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq)]
pub struct LabelEncoder {
    pub classes: Vec<String>,
}

impl LabelEncoder {
    pub fn transform(&self, category: &str) -> Option<usize> {
        self.classes
            .binary_search_by(|class| class.as_str().cmp(category))
            .ok()
    }
}

/// Standard scaler: `(x - mean) / scale`.
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq)]
pub struct StandardScaler {
    pub mean: Vec<f32>,
    pub scale: Vec<f32>,
}

impl StandardScaler {
    pub fn transform(&self, features: &[f32]) -> Vec<f32> {
        features
            .iter()
            .zip(self.mean.iter().zip(&self.scale))
            .map(|(x, (mean, scale))| (x - mean) / scale)
            .collect()
    }
}

#[derive(Debug, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
enum EstimatorSpec {
    Linear {
        coefficients: Vec<f32>,
        intercept: f32,
    },
    Logistic {
        classes: Vec<i64>,
        coefficients: Vec<Vec<f32>>,
        intercepts: Vec<f32>,
    },
    Onnx {
        path: PathBuf,
        #[serde(default)]
        classes: Option<Vec<i64>>,
    },
}

#[derive(Debug, Deserialize)]
struct ArtifactFile {
    name: String,
    version: String,
    feature_names: Vec<String>,
    #[serde(default)]
    scaler: Option<StandardScaler>,
    #[serde(default)]
    encoders: HashMap<String, LabelEncoder>,
    estimator: EstimatorSpec,
    #[serde(default)]
    output_range: Option<(f32, f32)>,
}

/// Decoded model output.
#[derive(Debug, Clone, PartialEq)]
pub enum Inference {
    Value(f32),
    Class { label: i64, confidence: Option<f32> },
}

#[derive(Debug, Serialize)]
pub struct ModelInfo {
    pub name: String,
    pub version: String,
    pub task: TaskKind,
    pub features: Vec<String>,
    pub categories: BTreeMap<String, Vec<String>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub classes: Option<Vec<i64>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub output_range: Option<(f32, f32)>,
}

/// A loaded, validated and immutable model.
pub struct ModelArtifact {
    name: String,
    version: String,
    feature_names: Vec<String>,
    scaler: Option<StandardScaler>,
    encoders: HashMap<String, LabelEncoder>,
    output_range: Option<(f32, f32)>,
    classes: Option<Vec<i64>>,
    task: TaskKind,
    estimator: Box<dyn Predictor>,
}

impl std::fmt::Debug for ModelArtifact {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ModelArtifact")
            .field("name", &self.name)
            .field("version", &self.version)
            .field("task", &self.task)
            .finish_non_exhaustive()
    }
}

impl ModelArtifact {
    /// Reads and checks the artifact at `path`. Any failure is fatal for the
    /// caller, there is no partially loaded state.
    pub fn load<P: AsRef<Path>>(path: P, contract: &FeatureContract) -> Result<Self, LoadError> {
        let path = path.as_ref();
        let raw = fs::read_to_string(path).map_err(|source| LoadError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        let file: ArtifactFile = serde_json::from_str(&raw).map_err(|source| LoadError::Corrupt {
            path: path.to_path_buf(),
            source,
        })?;

        let base_dir = path.parent().unwrap_or_else(|| Path::new("."));
        let artifact = Self::from_file(file, contract, base_dir)?;
        info!(
            "Loaded model '{}' v{} from {} ({} features)",
            artifact.name,
            artifact.version,
            path.display(),
            artifact.feature_names.len()
        );
        Ok(artifact)
    }

    fn from_file(
        file: ArtifactFile,
        contract: &FeatureContract,
        base_dir: &Path,
    ) -> Result<Self, LoadError> {
        let schema = |reason: String| LoadError::Schema {
            name: file.name.clone(),
            contract: contract.name,
            reason,
        };

        if file.feature_names.iter().map(String::as_str).ne(contract.features.iter().copied()) {
            return Err(schema(format!(
                "feature_names {:?} differ from the expected order {:?}",
                file.feature_names, contract.features
            )));
        }
        let n_features = contract.features.len();

        for required in contract.encoders {
            let encoder = file
                .encoders
                .get(*required)
                .ok_or_else(|| schema(format!("missing encoder '{required}'")))?;
            if encoder.classes.is_empty() {
                return Err(schema(format!("encoder '{required}' has no classes")));
            }
            if encoder.classes.windows(2).any(|pair| pair[0] >= pair[1]) {
                return Err(schema(format!(
                    "encoder '{required}' classes must be sorted and unique"
                )));
            }
        }

        if let Some(scaler) = &file.scaler {
            if scaler.mean.len() != n_features || scaler.scale.len() != n_features {
                return Err(schema(format!("scaler must have {n_features} entries")));
            }
            if scaler.scale.iter().any(|s| !s.is_finite() || *s == 0.0)
                || scaler.mean.iter().any(|m| !m.is_finite())
            {
                return Err(schema("scaler holds zero or non-finite values".to_string()));
            }
        }

        if let Some((min, max)) = file.output_range {
            if !(min.is_finite() && max.is_finite() && min <= max) {
                return Err(schema(format!("invalid output_range [{min}, {max}]")));
            }
        }

        let (estimator, classes): (Box<dyn Predictor>, Option<Vec<i64>>) = match file.estimator {
            EstimatorSpec::Linear {
                coefficients,
                intercept,
            } => {
                let model = LinearRegressor::new(coefficients, intercept);
                if model.n_features() != n_features {
                    return Err(schema(format!(
                        "linear estimator has {} coefficients, expected {n_features}",
                        model.n_features()
                    )));
                }
                (Box::new(model), None)
            }
            EstimatorSpec::Logistic {
                classes,
                coefficients,
                intercepts,
            } => {
                let rows = coefficients.len();
                let binary = classes.len() == 2 && rows == 1;
                if classes.len() < 2 || !(binary || rows == classes.len()) {
                    return Err(schema(format!(
                        "logistic estimator has {rows} coefficient rows for {} classes",
                        classes.len()
                    )));
                }
                if intercepts.len() != rows || coefficients.iter().any(|r| r.len() != n_features) {
                    return Err(schema(format!(
                        "logistic estimator rows must have {n_features} coefficients and one intercept each"
                    )));
                }
                let model = LogisticClassifier::new(coefficients, intercepts);
                (Box::new(model), Some(classes))
            }
            EstimatorSpec::Onnx { path, classes } => {
                let model = OnnxModel::load(base_dir.join(path), n_features)?;
                (Box::new(model), classes)
            }
        };

        let task = if classes.is_some() {
            TaskKind::Classification
        } else {
            TaskKind::Regression
        };
        if task != contract.task {
            return Err(schema(format!(
                "estimator is a {task:?} model, expected {:?}",
                contract.task
            )));
        }

        Ok(Self {
            name: file.name,
            version: file.version,
            feature_names: file.feature_names,
            scaler: file.scaler,
            encoders: file.encoders,
            output_range: file.output_range,
            classes,
            task,
            estimator,
        })
    }

    /// Regression artifact around an arbitrary estimator, with no scaler.
    #[cfg(test)]
    pub(crate) fn with_predictor(
        contract: &FeatureContract,
        encoders: HashMap<String, LabelEncoder>,
        estimator: Box<dyn Predictor>,
    ) -> Self {
        Self {
            name: format!("{} test model", contract.name),
            version: "0.0.0".to_string(),
            feature_names: contract.features.iter().map(|f| f.to_string()).collect(),
            scaler: None,
            encoders,
            output_range: None,
            classes: None,
            task: TaskKind::Regression,
            estimator,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn version(&self) -> &str {
        &self.version
    }

    /// Returns the encoder named by the contract. Presence is checked at load.
    pub fn encoder(&self, name: &str) -> Option<&LabelEncoder> {
        self.encoders.get(name)
    }

    /// Scales the feature vector, runs the estimator and decodes the result.
    pub fn infer(&self, features: &[f32]) -> Result<Inference, InferenceError> {
        if features.len() != self.feature_names.len() {
            return Err(InferenceError::ShapeMismatch {
                expected: self.feature_names.len(),
                actual: features.len(),
            });
        }

        let raw = match &self.scaler {
            Some(scaler) => self.estimator.predict(&scaler.transform(features))?,
            None => self.estimator.predict(features)?,
        };
        if raw.iter().any(|v| !v.is_finite()) {
            return Err(InferenceError::NonFinite);
        }

        match &self.classes {
            None => {
                let value = *raw.first().ok_or(InferenceError::EmptyOutput)?;
                Ok(Inference::Value(match self.output_range {
                    Some((min, max)) => value.clamp(min, max),
                    None => value,
                }))
            }
            Some(classes) => decode_class(classes, &raw),
        }
    }

    pub fn info(&self) -> ModelInfo {
        ModelInfo {
            name: self.name.clone(),
            version: self.version.clone(),
            task: self.task,
            features: self.feature_names.clone(),
            categories: self
                .encoders
                .iter()
                .map(|(name, encoder)| (name.clone(), encoder.classes.clone()))
                .collect(),
            classes: self.classes.clone(),
            output_range: self.output_range,
        }
    }
}

fn decode_class(classes: &[i64], raw: &[f32]) -> Result<Inference, InferenceError> {
    match raw {
        [] => Err(InferenceError::EmptyOutput),
        [label] => {
            let label = label.round() as i64;
            if !classes.contains(&label) {
                return Err(InferenceError::UnknownLabel(label));
            }
            Ok(Inference::Class {
                label,
                confidence: None,
            })
        }
        probabilities if probabilities.len() == classes.len() => {
            let (index, confidence) = probabilities
                .iter()
                .copied()
                .enumerate()
                .fold((0, f32::NEG_INFINITY), |best, (i, p)| {
                    if p > best.1 {
                        (i, p)
                    } else {
                        best
                    }
                });
            Ok(Inference::Class {
                label: classes[index],
                confidence: Some(confidence),
            })
        }
        other => Err(InferenceError::ShapeMismatch {
            expected: classes.len(),
            actual: other.len(),
        }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    const VOLUME_ARTIFACT: &str = include_str!("../models/tamil_nadu_irrigation_model.json");
    const SENSOR_ARTIFACT: &str = include_str!("../models/tamil_nadu_sensor_model.json");

    fn write_artifact(contents: &str) -> tempfile::NamedTempFile {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(contents.as_bytes()).unwrap();
        file
    }

    fn volume_json() -> serde_json::Value {
        serde_json::from_str(VOLUME_ARTIFACT).unwrap()
    }

    #[test]
    fn test_load_reference_artifacts() {
        let file = write_artifact(VOLUME_ARTIFACT);
        let volume = ModelArtifact::load(file.path(), &IRRIGATION_CONTRACT).unwrap();
        assert_eq!(volume.name(), "tamil_nadu_irrigation_volume");
        assert_eq!(volume.info().task, TaskKind::Regression);

        let file = write_artifact(SENSOR_ARTIFACT);
        let sensor = ModelArtifact::load(file.path(), &SENSOR_CONTRACT).unwrap();
        assert_eq!(sensor.info().classes, Some(vec![0, 1, 2]));
    }

    #[test]
    fn test_missing_file_is_io_error() {
        let dir = tempfile::tempdir().unwrap();
        let result = ModelArtifact::load(dir.path().join("absent.json"), &IRRIGATION_CONTRACT);
        assert!(matches!(result, Err(LoadError::Io { .. })));
    }

    #[test]
    fn test_corrupt_file_is_rejected() {
        let file = write_artifact("{ \"name\": \"truncated\", ");
        let result = ModelArtifact::load(file.path(), &IRRIGATION_CONTRACT);
        assert!(matches!(result, Err(LoadError::Corrupt { .. })));
    }

    #[test]
    fn test_contract_mismatch_is_rejected() {
        // A sensor artifact cannot serve the volume endpoint.
        let file = write_artifact(SENSOR_ARTIFACT);
        let result = ModelArtifact::load(file.path(), &IRRIGATION_CONTRACT);
        assert!(matches!(result, Err(LoadError::Schema { .. })));

        let mut json = volume_json();
        json["feature_names"] = serde_json::json!(["crop", "soil_type", "rainfall_mm", "area_hectares"]);
        let file = write_artifact(&json.to_string());
        let err = ModelArtifact::load(file.path(), &IRRIGATION_CONTRACT).unwrap_err();
        assert!(err.to_string().contains("expected order"));
    }

    #[test]
    fn test_encoder_checks() {
        let mut json = volume_json();
        json["encoders"].as_object_mut().unwrap().remove("crop");
        let file = write_artifact(&json.to_string());
        let err = ModelArtifact::load(file.path(), &IRRIGATION_CONTRACT).unwrap_err();
        assert!(err.to_string().contains("missing encoder 'crop'"));

        let mut json = volume_json();
        json["encoders"]["soil_type"]["classes"] = serde_json::json!(["sandy", "clay"]);
        let file = write_artifact(&json.to_string());
        let err = ModelArtifact::load(file.path(), &IRRIGATION_CONTRACT).unwrap_err();
        assert!(err.to_string().contains("sorted and unique"));
    }

    #[test]
    fn test_coefficient_count_must_match() {
        let mut json = volume_json();
        json["estimator"]["coefficients"] = serde_json::json!([1.0, 2.0]);
        let file = write_artifact(&json.to_string());
        let result = ModelArtifact::load(file.path(), &IRRIGATION_CONTRACT);
        assert!(matches!(result, Err(LoadError::Schema { .. })));
    }

    #[test]
    fn test_zero_scale_is_rejected() {
        let mut json = volume_json();
        json["scaler"] = serde_json::json!({ "mean": [0.0, 0.0, 0.0, 0.0], "scale": [1.0, 0.0, 1.0, 1.0] });
        let file = write_artifact(&json.to_string());
        let err = ModelArtifact::load(file.path(), &IRRIGATION_CONTRACT).unwrap_err();
        assert!(err.to_string().contains("scaler"));
    }

    #[test]
    fn test_label_encoder_transform() {
        let encoder = LabelEncoder {
            classes: vec!["black".into(), "clay".into(), "red".into()],
        };
        assert_eq!(encoder.transform("clay"), Some(1));
        assert_eq!(encoder.transform("Clay"), None);
        assert_eq!(encoder.transform("loamy"), None);
    }

    #[test]
    fn test_infer_clamps_to_output_range() {
        let file = write_artifact(VOLUME_ARTIFACT);
        let volume = ModelArtifact::load(file.path(), &IRRIGATION_CONTRACT).unwrap();

        // 6500 - 9.5 * 850 + 850 * 2 + 1200 * 5 + 11800 * 2.5
        assert_eq!(
            volume.infer(&[850.0, 2.0, 5.0, 2.5]).unwrap(),
            Inference::Value(35625.0)
        );
        assert_eq!(volume.infer(&[5000.0, 0.0, 0.0, 0.1]).unwrap(), Inference::Value(0.0));
        assert_eq!(
            volume.infer(&[0.0, 0.0, 0.0, 10000.0]).unwrap(),
            Inference::Value(250000.0)
        );
    }

    #[test]
    fn test_infer_rejects_wrong_width() {
        let file = write_artifact(VOLUME_ARTIFACT);
        let volume = ModelArtifact::load(file.path(), &IRRIGATION_CONTRACT).unwrap();
        assert_eq!(
            volume.infer(&[1.0, 2.0]),
            Err(InferenceError::ShapeMismatch {
                expected: 4,
                actual: 2
            })
        );
    }

    #[test]
    fn test_infer_rejects_non_finite_output() {
        let file = write_artifact(VOLUME_ARTIFACT);
        let volume = ModelArtifact::load(file.path(), &IRRIGATION_CONTRACT).unwrap();
        assert_eq!(
            volume.infer(&[f32::MAX, 0.0, 0.0, f32::MAX]),
            Err(InferenceError::NonFinite)
        );
    }

    #[test]
    fn test_decode_class() {
        let classes = [0, 1, 2];
        assert_eq!(
            decode_class(&classes, &[0.1, 0.7, 0.2]).unwrap(),
            Inference::Class {
                label: 1,
                confidence: Some(0.7)
            }
        );
        assert_eq!(
            decode_class(&classes, &[2.0]).unwrap(),
            Inference::Class {
                label: 2,
                confidence: None
            }
        );
        assert_eq!(decode_class(&classes, &[7.0]), Err(InferenceError::UnknownLabel(7)));
        assert!(matches!(
            decode_class(&classes, &[0.5, 0.5]),
            Err(InferenceError::ShapeMismatch { .. })
        ));
    }
}
