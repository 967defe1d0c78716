use std::path::Path;

use tract_onnx::prelude::*;

use crate::error::{InferenceError, LoadError};

/// Anything that maps a feature vector to raw model outputs.
///
/// Implementations are shared across all actix workers and must not mutate
/// state while predicting.
pub trait Predictor: Send + Sync {
    fn predict(&self, features: &[f32]) -> Result<Vec<f32>, InferenceError>;
}

/// Ordinary least squares style regressor: `w . x + b`.
#[derive(Debug, Clone)]
pub struct LinearRegressor {
    coefficients: Vec<f32>,
    intercept: f32,
}

impl LinearRegressor {
    pub fn new(coefficients: Vec<f32>, intercept: f32) -> Self {
        Self {
            coefficients,
            intercept,
        }
    }

    pub fn n_features(&self) -> usize {
        self.coefficients.len()
    }
}

impl Predictor for LinearRegressor {
    fn predict(&self, features: &[f32]) -> Result<Vec<f32>, InferenceError> {
        check_width(self.coefficients.len(), features)?;
        Ok(vec![dot(&self.coefficients, features) + self.intercept])
    }
}

/// Logistic regression classifier returning one probability per class.
///
/// A single coefficient row is the binary case and goes through a sigmoid,
/// several rows are treated as a multinomial model and go through a softmax.
#[derive(Debug, Clone)]
pub struct LogisticClassifier {
    coefficients: Vec<Vec<f32>>,
    intercepts: Vec<f32>,
}

impl LogisticClassifier {
    pub fn new(coefficients: Vec<Vec<f32>>, intercepts: Vec<f32>) -> Self {
        Self {
            coefficients,
            intercepts,
        }
    }
}

impl Predictor for LogisticClassifier {
    fn predict(&self, features: &[f32]) -> Result<Vec<f32>, InferenceError> {
        let logits = self
            .coefficients
            .iter()
            .zip(&self.intercepts)
            .map(|(row, b)| {
                check_width(row.len(), features)?;
                Ok(dot(row, features) + b)
            })
            .collect::<Result<Vec<f32>, InferenceError>>()?;

        match logits.as_slice() {
            [] => Err(InferenceError::EmptyOutput),
            [z] => {
                let p = 1.0 / (1.0 + (-z).exp()); // sigmoid
                Ok(vec![1.0 - p, p])
            }
            _ => Ok(softmax(&logits)),
        }
    }
}

/// ONNX graph compiled into a tract plan.
pub struct OnnxModel {
    model: SimplePlan<TypedFact, Box<dyn TypedOp>, Graph<TypedFact, Box<dyn TypedOp>>>,
    n_features: usize,
}

impl OnnxModel {
    pub fn load<P: AsRef<Path>>(model_path: P, n_features: usize) -> Result<Self, LoadError> {
        let path = model_path.as_ref();
        let onnx_error = |e: TractError| LoadError::Onnx {
            path: path.to_path_buf(),
            reason: e.to_string(),
        };

        let model = tract_onnx::onnx()
            .model_for_path(path)
            .map_err(onnx_error)?
            .with_input_fact(
                0,
                InferenceFact::dt_shape(f32::datum_type(), tvec!(1, n_features)),
            )
            .map_err(onnx_error)?
            .into_optimized()
            .map_err(onnx_error)?
            .into_runnable()
            .map_err(onnx_error)?;

        Ok(Self { model, n_features })
    }
}

impl Predictor for OnnxModel {
    fn predict(&self, features: &[f32]) -> Result<Vec<f32>, InferenceError> {
        check_width(self.n_features, features)?;
        let backend = |e: TractError| InferenceError::Backend(e.to_string());

        let input_tensor = Tensor::from_shape(&[1, self.n_features], features).map_err(backend)?;
        let outputs = self.model.run(tvec!(input_tensor.into())).map_err(backend)?;
        let first = outputs.first().ok_or(InferenceError::EmptyOutput)?;

        // Classifiers exported from sklearn emit int64 labels.
        let values = first.cast_to::<f32>().map_err(backend)?;
        let view = values.to_array_view::<f32>().map_err(backend)?;
        Ok(view.iter().copied().collect())
    }
}

fn check_width(expected: usize, features: &[f32]) -> Result<(), InferenceError> {
    if features.len() != expected {
        return Err(InferenceError::ShapeMismatch {
            expected,
            actual: features.len(),
        });
    }
    Ok(())
}

fn dot(weights: &[f32], features: &[f32]) -> f32 {
    weights.iter().zip(features).map(|(w, x)| w * x).sum()
}

fn softmax(logits: &[f32]) -> Vec<f32> {
    let max = logits.iter().copied().fold(f32::NEG_INFINITY, f32::max);
    let exps: Vec<f32> = logits.iter().map(|z| (z - max).exp()).collect();
    let total: f32 = exps.iter().sum();
    exps.into_iter().map(|e| e / total).collect()
}
