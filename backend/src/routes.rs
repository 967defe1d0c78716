use std::sync::Arc;
use std::time::Instant;

use actix_web::{get, post, web, HttpResponse};
use chrono::Local;
use log::info;
use serde::Serialize;
use serde_json::{Map, Value};

use crate::artifact::{Inference, ModelInfo};
use crate::error::{ApiError, InferenceError};
use crate::models::{IrrigationRequest, IrrigationResponse, SensorReading, SensorResponse};
use crate::state::AppState;

#[derive(Serialize)]
struct ModelSummary<'a> {
    name: &'a str,
    version: &'a str,
}

#[derive(Serialize)]
struct Health<'a> {
    status: &'static str,
    models: Vec<ModelSummary<'a>>,
}

#[derive(Serialize)]
struct ModelInfoList {
    models: Vec<ModelInfo>,
}

/// Mounts every route. The sensor endpoint only exists when its model was loaded.
pub fn configure(cfg: &mut web::ServiceConfig, sensor_enabled: bool) {
    cfg.service(health)
        .service(model_info)
        .service(predict)
        .service(batch_predict);
    if sensor_enabled {
        cfg.service(predict_sensor);
    }
    cfg.default_service(web::route().to(not_found));
}

/// JSON extractor settings; payload errors become structured client errors.
pub fn json_config(limit: usize) -> web::JsonConfig {
    web::JsonConfig::default()
        .limit(limit)
        .error_handler(|err, _req| ApiError::from(err).into())
}

#[get("/health")]
pub async fn health(state: web::Data<AppState>) -> HttpResponse {
    let models = state
        .artifacts()
        .map(|artifact| ModelSummary {
            name: artifact.name(),
            version: artifact.version(),
        })
        .collect();
    HttpResponse::Ok().json(Health {
        status: "ready",
        models,
    })
}

#[get("/model-info")]
pub async fn model_info(state: web::Data<AppState>) -> HttpResponse {
    HttpResponse::Ok().json(ModelInfoList {
        models: state.artifacts().map(|artifact| artifact.info()).collect(),
    })
}

#[post("/predict")]
pub async fn predict(
    state: web::Data<AppState>,
    body: web::Json<Value>,
) -> Result<HttpResponse, ApiError> {
    let start_time = Instant::now();

    let fields = into_object(body.into_inner())?;
    let request = IrrigationRequest::from_payload(&fields, &state.irrigation.encoders)?;
    let features = request.to_feature_vector();

    let artifact = Arc::clone(&state.irrigation.artifact);
    let inference = web::block(move || artifact.infer(&features))
        .await
        .map_err(|_| ApiError::Blocking)??;
    let response = irrigation_response(inference)?;

    info!(
        "Irrigation prediction served in {} ms",
        start_time.elapsed().as_millis()
    );
    Ok(HttpResponse::Ok().json(response))
}

#[post("/predict/batch")]
pub async fn batch_predict(
    state: web::Data<AppState>,
    body: web::Json<Value>,
) -> Result<HttpResponse, ApiError> {
    let start_time = Instant::now();

    let Value::Array(items) = body.into_inner() else {
        return Err(ApiError::InvalidPayload("expected a JSON array".to_string()));
    };
    if items.is_empty() {
        return Err(ApiError::EmptyBatch);
    }
    if items.len() > state.max_batch_size {
        return Err(ApiError::BatchTooLarge {
            size: items.len(),
            limit: state.max_batch_size,
        });
    }

    let mut batch = Vec::with_capacity(items.len());
    for (i, item) in items.into_iter().enumerate() {
        let fields = into_object(item)
            .map_err(|_| ApiError::InvalidPayload(format!("item {i} is not a JSON object")))?;
        let request = IrrigationRequest::from_payload(&fields, &state.irrigation.encoders)
            .map_err(|e| e.at_index(i))?;
        batch.push(request.to_feature_vector());
    }

    let artifact = Arc::clone(&state.irrigation.artifact);
    let inferences = web::block(move || {
        batch
            .iter()
            .map(|features| artifact.infer(features))
            .collect::<Result<Vec<_>, _>>()
    })
    .await
    .map_err(|_| ApiError::Blocking)??;
    let responses = inferences
        .into_iter()
        .map(irrigation_response)
        .collect::<Result<Vec<_>, _>>()?;

    info!(
        "Batch of {} irrigation predictions served in {} ms",
        responses.len(),
        start_time.elapsed().as_millis()
    );
    Ok(HttpResponse::Ok().json(responses))
}

#[post("/predict/sensor")]
pub async fn predict_sensor(
    state: web::Data<AppState>,
    body: web::Json<Value>,
) -> Result<HttpResponse, ApiError> {
    let start_time = Instant::now();
    let sensor = state.sensor.as_ref().ok_or(ApiError::NotFound)?;

    let fields = into_object(body.into_inner())?;
    let reading = SensorReading::from_payload(&fields, &sensor.context)?;
    let features = reading.to_feature_vector(&Local::now());

    let artifact = Arc::clone(&sensor.artifact);
    let inference = web::block(move || artifact.infer(&features))
        .await
        .map_err(|_| ApiError::Blocking)??;
    let Inference::Class { label, confidence } = inference else {
        return Err(InferenceError::Backend("regression output from a classifier".to_string()).into());
    };

    info!(
        "Sensor irrigation class served in {} ms",
        start_time.elapsed().as_millis()
    );
    Ok(HttpResponse::Ok().json(SensorResponse {
        irrigation_class: label,
        confidence,
    }))
}

pub async fn not_found() -> Result<HttpResponse, ApiError> {
    Err(ApiError::NotFound)
}

fn into_object(value: Value) -> Result<Map<String, Value>, ApiError> {
    match value {
        Value::Object(fields) => Ok(fields),
        _ => Err(ApiError::InvalidPayload("expected a JSON object".to_string())),
    }
}

fn irrigation_response(inference: Inference) -> Result<IrrigationResponse, ApiError> {
    match inference {
        Inference::Value(liters) => Ok(IrrigationResponse {
            recommended_irrigation_liters: liters,
        }),
        Inference::Class { .. } => {
            Err(InferenceError::Backend("class output from a regressor".to_string()).into())
        }
    }
}
