use std::path::PathBuf;

use actix_web::http::StatusCode;
use actix_web::{test, web, App};
use serde_json::{json, Value};

use tn_irrigation_api::config::Settings;
use tn_irrigation_api::routes;
use tn_irrigation_api::state::AppState;

fn reference_model(file: &str) -> PathBuf {
    PathBuf::from(env!("CARGO_MANIFEST_DIR")).join("models").join(file)
}

fn load_state(sensor: bool, max_batch_size: usize) -> web::Data<AppState> {
    let mut settings = Settings::default();
    settings.model.path = reference_model("tamil_nadu_irrigation_model.json");
    settings.server.max_batch_size = max_batch_size;
    if sensor {
        settings.sensor.model_path = Some(reference_model("tamil_nadu_sensor_model.json"));
    }
    web::Data::new(AppState::load(&settings).unwrap())
}

macro_rules! service {
    ($state:expr, $limit:expr) => {{
        let state = $state;
        let sensor_enabled = state.sensor.is_some();
        test::init_service(
            App::new()
                .app_data(state)
                .app_data(routes::json_config($limit))
                .configure(|cfg| routes::configure(cfg, sensor_enabled)),
        )
        .await
    }};
    ($state:expr) => {
        service!($state, 256 * 1024)
    };
}

macro_rules! post {
    ($uri:expr, $body:expr $(,)?) => {
        test::TestRequest::post().uri($uri).set_json($body).to_request()
    };
}

#[actix_web::test]
async fn test_predict_returns_exactly_the_response_fields() {
    let app = service!(load_state(false, 64));
    let resp = test::call_service(
        &app,
        post!(
            "/predict",
            json!({ "rainfall_mm": 850, "soil_type": "clay", "crop": "paddy", "area_hectares": 2.5 }),
        ),
    )
    .await;
    assert_eq!(resp.status(), StatusCode::OK);

    let body: Value = test::read_body_json(resp).await;
    let fields = body.as_object().unwrap();
    assert_eq!(fields.len(), 1);
    let liters = fields["recommended_irrigation_liters"].as_f64().unwrap();
    assert!((0.0..=250000.0).contains(&liters));
    assert_eq!(liters, 35625.0);
}

#[actix_web::test]
async fn test_predict_is_deterministic() {
    let app = service!(load_state(false, 64));
    let payload = json!({ "rainfall_mm": 420.5, "soil_type": "red", "crop": "cotton", "area_hectares": 1.2 });

    let first: Value =
        test::read_body_json(test::call_service(&app, post!("/predict", payload.clone())).await).await;
    let second: Value =
        test::read_body_json(test::call_service(&app, post!("/predict", payload)).await).await;
    assert_eq!(first, second);
}

#[actix_web::test]
async fn test_missing_field_is_named() {
    let app = service!(load_state(false, 64));
    let resp = test::call_service(
        &app,
        post!("/predict", json!({ "soil_type": "clay", "crop": "paddy", "area_hectares": 2.5 })),
    )
    .await;
    assert_eq!(resp.status(), StatusCode::BAD_REQUEST);

    let body: Value = test::read_body_json(resp).await;
    assert_eq!(body["error"], "validation_failed");
    assert_eq!(body["field"], "rainfall_mm");
    assert_eq!(body["reason"], "missing");
}

#[actix_web::test]
async fn test_out_of_domain_values_are_rejected() {
    let app = service!(load_state(false, 64));

    let resp = test::call_service(
        &app,
        post!(
            "/predict",
            json!({ "rainfall_mm": 850, "soil_type": "clay", "crop": "paddy", "area_hectares": -1 }),
        ),
    )
    .await;
    assert_eq!(resp.status(), StatusCode::BAD_REQUEST);
    let body: Value = test::read_body_json(resp).await;
    assert_eq!(body["field"], "area_hectares");
    assert_eq!(body["reason"], "out_of_range");

    let resp = test::call_service(
        &app,
        post!(
            "/predict",
            json!({ "rainfall_mm": 850, "soil_type": "volcanic", "crop": "paddy", "area_hectares": 2 }),
        ),
    )
    .await;
    let body: Value = test::read_body_json(resp).await;
    assert_eq!(body["field"], "soil_type");
    assert_eq!(body["reason"], "unknown_category");
    assert!(body["allowed"].as_array().unwrap().contains(&json!("clay")));

    // Too small to survive conversion to f32, so the model would see 0.
    let resp = test::call_service(
        &app,
        post!(
            "/predict",
            json!({ "rainfall_mm": 850, "soil_type": "clay", "crop": "paddy", "area_hectares": 1e-50 }),
        ),
    )
    .await;
    assert_eq!(resp.status(), StatusCode::BAD_REQUEST);
    let body: Value = test::read_body_json(resp).await;
    assert_eq!(body["field"], "area_hectares");
    assert_eq!(body["min_exclusive"], true);
}

#[actix_web::test]
async fn test_malformed_payloads() {
    let app = service!(load_state(false, 64), 64);

    let req = test::TestRequest::post()
        .uri("/predict")
        .insert_header(("content-type", "application/json"))
        .set_payload("{ not json")
        .to_request();
    let resp = test::call_service(&app, req).await;
    assert_eq!(resp.status(), StatusCode::BAD_REQUEST);
    let body: Value = test::read_body_json(resp).await;
    assert_eq!(body["error"], "invalid_payload");

    let resp = test::call_service(&app, post!("/predict", json!([1, 2, 3]))).await;
    assert_eq!(resp.status(), StatusCode::BAD_REQUEST);

    let resp = test::call_service(
        &app,
        post!("/predict", json!({ "rainfall_mm": 850, "padding": "x".repeat(200) })),
    )
    .await;
    assert_eq!(resp.status(), StatusCode::PAYLOAD_TOO_LARGE);
}

#[actix_web::test]
async fn test_batch_predict() {
    let app = service!(load_state(false, 3));

    let resp = test::call_service(
        &app,
        post!(
            "/predict/batch",
            json!([
                { "rainfall_mm": 850, "soil_type": "clay", "crop": "paddy", "area_hectares": 2.5 },
                { "rainfall_mm": 5000, "soil_type": "alluvial", "crop": "banana", "area_hectares": 0.1 }
            ]),
        ),
    )
    .await;
    assert_eq!(resp.status(), StatusCode::OK);
    let body: Value = test::read_body_json(resp).await;
    assert_eq!(
        body,
        json!([
            { "recommended_irrigation_liters": 35625.0 },
            { "recommended_irrigation_liters": 0.0 }
        ])
    );

    let resp = test::call_service(
        &app,
        post!(
            "/predict/batch",
            json!([
                { "rainfall_mm": 850, "soil_type": "clay", "crop": "paddy", "area_hectares": 2.5 },
                { "rainfall_mm": 850, "soil_type": "clay", "crop": "paddy" }
            ]),
        ),
    )
    .await;
    assert_eq!(resp.status(), StatusCode::BAD_REQUEST);
    let body: Value = test::read_body_json(resp).await;
    assert_eq!(body["field"], "[1].area_hectares");

    let resp = test::call_service(&app, post!("/predict/batch", json!([]))).await;
    assert_eq!(resp.status(), StatusCode::BAD_REQUEST);

    let item = json!({ "rainfall_mm": 1, "soil_type": "clay", "crop": "paddy", "area_hectares": 1 });
    let resp = test::call_service(&app, post!("/predict/batch", json!([item, item, item, item]))).await;
    assert_eq!(resp.status(), StatusCode::BAD_REQUEST);
    let body: Value = test::read_body_json(resp).await;
    assert_eq!(body["error"], "invalid_batch");
}

#[actix_web::test]
async fn test_concurrent_requests_get_their_own_results() {
    let app = service!(load_state(false, 64));

    let areas: Vec<f64> = (1..=16).map(|i| i as f64 * 0.5).collect();
    let requests = areas.iter().map(|area| {
        test::call_service(
            &app,
            post!(
                "/predict",
                json!({ "rainfall_mm": 600, "soil_type": "loamy", "crop": "maize", "area_hectares": area }),
            ),
        )
    });
    let responses = futures::future::join_all(requests).await;

    for (area, resp) in areas.iter().zip(responses) {
        assert_eq!(resp.status(), StatusCode::OK);
        let body: Value = test::read_body_json(resp).await;
        // loamy = 4, maize = 3
        let expected = 6500.0 - 9.5 * 600.0 + 850.0 * 4.0 + 1200.0 * 3.0 + 11800.0 * area;
        let liters = body["recommended_irrigation_liters"].as_f64().unwrap();
        assert!((liters - expected).abs() < 0.5, "area {area}: {liters} != {expected}");
    }
}

#[actix_web::test]
async fn test_sensor_endpoint() {
    let app = service!(load_state(true, 64));

    let resp = test::call_service(
        &app,
        post!("/predict/sensor", json!({ "humidity": 25, "temperature": 39, "soilMoisture": 8 })),
    )
    .await;
    assert_eq!(resp.status(), StatusCode::OK);
    let body: Value = test::read_body_json(resp).await;
    assert_eq!(body["irrigation_class"], 2);
    assert!(body["confidence"].as_f64().unwrap() > 0.9);
    assert_eq!(body.as_object().unwrap().len(), 2);

    let resp = test::call_service(
        &app,
        post!("/predict/sensor", json!({ "humidity": 90, "temperature": 24, "soilMoisture": 85 })),
    )
    .await;
    let body: Value = test::read_body_json(resp).await;
    assert_eq!(body["irrigation_class"], 0);

    let resp = test::call_service(
        &app,
        post!("/predict/sensor", json!({ "humidity": 90, "temperature": "hot", "soilMoisture": 85 })),
    )
    .await;
    assert_eq!(resp.status(), StatusCode::BAD_REQUEST);
    let body: Value = test::read_body_json(resp).await;
    assert_eq!(body["field"], "temperature");
    assert_eq!(body["reason"], "wrong_type");
}

#[actix_web::test]
async fn test_sensor_endpoint_absent_without_model() {
    let app = service!(load_state(false, 64));
    let resp = test::call_service(
        &app,
        post!("/predict/sensor", json!({ "humidity": 25, "temperature": 39, "soilMoisture": 8 })),
    )
    .await;
    assert_eq!(resp.status(), StatusCode::NOT_FOUND);
}

#[actix_web::test]
async fn test_health_and_model_info() {
    let app = service!(load_state(true, 64));

    let req = test::TestRequest::get().uri("/health").to_request();
    let body: Value = test::call_and_read_body_json(&app, req).await;
    assert_eq!(body["status"], "ready");
    assert_eq!(body["models"].as_array().unwrap().len(), 2);

    let req = test::TestRequest::get().uri("/model-info").to_request();
    let body: Value = test::call_and_read_body_json(&app, req).await;
    let volume = &body["models"][0];
    assert_eq!(volume["task"], "regression");
    assert_eq!(
        volume["features"],
        json!(["rainfall_mm", "soil_type", "crop", "area_hectares"])
    );
    assert_eq!(volume["output_range"], json!([0.0, 250000.0]));
    assert_eq!(body["models"][1]["classes"], json!([0, 1, 2]));
}
