use actix_cors::Cors;
use actix_web::http::header;
use actix_web::middleware::{DefaultHeaders, Logger};
use actix_web::{web, App, HttpServer};
use anyhow::Context;
use clap::Parser;
use log::{error, info};

use tn_irrigation_api::config::{Args, Settings};
use tn_irrigation_api::routes;
use tn_irrigation_api::state::AppState;

#[actix_web::main]
async fn main() -> anyhow::Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info"))
        .format_timestamp_millis()
        .format_module_path(false)
        .init();

    let args = Args::parse();
    let settings = Settings::load(&args).context("invalid configuration")?;

    info!(
        "Starting Tamil Nadu irrigation prediction API v{}",
        env!("CARGO_PKG_VERSION")
    );

    // The port is only bound once every model is loaded.
    let state = match AppState::load(&settings) {
        Ok(state) => web::Data::new(state),
        Err(e) => {
            error!("Model loading failed, refusing to serve: {}", e);
            return Err(e).context("startup aborted");
        }
    };

    let sensor_enabled = state.sensor.is_some();
    let bind_address = settings.bind_address();
    let workers = settings.server.workers;
    let json_limit = settings.server.json_limit_bytes;
    let cors_origins = settings.server.cors_origins.clone();

    info!("Server listening on: http://{}", bind_address);
    info!("Workers: {}", workers);
    info!("Endpoints:");
    info!("   GET  /health");
    info!("   GET  /model-info");
    info!("   POST /predict");
    info!("   POST /predict/batch");
    if sensor_enabled {
        info!("   POST /predict/sensor");
    }

    HttpServer::new(move || {
        let cors = cors_origins
            .iter()
            .fold(Cors::default(), |cors, origin| cors.allowed_origin(origin))
            .allowed_methods(vec!["GET", "POST"])
            .allowed_header(header::CONTENT_TYPE)
            .max_age(3600);

        App::new()
            .wrap(Logger::default())
            .wrap(DefaultHeaders::new().add(("X-Content-Type-Options", "nosniff")))
            .wrap(cors)
            .app_data(state.clone())
            .app_data(routes::json_config(json_limit))
            .configure(|cfg| routes::configure(cfg, sensor_enabled))
    })
    .workers(workers)
    .bind(&bind_address)
    .with_context(|| format!("cannot bind {bind_address}"))?
    .run()
    .await?;

    Ok(())
}
