use std::sync::Arc;

use log::info;

use crate::artifact::{
    FeatureContract, LabelEncoder, ModelArtifact, IRRIGATION_CONTRACT, SENSOR_CONTRACT,
};
use crate::config::{SensorSettings, Settings};
use crate::error::LoadError;
use crate::models::{Category, IrrigationEncoders, SensorContext};

/// Irrigation volume regressor and the encoders its requests use.
#[derive(Debug)]
pub struct IrrigationService {
    pub artifact: Arc<ModelArtifact>,
    pub encoders: IrrigationEncoders,
}

impl IrrigationService {
    pub fn new(artifact: ModelArtifact) -> Result<Self, LoadError> {
        let encoders = IrrigationEncoders {
            soil_type: contract_encoder(&artifact, &IRRIGATION_CONTRACT, "soil_type")?.clone(),
            crop: contract_encoder(&artifact, &IRRIGATION_CONTRACT, "crop")?.clone(),
        };
        Ok(Self {
            artifact: Arc::new(artifact),
            encoders,
        })
    }
}

/// Sensor classifier together with its request defaults.
#[derive(Debug)]
pub struct SensorService {
    pub artifact: Arc<ModelArtifact>,
    pub context: SensorContext,
}

impl SensorService {
    pub fn new(artifact: ModelArtifact, settings: &SensorSettings) -> Result<Self, LoadError> {
        let district_encoder = contract_encoder(&artifact, &SENSOR_CONTRACT, "district")?.clone();
        let zone_encoder = contract_encoder(&artifact, &SENSOR_CONTRACT, "zone")?.clone();
        let season_encoder = contract_encoder(&artifact, &SENSOR_CONTRACT, "season")?.clone();

        // Configured defaults must be categories the model was trained on.
        let default = |field: &str, label: &str, encoder: &LabelEncoder| {
            Category::resolve(field, label, encoder).map_err(|e| LoadError::Schema {
                name: artifact.name().to_string(),
                contract: SENSOR_CONTRACT.name,
                reason: format!("configured default {e}"),
            })
        };
        let district = default("district", &settings.district, &district_encoder)?;
        let zone = default("zone", &settings.zone, &zone_encoder)?;
        let season = default("season", &settings.season, &season_encoder)?;

        Ok(Self {
            context: SensorContext {
                district_encoder,
                zone_encoder,
                season_encoder,
                district,
                zone,
                season,
                rainfall_next_hour_mm: settings.rainfall_next_hour_mm,
            },
            artifact: Arc::new(artifact),
        })
    }
}

/// Process wide serving state, built once before the server binds.
#[derive(Debug)]
pub struct AppState {
    pub irrigation: IrrigationService,
    pub sensor: Option<SensorService>,
    pub max_batch_size: usize,
}

impl AppState {
    /// Loads every configured artifact. Nothing is served if any load fails.
    pub fn load(settings: &Settings) -> Result<Self, LoadError> {
        let irrigation = IrrigationService::new(ModelArtifact::load(
            &settings.model.path,
            &IRRIGATION_CONTRACT,
        )?)?;

        let sensor = match &settings.sensor.model_path {
            Some(path) => {
                let artifact = ModelArtifact::load(path, &SENSOR_CONTRACT)?;
                Some(SensorService::new(artifact, &settings.sensor)?)
            }
            None => {
                info!("No sensor model configured, /predict/sensor is disabled");
                None
            }
        };

        Ok(Self {
            irrigation,
            sensor,
            max_batch_size: settings.server.max_batch_size,
        })
    }

    pub fn artifacts(&self) -> impl Iterator<Item = &ModelArtifact> {
        std::iter::once(self.irrigation.artifact.as_ref())
            .chain(self.sensor.as_ref().map(|s| s.artifact.as_ref()))
    }
}

fn contract_encoder<'a>(
    artifact: &'a ModelArtifact,
    contract: &FeatureContract,
    name: &str,
) -> Result<&'a LabelEncoder, LoadError> {
    artifact.encoder(name).ok_or_else(|| LoadError::Schema {
        name: artifact.name().to_string(),
        contract: contract.name,
        reason: format!("missing encoder '{name}'"),
    })
}
