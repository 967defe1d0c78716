use chrono::{DateTime, Datelike, TimeZone, Timelike};
use serde::Serialize;
use serde_json::{Map, Value};

use crate::artifact::LabelEncoder;
use crate::error::{ValidationError, ValidationReason};

/// Inclusive numeric bounds, optionally open at the lower end.
#[derive(Debug, Clone, Copy)]
pub struct NumericDomain {
    pub min: f64,
    pub max: f64,
    pub min_exclusive: bool,
}

impl NumericDomain {
    const fn closed(min: f64, max: f64) -> Self {
        Self {
            min,
            max,
            min_exclusive: false,
        }
    }

    const fn left_open(min: f64, max: f64) -> Self {
        Self {
            min,
            max,
            min_exclusive: true,
        }
    }

    pub fn contains(&self, value: f64) -> bool {
        let above_min = if self.min_exclusive {
            value > self.min
        } else {
            value >= self.min
        };
        above_min && value <= self.max
    }
}

pub const RAINFALL_MM: NumericDomain = NumericDomain::closed(0.0, 5000.0);
pub const AREA_HECTARES: NumericDomain = NumericDomain::left_open(0.0, 10000.0);
pub const HUMIDITY_PERCENT: NumericDomain = NumericDomain::closed(0.0, 100.0);
pub const TEMPERATURE_CELSIUS: NumericDomain = NumericDomain::closed(-10.0, 60.0);
pub const SOIL_MOISTURE_PERCENT: NumericDomain = NumericDomain::closed(0.0, 100.0);
pub const RAINFALL_NEXT_HOUR_MM: NumericDomain = NumericDomain::closed(0.0, 500.0);

/// A category that passed validation, with its encoded value.
#[derive(Debug, Clone, PartialEq)]
pub struct Category {
    pub label: String,
    pub code: usize,
}

impl Category {
    pub fn resolve(field: &str, label: &str, encoder: &LabelEncoder) -> Result<Self, ValidationError> {
        encoder
            .transform(label)
            .map(|code| Category {
                label: label.to_string(),
                code,
            })
            .ok_or_else(|| {
                ValidationError::new(
                    field,
                    ValidationReason::UnknownCategory {
                        value: label.to_string(),
                        allowed: encoder.classes.clone(),
                    },
                )
            })
    }
}

/// Typed access to the fields of a JSON object payload.
pub struct Payload<'a> {
    fields: &'a Map<String, Value>,
}

impl<'a> Payload<'a> {
    pub fn new(fields: &'a Map<String, Value>) -> Self {
        Self { fields }
    }

    fn get(&self, field: &str) -> Option<&'a Value> {
        self.fields.get(field).filter(|value| !value.is_null())
    }

    pub fn number(&self, field: &str, domain: NumericDomain) -> Result<f32, ValidationError> {
        self.optional_number(field, domain)?
            .ok_or_else(|| ValidationError::missing(field))
    }

    pub fn optional_number(
        &self,
        field: &str,
        domain: NumericDomain,
    ) -> Result<Option<f32>, ValidationError> {
        let Some(value) = self.get(field) else {
            return Ok(None);
        };
        let number = value.as_f64().filter(|n| n.is_finite()).ok_or_else(|| {
            ValidationError::new(field, ValidationReason::WrongType { expected: "number" })
        })?;
        // The domain applies to the value the model receives, after narrowing.
        let narrowed = number as f32;
        if !narrowed.is_finite() || !domain.contains(f64::from(narrowed)) {
            return Err(ValidationError::new(
                field,
                ValidationReason::OutOfRange {
                    value: number,
                    min: domain.min,
                    max: domain.max,
                    min_exclusive: domain.min_exclusive,
                },
            ));
        }
        Ok(Some(narrowed))
    }

    pub fn category(&self, field: &str, encoder: &LabelEncoder) -> Result<Category, ValidationError> {
        self.optional_category(field, encoder)?
            .ok_or_else(|| ValidationError::missing(field))
    }

    pub fn optional_category(
        &self,
        field: &str,
        encoder: &LabelEncoder,
    ) -> Result<Option<Category>, ValidationError> {
        let Some(value) = self.get(field) else {
            return Ok(None);
        };
        let label = value.as_str().ok_or_else(|| {
            ValidationError::new(field, ValidationReason::WrongType { expected: "string" })
        })?;
        Category::resolve(field, label, encoder).map(Some)
    }
}

/// Encoders the irrigation volume request is validated against.
#[derive(Debug, Clone)]
pub struct IrrigationEncoders {
    pub soil_type: LabelEncoder,
    pub crop: LabelEncoder,
}

/// A validated irrigation volume request.
#[derive(Debug, Clone, PartialEq)]
pub struct IrrigationRequest {
    pub rainfall_mm: f32,
    pub soil_type: Category,
    pub crop: Category,
    pub area_hectares: f32,
}

impl IrrigationRequest {
    /// Fields are checked in feature order; the first failure wins.
    pub fn from_payload(
        fields: &Map<String, Value>,
        encoders: &IrrigationEncoders,
    ) -> Result<Self, ValidationError> {
        let payload = Payload::new(fields);
        Ok(Self {
            rainfall_mm: payload.number("rainfall_mm", RAINFALL_MM)?,
            soil_type: payload.category("soil_type", &encoders.soil_type)?,
            crop: payload.category("crop", &encoders.crop)?,
            area_hectares: payload.number("area_hectares", AREA_HECTARES)?,
        })
    }

    pub fn to_feature_vector(&self) -> Vec<f32> {
        vec![
            self.rainfall_mm,
            self.soil_type.code as f32,
            self.crop.code as f32,
            self.area_hectares,
        ]
    }
}

#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct IrrigationResponse {
    pub recommended_irrigation_liters: f32,
}

/// Encoders plus the values used when a sensor request leaves out the
/// location, season or forecast.
#[derive(Debug, Clone)]
pub struct SensorContext {
    pub district_encoder: LabelEncoder,
    pub zone_encoder: LabelEncoder,
    pub season_encoder: LabelEncoder,
    pub district: Category,
    pub zone: Category,
    pub season: Category,
    pub rainfall_next_hour_mm: f32,
}

/// A validated field sensor reading.
#[derive(Debug, Clone, PartialEq)]
pub struct SensorReading {
    pub humidity_percent: f32,
    pub temperature_celsius: f32,
    pub soil_moisture_percent: f32,
    pub rainfall_next_hour_mm: f32,
    pub district: Category,
    pub zone: Category,
    pub season: Category,
}

impl SensorReading {
    pub fn from_payload(
        fields: &Map<String, Value>,
        context: &SensorContext,
    ) -> Result<Self, ValidationError> {
        let payload = Payload::new(fields);
        // Checked in feature order; the first failure wins.
        Ok(Self {
            soil_moisture_percent: payload.number("soilMoisture", SOIL_MOISTURE_PERCENT)?,
            temperature_celsius: payload.number("temperature", TEMPERATURE_CELSIUS)?,
            humidity_percent: payload.number("humidity", HUMIDITY_PERCENT)?,
            rainfall_next_hour_mm: payload
                .optional_number("rainfallNextHourMm", RAINFALL_NEXT_HOUR_MM)?
                .unwrap_or(context.rainfall_next_hour_mm),
            district: payload
                .optional_category("district", &context.district_encoder)?
                .unwrap_or_else(|| context.district.clone()),
            zone: payload
                .optional_category("zone", &context.zone_encoder)?
                .unwrap_or_else(|| context.zone.clone()),
            season: payload
                .optional_category("season", &context.season_encoder)?
                .unwrap_or_else(|| context.season.clone()),
        })
    }

    pub fn heat_stress(&self) -> bool {
        self.temperature_celsius > 35.0 && self.humidity_percent < 50.0
    }

    pub fn drought_stress(&self) -> bool {
        self.soil_moisture_percent < 30.0 && self.rainfall_next_hour_mm < 1.0
    }

    /// Builds the 14 feature sensor vector; calendar features come from `now`.
    pub fn to_feature_vector<Tz: TimeZone>(&self, now: &DateTime<Tz>) -> Vec<f32> {
        vec![
            self.soil_moisture_percent,
            self.temperature_celsius,
            self.humidity_percent,
            self.rainfall_next_hour_mm,
            now.hour() as f32,
            now.ordinal() as f32,
            now.month() as f32,
            self.district.code as f32,
            self.zone.code as f32,
            self.season.code as f32,
            f32::from(u8::from(self.heat_stress())),
            f32::from(u8::from(self.drought_stress())),
            self.soil_moisture_percent * self.temperature_celsius,
            self.humidity_percent * self.rainfall_next_hour_mm,
        ]
    }
}

#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct SensorResponse {
    pub irrigation_class: i64,
    pub confidence: Option<f32>,
}
