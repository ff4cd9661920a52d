use chrono::{DateTime, Utc};
use serde::{Deserialize, Deserializer, Serialize, de};
use serde_json::{Map, Value};
use utoipa::{IntoParams, ToSchema};

use crate::repository::Entity;
use crate::store::DocumentId;

/// A class offered by the studio.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, ToSchema)]
#[schema(example = json!({
    "title": "HIIT",
    "coach": "Ana",
    "duration_minutes": 45,
    "capacity": 12,
    "tags": ["cardio"],
    "schedule_iso": "2025-01-01T18:00:00Z"
}))]
pub struct GymClass {
    pub title: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    pub coach: String,
    #[serde(deserialize_with = "whole_number")]
    #[schema(minimum = 15, maximum = 180)]
    pub duration_minutes: i64,
    #[serde(deserialize_with = "whole_number")]
    #[schema(minimum = 1, maximum = 100)]
    pub capacity: i64,
    #[serde(default)]
    pub tags: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub image_url: Option<String>,
    #[schema(format = "date-time", example = "2025-01-01T18:00:00Z")]
    pub schedule_iso: String,
}

/// Integer field that also accepts floats without a fractional part, e.g. `45.0`.
fn whole_number<'de, D>(deserializer: D) -> Result<i64, D::Error>
where
    D: Deserializer<'de>,
{
    let value = Value::deserialize(deserializer)?;
    if let Some(n) = value.as_i64() {
        return Ok(n);
    }
    match value.as_f64() {
        Some(f) if f.fract() == 0.0 && f >= i64::MIN as f64 && f < i64::MAX as f64 => Ok(f as i64),
        _ => Err(de::Error::invalid_type(
            de::Unexpected::Other(&value.to_string()),
            &"a whole number",
        )),
    }
}

impl Entity for GymClass {
    const COLLECTION: &'static str = "gymclass";
}

/// Field on [`GymClass`] holding the seat limit.
pub const CAPACITY_FIELD: &str = "capacity";

/// Field on [`Booking`] referencing the booked class.
pub const CLASS_REFERENCE_FIELD: &str = "class_id";

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, ToSchema)]
pub struct Booking {
    /// Id of the booked class, in canonical form once stored.
    pub class_id: String,
    pub name: String,
    #[schema(format = "email")]
    pub email: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub phone: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub notes: Option<String>,
}

impl Entity for Booking {
    const COLLECTION: &'static str = "booking";
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, ToSchema)]
pub struct Plugin {
    pub key: String,
    pub name: String,
    #[serde(default = "default_enabled")]
    pub enabled: bool,
    #[serde(default)]
    #[schema(value_type = Object)]
    pub config: Map<String, Value>,
}

impl Entity for Plugin {
    const COLLECTION: &'static str = "plugin";
}

/// Field used as the unique upsert key for plugins.
pub const PLUGIN_KEY_FIELD: &str = "key";

impl Plugin {
    pub fn from_toggle(key: &str, toggle: PluginToggle) -> Self {
        Self {
            key: key.to_string(),
            name: plugin_display_name(key),
            enabled: toggle.enabled,
            config: toggle.config,
        }
    }
}

/// Body of `POST /api/plugins/{key}`.
#[derive(Debug, Clone, Deserialize, ToSchema)]
pub struct PluginToggle {
    #[serde(default = "default_enabled")]
    pub enabled: bool,
    #[serde(default)]
    #[schema(value_type = Object)]
    pub config: Map<String, Value>,
}

fn default_enabled() -> bool {
    true
}

/// A stored entity together with its store-assigned metadata.
#[derive(Debug, Clone, Serialize, PartialEq, ToSchema)]
pub struct Record<T> {
    #[serde(rename = "_id")]
    pub id: DocumentId,
    #[serde(flatten)]
    pub data: T,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct CreatedResponse {
    pub id: DocumentId,
}

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct MessageResponse {
    pub message: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct DiagnosticsResponse {
    pub backend: String,
    pub database: String,
    pub database_backend: String,
    pub collections: Vec<String>,
}

#[derive(Debug, Deserialize, IntoParams)]
#[into_params(parameter_in = Query)]
pub struct ClassListQuery {
    /// Maximum number of classes returned
    #[serde(default = "default_class_limit")]
    #[param(default = 20)]
    pub limit: usize,
}

fn default_class_limit() -> usize {
    20
}

#[derive(Debug, Deserialize, IntoParams)]
#[into_params(parameter_in = Query)]
pub struct BookingListQuery {
    /// Only bookings for this class
    pub class_id: Option<String>,
    /// Maximum number of bookings returned
    #[serde(default = "default_booking_limit")]
    #[param(default = 50)]
    pub limit: usize,
}

fn default_booking_limit() -> usize {
    50
}

/// Human readable plugin name: separators become spaces, words are title-cased.
///
/// `payments.stripe` becomes `Payments Stripe`.
pub fn plugin_display_name(key: &str) -> String {
    let mut name = String::with_capacity(key.len());
    let mut in_word = false;
    for ch in key.chars() {
        let ch = if matches!(ch, '.' | '_' | '-') { ' ' } else { ch };
        if ch.is_alphabetic() {
            if in_word {
                name.extend(ch.to_lowercase());
            } else {
                name.extend(ch.to_uppercase());
            }
            in_word = true;
        } else {
            name.push(ch);
            in_word = false;
        }
    }
    name
}
