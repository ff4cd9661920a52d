use std::ops::RangeInclusive;

use axum::Json;
use axum::extract::{FromRequest, FromRequestParts, Query, Request};
use axum::http::request::Parts;
use chrono::{DateTime, NaiveDateTime};
use once_cell::sync::Lazy;
use regex::Regex;
use serde::de::DeserializeOwned;

use crate::error::{ApiError, FieldError};
use crate::models::{Booking, GymClass, PluginToggle};

pub const DURATION_MINUTES: RangeInclusive<i64> = 15..=180;
pub const CAPACITY: RangeInclusive<i64> = 1..=100;

static EMAIL_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^[A-Za-z0-9.!#$%&'*+/=?^_`{|}~-]+@[A-Za-z0-9](?:[A-Za-z0-9-]*[A-Za-z0-9])?(?:\.[A-Za-z0-9](?:[A-Za-z0-9-]*[A-Za-z0-9])?)+$")
        .expect("regex compiles")
});

/// Field constraints checked before a payload reaches the store.
pub trait Validate {
    fn validate(&self) -> Result<(), ApiError> {
        let mut errors = Vec::new();
        self.collect_errors(&mut errors);
        if errors.is_empty() {
            Ok(())
        } else {
            Err(ApiError::Validation(errors))
        }
    }

    fn collect_errors(&self, errors: &mut Vec<FieldError>);
}

pub fn require(field: &str, value: &str, errors: &mut Vec<FieldError>) {
    if value.trim().is_empty() {
        errors.push(FieldError::new(field, "field required"));
    }
}

pub fn within(field: &str, value: i64, range: RangeInclusive<i64>, errors: &mut Vec<FieldError>) {
    if !range.contains(&value) {
        errors.push(FieldError::new(
            field,
            format!("must be between {} and {}", range.start(), range.end()),
        ));
    }
}

pub fn email(field: &str, value: &str, errors: &mut Vec<FieldError>) {
    if !EMAIL_RE.is_match(value) {
        errors.push(FieldError::new(field, "value is not a valid email address"));
    }
}

/// Accepts RFC 3339 timestamps and offset-less `YYYY-MM-DDTHH:MM[:SS[.f]]`.
pub fn iso_datetime(field: &str, value: &str, errors: &mut Vec<FieldError>) {
    let parsed = DateTime::parse_from_rfc3339(value).is_ok()
        || NaiveDateTime::parse_from_str(value, "%Y-%m-%dT%H:%M:%S%.f").is_ok()
        || NaiveDateTime::parse_from_str(value, "%Y-%m-%dT%H:%M").is_ok();
    if !parsed {
        errors.push(FieldError::new(
            field,
            "must be an ISO-8601 date-time, e.g. 2025-01-01T18:00:00Z",
        ));
    }
}

impl Validate for GymClass {
    fn collect_errors(&self, errors: &mut Vec<FieldError>) {
        require("title", &self.title, errors);
        require("coach", &self.coach, errors);
        within("duration_minutes", self.duration_minutes, DURATION_MINUTES, errors);
        within("capacity", self.capacity, CAPACITY, errors);
        iso_datetime("schedule_iso", &self.schedule_iso, errors);
    }
}

impl Validate for Booking {
    fn collect_errors(&self, errors: &mut Vec<FieldError>) {
        require("class_id", &self.class_id, errors);
        require("name", &self.name, errors);
        email("email", &self.email, errors);
    }
}

impl Validate for PluginToggle {
    fn collect_errors(&self, _errors: &mut Vec<FieldError>) {}
}

/// JSON body extractor that runs [`Validate`] and reports every failure as
/// [`ApiError::Validation`], including bodies that do not deserialize.
pub struct ValidJson<T>(pub T);

impl<S, T> FromRequest<S> for ValidJson<T>
where
    S: Send + Sync,
    T: DeserializeOwned + Validate + Send,
{
    type Rejection = ApiError;

    async fn from_request(req: Request, state: &S) -> Result<Self, Self::Rejection> {
        let Json(value) = Json::<T>::from_request(req, state)
            .await
            .map_err(|rejection| {
                ApiError::Validation(vec![FieldError::new("body", rejection.body_text())])
            })?;
        value.validate()?;
        Ok(Self(value))
    }
}

/// Query string extractor reporting malformed parameters as
/// [`ApiError::Validation`] instead of a plain-text rejection.
pub struct ValidQuery<T>(pub T);

impl<S, T> FromRequestParts<S> for ValidQuery<T>
where
    S: Send + Sync,
    T: DeserializeOwned + Send,
{
    type Rejection = ApiError;

    async fn from_request_parts(parts: &mut Parts, state: &S) -> Result<Self, Self::Rejection> {
        let Query(value) = Query::<T>::from_request_parts(parts, state)
            .await
            .map_err(|rejection| {
                ApiError::Validation(vec![FieldError::new("query", rejection.body_text())])
            })?;
        Ok(Self(value))
    }
}
