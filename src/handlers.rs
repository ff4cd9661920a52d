use axum::extract::{Path, State};
use axum::{Json, http::StatusCode, response::IntoResponse};
use tracing::{info, warn};

use crate::{
    AppState,
    error::ApiError,
    models::{
        Booking, BookingListQuery, CAPACITY_FIELD, CLASS_REFERENCE_FIELD, ClassListQuery,
        CreatedResponse, DiagnosticsResponse, GymClass, MessageResponse, PLUGIN_KEY_FIELD, Plugin,
        PluginToggle, Record,
    },
    store::{DocumentId, Filter, GuardedInsert},
    validation::{ValidJson, ValidQuery},
};

#[utoipa::path(
    get,
    path = "/",
    responses((status = 200, description = "Service is running", body = MessageResponse)),
    tag = "system"
)]
pub async fn root() -> impl IntoResponse {
    Json(MessageResponse {
        message: "Gym Booking API is running".into(),
    })
}

#[utoipa::path(
    get,
    path = "/test",
    responses((status = 200, description = "Backend and document store status", body = DiagnosticsResponse)),
    tag = "system"
)]
pub async fn diagnostics(State(state): State<AppState>) -> impl IntoResponse {
    let store = &state.store;
    let probe = match store.ping().await {
        Ok(()) => store.list_collections().await,
        Err(err) => Err(err),
    };

    let (database, collections) = match probe {
        Ok(collections) => ("connected".to_string(), collections),
        Err(err) => {
            warn!("Document store check failed: {err}");
            (format!("error: {err}"), Vec::new())
        }
    };

    Json(DiagnosticsResponse {
        backend: "running".into(),
        database,
        database_backend: store.backend().into(),
        collections,
    })
}

#[utoipa::path(
    post,
    path = "/api/classes",
    request_body = GymClass,
    responses(
        (status = 201, description = "Class created", body = CreatedResponse),
        (status = 422, description = "Validation failed")
    ),
    tag = "classes"
)]
pub async fn create_class(
    State(state): State<AppState>,
    ValidJson(payload): ValidJson<GymClass>,
) -> Result<impl IntoResponse, ApiError> {
    let id = state.classes().insert(&payload).await?;
    info!(%id, title = %payload.title, capacity = payload.capacity, "Class created");
    Ok((StatusCode::CREATED, Json(CreatedResponse { id })))
}

#[utoipa::path(
    get,
    path = "/api/classes",
    params(ClassListQuery),
    responses(
        (status = 200, description = "Classes in insertion order", body = [Record<GymClass>]),
        (status = 422, description = "Malformed query string")
    ),
    tag = "classes"
)]
pub async fn list_classes(
    State(state): State<AppState>,
    ValidQuery(query): ValidQuery<ClassListQuery>,
) -> Result<Json<Vec<Record<GymClass>>>, ApiError> {
    let classes = state
        .classes()
        .list(&Filter::all(), Some(query.limit))
        .await?;
    Ok(Json(classes))
}

#[utoipa::path(
    post,
    path = "/api/bookings",
    request_body = Booking,
    responses(
        (status = 201, description = "Booking created", body = CreatedResponse),
        (status = 400, description = "Malformed class_id"),
        (status = 404, description = "Class not found"),
        (status = 409, description = "Class is fully booked"),
        (status = 422, description = "Validation failed")
    ),
    tag = "bookings"
)]
pub async fn create_booking(
    State(state): State<AppState>,
    ValidJson(payload): ValidJson<Booking>,
) -> Result<impl IntoResponse, ApiError> {
    let class_id: DocumentId = payload
        .class_id
        .parse()
        .map_err(|_| ApiError::InvalidReference("Invalid class_id".into()))?;

    let booking = Booking {
        class_id: class_id.to_string(),
        ..payload
    };

    let outcome = state
        .bookings()
        .insert_within_capacity::<GymClass>(
            class_id,
            CAPACITY_FIELD,
            CLASS_REFERENCE_FIELD,
            &booking,
        )
        .await?;

    match outcome {
        GuardedInsert::Inserted(id) => {
            info!(%id, %class_id, "Booking created");
            Ok((StatusCode::CREATED, Json(CreatedResponse { id })))
        }
        GuardedInsert::ParentMissing => Err(ApiError::NotFound("Class not found".into())),
        GuardedInsert::Full { capacity } => {
            warn!(%class_id, capacity, "Booking rejected, class is full");
            Err(ApiError::CapacityExceeded("Class is fully booked".into()))
        }
    }
}

#[utoipa::path(
    get,
    path = "/api/bookings",
    params(BookingListQuery),
    responses(
        (status = 200, description = "Bookings in insertion order", body = [Record<Booking>]),
        (status = 422, description = "Malformed query string")
    ),
    tag = "bookings"
)]
pub async fn list_bookings(
    State(state): State<AppState>,
    ValidQuery(query): ValidQuery<BookingListQuery>,
) -> Result<Json<Vec<Record<Booking>>>, ApiError> {
    let filter = match query.class_id {
        Some(class_id) => {
            // Stored references are canonical; anything unparseable matches nothing.
            let class_id = class_id
                .parse::<DocumentId>()
                .map(|id| id.to_string())
                .unwrap_or(class_id);
            Filter::eq(CLASS_REFERENCE_FIELD, class_id)
        }
        None => Filter::all(),
    };
    let bookings = state.bookings().list(&filter, Some(query.limit)).await?;
    Ok(Json(bookings))
}

#[utoipa::path(
    get,
    path = "/api/plugins",
    responses((status = 200, description = "All registered plugins", body = [Record<Plugin>])),
    tag = "plugins"
)]
pub async fn list_plugins(
    State(state): State<AppState>,
) -> Result<Json<Vec<Record<Plugin>>>, ApiError> {
    let plugins = state.plugins().list(&Filter::all(), None).await?;
    Ok(Json(plugins))
}

#[utoipa::path(
    post,
    path = "/api/plugins/{key}",
    params(("key" = String, Path, description = "Unique plugin key, e.g. payments.stripe")),
    request_body = PluginToggle,
    responses(
        (status = 200, description = "Plugin created or updated", body = CreatedResponse),
        (status = 422, description = "Validation failed")
    ),
    tag = "plugins"
)]
pub async fn upsert_plugin(
    State(state): State<AppState>,
    Path(key): Path<String>,
    ValidJson(payload): ValidJson<PluginToggle>,
) -> Result<Json<CreatedResponse>, ApiError> {
    let plugin = Plugin::from_toggle(&key, payload);
    let id = state
        .plugins()
        .upsert_by(PLUGIN_KEY_FIELD, &key, &plugin)
        .await?;
    info!(%id, %key, enabled = plugin.enabled, "Plugin upserted");
    Ok(Json(CreatedResponse { id }))
}
