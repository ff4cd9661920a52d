use utoipa::OpenApi;

use crate::error::FieldError;
use crate::models::{
    Booking, CreatedResponse, DiagnosticsResponse, GymClass, MessageResponse, Plugin,
    PluginToggle,
};

#[derive(OpenApi)]
#[openapi(
    info(title = "Gym Booking API", description = "Classes, capacity-checked bookings and a plugin registry"),
    paths(
        crate::handlers::root,
        crate::handlers::diagnostics,
        crate::handlers::create_class,
        crate::handlers::list_classes,
        crate::handlers::create_booking,
        crate::handlers::list_bookings,
        crate::handlers::list_plugins,
        crate::handlers::upsert_plugin
    ),
    components(schemas(
        GymClass,
        Booking,
        Plugin,
        PluginToggle,
        CreatedResponse,
        MessageResponse,
        DiagnosticsResponse,
        FieldError
    )),
    tags(
        (name = "system", description = "Liveness and diagnostics"),
        (name = "classes", description = "Studio classes"),
        (name = "bookings", description = "Seat bookings against class capacity"),
        (name = "plugins", description = "Optional add-on registry")
    ),
)]
pub struct ApiDoc;
