//! CORS policy built from the startup allow-list.

use axum::http::HeaderValue;
use tower_http::cors::{AllowHeaders, AllowMethods, AllowOrigin, Any, CorsLayer};
use tracing::warn;

use crate::config::CorsOrigins;

/// Build the CORS layer.
///
/// A wildcard admits any origin without credentials. An explicit list admits
/// only those origins, with credentials and mirrored methods/headers
/// (credentials cannot be combined with `*`). An empty list admits no origin.
pub fn build_cors_layer(origins: &CorsOrigins) -> CorsLayer {
    let list = match origins {
        CorsOrigins::Any => {
            return CorsLayer::new()
                .allow_origin(Any)
                .allow_methods(Any)
                .allow_headers(Any);
        }
        CorsOrigins::List(list) => list,
    };

    let values: Vec<HeaderValue> = list
        .iter()
        .filter_map(|origin| match HeaderValue::from_str(origin) {
            Ok(value) => Some(value),
            Err(_) => {
                warn!(origin = %origin, "Ignoring unparseable CORS origin");
                None
            }
        })
        .collect();

    CorsLayer::new()
        .allow_origin(AllowOrigin::list(values))
        .allow_methods(AllowMethods::mirror_request())
        .allow_headers(AllowHeaders::mirror_request())
        .allow_credentials(true)
}
