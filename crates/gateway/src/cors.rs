// CORS for the operator console.
//
// `"*"` allows any origin without credentials; otherwise the value is a
// comma-separated origin list and credentials are allowed.

use axum::http::{HeaderName, HeaderValue, Method};
use tower_http::cors::{AllowOrigin, CorsLayer};

use fleetops_common::http::REQUEST_ID_HEADER;

pub const DEFAULT_CLIENT_ORIGIN: &str = "http://localhost:8083";

pub fn cors_layer(origins: &str) -> CorsLayer {
    let base = CorsLayer::new()
        .allow_methods([Method::GET, Method::POST, Method::PUT, Method::DELETE, Method::OPTIONS])
        .allow_headers([axum::http::header::CONTENT_TYPE, HeaderName::from_static(REQUEST_ID_HEADER)])
        .expose_headers([HeaderName::from_static(REQUEST_ID_HEADER)])
        .max_age(std::time::Duration::from_secs(3600));

    match origins.trim() {
        "*" => base.allow_origin(AllowOrigin::any()),
        listed => {
            let parsed = parse_origins(listed);
            let parsed = if parsed.is_empty() { parse_origins(DEFAULT_CLIENT_ORIGIN) } else { parsed };
            base.allow_origin(parsed).allow_credentials(true)
        }
    }
}

fn parse_origins(comma_separated: &str) -> Vec<HeaderValue> {
    comma_separated
        .split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .filter_map(|s| HeaderValue::from_str(s).ok())
        .collect()
}
