// Route Weather API v0.1
use axum::{
    routing::{get, post},
    Router,
};
use std::net::SocketAddr;
use std::sync::Arc;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, Layer};
use utoipa::OpenApi;
use utoipa_swagger_ui::SwaggerUi;

mod config;
mod errors;
mod helpers;
mod routes;
mod services;

use config::AppConfig;
use routes::AppState;
use services::openweather::OpenWeatherProvider;
use services::resolver::{ProviderSlot, ResolverOptions, WeatherResolver};
use services::yr::YrProvider;

/// Route Weather API — OpenAPI specification.
#[derive(OpenApi)]
#[openapi(
    info(
        title = "Route Weather API",
        version = "0.1.0",
        description = "Weather along GPX routes. Parses GPX tracks, samples forecast \
            points at a fixed interval with estimated arrival times, and resolves \
            weather for each point from yr.no with OpenWeatherMap as fallback.",
        license(name = "MIT"),
    ),
    tags(
        (name = "Health", description = "Service health check"),
        (name = "Tracks", description = "GPX parsing, forecast point sampling and route forecasts"),
        (name = "Weather", description = "Weather for forecast points"),
    ),
    paths(
        routes::health::health_check,
        routes::tracks::parse_track,
        routes::tracks::forecast_points,
        routes::tracks::route_forecast,
        routes::weather::post_weather,
        routes::weather::get_weather,
    ),
    components(
        schemas(
            routes::health::HealthResponse,
            routes::health::ProviderHealth,
            routes::tracks::TrackSummary,
            routes::tracks::ParsedTrackResponse,
            routes::tracks::ForecastPointsRequest,
            routes::tracks::ForecastPointsResponse,
            routes::tracks::RouteForecastResponse,
            routes::weather::WeatherBatchRequest,
            routes::weather::WeatherBatchResponse,
            services::gpx::TrackPoint,
            services::sampler::ForecastPoint,
            services::weather::WeatherRecord,
            errors::ErrorResponse,
        )
    )
)]
struct ApiDoc;

/// Assemble the API routes, Swagger UI and HTTP layers around the shared state.
fn app(state: AppState) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods([axum::http::Method::GET, axum::http::Method::POST])
        .allow_headers(Any);

    let api_routes = Router::new()
        .route("/api/v1/health", get(routes::health::health_check))
        .route("/api/v1/tracks/parse", post(routes::tracks::parse_track))
        .route(
            "/api/v1/tracks/forecast-points",
            post(routes::tracks::forecast_points),
        )
        .route("/api/v1/tracks/forecast", post(routes::tracks::route_forecast))
        .route(
            "/api/v1/weather",
            get(routes::weather::get_weather).post(routes::weather::post_weather),
        )
        .with_state(state);

    Router::new()
        .merge(api_routes)
        .merge(SwaggerUi::new("/swagger-ui").url("/api-docs/openapi.json", ApiDoc::openapi()))
        .layer(TraceLayer::new_for_http())
        .layer(cors)
}

#[tokio::main]
async fn main() {
    // Initialize tracing; LOG_FORMAT=json switches to structured output
    let json_logs = std::env::var("LOG_FORMAT").is_ok_and(|v| v.eq_ignore_ascii_case("json"));
    let fmt_layer = if json_logs {
        tracing_subscriber::fmt::layer().json().boxed()
    } else {
        tracing_subscriber::fmt::layer().boxed()
    };
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "route_weather_api=debug,tower_http=debug".into()),
        )
        .with(fmt_layer)
        .init();

    let config = AppConfig::from_env().expect("Invalid configuration");

    // One connection pool shared by all providers
    let http_client = reqwest::Client::builder()
        .timeout(config.provider_timeout)
        .build()
        .expect("Failed to build HTTP client");

    let yr = YrProvider::new(
        http_client.clone(),
        &config.yr_base_url,
        &config.yr_user_agent,
    );
    let openweather = OpenWeatherProvider::new(
        http_client,
        &config.openweather_base_url,
        config.openweather_api_key.clone(),
    );
    if config.openweather_api_key.is_none() {
        tracing::info!("OPENWEATHER_API_KEY not set; OpenWeatherMap fallback disabled");
    }

    // Fallback order: yr.no first, OpenWeatherMap second
    let resolver = WeatherResolver::new(
        vec![
            ProviderSlot::new(Arc::new(yr), config.yr_requests_per_second),
            ProviderSlot::new(Arc::new(openweather), config.openweather_requests_per_second),
        ],
        ResolverOptions {
            provider_timeout: config.provider_timeout,
            max_concurrency: config.max_concurrent_lookups,
        },
    );

    let port = config.port;
    let app_state = AppState {
        resolver,
        config: Arc::new(config),
    };

    let app = app(app_state);

    // Start server
    let addr = SocketAddr::from(([0, 0, 0, 0], port));
    tracing::info!("API server listening on {}", addr);
    tracing::info!("Swagger UI available at http://localhost:{}/swagger-ui/", port);

    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .expect("Failed to bind TCP listener");
    axum::serve(listener, app)
        .await
        .expect("Server terminated unexpectedly");
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::routes::tests::test_state;
    use crate::services::yr::tests::sample_json;
    use axum::body::{to_bytes, Body};
    use axum::http::{header, Request, StatusCode};
    use tower::ServiceExt;
    use wiremock::matchers::{method, query_param};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    async fn yr_server() -> MockServer {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(query_param("lon", "13.3000"))
            .respond_with(ResponseTemplate::new(200).set_body_json(sample_json()))
            .mount(&server)
            .await;
        server
    }

    async fn send(app: Router, request: Request<Body>) -> (StatusCode, serde_json::Value) {
        let response = app.oneshot(request).await.unwrap();
        let status = response.status();
        let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        (status, serde_json::from_slice(&bytes).unwrap())
    }

    fn post_json(uri: &str, body: String) -> Request<Body> {
        Request::builder()
            .method("POST")
            .uri(uri)
            .header(header::CONTENT_TYPE, "application/json")
            .body(Body::from(body))
            .unwrap()
    }

    #[tokio::test]
    async fn test_post_weather_through_router() {
        let server = yr_server().await;
        let app = app(test_state(Some(&server.uri())));
        let body = serde_json::json!({
            "points": [
                { "lat": 61.1, "lon": 13.3, "distance": 0.0, "timestamp": 1_772_348_400, "index": 0 },
                { "lat": 61.2, "lon": 13.3, "distance": 5.0, "timestamp": 1_772_359_200, "index": 1 },
            ]
        });

        let (status, json) = send(app, post_json("/api/v1/weather", body.to_string())).await;

        assert_eq!(status, StatusCode::OK);
        assert_eq!(json["success"], true);
        assert_eq!(json["data"].as_array().unwrap().len(), 2);
        assert_eq!(json["data"][0]["provider"], "yr.no");
        assert_eq!(json["data"][1]["temperature"], -2.0);
    }

    #[tokio::test]
    async fn test_get_weather_through_router() {
        let server = yr_server().await;
        let app = app(test_state(Some(&server.uri())));
        let request = Request::builder()
            .uri("/api/v1/weather?lat=61.1&lon=13.3&timestamp=1772348400")
            .body(Body::empty())
            .unwrap();

        let (status, json) = send(app, request).await;

        assert_eq!(status, StatusCode::OK);
        assert_eq!(json["success"], true);
        assert_eq!(json["data"].as_array().unwrap().len(), 1);
        assert_eq!(json["data"][0]["temperature"], -5.0);
    }

    #[tokio::test]
    async fn test_malformed_json_body_is_bad_request() {
        let app = app(test_state(None));

        let (status, json) = send(app, post_json("/api/v1/weather", "{\"points\": [".into())).await;

        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(json["success"], false);
        assert!(json["data"].as_array().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_non_numeric_query_is_bad_request() {
        let app = app(test_state(None));
        let request = Request::builder()
            .uri("/api/v1/weather?lat=abc&lon=13.3&timestamp=1772348400")
            .body(Body::empty())
            .unwrap();

        let (status, json) = send(app, request).await;

        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(json["success"], false);
    }

    #[tokio::test]
    async fn test_tiny_interval_rejected_through_router() {
        let app = app(test_state(None));
        let gpx = r#"<gpx><trk><trkseg>
            <trkpt lat="46.0" lon="7.0"/><trkpt lat="46.1" lon="7.0"/>
        </trkseg></trk></gpx>"#;
        let body = serde_json::json!({
            "gpx": gpx,
            "intervalKm": 1e-9,
            "startTime": "2026-03-01T07:00:00Z",
            "avgSpeedKmh": 20.0,
        });

        let (status, json) = send(
            app,
            post_json("/api/v1/tracks/forecast-points", body.to_string()),
        )
        .await;

        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert!(json["error"].as_str().unwrap().contains("intervalKm"));
    }

    #[tokio::test]
    async fn test_health_and_openapi_are_served() {
        let state = test_state(None);

        let request = Request::builder()
            .uri("/api/v1/health")
            .body(Body::empty())
            .unwrap();
        let (status, _) = send(app(state.clone()), request).await;
        assert_eq!(status, StatusCode::OK);

        let request = Request::builder()
            .uri("/api-docs/openapi.json")
            .body(Body::empty())
            .unwrap();
        let (status, json) = send(app(state), request).await;
        assert_eq!(status, StatusCode::OK);
        assert!(json["paths"]["/api/v1/weather"].is_object());
    }
}
