use crate::api::google::{GoogleVerifier, IdentityVerifier};
use anyhow::{Context, Result};
use axum::{
    body::Body,
    http::{HeaderName, HeaderValue, Method, Request},
    routing::{get, post},
    Extension, Router,
};
use sqlx::postgres::PgPoolOptions;
use std::{sync::Arc, time::Duration};
use tokio::net::TcpListener;
use tower::ServiceBuilder;
use tower_http::{
    cors::{Any, CorsLayer},
    request_id::PropagateRequestIdLayer,
    set_header::SetRequestHeaderLayer,
    trace::TraceLayer,
};
use tracing::{debug_span, info, Span};
use ulid::Ulid;
use utoipa::OpenApi;
use utoipa_swagger_ui::SwaggerUi;

pub mod google;
pub mod password;

pub mod handlers;

/// Static configuration shared with the info handlers.
#[derive(Debug, Clone)]
pub struct AppConfig {
    pub server_public_key: String,
}

#[derive(OpenApi)]
#[openapi(
    paths(
        handlers::health::health,
        handlers::root::root,
        handlers::root::server_public_key,
        handlers::signup::signup,
        handlers::login::login,
        handlers::google_auth::google_auth,
    ),
    components(
        schemas(
            handlers::UserId,
            handlers::signup::SignupRequest,
            handlers::login::LoginRequest,
            handlers::google_auth::GoogleAuthRequest,
        )
    ),
    tags(
        (name = "auth", description = "Signup, login and identity-provider authentication"),
        (name = "health", description = "Service liveness"),
        (name = "info", description = "Route map and server metadata"),
    )
)]
struct ApiDoc;

#[must_use]
pub fn openapi() -> utoipa::openapi::OpenApi {
    ApiDoc::openapi()
}

/// router
/// # Errors
/// Returns an error if the server fails to start
pub async fn new(
    port: u16,
    dsn: String,
    tokeninfo_url: String,
    server_public_key: String,
) -> Result<()> {
    // Connect to database
    let pool = PgPoolOptions::new()
        .min_connections(1)
        .max_connections(5)
        .max_lifetime(Duration::from_secs(60 * 2))
        .test_before_acquire(true)
        .connect(&dsn)
        .await
        .context("Failed to connect to database")?;

    let verifier: Arc<dyn IdentityVerifier> = Arc::new(GoogleVerifier::new(tokeninfo_url)?);

    let config = Arc::new(AppConfig { server_public_key });

    let cors = CorsLayer::new()
        // allow `GET` and `POST` when accessing the resource
        .allow_methods([Method::GET, Method::POST])
        // allow requests from any origin
        .allow_origin(Any);

    let app = Router::new()
        .route("/", get(handlers::root))
        .route("/signup", post(handlers::signup))
        .route("/login", post(handlers::login))
        .route("/google-auth", post(handlers::google_auth))
        .route("/server_public_key", get(handlers::server_public_key))
        .layer(
            ServiceBuilder::new()
                .layer(SetRequestHeaderLayer::if_not_present(
                    HeaderName::from_static("x-request-id"),
                    |_req: &_| HeaderValue::from_str(Ulid::new().to_string().as_str()).ok(),
                ))
                .layer(PropagateRequestIdLayer::new(HeaderName::from_static(
                    "x-request-id",
                )))
                .layer(TraceLayer::new_for_http().make_span_with(make_span))
                .layer(cors)
                .layer(Extension(pool))
                .layer(Extension(verifier))
                .layer(Extension(config)),
        )
        .route("/health", get(handlers::health).options(handlers::health))
        .merge(SwaggerUi::new("/swagger-ui").url("/openapi.json", openapi()));

    let listener = TcpListener::bind(format!("::0:{port}")).await?;

    info!("Listening on [::]:{}", port);

    axum::serve(listener, app.into_make_service())
        .with_graceful_shutdown(async move {
            let _ = tokio::signal::ctrl_c().await;
            info!("Gracefully shutdown");
        })
        .await?;

    Ok(())
}

// span
fn make_span(request: &Request<Body>) -> Span {
    let headers = request.headers();
    let path = request.uri().path();
    let request_id = headers
        .get("x-request-id")
        .and_then(|val| val.to_str().ok())
        .unwrap_or("none");

    debug_span!("http-request", path, ?headers, request_id)
}
