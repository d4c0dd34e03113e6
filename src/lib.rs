pub mod api;
pub mod config;
pub mod entities;
pub mod infrastructure;
pub mod services;
pub mod utils;

use crate::config::AppConfig;
use crate::services::mailer::Mailer;
use crate::services::otp::OtpService;
use crate::services::scan_service::ScanService;
use crate::services::scanner::ScanProvider;
use crate::utils::rate_limit::RateLimiter;
use axum::{
    Router,
    http::HeaderValue,
    middleware::{from_fn, from_fn_with_state},
    routing::{get, post},
};
use sea_orm::DatabaseConnection;
use std::sync::Arc;
use std::time::Duration;
use tower_http::cors::{AllowOrigin, Any, CorsLayer};
use utoipa::openapi::security::{HttpAuthScheme, HttpBuilder, SecurityScheme};
use utoipa::{Modify, OpenApi};
use utoipa_swagger_ui::SwaggerUi;

struct SecurityAddon;

impl Modify for SecurityAddon {
    fn modify(&self, openapi: &mut utoipa::openapi::OpenApi) {
        if let Some(components) = openapi.components.as_mut() {
            components.add_security_scheme(
                "jwt",
                SecurityScheme::Http(
                    HttpBuilder::new()
                        .scheme(HttpAuthScheme::Bearer)
                        .bearer_format("JWT")
                        .build(),
                ),
            );
        }
    }
}

#[derive(OpenApi)]
#[openapi(
    paths(
        api::handlers::auth::register,
        api::handlers::auth::verify_email,
        api::handlers::auth::resend_otp,
        api::handlers::auth::login,
        api::handlers::auth::google_login,
        api::handlers::auth::forgot_password,
        api::handlers::auth::reset_password,
        api::handlers::auth::me,
        api::handlers::files::upload_files,
        api::handlers::files::get_stats,
        api::handlers::files::get_history,
        api::handlers::admin::list_users,
        api::handlers::admin::export_users_csv,
        api::handlers::admin::get_stats,
        api::handlers::health::health_check,
    ),
    components(
        schemas(
            api::handlers::auth::RegisterRequest,
            api::handlers::auth::VerifyEmailRequest,
            api::handlers::auth::EmailRequest,
            api::handlers::auth::LoginRequest,
            api::handlers::auth::GoogleLoginRequest,
            api::handlers::auth::ResetPasswordRequest,
            api::handlers::auth::UserProfile,
            api::handlers::auth::AuthResponse,
            api::handlers::auth::MeResponse,
            api::handlers::auth::MessageResponse,
            api::handlers::files::UploadResponse,
            api::handlers::files::ScanHistoryItem,
            api::handlers::health::HealthResponse,
            services::scan_service::ScanOutcome,
            services::verdict::Verdict,
            services::reporting::UserStats,
            services::reporting::PlatformStats,
            services::reporting::AdminUserView,
        )
    ),
    modifiers(&SecurityAddon),
    tags(
        (name = "auth", description = "Registration, verification and sessions"),
        (name = "files", description = "Upload scanning and usage"),
        (name = "admin", description = "Administrator reporting"),
        (name = "system", description = "Service health")
    )
)]
pub struct ApiDoc;

#[derive(Clone)]
pub struct AppState {
    pub db: DatabaseConnection,
    pub config: AppConfig,
    pub provider: Arc<dyn ScanProvider>,
    pub scan_service: Arc<ScanService>,
    pub otp: OtpService,
    pub mailer: Arc<dyn Mailer>,
    pub upload_limiter: RateLimiter,
    pub auth_limiter: RateLimiter,
    pub signup_limiter: RateLimiter,
}

impl AppState {
    pub fn new(
        db: DatabaseConnection,
        config: AppConfig,
        provider: Arc<dyn ScanProvider>,
        mailer: Arc<dyn Mailer>,
    ) -> Self {
        let scan_service = Arc::new(ScanService::new(
            db.clone(),
            provider.clone(),
            &config.provider,
        ));
        let otp = OtpService::new(db.clone(), config.otp_ttl_minutes);
        let upload_limiter = RateLimiter::new(config.uploads_per_window, config.upload_window);
        let auth_limiter = RateLimiter::new(config.auth_requests_per_window, config.auth_window);
        let signup_limiter =
            RateLimiter::new(config.signups_per_ip_per_hour, Duration::from_secs(3600));

        Self {
            db,
            config,
            provider,
            scan_service,
            otp,
            mailer,
            upload_limiter,
            auth_limiter,
            signup_limiter,
        }
    }
}

fn cors_layer(origins: &[String]) -> CorsLayer {
    let allow_origin = if origins.iter().any(|o| o == "*") {
        AllowOrigin::any()
    } else {
        let parsed: Vec<HeaderValue> = origins
            .iter()
            .filter_map(|o| match HeaderValue::from_str(o) {
                Ok(v) => Some(v),
                Err(_) => {
                    tracing::warn!("Ignoring invalid CORS origin: {}", o);
                    None
                }
            })
            .collect();
        AllowOrigin::list(parsed)
    };

    CorsLayer::new()
        .allow_origin(allow_origin)
        .allow_methods(Any)
        .allow_headers(Any)
        .expose_headers(Any)
}

pub fn create_app(state: AppState) -> Router {
    let auth = || from_fn_with_state(state.clone(), api::middleware::auth::auth_middleware);
    let admin = || from_fn_with_state(state.clone(), api::middleware::auth::admin_middleware);

    let auth_routes = Router::new()
        .route("/auth/register", post(api::handlers::auth::register))
        .route("/auth/verify-email", post(api::handlers::auth::verify_email))
        .route("/auth/resend-otp", post(api::handlers::auth::resend_otp))
        .route("/auth/login", post(api::handlers::auth::login))
        .route("/auth/google", post(api::handlers::auth::google_login))
        .route(
            "/auth/forgot-password",
            post(api::handlers::auth::forgot_password),
        )
        .route(
            "/auth/reset-password",
            post(api::handlers::auth::reset_password),
        )
        .route("/auth/me", get(api::handlers::auth::me).layer(auth()))
        .route_layer(from_fn_with_state(
            state.clone(),
            api::middleware::rate_limit::auth_rate_limit_middleware,
        ));

    Router::new()
        .merge(SwaggerUi::new("/swagger-ui").url("/api-docs/openapi.json", ApiDoc::openapi()))
        .route("/health", get(api::handlers::health::health_check))
        .merge(auth_routes)
        .route(
            "/files/upload",
            post(api::handlers::files::upload_files)
                .layer(axum::extract::DefaultBodyLimit::max(
                    state.config.upload_body_limit(),
                ))
                .layer(auth()),
        )
        .route(
            "/files/stats",
            get(api::handlers::files::get_stats).layer(auth()),
        )
        .route(
            "/files/history",
            get(api::handlers::files::get_history).layer(auth()),
        )
        .route(
            "/admin/users",
            get(api::handlers::admin::list_users)
                .layer(admin())
                .layer(auth()),
        )
        .route(
            "/admin/users/export.csv",
            get(api::handlers::admin::export_users_csv)
                .layer(admin())
                .layer(auth()),
        )
        .route(
            "/admin/stats",
            get(api::handlers::admin::get_stats)
                .layer(admin())
                .layer(auth()),
        )
        .layer(from_fn(api::middleware::metrics::metrics_middleware))
        .layer(from_fn(api::middleware::request_id::request_id_middleware))
        .layer(cors_layer(&state.config.allowed_origins))
        .with_state(state)
}
