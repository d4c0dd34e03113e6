use crate::AppState;
use crate::api::error::AppError;
use crate::entities::{prelude::*, users};
use crate::services::mailer::{reset_message, verification_message};
use crate::services::otp::OtpPurpose;
use crate::utils::auth::{Claims, create_jwt};
use crate::utils::client_ip::ClientIp;
use crate::utils::hash::{hash_password, verify_password};
use axum::{Extension, Json, extract::State, http::StatusCode};
use chrono::{DateTime, Utc};
use sea_orm::{ActiveModelTrait, ColumnTrait, EntityTrait, QueryFilter, Set};
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;
use uuid::Uuid;
use validator::Validate;

#[derive(Deserialize, ToSchema, Validate)]
pub struct RegisterRequest {
    #[validate(email(message = "Invalid email format"))]
    pub email: String,
    #[validate(length(min = 8, message = "Password must be at least 8 characters"))]
    pub password: String,
    #[validate(length(min = 1, max = 100, message = "Name is required"))]
    pub name: String,
    #[validate(length(max = 32))]
    pub phone: Option<String>,
    #[validate(length(max = 200))]
    pub organization: Option<String>,
}

#[derive(Deserialize, ToSchema, Validate)]
pub struct VerifyEmailRequest {
    #[validate(email(message = "Invalid email format"))]
    pub email: String,
    #[validate(length(equal = 6, message = "Code must be 6 digits"))]
    pub code: String,
}

#[derive(Deserialize, ToSchema, Validate)]
pub struct EmailRequest {
    #[validate(email(message = "Invalid email format"))]
    pub email: String,
}

#[derive(Deserialize, ToSchema)]
pub struct LoginRequest {
    pub email: String,
    pub password: String,
}

#[derive(Deserialize, ToSchema, Validate)]
pub struct GoogleLoginRequest {
    #[validate(email(message = "Invalid email format"))]
    pub email: String,
    pub name: Option<String>,
}

#[derive(Deserialize, ToSchema, Validate)]
#[serde(rename_all = "camelCase")]
pub struct ResetPasswordRequest {
    #[validate(email(message = "Invalid email format"))]
    pub email: String,
    #[validate(length(equal = 6, message = "Code must be 6 digits"))]
    pub code: String,
    #[serde(alias = "new_password")]
    #[validate(length(min = 8, message = "Password must be at least 8 characters"))]
    pub new_password: String,
}

#[derive(Serialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct UserProfile {
    pub id: String,
    pub email: String,
    pub name: Option<String>,
    pub phone: Option<String>,
    pub organization: Option<String>,
    pub provider: String,
    pub email_verified: bool,
    pub is_admin: bool,
    pub files_scanned: i32,
    pub threats_detected: i32,
    pub remaining_scans: i32,
    pub created_at: DateTime<Utc>,
}

impl From<users::Model> for UserProfile {
    fn from(u: users::Model) -> Self {
        Self {
            id: u.id,
            email: u.email,
            name: u.name,
            phone: u.phone,
            organization: u.organization,
            provider: u.provider,
            email_verified: u.email_verified,
            is_admin: u.is_admin,
            files_scanned: u.files_scanned,
            threats_detected: u.threats_detected,
            remaining_scans: u.remaining_scans,
            created_at: u.created_at,
        }
    }
}

#[derive(Serialize, ToSchema)]
pub struct AuthResponse {
    pub token: String,
    pub user: UserProfile,
}

#[derive(Serialize, ToSchema)]
pub struct MeResponse {
    pub user: UserProfile,
}

#[derive(Serialize, ToSchema)]
pub struct MessageResponse {
    pub message: String,
}

impl MessageResponse {
    fn new(message: &str) -> Json<Self> {
        Json(Self {
            message: message.to_string(),
        })
    }
}

const GOOGLE_PROVIDER: &str = "google";

fn normalize_email(email: &str) -> String {
    email.trim().to_lowercase()
}

async fn find_by_email(state: &AppState, email: &str) -> Result<Option<users::Model>, AppError> {
    Ok(Users::find()
        .filter(users::Column::Email.eq(email))
        .one(&state.db)
        .await?)
}

fn issue_session(state: &AppState, user: users::Model) -> Result<Json<AuthResponse>, AppError> {
    let token = create_jwt(&user.id, &state.config.jwt_secret)?;
    Ok(Json(AuthResponse {
        token,
        user: user.into(),
    }))
}

/// Issues a code and mails it. Delivery failures are logged, not surfaced.
async fn send_code(state: &AppState, user: &users::Model, purpose: OtpPurpose) -> Result<(), AppError> {
    let code = state.otp.issue(&user.id, purpose).await?;
    let ttl = state.otp.ttl_minutes();
    let (subject, body) = match purpose {
        OtpPurpose::VerifyEmail => verification_message(&code, ttl),
        OtpPurpose::ResetPassword => reset_message(&code, ttl),
    };

    if let Err(e) = state.mailer.send(&user.email, &subject, &body).await {
        tracing::error!(user_id = %user.id, "Failed to send {} email: {}", purpose.as_str(), e);
    }
    Ok(())
}

#[utoipa::path(
    post,
    path = "/auth/register",
    request_body = RegisterRequest,
    responses(
        (status = 201, description = "Account created, verification code sent", body = MessageResponse),
        (status = 400, description = "Invalid input or email already registered"),
        (status = 429, description = "Too many sign-ups from this address")
    ),
    tag = "auth"
)]
pub async fn register(
    State(state): State<AppState>,
    Extension(client_ip): Extension<ClientIp>,
    Json(payload): Json<RegisterRequest>,
) -> Result<(StatusCode, Json<MessageResponse>), AppError> {
    payload
        .validate()
        .map_err(|e| AppError::BadRequest(e.to_string()))?;

    if !state.signup_limiter.check(&client_ip.0) {
        tracing::warn!(client_ip = %client_ip.0, "Sign-up limit hit");
        return Err(AppError::TooManyRequests(
            "Too many sign-ups from this address, please try again later".to_string(),
        ));
    }

    let email = normalize_email(&payload.email);
    if find_by_email(&state, &email).await?.is_some() {
        return Err(AppError::BadRequest("Email already registered".to_string()));
    }

    let password_hash = hash_password(&payload.password)?;

    let user = users::ActiveModel {
        id: Set(Uuid::new_v4().to_string()),
        email: Set(email),
        name: Set(Some(payload.name.trim().to_string())),
        phone: Set(payload.phone.filter(|p| !p.trim().is_empty())),
        organization: Set(payload.organization.filter(|o| !o.trim().is_empty())),
        password_hash: Set(Some(password_hash)),
        provider: Set("local".to_string()),
        email_verified: Set(false),
        is_admin: Set(false),
        files_scanned: Set(0),
        threats_detected: Set(0),
        remaining_scans: Set(state.config.default_scan_quota),
        created_at: Set(Utc::now()),
    }
    .insert(&state.db)
    .await
    .map_err(|_| AppError::BadRequest("Email already registered".to_string()))?;

    tracing::info!(user_id = %user.id, "👤 Account registered");
    send_code(&state, &user, OtpPurpose::VerifyEmail).await?;

    Ok((
        StatusCode::CREATED,
        MessageResponse::new("Registered. Check your email for a verification code."),
    ))
}

#[utoipa::path(
    post,
    path = "/auth/verify-email",
    request_body = VerifyEmailRequest,
    responses(
        (status = 200, description = "Email verified", body = MessageResponse),
        (status = 400, description = "Invalid or expired code")
    ),
    tag = "auth"
)]
pub async fn verify_email(
    State(state): State<AppState>,
    Json(payload): Json<VerifyEmailRequest>,
) -> Result<Json<MessageResponse>, AppError> {
    payload
        .validate()
        .map_err(|e| AppError::BadRequest(e.to_string()))?;

    let user = find_by_email(&state, &normalize_email(&payload.email))
        .await?
        .ok_or_else(|| AppError::BadRequest("Invalid or expired code".to_string()))?;

    if user.email_verified {
        return Ok(MessageResponse::new("Email already verified."));
    }

    state
        .otp
        .verify(&user.id, OtpPurpose::VerifyEmail, &payload.code)
        .await?;

    let user_id = user.id.clone();
    let mut active: users::ActiveModel = user.into();
    active.email_verified = Set(true);
    active.update(&state.db).await?;

    tracing::info!(user_id = %user_id, "Email verified");
    Ok(MessageResponse::new("Email verified. You can log in now."))
}

#[utoipa::path(
    post,
    path = "/auth/resend-otp",
    request_body = EmailRequest,
    responses(
        (status = 200, description = "A new code was sent if the account needs one", body = MessageResponse)
    ),
    tag = "auth"
)]
pub async fn resend_otp(
    State(state): State<AppState>,
    Json(payload): Json<EmailRequest>,
) -> Result<Json<MessageResponse>, AppError> {
    payload
        .validate()
        .map_err(|e| AppError::BadRequest(e.to_string()))?;

    if let Some(user) = find_by_email(&state, &normalize_email(&payload.email)).await?
        && !user.email_verified
    {
        send_code(&state, &user, OtpPurpose::VerifyEmail).await?;
    }

    Ok(MessageResponse::new(
        "If the account exists and is unverified, a new code has been sent.",
    ))
}

#[utoipa::path(
    post,
    path = "/auth/login",
    request_body = LoginRequest,
    responses(
        (status = 200, description = "Login successful", body = AuthResponse),
        (status = 400, description = "Account uses Google sign-in"),
        (status = 401, description = "Invalid credentials"),
        (status = 403, description = "Email not verified")
    ),
    tag = "auth"
)]
pub async fn login(
    State(state): State<AppState>,
    Json(payload): Json<LoginRequest>,
) -> Result<Json<AuthResponse>, AppError> {
    let invalid = || AppError::Unauthorized("Invalid credentials".to_string());

    let user = find_by_email(&state, &normalize_email(&payload.email))
        .await?
        .ok_or_else(invalid)?;

    let Some(stored) = user.password_hash.as_deref() else {
        return Err(AppError::BadRequest(
            "This account uses Google sign-in".to_string(),
        ));
    };

    if !verify_password(&payload.password, stored) {
        return Err(invalid());
    }

    if !user.email_verified {
        return Err(AppError::Forbidden("Please verify your email".to_string()));
    }

    tracing::info!(user_id = %user.id, "🔑 Login");
    issue_session(&state, user)
}

#[utoipa::path(
    post,
    path = "/auth/google",
    request_body = GoogleLoginRequest,
    responses(
        (status = 200, description = "Signed in with Google", body = AuthResponse),
        (status = 400, description = "Invalid input"),
        (status = 403, description = "Account is not a Google account")
    ),
    tag = "auth"
)]
pub async fn google_login(
    State(state): State<AppState>,
    Json(payload): Json<GoogleLoginRequest>,
) -> Result<Json<AuthResponse>, AppError> {
    payload
        .validate()
        .map_err(|e| AppError::BadRequest(e.to_string()))?;

    let email = normalize_email(&payload.email);

    let user = match find_by_email(&state, &email).await? {
        // The request carries no credential, so only Google accounts can be reached
        Some(user) if user.provider != GOOGLE_PROVIDER || user.is_admin => {
            tracing::warn!(user_id = %user.id, "Google sign-in refused for {} account", user.provider);
            return Err(AppError::Forbidden(
                "This account must sign in with its password".to_string(),
            ));
        }
        Some(user) => user,
        None => {
            let user = users::ActiveModel {
                id: Set(Uuid::new_v4().to_string()),
                email: Set(email),
                name: Set(payload.name.filter(|n| !n.trim().is_empty())),
                phone: Set(None),
                organization: Set(None),
                password_hash: Set(None),
                provider: Set(GOOGLE_PROVIDER.to_string()),
                email_verified: Set(true),
                is_admin: Set(false),
                files_scanned: Set(0),
                threats_detected: Set(0),
                remaining_scans: Set(state.config.default_scan_quota),
                created_at: Set(Utc::now()),
            }
            .insert(&state.db)
            .await?;
            tracing::info!(user_id = %user.id, "👤 Account created via Google sign-in");
            user
        }
    };

    issue_session(&state, user)
}

#[utoipa::path(
    post,
    path = "/auth/forgot-password",
    request_body = EmailRequest,
    responses(
        (status = 200, description = "A reset code was sent if the account exists", body = MessageResponse)
    ),
    tag = "auth"
)]
pub async fn forgot_password(
    State(state): State<AppState>,
    Json(payload): Json<EmailRequest>,
) -> Result<Json<MessageResponse>, AppError> {
    payload
        .validate()
        .map_err(|e| AppError::BadRequest(e.to_string()))?;

    if let Some(user) = find_by_email(&state, &normalize_email(&payload.email)).await?
        && user.password_hash.is_some()
    {
        send_code(&state, &user, OtpPurpose::ResetPassword).await?;
    }

    Ok(MessageResponse::new(
        "If the account exists, a reset code has been sent.",
    ))
}

#[utoipa::path(
    post,
    path = "/auth/reset-password",
    request_body = ResetPasswordRequest,
    responses(
        (status = 200, description = "Password updated", body = MessageResponse),
        (status = 400, description = "Invalid or expired code")
    ),
    tag = "auth"
)]
pub async fn reset_password(
    State(state): State<AppState>,
    Json(payload): Json<ResetPasswordRequest>,
) -> Result<Json<MessageResponse>, AppError> {
    payload
        .validate()
        .map_err(|e| AppError::BadRequest(e.to_string()))?;

    let user = find_by_email(&state, &normalize_email(&payload.email))
        .await?
        .ok_or_else(|| AppError::BadRequest("Invalid or expired code".to_string()))?;

    state
        .otp
        .verify(&user.id, OtpPurpose::ResetPassword, &payload.code)
        .await?;

    let user_id = user.id.clone();
    let mut active: users::ActiveModel = user.into();
    active.password_hash = Set(Some(hash_password(&payload.new_password)?));
    // Receiving the code proves ownership of the address
    active.email_verified = Set(true);
    active.update(&state.db).await?;

    tracing::info!(user_id = %user_id, "Password reset");
    Ok(MessageResponse::new("Password updated. You can log in now."))
}

#[utoipa::path(
    get,
    path = "/auth/me",
    responses(
        (status = 200, description = "Current account", body = MeResponse),
        (status = 401, description = "Unauthorized")
    ),
    security(
        ("jwt" = [])
    ),
    tag = "auth"
)]
pub async fn me(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
) -> Result<Json<MeResponse>, AppError> {
    let user = Users::find_by_id(&claims.sub)
        .one(&state.db)
        .await?
        .ok_or_else(|| AppError::NotFound("User not found".to_string()))?;

    Ok(Json(MeResponse { user: user.into() }))
}
