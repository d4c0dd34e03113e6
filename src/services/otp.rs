use crate::api::error::AppError;
use crate::entities::{email_otps, prelude::*};
use crate::utils::hash::calculate_hash;
use chrono::Utc;
use rand::Rng;
use sea_orm::sea_query::Expr;
use sea_orm::{
    ActiveModelTrait, ColumnTrait, DatabaseConnection, EntityTrait, QueryFilter, QueryOrder, Set,
};
use uuid::Uuid;

/// Failed attempts after which a code is discarded.
pub const MAX_ATTEMPTS: i32 = 5;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OtpPurpose {
    VerifyEmail,
    ResetPassword,
}

impl OtpPurpose {
    pub fn as_str(&self) -> &'static str {
        match self {
            OtpPurpose::VerifyEmail => "verify_email",
            OtpPurpose::ResetPassword => "reset_password",
        }
    }
}

/// Issues and checks six-digit one-time codes. Only hashes are stored.
#[derive(Clone)]
pub struct OtpService {
    db: DatabaseConnection,
    ttl: chrono::Duration,
}

impl OtpService {
    pub fn new(db: DatabaseConnection, ttl_minutes: i64) -> Self {
        Self {
            db,
            ttl: chrono::Duration::minutes(ttl_minutes),
        }
    }

    pub fn ttl_minutes(&self) -> i64 {
        self.ttl.num_minutes()
    }

    /// Replaces any outstanding code for `user_id`/`purpose` and returns the new one.
    pub async fn issue(&self, user_id: &str, purpose: OtpPurpose) -> Result<String, AppError> {
        EmailOtps::delete_many()
            .filter(email_otps::Column::UserId.eq(user_id))
            .filter(email_otps::Column::Purpose.eq(purpose.as_str()))
            .exec(&self.db)
            .await?;

        let code = format!("{:06}", rand::thread_rng().gen_range(0..1_000_000));
        let now = Utc::now();

        email_otps::ActiveModel {
            id: Set(Uuid::new_v4().to_string()),
            user_id: Set(user_id.to_string()),
            purpose: Set(purpose.as_str().to_string()),
            code_hash: Set(calculate_hash(code.as_bytes())),
            attempts: Set(0),
            expires_at: Set(now + self.ttl),
            created_at: Set(now),
        }
        .insert(&self.db)
        .await?;

        tracing::debug!(user_id, purpose = purpose.as_str(), "OTP issued");
        Ok(code)
    }

    /// Consumes the code on success.
    pub async fn verify(
        &self,
        user_id: &str,
        purpose: OtpPurpose,
        code: &str,
    ) -> Result<(), AppError> {
        let invalid = || AppError::BadRequest("Invalid or expired code".to_string());

        let record = EmailOtps::find()
            .filter(email_otps::Column::UserId.eq(user_id))
            .filter(email_otps::Column::Purpose.eq(purpose.as_str()))
            .order_by_desc(email_otps::Column::CreatedAt)
            .one(&self.db)
            .await?
            .ok_or_else(invalid)?;

        if record.expires_at < Utc::now() {
            EmailOtps::delete_by_id(record.id).exec(&self.db).await?;
            return Err(invalid());
        }

        // Every comparison spends an attempt, claimed in one conditional update
        let claimed = EmailOtps::update_many()
            .col_expr(
                email_otps::Column::Attempts,
                Expr::col(email_otps::Column::Attempts).add(1),
            )
            .filter(email_otps::Column::Id.eq(record.id.as_str()))
            .filter(email_otps::Column::Attempts.lt(MAX_ATTEMPTS))
            .exec(&self.db)
            .await?;

        if claimed.rows_affected == 0 {
            EmailOtps::delete_by_id(record.id).exec(&self.db).await?;
            return Err(invalid());
        }

        if record.code_hash != calculate_hash(code.trim().as_bytes()) {
            let discarded = EmailOtps::delete_many()
                .filter(email_otps::Column::Id.eq(record.id.as_str()))
                .filter(email_otps::Column::Attempts.gte(MAX_ATTEMPTS))
                .exec(&self.db)
                .await?;
            if discarded.rows_affected > 0 {
                tracing::warn!(user_id, "OTP discarded after too many attempts");
            }
            return Err(invalid());
        }

        // Only one caller can consume the code
        let consumed = EmailOtps::delete_by_id(record.id).exec(&self.db).await?;
        if consumed.rows_affected == 0 {
            return Err(invalid());
        }
        Ok(())
    }

    pub async fn purge_expired(&self) -> Result<u64, AppError> {
        let result = EmailOtps::delete_many()
            .filter(email_otps::Column::ExpiresAt.lt(Utc::now()))
            .exec(&self.db)
            .await?;
        Ok(result.rows_affected)
    }
}
