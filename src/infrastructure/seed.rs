use crate::config::AppConfig;
use crate::entities::{prelude::*, users};
use crate::utils::hash::hash_password;
use chrono::Utc;
use sea_orm::{ActiveModelTrait, ColumnTrait, DatabaseConnection, EntityTrait, QueryFilter, Set};
use tracing::info;
use uuid::Uuid;

/// Creates the configured admin account, or promotes it if it already exists.
pub async fn seed_admin(db: &DatabaseConnection, config: &AppConfig) -> anyhow::Result<()> {
    let (Some(email), Some(password)) = (&config.admin_email, &config.admin_password) else {
        return Ok(());
    };
    let email = email.trim().to_lowercase();

    let existing = Users::find()
        .filter(users::Column::Email.eq(email.as_str()))
        .one(db)
        .await?;

    match existing {
        Some(user) if user.is_admin => {
            info!("🌱 Admin account {} already present", email);
        }
        Some(user) => {
            // Admins sign in with a password only
            let needs_password = user.password_hash.is_none();
            let mut active: users::ActiveModel = user.into();
            active.is_admin = Set(true);
            if needs_password {
                active.password_hash = Set(Some(hash_password(password)?));
            }
            active.update(db).await?;
            info!("🌱 Promoted {} to admin", email);
        }
        None => {
            users::ActiveModel {
                id: Set(Uuid::new_v4().to_string()),
                email: Set(email.clone()),
                name: Set(Some("Administrator".to_string())),
                phone: Set(None),
                organization: Set(None),
                password_hash: Set(Some(hash_password(password)?)),
                provider: Set("local".to_string()),
                email_verified: Set(true),
                is_admin: Set(true),
                files_scanned: Set(0),
                threats_detected: Set(0),
                remaining_scans: Set(config.default_scan_quota),
                created_at: Set(Utc::now()),
            }
            .insert(db)
            .await?;
            info!("🌱 Seeded admin account {}", email);
        }
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::infrastructure::database::run_migrations;
    use sea_orm::Database;

    #[tokio::test]
    async fn test_seed_admin_is_idempotent() {
        let db = Database::connect("sqlite::memory:").await.unwrap();
        run_migrations(&db).await.unwrap();

        let config = AppConfig {
            admin_email: Some("Admin@Example.com".to_string()),
            admin_password: Some("change-me-please".to_string()),
            ..AppConfig::development()
        };

        seed_admin(&db, &config).await.unwrap();
        seed_admin(&db, &config).await.unwrap();

        let admins = Users::find().all(&db).await.unwrap();
        assert_eq!(admins.len(), 1);
        assert_eq!(admins[0].email, "admin@example.com");
        assert!(admins[0].is_admin);
        assert!(admins[0].email_verified);
    }

    #[tokio::test]
    async fn test_promoted_google_account_gets_password() {
        let db = Database::connect("sqlite::memory:").await.unwrap();
        run_migrations(&db).await.unwrap();

        users::ActiveModel {
            id: Set(Uuid::new_v4().to_string()),
            email: Set("ops@example.com".to_string()),
            name: Set(None),
            phone: Set(None),
            organization: Set(None),
            password_hash: Set(None),
            provider: Set("google".to_string()),
            email_verified: Set(true),
            is_admin: Set(false),
            files_scanned: Set(0),
            threats_detected: Set(0),
            remaining_scans: Set(50),
            created_at: Set(Utc::now()),
        }
        .insert(&db)
        .await
        .unwrap();

        let config = AppConfig {
            admin_email: Some("ops@example.com".to_string()),
            admin_password: Some("change-me-please".to_string()),
            ..AppConfig::development()
        };
        seed_admin(&db, &config).await.unwrap();

        let admin = Users::find().one(&db).await.unwrap().unwrap();
        assert!(admin.is_admin);
        let hash = admin.password_hash.unwrap();
        assert!(crate::utils::hash::verify_password("change-me-please", &hash));
    }

    #[tokio::test]
    async fn test_seed_skipped_without_credentials() {
        let db = Database::connect("sqlite::memory:").await.unwrap();
        run_migrations(&db).await.unwrap();

        seed_admin(&db, &AppConfig::development()).await.unwrap();
        assert!(Users::find().all(&db).await.unwrap().is_empty());
    }
}
