use crate::api::error::AppError;
use crate::entities::{prelude::*, users};
use crate::utils::keyed_mutex::KeyedMutex;
use sea_orm::sea_query::Expr;
use sea_orm::{ColumnTrait, DatabaseConnection, EntityTrait, QueryFilter};
use serde::Serialize;
use utoipa::ToSchema;

/// Per-account scan counters.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct QuotaSnapshot {
    pub files_scanned: i32,
    pub threats_detected: i32,
    pub remaining_scans: i32,
}

impl From<&users::Model> for QuotaSnapshot {
    fn from(user: &users::Model) -> Self {
        Self {
            files_scanned: user.files_scanned,
            threats_detected: user.threats_detected,
            remaining_scans: user.remaining_scans,
        }
    }
}

/// Reads and updates the counters on `users`.
///
/// Updates are single conditional statements evaluated by the database, so
/// concurrent batches for one account cannot lose increments. An in-process
/// per-account lock additionally serialises writers within this process.
#[derive(Clone)]
pub struct QuotaStore {
    db: DatabaseConnection,
    locks: KeyedMutex,
}

impl QuotaStore {
    pub fn new(db: DatabaseConnection) -> Self {
        Self {
            db,
            locks: KeyedMutex::new(),
        }
    }

    pub async fn snapshot(&self, user_id: &str) -> Result<QuotaSnapshot, AppError> {
        let user = Users::find_by_id(user_id)
            .one(&self.db)
            .await?
            .ok_or_else(|| AppError::NotFound("User not found".to_string()))?;
        Ok(QuotaSnapshot::from(&user))
    }

    /// Records `scanned` files of which `threats` were malicious.
    /// `remaining_scans` drops by `scanned` but never below zero.
    pub async fn apply_batch(
        &self,
        user_id: &str,
        scanned: i32,
        threats: i32,
    ) -> Result<QuotaSnapshot, AppError> {
        if scanned < 0 || threats < 0 || threats > scanned {
            return Err(AppError::Internal(format!(
                "invalid counter delta: scanned={} threats={}",
                scanned, threats
            )));
        }

        let _guard = self.locks.lock(user_id).await;

        if scanned > 0 {
            let remaining = Expr::col(users::Column::RemainingScans);
            let result = Users::update_many()
                .col_expr(
                    users::Column::FilesScanned,
                    Expr::col(users::Column::FilesScanned).add(scanned),
                )
                .col_expr(
                    users::Column::ThreatsDetected,
                    Expr::col(users::Column::ThreatsDetected).add(threats),
                )
                .col_expr(
                    users::Column::RemainingScans,
                    Expr::case(
                        Expr::col(users::Column::RemainingScans).gt(scanned),
                        remaining.sub(scanned),
                    )
                    .finally(0)
                    .into(),
                )
                .filter(users::Column::Id.eq(user_id))
                .exec(&self.db)
                .await?;

            if result.rows_affected == 0 {
                return Err(AppError::NotFound("User not found".to_string()));
            }
        }

        let snapshot = self.snapshot(user_id).await?;
        tracing::info!(
            user_id,
            scanned,
            threats,
            remaining = snapshot.remaining_scans,
            "Scan counters updated"
        );
        Ok(snapshot)
    }

    /// Releases per-account locks that are no longer in use.
    pub fn prune_locks(&self) {
        self.locks.cleanup();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::infrastructure::database::run_migrations;
    use chrono::Utc;
    use sea_orm::{ActiveModelTrait, Database, Set};

    async fn setup(remaining: i32) -> (DatabaseConnection, String) {
        let db = Database::connect("sqlite::memory:").await.unwrap();
        run_migrations(&db).await.unwrap();

        let id = uuid::Uuid::new_v4().to_string();
        users::ActiveModel {
            id: Set(id.clone()),
            email: Set(format!("{}@example.com", id)),
            name: Set(None),
            phone: Set(None),
            organization: Set(None),
            password_hash: Set(None),
            provider: Set("local".to_string()),
            email_verified: Set(true),
            is_admin: Set(false),
            files_scanned: Set(0),
            threats_detected: Set(0),
            remaining_scans: Set(remaining),
            created_at: Set(Utc::now()),
        }
        .insert(&db)
        .await
        .unwrap();

        (db, id)
    }

    #[tokio::test]
    async fn test_apply_batch_updates_counters() {
        let (db, id) = setup(50).await;
        let store = QuotaStore::new(db);

        let snap = store.apply_batch(&id, 3, 1).await.unwrap();
        assert_eq!(
            snap,
            QuotaSnapshot {
                files_scanned: 3,
                threats_detected: 1,
                remaining_scans: 47
            }
        );
    }

    #[tokio::test]
    async fn test_remaining_floors_at_zero() {
        let (db, id) = setup(2).await;
        let store = QuotaStore::new(db);

        let snap = store.apply_batch(&id, 5, 0).await.unwrap();
        assert_eq!(snap.files_scanned, 5);
        assert_eq!(snap.remaining_scans, 0);

        let snap = store.apply_batch(&id, 1, 1).await.unwrap();
        assert_eq!(snap.remaining_scans, 0);
        assert_eq!(snap.threats_detected, 1);
    }

    #[tokio::test]
    async fn test_concurrent_batches_do_not_lose_updates() {
        let (db, id) = setup(50).await;
        let store = QuotaStore::new(db);

        let mut handles = Vec::new();
        for _ in 0..10 {
            let store = store.clone();
            let id = id.clone();
            handles.push(tokio::spawn(async move {
                store.apply_batch(&id, 2, 1).await.unwrap();
            }));
        }
        for handle in handles {
            handle.await.unwrap();
        }

        let snap = store.snapshot(&id).await.unwrap();
        assert_eq!(snap.files_scanned, 20);
        assert_eq!(snap.threats_detected, 10);
        assert_eq!(snap.remaining_scans, 30);
    }

    #[tokio::test]
    async fn test_unknown_account() {
        let (db, _) = setup(50).await;
        let store = QuotaStore::new(db);
        assert!(matches!(
            store.apply_batch("missing", 1, 0).await,
            Err(AppError::NotFound(_))
        ));
    }

    #[tokio::test]
    async fn test_rejects_inconsistent_delta() {
        let (db, id) = setup(50).await;
        let store = QuotaStore::new(db);
        assert!(store.apply_batch(&id, 1, 2).await.is_err());
    }
}
