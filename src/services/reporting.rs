use crate::api::error::AppError;
use crate::entities::{prelude::*, scans, users};
use crate::services::verdict::Verdict;
use chrono::{DateTime, Utc};
use sea_orm::sea_query::Expr;
use sea_orm::{
    ColumnTrait, DatabaseConnection, EntityTrait, PaginatorTrait, QueryFilter, QueryOrder,
    QuerySelect, Select,
};
use serde::Serialize;
use std::collections::HashMap;
use utoipa::ToSchema;

#[derive(Debug, Serialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct AdminUserView {
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
    pub last_scan_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Serialize, ToSchema, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct PlatformStats {
    pub total_users: u64,
    pub total_scans: u64,
    pub threats_detected: u64,
}

#[derive(Debug, Serialize, ToSchema, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct UserStats {
    pub all_scans: i64,
    pub threats_blocked: i64,
    pub remaining_scans: i32,
}

/// Optional inclusive bounds on `scans.created_at`.
#[derive(Debug, Clone, Copy, Default)]
pub struct DateRange {
    pub from: Option<DateTime<Utc>>,
    pub to: Option<DateTime<Utc>>,
}

impl DateRange {
    pub fn is_unbounded(&self) -> bool {
        self.from.is_none() && self.to.is_none()
    }

    fn apply(&self, mut query: Select<Scans>) -> Select<Scans> {
        if let Some(from) = self.from {
            query = query.filter(scans::Column::CreatedAt.gte(from));
        }
        if let Some(to) = self.to {
            query = query.filter(scans::Column::CreatedAt.lte(to));
        }
        query
    }
}

/// All accounts, newest first, each with the time of its latest scan.
pub async fn list_users(db: &DatabaseConnection) -> Result<Vec<AdminUserView>, AppError> {
    let accounts = Users::find()
        .order_by_desc(users::Column::CreatedAt)
        .all(db)
        .await?;

    let last_scan: HashMap<String, DateTime<Utc>> = Scans::find()
        .select_only()
        .column(scans::Column::UserId)
        .column_as(Expr::col(scans::Column::CreatedAt).max(), "last_scan_at")
        .group_by(scans::Column::UserId)
        .into_tuple::<(String, Option<DateTime<Utc>>)>()
        .all(db)
        .await?
        .into_iter()
        .filter_map(|(user_id, at)| at.map(|at| (user_id, at)))
        .collect();

    Ok(accounts
        .into_iter()
        .map(|u| AdminUserView {
            last_scan_at: last_scan.get(&u.id).copied(),
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
        })
        .collect())
}

const USERS_CSV_HEADER: &str = "createdAt,email,name,organization,phone,provider,emailVerified,\
isAdmin,filesScanned,threatsDetected,remainingScans,lastScanAt";

fn csv_field(value: &str) -> String {
    format!("\"{}\"", value.replace('"', "\"\""))
}

/// Renders the admin user list as CSV, every field quoted.
pub fn users_csv(users: &[AdminUserView]) -> String {
    let mut out = String::with_capacity(USERS_CSV_HEADER.len() + 1 + users.len() * 128);
    out.push_str(USERS_CSV_HEADER);
    out.push('\n');

    for u in users {
        let fields = [
            u.created_at.to_rfc3339(),
            u.email.clone(),
            u.name.clone().unwrap_or_default(),
            u.organization.clone().unwrap_or_default(),
            u.phone.clone().unwrap_or_default(),
            u.provider.clone(),
            u.email_verified.to_string(),
            u.is_admin.to_string(),
            u.files_scanned.to_string(),
            u.threats_detected.to_string(),
            u.remaining_scans.to_string(),
            u.last_scan_at.map(|t| t.to_rfc3339()).unwrap_or_default(),
        ];
        let line: Vec<String> = fields.iter().map(|f| csv_field(f)).collect();
        out.push_str(&line.join(","));
        out.push('\n');
    }
    out
}

pub async fn platform_stats(db: &DatabaseConnection) -> Result<PlatformStats, AppError> {
    let total_users = Users::find().count(db).await?;
    let total_scans = Scans::find().count(db).await?;
    let threats_detected = Scans::find()
        .filter(scans::Column::Status.eq(Verdict::Malicious.as_str()))
        .count(db)
        .await?;

    Ok(PlatformStats {
        total_users,
        total_scans,
        threats_detected,
    })
}

/// Counters for one account. With a date range, scan and threat totals come
/// from the scan history instead of the lifetime counters.
pub async fn user_stats(
    db: &DatabaseConnection,
    user: &users::Model,
    range: DateRange,
) -> Result<UserStats, AppError> {
    if range.is_unbounded() {
        return Ok(UserStats {
            all_scans: user.files_scanned.into(),
            threats_blocked: user.threats_detected.into(),
            remaining_scans: user.remaining_scans,
        });
    }

    let own = || Scans::find().filter(scans::Column::UserId.eq(user.id.as_str()));

    let all_scans = range.apply(own()).count(db).await?;
    let threats_blocked = range
        .apply(own().filter(scans::Column::Status.eq(Verdict::Malicious.as_str())))
        .count(db)
        .await?;

    Ok(UserStats {
        all_scans: i64::try_from(all_scans).unwrap_or(i64::MAX),
        threats_blocked: i64::try_from(threats_blocked).unwrap_or(i64::MAX),
        remaining_scans: user.remaining_scans,
    })
}

/// The caller's most recent scans.
pub async fn history(
    db: &DatabaseConnection,
    user_id: &str,
    limit: u64,
) -> Result<Vec<scans::Model>, AppError> {
    Ok(Scans::find()
        .filter(scans::Column::UserId.eq(user_id))
        .order_by_desc(scans::Column::CreatedAt)
        .limit(limit)
        .all(db)
        .await?)
}
