use sea_orm::entity::prelude::*;
use serde::{Deserialize, Serialize};

#[derive(Clone, Debug, PartialEq, DeriveEntityModel, Serialize, Deserialize)]
#[sea_orm(table_name = "users")]
pub struct Model {
    #[sea_orm(primary_key, auto_increment = false)]
    pub id: String,
    #[sea_orm(unique)]
    pub email: String,
    pub name: Option<String>,
    pub phone: Option<String>,
    pub organization: Option<String>,
    pub password_hash: Option<String>,
    /// "local" or "google"
    pub provider: String,
    pub email_verified: bool,
    pub is_admin: bool,
    pub files_scanned: i32,
    pub threats_detected: i32,
    pub remaining_scans: i32,
    pub created_at: DateTimeUtc,
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {
    #[sea_orm(has_many = "super::email_otps::Entity")]
    EmailOtps,
}

impl Related<super::email_otps::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::EmailOtps.def()
    }
}

impl ActiveModelBehavior for ActiveModel {}
