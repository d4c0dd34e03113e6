use sea_orm::entity::prelude::*;
use serde::{Deserialize, Serialize};

/// One audit entry per scanned file. Rows are never updated.
#[derive(Clone, Debug, PartialEq, DeriveEntityModel, Serialize, Deserialize)]
#[sea_orm(table_name = "scans")]
pub struct Model {
    #[sea_orm(primary_key, auto_increment = false)]
    pub id: String,
    // Logical reference only: deleting an account leaves its scan history in place.
    pub user_id: String,
    pub filename: String,
    /// "safe" or "malicious"
    pub status: String,
    pub raw_report: Option<Json>,
    pub created_at: DateTimeUtc,
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {}

impl ActiveModelBehavior for ActiveModel {}
