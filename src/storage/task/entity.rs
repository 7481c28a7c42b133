use sea_orm::entity::prelude::*;
use serde::{Serialize, Deserialize};
use chrono::{DateTime, Utc};

/// Row shape of the `tasks` table. Status and error kind are stored as their wire names.
#[derive(Clone, Debug, PartialEq, DeriveEntityModel, sqlx::FromRow, Serialize, Deserialize)]
#[sea_orm(table_name = "tasks")]
pub struct Model {
    #[sea_orm(primary_key)]
    pub id: i64,
    pub url: String,
    pub status: String,
    pub created_at: DateTime<Utc>,
    pub started_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
    pub claimed_by: Option<String>,
    pub title: Option<String>,
    pub description: Option<String>,
    pub audio_path: Option<String>,
    pub subtitle_path: Option<String>,
    pub artifact_bytes: i64,
    pub evicted_at: Option<DateTime<Utc>>,
    pub error_message: Option<String>,
    pub error_kind: Option<String>,
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {}

impl ActiveModelBehavior for ActiveModel {}
