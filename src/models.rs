//! Persisted data model: users, sessions, submissions, results, teams.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use uuid::Uuid;

/// A registered contestant, keyed by normalized phone number.
#[derive(Debug, Clone, FromRow, Serialize)]
pub struct User {
    pub id: Uuid,
    pub phone: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub last_login_at: Option<DateTime<Utc>>,
}

/// A session row binding a user to a pair of independent bcrypt token hashes.
#[derive(Debug, Clone, FromRow)]
pub struct Session {
    pub id: Uuid,
    pub user_id: Uuid,
    pub access_hash: String,
    pub refresh_hash: Option<String>,
    pub user_agent: Option<String>,
    pub address: Option<String>,
    pub created_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
}

impl Session {
    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        now >= self.expires_at
    }
}

/// Public, API-facing view of a session (no hashes).
#[derive(Debug, Clone, Serialize)]
pub struct SessionView {
    pub id: Uuid,
    #[serde(rename = "userId")]
    pub user_id: Uuid,
    #[serde(rename = "expiresAt")]
    pub expires_at: DateTime<Utc>,
}

impl From<&Session> for SessionView {
    fn from(s: &Session) -> Self {
        Self {
            id: s.id,
            user_id: s.user_id,
            expires_at: s.expires_at,
        }
    }
}

/// A group-stage prediction submitted by a user.
///
/// `payload` is stored opaquely: a mapping from group label to a
/// sequence of entity ids. Nested single-element wrapper arrays are
/// tolerated and flattened at score time, never at intake.
#[derive(Debug, Clone, FromRow)]
pub struct Submission {
    pub id: Uuid,
    pub user_id: Uuid,
    pub payload: serde_json::Value,
    pub created_at: DateTime<Utc>,
}

/// A scored result for a submission. Unique per `submission_id`.
#[derive(Debug, Clone, FromRow)]
pub struct PredictionResult {
    pub id: Uuid,
    pub submission_id: Uuid,
    pub user_id: Uuid,
    pub total_score: i32,
    pub details: serde_json::Value,
    pub processed_at: DateTime<Utc>,
}

/// A tournament team/entity, part of the immutable ground-truth partition.
#[derive(Debug, Clone, FromRow, Serialize, Deserialize)]
pub struct Team {
    pub id: Uuid,
    #[serde(rename = "localName")]
    pub local_name: String,
    #[serde(rename = "englishName")]
    pub english_name: String,
    pub order: i32,
    pub group: String,
    pub flag: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct LeaderboardRow {
    pub rank: i64,
    #[serde(rename = "userId")]
    pub user_id: Uuid,
    #[serde(rename = "totalScore")]
    pub total_score: i32,
    #[serde(rename = "processedAt")]
    pub processed_at: DateTime<Utc>,
}
