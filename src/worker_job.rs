//! C12 — worker.
//!
//! Consumes scoring jobs off the broker: validates, checks for an
//! already-written result (idempotence), loads the submission and the
//! ground-truth partition, scores, and writes the result row. Ground
//! truth is cached with a 1-hour TTL and repopulated from the database
//! on a cache miss.

use std::time::{Duration, Instant};

use serde::Deserialize;

use crate::cache::CacheAdapter;
use crate::db;
use crate::dispatcher::ScoringJob;
use crate::scoring::{self, Partition};

const GROUND_TRUTH_KEY: &str = "correct-groups";
const GROUND_TRUTH_TTL: Duration = Duration::from_secs(3600);
/// English name of the entity singled out by the IRAN_GROUP_CORRECT rule.
const DESIGNATED_ENTITY_NAME: &str = "Iran";

/// Processes one job. Returns `Ok(())` on success (including the
/// idempotent-no-op case of a result that already exists); any `Err`
/// propagates to the broker's retry/DLQ handling.
pub async fn process_job(
    pool: &sqlx::PgPool,
    cache: &CacheAdapter,
    job: ScoringJob,
) -> anyhow::Result<()> {
    let start = Instant::now();

    if db::result_exists_for_submission(pool, job.submission_id).await? {
        tracing::debug!(submission_id = %job.submission_id, "result already exists, skipping");
        crate::metrics::record_scoring_job("duplicate", start.elapsed());
        return Ok(());
    }

    let submission = db::get_submission(pool, job.submission_id)
        .await?
        .ok_or_else(|| anyhow::anyhow!("submission {} not found", job.submission_id))?;

    let (truth, designated_entity) = load_ground_truth(pool, cache).await?;
    let user_partition = scoring::flatten_payload(&submission.payload);

    let result = scoring::score(&user_partition, &truth, designated_entity.as_deref());
    let details = serde_json::to_value(&result)?;

    let inserted = db::insert_result(
        pool,
        submission.id,
        submission.user_id,
        result.total_score,
        details,
    )
    .await?;

    if inserted.is_none() {
        tracing::debug!(submission_id = %submission.id, "result insert lost the race, already present");
    }

    crate::metrics::record_scoring_job("ok", start.elapsed());
    cache.incr("prediction:stats:processed").await.ok();
    Ok(())
}

/// Load the ground-truth partition (team -> group) and the designated
/// entity id, cache-then-DB, repopulating the cache on a miss.
async fn load_ground_truth(
    pool: &sqlx::PgPool,
    cache: &CacheAdapter,
) -> anyhow::Result<(Partition, Option<String>)> {
    if let Some(raw) = cache.get(GROUND_TRUTH_KEY).await? {
        if let Ok(cached) = serde_json::from_str::<CachedGroundTruth>(&raw) {
            return Ok((cached.partition, cached.designated_entity));
        }
    }

    let teams = db::list_teams(pool).await?;
    let mut partition = Partition::new();
    let mut designated_entity = None;
    for team in &teams {
        partition
            .entry(team.group.clone())
            .or_default()
            .insert(team.id.to_string());
        if team.english_name.eq_ignore_ascii_case(DESIGNATED_ENTITY_NAME) {
            designated_entity = Some(team.id.to_string());
        }
    }

    let cached = CachedGroundTruth {
        partition: partition.clone(),
        designated_entity: designated_entity.clone(),
    };
    if let Ok(payload) = serde_json::to_string(&cached) {
        cache.setex(GROUND_TRUTH_KEY, &payload, GROUND_TRUTH_TTL).await.ok();
    }

    Ok((partition, designated_entity))
}

#[derive(Debug, Deserialize, serde::Serialize)]
struct CachedGroundTruth {
    partition: Partition,
    #[serde(rename = "designatedEntity")]
    designated_entity: Option<String>,
}
