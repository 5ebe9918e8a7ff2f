//! Composite axum application state, following the teacher's
//! single-struct-plus-`FromRef` pattern.

use std::sync::Arc;

use axum::extract::FromRef;
use sqlx::PgPool;

use crate::broker::BrokerAdapter;
use crate::cache::CacheAdapter;
use crate::config::AppConfig;
use crate::fraud::FraudSignals;
use crate::health::HealthState;
use crate::otp::OtpService;
use crate::session::SessionService;

#[derive(Clone, FromRef)]
pub struct AppState {
    pub pool: PgPool,
    pub cache: CacheAdapter,
    pub broker: BrokerAdapter,
    pub otp: OtpService,
    pub session: SessionService,
    pub fraud: FraudSignals,
    pub config: Arc<AppConfig>,
}

impl FromRef<AppState> for HealthState {
    fn from_ref(state: &AppState) -> Self {
        HealthState {
            pool: state.pool.clone(),
            cache: state.cache.clone(),
        }
    }
}
