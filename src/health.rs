use std::collections::BTreeMap;

use axum::{extract::State, http::StatusCode, routing::get, Json, Router};
use serde::Serialize;
use time::{format_description::well_known::Rfc3339, OffsetDateTime};
use tracing::{info, warn};

use crate::state::AppState;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Health {
    Healthy,
    Degraded,
    Unhealthy,
}

#[derive(Debug, Serialize)]
pub struct Component {
    pub status: Health,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct HealthReport {
    pub overall: Health,
    pub timestamp: String,
    pub mock_mode: bool,
    pub components: BTreeMap<&'static str, Component>,
}

/// All healthy is healthy, some healthy is degraded, none is unhealthy.
pub fn roll_up<'a>(statuses: impl IntoIterator<Item = &'a Health>) -> Health {
    let (mut total, mut healthy) = (0, 0);
    for s in statuses {
        total += 1;
        if *s == Health::Healthy {
            healthy += 1;
        }
    }
    match healthy {
        h if h == total && total > 0 => Health::Healthy,
        0 => Health::Unhealthy,
        _ => Health::Degraded,
    }
}

fn component(result: anyhow::Result<()>) -> Component {
    match result {
        Ok(()) => Component { status: Health::Healthy, error: None },
        Err(e) => Component { status: Health::Unhealthy, error: Some(format!("{:#}", e)) },
    }
}

pub fn routes() -> Router<AppState> {
    Router::new().route("/health", get(health))
}

pub async fn health(State(state): State<AppState>) -> (StatusCode, Json<HealthReport>) {
    let db = sqlx::query("SELECT 1")
        .execute(&state.db)
        .await
        .map(|_| ())
        .map_err(anyhow::Error::from);
    let storage = state.storage.ping().await;

    let mut components = BTreeMap::new();
    components.insert("database", component(db));
    components.insert("storage", component(storage));

    let overall = roll_up(components.values().map(|c| &c.status));
    if overall == Health::Healthy {
        info!("health check: healthy");
    } else {
        warn!(?overall, "health check degraded");
    }

    let code = if overall == Health::Unhealthy {
        StatusCode::SERVICE_UNAVAILABLE
    } else {
        StatusCode::OK
    };
    (
        code,
        Json(HealthReport {
            overall,
            timestamp: OffsetDateTime::now_utc().format(&Rfc3339).unwrap_or_default(),
            mock_mode: state.config.pipeline.mock_mode,
            components,
        }),
    )
}
