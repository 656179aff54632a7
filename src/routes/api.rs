use std::str::FromStr;

use axum::{
    Json, Router,
    extract::State,
    routing::get,
};
use chrono::{NaiveDate, Utc};
use serde::{Deserialize, Serialize};

use super::{
    ApiError,
    extract::{ApiPath, ApiQuery},
    health,
};
use crate::{
    AppState,
    config::{ClientConfig, ClientRegistry, MAX_CYCLE_DAY},
    models::{CycleWindow, DailyUsage, UsageSummary},
    services::{compute_window, rolling_window},
};

/// Rolling window length when neither `days` nor `cycle_day` is given.
pub const DEFAULT_DAYS: i64 = 7;

/// Longest rolling window accepted.
pub const MAX_DAYS: i64 = 30;

const PERIOD_RANGE_MESSAGE: &str = "Period must be between 1 and 30 days";

/// Success envelope: `{"success": true, "data": ..., "project_name"?, "client_name"?}`.
#[derive(Debug, Serialize)]
pub struct ApiResponse<T> {
    pub success: bool,
    pub data: T,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub project_name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub client_name: Option<String>,
}

impl<T> ApiResponse<T> {
    pub fn ok(data: T) -> Self {
        Self {
            success: true,
            data,
            project_name: None,
            client_name: None,
        }
    }

    fn for_project(data: T, project: impl Into<String>) -> Self {
        Self {
            project_name: Some(project.into()),
            ..Self::ok(data)
        }
    }

    fn for_client(data: T, client: &ClientConfig) -> Self {
        Self {
            client_name: Some(client.name.clone()),
            ..Self::for_project(data, client.project.clone())
        }
    }
}

/// Window selection for project usage routes.
///
/// Values are kept as strings so each parameter gets its own validation
/// message.
#[derive(Debug, Default, Deserialize)]
pub struct UsageQuery {
    pub days: Option<String>,
    pub cycle_day: Option<String>,
    pub date: Option<String>,
}

/// Reference date override for client usage routes.
#[derive(Debug, Default, Deserialize)]
pub struct ClientUsageQuery {
    pub date: Option<String>,
}

pub fn api_routes() -> Router<AppState> {
    Router::new()
        .route("/health", get(health::health_check))
        .route("/projects", get(list_projects))
        .route("/clients", get(list_clients))
        .route("/client/{client_id}", get(get_client))
        .route("/client/{client_id}/usage", get(client_usage))
        .route("/client/{client_id}/usage/daily", get(client_daily_usage))
        .route("/usage/{project_name}", get(project_usage))
        .route("/usage/{project_name}/daily", get(project_daily_usage))
}

fn non_empty(value: Option<&str>) -> Option<&str> {
    value.map(str::trim).filter(|v| !v.is_empty())
}

fn parse_int<T: FromStr>(name: &str, value: Option<&str>) -> Result<Option<T>, ApiError> {
    non_empty(value)
        .map(|v| {
            v.parse::<T>()
                .map_err(|_| ApiError::Validation(format!("{name} must be an integer, got '{v}'")))
        })
        .transpose()
}

fn parse_date(value: Option<&str>) -> Result<Option<NaiveDate>, ApiError> {
    non_empty(value)
        .map(|v| {
            NaiveDate::parse_from_str(v, "%Y-%m-%d").map_err(|_| {
                ApiError::Validation(format!("date must be formatted as YYYY-MM-DD, got '{v}'"))
            })
        })
        .transpose()
}

/// Resolve the window a project usage request asks for.
///
/// A cycle day selects the billing cycle containing `date` (or today) and
/// bypasses the `days` range check. Otherwise the window is the trailing
/// `days` days ending now, and `date` is ignored.
pub fn resolve_window(query: &UsageQuery) -> Result<CycleWindow, ApiError> {
    let cycle_day = parse_int::<i64>("cycle_day", query.cycle_day.as_deref())?;

    if let Some(cycle_day) = cycle_day {
        let cycle_day = u32::try_from(cycle_day)
            .ok()
            .filter(|d| (1..=MAX_CYCLE_DAY).contains(d))
            .ok_or_else(|| {
                ApiError::Validation(format!(
                    "cycle_day must be between 1 and {MAX_CYCLE_DAY}, got {cycle_day}"
                ))
            })?;
        let date = parse_date(query.date.as_deref())?;
        return Ok(compute_window(cycle_day, date)?);
    }

    let days = parse_int::<i64>("days", query.days.as_deref())?.unwrap_or(DEFAULT_DAYS);
    if !(1..=MAX_DAYS).contains(&days) {
        return Err(ApiError::Validation(PERIOD_RANGE_MESSAGE.to_string()));
    }

    // In range, so the conversion cannot fail.
    Ok(rolling_window(days as u32, Utc::now()))
}

fn find_client<'a>(clients: &'a ClientRegistry, client_id: &str) -> Result<&'a ClientConfig, ApiError> {
    clients
        .get(client_id)
        .ok_or_else(|| ApiError::NotFound("Client not found".to_string()))
}

fn client_window(client: &ClientConfig, query: &ClientUsageQuery) -> Result<CycleWindow, ApiError> {
    let date = parse_date(query.date.as_deref())?;
    Ok(compute_window(client.cycle_day, date)?)
}

/// List the distinct projects of all configured clients.
#[tracing::instrument(name = "api.projects", skip(state))]
pub async fn list_projects(
    State(state): State<AppState>,
) -> Result<Json<ApiResponse<Vec<String>>>, ApiError> {
    if !state.config.langsmith.has_api_key() {
        return Err(ApiError::SourceUnavailable(
            "LangSmith connection is not configured".to_string(),
        ));
    }
    Ok(Json(ApiResponse::ok(state.clients().projects())))
}

#[tracing::instrument(name = "api.clients", skip(state))]
pub async fn list_clients(State(state): State<AppState>) -> Json<ApiResponse<ClientRegistry>> {
    Json(ApiResponse::ok(state.clients().clone()))
}

#[tracing::instrument(name = "api.client", skip(state))]
pub async fn get_client(
    State(state): State<AppState>,
    ApiPath(client_id): ApiPath<String>,
) -> Result<Json<ApiResponse<ClientConfig>>, ApiError> {
    let client = find_client(state.clients(), &client_id)?;
    Ok(Json(ApiResponse::ok(client.clone())))
}

/// Usage totals for a project over a rolling or cycle window.
#[tracing::instrument(name = "api.usage", skip(state, query))]
pub async fn project_usage(
    State(state): State<AppState>,
    ApiPath(project_name): ApiPath<String>,
    ApiQuery(query): ApiQuery<UsageQuery>,
) -> Result<Json<ApiResponse<UsageSummary>>, ApiError> {
    let window = resolve_window(&query)?;
    let summary = state.usage.summary(&project_name, &window).await?;
    Ok(Json(ApiResponse::for_project(summary, project_name)))
}

/// Per-day usage for a project, ascending by date.
#[tracing::instrument(name = "api.usage_daily", skip(state, query))]
pub async fn project_daily_usage(
    State(state): State<AppState>,
    ApiPath(project_name): ApiPath<String>,
    ApiQuery(query): ApiQuery<UsageQuery>,
) -> Result<Json<ApiResponse<Vec<DailyUsage>>>, ApiError> {
    let window = resolve_window(&query)?;
    let days = state.usage.daily(&project_name, &window).await;
    Ok(Json(ApiResponse::for_project(days, project_name)))
}

/// Usage totals for a client's current billing cycle.
#[tracing::instrument(name = "api.client_usage", skip(state, query))]
pub async fn client_usage(
    State(state): State<AppState>,
    ApiPath(client_id): ApiPath<String>,
    ApiQuery(query): ApiQuery<ClientUsageQuery>,
) -> Result<Json<ApiResponse<UsageSummary>>, ApiError> {
    let client = find_client(state.clients(), &client_id)?;
    let window = client_window(client, &query)?;
    let summary = state.usage.summary(&client.project, &window).await?;
    Ok(Json(ApiResponse::for_client(summary, client)))
}

#[tracing::instrument(name = "api.client_usage_daily", skip(state, query))]
pub async fn client_daily_usage(
    State(state): State<AppState>,
    ApiPath(client_id): ApiPath<String>,
    ApiQuery(query): ApiQuery<ClientUsageQuery>,
) -> Result<Json<ApiResponse<Vec<DailyUsage>>>, ApiError> {
    let client = find_client(state.clients(), &client_id)?;
    let window = client_window(client, &query)?;
    let days = state.usage.daily(&client.project, &window).await;
    Ok(Json(ApiResponse::for_client(days, client)))
}

/// Fallback for unmatched routes.
pub async fn endpoint_not_found() -> ApiError {
    ApiError::NotFound("Endpoint not found".to_string())
}

/// Fallback for known routes called with an unsupported method.
pub async fn method_not_allowed() -> ApiError {
    ApiError::MethodNotAllowed("Method not allowed".to_string())
}
