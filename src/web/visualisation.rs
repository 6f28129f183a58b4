//! Chart data over the session dataset

use super::extract::session_dataset;
use super::{AppError, AppResult, AppState};
use crate::session::SessionHandle;
use crate::visualisation::{self as viz, Aggregation};
use axum::extract::{Query, State};
use axum::routing::get;
use axum::{Extension, Json, Router};
use serde::Deserialize;
use serde_json::{json, Value};

pub fn routes() -> Router<AppState> {
    Router::new()
        .route("/visualisation/summary", get(summary))
        .route("/visualisation/histogram", get(histogram))
        .route("/visualisation/boxplot", get(boxplot))
        .route("/visualisation/correlation", get(correlation))
        .route("/visualisation/categories", get(categories))
        .route("/visualisation/aggregate", get(aggregate))
        .route("/visualisation/line", get(line))
}

#[derive(Debug, Default, Deserialize)]
struct ChartQuery {
    column: Option<String>,
    columns: Option<String>,
    bins: Option<usize>,
    group: Option<String>,
    limit: Option<usize>,
    x: Option<String>,
    y: Option<String>,
    agg: Option<String>,
}

fn required<'a>(value: &'a Option<String>, name: &str) -> AppResult<&'a str> {
    value
        .as_deref()
        .map(str::trim)
        .filter(|v| !v.is_empty())
        .ok_or_else(|| AppError::bad_request(format!("Parameter '{}' is required", name)))
}

/// GET /visualisation/summary
async fn summary(
    State(state): State<AppState>,
    Extension(session): Extension<SessionHandle>,
) -> AppResult<Json<Value>> {
    let (filename, frame) = session_dataset(&state, &session).await?;
    Ok(Json(json!({
        "success": true,
        "filename": filename,
        "rows": frame.n_rows(),
        "summary": viz::summary(&frame),
    })))
}

/// GET /visualisation/histogram?column=&bins=
async fn histogram(
    State(state): State<AppState>,
    Extension(session): Extension<SessionHandle>,
    Query(q): Query<ChartQuery>,
) -> AppResult<Json<Value>> {
    let column = required(&q.column, "column")?;
    let (_, frame) = session_dataset(&state, &session).await?;
    let histogram = viz::histogram(&frame, column, q.bins)?;
    Ok(Json(json!({ "success": true, "column": column, "histogram": histogram })))
}

/// GET /visualisation/boxplot?column=&group=
async fn boxplot(
    State(state): State<AppState>,
    Extension(session): Extension<SessionHandle>,
    Query(q): Query<ChartQuery>,
) -> AppResult<Json<Value>> {
    let column = required(&q.column, "column")?;
    let group = q.group.as_deref().filter(|g| !g.trim().is_empty());
    let (_, frame) = session_dataset(&state, &session).await?;
    let boxes = viz::boxplot(&frame, column, group)?;
    Ok(Json(json!({ "success": true, "column": column, "group": group, "boxes": boxes })))
}

/// GET /visualisation/correlation?columns=a,b,c
async fn correlation(
    State(state): State<AppState>,
    Extension(session): Extension<SessionHandle>,
    Query(q): Query<ChartQuery>,
) -> AppResult<Json<Value>> {
    let columns: Option<Vec<String>> = q.columns.as_deref().map(|raw| {
        raw.split(',')
            .map(str::trim)
            .filter(|c| !c.is_empty())
            .map(str::to_string)
            .collect()
    });
    let (_, frame) = session_dataset(&state, &session).await?;
    let correlation = viz::correlation(&frame, columns.as_deref().filter(|c| !c.is_empty()))?;
    Ok(Json(json!({ "success": true, "correlation": correlation })))
}

/// GET /visualisation/categories?column=&limit=
async fn categories(
    State(state): State<AppState>,
    Extension(session): Extension<SessionHandle>,
    Query(q): Query<ChartQuery>,
) -> AppResult<Json<Value>> {
    let column = required(&q.column, "column")?;
    let (_, frame) = session_dataset(&state, &session).await?;
    let counts = viz::categories(&frame, column, q.limit)?;
    Ok(Json(json!({ "success": true, "column": column, "categories": counts })))
}

/// GET /visualisation/aggregate?x=&y=&agg=sum|mean|count|median
async fn aggregate(
    State(state): State<AppState>,
    Extension(session): Extension<SessionHandle>,
    Query(q): Query<ChartQuery>,
) -> AppResult<Json<Value>> {
    let x = required(&q.x, "x")?;
    let y = required(&q.y, "y")?;
    let agg_name = q.agg.as_deref().unwrap_or("sum");
    let agg = Aggregation::from_str(agg_name)
        .ok_or_else(|| AppError::bad_request(format!("Unknown aggregation: {}", agg_name)))?;
    let (_, frame) = session_dataset(&state, &session).await?;
    let points = viz::aggregate(&frame, x, y, agg)?;
    Ok(Json(json!({ "success": true, "x": x, "y": y, "agg": agg_name, "points": points })))
}

/// GET /visualisation/line?x=&y=
async fn line(
    State(state): State<AppState>,
    Extension(session): Extension<SessionHandle>,
    Query(q): Query<ChartQuery>,
) -> AppResult<Json<Value>> {
    let x = required(&q.x, "x")?;
    let y = required(&q.y, "y")?;
    let (_, frame) = session_dataset(&state, &session).await?;
    let points = viz::line(&frame, x, y)?;
    Ok(Json(json!({ "success": true, "x": x, "y": y, "points": points })))
}
