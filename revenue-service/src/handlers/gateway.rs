//! Gateway passthrough handlers.

use axum::{
    extract::{Query, State},
    Json,
};
use service_core::error::AppError;

use crate::dtos::VariablesQuery;
use crate::services::gateway::ExtractedVariables;
use crate::startup::AppState;

/// Fetch the gateway's template variables for a revenue category.
pub async fn extract_variables(
    State(state): State<AppState>,
    Query(query): Query<VariablesQuery>,
) -> Result<Json<ExtractedVariables>, AppError> {
    let key = query.key.as_deref().unwrap_or("default");

    let extracted = state
        .lifecycle
        .extract_variables(
            key,
            query.ward_id,
            query.revenue_type_category.as_deref(),
        )
        .await?;

    Ok(Json(extracted))
}
