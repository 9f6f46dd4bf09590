//! Merge credit handlers.

use axum::extract::{Path, State};
use axum::Json;
use serde::{Deserialize, Serialize};
use tracing::info;
use validator::Validate;

use clipmerge_store::CreditLedger;

use crate::account::is_valid_account_id;
use crate::error::{ApiError, ApiResult};
use crate::state::AppState;

/// Largest single grant accepted.
pub const MAX_GRANT_UNITS: u64 = 100_000;

/// Balance of one credit account.
#[derive(Debug, Serialize)]
pub struct CreditBalanceResponse {
    pub account_id: String,
    pub balance: i64,
}

/// Body of a credit grant.
#[derive(Debug, Deserialize, Validate)]
pub struct GrantCreditsRequest {
    #[validate(range(min = 1, max = 100_000))]
    pub units: u64,
}

fn checked_account(account_id: String) -> ApiResult<String> {
    if !is_valid_account_id(&account_id) {
        return Err(ApiError::bad_request("Invalid account id"));
    }
    Ok(account_id)
}

/// Current balance; unknown accounts have zero credits.
pub async fn get_credit_balance(
    State(state): State<AppState>,
    Path(account_id): Path<String>,
) -> ApiResult<Json<CreditBalanceResponse>> {
    let account_id = checked_account(account_id)?;
    let balance = state.stores.credits.balance(&account_id).await?;
    Ok(Json(CreditBalanceResponse { account_id, balance }))
}

/// Add credits to an account.
pub async fn grant_credits(
    State(state): State<AppState>,
    Path(account_id): Path<String>,
    Json(request): Json<GrantCreditsRequest>,
) -> ApiResult<Json<CreditBalanceResponse>> {
    let account_id = checked_account(account_id)?;
    request
        .validate()
        .map_err(|e| ApiError::Validation(e.to_string()))?;

    let balance = state.stores.credits.credit(&account_id, request.units).await?;
    info!(account_id = %account_id, units = request.units, balance, "Granted merge credits");

    Ok(Json(CreditBalanceResponse { account_id, balance }))
}
