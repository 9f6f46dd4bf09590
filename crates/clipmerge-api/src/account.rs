//! Credit account identification.

use axum::extract::FromRequestParts;
use axum::http::request::Parts;

use crate::error::ApiError;

/// Header carrying the account that pays for a request.
pub const ACCOUNT_HEADER: &str = "X-Account-Id";

/// Account id taken from the `X-Account-Id` header.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AccountId(pub String);

impl AccountId {
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

/// Valid format: ASCII alphanumerics, `-`, `_`, `.` and `@`, 1-128 chars.
pub fn is_valid_account_id(id: &str) -> bool {
    !id.is_empty()
        && id.len() <= 128
        && id
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.' | '@'))
}

#[axum::async_trait]
impl<S> FromRequestParts<S> for AccountId
where
    S: Send + Sync,
{
    type Rejection = ApiError;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        let value = parts
            .headers
            .get(ACCOUNT_HEADER)
            .and_then(|v| v.to_str().ok())
            .map(str::trim)
            .ok_or_else(|| ApiError::unauthorized(format!("Missing {ACCOUNT_HEADER} header")))?;

        if !is_valid_account_id(value) {
            return Err(ApiError::bad_request("Invalid account id"));
        }

        Ok(AccountId(value.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_account_ids() {
        assert!(is_valid_account_id("acct-1"));
        assert!(is_valid_account_id("user@example.com"));
        assert!(!is_valid_account_id(""));
        assert!(!is_valid_account_id("has space"));
        assert!(!is_valid_account_id("../etc"));
        assert!(!is_valid_account_id(&"a".repeat(129)));
    }
}
