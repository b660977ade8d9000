use crate::application::{AccountError, GenerationServiceError};
use crate::domain::{FavoritesError, RequestError};
use crate::infrastructure::GenerationError;
use axum::http::StatusCode;
use tracing::error;

pub(super) fn map_account_error(err: &AccountError) -> (StatusCode, serde_json::Value) {
    match err {
        AccountError::InvalidInput(msg) => {
            (StatusCode::BAD_REQUEST, serde_json::json!({ "error": msg }))
        }
        AccountError::UsernameTaken(_) => (
            StatusCode::CONFLICT,
            serde_json::json!({ "error": "Username already taken" }),
        ),
        AccountError::InvalidCredentials => (
            StatusCode::UNAUTHORIZED,
            serde_json::json!({ "error": "Invalid username or password" }),
        ),
        AccountError::UserNotFound(_) => {
            (StatusCode::NOT_FOUND, serde_json::json!({ "error": "User not found" }))
        }
        AccountError::InsufficientCredits {
            required,
            available,
        } => (
            StatusCode::PAYMENT_REQUIRED,
            serde_json::json!({
                "error": "Insufficient credits",
                "required": required,
                "available": available
            }),
        ),
        AccountError::PromoNotFound(_) => (
            StatusCode::NOT_FOUND,
            serde_json::json!({ "error": "Promo code not found" }),
        ),
        AccountError::PromoAlreadyUsed(_) => (
            StatusCode::CONFLICT,
            serde_json::json!({ "error": "Promo code already used" }),
        ),
        AccountError::ProtectedAccount => (
            StatusCode::FORBIDDEN,
            serde_json::json!({ "error": "The administrator account is protected" }),
        ),
        AccountError::NotPermitted(msg) => {
            (StatusCode::FORBIDDEN, serde_json::json!({ "error": msg }))
        }
        AccountError::Favorites(FavoritesError::FolderNotFound(_)) => (
            StatusCode::NOT_FOUND,
            serde_json::json!({ "error": "Folder not found" }),
        ),
        AccountError::Repository(e) => {
            error!(error = %e, "Account storage failure");
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                serde_json::json!({ "error": "Storage failure" }),
            )
        }
    }
}

pub(super) fn map_generation_error(err: &GenerationServiceError) -> (StatusCode, serde_json::Value) {
    match err {
        GenerationServiceError::Request(RequestError::Invalid(e)) => (
            StatusCode::BAD_REQUEST,
            serde_json::json!({ "error": "Invalid request", "details": e.to_string() }),
        ),
        GenerationServiceError::Request(e) => {
            (StatusCode::BAD_REQUEST, serde_json::json!({ "error": e.to_string() }))
        }
        GenerationServiceError::Account(e) => map_account_error(e),
        GenerationServiceError::InsufficientCredits {
            required,
            available,
        } => (
            StatusCode::PAYMENT_REQUIRED,
            serde_json::json!({
                "error": "Insufficient credits",
                "required": required,
                "available": available
            }),
        ),
        GenerationServiceError::MissingApiKey => (
            StatusCode::BAD_REQUEST,
            serde_json::json!({ "error": "Payment method is your own API key, but no key is set" }),
        ),
        GenerationServiceError::Generation(GenerationError::RateLimited(_)) => (
            StatusCode::TOO_MANY_REQUESTS,
            serde_json::json!({ "error": "Rate limited by the image model, please retry" }),
        ),
        GenerationServiceError::Generation(GenerationError::SafetyRejected(_)) => (
            StatusCode::UNPROCESSABLE_ENTITY,
            serde_json::json!({ "error": "Rejected by safety filters" }),
        ),
        GenerationServiceError::Generation(e) => {
            error!(error = %e, "Image generation failure");
            (
                StatusCode::BAD_GATEWAY,
                serde_json::json!({ "error": "Image generation failed" }),
            )
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn credit_and_promo_failures_are_client_errors() {
        let (status, body) = map_account_error(&AccountError::InsufficientCredits {
            required: 4,
            available: 1,
        });
        assert_eq!(status, StatusCode::PAYMENT_REQUIRED);
        assert_eq!(body["available"], 1);

        let (status, _) = map_account_error(&AccountError::PromoAlreadyUsed("x".to_string()));
        assert_eq!(status, StatusCode::CONFLICT);

        let (status, _) = map_generation_error(&GenerationServiceError::Account(
            AccountError::UserNotFound("x".to_string()),
        ));
        assert_eq!(status, StatusCode::NOT_FOUND);
    }
}
