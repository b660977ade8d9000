use crate::application::{CreatedUser, PromoCodeSummary};
use crate::domain::{Account, Category, PaymentMethod, Session, SessionRole};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use utoipa::{IntoParams, ToSchema};

#[derive(Serialize, ToSchema)]
pub(super) struct HealthResponse {
    pub(super) status: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub(super) error: Option<String>,
}

#[derive(Deserialize, ToSchema)]
pub(super) struct CredentialsRequest {
    #[schema(example = "anna")]
    pub(super) username: String,
    pub(super) password: String,
}

#[derive(Serialize, ToSchema)]
pub(super) struct SessionResponse {
    pub(super) token: String,
    pub(super) username: String,
    #[schema(value_type = String, example = "user")]
    pub(super) role: SessionRole,
}

impl SessionResponse {
    pub(super) fn new(token: String, session: Session) -> Self {
        Self {
            token,
            username: session.username,
            role: session.role,
        }
    }
}

/// Account as shown to clients: no password digest, no API key.
#[derive(Serialize, ToSchema)]
pub(super) struct AccountResponse {
    pub(super) username: String,
    pub(super) credits: u64,
    pub(super) payment_method: PaymentMethod,
    pub(super) has_api_key: bool,
    pub(super) favorites_count: usize,
    #[schema(value_type = String, format = DateTime)]
    pub(super) created_at: DateTime<Utc>,
    #[schema(value_type = String, format = DateTime)]
    pub(super) updated_at: DateTime<Utc>,
}

impl From<Account> for AccountResponse {
    fn from(account: Account) -> Self {
        Self {
            has_api_key: account.has_api_key(),
            favorites_count: account.favorites.len(),
            username: account.username,
            credits: account.credits,
            payment_method: account.payment_method,
            created_at: account.created_at,
            updated_at: account.updated_at,
        }
    }
}

#[derive(Deserialize, ToSchema)]
pub(super) struct ApiKeyRequest {
    /// Empty or missing clears the key.
    pub(super) api_key: Option<String>,
}

#[derive(Deserialize, ToSchema)]
pub(super) struct PaymentMethodRequest {
    pub(super) payment_method: PaymentMethod,
}

#[derive(Deserialize, ToSchema)]
pub(super) struct RedeemPromoRequest {
    #[schema(example = "ABCDEFGH12345678")]
    pub(super) code: String,
}

#[derive(Serialize, ToSchema)]
pub(super) struct RedeemPromoResponse {
    pub(super) granted: u64,
    pub(super) credits: u64,
}

#[derive(Deserialize, ToSchema)]
pub(super) struct SpendCreditsRequest {
    pub(super) amount: u64,
}

#[derive(Serialize, ToSchema)]
pub(super) struct CreditsResponse {
    pub(super) credits: u64,
}

#[derive(Deserialize, ToSchema)]
pub(super) struct AddFavoriteRequest {
    pub(super) image: String,
    pub(super) category: Category,
    /// Folder id, or `root` / missing for the category root.
    pub(super) folder_id: Option<String>,
}

#[derive(Serialize, ToSchema)]
pub(super) struct AddFavoriteResponse {
    pub(super) added: bool,
}

#[derive(Deserialize, ToSchema)]
pub(super) struct RemoveFavoriteRequest {
    pub(super) image: String,
}

#[derive(Serialize, ToSchema)]
pub(super) struct RemoveFavoriteResponse {
    pub(super) removed: usize,
}

#[derive(Deserialize, Debug, IntoParams)]
#[into_params(parameter_in = Query)]
pub(super) struct FavoriteQuery {
    pub(super) image: String,
}

#[derive(Serialize, ToSchema)]
pub(super) struct IsFavoriteResponse {
    pub(super) favorite: bool,
}

#[derive(Deserialize, ToSchema)]
pub(super) struct CreateFolderRequest {
    pub(super) category: Category,
    #[schema(example = "Portraits")]
    pub(super) name: String,
}

#[derive(Deserialize, ToSchema)]
pub(super) struct RenameFolderRequest {
    pub(super) name: String,
}

#[derive(Deserialize, ToSchema)]
pub(super) struct AdminCreateUserRequest {
    pub(super) username: String,
}

#[derive(Serialize, ToSchema)]
pub(super) struct CreatedUserResponse {
    pub(super) user: AccountResponse,
    /// Shown once.
    pub(super) password: String,
}

impl From<CreatedUser> for CreatedUserResponse {
    fn from(created: CreatedUser) -> Self {
        Self {
            user: created.account.into(),
            password: created.password,
        }
    }
}

#[derive(Deserialize, ToSchema)]
pub(super) struct AdminUpdateUserRequest {
    pub(super) username: Option<String>,
    pub(super) password: Option<String>,
    pub(super) credits: Option<u64>,
    pub(super) api_key: Option<String>,
    pub(super) payment_method: Option<PaymentMethod>,
}

#[derive(Deserialize, ToSchema)]
pub(super) struct CreatePromoCodeRequest {
    #[schema(example = 100)]
    pub(super) credits: u64,
    pub(super) name: Option<String>,
}

#[derive(Serialize, ToSchema)]
pub(super) struct PromoCodeResponse {
    pub(super) name: String,
    pub(super) code: String,
    pub(super) total_credits: u64,
    pub(super) used_by: Vec<String>,
    pub(super) used_count: usize,
    #[schema(value_type = String, format = DateTime)]
    pub(super) created_at: DateTime<Utc>,
}

impl From<PromoCodeSummary> for PromoCodeResponse {
    fn from(summary: PromoCodeSummary) -> Self {
        Self {
            name: summary.promo.name,
            code: summary.promo.code,
            total_credits: summary.promo.total_credits,
            used_by: summary.promo.used_by,
            used_count: summary.used_count,
            created_at: summary.promo.created_at,
        }
    }
}
