use super::http_auth::{
    authenticate, authenticate_admin, authenticate_token, extract_bearer_token, AuthRejection,
};
use super::http_errors::{map_account_error, map_generation_error};
use super::http_types::*;
use super::state::AppState;
use crate::application::{AccountUpdate, PromoCodeSummary};
use crate::domain::{
    AddOutcome, AspectRatio, Category, Favorites, FavoritesCollection, Folder, FolderTarget,
    GeneratedImage, GenerationMode, GenerationRequest, GenerationStatus, ImageModel,
    PaymentMethod, ReferenceImage, ReferenceRole, ResolutionOption, Session,
};
use crate::infrastructure::{KeyValueStore, SCHEMA_VERSION_KEY};
use axum::{
    extract::{Path, Query, State},
    http::{header::HeaderMap, StatusCode},
    response::IntoResponse,
    routing::{get, post, put},
    Json, Router,
};
use serde::Serialize;
use tower_http::trace::TraceLayer;
use tracing::{error, info};
use utoipa::OpenApi;
use utoipa_swagger_ui::SwaggerUi;

type ApiResponse = (StatusCode, Json<serde_json::Value>);

fn respond<T: Serialize>(status: StatusCode, body: T) -> ApiResponse {
    match serde_json::to_value(body) {
        Ok(value) => (status, Json(value)),
        Err(e) => {
            error!(error = %e, "Failed to serialize response");
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                Json(serde_json::json!({ "error": "Failed to serialize response" })),
            )
        }
    }
}

fn reject((status, body): AuthRejection) -> ApiResponse {
    (status, Json(body))
}

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(health_check))
        .route("/auth/register", post(register))
        .route("/auth/login", post(login))
        .route("/auth/admin/login", post(admin_login))
        .route("/auth/logout", post(logout))
        .route("/me", get(current_account))
        .route("/me/api-key", put(set_api_key))
        .route("/me/payment-method", put(set_payment_method))
        .route("/me/promo", post(redeem_promo))
        .route("/me/credits/spend", post(spend_credits))
        .route("/me/favorites", get(list_favorites).post(add_favorite))
        .route("/me/favorites/remove", post(remove_favorite))
        .route("/me/favorites/contains", get(is_favorite))
        .route("/me/favorites/folders", post(create_folder))
        .route(
            "/me/favorites/folders/:category/:id",
            put(rename_folder).delete(delete_folder),
        )
        .route("/generations", post(generate))
        .route("/generations/cancel", post(cancel_generation))
        .route("/generations/:id/regenerate", post(regenerate))
        .route("/admin/users", get(list_users).post(admin_create_user))
        .route(
            "/admin/users/:username",
            put(admin_update_user).delete(delete_user),
        )
        .route(
            "/admin/promo-codes",
            get(list_promo_codes).post(create_promo_code),
        )
        .route("/admin/promo-codes/:code", axum::routing::delete(delete_promo_code))
        .merge(SwaggerUi::new("/docs").url("/api-docs/openapi.json", ApiDoc::openapi()))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

#[derive(OpenApi)]
#[openapi(
    paths(
        health_check,
        register,
        login,
        admin_login,
        logout,
        current_account,
        set_api_key,
        set_payment_method,
        redeem_promo,
        spend_credits,
        list_favorites,
        add_favorite,
        remove_favorite,
        is_favorite,
        create_folder,
        rename_folder,
        delete_folder,
        generate,
        cancel_generation,
        regenerate,
        list_users,
        admin_create_user,
        admin_update_user,
        delete_user,
        list_promo_codes,
        create_promo_code,
        delete_promo_code,
    ),
    components(
        schemas(
            HealthResponse,
            CredentialsRequest,
            SessionResponse,
            AccountResponse,
            ApiKeyRequest,
            PaymentMethodRequest,
            RedeemPromoRequest,
            RedeemPromoResponse,
            SpendCreditsRequest,
            CreditsResponse,
            AddFavoriteRequest,
            AddFavoriteResponse,
            RemoveFavoriteRequest,
            RemoveFavoriteResponse,
            IsFavoriteResponse,
            CreateFolderRequest,
            RenameFolderRequest,
            AdminCreateUserRequest,
            CreatedUserResponse,
            AdminUpdateUserRequest,
            CreatePromoCodeRequest,
            PromoCodeResponse,
            PaymentMethod,
            Category,
            Folder,
            FavoritesCollection,
            Favorites,
            ImageModel,
            AspectRatio,
            ResolutionOption,
            GenerationStatus,
            GenerationMode,
            ReferenceRole,
            ReferenceImage,
            GenerationRequest,
            GeneratedImage,
        )
    ),
    tags(
        (name = "Health", description = "Health check endpoints"),
        (name = "Auth", description = "Login, registration and sessions"),
        (name = "Account", description = "Credits, API key and payment method of the current user"),
        (name = "Favorites", description = "Saved images and folders"),
        (name = "Generation", description = "Image generation batches"),
        (name = "Admin", description = "User and promo code administration"),
    ),
    info(
        title = "SeTka Studio API",
        version = "0.1.0",
        description = "Image generation studio backend",
        license(name = "MIT")
    )
)]
struct ApiDoc;

/// Health check endpoint
///
/// Verifies the record store is readable.
#[utoipa::path(
    get,
    path = "/health",
    tag = "Health",
    responses(
        (status = 200, description = "Service is healthy", body = HealthResponse),
        (status = 503, description = "Service is unhealthy", body = HealthResponse)
    )
)]
async fn health_check(State(state): State<AppState>) -> impl IntoResponse {
    match state.store.get(SCHEMA_VERSION_KEY).await {
        Ok(_) => (
            StatusCode::OK,
            Json(HealthResponse {
                status: "healthy".to_string(),
                error: None,
            }),
        ),
        Err(e) => {
            error!(error = %e, "Health check failed: storage unreadable");
            (
                StatusCode::SERVICE_UNAVAILABLE,
                Json(HealthResponse {
                    status: "unhealthy".to_string(),
                    error: Some("Storage is not readable".to_string()),
                }),
            )
        }
    }
}

/// Register a new user and open a session
#[utoipa::path(
    post,
    path = "/auth/register",
    tag = "Auth",
    request_body = CredentialsRequest,
    responses(
        (status = 201, description = "Account created", body = SessionResponse),
        (status = 400, description = "Invalid username or password", body = Object),
        (status = 409, description = "Username already taken", body = Object)
    )
)]
async fn register(
    State(state): State<AppState>,
    Json(req): Json<CredentialsRequest>,
) -> impl IntoResponse {
    match state.accounts.register(&req.username, &req.password).await {
        Ok(account) => {
            let session = Session::user(account.username);
            let token = state.sessions.open(session.clone()).await;
            respond(StatusCode::CREATED, SessionResponse::new(token, session))
        }
        Err(e) => reject(map_account_error(&e)),
    }
}

#[utoipa::path(
    post,
    path = "/auth/login",
    tag = "Auth",
    request_body = CredentialsRequest,
    responses(
        (status = 200, description = "Logged in", body = SessionResponse),
        (status = 401, description = "Invalid credentials", body = Object)
    )
)]
async fn login(
    State(state): State<AppState>,
    Json(req): Json<CredentialsRequest>,
) -> impl IntoResponse {
    match state.accounts.login(&req.username, &req.password).await {
        Ok(session) => {
            let token = state.sessions.open(session.clone()).await;
            info!(username = %session.username, "User logged in");
            respond(StatusCode::OK, SessionResponse::new(token, session))
        }
        Err(e) => reject(map_account_error(&e)),
    }
}

#[utoipa::path(
    post,
    path = "/auth/admin/login",
    tag = "Auth",
    request_body = CredentialsRequest,
    responses(
        (status = 200, description = "Administrator session opened", body = SessionResponse),
        (status = 401, description = "Invalid credentials", body = Object)
    )
)]
async fn admin_login(
    State(state): State<AppState>,
    Json(req): Json<CredentialsRequest>,
) -> impl IntoResponse {
    match state.accounts.admin_login(&req.username, &req.password) {
        Ok(session) => {
            let token = state.sessions.open(session.clone()).await;
            info!(username = %session.username, "Administrator logged in");
            respond(StatusCode::OK, SessionResponse::new(token, session))
        }
        Err(e) => reject(map_account_error(&e)),
    }
}

/// Close the session and stop its running batch
#[utoipa::path(
    post,
    path = "/auth/logout",
    tag = "Auth",
    responses(
        (status = 200, description = "Logged out", body = Object),
        (status = 401, description = "Missing or unknown session", body = Object)
    )
)]
async fn logout(State(state): State<AppState>, headers: HeaderMap) -> impl IntoResponse {
    let closed = match extract_bearer_token(&headers) {
        Some(token) => state.sessions.close(token).await,
        None => false,
    };
    if !closed {
        return respond(
            StatusCode::UNAUTHORIZED,
            serde_json::json!({ "error": "Invalid or expired session" }),
        );
    }
    respond(StatusCode::OK, serde_json::json!({ "status": "logged_out" }))
}

#[utoipa::path(
    get,
    path = "/me",
    tag = "Account",
    responses(
        (status = 200, description = "Current account", body = AccountResponse),
        (status = 401, description = "Not logged in", body = Object)
    )
)]
async fn current_account(State(state): State<AppState>, headers: HeaderMap) -> impl IntoResponse {
    let active = match authenticate(&state, &headers).await {
        Ok(a) => a,
        Err(e) => return reject(e),
    };
    match state.accounts.current_account(&active.session).await {
        Ok(account) => respond(StatusCode::OK, AccountResponse::from(account)),
        Err(e) => reject(map_account_error(&e)),
    }
}

#[utoipa::path(
    put,
    path = "/me/api-key",
    tag = "Account",
    request_body = ApiKeyRequest,
    responses(
        (status = 200, description = "API key updated", body = AccountResponse),
        (status = 403, description = "Administrator sessions have no API key", body = Object)
    )
)]
async fn set_api_key(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(req): Json<ApiKeyRequest>,
) -> impl IntoResponse {
    let active = match authenticate(&state, &headers).await {
        Ok(a) => a,
        Err(e) => return reject(e),
    };
    match state.accounts.set_api_key(&active.session, req.api_key).await {
        Ok(account) => respond(StatusCode::OK, AccountResponse::from(account)),
        Err(e) => reject(map_account_error(&e)),
    }
}

#[utoipa::path(
    put,
    path = "/me/payment-method",
    tag = "Account",
    request_body = PaymentMethodRequest,
    responses(
        (status = 200, description = "Payment method updated", body = AccountResponse),
        (status = 403, description = "Administrator sessions have no payment method", body = Object)
    )
)]
async fn set_payment_method(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(req): Json<PaymentMethodRequest>,
) -> impl IntoResponse {
    let active = match authenticate(&state, &headers).await {
        Ok(a) => a,
        Err(e) => return reject(e),
    };
    match state
        .accounts
        .set_payment_method(&active.session, req.payment_method)
        .await
    {
        Ok(account) => respond(StatusCode::OK, AccountResponse::from(account)),
        Err(e) => reject(map_account_error(&e)),
    }
}

#[utoipa::path(
    post,
    path = "/me/promo",
    tag = "Account",
    request_body = RedeemPromoRequest,
    responses(
        (status = 200, description = "Credits granted", body = RedeemPromoResponse),
        (status = 404, description = "Unknown promo code", body = Object),
        (status = 409, description = "Promo code already used by this account", body = Object)
    )
)]
async fn redeem_promo(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(req): Json<RedeemPromoRequest>,
) -> impl IntoResponse {
    let active = match authenticate(&state, &headers).await {
        Ok(a) => a,
        Err(e) => return reject(e),
    };
    let granted = match state.accounts.redeem_promo(&active.session, &req.code).await {
        Ok(granted) => granted,
        Err(e) => return reject(map_account_error(&e)),
    };
    match state.accounts.current_account(&active.session).await {
        Ok(account) => respond(
            StatusCode::OK,
            RedeemPromoResponse {
                granted,
                credits: account.credits,
            },
        ),
        Err(e) => reject(map_account_error(&e)),
    }
}

#[utoipa::path(
    post,
    path = "/me/credits/spend",
    tag = "Account",
    request_body = SpendCreditsRequest,
    responses(
        (status = 200, description = "Credits taken", body = CreditsResponse),
        (status = 402, description = "Insufficient credits", body = Object)
    )
)]
async fn spend_credits(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(req): Json<SpendCreditsRequest>,
) -> impl IntoResponse {
    let active = match authenticate(&state, &headers).await {
        Ok(a) => a,
        Err(e) => return reject(e),
    };
    match state.accounts.spend_credits(&active.session, req.amount).await {
        Ok(credits) => respond(StatusCode::OK, CreditsResponse { credits }),
        Err(e) => reject(map_account_error(&e)),
    }
}

#[utoipa::path(
    get,
    path = "/me/favorites",
    tag = "Favorites",
    responses((status = 200, description = "Favorites of the current user", body = Favorites))
)]
async fn list_favorites(State(state): State<AppState>, headers: HeaderMap) -> impl IntoResponse {
    let active = match authenticate(&state, &headers).await {
        Ok(a) => a,
        Err(e) => return reject(e),
    };
    match state.favorites.favorites(&active.session).await {
        Ok(favorites) => respond(StatusCode::OK, favorites),
        Err(e) => reject(map_account_error(&e)),
    }
}

/// Save an image. Saving an image that is already a favorite is a no-op.
#[utoipa::path(
    post,
    path = "/me/favorites",
    tag = "Favorites",
    request_body = AddFavoriteRequest,
    responses(
        (status = 200, description = "Image saved or already saved", body = AddFavoriteResponse),
        (status = 404, description = "Folder not found", body = Object)
    )
)]
async fn add_favorite(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(req): Json<AddFavoriteRequest>,
) -> impl IntoResponse {
    let active = match authenticate(&state, &headers).await {
        Ok(a) => a,
        Err(e) => return reject(e),
    };
    let target = FolderTarget::parse(req.folder_id.as_deref());
    match state
        .favorites
        .add(&active.session, &req.image, req.category, &target)
        .await
    {
        Ok(outcome) => respond(
            StatusCode::OK,
            AddFavoriteResponse {
                added: outcome == AddOutcome::Added,
            },
        ),
        Err(e) => reject(map_account_error(&e)),
    }
}

#[utoipa::path(
    post,
    path = "/me/favorites/remove",
    tag = "Favorites",
    request_body = RemoveFavoriteRequest,
    responses((status = 200, description = "Every occurrence removed", body = RemoveFavoriteResponse))
)]
async fn remove_favorite(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(req): Json<RemoveFavoriteRequest>,
) -> impl IntoResponse {
    let active = match authenticate(&state, &headers).await {
        Ok(a) => a,
        Err(e) => return reject(e),
    };
    match state.favorites.remove(&active.session, &req.image).await {
        Ok(removed) => respond(StatusCode::OK, RemoveFavoriteResponse { removed }),
        Err(e) => reject(map_account_error(&e)),
    }
}

#[utoipa::path(
    get,
    path = "/me/favorites/contains",
    tag = "Favorites",
    params(FavoriteQuery),
    responses((status = 200, description = "Whether the image is saved", body = IsFavoriteResponse))
)]
async fn is_favorite(
    State(state): State<AppState>,
    headers: HeaderMap,
    Query(query): Query<FavoriteQuery>,
) -> impl IntoResponse {
    let active = match authenticate(&state, &headers).await {
        Ok(a) => a,
        Err(e) => return reject(e),
    };
    match state.favorites.is_favorite(&active.session, &query.image).await {
        Ok(favorite) => respond(StatusCode::OK, IsFavoriteResponse { favorite }),
        Err(e) => reject(map_account_error(&e)),
    }
}

#[utoipa::path(
    post,
    path = "/me/favorites/folders",
    tag = "Favorites",
    request_body = CreateFolderRequest,
    responses(
        (status = 201, description = "Folder created", body = Folder),
        (status = 400, description = "Empty folder name", body = Object)
    )
)]
async fn create_folder(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(req): Json<CreateFolderRequest>,
) -> impl IntoResponse {
    let active = match authenticate(&state, &headers).await {
        Ok(a) => a,
        Err(e) => return reject(e),
    };
    match state
        .favorites
        .create_folder(&active.session, req.category, &req.name)
        .await
    {
        Ok(folder) => respond(StatusCode::CREATED, folder),
        Err(e) => reject(map_account_error(&e)),
    }
}

#[utoipa::path(
    put,
    path = "/me/favorites/folders/{category}/{id}",
    tag = "Favorites",
    params(
        ("category" = Category, Path, description = "photos or avatars"),
        ("id" = String, Path, description = "Folder ID")
    ),
    request_body = RenameFolderRequest,
    responses(
        (status = 200, description = "Folder renamed", body = Object),
        (status = 404, description = "Folder not found", body = Object)
    )
)]
async fn rename_folder(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path((category, id)): Path<(Category, String)>,
    Json(req): Json<RenameFolderRequest>,
) -> impl IntoResponse {
    let active = match authenticate(&state, &headers).await {
        Ok(a) => a,
        Err(e) => return reject(e),
    };
    match state
        .favorites
        .rename_folder(&active.session, category, &id, &req.name)
        .await
    {
        Ok(()) => respond(StatusCode::OK, serde_json::json!({ "status": "renamed" })),
        Err(e) => reject(map_account_error(&e)),
    }
}

/// Delete a folder together with the images saved in it
#[utoipa::path(
    delete,
    path = "/me/favorites/folders/{category}/{id}",
    tag = "Favorites",
    params(
        ("category" = Category, Path, description = "photos or avatars"),
        ("id" = String, Path, description = "Folder ID")
    ),
    responses(
        (status = 200, description = "Folder deleted", body = Folder),
        (status = 404, description = "Folder not found", body = Object)
    )
)]
async fn delete_folder(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path((category, id)): Path<(Category, String)>,
) -> impl IntoResponse {
    let active = match authenticate(&state, &headers).await {
        Ok(a) => a,
        Err(e) => return reject(e),
    };
    match state
        .favorites
        .delete_folder(&active.session, category, &id)
        .await
    {
        Ok(folder) => respond(StatusCode::OK, folder),
        Err(e) => reject(map_account_error(&e)),
    }
}

/// Run a generation batch
///
/// Charges the batch up front, then generates the images one after another.
/// The response holds one slot per requested image.
#[utoipa::path(
    post,
    path = "/generations",
    tag = "Generation",
    request_body = GenerationRequest,
    responses(
        (status = 200, description = "Batch finished", body = [GeneratedImage]),
        (status = 400, description = "Invalid request", body = Object),
        (status = 402, description = "Insufficient credits", body = Object)
    )
)]
async fn generate(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(req): Json<GenerationRequest>,
) -> impl IntoResponse {
    let (token, active) = match authenticate_token(&state, &headers).await {
        Ok(a) => a,
        Err(e) => return reject(e),
    };
    let Some(cancel) = state.sessions.begin_batch(token).await else {
        return respond(
            StatusCode::UNAUTHORIZED,
            serde_json::json!({ "error": "Invalid or expired session" }),
        );
    };

    let result = state
        .generation
        .run_batch(&active.session, &req, &cancel)
        .await;
    state.sessions.finish_batch(token, &cancel).await;

    match result {
        Ok(images) => respond(StatusCode::OK, images),
        Err(e) => reject(map_generation_error(&e)),
    }
}

/// Stop the session's running batches after their in-flight requests
#[utoipa::path(
    post,
    path = "/generations/cancel",
    tag = "Generation",
    responses((status = 202, description = "Cancellation requested", body = Object))
)]
async fn cancel_generation(State(state): State<AppState>, headers: HeaderMap) -> impl IntoResponse {
    let (token, active) = match authenticate_token(&state, &headers).await {
        Ok(a) => a,
        Err(e) => return reject(e),
    };
    let batches = state.sessions.cancel_batches(token).await;
    info!(session_id = %active.id, username = %active.session.username, batches, "Generation cancelled");
    respond(StatusCode::ACCEPTED, serde_json::json!({ "status": "cancelling" }))
}

#[utoipa::path(
    post,
    path = "/generations/{id}/regenerate",
    tag = "Generation",
    params(("id" = String, Path, description = "Image slot ID")),
    request_body = GenerationRequest,
    responses(
        (status = 200, description = "New image for the slot", body = GeneratedImage),
        (status = 402, description = "Insufficient credits", body = Object)
    )
)]
async fn regenerate(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path(id): Path<String>,
    Json(req): Json<GenerationRequest>,
) -> impl IntoResponse {
    let active = match authenticate(&state, &headers).await {
        Ok(a) => a,
        Err(e) => return reject(e),
    };
    match state.generation.regenerate(&active.session, &id, &req).await {
        Ok(image) => respond(StatusCode::OK, image),
        Err(e) => reject(map_generation_error(&e)),
    }
}

#[utoipa::path(
    get,
    path = "/admin/users",
    tag = "Admin",
    responses(
        (status = 200, description = "Every user except the administrator", body = [AccountResponse]),
        (status = 403, description = "Administrator session required", body = Object)
    )
)]
async fn list_users(State(state): State<AppState>, headers: HeaderMap) -> impl IntoResponse {
    if let Err(e) = authenticate_admin(&state, &headers).await {
        return reject(e);
    }
    match state.accounts.list_users().await {
        Ok(accounts) => {
            let users: Vec<AccountResponse> = accounts.into_iter().map(Into::into).collect();
            respond(StatusCode::OK, users)
        }
        Err(e) => reject(map_account_error(&e)),
    }
}

/// Create a user with a generated password
#[utoipa::path(
    post,
    path = "/admin/users",
    tag = "Admin",
    request_body = AdminCreateUserRequest,
    responses(
        (status = 201, description = "User created", body = CreatedUserResponse),
        (status = 409, description = "Username already taken", body = Object)
    )
)]
async fn admin_create_user(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(req): Json<AdminCreateUserRequest>,
) -> impl IntoResponse {
    if let Err(e) = authenticate_admin(&state, &headers).await {
        return reject(e);
    }
    match state.accounts.admin_create_user(&req.username).await {
        Ok(created) => respond(StatusCode::CREATED, CreatedUserResponse::from(created)),
        Err(e) => reject(map_account_error(&e)),
    }
}

#[utoipa::path(
    put,
    path = "/admin/users/{username}",
    tag = "Admin",
    params(("username" = String, Path, description = "Current username")),
    request_body = AdminUpdateUserRequest,
    responses(
        (status = 200, description = "User updated", body = AccountResponse),
        (status = 404, description = "User not found", body = Object),
        (status = 409, description = "New username already taken", body = Object)
    )
)]
async fn admin_update_user(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path(username): Path<String>,
    Json(req): Json<AdminUpdateUserRequest>,
) -> impl IntoResponse {
    if let Err(e) = authenticate_admin(&state, &headers).await {
        return reject(e);
    }
    let ends_sessions = req.username.is_some() || req.password.is_some();
    let update = AccountUpdate {
        username: req.username,
        password: req.password,
        credits: req.credits,
        api_key: req.api_key,
        payment_method: req.payment_method,
    };
    match state.accounts.admin_update_user(&username, update).await {
        Ok(account) => {
            if ends_sessions {
                state.sessions.close_user(&username).await;
            }
            respond(StatusCode::OK, AccountResponse::from(account))
        }
        Err(e) => reject(map_account_error(&e)),
    }
}

#[utoipa::path(
    delete,
    path = "/admin/users/{username}",
    tag = "Admin",
    params(("username" = String, Path, description = "Username")),
    responses(
        (status = 200, description = "User deleted", body = Object),
        (status = 403, description = "The administrator account cannot be deleted", body = Object),
        (status = 404, description = "User not found", body = Object)
    )
)]
async fn delete_user(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path(username): Path<String>,
) -> impl IntoResponse {
    if let Err(e) = authenticate_admin(&state, &headers).await {
        return reject(e);
    }
    match state.accounts.delete_user(&username).await {
        Ok(()) => {
            state.sessions.close_user(&username).await;
            respond(StatusCode::OK, serde_json::json!({ "status": "deleted" }))
        }
        Err(e) => reject(map_account_error(&e)),
    }
}

#[utoipa::path(
    get,
    path = "/admin/promo-codes",
    tag = "Admin",
    responses((status = 200, description = "Promo codes, newest first", body = [PromoCodeResponse]))
)]
async fn list_promo_codes(State(state): State<AppState>, headers: HeaderMap) -> impl IntoResponse {
    if let Err(e) = authenticate_admin(&state, &headers).await {
        return reject(e);
    }
    match state.accounts.list_promo_codes().await {
        Ok(codes) => {
            let codes: Vec<PromoCodeResponse> = codes.into_iter().map(Into::into).collect();
            respond(StatusCode::OK, codes)
        }
        Err(e) => reject(map_account_error(&e)),
    }
}

#[utoipa::path(
    post,
    path = "/admin/promo-codes",
    tag = "Admin",
    request_body = CreatePromoCodeRequest,
    responses(
        (status = 201, description = "Promo code created", body = PromoCodeResponse),
        (status = 400, description = "Credits must be positive", body = Object)
    )
)]
async fn create_promo_code(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(req): Json<CreatePromoCodeRequest>,
) -> impl IntoResponse {
    if let Err(e) = authenticate_admin(&state, &headers).await {
        return reject(e);
    }
    match state.accounts.create_promo_code(req.credits, req.name).await {
        Ok(promo) => respond(
            StatusCode::CREATED,
            PromoCodeResponse::from(PromoCodeSummary {
                used_count: promo.used_by.len(),
                promo,
            }),
        ),
        Err(e) => reject(map_account_error(&e)),
    }
}

#[utoipa::path(
    delete,
    path = "/admin/promo-codes/{code}",
    tag = "Admin",
    params(("code" = String, Path, description = "Promo code")),
    responses(
        (status = 200, description = "Promo code deleted", body = Object),
        (status = 404, description = "Promo code not found", body = Object)
    )
)]
async fn delete_promo_code(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path(code): Path<String>,
) -> impl IntoResponse {
    if let Err(e) = authenticate_admin(&state, &headers).await {
        return reject(e);
    }
    match state.accounts.delete_promo_code(&code).await {
        Ok(()) => respond(StatusCode::OK, serde_json::json!({ "status": "deleted" })),
        Err(e) => reject(map_account_error(&e)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn openapi_lists_every_route_group() {
        let doc = ApiDoc::openapi();
        let paths: Vec<&String> = doc.paths.paths.keys().collect();
        for expected in [
            "/health",
            "/auth/login",
            "/me/favorites",
            "/me/favorites/folders/{category}/{id}",
            "/generations",
            "/admin/promo-codes/{code}",
        ] {
            assert!(
                paths.iter().any(|p| p.as_str() == expected),
                "missing {}",
                expected
            );
        }
    }

    #[test]
    fn respond_serializes_body() {
        let (status, Json(body)) = respond(StatusCode::CREATED, CreditsResponse { credits: 7 });
        assert_eq!(status, StatusCode::CREATED);
        assert_eq!(body["credits"], 7);
    }
}
