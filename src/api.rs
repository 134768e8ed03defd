// 🌐 HTTP API - JSON surface over the exchange (feature "server")
//
// Every response uses the `ApiResponse` envelope. Business errors carry their
// stable `kind` string so the web app can localize the message.
//
// Caller identity: when a bot token is configured the request must carry
// Telegram init data in `X-Telegram-Init-Data`; without one (local
// development, tests) the caller is taken from `X-Account-Id`.

use crate::aggregator::{parse_referral_payload, AccountLinks, ReferralSummary};
use crate::auth::verify_init_data;
use crate::entities::{
    Account, Listing, ListingCard, ListingDraft, Notification, RatingSummary, Review, Transaction,
};
use crate::error::{ErrorKind, ExchangeError};
use crate::exchange::Exchange;
use crate::sell_flow::{SellForm, SellState, SellStep, SELL_STEPS};
use crate::stats::AdminStats;
use axum::{
    async_trait,
    extract::{FromRequestParts, Path, Query, State},
    http::{request::Parts, StatusCode},
    response::{IntoResponse, Json, Response},
    routing::{get, post},
    Router,
};
use serde::{Deserialize, Serialize};
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;
use tracing::error;

pub const INIT_DATA_HEADER: &str = "x-telegram-init-data";
pub const ACCOUNT_ID_HEADER: &str = "x-account-id";

const DEFAULT_PAGE_SIZE: usize = 20;
const MAX_PAGE_SIZE: usize = 100;

/// Shared application state
#[derive(Clone)]
pub struct AppState {
    pub exchange: Exchange,
}

/// API Response wrapper
#[derive(Debug, Serialize, Deserialize)]
pub struct ApiResponse<T> {
    pub success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<T>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub kind: Option<String>,
}

impl<T> ApiResponse<T> {
    fn ok(data: T) -> Self {
        Self {
            success: true,
            data: Some(data),
            error: None,
            kind: None,
        }
    }

    fn err(message: String, kind: &str) -> Self {
        Self {
            success: false,
            data: None,
            error: Some(message),
            kind: Some(kind.to_string()),
        }
    }
}

type ApiResult<T> = Result<Json<ApiResponse<T>>, ApiError>;

// ============================================================================
// ERRORS
// ============================================================================

#[derive(Debug)]
pub enum ApiError {
    Exchange(ExchangeError),
    Unauthorized(&'static str),
    Forbidden,
    Internal(String),
}

impl From<ExchangeError> for ApiError {
    fn from(e: ExchangeError) -> Self {
        ApiError::Exchange(e)
    }
}

/// HTTP status for each business outcome
pub fn status_for(kind: ErrorKind) -> StatusCode {
    match kind {
        ErrorKind::NotFound | ErrorKind::ListingNotFound => StatusCode::NOT_FOUND,
        ErrorKind::ListingUnavailable | ErrorKind::InvalidState | ErrorKind::DuplicateReview => {
            StatusCode::CONFLICT
        }
        ErrorKind::InsufficientFunds => StatusCode::PAYMENT_REQUIRED,
        ErrorKind::InvalidPrice
        | ErrorKind::InvalidRating
        | ErrorKind::SelfPurchase
        | ErrorKind::AmountOutOfRange
        | ErrorKind::InvalidDuration => StatusCode::UNPROCESSABLE_ENTITY,
        ErrorKind::NotParty | ErrorKind::NotOwner => StatusCode::FORBIDDEN,
        ErrorKind::Storage => StatusCode::INTERNAL_SERVER_ERROR,
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, message, kind) = match self {
            ApiError::Exchange(e) => {
                let kind = e.kind();
                if !kind.is_business() {
                    error!(error = %e, "storage failure");
                    // Storage details stay in the log
                    (status_for(kind), "internal error".to_string(), kind.as_str())
                } else {
                    (status_for(kind), e.to_string(), kind.as_str())
                }
            }
            ApiError::Unauthorized(reason) => (StatusCode::UNAUTHORIZED, reason.to_string(), "unauthorized"),
            ApiError::Forbidden => (StatusCode::FORBIDDEN, "admin only".to_string(), "forbidden"),
            ApiError::Internal(message) => {
                error!(%message, "handler failure");
                (StatusCode::INTERNAL_SERVER_ERROR, "internal error".to_string(), "internal")
            }
        };

        (status, Json(ApiResponse::<()>::err(message, kind))).into_response()
    }
}

// ============================================================================
// CALLER IDENTITY
// ============================================================================

/// The account making the request
#[derive(Debug, Clone)]
pub struct Caller {
    pub id: i64,
    pub display_name: Option<String>,
    pub username: Option<String>,
}

#[async_trait]
impl FromRequestParts<AppState> for Caller {
    type Rejection = ApiError;

    async fn from_request_parts(parts: &mut Parts, state: &AppState) -> Result<Self, Self::Rejection> {
        let header = |name: &str| parts.headers.get(name).and_then(|v| v.to_str().ok());

        match &state.exchange.config().bot_token {
            Some(token) => {
                let init_data = header(INIT_DATA_HEADER).ok_or(ApiError::Unauthorized("missing init data"))?;
                let user = verify_init_data(init_data, token)
                    .ok_or(ApiError::Unauthorized("invalid init data"))?;
                Ok(Caller {
                    id: user.id,
                    display_name: Some(user.display_name()),
                    username: user.username,
                })
            }
            None => {
                let id = header(ACCOUNT_ID_HEADER)
                    .and_then(|raw| raw.parse::<i64>().ok())
                    .ok_or(ApiError::Unauthorized("missing account id"))?;
                Ok(Caller {
                    id,
                    display_name: None,
                    username: None,
                })
            }
        }
    }
}

/// Run a blocking exchange call off the async runtime
async fn run<T, F>(state: &AppState, f: F) -> Result<T, ApiError>
where
    T: Send + 'static,
    F: FnOnce(&Exchange) -> crate::error::Result<T> + Send + 'static,
{
    let exchange = state.exchange.clone();
    tokio::task::spawn_blocking(move || f(&exchange))
        .await
        .map_err(|e| ApiError::Internal(e.to_string()))?
        .map_err(ApiError::from)
}

// ============================================================================
// REQUEST BODIES
// ============================================================================

#[derive(Debug, Default, Deserialize)]
pub struct RegisterRequest {
    #[serde(default)]
    pub display_name: Option<String>,
    /// Ignored when verified init data supplies one
    #[serde(default)]
    pub username: Option<String>,
    /// Raw start payload, e.g. "ref_42"
    #[serde(default)]
    pub start: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct PageQuery {
    #[serde(default)]
    pub limit: Option<usize>,
    #[serde(default)]
    pub offset: Option<usize>,
}

/// One step of the sell conversation; the client holds the form between calls
#[derive(Debug, Default, Deserialize)]
pub struct SellRequest {
    #[serde(default)]
    pub form: Option<SellForm>,
    #[serde(default)]
    pub input: Option<String>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct SellResponse {
    pub form: SellForm,
    pub step: Option<u8>,
    pub total_steps: u8,
    pub prompt: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub listing: Option<Listing>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct ReviewsView {
    pub summary: RatingSummary,
    pub reviews: Vec<Review>,
}

#[derive(Debug, Deserialize)]
pub struct ReviewRequest {
    pub transaction_id: i64,
    pub subject_id: i64,
    pub rating: i64,
    #[serde(default)]
    pub comment: String,
}

// ============================================================================
// API Handlers
// ============================================================================

/// GET /api/health - Health check
async fn health_check() -> Json<ApiResponse<&'static str>> {
    Json(ApiResponse::ok("OK"))
}

/// POST /api/accounts - Register (idempotent), paying start and referral bonuses
async fn register(
    State(state): State<AppState>,
    caller: Caller,
    body: Option<Json<RegisterRequest>>,
) -> ApiResult<Account> {
    let body = body.map(|Json(b)| b).unwrap_or_default();
    let display_name = body
        .display_name
        .or(caller.display_name)
        .unwrap_or_else(|| format!("user{}", caller.id));
    let username = caller.username.or(body.username);
    let referrer = body.start.as_deref().and_then(parse_referral_payload);

    let account = run(&state, move |ex| {
        ex.register(caller.id, &display_name, username.as_deref(), referrer)
    })
    .await?;
    Ok(Json(ApiResponse::ok(account)))
}

/// GET /api/accounts/me
async fn get_me(State(state): State<AppState>, caller: Caller) -> ApiResult<Account> {
    let account = run(&state, move |ex| {
        ex.get_account(caller.id)?.ok_or(ExchangeError::NotFound {
            entity: "account",
            id: caller.id,
        })
    })
    .await?;
    Ok(Json(ApiResponse::ok(account)))
}

/// GET /api/accounts/me/referrals
async fn get_referrals(State(state): State<AppState>, caller: Caller) -> ApiResult<ReferralSummary> {
    let summary = run(&state, move |ex| ex.referral_summary(caller.id)).await?;
    Ok(Json(ApiResponse::ok(summary)))
}

/// GET /api/accounts/me/listings - Caller's listings in every status
async fn my_listings(State(state): State<AppState>, caller: Caller) -> ApiResult<Vec<Listing>> {
    let listings = run(&state, move |ex| ex.listings_by_owner(caller.id)).await?;
    Ok(Json(ApiResponse::ok(listings)))
}

/// GET /api/links - Bot, website, referral and (VIP only) private chat links
async fn links(State(state): State<AppState>, caller: Caller) -> ApiResult<AccountLinks> {
    let links = run(&state, move |ex| ex.links_for(caller.id)).await?;
    Ok(Json(ApiResponse::ok(links)))
}

/// GET /api/accounts/:id - Public profile
async fn get_account(State(state): State<AppState>, Path(id): Path<i64>) -> ApiResult<Account> {
    let account = run(&state, move |ex| {
        ex.get_account(id)?.ok_or(ExchangeError::NotFound { entity: "account", id })
    })
    .await?;
    Ok(Json(ApiResponse::ok(account)))
}

/// GET /api/accounts/:id/reviews - Rating summary plus the reviews behind it
async fn get_reviews(State(state): State<AppState>, Path(id): Path<i64>) -> ApiResult<ReviewsView> {
    let view = run(&state, move |ex| {
        Ok(ReviewsView {
            summary: ex.rating_summary(id)?,
            reviews: ex.reviews_for(id)?,
        })
    })
    .await?;
    Ok(Json(ApiResponse::ok(view)))
}

/// POST /api/vip - Buy one VIP period
async fn buy_vip(State(state): State<AppState>, caller: Caller) -> ApiResult<Account> {
    let account = run(&state, move |ex| ex.buy_vip(caller.id)).await?;
    Ok(Json(ApiResponse::ok(account)))
}

/// GET /api/listings?limit=&offset= - Browse active listings
async fn browse_listings(
    State(state): State<AppState>,
    Query(page): Query<PageQuery>,
) -> ApiResult<Vec<Listing>> {
    let limit = page.limit.unwrap_or(DEFAULT_PAGE_SIZE).min(MAX_PAGE_SIZE);
    let offset = page.offset.unwrap_or(0);
    let listings = run(&state, move |ex| ex.list_active(limit, offset)).await?;
    Ok(Json(ApiResponse::ok(listings)))
}

/// POST /api/listings - Publish a listing
async fn create_listing(
    State(state): State<AppState>,
    caller: Caller,
    Json(draft): Json<ListingDraft>,
) -> ApiResult<Listing> {
    let listing = run(&state, move |ex| ex.publish_draft(caller.id, &draft)).await?;
    Ok(Json(ApiResponse::ok(listing)))
}

/// POST /api/sell - Feed one answer into the sell form
///
/// Publishes the listing on the answer that completes the form; a finished
/// form sent again is re-prompted, never published twice.
async fn sell(
    State(state): State<AppState>,
    caller: Caller,
    body: Option<Json<SellRequest>>,
) -> ApiResult<SellResponse> {
    let SellRequest { form, input } = body.map(|Json(b)| b).unwrap_or_default();
    let mut form = form.unwrap_or_default();

    let (error, completed) = match input {
        Some(text) => match form.submit(&text) {
            SellStep::Advanced(SellState::Complete) => (None, true),
            SellStep::Advanced(_) => (None, false),
            SellStep::Reprompt(e) => (Some(e.to_string()), false),
        },
        None => (None, false),
    };

    let listing = match form.clone().into_draft().filter(|_| completed) {
        Some(draft) => Some(run(&state, move |ex| ex.publish_draft(caller.id, &draft)).await?),
        None => None,
    };

    Ok(Json(ApiResponse::ok(SellResponse {
        step: form.state().step_number(),
        total_steps: SELL_STEPS,
        prompt: form.prompt_text(),
        error,
        listing,
        form,
    })))
}

/// GET /api/listings/:id - Detail view (counts a view)
async fn view_listing(State(state): State<AppState>, Path(id): Path<i64>) -> ApiResult<ListingCard> {
    let card = run(&state, move |ex| {
        ex.increment_views(id);
        ex.listing_card(id)?
            .ok_or(ExchangeError::ListingNotFound { listing_id: id })
    })
    .await?;
    Ok(Json(ApiResponse::ok(card)))
}

/// DELETE /api/listings/:id - Owner withdraws a listing
async fn cancel_listing(
    State(state): State<AppState>,
    caller: Caller,
    Path(id): Path<i64>,
) -> ApiResult<Listing> {
    let listing = run(&state, move |ex| ex.cancel_listing(id, caller.id)).await?;
    Ok(Json(ApiResponse::ok(listing)))
}

/// POST /api/listings/:id/purchase
async fn purchase(
    State(state): State<AppState>,
    caller: Caller,
    Path(id): Path<i64>,
) -> ApiResult<Transaction> {
    let record = run(&state, move |ex| ex.purchase(id, caller.id)).await?;
    Ok(Json(ApiResponse::ok(record)))
}

/// GET /api/transactions - Caller's deals
async fn my_transactions(State(state): State<AppState>, caller: Caller) -> ApiResult<Vec<Transaction>> {
    let records = run(&state, move |ex| ex.transactions_for(caller.id)).await?;
    Ok(Json(ApiResponse::ok(records)))
}

/// POST /api/transactions/:id/dispute
async fn dispute(
    State(state): State<AppState>,
    caller: Caller,
    Path(id): Path<i64>,
) -> ApiResult<Transaction> {
    let record = run(&state, move |ex| ex.dispute(id, caller.id)).await?;
    Ok(Json(ApiResponse::ok(record)))
}

/// POST /api/reviews
async fn create_review(
    State(state): State<AppState>,
    caller: Caller,
    Json(req): Json<ReviewRequest>,
) -> ApiResult<Review> {
    let review = run(&state, move |ex| {
        ex.record_review(caller.id, req.subject_id, req.transaction_id, req.rating, &req.comment)
    })
    .await?;
    Ok(Json(ApiResponse::ok(review)))
}

/// GET /api/notifications - Unread notifications
async fn notifications(State(state): State<AppState>, caller: Caller) -> ApiResult<Vec<Notification>> {
    let unread = run(&state, move |ex| ex.unread_notifications(caller.id)).await?;
    Ok(Json(ApiResponse::ok(unread)))
}

/// POST /api/notifications/:id/read
async fn mark_read(
    State(state): State<AppState>,
    caller: Caller,
    Path(id): Path<i64>,
) -> ApiResult<bool> {
    run(&state, move |ex| ex.mark_notification_read(id, caller.id)).await?;
    Ok(Json(ApiResponse::ok(true)))
}

/// GET /api/admin/stats
async fn admin_stats(State(state): State<AppState>, caller: Caller) -> ApiResult<AdminStats> {
    let stats = run(&state, move |ex| {
        if !ex.is_admin(caller.id)? {
            return Ok(None);
        }
        ex.admin_stats().map(Some)
    })
    .await?
    .ok_or(ApiError::Forbidden)?;
    Ok(Json(ApiResponse::ok(stats)))
}

// ============================================================================
// ROUTER
// ============================================================================

/// Build the full application router
pub fn router(exchange: Exchange) -> Router {
    let state = AppState { exchange };

    let api_routes = Router::new()
        .route("/health", get(health_check))
        .route("/accounts", post(register))
        .route("/accounts/me", get(get_me))
        .route("/accounts/me/referrals", get(get_referrals))
        .route("/accounts/me/listings", get(my_listings))
        .route("/links", get(links))
        .route("/accounts/:id", get(get_account))
        .route("/accounts/:id/reviews", get(get_reviews))
        .route("/vip", post(buy_vip))
        .route("/listings", get(browse_listings).post(create_listing))
        .route("/listings/:id", get(view_listing).delete(cancel_listing))
        .route("/listings/:id/purchase", post(purchase))
        .route("/sell", post(sell))
        .route("/transactions", get(my_transactions))
        .route("/transactions/:id/dispute", post(dispute))
        .route("/reviews", post(create_review))
        .route("/notifications", get(notifications))
        .route("/notifications/:id/read", post(mark_read))
        .route("/admin/stats", get(admin_stats))
        .with_state(state);

    Router::new()
        .nest("/api", api_routes)
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
}

// ============================================================================
// TESTS
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ExchangeConfig;
    use axum::body::Body;
    use axum::http::{Method, Request};
    use serde_json::{json, Value};
    use tower::ServiceExt;

    fn app() -> (Router, Exchange) {
        let config = ExchangeConfig {
            admin_ids: vec![1],
            ..ExchangeConfig::default()
        };
        let exchange = Exchange::in_memory(config).unwrap();
        (router(exchange.clone()), exchange)
    }

    async fn call(app: &Router, method: Method, uri: &str, caller: Option<i64>, body: Option<Value>) -> (StatusCode, Value) {
        let mut req = Request::builder().method(method).uri(uri);
        if let Some(id) = caller {
            req = req.header(ACCOUNT_ID_HEADER, id.to_string());
        }
        let req = match body {
            Some(body) => req
                .header("content-type", "application/json")
                .body(Body::from(body.to_string()))
                .unwrap(),
            None => req.body(Body::empty()).unwrap(),
        };

        let response = app.clone().oneshot(req).await.unwrap();
        let status = response.status();
        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX).await.unwrap();
        let value = serde_json::from_slice(&bytes).unwrap_or(Value::Null);
        (status, value)
    }

    #[tokio::test]
    async fn test_health() {
        let (app, _) = app();
        let (status, body) = call(&app, Method::GET, "/api/health", None, None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["data"], "OK");
    }

    #[tokio::test]
    async fn test_register_with_referral() {
        let (app, exchange) = app();
        call(&app, Method::POST, "/api/accounts", Some(1), Some(json!({"display_name": "Host"}))).await;

        let (status, body) = call(
            &app,
            Method::POST,
            "/api/accounts",
            Some(2),
            Some(json!({"display_name": "Guest", "start": "ref_1"})),
        )
        .await;

        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["data"]["balance"], 100);
        assert_eq!(body["data"]["referrer_id"], 1);
        assert_eq!(exchange.get_account(1).unwrap().unwrap().balance, 150);
    }

    #[tokio::test]
    async fn test_missing_caller_is_unauthorized() {
        let (app, _) = app();
        let (status, body) = call(&app, Method::GET, "/api/accounts/me", None, None).await;
        assert_eq!(status, StatusCode::UNAUTHORIZED);
        assert_eq!(body["kind"], "unauthorized");
    }

    #[tokio::test]
    async fn test_listing_purchase_flow() {
        let (app, exchange) = app();
        exchange.get_or_create(1, "Seller", None).unwrap();
        exchange.get_or_create(2, "Buyer", None).unwrap();

        let (status, body) = call(
            &app,
            Method::POST,
            "/api/listings",
            Some(1),
            Some(json!({
                "price": 100,
                "item_name": "AK-47 | Redline",
                "quality": "Field-Tested",
                "external_link": "https://steamcommunity.com/market"
            })),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        let id = body["data"]["id"].as_i64().unwrap();

        let (status, body) = call(&app, Method::GET, &format!("/api/listings/{}", id), None, None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["data"]["seller_name"], "Seller");

        let (status, body) = call(&app, Method::POST, &format!("/api/listings/{}/purchase", id), Some(2), None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["data"]["amount"], 100);

        let (status, body) = call(&app, Method::POST, &format!("/api/listings/{}/purchase", id), Some(2), None).await;
        assert_eq!(status, StatusCode::CONFLICT);
        assert_eq!(body["kind"], "listing_unavailable");

        let (_, body) = call(&app, Method::GET, "/api/notifications", Some(1), None).await;
        assert_eq!(body["data"][0]["kind"], "listing_sold");
    }

    #[tokio::test]
    async fn test_insufficient_funds_maps_to_payment_required() {
        let (app, exchange) = app();
        exchange.get_or_create(1, "Seller", None).unwrap();
        exchange.get_or_create(2, "Buyer", None).unwrap();
        let listing = exchange
            .create_listing(1, 500, &crate::entities::ListingMetadata::default())
            .unwrap();

        let (status, body) = call(
            &app,
            Method::POST,
            &format!("/api/listings/{}/purchase", listing.id),
            Some(2),
            None,
        )
        .await;
        assert_eq!(status, StatusCode::PAYMENT_REQUIRED);
        assert_eq!(body["kind"], "insufficient_funds");
        assert_eq!(body["success"], false);
    }

    #[tokio::test]
    async fn test_admin_stats_requires_admin() {
        let (app, exchange) = app();
        exchange.get_or_create(1, "Admin", None).unwrap();
        exchange.get_or_create(2, "User", None).unwrap();

        let (status, _) = call(&app, Method::GET, "/api/admin/stats", Some(2), None).await;
        assert_eq!(status, StatusCode::FORBIDDEN);

        let (status, body) = call(&app, Method::GET, "/api/admin/stats", Some(1), None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["data"]["users"], 2);
        assert_eq!(body["data"]["total_coins"], 200);
    }

    #[tokio::test]
    async fn test_init_data_required_when_token_configured() {
        let config = ExchangeConfig {
            bot_token: Some("42:SECRET".to_string()),
            ..ExchangeConfig::default()
        };
        let app = router(Exchange::in_memory(config).unwrap());

        // X-Account-Id is ignored once a token is configured
        let (status, _) = call(&app, Method::GET, "/api/accounts/me", Some(7), None).await;
        assert_eq!(status, StatusCode::UNAUTHORIZED);

        let mut fields = std::collections::BTreeMap::new();
        fields.insert("auth_date".to_string(), "1".to_string());
        fields.insert("user".to_string(), r#"{"id":7,"first_name":"Ann"}"#.to_string());
        let hash = crate::auth::sign_fields(&fields, "42:SECRET");
        let init = format!(
            "auth_date=1&user={}&hash={}",
            urlencoding::encode(r#"{"id":7,"first_name":"Ann"}"#),
            hash
        );

        let req = Request::builder()
            .method(Method::POST)
            .uri("/api/accounts")
            .header(INIT_DATA_HEADER, init)
            .body(Body::empty())
            .unwrap();
        let response = app.clone().oneshot(req).await.unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX).await.unwrap();
        let body: Value = serde_json::from_slice(&bytes).unwrap();
        assert_eq!(body["data"]["id"], 7);
        assert_eq!(body["data"]["display_name"], "Ann");
    }

    #[tokio::test]
    async fn test_register_keeps_username() {
        let (app, exchange) = app();

        let (status, body) = call(
            &app,
            Method::POST,
            "/api/accounts",
            Some(5),
            Some(json!({"display_name": "Eve", "username": "eve_skins"})),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["data"]["username"], "eve_skins");
        assert_eq!(
            exchange.get_account(5).unwrap().unwrap().username.as_deref(),
            Some("eve_skins")
        );
    }

    #[tokio::test]
    async fn test_sell_conversation_publishes_once() {
        let (app, exchange) = app();
        exchange.get_or_create(3, "Seller", None).unwrap();

        let (status, body) = call(&app, Method::POST, "/api/sell", Some(3), Some(json!({}))).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["data"]["step"], 1);
        assert_eq!(body["data"]["total_steps"], 4);
        let mut form = body["data"]["form"].clone();

        for input in ["AWP | Asiimov", "Battle-Scarred", "cheap"] {
            let (_, body) = call(
                &app,
                Method::POST,
                "/api/sell",
                Some(3),
                Some(json!({"form": form, "input": input})),
            )
            .await;
            form = body["data"]["form"].clone();
            if input == "cheap" {
                assert_eq!(body["data"]["step"], 3);
                assert!(body["data"]["error"].as_str().unwrap().contains("price"));
            }
        }

        for input in ["700", "no link"] {
            let (_, body) = call(
                &app,
                Method::POST,
                "/api/sell",
                Some(3),
                Some(json!({"form": form, "input": input})),
            )
            .await;
            form = body["data"]["form"].clone();
            if input == "no link" {
                assert_eq!(body["data"]["step"], Value::Null);
                assert_eq!(body["data"]["listing"]["price"], 700);
                assert_eq!(body["data"]["listing"]["item_name"], "AWP | Asiimov");
            }
        }

        // Replaying the finished form does not publish again
        let (_, body) = call(
            &app,
            Method::POST,
            "/api/sell",
            Some(3),
            Some(json!({"form": form, "input": "again"})),
        )
        .await;
        assert_eq!(body["data"]["listing"], Value::Null);
        assert!(body["data"]["error"].is_string());
        assert_eq!(exchange.listings_by_owner(3).unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_my_listings_include_cancelled() {
        let (app, exchange) = app();
        exchange.get_or_create(1, "Seller", None).unwrap();
        let metadata = crate::entities::ListingMetadata::default();
        let first = exchange.create_listing(1, 10, &metadata).unwrap();
        exchange.create_listing(1, 20, &metadata).unwrap();
        exchange.cancel_listing(first.id, 1).unwrap();

        let (status, body) = call(&app, Method::GET, "/api/accounts/me/listings", Some(1), None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["data"].as_array().unwrap().len(), 2);

        let (_, body) = call(&app, Method::GET, "/api/listings", None, None).await;
        assert_eq!(body["data"].as_array().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_reviews_include_summary() {
        let (app, exchange) = app();
        exchange.get_or_create(1, "Seller", None).unwrap();
        exchange.get_or_create(2, "Buyer", None).unwrap();
        let listing = exchange
            .create_listing(1, 50, &crate::entities::ListingMetadata::default())
            .unwrap();
        let deal = exchange.purchase(listing.id, 2).unwrap();
        exchange.record_review(2, 1, deal.id, 4, "fine").unwrap();

        let (status, body) = call(&app, Method::GET, "/api/accounts/1/reviews", None, None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["data"]["summary"]["count"], 1);
        assert_eq!(body["data"]["summary"]["mean"], 4.0);
        assert_eq!(body["data"]["reviews"][0]["comment"], "fine");
    }

    #[tokio::test]
    async fn test_links_endpoint() {
        let config = ExchangeConfig {
            website_url: Some("https://skins.example".to_string()),
            vip_chat_link: Some("https://t.me/+vipchat".to_string()),
            ..ExchangeConfig::default()
        };
        let exchange = Exchange::in_memory(config).unwrap();
        let app = router(exchange.clone());
        exchange.get_or_create(8, "Trader", None).unwrap();

        let (status, body) = call(&app, Method::GET, "/api/links", Some(8), None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["data"]["website"], "https://skins.example");
        assert_eq!(body["data"]["vip_chat"], Value::Null);
        assert_eq!(body["data"]["referral"], "https://t.me/shizogp_bot?start=ref_8");

        exchange.grant_vip(8, 30).unwrap();
        let (_, body) = call(&app, Method::GET, "/api/links", Some(8), None).await;
        assert_eq!(body["data"]["vip_chat"], "https://t.me/+vipchat");
    }

    #[tokio::test]
    async fn test_mark_read_rejects_other_users_notification() {
        let (app, exchange) = app();
        exchange.get_or_create(1, "Alice", None).unwrap();
        exchange.get_or_create(2, "Mallory", None).unwrap();
        let id = exchange
            .notify(1, "system", "Hi", "Welcome", json!({}))
            .unwrap();

        let uri = format!("/api/notifications/{}/read", id);
        let (status, body) = call(&app, Method::POST, &uri, Some(2), None).await;
        assert_eq!(status, StatusCode::NOT_FOUND);
        assert_eq!(body["kind"], "not_found");
        assert_eq!(exchange.unread_notifications(1).unwrap().len(), 1);

        let (status, _) = call(&app, Method::POST, &uri, Some(1), None).await;
        assert_eq!(status, StatusCode::OK);
        assert!(exchange.unread_notifications(1).unwrap().is_empty());
    }

    #[test]
    fn test_range_errors_are_unprocessable() {
        assert_eq!(status_for(ErrorKind::AmountOutOfRange), StatusCode::UNPROCESSABLE_ENTITY);
        assert_eq!(status_for(ErrorKind::InvalidDuration), StatusCode::UNPROCESSABLE_ENTITY);
    }
}
