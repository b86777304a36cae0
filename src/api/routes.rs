use std::sync::Arc;

use axum::{
    extract::{Path, State},
    http::StatusCode,
    routing::{delete, get, post, put},
    Json, Router,
};
use serde::{Deserialize, Serialize};

use crate::accounts::{AccountBook, AdminAuth};
use crate::api::health::HealthState;
use crate::engine::{Catalog, SettlementPreview, SettlementReport, TransactionEngine, WagerEngine};
use crate::error::AppError;
use crate::state::SiteState;
use crate::types::{
    AccountView, Bet, BetOutcome, BetStatus, BettingOption, CurrencySettings, LiveStream,
    NewBettingOption, NewLiveStream, Side, StreamStatus, Transaction, TxStatus,
};

#[derive(Clone)]
pub struct ApiState {
    pub state: Arc<SiteState>,
    pub accounts: Arc<AccountBook>,
    pub admin: Arc<AdminAuth>,
    pub wagers: Arc<WagerEngine>,
    pub transactions: Arc<TransactionEngine>,
    pub catalog: Arc<Catalog>,
    pub health: Arc<HealthState>,
}

type ApiResult<T> = Result<Json<T>, AppError>;

pub fn router(state: ApiState) -> Router {
    Router::new()
        .route("/health", get(get_health))
        // Accounts
        .route("/auth/signup", post(sign_up))
        .route("/auth/signin", post(sign_in))
        .route("/auth/signout", post(sign_out))
        .route("/account", get(get_account))
        .route("/account/profile", put(update_profile))
        .route("/account/password", put(change_password))
        .route("/account/bets", get(get_my_bets))
        .route("/account/transactions", get(get_my_transactions))
        // Public catalog
        .route("/options", get(get_options))
        .route("/streams", get(get_streams))
        .route("/currency", get(get_currency))
        // User actions
        .route("/bets", post(place_bet))
        .route("/deposits", post(request_deposit))
        .route("/withdrawals", post(request_withdraw))
        // Admin
        .route("/admin/signin", post(admin_sign_in))
        .route("/admin/signout", post(admin_sign_out))
        .route("/admin/credentials", put(admin_change_credentials))
        .route("/admin/users", get(admin_list_users))
        .route("/admin/users/:email", put(admin_update_user).delete(admin_delete_user))
        .route("/admin/users/:email/reset", post(admin_reset_balance))
        .route("/admin/transactions", get(admin_list_transactions))
        .route("/admin/transactions/:id/approve", post(admin_approve_transaction))
        .route("/admin/transactions/:id/reject", post(admin_reject_transaction))
        .route("/admin/transactions/:id/notes", put(admin_update_notes))
        .route("/admin/bets", get(admin_list_bets))
        .route("/admin/bets/preview", post(admin_preview_settlement))
        .route("/admin/bets/confirm", post(admin_confirm_settlement))
        .route("/admin/bets/settle-all", post(admin_settle_all))
        .route("/admin/bets/:id/settle", post(admin_settle_bet))
        .route("/admin/options", post(admin_add_option).put(admin_replace_options))
        .route("/admin/options/:id", put(admin_update_option).delete(admin_delete_option))
        .route("/admin/options/:id/toggle-active", post(admin_toggle_active))
        .route("/admin/options/:id/toggle-stream", post(admin_toggle_stream))
        .route("/admin/streams", post(admin_add_stream).put(admin_replace_streams))
        .route("/admin/streams/mobile", post(admin_start_mobile_stream))
        .route("/admin/streams/:id", delete(admin_delete_stream))
        .route("/admin/streams/:id/toggle", post(admin_toggle_stream_status))
        .route("/admin/streams/:id/status", put(admin_set_stream_status))
        .route("/admin/currency", put(admin_update_currency))
        .route("/admin/notifications", get(admin_notifications))
        .route("/admin/notifications/clear", post(admin_clear_notifications))
        .with_state(state)
}

// ---------------------------------------------------------------------------
// Request bodies
// ---------------------------------------------------------------------------

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SignUpRequest {
    pub name: String,
    pub email: String,
    pub password: String,
    pub confirm_password: String,
}

#[derive(Deserialize)]
pub struct SignInRequest {
    pub email: String,
    pub password: String,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProfileRequest {
    pub name: String,
    pub profile_image: Option<String>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PasswordRequest {
    pub current_password: String,
    pub new_password: String,
    pub confirm_password: String,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PlaceBetRequest {
    pub event_id: u64,
    pub selection: String,
    pub amount: f64,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DepositRequest {
    pub amount: f64,
    pub receipt_image: Option<String>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WithdrawRequest {
    pub amount: f64,
    pub phone_number: String,
}

#[derive(Deserialize)]
pub struct AdminSignInRequest {
    pub username: String,
    pub password: String,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AdminCredentialsRequest {
    pub current_password: String,
    pub username: String,
    pub new_password: String,
    pub confirm_password: String,
}

#[derive(Deserialize)]
pub struct AdminUserRequest {
    pub name: String,
    pub balance: f64,
}

#[derive(Deserialize)]
pub struct NotesRequest {
    pub notes: Option<String>,
}

#[derive(Deserialize)]
pub struct SettleRequest {
    pub outcome: BetOutcome,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PreviewRequest {
    pub event_id: u64,
    pub side: Side,
}

#[derive(Deserialize)]
pub struct StreamStatusRequest {
    pub status: StreamStatus,
}

// ---------------------------------------------------------------------------
// Response types
// ---------------------------------------------------------------------------

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
pub struct HealthResponse {
    pub accounts: usize,
    pub pending_bets: usize,
    pub pending_transactions: usize,
    pub write_queue_pending: u64,
    pub last_write_at_ms: u64,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
pub struct NotificationsResponse {
    pub has_new_notifications: bool,
    pub pending_transactions: usize,
}

// ---------------------------------------------------------------------------
// Handlers: accounts
// ---------------------------------------------------------------------------

async fn get_health(State(s): State<ApiState>) -> Json<HealthResponse> {
    Json(HealthResponse {
        accounts: s.accounts.account_count(),
        pending_bets: s.state.bets().iter().filter(|b| b.status == BetStatus::Pending).count(),
        pending_transactions: pending_transactions(&s.state),
        write_queue_pending: s.health.write_queue_pending(),
        last_write_at_ms: s.health.last_write_at_ms(),
    })
}

fn pending_transactions(state: &SiteState) -> usize {
    state
        .transactions()
        .iter()
        .filter(|t| t.status == TxStatus::Pending)
        .count()
}

async fn sign_up(
    State(s): State<ApiState>,
    Json(req): Json<SignUpRequest>,
) -> Result<(StatusCode, Json<AccountView>), AppError> {
    let view = s
        .accounts
        .sign_up(&req.name, &req.email, &req.password, &req.confirm_password)?;
    Ok((StatusCode::CREATED, Json(view)))
}

async fn sign_in(State(s): State<ApiState>, Json(req): Json<SignInRequest>) -> ApiResult<AccountView> {
    Ok(Json(s.accounts.sign_in(&req.email, &req.password)?))
}

async fn sign_out(State(s): State<ApiState>) -> Result<StatusCode, AppError> {
    let session = s.accounts.session().ok_or(AppError::NotAuthenticated)?;
    s.accounts.sign_out(&session.email)?;
    Ok(StatusCode::NO_CONTENT)
}

async fn get_account(State(s): State<ApiState>) -> ApiResult<AccountView> {
    let account = s.accounts.require_current()?;
    Ok(Json(AccountView::from(&account)))
}

async fn update_profile(
    State(s): State<ApiState>,
    Json(req): Json<ProfileRequest>,
) -> ApiResult<AccountView> {
    let account = s.accounts.require_current()?;
    Ok(Json(s.accounts.update_profile(&account.email, &req.name, req.profile_image)?))
}

async fn change_password(
    State(s): State<ApiState>,
    Json(req): Json<PasswordRequest>,
) -> Result<StatusCode, AppError> {
    let account = s.accounts.require_current()?;
    s.accounts.change_password(
        &account.email,
        &req.current_password,
        &req.new_password,
        &req.confirm_password,
    )?;
    Ok(StatusCode::NO_CONTENT)
}

async fn get_my_bets(State(s): State<ApiState>) -> ApiResult<Vec<Bet>> {
    let account = s.accounts.require_current()?;
    Ok(Json(s.wagers.bets_for_user(&account.email)))
}

async fn get_my_transactions(State(s): State<ApiState>) -> ApiResult<Vec<Transaction>> {
    let account = s.accounts.require_current()?;
    Ok(Json(s.transactions.transactions_for_user(&account.email)))
}

// ---------------------------------------------------------------------------
// Handlers: catalog and user actions
// ---------------------------------------------------------------------------

async fn get_options(State(s): State<ApiState>) -> Json<Vec<BettingOption>> {
    Json(s.state.betting_options())
}

async fn get_streams(State(s): State<ApiState>) -> Json<Vec<LiveStream>> {
    Json(s.state.live_streams())
}

async fn get_currency(State(s): State<ApiState>) -> Json<CurrencySettings> {
    Json(s.state.currency_settings())
}

async fn place_bet(
    State(s): State<ApiState>,
    Json(req): Json<PlaceBetRequest>,
) -> Result<(StatusCode, Json<Bet>), AppError> {
    let session = s.accounts.session();
    let bet = s.wagers.place_bet(
        session.as_ref().map(|x| x.email.as_str()),
        req.event_id,
        &req.selection,
        req.amount,
    )?;
    Ok((StatusCode::CREATED, Json(bet)))
}

async fn request_deposit(
    State(s): State<ApiState>,
    Json(req): Json<DepositRequest>,
) -> Result<(StatusCode, Json<Transaction>), AppError> {
    let session = s.accounts.session();
    let tx = s.transactions.request_deposit(
        session.as_ref().map(|x| x.email.as_str()),
        req.amount,
        req.receipt_image,
    )?;
    Ok((StatusCode::CREATED, Json(tx)))
}

async fn request_withdraw(
    State(s): State<ApiState>,
    Json(req): Json<WithdrawRequest>,
) -> Result<(StatusCode, Json<Transaction>), AppError> {
    let session = s.accounts.session();
    let tx = s.transactions.request_withdraw(
        session.as_ref().map(|x| x.email.as_str()),
        req.amount,
        &req.phone_number,
    )?;
    Ok((StatusCode::CREATED, Json(tx)))
}

// ---------------------------------------------------------------------------
// Handlers: admin
// ---------------------------------------------------------------------------

async fn admin_sign_in(
    State(s): State<ApiState>,
    Json(req): Json<AdminSignInRequest>,
) -> Result<StatusCode, AppError> {
    s.admin.sign_in(&req.username, &req.password)?;
    Ok(StatusCode::NO_CONTENT)
}

async fn admin_sign_out(State(s): State<ApiState>) -> StatusCode {
    s.admin.sign_out();
    StatusCode::NO_CONTENT
}

async fn admin_change_credentials(
    State(s): State<ApiState>,
    Json(req): Json<AdminCredentialsRequest>,
) -> Result<StatusCode, AppError> {
    s.admin.require()?;
    s.admin.change_credentials(
        &req.current_password,
        &req.username,
        &req.new_password,
        &req.confirm_password,
    )?;
    Ok(StatusCode::NO_CONTENT)
}

async fn admin_list_users(State(s): State<ApiState>) -> ApiResult<Vec<AccountView>> {
    s.admin.require()?;
    Ok(Json(s.accounts.all_accounts().iter().map(AccountView::from).collect()))
}

async fn admin_update_user(
    State(s): State<ApiState>,
    Path(email): Path<String>,
    Json(req): Json<AdminUserRequest>,
) -> ApiResult<AccountView> {
    s.admin.require()?;
    Ok(Json(s.accounts.admin_update(&email, &req.name, req.balance)?))
}

async fn admin_reset_balance(
    State(s): State<ApiState>,
    Path(email): Path<String>,
) -> Result<StatusCode, AppError> {
    s.admin.require()?;
    s.accounts.reset_balance(&email)?;
    Ok(StatusCode::NO_CONTENT)
}

async fn admin_delete_user(
    State(s): State<ApiState>,
    Path(email): Path<String>,
) -> Result<StatusCode, AppError> {
    s.admin.require()?;
    s.accounts.delete_account(&email)?;
    Ok(StatusCode::NO_CONTENT)
}

async fn admin_list_transactions(State(s): State<ApiState>) -> ApiResult<Vec<Transaction>> {
    s.admin.require()?;
    let mut txs = s.state.transactions();
    txs.sort_by(|a, b| b.timestamp.cmp(&a.timestamp));
    Ok(Json(txs))
}

async fn admin_approve_transaction(
    State(s): State<ApiState>,
    Path(id): Path<String>,
    body: Option<Json<NotesRequest>>,
) -> ApiResult<Transaction> {
    s.admin.require()?;
    let notes = body.and_then(|Json(req)| req.notes);
    Ok(Json(s.transactions.approve_transaction(&id, notes)?))
}

async fn admin_reject_transaction(
    State(s): State<ApiState>,
    Path(id): Path<String>,
    body: Option<Json<NotesRequest>>,
) -> ApiResult<Transaction> {
    s.admin.require()?;
    let notes = body.and_then(|Json(req)| req.notes);
    Ok(Json(s.transactions.reject_transaction(&id, notes)?))
}

async fn admin_update_notes(
    State(s): State<ApiState>,
    Path(id): Path<String>,
    Json(req): Json<NotesRequest>,
) -> ApiResult<Transaction> {
    s.admin.require()?;
    Ok(Json(s.transactions.update_notes(&id, req.notes.unwrap_or_default())?))
}

async fn admin_list_bets(State(s): State<ApiState>) -> ApiResult<Vec<Bet>> {
    s.admin.require()?;
    let mut bets = s.state.bets();
    bets.sort_by(|a, b| b.timestamp.cmp(&a.timestamp));
    Ok(Json(bets))
}

async fn admin_settle_bet(
    State(s): State<ApiState>,
    Path(id): Path<String>,
    Json(req): Json<SettleRequest>,
) -> ApiResult<Bet> {
    s.admin.require()?;
    Ok(Json(s.wagers.settle_bet(&id, req.outcome)?))
}

async fn admin_preview_settlement(
    State(s): State<ApiState>,
    Json(req): Json<PreviewRequest>,
) -> ApiResult<SettlementPreview> {
    s.admin.require()?;
    Ok(Json(s.wagers.preview_settlement(req.event_id, req.side)?))
}

async fn admin_confirm_settlement(
    State(s): State<ApiState>,
    Json(preview): Json<SettlementPreview>,
) -> ApiResult<SettlementReport> {
    s.admin.require()?;
    Ok(Json(s.wagers.confirm_settlement(&preview)?))
}

async fn admin_settle_all(
    State(s): State<ApiState>,
    Json(req): Json<PreviewRequest>,
) -> ApiResult<SettlementReport> {
    s.admin.require()?;
    Ok(Json(s.wagers.settle_all_pending(req.event_id, req.side)?))
}

async fn admin_replace_options(
    State(s): State<ApiState>,
    Json(options): Json<Vec<BettingOption>>,
) -> ApiResult<Vec<BettingOption>> {
    s.admin.require()?;
    Ok(Json(s.catalog.replace_options(options)?))
}

async fn admin_replace_streams(
    State(s): State<ApiState>,
    Json(streams): Json<Vec<LiveStream>>,
) -> ApiResult<Vec<LiveStream>> {
    s.admin.require()?;
    Ok(Json(s.catalog.replace_streams(streams)?))
}

async fn admin_add_option(
    State(s): State<ApiState>,
    Json(req): Json<NewBettingOption>,
) -> Result<(StatusCode, Json<BettingOption>), AppError> {
    s.admin.require()?;
    Ok((StatusCode::CREATED, Json(s.catalog.add_option(req)?)))
}

async fn admin_update_option(
    State(s): State<ApiState>,
    Path(id): Path<u64>,
    Json(mut option): Json<BettingOption>,
) -> ApiResult<BettingOption> {
    s.admin.require()?;
    option.id = id;
    Ok(Json(s.catalog.update_option(option)?))
}

async fn admin_delete_option(
    State(s): State<ApiState>,
    Path(id): Path<u64>,
) -> Result<StatusCode, AppError> {
    s.admin.require()?;
    s.catalog.delete_option(id)?;
    Ok(StatusCode::NO_CONTENT)
}

async fn admin_toggle_active(State(s): State<ApiState>, Path(id): Path<u64>) -> ApiResult<BettingOption> {
    s.admin.require()?;
    Ok(Json(s.catalog.toggle_active(id)?))
}

async fn admin_toggle_stream(State(s): State<ApiState>, Path(id): Path<u64>) -> ApiResult<BettingOption> {
    s.admin.require()?;
    Ok(Json(s.catalog.toggle_live_stream(id)?))
}

async fn admin_add_stream(
    State(s): State<ApiState>,
    Json(req): Json<NewLiveStream>,
) -> Result<(StatusCode, Json<LiveStream>), AppError> {
    s.admin.require()?;
    Ok((StatusCode::CREATED, Json(s.catalog.add_stream(req)?)))
}

async fn admin_start_mobile_stream(
    State(s): State<ApiState>,
) -> Result<(StatusCode, Json<LiveStream>), AppError> {
    s.admin.require()?;
    Ok((StatusCode::CREATED, Json(s.catalog.start_mobile_stream()?)))
}

async fn admin_delete_stream(
    State(s): State<ApiState>,
    Path(id): Path<u64>,
) -> Result<StatusCode, AppError> {
    s.admin.require()?;
    s.catalog.delete_stream(id)?;
    Ok(StatusCode::NO_CONTENT)
}

async fn admin_toggle_stream_status(
    State(s): State<ApiState>,
    Path(id): Path<u64>,
) -> ApiResult<LiveStream> {
    s.admin.require()?;
    Ok(Json(s.catalog.toggle_stream_status(id)?))
}

async fn admin_set_stream_status(
    State(s): State<ApiState>,
    Path(id): Path<u64>,
    Json(req): Json<StreamStatusRequest>,
) -> ApiResult<LiveStream> {
    s.admin.require()?;
    Ok(Json(s.catalog.set_stream_status(id, req.status)?))
}

async fn admin_update_currency(
    State(s): State<ApiState>,
    Json(settings): Json<CurrencySettings>,
) -> ApiResult<CurrencySettings> {
    s.admin.require()?;
    s.state.replace_currency_settings(settings)?;
    Ok(Json(s.state.currency_settings()))
}

async fn admin_notifications(State(s): State<ApiState>) -> ApiResult<NotificationsResponse> {
    s.admin.require()?;
    Ok(Json(NotificationsResponse {
        has_new_notifications: s.state.has_new_notifications(),
        pending_transactions: pending_transactions(&s.state),
    }))
}

async fn admin_clear_notifications(State(s): State<ApiState>) -> Result<StatusCode, AppError> {
    s.admin.require()?;
    s.state.clear_notifications();
    Ok(StatusCode::NO_CONTENT)
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
