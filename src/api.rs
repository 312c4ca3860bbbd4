use axum::{
    body::Bytes,
    extract::{DefaultBodyLimit, Extension, Json, Path, Query, Request, State},
    http::{header, HeaderMap, StatusCode},
    middleware::{self, Next},
    response::{IntoResponse, Response},
    routing::{delete, get, post, put},
    Router,
};
use constant_time_eq::constant_time_eq;
use serde::{Deserialize, Serialize};
use serde_json::json;
use sqlx::{
    types::{time::OffsetDateTime, uuid::Uuid},
    Pool, Postgres,
};
use std::sync::Arc;
use time::UtcOffset;
use tower::limit::ConcurrencyLimitLayer;
use tower_http::{cors::CorsLayer, limit::RequestBodyLimitLayer, services::ServeDir};
use tracing::{info, warn};

use crate::{
    categories::CategoryStore,
    db,
    error::AppError,
    models::{SessionUser, SubscriptionPlan, UsageType},
    ordering::Direction,
    overlay::{EditorAction, FrameSize, OverlayEditor, OverlayLayout},
    payment::{verify_webhook_signature, CreatePaymentRequest, PaymentService, RazorpayClient, WebhookEvent},
    posts::{build_post, PostDraft},
    remote_config::{ShareLink, UpdateSettings, SHARE_LINK_KEY, UPDATE_SETTINGS_KEY},
    session::{Action, SessionRegistry, SessionState},
    storage::{upload_path, MediaStore},
};

const MAX_UPLOAD_BYTES: usize = 100 * 1024 * 1024;
const MAX_CONCURRENT_REQUESTS: usize = 256;

// API state
pub struct ApiState {
    pub db_pool: Pool<Postgres>,
    pub categories: CategoryStore,
    pub sessions: SessionRegistry,
    pub payments: PaymentService<RazorpayClient>,
    pub media: MediaStore,
    pub media_root: String,
    pub admin_api_key: String,
    pub webhook_secret: Option<String>,
    pub local_offset: UtcOffset,
}

impl ApiState {
    fn local_now(&self) -> OffsetDateTime {
        OffsetDateTime::now_utc().to_offset(self.local_offset)
    }
}

/// Session attached to a request by the auth middleware.
#[derive(Clone)]
struct SessionContext {
    token: String,
    state: SessionState,
}

// Set up API router
pub fn create_api_router(state: Arc<ApiState>) -> Router {
    let admin = Router::new()
        .route("/categories", get(list_categories).post(create_category))
        .route("/categories/dedupe", post(dedupe_categories))
        .route("/categories/:id", put(rename_category).delete(delete_category))
        .route("/categories/:id/move", post(move_category))
        .route("/overlay-presets/:frame", get(overlay_preset))
        .route("/overlay-editor", post(edit_overlay))
        .route("/posts", get(list_posts).post(create_post))
        .route("/posts/:id", delete(delete_post))
        .route("/uploads", put(upload_media))
        .route("/users", get(list_users))
        .route("/users/:id", delete(delete_user))
        .route("/subscription-plans", get(list_plans).post(create_plan))
        .route("/subscription-plans/:id", delete(delete_plan))
        .route("/subscription-plans/:id/active", put(set_plan_active))
        .route("/remote-config", get(get_remote_config).post(update_remote_config))
        .route("/share-link", get(get_share_link).put(update_share_link))
        .route_layer(middleware::from_fn_with_state(state.clone(), require_admin));

    let session = Router::new()
        .route("/session", get(get_session))
        .route("/session/user", put(update_session_user))
        .route("/session/logout", post(logout))
        .route_layer(middleware::from_fn_with_state(state.clone(), require_session));

    Router::new()
        .route("/session/login", post(login))
        .route("/create-payment", post(create_payment))
        .route("/payment-status/:id", get(payment_status))
        .route("/payment-webhook", post(payment_webhook))
        .route("/metrics", get(metrics))
        .merge(admin)
        .merge(session)
        .nest_service("/media", ServeDir::new(&state.media_root))
        .with_state(state)
        .layer(DefaultBodyLimit::disable())
        .layer(RequestBodyLimitLayer::new(MAX_UPLOAD_BYTES))
        .layer(ConcurrencyLimitLayer::new(MAX_CONCURRENT_REQUESTS))
        .layer(CorsLayer::permissive()) // For development - restrict in production
}

fn bearer_token(headers: &HeaderMap) -> Option<String> {
    headers
        .get(header::AUTHORIZATION)?
        .to_str()
        .ok()?
        .strip_prefix("Bearer ")
        .map(|token| token.trim().to_string())
        .filter(|token| !token.is_empty())
}

async fn session_for(state: &ApiState, token: Option<String>) -> Result<SessionContext, AppError> {
    let token = token.ok_or(AppError::Unauthorized)?;
    let session = state.sessions.get(&token).await.ok_or(AppError::Unauthorized)?;
    Ok(SessionContext {
        token,
        state: session,
    })
}

async fn require_session(
    State(state): State<Arc<ApiState>>,
    mut req: Request,
    next: Next,
) -> Result<Response, AppError> {
    let token = bearer_token(req.headers());
    let context = session_for(&state, token).await?;
    req.extensions_mut().insert(context);
    Ok(next.run(req).await)
}

async fn require_admin(
    State(state): State<Arc<ApiState>>,
    mut req: Request,
    next: Next,
) -> Result<Response, AppError> {
    let token = bearer_token(req.headers());
    let context = session_for(&state, token).await?;
    if !context.state.is_admin() {
        return Err(AppError::Unauthorized);
    }
    req.extensions_mut().insert(context);
    Ok(next.run(req).await)
}

// Session handlers

#[derive(Deserialize)]
struct LoginRequest {
    id: String,
    name: String,
    photo: Option<String>,
}

#[derive(Serialize)]
struct LoginResponse {
    token: String,
    session: SessionState,
}

async fn login(
    State(state): State<Arc<ApiState>>,
    headers: HeaderMap,
    Json(req): Json<LoginRequest>,
) -> Result<Json<LoginResponse>, AppError> {
    let supplied = headers
        .get("x-admin-key")
        .and_then(|v| v.to_str().ok())
        .unwrap_or_default();
    if !constant_time_eq(supplied.as_bytes(), state.admin_api_key.as_bytes()) {
        warn!(user_id = %req.id, "Rejected console login with a bad admin key");
        return Err(AppError::Unauthorized);
    }

    let user = SessionUser {
        id: req.id,
        name: req.name,
        photo: req.photo,
        is_admin: true,
    };
    let (token, session) = state.sessions.login(user).await;
    Ok(Json(LoginResponse { token, session }))
}

async fn get_session(Extension(context): Extension<SessionContext>) -> Json<SessionState> {
    Json(context.state)
}

#[derive(Deserialize)]
struct UpdateUserRequest {
    name: String,
    photo: Option<String>,
}

async fn update_session_user(
    State(state): State<Arc<ApiState>>,
    Extension(context): Extension<SessionContext>,
    Json(req): Json<UpdateUserRequest>,
) -> Result<Json<SessionState>, AppError> {
    let current = context.state.user.ok_or(AppError::Unauthorized)?;
    let user = SessionUser {
        name: req.name,
        photo: req.photo,
        ..current
    };
    let session = state
        .sessions
        .dispatch(&context.token, Action::UpdateUser(user))
        .await
        .ok_or(AppError::Unauthorized)?;
    Ok(Json(session))
}

async fn logout(
    State(state): State<Arc<ApiState>>,
    Extension(context): Extension<SessionContext>,
) -> StatusCode {
    state.sessions.dispatch(&context.token, Action::Logout).await;
    StatusCode::NO_CONTENT
}

// Category handlers

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct CategoryNames {
    name_en: String,
    name_kn: String,
}

#[derive(Deserialize)]
#[serde(untagged)]
enum MoveRequest {
    Direction { direction: Direction },
    Position { position: usize },
}

async fn list_categories(State(state): State<Arc<ApiState>>) -> Result<impl IntoResponse, AppError> {
    let categories = state.categories.load(state.local_now()).await?;
    Ok(Json(categories))
}

async fn create_category(
    State(state): State<Arc<ApiState>>,
    Json(req): Json<CategoryNames>,
) -> Result<impl IntoResponse, AppError> {
    let categories = state.categories.create(&req.name_en, &req.name_kn).await?;
    Ok((StatusCode::CREATED, Json(categories)))
}

async fn rename_category(
    State(state): State<Arc<ApiState>>,
    Path(id): Path<Uuid>,
    Json(req): Json<CategoryNames>,
) -> Result<impl IntoResponse, AppError> {
    let categories = state.categories.rename(id, &req.name_en, &req.name_kn).await?;
    Ok(Json(categories))
}

async fn delete_category(
    State(state): State<Arc<ApiState>>,
    Path(id): Path<Uuid>,
) -> Result<impl IntoResponse, AppError> {
    let categories = state.categories.delete(id).await?;
    Ok(Json(categories))
}

async fn move_category(
    State(state): State<Arc<ApiState>>,
    Path(id): Path<Uuid>,
    Json(req): Json<MoveRequest>,
) -> Result<impl IntoResponse, AppError> {
    let categories = match req {
        MoveRequest::Direction { direction } => state.categories.move_in_direction(id, direction).await?,
        MoveRequest::Position { position } => state.categories.move_to(id, position).await?,
    };
    Ok(Json(categories))
}

async fn dedupe_categories(State(state): State<Arc<ApiState>>) -> Result<impl IntoResponse, AppError> {
    let categories = state.categories.dedupe_by_name().await?;
    Ok(Json(categories))
}

// Post handlers

async fn overlay_preset(Path(frame): Path<String>) -> Result<Json<OverlayLayout>, AppError> {
    let frame: FrameSize = frame.parse().map_err(AppError::BadRequest)?;
    Ok(Json(OverlayLayout::preset(frame)))
}

#[derive(Deserialize)]
struct OverlayEditRequest {
    frame: FrameSize,
    /// Preset for `frame` when absent.
    layout: Option<OverlayLayout>,
    edit: EditorAction,
}

#[derive(Serialize)]
struct OverlayEditResponse<'a> {
    frame: FrameSize,
    layout: &'a OverlayLayout,
}

/// Applies one editor interaction and returns the resulting layout, clamped
/// to the canvas.
async fn edit_overlay(Json(req): Json<OverlayEditRequest>) -> Result<Response, AppError> {
    let mut editor = match req.layout {
        Some(layout) => OverlayEditor::resume(req.frame, layout),
        None => OverlayEditor::new(req.frame),
    };
    editor.apply(req.edit)?;
    Ok(Json(OverlayEditResponse {
        frame: editor.frame(),
        layout: editor.layout(),
    })
    .into_response())
}

#[derive(Deserialize)]
struct ListQuery {
    limit: Option<i64>,
}

async fn list_posts(
    State(state): State<Arc<ApiState>>,
    Query(query): Query<ListQuery>,
) -> Result<impl IntoResponse, AppError> {
    let limit = query.limit.unwrap_or(100).clamp(1, 500);
    let posts = db::list_posts(&state.db_pool, limit).await?;
    Ok(Json(posts))
}

async fn create_post(
    State(state): State<Arc<ApiState>>,
    Extension(context): Extension<SessionContext>,
    Json(draft): Json<PostDraft>,
) -> Result<impl IntoResponse, AppError> {
    let (post, notification) = build_post(draft, state.local_now(), state.local_offset)?;

    let mut tx = state.db_pool.begin().await?;
    db::insert_post(&mut *tx, &post).await?;
    if let Some(notification) = &notification {
        db::insert_notification(&mut *tx, notification).await?;
    }
    tx.commit().await?;

    crate::metrics::POSTS_CREATED.inc();
    info!(
        post_id = %post.id,
        admin = %post.admin_name,
        scheduled = post.is_scheduled,
        notify = notification.is_some(),
        "Post created"
    );

    state
        .sessions
        .dispatch(&context.token, Action::AddPost(post.clone()))
        .await;
    Ok((StatusCode::CREATED, Json(post)))
}

async fn delete_post(
    State(state): State<Arc<ApiState>>,
    Path(id): Path<Uuid>,
) -> Result<StatusCode, AppError> {
    if !db::delete_post(&state.db_pool, id).await? {
        return Err(AppError::NotFound("post"));
    }
    info!(post_id = %id, "Post deleted");
    Ok(StatusCode::NO_CONTENT)
}

#[derive(Deserialize)]
struct UploadQuery {
    category: String,
    admin: String,
    filename: String,
}

async fn upload_media(
    State(state): State<Arc<ApiState>>,
    Query(query): Query<UploadQuery>,
    body: Bytes,
) -> Result<impl IntoResponse, AppError> {
    if body.is_empty() {
        return Err(AppError::BadRequest("upload body is empty".to_string()));
    }
    let millis = OffsetDateTime::now_utc().unix_timestamp_nanos() / 1_000_000;
    let path = upload_path(&query.category, &query.admin, millis, &query.filename);
    let url = state.media.save(&path, &body).await?;
    Ok((StatusCode::CREATED, Json(json!({ "url": url, "path": path }))))
}

// App user handlers

async fn list_users(State(state): State<Arc<ApiState>>) -> Result<impl IntoResponse, AppError> {
    Ok(Json(db::list_users(&state.db_pool).await?))
}

async fn delete_user(
    State(state): State<Arc<ApiState>>,
    Path(id): Path<Uuid>,
) -> Result<StatusCode, AppError> {
    if !db::delete_user(&state.db_pool, id).await? {
        return Err(AppError::NotFound("user"));
    }
    info!(user_id = %id, "App user deleted");
    Ok(StatusCode::NO_CONTENT)
}

// Subscription plan handlers

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct NewPlanRequest {
    title: String,
    #[serde(default)]
    subtitle: String,
    price: f64,
    duration: i32,
    usage_type: UsageType,
    #[serde(default = "default_true")]
    is_active: bool,
}

fn default_true() -> bool {
    true
}

impl NewPlanRequest {
    fn into_plan(self) -> Result<SubscriptionPlan, AppError> {
        if self.title.trim().is_empty() {
            return Err(AppError::BadRequest("plan title is required".to_string()));
        }
        if !self.price.is_finite() || self.price < 0.0 {
            return Err(AppError::BadRequest("plan price must not be negative".to_string()));
        }
        if self.duration <= 0 {
            return Err(AppError::BadRequest("plan duration must be at least one day".to_string()));
        }
        Ok(SubscriptionPlan {
            id: Uuid::new_v4(),
            title: self.title.trim().to_string(),
            subtitle: self.subtitle.trim().to_string(),
            price: self.price,
            duration: self.duration,
            usage_type: self.usage_type,
            is_active: self.is_active,
            created_at: OffsetDateTime::now_utc(),
        })
    }
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct PlanActiveRequest {
    is_active: bool,
}

async fn list_plans(State(state): State<Arc<ApiState>>) -> Result<impl IntoResponse, AppError> {
    Ok(Json(db::list_plans(&state.db_pool).await?))
}

async fn create_plan(
    State(state): State<Arc<ApiState>>,
    Json(req): Json<NewPlanRequest>,
) -> Result<impl IntoResponse, AppError> {
    let plan = req.into_plan()?;
    db::insert_plan(&state.db_pool, &plan).await?;
    Ok((StatusCode::CREATED, Json(plan)))
}

async fn set_plan_active(
    State(state): State<Arc<ApiState>>,
    Path(id): Path<Uuid>,
    Json(req): Json<PlanActiveRequest>,
) -> Result<StatusCode, AppError> {
    if !db::set_plan_active(&state.db_pool, id, req.is_active).await? {
        return Err(AppError::NotFound("subscription plan"));
    }
    Ok(StatusCode::NO_CONTENT)
}

async fn delete_plan(
    State(state): State<Arc<ApiState>>,
    Path(id): Path<Uuid>,
) -> Result<StatusCode, AppError> {
    if !db::delete_plan(&state.db_pool, id).await? {
        return Err(AppError::NotFound("subscription plan"));
    }
    Ok(StatusCode::NO_CONTENT)
}

// Remote config handlers

async fn get_remote_config(State(state): State<Arc<ApiState>>) -> Result<Json<UpdateSettings>, AppError> {
    db::get_config(&state.db_pool, UPDATE_SETTINGS_KEY)
        .await?
        .map(Json)
        .ok_or(AppError::NotFound("update settings"))
}

/// `updateRemoteConfig`: validated before anything is stored.
async fn update_remote_config(
    State(state): State<Arc<ApiState>>,
    Json(settings): Json<UpdateSettings>,
) -> Result<Json<UpdateSettings>, AppError> {
    settings.validate()?;
    db::put_config(&state.db_pool, UPDATE_SETTINGS_KEY, &settings).await?;
    info!(
        min_app_version = %settings.min_app_version,
        latest_app_version = %settings.latest_app_version,
        force_update = settings.force_update_enabled,
        "Remote config updated"
    );
    Ok(Json(settings))
}

async fn get_share_link(State(state): State<Arc<ApiState>>) -> Result<Json<ShareLink>, AppError> {
    db::get_config(&state.db_pool, SHARE_LINK_KEY)
        .await?
        .map(Json)
        .ok_or(AppError::NotFound("share link"))
}

async fn update_share_link(
    State(state): State<Arc<ApiState>>,
    Json(link): Json<ShareLink>,
) -> Result<Json<ShareLink>, AppError> {
    link.validate()?;
    db::put_config(&state.db_pool, SHARE_LINK_KEY, &link).await?;
    Ok(Json(link))
}

// Payment handlers

async fn create_payment(
    State(state): State<Arc<ApiState>>,
    Json(req): Json<CreatePaymentRequest>,
) -> Result<impl IntoResponse, AppError> {
    let link = state.payments.create_payment(&req).await?;
    Ok(Json(link))
}

async fn payment_status(
    State(state): State<Arc<ApiState>>,
    Path(id): Path<String>,
) -> Result<impl IntoResponse, AppError> {
    let status = state.payments.payment_status(&id).await?;
    Ok(Json(json!({ "status": status })))
}

async fn payment_webhook(
    State(state): State<Arc<ApiState>>,
    headers: HeaderMap,
    body: Bytes,
) -> Result<StatusCode, AppError> {
    let Some(secret) = state.webhook_secret.as_deref() else {
        warn!("Payment webhook received but RAZORPAY_WEBHOOK_SECRET is not set");
        return Err(AppError::Unauthorized);
    };
    let signature = headers
        .get("x-razorpay-signature")
        .and_then(|v| v.to_str().ok())
        .unwrap_or_default();
    if !verify_webhook_signature(secret, &body, signature) {
        warn!("Payment webhook signature mismatch");
        return Err(AppError::Unauthorized);
    }

    let event: WebhookEvent = serde_json::from_slice(&body)
        .map_err(|e| AppError::BadRequest(format!("malformed webhook payload: {}", e)))?;
    if let Some(link_id) = event.payment_link_id() {
        state.payments.invalidate(link_id).await;
    }
    info!(event = %event.event, "Payment webhook verified");
    Ok(StatusCode::OK)
}

async fn metrics() -> String {
    crate::metrics::metrics_handler()
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::HeaderValue;

    #[test]
    fn test_bearer_token() {
        let mut headers = HeaderMap::new();
        assert_eq!(bearer_token(&headers), None);

        headers.insert(header::AUTHORIZATION, HeaderValue::from_static("Bearer abc123"));
        assert_eq!(bearer_token(&headers), Some("abc123".to_string()));

        headers.insert(header::AUTHORIZATION, HeaderValue::from_static("Basic abc123"));
        assert_eq!(bearer_token(&headers), None);

        headers.insert(header::AUTHORIZATION, HeaderValue::from_static("Bearer  "));
        assert_eq!(bearer_token(&headers), None);
    }

    #[test]
    fn test_move_request_shapes() {
        let by_direction: MoveRequest = serde_json::from_str(r#"{"direction":"up"}"#).unwrap();
        assert!(matches!(
            by_direction,
            MoveRequest::Direction {
                direction: Direction::Up
            }
        ));

        let by_position: MoveRequest = serde_json::from_str(r#"{"position":14}"#).unwrap();
        assert!(matches!(by_position, MoveRequest::Position { position: 14 }));
    }

    #[test]
    fn test_new_plan_validation() {
        let request = |title: &str, price: f64, duration: i32| NewPlanRequest {
            title: title.to_string(),
            subtitle: String::new(),
            price,
            duration,
            usage_type: UsageType::Business,
            is_active: true,
        };

        assert!(request("Gold", 299.0, 30).into_plan().is_ok());
        assert!(request(" ", 299.0, 30).into_plan().is_err());
        assert!(request("Gold", -1.0, 30).into_plan().is_err());
        assert!(request("Gold", 299.0, 0).into_plan().is_err());
    }

    #[test]
    fn test_overlay_edit_request_shape() {
        let req: OverlayEditRequest = serde_json::from_str(
            r#"{"frame":"portrait","edit":{"action":"toggle","element":"phone","enabled":true}}"#,
        )
        .unwrap();
        assert_eq!(req.frame, FrameSize::Portrait);
        assert!(req.layout.is_none());

        let mut editor = OverlayEditor::new(req.frame);
        editor.apply(req.edit).unwrap();
        let body = serde_json::to_value(OverlayEditResponse {
            frame: editor.frame(),
            layout: editor.layout(),
        })
        .unwrap();
        assert_eq!(body["frame"], "portrait");
        assert_eq!(body["layout"]["phone"]["enabled"], true);
        assert_eq!(body["layout"]["phone"]["y"], 98.0);
    }
}
