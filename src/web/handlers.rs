use super::{ApiResponse, AppState, CurrentUser, WebError, WebResult};
use crate::core::{Page, PlanId, page_offset};
use crate::ledger::{PlanRefund, PlanRequest, SubscriptionPlan, UserPlanOrder};
use crate::task::{Task, TaskQuery};
use axum::Json;
use axum::extract::{Path, Query, State};
use serde::Deserialize;

#[derive(Debug, Default, Deserialize)]
pub struct OrdersQuery {
    pub p: Option<i64>,
    pub page_size: Option<i64>,
}

#[derive(Debug, Deserialize)]
pub struct PurchaseRequest {
    pub plan_id: PlanId,
}

#[derive(Debug, Deserialize)]
pub struct PlanUpdateRequest {
    pub id: PlanId,
    #[serde(flatten)]
    pub plan: PlanRequest,
}

/// Job listing filters; `p` is zero-based.
#[derive(Debug, Default, Deserialize)]
pub struct TaskListQuery {
    pub p: Option<i64>,
    pub platform: Option<String>,
    pub task_id: Option<String>,
    pub status: Option<String>,
    pub action: Option<String>,
    pub start_timestamp: Option<i64>,
    pub end_timestamp: Option<i64>,
}

impl TaskListQuery {
    fn into_parts(self) -> (usize, TaskQuery) {
        let page = self.p.unwrap_or(0).max(0) as usize;
        let query = TaskQuery {
            user_id: None,
            platform: self.platform,
            external_id: self.task_id,
            status: self.status,
            action: self.action,
            start_timestamp: self.start_timestamp,
            end_timestamp: self.end_timestamp,
        };
        (page, query)
    }
}

// ============================================================================
// Plans and orders
// ============================================================================

pub async fn list_plans(State(state): State<AppState>) -> WebResult<Vec<SubscriptionPlan>> {
    let plans = state.ledger.list_plans(false).await?;
    Ok(Json(ApiResponse::ok(plans)))
}

pub async fn list_self_orders(
    State(state): State<AppState>,
    CurrentUser(user_id): CurrentUser,
    Query(query): Query<OrdersQuery>,
) -> WebResult<Page<UserPlanOrder>> {
    let page = state
        .ledger
        .list_user_orders(user_id, query.p.unwrap_or(1), query.page_size.unwrap_or(0))
        .await?;
    Ok(Json(ApiResponse::ok(page)))
}

pub async fn purchase_plan(
    State(state): State<AppState>,
    CurrentUser(user_id): CurrentUser,
    Json(request): Json<PurchaseRequest>,
) -> WebResult<UserPlanOrder> {
    let order = state.ledger.purchase(user_id, request.plan_id).await?;
    Ok(Json(ApiResponse::ok(order)))
}

pub async fn purchase_hint() -> WebError {
    WebError::MethodNotAllowed(
        "use POST /api/plan/purchase with a JSON body {\"plan_id\": <id>}".to_string(),
    )
}

pub async fn admin_list_plans(State(state): State<AppState>) -> WebResult<Vec<SubscriptionPlan>> {
    let plans = state.ledger.list_plans(true).await?;
    Ok(Json(ApiResponse::ok(plans)))
}

pub async fn admin_create_plan(
    State(state): State<AppState>,
    Json(request): Json<PlanRequest>,
) -> WebResult<SubscriptionPlan> {
    let plan = state.ledger.create_plan(request).await?;
    Ok(Json(ApiResponse::ok(plan)))
}

pub async fn admin_update_plan(
    State(state): State<AppState>,
    Json(request): Json<PlanUpdateRequest>,
) -> WebResult<SubscriptionPlan> {
    let plan = state.ledger.update_plan(request.id, request.plan).await?;
    Ok(Json(ApiResponse::ok(plan)))
}

pub async fn admin_delete_plan(
    State(state): State<AppState>,
    Path(plan_id): Path<PlanId>,
) -> WebResult<Vec<PlanRefund>> {
    let refunds = state.ledger.delete_plan(plan_id).await?;
    Ok(Json(ApiResponse::ok(refunds)))
}

// ============================================================================
// Jobs
// ============================================================================

pub async fn list_tasks(
    State(state): State<AppState>,
    Query(query): Query<TaskListQuery>,
) -> WebResult<Vec<Task>> {
    let (page, filter) = query.into_parts();
    let tasks = task_page(&state, page, &filter).await?;
    Ok(Json(ApiResponse::ok(tasks)))
}

pub async fn list_self_tasks(
    State(state): State<AppState>,
    CurrentUser(user_id): CurrentUser,
    Query(query): Query<TaskListQuery>,
) -> WebResult<Vec<Task>> {
    let (page, filter) = query.into_parts();
    let tasks = task_page(&state, page, &filter.for_user(user_id)).await?;
    Ok(Json(ApiResponse::ok(tasks)))
}

async fn task_page(state: &AppState, page: usize, filter: &TaskQuery) -> Result<Vec<Task>, WebError> {
    let per_page = state.ledger.items_per_page();
    let offset = page_offset(page, per_page)?;
    Ok(state.tasks.list(filter, offset, per_page).await?)
}
