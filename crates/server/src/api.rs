use std::collections::{BTreeSet, HashMap};
use std::sync::{Arc, Mutex as StdMutex};

use axum::{
    extract::{Path, Query, State},
    http::{HeaderMap, StatusCode},
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use chrono::Utc;
use serde::{Deserialize, Serialize};
use tokio::sync::Mutex;
use tracing::{error, info, warn};
use uuid::Uuid;

use neuronx_core::audit::{
    verify_audit_chain, AuditCategory, AuditContext, AuditEvent, AuditOutcome, AuditSink,
    ChainVerification, DecisionAuditRecord, TracingAuditSink,
};
use neuronx_core::authority::{
    approval_requirement, assert_capabilities, assert_scope, authorize_requirement,
    highest_role, AuthorityContext, AuthorityError,
};
use neuronx_core::decision::{
    build_context, DecisionEngine, DecisionPolicy, DecisionPolicyResolver, EnforcementMode,
    PolicyError, RawDecisionInput, SwappablePolicyResolver,
};
use neuronx_core::domain::decision::{DecisionResult, TenantId};
use neuronx_core::domain::org::{
    ActionContext, ApprovalRequirement, Capability, MemberId, OrgRole, RoleAssignment,
    RoleAssignmentId, ScopeType,
};
use neuronx_core::errors::{ApplicationError, DomainError, InterfaceError};
use neuronx_db::{DbPool, DecisionAuditRepository, RepositoryError, RoleAssignmentRepository};

pub type Engine = DecisionEngine<Arc<SwappablePolicyResolver>>;

const CORRELATION_HEADER: &str = "x-correlation-id";

#[derive(Clone)]
pub struct ApiState {
    engine: Arc<Engine>,
    db_pool: DbPool,
    role_assignments: Arc<dyn RoleAssignmentRepository>,
    decision_audit: Arc<dyn DecisionAuditRepository>,
    audit_events: Arc<dyn AuditSink>,
    // One lock per tenant chain; read-latest-then-append runs under it.
    audit_append: Arc<StdMutex<HashMap<TenantId, Arc<Mutex<()>>>>>,
}

impl ApiState {
    pub fn new(
        engine: Arc<Engine>,
        db_pool: DbPool,
        role_assignments: Arc<dyn RoleAssignmentRepository>,
        decision_audit: Arc<dyn DecisionAuditRepository>,
    ) -> Self {
        Self {
            engine,
            db_pool,
            role_assignments,
            decision_audit,
            audit_events: Arc::new(TracingAuditSink),
            audit_append: Arc::default(),
        }
    }

    pub fn with_audit_sink(mut self, sink: Arc<dyn AuditSink>) -> Self {
        self.audit_events = sink;
        self
    }

    fn tenant_append_lock(&self, tenant_id: &TenantId) -> Arc<Mutex<()>> {
        let mut locks = match self.audit_append.lock() {
            Ok(locks) => locks,
            Err(poisoned) => poisoned.into_inner(),
        };
        Arc::clone(locks.entry(tenant_id.clone()).or_default())
    }

    pub fn engine(&self) -> &Engine {
        &self.engine
    }

    pub fn db_pool(&self) -> &DbPool {
        &self.db_pool
    }

    pub fn policy_snapshot(&self) -> Result<Arc<DecisionPolicy>, PolicyError> {
        self.engine.resolver().snapshot()
    }
}

pub fn router(state: ApiState) -> Router {
    Router::new()
        .route("/api/v1/decisions", post(create_decision))
        .route("/api/v1/enforcement-mode", get(get_enforcement_mode).put(put_enforcement_mode))
        .route("/api/v1/approvals/requirement", post(resolve_approval_requirement))
        .route("/api/v1/authority/check", post(check_authority))
        .route("/api/v1/role-assignments", get(list_role_assignments).post(create_role_assignment))
        .route("/api/v1/role-assignments/{id}/revoke", post(revoke_role_assignment))
        .route("/api/v1/audit/{tenant_id}/verify", get(verify_tenant_audit))
        .with_state(state)
}

// ---------------------------------------------------------------------------
// Errors
// ---------------------------------------------------------------------------

#[derive(Debug)]
pub struct ApiError(pub InterfaceError);

#[derive(Debug, Serialize, Deserialize)]
pub struct ErrorBody {
    pub error: String,
    pub message: String,
    pub user_message: String,
    pub correlation_id: String,
}

impl ApiError {
    fn new(error: impl Into<ApplicationError>, correlation_id: &str) -> Self {
        Self(error.into().into_interface(correlation_id))
    }

    fn bad_request(message: impl Into<String>, correlation_id: &str) -> Self {
        Self(InterfaceError::BadRequest {
            message: message.into(),
            correlation_id: correlation_id.to_string(),
        })
    }

    fn status(&self) -> (StatusCode, &'static str) {
        match self.0 {
            InterfaceError::BadRequest { .. } => (StatusCode::BAD_REQUEST, "bad_request"),
            InterfaceError::NotFound { .. } => (StatusCode::NOT_FOUND, "not_found"),
            InterfaceError::Conflict { .. } => (StatusCode::CONFLICT, "conflict"),
            InterfaceError::ServiceUnavailable { .. } => {
                (StatusCode::SERVICE_UNAVAILABLE, "service_unavailable")
            }
            InterfaceError::Internal { .. } => (StatusCode::INTERNAL_SERVER_ERROR, "internal"),
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, code) = self.status();
        let body = ErrorBody {
            error: code.to_string(),
            message: self.0.message().to_string(),
            user_message: self.0.user_message().to_string(),
            correlation_id: self.0.correlation_id().to_string(),
        };
        (status, Json(body)).into_response()
    }
}

fn persistence(error: RepositoryError) -> ApplicationError {
    ApplicationError::Persistence(error.to_string())
}

fn correlation_id(headers: &HeaderMap) -> String {
    headers
        .get(CORRELATION_HEADER)
        .and_then(|value| value.to_str().ok())
        .map(str::trim)
        .filter(|value| !value.is_empty())
        .map(str::to_string)
        .unwrap_or_else(|| Uuid::new_v4().to_string())
}

// ---------------------------------------------------------------------------
// Decisions
// ---------------------------------------------------------------------------

#[derive(Debug, Serialize, Deserialize)]
pub struct AuditReceipt {
    pub record_id: String,
    pub record_hash: String,
    pub prev_hash: Option<String>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct DecisionResponse {
    pub result: DecisionResult,
    pub enforcement_mode: EnforcementMode,
    pub policy_version: String,
    pub fail_safe: bool,
    pub audit: AuditReceipt,
}

/// Decides, then appends the decision to the tenant's audit chain. A decision that
/// cannot be recorded is not returned.
async fn create_decision(
    State(state): State<ApiState>,
    headers: HeaderMap,
    Json(mut raw): Json<RawDecisionInput>,
) -> Result<Json<DecisionResponse>, ApiError> {
    if raw.correlation_id.as_deref().map_or(true, |id| id.trim().is_empty()) {
        if let Some(header) = headers.get(CORRELATION_HEADER).and_then(|v| v.to_str().ok()) {
            raw.correlation_id = Some(header.to_string());
        }
    }
    let context = build_context(&raw);
    let correlation = context.correlation_id.clone();

    let outcome = state
        .engine
        .decide(&raw)
        .map_err(|error| ApiError::new(DomainError::from(error), &correlation))?;

    let record = {
        let tenant_lock = state.tenant_append_lock(&context.tenant_id);
        let _guard = tenant_lock.lock().await;
        let previous = state
            .decision_audit
            .latest_for_tenant(&context.tenant_id)
            .await
            .map_err(|error| ApiError::new(persistence(error), &correlation))?;
        let record = DecisionAuditRecord::chained(
            context.tenant_id.clone(),
            context.opportunity_id.clone(),
            outcome.enforcement_mode,
            outcome.policy_version.clone(),
            outcome.result.clone(),
            previous.as_ref(),
        );
        if let Err(repo_error) = state.decision_audit.append(record.clone()).await {
            error!(
                event_name = "decision.audit.append_failed",
                correlation_id = %correlation,
                tenant_id = %context.tenant_id.0,
                opportunity_id = %context.opportunity_id.0,
                error = %repo_error,
                "decision could not be recorded"
            );
            return Err(ApiError::new(persistence(repo_error), &correlation));
        }
        record
    };

    info!(
        event_name = "decision.audit.recorded",
        correlation_id = %correlation,
        tenant_id = %record.tenant_id.0,
        opportunity_id = %record.opportunity_id.0,
        record_id = %record.record_id,
        enforcement_mode = record.enforcement_mode.as_str(),
        "decision recorded in audit chain"
    );

    Ok(Json(DecisionResponse {
        result: outcome.result,
        enforcement_mode: outcome.enforcement_mode,
        policy_version: outcome.policy_version,
        fail_safe: outcome.fail_safe,
        audit: AuditReceipt {
            record_id: record.record_id,
            record_hash: record.record_hash,
            prev_hash: record.prev_hash,
        },
    }))
}

#[derive(Debug, Serialize, Deserialize)]
pub struct EnforcementModeResponse {
    pub enforcement_mode: EnforcementMode,
    pub policy_version: String,
}

async fn get_enforcement_mode(State(state): State<ApiState>) -> Json<EnforcementModeResponse> {
    let policy_version = state
        .policy_snapshot()
        .map(|policy| policy.version.clone())
        .unwrap_or_else(|_| "unavailable".to_string());
    Json(EnforcementModeResponse {
        enforcement_mode: state.engine.get_enforcement_mode(),
        policy_version,
    })
}

#[derive(Debug, Deserialize)]
pub struct SetEnforcementModeRequest {
    pub enforcement_mode: EnforcementMode,
}

/// Always refused: the mode is part of the policy document.
async fn put_enforcement_mode(
    State(state): State<ApiState>,
    headers: HeaderMap,
    Json(request): Json<SetEnforcementModeRequest>,
) -> Result<StatusCode, ApiError> {
    let correlation = correlation_id(&headers);
    state
        .engine
        .set_enforcement_mode(request.enforcement_mode)
        .map_err(|error| ApiError::new(DomainError::from(error), &correlation))?;
    Ok(StatusCode::NO_CONTENT)
}

// ---------------------------------------------------------------------------
// Authority
// ---------------------------------------------------------------------------

async fn resolve_approval_requirement(
    Json(context): Json<ActionContext>,
) -> Json<ApprovalRequirement> {
    Json(approval_requirement(&context))
}

#[derive(Debug, Deserialize)]
pub struct ScopeRequest {
    pub scope_type: ScopeType,
    pub scope_id: String,
}

#[derive(Debug, Deserialize)]
pub struct AuthorityCheckRequest {
    pub tenant_id: String,
    pub member_id: String,
    #[serde(default)]
    pub user_id: Option<String>,
    #[serde(default)]
    pub capabilities: Vec<Capability>,
    #[serde(default)]
    pub action: Option<ActionContext>,
    #[serde(default)]
    pub scope: Option<ScopeRequest>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct AuthorityCheckResponse {
    pub authorized: bool,
    pub reason: Option<String>,
    pub missing: Vec<Capability>,
    pub escalation_path: Vec<OrgRole>,
    pub resolved_capabilities: BTreeSet<Capability>,
    pub highest_role: Option<OrgRole>,
    pub requirement: Option<ApprovalRequirement>,
}

/// Reports whether the member may act. Denials are a verdict, not an error.
async fn check_authority(
    State(state): State<ApiState>,
    headers: HeaderMap,
    Json(request): Json<AuthorityCheckRequest>,
) -> Result<Json<AuthorityCheckResponse>, ApiError> {
    let correlation = correlation_id(&headers);
    if request.tenant_id.trim().is_empty() || request.member_id.trim().is_empty() {
        return Err(ApiError::bad_request("tenant_id and member_id are required", &correlation));
    }

    let tenant_id = TenantId(request.tenant_id);
    let member_id = MemberId(request.member_id);
    let assignments = state
        .role_assignments
        .list_for_member(&tenant_id, &member_id)
        .await
        .map_err(|error| ApiError::new(persistence(error), &correlation))?;
    let user_id = request.user_id.unwrap_or_else(|| member_id.0.clone());
    let context = AuthorityContext::new(tenant_id, member_id, user_id, assignments);

    let requirement = request.action.as_ref().map(approval_requirement);
    let verdict = requirement
        .as_ref()
        .map_or(Ok(()), |requirement| authorize_requirement(&context, requirement))
        .and_then(|()| assert_capabilities(&context, &request.capabilities))
        .and_then(|()| {
            request
                .scope
                .as_ref()
                .map_or(Ok(()), |scope| assert_scope(&context, scope.scope_type, &scope.scope_id))
        });

    let (authorized, reason, missing, escalation_path) = match verdict {
        Ok(()) => (true, None, Vec::new(), Vec::new()),
        Err(error) => {
            let reason = Some(error.to_string());
            match error {
                AuthorityError::InsufficientCapabilities { missing, escalation_path, .. } => {
                    (false, reason, missing, escalation_path)
                }
                AuthorityError::OrgScope { .. } => (false, reason, Vec::new(), Vec::new()),
            }
        }
    };

    Ok(Json(AuthorityCheckResponse {
        authorized,
        reason,
        missing,
        escalation_path,
        highest_role: highest_role(&context),
        resolved_capabilities: context.resolved_capabilities,
        requirement,
    }))
}

#[derive(Debug, Deserialize)]
pub struct CreateRoleAssignmentRequest {
    pub tenant_id: String,
    pub member_id: String,
    pub role: OrgRole,
    pub scope_type: ScopeType,
    pub scope_id: String,
}

async fn create_role_assignment(
    State(state): State<ApiState>,
    headers: HeaderMap,
    Json(request): Json<CreateRoleAssignmentRequest>,
) -> Result<(StatusCode, Json<RoleAssignment>), ApiError> {
    let correlation = correlation_id(&headers);
    let blank = [
        ("tenant_id", &request.tenant_id),
        ("member_id", &request.member_id),
        ("scope_id", &request.scope_id),
    ]
    .into_iter()
    .filter(|(_, value)| value.trim().is_empty())
    .map(|(field, _)| field)
    .collect::<Vec<_>>();
    if !blank.is_empty() {
        return Err(ApiError::bad_request(
            format!("required fields are empty: {}", blank.join(", ")),
            &correlation,
        ));
    }

    let assignment = RoleAssignment {
        id: RoleAssignmentId(Uuid::new_v4().to_string()),
        tenant_id: TenantId(request.tenant_id),
        member_id: MemberId(request.member_id),
        role: request.role,
        scope_type: request.scope_type,
        scope_id: request.scope_id,
        created_at: Utc::now(),
        revoked_at: None,
    };
    state
        .role_assignments
        .save(assignment.clone())
        .await
        .map_err(|error| ApiError::new(persistence(error), &correlation))?;

    state.audit_events.emit(
        authority_event(&assignment, &correlation, "authority.role_assignment.created")
            .with_metadata("role", assignment.role.as_str())
            .with_metadata("scope_type", assignment.scope_type.as_str())
            .with_metadata("scope_id", assignment.scope_id.clone()),
    );
    Ok((StatusCode::CREATED, Json(assignment)))
}

#[derive(Debug, Deserialize)]
pub struct RoleAssignmentQuery {
    pub tenant_id: String,
    pub member_id: String,
}

async fn list_role_assignments(
    State(state): State<ApiState>,
    headers: HeaderMap,
    Query(query): Query<RoleAssignmentQuery>,
) -> Result<Json<Vec<RoleAssignment>>, ApiError> {
    let correlation = correlation_id(&headers);
    let assignments = state
        .role_assignments
        .list_for_member(&TenantId(query.tenant_id), &MemberId(query.member_id))
        .await
        .map_err(|error| ApiError::new(persistence(error), &correlation))?;
    Ok(Json(assignments))
}

async fn revoke_role_assignment(
    State(state): State<ApiState>,
    headers: HeaderMap,
    Path(id): Path<String>,
) -> Result<Json<RoleAssignment>, ApiError> {
    let correlation = correlation_id(&headers);
    let id = RoleAssignmentId(id);
    let revoked = state
        .role_assignments
        .revoke(&id, Utc::now())
        .await
        .map_err(|error| ApiError::new(persistence(error), &correlation))?;

    match revoked {
        Some(assignment) => {
            state.audit_events.emit(
                authority_event(&assignment, &correlation, "authority.role_assignment.revoked")
                    .with_metadata("role", assignment.role.as_str()),
            );
            Ok(Json(assignment))
        }
        None => {
            warn!(
                event_name = "authority.role_assignment.revoke_missing",
                correlation_id = %correlation,
                assignment_id = %id.0,
                "revocation requested for unknown assignment"
            );
            Err(ApiError::new(
                ApplicationError::NotFound(format!("role assignment `{}`", id.0)),
                &correlation,
            ))
        }
    }
}

fn authority_event(assignment: &RoleAssignment, correlation: &str, event_type: &str) -> AuditEvent {
    let context = AuditContext::new(
        Some(assignment.tenant_id.clone()),
        None,
        correlation,
        format!("member:{}", assignment.member_id.0),
    );
    AuditEvent::new(&context, event_type, AuditCategory::Authority, AuditOutcome::Success)
        .with_metadata("assignment_id", assignment.id.0.clone())
}

async fn verify_tenant_audit(
    State(state): State<ApiState>,
    headers: HeaderMap,
    Path(tenant_id): Path<String>,
) -> Result<Json<ChainVerification>, ApiError> {
    let correlation = correlation_id(&headers);
    let records = state
        .decision_audit
        .list_for_tenant(&TenantId(tenant_id.clone()))
        .await
        .map_err(|error| ApiError::new(persistence(error), &correlation))?;
    let verification = verify_audit_chain(&records);
    if !verification.valid {
        warn!(
            event_name = "decision.audit.chain_broken",
            correlation_id = %correlation,
            tenant_id = %tenant_id,
            reason = verification.failure_reason.as_deref().unwrap_or("unknown"),
            "audit chain verification failed"
        );
    }
    Ok(Json(verification))
}
