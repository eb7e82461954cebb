pub mod audit;
pub mod authority;
pub mod config;
pub mod decision;
pub mod domain;
pub mod errors;

pub use audit::{
    verify_audit_chain, AuditCategory, AuditContext, AuditEvent, AuditOutcome, AuditSink,
    ChainVerification, DecisionAuditRecord, InMemoryAuditSink, TracingAuditSink,
};
pub use authority::{AuthorityContext, AuthorityError};
pub use decision::{
    DecisionEngine, DecisionError, DecisionOutcome, DecisionPolicy, DecisionPolicyResolver,
    EnforcementMode, PolicyError, RawDecisionInput, RawExecutionCommand, StaticPolicyResolver,
    SwappablePolicyResolver,
};
pub use domain::decision::{
    ActorCapability, ActorType, Channel, DecisionContext, DecisionResult, ExecutionCommand,
    ExecutionMode, OpportunityId, RiskAssessment, RiskLevel, SlaUrgency, TenantId, VoiceMode,
};
pub use domain::org::{
    ActionContext, ApprovalRequirement, Capability, MemberId, OrgRole, RoleAssignment,
    RoleAssignmentId, ScopeType,
};
pub use errors::{ApplicationError, DomainError, InterfaceError};
