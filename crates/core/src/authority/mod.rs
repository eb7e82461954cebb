//! Authority layer: who may approve or override a decision.

pub mod approval_chain;
pub mod capabilities;
pub mod resolver;

pub use approval_chain::{
    approval_reason, approval_requirement, escalation_role, required_capabilities,
    requires_approval, validate_approval_chain, ApprovalAction, ApprovalChainValidation,
};
pub use capabilities::{
    capabilities_for_role, escalation_path, is_administrative_capability,
    is_execution_capability, role_has_capability, roles_with_capability, ROLE_CAPABILITIES,
};
pub use resolver::{
    assert_capabilities, assert_capability, assert_scope, authorize_requirement,
    can_act_on_agency, can_act_on_enterprise, can_act_on_team, has_capability, highest_role,
    resolve_capabilities, AuthorityContext, AuthorityError,
};
