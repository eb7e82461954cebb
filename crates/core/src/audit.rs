use std::collections::BTreeMap;
use std::sync::{Arc, Mutex};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use tracing::info;
use uuid::Uuid;

use crate::decision::policy::EnforcementMode;
use crate::domain::decision::{DecisionResult, OpportunityId, TenantId};

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum AuditCategory {
    Decision,
    Authority,
}

impl AuditCategory {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Decision => "decision",
            Self::Authority => "authority",
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum AuditOutcome {
    Success,
    Rejected,
    Failed,
}

impl AuditOutcome {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Success => "success",
            Self::Rejected => "rejected",
            Self::Failed => "failed",
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct AuditContext {
    pub tenant_id: Option<TenantId>,
    pub opportunity_id: Option<OpportunityId>,
    pub correlation_id: String,
    pub actor: String,
}

impl AuditContext {
    pub fn new(
        tenant_id: Option<TenantId>,
        opportunity_id: Option<OpportunityId>,
        correlation_id: impl Into<String>,
        actor: impl Into<String>,
    ) -> Self {
        Self { tenant_id, opportunity_id, correlation_id: correlation_id.into(), actor: actor.into() }
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct AuditEvent {
    pub event_id: String,
    pub tenant_id: Option<TenantId>,
    pub opportunity_id: Option<OpportunityId>,
    pub correlation_id: String,
    pub event_type: String,
    pub category: AuditCategory,
    pub actor: String,
    pub outcome: AuditOutcome,
    pub metadata: BTreeMap<String, String>,
    pub occurred_at: DateTime<Utc>,
}

impl AuditEvent {
    pub fn new(
        context: &AuditContext,
        event_type: impl Into<String>,
        category: AuditCategory,
        outcome: AuditOutcome,
    ) -> Self {
        Self {
            event_id: Uuid::new_v4().to_string(),
            tenant_id: context.tenant_id.clone(),
            opportunity_id: context.opportunity_id.clone(),
            correlation_id: context.correlation_id.clone(),
            event_type: event_type.into(),
            category,
            actor: context.actor.clone(),
            outcome,
            metadata: BTreeMap::new(),
            occurred_at: Utc::now(),
        }
    }

    pub fn with_metadata(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.metadata.insert(key.into(), value.into());
        self
    }
}

pub trait AuditSink: Send + Sync {
    fn emit(&self, event: AuditEvent);
}

#[derive(Clone, Default)]
pub struct InMemoryAuditSink {
    events: Arc<Mutex<Vec<AuditEvent>>>,
}

impl InMemoryAuditSink {
    pub fn events(&self) -> Vec<AuditEvent> {
        match self.events.lock() {
            Ok(events) => events.clone(),
            Err(poisoned) => poisoned.into_inner().clone(),
        }
    }
}

impl AuditSink for InMemoryAuditSink {
    fn emit(&self, event: AuditEvent) {
        match self.events.lock() {
            Ok(mut events) => events.push(event),
            Err(poisoned) => poisoned.into_inner().push(event),
        }
    }
}

/// Writes each event as a structured log record.
#[derive(Clone, Copy, Debug, Default)]
pub struct TracingAuditSink;

impl AuditSink for TracingAuditSink {
    fn emit(&self, event: AuditEvent) {
        info!(
            event_name = %event.event_type,
            category = event.category.as_str(),
            outcome = event.outcome.as_str(),
            correlation_id = %event.correlation_id,
            tenant_id = event.tenant_id.as_ref().map_or("unknown", |id| id.0.as_str()),
            opportunity_id = event.opportunity_id.as_ref().map_or("unknown", |id| id.0.as_str()),
            actor = %event.actor,
            event_id = %event.event_id,
            metadata = ?event.metadata,
            "audit event"
        );
    }
}

/// Append-only record of one decision. Records of a tenant form a SHA-256 chain through
/// `prev_hash`.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct DecisionAuditRecord {
    pub record_id: String,
    pub tenant_id: TenantId,
    pub opportunity_id: OpportunityId,
    pub correlation_id: String,
    pub enforcement_mode: EnforcementMode,
    pub policy_version: String,
    pub result: DecisionResult,
    pub prev_hash: Option<String>,
    pub record_hash: String,
    pub recorded_at: DateTime<Utc>,
}

impl DecisionAuditRecord {
    /// Builds the next record of a tenant chain. `previous` is the tenant's latest record.
    pub fn chained(
        tenant_id: TenantId,
        opportunity_id: OpportunityId,
        enforcement_mode: EnforcementMode,
        policy_version: impl Into<String>,
        result: DecisionResult,
        previous: Option<&DecisionAuditRecord>,
    ) -> Self {
        let mut record = Self {
            record_id: Uuid::new_v4().to_string(),
            tenant_id,
            opportunity_id,
            correlation_id: result.correlation_id.clone(),
            enforcement_mode,
            policy_version: policy_version.into(),
            result,
            prev_hash: previous.map(|record| record.record_hash.clone()),
            record_hash: String::new(),
            recorded_at: Utc::now(),
        };
        record.record_hash = record.compute_hash();
        record
    }

    pub fn compute_hash(&self) -> String {
        let result_hash = match serde_json::to_vec(&self.result) {
            Ok(payload) => sha256_hex(&payload),
            Err(_) => sha256_hex(self.result.correlation_id.as_bytes()),
        };
        let material = format!(
            "{}|{}|{}|{}|{}|{}|{}|{}|{}",
            self.record_id,
            self.tenant_id.0,
            self.opportunity_id.0,
            self.correlation_id,
            self.enforcement_mode.as_str(),
            self.policy_version,
            result_hash,
            self.prev_hash.as_deref().unwrap_or(""),
            self.recorded_at.to_rfc3339(),
        );
        sha256_hex(material.as_bytes())
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChainVerification {
    pub valid: bool,
    pub verified_records: usize,
    pub latest_hash: Option<String>,
    pub failure_reason: Option<String>,
}

/// Checks a single tenant's records in append order and reports the first break.
pub fn verify_audit_chain(records: &[DecisionAuditRecord]) -> ChainVerification {
    let mut previous_hash: Option<String> = None;
    let tenant = records.first().map(|record| record.tenant_id.clone());

    for (index, record) in records.iter().enumerate() {
        let failure = if Some(&record.tenant_id) != tenant.as_ref() {
            Some(format!("record {} belongs to another tenant", record.record_id))
        } else if record.prev_hash != previous_hash {
            Some(format!("previous hash mismatch at record {}", record.record_id))
        } else if record.compute_hash() != record.record_hash {
            Some(format!("record hash mismatch at record {}", record.record_id))
        } else {
            None
        };

        if let Some(reason) = failure {
            return ChainVerification {
                valid: false,
                verified_records: index,
                latest_hash: previous_hash,
                failure_reason: Some(reason),
            };
        }
        previous_hash = Some(record.record_hash.clone());
    }

    ChainVerification {
        valid: true,
        verified_records: records.len(),
        latest_hash: previous_hash,
        failure_reason: None,
    }
}

fn sha256_hex(payload: &[u8]) -> String {
    let digest = Sha256::digest(payload);
    let mut output = String::with_capacity(digest.len() * 2);
    for byte in digest.as_slice() {
        output.push_str(&format!("{byte:02x}"));
    }
    output
}
