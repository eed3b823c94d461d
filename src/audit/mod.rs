//! Audit log of committed plans
//!
//! Every plan the pipeline returns is recorded once, together with the
//! evaluation that scored it. Records are never mutated.

use crate::error::PlanError;
use crate::models::{EvaluationResult, Plan, UserProfile};
use crate::Result;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::collections::HashMap;
use std::io::Write;
use std::sync::Arc;
use tokio::sync::RwLock;
use uuid::Uuid;

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct PlanRecord {
    pub audit_id: Uuid,
    /// SHA-256 of the serialized profile
    pub profile_hash: String,
    /// SHA-256 of the serialized plan
    pub plan_hash: String,
    pub plan: Plan,
    /// Kept verbatim for feedback collection
    pub evaluation: Option<EvaluationResult>,
    pub created_at: DateTime<Utc>,
    pub execution_time_ms: u64,
}

impl PlanRecord {
    pub fn new(plan: Plan, evaluation: Option<EvaluationResult>, execution_time_ms: u64) -> Self {
        Self {
            audit_id: Uuid::new_v4(),
            profile_hash: compute_profile_hash(&plan.profile),
            plan_hash: compute_hash(&plan),
            plan,
            evaluation,
            created_at: Utc::now(),
            execution_time_ms,
        }
    }
}

/// Audit trail storage
pub struct AuditLog {
    records: Arc<RwLock<HashMap<Uuid, PlanRecord>>>,
    /// Records are never evicted, so a full log rejects new ones
    capacity: Option<usize>,
}

impl AuditLog {
    pub fn new() -> Self {
        Self {
            records: Arc::new(RwLock::new(HashMap::new())),
            capacity: None,
        }
    }

    pub fn bounded(capacity: usize) -> Self {
        Self {
            capacity: Some(capacity),
            ..Self::new()
        }
    }

    /// Store a record. An id can only be written once.
    pub async fn record(&self, record: PlanRecord) -> Result<Uuid> {
        let audit_id = record.audit_id;
        let mut records = self.records.write().await;

        if records.contains_key(&audit_id) {
            return Err(PlanError::Audit(format!("record {} already exists", audit_id)));
        }
        if self.capacity.is_some_and(|max| records.len() >= max) {
            return Err(PlanError::Audit(format!(
                "audit log full ({} records)",
                records.len()
            )));
        }

        records.insert(audit_id, record);
        Ok(audit_id)
    }

    pub async fn get(&self, audit_id: Uuid) -> Result<Option<PlanRecord>> {
        let records = self.records.read().await;
        Ok(records.get(&audit_id).cloned())
    }

    /// Most recent records first
    pub async fn list_recent(&self, limit: usize) -> Result<Vec<PlanRecord>> {
        let records = self.records.read().await;

        let mut items: Vec<&PlanRecord> = records.values().collect();
        items.sort_by(|a, b| {
            b.created_at
                .cmp(&a.created_at)
                .then_with(|| a.audit_id.cmp(&b.audit_id))
        });

        Ok(items.into_iter().take(limit).cloned().collect())
    }

    /// Recompute both hashes and compare with the stored ones
    pub async fn verify_integrity(&self, audit_id: Uuid) -> Result<bool> {
        let records = self.records.read().await;

        Ok(records.get(&audit_id).is_some_and(|record| {
            compute_profile_hash(&record.plan.profile) == record.profile_hash
                && compute_hash(&record.plan) == record.plan_hash
        }))
    }

    pub async fn len(&self) -> usize {
        self.records.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.records.read().await.is_empty()
    }
}

impl Default for AuditLog {
    fn default() -> Self {
        Self::new()
    }
}

pub fn compute_profile_hash(profile: &UserProfile) -> String {
    compute_hash(profile)
}

/// SHA-256 of a value's JSON form, streamed into the hasher
fn compute_hash<T: Serialize>(value: &T) -> String {
    let mut hasher = Sha256::new();

    if serde_json::to_writer(&mut HashWriter(&mut hasher), value).is_err() {
        return String::new();
    }

    hex::encode(hasher.finalize())
}

/// Adapter to allow writing into Sha256 via std::io::Write
struct HashWriter<'a, H: Digest>(&'a mut H);

impl<'a, H: Digest> Write for HashWriter<'a, H> {
    fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
        self.0.update(buf);
        Ok(buf.len())
    }

    fn flush(&mut self) -> std::io::Result<()> {
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{AllocationMethod, AllocationWeights, AssetClass, Market, Position, RiskTolerance};
    use crate::parser::PlanParser;
    use crate::projection::Projections;
    use crate::risk::RiskProfiler;
    use std::collections::BTreeSet;

    fn profile() -> UserProfile {
        UserProfile {
            age: 28,
            retirement_age: 65,
            annual_income: 80_000.0,
            annual_expenses: 50_000.0,
            current_savings: 5_000.0,
            monthly_investable: None,
            risk_tolerance: RiskTolerance::Moderate,
            goals: vec![],
            compliance: BTreeSet::new(),
            preferred_markets: vec![Market::Uae],
            currency: "AED".to_string(),
            experience: None,
        }
    }

    fn plan() -> Plan {
        let p = profile();
        let risk = RiskProfiler::default().assess(&p);
        let allocation = AllocationWeights {
            positions: vec![Position {
                symbol: "AGG".to_string(),
                name: "iShares Core US Aggregate Bond ETF".to_string(),
                asset_class: AssetClass::FixedIncome,
                expected_return: 0.035,
                risk_level: 3,
                weight: 1.0,
            }],
            method: AllocationMethod::SingleAsset,
            fallback_reason: None,
            expected_return: 0.035,
            variance: 0.0025,
            within_risk_budget: true,
        };
        PlanParser::new(Projections::new(0.08, 25), 8.0)
            .synthesize(&p, &risk, &allocation)
            .plan
    }

    #[test]
    fn test_profile_hash_is_stable() {
        let a = compute_profile_hash(&profile());
        let b = compute_profile_hash(&profile());
        assert_eq!(a, b);
        assert_eq!(a.len(), 64);

        let mut changed = profile();
        changed.age = 29;
        assert_ne!(a, compute_profile_hash(&changed));
    }

    #[tokio::test]
    async fn test_record_and_verify() {
        let log = AuditLog::new();
        let record = PlanRecord::new(plan(), None, 42);
        let id = log.record(record.clone()).await.unwrap();

        assert_eq!(log.get(id).await.unwrap(), Some(record.clone()));
        assert!(log.verify_integrity(id).await.unwrap());
        assert!(!log.verify_integrity(Uuid::new_v4()).await.unwrap());

        // Same id twice is rejected
        assert!(matches!(log.record(record).await, Err(PlanError::Audit(_))));
        assert_eq!(log.len().await, 1);
    }

    #[tokio::test]
    async fn test_bounded_log_rejects_when_full() {
        let log = AuditLog::bounded(1);
        log.record(PlanRecord::new(plan(), None, 1)).await.unwrap();

        let overflow = log.record(PlanRecord::new(plan(), None, 2)).await;
        assert!(matches!(overflow, Err(PlanError::Audit(_))));
        assert_eq!(log.len().await, 1);
    }

    #[tokio::test]
    async fn test_list_recent_orders_newest_first() {
        let log = AuditLog::default();
        let mut older = PlanRecord::new(plan(), None, 1);
        older.created_at = Utc::now() - chrono::Duration::seconds(60);
        let newer = PlanRecord::new(plan(), None, 2);

        log.record(older.clone()).await.unwrap();
        log.record(newer.clone()).await.unwrap();

        let recent = log.list_recent(10).await.unwrap();
        assert_eq!(recent.len(), 2);
        assert_eq!(recent[0].audit_id, newer.audit_id);
        assert_eq!(log.list_recent(1).await.unwrap().len(), 1);
    }
}
