use crate::config::TableConfig;
use anyhow::Result;
use async_trait::async_trait;
use aws_config::BehaviorVersion;
use aws_sdk_dynamodb::config::Builder as DynamoConfigBuilder;
use aws_sdk_dynamodb::types::AttributeValue;
use aws_sdk_dynamodb::Client as DynamoClient;
use std::sync::Arc;
use std::time::{Duration, SystemTime, UNIX_EPOCH};
use thiserror::Error;
use tracing::{debug, info, warn};

/// Last-seen timestamp record for a rate-limit key.
///
/// One record per `name`; overwritten on each successful claim. The selector
/// records which identity (or the literal `"last"`) took the claim; it is
/// not part of the key.
#[derive(Debug, Clone, PartialEq)]
pub struct RateRecord {
    pub name: String,
    pub selector: String,
    /// Claim time as floating-point epoch seconds.
    pub timestamp: f64,
}

/// Errors from the backing record store.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("rate table request failed: {0}")]
    Request(String),
}

/// Conditional-write seam over the rate table.
///
/// `put_if_stale` must be atomic: the record is written only when no record
/// exists under `record.name` or the existing record's timestamp is at most
/// `cutoff`. Returns `Ok(true)` when the write landed, `Ok(false)` when a
/// fresher record rejected it. A naive read-then-write implementation is
/// racy under concurrent callers and does not satisfy this trait.
#[async_trait]
pub trait ClaimStore: Send + Sync {
    async fn put_if_stale(&self, record: &RateRecord, cutoff: f64) -> Result<bool, StoreError>;
}

/// Per-event rate gate backed by a [`ClaimStore`].
pub struct RateGate {
    store: Arc<dyn ClaimStore>,
}

impl RateGate {
    pub fn new(store: Arc<dyn ClaimStore>) -> Self {
        Self { store }
    }

    /// Attempt to claim a rate-limit slot for `name` at the current time.
    ///
    /// Returns true when the event may proceed. Any storage failure is
    /// logged and treated as "not allowed"; a denied claim is dropped, not
    /// queued for replay.
    pub async fn claim(&self, name: &str, selector: &str, grace: Duration) -> bool {
        let now = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_secs_f64())
            .unwrap_or(0.0);

        self.claim_at(name, selector, grace.as_secs_f64(), now).await
    }

    /// Deterministic core of [`claim`]: the claim succeeds iff no record
    /// exists for `name` or at least `grace_secs` elapsed since the
    /// recorded timestamp.
    pub async fn claim_at(&self, name: &str, selector: &str, grace_secs: f64, now: f64) -> bool {
        let record = RateRecord {
            name: name.to_string(),
            selector: selector.to_string(),
            timestamp: now,
        };
        let cutoff = now - grace_secs;

        match self.store.put_if_stale(&record, cutoff).await {
            Ok(true) => {
                debug!(name, selector, "rate claim accepted");
                true
            }
            Ok(false) => {
                debug!(name, selector, "rate claim rejected by fresher record");
                false
            }
            Err(e) => {
                warn!(name, error = %e, "rate table error, denying claim");
                metrics::counter!("gate.claims.store_errors").increment(1);
                false
            }
        }
    }
}

/// DynamoDB-backed [`ClaimStore`].
///
/// The whole check-and-write is a single `PutItem` with a condition
/// expression, so concurrent claimants race inside the store rather than in
/// this process.
pub struct DynamoClaimStore {
    client: DynamoClient,
    table: String,
}

impl DynamoClaimStore {
    pub async fn new(config: &TableConfig) -> Result<Self> {
        let aws_config = aws_config::defaults(BehaviorVersion::latest())
            .region(aws_config::Region::new(config.region.clone()))
            .load()
            .await;

        let mut builder = DynamoConfigBuilder::from(&aws_config);

        // Custom endpoint for DynamoDB Local / LocalStack
        if let Some(ref endpoint_url) = config.endpoint_url {
            builder = builder.endpoint_url(endpoint_url);
        }

        let client = DynamoClient::from_conf(builder.build());

        info!(
            table = %config.table_name,
            region = %config.region,
            "Rate table client initialized"
        );

        Ok(Self {
            client,
            table: config.table_name.clone(),
        })
    }
}

#[async_trait]
impl ClaimStore for DynamoClaimStore {
    async fn put_if_stale(&self, record: &RateRecord, cutoff: f64) -> Result<bool, StoreError> {
        let result = self
            .client
            .put_item()
            .table_name(&self.table)
            .item("name", AttributeValue::S(record.name.clone()))
            .item("selector", AttributeValue::S(record.selector.clone()))
            .item("timestamp", AttributeValue::N(format_epoch(record.timestamp)))
            .condition_expression("attribute_not_exists(#name) OR #ts <= :cutoff")
            .expression_attribute_names("#name", "name")
            .expression_attribute_names("#ts", "timestamp")
            .expression_attribute_values(":cutoff", AttributeValue::N(format_epoch(cutoff)))
            .send()
            .await;

        match result {
            Ok(_) => Ok(true),
            Err(e) => {
                let rejected = e
                    .as_service_error()
                    .map(|se| se.is_conditional_check_failed_exception())
                    .unwrap_or(false);

                if rejected {
                    Ok(false)
                } else {
                    Err(StoreError::Request(e.to_string()))
                }
            }
        }
    }
}

/// Epoch seconds as a DynamoDB number string.
fn format_epoch(ts: f64) -> String {
    format!("{ts:.6}")
}

pub mod testing {
    //! In-memory [`ClaimStore`] with the same atomic check-and-write
    //! contract as the DynamoDB store, for exercising gate timing without
    //! a real table.

    use super::*;
    use std::collections::HashMap;
    use std::sync::Mutex;

    #[derive(Default)]
    pub struct MemoryClaimStore {
        records: Mutex<HashMap<String, RateRecord>>,
    }

    impl MemoryClaimStore {
        pub fn new() -> Self {
            Self::default()
        }

        pub fn record(&self, name: &str) -> Option<RateRecord> {
            self.records.lock().unwrap().get(name).cloned()
        }
    }

    #[async_trait]
    impl ClaimStore for MemoryClaimStore {
        async fn put_if_stale(&self, record: &RateRecord, cutoff: f64) -> Result<bool, StoreError> {
            let mut records = self.records.lock().unwrap();

            match records.get(&record.name) {
                Some(existing) if existing.timestamp > cutoff => Ok(false),
                _ => {
                    records.insert(record.name.clone(), record.clone());
                    Ok(true)
                }
            }
        }
    }

    /// Store whose every request fails, for the errors-deny path.
    pub struct FailingClaimStore;

    #[async_trait]
    impl ClaimStore for FailingClaimStore {
        async fn put_if_stale(&self, _record: &RateRecord, _cutoff: f64) -> Result<bool, StoreError> {
            Err(StoreError::Request("simulated outage".to_string()))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::testing::{FailingClaimStore, MemoryClaimStore};
    use super::*;

    fn gate_with_memory() -> (RateGate, Arc<MemoryClaimStore>) {
        let store = Arc::new(MemoryClaimStore::new());
        (RateGate::new(store.clone()), store)
    }

    #[tokio::test]
    async fn test_unseen_name_always_succeeds() {
        let (gate, _) = gate_with_memory();

        assert!(gate.claim_at("open", "alice", 60.0, 1000.0).await);
        assert!(gate.claim_at("unknown", "last", 60.0, 1000.0).await);
    }

    #[tokio::test]
    async fn test_claims_within_grace_fail_after_it_succeed() {
        let (gate, _) = gate_with_memory();

        // The worked example: grace=60s
        assert!(gate.claim_at("last-open", "alice", 60.0, 1000.0).await);
        assert!(!gate.claim_at("last-open", "alice", 60.0, 1030.0).await);
        assert!(gate.claim_at("last-open", "alice", 60.0, 1065.0).await);
    }

    #[tokio::test]
    async fn test_claim_succeeds_exactly_at_grace_boundary() {
        let (gate, _) = gate_with_memory();

        // t2 - t1 >= g admits the boundary itself
        assert!(gate.claim_at("open", "alice", 60.0, 1000.0).await);
        assert!(gate.claim_at("open", "alice", 60.0, 1060.0).await);
    }

    #[tokio::test]
    async fn test_successful_claim_overwrites_record() {
        let (gate, store) = gate_with_memory();

        assert!(gate.claim_at("open", "alice", 10.0, 100.0).await);
        assert!(gate.claim_at("open", "bob", 10.0, 115.0).await);

        let record = store.record("open").unwrap();
        assert_eq!(record.selector, "bob");
        assert_eq!(record.timestamp, 115.0);
    }

    #[tokio::test]
    async fn test_names_are_independent() {
        let (gate, _) = gate_with_memory();

        assert!(gate.claim_at("open", "alice", 60.0, 1000.0).await);
        assert!(gate.claim_at("unknown", "last", 60.0, 1001.0).await);
    }

    #[tokio::test]
    async fn test_store_error_denies_claim() {
        let gate = RateGate::new(Arc::new(FailingClaimStore));

        assert!(!gate.claim_at("open", "alice", 60.0, 1000.0).await);
    }

    #[tokio::test]
    async fn test_concurrent_claims_yield_exactly_one_success() {
        let (gate, _) = gate_with_memory();
        let gate = Arc::new(gate);

        let mut handles = Vec::new();
        for i in 0..32 {
            let gate = gate.clone();
            handles.push(tokio::spawn(async move {
                gate.claim_at("open", &format!("caller-{i}"), 60.0, 1000.0).await
            }));
        }

        let mut successes = 0;
        for handle in handles {
            if handle.await.unwrap() {
                successes += 1;
            }
        }

        assert_eq!(successes, 1);
    }

    #[test]
    fn test_format_epoch() {
        assert_eq!(format_epoch(1000.0), "1000.000000");
        assert_eq!(format_epoch(1000.25), "1000.250000");
    }
}
