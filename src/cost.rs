use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::sync::Mutex;
use tracing::warn;

use crate::providers::base::Usage;

/// Aggregated usage for one turn, across every completion call it made.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TurnCostRecord {
    pub model_calls: u32,
    pub input_tokens: i64,
    pub output_tokens: i64,
    pub cost: f64,
    pub currency: String,
}

impl Default for TurnCostRecord {
    fn default() -> Self {
        Self {
            model_calls: 0,
            input_tokens: 0,
            output_tokens: 0,
            cost: 0.0,
            currency: "USD".to_string(),
        }
    }
}

/// What gets handed to the cost-tracking sink when a turn finalizes.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CostEntry {
    pub provider: String,
    /// What triggered the spend, e.g. "chat" or "chat-stream"
    pub trigger: String,
    pub used_tools: bool,
    pub message_count: usize,
    pub record: TurnCostRecord,
}

/// Persistence boundary for per-turn cost records.
#[async_trait]
pub trait CostSink: Send + Sync {
    async fn record(&self, user_id: &str, entry: CostEntry) -> anyhow::Result<()>;
}

/// Sink used in tests and ephemeral deployments; keeps records in memory.
#[derive(Default)]
pub struct MemoryCostSink {
    records: Mutex<Vec<(String, CostEntry)>>,
}

impl MemoryCostSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn records(&self) -> Vec<(String, CostEntry)> {
        self.records.lock().await.clone()
    }
}

#[async_trait]
impl CostSink for MemoryCostSink {
    async fn record(&self, user_id: &str, entry: CostEntry) -> anyhow::Result<()> {
        self.records
            .lock()
            .await
            .push((user_id.to_string(), entry));
        Ok(())
    }
}

/// Accumulates usage additively across the completion calls of one turn and
/// finalizes exactly one record. Created fresh per turn; a partial turn still
/// finalizes with whatever accrued, since that compute was spent regardless.
#[derive(Debug, Default)]
pub struct CostAggregator {
    record: TurnCostRecord,
}

impl CostAggregator {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record(&mut self, usage: &Usage) {
        self.record.model_calls += 1;
        self.record.input_tokens += i64::from(usage.input_tokens.unwrap_or(0));
        self.record.output_tokens += i64::from(usage.output_tokens.unwrap_or(0));
        self.record.cost += usage.cost.unwrap_or(0.0);

        if self.record.model_calls == 1 {
            self.record.currency = usage.currency.clone();
        } else if self.record.currency != usage.currency {
            // Mixed currencies within one turn would need FX handling; keep
            // the first-seen currency and flag the discrepancy.
            warn!(
                have = %self.record.currency,
                got = %usage.currency,
                "mixed currencies in one turn, keeping first-seen"
            );
        }
    }

    pub fn model_calls(&self) -> u32 {
        self.record.model_calls
    }

    pub fn snapshot(&self) -> TurnCostRecord {
        self.record.clone()
    }

    /// Persist the turn's record. Sink failures are logged, never fatal: the
    /// user still gets their answer even if billing lags.
    pub async fn finalize(
        self,
        sink: &dyn CostSink,
        user_id: &str,
        provider: &str,
        trigger: &str,
        used_tools: bool,
        message_count: usize,
    ) -> TurnCostRecord {
        let record = self.record;
        let entry = CostEntry {
            provider: provider.to_string(),
            trigger: trigger.to_string(),
            used_tools,
            message_count,
            record: record.clone(),
        };
        if let Err(e) = sink.record(user_id, entry).await {
            warn!(user_id, error = %e, "failed to persist turn cost record");
        }
        record
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_accumulates_across_calls() {
        let mut aggregator = CostAggregator::new();
        aggregator.record(&Usage::new(Some(100), Some(10), Some(0.001)));
        aggregator.record(&Usage::new(Some(200), Some(20), Some(0.002)));
        aggregator.record(&Usage::new(None, None, None));

        let record = aggregator.snapshot();
        assert_eq!(record.model_calls, 3);
        assert_eq!(record.input_tokens, 300);
        assert_eq!(record.output_tokens, 30);
        assert!((record.cost - 0.003).abs() < 1e-12);
        assert_eq!(record.currency, "USD");
    }

    #[tokio::test]
    async fn test_finalize_persists_one_entry() {
        let sink = MemoryCostSink::new();
        let mut aggregator = CostAggregator::new();
        aggregator.record(&Usage::new(Some(10), Some(5), Some(0.0001)));

        let record = aggregator
            .finalize(&sink, "alice", "openai", "chat", true, 4)
            .await;

        let records = sink.records().await;
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].0, "alice");
        assert_eq!(records[0].1.trigger, "chat");
        assert!(records[0].1.used_tools);
        assert_eq!(records[0].1.message_count, 4);
        assert_eq!(records[0].1.record, record);
    }
}
