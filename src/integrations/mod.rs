//! Narrow contracts to the collaborators the settlement core consumes:
//! the agent directory, the equipment debt source, the notification sink,
//! and the reward-fund ledger.
//!
//! Each is a trait object held by the service layer; the in-memory
//! implementations back the tests and local runs.

use crate::domain::Decimal;
use async_trait::async_trait;
use std::collections::HashMap;
use std::fmt;
use std::sync::Mutex;

/// Agent lifecycle state as reported by the directory.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AgentState {
    Active,
    Suspended,
    Retired,
}

/// What the directory knows about an agent.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AgentProfile {
    pub id: i64,
    pub state: AgentState,
    pub sponsor_id: Option<i64>,
    pub requires_password_change: bool,
}

impl AgentProfile {
    /// Whether the agent may create batches or record sales.
    pub fn is_eligible(&self) -> bool {
        self.state == AgentState::Active && !self.requires_password_change
    }
}

/// Error type for collaborator calls.
#[derive(Debug, Clone)]
pub enum CollaboratorError {
    NotFound(i64),
    Unavailable(String),
}

impl fmt::Display for CollaboratorError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CollaboratorError::NotFound(id) => write!(f, "agent {} not found", id),
            CollaboratorError::Unavailable(msg) => write!(f, "collaborator unavailable: {}", msg),
        }
    }
}

impl std::error::Error for CollaboratorError {}

/// Identity/agent directory.
#[async_trait]
pub trait AgentDirectory: Send + Sync + fmt::Debug {
    async fn find_agent(&self, id: i64) -> Result<AgentProfile, CollaboratorError>;
}

/// Equipment-related debt owed by an agent; feeds the bulk debt-clearing step.
#[async_trait]
pub trait EquipmentDebtSource: Send + Sync + fmt::Debug {
    async fn debt_for(&self, agent_id: i64) -> Result<Decimal, CollaboratorError>;
}

/// Fire-and-forget notification sink. Failures are logged by callers and
/// never propagate into financial transactions.
#[async_trait]
pub trait NotificationSink: Send + Sync + fmt::Debug {
    async fn notify(
        &self,
        agent_id: i64,
        template_key: &str,
        data: serde_json::Value,
    ) -> Result<(), CollaboratorError>;
}

/// Reward-fund ledger, credited on batch activation and forced-batch creation.
#[async_trait]
pub trait RewardFundLedger: Send + Sync + fmt::Debug {
    async fn record_inflow(
        &self,
        amount: Decimal,
        reason: &str,
        batch_id: i64,
    ) -> Result<(), CollaboratorError>;
}

/// In-memory directory keyed by agent id.
#[derive(Debug, Default)]
pub struct InMemoryAgentDirectory {
    agents: Mutex<HashMap<i64, AgentProfile>>,
}

impl InMemoryAgentDirectory {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&self, profile: AgentProfile) {
        self.agents.lock().unwrap().insert(profile.id, profile);
    }

    /// Convenience: register an active agent with the given sponsor.
    pub fn insert_active(&self, id: i64, sponsor_id: Option<i64>) {
        self.insert(AgentProfile {
            id,
            state: AgentState::Active,
            sponsor_id,
            requires_password_change: false,
        });
    }
}

#[async_trait]
impl AgentDirectory for InMemoryAgentDirectory {
    async fn find_agent(&self, id: i64) -> Result<AgentProfile, CollaboratorError> {
        self.agents
            .lock()
            .unwrap()
            .get(&id)
            .cloned()
            .ok_or(CollaboratorError::NotFound(id))
    }
}

/// In-memory debt table; absent agents owe nothing.
#[derive(Debug, Default)]
pub struct InMemoryDebtSource {
    debts: Mutex<HashMap<i64, Decimal>>,
}

impl InMemoryDebtSource {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_debt(&self, agent_id: i64, amount: Decimal) {
        self.debts.lock().unwrap().insert(agent_id, amount);
    }
}

#[async_trait]
impl EquipmentDebtSource for InMemoryDebtSource {
    async fn debt_for(&self, agent_id: i64) -> Result<Decimal, CollaboratorError> {
        Ok(self
            .debts
            .lock()
            .unwrap()
            .get(&agent_id)
            .copied()
            .unwrap_or_else(Decimal::zero))
    }
}

/// Captures notifications for assertions.
#[derive(Debug, Default)]
pub struct RecordingNotificationSink {
    sent: Mutex<Vec<(i64, String)>>,
}

impl RecordingNotificationSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn sent(&self) -> Vec<(i64, String)> {
        self.sent.lock().unwrap().clone()
    }
}

#[async_trait]
impl NotificationSink for RecordingNotificationSink {
    async fn notify(
        &self,
        agent_id: i64,
        template_key: &str,
        _data: serde_json::Value,
    ) -> Result<(), CollaboratorError> {
        self.sent
            .lock()
            .unwrap()
            .push((agent_id, template_key.to_string()));
        Ok(())
    }
}

/// Captures reward-fund inflows for assertions.
#[derive(Debug, Default)]
pub struct RecordingRewardFund {
    inflows: Mutex<Vec<(Decimal, String, i64)>>,
}

impl RecordingRewardFund {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn inflows(&self) -> Vec<(Decimal, String, i64)> {
        self.inflows.lock().unwrap().clone()
    }
}

#[async_trait]
impl RewardFundLedger for RecordingRewardFund {
    async fn record_inflow(
        &self,
        amount: Decimal,
        reason: &str,
        batch_id: i64,
    ) -> Result<(), CollaboratorError> {
        self.inflows
            .lock()
            .unwrap()
            .push((amount, reason.to_string(), batch_id));
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_directory_lookup_and_eligibility() {
        let directory = InMemoryAgentDirectory::new();
        directory.insert_active(7, Some(3));
        directory.insert(AgentProfile {
            id: 8,
            state: AgentState::Active,
            sponsor_id: None,
            requires_password_change: true,
        });

        let agent = directory.find_agent(7).await.unwrap();
        assert!(agent.is_eligible());
        assert_eq!(agent.sponsor_id, Some(3));

        let stale = directory.find_agent(8).await.unwrap();
        assert!(!stale.is_eligible());

        assert!(matches!(
            directory.find_agent(99).await,
            Err(CollaboratorError::NotFound(99))
        ));
    }

    #[tokio::test]
    async fn test_debt_source_defaults_to_zero() {
        let debts = InMemoryDebtSource::new();
        assert_eq!(debts.debt_for(5).await.unwrap(), Decimal::zero());
        debts.set_debt(5, Decimal::from_units(300));
        assert_eq!(debts.debt_for(5).await.unwrap(), Decimal::from_units(300));
    }

    #[tokio::test]
    async fn test_recording_sinks_capture() {
        let sink = RecordingNotificationSink::new();
        sink.notify(4, "settlement_pending", serde_json::json!({}))
            .await
            .unwrap();
        assert_eq!(sink.sent(), vec![(4, "settlement_pending".to_string())]);

        let fund = RecordingRewardFund::new();
        fund.record_inflow(Decimal::from_units(100), "batch_activation", 2)
            .await
            .unwrap();
        assert_eq!(fund.inflows().len(), 1);
    }
}
