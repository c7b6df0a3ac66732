//! Bulk settlement: one wholesale sale reconciled against every ACTIVE batch
//! of the seller in a single confirmation transaction.
//!
//! The service assembles a snapshot (batches, tranches, pending settlements,
//! external debt, sponsor chain), runs the pure allocation waterfall over it,
//! and hands the repository the complete write set. Nothing here mutates
//! state directly; a lost version race surfaces as `ConcurrencyConflict` and
//! the caller retries against a fresh snapshot.

use crate::config::Config;
use crate::db::repo::{
    BatchMoneyUpdate, BatchSpec, BulkConfirmOutcome, BulkConfirmWrite, NewBulkSettlement,
    Repository, SettlementAbsorption, TrancheSpec, TrancheStockUpdate,
};
use crate::domain::{
    batch::{investment_for, tranche_stocks_for},
    bulk::BulkSettlementState,
    tranche::TrancheState,
    AffectedTranche, Batch, BatchState, BulkSettlement, CommissionModel, Decimal, DomainEvent,
    Settlement, SponsorShare, TimeMs, Tranche,
};
use crate::engine::allocation::{allocate, AllocationInput};
use crate::engine::cascade::MAX_CASCADE_HOPS;
use crate::error::DomainError;
use crate::integrations::{
    AgentDirectory, EquipmentDebtSource, NotificationSink, RewardFundLedger,
};
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use tracing::{info, warn};
use uuid::Uuid;

pub struct BulkService {
    repo: Arc<Repository>,
    directory: Arc<dyn AgentDirectory>,
    debts: Arc<dyn EquipmentDebtSource>,
    reward_fund: Arc<dyn RewardFundLedger>,
    notifier: Arc<dyn NotificationSink>,
    config: Config,
}

impl BulkService {
    pub fn new(
        repo: Arc<Repository>,
        directory: Arc<dyn AgentDirectory>,
        debts: Arc<dyn EquipmentDebtSource>,
        reward_fund: Arc<dyn RewardFundLedger>,
        notifier: Arc<dyn NotificationSink>,
        config: Config,
    ) -> Self {
        Self {
            repo,
            directory,
            debts,
            reward_fund,
            notifier,
            config,
        }
    }

    /// Record a bulk sale as a PENDING bulk settlement.
    ///
    /// `bulk_sale_id` is the caller's external id; when one is supplied and a
    /// settlement for it already exists, the existing record is returned, so
    /// retried requests are idempotent.
    pub async fn create(
        &self,
        seller_id: i64,
        units: i64,
        gross_revenue: Decimal,
        model: CommissionModel,
        bulk_sale_id: Option<String>,
    ) -> Result<BulkSettlement, DomainError> {
        if units <= 0 {
            return Err(DomainError::InvalidArgument {
                field: "units",
                reason: format!("must be positive, got {units}"),
            });
        }
        self.check_eligibility(seller_id).await?;

        if let Some(sale_id) = &bulk_sale_id {
            if let Some(existing) = self.repo.get_bulk_settlement_by_sale(sale_id).await? {
                return Ok(existing);
            }
        }

        let new = NewBulkSettlement {
            bulk_sale_id: bulk_sale_id.unwrap_or_else(|| Uuid::new_v4().to_string()),
            seller_id,
            commission_model: model,
            units,
            gross_revenue,
            created_at: TimeMs::now(),
        };
        let id = self.repo.create_bulk_settlement(&new).await?;
        info!(
            bulk_settlement_id = id,
            seller_id, units, revenue = %gross_revenue, "bulk settlement recorded"
        );
        self.load(id).await
    }

    /// Confirm a PENDING bulk settlement: run the waterfall, consume stock,
    /// absorb pending settlements, and materialize a forced batch for any
    /// units the seller's batches cannot cover.
    pub async fn confirm(&self, bulk_id: i64) -> Result<BulkSettlement, DomainError> {
        let bulk = self.load(bulk_id).await?;
        if bulk.state != BulkSettlementState::Pending {
            return Err(DomainError::InvalidStateTransition {
                entity: "bulk_settlement",
                id: bulk_id,
                from: bulk.state.to_string(),
                requested: BulkSettlementState::Succeeded.to_string(),
            });
        }

        let now = TimeMs::now();
        let batches = self
            .repo
            .list_batches_for_agent(bulk.seller_id, BatchState::Active)
            .await?;
        let mut tranches_by_batch: Vec<(Batch, Vec<Tranche>)> = Vec::with_capacity(batches.len());
        for batch in batches {
            let tranches = self.repo.list_tranches(batch.id).await?;
            tranches_by_batch.push((batch, tranches));
        }

        let available: i64 = tranches_by_batch
            .iter()
            .flat_map(|(_, tranches)| tranches.iter())
            .filter(|t| t.state != TrancheState::Finalized)
            .map(|t| t.current_stock)
            .sum();
        let forced_units = (bulk.units - available).max(0);

        // Pool: bulk revenue plus every batch's retained retail money, which
        // this confirmation sweeps over to the operator in full.
        let retained: Decimal = tranches_by_batch
            .iter()
            .map(|(b, _)| b.retained_money())
            .sum();
        let pool = bulk.gross_revenue + retained;

        let pending = self
            .repo
            .list_pending_settlements_for_agent(bulk.seller_id)
            .await?;
        let settlement_dues: Vec<(&Settlement, Decimal)> = pending
            .iter()
            .map(|s| (s, s.outstanding()))
            .filter(|(_, due)| due.is_positive())
            .collect();
        let total_settlement_due: Decimal = settlement_dues.iter().map(|(_, d)| *d).sum();

        // Investment already demanded by a pending settlement is excluded
        // from the batch's direct due, so the pool never pays it twice.
        let mut pending_inv_by_batch: HashMap<i64, Decimal> = HashMap::new();
        for (s, due) in &settlement_dues {
            let inv = s.expected_investment.min(*due);
            let entry = pending_inv_by_batch
                .entry(s.batch_id)
                .or_insert_with(Decimal::zero);
            *entry = *entry + inv;
        }

        let equipment_debt = match self.debts.debt_for(bulk.seller_id).await {
            Ok(d) => d,
            Err(e) => {
                warn!(seller_id = bulk.seller_id, error = %e, "debt source unavailable, assuming zero");
                Decimal::zero()
            }
        };

        let operator_due_existing: Vec<(i64, Decimal)> = tranches_by_batch
            .iter()
            .map(|(b, _)| {
                let pending_inv = pending_inv_by_batch
                    .get(&b.id)
                    .copied()
                    .unwrap_or_else(Decimal::zero);
                (b.id, (b.operator_investment_due() - pending_inv).floor_zero())
            })
            .collect();
        let agent_due_existing: Vec<(i64, Decimal)> = tranches_by_batch
            .iter()
            .map(|(b, _)| (b.id, b.agent_investment_due()))
            .collect();

        let forced_investment = if forced_units > 0 {
            Some(investment_for(
                forced_units,
                self.config.unit_price,
                self.config.operator_investment_pct,
            ))
        } else {
            None
        };

        let sponsor_chain = if bulk.commission_model == CommissionModel::FiftyFiftyCascade {
            self.sponsor_chain(bulk.seller_id).await
        } else {
            Vec::new()
        };

        let outcome = allocate(&AllocationInput {
            pool,
            debts: total_settlement_due + equipment_debt,
            operator_due_existing,
            operator_due_forced: forced_investment
                .map(|i| i.operator)
                .unwrap_or_else(Decimal::zero),
            agent_due_existing,
            agent_due_forced: forced_investment
                .map(|i| i.agent)
                .unwrap_or_else(Decimal::zero),
            model: bulk.commission_model,
            sponsor_chain,
            operator_id: self.config.operator_agent_id,
        });

        // Cleared debt pays pending settlements oldest first; whatever is
        // left went against equipment debt and only gets reported.
        let mut settlement_pool = outcome.debt_cleared.min(total_settlement_due);
        let mut settlement_updates = Vec::new();
        let mut closed_settlement_ids = Vec::new();
        let mut absorbed_inv_by_batch: HashMap<i64, Decimal> = HashMap::new();
        let mut absorbed_profit_by_batch: HashMap<i64, Decimal> = HashMap::new();
        for (s, due) in &settlement_dues {
            if !settlement_pool.is_positive() {
                break;
            }
            let absorb = settlement_pool.min(*due);
            settlement_pool = settlement_pool - absorb;
            let close = absorb == *due;
            if close {
                closed_settlement_ids.push(s.id);
            }
            settlement_updates.push(SettlementAbsorption {
                settlement_id: s.id,
                version: s.version,
                new_absorbed: s.absorbed_amount + absorb,
                new_shortfall: *due - absorb,
                close,
            });
            // Absorption covers the investment component first; the rest is
            // operator profit and counts as claimed on the batch.
            let remaining_inv = (s.expected_investment - s.absorbed_amount).floor_zero();
            let inv_credit = absorb.min(remaining_inv);
            if inv_credit.is_positive() {
                let entry = absorbed_inv_by_batch
                    .entry(s.batch_id)
                    .or_insert_with(Decimal::zero);
                *entry = *entry + inv_credit;
            }
            let profit_credit = absorb - inv_credit;
            if profit_credit.is_positive() {
                let entry = absorbed_profit_by_batch
                    .entry(s.batch_id)
                    .or_insert_with(Decimal::zero);
                *entry = *entry + profit_credit;
            }
        }

        // Stock consumption: oldest batch first, tranches in ordinal order.
        let mut remaining = bulk.units;
        let mut tranche_updates = Vec::new();
        let mut affected_tranches = Vec::new();
        let mut release_tranches = Vec::new();
        let mut events = Vec::new();
        let mut touched: HashSet<i64> = HashSet::new();
        for (batch, tranches) in &tranches_by_batch {
            if remaining == 0 {
                break;
            }
            let mut last_finalized_ordinal = None;
            for tranche in tranches {
                if remaining == 0 {
                    break;
                }
                if tranche.state == TrancheState::Finalized || tranche.current_stock == 0 {
                    continue;
                }
                let take = tranche.current_stock.min(remaining);
                remaining -= take;
                let new_stock = tranche.current_stock - take;
                let finalize = new_stock == 0;
                touched.insert(tranche.id);
                tranche_updates.push(TrancheStockUpdate {
                    tranche_id: tranche.id,
                    version: tranche.version,
                    new_stock,
                    new_bulk_consumed: tranche.bulk_consumed + take,
                    finalize,
                });
                affected_tranches.push(AffectedTranche {
                    tranche_id: tranche.id,
                    batch_id: batch.id,
                    units: take,
                });
                if finalize {
                    if tranche.is_final(tranches.len()) {
                        events.push(DomainEvent::ClosureActivationRequested {
                            batch_id: batch.id,
                            tranche_id: tranche.id,
                        });
                    } else {
                        last_finalized_ordinal = Some(tranche.ordinal);
                    }
                }
            }
            // Release the tranche after the last one the bulk emptied, when
            // the bulk left it untouched.
            if let Some(ordinal) = last_finalized_ordinal {
                if let Some(next) = tranches.iter().find(|t| {
                    t.ordinal == ordinal + 1
                        && t.state == TrancheState::Inactive
                        && !touched.contains(&t.id)
                }) {
                    release_tranches.push((next.id, next.version));
                    events.push(DomainEvent::TrancheReleased {
                        tranche_id: next.id,
                        batch_id: batch.id,
                        ordinal: next.ordinal,
                    });
                }
            }
        }

        let operator_recovered: HashMap<i64, Decimal> =
            outcome.operator_recovered_existing.iter().copied().collect();
        let agent_recovered: HashMap<i64, Decimal> =
            outcome.agent_recovered_existing.iter().copied().collect();

        let mut batch_updates = Vec::new();
        let mut involved_batch_ids = Vec::new();
        for (batch, tranches) in &tranches_by_batch {
            let zero = Decimal::zero();
            let op_delta = operator_recovered.get(&batch.id).copied().unwrap_or(zero)
                + absorbed_inv_by_batch.get(&batch.id).copied().unwrap_or(zero);
            let agent_delta = agent_recovered.get(&batch.id).copied().unwrap_or(zero);
            let profit_delta = absorbed_profit_by_batch
                .get(&batch.id)
                .copied()
                .unwrap_or(zero);
            let swept = batch.retained_money();
            let stock_touched = tranches.iter().any(|t| touched.contains(&t.id));
            if op_delta.is_zero()
                && agent_delta.is_zero()
                && profit_delta.is_zero()
                && swept.is_zero()
                && !stock_touched
            {
                continue;
            }
            involved_batch_ids.push(batch.id);
            batch_updates.push(BatchMoneyUpdate {
                batch_id: batch.id,
                version: batch.version,
                // Retained money was swept into the pool in full.
                new_money_transferred: batch.money_collected,
                new_operator_recovered: batch.operator_recovered + op_delta,
                new_agent_recovered: batch.agent_recovered + agent_delta,
                new_operator_profit_claimed: batch.operator_profit_claimed + profit_delta,
            });
        }

        let forced_batch = forced_investment.map(|investment| {
            let stocks = tranche_stocks_for(forced_units);
            BatchSpec {
                agent_id: bulk.seller_id,
                quantity: forced_units,
                commission_model: bulk.commission_model,
                state: BatchState::Finalized,
                unit_price: self.config.unit_price,
                total_investment: investment.total,
                operator_investment: investment.operator,
                agent_investment: investment.agent,
                operator_recovered: outcome.operator_recovered_forced,
                agent_recovered: outcome.agent_recovered_forced,
                forced: true,
                origin_bulk_sale_id: Some(bulk.bulk_sale_id.clone()),
                created_at: now,
                activated_at: Some(now),
                finalized_at: Some(now),
                tranches: stocks
                    .into_iter()
                    .enumerate()
                    .map(|(i, stock)| TrancheSpec {
                        ordinal: i as i32 + 1,
                        initial_stock: stock,
                        current_stock: 0,
                        bulk_consumed: stock,
                        state: TrancheState::Finalized,
                    })
                    .collect(),
            }
        });

        events.push(DomainEvent::BulkSettlementSucceeded {
            bulk_settlement_id: bulk.id,
            seller_id: bulk.seller_id,
            net_profit: outcome.net_profit,
        });

        let write = BulkConfirmWrite {
            bulk_id: bulk.id,
            bulk_version: bulk.version,
            debt_cleared: outcome.debt_cleared,
            operator_investment_existing: outcome.operator_recovered_existing_total(),
            operator_investment_forced: outcome.operator_recovered_forced,
            agent_investment_existing: outcome.agent_recovered_existing_total(),
            agent_investment_forced: outcome.agent_recovered_forced,
            net_profit: outcome.net_profit,
            agent_share: outcome.split.agent_share,
            operator_share: outcome.split.operator_share,
            sponsor_shares: outcome
                .split
                .sponsor_shares
                .iter()
                .map(|&(agent_id, amount)| SponsorShare { agent_id, amount })
                .collect(),
            involved_batch_ids,
            affected_tranches,
            closed_settlement_ids,
            tranche_updates,
            settlement_updates,
            batch_updates,
            release_tranches,
            forced_batch,
            events,
        };

        let outcome_db = self.repo.confirm_bulk_settlement(&write, now).await?;
        let forced_batch_id = match outcome_db {
            BulkConfirmOutcome::Applied { forced_batch_id } => forced_batch_id,
            BulkConfirmOutcome::Conflict => {
                return Err(DomainError::ConcurrencyConflict {
                    entity: "bulk_settlement",
                    id: bulk.id,
                })
            }
        };

        info!(
            bulk_settlement_id = bulk.id,
            seller_id = bulk.seller_id,
            units = bulk.units,
            forced_units,
            net_profit = %outcome.net_profit,
            "bulk settlement confirmed"
        );
        if let (Some(batch_id), Some(investment)) = (forced_batch_id, forced_investment) {
            if let Err(e) = self
                .reward_fund
                .record_inflow(investment.total, "forced_batch", batch_id)
                .await
            {
                warn!(batch_id, error = %e, "reward fund inflow failed");
            }
        }
        if let Err(e) = self
            .notifier
            .notify(
                bulk.seller_id,
                "bulk_settlement_succeeded",
                serde_json::json!({
                    "bulkSettlementId": bulk.id,
                    "netProfit": outcome.net_profit,
                }),
            )
            .await
        {
            warn!(bulk_settlement_id = bulk.id, error = %e, "notification failed");
        }

        self.load(bulk.id).await
    }

    pub async fn get(&self, bulk_id: i64) -> Result<BulkSettlement, DomainError> {
        self.load(bulk_id).await
    }

    /// Walk the sponsor chain upward from the seller, closest first, bounded
    /// by the cascade hop cap. A directory failure truncates the chain; the
    /// operator then receives the remainder, which is the safe direction.
    async fn sponsor_chain(&self, seller_id: i64) -> Vec<i64> {
        let mut chain = Vec::new();
        let mut current = seller_id;
        for _ in 0..MAX_CASCADE_HOPS {
            let profile = match self.directory.find_agent(current).await {
                Ok(p) => p,
                Err(e) => {
                    warn!(agent_id = current, error = %e, "sponsor lookup failed, truncating chain");
                    break;
                }
            };
            match profile.sponsor_id {
                Some(sponsor) if sponsor != current && !chain.contains(&sponsor) => {
                    chain.push(sponsor);
                    if sponsor == self.config.operator_agent_id {
                        break;
                    }
                    current = sponsor;
                }
                _ => break,
            }
        }
        chain
    }

    async fn check_eligibility(&self, agent_id: i64) -> Result<(), DomainError> {
        let profile = self.directory.find_agent(agent_id).await.map_err(|_| {
            DomainError::EntityNotFound {
                entity: "agent",
                id: agent_id,
            }
        })?;
        if !profile.is_eligible() {
            return Err(DomainError::IneligibleAgent {
                agent_id,
                reason: if profile.requires_password_change {
                    "password change required".to_string()
                } else {
                    "agent is not active".to_string()
                },
            });
        }
        Ok(())
    }

    async fn load(&self, bulk_id: i64) -> Result<BulkSettlement, DomainError> {
        self.repo
            .get_bulk_settlement(bulk_id)
            .await?
            .ok_or(DomainError::EntityNotFound {
                entity: "bulk_settlement",
                id: bulk_id,
            })
    }
}
