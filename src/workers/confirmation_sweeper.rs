//! Background sweep over pay orders that need time-driven transitions:
//! lapsed reservations are expired, and orders waiting on confirmations are
//! re-verified with per-order exponential backoff until they settle or give up.

use chrono::{DateTime, Utc};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tracing::{debug, info, warn};

use crate::database::error::DatabaseError;
use crate::database::repository::PayOrderStore;
use crate::services::payorder::{PayOrder, PayOrderError, PayOrderService, PayOrderStatus};

/// Longest wait between two checks of the same order
pub const MAX_CONFIRMATION_BACKOFF: Duration = Duration::from_secs(600);

#[derive(Debug, Clone)]
pub struct ConfirmationSweeperConfig {
    /// How often the worker wakes up
    pub poll_interval: Duration,
    /// Orders fetched per query
    pub batch_size: i64,
    /// Confirmation checks before an order is failed
    pub max_attempts: i32,
    pub enabled: bool,
}

impl Default for ConfirmationSweeperConfig {
    fn default() -> Self {
        Self {
            poll_interval: Duration::from_secs(15),
            batch_size: 100,
            max_attempts: 12,
            enabled: true,
        }
    }
}

impl ConfirmationSweeperConfig {
    pub fn from_env() -> Self {
        let mut cfg = Self::default();
        cfg.poll_interval = Duration::from_secs(
            std::env::var("SWEEPER_POLL_INTERVAL_SECONDS")
                .ok()
                .and_then(|v| v.parse::<u64>().ok())
                .filter(|secs| *secs > 0)
                .unwrap_or(cfg.poll_interval.as_secs()),
        );
        cfg.batch_size = std::env::var("SWEEPER_BATCH_SIZE")
            .ok()
            .and_then(|v| v.parse::<i64>().ok())
            .unwrap_or(cfg.batch_size);
        cfg.max_attempts = std::env::var("SWEEPER_MAX_ATTEMPTS")
            .ok()
            .and_then(|v| v.parse::<i32>().ok())
            .unwrap_or(cfg.max_attempts);
        cfg.enabled = std::env::var("SWEEPER_ENABLED")
            .map(|v| v.to_lowercase() != "false")
            .unwrap_or(cfg.enabled);
        cfg
    }
}

/// Outcome counts of one sweep
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SweepReport {
    pub expired: usize,
    pub received: usize,
    pub failed: usize,
    pub still_pending: usize,
    pub skipped: usize,
}

pub struct ConfirmationSweeper {
    service: Arc<PayOrderService>,
    orders: Arc<dyn PayOrderStore>,
    config: ConfirmationSweeperConfig,
}

impl ConfirmationSweeper {
    pub fn new(
        service: Arc<PayOrderService>,
        orders: Arc<dyn PayOrderStore>,
        config: ConfirmationSweeperConfig,
    ) -> Self {
        Self {
            service,
            orders,
            config,
        }
    }

    pub async fn run(self, mut shutdown_rx: watch::Receiver<bool>) {
        info!(
            poll_interval_secs = self.config.poll_interval.as_secs(),
            batch_size = self.config.batch_size,
            max_attempts = self.config.max_attempts,
            "confirmation sweeper started"
        );

        loop {
            tokio::select! {
                _ = shutdown_rx.changed() => {
                    if *shutdown_rx.borrow() {
                        info!("confirmation sweeper stopping");
                        break;
                    }
                }
                _ = tokio::time::sleep(self.config.poll_interval) => {
                    match self.run_cycle().await {
                        Ok(report) if report != SweepReport::default() => {
                            info!(
                                expired = report.expired,
                                received = report.received,
                                failed = report.failed,
                                still_pending = report.still_pending,
                                "confirmation sweep finished"
                            );
                        }
                        Ok(_) => {}
                        Err(e) => warn!(error = %e, "confirmation sweep failed"),
                    }
                }
            }
        }

        info!("confirmation sweeper stopped");
    }

    /// One pass: expiry first, then confirmation re-checks.
    /// Only a failing batch query aborts the pass; per-order errors are logged.
    pub async fn run_cycle(&self) -> Result<SweepReport, DatabaseError> {
        let mut report = SweepReport::default();
        self.expire_lapsed(&mut report).await?;
        self.recheck_confirmations(&mut report).await?;
        Ok(report)
    }

    async fn expire_lapsed(&self, report: &mut SweepReport) -> Result<(), DatabaseError> {
        let lapsed = self
            .orders
            .find_expired(Utc::now(), self.config.batch_size)
            .await?;

        for order in lapsed {
            match self.service.expire(order.id).await {
                Ok(_) => {
                    report.expired += 1;
                    info!(payorder_id = %order.id, "reservation expired");
                }
                // a payment landed between the query and the update
                Err(PayOrderError::InvalidState { status, .. }) => {
                    debug!(payorder_id = %order.id, status = %status, "order moved on before expiry");
                }
                Err(e) => warn!(payorder_id = %order.id, error = %e, "failed to expire pay order"),
            }
        }
        Ok(())
    }

    async fn recheck_confirmations(&self, report: &mut SweepReport) -> Result<(), DatabaseError> {
        let waiting = self
            .orders
            .find_awaiting_confirmation(self.config.batch_size)
            .await?;
        let now = Utc::now();

        for order in waiting {
            if order.confirmation_attempts >= self.config.max_attempts {
                self.give_up(&order, report).await;
                continue;
            }
            if !is_due(
                order.last_confirmation_check_at,
                order.confirmation_attempts,
                self.config.poll_interval,
                now,
            ) {
                report.skipped += 1;
                continue;
            }

            match self.service.refresh_confirmation(order.id).await {
                Ok(updated) => match updated.status {
                    PayOrderStatus::Received => {
                        report.received += 1;
                        info!(payorder_id = %order.id, "payment confirmed");
                    }
                    status => debug!(payorder_id = %order.id, status = %status, "refresh settled order"),
                },
                Err(PayOrderError::Unconfirmed { .. }) => {
                    report.still_pending += 1;
                    debug!(
                        payorder_id = %order.id,
                        attempts = order.confirmation_attempts + 1,
                        next_check_secs = confirmation_backoff(
                            self.config.poll_interval,
                            order.confirmation_attempts + 1
                        )
                        .as_secs(),
                        "payment still unconfirmed"
                    );
                }
                Err(PayOrderError::VerificationFailed { reason, .. }) => {
                    report.failed += 1;
                    warn!(payorder_id = %order.id, reason = %reason, "payment failed verification");
                }
                Err(e) => warn!(payorder_id = %order.id, error = %e, "confirmation check failed"),
            }
        }
        Ok(())
    }

    async fn give_up(&self, order: &PayOrder, report: &mut SweepReport) {
        match self.service.fail_unconfirmed(order.id).await {
            Ok(_) => {
                report.failed += 1;
                warn!(
                    payorder_id = %order.id,
                    attempts = order.confirmation_attempts,
                    tx_hash = order.source_transaction_hash.as_deref().unwrap_or(""),
                    "payment never confirmed, order failed"
                );
            }
            Err(e) => warn!(payorder_id = %order.id, error = %e, "failed to fail unconfirmed order"),
        }
    }
}

/// `poll_interval * 2^attempts`, capped at [`MAX_CONFIRMATION_BACKOFF`]
pub fn confirmation_backoff(poll_interval: Duration, attempts: i32) -> Duration {
    let factor = 1u32 << attempts.clamp(0, 16);
    poll_interval
        .checked_mul(factor)
        .unwrap_or(MAX_CONFIRMATION_BACKOFF)
        .min(MAX_CONFIRMATION_BACKOFF)
}

/// Whether an order last checked at `last_check` may be checked again at `now`
fn is_due(
    last_check: Option<DateTime<Utc>>,
    attempts: i32,
    poll_interval: Duration,
    now: DateTime<Utc>,
) -> bool {
    match last_check {
        None => true,
        Some(last) => (now - last)
            .to_std()
            .map(|elapsed| elapsed >= confirmation_backoff(poll_interval, attempts))
            .unwrap_or(false),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn backoff_doubles_and_caps() {
        let poll = Duration::from_secs(15);
        assert_eq!(confirmation_backoff(poll, 0), Duration::from_secs(15));
        assert_eq!(confirmation_backoff(poll, 1), Duration::from_secs(30));
        assert_eq!(confirmation_backoff(poll, 3), Duration::from_secs(120));
        assert_eq!(confirmation_backoff(poll, 6), MAX_CONFIRMATION_BACKOFF);
        assert_eq!(confirmation_backoff(poll, 40), MAX_CONFIRMATION_BACKOFF);
    }

    #[test]
    fn never_checked_is_due() {
        assert!(is_due(None, 0, Duration::from_secs(15), Utc::now()));
    }

    #[test]
    fn recent_check_is_not_due() {
        let now = Utc::now();
        let last = now - chrono::Duration::seconds(20);
        // two attempts -> 60 s
        assert!(!is_due(Some(last), 2, Duration::from_secs(15), now));
        assert!(is_due(Some(last), 0, Duration::from_secs(15), now));
    }

    #[test]
    fn default_config() {
        let config = ConfirmationSweeperConfig::default();
        assert_eq!(config.poll_interval, Duration::from_secs(15));
        assert!(config.enabled);
    }
}
