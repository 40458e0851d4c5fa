//! Overdue accrual
//!
//! A periodic sweep over every open loan. For each open line it recomputes
//! the overdue day count from "today" and promotes statuses to OVERDUE;
//! nothing else is read from the clock, so two runs on the same day leave
//! the same state. Each changed row is committed on its own, guarded by the
//! row as read, and a failing row does not stop the sweep.

use crate::cache::{InvalidationDispatcher, DFREE_ORDER_INFOS, ORDER_INFOS};
use crate::error::Result;
use crate::lending::clock::Clock;
use crate::lending::state;
use crate::records::model::*;
use crate::records::store::{ChangeSet, RecordStore, Row};
use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeSet, HashMap};
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

/// Outcome of one accrual run
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AccrualReport {
    pub run_id: Uuid,
    pub today: NaiveDate,

    /// Open lines looked at
    pub examined: usize,

    /// Lines whose count or status changed
    pub updated: usize,

    /// Membership orders and club-order lines moved to OVERDUE
    pub promoted: usize,

    /// Rows another writer changed mid-sweep; left as that writer put them
    pub skipped: usize,

    /// Rows whose commit failed; retried by the next run
    pub failed: usize,
}

impl AccrualReport {
    fn new(today: NaiveDate) -> Self {
        Self {
            run_id: Uuid::new_v4(),
            today,
            examined: 0,
            updated: 0,
            promoted: 0,
            skipped: 0,
            failed: 0,
        }
    }
}

/// Recomputes overdue counts and statuses of open loans
pub struct OverdueAccrualJob {
    records: Arc<dyn RecordStore>,
    invalidation: InvalidationDispatcher,
    clock: Arc<dyn Clock>,
}

impl OverdueAccrualJob {
    pub fn new(records: Arc<dyn RecordStore>, invalidation: InvalidationDispatcher, clock: Arc<dyn Clock>) -> Self {
        Self {
            records,
            invalidation,
            clock,
        }
    }

    /// Run against the clock's current day
    pub async fn run(&self) -> Result<AccrualReport> {
        self.run_for(self.clock.today()).await
    }

    /// Run as if today were `today`.
    ///
    /// Both halves of the sweep always run and the orders they touched are
    /// always invalidated; a failed query is returned afterwards.
    pub async fn run_for(&self, today: NaiveDate) -> Result<AccrualReport> {
        let mut report = AccrualReport::new(today);
        info!("Overdue accrual {} started for {}", report.run_id, today);

        let mut touched_orders = BTreeSet::new();
        let mut touched_dfree = BTreeSet::new();
        let membership = self
            .accrue_membership_orders(today, &mut report, &mut touched_orders)
            .await;
        if let Err(e) = &membership {
            error!("Overdue accrual {} could not sweep membership orders: {}", report.run_id, e);
        }
        let dfree = self
            .accrue_dfree_orders(today, &mut report, &mut touched_dfree)
            .await;
        if let Err(e) = &dfree {
            error!("Overdue accrual {} could not sweep club orders: {}", report.run_id, e);
        }

        let mut invalidated = self
            .invalidation
            .invalidate_for_ids(&[ORDER_INFOS], touched_orders)
            .await;
        invalidated += self
            .invalidation
            .invalidate_for_ids(&[DFREE_ORDER_INFOS], touched_dfree)
            .await;
        debug!("Overdue accrual {} invalidated {} keys", report.run_id, invalidated.deleted);

        info!(
            "Overdue accrual {} finished: examined={} updated={} promoted={} skipped={} failed={}",
            report.run_id, report.examined, report.updated, report.promoted, report.skipped, report.failed
        );
        membership.and(dfree)?;
        Ok(report)
    }

    async fn accrue_membership_orders(
        &self,
        today: NaiveDate,
        report: &mut AccrualReport,
        touched: &mut BTreeSet<RecordId>,
    ) -> Result<()> {
        let orders = self
            .records
            .orders_with_status(&[OrderStatus::Confirmed, OrderStatus::Overdue])
            .await?;
        let order_ids: Vec<RecordId> = orders.iter().map(|o| o.id).collect();

        let mut lines: HashMap<RecordId, Vec<MembershipOrderDetail>> = HashMap::new();
        for detail in self.records.order_details_of(&order_ids).await? {
            lines.entry(detail.order_id).or_default().push(detail);
        }

        for order in orders {
            let mut details = lines.remove(&order.id).unwrap_or_default();
            let mut unsettled = false;

            for detail in details.iter_mut().filter(|d| !d.is_returned()) {
                report.examined += 1;
                let read = detail.clone();
                if !state::accrue_detail(detail, today) {
                    continue;
                }
                match self.commit_row(read, detail.clone(), report).await {
                    RowWrite::Written => {
                        report.updated += 1;
                        touched.insert(order.id);
                    }
                    RowWrite::Stale | RowWrite::Failed => unsettled = true,
                }
            }

            // The order is promoted with its lines or retried with them next run
            if unsettled {
                continue;
            }
            let overdue = details
                .iter()
                .any(|d| !d.is_returned() && d.overdue_day_count.unwrap_or(0) > 0);
            let mut promoted = order.clone();
            if overdue
                && state::mark_overdue(&mut promoted)
                && self.commit_row(order.clone(), promoted, report).await == RowWrite::Written
            {
                report.promoted += 1;
                touched.insert(order.id);
            }
        }
        Ok(())
    }

    async fn accrue_dfree_orders(
        &self,
        today: NaiveDate,
        report: &mut AccrualReport,
        touched: &mut BTreeSet<RecordId>,
    ) -> Result<()> {
        let details = self
            .records
            .dfree_details_with_status(&[DFreeStatus::Created, DFreeStatus::Overdue])
            .await?;
        let order_ids: Vec<RecordId> = details
            .iter()
            .map(|d| d.order_id)
            .collect::<BTreeSet<_>>()
            .into_iter()
            .collect();
        let due_dates: HashMap<RecordId, NaiveDate> = self
            .records
            .dfree_orders(&order_ids)
            .await?
            .into_iter()
            .map(|o| (o.id, o.due_date))
            .collect();

        for read in details {
            report.examined += 1;
            let Some(due) = due_dates.get(&read.order_id).copied() else {
                warn!(
                    "Club order line {} points at missing order {}",
                    read.id, read.order_id
                );
                report.failed += 1;
                continue;
            };

            let mut detail = read.clone();
            if state::accrue_dfree_detail(&mut detail, due, today) {
                let order_id = detail.order_id;
                let promoted = read.status != detail.status;
                if self.commit_row(read, detail, report).await == RowWrite::Written {
                    report.updated += 1;
                    if promoted {
                        report.promoted += 1;
                    }
                    touched.insert(order_id);
                }
            }
        }
        Ok(())
    }

    /// Write `row` over `read` in its own commit. A row changed by another
    /// writer since it was read is skipped; other failures are counted.
    async fn commit_row(&self, read: impl Into<Row>, row: impl Into<Row>, report: &mut AccrualReport) -> RowWrite {
        let row = row.into();
        let (kind, id) = (row.kind(), row.id());
        match self.records.commit(ChangeSet::new().expecting(read).with(row)).await {
            Ok(()) => RowWrite::Written,
            Err(e) if e.is_stale_record() => {
                info!("Overdue accrual skipped {} {}: changed during the sweep", kind.table(), id);
                report.skipped += 1;
                RowWrite::Stale
            }
            Err(e) => {
                error!("Overdue accrual failed to write {} {}: {}", kind.table(), id, e);
                report.failed += 1;
                RowWrite::Failed
            }
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum RowWrite {
    Written,
    Stale,
    Failed,
}

/// Run `job` now and then every `interval` until the task is aborted
pub fn spawn_daily_accrual(job: Arc<OverdueAccrualJob>, interval: Duration) -> JoinHandle<()> {
    let interval = interval.max(Duration::from_secs(1));
    info!("Starting overdue accrual task (interval: {:?})", interval);

    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(interval);
        loop {
            ticker.tick().await;
            if let Err(e) = job.run().await {
                error!("Overdue accrual run failed: {}", e);
            }
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::{CacheConfig, InMemoryCacheStore};
    use crate::lending::clock::FixedClock;
    use crate::records::store::InMemoryRecordStore;

    fn day(d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(2024, 3, d).unwrap()
    }

    async fn job(seed: ChangeSet) -> (OverdueAccrualJob, Arc<InMemoryRecordStore>) {
        let records = Arc::new(InMemoryRecordStore::seeded(seed).await);
        let cache = Arc::new(InMemoryCacheStore::new(CacheConfig::default()));
        let job = OverdueAccrualJob::new(
            records.clone(),
            InvalidationDispatcher::new(cache, 500),
            Arc::new(FixedClock::at_day(day(10))),
        );
        (job, records)
    }

    #[tokio::test]
    async fn test_empty_store_gives_empty_report() {
        let (job, records) = job(ChangeSet::new()).await;
        let report = job.run().await.unwrap();

        assert_eq!(report.today, day(10));
        assert_eq!((report.examined, report.updated, report.promoted, report.failed), (0, 0, 0, 0));
        assert_eq!(records.commit_count(), 0);
    }

    #[tokio::test]
    async fn test_orphaned_club_line_counts_as_failed() {
        let seed = ChangeSet::new().with(DFreeOrderDetail {
            id: 1,
            order_id: 99,
            club_book_id: 1,
            status: DFreeStatus::Created,
            return_date: None,
            overdue_day_count: None,
        });
        let (job, records) = job(seed).await;

        let report = job.run().await.unwrap();
        assert_eq!(report.examined, 1);
        assert_eq!(report.failed, 1);
        assert_eq!(records.commit_count(), 0);
    }

    #[tokio::test]
    async fn test_open_line_without_overdue_is_counted_as_zero() {
        let seed = ChangeSet::new()
            .with(MembershipOrder {
                id: 1,
                membership_id: 1,
                order_status: OrderStatus::Confirmed,
                order_date: day(1).and_hms_opt(10, 0, 0).unwrap().and_utc(),
                confirm_date: None,
            })
            .with(MembershipOrderDetail {
                id: 1,
                order_id: 1,
                member_book_copy_id: 1,
                due_date: day(12),
                return_date: None,
                overdue_day_count: None,
            });
        let (job, records) = job(seed).await;

        let report = job.run().await.unwrap();
        assert_eq!(report.updated, 1);
        assert_eq!(report.promoted, 0);

        let detail = records.order_details(&[1]).await.unwrap().pop().unwrap();
        assert_eq!(detail.overdue_day_count, Some(0));
        let order = records.orders(&[1]).await.unwrap().pop().unwrap();
        assert_eq!(order.order_status, OrderStatus::Confirmed);
    }
}
