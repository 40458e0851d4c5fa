//! Integration tests for the overdue accrual job
//!
//! The demo club is seeded with two lent membership orders and one club
//! order, then swept at fixed days:
//! - Counts and promotions per line
//! - Two runs on the same day leave the same state
//! - A failing row write does not stop the sweep
//! - A return committed mid-sweep is not overwritten
//! - A failed query still leaves touched orders invalidated
//! - The scheduled task runs the job

use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, Utc};
use clubshelf::cache::{CacheConfig, InMemoryCacheStore, ORDER_INFOS};
use clubshelf::lending::{spawn_daily_accrual, FixedClock, LendingService};
use clubshelf::records::demo::*;
use clubshelf::records::*;
use clubshelf::{ClubshelfError, Result};
use std::sync::atomic::{AtomicBool, AtomicI64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

const FIRST_ORDER: RecordId = 1;
const SECOND_ORDER: RecordId = 2;
const FIRST_LINE: RecordId = 10;
const SECOND_LINE: RecordId = 20;
const CLUB_ORDER: RecordId = 1;
const CLUB_LINE: RecordId = 1;

fn day(d: u32) -> NaiveDate {
    NaiveDate::from_ymd_opt(2024, 3, d).unwrap()
}

fn at(d: u32) -> DateTime<Utc> {
    day(d).and_hms_opt(10, 0, 0).unwrap().and_utc()
}

/// Demo club with both pledges lent to the reader: the first due on the 5th,
/// the second on the 20th. A walk-in borrower owes one shelf copy since the 5th.
fn lent_club() -> ChangeSet {
    let mut seed = demo_club();
    for (copy_id, pledge_id, order_id, line_id, due) in [
        (EARTHSEA_COPY, EARTHSEA_PLEDGE, FIRST_ORDER, FIRST_LINE, day(5)),
        (DISPOSSESSED_COPY, DISPOSSESSED_PLEDGE, SECOND_ORDER, SECOND_LINE, day(20)),
    ] {
        seed.push(BookCopy {
            id: copy_id,
            book_id: copy_id,
            owner_id: OWNER_MEMBER,
            status: BookCopyStatus::Borrowed,
        });
        seed.push(MemberBookCopy {
            id: pledge_id,
            book_copy_id: copy_id,
            membership_id: OWNER,
            onboard_date: Some(at(1)),
            current_reader: Some(READER),
            is_enabled: true,
        });
        seed.push(MembershipOrder {
            id: order_id,
            membership_id: READER,
            order_status: OrderStatus::Confirmed,
            order_date: at(1),
            confirm_date: Some(at(1)),
        });
        seed.push(MembershipOrderDetail {
            id: line_id,
            order_id,
            member_book_copy_id: pledge_id,
            due_date: due,
            return_date: None,
            overdue_day_count: None,
        });
    }

    seed.push(ClubBook {
        id: SHELF_LEFT_HAND,
        book_id: LEFT_HAND,
        club_id: CLUB,
        code: Some("RR-001".to_string()),
        init_count: 2,
        current_count: 1,
    });
    seed.push(DFreeOrder {
        id: CLUB_ORDER,
        member_id: WALK_IN,
        club_id: CLUB,
        order_date: day(1),
        due_date: day(5),
    });
    seed.push(DFreeOrderDetail {
        id: CLUB_LINE,
        order_id: CLUB_ORDER,
        club_book_id: SHELF_LEFT_HAND,
        status: DFreeStatus::Created,
        return_date: None,
        overdue_day_count: None,
    });
    seed
}

/// Record store over the in-memory one with injectable faults:
/// - commits touching the poisoned membership order line fail
/// - the club-line status query can be taken down
/// - a racing writer can return the first order just before the first
///   membership line commit goes through
struct FaultyStore {
    inner: Arc<InMemoryRecordStore>,
    poisoned_line: AtomicI64,
    club_query_down: AtomicBool,
    racing_return: Mutex<Option<LendingService>>,
}

impl FaultyStore {
    async fn new(seed: ChangeSet) -> Self {
        Self {
            inner: Arc::new(InMemoryRecordStore::seeded(seed).await),
            poisoned_line: AtomicI64::new(-1),
            club_query_down: AtomicBool::new(false),
            racing_return: Mutex::new(None),
        }
    }

    fn poison(&self, line: RecordId) {
        self.poisoned_line.store(line, Ordering::SeqCst);
    }

    fn cure(&self) {
        self.poisoned_line.store(-1, Ordering::SeqCst);
    }

    fn take_down_club_query(&self) {
        self.club_query_down.store(true, Ordering::SeqCst);
    }

    /// Return the first order's line on `return_day`, racing the next line write
    fn race_a_return(&self, return_day: NaiveDate) {
        let desk = service_at(self.inner.clone(), return_day);
        *self.racing_return.lock().unwrap() = Some(desk);
    }
}

#[async_trait]
impl RecordStore for FaultyStore {
    async fn authors(&self) -> Result<Vec<Author>> {
        self.inner.authors().await
    }

    async fn categories(&self) -> Result<Vec<Category>> {
        self.inner.categories().await
    }

    async fn publishers(&self) -> Result<Vec<Publisher>> {
        self.inner.publishers().await
    }

    async fn clubs(&self) -> Result<Vec<BookClub>> {
        self.inner.clubs().await
    }

    async fn active_memberships(&self) -> Result<Vec<Membership>> {
        self.inner.active_memberships().await
    }

    async fn books(&self, ids: &[RecordId]) -> Result<Vec<Book>> {
        self.inner.books(ids).await
    }

    async fn club_books(&self, ids: &[RecordId]) -> Result<Vec<ClubBook>> {
        self.inner.club_books(ids).await
    }

    async fn members(&self, ids: &[RecordId]) -> Result<Vec<Member>> {
        self.inner.members(ids).await
    }

    async fn memberships(&self, ids: &[RecordId]) -> Result<Vec<Membership>> {
        self.inner.memberships(ids).await
    }

    async fn book_copies(&self, ids: &[RecordId]) -> Result<Vec<BookCopy>> {
        self.inner.book_copies(ids).await
    }

    async fn member_book_copies(&self, ids: &[RecordId]) -> Result<Vec<MemberBookCopy>> {
        self.inner.member_book_copies(ids).await
    }

    async fn orders(&self, ids: &[RecordId]) -> Result<Vec<MembershipOrder>> {
        self.inner.orders(ids).await
    }

    async fn order_details(&self, ids: &[RecordId]) -> Result<Vec<MembershipOrderDetail>> {
        self.inner.order_details(ids).await
    }

    async fn dfree_members(&self, ids: &[RecordId]) -> Result<Vec<DFreeMember>> {
        self.inner.dfree_members(ids).await
    }

    async fn dfree_orders(&self, ids: &[RecordId]) -> Result<Vec<DFreeOrder>> {
        self.inner.dfree_orders(ids).await
    }

    async fn dfree_order_details(&self, ids: &[RecordId]) -> Result<Vec<DFreeOrderDetail>> {
        self.inner.dfree_order_details(ids).await
    }

    async fn member_book_copies_of(&self, book_copy_ids: &[RecordId]) -> Result<Vec<MemberBookCopy>> {
        self.inner.member_book_copies_of(book_copy_ids).await
    }

    async fn order_details_of(&self, order_ids: &[RecordId]) -> Result<Vec<MembershipOrderDetail>> {
        self.inner.order_details_of(order_ids).await
    }

    async fn dfree_order_details_of(&self, order_ids: &[RecordId]) -> Result<Vec<DFreeOrderDetail>> {
        self.inner.dfree_order_details_of(order_ids).await
    }

    async fn history_of(&self, book_copy_id: RecordId) -> Result<Vec<BookCopyHistory>> {
        self.inner.history_of(book_copy_id).await
    }

    async fn orders_with_status(&self, statuses: &[OrderStatus]) -> Result<Vec<MembershipOrder>> {
        self.inner.orders_with_status(statuses).await
    }

    async fn dfree_details_with_status(&self, statuses: &[DFreeStatus]) -> Result<Vec<DFreeOrderDetail>> {
        if self.club_query_down.load(Ordering::SeqCst) {
            return Err(ClubshelfError::Store("club order lines unavailable".to_string()));
        }
        self.inner.dfree_details_with_status(statuses).await
    }

    async fn next_id(&self, kind: RecordKind) -> Result<RecordId> {
        self.inner.next_id(kind).await
    }

    async fn commit(&self, changes: ChangeSet) -> Result<()> {
        let writes_a_line = changes
            .rows
            .iter()
            .any(|row| matches!(row, Row::MembershipOrderDetail(_)));
        if writes_a_line {
            let racer = self.racing_return.lock().unwrap().take();
            if let Some(desk) = racer {
                desk.apply_return(FIRST_ORDER, &[FIRST_LINE]).await?;
            }
        }

        let poisoned = self.poisoned_line.load(Ordering::SeqCst);
        let touches_poison = changes
            .rows
            .iter()
            .any(|row| matches!(row, Row::MembershipOrderDetail(d) if d.id == poisoned));
        if touches_poison {
            return Err(ClubshelfError::Store("write timed out".to_string()));
        }
        self.inner.commit(changes).await
    }
}

fn service_at(records: Arc<dyn RecordStore>, today: NaiveDate) -> LendingService {
    service_with_cache(records, today).0
}

fn service_with_cache(records: Arc<dyn RecordStore>, today: NaiveDate) -> (LendingService, Arc<InMemoryCacheStore>) {
    let config = CacheConfig::default();
    let cache = Arc::new(InMemoryCacheStore::new(config.clone()));
    let service = LendingService::new(records, cache.clone(), &config)
        .with_clock(Arc::new(FixedClock::at_day(today)));
    (service, cache)
}

/// Every order, line and club line of the seeded club
async fn snapshot(
    records: &dyn RecordStore,
) -> (Vec<MembershipOrder>, Vec<MembershipOrderDetail>, Vec<DFreeOrderDetail>) {
    (
        records.orders(&[FIRST_ORDER, SECOND_ORDER]).await.unwrap(),
        records.order_details(&[FIRST_LINE, SECOND_LINE]).await.unwrap(),
        records.dfree_order_details(&[CLUB_LINE]).await.unwrap(),
    )
}

#[tokio::test]
async fn test_accrual_counts_and_promotes() {
    let records = Arc::new(InMemoryRecordStore::seeded(lent_club()).await);
    let service = service_at(records.clone(), day(10));

    let report = service.accrual_job().run().await.unwrap();
    assert_eq!(report.today, day(10));
    assert_eq!(report.examined, 3);
    assert_eq!(report.updated, 3);
    // The first order and the club line
    assert_eq!(report.promoted, 2);
    assert_eq!(report.failed, 0);

    let (orders, lines, club_lines) = snapshot(&*records).await;
    assert_eq!(orders[0].order_status, OrderStatus::Overdue);
    assert_eq!(orders[1].order_status, OrderStatus::Confirmed);
    assert_eq!(lines[0].overdue_day_count, Some(5));
    assert_eq!(lines[1].overdue_day_count, Some(0));
    assert_eq!(club_lines[0].status, DFreeStatus::Overdue);
    assert_eq!(club_lines[0].overdue_day_count, Some(5));

    let club_orders = service.resolve_dfree_order_infos(&[CLUB_ORDER]).await.unwrap();
    assert_eq!(club_orders[&CLUB_ORDER].order_status, DFreeStatus::Overdue);
}

#[tokio::test]
async fn test_accrual_is_idempotent_within_a_day() {
    let records = Arc::new(InMemoryRecordStore::seeded(lent_club()).await);
    let job = service_at(records.clone(), day(10)).accrual_job();

    job.run().await.unwrap();
    let after_first = snapshot(&*records).await;
    let commits = records.commit_count();

    let report = job.run().await.unwrap();
    assert_eq!(report.examined, 3);
    assert_eq!(report.updated, 0);
    assert_eq!(report.promoted, 0);
    assert_eq!(snapshot(&*records).await, after_first);
    assert_eq!(records.commit_count(), commits);
}

#[tokio::test]
async fn test_accrual_keeps_counting_a_day_later() {
    let records = Arc::new(InMemoryRecordStore::seeded(lent_club()).await);
    let job = service_at(records.clone(), day(10)).accrual_job();

    job.run_for(day(10)).await.unwrap();
    let report = job.run_for(day(11)).await.unwrap();
    // Both overdue lines grow by a day; the other stays at zero
    assert_eq!(report.updated, 2);
    assert_eq!(report.promoted, 0);

    let (orders, lines, club_lines) = snapshot(&*records).await;
    assert_eq!(orders[0].order_status, OrderStatus::Overdue);
    assert_eq!(lines[0].overdue_day_count, Some(6));
    assert_eq!(lines[1].overdue_day_count, Some(0));
    assert_eq!(club_lines[0].overdue_day_count, Some(6));
}

#[tokio::test]
async fn test_failing_row_does_not_stop_the_sweep() {
    let store = Arc::new(FaultyStore::new(lent_club()).await);
    store.poison(FIRST_LINE);
    let records: Arc<dyn RecordStore> = store.clone();
    let job = service_at(records.clone(), day(10)).accrual_job();

    let report = job.run().await.unwrap();
    assert_eq!(report.failed, 1);
    assert_eq!(report.updated, 2);
    // Only the club line; the first order waits for its line
    assert_eq!(report.promoted, 1);

    let (orders, lines, club_lines) = snapshot(&*records).await;
    assert_eq!(orders[0].order_status, OrderStatus::Confirmed);
    assert_eq!(lines[0].overdue_day_count, None);
    assert_eq!(lines[1].overdue_day_count, Some(0));
    assert_eq!(club_lines[0].status, DFreeStatus::Overdue);

    // The next run picks up what failed
    store.cure();
    let report = job.run().await.unwrap();
    assert_eq!(report.failed, 0);
    assert_eq!(report.updated, 1);
    assert_eq!(report.promoted, 1);

    let (orders, lines, _) = snapshot(&*records).await;
    assert_eq!(orders[0].order_status, OrderStatus::Overdue);
    assert_eq!(lines[0].overdue_day_count, Some(5));
}

#[tokio::test]
async fn test_return_during_the_sweep_is_kept() {
    let store = Arc::new(FaultyStore::new(lent_club()).await);
    store.race_a_return(day(12));
    let records: Arc<dyn RecordStore> = store.clone();
    let job = service_at(records.clone(), day(10)).accrual_job();

    let report = job.run().await.unwrap();
    assert_eq!(report.examined, 3);
    assert_eq!(report.skipped, 1);
    assert_eq!(report.failed, 0);
    // The second order's line and the club line
    assert_eq!(report.updated, 2);
    assert_eq!(report.promoted, 1);

    let (orders, lines, _) = snapshot(&*records).await;
    assert_eq!(orders[0].order_status, OrderStatus::Completed);
    assert_eq!(lines[0].return_date, Some(day(12)));
    assert_eq!(lines[0].overdue_day_count, Some(7));
    assert_eq!(lines[1].overdue_day_count, Some(0));

    let copy = records.book_copies(&[EARTHSEA_COPY]).await.unwrap().pop().unwrap();
    assert_eq!(copy.status, BookCopyStatus::SharingClub);
    let pledge = records
        .member_book_copies(&[EARTHSEA_PLEDGE])
        .await
        .unwrap()
        .pop()
        .unwrap();
    assert_eq!(pledge.current_reader, None);

    // The next run leaves the returned line alone
    let report = job.run().await.unwrap();
    assert_eq!(report.examined, 2);
    assert_eq!((report.updated, report.skipped), (0, 0));
}

#[tokio::test]
async fn test_failed_query_still_invalidates_swept_orders() {
    let store = Arc::new(FaultyStore::new(lent_club()).await);
    let records: Arc<dyn RecordStore> = store.clone();
    let (service, cache) = service_with_cache(records.clone(), day(10));

    let before = service.resolve_order_infos(&[FIRST_ORDER]).await.unwrap();
    assert_eq!(before[&FIRST_ORDER].order_status, OrderStatus::Confirmed);
    let key = ORDER_INFOS.key_for(&FIRST_ORDER, &[]);
    assert!(cache.contains_key(&key).await);

    store.take_down_club_query();
    let err = service.accrual_job().run().await.unwrap_err();
    assert!(matches!(err, ClubshelfError::Store(_)));

    // Membership lines were swept and their order is not served stale
    assert!(!cache.contains_key(&key).await);
    let after = service.resolve_order_infos(&[FIRST_ORDER]).await.unwrap();
    assert_eq!(after[&FIRST_ORDER].order_status, OrderStatus::Overdue);

    let (_, _, club_lines) = snapshot(&*records).await;
    assert_eq!(club_lines[0].status, DFreeStatus::Created);
}

#[tokio::test]
async fn test_scheduled_task_runs_the_job() {
    let records = Arc::new(InMemoryRecordStore::seeded(lent_club()).await);
    let job = Arc::new(service_at(records.clone(), day(10)).accrual_job());

    let handle = spawn_daily_accrual(job, Duration::from_secs(3600));

    let mut promoted = false;
    for _ in 0..200 {
        let order = records.orders(&[FIRST_ORDER]).await.unwrap().pop().unwrap();
        if order.order_status == OrderStatus::Overdue {
            promoted = true;
            break;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    handle.abort();

    assert!(promoted, "scheduled accrual never ran");
}
