//! Lending service
//!
//! Caller-facing reads go through the cached projections. Mutations follow
//! one shape: load and validate, run the state machine on copies of the
//! records, commit every changed row in one [`ChangeSet`] guarded by the
//! rows as loaded, then invalidate the cache keys projecting those rows. A
//! rejected mutation writes nothing, and so does one that lost a race with
//! another writer ([`ClubshelfError::StaleRecord`]).

use crate::cache::{
    CacheConfig, CacheKeySpec, InvalidationDispatcher, InvalidationReport, KeyedCacheStore,
    BOOK_COPY_INFOS, CLUB_BOOK_INFOS, DFREE_ORDER_INFOS, MEMBER_BOOK_COPY_INFOS, ORDER_INFOS,
};
use crate::error::{ClubshelfError, Result};
use crate::lending::accrual::OverdueAccrualJob;
use crate::lending::clock::{Clock, SystemClock};
use crate::lending::infos::*;
use crate::lending::projections::Projections;
use crate::lending::state;
use crate::records::model::*;
use crate::records::store::{ChangeSet, RecordKind, RecordStore};
use chrono::{DateTime, NaiveDate, Utc};
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use tracing::{debug, info};

/// Copies whose custody changed
#[derive(Debug, Clone, PartialEq)]
pub struct CustodyChange {
    pub book_copies: Vec<BookCopy>,
    pub member_book_copies: Vec<MemberBookCopy>,
}

/// An order after a mutation, with the lines and copies it touched
#[derive(Debug, Clone, PartialEq)]
pub struct OrderChange {
    pub order: MembershipOrder,
    pub details: Vec<MembershipOrderDetail>,
    pub member_book_copies: Vec<MemberBookCopy>,
}

/// A club order after a mutation, with the shelf counters it moved
#[derive(Debug, Clone, PartialEq)]
pub struct DFreeOrderChange {
    pub order: DFreeOrder,
    pub details: Vec<DFreeOrderDetail>,
    pub club_books: Vec<ClubBook>,
}

/// New club order
#[derive(Debug, Clone)]
pub struct DFreeOrderRequest {
    pub club_id: RecordId,
    pub member_id: RecordId,
    pub club_book_ids: Vec<RecordId>,
    pub order_date: NaiveDate,
    pub due_date: NaiveDate,
}

fn distinct(ids: &[RecordId]) -> Result<Vec<RecordId>> {
    if ids.is_empty() {
        return Err(ClubshelfError::Validation("no ids given".to_string()));
    }
    let mut seen = HashSet::new();
    Ok(ids.iter().copied().filter(|id| seen.insert(*id)).collect())
}

/// Index `found` by id, failing on the first requested id that is missing
fn require_all<T>(
    entity: &'static str,
    ids: &[RecordId],
    found: Vec<T>,
    id_of: impl Fn(&T) -> RecordId,
) -> Result<HashMap<RecordId, T>> {
    let found: HashMap<RecordId, T> = found.into_iter().map(|r| (id_of(&r), r)).collect();
    match ids.iter().find(|id| !found.contains_key(id)) {
        Some(id) => Err(ClubshelfError::NotFound { entity, id: *id }),
        None => Ok(found),
    }
}

pub struct LendingService {
    records: Arc<dyn RecordStore>,
    projections: Projections,
    invalidation: InvalidationDispatcher,
    clock: Arc<dyn Clock>,
}

impl LendingService {
    pub fn new(records: Arc<dyn RecordStore>, cache: Arc<dyn KeyedCacheStore>, config: &CacheConfig) -> Self {
        Self {
            projections: Projections::new(records.clone(), cache.clone(), config),
            invalidation: InvalidationDispatcher::new(cache, config.invalidation_chunk_size),
            records,
            clock: Arc::new(SystemClock),
        }
    }

    /// Replace the wall clock
    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    pub fn records(&self) -> &Arc<dyn RecordStore> {
        &self.records
    }

    pub fn projections(&self) -> &Projections {
        &self.projections
    }

    pub fn invalidation(&self) -> &InvalidationDispatcher {
        &self.invalidation
    }

    pub fn clock(&self) -> &Arc<dyn Clock> {
        &self.clock
    }

    /// Accrual job sharing this service's store, cache and clock
    pub fn accrual_job(&self) -> OverdueAccrualJob {
        OverdueAccrualJob::new(self.records.clone(), self.invalidation.clone(), self.clock.clone())
    }

    // Reads

    pub async fn resolve_book_infos(&self, ids: &[RecordId]) -> Result<HashMap<RecordId, BookInfo>> {
        self.projections.books.resolve_ids(ids.iter().copied()).await
    }

    pub async fn resolve_club_book_infos(&self, ids: &[RecordId]) -> Result<HashMap<RecordId, ClubBookInfo>> {
        self.projections.club_books.resolve_ids(ids.iter().copied()).await
    }

    pub async fn resolve_member_infos(&self, ids: &[RecordId]) -> Result<HashMap<RecordId, MemberInfo>> {
        self.projections.members.resolve_ids(ids.iter().copied()).await
    }

    pub async fn resolve_order_infos(&self, ids: &[RecordId]) -> Result<HashMap<RecordId, OrderInfo>> {
        self.projections.orders.resolve_ids(ids.iter().copied()).await
    }

    pub async fn resolve_book_copy_infos(&self, ids: &[RecordId]) -> Result<HashMap<RecordId, BookCopyInfo>> {
        self.projections.book_copies.resolve_ids(ids.iter().copied()).await
    }

    pub async fn resolve_member_book_copy_infos(
        &self,
        ids: &[RecordId],
    ) -> Result<HashMap<RecordId, MemberBookCopyInfo>> {
        self.projections
            .member_book_copies
            .resolve_ids(ids.iter().copied())
            .await
    }

    pub async fn resolve_dfree_order_infos(&self, ids: &[RecordId]) -> Result<HashMap<RecordId, DFreeOrderInfo>> {
        self.projections.dfree_orders.resolve_ids(ids.iter().copied()).await
    }

    pub async fn author_infos(&self) -> Result<AuthorDict> {
        self.projections.authors.get().await
    }

    pub async fn category_infos(&self) -> Result<CategoryDict> {
        self.projections.categories.get().await
    }

    pub async fn publisher_infos(&self) -> Result<PublisherDict> {
        self.projections.publishers.get().await
    }

    pub async fn club_infos(&self) -> Result<ClubDict> {
        self.projections.clubs.get().await
    }

    pub async fn membership_infos(&self) -> Result<MembershipDict> {
        self.projections.memberships.get().await
    }

    // Custody

    /// Pledge NEW copies owned by the membership's member to its club
    pub async fn apply_share(&self, membership_id: RecordId, book_copy_ids: &[RecordId]) -> Result<Vec<MemberBookCopy>> {
        let copy_ids = distinct(book_copy_ids)?;
        let membership = self.active_membership(membership_id).await?;
        let copies = require_all(
            "book_copy",
            &copy_ids,
            self.records.book_copies(&copy_ids).await?,
            |c| c.id,
        )?;

        let pledged: HashSet<RecordId> = self
            .records
            .member_book_copies_of(&copy_ids)
            .await?
            .into_iter()
            .filter(|p| p.is_enabled)
            .map(|p| p.book_copy_id)
            .collect();

        let mut changes = ChangeSet::new();
        let mut pledges = Vec::with_capacity(copy_ids.len());
        for copy_id in &copy_ids {
            let copy = &copies[copy_id];
            if copy.owner_id != membership.member_id {
                return Err(ClubshelfError::Validation(format!(
                    "book copy {} is not owned by member {}",
                    copy.id, membership.member_id
                )));
            }
            if pledged.contains(copy_id) {
                return Err(ClubshelfError::IllegalTransition {
                    entity: "book_copy",
                    id: *copy_id,
                    from: "SHARED".to_string(),
                    action: "share",
                });
            }
            let id = self.records.next_id(RecordKind::MemberBookCopy).await?;
            let pledge = state::share(copy, id, membership.id)?;
            changes.push(pledge.clone());
            pledges.push(pledge);
        }

        self.records.commit(changes).await?;
        info!("Membership {} shared {} book copies", membership.id, pledges.len());

        let pledge_ids: Vec<RecordId> = pledges.iter().map(|p| p.id).collect();
        self.invalidate(&[(MEMBER_BOOK_COPY_INFOS, &pledge_ids)]).await;
        Ok(pledges)
    }

    /// Take pledged copies into club custody
    pub async fn apply_deposit(&self, member_book_copy_ids: &[RecordId]) -> Result<CustodyChange> {
        let now = self.clock.now();
        self.change_custody(member_book_copy_ids, HistoryAction::DonateToClub, |copy, pledge| {
            state::deposit(copy, pledge, now)
        })
        .await
    }

    /// Hand pledged copies back to their owners
    pub async fn apply_withdraw(&self, member_book_copy_ids: &[RecordId]) -> Result<CustodyChange> {
        self.change_custody(
            member_book_copy_ids,
            HistoryAction::WithdrawBookFromClub,
            state::withdraw,
        )
        .await
    }

    async fn change_custody<F>(
        &self,
        member_book_copy_ids: &[RecordId],
        action: HistoryAction,
        transition: F,
    ) -> Result<CustodyChange>
    where
        F: Fn(&mut BookCopy, &mut MemberBookCopy) -> Result<()> + Send + Sync,
    {
        let (mut pledges, mut copies) = self.load_pledges(member_book_copy_ids).await?;
        let now = self.clock.now();

        let mut changes = ChangeSet::new();
        changes.expect_all(pledges.iter().cloned());
        changes.expect_all(copies.values().cloned());
        for pledge in pledges.iter_mut() {
            let copy = copies
                .get_mut(&pledge.book_copy_id)
                .ok_or(ClubshelfError::NotFound {
                    entity: "book_copy",
                    id: pledge.book_copy_id,
                })?;
            transition(copy, pledge)?;
        }
        for pledge in &pledges {
            let id = self.records.next_id(RecordKind::BookCopyHistory).await?;
            changes.push(state::history(
                id,
                pledge.book_copy_id,
                action,
                Some(pledge.membership_id),
                None,
                now,
            ));
        }

        let copies: Vec<BookCopy> = copies.into_values().collect();
        changes.extend(copies.iter().cloned());
        changes.extend(pledges.iter().cloned());
        self.records.commit(changes).await?;
        info!("{} applied to {} member book copies", action, pledges.len());

        self.invalidate_custody(&copies, &pledges, &[]).await;
        Ok(CustodyChange {
            book_copies: copies,
            member_book_copies: pledges,
        })
    }

    // Membership orders

    /// Staff lends copies to a member: a CONFIRMED order whose copies are
    /// BORROWED from now
    pub async fn apply_lend(
        &self,
        staff_membership_id: RecordId,
        reader_membership_id: RecordId,
        member_book_copy_ids: &[RecordId],
        due_date: NaiveDate,
    ) -> Result<OrderChange> {
        let staff = self.staff_membership(staff_membership_id).await?;
        let reader = self.active_membership(reader_membership_id).await?;
        if reader.club_id != staff.club_id {
            return Err(ClubshelfError::Validation(format!(
                "membership {} is not in club {}",
                reader.id, staff.club_id
            )));
        }

        let now = self.clock.now();
        let mut order = self
            .draft_order(&reader, member_book_copy_ids, due_date)
            .await?;
        state::request_order(&mut order.order)?;
        state::confirm_order(&mut order.order, now)?;
        self.lend_order(order, ChangeSet::new(), now).await
    }

    /// Member asks to borrow copies: a CREATED order awaiting staff
    pub async fn apply_request_order(
        &self,
        reader_membership_id: RecordId,
        member_book_copy_ids: &[RecordId],
        due_date: NaiveDate,
    ) -> Result<OrderChange> {
        let reader = self.active_membership(reader_membership_id).await?;
        let mut order = self
            .draft_order(&reader, member_book_copy_ids, due_date)
            .await?;
        state::request_order(&mut order.order)?;

        let mut changes = ChangeSet::new().with(order.order.clone());
        changes.extend(order.details.iter().cloned());
        self.records.commit(changes).await?;
        info!(
            "Membership {} requested order {} for {} copies",
            reader.id,
            order.order.id,
            order.details.len()
        );

        self.invalidate(&[(ORDER_INFOS, &[order.order.id])]).await;
        Ok(order)
    }

    /// Staff confirms a CREATED order; its copies are lent from now
    pub async fn apply_confirm_order(&self, staff_membership_id: RecordId, order_id: RecordId) -> Result<OrderChange> {
        let staff = self.staff_membership(staff_membership_id).await?;
        let mut order = self.load_order(order_id).await?;
        let reader = self.membership(order.order.membership_id).await?;
        if reader.club_id != staff.club_id {
            return Err(ClubshelfError::Validation(format!(
                "order {} does not belong to club {}",
                order_id, staff.club_id
            )));
        }

        let now = self.clock.now();
        let mut changes = ChangeSet::new().expecting(order.order.clone());
        changes.expect_all(order.details.iter().cloned());
        state::confirm_order(&mut order.order, now)?;
        self.lend_order(order, changes, now).await
    }

    /// Cancel a DRAFT or CREATED order
    pub async fn apply_cancel_order(&self, order_id: RecordId) -> Result<OrderChange> {
        let mut order = self.load_order(order_id).await?;
        let read = order.order.clone();
        state::cancel_order(&mut order.order)?;

        self.records
            .commit(ChangeSet::new().expecting(read).with(order.order.clone()))
            .await?;
        info!("Cancelled order {}", order_id);

        self.invalidate(&[(ORDER_INFOS, &[order_id])]).await;
        Ok(order)
    }

    /// Return lines of a working order. Every copy goes back on the shelf;
    /// the order completes when no line is left open.
    pub async fn apply_return(&self, order_id: RecordId, detail_ids: &[RecordId]) -> Result<OrderChange> {
        let detail_ids = distinct(detail_ids)?;
        let mut order = self.load_working_order(order_id, "return").await?;
        let today = self.clock.today();
        let now = self.clock.now();

        let returning: HashSet<RecordId> = detail_ids.iter().copied().collect();
        if let Some(missing) = detail_ids
            .iter()
            .find(|id| !order.details.iter().any(|d| d.id == **id))
        {
            return Err(ClubshelfError::NotFound {
                entity: "order_detail",
                id: *missing,
            });
        }

        let pledge_ids: Vec<RecordId> = order
            .details
            .iter()
            .filter(|d| returning.contains(&d.id))
            .map(|d| d.member_book_copy_id)
            .collect();
        let (mut pledges, mut copies) = self.load_pledges(&pledge_ids).await?;

        let mut changes = ChangeSet::new().expecting(order.order.clone());
        changes.expect_all(order.details.iter().cloned());
        changes.expect_all(pledges.iter().cloned());
        changes.expect_all(copies.values().cloned());

        let mut pledge_index: HashMap<RecordId, &mut MemberBookCopy> =
            pledges.iter_mut().map(|p| (p.id, p)).collect();

        let mut touched = Vec::with_capacity(detail_ids.len());
        let mut returned_copies = Vec::with_capacity(detail_ids.len());
        for detail in order.details.iter_mut().filter(|d| returning.contains(&d.id)) {
            state::return_detail(detail, today)?;
            let pledge = pledge_index
                .get_mut(&detail.member_book_copy_id)
                .ok_or(ClubshelfError::NotFound {
                    entity: "member_book_copy",
                    id: detail.member_book_copy_id,
                })?;
            let copy = copies
                .get_mut(&pledge.book_copy_id)
                .ok_or(ClubshelfError::NotFound {
                    entity: "book_copy",
                    id: pledge.book_copy_id,
                })?;
            state::give_back(copy, pledge)?;
            returned_copies.push((copy.id, detail.overdue_day_count.unwrap_or(0)));
            touched.push(detail.clone());
        }
        drop(pledge_index);

        for (book_copy_id, overdue) in returned_copies {
            let id = self.records.next_id(RecordKind::BookCopyHistory).await?;
            changes.push(state::history(
                id,
                book_copy_id,
                HistoryAction::ClubReturnBook,
                Some(order.order.membership_id),
                Some(format!("overdue {} days", overdue)),
                now,
            ));
        }

        if state::complete_if_returned(&mut order.order, &order.details) {
            info!("Order {} completed", order_id);
        }

        let copies: Vec<BookCopy> = copies.into_values().collect();
        changes.push(order.order.clone());
        changes.extend(touched);
        changes.extend(copies.iter().cloned());
        changes.extend(pledges.iter().cloned());
        self.records.commit(changes).await?;
        info!("Returned {} lines of order {}", detail_ids.len(), order_id);

        self.invalidate_custody(&copies, &pledges, &[order_id]).await;
        order.member_book_copies = pledges;
        Ok(order)
    }

    /// Push the due date of open lines of a working order to `new_due`
    pub async fn apply_extend(&self, order_id: RecordId, detail_ids: &[RecordId], new_due: NaiveDate) -> Result<OrderChange> {
        let detail_ids = distinct(detail_ids)?;
        let mut order = self.load_working_order(order_id, "extend").await?;
        let today = self.clock.today();
        let now = self.clock.now();

        let extending: HashSet<RecordId> = detail_ids.iter().copied().collect();
        let mut changes = ChangeSet::new().expecting(order.order.clone());
        changes.expect_all(order.details.iter().filter(|d| extending.contains(&d.id)).cloned());

        let mut touched = Vec::with_capacity(detail_ids.len());
        for detail in order.details.iter_mut().filter(|d| extending.contains(&d.id)) {
            state::extend_detail(detail, new_due, today)?;
            touched.push(detail.clone());
        }
        if touched.len() != detail_ids.len() {
            let known: HashSet<RecordId> = touched.iter().map(|d| d.id).collect();
            let missing = detail_ids
                .iter()
                .copied()
                .find(|id| !known.contains(id))
                .unwrap_or(order_id);
            return Err(ClubshelfError::NotFound {
                entity: "order_detail",
                id: missing,
            });
        }

        let pledge_ids: Vec<RecordId> = touched.iter().map(|d| d.member_book_copy_id).collect();
        let pledges = self.records.member_book_copies(&pledge_ids).await?;

        for pledge in &pledges {
            let id = self.records.next_id(RecordKind::BookCopyHistory).await?;
            changes.push(state::history(
                id,
                pledge.book_copy_id,
                HistoryAction::ClubExtendDueDate,
                Some(order.order.membership_id),
                Some(format!("due {}", new_due)),
                now,
            ));
        }
        changes.extend(touched);
        self.records.commit(changes).await?;
        info!("Extended {} lines of order {} to {}", detail_ids.len(), order_id, new_due);

        self.invalidate(&[(ORDER_INFOS, &[order_id])]).await;
        Ok(order)
    }

    // Club (DFree) orders

    /// Lend free-shelf copies; each line takes one copy off its club book
    pub async fn apply_dfree_create_order(&self, request: DFreeOrderRequest) -> Result<DFreeOrderChange> {
        if request.club_book_ids.is_empty() {
            return Err(ClubshelfError::Validation("club order has no books".to_string()));
        }
        if request.due_date < request.order_date {
            return Err(ClubshelfError::Validation(format!(
                "due date {} is before order date {}",
                request.due_date, request.order_date
            )));
        }

        let member = self
            .records
            .dfree_members(&[request.member_id])
            .await?
            .pop()
            .ok_or(ClubshelfError::NotFound {
                entity: "dfree_member",
                id: request.member_id,
            })?;
        if member.club_id != request.club_id {
            return Err(ClubshelfError::Validation(format!(
                "member {} is not in club {}",
                member.id, request.club_id
            )));
        }

        let shelf_ids = distinct(&request.club_book_ids)?;
        let mut shelf = require_all(
            "club_book",
            &shelf_ids,
            self.records.club_books(&shelf_ids).await?,
            |cb| cb.id,
        )?;
        let mut changes = ChangeSet::new();
        changes.expect_all(shelf.values().cloned());
        for id in &request.club_book_ids {
            let club_book = shelf.get_mut(id).ok_or(ClubshelfError::NotFound {
                entity: "club_book",
                id: *id,
            })?;
            if club_book.club_id != request.club_id {
                return Err(ClubshelfError::Validation(format!(
                    "club book {} is not in club {}",
                    id, request.club_id
                )));
            }
            state::take_club_book(club_book)?;
        }

        let order = DFreeOrder {
            id: self.records.next_id(RecordKind::DFreeOrder).await?,
            member_id: member.id,
            club_id: request.club_id,
            order_date: request.order_date,
            due_date: request.due_date,
        };
        let mut details = Vec::with_capacity(request.club_book_ids.len());
        for club_book_id in &request.club_book_ids {
            details.push(DFreeOrderDetail {
                id: self.records.next_id(RecordKind::DFreeOrderDetail).await?,
                order_id: order.id,
                club_book_id: *club_book_id,
                status: DFreeStatus::Created,
                return_date: None,
                overdue_day_count: None,
            });
        }

        let club_books: Vec<ClubBook> = shelf.into_values().collect();
        changes.push(order.clone());
        changes.extend(details.iter().cloned());
        changes.extend(club_books.iter().cloned());
        self.records.commit(changes).await?;
        info!(
            "Club {} lent {} books to member {} (order {})",
            order.club_id,
            details.len(),
            member.id,
            order.id
        );

        let shelf_ids: Vec<RecordId> = club_books.iter().map(|cb| cb.id).collect();
        self.invalidate(&[(DFREE_ORDER_INFOS, &[order.id]), (CLUB_BOOK_INFOS, &shelf_ids)])
            .await;
        Ok(DFreeOrderChange {
            order,
            details,
            club_books,
        })
    }

    /// Return lines of a club order; each puts one copy back on its shelf
    pub async fn apply_dfree_return(&self, order_id: RecordId, detail_ids: &[RecordId]) -> Result<DFreeOrderChange> {
        let detail_ids = distinct(detail_ids)?;
        let order = self
            .records
            .dfree_orders(&[order_id])
            .await?
            .pop()
            .ok_or(ClubshelfError::NotFound {
                entity: "dfree_order",
                id: order_id,
            })?;
        let mut details = self.records.dfree_order_details_of(&[order_id]).await?;
        let today = self.clock.today();

        let returning: HashSet<RecordId> = detail_ids.iter().copied().collect();
        let shelf_ids: Vec<RecordId> = details
            .iter()
            .filter(|d| returning.contains(&d.id))
            .map(|d| d.club_book_id)
            .collect();
        let mut shelf = require_all(
            "club_book",
            &shelf_ids,
            self.records.club_books(&shelf_ids).await?,
            |cb| cb.id,
        )?;

        let mut changes = ChangeSet::new();
        changes.expect_all(details.iter().filter(|d| returning.contains(&d.id)).cloned());
        changes.expect_all(shelf.values().cloned());

        let mut touched = Vec::with_capacity(detail_ids.len());
        for detail in details.iter_mut().filter(|d| returning.contains(&d.id)) {
            state::return_dfree_detail(detail, order.due_date, today)?;
            let club_book = shelf
                .get_mut(&detail.club_book_id)
                .ok_or(ClubshelfError::NotFound {
                    entity: "club_book",
                    id: detail.club_book_id,
                })?;
            state::restock_club_book(club_book);
            touched.push(detail.clone());
        }
        if touched.len() != detail_ids.len() {
            let known: HashSet<RecordId> = touched.iter().map(|d| d.id).collect();
            let missing = detail_ids
                .iter()
                .copied()
                .find(|id| !known.contains(id))
                .unwrap_or(order_id);
            return Err(ClubshelfError::NotFound {
                entity: "dfree_order_detail",
                id: missing,
            });
        }

        let club_books: Vec<ClubBook> = shelf.into_values().collect();
        changes.extend(touched.iter().cloned());
        changes.extend(club_books.iter().cloned());
        self.records.commit(changes).await?;
        debug!(
            "Club order {} is now {}",
            order_id,
            DFreeStatus::aggregate(details.iter().map(|d| d.status))
        );
        info!("Returned {} lines of club order {}", touched.len(), order_id);

        let shelf_ids: Vec<RecordId> = club_books.iter().map(|cb| cb.id).collect();
        self.invalidate(&[(DFREE_ORDER_INFOS, &[order_id]), (CLUB_BOOK_INFOS, &shelf_ids)])
            .await;
        Ok(DFreeOrderChange {
            order,
            details,
            club_books,
        })
    }

    // Helpers

    async fn invalidate(&self, targets: &[(CacheKeySpec, &[RecordId])]) -> InvalidationReport {
        let mut report = InvalidationReport::default();
        for (spec, ids) in targets {
            if !ids.is_empty() {
                report += self.invalidation.invalidate_for_ids(&[*spec], ids.iter()).await;
            }
        }
        report
    }

    async fn invalidate_custody(
        &self,
        copies: &[BookCopy],
        pledges: &[MemberBookCopy],
        order_ids: &[RecordId],
    ) -> InvalidationReport {
        let copy_ids: Vec<RecordId> = copies.iter().map(|c| c.id).collect();
        let pledge_ids: Vec<RecordId> = pledges.iter().map(|p| p.id).collect();
        self.invalidate(&[
            (BOOK_COPY_INFOS, &copy_ids),
            (MEMBER_BOOK_COPY_INFOS, &pledge_ids),
            (ORDER_INFOS, order_ids),
        ])
        .await
    }

    async fn membership(&self, id: RecordId) -> Result<Membership> {
        self.records
            .memberships(&[id])
            .await?
            .pop()
            .ok_or(ClubshelfError::NotFound {
                entity: "membership",
                id,
            })
    }

    async fn active_membership(&self, id: RecordId) -> Result<Membership> {
        let membership = self.membership(id).await?;
        if !membership.is_active() {
            return Err(ClubshelfError::Validation(format!(
                "membership {} has left the club",
                id
            )));
        }
        Ok(membership)
    }

    async fn staff_membership(&self, id: RecordId) -> Result<Membership> {
        let membership = self.active_membership(id).await?;
        if !membership.is_staff {
            return Err(ClubshelfError::Validation(format!(
                "membership {} is not club staff",
                id
            )));
        }
        Ok(membership)
    }

    /// Pledges by id plus their book copies, all of which must exist
    async fn load_pledges(&self, ids: &[RecordId]) -> Result<(Vec<MemberBookCopy>, HashMap<RecordId, BookCopy>)> {
        let ids = distinct(ids)?;
        let mut found = require_all(
            "member_book_copy",
            &ids,
            self.records.member_book_copies(&ids).await?,
            |p| p.id,
        )?;
        let pledges: Vec<MemberBookCopy> = ids
            .iter()
            .filter_map(|id| found.remove(id))
            .collect();

        let copy_ids: Vec<RecordId> = pledges.iter().map(|p| p.book_copy_id).collect();
        let copies = require_all(
            "book_copy",
            &copy_ids,
            self.records.book_copies(&copy_ids).await?,
            |c| c.id,
        )?;
        Ok((pledges, copies))
    }

    async fn load_order(&self, order_id: RecordId) -> Result<OrderChange> {
        let order = self
            .records
            .orders(&[order_id])
            .await?
            .pop()
            .ok_or(ClubshelfError::NotFound {
                entity: "membership_order",
                id: order_id,
            })?;
        let details = self.records.order_details_of(&[order_id]).await?;
        Ok(OrderChange {
            order,
            details,
            member_book_copies: Vec::new(),
        })
    }

    async fn load_working_order(&self, order_id: RecordId, action: &'static str) -> Result<OrderChange> {
        let order = self.load_order(order_id).await?;
        if !order.order.order_status.is_working() {
            return Err(ClubshelfError::IllegalTransition {
                entity: "membership_order",
                id: order_id,
                from: order.order.order_status.to_string(),
                action,
            });
        }
        Ok(order)
    }

    /// Unsaved DRAFT order for `reader` over available pledges of its club
    async fn draft_order(
        &self,
        reader: &Membership,
        member_book_copy_ids: &[RecordId],
        due_date: NaiveDate,
    ) -> Result<OrderChange> {
        let now = self.clock.now();
        if due_date < now.date_naive() {
            return Err(ClubshelfError::Validation(format!(
                "due date {} is before order date {}",
                due_date,
                now.date_naive()
            )));
        }

        let (pledges, copies) = self.load_pledges(member_book_copy_ids).await?;
        let owner_ids: Vec<RecordId> = pledges.iter().map(|p| p.membership_id).collect();
        let owners = require_all(
            "membership",
            &owner_ids,
            self.records.memberships(&owner_ids).await?,
            |m| m.id,
        )?;

        for pledge in &pledges {
            if owners[&pledge.membership_id].club_id != reader.club_id {
                return Err(ClubshelfError::Validation(format!(
                    "member book copy {} is not shared with club {}",
                    pledge.id, reader.club_id
                )));
            }
            // Dry run: reject unavailable copies before anything is written
            let (mut copy, mut pledge) = (copies[&pledge.book_copy_id].clone(), pledge.clone());
            state::lend(&mut copy, &mut pledge, reader.id)?;
        }

        let order = MembershipOrder {
            id: self.records.next_id(RecordKind::MembershipOrder).await?,
            membership_id: reader.id,
            order_status: OrderStatus::Draft,
            order_date: now,
            confirm_date: None,
        };
        let mut details = Vec::with_capacity(pledges.len());
        for pledge in &pledges {
            details.push(MembershipOrderDetail {
                id: self.records.next_id(RecordKind::MembershipOrderDetail).await?,
                order_id: order.id,
                member_book_copy_id: pledge.id,
                due_date,
                return_date: None,
                overdue_day_count: None,
            });
        }

        Ok(OrderChange {
            order,
            details,
            member_book_copies: Vec::new(),
        })
    }

    /// Lend every line of a just-confirmed order and commit it along with
    /// `changes`
    async fn lend_order(&self, mut order: OrderChange, mut changes: ChangeSet, now: DateTime<Utc>) -> Result<OrderChange> {
        let pledge_ids: Vec<RecordId> = order.details.iter().map(|d| d.member_book_copy_id).collect();
        let (mut pledges, mut copies) = self.load_pledges(&pledge_ids).await?;
        changes.expect_all(pledges.iter().cloned());
        changes.expect_all(copies.values().cloned());

        for pledge in pledges.iter_mut() {
            let copy = copies
                .get_mut(&pledge.book_copy_id)
                .ok_or(ClubshelfError::NotFound {
                    entity: "book_copy",
                    id: pledge.book_copy_id,
                })?;
            state::lend(copy, pledge, order.order.membership_id)?;
        }

        changes.push(order.order.clone());
        for pledge in &pledges {
            let id = self.records.next_id(RecordKind::BookCopyHistory).await?;
            changes.push(state::history(
                id,
                pledge.book_copy_id,
                HistoryAction::ClubBorrowBook,
                Some(order.order.membership_id),
                None,
                now,
            ));
        }

        let copies: Vec<BookCopy> = copies.into_values().collect();
        changes.extend(order.details.iter().cloned());
        changes.extend(copies.iter().cloned());
        changes.extend(pledges.iter().cloned());
        self.records.commit(changes).await?;
        info!(
            "Order {} confirmed: {} copies lent to membership {}",
            order.order.id,
            pledges.len(),
            order.order.membership_id
        );

        self.invalidate_custody(&copies, &pledges, &[order.order.id]).await;
        order.member_book_copies = pledges;
        Ok(order)
    }
}
