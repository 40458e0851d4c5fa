//! Lending state machine
//!
//! Pure transition functions over the lending records. Each one either
//! applies the whole transition to the records it is given or returns
//! [`ClubshelfError::IllegalTransition`] and leaves them untouched. Nothing
//! here reads the clock; callers pass `now` / `today` in.

use crate::error::{ClubshelfError, Result};
use crate::records::model::*;
use chrono::{DateTime, NaiveDate, Utc};
use std::fmt::Display;

fn illegal(entity: &'static str, id: RecordId, from: impl Display, action: &'static str) -> ClubshelfError {
    ClubshelfError::IllegalTransition {
        entity,
        id,
        from: from.to_string(),
        action,
    }
}

/// Whole days `until` is past `due`, never negative
pub fn overdue_days(due: NaiveDate, until: NaiveDate) -> i64 {
    (until - due).num_days().max(0)
}

/// `current_reader` set implies on board, and on board with a reader implies
/// the copy is BORROWED
pub fn custody_consistent(copy: &BookCopy, mbc: &MemberBookCopy) -> bool {
    match (mbc.onboard_date, mbc.current_reader) {
        (None, Some(_)) => false,
        (Some(_), Some(_)) => copy.status == BookCopyStatus::Borrowed,
        _ => true,
    }
}

// Book copies

/// Pledge a NEW copy to a club: a member book copy with no onboard date
pub fn share(copy: &BookCopy, id: RecordId, membership_id: RecordId) -> Result<MemberBookCopy> {
    if copy.status != BookCopyStatus::New {
        return Err(illegal("book_copy", copy.id, copy.status, "share"));
    }
    Ok(MemberBookCopy {
        id,
        book_copy_id: copy.id,
        membership_id,
        onboard_date: None,
        current_reader: None,
        is_enabled: true,
    })
}

/// Club takes custody: NEW -> SHARING_CLUB, onboard date set
pub fn deposit(copy: &mut BookCopy, mbc: &mut MemberBookCopy, now: DateTime<Utc>) -> Result<()> {
    if !mbc.is_enabled {
        return Err(illegal("member_book_copy", mbc.id, "DISABLED", "deposit"));
    }
    if mbc.onboard_date.is_some() {
        return Err(illegal("member_book_copy", mbc.id, "ON_BOARD", "deposit"));
    }
    if copy.status != BookCopyStatus::New {
        return Err(illegal("book_copy", copy.id, copy.status, "deposit"));
    }

    copy.status = BookCopyStatus::SharingClub;
    mbc.onboard_date = Some(now);
    Ok(())
}

/// Owner takes the copy back: SHARING_CLUB -> NEW, member copy disabled.
///
/// A pledge that was never deposited is only disabled.
pub fn withdraw(copy: &mut BookCopy, mbc: &mut MemberBookCopy) -> Result<()> {
    if mbc.current_reader.is_some() {
        return Err(illegal("member_book_copy", mbc.id, BookCopyStatus::Borrowed, "withdraw"));
    }
    if !mbc.is_enabled {
        return Err(illegal("member_book_copy", mbc.id, "DISABLED", "withdraw"));
    }
    if mbc.onboard_date.is_some() {
        if copy.status != BookCopyStatus::SharingClub {
            return Err(illegal("book_copy", copy.id, copy.status, "withdraw"));
        }
        copy.status = BookCopyStatus::New;
    }

    mbc.onboard_date = None;
    mbc.is_enabled = false;
    Ok(())
}

/// Hand the copy to `reader`: SHARING_CLUB -> BORROWED
pub fn lend(copy: &mut BookCopy, mbc: &mut MemberBookCopy, reader: RecordId) -> Result<()> {
    if !mbc.is_enabled {
        return Err(illegal("member_book_copy", mbc.id, "DISABLED", "lend"));
    }
    if mbc.onboard_date.is_none() {
        return Err(illegal("member_book_copy", mbc.id, "NOT_ON_BOARD", "lend"));
    }
    if mbc.current_reader.is_some() {
        return Err(illegal("member_book_copy", mbc.id, BookCopyStatus::Borrowed, "lend"));
    }
    if copy.status != BookCopyStatus::SharingClub {
        return Err(illegal("book_copy", copy.id, copy.status, "lend"));
    }

    copy.status = BookCopyStatus::Borrowed;
    mbc.current_reader = Some(reader);
    Ok(())
}

/// Copy comes back to the shelf: BORROWED -> SHARING_CLUB
pub fn give_back(copy: &mut BookCopy, mbc: &mut MemberBookCopy) -> Result<()> {
    if mbc.current_reader.is_none() {
        return Err(illegal("member_book_copy", mbc.id, BookCopyStatus::SharingClub, "return"));
    }
    if copy.status != BookCopyStatus::Borrowed {
        return Err(illegal("book_copy", copy.id, copy.status, "return"));
    }

    copy.status = BookCopyStatus::SharingClub;
    mbc.current_reader = None;
    Ok(())
}

// Membership orders

/// DRAFT -> CREATED
pub fn request_order(order: &mut MembershipOrder) -> Result<()> {
    match order.order_status {
        OrderStatus::Draft => {
            order.order_status = OrderStatus::Created;
            Ok(())
        }
        from => Err(illegal("membership_order", order.id, from, "request")),
    }
}

/// CREATED -> CONFIRMED
pub fn confirm_order(order: &mut MembershipOrder, now: DateTime<Utc>) -> Result<()> {
    match order.order_status {
        OrderStatus::Created => {
            order.order_status = OrderStatus::Confirmed;
            order.confirm_date = Some(now);
            Ok(())
        }
        from => Err(illegal("membership_order", order.id, from, "confirm")),
    }
}

/// DRAFT | CREATED -> CANCEL
pub fn cancel_order(order: &mut MembershipOrder) -> Result<()> {
    match order.order_status {
        OrderStatus::Draft | OrderStatus::Created => {
            order.order_status = OrderStatus::Cancel;
            Ok(())
        }
        from => Err(illegal("membership_order", order.id, from, "cancel")),
    }
}

/// CONFIRMED -> OVERDUE. Returns whether the status changed.
pub fn mark_overdue(order: &mut MembershipOrder) -> bool {
    if order.order_status == OrderStatus::Confirmed {
        order.order_status = OrderStatus::Overdue;
        true
    } else {
        false
    }
}

/// CONFIRMED | OVERDUE -> COMPLETED once every detail has a return date.
/// Returns whether the status changed.
pub fn complete_if_returned(order: &mut MembershipOrder, details: &[MembershipOrderDetail]) -> bool {
    if order.order_status.is_working() && details.iter().all(MembershipOrderDetail::is_returned) {
        order.order_status = OrderStatus::Completed;
        true
    } else {
        false
    }
}

/// Record the return of one detail and freeze its overdue count
pub fn return_detail(detail: &mut MembershipOrderDetail, today: NaiveDate) -> Result<()> {
    if let Some(returned) = detail.return_date {
        return Err(illegal("order_detail", detail.id, format!("RETURNED {}", returned), "return"));
    }
    detail.return_date = Some(today);
    detail.overdue_day_count = Some(overdue_days(detail.due_date, today));
    Ok(())
}

/// Move the due date of an open detail later
pub fn extend_detail(detail: &mut MembershipOrderDetail, new_due: NaiveDate, today: NaiveDate) -> Result<()> {
    if detail.is_returned() {
        return Err(illegal("order_detail", detail.id, "RETURNED", "extend"));
    }
    if new_due <= detail.due_date {
        return Err(ClubshelfError::Validation(format!(
            "new due date {} is not after {}",
            new_due, detail.due_date
        )));
    }
    detail.due_date = new_due;
    detail.overdue_day_count = Some(overdue_days(new_due, today));
    Ok(())
}

/// Recompute the overdue count of an open detail. Returned details are
/// frozen. Returns whether the detail changed.
pub fn accrue_detail(detail: &mut MembershipOrderDetail, today: NaiveDate) -> bool {
    if detail.is_returned() {
        return false;
    }
    let count = Some(overdue_days(detail.due_date, today));
    if detail.overdue_day_count == count {
        return false;
    }
    detail.overdue_day_count = count;
    true
}

// Club (DFree) orders

/// Recompute an open club-order line against the order's due date,
/// promoting CREATED -> OVERDUE. Returns whether the line changed.
pub fn accrue_dfree_detail(detail: &mut DFreeOrderDetail, due: NaiveDate, today: NaiveDate) -> bool {
    if !detail.status.is_open() {
        return false;
    }
    let days = overdue_days(due, today);
    let status = if days > 0 {
        DFreeStatus::Overdue
    } else {
        detail.status
    };
    if detail.overdue_day_count == Some(days) && detail.status == status {
        return false;
    }
    detail.overdue_day_count = Some(days);
    detail.status = status;
    true
}

/// CREATED | OVERDUE -> COMPLETE, freezing the count at the return date
pub fn return_dfree_detail(detail: &mut DFreeOrderDetail, due: NaiveDate, today: NaiveDate) -> Result<()> {
    if !detail.status.is_open() {
        return Err(illegal("dfree_order_detail", detail.id, detail.status, "return"));
    }
    detail.status = DFreeStatus::Complete;
    detail.return_date = Some(today);
    detail.overdue_day_count = Some(overdue_days(due, today));
    Ok(())
}

/// Take one copy off a club shelf
pub fn take_club_book(club_book: &mut ClubBook) -> Result<()> {
    if club_book.current_count <= 0 {
        return Err(ClubshelfError::Validation(format!(
            "club book {} has no copies left",
            club_book.id
        )));
    }
    club_book.current_count -= 1;
    Ok(())
}

/// Put one copy back on a club shelf
pub fn restock_club_book(club_book: &mut ClubBook) {
    club_book.current_count += 1;
}

/// Audit row for a custody event
pub fn history(
    id: RecordId,
    book_copy_id: RecordId,
    action: HistoryAction,
    membership_id: Option<RecordId>,
    description: Option<String>,
    now: DateTime<Utc>,
) -> BookCopyHistory {
    BookCopyHistory {
        id,
        book_copy_id,
        action,
        membership_id,
        description,
        created_at: now,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn day(d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(2024, 3, d).unwrap()
    }

    fn now() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 3, 1, 9, 0, 0).unwrap()
    }

    fn new_copy() -> BookCopy {
        BookCopy {
            id: 1,
            book_id: 10,
            owner_id: 100,
            status: BookCopyStatus::New,
        }
    }

    fn on_shelf() -> (BookCopy, MemberBookCopy) {
        let mut copy = new_copy();
        let mut mbc = share(&copy, 5, 20).unwrap();
        deposit(&mut copy, &mut mbc, now()).unwrap();
        (copy, mbc)
    }

    fn order(status: OrderStatus) -> MembershipOrder {
        MembershipOrder {
            id: 7,
            membership_id: 21,
            order_status: status,
            order_date: now(),
            confirm_date: None,
        }
    }

    fn detail(due: NaiveDate) -> MembershipOrderDetail {
        MembershipOrderDetail {
            id: 70,
            order_id: 7,
            member_book_copy_id: 5,
            due_date: due,
            return_date: None,
            overdue_day_count: None,
        }
    }

    #[test]
    fn test_overdue_days_never_negative() {
        assert_eq!(overdue_days(day(10), day(13)), 3);
        assert_eq!(overdue_days(day(10), day(10)), 0);
        assert_eq!(overdue_days(day(10), day(2)), 0);
    }

    #[test]
    fn test_share_only_new_copies() {
        let mut copy = new_copy();
        let mbc = share(&copy, 5, 20).unwrap();
        assert!(mbc.onboard_date.is_none());
        assert!(mbc.is_enabled);

        copy.status = BookCopyStatus::Lost;
        assert!(share(&copy, 6, 20).unwrap_err().is_illegal_transition());
    }

    #[test]
    fn test_full_custody_cycle_keeps_invariant() {
        let (mut copy, mut mbc) = on_shelf();
        assert_eq!(copy.status, BookCopyStatus::SharingClub);
        assert!(custody_consistent(&copy, &mbc));

        lend(&mut copy, &mut mbc, 21).unwrap();
        assert_eq!(copy.status, BookCopyStatus::Borrowed);
        assert_eq!(mbc.current_reader, Some(21));
        assert!(custody_consistent(&copy, &mbc));

        give_back(&mut copy, &mut mbc).unwrap();
        assert_eq!(copy.status, BookCopyStatus::SharingClub);
        assert!(custody_consistent(&copy, &mbc));

        withdraw(&mut copy, &mut mbc).unwrap();
        assert_eq!(copy.status, BookCopyStatus::New);
        assert!(!mbc.is_enabled);
        assert!(mbc.onboard_date.is_none());
        assert!(custody_consistent(&copy, &mbc));
    }

    #[test]
    fn test_withdraw_borrowed_is_rejected_and_changes_nothing() {
        let (mut copy, mut mbc) = on_shelf();
        lend(&mut copy, &mut mbc, 21).unwrap();
        let (copy_before, mbc_before) = (copy.clone(), mbc.clone());

        let err = withdraw(&mut copy, &mut mbc).unwrap_err();
        assert!(err.is_illegal_transition());
        assert_eq!(copy, copy_before);
        assert_eq!(mbc, mbc_before);
    }

    #[test]
    fn test_lend_requires_on_board_and_free() {
        let mut copy = new_copy();
        let mut mbc = share(&copy, 5, 20).unwrap();
        assert!(lend(&mut copy, &mut mbc, 21).is_err());

        let (mut copy, mut mbc) = on_shelf();
        lend(&mut copy, &mut mbc, 21).unwrap();
        assert!(lend(&mut copy, &mut mbc, 22).is_err());
        assert_eq!(mbc.current_reader, Some(21));
    }

    #[test]
    fn test_deposit_twice_is_rejected() {
        let (mut copy, mut mbc) = on_shelf();
        assert!(deposit(&mut copy, &mut mbc, now()).is_err());
    }

    #[test]
    fn test_withdraw_pledge_never_deposited() {
        let mut copy = new_copy();
        let mut mbc = share(&copy, 5, 20).unwrap();
        withdraw(&mut copy, &mut mbc).unwrap();
        assert_eq!(copy.status, BookCopyStatus::New);
        assert!(!mbc.is_enabled);
        assert!(withdraw(&mut copy, &mut mbc).is_err());
    }

    #[test]
    fn test_order_transitions() {
        let mut o = order(OrderStatus::Draft);
        request_order(&mut o).unwrap();
        assert_eq!(o.order_status, OrderStatus::Created);
        confirm_order(&mut o, now()).unwrap();
        assert_eq!(o.order_status, OrderStatus::Confirmed);
        assert_eq!(o.confirm_date, Some(now()));

        assert!(cancel_order(&mut o).is_err());
        assert!(confirm_order(&mut o, now()).is_err());
        assert!(mark_overdue(&mut o));
        assert!(!mark_overdue(&mut o));
        assert_eq!(o.order_status, OrderStatus::Overdue);

        let mut o = order(OrderStatus::Created);
        cancel_order(&mut o).unwrap();
        assert_eq!(o.order_status, OrderStatus::Cancel);
        assert!(request_order(&mut o).is_err());
    }

    #[test]
    fn test_completion_needs_every_return() {
        let mut o = order(OrderStatus::Overdue);
        let mut first = detail(day(10));
        let second = detail(day(10));
        return_detail(&mut first, day(12)).unwrap();

        assert!(!complete_if_returned(&mut o, &[first.clone(), second.clone()]));
        let mut second = second;
        return_detail(&mut second, day(9)).unwrap();
        assert!(complete_if_returned(&mut o, &[first, second]));
        assert_eq!(o.order_status, OrderStatus::Completed);
    }

    #[test]
    fn test_accrual_then_return_freezes_count() {
        let mut d = detail(day(10));
        assert!(accrue_detail(&mut d, day(13)));
        assert_eq!(d.overdue_day_count, Some(3));
        assert!(!accrue_detail(&mut d, day(13)));

        return_detail(&mut d, day(15)).unwrap();
        assert_eq!(d.overdue_day_count, Some(5));
        assert!(!accrue_detail(&mut d, day(25)));
        assert_eq!(d.overdue_day_count, Some(5));
        assert!(return_detail(&mut d, day(16)).is_err());
    }

    #[test]
    fn test_extend_detail() {
        let mut d = detail(day(10));
        accrue_detail(&mut d, day(12));
        extend_detail(&mut d, day(20), day(12)).unwrap();
        assert_eq!(d.due_date, day(20));
        assert_eq!(d.overdue_day_count, Some(0));

        assert!(matches!(
            extend_detail(&mut d, day(15), day(12)),
            Err(ClubshelfError::Validation(_))
        ));
        return_detail(&mut d, day(14)).unwrap();
        assert!(extend_detail(&mut d, day(30), day(14)).unwrap_err().is_illegal_transition());
    }

    #[test]
    fn test_dfree_lines() {
        let mut line = DFreeOrderDetail {
            id: 1,
            order_id: 2,
            club_book_id: 3,
            status: DFreeStatus::Created,
            return_date: None,
            overdue_day_count: None,
        };

        assert!(accrue_dfree_detail(&mut line, day(10), day(8)));
        assert_eq!(line.status, DFreeStatus::Created);
        assert_eq!(line.overdue_day_count, Some(0));

        assert!(accrue_dfree_detail(&mut line, day(10), day(12)));
        assert_eq!(line.status, DFreeStatus::Overdue);
        assert_eq!(line.overdue_day_count, Some(2));
        assert!(!accrue_dfree_detail(&mut line, day(10), day(12)));

        return_dfree_detail(&mut line, day(10), day(14)).unwrap();
        assert_eq!(line.status, DFreeStatus::Complete);
        assert_eq!(line.overdue_day_count, Some(4));
        assert!(!accrue_dfree_detail(&mut line, day(10), day(30)));
        assert!(return_dfree_detail(&mut line, day(10), day(30)).is_err());
    }

    #[test]
    fn test_club_book_counter() {
        let mut cb = ClubBook {
            id: 1,
            book_id: 10,
            club_id: 2,
            code: None,
            init_count: 1,
            current_count: 1,
        };
        take_club_book(&mut cb).unwrap();
        assert_eq!(cb.current_count, 0);
        assert!(matches!(take_club_book(&mut cb), Err(ClubshelfError::Validation(_))));
        restock_club_book(&mut cb);
        assert_eq!(cb.current_count, 1);
    }
}
