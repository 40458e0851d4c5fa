//! Type definitions for the lending records

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Identifier of every record kind
pub type RecordId = i64;

/// Custody status of a physical book copy
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum BookCopyStatus {
    /// Held by its owner, never deposited
    New,
    /// Manual override: worn out
    Used,
    /// Manual override: lost
    Lost,
    /// Manual override: returned to its owner for good
    Return,
    /// On loan to a club member
    Borrowed,
    /// In club custody and available
    SharingClub,
}

impl BookCopyStatus {
    /// Convert status to its stored string
    pub fn as_str(&self) -> &'static str {
        match self {
            BookCopyStatus::New => "NEW",
            BookCopyStatus::Used => "USED",
            BookCopyStatus::Lost => "LOST",
            BookCopyStatus::Return => "RETURN",
            BookCopyStatus::Borrowed => "BORROWED",
            BookCopyStatus::SharingClub => "SHARING_CLUB",
        }
    }

    /// Parse status from its stored string
    pub fn parse(s: &str) -> Option<Self> {
        match s.to_uppercase().as_str() {
            "NEW" => Some(BookCopyStatus::New),
            "USED" => Some(BookCopyStatus::Used),
            "LOST" => Some(BookCopyStatus::Lost),
            "RETURN" => Some(BookCopyStatus::Return),
            "BORROWED" => Some(BookCopyStatus::Borrowed),
            "SHARING_CLUB" => Some(BookCopyStatus::SharingClub),
            _ => None,
        }
    }

    /// USED, LOST and RETURN are only ever set by hand
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            BookCopyStatus::Used | BookCopyStatus::Lost | BookCopyStatus::Return
        )
    }
}

/// Status of a membership order
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum OrderStatus {
    Draft,
    Cancel,
    Created,
    Confirmed,
    Overdue,
    Completed,
}

impl OrderStatus {
    /// Convert status to its stored string
    pub fn as_str(&self) -> &'static str {
        match self {
            OrderStatus::Draft => "DRAFT",
            OrderStatus::Cancel => "CANCEL",
            OrderStatus::Created => "CREATED",
            OrderStatus::Confirmed => "CONFIRMED",
            OrderStatus::Overdue => "OVERDUE",
            OrderStatus::Completed => "COMPLETED",
        }
    }

    /// Parse status from its stored string
    pub fn parse(s: &str) -> Option<Self> {
        match s.to_uppercase().as_str() {
            "DRAFT" => Some(OrderStatus::Draft),
            "CANCEL" => Some(OrderStatus::Cancel),
            "CREATED" => Some(OrderStatus::Created),
            "CONFIRMED" => Some(OrderStatus::Confirmed),
            "OVERDUE" => Some(OrderStatus::Overdue),
            "COMPLETED" => Some(OrderStatus::Completed),
            _ => None,
        }
    }

    /// Books are out: CONFIRMED or OVERDUE
    pub fn is_working(&self) -> bool {
        matches!(self, OrderStatus::Confirmed | OrderStatus::Overdue)
    }
}

/// Status of one club-order line
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum DFreeStatus {
    Created,
    Overdue,
    Complete,
}

impl DFreeStatus {
    /// Convert status to its stored string
    pub fn as_str(&self) -> &'static str {
        match self {
            DFreeStatus::Created => "CREATED",
            DFreeStatus::Overdue => "OVERDUE",
            DFreeStatus::Complete => "COMPLETE",
        }
    }

    /// Parse status from its stored string
    pub fn parse(s: &str) -> Option<Self> {
        match s.to_uppercase().as_str() {
            "CREATED" => Some(DFreeStatus::Created),
            "OVERDUE" => Some(DFreeStatus::Overdue),
            "COMPLETE" => Some(DFreeStatus::Complete),
            _ => None,
        }
    }

    /// Not yet returned
    pub fn is_open(&self) -> bool {
        !matches!(self, DFreeStatus::Complete)
    }

    /// Status of an order given its line statuses.
    ///
    /// COMPLETE when every line is, OVERDUE when any line is, CREATED
    /// otherwise. An order with no lines is CREATED.
    pub fn aggregate<I>(statuses: I) -> DFreeStatus
    where
        I: IntoIterator<Item = DFreeStatus>,
    {
        let mut any = false;
        let mut all_complete = true;
        let mut any_overdue = false;
        for status in statuses {
            any = true;
            all_complete &= status == DFreeStatus::Complete;
            any_overdue |= status == DFreeStatus::Overdue;
        }

        if any && all_complete {
            DFreeStatus::Complete
        } else if any_overdue {
            DFreeStatus::Overdue
        } else {
            DFreeStatus::Created
        }
    }
}

/// Custody event recorded in the book copy history
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum HistoryAction {
    DonateToClub,
    WithdrawBookFromClub,
    ClubBorrowBook,
    ClubReturnBook,
    ClubExtendDueDate,
}

impl HistoryAction {
    pub fn as_str(&self) -> &'static str {
        match self {
            HistoryAction::DonateToClub => "DONATE_TO_CLUB",
            HistoryAction::WithdrawBookFromClub => "WITHDRAW_BOOK_FROM_CLUB",
            HistoryAction::ClubBorrowBook => "CLUB_BORROW_BOOK",
            HistoryAction::ClubReturnBook => "CLUB_RETURN_BOOK",
            HistoryAction::ClubExtendDueDate => "CLUB_EXTEND_DUE_DATE",
        }
    }
}

macro_rules! display_as_str {
    ($($ty:ty),*) => {
        $(impl fmt::Display for $ty {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(self.as_str())
            }
        })*
    };
}

display_as_str!(BookCopyStatus, OrderStatus, DFreeStatus, HistoryAction);

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Author {
    pub id: RecordId,
    pub name: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Category {
    pub id: RecordId,
    pub name: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Publisher {
    pub id: RecordId,
    pub name: String,
}

/// Catalogue entry shared by every physical copy of a title
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Book {
    pub id: RecordId,
    pub name: String,
    pub author_id: RecordId,
    pub category_id: RecordId,
    pub publisher_id: Option<RecordId>,
    pub description: Option<String>,
    /// Image location, resolved by the file store
    pub image: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BookClub {
    pub id: RecordId,
    pub name: String,
    pub code: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Member {
    pub id: RecordId,
    pub full_name: String,
    pub email: Option<String>,
}

/// A member's seat in one club
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Membership {
    pub id: RecordId,
    pub member_id: RecordId,
    pub club_id: RecordId,
    pub is_staff: bool,
    /// Set when the member left the club
    pub left_at: Option<DateTime<Utc>>,
}

impl Membership {
    pub fn is_active(&self) -> bool {
        self.left_at.is_none()
    }
}

/// Physical copy of a book, owned by a member
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BookCopy {
    pub id: RecordId,
    pub book_id: RecordId,
    pub owner_id: RecordId,
    pub status: BookCopyStatus,
}

/// A book copy pledged to a club by one of its memberships
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MemberBookCopy {
    pub id: RecordId,
    pub book_copy_id: RecordId,
    pub membership_id: RecordId,
    /// Set while the copy is physically in club custody
    pub onboard_date: Option<DateTime<Utc>>,
    /// Membership currently borrowing the copy
    pub current_reader: Option<RecordId>,
    pub is_enabled: bool,
}

/// One borrowing transaction of a membership
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MembershipOrder {
    pub id: RecordId,
    pub membership_id: RecordId,
    pub order_status: OrderStatus,
    pub order_date: DateTime<Utc>,
    pub confirm_date: Option<DateTime<Utc>>,
}

/// One borrowed copy within a membership order
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MembershipOrderDetail {
    pub id: RecordId,
    pub order_id: RecordId,
    pub member_book_copy_id: RecordId,
    pub due_date: NaiveDate,
    pub return_date: Option<NaiveDate>,
    pub overdue_day_count: Option<i64>,
}

impl MembershipOrderDetail {
    pub fn is_returned(&self) -> bool {
        self.return_date.is_some()
    }
}

/// Append-only custody audit row
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BookCopyHistory {
    pub id: RecordId,
    pub book_copy_id: RecordId,
    pub action: HistoryAction,
    pub membership_id: Option<RecordId>,
    pub description: Option<String>,
    pub created_at: DateTime<Utc>,
}

/// Stock of one title in a club's free shelf
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ClubBook {
    pub id: RecordId,
    pub book_id: RecordId,
    pub club_id: RecordId,
    pub code: Option<String>,
    pub init_count: i64,
    pub current_count: i64,
}

/// Walk-in borrower of a club's free shelf
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DFreeMember {
    pub id: RecordId,
    pub full_name: String,
    pub code: String,
    pub phone_number: Option<String>,
    pub club_id: RecordId,
}

/// Free-shelf order; every line shares the order's due date
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DFreeOrder {
    pub id: RecordId,
    pub member_id: RecordId,
    pub club_id: RecordId,
    pub order_date: NaiveDate,
    pub due_date: NaiveDate,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DFreeOrderDetail {
    pub id: RecordId,
    pub order_id: RecordId,
    pub club_book_id: RecordId,
    pub status: DFreeStatus,
    pub return_date: Option<NaiveDate>,
    pub overdue_day_count: Option<i64>,
}
