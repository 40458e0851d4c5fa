//! Cached read projections
//!
//! These are the values the resolvers store in the cache. They are derived
//! from the records and rebuilt by the loaders whenever their key is missing.

use crate::records::model::{BookCopyStatus, DFreeStatus, OrderStatus, RecordId};
use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AuthorInfo {
    pub id: RecordId,
    pub name: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CategoryInfo {
    pub id: RecordId,
    pub name: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PublisherInfo {
    pub id: RecordId,
    pub name: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ClubInfo {
    pub id: RecordId,
    pub name: String,
    pub code: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MemberInfo {
    pub id: RecordId,
    pub full_name: String,
    pub email: Option<String>,
}

/// Active membership with its member's display data
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MembershipInfo {
    pub id: RecordId,
    pub club_id: RecordId,
    pub is_staff: bool,
    pub member: Option<MemberInfo>,
}

pub type AuthorDict = BTreeMap<RecordId, AuthorInfo>;
pub type CategoryDict = BTreeMap<RecordId, CategoryInfo>;
pub type PublisherDict = BTreeMap<RecordId, PublisherInfo>;
pub type ClubDict = BTreeMap<RecordId, ClubInfo>;
pub type MembershipDict = BTreeMap<RecordId, MembershipInfo>;

/// Book with its catalogue references resolved
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BookInfo {
    pub id: RecordId,
    pub name: String,
    pub author: Option<AuthorInfo>,
    pub category: Option<CategoryInfo>,
    pub publisher: Option<PublisherInfo>,
    pub description: Option<String>,
    pub image: Option<String>,
}

/// Free-shelf stock of one title in one club
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ClubBookInfo {
    pub id: RecordId,
    pub club_id: RecordId,
    pub code: Option<String>,
    pub init_count: i64,
    pub current_count: i64,
    pub book: Option<BookInfo>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BookCopyInfo {
    pub id: RecordId,
    pub owner_id: RecordId,
    pub status: BookCopyStatus,
    pub book: Option<BookInfo>,
}

/// A pledged copy as the club sees it
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MemberBookCopyInfo {
    pub id: RecordId,
    pub book_copy_id: RecordId,
    pub membership_id: RecordId,
    pub onboard_date: Option<DateTime<Utc>>,
    pub current_reader: Option<RecordId>,
    pub is_enabled: bool,
    pub status: Option<BookCopyStatus>,
    pub book: Option<BookInfo>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OrderDetailInfo {
    pub id: RecordId,
    pub member_book_copy_id: RecordId,
    pub book: Option<BookInfo>,
    pub due_date: NaiveDate,
    pub return_date: Option<NaiveDate>,
    pub overdue_day_count: Option<i64>,
}

/// Membership order with its lines
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OrderInfo {
    pub id: RecordId,
    pub membership: Option<MembershipInfo>,
    pub membership_id: RecordId,
    pub order_status: OrderStatus,
    pub order_date: DateTime<Utc>,
    pub confirm_date: Option<DateTime<Utc>>,
    pub details: Vec<OrderDetailInfo>,
}

impl OrderInfo {
    /// Largest overdue count across the lines
    pub fn max_overdue_days(&self) -> i64 {
        self.details
            .iter()
            .filter_map(|d| d.overdue_day_count)
            .max()
            .unwrap_or(0)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DFreeMemberInfo {
    pub id: RecordId,
    pub full_name: String,
    pub code: String,
    pub phone_number: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DFreeOrderDetailInfo {
    pub id: RecordId,
    pub club_book_id: RecordId,
    pub code: Option<String>,
    pub book: Option<BookInfo>,
    pub status: DFreeStatus,
    pub return_date: Option<NaiveDate>,
    pub overdue_day_count: Option<i64>,
}

/// Club order; `order_status` is the aggregate of the line statuses
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DFreeOrderInfo {
    pub id: RecordId,
    pub club_id: RecordId,
    pub member: Option<DFreeMemberInfo>,
    pub order_date: NaiveDate,
    pub due_date: NaiveDate,
    pub order_status: DFreeStatus,
    pub details: Vec<DFreeOrderDetailInfo>,
}
