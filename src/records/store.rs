//! Durable record store abstraction and the in-memory implementation
//!
//! Every mutation reaches the store as one [`ChangeSet`], applied all or
//! nothing by [`RecordStore::commit`]. Rows are upserts keyed by record id;
//! nothing is ever deleted. A change set may also carry the rows its writer
//! read: the commit is refused with [`ClubshelfError::StaleRecord`] unless
//! each of them is still stored exactly as read.

use crate::error::{ClubshelfError, Result};
use crate::records::model::*;
use async_trait::async_trait;
use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::RwLock;
use tracing::debug;

macro_rules! record_rows {
    ($($variant:ident($ty:ty) => $table:ident),* $(,)?) => {
        /// One upserted record
        #[derive(Debug, Clone, PartialEq)]
        pub enum Row {
            $($variant($ty),)*
        }

        /// Record kinds, one per table
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
        pub enum RecordKind {
            $($variant,)*
        }

        impl RecordKind {
            /// Table name
            pub fn table(&self) -> &'static str {
                match self {
                    $(RecordKind::$variant => stringify!($table),)*
                }
            }
        }

        impl Row {
            /// Table the row belongs to
            pub fn kind(&self) -> RecordKind {
                match self {
                    $(Row::$variant(_) => RecordKind::$variant,)*
                }
            }

            /// Record id of the row
            pub fn id(&self) -> RecordId {
                match self {
                    $(Row::$variant(record) => record.id,)*
                }
            }
        }

        $(impl From<$ty> for Row {
            fn from(record: $ty) -> Self {
                Row::$variant(record)
            }
        })*

        #[derive(Default)]
        struct Tables {
            $($table: BTreeMap<RecordId, $ty>,)*
            sequences: HashMap<RecordKind, RecordId>,
        }

        impl Tables {
            fn current(&self, kind: RecordKind, id: RecordId) -> Option<Row> {
                match kind {
                    $(RecordKind::$variant => self.$table.get(&id).cloned().map(Row::$variant),)*
                }
            }

            fn upsert(&mut self, row: Row) {
                let (kind, id) = (row.kind(), row.id());
                let seq = self.sequences.entry(kind).or_insert(0);
                *seq = (*seq).max(id);
                match row {
                    $(Row::$variant(record) => {
                        self.$table.insert(record.id, record);
                    })*
                }
            }
        }
    };
}

record_rows! {
    Author(Author) => authors,
    Category(Category) => categories,
    Publisher(Publisher) => publishers,
    Book(Book) => books,
    BookClub(BookClub) => clubs,
    Member(Member) => members,
    Membership(Membership) => memberships,
    BookCopy(BookCopy) => book_copies,
    MemberBookCopy(MemberBookCopy) => member_book_copies,
    MembershipOrder(MembershipOrder) => orders,
    MembershipOrderDetail(MembershipOrderDetail) => order_details,
    BookCopyHistory(BookCopyHistory) => history,
    ClubBook(ClubBook) => club_books,
    DFreeMember(DFreeMember) => dfree_members,
    DFreeOrder(DFreeOrder) => dfree_orders,
    DFreeOrderDetail(DFreeOrderDetail) => dfree_order_details,
}

/// Rows written together by one mutation
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ChangeSet {
    pub rows: Vec<Row>,

    /// Rows as the writer read them; each must be unchanged at commit
    pub expected: Vec<Row>,
}

impl ChangeSet {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a row
    pub fn push(&mut self, row: impl Into<Row>) {
        self.rows.push(row.into());
    }

    /// Add a row, builder style
    pub fn with(mut self, row: impl Into<Row>) -> Self {
        self.push(row);
        self
    }

    /// Require `row` to still be stored as read when this set commits
    pub fn expect(&mut self, row: impl Into<Row>) {
        self.expected.push(row.into());
    }

    /// Add a read precondition, builder style
    pub fn expecting(mut self, row: impl Into<Row>) -> Self {
        self.expect(row);
        self
    }

    /// Add read preconditions for every row of `rows`
    pub fn expect_all<R: Into<Row>>(&mut self, rows: impl IntoIterator<Item = R>) {
        self.expected.extend(rows.into_iter().map(Into::into));
    }

    /// True when no row is written; preconditions alone do not count
    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }
}

impl<R: Into<Row>> Extend<R> for ChangeSet {
    fn extend<T: IntoIterator<Item = R>>(&mut self, iter: T) {
        self.rows.extend(iter.into_iter().map(Into::into));
    }
}

/// Durable record store the lending core reads from and commits to.
///
/// Id-set reads return the records that exist, in id order; unknown ids are
/// skipped.
#[async_trait]
pub trait RecordStore: Send + Sync {
    async fn authors(&self) -> Result<Vec<Author>>;
    async fn categories(&self) -> Result<Vec<Category>>;
    async fn publishers(&self) -> Result<Vec<Publisher>>;
    async fn clubs(&self) -> Result<Vec<BookClub>>;

    /// Memberships whose member has not left the club
    async fn active_memberships(&self) -> Result<Vec<Membership>>;

    async fn books(&self, ids: &[RecordId]) -> Result<Vec<Book>>;
    async fn club_books(&self, ids: &[RecordId]) -> Result<Vec<ClubBook>>;
    async fn members(&self, ids: &[RecordId]) -> Result<Vec<Member>>;
    async fn memberships(&self, ids: &[RecordId]) -> Result<Vec<Membership>>;
    async fn book_copies(&self, ids: &[RecordId]) -> Result<Vec<BookCopy>>;
    async fn member_book_copies(&self, ids: &[RecordId]) -> Result<Vec<MemberBookCopy>>;
    async fn orders(&self, ids: &[RecordId]) -> Result<Vec<MembershipOrder>>;
    async fn order_details(&self, ids: &[RecordId]) -> Result<Vec<MembershipOrderDetail>>;
    async fn dfree_members(&self, ids: &[RecordId]) -> Result<Vec<DFreeMember>>;
    async fn dfree_orders(&self, ids: &[RecordId]) -> Result<Vec<DFreeOrder>>;
    async fn dfree_order_details(&self, ids: &[RecordId]) -> Result<Vec<DFreeOrderDetail>>;

    /// Member book copies pointing at any of `book_copy_ids`
    async fn member_book_copies_of(&self, book_copy_ids: &[RecordId]) -> Result<Vec<MemberBookCopy>>;

    /// Details of any of `order_ids`
    async fn order_details_of(&self, order_ids: &[RecordId]) -> Result<Vec<MembershipOrderDetail>>;

    /// Club-order lines of any of `order_ids`
    async fn dfree_order_details_of(&self, order_ids: &[RecordId]) -> Result<Vec<DFreeOrderDetail>>;

    /// Custody history of one copy, oldest first
    async fn history_of(&self, book_copy_id: RecordId) -> Result<Vec<BookCopyHistory>>;

    async fn orders_with_status(&self, statuses: &[OrderStatus]) -> Result<Vec<MembershipOrder>>;
    async fn dfree_details_with_status(&self, statuses: &[DFreeStatus]) -> Result<Vec<DFreeOrderDetail>>;

    /// Allocate a fresh id for `kind`
    async fn next_id(&self, kind: RecordKind) -> Result<RecordId>;

    /// Apply every row of `changes`, or none of them.
    ///
    /// Fails with [`ClubshelfError::StaleRecord`] and writes nothing when a
    /// row in `changes.expected` differs from the stored one.
    async fn commit(&self, changes: ChangeSet) -> Result<()>;
}

/// In-memory record store for tests, demos and the binary
#[derive(Default)]
pub struct InMemoryRecordStore {
    tables: Arc<RwLock<Tables>>,
    commits: AtomicU64,
}

fn pick<T: Clone>(table: &BTreeMap<RecordId, T>, ids: &[RecordId]) -> Vec<T> {
    let wanted: HashSet<RecordId> = ids.iter().copied().collect();
    table
        .iter()
        .filter(|(id, _)| wanted.contains(id))
        .map(|(_, record)| record.clone())
        .collect()
}

impl InMemoryRecordStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Store pre-filled with `changes`
    pub async fn seeded(changes: ChangeSet) -> Self {
        let store = Self::new();
        {
            let mut tables = store.tables.write().await;
            for row in changes.rows {
                tables.upsert(row);
            }
        }
        store
    }

    /// Number of successful commits so far
    pub fn commit_count(&self) -> u64 {
        self.commits.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl RecordStore for InMemoryRecordStore {
    async fn authors(&self) -> Result<Vec<Author>> {
        Ok(self.tables.read().await.authors.values().cloned().collect())
    }

    async fn categories(&self) -> Result<Vec<Category>> {
        Ok(self.tables.read().await.categories.values().cloned().collect())
    }

    async fn publishers(&self) -> Result<Vec<Publisher>> {
        Ok(self.tables.read().await.publishers.values().cloned().collect())
    }

    async fn clubs(&self) -> Result<Vec<BookClub>> {
        Ok(self.tables.read().await.clubs.values().cloned().collect())
    }

    async fn active_memberships(&self) -> Result<Vec<Membership>> {
        Ok(self
            .tables
            .read()
            .await
            .memberships
            .values()
            .filter(|m| m.is_active())
            .cloned()
            .collect())
    }

    async fn books(&self, ids: &[RecordId]) -> Result<Vec<Book>> {
        Ok(pick(&self.tables.read().await.books, ids))
    }

    async fn club_books(&self, ids: &[RecordId]) -> Result<Vec<ClubBook>> {
        Ok(pick(&self.tables.read().await.club_books, ids))
    }

    async fn members(&self, ids: &[RecordId]) -> Result<Vec<Member>> {
        Ok(pick(&self.tables.read().await.members, ids))
    }

    async fn memberships(&self, ids: &[RecordId]) -> Result<Vec<Membership>> {
        Ok(pick(&self.tables.read().await.memberships, ids))
    }

    async fn book_copies(&self, ids: &[RecordId]) -> Result<Vec<BookCopy>> {
        Ok(pick(&self.tables.read().await.book_copies, ids))
    }

    async fn member_book_copies(&self, ids: &[RecordId]) -> Result<Vec<MemberBookCopy>> {
        Ok(pick(&self.tables.read().await.member_book_copies, ids))
    }

    async fn orders(&self, ids: &[RecordId]) -> Result<Vec<MembershipOrder>> {
        Ok(pick(&self.tables.read().await.orders, ids))
    }

    async fn order_details(&self, ids: &[RecordId]) -> Result<Vec<MembershipOrderDetail>> {
        Ok(pick(&self.tables.read().await.order_details, ids))
    }

    async fn dfree_members(&self, ids: &[RecordId]) -> Result<Vec<DFreeMember>> {
        Ok(pick(&self.tables.read().await.dfree_members, ids))
    }

    async fn dfree_orders(&self, ids: &[RecordId]) -> Result<Vec<DFreeOrder>> {
        Ok(pick(&self.tables.read().await.dfree_orders, ids))
    }

    async fn dfree_order_details(&self, ids: &[RecordId]) -> Result<Vec<DFreeOrderDetail>> {
        Ok(pick(&self.tables.read().await.dfree_order_details, ids))
    }

    async fn member_book_copies_of(&self, book_copy_ids: &[RecordId]) -> Result<Vec<MemberBookCopy>> {
        let wanted: HashSet<RecordId> = book_copy_ids.iter().copied().collect();
        Ok(self
            .tables
            .read()
            .await
            .member_book_copies
            .values()
            .filter(|mbc| wanted.contains(&mbc.book_copy_id))
            .cloned()
            .collect())
    }

    async fn order_details_of(&self, order_ids: &[RecordId]) -> Result<Vec<MembershipOrderDetail>> {
        let wanted: HashSet<RecordId> = order_ids.iter().copied().collect();
        Ok(self
            .tables
            .read()
            .await
            .order_details
            .values()
            .filter(|detail| wanted.contains(&detail.order_id))
            .cloned()
            .collect())
    }

    async fn dfree_order_details_of(&self, order_ids: &[RecordId]) -> Result<Vec<DFreeOrderDetail>> {
        let wanted: HashSet<RecordId> = order_ids.iter().copied().collect();
        Ok(self
            .tables
            .read()
            .await
            .dfree_order_details
            .values()
            .filter(|detail| wanted.contains(&detail.order_id))
            .cloned()
            .collect())
    }

    async fn history_of(&self, book_copy_id: RecordId) -> Result<Vec<BookCopyHistory>> {
        Ok(self
            .tables
            .read()
            .await
            .history
            .values()
            .filter(|h| h.book_copy_id == book_copy_id)
            .cloned()
            .collect())
    }

    async fn orders_with_status(&self, statuses: &[OrderStatus]) -> Result<Vec<MembershipOrder>> {
        Ok(self
            .tables
            .read()
            .await
            .orders
            .values()
            .filter(|order| statuses.contains(&order.order_status))
            .cloned()
            .collect())
    }

    async fn dfree_details_with_status(&self, statuses: &[DFreeStatus]) -> Result<Vec<DFreeOrderDetail>> {
        Ok(self
            .tables
            .read()
            .await
            .dfree_order_details
            .values()
            .filter(|detail| statuses.contains(&detail.status))
            .cloned()
            .collect())
    }

    async fn next_id(&self, kind: RecordKind) -> Result<RecordId> {
        let mut tables = self.tables.write().await;
        let seq = tables.sequences.entry(kind).or_insert(0);
        *seq += 1;
        Ok(*seq)
    }

    async fn commit(&self, changes: ChangeSet) -> Result<()> {
        if changes.is_empty() {
            return Err(ClubshelfError::Validation("empty change set".to_string()));
        }

        let count = changes.len();
        let mut tables = self.tables.write().await;
        if let Some(stale) = changes
            .expected
            .iter()
            .find(|read| tables.current(read.kind(), read.id()).as_ref() != Some(*read))
        {
            debug!("Refusing commit: {} {} changed", stale.kind().table(), stale.id());
            return Err(ClubshelfError::StaleRecord {
                entity: stale.kind().table(),
                id: stale.id(),
            });
        }
        for row in changes.rows {
            tables.upsert(row);
        }
        self.commits.fetch_add(1, Ordering::SeqCst);
        debug!("Committed {} rows", count);
        Ok(())
    }
}
