//! Cache-aside resolvers for every lending projection
//!
//! [`Projections`] wires one resolver per key spec. Batch loaders are structs
//! holding the record store and the resolvers they build on, so a book
//! projection loaded for an order comes from the book cache when it can.

use crate::cache::{
    single_loader, BatchKeyedCacheAside, BatchLoader, CacheConfig, KeyedCacheStore,
    SingleValueCacheAside, AUTHOR_INFOS_DICT, BOOK_COPY_INFOS, BOOK_INFOS, CATEGORY_INFOS_DICT,
    CLUB_BOOK_INFOS, CLUB_INFOS_DICT, DFREE_ORDER_INFOS, MEMBERSHIP_INFOS_DICT,
    MEMBER_BOOK_COPY_INFOS, MEMBER_INFOS, ORDER_INFOS, PUBLISHER_INFOS_DICT,
};
use crate::error::Result;
use crate::lending::infos::*;
use crate::records::model::{DFreeStatus, RecordId};
use crate::records::store::RecordStore;
use async_trait::async_trait;
use std::collections::{HashMap, HashSet};
use std::sync::Arc;

pub type BookResolver = BatchKeyedCacheAside<RecordId, BookInfo>;
pub type MemberResolver = BatchKeyedCacheAside<RecordId, MemberInfo>;

fn id_vec(ids: HashSet<RecordId>) -> Vec<RecordId> {
    let mut ids: Vec<RecordId> = ids.into_iter().collect();
    ids.sort_unstable();
    ids
}

struct BookInfoLoader {
    records: Arc<dyn RecordStore>,
    authors: Arc<SingleValueCacheAside<AuthorDict>>,
    categories: Arc<SingleValueCacheAside<CategoryDict>>,
    publishers: Arc<SingleValueCacheAside<PublisherDict>>,
}

#[async_trait]
impl BatchLoader<RecordId, BookInfo> for BookInfoLoader {
    async fn load(&self, ids: HashSet<RecordId>, _extra: Vec<String>) -> Result<HashMap<RecordId, BookInfo>> {
        let books = self.records.books(&id_vec(ids)).await?;
        if books.is_empty() {
            return Ok(HashMap::new());
        }

        let authors = self.authors.get().await?;
        let categories = self.categories.get().await?;
        let publishers = self.publishers.get().await?;

        Ok(books
            .into_iter()
            .map(|book| {
                let info = BookInfo {
                    id: book.id,
                    author: authors.get(&book.author_id).cloned(),
                    category: categories.get(&book.category_id).cloned(),
                    publisher: book.publisher_id.and_then(|id| publishers.get(&id).cloned()),
                    name: book.name,
                    description: book.description,
                    image: book.image,
                };
                (info.id, info)
            })
            .collect())
    }
}

struct ClubBookInfoLoader {
    records: Arc<dyn RecordStore>,
    books: Arc<BookResolver>,
}

#[async_trait]
impl BatchLoader<RecordId, ClubBookInfo> for ClubBookInfoLoader {
    async fn load(&self, ids: HashSet<RecordId>, _extra: Vec<String>) -> Result<HashMap<RecordId, ClubBookInfo>> {
        let club_books = self.records.club_books(&id_vec(ids)).await?;
        let books = self
            .books
            .resolve_ids(club_books.iter().map(|cb| cb.book_id))
            .await?;

        Ok(club_books
            .into_iter()
            .map(|cb| {
                let info = ClubBookInfo {
                    id: cb.id,
                    club_id: cb.club_id,
                    book: books.get(&cb.book_id).cloned(),
                    code: cb.code,
                    init_count: cb.init_count,
                    current_count: cb.current_count,
                };
                (info.id, info)
            })
            .collect())
    }
}

struct MemberInfoLoader {
    records: Arc<dyn RecordStore>,
}

#[async_trait]
impl BatchLoader<RecordId, MemberInfo> for MemberInfoLoader {
    async fn load(&self, ids: HashSet<RecordId>, _extra: Vec<String>) -> Result<HashMap<RecordId, MemberInfo>> {
        let members = self.records.members(&id_vec(ids)).await?;
        Ok(members
            .into_iter()
            .map(|m| {
                (
                    m.id,
                    MemberInfo {
                        id: m.id,
                        full_name: m.full_name,
                        email: m.email,
                    },
                )
            })
            .collect())
    }
}

struct BookCopyInfoLoader {
    records: Arc<dyn RecordStore>,
    books: Arc<BookResolver>,
}

#[async_trait]
impl BatchLoader<RecordId, BookCopyInfo> for BookCopyInfoLoader {
    async fn load(&self, ids: HashSet<RecordId>, _extra: Vec<String>) -> Result<HashMap<RecordId, BookCopyInfo>> {
        let copies = self.records.book_copies(&id_vec(ids)).await?;
        let books = self.books.resolve_ids(copies.iter().map(|c| c.book_id)).await?;

        Ok(copies
            .into_iter()
            .map(|copy| {
                let info = BookCopyInfo {
                    id: copy.id,
                    owner_id: copy.owner_id,
                    status: copy.status,
                    book: books.get(&copy.book_id).cloned(),
                };
                (info.id, info)
            })
            .collect())
    }
}

struct MemberBookCopyInfoLoader {
    records: Arc<dyn RecordStore>,
    books: Arc<BookResolver>,
}

#[async_trait]
impl BatchLoader<RecordId, MemberBookCopyInfo> for MemberBookCopyInfoLoader {
    async fn load(
        &self,
        ids: HashSet<RecordId>,
        _extra: Vec<String>,
    ) -> Result<HashMap<RecordId, MemberBookCopyInfo>> {
        let pledges = self.records.member_book_copies(&id_vec(ids)).await?;
        let copy_ids: Vec<RecordId> = pledges.iter().map(|p| p.book_copy_id).collect();
        let copies: HashMap<RecordId, _> = self
            .records
            .book_copies(&copy_ids)
            .await?
            .into_iter()
            .map(|c| (c.id, c))
            .collect();
        let books = self
            .books
            .resolve_ids(copies.values().map(|c| c.book_id))
            .await?;

        Ok(pledges
            .into_iter()
            .map(|p| {
                let copy = copies.get(&p.book_copy_id);
                let info = MemberBookCopyInfo {
                    id: p.id,
                    book_copy_id: p.book_copy_id,
                    membership_id: p.membership_id,
                    onboard_date: p.onboard_date,
                    current_reader: p.current_reader,
                    is_enabled: p.is_enabled,
                    status: copy.map(|c| c.status),
                    book: copy.and_then(|c| books.get(&c.book_id).cloned()),
                };
                (info.id, info)
            })
            .collect())
    }
}

struct OrderInfoLoader {
    records: Arc<dyn RecordStore>,
    books: Arc<BookResolver>,
    memberships: Arc<SingleValueCacheAside<MembershipDict>>,
}

#[async_trait]
impl BatchLoader<RecordId, OrderInfo> for OrderInfoLoader {
    async fn load(&self, ids: HashSet<RecordId>, _extra: Vec<String>) -> Result<HashMap<RecordId, OrderInfo>> {
        let orders = self.records.orders(&id_vec(ids)).await?;
        if orders.is_empty() {
            return Ok(HashMap::new());
        }

        let order_ids: Vec<RecordId> = orders.iter().map(|o| o.id).collect();
        let details = self.records.order_details_of(&order_ids).await?;

        let pledge_ids: Vec<RecordId> = details.iter().map(|d| d.member_book_copy_id).collect();
        let pledges = self.records.member_book_copies(&pledge_ids).await?;
        let copy_ids: Vec<RecordId> = pledges.iter().map(|p| p.book_copy_id).collect();
        let copies = self.records.book_copies(&copy_ids).await?;

        let copy_book: HashMap<RecordId, RecordId> = copies.iter().map(|c| (c.id, c.book_id)).collect();
        let pledge_book: HashMap<RecordId, RecordId> = pledges
            .iter()
            .filter_map(|p| copy_book.get(&p.book_copy_id).map(|book| (p.id, *book)))
            .collect();

        let books = self.books.resolve_ids(pledge_book.values().copied()).await?;
        let memberships = self.memberships.get().await?;

        let mut lines: HashMap<RecordId, Vec<OrderDetailInfo>> = HashMap::new();
        for detail in details {
            let book = pledge_book
                .get(&detail.member_book_copy_id)
                .and_then(|book_id| books.get(book_id).cloned());
            lines.entry(detail.order_id).or_default().push(OrderDetailInfo {
                id: detail.id,
                member_book_copy_id: detail.member_book_copy_id,
                book,
                due_date: detail.due_date,
                return_date: detail.return_date,
                overdue_day_count: detail.overdue_day_count,
            });
        }

        Ok(orders
            .into_iter()
            .map(|order| {
                let info = OrderInfo {
                    id: order.id,
                    membership: memberships.get(&order.membership_id).cloned(),
                    membership_id: order.membership_id,
                    order_status: order.order_status,
                    order_date: order.order_date,
                    confirm_date: order.confirm_date,
                    details: lines.remove(&order.id).unwrap_or_default(),
                };
                (info.id, info)
            })
            .collect())
    }
}

struct DFreeOrderInfoLoader {
    records: Arc<dyn RecordStore>,
    books: Arc<BookResolver>,
}

#[async_trait]
impl BatchLoader<RecordId, DFreeOrderInfo> for DFreeOrderInfoLoader {
    async fn load(&self, ids: HashSet<RecordId>, _extra: Vec<String>) -> Result<HashMap<RecordId, DFreeOrderInfo>> {
        let orders = self.records.dfree_orders(&id_vec(ids)).await?;
        if orders.is_empty() {
            return Ok(HashMap::new());
        }

        let order_ids: Vec<RecordId> = orders.iter().map(|o| o.id).collect();
        let details = self.records.dfree_order_details_of(&order_ids).await?;

        let member_ids: Vec<RecordId> = orders.iter().map(|o| o.member_id).collect();
        let members: HashMap<RecordId, DFreeMemberInfo> = self
            .records
            .dfree_members(&member_ids)
            .await?
            .into_iter()
            .map(|m| {
                (
                    m.id,
                    DFreeMemberInfo {
                        id: m.id,
                        full_name: m.full_name,
                        code: m.code,
                        phone_number: m.phone_number,
                    },
                )
            })
            .collect();

        let club_book_ids: Vec<RecordId> = details.iter().map(|d| d.club_book_id).collect();
        let club_books: HashMap<RecordId, _> = self
            .records
            .club_books(&club_book_ids)
            .await?
            .into_iter()
            .map(|cb| (cb.id, cb))
            .collect();
        let books = self
            .books
            .resolve_ids(club_books.values().map(|cb| cb.book_id))
            .await?;

        let mut lines: HashMap<RecordId, Vec<DFreeOrderDetailInfo>> = HashMap::new();
        for detail in details {
            let club_book = club_books.get(&detail.club_book_id);
            lines.entry(detail.order_id).or_default().push(DFreeOrderDetailInfo {
                id: detail.id,
                club_book_id: detail.club_book_id,
                code: club_book.and_then(|cb| cb.code.clone()),
                book: club_book.and_then(|cb| books.get(&cb.book_id).cloned()),
                status: detail.status,
                return_date: detail.return_date,
                overdue_day_count: detail.overdue_day_count,
            });
        }

        Ok(orders
            .into_iter()
            .map(|order| {
                let details = lines.remove(&order.id).unwrap_or_default();
                let info = DFreeOrderInfo {
                    id: order.id,
                    club_id: order.club_id,
                    member: members.get(&order.member_id).cloned(),
                    order_date: order.order_date,
                    due_date: order.due_date,
                    order_status: DFreeStatus::aggregate(details.iter().map(|d| d.status)),
                    details,
                };
                (info.id, info)
            })
            .collect())
    }
}

/// Every cached lending projection, each living for the configured
/// `default_ttl`
pub struct Projections {
    pub authors: Arc<SingleValueCacheAside<AuthorDict>>,
    pub categories: Arc<SingleValueCacheAside<CategoryDict>>,
    pub publishers: Arc<SingleValueCacheAside<PublisherDict>>,
    pub clubs: Arc<SingleValueCacheAside<ClubDict>>,
    pub memberships: Arc<SingleValueCacheAside<MembershipDict>>,
    pub books: Arc<BookResolver>,
    pub club_books: BatchKeyedCacheAside<RecordId, ClubBookInfo>,
    pub members: Arc<MemberResolver>,
    pub book_copies: BatchKeyedCacheAside<RecordId, BookCopyInfo>,
    pub member_book_copies: BatchKeyedCacheAside<RecordId, MemberBookCopyInfo>,
    pub orders: BatchKeyedCacheAside<RecordId, OrderInfo>,
    pub dfree_orders: BatchKeyedCacheAside<RecordId, DFreeOrderInfo>,
}

impl Projections {
    pub fn new(records: Arc<dyn RecordStore>, cache: Arc<dyn KeyedCacheStore>, config: &CacheConfig) -> Self {
        let ttl = config.default_ttl;
        let authors = {
            let records = records.clone();
            Arc::new(SingleValueCacheAside::wrap(
                cache.clone(),
                AUTHOR_INFOS_DICT.with_ttl(ttl),
                single_loader(move |_args| {
                    let records = records.clone();
                    async move {
                        Ok(records
                            .authors()
                            .await?
                            .into_iter()
                            .map(|a| (a.id, AuthorInfo { id: a.id, name: a.name }))
                            .collect::<AuthorDict>())
                    }
                }),
            ))
        };

        let categories = {
            let records = records.clone();
            Arc::new(SingleValueCacheAside::wrap(
                cache.clone(),
                CATEGORY_INFOS_DICT.with_ttl(ttl),
                single_loader(move |_args| {
                    let records = records.clone();
                    async move {
                        Ok(records
                            .categories()
                            .await?
                            .into_iter()
                            .map(|c| (c.id, CategoryInfo { id: c.id, name: c.name }))
                            .collect::<CategoryDict>())
                    }
                }),
            ))
        };

        let publishers = {
            let records = records.clone();
            Arc::new(SingleValueCacheAside::wrap(
                cache.clone(),
                PUBLISHER_INFOS_DICT.with_ttl(ttl),
                single_loader(move |_args| {
                    let records = records.clone();
                    async move {
                        Ok(records
                            .publishers()
                            .await?
                            .into_iter()
                            .map(|p| (p.id, PublisherInfo { id: p.id, name: p.name }))
                            .collect::<PublisherDict>())
                    }
                }),
            ))
        };

        let clubs = {
            let records = records.clone();
            Arc::new(SingleValueCacheAside::wrap(
                cache.clone(),
                CLUB_INFOS_DICT.with_ttl(ttl),
                single_loader(move |_args| {
                    let records = records.clone();
                    async move {
                        Ok(records
                            .clubs()
                            .await?
                            .into_iter()
                            .map(|c| {
                                (
                                    c.id,
                                    ClubInfo {
                                        id: c.id,
                                        name: c.name,
                                        code: c.code,
                                    },
                                )
                            })
                            .collect::<ClubDict>())
                    }
                }),
            ))
        };

        let members = Arc::new(BatchKeyedCacheAside::wrap(
            cache.clone(),
            MEMBER_INFOS.with_ttl(ttl),
            config,
            MemberInfoLoader {
                records: records.clone(),
            },
        ));

        let memberships = {
            let records = records.clone();
            let members = members.clone();
            Arc::new(SingleValueCacheAside::wrap(
                cache.clone(),
                MEMBERSHIP_INFOS_DICT.with_ttl(ttl),
                single_loader(move |_args| {
                    let records = records.clone();
                    let members = members.clone();
                    async move {
                        let memberships = records.active_memberships().await?;
                        let infos = members
                            .resolve_ids(memberships.iter().map(|m| m.member_id))
                            .await?;
                        Ok(memberships
                            .into_iter()
                            .map(|m| {
                                (
                                    m.id,
                                    MembershipInfo {
                                        id: m.id,
                                        club_id: m.club_id,
                                        is_staff: m.is_staff,
                                        member: infos.get(&m.member_id).cloned(),
                                    },
                                )
                            })
                            .collect::<MembershipDict>())
                    }
                }),
            ))
        };

        let books = Arc::new(BatchKeyedCacheAside::wrap(
            cache.clone(),
            BOOK_INFOS.with_ttl(ttl),
            config,
            BookInfoLoader {
                records: records.clone(),
                authors: authors.clone(),
                categories: categories.clone(),
                publishers: publishers.clone(),
            },
        ));

        let club_books = BatchKeyedCacheAside::wrap(
            cache.clone(),
            CLUB_BOOK_INFOS.with_ttl(ttl),
            config,
            ClubBookInfoLoader {
                records: records.clone(),
                books: books.clone(),
            },
        );

        let book_copies = BatchKeyedCacheAside::wrap(
            cache.clone(),
            BOOK_COPY_INFOS.with_ttl(ttl),
            config,
            BookCopyInfoLoader {
                records: records.clone(),
                books: books.clone(),
            },
        );

        let member_book_copies = BatchKeyedCacheAside::wrap(
            cache.clone(),
            MEMBER_BOOK_COPY_INFOS.with_ttl(ttl),
            config,
            MemberBookCopyInfoLoader {
                records: records.clone(),
                books: books.clone(),
            },
        );

        let orders = BatchKeyedCacheAside::wrap(
            cache.clone(),
            ORDER_INFOS.with_ttl(ttl),
            config,
            OrderInfoLoader {
                records: records.clone(),
                books: books.clone(),
                memberships: memberships.clone(),
            },
        );

        let dfree_orders = BatchKeyedCacheAside::wrap(
            cache,
            DFREE_ORDER_INFOS.with_ttl(ttl),
            config,
            DFreeOrderInfoLoader {
                records,
                books: books.clone(),
            },
        );

        Self {
            authors,
            categories,
            publishers,
            clubs,
            memberships,
            books,
            club_books,
            members,
            book_copies,
            member_book_copies,
            orders,
            dfree_orders,
        }
    }
}
