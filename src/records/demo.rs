//! A small seeded club used by the binary and the integration tests
//!
//! One club with an owner, a staff member and a reader. The owner has pledged
//! two copies that are not yet deposited and owns a third that is unpledged.
//! The club's free shelf holds two copies of one title and has one walk-in
//! borrower.

use crate::records::model::*;
use crate::records::store::ChangeSet;

pub const CLUB: RecordId = 1;

pub const OWNER_MEMBER: RecordId = 1;
pub const STAFF_MEMBER: RecordId = 2;
pub const READER_MEMBER: RecordId = 3;

pub const OWNER: RecordId = 1;
pub const STAFF: RecordId = 2;
pub const READER: RecordId = 3;

pub const EARTHSEA: RecordId = 1;
pub const DISPOSSESSED: RecordId = 2;
pub const LEFT_HAND: RecordId = 3;

pub const EARTHSEA_COPY: RecordId = 1;
pub const DISPOSSESSED_COPY: RecordId = 2;
pub const LEFT_HAND_COPY: RecordId = 3;

pub const EARTHSEA_PLEDGE: RecordId = 1;
pub const DISPOSSESSED_PLEDGE: RecordId = 2;

pub const SHELF_LEFT_HAND: RecordId = 1;
pub const WALK_IN: RecordId = 1;

pub fn demo_club() -> ChangeSet {
    let mut changes = ChangeSet::new()
        .with(Author {
            id: 1,
            name: "Ursula K. Le Guin".to_string(),
        })
        .with(Category {
            id: 1,
            name: "Fiction".to_string(),
        })
        .with(Publisher {
            id: 1,
            name: "Ace Books".to_string(),
        })
        .with(BookClub {
            id: CLUB,
            name: "Riverside Readers".to_string(),
            code: Some("RR".to_string()),
        });

    for (id, name, publisher_id) in [
        (EARTHSEA, "A Wizard of Earthsea", Some(1)),
        (DISPOSSESSED, "The Dispossessed", None),
        (LEFT_HAND, "The Left Hand of Darkness", Some(1)),
    ] {
        changes.push(Book {
            id,
            name: name.to_string(),
            author_id: 1,
            category_id: 1,
            publisher_id,
            description: None,
            image: None,
        });
    }

    for (member_id, membership_id, name, is_staff) in [
        (OWNER_MEMBER, OWNER, "Ana Ortega", false),
        (STAFF_MEMBER, STAFF, "Ben Okafor", true),
        (READER_MEMBER, READER, "Cleo Varga", false),
    ] {
        changes.push(Member {
            id: member_id,
            full_name: name.to_string(),
            email: None,
        });
        changes.push(Membership {
            id: membership_id,
            member_id,
            club_id: CLUB,
            is_staff,
            left_at: None,
        });
    }

    for (id, book_id) in [
        (EARTHSEA_COPY, EARTHSEA),
        (DISPOSSESSED_COPY, DISPOSSESSED),
        (LEFT_HAND_COPY, LEFT_HAND),
    ] {
        changes.push(BookCopy {
            id,
            book_id,
            owner_id: OWNER_MEMBER,
            status: BookCopyStatus::New,
        });
    }

    for (id, book_copy_id) in [
        (EARTHSEA_PLEDGE, EARTHSEA_COPY),
        (DISPOSSESSED_PLEDGE, DISPOSSESSED_COPY),
    ] {
        changes.push(MemberBookCopy {
            id,
            book_copy_id,
            membership_id: OWNER,
            onboard_date: None,
            current_reader: None,
            is_enabled: true,
        });
    }

    changes.push(ClubBook {
        id: SHELF_LEFT_HAND,
        book_id: LEFT_HAND,
        club_id: CLUB,
        code: Some("RR-001".to_string()),
        init_count: 2,
        current_count: 2,
    });
    changes.push(DFreeMember {
        id: WALK_IN,
        full_name: "Dara Quinn".to_string(),
        code: "W-01".to_string(),
        phone_number: None,
        club_id: CLUB,
    });

    changes
}
