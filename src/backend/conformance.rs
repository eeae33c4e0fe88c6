//-
// Copyright (c) 2023, Jason Lingle
//
// This file is part of Pigeonhole.
//
// Pigeonhole is free software: you can  redistribute it and/or modify it under
// the terms of the GNU General Public License as published by the Free Software
// Foundation, either version  3 of the License, or (at  your option) any later
// version.
//
// Pigeonhole is distributed in the hope that it will be useful, but WITHOUT ANY
// WARRANTY; without  even the implied  warranty of MERCHANTABILITY  or FITNESS
// FOR  A PARTICULAR  PURPOSE.  See the  GNU General  Public  License for  more
// details.
//
// You should have received a copy of the GNU General Public License along with
// Pigeonhole. If not, see <http://www.gnu.org/licenses/>.

//! Tests every backend must pass.
//!
//! Each backend's test module invokes `conformance_tests!` with a function
//! returning a fresh factory plus anything that must live as long as it
//! (e.g. a `TempDir`).

use std::collections::HashSet;

use chrono::prelude::*;
use rayon::prelude::*;

use crate::acl::{
    EditMode, MailboxAclCommand, MailboxAclEntryKey, MailboxAclRights,
};
use crate::mapper::*;
use crate::model::*;
use crate::name::query::MailboxQuery;
use crate::name::resolver::ActingUser;
use crate::name::MailboxName;
use crate::support::error::Error;

macro_rules! conformance_tests {
    ($make:expr) => {
        $crate::backend::conformance::conformance_tests!(
            @each $make;
            save_assigns_id,
            owner_kind_is_persisted,
            duplicate_name_is_rejected,
            concurrent_create_has_one_winner,
            uids_are_unique_and_increasing,
            mod_seqs_are_unique_and_increasing,
            append_assigns_uid_and_mod_seq,
            update_flags_bumps_mod_seq_of_changed_only,
            expunge_removes_deleted_messages,
            copy_assigns_new_uid,
            delete_cascades_messages,
            has_children_only_counts_descendants,
            search_revalidates_candidates,
            rename_keeps_identity,
            update_acl_applies_commands,
            subscriptions_are_idempotent,
            list_is_sorted,
            execute_returns_result
        );
    };

    (@each $make:expr; $($test:ident),*) => {$(
        #[test]
        fn $test() {
            $crate::init_test_log();
            let (factory, _guard) = ($make)();
            $crate::backend::conformance::$test(&factory);
        }
    )*};
}

pub(crate) use conformance_tests;

fn session<F: MailboxSessionMapperFactory>(
    factory: &F,
    user: &str,
) -> MailboxSession {
    MailboxSession::new(ActingUser::new(user), factory.backend_name())
}

fn rooted(path: &str) -> MailboxName {
    MailboxName::rooted(path.split('/'))
}

fn date() -> DateTime<Utc> {
    Utc.timestamp_millis_opt(1_600_000_000_250).unwrap()
}

fn create<F: MailboxSessionMapperFactory>(
    factory: &F,
    path: &str,
) -> Mailbox<F::Id> {
    let session = session(factory, "alice");
    let mut mailbox =
        Mailbox::new(rooted(path), MailboxOwner::new("alice", false), 42);
    factory
        .create_mailbox_mapper(&session)
        .unwrap()
        .save(&mut mailbox)
        .unwrap();
    mailbox
}

fn append_n<F: MailboxSessionMapperFactory>(
    factory: &F,
    mailbox: &Mailbox<F::Id>,
    flags: &[Vec<Flag>],
) -> Vec<MessageMetaData> {
    let session = session(factory, "alice");
    let messages = factory.create_message_mapper(&session).unwrap();
    flags
        .iter()
        .enumerate()
        .map(|(ix, flags)| {
            messages
                .append(
                    mailbox,
                    MailboxMessage::new(100 + ix as i64, date(), flags.clone()),
                )
                .unwrap()
        })
        .collect()
}

pub fn save_assigns_id<F: MailboxSessionMapperFactory>(factory: &F) {
    let session = session(factory, "alice");
    let mapper = factory.create_mailbox_mapper(&session).unwrap();

    let mut mailbox = Mailbox::new(
        rooted("users/alice/Entwürfe"),
        MailboxOwner::new("alice", false),
        42,
    );
    assert!(mailbox.id().is_none());
    let id = mapper.save(&mut mailbox).unwrap();
    assert_eq!(Some(&id), mailbox.id());

    let found = mapper.find_mailbox_by_path(mailbox.name()).unwrap();
    assert_eq!(Some(&id), found.id());
    assert_eq!(mailbox.name(), found.name());
    assert_eq!(mailbox.owner(), found.owner());
    assert_eq!(42, found.uid_validity());
    assert_eq!(0, found.last_uid());
    assert_eq!(0, found.highest_mod_seq());
    assert!(found.acl().is_empty());

    let by_id = mapper.find_mailbox_by_id(&id).unwrap();
    assert_eq!(mailbox.name(), by_id.name());

    assert_matches!(
        Err(Error::NxMailbox(_)),
        mapper.find_mailbox_by_path(&rooted("users/alice/nx"))
    );
}

pub fn owner_kind_is_persisted<F: MailboxSessionMapperFactory>(factory: &F) {
    let session = session(factory, "bob@example.org");
    let mapper = factory.create_mailbox_mapper(&session).unwrap();

    for (path, owner) in vec![
        (
            "virtual-users/example.org/bob",
            MailboxOwner::virtual_user("bob@example.org"),
        ),
        ("users/bob@example.org", MailboxOwner::new("bob@example.org", false)),
        ("groups/sales", MailboxOwner::new("sales", true)),
    ] {
        let mut mailbox = Mailbox::new(rooted(path), owner.clone(), 1);
        let id = mapper.save(&mut mailbox).unwrap();
        assert_eq!(&owner, mapper.find_mailbox_by_id(&id).unwrap().owner());
        assert_eq!(
            &owner,
            mapper.find_mailbox_by_path(&rooted(path)).unwrap().owner()
        );
    }
}

pub fn duplicate_name_is_rejected<F: MailboxSessionMapperFactory>(
    factory: &F,
) {
    create(factory, "users/alice/Work");

    let session = session(factory, "alice");
    let mapper = factory.create_mailbox_mapper(&session).unwrap();
    let mut dupe = Mailbox::new(
        rooted("users/alice/Work"),
        MailboxOwner::new("alice", false),
        43,
    );
    match mapper.save(&mut dupe) {
        Err(Error::MailboxExists(name)) => {
            assert_eq!(rooted("users/alice/Work").to_string(), name)
        }
        r => panic!("Unexpected result: {:?}", r.map(|_| ())),
    }
    assert!(dupe.id().is_none());
}

pub fn concurrent_create_has_one_winner<F: MailboxSessionMapperFactory>(
    factory: &F,
) {
    let results = (0..8)
        .into_par_iter()
        .map(|ix| {
            let session = session(factory, "alice");
            let mapper = factory.create_mailbox_mapper(&session).unwrap();
            let mut mailbox = Mailbox::new(
                rooted("users/alice/Contested"),
                MailboxOwner::new("alice", false),
                ix,
            );
            mapper.save(&mut mailbox).map(|_| ())
        })
        .collect::<Vec<_>>();

    assert_eq!(1, results.iter().filter(|r| r.is_ok()).count());
    for result in results {
        match result {
            Ok(()) | Err(Error::MailboxExists(_)) => (),
            Err(e) => panic!("Unexpected error: {}", e),
        }
    }
}

pub fn uids_are_unique_and_increasing<F: MailboxSessionMapperFactory>(
    factory: &F,
) {
    let mailbox = create(factory, "users/alice/Counted");

    let per_thread = (0..4)
        .into_par_iter()
        .map(|_| {
            let session = session(factory, "alice");
            let provider = factory.create_uid_provider(&session).unwrap();
            (0..25)
                .map(|_| provider.next_uid(&mailbox).unwrap())
                .collect::<Vec<_>>()
        })
        .collect::<Vec<_>>();

    for uids in &per_thread {
        assert!(uids.windows(2).all(|w| w[0] < w[1]), "{:?}", uids);
    }

    let all = per_thread.into_iter().flatten().collect::<HashSet<_>>();
    assert_eq!(100, all.len());
    assert_eq!((1..=100).collect::<HashSet<i64>>(), all);

    let session = session(factory, "alice");
    assert_eq!(
        100,
        factory
            .create_uid_provider(&session)
            .unwrap()
            .last_uid(&mailbox)
            .unwrap()
    );
}

pub fn mod_seqs_are_unique_and_increasing<F: MailboxSessionMapperFactory>(
    factory: &F,
) {
    let mailbox = create(factory, "users/alice/Counted");

    let per_thread = (0..4)
        .into_par_iter()
        .map(|_| {
            let session = session(factory, "alice");
            let provider = factory.create_mod_seq_provider(&session).unwrap();
            (0..25)
                .map(|_| provider.next_mod_seq(&mailbox).unwrap())
                .collect::<Vec<_>>()
        })
        .collect::<Vec<_>>();

    for mod_seqs in &per_thread {
        assert!(mod_seqs.windows(2).all(|w| w[0] < w[1]), "{:?}", mod_seqs);
    }

    let all = per_thread.into_iter().flatten().collect::<HashSet<_>>();
    assert_eq!(100, all.len());

    let session = session(factory, "alice");
    assert_eq!(
        100,
        factory
            .create_mod_seq_provider(&session)
            .unwrap()
            .highest_mod_seq(&mailbox)
            .unwrap()
    );
}

pub fn append_assigns_uid_and_mod_seq<F: MailboxSessionMapperFactory>(
    factory: &F,
) {
    let mailbox = create(factory, "users/alice/INBOX");
    let metas = append_n(
        factory,
        &mailbox,
        &[vec![], vec![Flag::Seen], vec![Flag::Keyword("$Junk".to_owned())]],
    );

    assert_eq!(vec![1, 2, 3], metas.iter().map(|m| m.uid).collect::<Vec<_>>());
    assert!(metas.windows(2).all(|w| w[0].mod_seq < w[1].mod_seq));
    assert_eq!(101, metas[1].size);

    let session = session(factory, "alice");
    let messages = factory.create_message_mapper(&session).unwrap();
    assert_eq!(3, messages.count_messages(&mailbox).unwrap());
    assert_eq!(2, messages.count_unseen(&mailbox).unwrap());
    assert_eq!(3, messages.last_uid(&mailbox).unwrap());
    assert_eq!(metas[2].mod_seq, messages.highest_mod_seq(&mailbox).unwrap());

    let found = messages
        .find_in_mailbox(&mailbox, MessageRange::From(2))
        .unwrap();
    assert_eq!(2, found.len());
    assert_eq!(2, found[0].uid);
    assert_eq!(metas[1].mod_seq, found[0].mod_seq);
    assert_eq!(date(), found[0].internal_date);
    assert!(found[0].is_seen());
    assert!(found[1].has_flag(&Flag::Keyword("$junk".to_owned())));

    assert_eq!(
        vec![3],
        messages
            .find_in_mailbox(&mailbox, MessageRange::Range(5, 3))
            .unwrap()
            .iter()
            .map(|m| m.uid)
            .collect::<Vec<_>>()
    );

    let reloaded = factory
        .create_mailbox_mapper(&session)
        .unwrap()
        .find_mailbox_by_path(mailbox.name())
        .unwrap();
    assert_eq!(3, reloaded.last_uid());
    assert_eq!(metas[2].mod_seq, reloaded.highest_mod_seq());
}

pub fn update_flags_bumps_mod_seq_of_changed_only<
    F: MailboxSessionMapperFactory,
>(
    factory: &F,
) {
    let mailbox = create(factory, "users/alice/INBOX");
    let metas = append_n(factory, &mailbox, &[vec![], vec![Flag::Flagged]]);

    let session = session(factory, "alice");
    let messages = factory.create_message_mapper(&session).unwrap();
    let changed = messages
        .update_flags(
            &mailbox,
            MessageRange::All,
            FlagUpdateMode::Add,
            &[Flag::Flagged],
        )
        .unwrap();

    assert_eq!(1, changed.len());
    assert_eq!(1, changed[0].uid);
    assert!(changed[0].mod_seq > metas[1].mod_seq);
    assert_eq!(
        changed[0].mod_seq,
        messages.highest_mod_seq(&mailbox).unwrap()
    );

    let unchanged = messages
        .update_flags(
            &mailbox,
            MessageRange::All,
            FlagUpdateMode::Add,
            &[Flag::Flagged],
        )
        .unwrap();
    assert!(unchanged.is_empty());
    assert_eq!(
        changed[0].mod_seq,
        messages.highest_mod_seq(&mailbox).unwrap()
    );

    let replaced = messages
        .update_flags(
            &mailbox,
            MessageRange::One(2),
            FlagUpdateMode::Replace,
            &[Flag::Seen, Flag::Seen],
        )
        .unwrap();
    assert_eq!(1, replaced.len());
    assert_eq!(vec![Flag::Seen], replaced[0].flags);

    let stored = messages
        .find_in_mailbox(&mailbox, MessageRange::One(2))
        .unwrap();
    assert_eq!(replaced, stored);
}

pub fn expunge_removes_deleted_messages<F: MailboxSessionMapperFactory>(
    factory: &F,
) {
    let mailbox = create(factory, "users/alice/INBOX");
    append_n(
        factory,
        &mailbox,
        &[
            vec![Flag::Deleted],
            vec![],
            vec![Flag::Deleted, Flag::Seen],
            vec![Flag::Deleted],
        ],
    );

    let session = session(factory, "alice");
    let messages = factory.create_message_mapper(&session).unwrap();
    let before = messages.highest_mod_seq(&mailbox).unwrap();

    assert_eq!(
        vec![1, 3],
        messages.expunge(&mailbox, MessageRange::Range(1, 3)).unwrap()
    );
    let after = messages.highest_mod_seq(&mailbox).unwrap();
    assert!(after > before);

    assert!(messages
        .expunge(&mailbox, MessageRange::Range(1, 3))
        .unwrap()
        .is_empty());
    assert_eq!(after, messages.highest_mod_seq(&mailbox).unwrap());

    assert_eq!(
        vec![2, 4],
        messages
            .find_in_mailbox(&mailbox, MessageRange::All)
            .unwrap()
            .iter()
            .map(|m| m.uid)
            .collect::<Vec<_>>()
    );
    // UIDs are never reused
    assert_eq!(4, messages.last_uid(&mailbox).unwrap());
}

pub fn copy_assigns_new_uid<F: MailboxSessionMapperFactory>(factory: &F) {
    let src = create(factory, "users/alice/INBOX");
    let dst = create(factory, "users/alice/Archive");
    append_n(factory, &src, &[vec![], vec![Flag::Answered]]);
    append_n(factory, &dst, &[vec![]]);

    let session = session(factory, "alice");
    let messages = factory.create_message_mapper(&session).unwrap();
    let meta = messages.copy(&src, 2, &dst).unwrap();
    assert_eq!(2, meta.uid);
    assert_eq!(101, meta.size);

    let copied = messages
        .find_in_mailbox(&dst, MessageRange::One(2))
        .unwrap();
    assert_eq!(1, copied.len());
    assert!(copied[0].has_flag(&Flag::Answered));
    assert_eq!(meta.mod_seq, copied[0].mod_seq);

    assert_eq!(2, messages.count_messages(&src).unwrap());
    assert_matches!(Err(Error::NxMessage), messages.copy(&src, 99, &dst));
}

pub fn delete_cascades_messages<F: MailboxSessionMapperFactory>(factory: &F) {
    let mailbox = create(factory, "users/alice/Trash");
    let child = create(factory, "users/alice/Trash/Old");
    append_n(factory, &mailbox, &[vec![], vec![]]);

    let session = session(factory, "alice");
    let mailboxes = factory.create_mailbox_mapper(&session).unwrap();
    let messages = factory.create_message_mapper(&session).unwrap();
    mailboxes.delete(&mailbox).unwrap();

    assert_matches!(
        Err(Error::NxMailbox(_)),
        mailboxes.find_mailbox_by_path(mailbox.name())
    );
    assert_matches!(
        Err(Error::NxMailbox(_)),
        messages.count_messages(&mailbox)
    );
    assert_matches!(Err(Error::NxMailbox(_)), mailboxes.delete(&mailbox));
    // Children are untouched
    assert!(mailboxes.find_mailbox_by_path(child.name()).is_ok());

    let recreated = create(factory, "users/alice/Trash");
    assert_ne!(mailbox.id(), recreated.id());
    assert_eq!(0, messages.count_messages(&recreated).unwrap());
    assert_eq!(0, messages.last_uid(&recreated).unwrap());
}

pub fn has_children_only_counts_descendants<F: MailboxSessionMapperFactory>(
    factory: &F,
) {
    let parent = create(factory, "users/alice/Work");
    let sibling = create(factory, "users/alice/Workshop");
    let leaf = create(factory, "users/alice/Work/Reports/2023");

    let session = session(factory, "alice");
    let mapper = factory.create_mailbox_mapper(&session).unwrap();
    assert!(mapper.has_children(&parent).unwrap());
    assert!(!mapper.has_children(&sibling).unwrap());
    assert!(!mapper.has_children(&leaf).unwrap());

    mapper.delete(&leaf).unwrap();
    assert!(!mapper.has_children(&parent).unwrap());
}

pub fn search_revalidates_candidates<F: MailboxSessionMapperFactory>(
    factory: &F,
) {
    for path in &[
        "users/alice/Work",
        "users/alice/Work/Reports",
        "users/alice/Work/Reports/2023",
        "users/alice/Workshop",
        "users/alice/Play",
        "users/bob/Work",
    ] {
        create(factory, path);
    }

    let session = session(factory, "alice");
    let mapper = factory.create_mailbox_mapper(&session).unwrap();
    let names = |base: &str, expression: &str| {
        mapper
            .search(&MailboxQuery::new(rooted(base), expression, '/'))
            .unwrap()
            .into_iter()
            .map(|mb| mb.name().to_string())
            .collect::<Vec<_>>()
    };
    let expect = |paths: &[&str]| {
        paths.iter().map(|p| rooted(p).to_string()).collect::<Vec<_>>()
    };

    assert_eq!(
        expect(&["users/alice/Play", "users/alice/Work", "users/alice/Workshop"]),
        names("users/alice", "%")
    );
    assert_eq!(
        expect(&[
            "users/alice/Work",
            "users/alice/Work/Reports",
            "users/alice/Work/Reports/2023",
            "users/alice/Workshop",
        ]),
        names("users/alice", "Work*")
    );
    assert_eq!(
        expect(&["users/alice/Work/Reports"]),
        names("users/alice", "Work/%")
    );
    assert_eq!(expect(&["users/alice/Work"]), names("users/alice/Work", ""));
    assert_eq!(
        expect(&["users/alice/Work", "users/bob/Work"]),
        names("users", "%/Work")
    );
    assert!(names("users/carol", "*").is_empty());
}

pub fn rename_keeps_identity<F: MailboxSessionMapperFactory>(factory: &F) {
    let mut mailbox = create(factory, "users/alice/Drafts");
    create(factory, "users/alice/Sent");
    let metas = append_n(factory, &mailbox, &[vec![]]);

    let session = session(factory, "alice");
    let mapper = factory.create_mailbox_mapper(&session).unwrap();
    let messages = factory.create_message_mapper(&session).unwrap();
    let id = mailbox.id().cloned();

    mailbox.set_name(rooted("users/alice/Entwürfe"));
    assert_eq!(id.as_ref(), Some(&mapper.save(&mut mailbox).unwrap()));

    assert_matches!(
        Err(Error::NxMailbox(_)),
        mapper.find_mailbox_by_path(&rooted("users/alice/Drafts"))
    );
    let renamed = mapper.find_mailbox_by_path(mailbox.name()).unwrap();
    assert_eq!(id.as_ref(), renamed.id());
    assert_eq!(42, renamed.uid_validity());
    assert_eq!(metas[0].uid, messages.last_uid(&renamed).unwrap());
    assert_eq!(1, messages.count_messages(&renamed).unwrap());

    mailbox.set_name(rooted("users/alice/Sent"));
    assert_matches!(Err(Error::MailboxExists(_)), mapper.save(&mut mailbox));
    assert!(mapper
        .find_mailbox_by_path(&rooted("users/alice/Entwürfe"))
        .is_ok());
}

pub fn update_acl_applies_commands<F: MailboxSessionMapperFactory>(
    factory: &F,
) {
    let mut mailbox = create(factory, "shared/News");

    let session = session(factory, "alice");
    let mapper = factory.create_mailbox_mapper(&session).unwrap();
    let lr = "lr".parse::<MailboxAclRights>().unwrap();

    let acl = mapper
        .update_acl(
            &mailbox,
            &MailboxAclCommand::new(
                MailboxAclEntryKey::anyone(),
                EditMode::Replace,
                lr,
            ),
        )
        .unwrap();
    assert_eq!(lr, acl.get(&MailboxAclEntryKey::anyone()));

    let acl = mapper
        .update_acl(
            &mailbox,
            &MailboxAclCommand::parse(MailboxAclEntryKey::user("bob"), "+lrsw")
                .unwrap(),
        )
        .unwrap();
    assert_eq!(2, acl.len());

    let acl = mapper
        .update_acl(
            &mailbox,
            &MailboxAclCommand::parse(MailboxAclEntryKey::anyone(), "-lr")
                .unwrap(),
        )
        .unwrap();
    assert_eq!(1, acl.len());

    let found = mapper.find_mailbox_by_path(mailbox.name()).unwrap();
    assert_eq!(&acl, found.acl());

    // save() persists an ACL set on the mailbox itself
    mailbox.set_acl(
        acl.with(MailboxAclEntryKey::group("staff").negate(), lr),
    );
    mapper.save(&mut mailbox).unwrap();
    let found = mapper.find_mailbox_by_path(mailbox.name()).unwrap();
    assert_eq!(mailbox.acl(), found.acl());
}

pub fn subscriptions_are_idempotent<F: MailboxSessionMapperFactory>(
    factory: &F,
) {
    let session = session(factory, "alice");
    let mapper = factory.create_subscription_mapper(&session).unwrap();
    let work = Subscription::new("alice", rooted("users/alice/Work"));
    let news = Subscription::new("alice", rooted("shared/News"));

    mapper.save(&work).unwrap();
    mapper.save(&work).unwrap();
    mapper.save(&news).unwrap();
    // Subscriptions need not refer to existing mailboxes, and are per user
    mapper
        .save(&Subscription::new("bob", rooted("users/bob/Work")))
        .unwrap();

    assert_eq!(
        vec![news.clone(), work.clone()],
        mapper.find_subscriptions_for_user("alice").unwrap()
    );
    assert_eq!(
        work,
        mapper
            .find_mailbox_subscription_for_user("alice", &work.mailbox)
            .unwrap()
    );

    mapper.delete(&work).unwrap();
    mapper.delete(&work).unwrap();
    assert_matches!(
        Err(Error::NxSubscription),
        mapper.find_mailbox_subscription_for_user("alice", &work.mailbox)
    );
    assert_eq!(
        vec![news],
        mapper.find_subscriptions_for_user("alice").unwrap()
    );
    assert!(mapper.find_subscriptions_for_user("carol").unwrap().is_empty());
}

pub fn list_is_sorted<F: MailboxSessionMapperFactory>(factory: &F) {
    for path in &["users/bob", "groups/sales", "users/alice", "users/alice/A"]
    {
        create(factory, path);
    }

    let session = session(factory, "alice");
    let names = factory
        .create_mailbox_mapper(&session)
        .unwrap()
        .list()
        .unwrap()
        .into_iter()
        .map(|mb| mb.name().clone())
        .collect::<Vec<_>>();
    assert_eq!(
        vec![
            rooted("groups/sales"),
            rooted("users/alice"),
            rooted("users/alice/A"),
            rooted("users/bob"),
        ],
        names
    );
}

pub fn execute_returns_result<F: MailboxSessionMapperFactory>(factory: &F) {
    let session = session(factory, "alice");
    let mapper = factory.create_mailbox_mapper(&session).unwrap();

    let id = mapper
        .execute(|m| {
            let mut mailbox = Mailbox::new(
                rooted("users/alice/Inside"),
                MailboxOwner::new("alice", false),
                7,
            );
            m.save(&mut mailbox)
        })
        .unwrap();
    assert_eq!(
        Some(&id),
        mapper
            .find_mailbox_by_path(&rooted("users/alice/Inside"))
            .unwrap()
            .id()
    );

    let result = mapper.execute(|m| {
        m.find_mailbox_by_path(&rooted("users/alice/nx"))
            .map(|_| ())
    });
    assert_matches!(Err(Error::NxMailbox(_)), result);
    mapper.end_request();
}
