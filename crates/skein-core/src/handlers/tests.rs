use chrono::Utc;

use skein_shared::block::{
    AnnounceBody, BlockBody, BodyCipher, CommentBody, Contact, FilesBody, JoinBody, MessageBody,
    TargetBody,
};
use skein_shared::crypto::generate_symmetric_key;
use skein_shared::{BlockEnvelope, BlockId, Identity, Sharing, ThreadType, UserId};
use skein_store::blocks::BlockQuery;
use skein_store::{Database, PeerState, ThreadRecord, ThreadState};

use super::*;

struct Fixture {
    db: Database,
    thread: ThreadRecord,
    owner: Identity,
}

fn fixture(thread_type: ThreadType, sharing: Sharing, extra_members: &[UserId]) -> Fixture {
    let db = Database::open_in_memory().unwrap();
    let owner = Identity::generate();
    let sk = Identity::generate();
    let members = if extra_members.is_empty() {
        vec![]
    } else {
        let mut m = vec![owner.user_id()];
        m.extend_from_slice(extra_members);
        m
    };
    let thread = ThreadRecord {
        id: sk.thread_id(),
        key: "t".into(),
        sk: *sk.secret_bytes(),
        content_key: generate_symmetric_key(),
        name: "Thread".into(),
        schema: None,
        initiator: owner.user_id(),
        thread_type,
        sharing,
        members,
        state: ThreadState::Loaded,
        heads: vec![],
    };
    db.insert_thread(&thread).unwrap();
    Fixture { db, thread, owner }
}

fn contact(id: &Identity) -> Contact {
    Contact {
        id: id.user_id(),
        name: "peer".into(),
        avatar: None,
        updated: Utc::now(),
    }
}

impl Fixture {
    fn envelope(&self, author: &Identity, body: &BlockBody) -> (BlockEnvelope, BlockId) {
        let env = BlockEnvelope::create(
            author,
            self.thread.id,
            vec![],
            body,
            BodyCipher::Thread(&self.thread.content_key),
        )
        .unwrap();
        let id = env.id().unwrap();
        (env, id)
    }

    /// Apply `body` by `author` as seen from the owner's node.
    fn apply(&self, author: &Identity, body: BlockBody) -> Result<(BlockId, Vec<Effect>), CoreError> {
        let (env, id) = self.envelope(author, &body);
        let ctx = BlockContext {
            id,
            envelope: &env,
            body: Some(&body),
            thread: &self.thread,
            local: self.owner.user_id(),
        };
        self.db.atomically(|db| apply(&ctx, db)).map(|e| (id, e))
    }

    fn message(&self, author: &Identity) -> BlockId {
        self.apply(author, BlockBody::Message(MessageBody { body: "hi".into() }))
            .unwrap()
            .0
    }

    fn block_count(&self) -> u64 {
        self.db.count_blocks(&BlockQuery::default()).unwrap()
    }
}

#[test]
fn join_welcomes_member_and_notifies() {
    let peer = Identity::generate();
    let f = fixture(ThreadType::Open, Sharing::InviteOnly, &[peer.user_id()]);

    let (id, _) = f
        .apply(
            &peer,
            BlockBody::Join(JoinBody {
                contact: contact(&peer),
                inviter: Some(f.owner.user_id()),
            }),
        )
        .unwrap();

    let record = f.db.get_thread_peer(&f.thread.id, &peer.user_id()).unwrap().unwrap();
    assert_eq!(record.state, PeerState::Welcomed);
    assert_eq!(record.last_head, Some(id));
    assert!(f.db.get_contact(&peer.user_id()).unwrap().is_some());

    let notes = f.db.list_notifications(10).unwrap();
    assert_eq!(notes.len(), 1);
    assert_eq!(notes[0].kind, NotificationType::PeerJoined);
    assert_eq!(notes[0].block_id, Some(id));
}

#[test]
fn join_by_outsider_is_rejected_without_trace() {
    let member = Identity::generate();
    let outsider = Identity::generate();
    let f = fixture(ThreadType::Open, Sharing::InviteOnly, &[member.user_id()]);

    let err = f
        .apply(
            &outsider,
            BlockBody::Join(JoinBody {
                contact: contact(&outsider),
                inviter: None,
            }),
        )
        .unwrap_err();

    assert!(matches!(err, CoreError::NotReadable));
    assert_eq!(f.block_count(), 0);
    assert!(f.db.list_notifications(10).unwrap().is_empty());
}

#[test]
fn join_invited_by_initiator_widens_members() {
    let member = Identity::generate();
    let newcomer = Identity::generate();
    let mut f = fixture(ThreadType::Open, Sharing::InviteOnly, &[member.user_id()]);
    // seen from an existing member whose list predates the invite
    f.owner = member.clone();
    let initiator = f.thread.initiator;

    f.apply(
        &newcomer,
        BlockBody::Join(JoinBody {
            contact: contact(&newcomer),
            inviter: Some(initiator),
        }),
    )
    .unwrap();

    let stored = f.db.get_thread(&f.thread.id).unwrap();
    assert_eq!(stored.members.len(), 3);
    assert!(stored.policy().readable(&newcomer.user_id()));
    let peer = f.db.get_thread_peer(&f.thread.id, &newcomer.user_id()).unwrap().unwrap();
    assert_eq!(peer.state, PeerState::Welcomed);
}

#[test]
fn join_invited_by_plain_member_is_rejected() {
    let member = Identity::generate();
    let newcomer = Identity::generate();
    let f = fixture(ThreadType::Open, Sharing::InviteOnly, &[member.user_id()]);

    let err = f
        .apply(
            &newcomer,
            BlockBody::Join(JoinBody {
                contact: contact(&newcomer),
                inviter: Some(member.user_id()),
            }),
        )
        .unwrap_err();
    assert!(matches!(err, CoreError::NotReadable));
    assert_eq!(f.db.get_thread(&f.thread.id).unwrap().members.len(), 2);

    // private threads never take outsiders, whoever invited them
    let p = fixture(ThreadType::Private, Sharing::NotShared, &[member.user_id()]);
    let err = p
        .apply(
            &newcomer,
            BlockBody::Join(JoinBody {
                contact: contact(&newcomer),
                inviter: Some(p.thread.initiator),
            }),
        )
        .unwrap_err();
    assert!(matches!(err, CoreError::NotReadable));
}

#[test]
fn own_join_creates_no_peer() {
    let f = fixture(ThreadType::Private, Sharing::NotShared, &[]);
    let owner = f.owner.clone();
    f.apply(
        &owner,
        BlockBody::Join(JoinBody {
            contact: contact(&owner),
            inviter: None,
        }),
    )
    .unwrap();

    assert!(f.db.list_thread_peers(&f.thread.id).unwrap().is_empty());
    assert!(f.db.list_notifications(10).unwrap().is_empty());
    assert_eq!(f.block_count(), 1);
}

#[test]
fn announce_must_describe_its_author() {
    let peer = Identity::generate();
    let f = fixture(ThreadType::Open, Sharing::Shared, &[]);

    let err = f
        .apply(
            &peer,
            BlockBody::Announce(AnnounceBody {
                contact: contact(&Identity::generate()),
            }),
        )
        .unwrap_err();
    assert!(matches!(err, CoreError::InvalidThreadBlock(_)));

    f.apply(&peer, BlockBody::Announce(AnnounceBody { contact: contact(&peer) }))
        .unwrap();
    assert_eq!(f.db.get_contact(&peer.user_id()).unwrap().unwrap().name, "peer");
}

#[test]
fn read_only_thread_rejects_other_writers() {
    let peer = Identity::generate();
    let f = fixture(ThreadType::ReadOnly, Sharing::Shared, &[]);

    let err = f
        .apply(&peer, BlockBody::Message(MessageBody { body: "x".into() }))
        .unwrap_err();
    assert!(matches!(err, CoreError::NotWritable));

    let owner = f.owner.clone();
    f.message(&owner);
    assert_eq!(f.block_count(), 1);
}

#[test]
fn files_pin_their_content() {
    let f = fixture(ThreadType::Open, Sharing::Shared, &[]);
    let owner = f.owner.clone();

    let (_, effects) = f
        .apply(
            &owner,
            BlockBody::Files(FilesBody {
                target: "c0ffee".into(),
                caption: "trip".into(),
            }),
        )
        .unwrap();
    assert_eq!(effects, vec![Effect::Pin("c0ffee".into())]);
}

#[test]
fn comment_needs_existing_target() {
    let peer = Identity::generate();
    let f = fixture(ThreadType::Open, Sharing::Shared, &[]);

    let err = f
        .apply(
            &peer,
            BlockBody::Comment(CommentBody {
                target: BlockId([9u8; 32]),
                body: "nice".into(),
            }),
        )
        .unwrap_err();
    assert!(matches!(err, CoreError::BlockNotFound));

    let owner = f.owner.clone();
    let target = f.message(&owner);
    f.apply(
        &peer,
        BlockBody::Comment(CommentBody {
            target,
            body: "nice".into(),
        }),
    )
    .unwrap();
    let comment = f.db.list_blocks(&BlockQuery {
        types: vec![BlockType::Comment],
        limit: 1,
        ..Default::default()
    });
    assert_eq!(comment.unwrap()[0].target, Some(target.to_hex()));
}

#[test]
fn public_thread_is_annotatable_but_not_writable() {
    let peer = Identity::generate();
    let f = fixture(ThreadType::Public, Sharing::Shared, &[]);
    let owner = f.owner.clone();
    let target = f.message(&owner);

    assert!(matches!(
        f.apply(&peer, BlockBody::Message(MessageBody { body: "x".into() })),
        Err(CoreError::NotWritable)
    ));
    f.apply(&peer, BlockBody::Like(TargetBody { target })).unwrap();
}

#[test]
fn flag_rules() {
    let f = fixture(ThreadType::Open, Sharing::Shared, &[]);
    let owner = f.owner.clone();

    let missing = f.apply(&owner, BlockBody::Flag(TargetBody { target: BlockId([1u8; 32]) }));
    assert!(matches!(missing, Err(CoreError::BlockNotFound)));
    assert_eq!(f.block_count(), 0);

    let target = f.message(&owner);
    let (flag, _) = f.apply(&owner, BlockBody::Flag(TargetBody { target })).unwrap();
    assert_eq!(
        f.db.get_block(&flag).unwrap().target,
        Some(format!("flag-{target}"))
    );

    let chained = f.apply(&owner, BlockBody::Ignore(TargetBody { target: flag }));
    assert!(matches!(chained, Err(CoreError::InvalidTarget(_))));
}

#[test]
fn ignore_unpins_files_and_clears_notifications() {
    let peer = Identity::generate();
    let f = fixture(ThreadType::Open, Sharing::Shared, &[]);
    let (files, _) = f
        .apply(
            &peer,
            BlockBody::Files(FilesBody {
                target: "beef".into(),
                caption: String::new(),
            }),
        )
        .unwrap();
    assert_eq!(f.db.count_unread_notifications().unwrap(), 1);

    let owner = f.owner.clone();
    let (_, effects) = f
        .apply(&owner, BlockBody::Ignore(TargetBody { target: files }))
        .unwrap();
    assert_eq!(effects, vec![Effect::Unpin("beef".into())]);
    assert_eq!(f.db.count_unread_notifications().unwrap(), 0);
}

#[test]
fn body_must_match_envelope_type() {
    let f = fixture(ThreadType::Open, Sharing::Shared, &[]);
    let (env, id) = f.envelope(&f.owner, &BlockBody::Leave);
    let mut env = env;
    env.block_type = BlockType::Merge;

    // a merge claiming to carry a body
    let ctx = BlockContext {
        id,
        envelope: &env,
        body: Some(&BlockBody::Leave),
        thread: &f.thread,
        local: f.owner.user_id(),
    };
    assert!(f.db.atomically(|db| apply(&ctx, db)).is_err());
}

#[test]
fn merge_requires_readable_parent_authors() {
    let member = Identity::generate();
    let f = fixture(ThreadType::Open, Sharing::InviteOnly, &[member.user_id()]);
    let owner = f.owner.clone();
    let a = f.message(&owner);
    let b = f.message(&member);

    let merge = BlockEnvelope::merge(f.thread.id, vec![a, b], Utc::now());
    let ctx = BlockContext {
        id: merge.id().unwrap(),
        envelope: &merge,
        body: None,
        thread: &f.thread,
        local: owner.user_id(),
    };
    f.db.atomically(|db| apply(&ctx, db)).unwrap();

    // same parents, but the member has since been dropped from the list
    let mut narrowed = f.thread.clone();
    narrowed.members = vec![owner.user_id(), UserId([3u8; 32])];
    let later = BlockEnvelope::merge(f.thread.id, vec![a, b], Utc::now() + chrono::Duration::seconds(1));
    let ctx = BlockContext {
        id: later.id().unwrap(),
        envelope: &later,
        body: None,
        thread: &narrowed,
        local: owner.user_id(),
    };
    assert!(matches!(
        f.db.atomically(|db| apply(&ctx, db)),
        Err(CoreError::NotReadable)
    ));
}
