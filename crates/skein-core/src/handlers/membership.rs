use tracing::info;

use skein_shared::block::{AnnounceBody, Contact, JoinBody};
use skein_shared::{SharingPolicy, UserId};
use skein_store::{Database, NotificationType, PeerState, ThreadPeer};

use super::{BlockContext, Handled};
use crate::error::CoreError;

pub(super) fn join(ctx: &BlockContext<'_>, join: &JoinBody, db: &Database) -> Result<Handled, CoreError> {
    let author = ctx.author()?;
    let policy = ctx.policy();
    let admitted = if policy.readable(&author) {
        None
    } else {
        Some(admitted_by_initiator(&policy, &author, join).ok_or(CoreError::NotReadable)?)
    };
    check_contact(&join.contact, ctx)?;

    if let Some(widened) = admitted {
        db.update_thread_members(&ctx.thread.id, &widened.members)?;
        info!(
            thread = %ctx.thread.id,
            member = %author.short(),
            members = widened.members.len(),
            "member list widened by join"
        );
    }

    if ctx.is_local() {
        return Ok(Handled::default());
    }

    db.upsert_thread_peer(&ThreadPeer {
        id: author,
        thread_id: ctx.thread.id,
        state: PeerState::Welcomed,
        last_head: Some(ctx.id),
    })?;
    db.upsert_contact(&join.contact)?;

    Ok(Handled::notify(NotificationType::PeerJoined, "joined"))
}

pub(super) fn leave(ctx: &BlockContext<'_>, db: &Database) -> Result<Handled, CoreError> {
    let author = ctx.author()?;
    if ctx.is_local() {
        return Ok(Handled::default());
    }

    db.upsert_thread_peer(&ThreadPeer {
        id: author,
        thread_id: ctx.thread.id,
        state: PeerState::Left,
        last_head: Some(ctx.id),
    })?;

    Ok(Handled::notify(NotificationType::PeerLeft, "left"))
}

pub(super) fn announce(
    ctx: &BlockContext<'_>,
    announce: &AnnounceBody,
    db: &Database,
) -> Result<Handled, CoreError> {
    let author = ctx.author()?;
    if !ctx.policy().readable(&author) {
        return Err(CoreError::NotReadable);
    }
    check_contact(&announce.contact, ctx)?;

    if !ctx.is_local() {
        db.upsert_contact(&announce.contact)?;
    }
    Ok(Handled::default())
}

/// Only the initiator may invite outside the member list. A join naming
/// the initiator as its inviter carries that widening to everyone else.
fn admitted_by_initiator(policy: &SharingPolicy, author: &UserId, join: &JoinBody) -> Option<SharingPolicy> {
    if join.inviter != Some(policy.initiator) || !policy.can_extend_members(&policy.initiator) {
        return None;
    }
    let widened = policy.with_member(*author);
    widened.readable(author).then_some(widened)
}

/// A peer may only speak for itself.
fn check_contact(contact: &Contact, ctx: &BlockContext<'_>) -> Result<(), CoreError> {
    if Some(contact.id) != ctx.envelope.author {
        return Err(CoreError::InvalidThreadBlock(
            "contact does not match block author".into(),
        ));
    }
    Ok(())
}
