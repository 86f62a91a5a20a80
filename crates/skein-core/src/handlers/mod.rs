//! Per-type block handlers.
//!
//! A handler checks the sharing policy and the block's references, then
//! applies the datastore side effects of one block. Handlers run inside the
//! caller's transaction for both locally authored and received blocks, so a
//! rejected block leaves nothing behind. Network side effects are returned
//! as [`Effect`]s and performed after commit.

mod annotations;
mod content;
mod membership;
mod merge;
mod moderation;

use chrono::Utc;
use tracing::trace;
use uuid::Uuid;

use skein_shared::block::BlockBody;
use skein_shared::{BlockEnvelope, BlockId, BlockType, SharingPolicy, UserId};
use skein_store::{BlockRecord, Database, Notification, NotificationType, StoreError, ThreadRecord};

use crate::error::CoreError;

/// Everything a handler may look at.
pub(crate) struct BlockContext<'a> {
    pub id: BlockId,
    pub envelope: &'a BlockEnvelope,
    /// Opened body. `None` only for merges.
    pub body: Option<&'a BlockBody>,
    pub thread: &'a ThreadRecord,
    /// The local account.
    pub local: UserId,
}

impl BlockContext<'_> {
    pub fn author(&self) -> Result<UserId, CoreError> {
        self.envelope.author.ok_or_else(|| {
            CoreError::InvalidThreadBlock(format!("{} block without author", self.envelope.block_type))
        })
    }

    pub fn policy(&self) -> SharingPolicy {
        self.thread.policy()
    }

    pub fn is_local(&self) -> bool {
        self.envelope.author == Some(self.local)
    }

    fn record(&self) -> BlockRecord {
        BlockRecord {
            id: self.id,
            thread_id: self.thread.id,
            author: self.envelope.author,
            block_type: self.envelope.block_type,
            date: self.envelope.date,
            parents: self.envelope.parents.clone(),
            target: self.body.and_then(BlockBody::target),
            body: self.body.and_then(BlockBody::text),
        }
    }
}

/// Network work to do once the block is committed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) enum Effect {
    Pin(String),
    Unpin(String),
}

/// What a handler wants recorded besides the block itself.
#[derive(Debug, Default)]
pub(crate) struct Handled {
    pub effects: Vec<Effect>,
    pub notice: Option<Notice>,
}

#[derive(Debug)]
pub(crate) struct Notice {
    pub kind: NotificationType,
    pub body: String,
}

impl Handled {
    fn notify(kind: NotificationType, body: impl Into<String>) -> Self {
        Self {
            effects: Vec::new(),
            notice: Some(Notice {
                kind,
                body: body.into(),
            }),
        }
    }
}

/// Validate and materialize one block. The caller owns the transaction.
pub(crate) fn apply(ctx: &BlockContext<'_>, db: &Database) -> Result<Vec<Effect>, CoreError> {
    if let Some(body) = ctx.body {
        if body.block_type() != ctx.envelope.block_type {
            return Err(CoreError::BlockWrongType {
                expected: ctx.envelope.block_type,
                actual: body.block_type(),
            });
        }
    }

    let handled = match (ctx.envelope.block_type, ctx.body) {
        (BlockType::Merge, None) => merge::handle(ctx, db)?,
        (_, None) => {
            return Err(CoreError::InvalidThreadBlock(format!(
                "{} block without body",
                ctx.envelope.block_type
            )))
        }
        (_, Some(body)) => match body {
            BlockBody::Invite(_) => {
                return Err(CoreError::InvalidThreadBlock(
                    "invites do not belong to thread history".into(),
                ))
            }
            BlockBody::Join(join) => membership::join(ctx, join, db)?,
            BlockBody::Leave => membership::leave(ctx, db)?,
            BlockBody::Announce(announce) => membership::announce(ctx, announce, db)?,
            BlockBody::Message(message) => content::message(ctx, message)?,
            BlockBody::Files(files) => content::files(ctx, files)?,
            BlockBody::Comment(comment) => annotations::comment(ctx, comment, db)?,
            BlockBody::Like(like) => annotations::like(ctx, like, db)?,
            BlockBody::Flag(flag) => moderation::flag(ctx, flag, db)?,
            BlockBody::Ignore(ignore) => moderation::ignore(ctx, ignore, db)?,
        },
    };

    db.insert_block(&ctx.record())?;

    if let (Some(notice), Some(author)) = (handled.notice, ctx.envelope.author) {
        if author != ctx.local {
            db.insert_notification(&Notification {
                id: Uuid::new_v4(),
                date: Utc::now(),
                actor: author,
                subject: ctx.thread.name.clone(),
                subject_id: ctx.thread.id,
                block_id: Some(ctx.id),
                target: ctx.body.and_then(BlockBody::target),
                kind: notice.kind,
                body: notice.body,
                read: false,
            })?;
        }
    }

    trace!(thread = %ctx.thread.id, block = %ctx.id, block_type = %ctx.envelope.block_type, "block applied");
    Ok(handled.effects)
}

/// Load a block of the same thread that another block points at.
fn target_block(ctx: &BlockContext<'_>, db: &Database, target: &BlockId) -> Result<BlockRecord, CoreError> {
    match db.get_block(target) {
        Ok(block) if block.thread_id == ctx.thread.id => Ok(block),
        Ok(_) | Err(StoreError::NotFound) => Err(CoreError::BlockNotFound),
        Err(e) => Err(e.into()),
    }
}

#[cfg(test)]
mod tests;
