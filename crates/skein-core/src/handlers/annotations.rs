use skein_shared::block::{CommentBody, TargetBody};
use skein_shared::{BlockId, BlockType};
use skein_store::{Database, NotificationType};

use super::{target_block, BlockContext, Handled};
use crate::error::CoreError;

pub(super) fn comment(
    ctx: &BlockContext<'_>,
    comment: &CommentBody,
    db: &Database,
) -> Result<Handled, CoreError> {
    check_target(ctx, &comment.target, db)?;
    Ok(Handled::notify(NotificationType::CommentAdded, comment.body.clone()))
}

pub(super) fn like(ctx: &BlockContext<'_>, like: &TargetBody, db: &Database) -> Result<Handled, CoreError> {
    check_target(ctx, &like.target, db)?;
    Ok(Handled::notify(NotificationType::LikeAdded, "liked"))
}

fn check_target(ctx: &BlockContext<'_>, target: &BlockId, db: &Database) -> Result<(), CoreError> {
    let author = ctx.author()?;
    if !ctx.policy().annotatable(&author) {
        return Err(CoreError::NotAnnotatable);
    }
    let block = target_block(ctx, db, target)?;
    if block.block_type == BlockType::Merge {
        return Err(CoreError::InvalidTarget("merge blocks cannot be annotated".into()));
    }
    Ok(())
}
