use skein_shared::block::TargetBody;
use skein_shared::BlockType;
use skein_store::{BlockRecord, Database, NotificationType};

use super::{target_block, BlockContext, Effect, Handled};
use crate::error::CoreError;

pub(super) fn flag(ctx: &BlockContext<'_>, flag: &TargetBody, db: &Database) -> Result<Handled, CoreError> {
    let target = check_target(ctx, flag, db)?;
    Ok(Handled::notify(
        NotificationType::FlagAdded,
        format!("flagged a {}", target.block_type),
    ))
}

/// Hides the target from feeds. Ignored files are no longer kept locally.
pub(super) fn ignore(ctx: &BlockContext<'_>, ignore: &TargetBody, db: &Database) -> Result<Handled, CoreError> {
    let target = check_target(ctx, ignore, db)?;

    let mut handled = Handled::default();
    if target.block_type == BlockType::Files {
        if let Some(address) = target.target {
            handled.effects.push(Effect::Unpin(address));
        }
    }
    db.delete_notifications_for_block(&target.id)?;
    Ok(handled)
}

fn check_target(ctx: &BlockContext<'_>, body: &TargetBody, db: &Database) -> Result<BlockRecord, CoreError> {
    let author = ctx.author()?;
    if !ctx.policy().annotatable(&author) {
        return Err(CoreError::NotAnnotatable);
    }

    let target = target_block(ctx, db, &body.target)?;
    if target.block_type.is_moderation() || target.block_type == BlockType::Merge {
        return Err(CoreError::InvalidTarget(format!(
            "a {} cannot target a {} block",
            ctx.envelope.block_type, target.block_type
        )));
    }
    Ok(target)
}
