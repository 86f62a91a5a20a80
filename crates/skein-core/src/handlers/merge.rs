use skein_store::Database;

use super::{target_block, BlockContext, Handled};
use crate::error::CoreError;

/// Merges carry no content. They are accepted when we and the authors of
/// the merged heads can all read the thread.
pub(super) fn handle(ctx: &BlockContext<'_>, db: &Database) -> Result<Handled, CoreError> {
    let policy = ctx.policy();
    if !policy.readable(&ctx.local) {
        return Err(CoreError::NotReadable);
    }

    for parent in &ctx.envelope.parents {
        let block = target_block(ctx, db, parent)?;
        if let Some(author) = block.author {
            if !policy.readable(&author) {
                return Err(CoreError::NotReadable);
            }
        }
    }
    Ok(Handled::default())
}
