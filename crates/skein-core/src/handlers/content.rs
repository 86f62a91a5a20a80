use skein_shared::block::{FilesBody, MessageBody};
use skein_store::NotificationType;

use super::{BlockContext, Effect, Handled};
use crate::error::CoreError;

pub(super) fn message(ctx: &BlockContext<'_>, message: &MessageBody) -> Result<Handled, CoreError> {
    check_writable(ctx)?;
    Ok(Handled::notify(NotificationType::MessageAdded, message.body.clone()))
}

pub(super) fn files(ctx: &BlockContext<'_>, files: &FilesBody) -> Result<Handled, CoreError> {
    check_writable(ctx)?;
    if files.target.trim().is_empty() {
        return Err(CoreError::InvalidTarget("files block without content address".into()));
    }

    let body = if files.caption.is_empty() {
        "added files".to_string()
    } else {
        files.caption.clone()
    };
    let mut handled = Handled::notify(NotificationType::FilesAdded, body);
    handled.effects.push(Effect::Pin(files.target.clone()));
    Ok(handled)
}

fn check_writable(ctx: &BlockContext<'_>) -> Result<(), CoreError> {
    let author = ctx.author()?;
    if !ctx.policy().writable(&author) {
        return Err(CoreError::NotWritable);
    }
    Ok(())
}
