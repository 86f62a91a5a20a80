//! Tracing setup with a log level that can be changed at runtime.

use tracing_subscriber::prelude::*;
use tracing_subscriber::{fmt, reload, EnvFilter, Registry};

use crate::error::CoreError;

/// Default directive when `RUST_LOG` is unset.
pub const DEFAULT_DIRECTIVE: &str = "info,skein_core=debug,skein_net=info";

/// Handle for swapping the active filter.
#[derive(Clone)]
pub struct LogHandle {
    inner: reload::Handle<EnvFilter, Registry>,
}

/// Install the global subscriber. Respects `RUST_LOG`, falling back to
/// `default_directive`.
pub fn init(default_directive: &str) -> Result<LogHandle, CoreError> {
    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(default_directive))
        .map_err(|e| CoreError::InvalidArgument(e.to_string()))?;
    let (filter, inner) = reload::Layer::new(filter);

    tracing_subscriber::registry()
        .with(filter)
        .with(fmt::layer())
        .try_init()
        .map_err(|e| CoreError::InvalidArgument(e.to_string()))?;

    Ok(LogHandle { inner })
}

impl LogHandle {
    /// Replace the active filter, e.g. `"debug"` or `"info,skein_core=trace"`.
    pub fn set_level(&self, directive: &str) -> Result<(), CoreError> {
        let filter = EnvFilter::try_new(directive)
            .map_err(|e| CoreError::InvalidArgument(format!("bad log directive {directive:?}: {e}")))?;
        self.inner
            .reload(filter)
            .map_err(|e| CoreError::InvalidArgument(e.to_string()))?;
        tracing::info!(directive, "log level changed");
        Ok(())
    }

    /// The directive currently in effect.
    pub fn current(&self) -> Option<String> {
        self.inner.with_current(|f| f.to_string()).ok()
    }
}
