use anyhow::Result;
use std::path::Path;
use tracing::Level;
use tracing_appender::rolling::{RollingFileAppender, Rotation};
use tracing_subscriber::reload::{self, Handle};
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter, Registry};

/// Handle for swapping the active filter at runtime.
pub type ReloadHandle = Handle<EnvFilter, Registry>;

/// Build the filter: `RUST_LOG` directives when set, otherwise `level`.
fn filter(level: Level) -> EnvFilter {
    EnvFilter::builder()
        .with_default_directive(level.into())
        .from_env_lossy()
}

/// Initialize logging with a runtime-reloadable filter.
///
/// With `dir`, events are written as JSON to an hourly rolling `rollup.log`
/// in that directory; without it, human-readable lines go to stderr.
pub fn init(dir: Option<&Path>, level: Level) -> Result<ReloadHandle> {
    let (filter_layer, handle) = reload::Layer::new(filter(level));
    let registry = tracing_subscriber::registry().with(filter_layer);
    match dir {
        Some(dir) => {
            let file_appender = RollingFileAppender::new(Rotation::HOURLY, dir, "rollup.log");
            let fmt_layer = fmt::layer()
                .with_writer(file_appender)
                .json()
                .with_current_span(false)
                .with_span_list(false);
            registry.with(fmt_layer).try_init()?;
        }
        None => {
            let fmt_layer = fmt::layer().with_writer(std::io::stderr).with_target(false);
            registry.with(fmt_layer).try_init()?;
        }
    }
    Ok(handle)
}

/// Replace the active filter, e.g. to raise verbosity on a running process.
pub fn set_level(handle: &ReloadHandle, level: Level) -> Result<()> {
    handle.reload(EnvFilter::default().add_directive(level.into()))?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn reloadable_filter_accepts_new_level() {
        let (_layer, handle) = reload::Layer::<EnvFilter, Registry>::new(filter(Level::INFO));
        set_level(&handle, Level::DEBUG).unwrap();
        let current = handle.with_current(|f| f.to_string()).unwrap();
        assert!(current.contains("debug"));
    }
}
