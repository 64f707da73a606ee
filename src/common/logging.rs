use crate::common::settings::LoggingSettings;
use tracing_subscriber::FmtSubscriber;

/// Install the global tracing subscriber, and redirect the `log`
/// records emitted by our dependencies to it.
pub fn configure(settings: LoggingSettings) -> anyhow::Result<()> {
    let fmt_subscriber = FmtSubscriber::builder()
        .with_ansi(true)
        .with_env_filter(settings.filter)
        .finish();
    tracing::subscriber::set_global_default(fmt_subscriber)?;
    tracing_log::LogTracer::init()?;
    Ok(())
}
