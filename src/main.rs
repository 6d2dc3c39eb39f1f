//! awg-relay binary.
//!
//! Reads its entire configuration from `AWG_*` environment variables, runs
//! one relay session, and exits 0 on a clean SIGTERM/SIGINT stop or 1 on a
//! configuration or startup failure.

use std::process::ExitCode;
use std::sync::Arc;

use tokio::sync::watch;
use tracing::{info, Event, Level, Subscriber};
use tracing_subscriber::fmt::format::Writer;
use tracing_subscriber::fmt::{FmtContext, FormatEvent, FormatFields};
use tracing_subscriber::registry::LookupSpan;
use tracing_subscriber::EnvFilter;

use awg_relay::{config, LogLevel, Proxy};

/// Renders every record as `LEVEL: message`, matching the relay's log
/// contract on stderr.
struct LevelPrefix;

impl<S, N> FormatEvent<S, N> for LevelPrefix
where
    S: Subscriber + for<'a> LookupSpan<'a>,
    N: for<'a> FormatFields<'a> + 'static,
{
    fn format_event(
        &self,
        ctx: &FmtContext<'_, S, N>,
        mut writer: Writer<'_>,
        event: &Event<'_>,
    ) -> std::fmt::Result {
        let level = *event.metadata().level();
        let prefix = if level == Level::ERROR {
            "ERROR"
        } else if level == Level::DEBUG || level == Level::TRACE {
            "DEBUG"
        } else {
            "INFO"
        };
        write!(writer, "{prefix}: ")?;
        ctx.field_format().format_fields(writer.by_ref(), event)?;
        writeln!(writer)
    }
}

fn init_logging(level: LogLevel) {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::new(level.env_filter()))
        .event_format(LevelPrefix)
        .with_writer(std::io::stderr)
        .init();
}

async fn shutdown_signal() {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{signal, SignalKind};

        let ctrl_c = tokio::signal::ctrl_c();
        match signal(SignalKind::terminate()) {
            Ok(mut term) => {
                tokio::select! {
                    _ = ctrl_c => {}
                    _ = term.recv() => {}
                }
            }
            Err(_) => {
                let _ = ctrl_c.await;
            }
        }
    }
    #[cfg(not(unix))]
    {
        let _ = tokio::signal::ctrl_c().await;
    }
}

#[tokio::main]
async fn main() -> ExitCode {
    let settings = match config::from_env() {
        Ok(settings) => settings,
        Err(e) => {
            eprintln!("FATAL: {e}");
            return ExitCode::from(1);
        }
    };

    init_logging(settings.config.log_level);
    info!("starting awg-relay mode={}", settings.config.mode());

    let proxy = Arc::new(Proxy::new(
        Arc::new(settings.config),
        settings.listen,
        settings.remote,
    ));

    let (stop_tx, stop_rx) = watch::channel(false);
    tokio::spawn(async move {
        shutdown_signal().await;
        info!("shutting down");
        let _ = stop_tx.send(true);
    });

    match proxy.run(stop_rx).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("FATAL: {e}");
            ExitCode::from(1)
        }
    }
}
