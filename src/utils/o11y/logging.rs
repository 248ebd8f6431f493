//! Logging setup and helpers.
use tracing::Subscriber;
use tracing_subscriber::{fmt::format::FmtSpan, layer::SubscriberExt, EnvFilter, Layer};

/// The error type returned when building a subscriber.
#[derive(Debug, thiserror::Error)]
pub enum BuildSubscriberError {
    #[error("failed to parse filtering directive")]
    Parse(#[from] tracing_subscriber::filter::ParseError),
}

/// Build a tracing subscriber.
///
/// Filtering follows `RUST_LOG` and defaults to `info`.
pub fn build_subscriber() -> Result<impl Subscriber, BuildSubscriberError> {
    let fmt_layer = tracing_subscriber::fmt::layer()
        .with_file(true)
        .with_line_number(true)
        .with_span_events(FmtSpan::CLOSE);
    let env_filter = EnvFilter::try_from_default_env().or_else(|_| EnvFilter::try_new("info"))?;
    Ok(tracing_subscriber::registry().with(fmt_layer.with_filter(env_filter)))
}

/// Render an error followed by its chain of sources, separated by `: `.
pub fn error_chain(error: &dyn std::error::Error) -> String {
    let mut rendered = error.to_string();
    let mut source = error.source();
    while let Some(cause) = source {
        rendered.push_str(": ");
        rendered.push_str(&cause.to_string());
        source = cause.source();
    }
    rendered
}

/// Log an error and its sources at the given level (ERROR by default).
///
/// ```ignore
/// log_error!(error, "failed to build the database handle");
/// log_error!(WARN, error, "catalog is incomplete");
/// ```
#[doc(hidden)]
#[macro_export]
macro_rules! __log_error {
    ($level:ident, $error:expr, $msg:literal) => {
        ::tracing::event!(
            ::tracing::Level::$level,
            error = %$crate::utils::o11y::logging::error_chain(&$error),
            $msg
        )
    };
    ($error:expr, $msg:literal) => {
        $crate::utils::o11y::logging::log_error!(ERROR, $error, $msg)
    };
}

/// Closure for `Result::inspect_err` that logs the error at ERROR level with
/// the given message.
#[doc(hidden)]
#[macro_export]
macro_rules! __as_error {
    () => {
        $crate::utils::o11y::logging::as_error!("error")
    };
    ($msg:literal) => {
        |error| $crate::utils::o11y::logging::log_error!(ERROR, error, $msg)
    };
}

pub use crate::{__as_error as as_error, __log_error as log_error};
