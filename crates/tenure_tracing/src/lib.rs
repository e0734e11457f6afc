//! Tracing subscriber setup for Tenure applications.
//!
//! The lifecycle crates only emit events through [`tracing`]; installing a
//! subscriber is left to the application. [`TracingSetup`] installs a
//! `tracing-subscriber` registry with an [`EnvFilter`] and a fmt layer in one
//! of three [`TracingFormat`]s.
//!
//! ```
//! use tenure_tracing::{TracingFormat, TracingSetup};
//! use tracing::Level;
//!
//! let config = TracingSetup::new()
//!     .with_level(Level::DEBUG)
//!     .with_format(TracingFormat::Compact)
//!     .with_env_filter("tenure_lifecycle=debug,tenure_registry=info")
//!     .init();
//! assert_eq!(config.level, Level::DEBUG);
//! ```

use core::fmt;
use core::str::FromStr;
use tracing::{Level, Subscriber};
use tracing_subscriber::fmt::format::FmtSpan;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::registry::LookupSpan;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{EnvFilter, Layer};

/// How events are rendered.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum TracingFormat {
    /// Multi-line, colored.
    #[default]
    Pretty,
    /// One line per event.
    Compact,
    /// Newline-delimited JSON objects.
    Json,
}

impl TracingFormat {
    fn name(self) -> &'static str {
        match self {
            Self::Pretty => "pretty",
            Self::Compact => "compact",
            Self::Json => "json",
        }
    }
}

/// An unrecognized [`TracingFormat`] name.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("unknown tracing format '{0}' (expected pretty, compact or json)")]
pub struct ParseFormatError(String);

impl FromStr for TracingFormat {
    type Err = ParseFormatError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        [Self::Pretty, Self::Compact, Self::Json]
            .into_iter()
            .find(|format| s.eq_ignore_ascii_case(format.name()))
            .ok_or_else(|| ParseFormatError(s.to_owned()))
    }
}

impl fmt::Display for TracingFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// What [`TracingSetup::init`] ended up with.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TracingConfig {
    /// Level used when no directive matches.
    pub level: Level,
    /// Event rendering.
    pub format: TracingFormat,
    /// `false` if a global subscriber was already set.
    pub installed: bool,
}

/// Builder for the global tracing subscriber.
///
/// Directives passed to [`with_env_filter`](Self::with_env_filter) use the
/// `EnvFilter` syntax (`crate=level,...`). A filter that fails to parse is
/// replaced by the plain level.
///
/// ```
/// use tenure_tracing::{TracingFormat, TracingSetup};
/// use tracing::Level;
///
/// let setup = TracingSetup::default()
///     .with_level(Level::WARN)
///     .with_format(TracingFormat::Json)
///     .with_env_filter("tenure_lifecycle=warn,ledger=info");
/// # let _ = setup;
/// ```
#[derive(Debug, Clone)]
pub struct TracingSetup {
    level: Level,
    format: TracingFormat,
    directives: Option<String>,
    log_spans: bool,
}

impl Default for TracingSetup {
    fn default() -> Self {
        Self {
            level: Level::INFO,
            format: TracingFormat::default(),
            directives: None,
            log_spans: false,
        }
    }
}

impl TracingSetup {
    /// Same as [`TracingSetup::default`].
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the fallback level.
    #[must_use]
    pub fn with_level(self, level: Level) -> Self {
        Self { level, ..self }
    }

    /// Sets how events are rendered.
    #[must_use]
    pub fn with_format(self, format: TracingFormat) -> Self {
        Self { format, ..self }
    }

    /// Sets per-target directives, e.g. `tenure_lifecycle=debug`.
    #[must_use]
    pub fn with_env_filter(self, directives: impl Into<String>) -> Self {
        Self {
            directives: Some(directives.into()),
            ..self
        }
    }

    /// Logs span enter and exit.
    #[must_use]
    pub fn with_span_events(self, log_spans: bool) -> Self {
        Self { log_spans, ..self }
    }

    fn filter(&self) -> EnvFilter {
        let fallback = || EnvFilter::new(self.level.as_str());
        self.directives
            .as_deref()
            .map_or_else(fallback, |directives| {
                EnvFilter::try_new(directives).unwrap_or_else(|_| fallback())
            })
    }

    fn layer<S>(&self) -> Box<dyn Layer<S> + Send + Sync>
    where
        S: Subscriber + for<'span> LookupSpan<'span>,
    {
        let spans = if self.log_spans {
            FmtSpan::ENTER | FmtSpan::EXIT
        } else {
            FmtSpan::NONE
        };
        let layer = tracing_subscriber::fmt::layer().with_span_events(spans);
        match self.format {
            TracingFormat::Pretty => layer.pretty().boxed(),
            TracingFormat::Compact => layer.compact().boxed(),
            TracingFormat::Json => layer.json().boxed(),
        }
    }

    /// Installs the subscriber.
    ///
    /// An already installed global subscriber is left in place.
    pub fn init(self) -> TracingConfig {
        let installed = tracing_subscriber::registry()
            .with(self.filter())
            .with(self.layer())
            .try_init()
            .is_ok();

        if installed {
            tracing::info!(level = %self.level, format = %self.format, "tracing initialized");
        }
        TracingConfig {
            level: self.level,
            format: self.format,
            installed,
        }
    }
}
