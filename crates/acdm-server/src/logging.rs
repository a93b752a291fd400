//! Tracing setup.
//!
//! Events go through one `EnvFilter` held behind a reload handle, so the
//! operator can change the level of a single log sender at runtime. A second
//! layer forwards the events that pass the filter to the `log_messages`
//! table while the sink is switched on.

use std::collections::BTreeMap;
use std::env;
use std::fmt::Write as _;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

use chrono::Utc;
use thiserror::Error;
use tokio::sync::mpsc;
use tracing::field::{Field, Visit};
use tracing::{Event, Level, Subscriber};
use tracing_subscriber::layer::{Context, Layer, SubscriberExt};
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{reload, EnvFilter, Registry};

use crate::persistence::LogRecord;

pub const DEFAULT_DIRECTIVE: &str = "info";

type FilterHandle = reload::Handle<EnvFilter, Registry>;

/// Component that emits log messages.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum LogSender {
    Vacdm,
    DataManager,
    Server,
    Config,
    Auth,
}

impl LogSender {
    pub const ALL: [LogSender; 5] = [
        LogSender::Vacdm,
        LogSender::DataManager,
        LogSender::Server,
        LogSender::Config,
        LogSender::Auth,
    ];

    pub fn name(&self) -> &'static str {
        match self {
            Self::Vacdm => "vacdm",
            Self::DataManager => "datamanager",
            Self::Server => "server",
            Self::Config => "config",
            Self::Auth => "auth",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        Self::ALL
            .into_iter()
            .find(|sender| sender.name().eq_ignore_ascii_case(value.trim()))
    }

    /// Tracing targets owned by this sender.
    pub fn targets(&self) -> &'static [&'static str] {
        match self {
            Self::Vacdm => &["acdm_server"],
            Self::DataManager => &["acdm_server::state", "acdm_server::loops::sync_loop"],
            Self::Server => &["acdm_backend"],
            Self::Config => &["acdm_server::config"],
            Self::Auth => &["acdm_server::loops::auth_loop"],
        }
    }

    /// Sender of an event target; the most specific target wins.
    pub fn for_target(target: &str) -> Option<Self> {
        let mut best: Option<(usize, LogSender)> = None;
        for sender in Self::ALL {
            for prefix in sender.targets() {
                let matches = target == *prefix
                    || target
                        .strip_prefix(prefix)
                        .is_some_and(|rest| rest.starts_with("::"));
                if matches && best.map_or(true, |(len, _)| prefix.len() > len) {
                    best = Some((prefix.len(), sender));
                }
            }
        }
        best.map(|(_, sender)| sender)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogLevel {
    Debug,
    Info,
    Warning,
    Error,
    Critical,
    System,
    Disabled,
}

impl LogLevel {
    pub fn parse(value: &str) -> Option<Self> {
        match value.trim().to_ascii_uppercase().as_str() {
            "DEBUG" => Some(Self::Debug),
            "INFO" => Some(Self::Info),
            "WARNING" => Some(Self::Warning),
            "ERROR" => Some(Self::Error),
            "CRITICAL" => Some(Self::Critical),
            "SYSTEM" => Some(Self::System),
            "DISABLED" => Some(Self::Disabled),
            _ => None,
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            Self::Debug => "DEBUG",
            Self::Info => "INFO",
            Self::Warning => "WARNING",
            Self::Error => "ERROR",
            Self::Critical => "CRITICAL",
            Self::System => "SYSTEM",
            Self::Disabled => "DISABLED",
        }
    }

    /// `EnvFilter` level for this setting. Tracing has no level above error.
    pub fn directive(&self) -> &'static str {
        match self {
            Self::Debug => "debug",
            Self::Info => "info",
            Self::Warning => "warn",
            Self::Error | Self::Critical | Self::System => "error",
            Self::Disabled => "off",
        }
    }
}

#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum LogLevelError {
    #[error("Sender {sender} not found. Available senders are {available}")]
    UnknownSender { sender: String, available: String },
    #[error("Invalid log level: {0}")]
    InvalidLevel(String),
    #[error("Unable to apply log filter: {0}")]
    Reload(String),
}

/// Runtime handle on the log filter and the database sink.
pub struct LogControl {
    handle: Option<FilterHandle>,
    base_directive: String,
    levels: Mutex<BTreeMap<LogSender, LogLevel>>,
    sink_enabled: Arc<AtomicBool>,
}

impl LogControl {
    /// Control that is not attached to a subscriber.
    pub fn detached() -> Self {
        Self {
            handle: None,
            base_directive: DEFAULT_DIRECTIVE.to_string(),
            levels: Mutex::new(BTreeMap::new()),
            sink_enabled: Arc::new(AtomicBool::new(false)),
        }
    }

    /// Filter directives for the current sender levels.
    pub fn directives(&self) -> String {
        let levels = self.levels.lock().unwrap_or_else(|e| e.into_inner());
        render_directives(&self.base_directive, &levels)
    }

    /// Change the minimum level of one sender.
    ///
    /// The sink follows the levels: it is on while at least one sender has a
    /// level other than disabled.
    pub fn set_level(&self, sender: &str, level: &str) -> Result<String, LogLevelError> {
        let parsed_sender = LogSender::parse(sender).ok_or_else(|| LogLevelError::UnknownSender {
            sender: sender.to_string(),
            available: LogSender::ALL
                .iter()
                .map(LogSender::name)
                .collect::<Vec<_>>()
                .join(" "),
        })?;
        let parsed_level = LogLevel::parse(level)
            .ok_or_else(|| LogLevelError::InvalidLevel(level.to_ascii_uppercase()))?;

        let mut levels = self.levels.lock().unwrap_or_else(|e| e.into_inner());
        let mut updated = levels.clone();
        updated.insert(parsed_sender, parsed_level);

        if let Some(handle) = &self.handle {
            let filter = EnvFilter::try_new(render_directives(&self.base_directive, &updated))
                .map_err(|err| LogLevelError::Reload(err.to_string()))?;
            handle
                .reload(filter)
                .map_err(|err| LogLevelError::Reload(err.to_string()))?;
        }

        let any_enabled = updated.values().any(|level| *level != LogLevel::Disabled);
        *levels = updated;
        self.sink_enabled.store(any_enabled, Ordering::Relaxed);

        Ok(format!(
            "Changed sender {} to {}",
            parsed_sender.name(),
            parsed_level.name()
        ))
    }

    /// Levels set at runtime, by sender name.
    pub fn levels(&self) -> BTreeMap<&'static str, &'static str> {
        let levels = self.levels.lock().unwrap_or_else(|e| e.into_inner());
        levels
            .iter()
            .map(|(sender, level)| (sender.name(), level.name()))
            .collect()
    }

    pub fn set_sink_enabled(&self, enabled: bool) {
        self.sink_enabled.store(enabled, Ordering::Relaxed);
    }

    pub fn sink_enabled(&self) -> bool {
        self.sink_enabled.load(Ordering::Relaxed)
    }
}

fn render_directives(base: &str, levels: &BTreeMap<LogSender, LogLevel>) -> String {
    let mut directives = base.to_string();
    for (sender, level) in levels {
        for target in sender.targets() {
            let _ = write!(directives, ",{}={}", target, level.directive());
        }
    }
    directives
}

/// Stored severity of a tracing level.
pub fn level_code(level: &Level) -> i64 {
    match *level {
        Level::TRACE | Level::DEBUG => 0,
        Level::INFO => 1,
        Level::WARN => 2,
        Level::ERROR => 3,
    }
}

/// Records buffered between the sink and the log persistence loop.
pub const LOG_QUEUE_CAPACITY: usize = 4096;

/// Forwards filtered events to the log persistence loop.
///
/// Events are dropped while the queue is full.
pub struct LogSinkLayer {
    tx: mpsc::Sender<LogRecord>,
    enabled: Arc<AtomicBool>,
}

impl LogSinkLayer {
    pub fn new(tx: mpsc::Sender<LogRecord>, enabled: Arc<AtomicBool>) -> Self {
        Self { tx, enabled }
    }
}

impl<S: Subscriber> Layer<S> for LogSinkLayer {
    fn on_event(&self, event: &Event<'_>, _ctx: Context<'_, S>) {
        if !self.enabled.load(Ordering::Relaxed) {
            return;
        }
        let metadata = event.metadata();
        let target = metadata.target();
        // the persistence path must not feed itself
        if target.starts_with("sqlx") || target.starts_with("acdm_server::loops::log_persist_loop")
        {
            return;
        }
        let Some(sender) = LogSender::for_target(target) else {
            return;
        };

        let mut visitor = MessageVisitor::default();
        event.record(&mut visitor);
        if visitor.message.is_empty() {
            return;
        }

        let record = LogRecord::new(
            Utc::now(),
            sender.name(),
            level_code(metadata.level()),
            visitor.message,
        );
        let _ = self.tx.try_send(record);
    }
}

#[derive(Default)]
struct MessageVisitor {
    message: String,
}

impl Visit for MessageVisitor {
    fn record_str(&mut self, field: &Field, value: &str) {
        if field.name() == "message" {
            self.message.insert_str(0, value);
        } else {
            let _ = write!(self.message, " {}={}", field.name(), value);
        }
    }

    fn record_debug(&mut self, field: &Field, value: &dyn std::fmt::Debug) {
        if field.name() == "message" {
            self.message.insert_str(0, &format!("{:?}", value));
        } else {
            let _ = write!(self.message, " {}={:?}", field.name(), value);
        }
    }
}

/// Install the global subscriber.
///
/// `RUST_LOG` sets the base filter; `ACDM_LOG_FORMAT=json` switches the
/// console output to JSON lines.
pub fn init() -> anyhow::Result<(Arc<LogControl>, mpsc::Receiver<LogRecord>)> {
    let base_directive = env::var("RUST_LOG")
        .ok()
        .filter(|value| !value.trim().is_empty())
        .unwrap_or_else(|| DEFAULT_DIRECTIVE.to_string());
    let (filter_layer, handle) = reload::Layer::new(EnvFilter::try_new(&base_directive)?);

    let json = env::var("ACDM_LOG_FORMAT").is_ok_and(|format| format.eq_ignore_ascii_case("json"));
    let text_layer = (!json).then(|| tracing_subscriber::fmt::layer());
    let json_layer = json.then(|| tracing_subscriber::fmt::layer().json());

    let sink_enabled = Arc::new(AtomicBool::new(false));
    let (tx, rx) = mpsc::channel(LOG_QUEUE_CAPACITY);

    tracing_subscriber::registry()
        .with(filter_layer)
        .with(text_layer)
        .with(json_layer)
        .with(LogSinkLayer::new(tx, sink_enabled.clone()))
        .try_init()?;

    let control = LogControl {
        handle: Some(handle),
        base_directive,
        levels: Mutex::new(BTreeMap::new()),
        sink_enabled,
    };
    Ok((Arc::new(control), rx))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn targets_map_to_most_specific_sender() {
        assert_eq!(LogSender::for_target("acdm_server"), Some(LogSender::Vacdm));
        assert_eq!(
            LogSender::for_target("acdm_server::commands"),
            Some(LogSender::Vacdm)
        );
        assert_eq!(
            LogSender::for_target("acdm_server::state::store"),
            Some(LogSender::DataManager)
        );
        assert_eq!(
            LogSender::for_target("acdm_server::loops::auth_loop"),
            Some(LogSender::Auth)
        );
        assert_eq!(
            LogSender::for_target("acdm_backend::client"),
            Some(LogSender::Server)
        );
        assert_eq!(LogSender::for_target("acdm_serverless"), None);
        assert_eq!(LogSender::for_target("tower_http::trace"), None);
    }

    #[test]
    fn set_level_rewrites_directives() {
        let control = LogControl::detached();
        assert_eq!(control.directives(), "info");

        let reply = control.set_level("DataManager", "debug").unwrap();
        assert_eq!(reply, "Changed sender datamanager to DEBUG");
        assert_eq!(
            control.directives(),
            "info,acdm_server::state=debug,acdm_server::loops::sync_loop=debug"
        );
        assert!(control.sink_enabled());

        control.set_level("datamanager", "disabled").unwrap();
        assert!(!control.sink_enabled());
        assert_eq!(control.levels().get("datamanager"), Some(&"DISABLED"));
    }

    #[test]
    fn set_level_reports_bad_input() {
        let control = LogControl::detached();
        let err = control.set_level("radar", "info").unwrap_err();
        assert_eq!(
            err.to_string(),
            "Sender radar not found. Available senders are vacdm datamanager server config auth"
        );

        let err = control.set_level("server", "verbose").unwrap_err();
        assert_eq!(err, LogLevelError::InvalidLevel("VERBOSE".to_string()));
        assert!(control.levels().is_empty());
    }

    #[test]
    fn sink_forwards_only_when_enabled() {
        let (tx, mut rx) = mpsc::channel(8);
        let enabled = Arc::new(AtomicBool::new(false));
        let subscriber =
            tracing_subscriber::registry().with(LogSinkLayer::new(tx, enabled.clone()));

        tracing::subscriber::with_default(subscriber, || {
            tracing::warn!(target: "acdm_server::state", "dropped");
            enabled.store(true, Ordering::Relaxed);
            tracing::warn!(target: "acdm_server::state", callsign = "DLH1", "Added pilot");
            tracing::info!(target: "sqlx::query", "select");
            tracing::info!(target: "hyper::proto", "ignored");
        });

        let record = rx.try_recv().unwrap();
        assert_eq!(record.sender, "datamanager");
        assert_eq!(record.level, 2);
        assert_eq!(record.message, "Added pilot callsign=DLH1");
        assert!(rx.try_recv().is_err());
    }

    #[test]
    fn full_sink_queue_drops_events() {
        let (tx, mut rx) = mpsc::channel(2);
        let enabled = Arc::new(AtomicBool::new(true));
        let subscriber = tracing_subscriber::registry().with(LogSinkLayer::new(tx, enabled));

        tracing::subscriber::with_default(subscriber, || {
            for callsign in ["DLH1", "DLH2", "DLH3"] {
                tracing::info!(target: "acdm_server::state", "Added {}", callsign);
            }
        });

        assert_eq!(rx.try_recv().unwrap().message, "Added DLH1");
        assert_eq!(rx.try_recv().unwrap().message, "Added DLH2");
        assert!(rx.try_recv().is_err());
    }
}
