//! Process-wide logger for flsd crates.
//!
//! Records go to stderr as text or one JSON object per line. Debug and trace
//! records can be restricted to a set of categories (`coindb`, `staking`,
//! `rest`, ...) the same way `-debug=<category>` works on the node. A bounded
//! in-memory ring can capture records for tests and diagnostics.

use std::collections::VecDeque;
use std::fmt;
use std::io::{self, Write};
use std::sync::atomic::{AtomicBool, AtomicU32, AtomicU8, AtomicUsize, Ordering};
use std::sync::{Mutex, OnceLock};
use std::time::{SystemTime, UNIX_EPOCH};

use serde_json::json;

#[derive(Clone, Copy, Debug, Eq, PartialEq, Ord, PartialOrd)]
pub enum Level {
    Error = 1,
    Warn = 2,
    Info = 3,
    Debug = 4,
    Trace = 5,
}

impl Level {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Error => "ERROR",
            Self::Warn => "WARN",
            Self::Info => "INFO",
            Self::Debug => "DEBUG",
            Self::Trace => "TRACE",
        }
    }

    pub fn parse(raw: &str) -> Option<Self> {
        match raw.trim().to_ascii_lowercase().as_str() {
            "error" => Some(Self::Error),
            "warn" | "warning" => Some(Self::Warn),
            "info" => Some(Self::Info),
            "debug" => Some(Self::Debug),
            "trace" => Some(Self::Trace),
            _ => None,
        }
    }
}

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum Format {
    Text = 0,
    Json = 1,
}

impl Format {
    pub fn parse(raw: &str) -> Option<Self> {
        match raw.trim().to_ascii_lowercase().as_str() {
            "text" => Some(Self::Text),
            "json" => Some(Self::Json),
            _ => None,
        }
    }
}

/// Debug categories. Records at `Debug`/`Trace` that carry a category are only
/// emitted when that category is enabled.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum Category {
    CoinDb,
    Staking,
    Mempool,
    Rest,
    Lifecycle,
}

impl Category {
    pub const ALL: [Category; 5] = [
        Category::CoinDb,
        Category::Staking,
        Category::Mempool,
        Category::Rest,
        Category::Lifecycle,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            Self::CoinDb => "coindb",
            Self::Staking => "staking",
            Self::Mempool => "mempool",
            Self::Rest => "rest",
            Self::Lifecycle => "lifecycle",
        }
    }

    pub fn parse(raw: &str) -> Option<Self> {
        let raw = raw.trim().to_ascii_lowercase();
        Self::ALL.into_iter().find(|cat| cat.as_str() == raw)
    }

    fn bit(self) -> u32 {
        1 << (self as u32)
    }
}

#[derive(Clone, Debug)]
pub struct LogConfig {
    pub level: Level,
    pub format: Format,
    pub timestamps: bool,
    pub categories: Vec<Category>,
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            level: Level::Info,
            format: Format::Text,
            timestamps: true,
            categories: Vec::new(),
        }
    }
}

static LOG_LEVEL: AtomicU8 = AtomicU8::new(Level::Info as u8);
static LOG_FORMAT: AtomicU8 = AtomicU8::new(Format::Text as u8);
static LOG_TIMESTAMPS: AtomicBool = AtomicBool::new(true);
static LOG_CATEGORIES: AtomicU32 = AtomicU32::new(0);
static LOG_STDERR_ENABLED: AtomicBool = AtomicBool::new(true);

#[derive(Clone, Debug)]
pub struct CapturedLog {
    pub ts_ms: u64,
    pub level: Level,
    pub category: Option<Category>,
    pub target: &'static str,
    pub msg: String,
}

static CAPTURE_ENABLED: AtomicBool = AtomicBool::new(false);
static CAPTURE_CAPACITY: AtomicUsize = AtomicUsize::new(0);
static CAPTURE: OnceLock<Mutex<VecDeque<CapturedLog>>> = OnceLock::new();

pub fn init(config: &LogConfig) {
    LOG_LEVEL.store(config.level as u8, Ordering::Relaxed);
    LOG_FORMAT.store(config.format as u8, Ordering::Relaxed);
    LOG_TIMESTAMPS.store(config.timestamps, Ordering::Relaxed);
    let mask = config
        .categories
        .iter()
        .fold(0u32, |mask, cat| mask | cat.bit());
    LOG_CATEGORIES.store(mask, Ordering::Relaxed);
}

pub fn set_stderr_enabled(enabled: bool) {
    LOG_STDERR_ENABLED.store(enabled, Ordering::Relaxed);
}

pub fn enable_capture(capacity: usize) {
    if capacity == 0 {
        CAPTURE_ENABLED.store(false, Ordering::Relaxed);
        return;
    }
    CAPTURE_CAPACITY.store(capacity, Ordering::Relaxed);
    CAPTURE.get_or_init(|| Mutex::new(VecDeque::with_capacity(capacity.min(1024))));
    CAPTURE_ENABLED.store(true, Ordering::Relaxed);
}

/// Returns up to `limit` most recent captured records, oldest first.
pub fn captured(limit: usize) -> Vec<CapturedLog> {
    let Some(buf) = CAPTURE.get() else {
        return Vec::new();
    };
    let Ok(guard) = buf.lock() else {
        return Vec::new();
    };
    let start = guard.len().saturating_sub(limit);
    guard.iter().skip(start).cloned().collect()
}

pub fn enabled(level: Level, category: Option<Category>) -> bool {
    if level as u8 > LOG_LEVEL.load(Ordering::Relaxed) {
        return false;
    }
    match category {
        Some(cat) if level >= Level::Debug => {
            LOG_CATEGORIES.load(Ordering::Relaxed) & cat.bit() != 0
        }
        _ => true,
    }
}

pub fn log(
    level: Level,
    category: Option<Category>,
    target: &'static str,
    args: fmt::Arguments<'_>,
) {
    if !enabled(level, category) {
        return;
    }

    let now = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default();
    let ts_ms: u64 = now.as_millis().try_into().unwrap_or(u64::MAX);
    let msg = args.to_string();

    if LOG_STDERR_ENABLED.load(Ordering::Relaxed) {
        let mut out = io::stderr().lock();
        if LOG_FORMAT.load(Ordering::Relaxed) == Format::Json as u8 {
            let record = json!({
                "ts_ms": ts_ms,
                "level": level.as_str(),
                "category": category.map(Category::as_str),
                "target": target,
                "msg": msg,
            });
            let _ = writeln!(out, "{record}");
        } else {
            if LOG_TIMESTAMPS.load(Ordering::Relaxed) {
                let _ = write!(out, "{} ", Timestamp(now.as_secs(), now.subsec_millis()));
            }
            match category {
                Some(cat) => {
                    let _ = writeln!(out, "{} [{}] {}: {msg}", level.as_str(), cat.as_str(), target);
                }
                None => {
                    let _ = writeln!(out, "{} {}: {msg}", level.as_str(), target);
                }
            }
        }
    }

    if CAPTURE_ENABLED.load(Ordering::Relaxed) {
        let Some(buf) = CAPTURE.get() else {
            return;
        };
        let Ok(mut guard) = buf.lock() else {
            return;
        };
        guard.push_back(CapturedLog {
            ts_ms,
            level,
            category,
            target,
            msg,
        });
        let cap = CAPTURE_CAPACITY.load(Ordering::Relaxed);
        while guard.len() > cap {
            guard.pop_front();
        }
    }
}

#[macro_export]
macro_rules! log_at {
    ($level:expr, cat: $cat:expr, $($arg:tt)*) => {{
        if $crate::enabled($level, Some($cat)) {
            $crate::log($level, Some($cat), module_path!(), format_args!($($arg)*));
        }
    }};
    ($level:expr, $($arg:tt)*) => {{
        if $crate::enabled($level, None) {
            $crate::log($level, None, module_path!(), format_args!($($arg)*));
        }
    }};
}

#[macro_export]
macro_rules! log_error {
    ($($arg:tt)*) => {{
        $crate::log_at!($crate::Level::Error, $($arg)*);
    }};
}

#[macro_export]
macro_rules! log_warn {
    ($($arg:tt)*) => {{
        $crate::log_at!($crate::Level::Warn, $($arg)*);
    }};
}

#[macro_export]
macro_rules! log_info {
    ($($arg:tt)*) => {{
        $crate::log_at!($crate::Level::Info, $($arg)*);
    }};
}

#[macro_export]
macro_rules! log_debug {
    ($($arg:tt)*) => {{
        $crate::log_at!($crate::Level::Debug, $($arg)*);
    }};
}

#[macro_export]
macro_rules! log_trace {
    ($($arg:tt)*) => {{
        $crate::log_at!($crate::Level::Trace, $($arg)*);
    }};
}

/// RFC 3339 UTC timestamp with millisecond precision.
struct Timestamp(u64, u32);

impl fmt::Display for Timestamp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let days = (self.0 / 86_400) as i64;
        let secs = self.0 % 86_400;
        let (year, month, day) = civil_from_days(days);
        write!(
            f,
            "{year:04}-{month:02}-{day:02}T{:02}:{:02}:{:02}.{:03}Z",
            secs / 3600,
            (secs % 3600) / 60,
            secs % 60,
            self.1
        )
    }
}

// Howard Hinnant's days-to-civil conversion.
fn civil_from_days(days: i64) -> (i32, u32, u32) {
    let z = days + 719_468;
    let era = if z >= 0 { z } else { z - 146_096 } / 146_097;
    let doe = (z - era * 146_097) as u32;
    let yoe = (doe - doe / 1460 + doe / 36_524 - doe / 146_096) / 365;
    let doy = doe - (365 * yoe + yoe / 4 - yoe / 100);
    let mp = (5 * doy + 2) / 153;
    let day = doy - (153 * mp + 2) / 5 + 1;
    let month = if mp < 10 { mp + 3 } else { mp - 9 };
    let year = yoe as i32 + era as i32 * 400 + i32::from(month <= 2);
    (year, month, day)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_names() {
        assert_eq!(Level::parse("WARNING"), Some(Level::Warn));
        assert_eq!(Level::parse("nope"), None);
        assert_eq!(Format::parse("JSON"), Some(Format::Json));
        assert_eq!(Category::parse("coindb"), Some(Category::CoinDb));
        assert_eq!(Category::parse("net"), None);
    }

    #[test]
    fn timestamp_formats_epoch_days() {
        assert_eq!(Timestamp(0, 5).to_string(), "1970-01-01T00:00:00.005Z");
        assert_eq!(
            Timestamp(951_782_400, 0).to_string(),
            "2000-02-29T00:00:00.000Z"
        );
    }

    #[test]
    fn category_gating_and_capture() {
        set_stderr_enabled(false);
        enable_capture(16);
        init(&LogConfig {
            level: Level::Debug,
            categories: vec![Category::Staking],
            ..LogConfig::default()
        });

        assert!(enabled(Level::Debug, Some(Category::Staking)));
        assert!(!enabled(Level::Debug, Some(Category::Rest)));
        assert!(enabled(Level::Warn, Some(Category::Rest)));
        assert!(!enabled(Level::Trace, None));

        log_debug!(cat: Category::Staking, "kernel {}", 7);
        log_debug!(cat: Category::Rest, "hidden");
        let records = captured(16);
        assert!(records.iter().any(|r| r.msg == "kernel 7"));
        assert!(records.iter().all(|r| r.msg != "hidden"));
    }
}
