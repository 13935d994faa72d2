//! Command line and `flsd.conf` parsing.

use std::collections::HashMap;
use std::fs;
use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::path::{Path, PathBuf};

use flsd_consensus::money::{money_range, Amount, COIN};
use flsd_consensus::{chain_params, Network};
use flsd_log::{Category, Format, Level, LogConfig};

pub const DEFAULT_DATA_DIR: &str = "data";
pub const CONF_FILE_NAME: &str = "flsd.conf";
pub const DEFAULT_STAKE_SPLIT_THRESHOLD: Amount = 2000 * COIN;

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum Backend {
    Memory,
    Fjall,
}

impl Backend {
    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "memory" => Some(Self::Memory),
            "fjall" => Some(Self::Fjall),
            _ => None,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Memory => "memory",
            Self::Fjall => "fjall",
        }
    }
}

#[derive(Clone, Debug)]
pub struct Config {
    pub backend: Backend,
    pub data_dir: PathBuf,
    pub conf_path: PathBuf,
    pub network: Network,
    pub log_level: Level,
    pub log_format: Format,
    pub log_timestamps: bool,
    pub debug_categories: Vec<Category>,
    pub rest_addr: Option<SocketAddr>,
    /// Reported only. Nothing in this node builds coinstakes.
    pub stake_split_threshold: Amount,
}

impl Config {
    pub fn log_config(&self) -> LogConfig {
        LogConfig {
            level: self.log_level,
            format: self.log_format,
            timestamps: self.log_timestamps,
            categories: self.debug_categories.clone(),
        }
    }

    pub fn db_path(&self) -> PathBuf {
        self.data_dir.join("db")
    }
}

#[derive(Debug)]
pub enum CliAction {
    Run(Config),
    /// One query through the REST router without binding a socket.
    Rest {
        uri: String,
        body_hex: Option<String>,
        config: Config,
    },
    Info(Config),
    PrintHelp,
    PrintVersion,
}

pub fn parse_args() -> Result<CliAction, String> {
    parse_args_from(std::env::args().skip(1))
}

pub fn parse_args_from<I>(raw_args: I) -> Result<CliAction, String>
where
    I: IntoIterator<Item = String>,
{
    let mut backend = Backend::Fjall;
    let mut backend_set = false;
    let mut data_dir: Option<PathBuf> = None;
    let mut conf_path: Option<PathBuf> = None;
    let mut network = Network::Mainnet;
    let mut network_set = false;
    let mut log_level = Level::Info;
    let mut log_level_set = false;
    let mut log_format = Format::Text;
    let mut log_format_set = false;
    let mut log_timestamps = true;
    let mut log_timestamps_set = false;
    let mut debug_categories: Vec<Category> = Vec::new();
    let mut rest_enabled = false;
    let mut rest_addr: Option<SocketAddr> = None;
    let mut rest_set = false;
    let mut stake_split_threshold = DEFAULT_STAKE_SPLIT_THRESHOLD;
    let mut stake_split_threshold_set = false;
    let mut command: Option<String> = None;
    let mut positional: Vec<String> = Vec::new();
    let mut body_hex: Option<String> = None;
    let mut args = raw_args.into_iter().peekable();

    if let Some(first) = args.peek().map(|value| value.as_str()) {
        match first {
            "help" => return Ok(CliAction::PrintHelp),
            "version" => return Ok(CliAction::PrintVersion),
            "run" | "rest" | "info" => command = args.next(),
            _ => {}
        }
    }

    while let Some(arg) = args.next() {
        match arg.as_str() {
            "--help" | "-h" => return Ok(CliAction::PrintHelp),
            "--version" | "-V" => return Ok(CliAction::PrintVersion),
            "--backend" => {
                let value = args
                    .next()
                    .ok_or_else(|| format!("missing value for --backend\n{}", usage()))?;
                backend = Backend::parse(&value)
                    .ok_or_else(|| format!("invalid backend '{value}'\n{}", usage()))?;
                backend_set = true;
            }
            "--data-dir" | "--datadir" => {
                let value = args
                    .next()
                    .ok_or_else(|| format!("missing value for --data-dir\n{}", usage()))?;
                data_dir = Some(PathBuf::from(value));
            }
            "--conf" => {
                let value = args
                    .next()
                    .ok_or_else(|| format!("missing value for --conf\n{}", usage()))?;
                conf_path = Some(PathBuf::from(value));
            }
            "--network" => {
                let value = args
                    .next()
                    .ok_or_else(|| format!("missing value for --network\n{}", usage()))?;
                network = Network::parse(&value).ok_or_else(|| {
                    format!("invalid network '{value}' (expected main|test|regtest)\n{}", usage())
                })?;
                network_set = true;
            }
            "--testnet" => {
                network = Network::Testnet;
                network_set = true;
            }
            "--regtest" => {
                network = Network::Regtest;
                network_set = true;
            }
            "--log-level" | "--loglevel" => {
                let value = args
                    .next()
                    .ok_or_else(|| format!("missing value for --log-level\n{}", usage()))?;
                log_level = Level::parse(&value)
                    .ok_or_else(|| format!("invalid log level '{value}'\n{}", usage()))?;
                log_level_set = true;
            }
            "--log-format" | "--logformat" => {
                let value = args
                    .next()
                    .ok_or_else(|| format!("missing value for --log-format\n{}", usage()))?;
                log_format = Format::parse(&value)
                    .ok_or_else(|| format!("invalid log format '{value}'\n{}", usage()))?;
                log_format_set = true;
            }
            "--log-timestamps" | "--logtimestamps" => {
                log_timestamps = true;
                log_timestamps_set = true;
            }
            "--no-log-timestamps" | "--no-logtimestamps" => {
                log_timestamps = false;
                log_timestamps_set = true;
            }
            "--debug" => {
                let value = args
                    .next()
                    .ok_or_else(|| format!("missing value for --debug\n{}", usage()))?;
                push_debug_categories(&mut debug_categories, &value)
                    .map_err(|err| format!("{err}\n{}", usage()))?;
            }
            "--rest" => {
                rest_enabled = true;
                rest_set = true;
                if let Some(value) = args.next_if(|value| !value.starts_with("--")) {
                    let addr = parse_rest_addr(&value).ok_or_else(|| {
                        format!("invalid rest address '{value}'\n{}", usage())
                    })?;
                    rest_addr = Some(addr);
                }
            }
            "--no-rest" => {
                rest_enabled = false;
                rest_set = true;
            }
            "--stake-split-threshold" | "--stakesplitthreshold" => {
                let value = args.next().ok_or_else(|| {
                    format!("missing value for --stake-split-threshold\n{}", usage())
                })?;
                stake_split_threshold = parse_coin_amount(&value).ok_or_else(|| {
                    format!("invalid stake split threshold '{value}'\n{}", usage())
                })?;
                stake_split_threshold_set = true;
            }
            "--body-hex" => {
                let value = args
                    .next()
                    .ok_or_else(|| format!("missing value for --body-hex\n{}", usage()))?;
                body_hex = Some(value);
            }
            other if other.starts_with("--") => {
                return Err(format!("unknown option '{other}'\n{}", usage()));
            }
            _ => positional.push(arg),
        }
    }

    let data_dir = data_dir.unwrap_or_else(|| PathBuf::from(DEFAULT_DATA_DIR));
    let conf_path = conf_path.unwrap_or_else(|| data_dir.join(CONF_FILE_NAME));
    if let Some(conf) = load_conf(&conf_path)? {
        if !network_set {
            if conf_flag(&conf, "regtest", &conf_path)? == Some(true) {
                network = Network::Regtest;
            } else if conf_flag(&conf, "testnet", &conf_path)? == Some(true) {
                network = Network::Testnet;
            }
        }
        if !backend_set {
            if let Some(value) = conf_last(&conf, "backend") {
                backend = Backend::parse(value).ok_or_else(|| {
                    format!("invalid backend '{value}' in {}", conf_path.display())
                })?;
            }
        }
        if !log_level_set {
            if let Some(value) = conf_last(&conf, "loglevel") {
                log_level = Level::parse(value).ok_or_else(|| {
                    format!("invalid loglevel '{value}' in {}", conf_path.display())
                })?;
            }
        }
        if !log_format_set {
            if let Some(value) = conf_last(&conf, "logformat") {
                log_format = Format::parse(value).ok_or_else(|| {
                    format!("invalid logformat '{value}' in {}", conf_path.display())
                })?;
            }
        }
        if !log_timestamps_set {
            if let Some(value) = conf_flag(&conf, "logtimestamps", &conf_path)? {
                log_timestamps = value;
            }
        }
        if debug_categories.is_empty() {
            for value in conf.get("debug").into_iter().flatten() {
                push_debug_categories(&mut debug_categories, value)
                    .map_err(|err| format!("{err} in {}", conf_path.display()))?;
            }
        }
        if !rest_set {
            if let Some(value) = conf_flag(&conf, "rest", &conf_path)? {
                rest_enabled = value;
            }
            if let Some(value) = conf_last(&conf, "restbind") {
                rest_addr = Some(parse_rest_addr(value).ok_or_else(|| {
                    format!("invalid restbind '{value}' in {}", conf_path.display())
                })?);
                rest_enabled = true;
            }
        }
        if !stake_split_threshold_set {
            if let Some(value) = conf_last(&conf, "stakesplitthreshold") {
                stake_split_threshold = parse_coin_amount(value).ok_or_else(|| {
                    format!(
                        "invalid stakesplitthreshold '{value}' in {}",
                        conf_path.display()
                    )
                })?;
            }
        }
    }

    let rest_addr = if rest_enabled {
        let port = chain_params(network).default_rest_port;
        Some(rest_addr.unwrap_or_else(|| SocketAddr::new(IpAddr::V4(Ipv4Addr::LOCALHOST), port)))
    } else {
        None
    };

    let config = Config {
        backend,
        data_dir,
        conf_path,
        network,
        log_level,
        log_format,
        log_timestamps,
        debug_categories,
        rest_addr,
        stake_split_threshold,
    };

    match command.as_deref() {
        Some("rest") => {
            let mut positional = positional.into_iter();
            let uri = positional
                .next()
                .ok_or_else(|| format!("rest requires a uri\n{}", usage()))?;
            if let Some(extra) = positional.next() {
                return Err(format!("unexpected argument '{extra}'\n{}", usage()));
            }
            Ok(CliAction::Rest {
                uri,
                body_hex,
                config,
            })
        }
        _ if body_hex.is_some() => Err(format!("--body-hex only applies to rest\n{}", usage())),
        _ if !positional.is_empty() => Err(format!(
            "unexpected argument '{}'\n{}",
            positional[0],
            usage()
        )),
        Some("info") => Ok(CliAction::Info(config)),
        _ => Ok(CliAction::Run(config)),
    }
}

/// Reads a `key=value` file. A missing file is `Ok(None)`.
pub fn load_conf(path: &Path) -> Result<Option<HashMap<String, Vec<String>>>, String> {
    let contents = match fs::read_to_string(path) {
        Ok(contents) => contents,
        Err(err) if err.kind() == std::io::ErrorKind::NotFound => return Ok(None),
        Err(err) => return Err(format!("failed to read {}: {err}", path.display())),
    };

    let mut out: HashMap<String, Vec<String>> = HashMap::new();
    for raw_line in contents.lines() {
        let mut line = raw_line.trim();
        if let Some(idx) = line.find(['#', ';']) {
            line = line[..idx].trim();
        }
        if line.is_empty() {
            continue;
        }
        let (key, value) = match line.split_once('=') {
            Some((key, value)) => (key.trim(), value.trim()),
            None => (line, "1"),
        };
        if key.is_empty() {
            continue;
        }
        out.entry(key.to_ascii_lowercase())
            .or_default()
            .push(value.to_string());
    }
    Ok(Some(out))
}

pub fn parse_conf_bool(value: &str) -> Option<bool> {
    let value = value.trim();
    if value.is_empty() {
        return Some(true);
    }
    match value.to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" => Some(true),
        "0" | "false" | "no" => Some(false),
        _ => None,
    }
}

fn conf_last<'a>(conf: &'a HashMap<String, Vec<String>>, key: &str) -> Option<&'a str> {
    conf.get(key)?.last().map(String::as_str)
}

fn conf_flag(
    conf: &HashMap<String, Vec<String>>,
    key: &str,
    path: &Path,
) -> Result<Option<bool>, String> {
    match conf_last(conf, key) {
        Some(raw) => parse_conf_bool(raw)
            .map(Some)
            .ok_or_else(|| format!("invalid {key} value '{raw}' in {}", path.display())),
        None => Ok(None),
    }
}

fn push_debug_categories(out: &mut Vec<Category>, value: &str) -> Result<(), String> {
    for name in value.split(',').map(str::trim).filter(|name| !name.is_empty()) {
        let names: Vec<Category> = if name == "all" || name == "1" {
            Category::ALL.to_vec()
        } else {
            vec![Category::parse(name)
                .ok_or_else(|| format!("unknown debug category '{name}'"))?]
        };
        for category in names {
            if !out.contains(&category) {
                out.push(category);
            }
        }
    }
    Ok(())
}

fn parse_rest_addr(value: &str) -> Option<SocketAddr> {
    value.parse::<SocketAddr>().ok()
}

/// Parses a whole-coin amount such as `2000`.
fn parse_coin_amount(value: &str) -> Option<Amount> {
    let coins = value.trim().parse::<i64>().ok()?;
    let amount = coins.checked_mul(COIN)?;
    (amount > 0 && money_range(amount)).then_some(amount)
}

pub fn usage() -> String {
    [
        "Usage:",
        "  flsd [run] [options]",
        "  flsd rest <uri> [--body-hex <hex>] [options]",
        "  flsd info [options]",
        "",
        "Commands:",
        "  run       Open the ledger and serve until interrupted (default)",
        "  rest      Answer one REST request and print the body",
        "  info      Print the chain tip and exit",
        "  help      Print this help and exit",
        "  version   Print version and exit",
        "",
        "Options:",
        "  --help, -h  Print this help and exit",
        "  --version, -V  Print version and exit",
        "  --backend <memory|fjall>  Storage backend (default: fjall)",
        "  --data-dir <path>  Data directory (default: ./data)",
        "  --conf <path>  Config file path (default: <data-dir>/flsd.conf)",
        "  --network <main|test|regtest>  Network (default: main)",
        "  --testnet, --regtest  Shorthand for --network",
        "  --log-level <error|warn|info|debug|trace>  Log level (default: info)",
        "  --log-format <text|json>  Log format (default: text)",
        "  --log-timestamps, --no-log-timestamps  Toggle log timestamps",
        "  --debug <category[,category]>  Enable debug records for coindb, staking, mempool, rest, lifecycle or all",
        "  --rest [addr:port]  Serve REST (default: 127.0.0.1:<network rest port>)",
        "  --no-rest  Disable REST even if flsd.conf enables it",
        "  --stake-split-threshold <coins>  Informational only: recorded and reported by info, no coinstakes are built here (default: 2000)",
        "  --body-hex <hex>  Request body for the rest command",
    ]
    .join("\n")
}
