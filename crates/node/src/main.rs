//! The flsd node: ledger, pending pool, REST and the subsystem lifecycle.

pub mod config;
pub mod http;
pub mod lifecycle;
pub mod mempool;
pub mod rest;

use std::fs::{self, File, OpenOptions};
use std::io::{Read, Seek, SeekFrom, Write};
use std::path::Path;
use std::sync::{Arc, Mutex, RwLock};

use flsd_chainstate::Ledger;
use flsd_consensus::{consensus_params, Network};
use flsd_log::{log_info, log_warn};
use flsd_primitives::hex::{bytes_to_hex, hex_to_bytes};
use flsd_storage::fjall::FjallStore;
use flsd_storage::memory::MemoryStore;
use flsd_storage::{Column, KeyValueStore, ScanResult, StoreError, WriteBatch};
use fs2::FileExt;
use serde_json::json;

use crate::config::{parse_args, usage, Backend, CliAction, Config};
use crate::lifecycle::{Lifecycle, QuorumSubsystem, RestSubsystem};
use crate::mempool::Mempool;
use crate::rest::{register_rest_handlers, LedgerRestContext, RestContext, RestRouter, HTTP_OK};

const DATA_DIR_LOCK_FILE_NAME: &str = ".lock";

pub enum Store {
    Memory(MemoryStore),
    Fjall(FjallStore),
}

impl Store {
    /// Syncs the fjall journal. A no-op for the memory backend.
    pub fn persist(&self) -> Result<(), StoreError> {
        match self {
            Store::Memory(_) => Ok(()),
            Store::Fjall(store) => store.persist(),
        }
    }
}

impl KeyValueStore for Store {
    fn get(&self, column: Column, key: &[u8]) -> Result<Option<Vec<u8>>, StoreError> {
        match self {
            Store::Memory(store) => store.get(column, key),
            Store::Fjall(store) => store.get(column, key),
        }
    }

    fn scan_prefix(&self, column: Column, prefix: &[u8]) -> Result<ScanResult, StoreError> {
        match self {
            Store::Memory(store) => store.scan_prefix(column, prefix),
            Store::Fjall(store) => store.scan_prefix(column, prefix),
        }
    }

    fn write_batch(&self, batch: &WriteBatch) -> Result<(), StoreError> {
        match self {
            Store::Memory(store) => store.write_batch(batch),
            Store::Fjall(store) => store.write_batch(batch),
        }
    }
}

pub fn open_store(backend: Backend, db_path: &Path) -> Result<Store, String> {
    match backend {
        Backend::Memory => Ok(Store::Memory(MemoryStore::new())),
        Backend::Fjall => Ok(Store::Fjall(
            FjallStore::open(db_path).map_err(|err| err.to_string())?,
        )),
    }
}

struct DataDirLock {
    _file: File,
}

fn lock_data_dir(data_dir: &Path) -> Result<DataDirLock, String> {
    let lock_path = data_dir.join(DATA_DIR_LOCK_FILE_NAME);
    let mut file = OpenOptions::new()
        .read(true)
        .write(true)
        .create(true)
        .truncate(false)
        .open(&lock_path)
        .map_err(|err| format!("failed to open lock file {}: {err}", lock_path.display()))?;

    match file.try_lock_exclusive() {
        Ok(()) => {
            let _ = file.set_len(0);
            let _ = file.seek(SeekFrom::Start(0));
            let _ = writeln!(file, "pid={}", std::process::id());
            let _ = file.flush();
            Ok(DataDirLock { _file: file })
        }
        Err(err) if err.kind() == std::io::ErrorKind::WouldBlock => {
            let mut holder = String::new();
            let _ =
                File::open(&lock_path).and_then(|mut reader| reader.read_to_string(&mut holder));
            let holder = holder.trim();
            let suffix = if holder.is_empty() {
                String::new()
            } else {
                format!(" ({holder})")
            };
            Err(format!(
                "data dir {} is already locked (another flsd instance may be running); lock file {}{suffix}",
                data_dir.display(),
                lock_path.display()
            ))
        }
        Err(err) => Err(format!(
            "failed to lock data dir {} (lock file {}): {err}",
            data_dir.display(),
            lock_path.display()
        )),
    }
}

/// Opened node state shared by every command.
struct Node {
    _lock: DataDirLock,
    store: Arc<Store>,
    ledger: Arc<Ledger<Store>>,
    mempool: Arc<Mutex<Mempool>>,
    network: Network,
}

impl Node {
    fn open(config: &Config) -> Result<Self, String> {
        fs::create_dir_all(&config.data_dir).map_err(|err| {
            format!("failed to create data dir {}: {err}", config.data_dir.display())
        })?;
        let lock = lock_data_dir(&config.data_dir)?;
        let store = Arc::new(open_store(config.backend, &config.db_path())?);
        let ledger = Arc::new(Ledger::open(
            Arc::clone(&store),
            consensus_params(config.network),
        ));
        Ok(Self {
            _lock: lock,
            store,
            ledger,
            mempool: Arc::new(Mutex::new(Mempool::new())),
            network: config.network,
        })
    }

    fn rest_context(&self) -> Arc<dyn RestContext> {
        Arc::new(LedgerRestContext::new(
            Arc::clone(&self.ledger),
            Arc::clone(&self.mempool),
            self.network,
        ))
    }

    fn close(self) -> Result<(), String> {
        self.ledger
            .write()
            .and_then(|mut state| state.flush())
            .map_err(|err| format!("ledger flush failed: {err}"))?;
        self.store
            .persist()
            .map_err(|err| format!("store persist failed: {err}"))
    }
}

pub async fn run_entry() -> Result<(), String> {
    match parse_args()? {
        CliAction::PrintHelp => {
            println!("{}", usage());
            Ok(())
        }
        CliAction::PrintVersion => {
            println!("flsd {}", env!("CARGO_PKG_VERSION"));
            Ok(())
        }
        CliAction::Info(config) => {
            flsd_log::init(&config.log_config());
            print_info(&config)
        }
        CliAction::Rest {
            uri,
            body_hex,
            config,
        } => {
            flsd_log::init(&config.log_config());
            rest_once(&config, &uri, body_hex.as_deref())
        }
        CliAction::Run(config) => {
            flsd_log::init(&config.log_config());
            run_with_config(config).await
        }
    }
}

async fn run_with_config(config: Config) -> Result<(), String> {
    let node = Node::open(&config)?;
    {
        let state = node.ledger.read().map_err(|err| err.to_string())?;
        let height = state
            .tip()
            .map_err(|err| err.to_string())?
            .map_or(-1, |tip| tip.height);
        log_info!(
            "flsd {} on {} ({} backend, tip height {height})",
            env!("CARGO_PKG_VERSION"),
            config.network.as_str(),
            config.backend.as_str()
        );
    }
    log_info!(
        "stake split threshold {} coins (informational)",
        config.stake_split_threshold / flsd_consensus::money::COIN
    );

    let router = Arc::new(RwLock::new(RestRouter::new()));
    let mut lifecycle = Lifecycle::new();
    lifecycle.register(Box::new(RestSubsystem::new(
        Arc::clone(&router),
        node.rest_context(),
        config.rest_addr,
    )));
    lifecycle.register(Box::new(QuorumSubsystem::new()));
    lifecycle.start()?;

    if let Err(err) = tokio::signal::ctrl_c().await {
        log_warn!("failed to listen for ctrl-c: {err}");
    }
    log_info!("Signal received; shutting down.");
    lifecycle.shutdown();
    node.close()?;
    log_info!("Shutdown complete.");
    Ok(())
}

fn rest_once(config: &Config, uri: &str, body_hex: Option<&str>) -> Result<(), String> {
    let body = match body_hex {
        Some(raw) => hex_to_bytes(raw).ok_or_else(|| format!("invalid --body-hex '{raw}'"))?,
        None => Vec::new(),
    };
    let node = Node::open(config)?;
    let mut router = RestRouter::new();
    register_rest_handlers(&mut router);
    let response = router.dispatch(node.rest_context().as_ref(), uri, &body);
    if response.status != HTTP_OK {
        let message = String::from_utf8_lossy(&response.body).trim_end().to_string();
        return Err(format!("{} {message}", response.status));
    }
    if response.content_type == "application/octet-stream" {
        println!("{}", bytes_to_hex(&response.body));
    } else {
        print!("{}", String::from_utf8_lossy(&response.body));
    }
    Ok(())
}

fn print_info(config: &Config) -> Result<(), String> {
    let node = Node::open(config)?;
    let tip = {
        let state = node.ledger.read().map_err(|err| err.to_string())?;
        state.tip().map_err(|err| err.to_string())?
    };
    let info = json!({
        "network": config.network.as_str(),
        "backend": config.backend.as_str(),
        "datadir": config.data_dir.display().to_string(),
        "height": tip.as_ref().map_or(-1, |tip| tip.height),
        "bestblockhash": tip.map(|tip| flsd_primitives::hex::hash256_to_hex(&tip.hash)),
        "rest": config.rest_addr.map(|addr| addr.to_string()),
        "stakesplitthreshold": config.stake_split_threshold / flsd_consensus::money::COIN,
    });
    let text = serde_json::to_string_pretty(&info).map_err(|err| err.to_string())?;
    println!("{text}");
    Ok(())
}
