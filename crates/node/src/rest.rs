//! REST endpoints served next to the node, starting with `getutxos`.

use std::sync::{Arc, Mutex};

use flsd_chainstate::{CoinLookup, Ledger, LedgerError, MAX_LOOKUP_OUTPOINTS};
use flsd_consensus::money::{Amount, COIN};
use flsd_consensus::params::hash256_from_hex;
use flsd_consensus::Network;
use flsd_log::{log_debug, Category};
use flsd_primitives::address::script_pubkey_to_address;
use flsd_primitives::encoding::{Decoder, Encodable, Encoder};
use flsd_primitives::hex::{bytes_to_hex, hash256_to_hex, hex_to_bytes};
use flsd_primitives::outpoint::OutPoint;
use flsd_script::asm::script_to_asm;
use flsd_script::standard::{classify_script_pubkey, required_sigs};
use flsd_storage::KeyValueStore;
use serde::Serialize;
use serde_json::{Number, Value};

use crate::mempool::Mempool;

pub const GETUTXOS_PREFIX: &str = "/rest/getutxos";

pub const HTTP_OK: u16 = 200;
pub const HTTP_NOT_FOUND: u16 = 404;
pub const HTTP_INTERNAL_SERVER_ERROR: u16 = 500;

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum RetFormat {
    Undef,
    Binary,
    Hex,
    Json,
}

const FORMAT_NAMES: [(RetFormat, &str); 3] = [
    (RetFormat::Binary, "bin"),
    (RetFormat::Hex, "hex"),
    (RetFormat::Json, "json"),
];

#[derive(Clone, Debug, Eq, PartialEq)]
pub struct RestResponse {
    pub status: u16,
    pub content_type: &'static str,
    pub body: Vec<u8>,
}

#[derive(Clone, Debug, Eq, PartialEq)]
pub struct RestError {
    pub status: u16,
    pub message: String,
}

impl RestError {
    pub fn new(status: u16, message: impl Into<String>) -> Self {
        Self {
            status,
            message: message.into(),
        }
    }

    fn internal(message: impl Into<String>) -> Self {
        Self::new(HTTP_INTERNAL_SERVER_ERROR, message)
    }

    pub fn into_response(self) -> RestResponse {
        RestResponse {
            status: self.status,
            content_type: "text/plain",
            body: format!("{}\r\n", self.message).into_bytes(),
        }
    }
}

impl std::fmt::Display for RestError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{} ({})", self.message, self.status)
    }
}

impl std::error::Error for RestError {}

/// Node state the REST handlers may read.
pub trait RestContext: Send + Sync {
    fn network(&self) -> Network;

    fn lookup_coins(
        &self,
        outpoints: &[OutPoint],
        check_mempool: bool,
    ) -> Result<CoinLookup, LedgerError>;
}

/// [`RestContext`] over the node's ledger and pending pool.
pub struct LedgerRestContext<S> {
    ledger: Arc<Ledger<S>>,
    mempool: Arc<Mutex<Mempool>>,
    network: Network,
}

impl<S> LedgerRestContext<S> {
    pub fn new(ledger: Arc<Ledger<S>>, mempool: Arc<Mutex<Mempool>>, network: Network) -> Self {
        Self {
            ledger,
            mempool,
            network,
        }
    }
}

impl<S: KeyValueStore> RestContext for LedgerRestContext<S> {
    fn network(&self) -> Network {
        self.network
    }

    fn lookup_coins(
        &self,
        outpoints: &[OutPoint],
        check_mempool: bool,
    ) -> Result<CoinLookup, LedgerError> {
        // Ledger first, then the pool; every caller takes them in this order.
        let state = self.ledger.read()?;
        let mempool = self.mempool.lock().map_err(|_| LedgerError::Poisoned)?;
        state.lookup_coins(outpoints, &*mempool, check_mempool)
    }
}

pub type RestHandler =
    fn(&dyn RestContext, &str, &[u8]) -> Result<RestResponse, RestError>;

/// Maps URI prefixes to handlers. The first registered prefix that matches
/// wins, and the handler gets the rest of the URI.
#[derive(Default)]
pub struct RestRouter {
    handlers: Vec<(String, RestHandler)>,
}

impl RestRouter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, prefix: &str, handler: RestHandler) {
        log_debug!(cat: Category::Rest, "registering handler for {prefix}");
        self.handlers.push((prefix.to_string(), handler));
    }

    pub fn unregister(&mut self, prefix: &str) -> bool {
        let before = self.handlers.len();
        self.handlers.retain(|(registered, _)| registered != prefix);
        before != self.handlers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.handlers.is_empty()
    }

    pub fn prefixes(&self) -> Vec<&str> {
        self.handlers
            .iter()
            .map(|(prefix, _)| prefix.as_str())
            .collect()
    }

    pub fn dispatch(&self, ctx: &dyn RestContext, uri: &str, body: &[u8]) -> RestResponse {
        let Some((prefix, handler)) = self
            .handlers
            .iter()
            .find(|(prefix, _)| uri.starts_with(prefix.as_str()))
        else {
            return RestError::new(HTTP_NOT_FOUND, "not found").into_response();
        };
        match handler(ctx, &uri[prefix.len()..], body) {
            Ok(response) => response,
            Err(err) => {
                log_debug!(cat: Category::Rest, "rejected {uri}: {}", err.message);
                err.into_response()
            }
        }
    }
}

/// Registers every REST endpoint the node serves.
pub fn register_rest_handlers(router: &mut RestRouter) {
    router.register(GETUTXOS_PREFIX, rest_getutxos);
}

pub fn unregister_rest_handlers(router: &mut RestRouter) {
    router.unregister(GETUTXOS_PREFIX);
}

/// Splits `path.ext` into the path and the requested output format.
pub fn parse_data_format(uri_part: &str) -> (&str, RetFormat) {
    let mut parts = uri_part.split('.');
    let path = parts.next().unwrap_or_default();
    let format = parts
        .next()
        .and_then(|ext| {
            FORMAT_NAMES
                .iter()
                .find(|(_, name)| *name == ext)
                .map(|(format, _)| *format)
        })
        .unwrap_or(RetFormat::Undef);
    (path, format)
}

pub fn available_data_formats() -> String {
    FORMAT_NAMES
        .iter()
        .map(|(_, name)| format!(".{name}"))
        .collect::<Vec<_>>()
        .join(", ")
}

/// A decoded `getutxos` request.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct UtxoRequest {
    pub format: RetFormat,
    pub check_mempool: bool,
    pub outpoints: Vec<OutPoint>,
}

/// Parses the URI remainder after `/rest/getutxos` and the request body.
pub fn parse_getutxos_request(uri_part: &str, body: &[u8]) -> Result<UtxoRequest, RestError> {
    let (path, format) = parse_data_format(uri_part);
    let uri_parts: Vec<&str> = if path.len() > 1 {
        path[1..].split('/').collect()
    } else {
        Vec::new()
    };

    if body.is_empty() && uri_parts.is_empty() {
        return Err(RestError::internal("Error: empty request"));
    }

    let mut check_mempool = false;
    let mut outpoints = Vec::new();
    let mut input_parsed = false;
    if let Some(first) = uri_parts.first() {
        check_mempool = *first == "checkmempool";
        let skip = usize::from(check_mempool);
        for part in &uri_parts[skip..] {
            outpoints.push(parse_uri_outpoint(part)?);
        }
        if outpoints.is_empty() {
            return Err(RestError::internal("Error: empty request"));
        }
        input_parsed = true;
    }

    match format {
        RetFormat::Binary | RetFormat::Hex => {
            let raw = if format == RetFormat::Hex {
                let text = std::str::from_utf8(body).map_err(|_| RestError::internal("Parse error"))?;
                hex_to_bytes(text).ok_or_else(|| RestError::internal("Parse error"))?
            } else {
                body.to_vec()
            };
            if !raw.is_empty() {
                if input_parsed {
                    return Err(RestError::internal(
                        "Combination of URI scheme inputs and raw post data is not allowed",
                    ));
                }
                let mut decoder = Decoder::new(&raw);
                check_mempool = decoder
                    .read_bool()
                    .map_err(|_| RestError::internal("Parse error"))?;
                outpoints = decoder
                    .read_vec::<OutPoint>()
                    .map_err(|_| RestError::internal("Parse error"))?;
            }
        }
        RetFormat::Json => {
            if !input_parsed {
                return Err(RestError::internal("Error: empty request"));
            }
        }
        RetFormat::Undef => {
            return Err(RestError::new(
                HTTP_NOT_FOUND,
                format!(
                    "output format not found (available: {})",
                    available_data_formats()
                ),
            ));
        }
    }

    if outpoints.len() > MAX_LOOKUP_OUTPOINTS {
        return Err(RestError::internal(format!(
            "Error: max outpoints exceeded (max: {MAX_LOOKUP_OUTPOINTS}, tried: {})",
            outpoints.len()
        )));
    }

    Ok(UtxoRequest {
        format,
        check_mempool,
        outpoints,
    })
}

/// `<txid>-<n>`. Without a dash the whole part serves as both halves, which
/// never parses.
fn parse_uri_outpoint(part: &str) -> Result<OutPoint, RestError> {
    let (txid, output) = part.split_once('-').unwrap_or((part, part));
    let index = output
        .parse::<i32>()
        .map_err(|_| RestError::internal("Parse error"))?;
    if txid.is_empty() || txid.len() % 2 != 0 || !txid.bytes().all(|b| b.is_ascii_hexdigit()) {
        return Err(RestError::internal("Parse error"));
    }
    let hash = hash256_from_hex(txid).map_err(|_| RestError::internal("Parse error"))?;
    Ok(OutPoint::new(hash, index as u32))
}

/// Wire form of a found coin: a zero version tag, the height, the output.
struct UtxoRecord<'a> {
    height: u32,
    out: &'a flsd_primitives::transaction::TxOut,
}

impl Encodable for UtxoRecord<'_> {
    fn consensus_encode(&self, encoder: &mut Encoder) {
        encoder.write_u32_le(0);
        encoder.write_u32_le(self.height);
        self.out.consensus_encode(encoder);
    }
}

pub fn encode_getutxos_binary(lookup: &CoinLookup) -> Vec<u8> {
    let records: Vec<UtxoRecord<'_>> = lookup
        .coins
        .iter()
        .map(|coin| UtxoRecord {
            height: coin.height,
            out: &coin.out,
        })
        .collect();
    let mut encoder = Encoder::new();
    encoder.write_i32_le(lookup.chain_height);
    encoder.write_hash_le(&lookup.chain_tip);
    encoder.write_var_bytes(&lookup.bitmap());
    encoder.write_vec(&records);
    encoder.into_inner()
}

#[derive(Serialize)]
struct UtxoJson {
    height: i32,
    value: Value,
    #[serde(rename = "scriptPubKey")]
    script_pubkey: Value,
}

#[derive(Serialize)]
struct GetUtxosJson {
    #[serde(rename = "chainHeight")]
    chain_height: i32,
    #[serde(rename = "chaintipHash")]
    chaintip_hash: String,
    bitmap: String,
    utxos: Vec<UtxoJson>,
}

pub fn getutxos_json(lookup: &CoinLookup, network: Network) -> Value {
    let response = GetUtxosJson {
        chain_height: lookup.chain_height,
        chaintip_hash: hash256_to_hex(&lookup.chain_tip),
        bitmap: lookup.bitmap_string(),
        utxos: lookup
            .coins
            .iter()
            .map(|coin| UtxoJson {
                height: coin.height as i32,
                value: amount_to_value(coin.out.value),
                script_pubkey: script_pubkey_json(&coin.out.script_pubkey, network),
            })
            .collect(),
    };
    serde_json::to_value(response).unwrap_or(Value::Null)
}

fn amount_to_value(amount: Amount) -> Value {
    let value = amount as f64 / COIN as f64;
    Number::from_f64(value)
        .map(Value::Number)
        .unwrap_or(Value::Number(0.into()))
}

pub fn script_pubkey_json(script: &[u8], network: Network) -> Value {
    let mut map = serde_json::Map::new();
    map.insert("asm".to_string(), Value::String(script_to_asm(script)));
    map.insert("hex".to_string(), Value::String(bytes_to_hex(script)));
    map.insert(
        "type".to_string(),
        Value::String(classify_script_pubkey(script).name().to_string()),
    );
    if let Some(req_sigs) = required_sigs(script) {
        map.insert("reqSigs".to_string(), Value::Number(req_sigs.into()));
    }
    if let Some(address) = script_pubkey_to_address(script, network) {
        map.insert(
            "addresses".to_string(),
            Value::Array(vec![Value::String(address)]),
        );
    }
    Value::Object(map)
}

pub fn rest_getutxos(
    ctx: &dyn RestContext,
    uri_part: &str,
    body: &[u8],
) -> Result<RestResponse, RestError> {
    let request = parse_getutxos_request(uri_part, body)?;
    let lookup = ctx
        .lookup_coins(&request.outpoints, request.check_mempool)
        .map_err(|err| RestError::internal(err.to_string()))?;

    match request.format {
        RetFormat::Binary => Ok(RestResponse {
            status: HTTP_OK,
            content_type: "application/octet-stream",
            body: encode_getutxos_binary(&lookup),
        }),
        RetFormat::Hex => Ok(RestResponse {
            status: HTTP_OK,
            content_type: "text/plain",
            body: format!("{}\n", bytes_to_hex(&encode_getutxos_binary(&lookup))).into_bytes(),
        }),
        RetFormat::Json => Ok(RestResponse {
            status: HTTP_OK,
            content_type: "application/json",
            body: format!("{}\n", getutxos_json(&lookup, ctx.network())).into_bytes(),
        }),
        RetFormat::Undef => Err(RestError::new(
            HTTP_NOT_FOUND,
            format!(
                "output format not found (available: {})",
                available_data_formats()
            ),
        )),
    }
}
