use flsd_consensus::Hash256;
use flsd_primitives::encoding::{decode, encode, DecodeError, Decoder, Encoder};
use flsd_primitives::outpoint::OutPoint;
use flsd_primitives::transaction::{Transaction, TxIn, TxOut};

const MAX_COMPACT_SIZE: u64 = 0x0200_0000;

struct Lcg {
    state: u64,
}

impl Lcg {
    fn new(seed: u64) -> Self {
        Self { state: seed }
    }

    fn next_u64(&mut self) -> u64 {
        self.state = self.state.wrapping_mul(6364136223846793005).wrapping_add(1);
        self.state
    }

    fn next_u8(&mut self) -> u8 {
        (self.next_u64() >> 33) as u8
    }

    fn gen_range(&mut self, max: usize) -> usize {
        if max == 0 {
            0
        } else {
            (self.next_u64() % max as u64) as usize
        }
    }
}

fn random_hash(rng: &mut Lcg) -> Hash256 {
    std::array::from_fn(|_| rng.next_u8())
}

fn random_bytes(rng: &mut Lcg, max_len: usize) -> Vec<u8> {
    let len = rng.gen_range(max_len + 1);
    (0..len).map(|_| rng.next_u8()).collect()
}

fn random_transaction(rng: &mut Lcg) -> Transaction {
    let vin = (0..rng.gen_range(4) + 1)
        .map(|_| TxIn {
            prevout: OutPoint::new(random_hash(rng), rng.next_u64() as u32),
            script_sig: random_bytes(rng, 80),
            sequence: rng.next_u64() as u32,
        })
        .collect();
    let vout = (0..rng.gen_range(4) + 1)
        .map(|_| TxOut::new((rng.next_u64() >> 12) as i64, random_bytes(rng, 40)))
        .collect();
    Transaction {
        version: 1 + rng.gen_range(2) as i32,
        vin,
        vout,
        lock_time: rng.next_u64() as u32,
    }
}

#[test]
fn compactsize_roundtrip_random() {
    let mut rng = Lcg::new(0x5eed);
    for _ in 0..1_000 {
        let value = rng.next_u64() % MAX_COMPACT_SIZE;
        let mut encoder = Encoder::new();
        encoder.write_varint(value);
        let bytes = encoder.into_inner();
        let mut decoder = Decoder::new(&bytes);
        assert_eq!(decoder.read_varint().expect("decode compactsize"), value);
        assert!(decoder.is_empty());
    }
}

#[test]
fn compactsize_rejects_oversized() {
    let bytes = [0xfe, 0x01, 0x00, 0x00, 0x02];
    let err = Decoder::new(&bytes).read_varint().expect_err("oversized");
    assert_eq!(err, DecodeError::SizeTooLarge);
}

#[test]
fn randomized_transactions_survive_encoding_and_reject_truncation() {
    let mut rng = Lcg::new(0x1234_5678);
    for _ in 0..200 {
        let tx = random_transaction(&mut rng);
        let encoded = encode(&tx);
        assert_eq!(decode::<Transaction>(&encoded).expect("decode"), tx);

        let cut = rng.gen_range(encoded.len());
        assert!(decode::<Transaction>(&encoded[..cut]).is_err());

        let mut padded = encoded.clone();
        padded.push(0);
        assert_eq!(
            decode::<Transaction>(&padded),
            Err(DecodeError::TrailingBytes)
        );
    }
}
