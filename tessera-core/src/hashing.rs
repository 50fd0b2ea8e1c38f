//! Multihash hashers and CID construction
//!
//! Blocks are addressed by CIDv1 whose multihash names the digest algorithm.
//! [`Hashers`] maps multihash codes to [`Hasher`] implementations; the
//! defaults cover identity, SHA-2, SHA-3 and BLAKE3.

use cid::Cid;
use multihash::Multihash;
use sha2::{Digest, Sha256, Sha512};
use sha3::{Sha3_256, Sha3_384, Sha3_512};
use std::collections::HashMap;
use std::fmt;
use std::marker::PhantomData;
use std::sync::Arc;
use thiserror::Error;

use crate::error::BlockError;
use crate::verify::BlockValidator;

/// See: https://github.com/multiformats/multicodec/blob/master/table.csv
pub const IDENTITY_CODE: u64 = 0x00;
pub const SHA2_256_CODE: u64 = 0x12;
pub const SHA2_512_CODE: u64 = 0x13;
pub const SHA3_512_CODE: u64 = 0x14;
pub const SHA3_384_CODE: u64 = 0x15;
pub const SHA3_256_CODE: u64 = 0x16;
pub const BLAKE3_CODE: u64 = 0x1e;

/// Raw binary codec for leaf blocks
pub const RAW_CODEC: u64 = 0x55;

/// Largest digest a CID can carry
pub const MAX_DIGEST_SIZE: usize = 64;

#[derive(Debug, Error)]
pub enum CidError {
    #[error("Invalid CID: {0}")]
    InvalidCid(String),

    #[error("Multihash error: {0}")]
    Multihash(String),
}

/// Digest function registered under a multihash code
pub trait Hasher: Send + Sync {
    fn code(&self) -> u64;

    fn name(&self) -> &'static str;

    fn digest(&self, data: &[u8]) -> Vec<u8>;
}

/// Adapter for RustCrypto `Digest` implementations
pub struct DigestHasher<D> {
    code: u64,
    name: &'static str,
    _digest: PhantomData<fn() -> D>,
}

impl<D> DigestHasher<D> {
    pub const fn new(code: u64, name: &'static str) -> Self {
        Self {
            code,
            name,
            _digest: PhantomData,
        }
    }
}

impl<D: Digest + 'static> Hasher for DigestHasher<D> {
    fn code(&self) -> u64 {
        self.code
    }

    fn name(&self) -> &'static str {
        self.name
    }

    fn digest(&self, data: &[u8]) -> Vec<u8> {
        D::digest(data).to_vec()
    }
}

pub struct Blake3Hasher;

impl Hasher for Blake3Hasher {
    fn code(&self) -> u64 {
        BLAKE3_CODE
    }

    fn name(&self) -> &'static str {
        "blake3"
    }

    fn digest(&self, data: &[u8]) -> Vec<u8> {
        blake3::hash(data).as_bytes().to_vec()
    }
}

/// The "digest" is the data itself
pub struct IdentityHasher;

impl Hasher for IdentityHasher {
    fn code(&self) -> u64 {
        IDENTITY_CODE
    }

    fn name(&self) -> &'static str {
        "identity"
    }

    fn digest(&self, data: &[u8]) -> Vec<u8> {
        data.to_vec()
    }
}

/// Registry of hashers keyed by multihash code
#[derive(Clone)]
pub struct Hashers {
    by_code: HashMap<u64, Arc<dyn Hasher>>,
}

impl Hashers {
    /// A registry with nothing registered
    pub fn empty() -> Self {
        Self {
            by_code: HashMap::new(),
        }
    }

    /// Register `hasher`, returning whatever it replaced
    pub fn register(&mut self, hasher: Arc<dyn Hasher>) -> Option<Arc<dyn Hasher>> {
        self.by_code.insert(hasher.code(), hasher)
    }

    pub fn with(mut self, hasher: Arc<dyn Hasher>) -> Self {
        self.register(hasher);
        self
    }

    pub fn get(&self, code: u64) -> Option<Arc<dyn Hasher>> {
        self.by_code.get(&code).cloned()
    }

    pub fn by_name(&self, name: &str) -> Option<Arc<dyn Hasher>> {
        self.by_code
            .values()
            .find(|hasher| hasher.name() == name)
            .cloned()
    }

    /// Build a validator for `cid`, failing if its algorithm is not registered
    pub fn validator(&self, cid: &Cid) -> Result<BlockValidator, BlockError> {
        BlockValidator::new(*cid, self.get(cid.hash().code()))
    }
}

impl Default for Hashers {
    fn default() -> Self {
        Self::empty()
            .with(Arc::new(IdentityHasher))
            .with(Arc::new(DigestHasher::<Sha256>::new(SHA2_256_CODE, "sha2-256")))
            .with(Arc::new(DigestHasher::<Sha512>::new(SHA2_512_CODE, "sha2-512")))
            .with(Arc::new(DigestHasher::<Sha3_256>::new(SHA3_256_CODE, "sha3-256")))
            .with(Arc::new(DigestHasher::<Sha3_384>::new(SHA3_384_CODE, "sha3-384")))
            .with(Arc::new(DigestHasher::<Sha3_512>::new(SHA3_512_CODE, "sha3-512")))
            .with(Arc::new(Blake3Hasher))
    }
}

impl fmt::Debug for Hashers {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut names: Vec<_> = self.by_code.values().map(|hasher| hasher.name()).collect();
        names.sort_unstable();
        f.debug_struct("Hashers").field("registered", &names).finish()
    }
}

/// Compute a CIDv1 for `data` under `hasher` and `codec`
pub fn cid_for(hasher: &dyn Hasher, codec: u64, data: &[u8]) -> Result<Cid, CidError> {
    let digest = hasher.digest(data);

    let mh = Multihash::<MAX_DIGEST_SIZE>::wrap(hasher.code(), &digest)
        .map_err(|e| CidError::Multihash(format!("Failed to create multihash: {}", e)))?;

    Ok(Cid::new_v1(codec, mh))
}

/// Raw-codec SHA-256 CID, the common case for leaf blocks
pub fn sha256_cid(data: &[u8]) -> Result<Cid, CidError> {
    cid_for(
        &DigestHasher::<Sha256>::new(SHA2_256_CODE, "sha2-256"),
        RAW_CODEC,
        data,
    )
}

/// Identity CID embedding `data` directly; fails above 64 bytes
pub fn identity_cid(codec: u64, data: &[u8]) -> Result<Cid, CidError> {
    cid_for(&IdentityHasher, codec, data)
}

/// Parse a CID from bytes
pub fn parse_cid(bytes: &[u8]) -> Result<Cid, CidError> {
    Cid::try_from(bytes).map_err(|e| CidError::InvalidCid(e.to_string()))
}

/// Parse a CID from string
pub fn parse_cid_str(s: &str) -> Result<Cid, CidError> {
    s.parse()
        .map_err(|e| CidError::InvalidCid(format!("{}", e)))
}
