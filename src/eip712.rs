//! EIP-712 typed-data hashing and secp256k1 signer recovery for EIP-2612
//! `Permit` messages.
//!
//! Domain parameters are explicit inputs: `{name, version, chainId,
//! verifyingContract}`. Recovery follows the Ethereum convention: the
//! signer address is the last 20 bytes of Keccak-256 over the uncompressed
//! public key without its `0x04` prefix.

use k256::ecdsa::{RecoveryId, Signature, SigningKey, VerifyingKey};
use sha3::{Digest, Keccak256};
use thiserror::Error;

use crate::primitives::{Address, Balance};

/// Domain version used by the permit-enabled tokens this sale accepts.
pub const DOMAIN_VERSION: &str = "1";

pub const DOMAIN_TYPE: &str =
    "EIP712Domain(string name,string version,uint256 chainId,address verifyingContract)";

pub const PERMIT_TYPE: &str =
    "Permit(address owner,address spender,uint256 value,uint256 nonce,uint256 deadline)";

/// secp256k1 group order n, halved. Signatures with `s` above it are malleable.
const HALF_ORDER: [u8; 32] = [
    0x7f, 0xff, 0xff, 0xff, 0xff, 0xff, 0xff, 0xff, 0xff, 0xff, 0xff, 0xff, 0xff, 0xff, 0xff, 0xff,
    0x5d, 0x57, 0x6e, 0x73, 0x57, 0xa4, 0x50, 0x1d, 0xdf, 0xe9, 0x2f, 0x46, 0x68, 0x1b, 0x20, 0xa0,
];

/// secp256k1 group order n.
const ORDER: [u8; 32] = [
    0xff, 0xff, 0xff, 0xff, 0xff, 0xff, 0xff, 0xff, 0xff, 0xff, 0xff, 0xff, 0xff, 0xff, 0xff, 0xfe,
    0xba, 0xae, 0xdc, 0xe6, 0xaf, 0x48, 0xa0, 0x3b, 0xbf, 0xd2, 0x5e, 0x8c, 0xd0, 0x36, 0x41, 0x41,
];

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum SignatureError {
    #[error("invalid recovery byte v={0}")]
    InvalidV(u8),
    #[error("malleable signature: s is in the upper half order")]
    HighS,
    #[error("malformed signature")]
    Malformed,
    #[error("public key recovery failed")]
    Recovery,
}

/// Typed-data domain of a permit-enabled token.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Eip712Domain {
    pub name: String,
    pub version: String,
    pub chain_id: u64,
    pub verifying_contract: Address,
}

impl Eip712Domain {
    pub fn new(name: impl Into<String>, chain_id: u64, verifying_contract: Address) -> Self {
        Self {
            name: name.into(),
            version: DOMAIN_VERSION.to_string(),
            chain_id,
            verifying_contract,
        }
    }

    pub fn separator(&self) -> [u8; 32] {
        let mut enc = Vec::with_capacity(32 * 5);
        enc.extend_from_slice(&keccak256(DOMAIN_TYPE.as_bytes()));
        enc.extend_from_slice(&keccak256(self.name.as_bytes()));
        enc.extend_from_slice(&keccak256(self.version.as_bytes()));
        enc.extend_from_slice(&word_u128(u128::from(self.chain_id)));
        enc.extend_from_slice(&word_address(&self.verifying_contract));
        keccak256(&enc)
    }
}

/// EIP-2612 permit message.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Permit {
    pub owner: Address,
    pub spender: Address,
    pub value: Balance,
    pub nonce: u64,
    pub deadline: u64,
}

impl Permit {
    pub fn struct_hash(&self) -> [u8; 32] {
        let mut enc = Vec::with_capacity(32 * 6);
        enc.extend_from_slice(&keccak256(PERMIT_TYPE.as_bytes()));
        enc.extend_from_slice(&word_address(&self.owner));
        enc.extend_from_slice(&word_address(&self.spender));
        enc.extend_from_slice(&word_u128(self.value));
        enc.extend_from_slice(&word_u128(u128::from(self.nonce)));
        enc.extend_from_slice(&word_u128(u128::from(self.deadline)));
        keccak256(&enc)
    }
}

/// (v, r, s) as produced by an Ethereum typed-data signer.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct PermitSignature {
    pub v: u8,
    pub r: [u8; 32],
    pub s: [u8; 32],
}

/// keccak256("\x19\x01" || domainSeparator || structHash)
pub fn typed_data_digest(domain: &Eip712Domain, permit: &Permit) -> [u8; 32] {
    let mut enc = Vec::with_capacity(2 + 64);
    enc.extend_from_slice(&[0x19, 0x01]);
    enc.extend_from_slice(&domain.separator());
    enc.extend_from_slice(&permit.struct_hash());
    keccak256(&enc)
}

/// Recover the address that signed `permit` under `domain`.
pub fn recover_signer(
    domain: &Eip712Domain,
    permit: &Permit,
    sig: &PermitSignature,
) -> Result<Address, SignatureError> {
    let parity = match sig.v {
        27 | 28 => sig.v - 27,
        0 | 1 => sig.v,
        other => return Err(SignatureError::InvalidV(other)),
    };
    if sig.s > HALF_ORDER {
        return Err(SignatureError::HighS);
    }
    let mut rs = [0u8; 64];
    rs[..32].copy_from_slice(&sig.r);
    rs[32..].copy_from_slice(&sig.s);
    let signature = Signature::from_slice(&rs).map_err(|_| SignatureError::Malformed)?;
    let recovery_id = RecoveryId::from_byte(parity).ok_or(SignatureError::InvalidV(sig.v))?;

    let digest = typed_data_digest(domain, permit);
    let key = VerifyingKey::recover_from_prehash(&digest, &signature, recovery_id)
        .map_err(|_| SignatureError::Recovery)?;
    Ok(address_of(&key))
}

/// Sign `permit` the way a wallet's typed-data signer does (low-s, v = 27/28).
pub fn sign_permit(
    key: &SigningKey,
    domain: &Eip712Domain,
    permit: &Permit,
) -> Result<PermitSignature, SignatureError> {
    let digest = typed_data_digest(domain, permit);
    let (signature, recovery_id) = key
        .sign_prehash_recoverable(&digest)
        .map_err(|_| SignatureError::Malformed)?;

    let bytes = signature.to_bytes();
    let mut r = [0u8; 32];
    let mut s = [0u8; 32];
    r.copy_from_slice(&bytes[..32]);
    s.copy_from_slice(&bytes[32..]);

    let mut parity = recovery_id.to_byte();
    if parity > 1 {
        // x-reduced recovery ids cannot be expressed as v = 27/28
        return Err(SignatureError::Recovery);
    }
    if s > HALF_ORDER {
        s = sub_be(&ORDER, &s);
        parity ^= 1;
    }
    Ok(PermitSignature { v: 27 + parity, r, s })
}

/// Ethereum-style address of a secp256k1 public key.
pub fn address_of(key: &VerifyingKey) -> Address {
    let point = key.to_encoded_point(false);
    let hash = keccak256(&point.as_bytes()[1..]);
    let mut out = [0u8; 20];
    out.copy_from_slice(&hash[12..]);
    Address(out)
}

pub fn keccak256(data: &[u8]) -> [u8; 32] {
    let mut hasher = Keccak256::new();
    hasher.update(data);
    let out = hasher.finalize();
    let mut h = [0u8; 32];
    h.copy_from_slice(&out);
    h
}

#[inline]
fn word_address(a: &Address) -> [u8; 32] {
    let mut w = [0u8; 32];
    w[12..].copy_from_slice(a.as_bytes());
    w
}

#[inline]
fn word_u128(v: u128) -> [u8; 32] {
    let mut w = [0u8; 32];
    w[16..].copy_from_slice(&v.to_be_bytes());
    w
}

/// a - b over 32-byte big-endian integers; requires a >= b.
fn sub_be(a: &[u8; 32], b: &[u8; 32]) -> [u8; 32] {
    let mut out = [0u8; 32];
    let mut borrow = 0i16;
    for i in (0..32).rev() {
        let mut d = i16::from(a[i]) - i16::from(b[i]) - borrow;
        if d < 0 {
            d += 256;
            borrow = 1;
        } else {
            borrow = 0;
        }
        out[i] = d as u8;
    }
    out
}
