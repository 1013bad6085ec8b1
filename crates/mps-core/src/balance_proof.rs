//! Balance proof encoding, signing and signer recovery.
//!
//! A balance proof attests `{receiver, open_block, balance}` for one channel.
//! The canonical bytes match Solidity's
//! `abi.encodePacked(address receiver, uint32 open_block, uint192 balance, address contract)`,
//! so the channel contract can re-derive and check the same signature.
//!
//! Elliptic-curve work sits behind [`SignatureScheme`]; [`Secp256k1Scheme`]
//! is the alloy-backed default.

use std::fmt;
use std::sync::Arc;

use alloy::primitives::{Address, Signature, U256};
use alloy::signers::local::PrivateKeySigner;
use alloy::signers::SignerSync;

use crate::constants::MAX_BALANCE;
use crate::error::ChannelError;

/// Length of the canonical encoding: 20 + 4 + 24 + 20.
pub const ENCODED_LEN: usize = 68;

/// secp256k1 curve order N / 2; signatures with s > this are malleable (EIP-2).
const SECP256K1_N_DIV_2: U256 = U256::from_limbs([
    0xDFE92F46681B20A0,
    0x5D576E7357A4501D,
    0xFFFFFFFFFFFFFFFF,
    0x7FFFFFFFFFFFFFFF,
]);

/// Signing capability injected into the codec.
pub trait SignatureScheme: Send + Sync {
    /// Sign canonical proof bytes with the given key.
    fn sign(&self, message: &[u8], key: &PrivateKeySigner) -> Result<Signature, ChannelError>;

    /// Recover the address that produced `signature` over `message`.
    fn recover_address(&self, message: &[u8], signature: &[u8]) -> Result<Address, ChannelError>;
}

/// EIP-191 personal-message signatures over secp256k1.
#[derive(Debug, Clone, Copy, Default)]
pub struct Secp256k1Scheme;

impl SignatureScheme for Secp256k1Scheme {
    fn sign(&self, message: &[u8], key: &PrivateKeySigner) -> Result<Signature, ChannelError> {
        key.sign_message_sync(message)
            .map_err(|e| ChannelError::SigningFailed(e.to_string()))
    }

    fn recover_address(&self, message: &[u8], signature: &[u8]) -> Result<Address, ChannelError> {
        if signature.len() != 65 {
            return Err(ChannelError::InvalidSignature(format!(
                "signature must be 65 bytes, got {}",
                signature.len()
            )));
        }

        let sig = Signature::from_raw(signature)
            .map_err(|e| ChannelError::InvalidSignature(format!("malformed signature: {e}")))?;

        if sig.s() > SECP256K1_N_DIV_2 {
            return Err(ChannelError::InvalidSignature(
                "high-s signature rejected".to_string(),
            ));
        }

        sig.recover_address_from_msg(message)
            .map_err(|e| ChannelError::InvalidSignature(format!("recovery failed: {e}")))
    }
}

/// Encodes and checks balance proofs for one channel contract deployment.
#[derive(Clone)]
pub struct BalanceProofCodec {
    contract_address: Address,
    scheme: Arc<dyn SignatureScheme>,
}

impl fmt::Debug for BalanceProofCodec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BalanceProofCodec")
            .field("contract_address", &self.contract_address)
            .finish_non_exhaustive()
    }
}

impl BalanceProofCodec {
    /// Codec using the default secp256k1 scheme.
    pub fn new(contract_address: Address) -> Self {
        Self::with_scheme(contract_address, Arc::new(Secp256k1Scheme))
    }

    pub fn with_scheme(contract_address: Address, scheme: Arc<dyn SignatureScheme>) -> Self {
        Self {
            contract_address,
            scheme,
        }
    }

    pub fn contract_address(&self) -> Address {
        self.contract_address
    }

    /// Canonical bytes for a proof. Fails if `balance` does not fit in 192 bits.
    pub fn encode(
        &self,
        receiver: Address,
        open_block: u32,
        balance: U256,
    ) -> Result<Vec<u8>, ChannelError> {
        if balance > MAX_BALANCE {
            return Err(ChannelError::BalanceOverflow(balance));
        }

        let balance_bytes = balance.to_be_bytes::<32>();
        let mut out = Vec::with_capacity(ENCODED_LEN);
        out.extend_from_slice(receiver.as_slice());
        out.extend_from_slice(&open_block.to_be_bytes());
        out.extend_from_slice(&balance_bytes[8..]);
        out.extend_from_slice(self.contract_address.as_slice());
        Ok(out)
    }

    pub fn sign(&self, message: &[u8], key: &PrivateKeySigner) -> Result<Signature, ChannelError> {
        self.scheme.sign(message, key)
    }

    pub fn recover_address(
        &self,
        message: &[u8],
        signature: &[u8],
    ) -> Result<Address, ChannelError> {
        self.scheme.recover_address(message, signature)
    }

    /// Encode and sign in one step.
    pub fn sign_balance(
        &self,
        receiver: Address,
        open_block: u32,
        balance: U256,
        key: &PrivateKeySigner,
    ) -> Result<BalanceProof, ChannelError> {
        let message = self.encode(receiver, open_block, balance)?;
        let signature = self.sign(&message, key)?;
        Ok(BalanceProof {
            receiver,
            open_block,
            balance,
            signature,
        })
    }

    /// Encode a triple and recover who signed it.
    pub fn recover_balance_signer(
        &self,
        receiver: Address,
        open_block: u32,
        balance: U256,
        signature: &[u8],
    ) -> Result<Address, ChannelError> {
        let message = self.encode(receiver, open_block, balance)?;
        self.recover_address(&message, signature)
    }
}

/// A signed balance proof. Immutable; a higher balance needs a new proof.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BalanceProof {
    receiver: Address,
    open_block: u32,
    balance: U256,
    signature: Signature,
}

impl BalanceProof {
    pub fn receiver(&self) -> Address {
        self.receiver
    }

    pub fn open_block(&self) -> u32 {
        self.open_block
    }

    pub fn balance(&self) -> U256 {
        self.balance
    }

    pub fn signature(&self) -> &Signature {
        &self.signature
    }

    pub fn signature_bytes(&self) -> [u8; 65] {
        self.signature.as_bytes()
    }

    pub fn signature_hex(&self) -> String {
        encode_signature_hex(&self.signature)
    }

    /// Check that the proof was signed by `expected`.
    pub fn verify_signer(
        &self,
        codec: &BalanceProofCodec,
        expected: Address,
    ) -> Result<(), ChannelError> {
        let signer = codec.recover_balance_signer(
            self.receiver,
            self.open_block,
            self.balance,
            &self.signature_bytes(),
        )?;
        if signer != expected {
            return Err(ChannelError::InvalidSignature(format!(
                "signed by {signer:#x}, expected {expected:#x}"
            )));
        }
        Ok(())
    }
}

/// Encode a signature as `0x`-prefixed hex (65 bytes, v = 27 or 28).
pub fn encode_signature_hex(sig: &Signature) -> String {
    format!("0x{}", alloy::hex::encode(sig.as_bytes()))
}

/// Decode a hex signature, with or without `0x` prefix.
pub fn decode_signature_hex(value: &str) -> Result<Vec<u8>, ChannelError> {
    let trimmed = value.trim();
    alloy::hex::decode(trimmed.strip_prefix("0x").unwrap_or(trimmed))
        .map_err(|e| ChannelError::InvalidSignature(format!("invalid hex: {e}")))
}

#[cfg(test)]
mod tests {
    use super::*;

    const CONTRACT: Address = Address::new([0xcc; 20]);

    fn codec() -> BalanceProofCodec {
        BalanceProofCodec::new(CONTRACT)
    }

    #[test]
    fn test_sign_and_recover_roundtrip() {
        let sender = PrivateKeySigner::random();
        let receiver = Address::repeat_byte(0xbb);
        let codec = codec();

        for balance in [0u64, 1, 80, 1_000_000] {
            let message = codec.encode(receiver, 100, U256::from(balance)).unwrap();
            let sig = codec.sign(&message, &sender).unwrap();
            let recovered = codec.recover_address(&message, &sig.as_bytes()).unwrap();
            assert_eq!(recovered, sender.address());
        }
    }

    #[test]
    fn test_encoding_is_deterministic_and_packed() {
        let codec = codec();
        let a = codec
            .encode(Address::repeat_byte(0xbb), 100, U256::from(80u64))
            .unwrap();
        let b = codec
            .encode(Address::repeat_byte(0xbb), 100, U256::from(80u64))
            .unwrap();
        assert_eq!(a, b);
        assert_eq!(a.len(), ENCODED_LEN);
        assert_eq!(&a[..20], Address::repeat_byte(0xbb).as_slice());
        assert_eq!(&a[20..24], &100u32.to_be_bytes());
        assert_eq!(a[47], 80);
        assert_eq!(&a[48..], CONTRACT.as_slice());
    }

    #[test]
    fn test_encoding_differs_per_field() {
        let codec = codec();
        let base = codec
            .encode(Address::repeat_byte(0xbb), 100, U256::from(80u64))
            .unwrap();
        let other_balance = codec
            .encode(Address::repeat_byte(0xbb), 100, U256::from(81u64))
            .unwrap();
        let other_block = codec
            .encode(Address::repeat_byte(0xbb), 101, U256::from(80u64))
            .unwrap();
        let other_contract = BalanceProofCodec::new(Address::repeat_byte(0xdd))
            .encode(Address::repeat_byte(0xbb), 100, U256::from(80u64))
            .unwrap();
        assert_ne!(base, other_balance);
        assert_ne!(base, other_block);
        assert_ne!(base, other_contract);
    }

    #[test]
    fn test_balance_overflow_rejected() {
        let codec = codec();
        assert!(codec.encode(Address::ZERO, 1, MAX_BALANCE).is_ok());
        let err = codec
            .encode(Address::ZERO, 1, MAX_BALANCE + U256::from(1u64))
            .unwrap_err();
        assert!(matches!(err, ChannelError::BalanceOverflow(_)));
    }

    #[test]
    fn test_recover_rejects_wrong_length() {
        let err = codec().recover_address(b"message", &[0u8; 64]).unwrap_err();
        assert!(matches!(err, ChannelError::InvalidSignature(_)));
    }

    #[test]
    fn test_recover_rejects_high_s() {
        let sig = Signature::new(U256::from(42u64), U256::MAX, false);
        let err = codec()
            .recover_address(b"message", &sig.as_bytes())
            .unwrap_err();
        assert!(matches!(err, ChannelError::InvalidSignature(msg) if msg.contains("high-s")));
    }

    #[test]
    fn test_proof_for_other_balance_recovers_other_address() {
        let sender = PrivateKeySigner::random();
        let codec = codec();
        let proof = codec
            .sign_balance(Address::repeat_byte(0xbb), 100, U256::from(80u64), &sender)
            .unwrap();

        let recovered = codec
            .recover_balance_signer(
                Address::repeat_byte(0xbb),
                100,
                U256::from(90u64),
                &proof.signature_bytes(),
            )
            .unwrap_or(Address::ZERO);
        assert_ne!(recovered, sender.address());
    }

    #[test]
    fn test_verify_signer() {
        let sender = PrivateKeySigner::random();
        let codec = codec();
        let proof = codec
            .sign_balance(Address::repeat_byte(0xbb), 100, U256::from(80u64), &sender)
            .unwrap();

        assert!(proof.verify_signer(&codec, sender.address()).is_ok());
        assert!(matches!(
            proof.verify_signer(&codec, Address::repeat_byte(0x01)),
            Err(ChannelError::InvalidSignature(_))
        ));
    }

    #[test]
    fn test_signature_hex_roundtrip() {
        let sender = PrivateKeySigner::random();
        let proof = codec()
            .sign_balance(Address::repeat_byte(0xbb), 1, U256::from(5u64), &sender)
            .unwrap();
        let hex = proof.signature_hex();
        assert!(hex.starts_with("0x"));
        assert_eq!(hex.len(), 132);
        let bytes = decode_signature_hex(&hex).unwrap();
        assert_eq!(bytes, proof.signature_bytes().to_vec());
        assert!(decode_signature_hex("0xzz").is_err());
    }

    struct EchoScheme;

    impl SignatureScheme for EchoScheme {
        fn sign(&self, _: &[u8], _: &PrivateKeySigner) -> Result<Signature, ChannelError> {
            Ok(Signature::new(U256::from(1u64), U256::from(1u64), false))
        }

        fn recover_address(&self, message: &[u8], _: &[u8]) -> Result<Address, ChannelError> {
            Ok(Address::from_slice(&message[..20]))
        }
    }

    #[test]
    fn test_custom_scheme_is_used() {
        let codec = BalanceProofCodec::with_scheme(CONTRACT, Arc::new(EchoScheme));
        let signer = codec
            .recover_balance_signer(Address::repeat_byte(0x42), 1, U256::from(1u64), &[])
            .unwrap();
        assert_eq!(signer, Address::repeat_byte(0x42));
    }
}
