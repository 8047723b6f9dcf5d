// Bitcoin transaction builder library extending bitcoin functionality
// by LNP/BP Association (https://lnp-bp.org)
// Written in 2020-2022 by
//     Dr. Maxim Orlovsky <orlovsky@pandoracore.com>
//
// To the extent possible under law, the author(s) have dedicated all
// copyright and related and neighboring rights to this software to
// the public domain worldwide. This software is distributed without
// any warranty.
//
// You should have received a copy of the Apache-2.0 License
// along with this software.
// If not, see <https://opensource.org/licenses/Apache-2.0>.

use std::fmt::{self, Display, Formatter};

use bitcoin::{EcdsaSighashType, SchnorrSighashType};
use secp256k1::ecdsa;

/// Signature hash type flag, as it is appended to the signatures in
/// `scriptSig` and witness stacks.
///
/// Unlike [`EcdsaSighashType`] and [`SchnorrSighashType`] the flag may hold
/// any byte value, since it is read from untrusted transaction data; use
/// [`SighashFlag::to_ecdsa`] and [`SighashFlag::to_schnorr`] to check whether
/// the flag is defined for a specific signature scheme.
#[derive(Copy, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Debug, Default)]
#[cfg_attr(
    feature = "serde",
    derive(Serialize, Deserialize),
    serde(crate = "serde_crate", transparent)
)]
pub struct SighashFlag(u8);

impl SighashFlag {
    /// BIP-341 default flag, valid only for taproot signatures
    pub const DEFAULT: SighashFlag = SighashFlag(0x00);
    /// Sign all inputs and outputs
    pub const ALL: SighashFlag = SighashFlag(0x01);
    /// Sign all inputs and no outputs
    pub const NONE: SighashFlag = SighashFlag(0x02);
    /// Sign all inputs and the output with the same index
    pub const SINGLE: SighashFlag = SighashFlag(0x03);
    /// Sign only this input and all outputs
    pub const ALL_ANYONECANPAY: SighashFlag = SighashFlag(0x81);
    /// Sign only this input and no outputs
    pub const NONE_ANYONECANPAY: SighashFlag = SighashFlag(0x82);
    /// Sign only this input and the output with the same index
    pub const SINGLE_ANYONECANPAY: SighashFlag = SighashFlag(0x83);

    const ANYONECANPAY: u8 = 0x80;

    /// Constructs flag from its byte value
    #[inline]
    pub const fn from_u8(flag: u8) -> SighashFlag { SighashFlag(flag) }

    /// Returns byte value of the flag
    #[inline]
    pub const fn into_u8(self) -> u8 { self.0 }

    /// Reads the flag committed by a serialized signature: the last byte of
    /// ECDSA and 65-byte BIP-340 signatures; 64-byte BIP-340 signatures
    /// imply [`SighashFlag::DEFAULT`].
    pub fn with_signature(sig: &[u8]) -> Option<SighashFlag> {
        match sig.len() {
            0 => None,
            64 => Some(SighashFlag::DEFAULT),
            _ => sig.last().copied().map(SighashFlag),
        }
    }

    /// Detects `SIGHASH_ANYONECANPAY` modifier
    #[inline]
    pub fn is_anyone_can_pay(self) -> bool { self.0 & Self::ANYONECANPAY != 0 }

    /// Detects `SIGHASH_DEFAULT`
    #[inline]
    pub fn is_default(self) -> bool { self.0 == 0 }

    /// Detects flags which do not commit to any of transaction outputs
    #[inline]
    pub fn is_none(self) -> bool { self.0 & 0x1f == Self::NONE.0 }

    /// Detects flags which commit only to the output with the same index as
    /// the signed input
    #[inline]
    pub fn is_single(self) -> bool { self.0 & 0x1f == Self::SINGLE.0 }

    /// Converts into ECDSA sighash type, if the flag is defined for ECDSA
    pub fn to_ecdsa(self) -> Option<EcdsaSighashType> {
        Some(match self.0 {
            0x01 => EcdsaSighashType::All,
            0x02 => EcdsaSighashType::None,
            0x03 => EcdsaSighashType::Single,
            0x81 => EcdsaSighashType::AllPlusAnyoneCanPay,
            0x82 => EcdsaSighashType::NonePlusAnyoneCanPay,
            0x83 => EcdsaSighashType::SinglePlusAnyoneCanPay,
            _ => return None,
        })
    }

    /// Converts into BIP-341 sighash type, if the flag is defined for taproot
    pub fn to_schnorr(self) -> Option<SchnorrSighashType> {
        Some(match self.0 {
            0x00 => SchnorrSighashType::Default,
            0x01 => SchnorrSighashType::All,
            0x02 => SchnorrSighashType::None,
            0x03 => SchnorrSighashType::Single,
            0x81 => SchnorrSighashType::AllPlusAnyoneCanPay,
            0x82 => SchnorrSighashType::NonePlusAnyoneCanPay,
            0x83 => SchnorrSighashType::SinglePlusAnyoneCanPay,
            _ => return None,
        })
    }
}

impl From<u8> for SighashFlag {
    #[inline]
    fn from(flag: u8) -> Self { SighashFlag(flag) }
}

impl From<SighashFlag> for u8 {
    #[inline]
    fn from(flag: SighashFlag) -> Self { flag.0 }
}

impl From<EcdsaSighashType> for SighashFlag {
    #[inline]
    fn from(ty: EcdsaSighashType) -> Self { SighashFlag(ty.to_u32() as u8) }
}

impl Display for SighashFlag {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        let base = match self.0 & !Self::ANYONECANPAY {
            0x00 if self.0 == 0 => "SIGHASH_DEFAULT",
            0x01 => "SIGHASH_ALL",
            0x02 => "SIGHASH_NONE",
            0x03 => "SIGHASH_SINGLE",
            _ => return write!(f, "{:#04x}", self.0),
        };
        f.write_str(base)?;
        if self.is_anyone_can_pay() {
            f.write_str("|SIGHASH_ANYONECANPAY")?;
        }
        Ok(())
    }
}

/// Checks strict DER encoding of ECDSA signature (without sighash byte) as
/// defined by BIP-66.
pub fn is_der_canonical(der: &[u8]) -> bool {
    // negative and out-of-range integers are parsed as zero and do not
    // serialize back into the same bytes
    ecdsa::Signature::from_der(der)
        .map(|sig| sig.serialize_der().as_ref() == der)
        .unwrap_or(false)
}

/// Checks that the signature from `scriptSig` or witness is a strict-DER
/// encoded ECDSA signature followed by a sighash flag defined for ECDSA.
pub fn is_canonical_ecdsa(sig: &[u8]) -> bool {
    match sig.split_last() {
        Some((flag, der)) => SighashFlag(*flag).to_ecdsa().is_some() && is_der_canonical(der),
        None => false,
    }
}

/// Checks that the signature is a BIP-340 signature, optionally followed by
/// a non-default BIP-341 sighash flag.
pub fn is_canonical_schnorr(sig: &[u8]) -> bool {
    match sig.len() {
        64 => true,
        65 => sig[64] != 0 && SighashFlag(sig[64]).to_schnorr().is_some(),
        _ => false,
    }
}
