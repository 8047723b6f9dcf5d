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

use bitcoin::util::address::WitnessVersion;
use bitcoin::util::taproot::TapBranchHash;
use bitcoin::{PublicKey, Script, TxOut};
use secp256k1::XOnlyPublicKey;
use txbuilder_scripts::taproot::x_only;
use txbuilder_scripts::{ScriptType, SighashFlag};

use crate::Value;

/// Public key occupying a signature slot
#[derive(Copy, Clone, PartialEq, Eq, Hash, Debug, From)]
pub enum SlotKey {
    /// Full public key used by ECDSA signatures and taproot key path
    #[from]
    Full(PublicKey),

    /// BIP-340 key from a tapscript
    #[from]
    XOnly(XOnlyPublicKey),
}

impl Display for SlotKey {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        match self {
            SlotKey::Full(pk) => Display::fmt(pk, f),
            SlotKey::XOnly(xonly) => Display::fmt(xonly, f),
        }
    }
}

impl SlotKey {
    /// Returns x-only form of the key
    pub fn to_x_only(self) -> XOnlyPublicKey {
        match self {
            SlotKey::Full(pk) => x_only(&pk),
            SlotKey::XOnly(xonly) => xonly,
        }
    }

    /// Returns full public key, if known
    pub fn to_full(self) -> Option<PublicKey> {
        match self {
            SlotKey::Full(pk) => Some(pk),
            SlotKey::XOnly(_) => None,
        }
    }

    /// Serializes key in the form it is pushed into scripts
    pub fn to_bytes(self) -> Vec<u8> {
        match self {
            SlotKey::Full(pk) => pk.to_bytes(),
            SlotKey::XOnly(xonly) => xonly.serialize().to_vec(),
        }
    }

    /// Compares keys; keys of different forms are compared by their x-only
    /// representation.
    pub fn matches(self, other: SlotKey) -> bool {
        match (self, other) {
            (SlotKey::Full(a), SlotKey::Full(b)) => a == b,
            (a, b) => a.to_x_only() == b.to_x_only(),
        }
    }
}

/// Public key paired with its signature, if any. Slot without signature is a
/// "hole" waiting to be signed.
#[derive(Clone, PartialEq, Eq, Hash, Debug, Default)]
pub struct SigSlot {
    /// Public key, if known
    pub pubkey: Option<SlotKey>,
    /// Serialized signature with sighash flag
    pub signature: Option<Vec<u8>>,
}

impl SigSlot {
    /// Constructs unsigned slot for a key
    #[inline]
    pub fn hole(pubkey: impl Into<SlotKey>) -> SigSlot {
        SigSlot {
            pubkey: Some(pubkey.into()),
            signature: None,
        }
    }

    /// Constructs slot from a key and a signature; empty signatures are
    /// treated as holes.
    pub fn with(pubkey: Option<SlotKey>, signature: Vec<u8>) -> SigSlot {
        SigSlot {
            pubkey,
            signature: if signature.is_empty() { None } else { Some(signature) },
        }
    }

    /// Detects slots without signature
    #[inline]
    pub fn is_hole(&self) -> bool { self.signature.is_none() }
}

/// Normalized information about a transaction input and the output it spends
#[derive(Clone, PartialEq, Eq, Debug, Default)]
pub struct ExpandedInput<V: Value = u64> {
    /// Type of the spent output
    pub script_type: Option<ScriptType>,
    /// `scriptPubkey` of the spent output
    pub prev_out_script: Option<Script>,
    /// Public keys with their signatures, in the script order
    pub slots: Vec<SigSlot>,
    /// Recovered signatures which are not yet aligned with public keys
    pub unmatched: Vec<Vec<u8>>,
    /// Redeem script of P2SH outputs
    pub redeem_script: Option<Script>,
    /// Type of the redeem script
    pub redeem_script_type: Option<ScriptType>,
    /// Witness script of P2WSH outputs or taproot leaf script
    pub witness_script: Option<Script>,
    /// Type of the witness script
    pub witness_script_type: Option<ScriptType>,
    /// Serialized taproot control block
    pub control_block: Option<Vec<u8>>,
    /// Taproot annex, including its prefix byte
    pub annex: Option<Vec<u8>>,
    /// Root of the script tree committed by taproot output key
    pub tap_merkle_root: Option<TapBranchHash>,
    /// Amount of the spent output
    pub value: Option<V>,
    /// Witness version of the spending; `None` for legacy inputs
    pub witness_version: Option<WitnessVersion>,
    /// Number of signatures required by multisig scripts
    pub threshold: Option<usize>,
    /// Script committed by the signature hash
    pub sign_script: Option<Script>,
    /// Type of the innermost signed script
    pub sign_type: Option<ScriptType>,
}

impl<V: Value> ExpandedInput<V> {
    /// Constructs record for inputs spending non-standard outputs
    pub(crate) fn nonstandard(prev_out_script: Option<&Script>) -> ExpandedInput<V> {
        ExpandedInput {
            script_type: Some(ScriptType::NonStandard),
            prev_out_script: prev_out_script.cloned(),
            ..default!()
        }
    }

    /// Detects whether the input is prepared for signing
    pub fn can_sign(&self) -> bool {
        self.sign_script.is_some()
            && self.sign_type.is_some()
            && !self.slots.is_empty()
            && self.slots.iter().all(|slot| slot.pubkey.is_some())
            && self.unmatched.is_empty()
            && (self.witness_version.is_none() || self.value.is_some())
    }

    /// Detects taproot script path spendings
    #[inline]
    pub fn is_script_path(&self) -> bool {
        self.witness_version == Some(WitnessVersion::V1) && self.witness_script.is_some()
    }

    /// Iterates over all signatures of the input, including not yet aligned
    /// ones
    pub fn signatures(&self) -> impl Iterator<Item = &[u8]> + '_ {
        self.slots
            .iter()
            .filter_map(|slot| slot.signature.as_deref())
            .chain(self.unmatched.iter().map(Vec::as_slice))
    }

    /// Returns sighash flags of all signatures present in the input
    pub fn sighash_flags(&self) -> impl Iterator<Item = SighashFlag> + '_ {
        self.signatures().filter_map(SighashFlag::with_signature)
    }

    /// Detects presence of any signatures
    #[inline]
    pub fn has_signatures(&self) -> bool { self.signatures().next().is_some() }

    /// Returns spent output, if both its script and amount are known
    pub fn prevout(&self) -> Option<TxOut> {
        Some(TxOut {
            value: self.value?.to_sat(),
            script_pubkey: self.prev_out_script.clone()?,
        })
    }
}
