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

use std::str::FromStr;

use bitcoin::blockdata::script::Script;

use crate::types::{decompile, OP_RETURN};
use crate::{payments, taproot};

/// Script template specifies the way how the `scriptPubkey` is structured and
/// which data are required to satisfy it
#[cfg_attr(
    feature = "serde",
    derive(Serialize, Deserialize),
    serde(crate = "serde_crate", rename_all = "lowercase")
)]
#[derive(Copy, Clone, PartialEq, Eq, PartialOrd, Ord, Debug, Display, Hash)]
pub enum ScriptType {
    /// Bare public key followed by `OP_CHECKSIG`
    #[display("pubkey")]
    P2pk,

    /// Legacy public key hash
    #[display("pubkeyhash")]
    P2pkh,

    /// Bare `m`-of-`n` multisig with `OP_CHECKMULTISIG`
    #[display("multisig")]
    P2ms,

    /// BIP-16 script hash
    #[display("scripthash")]
    P2sh,

    /// Witness v0 public key hash
    #[display("witnesspubkeyhash")]
    P2wpkh,

    /// Witness v0 script hash
    #[display("witnessscripthash")]
    P2wsh,

    /// Witness v1 taproot output; spent with either key path or script path
    #[display("taproot")]
    P2tr,

    /// Tapscript `n`-of-`n` multisig made with `OP_CHECKSIGVERIFY` chain
    #[display("taprootnofn")]
    P2trNofN,

    /// `OP_RETURN` output
    #[display("nulldata")]
    NullData,

    /// BIP-141 witness commitment in coinbase transaction
    #[display("witnesscommitment")]
    WitnessCommitment,

    /// Any other script
    #[display("nonstandard")]
    NonStandard,
}

impl FromStr for ScriptType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(match s {
            "pubkey" => ScriptType::P2pk,
            "pubkeyhash" => ScriptType::P2pkh,
            "multisig" => ScriptType::P2ms,
            "scripthash" => ScriptType::P2sh,
            "witnesspubkeyhash" => ScriptType::P2wpkh,
            "witnessscripthash" => ScriptType::P2wsh,
            "taproot" => ScriptType::P2tr,
            "taprootnofn" => ScriptType::P2trNofN,
            "nulldata" => ScriptType::NullData,
            "witnesscommitment" => ScriptType::WitnessCommitment,
            "nonstandard" => ScriptType::NonStandard,
            other => return Err(other.to_owned()),
        })
    }
}

impl ScriptType {
    /// Templates which hold signatures matched to a list of public keys
    #[inline]
    pub fn is_multisig(self) -> bool { matches!(self, ScriptType::P2ms | ScriptType::P2trNofN) }

    /// Templates committing to a hash of a script revealed at spending time
    #[inline]
    pub fn is_script_hash(self) -> bool { matches!(self, ScriptType::P2sh | ScriptType::P2wsh) }
}

const WITNESS_COMMITMENT_HEADER: [u8; 5] = [0x24, 0xaa, 0x21, 0xa9, 0xed];

fn is_witness_commitment(script: &Script) -> bool {
    let bytes = script.as_bytes();
    bytes.len() > 37 && bytes[0] == OP_RETURN && bytes[1..6] == WITNESS_COMMITMENT_HEADER
}

fn is_null_data(script: &Script) -> bool { script.as_bytes().first() == Some(&OP_RETURN) }

/// Detects template of a `scriptPubkey`.
pub fn classify_output(script: &Script) -> ScriptType {
    if script.is_v0_p2wpkh() {
        ScriptType::P2wpkh
    } else if script.is_v0_p2wsh() {
        ScriptType::P2wsh
    } else if script.is_p2pkh() {
        ScriptType::P2pkh
    } else if script.is_p2sh() {
        ScriptType::P2sh
    } else if payments::p2ms_decode(script).is_some() {
        ScriptType::P2ms
    } else if payments::p2pk_pubkey(script).is_some() {
        ScriptType::P2pk
    } else if is_witness_commitment(script) {
        ScriptType::WitnessCommitment
    } else if is_null_data(script) {
        ScriptType::NullData
    } else if script.is_v1_p2tr() {
        ScriptType::P2tr
    } else if payments::p2tr_nofn_pubkeys(script).is_some() {
        ScriptType::P2trNofN
    } else {
        ScriptType::NonStandard
    }
}

/// Detects template of a `scriptSig`. With `lenient` flag the multisig inputs
/// may contain `OP_0` placeholders instead of the missed signatures.
pub fn classify_input(script: &Script, lenient: bool) -> ScriptType {
    if decompile(script).is_none() {
        ScriptType::NonStandard
    } else if payments::p2pkh_signature(script).is_some() {
        ScriptType::P2pkh
    } else if payments::p2sh_redeem_checked(script, lenient).is_some() {
        ScriptType::P2sh
    } else if payments::p2ms_signatures(script, lenient).is_some() {
        ScriptType::P2ms
    } else if payments::p2pk_signature(script).is_some() {
        ScriptType::P2pk
    } else {
        ScriptType::NonStandard
    }
}

/// Detects template of a witness stack. With `lenient` flag the multisig
/// satisfactions may contain empty placeholders instead of the missed
/// signatures.
pub fn classify_witness(stack: &[Vec<u8>], lenient: bool) -> ScriptType {
    if payments::p2wpkh_signature(stack).is_some() {
        ScriptType::P2wpkh
    } else if payments::p2wsh_redeem_checked(stack, lenient).is_some() {
        ScriptType::P2wsh
    } else if taproot::TaprootWitness::parse(stack).is_ok() {
        ScriptType::P2tr
    } else {
        ScriptType::NonStandard
    }
}
