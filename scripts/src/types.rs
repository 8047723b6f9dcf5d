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

use amplify::Wrapper;
use bitcoin::blockdata::opcodes;
use bitcoin::blockdata::script::{Builder, Instruction, Script};
use bitcoin::{ScriptHash, WScriptHash};

use crate::classify::{self, ScriptType};

pub(crate) const OP_1: u8 = opcodes::all::OP_PUSHNUM_1.to_u8();
pub(crate) const OP_16: u8 = opcodes::all::OP_PUSHNUM_16.to_u8();
pub(crate) const OP_RETURN: u8 = opcodes::all::OP_RETURN.to_u8();
pub(crate) const OP_CHECKSIG: u8 = opcodes::all::OP_CHECKSIG.to_u8();
pub(crate) const OP_CHECKSIGVERIFY: u8 = opcodes::all::OP_CHECKSIGVERIFY.to_u8();
pub(crate) const OP_CHECKMULTISIG: u8 = opcodes::all::OP_CHECKMULTISIG.to_u8();

/// Single element of a decompiled script
#[derive(Copy, Clone, PartialEq, Eq, Debug)]
pub enum Chunk<'script> {
    /// Data pushed by one of push opcodes; `OP_0` pushes an empty slice
    Push(&'script [u8]),

    /// Any non-push opcode, including `OP_1NEGATE` and `OP_1`..`OP_16`
    Op(u8),
}

impl<'script> Chunk<'script> {
    /// Returns pushed data, if the chunk is a data push
    #[inline]
    pub fn push_bytes(self) -> Option<&'script [u8]> {
        match self {
            Chunk::Push(data) => Some(data),
            Chunk::Op(_) => None,
        }
    }

    /// Returns number encoded with `OP_1`..`OP_16`, if any
    #[inline]
    pub fn small_int(self) -> Option<usize> {
        match self {
            Chunk::Op(op) if (OP_1..=OP_16).contains(&op) => Some((op - OP_1 + 1) as usize),
            _ => None,
        }
    }
}

/// Splits script into a sequence of data pushes and opcodes. Returns `None`
/// if the script contains truncated push.
pub fn decompile(script: &Script) -> Option<Vec<Chunk<'_>>> {
    script
        .instructions()
        .map(|instruction| match instruction.ok()? {
            Instruction::PushBytes(data) => Some(Chunk::Push(data)),
            Instruction::Op(op) => Some(Chunk::Op(op.to_u8())),
        })
        .collect()
}

/// Detects scripts consisting only of data pushes and small integer opcodes
pub fn is_push_only(chunks: &[Chunk]) -> bool {
    chunks.iter().all(|chunk| match chunk {
        Chunk::Push(_) => true,
        Chunk::Op(op) => matches!(
            opcodes::All::from(*op).classify(opcodes::ClassifyContext::Legacy),
            opcodes::Class::PushNum(_)
        ),
    })
}

fn push_minimal(builder: Builder, data: &[u8]) -> Builder {
    match data {
        [n @ 1..=16] => builder.push_int(*n as i64),
        [0x81] => builder.push_opcode(opcodes::all::OP_PUSHNUM_NEG1),
        _ => builder.push_slice(data),
    }
}

/// Assembles script from chunks using minimal push encoding
pub fn compile(chunks: &[Chunk]) -> Script {
    chunks
        .iter()
        .fold(Builder::new(), |builder, chunk| match chunk {
            Chunk::Push(data) => push_minimal(builder, data),
            Chunk::Op(op) => builder.push_opcode(opcodes::All::from(*op)),
        })
        .into_script()
}

/// Assembles push-only script from a stack of items; empty items are
/// encoded as `OP_0`
pub fn compile_pushes<T: AsRef<[u8]>>(items: &[T]) -> Script {
    items
        .iter()
        .fold(Builder::new(), |builder, item| push_minimal(builder, item.as_ref()))
        .into_script()
}

/// A representation of `scriptPubkey` data used during signing procedure:
/// the script which is committed to by the signature hash
#[derive(
    Wrapper, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Default, Debug, Display, From
)]
#[cfg_attr(
    feature = "serde",
    derive(Serialize, Deserialize),
    serde(crate = "serde_crate", transparent)
)]
#[display("{0}", alt = "{0:x}")]
#[wrapper(LowerHex, UpperHex)]
pub struct ScriptCode(Script);

/// A content of `scriptPubkey` from a transaction output
#[derive(
    Wrapper, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Default, Debug, Display, From
)]
#[cfg_attr(
    feature = "serde",
    derive(Serialize, Deserialize),
    serde(crate = "serde_crate", transparent)
)]
#[display("{0}", alt = "{0:x}")]
#[wrapper(LowerHex, UpperHex)]
pub struct PubkeyScript(Script);

impl PubkeyScript {
    /// Detects template of the `scriptPubkey`
    #[inline]
    pub fn script_type(&self) -> ScriptType { classify::classify_output(self.as_inner()) }
}

/// A content of `scriptSig` from a transaction input
#[derive(
    Wrapper, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Default, Debug, Display, From
)]
#[cfg_attr(
    feature = "serde",
    derive(Serialize, Deserialize),
    serde(crate = "serde_crate", transparent)
)]
#[display("{0}", alt = "{0:x}")]
#[wrapper(LowerHex, UpperHex)]
pub struct SigScript(Script);

impl SigScript {
    /// Constructs push-only `scriptSig` from the stack items
    #[inline]
    pub fn from_stack<T: AsRef<[u8]>>(items: &[T]) -> SigScript {
        SigScript(compile_pushes(items))
    }
}

/// Redeem script as part of the `witness` or `scriptSig` structure; it is
/// hashed for P2(W)SH output.
#[derive(
    Wrapper, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Default, Debug, Display, From
)]
#[cfg_attr(
    feature = "serde",
    derive(Serialize, Deserialize),
    serde(crate = "serde_crate", transparent)
)]
#[display("{0}", alt = "{0:x}")]
#[wrapper(LowerHex, UpperHex)]
pub struct RedeemScript(Script);

impl RedeemScript {
    /// Computes script commitment hash which participates in [`PubkeyScript`]
    #[inline]
    pub fn script_hash(&self) -> ScriptHash { self.as_inner().script_hash() }

    /// Generates [`PubkeyScript`] matching given `redeemScript`
    #[inline]
    pub fn to_p2sh(&self) -> PubkeyScript { Script::new_p2sh(&self.script_hash()).into() }
}

/// A content of the script from `witness` structure; en equivalent of
/// `redeemScript` for witness-based transaction inputs. Tapscript leafs are
/// carried with the same type.
#[derive(
    Wrapper, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Default, Debug, Display, From
)]
#[cfg_attr(
    feature = "serde",
    derive(Serialize, Deserialize),
    serde(crate = "serde_crate", transparent)
)]
#[display("{0}", alt = "{0:x}")]
#[wrapper(LowerHex, UpperHex)]
pub struct WitnessScript(Script);

impl WitnessScript {
    /// Computes script commitment which participates in witness program
    #[inline]
    pub fn script_hash(&self) -> WScriptHash { self.as_inner().wscript_hash() }

    /// Generates [`PubkeyScript`] matching given `witnessScript` for native
    /// SegWit outputs.
    #[inline]
    pub fn to_p2wsh(&self) -> PubkeyScript { Script::new_v0_p2wsh(&self.script_hash()).into() }

    /// Generates [`PubkeyScript`] matching given `witnessScript` for legacy
    /// P2WSH-in-P2SH outputs.
    #[inline]
    pub fn to_p2sh_wsh(&self) -> PubkeyScript { RedeemScript::from(self.clone()).to_p2sh() }
}

impl From<WitnessScript> for RedeemScript {
    fn from(witness_script: WitnessScript) -> Self {
        RedeemScript(Script::new_v0_p2wsh(&witness_script.script_hash()))
    }
}
