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

//! Taproot commitments: witness stack parsing, control blocks, leaf hashes,
//! merkle roots and key tweaks.

use bitcoin::blockdata::script::Script;
use bitcoin::hashes::{sha256, Hash};
use bitcoin::schnorr::TapTweak;
pub use bitcoin::util::taproot::{
    ControlBlock, LeafVersion, TaprootMerkleBranch, TAPROOT_ANNEX_PREFIX,
};
use bitcoin::util::taproot::{TapBranchHash, TapLeafHash, TaprootError as ControlBlockError};
use secp256k1::{KeyPair, XOnlyPublicKey, SECP256K1};

use crate::signature::is_canonical_schnorr;

/// Errors of taproot witness and control block parsing
#[derive(Copy, Clone, PartialEq, Eq, Hash, Debug, Display, Error, From)]
#[display(doc_comments)]
pub enum TaprootError {
    /// witness stack has zero elements
    EmptyWitness,

    /// key path spending witness contains invalid BIP-340 signature of {0}
    /// bytes
    InvalidSignature(usize),

    /// invalid control block. Details: {0}
    #[from]
    ControlBlock(ControlBlockError),

    /// unsupported tapleaf version {0:#04x}
    UnsupportedLeafVersion(u8),

    /// control block does not commit to the script under the output key
    /// derived from it
    CommitmentMismatch,
}

/// Parses control block, accepting only BIP-342 tapscript leaves
pub fn parse_control_block(data: &[u8]) -> Result<ControlBlock, TaprootError> {
    let control_block = ControlBlock::from_slice(data)?;
    match control_block.leaf_version {
        LeafVersion::TapScript => Ok(control_block),
        version => Err(TaprootError::UnsupportedLeafVersion(version.to_consensus())),
    }
}

/// Parsed witness stack for taproot inputs
#[derive(Clone, PartialEq, Eq, Debug)]
pub enum TaprootWitness {
    /// Public key path spending
    KeyPath {
        /// BIP-340 signature with optional sighash byte
        signature: Vec<u8>,
        /// Optional annex, including the annex prefix
        annex: Option<Vec<u8>>,
    },

    /// Script path spending
    ScriptPath {
        /// Witness items satisfying the tapscript
        stack: Vec<Vec<u8>>,
        /// Leaf script
        tapscript: Script,
        /// Serialized control block
        control_block: Vec<u8>,
        /// Optional annex, including the annex prefix
        annex: Option<Vec<u8>>,
    },
}

impl TaprootWitness {
    /// Splits the witness stack into the parts of key path or script path
    /// spending. The last element is an annex if it starts with `0x50` and
    /// the stack has at least two elements.
    pub fn parse(stack: &[Vec<u8>]) -> Result<TaprootWitness, TaprootError> {
        let (annex, stack) = match stack.split_last() {
            None => return Err(TaprootError::EmptyWitness),
            Some((last, rest))
                if !rest.is_empty() && last.first() == Some(&TAPROOT_ANNEX_PREFIX) =>
            {
                (Some(last.clone()), rest)
            }
            Some(_) => (None, stack),
        };
        match stack {
            [] => Err(TaprootError::EmptyWitness),
            [signature] if is_canonical_schnorr(signature) => Ok(TaprootWitness::KeyPath {
                signature: signature.clone(),
                annex,
            }),
            [signature] => Err(TaprootError::InvalidSignature(signature.len())),
            [items @ .., tapscript, control_block] => {
                parse_control_block(control_block)?;
                Ok(TaprootWitness::ScriptPath {
                    stack: items.to_vec(),
                    tapscript: Script::from(tapscript.clone()),
                    control_block: control_block.clone(),
                    annex,
                })
            }
        }
    }

    /// Returns annex, if present
    pub fn annex(&self) -> Option<&[u8]> {
        match self {
            TaprootWitness::KeyPath { annex, .. } | TaprootWitness::ScriptPath { annex, .. } => {
                annex.as_deref()
            }
        }
    }
}

/// Computes hash of a tapscript leaf
#[inline]
pub fn leaf_hash(tapscript: &Script) -> TapLeafHash {
    TapLeafHash::from_script(tapscript, LeafVersion::TapScript)
}

/// Computes script tree root from the leaf hash and merkle branch, combining
/// the nodes in lexicographic order.
pub fn merkle_root(leaf: TapLeafHash, merkle_branch: &[sha256::Hash]) -> TapBranchHash {
    merkle_branch
        .iter()
        .fold(TapBranchHash::from_inner(leaf.into_inner()), |node, step| {
            TapBranchHash::from_node_hashes(sha256::Hash::from_inner(node.into_inner()), *step)
        })
}

/// Constructs P2TR `scriptPubkey` for the internal key and optional script
/// tree root
#[inline]
pub fn output_script(internal_key: XOnlyPublicKey, merkle_root: Option<TapBranchHash>) -> Script {
    Script::new_v1_p2tr(SECP256K1, internal_key, merkle_root)
}

/// Derives P2TR `scriptPubkey` from a leaf script and its control block
pub fn script_path_output(tapscript: &Script, control_block: &[u8]) -> Result<Script, TaprootError> {
    let control_block = parse_control_block(control_block)?;
    let root = merkle_root(leaf_hash(tapscript), control_block.merkle_branch.as_inner());
    let (output_key, _) = control_block.internal_key.tap_tweak(SECP256K1, Some(root));
    if !control_block.verify_taproot_commitment(SECP256K1, output_key.to_inner(), tapscript) {
        return Err(TaprootError::CommitmentMismatch);
    }
    Ok(Script::new_v1_p2tr_tweaked(output_key))
}

/// Tweaks key pair for key path spending
#[inline]
pub fn tweak_keypair(keypair: KeyPair, merkle_root: Option<TapBranchHash>) -> KeyPair {
    keypair.tap_tweak(SECP256K1, merkle_root).to_inner()
}

/// Converts public key into BIP-340 x-only form
#[inline]
pub fn x_only(pubkey: &bitcoin::PublicKey) -> XOnlyPublicKey { XOnlyPublicKey::from(pubkey.inner) }
