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

use bitcoin::util::{address, sighash};
use bitcoin::{Address, Network, OutPoint};
use txbuilder_scripts::{ScriptType, SighashFlag, TaprootError};

use crate::sign::SpendType;

/// Transaction modifications guarded against invalidation of existing
/// signatures
#[derive(Copy, Clone, PartialEq, Eq, Hash, Debug, Display)]
pub enum Mutation {
    /// Adding transaction input
    #[display("adding input")]
    AddInput,

    /// Adding transaction output
    #[display("adding output")]
    AddOutput,

    /// Changing transaction lock time
    #[display("changing lock time")]
    LockTime,

    /// Changing transaction version
    #[display("changing version")]
    Version,
}

/// Errors of transaction builder operations
#[derive(Debug, Display, From)]
#[display(doc_comments)]
pub enum Error {
    /// {0} would invalidate existing signatures
    WouldInvalidateSignatures(Mutation),

    /// outputs of coinbase transactions can't be spent by the builder
    CoinbaseInput,

    /// transaction already contains input spending {0}
    DuplicateInput(OutPoint),

    /// previous transaction has {count} outputs, while output #{vout} is
    /// spent
    VoutOutOfRange { vout: u32, count: usize },

    /// data provided for the previous output {0} do not match data of the
    /// transaction input
    PrevOutMismatch(OutPoint),

    /// {found} previous outputs are provided for a transaction with
    /// {expected} inputs
    PrevOutCountMismatch { expected: usize, found: usize },

    /// invalid address: {0}
    #[from]
    InvalidAddress(address::Error),

    /// address {address} does not belong to {network} network
    AddressNetworkMismatch { address: Address, network: Network },

    /// transaction has no inputs
    NoInputs,

    /// transaction has no outputs
    NoOutputs,

    /// unable to finalize input #{input_index}: {error}
    Build {
        input_index: usize,
        error: BuildError,
    },

    /// transaction fee rate of {fee_rate} sat/vB exceeds the maximum of
    /// {maximum} sat/vB
    AbsurdFee { fee_rate: u64, maximum: u64 },

    /// sum of transaction amounts overflows
    AmountOverflow,

    /// {0}
    #[from]
    Sign(SignError),
}

impl std::error::Error for Error {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Error::WouldInvalidateSignatures(_) => None,
            Error::CoinbaseInput => None,
            Error::DuplicateInput(_) => None,
            Error::VoutOutOfRange { .. } => None,
            Error::PrevOutMismatch(_) => None,
            Error::PrevOutCountMismatch { .. } => None,
            Error::InvalidAddress(err) => Some(err),
            Error::AddressNetworkMismatch { .. } => None,
            Error::NoInputs => None,
            Error::NoOutputs => None,
            Error::Build { error, .. } => Some(error),
            Error::AbsurdFee { .. } => None,
            Error::AmountOverflow => None,
            Error::Sign(err) => Some(err),
        }
    }
}

/// Errors happening during signing of a transaction input
#[derive(Debug, Display)]
#[display("failed to sign input #{input_index} because {error}")]
pub struct SignError {
    /// Signing error originating from a specific transaction input
    pub error: SignInputError,
    /// Index of the transaction input that has generated a error
    pub input_index: usize,
}

impl std::error::Error for SignError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> { Some(&self.error) }
}

impl SignError {
    /// Attributes signing error to a transaction input
    #[inline]
    pub fn with_input_no(error: SignInputError, input_index: usize) -> SignError {
        SignError { error, input_index }
    }
}

/// Errors happening during signing of a single transaction input
#[derive(Debug, Display, From)]
#[display(doc_comments)]
pub enum SignInputError {
    /// transaction has no input with such index
    NoInput,

    /// {spend_type} spending requires {field}
    FieldRequired {
        spend_type: SpendType,
        field: &'static str,
    },

    /// {spend_type} spending doesn't use {field}
    FieldForbidden {
        spend_type: SpendType,
        field: &'static str,
    },

    /// {spend_type} spends {expected} outputs, while the input spends {found}
    /// output
    PrevOutTypeMismatch {
        spend_type: SpendType,
        expected: ScriptType,
        found: ScriptType,
    },

    /// {spend_type} spending does not match {found} script of the input
    SignTypeMismatch {
        spend_type: SpendType,
        found: ScriptType,
    },

    /// amount provided for signing does not match amount known for the input
    ValueMismatch,

    /// redeem script does not match script hash committed by the previous
    /// output
    RedeemScriptMismatch,

    /// witness script does not match script hash committed by the previous
    /// output or the redeem script
    WitnessScriptMismatch,

    /// `scriptPubkey` derived from the tapscript and control block does not
    /// match previous output
    TaprootScriptMismatch,

    /// redeem script is provided for a previous output which is not P2SH
    PrevOutNotP2sh,

    /// P2WPKH can't be nested into P2WSH, since such outputs are unspendable
    P2wpkhInP2wsh,

    /// previous output is P2SH, but redeem script is not known
    RedeemScriptRequired,

    /// previous output is P2WSH, but witness script is not known
    WitnessScriptRequired,

    /// tapscript can't be spent without control block
    ControlBlockRequired,

    /// type of the previous output is known, but its `scriptPubkey` is not
    PrevOutScriptMissing,

    /// {0} scripts can't be signed
    UnsupportedScript(ScriptType),

    /// input contains signature which can't be matched against any of its
    /// public keys
    SignatureLost,

    /// input contains {0} signatures not aligned with its public keys
    UnmatchedSignatures(usize),

    /// transaction has no outputs, while the signature must commit to them
    NeedsOutputs,

    /// amount spent by the input is not known
    MissingValue,

    /// `scriptPubkey` or amount of the output spent by input #{0} is not
    /// known, while taproot signatures commit to them
    MissingPrevout(usize),

    /// sighash flag {0} is not defined for the signature scheme used by the
    /// input
    InvalidSighash(SighashFlag),

    /// unable to compute sighash: {0}
    #[from]
    Sighash(sighash::Error),

    /// invalid taproot data: {0}
    #[from]
    Taproot(TaprootError),

    /// taproot key path spending requires access to the private key
    NoPrivateKey,

    /// signature for the key is already present
    AlreadySigned,

    /// segwit v0 signatures require compressed public keys, while the
    /// signing key has {0} bytes
    UncompressedKey(usize),

    /// signing key does not match any of the public keys of the input
    KeyMismatch,

    /// elliptic curve operation failure: {0}
    #[from]
    Secp(secp256k1::Error),
}

impl std::error::Error for SignInputError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            SignInputError::Sighash(err) => Some(err),
            SignInputError::Taproot(err) => Some(err),
            SignInputError::Secp(err) => Some(err),
            _ => None,
        }
    }
}

/// Errors of a single input finalization
#[derive(Copy, Clone, PartialEq, Eq, Hash, Debug, Display, Error)]
#[display(doc_comments)]
pub enum BuildError {
    /// type of the input is not known
    UnknownType,

    /// input lacks public keys or signatures required by {0} script
    Incomplete(ScriptType),

    /// {0} scripts can't be finalized
    Unsupported(ScriptType),

    /// only {present} out of {required} required signatures are present
    NotEnoughSignatures { required: usize, present: usize },

    /// {present} signatures are present, while the script accepts exactly
    /// {required}
    TooManySignatures { required: usize, present: usize },
}
