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

use bitcoin::util::taproot::TapBranchHash;
use bitcoin::Script;
use txbuilder_scripts::{ScriptType, SighashFlag};

use super::Signer;
use crate::{ExpandedInput, SignInputError, Value};

/// Spending scheme declared by the caller of [`crate::TransactionBuilder::sign`]
#[cfg_attr(
    feature = "serde",
    derive(Serialize, Deserialize),
    serde(crate = "serde_crate", rename_all = "kebab-case")
)]
#[derive(Copy, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Debug, Display)]
pub enum SpendType {
    /// Legacy public key hash
    #[display("p2pkh")]
    P2pkh,

    /// Bare public key
    #[display("p2pk")]
    P2pk,

    /// Native segwit v0 public key hash
    #[display("p2wpkh")]
    P2wpkh,

    /// Bare multisig
    #[display("p2ms")]
    P2ms,

    /// Public key hash nested into P2SH
    #[display("p2sh-p2pkh")]
    P2shP2pkh,

    /// Public key nested into P2SH
    #[display("p2sh-p2pk")]
    P2shP2pk,

    /// Segwit v0 public key hash nested into P2SH
    #[display("p2sh-p2wpkh")]
    P2shP2wpkh,

    /// Multisig nested into P2SH
    #[display("p2sh-p2ms")]
    P2shP2ms,

    /// Public key hash nested into P2WSH
    #[display("p2wsh-p2pkh")]
    P2wshP2pkh,

    /// Public key nested into P2WSH
    #[display("p2wsh-p2pk")]
    P2wshP2pk,

    /// Multisig nested into P2WSH
    #[display("p2wsh-p2ms")]
    P2wshP2ms,

    /// Public key hash nested into P2WSH nested into P2SH
    #[display("p2sh-p2wsh-p2pkh")]
    P2shP2wshP2pkh,

    /// Public key nested into P2WSH nested into P2SH
    #[display("p2sh-p2wsh-p2pk")]
    P2shP2wshP2pk,

    /// Multisig nested into P2WSH nested into P2SH
    #[display("p2sh-p2wsh-p2ms")]
    P2shP2wshP2ms,

    /// Taproot key path
    #[display("p2tr")]
    P2tr,

    /// Taproot script path with `n`-of-`n` tapscript multisig
    #[display("p2tr-nofn")]
    #[cfg_attr(feature = "serde", serde(rename = "p2tr-nofn"))]
    P2trNofN,
}

impl SpendType {
    /// All declared spend types
    pub const ALL: [SpendType; 16] = [
        SpendType::P2pkh,
        SpendType::P2pk,
        SpendType::P2wpkh,
        SpendType::P2ms,
        SpendType::P2shP2pkh,
        SpendType::P2shP2pk,
        SpendType::P2shP2wpkh,
        SpendType::P2shP2ms,
        SpendType::P2wshP2pkh,
        SpendType::P2wshP2pk,
        SpendType::P2wshP2ms,
        SpendType::P2shP2wshP2pkh,
        SpendType::P2shP2wshP2pk,
        SpendType::P2shP2wshP2ms,
        SpendType::P2tr,
        SpendType::P2trNofN,
    ];

    /// Type of the output spent with this scheme
    pub fn prev_out_type(self) -> ScriptType {
        match self {
            SpendType::P2pkh => ScriptType::P2pkh,
            SpendType::P2pk => ScriptType::P2pk,
            SpendType::P2wpkh => ScriptType::P2wpkh,
            SpendType::P2ms => ScriptType::P2ms,
            SpendType::P2shP2pkh
            | SpendType::P2shP2pk
            | SpendType::P2shP2wpkh
            | SpendType::P2shP2ms
            | SpendType::P2shP2wshP2pkh
            | SpendType::P2shP2wshP2pk
            | SpendType::P2shP2wshP2ms => ScriptType::P2sh,
            SpendType::P2wshP2pkh | SpendType::P2wshP2pk | SpendType::P2wshP2ms => {
                ScriptType::P2wsh
            }
            SpendType::P2tr | SpendType::P2trNofN => ScriptType::P2tr,
        }
    }

    /// Type of the innermost script which is signed
    pub fn sign_type(self) -> ScriptType {
        match self {
            SpendType::P2pkh
            | SpendType::P2shP2pkh
            | SpendType::P2wshP2pkh
            | SpendType::P2shP2wshP2pkh => ScriptType::P2pkh,
            SpendType::P2pk
            | SpendType::P2shP2pk
            | SpendType::P2wshP2pk
            | SpendType::P2shP2wshP2pk => ScriptType::P2pk,
            SpendType::P2ms
            | SpendType::P2shP2ms
            | SpendType::P2wshP2ms
            | SpendType::P2shP2wshP2ms => ScriptType::P2ms,
            SpendType::P2wpkh | SpendType::P2shP2wpkh => ScriptType::P2wpkh,
            SpendType::P2tr => ScriptType::P2tr,
            SpendType::P2trNofN => ScriptType::P2trNofN,
        }
    }

    /// Whether the scheme spends P2SH output
    #[inline]
    pub fn requires_redeem_script(self) -> bool { self.prev_out_type() == ScriptType::P2sh }

    /// Whether the scheme reveals a witness script or a tapscript
    pub fn requires_witness_script(self) -> bool {
        matches!(
            self,
            SpendType::P2wshP2pkh
                | SpendType::P2wshP2pk
                | SpendType::P2wshP2ms
                | SpendType::P2shP2wshP2pkh
                | SpendType::P2shP2wshP2pk
                | SpendType::P2shP2wshP2ms
                | SpendType::P2trNofN
        )
    }

    /// Whether signatures of the scheme commit to the spent amount
    #[inline]
    pub fn requires_value(self) -> bool {
        self.requires_witness_script()
            || matches!(self, SpendType::P2wpkh | SpendType::P2shP2wpkh | SpendType::P2tr)
    }

    /// Whether the scheme is a taproot script path spending
    #[inline]
    pub fn requires_control_block(self) -> bool { self == SpendType::P2trNofN }
}

impl FromStr for SpendType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        SpendType::ALL
            .into_iter()
            .find(|ty| ty.to_string() == s)
            .ok_or_else(|| s.to_owned())
    }
}

/// Parameters of a single signature creation
pub struct SignParams<'signer, V: Value = u64> {
    /// Index of the signed input
    pub input_index: usize,
    /// Spending scheme declared by the caller
    pub spend_type: SpendType,
    /// Signing key
    pub signer: &'signer dyn Signer,
    /// Redeem script of P2SH outputs
    pub redeem_script: Option<Script>,
    /// Witness script of P2WSH outputs or tapscript of taproot script path
    pub witness_script: Option<Script>,
    /// Serialized taproot control block
    pub control_block: Option<Vec<u8>>,
    /// Root of taproot script tree committed by the output key for key path
    /// spendings
    pub tap_merkle_root: Option<TapBranchHash>,
    /// Amount of the spent output
    pub witness_value: Option<V>,
    /// Sighash flag; defaults to `SIGHASH_ALL` for ECDSA and
    /// `SIGHASH_DEFAULT` for taproot signatures
    pub sighash: Option<SighashFlag>,
}

impl<'signer, V: Value> SignParams<'signer, V> {
    /// Constructs parameters with all optional fields unset
    pub fn new(
        input_index: usize,
        spend_type: SpendType,
        signer: &'signer dyn Signer,
    ) -> SignParams<'signer, V> {
        SignParams {
            input_index,
            spend_type,
            signer,
            redeem_script: None,
            witness_script: None,
            control_block: None,
            tap_merkle_root: None,
            witness_value: None,
            sighash: None,
        }
    }

    /// Sets redeem script
    pub fn redeem_script(mut self, script: Script) -> Self {
        self.redeem_script = Some(script);
        self
    }

    /// Sets witness script or tapscript
    pub fn witness_script(mut self, script: Script) -> Self {
        self.witness_script = Some(script);
        self
    }

    /// Sets taproot control block
    pub fn control_block(mut self, control_block: Vec<u8>) -> Self {
        self.control_block = Some(control_block);
        self
    }

    /// Sets taproot script tree root
    pub fn tap_merkle_root(mut self, root: TapBranchHash) -> Self {
        self.tap_merkle_root = Some(root);
        self
    }

    /// Sets amount of the spent output
    pub fn witness_value(mut self, value: V) -> Self {
        self.witness_value = Some(value);
        self
    }

    /// Sets sighash flag
    pub fn sighash(mut self, flag: SighashFlag) -> Self {
        self.sighash = Some(flag);
        self
    }

    /// Checks that the declared spend type agrees with supplied fields and
    /// with type of the output spent by the input.
    pub(crate) fn check(&self, input: &ExpandedInput<V>) -> Result<(), SignInputError> {
        let spend_type = self.spend_type;
        let field_rule = |required: bool, supplied: bool, recorded: bool, field| {
            match (required, supplied, recorded) {
                (true, false, false) => Err(SignInputError::FieldRequired { spend_type, field }),
                (false, true, _) => Err(SignInputError::FieldForbidden { spend_type, field }),
                _ => Ok(()),
            }
        };
        field_rule(
            spend_type.requires_redeem_script(),
            self.redeem_script.is_some(),
            input.redeem_script.is_some(),
            "redeem script",
        )?;
        field_rule(
            spend_type.requires_witness_script(),
            self.witness_script.is_some(),
            input.witness_script.is_some(),
            "witness script",
        )?;
        field_rule(
            spend_type.requires_value(),
            self.witness_value.is_some(),
            input.value.is_some(),
            "amount of the spent output",
        )?;
        field_rule(
            spend_type.requires_control_block(),
            self.control_block.is_some(),
            input.control_block.is_some(),
            "control block",
        )?;
        if spend_type != SpendType::P2tr && self.tap_merkle_root.is_some() {
            return Err(SignInputError::FieldForbidden {
                spend_type,
                field: "taproot merkle root",
            });
        }

        match input.script_type {
            Some(found) if found != spend_type.prev_out_type() => {
                Err(SignInputError::PrevOutTypeMismatch {
                    spend_type,
                    expected: spend_type.prev_out_type(),
                    found,
                })
            }
            _ => Ok(()),
        }
    }
}
