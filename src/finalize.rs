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

//! Assembly of `scriptSig` and witness from the keys and signatures of an
//! expanded input.

use bitcoin::Script;
use txbuilder_scripts::{classify_output, compile_pushes, ScriptType};

use crate::{BuildError, ExpandedInput, SigSlot, Value};

/// Unlocking data of a finalized input
#[derive(Clone, PartialEq, Eq, Hash, Debug, Default)]
pub struct Satisfaction {
    /// Input `scriptSig`
    pub script_sig: Script,
    /// Witness stack
    pub witness: Vec<Vec<u8>>,
}

impl Satisfaction {
    fn legacy(stack: Vec<Vec<u8>>) -> Satisfaction {
        Satisfaction {
            script_sig: compile_pushes(&stack),
            witness: vec![],
        }
    }

    fn witness(witness: Vec<Vec<u8>>) -> Satisfaction {
        Satisfaction {
            script_sig: Script::new(),
            witness,
        }
    }
}

/// Builds unlocking data for the input.
///
/// In `lenient` mode multisig holes are filled with empty placeholders and
/// the number of signatures is not checked, so partially signed inputs can be
/// serialized for the other signers.
pub fn build_input<V: Value>(
    input: &ExpandedInput<V>,
    lenient: bool,
) -> Result<Satisfaction, BuildError> {
    let script_type = match input.script_type {
        None | Some(ScriptType::NonStandard) => return Err(BuildError::UnknownType),
        Some(script_type) => script_type,
    };

    Ok(match script_type {
        ScriptType::P2pkh | ScriptType::P2pk | ScriptType::P2ms => {
            Satisfaction::legacy(template_stack(script_type, input, lenient)?)
        }
        ScriptType::P2wpkh => Satisfaction::witness(template_stack(script_type, input, lenient)?),

        ScriptType::P2sh => {
            let redeem_script =
                input.redeem_script.as_ref().ok_or(BuildError::Incomplete(script_type))?;
            let redeem_script_type =
                input.redeem_script_type.unwrap_or_else(|| classify_output(redeem_script));
            match redeem_script_type {
                ScriptType::P2wpkh => Satisfaction {
                    script_sig: compile_pushes(&[redeem_script.as_bytes()]),
                    witness: template_stack(redeem_script_type, input, lenient)?,
                },
                ScriptType::P2wsh => Satisfaction {
                    script_sig: compile_pushes(&[redeem_script.as_bytes()]),
                    witness: witness_script_stack(input, lenient)?,
                },
                _ => {
                    let mut stack = template_stack(redeem_script_type, input, lenient)?;
                    stack.push(redeem_script.to_bytes());
                    Satisfaction::legacy(stack)
                }
            }
        }

        ScriptType::P2wsh => Satisfaction::witness(witness_script_stack(input, lenient)?),

        ScriptType::P2tr => {
            let mut witness = match (&input.witness_script, &input.control_block) {
                (Some(tapscript), Some(control_block)) => {
                    let tapscript_type =
                        input.witness_script_type.unwrap_or_else(|| classify_output(tapscript));
                    let mut stack = template_stack(tapscript_type, input, lenient)?;
                    stack.push(tapscript.to_bytes());
                    stack.push(control_block.clone());
                    stack
                }
                (Some(_), None) => return Err(BuildError::Incomplete(script_type)),
                (None, _) => template_stack(script_type, input, lenient)?,
            };
            if let Some(annex) = &input.annex {
                witness.push(annex.clone());
            }
            Satisfaction::witness(witness)
        }

        ScriptType::P2trNofN
        | ScriptType::NullData
        | ScriptType::WitnessCommitment
        | ScriptType::NonStandard => return Err(BuildError::Unsupported(script_type)),
    })
}

/// Witness of P2WSH spending: satisfaction of the witness script followed by
/// the script itself
fn witness_script_stack<V: Value>(
    input: &ExpandedInput<V>,
    lenient: bool,
) -> Result<Vec<Vec<u8>>, BuildError> {
    let witness_script = input
        .witness_script
        .as_ref()
        .ok_or(BuildError::Incomplete(ScriptType::P2wsh))?;
    let witness_script_type =
        input.witness_script_type.unwrap_or_else(|| classify_output(witness_script));
    let mut stack = template_stack(witness_script_type, input, lenient)?;
    stack.push(witness_script.to_bytes());
    Ok(stack)
}

/// Stack items satisfying a single-level template
fn template_stack<V: Value>(
    script_type: ScriptType,
    input: &ExpandedInput<V>,
    lenient: bool,
) -> Result<Vec<Vec<u8>>, BuildError> {
    let slots = &input.slots;
    match script_type {
        ScriptType::P2pkh | ScriptType::P2wpkh => match slots.as_slice() {
            [slot] => match (&slot.signature, slot.pubkey.and_then(|pk| pk.to_full())) {
                (Some(signature), Some(pubkey)) => Ok(vec![signature.clone(), pubkey.to_bytes()]),
                _ => Err(BuildError::Incomplete(script_type)),
            },
            _ => Err(BuildError::Incomplete(script_type)),
        },

        ScriptType::P2pk | ScriptType::P2tr => match slots.as_slice() {
            [slot] => slot
                .signature
                .clone()
                .map(|signature| vec![signature])
                .ok_or(BuildError::Incomplete(script_type)),
            _ => Err(BuildError::Incomplete(script_type)),
        },

        ScriptType::P2ms => {
            let required = match input.threshold {
                Some(required) => required,
                // keys are unknown, so are the signatures to be passed through
                None if slots.is_empty() && !input.unmatched.is_empty() => input.unmatched.len(),
                None => return Err(BuildError::Incomplete(script_type)),
            };
            let mut stack = vec![vec![]];
            stack.extend(signature_items(input, required, lenient)?);
            Ok(stack)
        }

        ScriptType::P2trNofN => {
            let mut stack = signature_items(input, slots.len(), lenient)?;
            // signature of the last key is consumed first
            stack.reverse();
            Ok(stack)
        }

        ScriptType::P2sh
        | ScriptType::P2wsh
        | ScriptType::NullData
        | ScriptType::WitnessCommitment
        | ScriptType::NonStandard => Err(BuildError::Unsupported(script_type)),
    }
}

/// Signatures of a multisig template in the key order. Signatures which were
/// never aligned with the keys are passed in their original order.
fn signature_items<V: Value>(
    input: &ExpandedInput<V>,
    required: usize,
    lenient: bool,
) -> Result<Vec<Vec<u8>>, BuildError> {
    if !input.unmatched.is_empty() && input.slots.iter().all(SigSlot::is_hole) {
        return check_count(input.unmatched.clone(), required, lenient);
    }
    if lenient {
        return Ok(input
            .slots
            .iter()
            .map(|slot| slot.signature.clone().unwrap_or_default())
            .collect());
    }
    let signatures = input.slots.iter().filter_map(|slot| slot.signature.clone()).collect();
    check_count(signatures, required, false)
}

fn check_count(
    signatures: Vec<Vec<u8>>,
    required: usize,
    lenient: bool,
) -> Result<Vec<Vec<u8>>, BuildError> {
    let present = signatures.len();
    if lenient {
        Ok(signatures)
    } else if present < required {
        Err(BuildError::NotEnoughSignatures { required, present })
    } else if present > required {
        Err(BuildError::TooManySignatures { required, present })
    } else {
        Ok(signatures)
    }
}
