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

//! Resolution of scripts supplied for signing into a signable input record.

use bitcoin::util::address::WitnessVersion;
use bitcoin::util::taproot::TapBranchHash;
use bitcoin::{PublicKey, Script};
use tracing::debug;
use txbuilder_scripts::{classify_output, payments, taproot, ScriptType};

use crate::expand::expand_output;
use crate::{ExpandedInput, SigSlot, SignInputError, Value};

/// Scripts and taproot data supplied for input signing
#[derive(Copy, Clone, PartialEq, Eq, Debug, Default)]
pub struct SpendMaterial<'a> {
    /// Redeem script of P2SH outputs
    pub redeem_script: Option<&'a Script>,
    /// Witness script of P2WSH outputs or a tapscript
    pub witness_script: Option<&'a Script>,
    /// Serialized taproot control block
    pub control_block: Option<&'a [u8]>,
    /// Root of the script tree committed by taproot output key
    pub tap_merkle_root: Option<TapBranchHash>,
}

/// Resolves the input into a signable template for `our_pubkey`.
///
/// Material not supplied by the caller is taken from the input record. The
/// returned record carries all signatures already present in the input,
/// matched against the resolved public keys.
pub fn prepare_input<V: Value>(
    input: &ExpandedInput<V>,
    our_pubkey: &PublicKey,
    material: SpendMaterial,
) -> Result<ExpandedInput<V>, SignInputError> {
    let redeem_script = material.redeem_script.or(input.redeem_script.as_ref());
    let witness_script = material.witness_script.or(input.witness_script.as_ref());
    let control_block = material.control_block.or(input.control_block.as_deref());
    let tap_merkle_root = material.tap_merkle_root.or(input.tap_merkle_root);

    if let (Some(script), Some(recorded)) = (material.redeem_script, &input.redeem_script) {
        if script != recorded {
            return Err(SignInputError::RedeemScriptMismatch);
        }
    }
    if let (Some(script), Some(recorded)) = (material.witness_script, &input.witness_script) {
        if script != recorded {
            return Err(SignInputError::WitnessScriptMismatch);
        }
    }

    let prepared = match (redeem_script, witness_script, control_block) {
        (Some(redeem_script), Some(witness_script), _) => {
            debug!("preparing P2SH-P2WSH input");
            prepare_p2sh_p2wsh(input, our_pubkey, redeem_script, witness_script)?
        }
        (Some(redeem_script), None, _) => {
            debug!("preparing P2SH input");
            prepare_p2sh(input, our_pubkey, redeem_script)?
        }
        (None, Some(witness_script), Some(control_block)) => {
            debug!("preparing taproot script path input");
            prepare_tapscript(input, our_pubkey, witness_script, control_block)?
        }
        (None, Some(witness_script), None) => {
            debug!("preparing P2WSH input");
            prepare_p2wsh(input, our_pubkey, witness_script)?
        }
        (None, None, _) if input.script_type.is_some() || input.prev_out_script.is_some() => {
            debug!("preparing input spending known output");
            prepare_known(input, our_pubkey, tap_merkle_root)?
        }
        (None, None, _) => {
            debug!("nothing is known about the input, assuming P2PKH for the signing key");
            let prev_out_script = payments::p2pkh_output(our_pubkey);
            ExpandedInput {
                script_type: Some(ScriptType::P2pkh),
                prev_out_script: Some(prev_out_script.clone()),
                slots: vec![SigSlot::hole(*our_pubkey)],
                sign_script: Some(prev_out_script),
                sign_type: Some(ScriptType::P2pkh),
                ..default!()
            }
        }
    };

    let slots = merge_signatures(input, prepared.slots)?;
    Ok(ExpandedInput {
        slots,
        value: input.value,
        annex: input.annex.clone(),
        ..prepared
    })
}

fn check_p2sh<V: Value>(
    input: &ExpandedInput<V>,
    redeem_script: &Script,
) -> Result<Script, SignInputError> {
    let p2sh = Script::new_p2sh(&redeem_script.script_hash());
    match &input.prev_out_script {
        Some(prev) if !prev.is_p2sh() => Err(SignInputError::PrevOutNotP2sh),
        Some(prev) if *prev != p2sh => Err(SignInputError::RedeemScriptMismatch),
        _ => Ok(p2sh),
    }
}

fn check_p2wsh(
    prev_out_script: Option<&Script>,
    witness_script: &Script,
) -> Result<Script, SignInputError> {
    let p2wsh = Script::new_v0_p2wsh(&witness_script.wscript_hash());
    match prev_out_script {
        Some(prev) if *prev != p2wsh => Err(SignInputError::WitnessScriptMismatch),
        _ => Ok(p2wsh),
    }
}

fn expand_signable<V: Value>(
    script: &Script,
    our_pubkey: &PublicKey,
    tap_merkle_root: Option<TapBranchHash>,
) -> Result<ExpandedInput<V>, SignInputError> {
    let expanded = expand_output::<V>(script, Some(our_pubkey), tap_merkle_root);
    let script_type = expanded.script_type.unwrap_or(ScriptType::NonStandard);
    if expanded.slots.is_empty() {
        return Err(match script_type {
            ScriptType::P2pkh | ScriptType::P2wpkh | ScriptType::P2tr => {
                SignInputError::KeyMismatch
            }
            _ => SignInputError::UnsupportedScript(script_type),
        });
    }
    Ok(expanded)
}

fn prepare_p2sh_p2wsh<V: Value>(
    input: &ExpandedInput<V>,
    our_pubkey: &PublicKey,
    redeem_script: &Script,
    witness_script: &Script,
) -> Result<ExpandedInput<V>, SignInputError> {
    if classify_output(witness_script) == ScriptType::P2wpkh {
        return Err(SignInputError::P2wpkhInP2wsh);
    }
    check_p2wsh(Some(redeem_script), witness_script)?;
    let prev_out_script = check_p2sh(input, redeem_script)?;
    let expanded = expand_signable::<V>(witness_script, our_pubkey, None)?;
    Ok(ExpandedInput {
        script_type: Some(ScriptType::P2sh),
        prev_out_script: Some(prev_out_script),
        slots: expanded.slots,
        redeem_script: Some(redeem_script.clone()),
        redeem_script_type: Some(ScriptType::P2wsh),
        witness_script: Some(witness_script.clone()),
        witness_script_type: expanded.script_type,
        witness_version: Some(WitnessVersion::V0),
        threshold: expanded.threshold,
        sign_script: Some(witness_script.clone()),
        sign_type: expanded.script_type,
        ..default!()
    })
}

fn prepare_p2sh<V: Value>(
    input: &ExpandedInput<V>,
    our_pubkey: &PublicKey,
    redeem_script: &Script,
) -> Result<ExpandedInput<V>, SignInputError> {
    if redeem_script.is_v0_p2wsh() {
        return Err(SignInputError::WitnessScriptRequired);
    }
    let prev_out_script = check_p2sh(input, redeem_script)?;
    let expanded = expand_signable::<V>(redeem_script, our_pubkey, None)?;
    let (sign_script, witness_version) = if expanded.script_type == Some(ScriptType::P2wpkh) {
        (payments::p2pkh_output(our_pubkey), Some(WitnessVersion::V0))
    } else {
        (redeem_script.clone(), None)
    };
    Ok(ExpandedInput {
        script_type: Some(ScriptType::P2sh),
        prev_out_script: Some(prev_out_script),
        slots: expanded.slots,
        redeem_script: Some(redeem_script.clone()),
        redeem_script_type: expanded.script_type,
        witness_version,
        threshold: expanded.threshold,
        sign_script: Some(sign_script),
        sign_type: expanded.script_type,
        ..default!()
    })
}

fn prepare_tapscript<V: Value>(
    input: &ExpandedInput<V>,
    our_pubkey: &PublicKey,
    tapscript: &Script,
    control_block: &[u8],
) -> Result<ExpandedInput<V>, SignInputError> {
    let tapscript_type = classify_output(tapscript);
    if tapscript_type != ScriptType::P2trNofN {
        return Err(SignInputError::UnsupportedScript(tapscript_type));
    }
    let derived = taproot::script_path_output(tapscript, control_block)?;
    if matches!(&input.prev_out_script, Some(prev) if *prev != derived) {
        return Err(SignInputError::TaprootScriptMismatch);
    }
    let expanded = expand_signable::<V>(tapscript, our_pubkey, None)?;
    Ok(ExpandedInput {
        script_type: Some(ScriptType::P2tr),
        prev_out_script: Some(derived),
        slots: expanded.slots,
        witness_script: Some(tapscript.clone()),
        witness_script_type: Some(tapscript_type),
        control_block: Some(control_block.to_vec()),
        witness_version: Some(WitnessVersion::V1),
        threshold: expanded.threshold,
        sign_script: Some(tapscript.clone()),
        sign_type: Some(tapscript_type),
        ..default!()
    })
}

fn prepare_p2wsh<V: Value>(
    input: &ExpandedInput<V>,
    our_pubkey: &PublicKey,
    witness_script: &Script,
) -> Result<ExpandedInput<V>, SignInputError> {
    match classify_output(witness_script) {
        ScriptType::P2wpkh => return Err(SignInputError::P2wpkhInP2wsh),
        ScriptType::P2trNofN => return Err(SignInputError::ControlBlockRequired),
        _ => {}
    }
    let prev_out_script = check_p2wsh(input.prev_out_script.as_ref(), witness_script)?;
    let expanded = expand_signable::<V>(witness_script, our_pubkey, None)?;
    Ok(ExpandedInput {
        script_type: Some(ScriptType::P2wsh),
        prev_out_script: Some(prev_out_script),
        slots: expanded.slots,
        witness_script: Some(witness_script.clone()),
        witness_script_type: expanded.script_type,
        witness_version: Some(WitnessVersion::V0),
        threshold: expanded.threshold,
        sign_script: Some(witness_script.clone()),
        sign_type: expanded.script_type,
        ..default!()
    })
}

fn prepare_known<V: Value>(
    input: &ExpandedInput<V>,
    our_pubkey: &PublicKey,
    tap_merkle_root: Option<TapBranchHash>,
) -> Result<ExpandedInput<V>, SignInputError> {
    let script_type = match (input.script_type, &input.prev_out_script) {
        (Some(script_type), _) => script_type,
        (None, Some(script)) => classify_output(script),
        (None, None) => return Err(SignInputError::PrevOutScriptMissing),
    };
    match script_type {
        ScriptType::P2sh => return Err(SignInputError::RedeemScriptRequired),
        ScriptType::P2wsh => return Err(SignInputError::WitnessScriptRequired),
        _ => {}
    }
    let prev_out_script = input
        .prev_out_script
        .as_ref()
        .ok_or(SignInputError::PrevOutScriptMissing)?;
    let expanded = expand_signable::<V>(prev_out_script, our_pubkey, tap_merkle_root)?;
    let (sign_script, witness_version) = match expanded.script_type {
        Some(ScriptType::P2wpkh) => {
            (payments::p2pkh_output(our_pubkey), Some(WitnessVersion::V0))
        }
        Some(ScriptType::P2tr) => (prev_out_script.clone(), Some(WitnessVersion::V1)),
        _ => (prev_out_script.clone(), None),
    };
    Ok(ExpandedInput {
        script_type: expanded.script_type,
        prev_out_script: Some(prev_out_script.clone()),
        slots: expanded.slots,
        tap_merkle_root: if expanded.script_type == Some(ScriptType::P2tr) {
            tap_merkle_root
        } else {
            None
        },
        witness_version,
        threshold: expanded.threshold,
        sign_script: Some(sign_script),
        sign_type: expanded.script_type,
        ..default!()
    })
}

/// Moves signatures already present in the input into freshly resolved slots.
/// Signatures are matched by public key, or by position when the key is not
/// known; signatures which can't be placed are reported as errors.
fn merge_signatures<V: Value>(
    input: &ExpandedInput<V>,
    mut slots: Vec<SigSlot>,
) -> Result<Vec<SigSlot>, SignInputError> {
    if !input.unmatched.is_empty() {
        return Err(SignInputError::UnmatchedSignatures(input.unmatched.len()));
    }
    for (pos, existing) in input.slots.iter().enumerate() {
        let signature = match &existing.signature {
            Some(signature) => signature,
            None => continue,
        };
        let target = match existing.pubkey {
            Some(key) => slots
                .iter()
                .position(|slot| matches!(slot.pubkey, Some(pk) if pk.matches(key))),
            None => Some(pos).filter(|pos| *pos < slots.len()),
        };
        match target {
            Some(index) if slots[index].is_hole() => {
                slots[index].signature = Some(signature.clone())
            }
            _ => return Err(SignInputError::SignatureLost),
        }
    }
    Ok(slots)
}

#[cfg(test)]
mod test {
    use secp256k1::SECP256K1;

    use super::*;
    use crate::SlotKey;

    fn key(byte: u8) -> PublicKey {
        let sk = secp256k1::SecretKey::from_slice(&[byte; 32]).unwrap();
        PublicKey::new(secp256k1::PublicKey::from_secret_key(SECP256K1, &sk))
    }

    #[test]
    fn default_p2pkh() {
        let prepared =
            prepare_input(&ExpandedInput::<u64>::default(), &key(1), default!()).unwrap();
        assert_eq!(prepared.script_type, Some(ScriptType::P2pkh));
        assert_eq!(prepared.sign_script, Some(payments::p2pkh_output(&key(1))));
        assert_eq!(prepared.slots, vec![SigSlot::hole(key(1))]);
        assert!(prepared.witness_version.is_none());
        assert!(prepared.can_sign());
    }

    #[test]
    fn p2sh_p2wpkh_sign_script() {
        let redeem_script = payments::p2wpkh_output(&key(1)).unwrap();
        let input = ExpandedInput::<u64> {
            value: Some(5000),
            ..default!()
        };
        let material = SpendMaterial {
            redeem_script: Some(&redeem_script),
            ..default!()
        };
        let prepared = prepare_input(&input, &key(1), material).unwrap();
        assert_eq!(prepared.sign_script, Some(payments::p2pkh_output(&key(1))));
        assert_eq!(prepared.sign_type, Some(ScriptType::P2wpkh));
        assert_eq!(prepared.witness_version, Some(WitnessVersion::V0));
        assert_eq!(prepared.prev_out_script, Some(Script::new_p2sh(&redeem_script.script_hash())));
        assert!(prepared.can_sign());
    }

    #[test]
    fn inconsistent_scripts() {
        let keys = [key(1), key(2)];
        let redeem_script = payments::p2ms_output(1, &keys);
        let other = payments::p2ms_output(2, &keys);
        let input = ExpandedInput::<u64> {
            script_type: Some(ScriptType::P2sh),
            prev_out_script: Some(Script::new_p2sh(&other.script_hash())),
            ..default!()
        };
        let material = SpendMaterial {
            redeem_script: Some(&redeem_script),
            ..default!()
        };
        assert!(matches!(
            prepare_input(&input, &key(1), material),
            Err(SignInputError::RedeemScriptMismatch)
        ));

        let p2pkh = ExpandedInput::<u64> {
            prev_out_script: Some(payments::p2pkh_output(&key(1))),
            ..default!()
        };
        assert!(matches!(
            prepare_input(&p2pkh, &key(1), material),
            Err(SignInputError::PrevOutNotP2sh)
        ));

        let witness_script = payments::p2ms_output(1, &keys);
        let wrong_redeem = payments::p2pkh_output(&key(1));
        let material = SpendMaterial {
            redeem_script: Some(&wrong_redeem),
            witness_script: Some(&witness_script),
            ..default!()
        };
        assert!(matches!(
            prepare_input(&ExpandedInput::<u64>::default(), &key(1), material),
            Err(SignInputError::WitnessScriptMismatch)
        ));
    }

    #[test]
    fn nested_p2wpkh_rejected() {
        let witness_script = payments::p2wpkh_output(&key(1)).unwrap();
        let redeem_script = Script::new_v0_p2wsh(&witness_script.wscript_hash());
        let material = SpendMaterial {
            witness_script: Some(&witness_script),
            ..default!()
        };
        let input = ExpandedInput::<u64>::default();
        assert!(matches!(
            prepare_input(&input, &key(1), material),
            Err(SignInputError::P2wpkhInP2wsh)
        ));
        let material = SpendMaterial {
            redeem_script: Some(&redeem_script),
            witness_script: Some(&witness_script),
            ..default!()
        };
        assert!(matches!(
            prepare_input(&input, &key(1), material),
            Err(SignInputError::P2wpkhInP2wsh)
        ));
    }

    #[test]
    fn bare_script_hash_requires_script() {
        let input = ExpandedInput::<u64> {
            prev_out_script: Some(Script::new_v0_p2wsh(
                &payments::p2pk_output(&key(1)).wscript_hash(),
            )),
            ..default!()
        };
        assert!(matches!(
            prepare_input(&input, &key(1), default!()),
            Err(SignInputError::WitnessScriptRequired)
        ));
        let foreign = ExpandedInput::<u64> {
            prev_out_script: Some(payments::p2pkh_output(&key(2))),
            ..default!()
        };
        assert!(matches!(
            prepare_input(&foreign, &key(1), default!()),
            Err(SignInputError::KeyMismatch)
        ));
    }

    #[test]
    fn signatures_survive_preparation() {
        let keys = [key(1), key(2), key(3)];
        let witness_script = payments::p2ms_output(2, &keys);
        let mut input = ExpandedInput::<u64> {
            script_type: Some(ScriptType::P2wsh),
            witness_script: Some(witness_script.clone()),
            value: Some(1),
            ..default!()
        };
        input.slots = vec![
            SigSlot::hole(keys[2]),
            SigSlot::with(Some(SlotKey::Full(keys[1])), vec![0x30, 0x01]),
        ];
        let prepared = prepare_input(&input, &key(1), default!()).unwrap();
        assert_eq!(prepared.slots[1].signature, Some(vec![0x30, 0x01]));
        assert!(prepared.slots[0].is_hole() && prepared.slots[2].is_hole());
        assert_eq!(prepared.sign_script, Some(witness_script));

        input.slots = vec![SigSlot::with(Some(SlotKey::Full(key(9))), vec![0x30, 0x01])];
        assert!(matches!(
            prepare_input(&input, &key(1), default!()),
            Err(SignInputError::SignatureLost)
        ));

        input.slots = vec![];
        input.unmatched = vec![vec![0x30, 0x01]];
        assert!(matches!(
            prepare_input(&input, &key(1), default!()),
            Err(SignInputError::UnmatchedSignatures(1))
        ));
    }
}
