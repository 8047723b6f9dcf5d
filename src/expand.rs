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

//! Decomposition of locking scripts and raw unlocking data into
//! [`ExpandedInput`] records.

use bitcoin::util::address::WitnessVersion;
use bitcoin::util::taproot::TapBranchHash;
use bitcoin::{PublicKey, Script};
use tracing::trace;
use txbuilder_scripts::taproot::{self, TaprootWitness};
use txbuilder_scripts::{
    classify_input, classify_output, classify_witness, compile_pushes, payments, ScriptType,
};

use crate::{ExpandedInput, SigSlot, SlotKey, Value};

/// Expands locking script into a record of keys which have to sign it.
///
/// Keys of P2PKH, P2WPKH and taproot key path outputs are not present in the
/// script, so they are filled in only when `our_pubkey` provably matches the
/// hash or the tweaked key committed by the output; the tweak uses
/// `tap_merkle_root`, if given.
pub fn expand_output<V: Value>(
    script: &Script,
    our_pubkey: Option<&PublicKey>,
    tap_merkle_root: Option<TapBranchHash>,
) -> ExpandedInput<V> {
    let script_type = classify_output(script);
    let mut expanded = ExpandedInput {
        script_type: Some(script_type),
        ..default!()
    };

    match script_type {
        ScriptType::P2pkh => {
            if let Some(pk) = our_pubkey.filter(|pk| payments::p2pkh_output(pk) == *script) {
                expanded.slots = vec![SigSlot::hole(*pk)];
            }
        }
        ScriptType::P2wpkh => {
            if let Some(pk) =
                our_pubkey.filter(|pk| payments::p2wpkh_output(pk).as_ref() == Some(script))
            {
                expanded.slots = vec![SigSlot::hole(*pk)];
            }
        }
        ScriptType::P2tr => {
            if let Some(pk) = our_pubkey.filter(|pk| {
                taproot::output_script(taproot::x_only(pk), tap_merkle_root) == *script
            }) {
                expanded.slots = vec![SigSlot::hole(*pk)];
            }
        }
        ScriptType::P2pk => {
            if let Some(pk) = payments::p2pk_pubkey(script) {
                expanded.slots = vec![SigSlot::hole(pk)];
            }
        }
        ScriptType::P2ms => {
            if let Some(multisig) = payments::p2ms_decode(script) {
                expanded.threshold = Some(multisig.threshold);
                expanded.slots = multisig.pubkeys.into_iter().map(SigSlot::hole).collect();
            }
        }
        ScriptType::P2trNofN => {
            if let Some(pubkeys) = payments::p2tr_nofn_pubkeys(script) {
                expanded.threshold = Some(pubkeys.len());
                expanded.slots = pubkeys.into_iter().map(SigSlot::hole).collect();
            }
        }
        ScriptType::P2sh
        | ScriptType::P2wsh
        | ScriptType::NullData
        | ScriptType::WitnessCommitment
        | ScriptType::NonStandard => {}
    }

    expanded
}

/// Expands unlocking data of a transaction input.
///
/// Empty `script_sig` and `witness` give an empty record; shapes which can't
/// be decoded give a record with [`ScriptType::NonStandard`] type. Nested
/// P2SH, P2WSH and taproot script path spendings are expanded recursively;
/// failure of any of the nested expansions results in an empty record.
pub fn expand_input<V: Value>(
    script_sig: &Script,
    witness: &[Vec<u8>],
    forced_type: Option<ScriptType>,
    prev_out_script: Option<&Script>,
) -> ExpandedInput<V> {
    if script_sig.is_empty() && witness.is_empty() {
        return default!();
    }
    try_expand_input(script_sig, witness, forced_type, prev_out_script).unwrap_or_else(|| {
        trace!("nested unlocking data of the input can't be expanded");
        default!()
    })
}

fn known_type(script_type: ScriptType) -> Option<ScriptType> {
    Some(script_type).filter(|ty| *ty != ScriptType::NonStandard)
}

fn try_expand_input<V: Value>(
    script_sig: &Script,
    witness: &[Vec<u8>],
    forced_type: Option<ScriptType>,
    prev_out_script: Option<&Script>,
) -> Option<ExpandedInput<V>> {
    let script_sig_type =
        Some(script_sig).filter(|s| !s.is_empty()).and_then(|s| known_type(classify_input(s, true)));
    let witness_type = Some(witness)
        .filter(|w| !w.is_empty())
        .and_then(|w| known_type(classify_witness(w, true)));
    let script_type = forced_type.or(script_sig_type).or(witness_type);

    let expanded = match script_type {
        Some(ScriptType::P2wpkh) => {
            let (signature, pubkey) = payments::p2wpkh_signature(witness)?;
            ExpandedInput {
                script_type: Some(ScriptType::P2wpkh),
                prev_out_script: payments::p2wpkh_output(&pubkey),
                slots: vec![SigSlot::with(Some(pubkey.into()), signature)],
                witness_version: Some(WitnessVersion::V0),
                ..default!()
            }
        }

        Some(ScriptType::P2pkh) => {
            let (signature, pubkey) = payments::p2pkh_signature(script_sig)?;
            ExpandedInput {
                script_type: Some(ScriptType::P2pkh),
                prev_out_script: Some(payments::p2pkh_output(&pubkey)),
                slots: vec![SigSlot::with(Some(pubkey.into()), signature)],
                ..default!()
            }
        }

        Some(ScriptType::P2pk) => {
            let signature = payments::p2pk_signature(script_sig)?;
            let pubkey = prev_out_script.and_then(payments::p2pk_pubkey).map(SlotKey::from);
            ExpandedInput {
                script_type: Some(ScriptType::P2pk),
                prev_out_script: prev_out_script.cloned(),
                slots: vec![SigSlot::with(pubkey, signature)],
                ..default!()
            }
        }

        Some(ScriptType::P2ms) => {
            let signatures = payments::p2ms_signatures(script_sig, true)?;
            let multisig = prev_out_script.and_then(payments::p2ms_decode);
            let (pubkeys, threshold) = match multisig {
                Some(multisig) => (
                    multisig.pubkeys.into_iter().map(SlotKey::from).collect(),
                    Some(multisig.threshold),
                ),
                None => (vec![], None),
            };
            let (slots, unmatched) = align_signatures(pubkeys, signatures, false);
            ExpandedInput {
                script_type: Some(ScriptType::P2ms),
                prev_out_script: prev_out_script.cloned(),
                slots,
                unmatched,
                threshold,
                ..default!()
            }
        }

        Some(ScriptType::P2trNofN) => {
            let mut signatures = payments::p2tr_nofn_signatures(witness, true)?;
            // witness stack is consumed from the top, i.e. last key is
            // checked against the first item
            signatures.reverse();
            let pubkeys: Vec<SlotKey> = prev_out_script
                .and_then(payments::p2tr_nofn_pubkeys)
                .unwrap_or_default()
                .into_iter()
                .map(SlotKey::from)
                .collect();
            let threshold = Some(pubkeys.len()).filter(|n| *n > 0);
            let (slots, unmatched) = align_signatures(pubkeys, signatures, true);
            ExpandedInput {
                script_type: Some(ScriptType::P2trNofN),
                prev_out_script: prev_out_script.cloned(),
                slots,
                unmatched,
                threshold,
                witness_version: Some(WitnessVersion::V1),
                ..default!()
            }
        }

        Some(ScriptType::P2sh) => {
            let (input, redeem_script) = match payments::p2sh_redeem(script_sig) {
                Some(split) => split,
                None => return Some(ExpandedInput::nonstandard(prev_out_script)),
            };
            let redeem_script_type = classify_output(&redeem_script);
            let inner = try_expand_input::<V>(
                &input,
                witness,
                Some(redeem_script_type),
                Some(&redeem_script),
            )?;
            ExpandedInput {
                script_type: Some(ScriptType::P2sh),
                prev_out_script: Some(Script::new_p2sh(&redeem_script.script_hash())),
                slots: inner.slots,
                unmatched: inner.unmatched,
                redeem_script: Some(redeem_script),
                redeem_script_type: inner.script_type,
                witness_script: inner.witness_script,
                witness_script_type: inner.witness_script_type,
                witness_version: inner.witness_version,
                threshold: inner.threshold,
                ..default!()
            }
        }

        Some(ScriptType::P2wsh) => {
            let (items, witness_script) = payments::p2wsh_redeem(witness)?;
            let witness_script_type = classify_output(&witness_script);
            let inner = if witness_script_type == ScriptType::P2wpkh {
                try_expand_input::<V>(
                    &Script::new(),
                    &items,
                    Some(witness_script_type),
                    Some(&witness_script),
                )?
            } else {
                try_expand_input::<V>(
                    &compile_pushes(&items),
                    &[],
                    Some(witness_script_type),
                    Some(&witness_script),
                )?
            };
            ExpandedInput {
                script_type: Some(ScriptType::P2wsh),
                prev_out_script: Some(Script::new_v0_p2wsh(&witness_script.wscript_hash())),
                slots: inner.slots,
                unmatched: inner.unmatched,
                witness_script: Some(witness_script),
                witness_script_type: inner.script_type,
                witness_version: Some(WitnessVersion::V0),
                threshold: inner.threshold,
                ..default!()
            }
        }

        Some(ScriptType::P2tr) => match TaprootWitness::parse(witness).ok()? {
            TaprootWitness::KeyPath { signature, annex } => ExpandedInput {
                script_type: Some(ScriptType::P2tr),
                prev_out_script: prev_out_script.cloned(),
                slots: vec![SigSlot::with(None, signature)],
                annex,
                witness_version: Some(WitnessVersion::V1),
                ..default!()
            },
            TaprootWitness::ScriptPath {
                stack,
                tapscript,
                control_block,
                annex,
            } => {
                let tapscript_type = classify_output(&tapscript);
                let inner = try_expand_input::<V>(
                    &Script::new(),
                    &stack,
                    Some(tapscript_type),
                    Some(&tapscript),
                )?;
                let derived = taproot::script_path_output(&tapscript, &control_block).ok()?;
                ExpandedInput {
                    script_type: Some(ScriptType::P2tr),
                    prev_out_script: Some(derived),
                    slots: inner.slots,
                    unmatched: inner.unmatched,
                    witness_script: Some(tapscript),
                    witness_script_type: inner.script_type,
                    control_block: Some(control_block),
                    annex,
                    witness_version: Some(WitnessVersion::V1),
                    threshold: inner.threshold,
                    ..default!()
                }
            }
        },

        Some(ScriptType::NullData)
        | Some(ScriptType::WitnessCommitment)
        | Some(ScriptType::NonStandard)
        | None => ExpandedInput::nonstandard(prev_out_script),
    };

    Some(expanded)
}

/// Pairs signatures with public keys. Signatures are aligned by position when
/// the script fixes their order, or when they come with empty placeholders for
/// every missing one; otherwise they are kept for the reordering procedure.
fn align_signatures(
    pubkeys: Vec<SlotKey>,
    signatures: Vec<Vec<u8>>,
    ordered: bool,
) -> (Vec<SigSlot>, Vec<Vec<u8>>) {
    if !pubkeys.is_empty()
        && pubkeys.len() == signatures.len()
        && (ordered || signatures.iter().any(Vec::is_empty))
    {
        let slots = pubkeys
            .into_iter()
            .zip(signatures)
            .map(|(pubkey, signature)| SigSlot::with(Some(pubkey), signature))
            .collect();
        return (slots, vec![]);
    }
    let slots = pubkeys.into_iter().map(SigSlot::hole).collect();
    let unmatched = signatures.into_iter().filter(|sig| !sig.is_empty()).collect();
    (slots, unmatched)
}

#[cfg(test)]
mod test {
    use std::str::FromStr;

    use bitcoin::hashes::hex::FromHex;
    use bitcoin::schnorr::TapTweak;
    use secp256k1::SECP256K1;

    use super::*;

    const SIG: &str = "3045022100bdac6f39532d710115313e328ba81eea8c6f82612c902f69d0953768c6ceee89022011b4392183091b43ac554315c8a6632483a3e36bc728216add80459799daef9401";

    fn sig() -> Vec<u8> { Vec::from_hex(SIG).unwrap() }

    fn key(byte: u8) -> PublicKey {
        let sk = secp256k1::SecretKey::from_slice(&[byte; 32]).unwrap();
        PublicKey::new(secp256k1::PublicKey::from_secret_key(SECP256K1, &sk))
    }

    #[test]
    fn outputs_with_hashed_keys() {
        let ours = key(1);
        let script = payments::p2pkh_output(&ours);
        let expanded = expand_output::<u64>(&script, Some(&ours), None);
        assert_eq!(expanded.script_type, Some(ScriptType::P2pkh));
        assert_eq!(expanded.slots, vec![SigSlot::hole(ours)]);

        let foreign = expand_output::<u64>(&script, Some(&key(2)), None);
        assert_eq!(foreign.script_type, Some(ScriptType::P2pkh));
        assert!(foreign.slots.is_empty());

        let wpkh = payments::p2wpkh_output(&ours).unwrap();
        assert_eq!(expand_output::<u64>(&wpkh, Some(&ours), None).slots.len(), 1);
        assert!(expand_output::<u64>(&wpkh, None, None).slots.is_empty());
    }

    #[test]
    fn taproot_output_tweak() {
        let ours = key(3);
        let root = taproot::merkle_root(taproot::leaf_hash(&Script::from(vec![0x51])), &[]);
        let script = taproot::output_script(taproot::x_only(&ours), Some(root));
        assert!(expand_output::<u64>(&script, Some(&ours), None).slots.is_empty());
        assert_eq!(expand_output::<u64>(&script, Some(&ours), Some(root)).slots, vec![
            SigSlot::hole(ours)
        ]);
    }

    #[test]
    fn multisig_output() {
        let keys = vec![key(1), key(2), key(3)];
        let script = payments::p2ms_output(2, &keys);
        let expanded = expand_output::<u64>(&script, None, None);
        assert_eq!(expanded.threshold, Some(2));
        assert_eq!(expanded.slots.len(), 3);
        assert!(expanded.slots.iter().all(SigSlot::is_hole));
    }

    #[test]
    fn empty_and_unknown() {
        assert_eq!(expand_input::<u64>(&Script::new(), &[], None, None), ExpandedInput::default());
        let junk = Script::from(vec![0x6a, 0x01]);
        assert_eq!(
            expand_input::<u64>(&junk, &[], None, None).script_type,
            Some(ScriptType::NonStandard)
        );
    }

    #[test]
    fn p2pkh_input() {
        let pk = PublicKey::from_str(
            "0279be667ef9dcbbac55a06295ce870b07029bfcdb2dce28d959f2815b16f81798",
        )
        .unwrap();
        let script_sig = compile_pushes(&[sig(), pk.to_bytes()]);
        let expanded = expand_input::<u64>(&script_sig, &[], None, None);
        assert_eq!(expanded.script_type, Some(ScriptType::P2pkh));
        assert_eq!(expanded.prev_out_script, Some(payments::p2pkh_output(&pk)));
        assert_eq!(expanded.slots, vec![SigSlot::with(Some(pk.into()), sig())]);
    }

    #[test]
    fn nested_multisig_with_holes() {
        let keys = vec![key(1), key(2), key(3)];
        let witness_script = payments::p2ms_output(2, &keys);
        let witness = vec![vec![], vec![], sig(), vec![], witness_script.to_bytes()];
        let redeem_script = Script::new_v0_p2wsh(&witness_script.wscript_hash());
        let script_sig = compile_pushes(&[redeem_script.to_bytes()]);

        let expanded = expand_input::<u64>(&script_sig, &witness, None, None);
        assert_eq!(expanded.script_type, Some(ScriptType::P2sh));
        assert_eq!(expanded.redeem_script, Some(redeem_script.clone()));
        assert_eq!(expanded.redeem_script_type, Some(ScriptType::P2wsh));
        assert_eq!(expanded.witness_script, Some(witness_script));
        assert_eq!(expanded.witness_script_type, Some(ScriptType::P2ms));
        assert_eq!(expanded.witness_version, Some(WitnessVersion::V0));
        assert_eq!(expanded.threshold, Some(2));
        assert_eq!(expanded.prev_out_script, Some(Script::new_p2sh(&redeem_script.script_hash())));
        // positional pairing, since every key has a (possibly empty) signature
        assert_eq!(expanded.slots[1], SigSlot::with(Some(key(2).into()), sig()));
        assert!(expanded.slots[0].is_hole());
        assert!(expanded.unmatched.is_empty());
    }

    #[test]
    fn multisig_signatures_without_placeholders() {
        let keys = vec![key(1), key(2), key(3)];
        let redeem_script = payments::p2ms_output(1, &keys);
        let script_sig = compile_pushes(&[vec![], sig(), redeem_script.to_bytes()]);
        let expanded = expand_input::<u64>(&script_sig, &[], None, None);
        assert_eq!(expanded.redeem_script_type, Some(ScriptType::P2ms));
        assert!(expanded.slots.iter().all(SigSlot::is_hole));
        assert_eq!(expanded.unmatched, vec![sig()]);
    }

    #[test]
    fn taproot_inputs() {
        let key_path = expand_input::<u64>(&Script::new(), &[vec![9u8; 64]], None, None);
        assert_eq!(key_path.script_type, Some(ScriptType::P2tr));
        assert_eq!(key_path.slots, vec![SigSlot::with(None, vec![9u8; 64])]);
        assert!(!key_path.is_script_path());

        let internal = taproot::x_only(&key(5));
        let leaf_keys = [taproot::x_only(&key(6)), taproot::x_only(&key(7))];
        let tapscript = payments::p2tr_nofn_output(&leaf_keys);
        let root = taproot::merkle_root(taproot::leaf_hash(&tapscript), &[]);
        let output = taproot::output_script(internal, Some(root));
        let (_, parity) = internal.tap_tweak(SECP256K1, Some(root));
        let control_block = taproot::ControlBlock {
            leaf_version: taproot::LeafVersion::TapScript,
            output_key_parity: parity,
            internal_key: internal,
            merkle_branch: taproot::TaprootMerkleBranch::default(),
        }
        .serialize();
        // signature for the last key comes first
        let witness = vec![vec![7u8; 64], vec![], tapscript.to_bytes(), control_block.clone()];
        let script_path = expand_input::<u64>(&Script::new(), &witness, None, None);
        assert!(script_path.is_script_path());
        assert_eq!(script_path.prev_out_script, Some(output));
        assert_eq!(script_path.witness_script_type, Some(ScriptType::P2trNofN));
        assert_eq!(script_path.control_block, Some(control_block));
        assert_eq!(script_path.threshold, Some(2));
        assert!(script_path.slots[0].is_hole());
        assert_eq!(script_path.slots[1].signature, Some(vec![7u8; 64]));
    }
}
