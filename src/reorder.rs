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

//! Binding of multisig signatures recovered from raw transaction data to the
//! public keys they were made with.

use bitcoin::secp256k1::{ecdsa, Message, SECP256K1};
use bitcoin::util::sighash::SighashCache;
use bitcoin::{Script, Transaction};
use tracing::{trace, warn};
use txbuilder_scripts::{ScriptType, SighashFlag};

use crate::{ExpandedInput, SlotKey, Value};

/// Way the signatures of a multisig input commit to the transaction
enum Digest<'script> {
    Legacy(&'script Script),
    Segwit(&'script Script, u64),
}

impl<'script> Digest<'script> {
    fn for_input<V: Value>(input: &'script ExpandedInput<V>) -> Option<Digest<'script>> {
        if input.witness_script_type == Some(ScriptType::P2ms) {
            let script = input.witness_script.as_ref()?;
            let value = input.value?;
            Some(Digest::Segwit(script, value.to_sat()))
        } else if input.redeem_script_type == Some(ScriptType::P2ms) {
            input.redeem_script.as_ref().map(Digest::Legacy)
        } else if input.script_type == Some(ScriptType::P2ms) {
            input.prev_out_script.as_ref().map(Digest::Legacy)
        } else {
            None
        }
    }

    fn message(&self, tx: &Transaction, index: usize, flag: SighashFlag) -> Option<Message> {
        let sighash_type = flag.to_ecdsa()?;
        let mut cache = SighashCache::new(tx);
        let sighash = match self {
            Digest::Legacy(script) => {
                cache.legacy_signature_hash(index, script, sighash_type.to_u32()).ok()?
            }
            Digest::Segwit(script, value) => {
                cache.segwit_signature_hash(index, script, *value, sighash_type).ok()?
            }
        };
        Message::from_slice(&sighash[..]).ok()
    }
}

/// Checks whether serialized signature with appended sighash flag is made
/// with `pubkey`
fn verifies(
    tx: &Transaction,
    index: usize,
    digest: &Digest,
    pubkey: SlotKey,
    serialized: &[u8],
) -> bool {
    let (flag, der) = match serialized.split_last() {
        Some((flag, der)) => (SighashFlag::from_u8(*flag), der),
        None => return false,
    };
    let (pubkey, mut signature) = match (pubkey.to_full(), ecdsa::Signature::from_der(der)) {
        (Some(pubkey), Ok(signature)) => (pubkey, signature),
        _ => return false,
    };
    signature.normalize_s();
    digest
        .message(tx, index, flag)
        .map(|msg| SECP256K1.verify_ecdsa(&msg, &signature, &pubkey.inner).is_ok())
        .unwrap_or(false)
}

/// Assigns signatures from the unmatched pool of a multisig input to the
/// slots of the keys they verify against. Each key takes the first matching
/// signature; signatures matching no key are dropped.
///
/// Inputs without unmatched signatures, with unknown keys, spending
/// non-multisig scripts or witness multisig with unknown amount are returned
/// unchanged.
pub fn reorder_signatures<V: Value>(
    tx: &Transaction,
    index: usize,
    input: ExpandedInput<V>,
) -> ExpandedInput<V> {
    if input.unmatched.is_empty()
        || input.slots.is_empty()
        || input.slots.iter().any(|slot| slot.pubkey.and_then(SlotKey::to_full).is_none())
    {
        return input;
    }

    let digest = match Digest::for_input(&input) {
        Some(digest) => digest,
        None => {
            trace!("signatures of input #{} can't be reordered", index);
            return input;
        }
    };

    let mut pool = input.unmatched.clone();
    let mut slots = input.slots.clone();
    for slot in slots.iter_mut().filter(|slot| slot.is_hole()) {
        let pubkey = match slot.pubkey {
            Some(pubkey) => pubkey,
            None => continue,
        };
        if let Some(pos) = pool.iter().position(|sig| verifies(tx, index, &digest, pubkey, sig)) {
            slot.signature = Some(pool.remove(pos));
        }
    }

    if !pool.is_empty() {
        warn!(
            "dropping {} signature(s) of input #{} not matching any of the public keys",
            pool.len(),
            index
        );
    }
    ExpandedInput {
        slots,
        unmatched: vec![],
        ..input
    }
}

#[cfg(test)]
mod test {
    use bitcoin::secp256k1::SecretKey;
    use bitcoin::{OutPoint, PackedLockTime, PublicKey, Sequence, TxIn, TxOut, Witness};
    use txbuilder_scripts::payments;

    use super::*;
    use crate::SigSlot;

    fn keys() -> Vec<(SecretKey, PublicKey)> {
        (1u8..=3)
            .map(|byte| {
                let sk = SecretKey::from_slice(&[byte; 32]).unwrap();
                let pk = PublicKey::new(secp256k1::PublicKey::from_secret_key(SECP256K1, &sk));
                (sk, pk)
            })
            .collect()
    }

    fn tx() -> Transaction {
        Transaction {
            version: 2,
            lock_time: PackedLockTime::ZERO,
            input: vec![TxIn {
                previous_output: OutPoint::default(),
                script_sig: Script::new(),
                sequence: Sequence::MAX,
                witness: Witness::new(),
            }],
            output: vec![TxOut {
                value: 700,
                script_pubkey: Script::new(),
            }],
        }
    }

    fn sign(tx: &Transaction, script: &Script, sk: &SecretKey) -> Vec<u8> {
        let sighash = SighashCache::new(tx).legacy_signature_hash(0, script, 1).unwrap();
        let msg = Message::from_slice(&sighash[..]).unwrap();
        let mut sig = SECP256K1.sign_ecdsa(&msg, sk).serialize_der().to_vec();
        sig.push(0x01);
        sig
    }

    #[test]
    fn bare_multisig() {
        let keys = keys();
        let pubkeys: Vec<_> = keys.iter().map(|(_, pk)| *pk).collect();
        let script = payments::p2ms_output(2, &pubkeys);
        let tx = tx();
        let sig1 = sign(&tx, &script, &keys[0].0);
        let sig3 = sign(&tx, &script, &keys[2].0);

        let input = ExpandedInput::<u64> {
            script_type: Some(ScriptType::P2ms),
            prev_out_script: Some(script),
            slots: pubkeys.iter().copied().map(SigSlot::hole).collect(),
            unmatched: vec![sig3.clone(), vec![0x30, 0x00, 0x01], sig1.clone()],
            ..default!()
        };
        let reordered = reorder_signatures(&tx, 0, input);
        assert!(reordered.unmatched.is_empty());
        assert_eq!(reordered.slots[0].signature, Some(sig1));
        assert!(reordered.slots[1].is_hole());
        assert_eq!(reordered.slots[2].signature, Some(sig3));
    }

    #[test]
    fn unknown_keys_kept() {
        let input = ExpandedInput::<u64> {
            script_type: Some(ScriptType::P2ms),
            unmatched: vec![vec![0x30, 0x01]],
            ..default!()
        };
        assert_eq!(reorder_signatures(&tx(), 0, input.clone()), input);
    }
}
