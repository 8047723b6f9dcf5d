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

use bitcoin::secp256k1::{KeyPair, Message, SECP256K1};
use bitcoin::util::address::WitnessVersion;
use bitcoin::util::sighash::{Annex, Prevouts, SighashCache};
use bitcoin::util::taproot::TapLeafHash;
use bitcoin::{PublicKey, Transaction, TxOut};
use tracing::debug;
use txbuilder_scripts::taproot::{self, x_only};
use txbuilder_scripts::{ScriptType, SighashFlag};

use super::SignParams;
use crate::prepare::{prepare_input, SpendMaterial};
use crate::{ExpandedInput, SignInputError, SlotKey, Value};

/// Signs inputs of a transaction, producing updated input records. Neither
/// the transaction nor the records are modified.
pub(crate) struct InputSigner<'tx, V: Value> {
    tx: &'tx Transaction,
    inputs: &'tx [ExpandedInput<V>],
    low_r: bool,
}

impl<'tx, V: Value> InputSigner<'tx, V> {
    pub fn new(
        tx: &'tx Transaction,
        inputs: &'tx [ExpandedInput<V>],
        low_r: bool,
    ) -> InputSigner<'tx, V> {
        InputSigner { tx, inputs, low_r }
    }

    /// Creates signature for the input selected by `params` and returns the
    /// input record with the signature inserted into the matching slot.
    pub fn sign(&self, params: &SignParams<V>) -> Result<ExpandedInput<V>, SignInputError> {
        let index = params.input_index;
        let mut input = self.inputs.get(index).cloned().ok_or(SignInputError::NoInput)?;
        if index >= self.tx.input.len() {
            return Err(SignInputError::NoInput);
        }

        params.check(&input)?;
        match (input.value, params.witness_value) {
            (Some(known), Some(supplied)) if known != supplied => {
                return Err(SignInputError::ValueMismatch)
            }
            (_, Some(supplied)) => input.value = Some(supplied),
            _ => {}
        }

        let signer_pubkey = params.signer.public_key();
        let input = if input.can_sign() && self.agrees_with_record(&input, params) {
            input
        } else {
            let material = SpendMaterial {
                redeem_script: params.redeem_script.as_ref(),
                witness_script: params.witness_script.as_ref(),
                control_block: params.control_block.as_deref(),
                tap_merkle_root: params.tap_merkle_root,
            };
            prepare_input(&input, &signer_pubkey, material)?
        };
        if !input.can_sign() {
            return Err(match input.sign_type {
                Some(_) if input.value.is_none() => SignInputError::MissingValue,
                Some(ty) => SignInputError::UnsupportedScript(ty),
                None => SignInputError::UnsupportedScript(ScriptType::NonStandard),
            });
        }

        let spend_type = params.spend_type;
        let sign_type = input.sign_type.unwrap_or(ScriptType::NonStandard);
        if sign_type != spend_type.sign_type()
            || spend_type.requires_witness_script() != input.witness_script.is_some()
        {
            return Err(SignInputError::SignTypeMismatch {
                spend_type,
                found: sign_type,
            });
        }

        let is_taproot = input.witness_version == Some(WitnessVersion::V1);
        let flag = match params.sighash {
            None if is_taproot => SighashFlag::DEFAULT,
            Some(flag) if flag.is_default() && !is_taproot => SighashFlag::ALL,
            Some(flag) => flag,
            None => SighashFlag::ALL,
        };

        if self.tx.output.is_empty() && (!flag.is_none() || self.others_need_outputs(index)) {
            return Err(SignInputError::NeedsOutputs);
        }

        let slot_index = self.match_key(&input, signer_pubkey, is_taproot)?;
        let signature = match input.witness_version {
            Some(WitnessVersion::V1) => self.sign_taproot(&input, params, flag)?,
            witness_version => self.sign_ecdsa(&input, params, witness_version, flag)?,
        };

        let mut signed = input;
        signed.slots[slot_index].signature = Some(signature);
        Ok(signed)
    }

    fn agrees_with_record(&self, input: &ExpandedInput<V>, params: &SignParams<V>) -> bool {
        fn agrees<T: PartialEq>(supplied: &Option<T>, recorded: &Option<T>) -> bool {
            supplied.is_none() || supplied == recorded
        }
        agrees(&params.redeem_script, &input.redeem_script)
            && agrees(&params.witness_script, &input.witness_script)
            && agrees(&params.control_block, &input.control_block)
            && agrees(&params.tap_merkle_root, &input.tap_merkle_root)
    }

    /// Whether signatures of other inputs commit to transaction outputs
    fn others_need_outputs(&self, index: usize) -> bool {
        self.inputs
            .iter()
            .enumerate()
            .filter(|(no, _)| *no != index)
            .flat_map(|(_, input)| input.sighash_flags())
            .any(|flag| !flag.is_none())
    }

    fn match_key(
        &self,
        input: &ExpandedInput<V>,
        pubkey: PublicKey,
        is_taproot: bool,
    ) -> Result<usize, SignInputError> {
        if input.witness_version == Some(WitnessVersion::V0) && !pubkey.compressed {
            return Err(SignInputError::UncompressedKey(pubkey.to_bytes().len()));
        }
        let index = input
            .slots
            .iter()
            .position(|slot| match slot.pubkey {
                Some(key) if is_taproot => key.to_x_only() == x_only(&pubkey),
                Some(key) => key == SlotKey::Full(pubkey),
                None => false,
            })
            .ok_or(SignInputError::KeyMismatch)?;
        if !input.slots[index].is_hole() {
            return Err(SignInputError::AlreadySigned);
        }
        Ok(index)
    }

    fn sign_ecdsa(
        &self,
        input: &ExpandedInput<V>,
        params: &SignParams<V>,
        witness_version: Option<WitnessVersion>,
        flag: SighashFlag,
    ) -> Result<Vec<u8>, SignInputError> {
        let sighash_type = flag.to_ecdsa().ok_or(SignInputError::InvalidSighash(flag))?;
        let sign_script = input
            .sign_script
            .as_ref()
            .ok_or(SignInputError::UnsupportedScript(ScriptType::NonStandard))?;
        let index = params.input_index;

        let mut cache = SighashCache::new(self.tx);
        let sighash = if witness_version.is_some() {
            debug!("computing BIP-143 sighash for input #{} with {}", index, flag);
            let value = input.value.ok_or(SignInputError::MissingValue)?;
            cache.segwit_signature_hash(index, sign_script, value.to_sat(), sighash_type)?
        } else {
            debug!("computing legacy sighash for input #{} with {}", index, flag);
            cache.legacy_signature_hash(index, sign_script, sighash_type.to_u32())?
        };

        let msg = Message::from_slice(&sighash[..])?;
        let signature = params.signer.sign_ecdsa(&msg, self.low_r);
        let mut serialized = signature.serialize_der().to_vec();
        serialized.push(flag.into_u8());
        Ok(serialized)
    }

    fn sign_taproot(
        &self,
        input: &ExpandedInput<V>,
        params: &SignParams<V>,
        flag: SighashFlag,
    ) -> Result<Vec<u8>, SignInputError> {
        let sighash_type = flag.to_schnorr().ok_or(SignInputError::InvalidSighash(flag))?;
        let index = params.input_index;

        let all_prevouts;
        let prevouts = if flag.is_anyone_can_pay() {
            Prevouts::One(index, input.prevout().ok_or(SignInputError::MissingPrevout(index))?)
        } else {
            all_prevouts = self.prevouts(index, input)?;
            Prevouts::All(all_prevouts.as_slice())
        };
        let annex = input.annex.as_deref().map(Annex::new).transpose()?;
        let leaf_hash: Option<(TapLeafHash, u32)> = match &input.witness_script {
            Some(tapscript) => Some((taproot::leaf_hash(tapscript), u32::MAX)),
            None => None,
        };

        debug!(
            "computing BIP-341 {} sighash for input #{} with {}",
            if leaf_hash.is_some() { "script path" } else { "key path" },
            index,
            flag
        );
        let mut cache = SighashCache::new(self.tx);
        let sighash =
            cache.taproot_signature_hash(index, &prevouts, annex, leaf_hash, sighash_type)?;
        let msg = Message::from_slice(&sighash[..])?;

        let signature = if leaf_hash.is_some() {
            params.signer.sign_schnorr(&msg)
        } else {
            let secret_key = params.signer.private_key().ok_or(SignInputError::NoPrivateKey)?;
            let keypair = KeyPair::from_secret_key(SECP256K1, &secret_key);
            let tweaked = taproot::tweak_keypair(keypair, input.tap_merkle_root);
            SECP256K1.sign_schnorr_no_aux_rand(&msg, &tweaked)
        };

        let mut serialized = signature[..].to_vec();
        if !flag.is_default() {
            serialized.push(flag.into_u8());
        }
        Ok(serialized)
    }

    /// Collects outputs spent by all transaction inputs, taking the one
    /// spent by the input being signed from its prepared record
    fn prevouts(
        &self,
        index: usize,
        signed: &ExpandedInput<V>,
    ) -> Result<Vec<TxOut>, SignInputError> {
        self.inputs
            .iter()
            .enumerate()
            .map(|(no, input)| {
                let input = if no == index { signed } else { input };
                input.prevout().ok_or(SignInputError::MissingPrevout(no))
            })
            .collect()
    }
}

#[cfg(test)]
mod test {
    use bitcoin::secp256k1::SecretKey;
    use bitcoin::{OutPoint, PackedLockTime, Script, Sequence, TxIn, Witness};
    use txbuilder_scripts::payments;

    use super::*;
    use crate::{MemorySigner, Signer, SpendType};

    fn signer(byte: u8) -> MemorySigner {
        MemorySigner::new(SecretKey::from_slice(&[byte; 32]).unwrap())
    }

    fn tx(outputs: usize) -> Transaction {
        Transaction {
            version: 2,
            lock_time: PackedLockTime::ZERO,
            input: vec![TxIn {
                previous_output: OutPoint::default(),
                script_sig: Script::new(),
                sequence: Sequence::MAX,
                witness: Witness::new(),
            }],
            output: vec![
                TxOut {
                    value: 1000,
                    script_pubkey: Script::new(),
                };
                outputs
            ],
        }
    }

    #[test]
    fn ecdsa_signature_verifies() {
        let signer = signer(1);
        let tx = tx(1);
        let inputs = vec![ExpandedInput::<u64>::default()];
        let params = SignParams::new(0, SpendType::P2pkh, &signer);
        let signed = InputSigner::new(&tx, &inputs, true).sign(&params).unwrap();

        let serialized = signed.slots[0].signature.clone().unwrap();
        assert_eq!(serialized.last(), Some(&0x01));
        let sig = secp256k1::ecdsa::Signature::from_der(&serialized[..serialized.len() - 1])
            .unwrap();
        let sighash = SighashCache::new(&tx)
            .legacy_signature_hash(0, &payments::p2pkh_output(&signer.public_key()), 1)
            .unwrap();
        let msg = Message::from_slice(&sighash[..]).unwrap();
        assert!(SECP256K1.verify_ecdsa(&msg, &sig, &signer.public_key().inner).is_ok());

        let resign = InputSigner::new(&tx, std::slice::from_ref(&signed), true);
        assert!(matches!(resign.sign(&params), Err(SignInputError::AlreadySigned)));
    }

    #[test]
    fn outputs_required() {
        let signer = signer(1);
        let tx = tx(0);
        let inputs = vec![ExpandedInput::<u64>::default()];
        let signing = InputSigner::new(&tx, &inputs, false);
        let params = SignParams::new(0, SpendType::P2pkh, &signer);
        assert!(matches!(signing.sign(&params), Err(SignInputError::NeedsOutputs)));
        let params = params.sighash(SighashFlag::NONE);
        assert!(signing.sign(&params).is_ok());
    }

    #[test]
    fn key_checks() {
        let signer = signer(1);
        let foreign = signer_key(2);
        let tx = tx(1);
        let inputs = vec![ExpandedInput::<u64> {
            prev_out_script: payments::p2wpkh_output(&foreign),
            value: Some(2000),
            ..default!()
        }];
        let signing = InputSigner::new(&tx, &inputs, false);
        let params = SignParams::new(0, SpendType::P2wpkh, &signer);
        assert!(matches!(signing.sign(&params), Err(SignInputError::KeyMismatch)));

        let uncompressed =
            MemorySigner::with_uncompressed(SecretKey::from_slice(&[1u8; 32]).unwrap());
        let inputs = vec![ExpandedInput::<u64> {
            prev_out_script: Some(payments::p2pkh_output(&uncompressed.public_key())),
            ..default!()
        }];
        let params = SignParams::new(0, SpendType::P2pkh, &uncompressed);
        assert!(InputSigner::new(&tx, &inputs, false).sign(&params).is_ok());

        let params =
            SignParams::new(0, SpendType::P2pkh, &signer).sighash(SighashFlag::from_u8(0x04));
        let inputs = vec![ExpandedInput::<u64>::default()];
        assert!(matches!(
            InputSigner::new(&tx, &inputs, false).sign(&params),
            Err(SignInputError::InvalidSighash(_))
        ));
    }

    #[test]
    fn taproot_key_path() {
        let signer = signer(4);
        let tx = tx(1);
        let xonly = x_only(&signer.public_key());
        let prev_out_script = taproot::output_script(xonly, None);
        let inputs = vec![ExpandedInput::<u64> {
            prev_out_script: Some(prev_out_script.clone()),
            script_type: Some(ScriptType::P2tr),
            value: Some(5000),
            ..default!()
        }];
        let params = SignParams::new(0, SpendType::P2tr, &signer);
        let signed = InputSigner::new(&tx, &inputs, false).sign(&params).unwrap();
        let serialized = signed.slots[0].signature.clone().unwrap();
        assert_eq!(serialized.len(), 64);

        let prevouts = [TxOut {
            value: 5000,
            script_pubkey: prev_out_script.clone(),
        }];
        let sighash = SighashCache::new(&tx)
            .taproot_key_spend_signature_hash(
                0,
                &Prevouts::All(&prevouts),
                bitcoin::SchnorrSighashType::Default,
            )
            .unwrap();
        let msg = Message::from_slice(&sighash[..]).unwrap();
        let sig = secp256k1::schnorr::Signature::from_slice(&serialized).unwrap();
        let output_key = payments::p2tr_output_key(&prev_out_script).unwrap();
        assert!(SECP256K1.verify_schnorr(&sig, &msg, &output_key).is_ok());

        let params = SignParams::new(0, SpendType::P2tr, &signer).sighash(SighashFlag::ALL);
        let signed = InputSigner::new(&tx, &inputs, false).sign(&params).unwrap();
        assert_eq!(signed.slots[0].signature.as_ref().map(Vec::len), Some(65));
    }

    #[test]
    fn taproot_anyonecanpay_commits_own_prevout() {
        let signer = signer(4);
        let mut tx = tx(1);
        let second = TxIn {
            previous_output: OutPoint::new(tx.input[0].previous_output.txid, 1),
            ..tx.input[0].clone()
        };
        tx.input.push(second);
        let prev_out_script = taproot::output_script(x_only(&signer.public_key()), None);
        let inputs = vec![
            ExpandedInput::<u64> {
                prev_out_script: Some(prev_out_script.clone()),
                script_type: Some(ScriptType::P2tr),
                ..default!()
            },
            ExpandedInput::<u64>::default(),
        ];
        let signing = InputSigner::new(&tx, &inputs, false);

        let params = SignParams::new(0, SpendType::P2tr, &signer).witness_value(5000);
        assert!(matches!(signing.sign(&params), Err(SignInputError::MissingPrevout(1))));

        let params = params.sighash(SighashFlag::ALL_ANYONECANPAY);
        let signed = signing.sign(&params).unwrap();
        let serialized = signed.slots[0].signature.clone().unwrap();
        assert_eq!(serialized.last(), Some(&0x81));

        let prevout = TxOut {
            value: 5000,
            script_pubkey: prev_out_script.clone(),
        };
        let sighash = SighashCache::new(&tx)
            .taproot_key_spend_signature_hash(
                0,
                &Prevouts::One(0, prevout),
                bitcoin::SchnorrSighashType::AllPlusAnyoneCanPay,
            )
            .unwrap();
        let msg = Message::from_slice(&sighash[..]).unwrap();
        let sig = secp256k1::schnorr::Signature::from_slice(&serialized[..64]).unwrap();
        let output_key = payments::p2tr_output_key(&prev_out_script).unwrap();
        assert!(SECP256K1.verify_schnorr(&sig, &msg, &output_key).is_ok());
    }

    fn signer_key(byte: u8) -> PublicKey { signer(byte).public_key() }
}
