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

use std::collections::BTreeSet;
use std::str::FromStr;

use bitcoin::hashes::hex;
use bitcoin::hashes::Hash;
use bitcoin::{
    Network, OutPoint, PackedLockTime, Script, Sequence, Transaction, TxIn, TxOut, Txid, Witness,
};
use tracing::{debug, trace, warn};

use crate::expand::{expand_input, expand_output};
use crate::finalize::build_input;
use crate::reorder::reorder_signatures;
use crate::sign::InputSigner;
use crate::value::checked_sum;
use crate::{BuilderConfig, Error, ExpandedInput, Mutation, SignError, SignParams, Value};

/// Transaction spent by a new input: either the full transaction, providing
/// the spent `scriptPubkey` and amount, or just its id
#[derive(Clone, PartialEq, Eq, Debug, From)]
pub enum PrevTx {
    /// Complete previous transaction
    #[from]
    Tx(Transaction),

    /// Id of the previous transaction
    #[from]
    Txid(Txid),
}

impl FromStr for PrevTx {
    type Err = hex::Error;

    /// Parses hex-encoded transaction id
    #[inline]
    fn from_str(s: &str) -> Result<Self, Self::Err> { Txid::from_str(s).map(PrevTx::Txid) }
}

/// Incremental constructor and signer of a bitcoin transaction.
///
/// Each transaction input is tracked with an [`ExpandedInput`] record
/// describing the output it spends and the signatures it has collected.
/// Mutations which would invalidate already created signatures are refused.
#[derive(Clone, PartialEq, Eq, Debug)]
pub struct TransactionBuilder<V: Value = u64> {
    config: BuilderConfig,
    tx: Transaction,
    inputs: Vec<ExpandedInput<V>>,
    prevouts: BTreeSet<OutPoint>,
}

impl<V: Value> Default for TransactionBuilder<V> {
    fn default() -> Self { TransactionBuilder::new(BuilderConfig::default()) }
}

impl<V: Value> TransactionBuilder<V> {
    /// Constructs builder for an empty version 2 transaction
    pub fn new(config: BuilderConfig) -> TransactionBuilder<V> {
        TransactionBuilder {
            config,
            tx: Transaction {
                version: 2,
                lock_time: PackedLockTime::ZERO,
                input: vec![],
                output: vec![],
            },
            inputs: vec![],
            prevouts: empty!(),
        }
    }

    /// Constructs builder for a network with a given fee rate ceiling
    #[inline]
    pub fn with_network(network: Network, maximum_fee_rate: u64) -> TransactionBuilder<V> {
        Self::new(BuilderConfig::with_network(network, maximum_fee_rate))
    }

    /// Reconstructs builder from an existing transaction.
    ///
    /// Unlocking data of each input are expanded into keys and signatures.
    /// If `prev_outputs` are given, they must list outputs spent by every
    /// input, in the input order; their scripts and amounts are attached to
    /// the inputs and used to align multisig signatures with public keys.
    pub fn from_transaction(
        tx: Transaction,
        config: BuilderConfig,
        prev_outputs: Option<&[TxOut]>,
    ) -> Result<TransactionBuilder<V>, Error> {
        if let Some(prev_outputs) = prev_outputs {
            if prev_outputs.len() != tx.input.len() {
                return Err(Error::PrevOutCountMismatch {
                    expected: tx.input.len(),
                    found: prev_outputs.len(),
                });
            }
        }

        let mut inputs = Vec::with_capacity(tx.input.len());
        for (index, txin) in tx.input.iter().enumerate() {
            let prevout = prev_outputs.map(|outputs| &outputs[index]);
            let prev_out_script = prevout.map(|txout| &txout.script_pubkey);
            let witness = txin.witness.to_vec();

            let mut input =
                expand_input::<V>(&txin.script_sig, &witness, None, prev_out_script);
            if let Some(txout) = prevout {
                match &input.prev_out_script {
                    Some(script) if *script != txout.script_pubkey => {
                        return Err(Error::PrevOutMismatch(txin.previous_output))
                    }
                    Some(_) => {}
                    None if input.script_type.is_none() => {
                        input = expand_output(&txout.script_pubkey, None, None);
                        input.prev_out_script = Some(txout.script_pubkey.clone());
                    }
                    None => input.prev_out_script = Some(txout.script_pubkey.clone()),
                }
                input.value = Some(V::from_sat(txout.value));
            }
            trace!("input #{} of imported transaction expanded as {:?}", index, input.script_type);
            inputs.push(reorder_signatures(&tx, index, input));
        }

        let prevouts = tx.input.iter().map(|txin| txin.previous_output).collect();
        Ok(TransactionBuilder {
            config,
            tx,
            inputs,
            prevouts,
        })
    }

    /// Returns builder configuration
    #[inline]
    pub fn config(&self) -> BuilderConfig { self.config }

    /// Returns transaction in its current state, with unlocking data of the
    /// inputs not yet assembled
    #[inline]
    pub fn tx(&self) -> &Transaction { &self.tx }

    /// Returns records of all transaction inputs
    #[inline]
    pub fn inputs(&self) -> &[ExpandedInput<V>] { &self.inputs }

    /// Returns record of the input with the given index
    #[inline]
    pub fn input(&self, index: usize) -> Option<&ExpandedInput<V>> { self.inputs.get(index) }

    /// Turns on or off low-R grinding of ECDSA signatures
    #[inline]
    pub fn set_low_r(&mut self, low_r: bool) { self.config.low_r = low_r; }

    fn has_signatures(&self) -> bool { self.inputs.iter().any(ExpandedInput::has_signatures) }

    /// Adds input spending output `vout` of `prev_tx` and returns its index.
    ///
    /// The sequence defaults to `0xFFFFFFFF`. When `prev_tx` is a complete
    /// transaction, the spent script and amount are taken from it and must
    /// match `prev_out_script` and `value`, if these are given.
    pub fn add_input(
        &mut self,
        prev_tx: impl Into<PrevTx>,
        vout: u32,
        sequence: Option<u32>,
        prev_out_script: Option<Script>,
        value: Option<V>,
    ) -> Result<usize, Error> {
        if !self
            .inputs
            .iter()
            .flat_map(ExpandedInput::sighash_flags)
            .all(|flag| flag.is_anyone_can_pay())
        {
            return Err(Error::WouldInvalidateSignatures(Mutation::AddInput));
        }

        let (txid, prev_out_script, value) = match prev_tx.into() {
            PrevTx::Txid(txid) => (txid, prev_out_script, value),
            PrevTx::Tx(prev_tx) => {
                let txid = prev_tx.txid();
                let txout = prev_tx.output.get(vout as usize).ok_or(Error::VoutOutOfRange {
                    vout,
                    count: prev_tx.output.len(),
                })?;
                let outpoint = OutPoint::new(txid, vout);
                if matches!(&prev_out_script, Some(script) if *script != txout.script_pubkey)
                    || matches!(value, Some(value) if value.to_sat() != txout.value)
                {
                    return Err(Error::PrevOutMismatch(outpoint));
                }
                (txid, Some(txout.script_pubkey.clone()), Some(V::from_sat(txout.value)))
            }
        };

        if txid == Txid::all_zeros() {
            return Err(Error::CoinbaseInput);
        }
        let outpoint = OutPoint::new(txid, vout);
        if self.prevouts.contains(&outpoint) {
            return Err(Error::DuplicateInput(outpoint));
        }

        let mut input = match &prev_out_script {
            Some(script) => expand_output(script, None, None),
            None => ExpandedInput::default(),
        };
        input.prev_out_script = prev_out_script;
        input.value = value;

        debug!("adding input spending {}", outpoint);
        self.tx.input.push(TxIn {
            previous_output: outpoint,
            script_sig: Script::new(),
            sequence: Sequence(sequence.unwrap_or(u32::MAX)),
            witness: Witness::new(),
        });
        self.inputs.push(input);
        self.prevouts.insert(outpoint);
        Ok(self.inputs.len() - 1)
    }

    /// Adds output and returns its index.
    ///
    /// Outputs can be added only while all present signatures use
    /// `SIGHASH_NONE`, or `SIGHASH_SINGLE` with more inputs than outputs.
    pub fn add_output(&mut self, script_pubkey: Script, value: V) -> Result<usize, Error> {
        let outputs = self.tx.output.len();
        let inputs = self.tx.input.len();
        let blocked = self
            .inputs
            .iter()
            .flat_map(ExpandedInput::sighash_flags)
            .any(|flag| !flag.is_none() && !(flag.is_single() && outputs < inputs));
        if blocked {
            return Err(Error::WouldInvalidateSignatures(Mutation::AddOutput));
        }

        self.tx.output.push(TxOut {
            value: value.to_sat(),
            script_pubkey,
        });
        Ok(outputs)
    }

    /// Adds output paying to an address of the configured network
    pub fn add_output_address(&mut self, address: &str, value: V) -> Result<usize, Error> {
        let script_pubkey = self.config.address_script(address)?;
        self.add_output(script_pubkey, value)
    }

    /// Sets transaction lock time; not allowed once any signature is present
    pub fn set_lock_time(&mut self, lock_time: u32) -> Result<(), Error> {
        if self.has_signatures() {
            return Err(Error::WouldInvalidateSignatures(Mutation::LockTime));
        }
        self.tx.lock_time = PackedLockTime(lock_time);
        Ok(())
    }

    /// Sets transaction version; not allowed once any signature is present
    pub fn set_version(&mut self, version: i32) -> Result<(), Error> {
        if self.has_signatures() {
            return Err(Error::WouldInvalidateSignatures(Mutation::Version));
        }
        self.tx.version = version;
        Ok(())
    }

    /// Signs transaction input according to `params`
    pub fn sign(&mut self, params: SignParams<V>) -> Result<(), Error> {
        let input_index = params.input_index;
        let signed = InputSigner::new(&self.tx, &self.inputs, self.config.low_r)
            .sign(&params)
            .map_err(|err| SignError::with_input_no(err, input_index))?;
        self.inputs[input_index] = signed;
        Ok(())
    }

    /// Finalizes transaction, requiring all inputs to be completely signed.
    ///
    /// Fails on transactions without inputs or outputs and on transactions
    /// paying fee above the configured rate; the fee check is skipped if
    /// amount of any of the inputs is unknown.
    pub fn build(&self) -> Result<Transaction, Error> { self.finalize(false) }

    /// Finalizes transaction, assembling whatever signatures are present.
    /// Inputs which can't be assembled keep their original unlocking data.
    pub fn build_incomplete(&self) -> Result<Transaction, Error> { self.finalize(true) }

    fn finalize(&self, lenient: bool) -> Result<Transaction, Error> {
        if !lenient {
            if self.tx.input.is_empty() {
                return Err(Error::NoInputs);
            }
            if self.tx.output.is_empty() {
                return Err(Error::NoOutputs);
            }
        }

        let mut tx = self.tx.clone();
        for (input_index, (input, txin)) in self.inputs.iter().zip(&mut tx.input).enumerate() {
            match build_input(input, lenient) {
                Ok(satisfaction) => {
                    txin.script_sig = satisfaction.script_sig;
                    txin.witness = Witness::from_vec(satisfaction.witness);
                }
                Err(error) if lenient => {
                    debug!("input #{} is left as is: {}", input_index, error);
                }
                Err(error) => return Err(Error::Build { input_index, error }),
            }
        }

        if !lenient {
            self.check_fee(&tx)?;
        }
        Ok(tx)
    }

    /// Refuses transactions paying fee rate above the configured maximum.
    /// This protects against mistakes in amounts and is not a security check.
    fn check_fee(&self, tx: &Transaction) -> Result<(), Error> {
        let values: Option<Vec<V>> = self.inputs.iter().map(|input| input.value).collect();
        let values = match values {
            Some(values) => values,
            None => {
                warn!("amounts of some inputs are not known; skipping fee rate check");
                return Ok(());
            }
        };
        let input_value = checked_sum(values).ok_or(Error::AmountOverflow)?;
        let output_value = checked_sum(tx.output.iter().map(|txout| V::from_sat(txout.value)))
            .ok_or(Error::AmountOverflow)?;
        let fee = match input_value.checked_sub(output_value) {
            Some(fee) => fee.to_sat(),
            None => return Ok(()),
        };

        let vsize = (tx.weight() as u64 + 3) / 4;
        let maximum = self.config.maximum_fee_rate;
        if fee > maximum.saturating_mul(vsize) {
            return Err(Error::AbsurdFee {
                fee_rate: fee / vsize.max(1),
                maximum,
            });
        }
        Ok(())
    }
}
