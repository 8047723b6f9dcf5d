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

//! Script templates used by the transaction builder: byte-pattern
//! classification of `scriptPubkey`, `scriptSig` and witness stacks, per
//! template encoders and decoders and taproot commitment math.

// Coding conventions
#![recursion_limit = "256"]
#![deny(unsafe_code)]

#[macro_use]
extern crate amplify;
#[cfg(feature = "serde")]
#[macro_use]
extern crate serde_crate as serde;

mod classify;
pub mod payments;
mod signature;
pub mod taproot;
mod types;

pub use classify::{classify_input, classify_output, classify_witness, ScriptType};
pub use signature::{is_canonical_ecdsa, is_canonical_schnorr, is_der_canonical, SighashFlag};
pub use taproot::{TaprootError, TaprootWitness};
pub use types::{
    compile, compile_pushes, decompile, is_push_only, Chunk, PubkeyScript, RedeemScript,
    ScriptCode, SigScript, WitnessScript,
};
