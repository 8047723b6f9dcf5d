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

//! Bitcoin transaction builder: incremental construction of transactions,
//! signing of legacy, segwit v0 and taproot inputs, recovery of keys and
//! signatures from existing transactions and assembly of the final
//! `scriptSig` and witness data.

// Coding conventions
#![recursion_limit = "256"]
#![deny(unsafe_code)]

#[macro_use]
extern crate amplify;
#[cfg(feature = "serde")]
#[macro_use]
extern crate serde_crate as serde;

pub extern crate txbuilder_scripts as scripts;

mod builder;
mod config;
mod error;
mod expand;
mod finalize;
mod input;
mod prepare;
mod reorder;
pub mod sign;
mod value;

pub use builder::{PrevTx, TransactionBuilder};
pub use config::{BuilderConfig, DEFAULT_MAXIMUM_FEE_RATE};
pub use error::{BuildError, Error, Mutation, SignError, SignInputError};
pub use expand::{expand_input, expand_output};
pub use finalize::{build_input, Satisfaction};
pub use input::{ExpandedInput, SigSlot, SlotKey};
pub use prepare::{prepare_input, SpendMaterial};
pub use reorder::reorder_signatures;
pub use sign::{MemorySigner, SignParams, Signer, SpendType};
pub use value::{checked_sum, Value};
