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

//! Signing protocol: signer capability, declared spend types and insertion of
//! signatures into transaction inputs.

use bitcoin::secp256k1::{ecdsa, schnorr, Message, SecretKey};
use bitcoin::PublicKey;

mod inmem;
mod params;
mod signer;

pub use inmem::MemorySigner;
pub use params::{SignParams, SpendType};
pub(crate) use signer::InputSigner;

/// Elliptic curve signing capability
pub trait Signer {
    /// Returns public key of the signer. Compression flag of the key defines
    /// how it is serialized into `scriptSig` and witness.
    fn public_key(&self) -> PublicKey;

    /// Returns private key, if the signer exposes it. Taproot key path
    /// spending requires private key for the key tweaking.
    fn private_key(&self) -> Option<SecretKey>;

    /// Produces ECDSA signature for the message; with `low_r` set grinds the
    /// nonce until R value fits into 32 bytes
    fn sign_ecdsa(&self, msg: &Message, low_r: bool) -> ecdsa::Signature;

    /// Produces BIP-340 signature for the message with untweaked key
    fn sign_schnorr(&self, msg: &Message) -> schnorr::Signature;
}
