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

use bitcoin::{Address, Network, Script};

use crate::Error;

/// Default ceiling for the fee rate of a finalized transaction, in sat/vB
pub const DEFAULT_MAXIMUM_FEE_RATE: u64 = 2500;

/// Parameters of a transaction builder session
#[derive(Copy, Clone, PartialEq, Eq, Hash, Debug)]
#[cfg_attr(
    feature = "serde",
    derive(Serialize, Deserialize),
    serde(crate = "serde_crate", default)
)]
pub struct BuilderConfig {
    /// Network which addresses of the transaction outputs must belong to
    pub network: Network,

    /// Fee rate (sat/vB) above which [`crate::TransactionBuilder::build`]
    /// refuses to finalize the transaction
    pub maximum_fee_rate: u64,

    /// Grind ECDSA signature nonces until R value fits into 32 bytes
    pub low_r: bool,
}

impl Default for BuilderConfig {
    fn default() -> Self {
        BuilderConfig {
            network: Network::Bitcoin,
            maximum_fee_rate: DEFAULT_MAXIMUM_FEE_RATE,
            low_r: false,
        }
    }
}

impl BuilderConfig {
    /// Constructs configuration for a given network and fee rate ceiling
    #[inline]
    pub fn with_network(network: Network, maximum_fee_rate: u64) -> BuilderConfig {
        BuilderConfig {
            network,
            maximum_fee_rate,
            low_r: false,
        }
    }

    /// Parses address and returns its `scriptPubkey`, checking that the
    /// address belongs to the configured network.
    pub fn address_script(&self, address: &str) -> Result<Script, Error> {
        let address = Address::from_str(address)?;
        if !address.is_valid_for_network(self.network) {
            return Err(Error::AddressNetworkMismatch {
                address,
                network: self.network,
            });
        }
        Ok(address.script_pubkey())
    }
}
