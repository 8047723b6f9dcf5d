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

use bitcoin::secp256k1::{ecdsa, schnorr, KeyPair, Message, SecretKey, SECP256K1};
use bitcoin::util::key;
use bitcoin::{PrivateKey, PublicKey};

use super::Signer;

/// Signer keeping its private key in memory
#[derive(Clone, PartialEq, Eq, Debug)]
pub struct MemorySigner {
    secret_key: SecretKey,
    keypair: KeyPair,
    public_key: PublicKey,
}

impl MemorySigner {
    /// Constructs signer with compressed public key
    #[inline]
    pub fn new(secret_key: SecretKey) -> MemorySigner { Self::with(secret_key, true) }

    /// Constructs signer serializing its public key in uncompressed form
    #[inline]
    pub fn with_uncompressed(secret_key: SecretKey) -> MemorySigner {
        Self::with(secret_key, false)
    }

    /// Constructs signer from a private key, keeping its compression flag
    #[inline]
    pub fn from_private_key(private_key: PrivateKey) -> MemorySigner {
        Self::with(private_key.inner, private_key.compressed)
    }

    /// Constructs signer from a WIF-encoded private key
    pub fn from_wif(wif: &str) -> Result<MemorySigner, key::Error> {
        PrivateKey::from_wif(wif).map(Self::from_private_key)
    }

    fn with(secret_key: SecretKey, compressed: bool) -> MemorySigner {
        let inner = secp256k1::PublicKey::from_secret_key(SECP256K1, &secret_key);
        let public_key = if compressed {
            PublicKey::new(inner)
        } else {
            PublicKey::new_uncompressed(inner)
        };
        MemorySigner {
            secret_key,
            keypair: KeyPair::from_secret_key(SECP256K1, &secret_key),
            public_key,
        }
    }
}

impl Signer for MemorySigner {
    #[inline]
    fn public_key(&self) -> PublicKey { self.public_key }

    #[inline]
    fn private_key(&self) -> Option<SecretKey> { Some(self.secret_key) }

    fn sign_ecdsa(&self, msg: &Message, low_r: bool) -> ecdsa::Signature {
        if low_r {
            SECP256K1.sign_ecdsa_low_r(msg, &self.secret_key)
        } else {
            SECP256K1.sign_ecdsa(msg, &self.secret_key)
        }
    }

    #[inline]
    fn sign_schnorr(&self, msg: &Message) -> schnorr::Signature {
        SECP256K1.sign_schnorr_no_aux_rand(msg, &self.keypair)
    }
}

#[cfg(test)]
mod test {
    use std::str::FromStr;

    use super::*;

    #[test]
    fn wif_keys() {
        let signer =
            MemorySigner::from_wif("KwDiBf89QgGbjEhKnhXJuH7LrciVrZi3qYjgd9M7rFU73sVHnoWn").unwrap();
        assert_eq!(
            signer.public_key(),
            PublicKey::from_str(
                "0279be667ef9dcbbac55a06295ce870b07029bfcdb2dce28d959f2815b16f81798"
            )
            .unwrap()
        );
        assert!(signer.public_key().compressed);

        let uncompressed = MemorySigner::with_uncompressed(signer.private_key().unwrap());
        assert!(!uncompressed.public_key().compressed);
        assert_eq!(uncompressed.public_key().inner, signer.public_key().inner);
        assert!(MemorySigner::from_wif("not a key").is_err());
    }

    #[test]
    fn signatures_verify() {
        let signer = MemorySigner::new(SecretKey::from_slice(&[3u8; 32]).unwrap());
        let msg = Message::from_slice(&[0xab; 32]).unwrap();
        let pk = signer.public_key().inner;
        for low_r in [false, true] {
            let sig = signer.sign_ecdsa(&msg, low_r);
            assert!(SECP256K1.verify_ecdsa(&msg, &sig, &pk).is_ok());
        }
        let low_r = signer.sign_ecdsa(&msg, true).serialize_der();
        assert!(low_r.len() <= 70);

        let sig = signer.sign_schnorr(&msg);
        let xonly = secp256k1::XOnlyPublicKey::from(pk);
        assert!(SECP256K1.verify_schnorr(&sig, &msg, &xonly).is_ok());
    }
}
