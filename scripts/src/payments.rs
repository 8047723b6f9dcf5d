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

//! Encoders and decoders for the standard script templates. Decoders return
//! `None` whenever the data do not conform to the template.

use bitcoin::blockdata::opcodes::all::{OP_CHECKMULTISIG, OP_CHECKSIG, OP_CHECKSIGVERIFY};
use bitcoin::blockdata::script::{Builder, Script};
use bitcoin::hashes::Hash;
use bitcoin::{PubkeyHash, PublicKey, WPubkeyHash, WScriptHash};
use secp256k1::XOnlyPublicKey;

use crate::signature::{is_canonical_ecdsa, is_canonical_schnorr};
use crate::types::{self, compile, compile_pushes, decompile, is_push_only, Chunk};

/// Public keys and signature threshold of a bare multisig script
#[derive(Clone, PartialEq, Eq, Debug)]
pub struct Multisig {
    /// Number of signatures required to satisfy the script
    pub threshold: usize,
    /// Public keys in the order they are listed in the script
    pub pubkeys: Vec<PublicKey>,
}

/// Parses public key, accepting only compressed and uncompressed encodings
pub fn parse_pubkey(data: &[u8]) -> Option<PublicKey> {
    match (data.len(), data.first()) {
        (33, Some(0x02 | 0x03)) | (65, Some(0x04)) => PublicKey::from_slice(data).ok(),
        _ => None,
    }
}

/// P2PK `scriptPubkey`
pub fn p2pk_output(pubkey: &PublicKey) -> Script {
    Builder::new()
        .push_key(pubkey)
        .push_opcode(OP_CHECKSIG)
        .into_script()
}

/// Extracts public key from P2PK `scriptPubkey`
pub fn p2pk_pubkey(script: &Script) -> Option<PublicKey> {
    match decompile(script)?[..] {
        [Chunk::Push(key), Chunk::Op(types::OP_CHECKSIG)] => parse_pubkey(key),
        _ => None,
    }
}

/// Extracts signature from P2PK `scriptSig`
pub fn p2pk_signature(script_sig: &Script) -> Option<Vec<u8>> {
    match decompile(script_sig)?[..] {
        [Chunk::Push(sig)] if is_canonical_ecdsa(sig) => Some(sig.to_vec()),
        _ => None,
    }
}

/// P2PKH `scriptPubkey`
#[inline]
pub fn p2pkh_output(pubkey: &PublicKey) -> Script { Script::new_p2pkh(&pubkey.pubkey_hash()) }

/// Extracts public key hash from P2PKH `scriptPubkey`
pub fn p2pkh_hash(script: &Script) -> Option<PubkeyHash> {
    if !script.is_p2pkh() {
        return None;
    }
    PubkeyHash::from_slice(&script.as_bytes()[3..23]).ok()
}

/// Extracts signature and public key from P2PKH `scriptSig`
pub fn p2pkh_signature(script_sig: &Script) -> Option<(Vec<u8>, PublicKey)> {
    match decompile(script_sig)?[..] {
        [Chunk::Push(sig), Chunk::Push(key)] if is_canonical_ecdsa(sig) => {
            Some((sig.to_vec(), parse_pubkey(key)?))
        }
        _ => None,
    }
}

/// Bare multisig `scriptPubkey`
pub fn p2ms_output(threshold: usize, pubkeys: &[PublicKey]) -> Script {
    pubkeys
        .iter()
        .fold(Builder::new().push_int(threshold as i64), |builder, key| builder.push_key(key))
        .push_int(pubkeys.len() as i64)
        .push_opcode(OP_CHECKMULTISIG)
        .into_script()
}

/// Decodes bare multisig script
pub fn p2ms_decode(script: &Script) -> Option<Multisig> {
    let chunks = decompile(script)?;
    let len = chunks.len();
    if len < 4 || chunks[len - 1] != Chunk::Op(types::OP_CHECKMULTISIG) {
        return None;
    }
    let threshold = chunks[0].small_int()?;
    let count = chunks[len - 2].small_int()?;
    if threshold > count || count != len - 3 {
        return None;
    }
    let pubkeys = chunks[1..len - 2]
        .iter()
        .map(|chunk| chunk.push_bytes().and_then(parse_pubkey))
        .collect::<Option<Vec<_>>>()?;
    Some(Multisig { threshold, pubkeys })
}

/// Extracts signatures from multisig `scriptSig`, skipping the leading
/// `OP_0`. With `lenient` flag `OP_0` placeholders are returned as empty
/// signatures.
pub fn p2ms_signatures(script_sig: &Script, lenient: bool) -> Option<Vec<Vec<u8>>> {
    let chunks = decompile(script_sig)?;
    if chunks.len() < 2 || !matches!(chunks[0], Chunk::Push(dummy) if dummy.is_empty()) {
        return None;
    }
    chunks[1..]
        .iter()
        .map(|chunk| match chunk {
            Chunk::Push(sig) if sig.is_empty() && lenient => Some(vec![]),
            Chunk::Push(sig) if is_canonical_ecdsa(sig) => Some(sig.to_vec()),
            _ => None,
        })
        .collect()
}

/// Splits P2SH `scriptSig` into the script satisfying redeem script and the
/// redeem script itself.
pub fn p2sh_redeem(script_sig: &Script) -> Option<(Script, Script)> {
    let chunks = decompile(script_sig)?;
    let (last, rest) = chunks.split_last()?;
    let redeem_script = Script::from(last.push_bytes()?.to_vec());
    decompile(&redeem_script)?;
    if !is_push_only(rest) {
        return None;
    }
    Some((compile(rest), redeem_script))
}

/// Same as [`p2sh_redeem`], but also requires that the redeem script is one
/// of standard templates satisfied by the rest of `scriptSig`.
pub fn p2sh_redeem_checked(script_sig: &Script, lenient: bool) -> Option<(Script, Script)> {
    let (input, redeem_script) = p2sh_redeem(script_sig)?;
    let matched = if input.is_empty() {
        redeem_script.is_v0_p2wsh() || redeem_script.is_v0_p2wpkh()
    } else {
        matches_bare(&input, &redeem_script, lenient)
    };
    matched.then(|| (input, redeem_script))
}

fn matches_bare(input: &Script, output: &Script, lenient: bool) -> bool {
    (p2pkh_signature(input).is_some() && output.is_p2pkh())
        || (p2ms_signatures(input, lenient).is_some() && p2ms_decode(output).is_some())
        || (p2pk_signature(input).is_some() && p2pk_pubkey(output).is_some())
}

/// P2WPKH `scriptPubkey`; not defined for uncompressed keys
#[inline]
pub fn p2wpkh_output(pubkey: &PublicKey) -> Option<Script> {
    pubkey.wpubkey_hash().map(|hash| Script::new_v0_p2wpkh(&hash))
}

/// Extracts public key hash from P2WPKH `scriptPubkey`
pub fn p2wpkh_hash(script: &Script) -> Option<WPubkeyHash> {
    if !script.is_v0_p2wpkh() {
        return None;
    }
    WPubkeyHash::from_slice(&script.as_bytes()[2..22]).ok()
}

/// Extracts signature and compressed public key from P2WPKH witness
pub fn p2wpkh_signature(stack: &[Vec<u8>]) -> Option<(Vec<u8>, PublicKey)> {
    match stack {
        [sig, key] if key.len() == 33 && is_canonical_ecdsa(sig) => {
            Some((sig.clone(), parse_pubkey(key)?))
        }
        _ => None,
    }
}

/// Extracts script hash from P2WSH `scriptPubkey`
pub fn p2wsh_hash(script: &Script) -> Option<WScriptHash> {
    if !script.is_v0_p2wsh() {
        return None;
    }
    WScriptHash::from_slice(&script.as_bytes()[2..34]).ok()
}

/// Splits P2WSH witness into the items satisfying the witness script and the
/// witness script itself.
pub fn p2wsh_redeem(stack: &[Vec<u8>]) -> Option<(Vec<Vec<u8>>, Script)> {
    let (last, rest) = stack.split_last()?;
    let witness_script = Script::from(last.clone());
    if decompile(&witness_script)?.is_empty() {
        return None;
    }
    Some((rest.to_vec(), witness_script))
}

/// Same as [`p2wsh_redeem`], but also requires that the witness script is
/// one of standard templates satisfied by the rest of the witness.
pub fn p2wsh_redeem_checked(stack: &[Vec<u8>], lenient: bool) -> Option<(Vec<Vec<u8>>, Script)> {
    let (items, witness_script) = p2wsh_redeem(stack)?;
    matches_bare(&compile_pushes(&items), &witness_script, lenient).then(|| (items, witness_script))
}

/// Tapscript `n`-of-`n` multisig:
/// `<key_1> OP_CHECKSIGVERIFY ... <key_n> OP_CHECKSIG`
pub fn p2tr_nofn_output(pubkeys: &[XOnlyPublicKey]) -> Script {
    let last = pubkeys.len().saturating_sub(1);
    pubkeys
        .iter()
        .enumerate()
        .fold(Builder::new(), |builder, (index, key)| {
            builder
                .push_slice(&key.serialize())
                .push_opcode(if index == last { OP_CHECKSIG } else { OP_CHECKSIGVERIFY })
        })
        .into_script()
}

/// Extracts public keys from tapscript `n`-of-`n` multisig
pub fn p2tr_nofn_pubkeys(script: &Script) -> Option<Vec<XOnlyPublicKey>> {
    let chunks = decompile(script)?;
    if chunks.is_empty() || chunks.len() % 2 != 0 {
        return None;
    }
    let count = chunks.len() / 2;
    chunks
        .chunks(2)
        .enumerate()
        .map(|(index, pair)| {
            let op =
                if index + 1 == count { types::OP_CHECKSIG } else { types::OP_CHECKSIGVERIFY };
            match pair {
                [Chunk::Push(key), Chunk::Op(code)] if *code == op && key.len() == 32 => {
                    XOnlyPublicKey::from_slice(key).ok()
                }
                _ => None,
            }
        })
        .collect()
}

/// Extracts BIP-340 signatures from tapscript `n`-of-`n` multisig witness
/// items (in witness stack order). With `lenient` flag empty items are
/// accepted as placeholders.
pub fn p2tr_nofn_signatures(stack: &[Vec<u8>], lenient: bool) -> Option<Vec<Vec<u8>>> {
    if stack.is_empty() {
        return None;
    }
    stack
        .iter()
        .map(|sig| {
            if (sig.is_empty() && lenient) || is_canonical_schnorr(sig) {
                Some(sig.clone())
            } else {
                None
            }
        })
        .collect()
}

/// Extracts output key from P2TR `scriptPubkey`
pub fn p2tr_output_key(script: &Script) -> Option<XOnlyPublicKey> {
    if !script.is_v1_p2tr() {
        return None;
    }
    XOnlyPublicKey::from_slice(&script.as_bytes()[2..34]).ok()
}

#[cfg(test)]
mod test {
    use std::str::FromStr;

    use bitcoin::hashes::hex::FromHex;

    use super::*;

    const SIG: &str = "3045022100bdac6f39532d710115313e328ba81eea8c6f82612c902f69d0953768c6ceee89022011b4392183091b43ac554315c8a6632483a3e36bc728216add80459799daef9401";
    const KEY1: &str = "0279be667ef9dcbbac55a06295ce870b07029bfcdb2dce28d959f2815b16f81798";
    const KEY2: &str = "02c6047f9441ed7d6d3045406e95c07cd85c778e4b8cef3ca7abac09b95c709ee5";

    fn sig() -> Vec<u8> { Vec::from_hex(SIG).unwrap() }

    fn keys() -> Vec<PublicKey> {
        vec![PublicKey::from_str(KEY1).unwrap(), PublicKey::from_str(KEY2).unwrap()]
    }

    #[test]
    fn p2pkh() {
        let key = keys()[0];
        let script_sig = Builder::new().push_slice(&sig()).push_key(&key).into_script();
        assert_eq!(p2pkh_signature(&script_sig), Some((sig(), key)));
        assert_eq!(p2pkh_hash(&p2pkh_output(&key)), Some(key.pubkey_hash()));
        let script_sig = Builder::new().push_slice(&sig()).push_slice(&[0x05; 33]).into_script();
        assert_eq!(p2pkh_signature(&script_sig), None);
    }

    #[test]
    fn p2ms() {
        let keys = keys();
        let script = p2ms_output(1, &keys);
        assert_eq!(p2ms_decode(&script), Some(Multisig { threshold: 1, pubkeys: keys }));

        let partial = compile_pushes(&[vec![], vec![], sig()]);
        assert_eq!(p2ms_signatures(&partial, false), None);
        assert_eq!(p2ms_signatures(&partial, true), Some(vec![vec![], sig()]));
        assert_eq!(p2ms_signatures(&compile_pushes(&[sig()]), true), None);
    }

    #[test]
    fn p2sh_nesting() {
        let keys = keys();
        let redeem_script = p2ms_output(2, &keys);
        let script_sig = compile_pushes(&[vec![], sig(), vec![], redeem_script.to_bytes()]);
        assert!(p2sh_redeem_checked(&script_sig, false).is_none());
        let (input, redeem) = p2sh_redeem_checked(&script_sig, true).unwrap();
        assert_eq!(redeem, redeem_script);
        assert_eq!(input, compile_pushes(&[vec![], sig(), vec![]]));

        let wpkh = p2wpkh_output(&keys[0]).unwrap();
        let script_sig = compile_pushes(&[wpkh.to_bytes()]);
        assert_eq!(p2sh_redeem_checked(&script_sig, false), Some((Script::new(), wpkh)));

        let bare = p2pkh_output(&keys[0]);
        let script_sig = compile_pushes(&[bare.to_bytes()]);
        assert_eq!(p2sh_redeem_checked(&script_sig, false), None);
    }

    #[test]
    fn p2wsh_nesting() {
        let keys = keys();
        let witness_script = p2ms_output(1, &keys);
        let stack = vec![vec![], sig(), witness_script.to_bytes()];
        assert_eq!(
            p2wsh_redeem_checked(&stack, false),
            Some((vec![vec![], sig()], witness_script))
        );
        assert_eq!(p2wsh_redeem(&[vec![]]), None);
    }

    #[test]
    fn p2wpkh_requires_compressed() {
        let uncompressed = PublicKey::new_uncompressed(keys()[0].inner);
        assert_eq!(p2wpkh_output(&uncompressed), None);
        assert_eq!(p2wpkh_signature(&[sig(), uncompressed.to_bytes()]), None);
        assert_eq!(p2wpkh_signature(&[sig(), keys()[0].to_bytes()]), Some((sig(), keys()[0])));
    }

    #[test]
    fn nofn() {
        let xonly = keys()
            .into_iter()
            .map(|key| XOnlyPublicKey::from_slice(&key.inner.serialize()[1..]).unwrap())
            .collect::<Vec<_>>();
        let script = p2tr_nofn_output(&xonly);
        assert_eq!(script.len(), 2 * 34);
        assert_eq!(script.as_bytes()[33], types::OP_CHECKSIGVERIFY);
        assert_eq!(script.as_bytes()[67], types::OP_CHECKSIG);
        assert_eq!(p2tr_nofn_pubkeys(&script), Some(xonly));
        assert_eq!(p2tr_nofn_pubkeys(&Script::new()), None);

        assert_eq!(p2tr_nofn_signatures(&[vec![1u8; 64], vec![]], false), None);
        assert_eq!(
            p2tr_nofn_signatures(&[vec![1u8; 64], vec![]], true),
            Some(vec![vec![1u8; 64], vec![]])
        );
    }
}
