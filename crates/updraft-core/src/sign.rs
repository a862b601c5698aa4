//! Manifest signing and verification.
//!
//! The signing payload is the sorted-key JSON encoding of the manifest with
//! both signature fields removed. Producing signatures is a developer-side
//! concern; verification ships inside every client, so both live here against
//! the same canonical bytes.
//!
//! Verification is deliberately permissive across key rotations: a manifest
//! is accepted if *any* trusted public key verifies *any* emitted signature.
//! A client bundling an older key list keeps working as long as its keys
//! overlap the signer set.

use crate::error::{CoreError, Result};
use crate::manifest::Manifest;
use base64::{engine::general_purpose, Engine as _};
use ed25519_dalek::{Signature, Signer, SigningKey, Verifier, VerifyingKey};
use tracing::debug;

/// The byte payload covered by every signature.
pub fn canonical_bytes(manifest: &Manifest) -> Result<Vec<u8>> {
    let mut value = serde_json::to_value(manifest)?;
    if let Some(map) = value.as_object_mut() {
        map.remove("sigs");
        map.remove("sig");
    }
    // serde_json maps are BTree-backed, so this encoding is sorted-key.
    Ok(serde_json::to_vec(&value)?)
}

/// Replace `sigs` with one signature per key over the canonical payload.
/// Keys must be passed oldest-first; signature order mirrors key order.
pub fn sign_manifest(manifest: &mut Manifest, keys: &[SigningKey]) -> Result<()> {
    manifest.sigs.clear();
    manifest.sig = None;
    let payload = canonical_bytes(manifest)?;
    for key in keys {
        let signature = key.sign(&payload);
        manifest
            .sigs
            .push(general_purpose::STANDARD.encode(signature.to_bytes()));
    }
    debug!(count = manifest.sigs.len(), "signed manifest");
    Ok(())
}

/// Accept the manifest if any trusted key verifies any emitted signature.
///
/// The legacy single-`sig` field is folded into the candidate list so old
/// companion files verify the same way.
pub fn verify_manifest(manifest: &Manifest, trusted: &[VerifyingKey]) -> Result<()> {
    let payload = canonical_bytes(manifest)?;
    let candidates = manifest
        .sigs
        .iter()
        .chain(manifest.sig.as_ref())
        .filter_map(|encoded| decode_signature(encoded));

    for signature in candidates {
        for key in trusted {
            if key.verify(&payload, &signature).is_ok() {
                debug!("manifest signature verified");
                return Ok(());
            }
        }
    }
    Err(CoreError::SignatureInvalid)
}

fn decode_signature(encoded: &str) -> Option<Signature> {
    let raw = general_purpose::STANDARD.decode(encoded.as_bytes()).ok()?;
    let array: [u8; 64] = raw.try_into().ok()?;
    Some(Signature::from_bytes(&array))
}

/// Base64 text form of a public key, as stored in the key store and bundled
/// into clients.
pub fn encode_verifying_key(key: &VerifyingKey) -> String {
    general_purpose::STANDARD.encode(key.to_bytes())
}

pub fn decode_verifying_key(encoded: &str) -> Result<VerifyingKey> {
    let raw = general_purpose::STANDARD
        .decode(encoded.as_bytes())
        .map_err(|err| CoreError::MalformedKey {
            kind: "public",
            detail: err.to_string(),
        })?;
    let array: [u8; 32] = raw.try_into().map_err(|_| CoreError::MalformedKey {
        kind: "public",
        detail: "expected 32 bytes".to_string(),
    })?;
    VerifyingKey::from_bytes(&array).map_err(|err| CoreError::MalformedKey {
        kind: "public",
        detail: err.to_string(),
    })
}

/// Base64 text form of a private key.
pub fn encode_signing_key(key: &SigningKey) -> String {
    general_purpose::STANDARD.encode(key.to_bytes())
}

pub fn decode_signing_key(encoded: &str) -> Result<SigningKey> {
    let raw = general_purpose::STANDARD
        .decode(encoded.as_bytes())
        .map_err(|err| CoreError::MalformedKey {
            kind: "private",
            detail: err.to_string(),
        })?;
    let array: [u8; 32] = raw.try_into().map_err(|_| CoreError::MalformedKey {
        kind: "private",
        detail: "expected 32 bytes".to_string(),
    })?;
    Ok(SigningKey::from_bytes(&array))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::manifest::PackageEntry;
    use crate::platform::PlatformTag;
    use crate::version::Version;

    fn sample_manifest() -> Manifest {
        let mut manifest = Manifest::new();
        let platform = PlatformTag::parse("mac").unwrap();
        let version = Version::parse("0.1.0").unwrap();
        manifest.register_package(
            "app",
            &version,
            &platform,
            PackageEntry::new("app-mac-0.1.0.tar.gz", "aa11"),
        );
        manifest.bump_latest("app", &platform, &version);
        manifest
    }

    fn key(seed: u8) -> SigningKey {
        SigningKey::from_bytes(&[seed; 32])
    }

    #[test]
    fn canonical_bytes_exclude_signatures() {
        let mut manifest = sample_manifest();
        let unsigned = canonical_bytes(&manifest).unwrap();
        sign_manifest(&mut manifest, &[key(1), key(2)]).unwrap();
        assert_eq!(canonical_bytes(&manifest).unwrap(), unsigned);
        assert_eq!(manifest.sigs.len(), 2);
    }

    #[test]
    fn rotation_overlap_is_accepted_and_disjoint_rejected() {
        let (k1, k2, k3) = (key(1), key(2), key(3));
        let mut manifest = sample_manifest();

        // First release cycle: signed by [k1, k2].
        sign_manifest(&mut manifest, &[k1.clone(), k2.clone()]).unwrap();
        let old_client = vec![k1.verifying_key()];
        verify_manifest(&manifest, &old_client).unwrap();

        // Rotation: k1 revoked, k3 minted; re-signed by [k2, k3].
        sign_manifest(&mut manifest, &[k2.clone(), k3.clone()]).unwrap();
        assert!(matches!(
            verify_manifest(&manifest, &old_client),
            Err(CoreError::SignatureInvalid)
        ));
        let overlapping_client = vec![k1.verifying_key(), k2.verifying_key()];
        verify_manifest(&manifest, &overlapping_client).unwrap();
    }

    #[test]
    fn tampered_payload_is_rejected() {
        let mut manifest = sample_manifest();
        let k1 = key(1);
        sign_manifest(&mut manifest, &[k1.clone(), key(2)]).unwrap();
        manifest
            .latest
            .get_mut("app")
            .unwrap()
            .insert("mac".into(), "9.9.9.2.0".into());
        assert!(verify_manifest(&manifest, &[k1.verifying_key()]).is_err());
    }

    #[test]
    fn legacy_single_sig_verifies() {
        let mut manifest = sample_manifest();
        let k1 = key(1);
        sign_manifest(&mut manifest, &[k1.clone(), key(2)]).unwrap();
        let legacy = Manifest {
            sig: Some(manifest.sigs[0].clone()),
            sigs: Vec::new(),
            ..manifest
        };
        verify_manifest(&legacy, &[k1.verifying_key()]).unwrap();
    }

    #[test]
    fn key_text_round_trips() {
        let signing = key(9);
        let decoded = decode_signing_key(&encode_signing_key(&signing)).unwrap();
        assert_eq!(decoded.to_bytes(), signing.to_bytes());
        let verifying = signing.verifying_key();
        let decoded = decode_verifying_key(&encode_verifying_key(&verifying)).unwrap();
        assert_eq!(decoded, verifying);
        assert!(decode_verifying_key("not base64 at all").is_err());
    }
}
