// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

/*! Image verification.

A [Verifier] runs a list of verification tasks against an immutable view
of an image. Each task covers an object group, a subset of one, or (for
legacy signatures) a single object. For every signature applicable to a
task, the verifier recognizes the envelope format by sniffing, checks the
cryptography against the attached key material, cross-checks the signer
identity against the fingerprint recorded in the signature descriptor,
then re-hashes the live image and compares against the signed metadata.

```no_run
# fn demo(f: &sif_archive::FileImage, kr: Vec<pgp::SignedPublicKey>) -> sif_integrity::Result<()> {
use sif_integrity::VerifierBuilder;

VerifierBuilder::new().with_key_ring(kr).build(f)?.verify()?;
# Ok(())
# }
```
*/

use {
    crate::{
        clearsign::{is_clearsign_signature, ClearsignDecoder},
        digest::{Digest, HashAlgorithm},
        dsse::{self, is_dsse_signature, DsseDecoder},
        error::{Error, ErrorKind, Result},
        metadata::ImageMetadata,
        result::VerifyResult,
        select::{
            get_fingerprints, get_group_ids, get_group_min_object_id, get_group_objects,
            get_group_signatures, get_object, get_object_signatures, insert_sorted,
        },
    },
    log::debug,
    pgp::{types::KeyTrait, SignedPublicKey},
    sif_archive::{DataType, Descriptor, FileImage},
    std::io::Read,
};

/// A signed-message decoder.
///
/// Implementations decode and cryptographically verify the envelope in
/// `b`, record the signer identity in `vr`, and return the embedded
/// plaintext. `hash` is the hash algorithm recorded in the signature
/// descriptor's metadata.
pub(crate) trait MessageDecoder {
    fn verify_message(
        &self,
        b: &[u8],
        hash: HashAlgorithm,
        vr: &mut VerifyResult,
    ) -> Result<Vec<u8>>;
}

fn signature_not_valid(id: u32, e: Error) -> Error {
    ErrorKind::SignatureNotValid {
        id,
        source: Box::new(e.into_kind()),
    }
    .into()
}

/// One verification task.
trait VerifyTask {
    /// The signature objects applicable to this task.
    fn signatures(&self, f: &FileImage) -> Result<Vec<Descriptor>>;

    /// Verify one signature, filling `vr`.
    fn verify_signature(
        &self,
        f: &FileImage,
        sig: &Descriptor,
        decoder: &dyn MessageDecoder,
        vr: &mut VerifyResult,
    ) -> Result<()>;
}

/// Verifies a signature over an object group or a subset of one.
struct GroupVerifier {
    group_id: u32,
    ods: Vec<Descriptor>,
    subset_ok: bool,
}

impl GroupVerifier {
    fn new(f: &FileImage, group_id: u32, ods: Vec<Descriptor>) -> Result<Self> {
        let (ods, subset_ok) = if ods.is_empty() {
            (
                get_group_objects(f, group_id)?.into_iter().cloned().collect(),
                false,
            )
        } else {
            (ods, true)
        };

        Ok(Self {
            group_id,
            ods,
            subset_ok,
        })
    }
}

impl VerifyTask for GroupVerifier {
    fn signatures(&self, f: &FileImage) -> Result<Vec<Descriptor>> {
        Ok(get_group_signatures(f, self.group_id, false)?
            .into_iter()
            .cloned()
            .collect())
    }

    fn verify_signature(
        &self,
        f: &FileImage,
        sig: &Descriptor,
        decoder: &dyn MessageDecoder,
        vr: &mut VerifyResult,
    ) -> Result<()> {
        let (ht, fp) = sig.signature_metadata()?;
        let hash = HashAlgorithm::from(ht);

        let b = decoder
            .verify_message(sig.data(), hash, vr)
            .map_err(|e| signature_not_valid(sig.id(), e))?;

        let mut md =
            ImageMetadata::from_json(&b).map_err(|e| signature_not_valid(sig.id(), e))?;

        // Object IDs in the metadata are relative; re-anchor them at the
        // current group minimum.
        let min_id = get_group_min_object_id(f, self.group_id)?;
        md.populate_absolute_object_ids(min_id);

        if let Some(entity) = &vr.entity {
            if entity.fingerprint() != fp {
                return Err(ErrorKind::FingerprintMismatch.into());
            }
        }

        if !self.subset_ok {
            md.object_ids_match(&self.ods)?;
        }

        vr.verified = md.matches(f, &self.ods)?;

        Ok(())
    }
}

/// Verifies a legacy signature over the data of an object group.
struct LegacyGroupVerifier {
    group_id: u32,
    ods: Vec<Descriptor>,
}

impl LegacyGroupVerifier {
    fn new(f: &FileImage, group_id: u32) -> Result<Self> {
        let mut ods: Vec<Descriptor> = get_group_objects(f, group_id)?
            .into_iter()
            .cloned()
            .collect();
        ods.sort_by_key(|od| od.id());

        Ok(Self { group_id, ods })
    }
}

impl VerifyTask for LegacyGroupVerifier {
    fn signatures(&self, f: &FileImage) -> Result<Vec<Descriptor>> {
        Ok(get_group_signatures(f, self.group_id, true)?
            .into_iter()
            .cloned()
            .collect())
    }

    fn verify_signature(
        &self,
        _f: &FileImage,
        sig: &Descriptor,
        decoder: &dyn MessageDecoder,
        vr: &mut VerifyResult,
    ) -> Result<()> {
        let (ht, fp) = sig.signature_metadata()?;
        let hash = HashAlgorithm::from(ht);

        let b = decoder
            .verify_message(sig.data(), hash, vr)
            .map_err(|e| signature_not_valid(sig.id(), e))?;

        let digest = Digest::from_legacy_plaintext(hash, &b)
            .map_err(|e| signature_not_valid(sig.id(), e))?;

        if let Some(entity) = &vr.entity {
            if entity.fingerprint() != fp {
                return Err(ErrorKind::FingerprintMismatch.into());
            }
        }

        // The legacy digest spans the concatenated object data, in
        // descriptor ID order.
        let mut r: Box<dyn Read> = Box::new(std::io::empty());
        for od in &self.ods {
            r = Box::new(r.chain(od.data_reader()));
        }

        if !digest.matches(r)? {
            return Err(ErrorKind::ObjectIntegrity { id: 0 }.into());
        }

        vr.verified = self.ods.clone();

        Ok(())
    }
}

/// Verifies a legacy signature over the data of a single object.
struct LegacyObjectVerifier {
    od: Descriptor,
}

impl LegacyObjectVerifier {
    fn new(f: &FileImage, id: u32) -> Result<Self> {
        Ok(Self {
            od: get_object(f, id)?.clone(),
        })
    }
}

impl VerifyTask for LegacyObjectVerifier {
    fn signatures(&self, f: &FileImage) -> Result<Vec<Descriptor>> {
        Ok(get_object_signatures(f, self.od.id())?
            .into_iter()
            .cloned()
            .collect())
    }

    fn verify_signature(
        &self,
        _f: &FileImage,
        sig: &Descriptor,
        decoder: &dyn MessageDecoder,
        vr: &mut VerifyResult,
    ) -> Result<()> {
        let (ht, fp) = sig.signature_metadata()?;
        let hash = HashAlgorithm::from(ht);

        let b = decoder
            .verify_message(sig.data(), hash, vr)
            .map_err(|e| signature_not_valid(sig.id(), e))?;

        let digest = Digest::from_legacy_plaintext(hash, &b)
            .map_err(|e| signature_not_valid(sig.id(), e))?;

        if let Some(entity) = &vr.entity {
            if entity.fingerprint() != fp {
                return Err(ErrorKind::FingerprintMismatch.into());
            }
        }

        if !digest.matches(self.od.data_reader())? {
            return Err(ErrorKind::ObjectIntegrity { id: self.od.id() }.into());
        }

        vr.verified = vec![self.od.clone()];

        Ok(())
    }
}

/// Callback invoked with the result of examining each signature.
///
/// Returning `true` discards any error associated with the result and
/// lets verification continue with the next signature.
pub type VerifyCallback<'a> = Box<dyn FnMut(&VerifyResult) -> bool + 'a>;

/// Describes how a [Verifier] is to be constructed.
#[derive(Default)]
pub struct VerifierBuilder<'a> {
    verifiers: Vec<Box<dyn dsse::Verifier>>,
    keyring: Option<Vec<SignedPublicKey>>,
    group_ids: Vec<u32>,
    object_ids: Vec<u32>,
    legacy: bool,
    legacy_all: bool,
    callback: Option<VerifyCallback<'a>>,
}

impl<'a> VerifierBuilder<'a> {
    pub fn new() -> Self {
        Self::default()
    }

    /// Attach DSSE verifiers.
    pub fn with_verifiers(
        mut self,
        verifiers: impl IntoIterator<Item = Box<dyn dsse::Verifier>>,
    ) -> Self {
        self.verifiers.extend(verifiers);
        self
    }

    /// Attach a keyring for clear-signed envelopes.
    pub fn with_key_ring(mut self, keyring: Vec<SignedPublicKey>) -> Self {
        self.keyring = Some(keyring);
        self
    }

    /// Add a task verifying the object group with `group_id`.
    pub fn group(mut self, group_id: u32) -> Self {
        self.group_ids.push(group_id);
        self
    }

    /// Add a task verifying the object with `id`.
    ///
    /// The task accepts signatures covering any superset of the object
    /// within its group.
    pub fn object(mut self, id: u32) -> Self {
        self.object_ids.push(id);
        self
    }

    /// Verify legacy signatures instead of image metadata signatures.
    pub fn legacy(mut self) -> Self {
        self.legacy = true;
        self
    }

    /// Verify legacy signatures, with one task per non-signature object.
    pub fn legacy_all(mut self) -> Self {
        self.legacy_all = true;
        self
    }

    /// Register a per-signature observer.
    pub fn with_callback(mut self, cb: impl FnMut(&VerifyResult) -> bool + 'a) -> Self {
        self.callback = Some(Box::new(cb));
        self
    }

    /// Construct a [Verifier] over `f`.
    pub fn build(self, f: &'a FileImage) -> Result<Verifier<'a>> {
        let legacy = self.legacy || self.legacy_all;

        let mut group_ids = Vec::new();
        insert_sorted(&mut group_ids, self.group_ids);

        let mut object_ids = Vec::new();
        insert_sorted(&mut object_ids, self.object_ids);

        let mut tasks: Vec<Box<dyn VerifyTask>> = Vec::new();

        if !group_ids.is_empty() || !object_ids.is_empty() {
            for group_id in &group_ids {
                if legacy {
                    tasks.push(Box::new(LegacyGroupVerifier::new(f, *group_id)?));
                } else {
                    tasks.push(Box::new(GroupVerifier::new(f, *group_id, Vec::new())?));
                }
            }

            for id in &object_ids {
                if legacy {
                    tasks.push(Box::new(LegacyObjectVerifier::new(f, *id)?));
                } else {
                    let od = get_object(f, *id)?.clone();
                    let group_id = od.group_id();
                    tasks.push(Box::new(GroupVerifier::new(f, group_id, vec![od])?));
                }
            }
        } else if self.legacy_all {
            let ods =
                f.descriptors_with(|d| d.data_type() != DataType::Signature && d.group_id() != 0);

            if ods.is_empty() {
                return Err(ErrorKind::NoGroupsFound.into());
            }

            for od in ods {
                tasks.push(Box::new(LegacyObjectVerifier { od: od.clone() }));
            }
        } else {
            for group_id in get_group_ids(f)? {
                if legacy {
                    tasks.push(Box::new(LegacyGroupVerifier::new(f, group_id)?));
                } else {
                    tasks.push(Box::new(GroupVerifier::new(f, group_id, Vec::new())?));
                }
            }
        }

        Ok(Verifier {
            f,
            tasks,
            verifiers: self.verifiers,
            keyring: self.keyring,
            callback: self.callback,
        })
    }
}

/// Verifies data objects in an image.
pub struct Verifier<'a> {
    f: &'a FileImage,
    tasks: Vec<Box<dyn VerifyTask>>,
    verifiers: Vec<Box<dyn dsse::Verifier>>,
    keyring: Option<Vec<SignedPublicKey>>,
    callback: Option<VerifyCallback<'a>>,
}

impl std::fmt::Debug for Verifier<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Verifier")
            .field("keyring", &self.keyring)
            .finish()
    }
}

impl Verifier<'_> {
    /// Run all verification tasks.
    ///
    /// Tasks run in registration order, and signatures within a task in
    /// descriptor ID order. The registered callback, if any, observes
    /// every signature result synchronously and may discard individual
    /// errors; an unignored error aborts verification.
    pub fn verify(&mut self) -> Result<()> {
        // Every non-signature object must belong to a group.
        if self
            .f
            .descriptors()
            .any(|d| d.data_type() != DataType::Signature && d.group_id() == 0)
        {
            return Err(ErrorKind::NonGroupedObject.into());
        }

        let clearsign_decoder = self.keyring.as_deref().map(ClearsignDecoder::new);
        let dsse_decoder = if self.verifiers.is_empty() {
            None
        } else {
            Some(DsseDecoder::new(&self.verifiers))
        };

        for task in &self.tasks {
            let sigs = task.signatures(self.f)?;

            for sig in &sigs {
                let decoder: &dyn MessageDecoder = if is_dsse_signature(sig.data()) {
                    match &dsse_decoder {
                        Some(d) => d,
                        None => return Err(ErrorKind::NoKeyMaterialDsse.into()),
                    }
                } else if is_clearsign_signature(sig.data()) {
                    match &clearsign_decoder {
                        Some(d) => d,
                        None => return Err(ErrorKind::NoKeyMaterialPgp.into()),
                    }
                } else {
                    return Err(ErrorKind::SignatureFormatNotRecognized.into());
                };

                debug!("verifying signature object {}", sig.id());

                let mut vr = VerifyResult::new(sig.clone());
                let res = task.verify_signature(self.f, sig, decoder, &mut vr);

                match &mut self.callback {
                    Some(cb) => {
                        vr.error = res.err();

                        if cb(&vr) {
                            vr.error = None;
                        }

                        if let Some(e) = vr.error.take() {
                            return Err(e);
                        }
                    }
                    None => res?,
                }
            }
        }

        Ok(())
    }

    /// Fingerprints by which at least one task is signed.
    ///
    /// The result is sorted by byte comparison and free of duplicates.
    pub fn any_signed_by(&self) -> Result<Vec<Vec<u8>>> {
        let mut fps = Vec::new();

        for task in &self.tasks {
            let sigs = match task.signatures(self.f) {
                Ok(sigs) => sigs,
                Err(e) if e.is(&ErrorKind::SignatureNotFound { id: 0, is_group: false }) => {
                    continue
                }
                Err(e) => return Err(e),
            };

            insert_sorted(&mut fps, get_fingerprints(&sigs)?);
        }

        Ok(fps)
    }

    /// Fingerprints by which every task is signed.
    ///
    /// The result is sorted by byte comparison and free of duplicates.
    pub fn all_signed_by(&self) -> Result<Vec<Vec<u8>>> {
        let mut fps: Option<Vec<Vec<u8>>> = None;

        for task in &self.tasks {
            let sigs = match task.signatures(self.f) {
                Ok(sigs) => sigs,
                Err(e) if e.is(&ErrorKind::SignatureNotFound { id: 0, is_group: false }) => {
                    Vec::new()
                }
                Err(e) => return Err(e),
            };

            let fp = get_fingerprints(&sigs)?;

            fps = Some(match fps {
                None => fp,
                Some(prev) => prev.into_iter().filter(|x| fp.contains(x)).collect(),
            });
        }

        Ok(fps.unwrap_or_default())
    }
}

#[cfg(test)]
mod test {
    use {
        super::*,
        crate::{
            clearsign,
            dsse::{KeyPairSigner, KeyVerifier, Verifier as DsseVerifier},
            sign::SignerBuilder,
            testutil::{ed25519_key_pair, rsa_key_pair, test_entity, test_image},
        },
        chrono::{TimeZone, Utc},
        pgp::crypto::HashAlgorithm as PgpHash,
        sif_archive::{CreateOpts, DescriptorInput, HashType},
        std::io::Cursor,
    };

    fn keyring() -> Vec<SignedPublicKey> {
        vec![test_entity().1.clone()]
    }

    fn clearsigned_image() -> FileImage {
        let (secret, _) = test_entity();
        let mut f = test_image();

        SignerBuilder::new()
            .with_secret_key(secret.clone(), None)
            .deterministic()
            .build(&mut f)
            .unwrap()
            .sign()
            .unwrap();

        f
    }

    /// Rebuild a deterministic image from raw object payloads plus an
    /// existing signature descriptor. Mirrors what byte-level tampering
    /// of a stored image would produce.
    fn rebuild(inputs: Vec<DescriptorInput>, sig: &Descriptor) -> FileImage {
        let mut f =
            FileImage::create_with(inputs, CreateOpts::default().deterministic()).unwrap();

        let (ht, fp) = sig.signature_metadata().unwrap();
        let (link, _) = sig.linked_id().unwrap();

        f.add_descriptor(
            DescriptorInput::new(DataType::Signature, sig.data().to_vec())
                .no_group()
                .linked_group(link)
                .signature_metadata(ht, fp.to_vec()),
        )
        .unwrap();

        f
    }

    fn rebuild_with_sig_data(f: &FileImage, data: Vec<u8>) -> FileImage {
        let sig = f.descriptor(3).unwrap();
        let (ht, fp) = sig.signature_metadata().unwrap();

        let mut g = FileImage::create_with(
            [
                DescriptorInput::new(DataType::Deffile, b"one".to_vec()),
                DescriptorInput::new(DataType::Generic, b"two".to_vec()),
            ],
            CreateOpts::default().deterministic(),
        )
        .unwrap();

        g.add_descriptor(
            DescriptorInput::new(DataType::Signature, data)
                .no_group()
                .linked_group(1)
                .signature_metadata(ht, fp.to_vec()),
        )
        .unwrap();

        g
    }

    #[test]
    fn clearsign_sign_and_verify() {
        let f = clearsigned_image();

        let mut seen = Vec::new();
        let mut v = VerifierBuilder::new()
            .with_key_ring(keyring())
            .with_callback(|vr: &VerifyResult| {
                assert!(vr.error().is_none());
                assert_eq!(
                    vr.entity().unwrap().fingerprint(),
                    test_entity().1.fingerprint()
                );
                seen.extend(vr.verified().iter().map(|od| od.id()));
                false
            })
            .build(&f)
            .unwrap();

        v.verify().unwrap();
        drop(v);

        assert_eq!(seen, vec![1, 2]);
    }

    #[test]
    fn verify_object_accepts_superset_signature() {
        let f = clearsigned_image();

        VerifierBuilder::new()
            .with_key_ring(keyring())
            .object(1)
            .build(&f)
            .unwrap()
            .verify()
            .unwrap();
    }

    #[test]
    fn group_verify_of_subset_signature_rejected() {
        let (secret, _) = test_entity();
        let mut f = test_image();

        // Sign only object 1 of group {1, 2}.
        SignerBuilder::new()
            .with_secret_key(secret.clone(), None)
            .sign_objects([1])
            .build(&mut f)
            .unwrap()
            .sign()
            .unwrap();

        let err = VerifierBuilder::new()
            .with_key_ring(keyring())
            .build(&f)
            .unwrap()
            .verify()
            .unwrap_err();

        assert!(err.is(&ErrorKind::ObjectNotSigned { id: 2 }));
    }

    #[test]
    fn missing_signed_object_rejected() {
        let f = clearsigned_image();

        // Rebuild the image without object 2.
        let g = rebuild(
            vec![DescriptorInput::new(DataType::Deffile, b"one".to_vec())],
            f.descriptor(3).unwrap(),
        );

        let err = VerifierBuilder::new()
            .with_key_ring(keyring())
            .build(&g)
            .unwrap()
            .verify()
            .unwrap_err();

        assert!(err.is(&ErrorKind::SignedObjectNotFound { id: 2 }));
    }

    #[test]
    fn header_mutation_detected() {
        let f = clearsigned_image();

        // A non-deterministic rebuild has a different image UUID, which
        // is integrity-protected.
        let sig = f.descriptor(3).unwrap();
        let mut g = FileImage::create(
            [
                DescriptorInput::new(DataType::Deffile, b"one".to_vec()),
                DescriptorInput::new(DataType::Generic, b"two".to_vec()),
            ],
        )
        .unwrap();
        let (ht, fp) = sig.signature_metadata().unwrap();
        g.add_descriptor(
            DescriptorInput::new(DataType::Signature, sig.data().to_vec())
                .no_group()
                .linked_group(1)
                .signature_metadata(ht, fp.to_vec()),
        )
        .unwrap();

        let err = VerifierBuilder::new()
            .with_key_ring(keyring())
            .build(&g)
            .unwrap()
            .verify()
            .unwrap_err();

        assert!(err.is(&ErrorKind::HeaderIntegrity));
    }

    #[test]
    fn descriptor_mutation_detected() {
        let f = clearsigned_image();

        // Changing an object's creation time perturbs its
        // integrity-protected descriptor fields.
        let g = rebuild(
            vec![
                DescriptorInput::new(DataType::Deffile, b"one".to_vec()),
                DescriptorInput::new(DataType::Generic, b"two".to_vec())
                    .object_time(Utc.timestamp_opt(1_700_000_000, 0).unwrap()),
            ],
            f.descriptor(3).unwrap(),
        );

        let err = VerifierBuilder::new()
            .with_key_ring(keyring())
            .build(&g)
            .unwrap()
            .verify()
            .unwrap_err();

        assert!(err.is(&ErrorKind::DescriptorIntegrity { id: 2 }));
        // The wildcard matches; the precise ID also matches.
        assert!(err.is(&ErrorKind::DescriptorIntegrity { id: 0 }));
    }

    #[test]
    fn object_mutation_detected() {
        let f = clearsigned_image();

        let g = rebuild(
            vec![
                DescriptorInput::new(DataType::Deffile, b"one".to_vec()),
                DescriptorInput::new(DataType::Generic, b"owt".to_vec()),
            ],
            f.descriptor(3).unwrap(),
        );

        let err = VerifierBuilder::new()
            .with_key_ring(keyring())
            .build(&g)
            .unwrap()
            .verify()
            .unwrap_err();

        assert!(err.is(&ErrorKind::ObjectIntegrity { id: 2 }));
    }

    #[test]
    fn envelope_plaintext_tamper_detected() {
        let f = clearsigned_image();

        let env = String::from_utf8(f.descriptor(3).unwrap().data().to_vec()).unwrap();
        let tampered = env.replace("\"relativeId\":0", "\"relativeId\":9");
        assert_ne!(env, tampered);

        let g = rebuild_with_sig_data(&f, tampered.into_bytes());

        let err = VerifierBuilder::new()
            .with_key_ring(keyring())
            .build(&g)
            .unwrap()
            .verify()
            .unwrap_err();

        assert!(err.is(&ErrorKind::SignatureNotValid {
            id: 0,
            source: Box::new(ErrorKind::HeaderIntegrity),
        }));
    }

    #[test]
    fn envelope_signature_tamper_detected() {
        let f = clearsigned_image();

        let env = String::from_utf8(f.descriptor(3).unwrap().data().to_vec()).unwrap();

        // Corrupt a byte inside the armored signature body.
        let idx = env.find("-----END PGP SIGNATURE-----").unwrap() - 40;
        let mut b = env.into_bytes();
        b[idx] = if b[idx] == b'A' { b'B' } else { b'A' };

        let g = rebuild_with_sig_data(&f, b);

        let err = VerifierBuilder::new()
            .with_key_ring(keyring())
            .build(&g)
            .unwrap()
            .verify()
            .unwrap_err();

        assert!(err.is(&ErrorKind::SignatureNotValid {
            id: 0,
            source: Box::new(ErrorKind::HeaderIntegrity),
        }));
    }

    #[test]
    fn fingerprint_binding() {
        let f = clearsigned_image();

        // Re-home the envelope under a different fingerprint.
        let sig = f.descriptor(3).unwrap();
        let mut g = FileImage::create_with(
            [
                DescriptorInput::new(DataType::Deffile, b"one".to_vec()),
                DescriptorInput::new(DataType::Generic, b"two".to_vec()),
            ],
            CreateOpts::default().deterministic(),
        )
        .unwrap();
        g.add_descriptor(
            DescriptorInput::new(DataType::Signature, sig.data().to_vec())
                .no_group()
                .linked_group(1)
                .signature_metadata(HashType::Sha256, vec![0xAB; 20]),
        )
        .unwrap();

        let err = VerifierBuilder::new()
            .with_key_ring(keyring())
            .build(&g)
            .unwrap()
            .verify()
            .unwrap_err();

        assert!(err.is(&ErrorKind::FingerprintMismatch));
    }

    #[test]
    fn callback_may_ignore_errors() {
        let f = clearsigned_image();

        let g = rebuild(
            vec![
                DescriptorInput::new(DataType::Deffile, b"one".to_vec()),
                DescriptorInput::new(DataType::Generic, b"owt".to_vec()),
            ],
            f.descriptor(3).unwrap(),
        );

        let mut observed = 0;
        let mut v = VerifierBuilder::new()
            .with_key_ring(keyring())
            .with_callback(|vr: &VerifyResult| {
                observed += 1;
                assert!(vr
                    .error()
                    .unwrap()
                    .is(&ErrorKind::ObjectIntegrity { id: 2 }));
                true
            })
            .build(&g)
            .unwrap();

        v.verify().unwrap();
        drop(v);
        assert_eq!(observed, 1);
    }

    #[test]
    fn no_key_material_for_sniffed_format() {
        let f = clearsigned_image();

        // Clear-signed envelope, DSSE-only verifier.
        let vs: Vec<Box<dyn dsse::Verifier>> =
            vec![Box::new(KeyVerifier::for_key_pair(&ed25519_key_pair()).unwrap())];
        let err = VerifierBuilder::new()
            .with_verifiers(vs)
            .build(&f)
            .unwrap()
            .verify()
            .unwrap_err();
        assert!(err.is(&ErrorKind::NoKeyMaterialPgp));

        // DSSE envelope, keyring-only verifier.
        let mut g = test_image();
        SignerBuilder::new()
            .with_signers([
                Box::new(KeyPairSigner::new(ed25519_key_pair())) as Box<dyn dsse::Signer>
            ])
            .build(&mut g)
            .unwrap()
            .sign()
            .unwrap();

        let err = VerifierBuilder::new()
            .with_key_ring(keyring())
            .build(&g)
            .unwrap()
            .verify()
            .unwrap_err();
        assert!(err.is(&ErrorKind::NoKeyMaterialDsse));
    }

    #[test]
    fn unrecognized_signature_format() {
        let mut f = test_image();
        f.add_descriptor(
            DescriptorInput::new(DataType::Signature, b"garbage".to_vec())
                .no_group()
                .linked_group(1)
                .signature_metadata(HashType::Sha256, vec![1; 20]),
        )
        .unwrap();

        let err = VerifierBuilder::new()
            .with_key_ring(keyring())
            .build(&f)
            .unwrap()
            .verify()
            .unwrap_err();

        assert!(err.is(&ErrorKind::SignatureFormatNotRecognized));
    }

    #[test]
    fn non_grouped_object_rejected() {
        let f = FileImage::create_with(
            [
                DescriptorInput::new(DataType::Deffile, b"one".to_vec()),
                DescriptorInput::new(DataType::Generic, b"stray".to_vec()).no_group(),
            ],
            CreateOpts::default().deterministic(),
        )
        .unwrap();

        let err = VerifierBuilder::new()
            .with_key_ring(keyring())
            .group(1)
            .build(&f)
            .unwrap()
            .verify()
            .unwrap_err();

        assert!(err.is(&ErrorKind::NonGroupedObject));
    }

    #[test]
    fn dsse_sign_and_verify() {
        let ed = ed25519_key_pair();
        let rsa = rsa_key_pair();

        let ed_verifier = KeyVerifier::for_key_pair(&ed).unwrap();
        let ed_public = ed_verifier.public_key();
        let rsa_verifier = KeyVerifier::for_key_pair(&rsa).unwrap();
        let rsa_public = rsa_verifier.public_key();

        let mut f = test_image();
        SignerBuilder::new()
            .with_signers([
                Box::new(KeyPairSigner::new(ed)) as Box<dyn dsse::Signer>,
                Box::new(KeyPairSigner::new(rsa)) as Box<dyn dsse::Signer>,
            ])
            .build(&mut f)
            .unwrap()
            .sign()
            .unwrap();

        // Either verifier alone accepts the envelope, reporting its key.
        for (verifier, public) in [(ed_verifier, ed_public), (rsa_verifier, rsa_public)] {
            let mut keys = Vec::new();
            let mut v = VerifierBuilder::new()
                .with_verifiers([Box::new(verifier) as Box<dyn dsse::Verifier>])
                .with_callback(|vr: &VerifyResult| {
                    keys.extend(vr.keys().iter().cloned());
                    false
                })
                .build(&f)
                .unwrap();

            v.verify().unwrap();
            drop(v);

            assert_eq!(keys, vec![public]);
        }
    }

    fn legacy_object_signature(f: &FileImage, id: u32) -> DescriptorInput {
        let (secret, _) = test_entity();

        let data = f.descriptor(id).unwrap().data().to_vec();
        let digest = Digest::from_reader(HashAlgorithm::Sha256, Cursor::new(data)).unwrap();
        let plaintext = format!("SIFHASH:\n{}\n", hex::encode(digest.value()));

        let mut envelope = Vec::new();
        clearsign::sign(
            &mut envelope,
            &mut Cursor::new(plaintext.into_bytes()),
            secret,
            String::new,
            PgpHash::SHA2_256,
            Utc::now(),
        )
        .unwrap();

        DescriptorInput::new(DataType::Signature, envelope)
            .no_group()
            .linked_object(id)
            .signature_metadata(HashType::Sha256, secret.fingerprint())
    }

    #[test]
    fn legacy_all_verification() {
        let mut f = test_image();

        let sig1 = legacy_object_signature(&f, 1);
        let sig2 = legacy_object_signature(&f, 2);
        f.add_descriptor(sig1).unwrap();
        f.add_descriptor(sig2).unwrap();

        let mut verified = Vec::new();
        let mut v = VerifierBuilder::new()
            .with_key_ring(keyring())
            .legacy_all()
            .with_callback(|vr: &VerifyResult| {
                verified.extend(vr.verified().iter().map(|od| od.id()));
                false
            })
            .build(&f)
            .unwrap();

        v.verify().unwrap();
        drop(v);
        assert_eq!(verified, vec![1, 2]);

        // Without the legacy options, non-legacy scans exclude SIFHASH
        // payloads and find no signatures.
        let err = VerifierBuilder::new()
            .with_key_ring(keyring())
            .build(&f)
            .unwrap()
            .verify()
            .unwrap_err();

        assert!(err.is(&ErrorKind::SignatureNotFound { id: 0, is_group: false }));
    }

    #[test]
    fn legacy_group_verification() {
        let (secret, _) = test_entity();
        let mut f = test_image();

        // A legacy group signature digests the concatenated object data.
        let mut data = Vec::new();
        data.extend_from_slice(f.descriptor(1).unwrap().data());
        data.extend_from_slice(f.descriptor(2).unwrap().data());
        let digest = Digest::from_reader(HashAlgorithm::Sha256, Cursor::new(data)).unwrap();
        let plaintext = format!("SIFHASH:\n{}\n", hex::encode(digest.value()));

        let mut envelope = Vec::new();
        clearsign::sign(
            &mut envelope,
            &mut Cursor::new(plaintext.into_bytes()),
            secret,
            String::new,
            PgpHash::SHA2_256,
            Utc::now(),
        )
        .unwrap();

        f.add_descriptor(
            DescriptorInput::new(DataType::Signature, envelope)
                .no_group()
                .linked_group(1)
                .signature_metadata(HashType::Sha256, secret.fingerprint()),
        )
        .unwrap();

        VerifierBuilder::new()
            .with_key_ring(keyring())
            .legacy()
            .build(&f)
            .unwrap()
            .verify()
            .unwrap();

        // A tampered object fails the whole-group digest without naming
        // a specific object.
        let g = rebuild(
            vec![
                DescriptorInput::new(DataType::Deffile, b"one".to_vec()),
                DescriptorInput::new(DataType::Generic, b"owt".to_vec()),
            ],
            f.descriptor(3).unwrap(),
        );

        let err = VerifierBuilder::new()
            .with_key_ring(keyring())
            .legacy()
            .build(&g)
            .unwrap()
            .verify()
            .unwrap_err();

        assert!(err.is(&ErrorKind::ObjectIntegrity { id: 0 }));
    }

    #[test]
    fn any_and_all_signed_by() {
        let (secret, _) = test_entity();
        let fp = secret.fingerprint();

        let mut f = FileImage::create_with(
            [
                DescriptorInput::new(DataType::Deffile, b"one".to_vec()),
                DescriptorInput::new(DataType::Partition, b"three".to_vec()).group(2),
            ],
            CreateOpts::default().deterministic(),
        )
        .unwrap();

        // Sign only group 1.
        SignerBuilder::new()
            .with_secret_key(secret.clone(), None)
            .sign_group(1)
            .build(&mut f)
            .unwrap()
            .sign()
            .unwrap();

        {
            let v = VerifierBuilder::new()
                .with_key_ring(keyring())
                .build(&f)
                .unwrap();

            assert_eq!(v.any_signed_by().unwrap(), vec![fp.clone()]);
            assert_eq!(v.all_signed_by().unwrap(), Vec::<Vec<u8>>::new());
        }

        // Sign group 2 as well; the intersection becomes non-empty.
        SignerBuilder::new()
            .with_secret_key(secret.clone(), None)
            .sign_group(2)
            .build(&mut f)
            .unwrap()
            .sign()
            .unwrap();

        let v = VerifierBuilder::new()
            .with_key_ring(keyring())
            .build(&f)
            .unwrap();

        assert_eq!(v.any_signed_by().unwrap(), vec![fp.clone()]);
        assert_eq!(v.all_signed_by().unwrap(), vec![fp]);
    }

    #[test]
    fn sniffers_are_mutually_exclusive() {
        let f = clearsigned_image();
        let cs = f.descriptor(3).unwrap().data();

        assert!(is_clearsign_signature(cs));
        assert!(!is_dsse_signature(cs));

        let mut g = test_image();
        SignerBuilder::new()
            .with_signers([
                Box::new(KeyPairSigner::new(ed25519_key_pair())) as Box<dyn dsse::Signer>
            ])
            .build(&mut g)
            .unwrap()
            .sign()
            .unwrap();
        let ds = g.descriptor(3).unwrap().data();

        assert!(is_dsse_signature(ds));
        assert!(!is_clearsign_signature(ds));
    }

    #[test]
    fn builder_validates_selections() {
        let f = test_image();

        assert!(VerifierBuilder::new()
            .group(0)
            .build(&f)
            .unwrap_err()
            .is(&ErrorKind::InvalidGroupId));
        assert!(VerifierBuilder::new()
            .group(9)
            .build(&f)
            .unwrap_err()
            .is(&ErrorKind::GroupNotFound));
        assert!(VerifierBuilder::new()
            .object(0)
            .build(&f)
            .unwrap_err()
            .is(&ErrorKind::InvalidObjectId));
        assert!(VerifierBuilder::new()
            .object(9)
            .build(&f)
            .unwrap_err()
            .is(&ErrorKind::ObjectNotFound));
    }
}
