// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

/*! Image signing.

A [Signer] adds one signature per configured task to an image. Each task
covers an object group (or a subset of one): the signer composes the
image metadata document over the covered descriptors, seals it in a
signed envelope, and appends a signature descriptor linked to the group.

```no_run
# fn demo(f: &mut sif_archive::FileImage, key: pgp::SignedSecretKey) -> sif_integrity::Result<()> {
use sif_integrity::SignerBuilder;

SignerBuilder::new().with_secret_key(key, None).build(f)?.sign()?;
# Ok(())
# }
```
*/

use {
    crate::{
        clearsign::ClearsignEncoder,
        digest::HashAlgorithm,
        dsse::{self, DsseEncoder},
        error::{ErrorKind, Result},
        metadata::ImageMetadata,
        select::{get_group_ids, get_group_min_object_id, get_group_objects, get_object, insert_sorted},
    },
    chrono::{DateTime, TimeZone, Utc},
    log::debug,
    pgp::SignedSecretKey,
    sif_archive::{DataType, Descriptor, DescriptorInput, FileImage},
    std::{
        collections::BTreeMap,
        io::{Cursor, Read, Write},
    },
};

/// A signed-message encoder.
///
/// Implementations seal the content of `r` in a signed envelope written
/// to `w`, returning the hash algorithm to record in the signature
/// descriptor's metadata.
pub(crate) trait MessageEncoder {
    fn sign_message(
        &self,
        w: &mut dyn Write,
        r: &mut dyn Read,
        time: DateTime<Utc>,
    ) -> Result<HashAlgorithm>;

    /// The fingerprint identifying the signing key, if one exists.
    fn fingerprint(&self) -> Vec<u8> {
        Vec::new()
    }
}

/// Signs one object group.
#[derive(Debug)]
struct GroupSigner {
    group_id: u32,
    ods: Vec<Descriptor>,
    min_id: u32,
    md_hash: HashAlgorithm,
}

impl GroupSigner {
    /// Describe a signing task over the group with `group_id`.
    ///
    /// An empty `ods` covers the entire group. A non-empty `ods` covers
    /// only the given descriptors, each of which must belong to the
    /// group.
    fn new(
        f: &FileImage,
        group_id: u32,
        ods: Vec<Descriptor>,
        md_hash: HashAlgorithm,
    ) -> Result<Self> {
        // Object IDs in the metadata document are relative to the
        // smallest ID in the group, not in the covered subset.
        let min_id = get_group_min_object_id(f, group_id)?;

        let ods = if ods.is_empty() {
            get_group_objects(f, group_id)?.into_iter().cloned().collect()
        } else {
            for od in &ods {
                if od.group_id() != group_id {
                    return Err(ErrorKind::UnexpectedGroupId.into());
                }
            }
            ods
        };

        Ok(Self {
            group_id,
            ods,
            min_id,
            md_hash,
        })
    }

    /// Sign the group, returning the signature descriptor to append.
    fn sign(
        &self,
        f: &FileImage,
        en: &dyn MessageEncoder,
        time: DateTime<Utc>,
        object_time: DateTime<Utc>,
    ) -> Result<DescriptorInput> {
        let md = ImageMetadata::new(f, self.min_id, &self.ods, self.md_hash)?;
        let b = serde_json::to_vec(&md)?;

        let mut envelope = Vec::new();
        let ht = en.sign_message(&mut envelope, &mut Cursor::new(b), time)?;

        Ok(DescriptorInput::new(DataType::Signature, envelope)
            .no_group()
            .linked_group(self.group_id)
            .object_time(object_time)
            .signature_metadata(ht.to_hash_type()?, en.fingerprint()))
    }
}

/// Describes how a [Signer] is to be constructed.
#[derive(Default)]
pub struct SignerBuilder {
    key: Option<(SignedSecretKey, Option<String>)>,
    dsse_signers: Vec<Box<dyn dsse::Signer>>,
    group_ids: Vec<u32>,
    object_ids: Option<Vec<u32>>,
    time: Option<Box<dyn Fn() -> DateTime<Utc>>>,
    deterministic: bool,
    md_hash: HashAlgorithm,
}

impl SignerBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Sign with a PGP secret key, producing clear-signed envelopes.
    ///
    /// `passphrase` unlocks the key if it is encrypted.
    pub fn with_secret_key(mut self, key: SignedSecretKey, passphrase: Option<String>) -> Self {
        self.key = Some((key, passphrase));
        self
    }

    /// Sign with the given signers, producing DSSE envelopes.
    pub fn with_signers(
        mut self,
        signers: impl IntoIterator<Item = Box<dyn dsse::Signer>>,
    ) -> Self {
        self.dsse_signers.extend(signers);
        self
    }

    /// Add a task signing the object group with `group_id`.
    pub fn sign_group(mut self, group_id: u32) -> Self {
        self.group_ids.push(group_id);
        self
    }

    /// Add tasks signing the given objects.
    ///
    /// The objects are split by the group they belong to, with one task
    /// (and therefore one signature) per group.
    pub fn sign_objects(mut self, ids: impl IntoIterator<Item = u32>) -> Self {
        self.object_ids.get_or_insert_with(Vec::new).extend(ids);
        self
    }

    /// Override the time source used for signature and object
    /// timestamps.
    pub fn with_time(mut self, f: impl Fn() -> DateTime<Utc> + 'static) -> Self {
        self.time = Some(Box::new(f));
        self
    }

    /// Produce deterministic signature descriptors: object timestamps
    /// are zeroed and the envelope's own time source is left alone.
    pub fn deterministic(mut self) -> Self {
        self.deterministic = true;
        self
    }

    /// Override the hash algorithm used for metadata digests.
    ///
    /// Defaults to SHA-256. Restricted to SHA-224/256/384/512.
    pub fn with_metadata_hash(mut self, hash: HashAlgorithm) -> Self {
        self.md_hash = hash;
        self
    }

    /// Construct a [Signer] over `f`.
    pub fn build(self, f: &mut FileImage) -> Result<Signer<'_>> {
        let encoder: Box<dyn MessageEncoder> = if let Some((key, passphrase)) = self.key {
            Box::new(ClearsignEncoder::new(key, passphrase))
        } else if !self.dsse_signers.is_empty() {
            Box::new(DsseEncoder::new(self.dsse_signers))
        } else {
            return Err(ErrorKind::NoKeyMaterial.into());
        };

        if !matches!(
            self.md_hash,
            HashAlgorithm::Sha224
                | HashAlgorithm::Sha256
                | HashAlgorithm::Sha384
                | HashAlgorithm::Sha512
        ) {
            return Err(ErrorKind::HashUnsupported.into());
        }

        let mut tasks = Vec::new();

        let mut group_ids = Vec::new();
        insert_sorted(&mut group_ids, self.group_ids);

        for group_id in &group_ids {
            tasks.push(GroupSigner::new(f, *group_id, Vec::new(), self.md_hash)?);
        }

        if let Some(ids) = &self.object_ids {
            if ids.is_empty() {
                return Err(ErrorKind::NoObjectsSpecified.into());
            }

            let mut groups: BTreeMap<u32, Vec<Descriptor>> = BTreeMap::new();
            for id in ids {
                let od = get_object(f, *id)?;
                groups.entry(od.group_id()).or_default().push(od.clone());
            }

            for (group_id, ods) in groups {
                if group_ids.contains(&group_id) {
                    continue;
                }

                tasks.push(GroupSigner::new(f, group_id, ods, self.md_hash)?);
            }
        }

        // Default: one task per object group in the image.
        if tasks.is_empty() {
            for group_id in get_group_ids(f)? {
                tasks.push(GroupSigner::new(f, group_id, Vec::new(), self.md_hash)?);
            }
        }

        Ok(Signer {
            f,
            tasks,
            encoder,
            time: self.time,
            deterministic: self.deterministic,
        })
    }
}

/// Signs data objects in an image.
pub struct Signer<'a> {
    f: &'a mut FileImage,
    tasks: Vec<GroupSigner>,
    encoder: Box<dyn MessageEncoder>,
    time: Option<Box<dyn Fn() -> DateTime<Utc>>>,
    deterministic: bool,
}

impl std::fmt::Debug for Signer<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Signer")
            .field("tasks", &self.tasks)
            .field("deterministic", &self.deterministic)
            .finish()
    }
}

impl Signer<'_> {
    /// Sign the image, adding one signature descriptor per task.
    pub fn sign(&mut self) -> Result<()> {
        for gs in &self.tasks {
            let time = match &self.time {
                Some(f) => f(),
                None => Utc::now(),
            };
            let object_time = if self.deterministic {
                Utc.timestamp_opt(0, 0).unwrap()
            } else {
                time
            };

            debug!("signing object group {}", gs.group_id);

            let di = gs.sign(self.f, self.encoder.as_ref(), time, object_time)?;
            self.f.add_descriptor(di)?;
        }

        Ok(())
    }
}
