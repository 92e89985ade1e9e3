// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

/*! The signed image metadata document.

Version 1 of the metadata document binds the integrity-protected portion
of the image header, the integrity-protected fields of each signed
descriptor and the payload of each signed data object into a single JSON
structure:

```json
{
  "version": 1,
  "header": { "digest": "sha256:..." },
  "objects": [
    { "relativeId": 0, "descriptorDigest": "sha256:...", "objectDigest": "sha256:..." }
  ]
}
```

Object IDs are recorded relative to the smallest object ID of the signed
group, so the signed bytes remain valid if the group is relocated within
the image. The verifier re-anchors the IDs before comparison.
*/

use {
    crate::{
        digest::{Digest, HashAlgorithm},
        error::{ErrorKind, Result},
    },
    serde::{Deserialize, Serialize},
    sif_archive::{Descriptor, FileImage},
};

pub(crate) const METADATA_VERSION: i64 = 1;

#[derive(Clone, Debug, Deserialize, Serialize)]
pub(crate) struct HeaderMetadata {
    digest: Digest,
}

impl HeaderMetadata {
    fn new(f: &FileImage, hash: HashAlgorithm) -> Result<Self> {
        Ok(Self {
            digest: Digest::from_reader(hash, f.header_integrity_reader())?,
        })
    }

    fn matches(&self, f: &FileImage) -> Result<()> {
        if !self.digest.matches(f.header_integrity_reader())? {
            return Err(ErrorKind::HeaderIntegrity.into());
        }

        Ok(())
    }
}

#[derive(Clone, Debug, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct ObjectMetadata {
    relative_id: u32,
    descriptor_digest: Digest,
    object_digest: Digest,

    /// Absolute object ID, derived at load time.
    #[serde(skip)]
    id: u32,
}

impl ObjectMetadata {
    fn new(relative_id: u32, od: &Descriptor, hash: HashAlgorithm) -> Result<Self> {
        Ok(Self {
            relative_id,
            descriptor_digest: Digest::from_reader(hash, od.integrity_reader())?,
            object_digest: Digest::from_reader(hash, od.data_reader())?,
            id: od.id(),
        })
    }

    fn matches(&self, od: &Descriptor) -> Result<()> {
        if !self.descriptor_digest.matches(od.integrity_reader())? {
            return Err(ErrorKind::DescriptorIntegrity { id: od.id() }.into());
        }

        if !self.object_digest.matches(od.data_reader())? {
            return Err(ErrorKind::ObjectIntegrity { id: od.id() }.into());
        }

        Ok(())
    }
}

/// Image metadata, version 1.
#[derive(Clone, Debug, Deserialize, Serialize)]
pub(crate) struct ImageMetadata {
    version: i64,
    header: HeaderMetadata,
    objects: Vec<ObjectMetadata>,
}

impl ImageMetadata {
    /// Compose metadata over the image header and the given descriptors.
    ///
    /// `min_id` anchors the relative object IDs and must not exceed any
    /// descriptor ID.
    pub(crate) fn new(
        f: &FileImage,
        min_id: u32,
        ods: &[Descriptor],
        hash: HashAlgorithm,
    ) -> Result<Self> {
        let header = HeaderMetadata::new(f, hash)?;

        let mut objects = Vec::with_capacity(ods.len());
        for od in ods {
            let relative_id = od
                .id()
                .checked_sub(min_id)
                .ok_or(ErrorKind::MinimumIdInvalid)?;

            objects.push(ObjectMetadata::new(relative_id, od, hash)?);
        }

        objects.sort_by_key(|om| om.relative_id);

        Ok(Self {
            version: METADATA_VERSION,
            header,
            objects,
        })
    }

    /// Parse metadata from its JSON serialization.
    pub(crate) fn from_json(b: &[u8]) -> Result<Self> {
        let md: Self = serde_json::from_slice(b)?;

        if md.version != METADATA_VERSION {
            return Err(ErrorKind::UnsupportedMetadataVersion(md.version).into());
        }

        Ok(md)
    }

    /// Derive absolute object IDs by re-anchoring relative IDs at
    /// `min_id`.
    pub(crate) fn populate_absolute_object_ids(&mut self, min_id: u32) {
        for om in &mut self.objects {
            om.id = om.relative_id + min_id;
        }
    }

    /// Verify that the set of absolute object IDs in this metadata equals
    /// the set of IDs of `ods`.
    pub(crate) fn object_ids_match(&self, ods: &[Descriptor]) -> Result<()> {
        for od in ods {
            if !self.objects.iter().any(|om| om.id == od.id()) {
                return Err(ErrorKind::ObjectNotSigned { id: od.id() }.into());
            }
        }

        for om in &self.objects {
            if !ods.iter().any(|od| od.id() == om.id) {
                return Err(ErrorKind::SignedObjectNotFound { id: om.id }.into());
            }
        }

        Ok(())
    }

    /// Verify the header and the given descriptors against this metadata.
    ///
    /// Returns the descriptors that passed verification.
    pub(crate) fn matches(&self, f: &FileImage, ods: &[Descriptor]) -> Result<Vec<Descriptor>> {
        self.header.matches(f)?;

        let mut verified = Vec::with_capacity(ods.len());
        for od in ods {
            let om = self
                .objects
                .iter()
                .find(|om| om.id == od.id())
                .ok_or(ErrorKind::ObjectNotSigned { id: od.id() })?;

            om.matches(od)?;
            verified.push(od.clone());
        }

        Ok(verified)
    }
}
