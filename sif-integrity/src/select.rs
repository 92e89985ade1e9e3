// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

/*! Descriptor selection helpers.

These helpers translate "this group", "this object" and "all signatures
covering X" into descriptor sets. Legacy and non-legacy signatures are
kept disjoint: a signature is legacy when its clear-signed plaintext is a
`SIFHASH:` digest rather than an image metadata document.
*/

use {
    crate::{
        clearsign::ClearsignMessage,
        digest::LEGACY_PREFIX,
        error::{ErrorKind, Result},
    },
    sif_archive::{DataType, Descriptor, FileImage},
};

/// Obtain the object with `id`.
pub(crate) fn get_object(f: &FileImage, id: u32) -> Result<&Descriptor> {
    if id == 0 {
        return Err(ErrorKind::InvalidObjectId.into());
    }

    let mut ods = f.descriptors_with(|d| d.id() == id);

    match ods.len() {
        0 => Err(ErrorKind::ObjectNotFound.into()),
        1 => Ok(ods.remove(0)),
        _ => Err(ErrorKind::MultipleObjectsFound.into()),
    }
}

/// Obtain all non-signature objects in the group with `group_id`.
pub(crate) fn get_group_objects(f: &FileImage, group_id: u32) -> Result<Vec<&Descriptor>> {
    if group_id == 0 {
        return Err(ErrorKind::InvalidGroupId.into());
    }

    let ods =
        f.descriptors_with(|d| d.data_type() != DataType::Signature && d.group_id() == group_id);

    if ods.is_empty() {
        return Err(ErrorKind::GroupNotFound.into());
    }

    Ok(ods)
}

/// The minimum object ID in the group with `group_id`.
pub(crate) fn get_group_min_object_id(f: &FileImage, group_id: u32) -> Result<u32> {
    let ods = get_group_objects(f, group_id)?;

    Ok(ods
        .iter()
        .map(|od| od.id())
        .min()
        .expect("group object set is non-empty"))
}

/// Whether a signature payload is a legacy signature.
///
/// Legacy plaintexts begin with `SIFHASH:`; non-legacy plaintexts are
/// JSON metadata documents and cannot.
pub(crate) fn is_legacy_signature(b: &[u8]) -> bool {
    match ClearsignMessage::parse(b) {
        Ok(msg) => msg.plaintext().starts_with(LEGACY_PREFIX),
        Err(_) => false,
    }
}

/// Obtain signature objects linked to the group with `group_id`.
///
/// When `legacy` is set, only legacy signatures are returned; otherwise
/// only non-legacy signatures are returned.
pub(crate) fn get_group_signatures(
    f: &FileImage,
    group_id: u32,
    legacy: bool,
) -> Result<Vec<&Descriptor>> {
    if group_id == 0 {
        return Err(ErrorKind::InvalidGroupId.into());
    }

    let sigs = f.descriptors_with(|d| {
        d.data_type() == DataType::Signature
            && d.linked_id() == Some((group_id, true))
            && is_legacy_signature(d.data()) == legacy
    });

    if sigs.is_empty() {
        return Err(ErrorKind::SignatureNotFound {
            id: group_id,
            is_group: true,
        }
        .into());
    }

    Ok(sigs)
}

/// Obtain signature objects linked directly to the object with `id`.
pub(crate) fn get_object_signatures(f: &FileImage, id: u32) -> Result<Vec<&Descriptor>> {
    if id == 0 {
        return Err(ErrorKind::InvalidObjectId.into());
    }

    let sigs = f.descriptors_with(|d| {
        d.data_type() == DataType::Signature && d.linked_id() == Some((id, false))
    });

    if sigs.is_empty() {
        return Err(ErrorKind::SignatureNotFound { id, is_group: false }.into());
    }

    Ok(sigs)
}

/// Obtain the sorted, deduplicated group IDs present in the image.
pub(crate) fn get_group_ids(f: &FileImage) -> Result<Vec<u32>> {
    let mut ids = Vec::new();
    insert_sorted(&mut ids, f.descriptors().map(|d| d.group_id()).filter(|id| *id != 0));

    if ids.is_empty() {
        return Err(ErrorKind::NoGroupsFound.into());
    }

    Ok(ids)
}

/// Obtain the sorted, deduplicated fingerprints found in `sigs`.
pub(crate) fn get_fingerprints(sigs: &[Descriptor]) -> Result<Vec<Vec<u8>>> {
    let mut fps = Vec::new();

    for sig in sigs {
        let (_, fp) = sig.signature_metadata()?;
        insert_sorted(&mut fps, [fp.to_vec()]);
    }

    Ok(fps)
}

/// Insert values into a sorted vector, keeping it sorted and free of
/// duplicates.
pub(crate) fn insert_sorted<T: Ord>(xs: &mut Vec<T>, vs: impl IntoIterator<Item = T>) {
    for v in vs {
        if let Err(idx) = xs.binary_search(&v) {
            xs.insert(idx, v);
        }
    }
}
