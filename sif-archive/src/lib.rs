// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

/*! SIF container image support.

A SIF image is a single file containing a global header followed by a
table of typed *data object descriptors* and a data region holding the
payload of each object. Descriptors belong to *object groups*; signature
descriptors carry no group of their own and instead *link* to the group
(or single object) they cover.

[FileImage] is the main type. Use [FileImage::create] to build a new
image from [DescriptorInput]s, [FileImage::load] / [FileImage::write_to]
for (de)serialization, and [FileImage::add_descriptor] to append objects
to an existing image.

The integrity-protected byte streams consumed by the sibling
`sif-integrity` crate are exposed via [FileImage::header_integrity_reader]
and [Descriptor::integrity_reader]. Both deliberately exclude fields that
legitimately change when an image is rewritten (timestamps, file offsets,
absolute object IDs) so that signatures remain valid when a group is
relocated within the image.
*/

pub mod descriptor;
pub mod image;

pub use {
    descriptor::{DataType, Descriptor, DescriptorInput, HashType},
    image::{CreateOpts, FileImage, Header},
};

/// Primary crate error type.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("bad magic value encountered")]
    BadMagic,

    #[error("unsupported archive version: {0}")]
    UnsupportedVersion(String),

    #[error("unknown data type: {0:#06x}")]
    UnknownDataType(u32),

    #[error("unknown hash type: {0}")]
    UnknownHashType(u32),

    #[error("data object {0} not found")]
    ObjectNotFound(u32),

    #[error("object name too long: {0} bytes")]
    NameTooLong(usize),

    #[error("fingerprint too long: {0} bytes")]
    FingerprintTooLong(usize),

    #[error("descriptor does not carry signature metadata")]
    NoSignatureMetadata,

    #[error("string value in descriptor is not UTF-8")]
    BadString,
}

/// Result type for this crate.
pub type Result<T> = std::result::Result<T, Error>;
