// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

/*! Signing and verification of SIF container images.

A SIF image holds a global header and a table of typed data object
descriptors organized into object groups. This crate adds cryptographic
signatures to such images and decides, on the verifier side, whether an
image has been tampered with and which entities signed which objects.

# Signing

A signature covers an object group (or a chosen subset of one). The
signer composes an *image metadata* document naming a digest of the
integrity-protected header fields, a digest of each covered descriptor
and a digest of each covered object payload, then seals the document in a
signed envelope stored as a signature descriptor linked to the group.
Object IDs inside the document are recorded relative to the group's
smallest ID, so signatures survive relocation of the group within the
image.

Two envelope formats are supported:

* OpenPGP clear-signed messages, produced from a [pgp::SignedSecretKey].
* DSSE envelopes with payload type `application/vnd.sylabs.sif-metadata+json`,
  produced from one or more [dsse::Signer]s.

Use [SignerBuilder] to configure which groups or objects to sign and with
what key material.

# Verification

[VerifierBuilder] configures a task list: whole groups, single objects
(accepting signatures over any superset), or legacy `SIFHASH:` signatures.
For each applicable signature, the verifier classifies the envelope
format by sniffing, verifies the cryptography, cross-checks the signer
identity against the fingerprint recorded in the signature descriptor,
then re-hashes the live image and compares against the signed metadata. A
per-signature [VerifyResult] is delivered to an optional callback, which
may elect to ignore individual errors.

Errors carry a structured [ErrorKind] supporting wildcard matching on
descriptor IDs; see [ErrorKind::matches].
*/

mod clearsign;
pub mod digest;
pub mod dsse;
pub mod error;
mod metadata;
mod result;
mod select;
mod sign;
#[cfg(test)]
mod testutil;
mod verify;

pub use {
    digest::{Digest, HashAlgorithm},
    error::{Error, ErrorKind, Result},
    result::VerifyResult,
    sign::{Signer, SignerBuilder},
    verify::{Verifier, VerifierBuilder, VerifyCallback},
};
