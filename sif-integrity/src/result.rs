// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

/*! Per-signature verification results. */

use {crate::error::Error, bytes::Bytes, pgp::SignedPublicKey, sif_archive::Descriptor};

/// The result of examining one signature during verification.
///
/// A result is produced for every signature examined and delivered to the
/// verification callback, if one is registered.
pub struct VerifyResult {
    pub(crate) sig: Descriptor,
    pub(crate) verified: Vec<Descriptor>,
    pub(crate) keys: Vec<Bytes>,
    pub(crate) entity: Option<SignedPublicKey>,
    pub(crate) error: Option<Error>,
}

impl VerifyResult {
    pub(crate) fn new(sig: Descriptor) -> Self {
        Self {
            sig,
            verified: Vec::new(),
            keys: Vec::new(),
            entity: None,
            error: None,
        }
    }

    /// The signature object examined.
    pub fn signature(&self) -> &Descriptor {
        &self.sig
    }

    /// The data objects that passed integrity verification.
    pub fn verified(&self) -> &[Descriptor] {
        &self.verified
    }

    /// The public keys of the DSSE verifiers that accepted the envelope.
    pub fn keys(&self) -> &[Bytes] {
        &self.keys
    }

    /// The PGP entity that signed the envelope, if the envelope is
    /// clear-signed.
    pub fn entity(&self) -> Option<&SignedPublicKey> {
        self.entity.as_ref()
    }

    /// The error encountered while examining the signature, if any.
    pub fn error(&self) -> Option<&Error> {
        self.error.as_ref()
    }
}
