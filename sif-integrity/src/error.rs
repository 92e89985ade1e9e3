// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

/*! Error handling.

All public operations return [Error], which tags the underlying
[ErrorKind] with an `integrity:` provenance prefix exactly once. Callers
match on error kinds with [ErrorKind::matches], which supports wildcard
semantics for the kinds carrying a descriptor ID: a target ID of 0
matches any concrete ID.
*/

use {std::mem::discriminant, thiserror::Error as ThisError};

/// Primary crate error type.
///
/// A thin wrapper around [ErrorKind] adding the `integrity:` provenance
/// tag to the rendered message.
#[derive(Debug, ThisError)]
#[error("integrity: {0}")]
pub struct Error(#[from] ErrorKind);

impl Error {
    /// The kind of error that occurred.
    pub fn kind(&self) -> &ErrorKind {
        &self.0
    }

    /// Consume the error, returning its kind.
    pub fn into_kind(self) -> ErrorKind {
        self.0
    }

    /// Whether this error matches `target`, with wildcard ID semantics.
    pub fn is(&self, target: &ErrorKind) -> bool {
        self.0.matches(target)
    }
}

impl From<std::io::Error> for Error {
    fn from(e: std::io::Error) -> Self {
        Self(ErrorKind::Io(e))
    }
}

impl From<serde_json::Error> for Error {
    fn from(e: serde_json::Error) -> Self {
        Self(ErrorKind::Json(e))
    }
}

impl From<pgp::errors::Error> for Error {
    fn from(e: pgp::errors::Error) -> Self {
        Self(ErrorKind::Pgp(e))
    }
}

impl From<hex::FromHexError> for Error {
    fn from(e: hex::FromHexError) -> Self {
        Self(ErrorKind::Hex(e))
    }
}

impl From<base64::DecodeError> for Error {
    fn from(e: base64::DecodeError) -> Self {
        Self(ErrorKind::Base64(e))
    }
}

impl From<signature::Error> for Error {
    fn from(e: signature::Error) -> Self {
        Self(ErrorKind::Signature(e))
    }
}

impl From<x509_certificate::X509CertificateError> for Error {
    fn from(e: x509_certificate::X509CertificateError) -> Self {
        Self(ErrorKind::X509(e))
    }
}

impl From<sif_archive::Error> for Error {
    fn from(e: sif_archive::Error) -> Self {
        Self(ErrorKind::Archive(e))
    }
}

/// The set of conditions this crate can report.
#[derive(Debug, ThisError)]
pub enum ErrorKind {
    /// The digest of the integrity-protected header fields does not match
    /// the signed metadata.
    #[error("header integrity check failed")]
    HeaderIntegrity,

    /// The digest of a descriptor's integrity-protected fields does not
    /// match the signed metadata.
    #[error("{}", fmt_id("descriptor integrity check failed", *.id))]
    DescriptorIntegrity { id: u32 },

    /// The digest of a data object's payload does not match the signed
    /// metadata.
    #[error("{}", fmt_id("data integrity check failed", *.id))]
    ObjectIntegrity { id: u32 },

    /// No applicable signature was found.
    #[error("{}", fmt_not_found(*.id, *.is_group))]
    SignatureNotFound { id: u32, is_group: bool },

    /// A signature envelope failed to verify.
    #[error("{}: {}", fmt_id("signature not valid", *.id), .source)]
    SignatureNotValid {
        id: u32,
        #[source]
        source: Box<ErrorKind>,
    },

    /// The signing identity does not correspond to the fingerprint
    /// recorded in the signature descriptor.
    #[error("fingerprint in descriptor does not correspond to signing entity")]
    FingerprintMismatch,

    /// A non-signature data object does not belong to an object group.
    #[error("non-grouped object found")]
    NonGroupedObject,

    /// An object presented for verification is not covered by the
    /// signature.
    #[error("object {id} not signed")]
    ObjectNotSigned { id: u32 },

    /// An object covered by the signature is not present in the image.
    #[error("signed object {id} not found in image")]
    SignedObjectNotFound { id: u32 },

    /// The minimum object ID anchor exceeds an object ID in the group.
    #[error("invalid minimum object ID")]
    MinimumIdInvalid,

    #[error("invalid group ID")]
    InvalidGroupId,

    #[error("invalid object ID")]
    InvalidObjectId,

    #[error("no objects specified")]
    NoObjectsSpecified,

    /// An object was selected for signing under a group it does not
    /// belong to.
    #[error("unexpected group ID")]
    UnexpectedGroupId,

    #[error("no object groups found")]
    NoGroupsFound,

    #[error("group not found")]
    GroupNotFound,

    #[error("object not found")]
    ObjectNotFound,

    #[error("multiple objects found")]
    MultipleObjectsFound,

    /// The hash algorithm is not recognized.
    #[error("hash algorithm unsupported")]
    HashUnsupported,

    /// The hash algorithm is recognized but not available in this
    /// runtime.
    #[error("hash algorithm unavailable")]
    HashUnavailable,

    #[error("malformed digest")]
    DigestMalformed,

    #[error("unsupported metadata version: {0}")]
    UnsupportedMetadataVersion(i64),

    #[error("clearsigned message not found")]
    ClearsignedMessageNotFound,

    /// A DSSE envelope carries an unexpected payload type.
    #[error("unexpected DSSE payload type: {0}")]
    UnexpectedPayloadType(String),

    /// No signature in a DSSE envelope was accepted by any attached
    /// verifier.
    #[error("envelope not accepted by any attached verifier")]
    EnvelopeNotAccepted,

    #[error("key material not provided")]
    NoKeyMaterial,

    #[error("key material not provided for DSSE envelope")]
    NoKeyMaterialDsse,

    #[error("key material not provided for PGP clear-sign envelope")]
    NoKeyMaterialPgp,

    #[error("signature format not recognized")]
    SignatureFormatNotRecognized,

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("PGP error: {0}")]
    Pgp(#[from] pgp::errors::Error),

    #[error("hex parsing error: {0}")]
    Hex(#[from] hex::FromHexError),

    #[error("base64 decoding error: {0}")]
    Base64(#[from] base64::DecodeError),

    #[error("signature error: {0}")]
    Signature(#[from] signature::Error),

    #[error("X.509 key error: {0}")]
    X509(#[from] x509_certificate::X509CertificateError),

    #[error("archive error: {0}")]
    Archive(#[from] sif_archive::Error),
}

fn fmt_id(msg: &str, id: u32) -> String {
    match id {
        0 => msg.to_string(),
        id => format!("object {}: {}", id, msg),
    }
}

fn fmt_not_found(id: u32, is_group: bool) -> String {
    match (id, is_group) {
        (0, _) => "signature not found".to_string(),
        (id, true) => format!("signature not found for object group {}", id),
        (id, false) => format!("signature not found for object {}", id),
    }
}

impl ErrorKind {
    /// Whether this error kind matches `target`.
    ///
    /// Kinds carrying a descriptor ID compare with wildcard semantics: a
    /// `target` ID of 0 matches any concrete ID. The cause inside
    /// [ErrorKind::SignatureNotValid] is ignored by matching.
    pub fn matches(&self, target: &ErrorKind) -> bool {
        match (self, target) {
            (Self::DescriptorIntegrity { id: a }, Self::DescriptorIntegrity { id: b })
            | (Self::ObjectIntegrity { id: a }, Self::ObjectIntegrity { id: b })
            | (Self::ObjectNotSigned { id: a }, Self::ObjectNotSigned { id: b })
            | (Self::SignedObjectNotFound { id: a }, Self::SignedObjectNotFound { id: b })
            | (Self::SignatureNotValid { id: a, .. }, Self::SignatureNotValid { id: b, .. }) => {
                *b == 0 || a == b
            }
            (
                Self::SignatureNotFound { id: a, is_group: ga },
                Self::SignatureNotFound { id: b, is_group: gb },
            ) => *b == 0 || (a == b && ga == gb),
            _ => discriminant(self) == discriminant(target),
        }
    }
}

/// Result type for this crate.
pub type Result<T> = std::result::Result<T, Error>;

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn provenance_tag() {
        let err = Error::from(ErrorKind::HeaderIntegrity);
        assert_eq!(err.to_string(), "integrity: header integrity check failed");
    }

    #[test]
    fn id_formatting() {
        assert_eq!(
            ErrorKind::ObjectIntegrity { id: 0 }.to_string(),
            "data integrity check failed"
        );
        assert_eq!(
            ErrorKind::ObjectIntegrity { id: 2 }.to_string(),
            "object 2: data integrity check failed"
        );
        assert_eq!(
            ErrorKind::SignatureNotFound { id: 3, is_group: true }.to_string(),
            "signature not found for object group 3"
        );
        assert_eq!(
            ErrorKind::SignatureNotFound { id: 3, is_group: false }.to_string(),
            "signature not found for object 3"
        );
    }

    #[test]
    fn wildcard_matching() {
        let err = ErrorKind::DescriptorIntegrity { id: 7 };

        assert!(err.matches(&ErrorKind::DescriptorIntegrity { id: 7 }));
        assert!(err.matches(&ErrorKind::DescriptorIntegrity { id: 0 }));
        assert!(!err.matches(&ErrorKind::DescriptorIntegrity { id: 8 }));
        assert!(!err.matches(&ErrorKind::ObjectIntegrity { id: 7 }));
    }

    #[test]
    fn signature_not_valid_ignores_cause() {
        let err = ErrorKind::SignatureNotValid {
            id: 2,
            source: Box::new(ErrorKind::ClearsignedMessageNotFound),
        };

        assert!(err.matches(&ErrorKind::SignatureNotValid {
            id: 0,
            source: Box::new(ErrorKind::HeaderIntegrity),
        }));
        assert!(!err.matches(&ErrorKind::SignatureNotValid {
            id: 3,
            source: Box::new(ErrorKind::HeaderIntegrity),
        }));
    }

    #[test]
    fn wrapped_error_matching() {
        let err = Error::from(ErrorKind::NoKeyMaterialPgp);
        assert!(err.is(&ErrorKind::NoKeyMaterialPgp));
        assert!(!err.is(&ErrorKind::NoKeyMaterialDsse));
    }
}
