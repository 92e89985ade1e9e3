// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

/*! The Dead Simple Signing Envelope codec.

A DSSE envelope is a JSON object of the form:

```json
{
  "payloadType": "application/vnd.sylabs.sif-metadata+json",
  "payload": "<base64>",
  "signatures": [{"keyid": "...", "sig": "<base64>"}]
}
```

Signatures are computed over the pre-authentication encoding (PAE) of the
payload type and payload, so the payload type is bound to the signed
bytes. Multiple signers may contribute signatures to one envelope;
verification succeeds when at least one signature is accepted by one of
the attached [Verifier]s.
*/

use {
    crate::{
        digest::HashAlgorithm,
        error::{ErrorKind, Result},
        result::VerifyResult,
        sign::MessageEncoder,
        verify::MessageDecoder,
    },
    bytes::Bytes,
    chrono::{DateTime, Utc},
    serde::{Deserialize, Serialize},
    signature::Signer as _,
    std::io::{Read, Write},
    x509_certificate::{InMemorySigningKeyPair, Sign},
};

/// The DSSE payload type bound to signed image metadata.
pub const METADATA_MEDIA_TYPE: &str = "application/vnd.sylabs.sif-metadata+json";

/// Produces a signature over a DSSE pre-authentication encoding.
///
/// Implementations digest the message according to their own key
/// algorithm; the metadata document's hash algorithm is chosen
/// independently by the signer configuration.
pub trait Signer {
    /// Sign `message`, returning the raw signature bytes.
    fn sign(&self, message: &[u8]) -> Result<Vec<u8>>;

    /// An optional identifier for the signing key.
    fn key_id(&self) -> Option<String> {
        None
    }
}

/// Verifies a signature over a DSSE pre-authentication encoding.
pub trait Verifier {
    /// Verify `signature` over `message`.
    fn verify(&self, message: &[u8], signature: &[u8]) -> Result<()>;

    /// An optional identifier for the verification key.
    fn key_id(&self) -> Option<String> {
        None
    }

    /// The raw bytes constituting the public key.
    fn public_key(&self) -> Bytes;
}

/// A DSSE [Signer] over an in-memory key pair.
pub struct KeyPairSigner {
    key: InMemorySigningKeyPair,
}

impl KeyPairSigner {
    pub fn new(key: InMemorySigningKeyPair) -> Self {
        Self { key }
    }
}

impl Signer for KeyPairSigner {
    fn sign(&self, message: &[u8]) -> Result<Vec<u8>> {
        Ok(self.key.try_sign(message).map(Vec::<u8>::from)?)
    }
}

/// A DSSE [Verifier] over a raw public key.
pub struct KeyVerifier {
    algorithm: &'static dyn ring::signature::VerificationAlgorithm,
    public_key: Bytes,
}

impl KeyVerifier {
    pub fn new(
        algorithm: &'static dyn ring::signature::VerificationAlgorithm,
        public_key: impl Into<Bytes>,
    ) -> Self {
        Self {
            algorithm,
            public_key: public_key.into(),
        }
    }

    /// Construct a verifier for the public half of a key pair.
    pub fn for_key_pair(key: &InMemorySigningKeyPair) -> Result<Self> {
        Ok(Self {
            algorithm: key.verification_algorithm()?,
            public_key: key.public_key_data(),
        })
    }
}

impl Verifier for KeyVerifier {
    fn verify(&self, message: &[u8], signature: &[u8]) -> Result<()> {
        ring::signature::UnparsedPublicKey::new(self.algorithm, &self.public_key)
            .verify(message, signature)
            .map_err(|_| signature::Error::new())?;

        Ok(())
    }

    fn public_key(&self) -> Bytes {
        self.public_key.clone()
    }
}

#[derive(Debug, Deserialize, Serialize)]
struct Envelope {
    #[serde(rename = "payloadType")]
    payload_type: String,
    payload: String,
    signatures: Vec<EnvelopeSignature>,
}

#[derive(Debug, Deserialize, Serialize)]
struct EnvelopeSignature {
    #[serde(default, skip_serializing_if = "String::is_empty")]
    keyid: String,
    sig: String,
}

/// The DSSE pre-authentication encoding of a payload.
fn pae(payload_type: &str, payload: &[u8]) -> Vec<u8> {
    let mut b = format!(
        "DSSEv1 {} {} {} ",
        payload_type.len(),
        payload_type,
        payload.len()
    )
    .into_bytes();
    b.extend_from_slice(payload);
    b
}

/// Whether `b` is a DSSE envelope carrying image metadata.
pub(crate) fn is_dsse_signature(b: &[u8]) -> bool {
    match serde_json::from_slice::<Envelope>(b) {
        Ok(e) => e.payload_type == METADATA_MEDIA_TYPE,
        Err(_) => false,
    }
}

/// DSSE message encoder bound to one or more signers.
pub(crate) struct DsseEncoder {
    signers: Vec<Box<dyn Signer>>,
    hash: HashAlgorithm,
}

impl DsseEncoder {
    /// Construct an encoder with the default SHA-256 reported hash.
    pub(crate) fn new(signers: Vec<Box<dyn Signer>>) -> Self {
        Self {
            signers,
            hash: HashAlgorithm::Sha256,
        }
    }

    /// Override the hash algorithm reported for signed envelopes.
    ///
    /// This is the value recorded in the signature descriptor's metadata;
    /// the inner signers digest according to their own key algorithm.
    pub(crate) fn with_hash(mut self, hash: HashAlgorithm) -> Self {
        self.hash = hash;
        self
    }
}

impl MessageEncoder for DsseEncoder {
    fn sign_message(
        &self,
        w: &mut dyn Write,
        r: &mut dyn Read,
        _time: DateTime<Utc>,
    ) -> Result<HashAlgorithm> {
        let mut payload = Vec::new();
        r.read_to_end(&mut payload)?;

        let message = pae(METADATA_MEDIA_TYPE, &payload);

        let mut signatures = Vec::with_capacity(self.signers.len());
        for signer in &self.signers {
            signatures.push(EnvelopeSignature {
                keyid: signer.key_id().unwrap_or_default(),
                sig: base64::encode(signer.sign(&message)?),
            });
        }

        let e = Envelope {
            payload_type: METADATA_MEDIA_TYPE.to_string(),
            payload: base64::encode(payload),
            signatures,
        };

        serde_json::to_writer(w, &e)?;

        Ok(self.hash)
    }
}

/// DSSE message decoder bound to a set of verifiers.
///
/// Decoding succeeds when at least one envelope signature is accepted by
/// one of the verifiers. The public key of every accepting verifier is
/// recorded in the [VerifyResult].
pub(crate) struct DsseDecoder<'a> {
    verifiers: &'a [Box<dyn Verifier>],
}

impl<'a> DsseDecoder<'a> {
    pub(crate) fn new(verifiers: &'a [Box<dyn Verifier>]) -> Self {
        Self { verifiers }
    }
}

impl MessageDecoder for DsseDecoder<'_> {
    fn verify_message(
        &self,
        b: &[u8],
        _hash: HashAlgorithm,
        vr: &mut VerifyResult,
    ) -> Result<Vec<u8>> {
        let e: Envelope = serde_json::from_slice(b)?;
        let payload = base64::decode(&e.payload)?;

        let message = pae(&e.payload_type, &payload);

        let mut keys = Vec::new();
        for verifier in self.verifiers {
            for sig in &e.signatures {
                let raw = base64::decode(&sig.sig)?;

                if verifier.verify(&message, &raw).is_ok() {
                    keys.push(verifier.public_key());
                    break;
                }
            }
        }

        if keys.is_empty() {
            return Err(ErrorKind::EnvelopeNotAccepted.into());
        }

        vr.keys = keys;

        if e.payload_type != METADATA_MEDIA_TYPE {
            return Err(ErrorKind::UnexpectedPayloadType(e.payload_type).into());
        }

        Ok(payload)
    }
}
