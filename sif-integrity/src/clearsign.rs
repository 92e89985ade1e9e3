// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

/*! The OpenPGP clear-sign envelope codec.

Signed messages use the PGP cleartext framework defined by
[RFC 4880 Section 7](https://datatracker.ietf.org/doc/html/rfc4880.html#section-7):
the signed text is kept human-readable between armor headers, with a
detached signature block appended:

```text
-----BEGIN PGP SIGNED MESSAGE-----
Hash: <digest>

<normalized signed content>
-----BEGIN PGP SIGNATURE-----

<signature data>
-----END PGP SIGNATURE-----
```

Verification is restricted to the SHA-224/256/384/512 hash algorithms and
additionally requires the signature's hash to equal the hash recorded in
the signature descriptor's metadata.
*/

use {
    crate::{
        digest::HashAlgorithm,
        error::{Error, ErrorKind, Result},
        result::VerifyResult,
        sign::MessageEncoder,
        verify::MessageDecoder,
    },
    chrono::{DateTime, SubsecRound, Utc},
    digest::Digest as DigestTrait,
    pgp::{
        crypto::{HashAlgorithm as PgpHash, Hasher as PgpHasher},
        packet::{Packet, PacketParser, SignatureConfig, SignatureType, Subpacket},
        types::{KeyTrait, KeyVersion, PublicKeyTrait},
        Signature, SignedPublicKey, SignedSecretKey,
    },
    smallvec::SmallVec,
    std::io::{BufRead, Cursor, Read, Write},
};

const HEADER: &str = "-----BEGIN PGP SIGNED MESSAGE-----";
const SIGNATURE_ARMOR: &str = "-----BEGIN PGP SIGNATURE-----";

/// Hash algorithms accepted when verifying clear-signed messages.
const ALLOWED_HASHES: [PgpHash; 4] = [
    PgpHash::SHA2_224,
    PgpHash::SHA2_256,
    PgpHash::SHA2_384,
    PgpHash::SHA2_512,
];

/// Whether `b` begins with a PGP clear-signed armor header.
pub(crate) fn is_clearsign_signature(b: &[u8]) -> bool {
    b.starts_with(HEADER.as_bytes())
}

/// Content hasher for clear-signed text.
#[derive(Clone)]
enum ContentHasher {
    Sha1(sha1::Sha1),
    Sha224(sha2::Sha224),
    Sha256(sha2::Sha256),
    Sha384(sha2::Sha384),
    Sha512(sha2::Sha512),
}

impl ContentHasher {
    fn new(alg: PgpHash) -> Option<Self> {
        match alg {
            PgpHash::SHA1 => Some(Self::Sha1(sha1::Sha1::new())),
            PgpHash::SHA2_224 => Some(Self::Sha224(sha2::Sha224::new())),
            PgpHash::SHA2_256 => Some(Self::Sha256(sha2::Sha256::new())),
            PgpHash::SHA2_384 => Some(Self::Sha384(sha2::Sha384::new())),
            PgpHash::SHA2_512 => Some(Self::Sha512(sha2::Sha512::new())),
            _ => None,
        }
    }
}

impl PgpHasher for ContentHasher {
    fn update(&mut self, data: &[u8]) {
        match self {
            Self::Sha1(h) => h.update(data),
            Self::Sha224(h) => h.update(data),
            Self::Sha256(h) => h.update(data),
            Self::Sha384(h) => h.update(data),
            Self::Sha512(h) => h.update(data),
        }
    }

    fn finish(self: Box<Self>) -> Vec<u8> {
        match *self {
            Self::Sha1(h) => h.finalize().to_vec(),
            Self::Sha224(h) => h.finalize().to_vec(),
            Self::Sha256(h) => h.finalize().to_vec(),
            Self::Sha384(h) => h.finalize().to_vec(),
            Self::Sha512(h) => h.finalize().to_vec(),
        }
    }
}

impl Write for ContentHasher {
    fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
        PgpHasher::update(self, buf);
        Ok(buf.len())
    }

    fn flush(&mut self) -> std::io::Result<()> {
        Ok(())
    }
}

fn hash_name(alg: PgpHash) -> Option<&'static str> {
    match alg {
        PgpHash::SHA1 => Some("SHA1"),
        PgpHash::SHA2_224 => Some("SHA224"),
        PgpHash::SHA2_256 => Some("SHA256"),
        PgpHash::SHA2_384 => Some("SHA384"),
        PgpHash::SHA2_512 => Some("SHA512"),
        _ => None,
    }
}

fn parse_hash_name(name: &str) -> Option<PgpHash> {
    match name {
        "SHA1" => Some(PgpHash::SHA1),
        "SHA224" => Some(PgpHash::SHA2_224),
        "SHA256" => Some(PgpHash::SHA2_256),
        "SHA384" => Some(PgpHash::SHA2_384),
        "SHA512" => Some(PgpHash::SHA2_512),
        _ => None,
    }
}

fn pgp_hash(h: HashAlgorithm) -> Option<PgpHash> {
    match h {
        HashAlgorithm::Sha1 => Some(PgpHash::SHA1),
        HashAlgorithm::Sha224 => Some(PgpHash::SHA2_224),
        HashAlgorithm::Sha256 => Some(PgpHash::SHA2_256),
        HashAlgorithm::Sha384 => Some(PgpHash::SHA2_384),
        HashAlgorithm::Sha512 => Some(PgpHash::SHA2_512),
        HashAlgorithm::Blake2s256 | HashAlgorithm::Blake2b256 => None,
    }
}

fn hash_mismatch() -> Error {
    pgp::errors::Error::Message("signature hash algorithm mismatch".to_string()).into()
}

/// A parsed clear-signed message.
#[derive(Debug)]
pub(crate) struct ClearsignMessage {
    lines: Vec<String>,
    signatures: Vec<Signature>,
}

impl ClearsignMessage {
    /// Parse the first clear-signed block from `b`.
    ///
    /// Returns [ErrorKind::ClearsignedMessageNotFound] if `b` does not
    /// begin with a cleartext armor header.
    pub(crate) fn parse(b: &[u8]) -> Result<Self> {
        let mut r = Cursor::new(b);

        let mut line = String::new();
        r.read_line(&mut line)?;
        if line.trim_end() != HEADER {
            return Err(ErrorKind::ClearsignedMessageNotFound.into());
        }

        // One or more `Hash: ` armor headers, terminated by an empty line.
        let mut saw_hash = false;
        loop {
            line.clear();
            if r.read_line(&mut line)? == 0 {
                return Err(ErrorKind::ClearsignedMessageNotFound.into());
            }

            if let Some(names) = line.strip_prefix("Hash: ") {
                for name in names.split(',') {
                    let name = name.trim();
                    if name.is_empty() {
                        continue;
                    }

                    parse_hash_name(name).ok_or_else(|| {
                        Error::from(pgp::errors::Error::Unsupported(format!(
                            "unsupported PGP hash type: {}",
                            name
                        )))
                    })?;
                    saw_hash = true;
                }
            } else if line.trim().is_empty() {
                if !saw_hash {
                    return Err(ErrorKind::ClearsignedMessageNotFound.into());
                }
                break;
            } else {
                return Err(ErrorKind::ClearsignedMessageNotFound.into());
            }
        }

        // The dash-escaped cleartext, terminated by the signature armor.
        let mut lines = Vec::new();
        loop {
            line.clear();
            if r.read_line(&mut line)? == 0 {
                return Err(ErrorKind::ClearsignedMessageNotFound.into());
            }

            if line.trim_end() == SIGNATURE_ARMOR {
                break;
            }

            let l = line.strip_prefix("- ").unwrap_or(&line);
            lines.push(l.trim_end().to_string());
        }

        // Re-create the armor for the pgp crate's dearmorer.
        let mut armor = format!("{}\n", SIGNATURE_ARMOR).into_bytes();
        r.read_to_end(&mut armor)?;

        let mut dearmor = pgp::armor::Dearmor::new(Cursor::new(armor));
        dearmor.read_header()?;

        if !matches!(dearmor.typ, Some(pgp::armor::BlockType::Signature)) {
            return Err(pgp::errors::Error::Message(
                "failed to parse PGP signature armor".to_string(),
            )
            .into());
        }

        let mut signatures = Vec::new();
        for packet in PacketParser::new(dearmor) {
            match packet? {
                Packet::Signature(sig) => signatures.push(sig),
                packet => {
                    return Err(pgp::errors::Error::Message(format!(
                        "unexpected PGP packet seen; expected Signature; got {:?}",
                        packet.tag()
                    ))
                    .into());
                }
            }
        }

        Ok(Self { lines, signatures })
    }

    /// The embedded plaintext with LF line endings.
    pub(crate) fn plaintext(&self) -> Vec<u8> {
        let mut s = self.lines.join("\n");
        s.push('\n');
        s.into_bytes()
    }

    /// The signed text in its canonical CRLF form.
    ///
    /// The line ending before the signature armor is not part of the
    /// signed text.
    fn signed_content(&self) -> Vec<u8> {
        self.lines.join("\r\n").into_bytes()
    }

    /// Verify the message signature against a keyring and return the
    /// signing key.
    ///
    /// Only signatures made with `expected` are accepted, and `expected`
    /// must itself be drawn from the SHA-224/256/384/512 set.
    pub(crate) fn verify(
        &self,
        keyring: &[SignedPublicKey],
        expected: PgpHash,
    ) -> Result<SignedPublicKey> {
        if self.signatures.is_empty() {
            return Err(pgp::errors::Error::Message("no PGP signatures present".to_string()).into());
        }

        for sig in &self.signatures {
            let issuer = match sig.issuer() {
                Some(issuer) => issuer,
                None => continue,
            };

            for key in keyring {
                if &key.key_id() == issuer {
                    self.check_hash(sig, expected)?;
                    self.verify_one(sig, key)?;
                    return Ok(key.clone());
                }

                if let Some(subkey) = key
                    .public_subkeys
                    .iter()
                    .find(|subkey| &subkey.key_id() == issuer)
                {
                    self.check_hash(sig, expected)?;
                    self.verify_one(sig, subkey)?;
                    return Ok(key.clone());
                }
            }
        }

        Err(pgp::errors::Error::Message(
            "no signatures signed by provided keyring".to_string(),
        )
        .into())
    }

    fn check_hash(&self, sig: &Signature, expected: PgpHash) -> Result<()> {
        if !ALLOWED_HASHES.contains(&expected) || sig.config.hash_alg != expected {
            return Err(hash_mismatch());
        }

        Ok(())
    }

    fn verify_one(&self, sig: &Signature, signer: &impl PublicKeyTrait) -> Result<()> {
        let mut hasher = Box::new(ContentHasher::new(sig.config.hash_alg).ok_or_else(|| {
            Error::from(pgp::errors::Error::Unsupported(format!(
                "unsupported signature hash algorithm: {:?}",
                sig.config.hash_alg
            )))
        })?);

        hasher.update(&self.signed_content());

        let len = sig.config.hash_signature_data(&mut *hasher)?;
        hasher.update(&sig.config.trailer(len));

        let digest = hasher.finish();

        if digest[0..2] != sig.signed_hash_value {
            return Err(pgp::errors::Error::Message("invalid signed hash value".to_string()).into());
        }

        signer.verify_signature(sig.config.hash_alg, &digest, &sig.signature)?;

        Ok(())
    }
}

/// Produce a clear-signed message over the content of `r`.
///
/// The signed content is normalized per RFC 4880: trailing whitespace is
/// stripped, line endings are canonicalized to CRLF for hashing, and
/// lines beginning with a dash are dash-escaped in the emitted document.
pub(crate) fn sign<PW>(
    w: &mut dyn Write,
    r: &mut dyn Read,
    key: &SignedSecretKey,
    key_pw: PW,
    hash: PgpHash,
    time: DateTime<Utc>,
) -> Result<()>
where
    PW: FnOnce() -> String,
{
    let name = hash_name(hash).ok_or_else(|| {
        Error::from(pgp::errors::Error::Unsupported(
            "hash algorithm unsupported for cleartext signatures".to_string(),
        ))
    })?;

    let mut dashed_lines = vec![];
    let mut source_lines = vec![];

    for line in std::io::BufReader::new(r).lines() {
        let line = line?;

        dashed_lines.push(if line.starts_with('-') || line.starts_with("From ") {
            format!("- {}", line.trim_end())
        } else {
            line.trim_end().to_string()
        });

        source_lines.push(line.trim_end().to_string());
    }

    let cleartext = source_lines.join("\r\n").into_bytes();

    let hashed_subpackets = vec![
        Subpacket::IssuerFingerprint(KeyVersion::V4, SmallVec::from_slice(&key.fingerprint())),
        Subpacket::SignatureCreationTime(time.trunc_subsecs(0)),
    ];
    let unhashed_subpackets = vec![Subpacket::Issuer(key.key_id())];

    let config = SignatureConfig::new_v4(
        Default::default(),
        SignatureType::Text,
        key.algorithm(),
        hash,
        hashed_subpackets,
        unhashed_subpackets,
    );

    let signature = config.sign(key, key_pw, Cursor::new(cleartext))?;

    let packet = Packet::Signature(signature);
    let mut armor = Cursor::new(Vec::<u8>::new());
    pgp::armor::write(&packet, pgp::armor::BlockType::Signature, &mut armor, None)?;

    let signature_string = String::from_utf8(armor.into_inner())
        .map_err(|e| pgp::errors::Error::Utf8Error(e.utf8_error()))?;

    let lines = vec![HEADER.to_string(), format!("Hash: {}", name), String::new()]
        .into_iter()
        .chain(dashed_lines.into_iter())
        .chain(std::iter::once(signature_string))
        .collect::<Vec<_>>();

    w.write_all(lines.join("\n").as_bytes())?;

    Ok(())
}

/// Clear-sign message encoder bound to a signing key.
pub(crate) struct ClearsignEncoder {
    key: SignedSecretKey,
    passphrase: Option<String>,
}

impl ClearsignEncoder {
    pub(crate) fn new(key: SignedSecretKey, passphrase: Option<String>) -> Self {
        Self { key, passphrase }
    }
}

impl MessageEncoder for ClearsignEncoder {
    fn sign_message(
        &self,
        w: &mut dyn Write,
        r: &mut dyn Read,
        time: DateTime<Utc>,
    ) -> Result<HashAlgorithm> {
        let pw = self.passphrase.clone().unwrap_or_default();

        sign(w, r, &self.key, move || pw, PgpHash::SHA2_256, time)?;

        Ok(HashAlgorithm::Sha256)
    }

    fn fingerprint(&self) -> Vec<u8> {
        self.key.fingerprint()
    }
}

/// Clear-sign message decoder bound to a keyring.
pub(crate) struct ClearsignDecoder<'a> {
    keyring: &'a [SignedPublicKey],
}

impl<'a> ClearsignDecoder<'a> {
    pub(crate) fn new(keyring: &'a [SignedPublicKey]) -> Self {
        Self { keyring }
    }
}

impl MessageDecoder for ClearsignDecoder<'_> {
    fn verify_message(
        &self,
        b: &[u8],
        hash: HashAlgorithm,
        vr: &mut VerifyResult,
    ) -> Result<Vec<u8>> {
        let msg = ClearsignMessage::parse(b)?;

        let expected = pgp_hash(hash).ok_or_else(hash_mismatch)?;
        let entity = msg.verify(self.keyring, expected)?;
        vr.entity = Some(entity);

        Ok(msg.plaintext())
    }
}

#[cfg(test)]
mod test {
    use {super::*, crate::testutil::test_entity};

    fn clearsign(content: &[u8], hash: PgpHash) -> Vec<u8> {
        let (secret, _) = test_entity();

        let mut b = Vec::new();
        sign(
            &mut b,
            &mut Cursor::new(content),
            secret,
            String::new,
            hash,
            Utc::now(),
        )
        .unwrap();

        b
    }

    #[test]
    fn sign_and_verify_round_trip() {
        let (_, public) = test_entity();
        let b = clearsign(b"{\"One\":1,\"Two\":2}\n", PgpHash::SHA2_256);

        assert!(is_clearsign_signature(&b));

        let msg = ClearsignMessage::parse(&b).unwrap();
        let entity = msg.verify(std::slice::from_ref(public), PgpHash::SHA2_256).unwrap();

        assert_eq!(entity.fingerprint(), public.fingerprint());
        assert_eq!(msg.plaintext(), b"{\"One\":1,\"Two\":2}\n");
    }

    #[test]
    fn dash_escaping_round_trip() {
        let (_, public) = test_entity();
        let b = clearsign(b"-- escaped line\nplain line\n", PgpHash::SHA2_256);

        let msg = ClearsignMessage::parse(&b).unwrap();
        msg.verify(std::slice::from_ref(public), PgpHash::SHA2_256).unwrap();

        assert_eq!(msg.plaintext(), b"-- escaped line\nplain line\n");
    }

    #[test]
    fn tampered_plaintext_rejected() {
        let (_, public) = test_entity();
        let b = clearsign(b"{\"One\":1,\"Two\":2}\n", PgpHash::SHA2_256);

        let s = String::from_utf8(b).unwrap();
        let s = s.replace("{\"One\":1,\"Two\":2}", "{\"One\":2,\"Two\":4}");

        let msg = ClearsignMessage::parse(s.as_bytes()).unwrap();
        assert!(msg
            .verify(std::slice::from_ref(public), PgpHash::SHA2_256)
            .is_err());
    }

    #[test]
    fn wrong_expected_hash_rejected() {
        let (_, public) = test_entity();
        let b = clearsign(b"content\n", PgpHash::SHA2_256);

        let msg = ClearsignMessage::parse(&b).unwrap();
        let err = msg
            .verify(std::slice::from_ref(public), PgpHash::SHA2_512)
            .unwrap_err();

        assert!(err.to_string().contains("hash algorithm mismatch"));
    }

    #[test]
    fn sha1_signature_rejected() {
        let (_, public) = test_entity();
        let b = clearsign(b"content\n", PgpHash::SHA1);

        let msg = ClearsignMessage::parse(&b).unwrap();

        // SHA-1 is outside the accepted hash set, even when expected.
        let err = msg
            .verify(std::slice::from_ref(public), PgpHash::SHA1)
            .unwrap_err();
        assert!(err.to_string().contains("hash algorithm mismatch"));
    }

    #[test]
    fn unknown_keyring_rejected() {
        let b = clearsign(b"content\n", PgpHash::SHA2_256);

        let msg = ClearsignMessage::parse(&b).unwrap();
        assert!(msg.verify(&[], PgpHash::SHA2_256).is_err());
    }

    #[test]
    fn not_clearsigned() {
        assert!(!is_clearsign_signature(b"{\"payloadType\": \"x\"}"));

        assert!(ClearsignMessage::parse(b"not a message")
            .unwrap_err()
            .is(&ErrorKind::ClearsignedMessageNotFound));
    }
}
