// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

/*! Hash algorithms and digest values.

The canonical textual form of a digest is `<alg>:<hex>`, e.g.
`sha256:a948904f...`. This is also the JSON encoding used inside signed
image metadata, which makes the metadata document stable across hash
algorithm choices.
*/

use {
    crate::error::{Error, ErrorKind, Result},
    digest::Digest as DigestTrait,
    serde::{de, Deserialize, Deserializer, Serialize, Serializer},
    sif_archive::HashType,
    std::{
        fmt::{Display, Formatter},
        io::{self, Read, Write},
    },
};

/// Prefix of the legacy signature plaintext form.
pub(crate) const LEGACY_PREFIX: &[u8] = b"SIFHASH:\n";

/// The set of hash algorithms recognized by this crate.
///
/// The BLAKE2 entries exist so that hash types recorded in legacy
/// signature descriptors can be decoded; this runtime does not link the
/// BLAKE2 algorithms and reports [ErrorKind::HashUnavailable] when asked
/// to compute them.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Hash)]
pub enum HashAlgorithm {
    Sha1,
    Sha224,
    Sha256,
    Sha384,
    Sha512,
    Blake2s256,
    Blake2b256,
}

impl HashAlgorithm {
    /// The canonical lowercase name of the algorithm.
    pub fn name(&self) -> &'static str {
        match self {
            Self::Sha1 => "sha1",
            Self::Sha224 => "sha224",
            Self::Sha256 => "sha256",
            Self::Sha384 => "sha384",
            Self::Sha512 => "sha512",
            Self::Blake2s256 => "blake2s-256",
            Self::Blake2b256 => "blake2b-256",
        }
    }

    /// Resolve an algorithm from its canonical name.
    pub fn from_name(name: &str) -> Result<Self> {
        match name {
            "sha1" => Ok(Self::Sha1),
            "sha224" => Ok(Self::Sha224),
            "sha256" => Ok(Self::Sha256),
            "sha384" => Ok(Self::Sha384),
            "sha512" => Ok(Self::Sha512),
            "blake2s-256" => Ok(Self::Blake2s256),
            "blake2b-256" => Ok(Self::Blake2b256),
            _ => Err(ErrorKind::HashUnsupported.into()),
        }
    }

    /// The digest size in bytes.
    pub fn output_len(&self) -> usize {
        match self {
            Self::Sha1 => 20,
            Self::Sha224 => 28,
            Self::Sha256 => 32,
            Self::Sha384 => 48,
            Self::Sha512 => 64,
            Self::Blake2s256 | Self::Blake2b256 => 32,
        }
    }

    /// Whether digests of this algorithm can be computed by this runtime.
    pub fn is_available(&self) -> bool {
        !matches!(self, Self::Blake2s256 | Self::Blake2b256)
    }

    pub(crate) fn new_hasher(&self) -> Result<Hasher> {
        match self {
            Self::Sha1 => Ok(Hasher::Sha1(sha1::Sha1::new())),
            Self::Sha224 => Ok(Hasher::Sha224(sha2::Sha224::new())),
            Self::Sha256 => Ok(Hasher::Sha256(sha2::Sha256::new())),
            Self::Sha384 => Ok(Hasher::Sha384(sha2::Sha384::new())),
            Self::Sha512 => Ok(Hasher::Sha512(sha2::Sha512::new())),
            Self::Blake2s256 | Self::Blake2b256 => Err(ErrorKind::HashUnavailable.into()),
        }
    }

    /// The container hash type identifying this algorithm, if one exists.
    pub(crate) fn to_hash_type(self) -> Result<HashType> {
        match self {
            Self::Sha256 => Ok(HashType::Sha256),
            Self::Sha384 => Ok(HashType::Sha384),
            Self::Sha512 => Ok(HashType::Sha512),
            Self::Blake2s256 => Ok(HashType::Blake2s256),
            Self::Blake2b256 => Ok(HashType::Blake2b256),
            Self::Sha1 | Self::Sha224 => Err(ErrorKind::HashUnsupported.into()),
        }
    }
}

impl From<HashType> for HashAlgorithm {
    fn from(v: HashType) -> Self {
        match v {
            HashType::Sha256 => Self::Sha256,
            HashType::Sha384 => Self::Sha384,
            HashType::Sha512 => Self::Sha512,
            HashType::Blake2s256 => Self::Blake2s256,
            HashType::Blake2b256 => Self::Blake2b256,
        }
    }
}

impl Default for HashAlgorithm {
    fn default() -> Self {
        Self::Sha256
    }
}

impl Display for HashAlgorithm {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.name())
    }
}

/// Streaming hasher over the supported algorithms.
#[derive(Clone)]
pub(crate) enum Hasher {
    Sha1(sha1::Sha1),
    Sha224(sha2::Sha224),
    Sha256(sha2::Sha256),
    Sha384(sha2::Sha384),
    Sha512(sha2::Sha512),
}

impl Hasher {
    pub(crate) fn update(&mut self, data: &[u8]) {
        match self {
            Self::Sha1(h) => h.update(data),
            Self::Sha224(h) => h.update(data),
            Self::Sha256(h) => h.update(data),
            Self::Sha384(h) => h.update(data),
            Self::Sha512(h) => h.update(data),
        }
    }

    pub(crate) fn finish(self) -> Vec<u8> {
        match self {
            Self::Sha1(h) => h.finalize().to_vec(),
            Self::Sha224(h) => h.finalize().to_vec(),
            Self::Sha256(h) => h.finalize().to_vec(),
            Self::Sha384(h) => h.finalize().to_vec(),
            Self::Sha512(h) => h.finalize().to_vec(),
        }
    }
}

impl Write for Hasher {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.update(buf);
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

/// A digest value bound to its hash algorithm.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct Digest {
    hash: HashAlgorithm,
    value: Vec<u8>,
}

impl Digest {
    /// Construct a digest from a precomputed value.
    ///
    /// The value length must match the algorithm's output size.
    pub fn new(hash: HashAlgorithm, value: Vec<u8>) -> Result<Self> {
        if value.len() != hash.output_len() {
            return Err(ErrorKind::DigestMalformed.into());
        }

        Ok(Self { hash, value })
    }

    /// Compute a digest by streaming a reader through the hash.
    pub fn from_reader(hash: HashAlgorithm, mut r: impl Read) -> Result<Self> {
        let mut hasher = hash.new_hasher()?;
        io::copy(&mut r, &mut hasher)?;

        Ok(Self {
            hash,
            value: hasher.finish(),
        })
    }

    /// Parse a digest from the legacy signature plaintext form
    /// `SIFHASH:\n<hex>\n`.
    pub(crate) fn from_legacy_plaintext(hash: HashAlgorithm, b: &[u8]) -> Result<Self> {
        let b = b
            .strip_prefix(LEGACY_PREFIX)
            .ok_or_else(|| Error::from(ErrorKind::DigestMalformed))?;
        let b = b.strip_suffix(b"\n").unwrap_or(b);

        let value = hex::decode(b).map_err(|_| Error::from(ErrorKind::DigestMalformed))?;

        Self::new(hash, value)
    }

    /// The hash algorithm of this digest.
    pub fn hash(&self) -> HashAlgorithm {
        self.hash
    }

    /// The raw digest value.
    pub fn value(&self) -> &[u8] {
        &self.value
    }

    /// Whether the digest matches the content of a reader.
    pub fn matches(&self, r: impl Read) -> Result<bool> {
        let got = Self::from_reader(self.hash, r)?;
        Ok(got.value == self.value)
    }

    /// Parse a digest from its canonical `<alg>:<hex>` form.
    pub fn parse(s: &str) -> Result<Self> {
        let (name, hex_value) = s
            .split_once(':')
            .ok_or_else(|| Error::from(ErrorKind::DigestMalformed))?;

        let hash = HashAlgorithm::from_name(name)?;
        let value = hex::decode(hex_value).map_err(|_| Error::from(ErrorKind::DigestMalformed))?;

        Self::new(hash, value)
    }
}

impl Display for Digest {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}:{}", self.hash, hex::encode(&self.value))
    }
}

impl Serialize for Digest {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.to_string())
    }
}

impl<'de> Deserialize<'de> for Digest {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> std::result::Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;

        Self::parse(&s).map_err(de::Error::custom)
    }
}
