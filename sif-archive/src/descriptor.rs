// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

/*! Data object descriptors. */

use {
    crate::{Error, Result},
    chrono::{DateTime, TimeZone, Utc},
    std::{
        fmt::{Display, Formatter},
        io::{Cursor, Read, Write},
        sync::Arc,
    },
};

/// Bit set on stored group IDs to distinguish them from object IDs.
pub(crate) const GROUP_FLAG: u32 = 0x8000_0000;

/// Maximum byte length of a descriptor name.
pub const NAME_LEN: usize = 32;

/// Maximum byte length of a signature fingerprint.
pub const FINGERPRINT_LEN: usize = 64;

/// Size in bytes of a serialized descriptor record.
pub(crate) const RECORD_LEN: usize = 4 + 1 + 4 + 4 + 4 + 8 + 8 + 8 + 1 + NAME_LEN + 4 + 1 + FINGERPRINT_LEN;

/// The type of payload described by a descriptor.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Hash)]
pub enum DataType {
    Deffile,
    EnvVar,
    Labels,
    Partition,
    Signature,
    GenericJson,
    Generic,
}

impl From<DataType> for u32 {
    fn from(v: DataType) -> u32 {
        match v {
            DataType::Deffile => 0x4001,
            DataType::EnvVar => 0x4002,
            DataType::Labels => 0x4003,
            DataType::Partition => 0x4004,
            DataType::Signature => 0x4005,
            DataType::GenericJson => 0x4006,
            DataType::Generic => 0x4007,
        }
    }
}

impl TryFrom<u32> for DataType {
    type Error = Error;

    fn try_from(v: u32) -> Result<Self> {
        match v {
            0x4001 => Ok(Self::Deffile),
            0x4002 => Ok(Self::EnvVar),
            0x4003 => Ok(Self::Labels),
            0x4004 => Ok(Self::Partition),
            0x4005 => Ok(Self::Signature),
            0x4006 => Ok(Self::GenericJson),
            0x4007 => Ok(Self::Generic),
            _ => Err(Error::UnknownDataType(v)),
        }
    }
}

impl Display for DataType {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Deffile => f.write_str("definition file"),
            Self::EnvVar => f.write_str("environment variables"),
            Self::Labels => f.write_str("labels"),
            Self::Partition => f.write_str("filesystem partition"),
            Self::Signature => f.write_str("signature"),
            Self::GenericJson => f.write_str("JSON data"),
            Self::Generic => f.write_str("generic data"),
        }
    }
}

/// Hash algorithm identifier recorded in signature descriptor metadata.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum HashType {
    Sha256,
    Sha384,
    Sha512,
    Blake2s256,
    Blake2b256,
}

impl From<HashType> for u32 {
    fn from(v: HashType) -> u32 {
        match v {
            HashType::Sha256 => 1,
            HashType::Sha384 => 2,
            HashType::Sha512 => 3,
            HashType::Blake2s256 => 4,
            HashType::Blake2b256 => 5,
        }
    }
}

impl TryFrom<u32> for HashType {
    type Error = Error;

    fn try_from(v: u32) -> Result<Self> {
        match v {
            1 => Ok(Self::Sha256),
            2 => Ok(Self::Sha384),
            3 => Ok(Self::Sha512),
            4 => Ok(Self::Blake2s256),
            5 => Ok(Self::Blake2b256),
            _ => Err(Error::UnknownHashType(v)),
        }
    }
}

impl Display for HashType {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Sha256 => f.write_str("sha256"),
            Self::Sha384 => f.write_str("sha384"),
            Self::Sha512 => f.write_str("sha512"),
            Self::Blake2s256 => f.write_str("blake2s-256"),
            Self::Blake2b256 => f.write_str("blake2b-256"),
        }
    }
}

/// Non-payload metadata carried in a descriptor's extra region.
#[derive(Clone, Eq, PartialEq)]
pub(crate) enum Extra {
    None,
    Signature { hash_type: HashType, fingerprint: Vec<u8> },
}

impl std::fmt::Debug for Extra {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::None => f.write_str("None"),
            Self::Signature { hash_type, fingerprint } => {
                write!(f, "Signature({}, {})", hash_type, hex::encode(fingerprint))
            }
        }
    }
}

/// A data object descriptor and its payload.
///
/// Descriptors are created through [crate::DescriptorInput] and owned by a
/// [crate::FileImage]. The payload is reference counted, so cloning a
/// descriptor is cheap.
#[derive(Clone, Debug)]
pub struct Descriptor {
    pub(crate) data_type: DataType,
    pub(crate) used: bool,
    pub(crate) id: u32,
    pub(crate) group_id: u32,
    pub(crate) link: u32,
    pub(crate) ctime: i64,
    pub(crate) name: String,
    pub(crate) extra: Extra,
    pub(crate) data: Arc<[u8]>,
}

impl Descriptor {
    /// The absolute object ID.
    pub fn id(&self) -> u32 {
        self.id
    }

    /// The payload type.
    pub fn data_type(&self) -> DataType {
        self.data_type
    }

    /// The object group ID, or 0 if the descriptor has no group.
    pub fn group_id(&self) -> u32 {
        self.group_id & !GROUP_FLAG
    }

    /// The link target, if any, as `(id, is_group)`.
    pub fn linked_id(&self) -> Option<(u32, bool)> {
        match self.link {
            0 => None,
            v => Some((v & !GROUP_FLAG, v & GROUP_FLAG != 0)),
        }
    }

    /// Payload size in bytes.
    pub fn size(&self) -> u64 {
        self.data.len() as u64
    }

    /// The object name.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Object creation time.
    pub fn created_at(&self) -> DateTime<Utc> {
        Utc.timestamp_opt(self.ctime, 0).single().unwrap_or_default()
    }

    /// The object payload.
    pub fn data(&self) -> &[u8] {
        &self.data
    }

    /// Obtain a fresh reader over the object payload.
    ///
    /// Each call returns an independent reader positioned at the start of
    /// the payload, so callers may read the same object repeatedly.
    pub fn data_reader(&self) -> impl Read + '_ {
        Cursor::new(&*self.data)
    }

    /// Obtain a reader over the integrity-protected descriptor fields.
    ///
    /// The stream covers the data type, used flag, link, payload size,
    /// creation time, name and extra metadata. It excludes the absolute
    /// object ID, the group ID and file offsets, all of which change when
    /// a group is relocated within the image.
    pub fn integrity_reader(&self) -> impl Read {
        let mut b = Vec::with_capacity(64 + self.name.len());

        b.extend_from_slice(&u32::from(self.data_type).to_le_bytes());
        b.push(self.used as u8);
        b.extend_from_slice(&self.link.to_le_bytes());
        b.extend_from_slice(&self.size().to_le_bytes());
        b.extend_from_slice(&self.ctime.to_le_bytes());
        b.push(self.name.len() as u8);
        b.extend_from_slice(self.name.as_bytes());

        if let Extra::Signature { hash_type, fingerprint } = &self.extra {
            b.extend_from_slice(&u32::from(*hash_type).to_le_bytes());
            b.push(fingerprint.len() as u8);
            b.extend_from_slice(fingerprint);
        }

        Cursor::new(b)
    }

    /// The signature metadata `(hash type, fingerprint)` of a signature
    /// descriptor.
    pub fn signature_metadata(&self) -> Result<(HashType, &[u8])> {
        match &self.extra {
            Extra::Signature { hash_type, fingerprint } => Ok((*hash_type, fingerprint.as_slice())),
            Extra::None => Err(Error::NoSignatureMetadata),
        }
    }

    /// Serialize the descriptor record.
    ///
    /// `offset` is the payload position relative to the start of the data
    /// region and is computed by the image writer.
    pub(crate) fn write_record(&self, w: &mut impl Write, offset: u64) -> Result<()> {
        w.write_all(&u32::from(self.data_type).to_le_bytes())?;
        w.write_all(&[self.used as u8])?;
        w.write_all(&self.id.to_le_bytes())?;
        w.write_all(&self.group_id.to_le_bytes())?;
        w.write_all(&self.link.to_le_bytes())?;
        w.write_all(&offset.to_le_bytes())?;
        w.write_all(&self.size().to_le_bytes())?;
        w.write_all(&self.ctime.to_le_bytes())?;

        let mut name = [0u8; NAME_LEN];
        name[..self.name.len()].copy_from_slice(self.name.as_bytes());
        w.write_all(&[self.name.len() as u8])?;
        w.write_all(&name)?;

        let mut fp = [0u8; FINGERPRINT_LEN];
        let (ht, fp_len) = match &self.extra {
            Extra::None => (0u32, 0usize),
            Extra::Signature { hash_type, fingerprint } => {
                fp[..fingerprint.len()].copy_from_slice(fingerprint);
                (u32::from(*hash_type), fingerprint.len())
            }
        };
        w.write_all(&ht.to_le_bytes())?;
        w.write_all(&[fp_len as u8])?;
        w.write_all(&fp)?;

        Ok(())
    }

    /// Parse a descriptor record, returning the descriptor (with an empty
    /// payload) and the `(offset, size)` of its payload in the data region.
    pub(crate) fn read_record(r: &mut impl Read) -> Result<(Self, u64, u64)> {
        let data_type = DataType::try_from(read_u32(r)?)?;
        let used = read_u8(r)? != 0;
        let id = read_u32(r)?;
        let group_id = read_u32(r)?;
        let link = read_u32(r)?;
        let offset = read_u64(r)?;
        let size = read_u64(r)?;
        let ctime = read_i64(r)?;

        let name_len = read_u8(r)? as usize;
        let mut name = [0u8; NAME_LEN];
        r.read_exact(&mut name)?;
        if name_len > NAME_LEN {
            return Err(Error::NameTooLong(name_len));
        }
        let name = std::str::from_utf8(&name[..name_len])
            .map_err(|_| Error::BadString)?
            .to_string();

        let ht = read_u32(r)?;
        let fp_len = read_u8(r)? as usize;
        let mut fp = [0u8; FINGERPRINT_LEN];
        r.read_exact(&mut fp)?;
        if fp_len > FINGERPRINT_LEN {
            return Err(Error::FingerprintTooLong(fp_len));
        }

        let extra = match ht {
            0 => Extra::None,
            v => Extra::Signature {
                hash_type: HashType::try_from(v)?,
                fingerprint: fp[..fp_len].to_vec(),
            },
        };

        let d = Self {
            data_type,
            used,
            id,
            group_id,
            link,
            ctime,
            name,
            extra,
            data: Arc::from(Vec::new()),
        };

        Ok((d, offset, size))
    }
}

fn read_u8(r: &mut impl Read) -> Result<u8> {
    let mut b = [0u8; 1];
    r.read_exact(&mut b)?;
    Ok(b[0])
}

fn read_u32(r: &mut impl Read) -> Result<u32> {
    let mut b = [0u8; 4];
    r.read_exact(&mut b)?;
    Ok(u32::from_le_bytes(b))
}

fn read_u64(r: &mut impl Read) -> Result<u64> {
    let mut b = [0u8; 8];
    r.read_exact(&mut b)?;
    Ok(u64::from_le_bytes(b))
}

fn read_i64(r: &mut impl Read) -> Result<i64> {
    let mut b = [0u8; 8];
    r.read_exact(&mut b)?;
    Ok(i64::from_le_bytes(b))
}

/// Declares a data object to be added to an image.
#[derive(Clone, Debug)]
pub struct DescriptorInput {
    pub(crate) data_type: DataType,
    pub(crate) data: Vec<u8>,
    pub(crate) group_id: u32,
    pub(crate) link: u32,
    pub(crate) name: String,
    pub(crate) ctime: Option<i64>,
    pub(crate) extra: Extra,
}

impl DescriptorInput {
    /// Start describing a new data object with the given type and payload.
    ///
    /// The object is placed in group 1 unless [Self::group] or
    /// [Self::no_group] says otherwise.
    pub fn new(data_type: DataType, data: impl Into<Vec<u8>>) -> Self {
        Self {
            data_type,
            data: data.into(),
            group_id: 1 | GROUP_FLAG,
            link: 0,
            name: String::new(),
            ctime: None,
            extra: Extra::None,
        }
    }

    /// Place the object in the given group.
    pub fn group(mut self, group_id: u32) -> Self {
        self.group_id = group_id | GROUP_FLAG;
        self
    }

    /// Place the object in no group.
    pub fn no_group(mut self) -> Self {
        self.group_id = 0;
        self
    }

    /// Link the object to an object group.
    pub fn linked_group(mut self, group_id: u32) -> Self {
        self.link = group_id | GROUP_FLAG;
        self
    }

    /// Link the object to another data object.
    pub fn linked_object(mut self, id: u32) -> Self {
        self.link = id;
        self
    }

    /// Set the object name.
    pub fn name(mut self, name: impl ToString) -> Self {
        self.name = name.to_string();
        self
    }

    /// Set the object creation time.
    pub fn object_time(mut self, t: DateTime<Utc>) -> Self {
        self.ctime = Some(t.timestamp());
        self
    }

    /// Attach signature metadata to the object.
    pub fn signature_metadata(mut self, hash_type: HashType, fingerprint: impl Into<Vec<u8>>) -> Self {
        self.extra = Extra::Signature {
            hash_type,
            fingerprint: fingerprint.into(),
        };
        self
    }

    pub(crate) fn validate(&self) -> Result<()> {
        if self.name.len() > NAME_LEN {
            return Err(Error::NameTooLong(self.name.len()));
        }

        if let Extra::Signature { fingerprint, .. } = &self.extra {
            if fingerprint.len() > FINGERPRINT_LEN {
                return Err(Error::FingerprintTooLong(fingerprint.len()));
            }
        }

        Ok(())
    }

    pub(crate) fn into_descriptor(self, id: u32, default_ctime: i64) -> Descriptor {
        Descriptor {
            data_type: self.data_type,
            used: true,
            id,
            group_id: self.group_id,
            link: self.link,
            ctime: self.ctime.unwrap_or(default_ctime),
            name: self.name,
            extra: self.extra,
            data: self.data.into(),
        }
    }
}
