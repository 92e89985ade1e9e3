// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

/*! The SIF image handle. */

use {
    crate::{
        descriptor::{Descriptor, DescriptorInput},
        Error, Result,
    },
    chrono::{DateTime, TimeZone, Utc},
    std::io::{Cursor, Read, Write},
    uuid::Uuid,
};

/// Launch script stored at the start of every image.
pub const LAUNCH_SCRIPT: &[u8] = b"#!/usr/bin/env run-sif\n";

/// Header magic for SIF images.
pub const MAGIC: &[u8] = b"SIF_MAGIC\0";

/// The archive version written by this crate.
pub const VERSION: &[u8] = b"02\0";

const LAUNCH_LEN: usize = 32;

/// The global image header.
#[derive(Clone, Debug)]
pub struct Header {
    pub(crate) launch: [u8; LAUNCH_LEN],
    pub(crate) id: Uuid,
    pub(crate) created: i64,
    pub(crate) modified: i64,
}

impl Header {
    /// The image UUID.
    pub fn id(&self) -> Uuid {
        self.id
    }

    /// Image creation time.
    pub fn created_at(&self) -> DateTime<Utc> {
        Utc.timestamp_opt(self.created, 0).single().unwrap_or_default()
    }

    /// Image modification time.
    pub fn modified_at(&self) -> DateTime<Utc> {
        Utc.timestamp_opt(self.modified, 0).single().unwrap_or_default()
    }
}

/// Options governing image creation.
#[derive(Clone, Debug, Default)]
pub struct CreateOpts {
    deterministic: bool,
    time: Option<DateTime<Utc>>,
}

impl CreateOpts {
    /// Create the image deterministically: nil UUID, zero timestamps.
    ///
    /// Two deterministic images built from identical inputs serialize to
    /// identical bytes.
    pub fn deterministic(mut self) -> Self {
        self.deterministic = true;
        self
    }

    /// Use `t` as the image creation/modification time and as the default
    /// object creation time.
    pub fn with_time(mut self, t: DateTime<Utc>) -> Self {
        self.time = Some(t);
        self
    }
}

/// A loaded or newly created SIF image.
pub struct FileImage {
    header: Header,
    descriptors: Vec<Descriptor>,
}

impl FileImage {
    /// Create a new image holding the given data objects.
    pub fn create(inputs: impl IntoIterator<Item = DescriptorInput>) -> Result<Self> {
        Self::create_with(inputs, CreateOpts::default())
    }

    /// Create a new image with explicit [CreateOpts].
    pub fn create_with(
        inputs: impl IntoIterator<Item = DescriptorInput>,
        opts: CreateOpts,
    ) -> Result<Self> {
        let now = if opts.deterministic {
            0
        } else {
            opts.time.map(|t| t.timestamp()).unwrap_or_else(|| Utc::now().timestamp())
        };

        let id = if opts.deterministic { Uuid::nil() } else { Uuid::new_v4() };

        let mut launch = [0u8; LAUNCH_LEN];
        launch[..LAUNCH_SCRIPT.len()].copy_from_slice(LAUNCH_SCRIPT);

        let mut f = Self {
            header: Header {
                launch,
                id,
                created: now,
                modified: now,
            },
            descriptors: Vec::new(),
        };

        for input in inputs {
            f.append(input, now)?;
        }

        Ok(f)
    }

    /// Append a data object to the image.
    ///
    /// Returns the ID assigned to the new object.
    pub fn add_descriptor(&mut self, input: DescriptorInput) -> Result<u32> {
        let now = Utc::now().timestamp();
        let id = self.append(input, now)?;
        self.header.modified = now;
        Ok(id)
    }

    fn append(&mut self, input: DescriptorInput, default_ctime: i64) -> Result<u32> {
        input.validate()?;

        let id = self.descriptors.iter().map(|d| d.id).max().unwrap_or(0) + 1;
        self.descriptors.push(input.into_descriptor(id, default_ctime));

        Ok(id)
    }

    /// The image header.
    pub fn header(&self) -> &Header {
        &self.header
    }

    /// Iterate over all descriptors in the image.
    pub fn descriptors(&self) -> impl Iterator<Item = &Descriptor> {
        self.descriptors.iter()
    }

    /// Obtain the descriptors satisfying a predicate.
    pub fn descriptors_with(&self, mut f: impl FnMut(&Descriptor) -> bool) -> Vec<&Descriptor> {
        self.descriptors.iter().filter(|d| f(d)).collect()
    }

    /// Look up a descriptor by object ID.
    pub fn descriptor(&self, id: u32) -> Result<&Descriptor> {
        self.descriptors
            .iter()
            .find(|d| d.id == id)
            .ok_or(Error::ObjectNotFound(id))
    }

    /// Obtain a reader over the integrity-protected header fields.
    ///
    /// The stream covers the launch script, magic, version and image ID.
    /// Timestamps and layout fields are excluded.
    pub fn header_integrity_reader(&self) -> impl Read {
        let mut b = Vec::with_capacity(LAUNCH_LEN + MAGIC.len() + VERSION.len() + 16);
        b.extend_from_slice(&self.header.launch);
        b.extend_from_slice(MAGIC);
        b.extend_from_slice(VERSION);
        b.extend_from_slice(self.header.id.as_bytes());
        Cursor::new(b)
    }

    /// Serialize the image.
    pub fn write_to(&self, w: &mut impl Write) -> Result<()> {
        w.write_all(&self.header.launch)?;
        w.write_all(MAGIC)?;
        w.write_all(VERSION)?;
        w.write_all(self.header.id.as_bytes())?;
        w.write_all(&self.header.created.to_le_bytes())?;
        w.write_all(&self.header.modified.to_le_bytes())?;
        w.write_all(&(self.descriptors.len() as u32).to_le_bytes())?;

        let data_len: u64 = self.descriptors.iter().map(|d| d.size()).sum();
        w.write_all(&data_len.to_le_bytes())?;

        let mut offset = 0u64;
        for d in &self.descriptors {
            d.write_record(w, offset)?;
            offset += d.size();
        }

        for d in &self.descriptors {
            w.write_all(d.data())?;
        }

        Ok(())
    }

    /// Serialize the image to a byte vector.
    pub fn to_bytes(&self) -> Result<Vec<u8>> {
        let mut b = Vec::new();
        self.write_to(&mut b)?;
        Ok(b)
    }

    /// Load an image from a reader.
    pub fn load(r: &mut impl Read) -> Result<Self> {
        let mut launch = [0u8; LAUNCH_LEN];
        r.read_exact(&mut launch)?;

        let mut magic = [0u8; 10];
        r.read_exact(&mut magic)?;
        if &magic[..] != MAGIC {
            return Err(Error::BadMagic);
        }

        let mut version = [0u8; 3];
        r.read_exact(&mut version)?;
        if &version[..] != VERSION {
            return Err(Error::UnsupportedVersion(
                String::from_utf8_lossy(&version).trim_end_matches('\0').to_string(),
            ));
        }

        let mut id = [0u8; 16];
        r.read_exact(&mut id)?;

        let created = read_i64(r)?;
        let modified = read_i64(r)?;
        let count = read_u32(r)? as usize;
        let data_len = read_u64(r)? as usize;

        let mut records = Vec::with_capacity(count);
        for _ in 0..count {
            records.push(Descriptor::read_record(r)?);
        }

        let mut data = vec![0u8; data_len];
        r.read_exact(&mut data)?;

        let mut descriptors = Vec::with_capacity(count);
        for (mut d, offset, size) in records {
            let start = offset as usize;
            let end = start
                .checked_add(size as usize)
                .filter(|end| *end <= data.len())
                .ok_or_else(|| {
                    Error::Io(std::io::Error::new(
                        std::io::ErrorKind::InvalidData,
                        "descriptor payload extends past data region",
                    ))
                })?;

            d.data = data[start..end].to_vec().into();
            descriptors.push(d);
        }

        Ok(Self {
            header: Header {
                launch,
                id: Uuid::from_bytes(id),
                created,
                modified,
            },
            descriptors,
        })
    }

    /// Load an image from a byte slice.
    pub fn from_bytes(b: &[u8]) -> Result<Self> {
        Self::load(&mut Cursor::new(b))
    }
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
