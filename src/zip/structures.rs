use byteorder::{LittleEndian, ReadBytesExt, WriteBytesExt};
use std::io::{self, Cursor, Read, Write};

use crate::error::{ZipError, ZipResult};

/// ZIP compression methods
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum CompressionMethod {
    Stored,
    #[default]
    Deflated,
    Unknown(u16),
}

impl CompressionMethod {
    pub fn from_u16(value: u16) -> Self {
        match value {
            0 => CompressionMethod::Stored,
            8 => CompressionMethod::Deflated,
            _ => CompressionMethod::Unknown(value),
        }
    }

    pub fn as_u16(&self) -> u16 {
        match self {
            CompressionMethod::Stored => 0,
            CompressionMethod::Deflated => 8,
            CompressionMethod::Unknown(v) => *v,
        }
    }
}

/// General purpose flag: sizes and CRC follow the data in a descriptor.
pub const FLAG_DATA_DESCRIPTOR: u16 = 1 << 3;
/// General purpose flag: name and comment are UTF-8.
pub const FLAG_UTF8: u16 = 1 << 11;

/// Extra field tag of the ZIP64 extended information record.
pub const ZIP64_EXTRA_ID: u16 = 0x0001;
/// Extra field tag of the extended timestamp record.
pub const EXTENDED_TIMESTAMP_ID: u16 = 0x5455;

/// Largest value of a classic 32-bit size or offset field; reaching it
/// requires ZIP64.
pub const ZIP64_LIMIT: u64 = 0xFFFF_FFFF;
/// Largest classic entry count; reaching it requires ZIP64.
pub const ZIP64_COUNT_LIMIT: u64 = 0xFFFF;

pub const VERSION_DEFAULT: u16 = 20;
pub const VERSION_ZIP64: u16 = 45;
/// Unix host, format version 4.5.
pub const VERSION_MADE_BY: u16 = (3 << 8) | VERSION_ZIP64;

fn truncated(what: &str) -> ZipError {
    ZipError::NotAZip(format!("truncated {what}"))
}

/// End of Central Directory (EOCD) - 22 bytes minimum
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct EndOfCentralDirectory {
    pub disk_number: u16,
    pub disk_with_cd: u16,
    pub disk_entries: u16,
    pub total_entries: u16,
    pub cd_size: u32,
    pub cd_offset: u32,
    pub comment_len: u16,
}

impl EndOfCentralDirectory {
    pub const SIGNATURE: u32 = 0x0605_4b50;
    pub const SIZE: usize = 22;

    pub fn from_bytes(data: &[u8]) -> ZipResult<Self> {
        if data.len() < Self::SIZE {
            return Err(truncated("end of central directory"));
        }

        let mut cursor = Cursor::new(data);
        if cursor.read_u32::<LittleEndian>()? != Self::SIGNATURE {
            return Err(ZipError::NotAZip("invalid end of central directory".into()));
        }

        Ok(Self {
            disk_number: cursor.read_u16::<LittleEndian>()?,
            disk_with_cd: cursor.read_u16::<LittleEndian>()?,
            disk_entries: cursor.read_u16::<LittleEndian>()?,
            total_entries: cursor.read_u16::<LittleEndian>()?,
            cd_size: cursor.read_u32::<LittleEndian>()?,
            cd_offset: cursor.read_u32::<LittleEndian>()?,
            comment_len: cursor.read_u16::<LittleEndian>()?,
        })
    }

    pub fn write_to<W: Write>(&self, w: &mut W) -> io::Result<()> {
        w.write_u32::<LittleEndian>(Self::SIGNATURE)?;
        w.write_u16::<LittleEndian>(self.disk_number)?;
        w.write_u16::<LittleEndian>(self.disk_with_cd)?;
        w.write_u16::<LittleEndian>(self.disk_entries)?;
        w.write_u16::<LittleEndian>(self.total_entries)?;
        w.write_u32::<LittleEndian>(self.cd_size)?;
        w.write_u32::<LittleEndian>(self.cd_offset)?;
        w.write_u16::<LittleEndian>(self.comment_len)
    }

    pub fn is_zip64(&self) -> bool {
        self.disk_entries == 0xFFFF
            || self.total_entries == 0xFFFF
            || self.cd_size == 0xFFFFFFFF
            || self.cd_offset == 0xFFFFFFFF
    }
}

/// ZIP64 End of Central Directory Locator - 20 bytes
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Zip64EOCDLocator {
    pub disk_with_eocd64: u32,
    pub eocd64_offset: u64,
    pub total_disks: u32,
}

impl Zip64EOCDLocator {
    pub const SIGNATURE: u32 = 0x0706_4b50;
    pub const SIZE: usize = 20;

    /// Parse a locator; `None` when the bytes do not start with its
    /// signature.
    pub fn from_bytes(data: &[u8]) -> ZipResult<Option<Self>> {
        if data.len() < Self::SIZE {
            return Ok(None);
        }

        let mut cursor = Cursor::new(data);
        if cursor.read_u32::<LittleEndian>()? != Self::SIGNATURE {
            return Ok(None);
        }

        Ok(Some(Self {
            disk_with_eocd64: cursor.read_u32::<LittleEndian>()?,
            eocd64_offset: cursor.read_u64::<LittleEndian>()?,
            total_disks: cursor.read_u32::<LittleEndian>()?,
        }))
    }

    pub fn write_to<W: Write>(&self, w: &mut W) -> io::Result<()> {
        w.write_u32::<LittleEndian>(Self::SIGNATURE)?;
        w.write_u32::<LittleEndian>(self.disk_with_eocd64)?;
        w.write_u64::<LittleEndian>(self.eocd64_offset)?;
        w.write_u32::<LittleEndian>(self.total_disks)
    }
}

/// ZIP64 End of Central Directory - 56 bytes minimum
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Zip64EOCD {
    pub eocd64_size: u64,
    pub version_made_by: u16,
    pub version_needed: u16,
    pub disk_number: u32,
    pub disk_with_cd: u32,
    pub disk_entries: u64,
    pub total_entries: u64,
    pub cd_size: u64,
    pub cd_offset: u64,
}

impl Zip64EOCD {
    pub const SIGNATURE: u32 = 0x0606_4b50;
    pub const MIN_SIZE: usize = 56;

    pub fn new(total_entries: u64, cd_size: u64, cd_offset: u64) -> Self {
        Self {
            eocd64_size: (Self::MIN_SIZE - 12) as u64,
            version_made_by: VERSION_MADE_BY,
            version_needed: VERSION_ZIP64,
            disk_number: 0,
            disk_with_cd: 0,
            disk_entries: total_entries,
            total_entries,
            cd_size,
            cd_offset,
        }
    }

    pub fn from_bytes(data: &[u8]) -> ZipResult<Self> {
        if data.len() < Self::MIN_SIZE {
            return Err(truncated("ZIP64 end of central directory"));
        }

        let mut cursor = Cursor::new(data);
        if cursor.read_u32::<LittleEndian>()? != Self::SIGNATURE {
            return Err(ZipError::NotAZip(
                "invalid ZIP64 end of central directory".into(),
            ));
        }

        Ok(Self {
            eocd64_size: cursor.read_u64::<LittleEndian>()?,
            version_made_by: cursor.read_u16::<LittleEndian>()?,
            version_needed: cursor.read_u16::<LittleEndian>()?,
            disk_number: cursor.read_u32::<LittleEndian>()?,
            disk_with_cd: cursor.read_u32::<LittleEndian>()?,
            disk_entries: cursor.read_u64::<LittleEndian>()?,
            total_entries: cursor.read_u64::<LittleEndian>()?,
            cd_size: cursor.read_u64::<LittleEndian>()?,
            cd_offset: cursor.read_u64::<LittleEndian>()?,
        })
    }

    pub fn write_to<W: Write>(&self, w: &mut W) -> io::Result<()> {
        w.write_u32::<LittleEndian>(Self::SIGNATURE)?;
        w.write_u64::<LittleEndian>(self.eocd64_size)?;
        w.write_u16::<LittleEndian>(self.version_made_by)?;
        w.write_u16::<LittleEndian>(self.version_needed)?;
        w.write_u32::<LittleEndian>(self.disk_number)?;
        w.write_u32::<LittleEndian>(self.disk_with_cd)?;
        w.write_u64::<LittleEndian>(self.disk_entries)?;
        w.write_u64::<LittleEndian>(self.total_entries)?;
        w.write_u64::<LittleEndian>(self.cd_size)?;
        w.write_u64::<LittleEndian>(self.cd_offset)
    }
}

/// Local File Header (LFH) - 30 bytes plus name and extra field
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct LocalFileHeader {
    pub version_needed: u16,
    pub flags: u16,
    pub method: u16,
    pub mod_time: u16,
    pub mod_date: u16,
    pub crc32: u32,
    pub compressed_size: u32,
    pub uncompressed_size: u32,
    pub name: Vec<u8>,
    pub extra: Vec<u8>,
}

impl LocalFileHeader {
    pub const SIGNATURE: u32 = 0x0403_4b50;
    pub const SIZE: usize = 30;

    /// Parse the fixed part (signature included). Returns the header with
    /// empty name/extra plus their lengths.
    pub fn from_fixed(data: &[u8; Self::SIZE]) -> ZipResult<(Self, usize, usize)> {
        let mut cursor = Cursor::new(&data[..]);
        if cursor.read_u32::<LittleEndian>()? != Self::SIGNATURE {
            return Err(ZipError::invalid_archive(0, "invalid local file header signature"));
        }
        let header = Self {
            version_needed: cursor.read_u16::<LittleEndian>()?,
            flags: cursor.read_u16::<LittleEndian>()?,
            method: cursor.read_u16::<LittleEndian>()?,
            mod_time: cursor.read_u16::<LittleEndian>()?,
            mod_date: cursor.read_u16::<LittleEndian>()?,
            crc32: cursor.read_u32::<LittleEndian>()?,
            compressed_size: cursor.read_u32::<LittleEndian>()?,
            uncompressed_size: cursor.read_u32::<LittleEndian>()?,
            name: Vec::new(),
            extra: Vec::new(),
        };
        let name_len = cursor.read_u16::<LittleEndian>()? as usize;
        let extra_len = cursor.read_u16::<LittleEndian>()? as usize;
        Ok((header, name_len, extra_len))
    }

    pub fn write_to<W: Write>(&self, w: &mut W) -> io::Result<()> {
        w.write_u32::<LittleEndian>(Self::SIGNATURE)?;
        w.write_u16::<LittleEndian>(self.version_needed)?;
        w.write_u16::<LittleEndian>(self.flags)?;
        w.write_u16::<LittleEndian>(self.method)?;
        w.write_u16::<LittleEndian>(self.mod_time)?;
        w.write_u16::<LittleEndian>(self.mod_date)?;
        w.write_u32::<LittleEndian>(self.crc32)?;
        w.write_u32::<LittleEndian>(self.compressed_size)?;
        w.write_u32::<LittleEndian>(self.uncompressed_size)?;
        w.write_u16::<LittleEndian>(self.name.len() as u16)?;
        w.write_u16::<LittleEndian>(self.extra.len() as u16)?;
        w.write_all(&self.name)?;
        w.write_all(&self.extra)
    }
}

/// Central Directory File Header (CDFH) - 46 bytes minimum
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CentralDirectoryHeader {
    pub version_made_by: u16,
    pub version_needed: u16,
    pub flags: u16,
    pub method: u16,
    pub mod_time: u16,
    pub mod_date: u16,
    pub crc32: u32,
    pub compressed_size: u32,
    pub uncompressed_size: u32,
    pub disk_number_start: u16,
    pub internal_attrs: u16,
    pub external_attrs: u32,
    pub lfh_offset: u32,
    pub name: Vec<u8>,
    pub extra: Vec<u8>,
    pub comment: Vec<u8>,
}

impl CentralDirectoryHeader {
    pub const SIGNATURE: u32 = 0x0201_4b50;
    pub const MIN_SIZE: usize = 46;

    /// Read one header, signature included.
    pub fn read_from<R: Read>(r: &mut R) -> io::Result<Self> {
        if r.read_u32::<LittleEndian>()? != Self::SIGNATURE {
            return Err(io::Error::new(
                io::ErrorKind::InvalidData,
                "invalid central directory file header signature",
            ));
        }
        let mut header = Self {
            version_made_by: r.read_u16::<LittleEndian>()?,
            version_needed: r.read_u16::<LittleEndian>()?,
            flags: r.read_u16::<LittleEndian>()?,
            method: r.read_u16::<LittleEndian>()?,
            mod_time: r.read_u16::<LittleEndian>()?,
            mod_date: r.read_u16::<LittleEndian>()?,
            crc32: r.read_u32::<LittleEndian>()?,
            compressed_size: r.read_u32::<LittleEndian>()?,
            uncompressed_size: r.read_u32::<LittleEndian>()?,
            ..Default::default()
        };
        let name_len = r.read_u16::<LittleEndian>()? as usize;
        let extra_len = r.read_u16::<LittleEndian>()? as usize;
        let comment_len = r.read_u16::<LittleEndian>()? as usize;
        header.disk_number_start = r.read_u16::<LittleEndian>()?;
        header.internal_attrs = r.read_u16::<LittleEndian>()?;
        header.external_attrs = r.read_u32::<LittleEndian>()?;
        header.lfh_offset = r.read_u32::<LittleEndian>()?;

        header.name = vec![0u8; name_len];
        r.read_exact(&mut header.name)?;
        header.extra = vec![0u8; extra_len];
        r.read_exact(&mut header.extra)?;
        header.comment = vec![0u8; comment_len];
        r.read_exact(&mut header.comment)?;
        Ok(header)
    }

    pub fn write_to<W: Write>(&self, w: &mut W) -> io::Result<()> {
        w.write_u32::<LittleEndian>(Self::SIGNATURE)?;
        w.write_u16::<LittleEndian>(self.version_made_by)?;
        w.write_u16::<LittleEndian>(self.version_needed)?;
        w.write_u16::<LittleEndian>(self.flags)?;
        w.write_u16::<LittleEndian>(self.method)?;
        w.write_u16::<LittleEndian>(self.mod_time)?;
        w.write_u16::<LittleEndian>(self.mod_date)?;
        w.write_u32::<LittleEndian>(self.crc32)?;
        w.write_u32::<LittleEndian>(self.compressed_size)?;
        w.write_u32::<LittleEndian>(self.uncompressed_size)?;
        w.write_u16::<LittleEndian>(self.name.len() as u16)?;
        w.write_u16::<LittleEndian>(self.extra.len() as u16)?;
        w.write_u16::<LittleEndian>(self.comment.len() as u16)?;
        w.write_u16::<LittleEndian>(self.disk_number_start)?;
        w.write_u16::<LittleEndian>(self.internal_attrs)?;
        w.write_u32::<LittleEndian>(self.external_attrs)?;
        w.write_u32::<LittleEndian>(self.lfh_offset)?;
        w.write_all(&self.name)?;
        w.write_all(&self.extra)?;
        w.write_all(&self.comment)
    }
}

/// Data descriptor following the data of an entry written with flag bit 3.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DataDescriptor {
    pub crc32: u32,
    pub compressed_size: u64,
    pub uncompressed_size: u64,
}

impl DataDescriptor {
    pub const SIGNATURE: u32 = 0x0807_4b50;

    /// Write the signed form, with 8-byte sizes when `zip64` is set.
    pub fn write_to<W: Write>(&self, w: &mut W, zip64: bool) -> io::Result<()> {
        w.write_u32::<LittleEndian>(Self::SIGNATURE)?;
        w.write_u32::<LittleEndian>(self.crc32)?;
        if zip64 {
            w.write_u64::<LittleEndian>(self.compressed_size)?;
            w.write_u64::<LittleEndian>(self.uncompressed_size)
        } else {
            w.write_u32::<LittleEndian>(self.compressed_size as u32)?;
            w.write_u32::<LittleEndian>(self.uncompressed_size as u32)
        }
    }
}

/// Iterate over `(tag, payload)` records of an extra field. Stops at the
/// first record that does not fit.
pub fn extra_records(extra: &[u8]) -> impl Iterator<Item = (u16, &[u8])> {
    let mut rest = extra;
    std::iter::from_fn(move || {
        if rest.len() < 4 {
            return None;
        }
        let tag = u16::from_le_bytes([rest[0], rest[1]]);
        let len = u16::from_le_bytes([rest[2], rest[3]]) as usize;
        if rest.len() < 4 + len {
            return None;
        }
        let payload = &rest[4..4 + len];
        rest = &rest[4 + len..];
        Some((tag, payload))
    })
}

/// True when `extra` is a well-formed sequence of records.
pub fn is_well_formed_extra(extra: &[u8]) -> bool {
    let consumed: usize = extra_records(extra).map(|(_, p)| 4 + p.len()).sum();
    consumed == extra.len()
}

/// Values carried by a ZIP64 extended information record. Each field is
/// present only when the corresponding classic field is saturated.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Zip64Extra {
    pub uncompressed_size: Option<u64>,
    pub compressed_size: Option<u64>,
    pub lfh_offset: Option<u64>,
}

impl Zip64Extra {
    /// Parse the payload, reading only the fields flagged by `want_*`.
    pub fn parse(payload: &[u8], want_size: bool, want_csize: bool, want_offset: bool) -> Self {
        let mut cursor = Cursor::new(payload);
        let mut next = |want: bool| {
            if want {
                cursor.read_u64::<LittleEndian>().ok()
            } else {
                None
            }
        };
        Self {
            uncompressed_size: next(want_size),
            compressed_size: next(want_csize),
            lfh_offset: next(want_offset),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.uncompressed_size.is_none() && self.compressed_size.is_none() && self.lfh_offset.is_none()
    }

    /// Encode as a complete record, tag and length included.
    pub fn to_record(&self) -> Vec<u8> {
        let values: Vec<u64> = [self.uncompressed_size, self.compressed_size, self.lfh_offset]
            .into_iter()
            .flatten()
            .collect();
        let mut out = Vec::with_capacity(4 + values.len() * 8);
        out.extend_from_slice(&ZIP64_EXTRA_ID.to_le_bytes());
        out.extend_from_slice(&((values.len() * 8) as u16).to_le_bytes());
        for v in values {
            out.extend_from_slice(&v.to_le_bytes());
        }
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn eocd_round_trip() {
        let eocd = EndOfCentralDirectory {
            disk_entries: 3,
            total_entries: 3,
            cd_size: 120,
            cd_offset: 4096,
            comment_len: 0,
            ..Default::default()
        };
        let mut buf = Vec::new();
        eocd.write_to(&mut buf).unwrap();
        assert_eq!(buf.len(), EndOfCentralDirectory::SIZE);
        assert_eq!(&buf[..4], b"PK\x05\x06");
        assert_eq!(EndOfCentralDirectory::from_bytes(&buf).unwrap(), eocd);
        assert!(!eocd.is_zip64());
    }

    #[test]
    fn zip64_records_have_expected_sizes() {
        let mut buf = Vec::new();
        Zip64EOCD::new(70_000, 1, 2).write_to(&mut buf).unwrap();
        assert_eq!(buf.len(), Zip64EOCD::MIN_SIZE);
        assert_eq!(Zip64EOCD::from_bytes(&buf).unwrap().total_entries, 70_000);

        let mut loc = Vec::new();
        Zip64EOCDLocator {
            disk_with_eocd64: 0,
            eocd64_offset: 99,
            total_disks: 1,
        }
        .write_to(&mut loc)
        .unwrap();
        assert_eq!(loc.len(), Zip64EOCDLocator::SIZE);
        assert_eq!(Zip64EOCDLocator::from_bytes(&loc).unwrap().unwrap().eocd64_offset, 99);
        assert!(Zip64EOCDLocator::from_bytes(&buf[..20]).unwrap().is_none());
    }

    #[test]
    fn extra_record_walk() {
        let mut extra = vec![0x34, 0x12, 2, 0, 0xAA, 0xBB];
        extra.extend(Zip64Extra {
            uncompressed_size: Some(1 << 33),
            compressed_size: None,
            lfh_offset: Some(7),
        }
        .to_record());
        let records: Vec<_> = extra_records(&extra).collect();
        assert_eq!(records.len(), 2);
        assert_eq!(records[0], (0x1234, &[0xAA, 0xBB][..]));
        let parsed = Zip64Extra::parse(records[1].1, true, false, true);
        assert_eq!(parsed.uncompressed_size, Some(1 << 33));
        assert_eq!(parsed.lfh_offset, Some(7));
        assert!(is_well_formed_extra(&extra));
        assert!(!is_well_formed_extra(&extra[..extra.len() - 1]));
    }
}
