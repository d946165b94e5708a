//! Per-entry metadata.

use byteorder::{LittleEndian, ReadBytesExt};
use std::io::Cursor;
use std::path::{Component, PathBuf};
use time::{Date, Month, OffsetDateTime, PrimitiveDateTime, Time, UtcOffset};

use super::structures::{
    CompressionMethod, EXTENDED_TIMESTAMP_ID, FLAG_DATA_DESCRIPTOR, ZIP64_EXTRA_ID, Zip64Extra,
    extra_records, is_well_formed_extra,
};
use crate::error::{ZipError, ZipResult};

/// MS-DOS date and time pair as stored in ZIP headers (UTC, 2-second
/// resolution, years 1980 to 2107).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct DosDateTime {
    pub date: u16,
    pub time: u16,
}

impl DosDateTime {
    /// 1980-01-01 00:00:00
    pub const MIN: DosDateTime = DosDateTime {
        date: (1 << 5) | 1,
        time: 0,
    };
    /// 2107-12-31 23:59:58
    pub const MAX: DosDateTime = DosDateTime {
        date: (127 << 9) | (12 << 5) | 31,
        time: (23 << 11) | (59 << 5) | 29,
    };

    pub fn new(date: u16, time: u16) -> Self {
        Self { date, time }
    }

    /// Convert, saturating at both ends of the representable range.
    pub fn from_datetime(dt: OffsetDateTime) -> Self {
        let dt = dt.to_offset(UtcOffset::UTC);
        let year = dt.year();
        if year < 1980 {
            return Self::MIN;
        }
        if year > 2107 {
            return Self::MAX;
        }
        let date = (((year - 1980) as u16) << 9) | ((dt.month() as u16) << 5) | dt.day() as u16;
        let time = ((dt.hour() as u16) << 11) | ((dt.minute() as u16) << 5) | (dt.second() as u16 / 2);
        Self { date, time }
    }

    /// The instant this pair denotes, or `None` for an invalid calendar
    /// value.
    pub fn to_datetime(self) -> Option<OffsetDateTime> {
        let (year, month, day) = self.date_parts();
        let (hour, minute, second) = self.time_parts();
        let date = Date::from_calendar_date(year as i32, Month::try_from(month).ok()?, day).ok()?;
        let time = Time::from_hms(hour, minute, second).ok()?;
        Some(PrimitiveDateTime::new(date, time).assume_utc())
    }

    /// Parse modification date to (year, month, day)
    pub fn date_parts(self) -> (u16, u8, u8) {
        let day = (self.date & 0x1F) as u8;
        let month = ((self.date >> 5) & 0x0F) as u8;
        let year = ((self.date >> 9) & 0x7F) + 1980;
        (year, month, day)
    }

    /// Parse modification time to (hour, minute, second)
    pub fn time_parts(self) -> (u8, u8, u8) {
        let second = ((self.time & 0x1F) * 2) as u8;
        let minute = ((self.time >> 5) & 0x3F) as u8;
        let hour = ((self.time >> 11) & 0x1F) as u8;
        (hour, minute, second)
    }
}

const MTIME_FLAG: u8 = 1;
const ATIME_FLAG: u8 = 1 << 1;
const CTIME_FLAG: u8 = 1 << 2;

/// Unix seconds of `t` when they fit the 32-bit extended timestamp field.
fn unix_seconds(t: OffsetDateTime) -> Option<i32> {
    i32::try_from(t.unix_timestamp()).ok()
}

/// Metadata of one archive entry.
///
/// Entries handed out by the readers carry the values recorded in the
/// archive. For entries written with a data descriptor, the streaming reader
/// only knows the final sizes and CRC once the entry's data has been read to
/// the end.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ZipEntry {
    name: String,
    method: Option<CompressionMethod>,
    size: Option<u64>,
    compressed_size: Option<u64>,
    crc: Option<u32>,
    dos_time: Option<DosDateTime>,
    mtime: Option<OffsetDateTime>,
    atime: Option<OffsetDateTime>,
    ctime: Option<OffsetDateTime>,
    extra: Vec<u8>,
    comment: Option<String>,
    pub(crate) flags: u16,
    pub(crate) version_needed: u16,
    pub(crate) lfh_offset: u64,
    pub(crate) raw_name: Vec<u8>,
}

impl ZipEntry {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            method: None,
            size: None,
            compressed_size: None,
            crc: None,
            dos_time: None,
            mtime: None,
            atime: None,
            ctime: None,
            extra: Vec::new(),
            comment: None,
            flags: 0,
            version_needed: 0,
            lfh_offset: 0,
            raw_name: Vec::new(),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Directory entries are names ending in `/`.
    pub fn is_dir(&self) -> bool {
        self.name.ends_with('/')
    }

    /// The name as a relative path that stays inside whatever directory it
    /// is joined to. `None` for absolute names, drive or root prefixes, NUL
    /// bytes, and `..` segments that climb above the top level.
    pub fn enclosed_name(&self) -> Option<PathBuf> {
        if self.name.contains('\0') {
            return None;
        }
        let path = PathBuf::from(&self.name);
        let mut depth = 0usize;
        for component in path.components() {
            match component {
                Component::Prefix(_) | Component::RootDir => return None,
                Component::ParentDir => depth = depth.checked_sub(1)?,
                Component::Normal(_) => depth += 1,
                Component::CurDir => (),
            }
        }
        Some(path)
    }

    pub fn method(&self) -> Option<CompressionMethod> {
        self.method
    }

    pub fn set_method(&mut self, method: CompressionMethod) {
        self.method = Some(method);
    }

    /// Uncompressed size, if known.
    pub fn size(&self) -> Option<u64> {
        self.size
    }

    pub fn set_size(&mut self, size: u64) {
        self.size = Some(size);
    }

    pub fn compressed_size(&self) -> Option<u64> {
        self.compressed_size
    }

    pub fn set_compressed_size(&mut self, size: u64) {
        self.compressed_size = Some(size);
    }

    pub fn crc(&self) -> Option<u32> {
        self.crc
    }

    pub fn set_crc(&mut self, crc: u32) {
        self.crc = Some(crc);
    }

    /// Modification time: the extended timestamp when present, otherwise the
    /// DOS field.
    pub fn time(&self) -> Option<OffsetDateTime> {
        self.mtime.or_else(|| self.dos_time.and_then(DosDateTime::to_datetime))
    }

    /// Set the modification time through the DOS field. Instants outside the
    /// DOS range are also kept in the extended timestamp so they survive a
    /// round trip.
    pub fn set_time(&mut self, t: OffsetDateTime) {
        let year = t.to_offset(UtcOffset::UTC).year();
        self.dos_time = Some(DosDateTime::from_datetime(t));
        self.mtime = if (1980..=2107).contains(&year) { None } else { Some(t) };
    }

    pub fn dos_time(&self) -> Option<DosDateTime> {
        self.dos_time
    }

    pub fn set_dos_time(&mut self, dos: DosDateTime) {
        self.dos_time = Some(dos);
    }

    pub fn last_modified_time(&self) -> Option<OffsetDateTime> {
        self.time()
    }

    /// Set the modification time through the extended timestamp, updating
    /// the (saturating) DOS field as well.
    pub fn set_last_modified_time(&mut self, t: OffsetDateTime) {
        self.dos_time = Some(DosDateTime::from_datetime(t));
        self.mtime = Some(t);
    }

    pub fn last_access_time(&self) -> Option<OffsetDateTime> {
        self.atime
    }

    pub fn set_last_access_time(&mut self, t: OffsetDateTime) {
        self.atime = Some(t);
    }

    pub fn creation_time(&self) -> Option<OffsetDateTime> {
        self.ctime
    }

    pub fn set_creation_time(&mut self, t: OffsetDateTime) {
        self.ctime = Some(t);
    }

    pub fn extra(&self) -> &[u8] {
        &self.extra
    }

    /// Replace the extra field. An extended timestamp record found in it
    /// updates this entry's times.
    pub fn set_extra(&mut self, extra: Vec<u8>) -> ZipResult<()> {
        if extra.len() > 0xFFFF {
            return Err(ZipError::InvalidArgument(format!(
                "extra field of {} bytes exceeds 65535",
                extra.len()
            )));
        }
        self.apply_timestamps(&extra);
        self.extra = extra;
        Ok(())
    }

    pub fn comment(&self) -> Option<&str> {
        self.comment.as_deref()
    }

    pub fn set_comment(&mut self, comment: impl Into<String>) {
        self.comment = Some(comment.into());
    }

    /// General purpose flags as recorded in the archive.
    pub fn flags(&self) -> u16 {
        self.flags
    }

    /// True when the entry's sizes and CRC follow its data.
    pub fn has_data_descriptor(&self) -> bool {
        self.flags & FLAG_DATA_DESCRIPTOR != 0
    }

    pub fn version_needed(&self) -> u16 {
        self.version_needed
    }

    /// Offset of the local file header, for entries read from an archive.
    pub fn lfh_offset(&self) -> u64 {
        self.lfh_offset
    }

    pub(crate) fn set_extra_unchecked(&mut self, extra: Vec<u8>) {
        self.apply_timestamps(&extra);
        self.extra = extra;
    }

    fn apply_timestamps(&mut self, extra: &[u8]) {
        let Some((_, payload)) = extra_records(extra).find(|(tag, _)| *tag == EXTENDED_TIMESTAMP_ID)
        else {
            return;
        };
        let Some((&flags, values)) = payload.split_first() else {
            return;
        };
        let mut cursor = Cursor::new(values);
        let mut next = |bit: u8| -> Option<OffsetDateTime> {
            if flags & bit == 0 {
                return None;
            }
            let secs = cursor.read_i32::<LittleEndian>().ok()?;
            OffsetDateTime::from_unix_timestamp(secs as i64).ok()
        };
        if let Some(t) = next(MTIME_FLAG) {
            self.mtime = Some(t);
        }
        if let Some(t) = next(ATIME_FLAG) {
            self.atime = Some(t);
        }
        if let Some(t) = next(CTIME_FLAG) {
            self.ctime = Some(t);
        }
    }

    /// Extended timestamp record for a local (`central == false`) or central
    /// header, or `None` when no representable time is set.
    fn timestamp_record(&self, central: bool) -> Option<Vec<u8>> {
        let times = [
            (MTIME_FLAG, self.mtime.and_then(unix_seconds)),
            (ATIME_FLAG, self.atime.and_then(unix_seconds)),
            (CTIME_FLAG, self.ctime.and_then(unix_seconds)),
        ];
        let flags = times
            .iter()
            .filter(|(_, v)| v.is_some())
            .fold(0u8, |acc, (bit, _)| acc | bit);
        if flags == 0 {
            return None;
        }

        let mut payload = vec![flags];
        for (bit, value) in times {
            if central && bit != MTIME_FLAG {
                break;
            }
            if let Some(secs) = value {
                payload.extend_from_slice(&secs.to_le_bytes());
            }
        }
        let mut record = Vec::with_capacity(4 + payload.len());
        record.extend_from_slice(&EXTENDED_TIMESTAMP_ID.to_le_bytes());
        record.extend_from_slice(&(payload.len() as u16).to_le_bytes());
        record.extend_from_slice(&payload);
        Some(record)
    }

    /// Extra field to write in a header: the caller's records first, then
    /// the generated ZIP64 and timestamp records. Caller records carrying
    /// either generated tag are dropped.
    pub(crate) fn header_extra(&self, zip64: Option<Zip64Extra>, central: bool) -> Vec<u8> {
        let mut out = Vec::with_capacity(self.extra.len() + 32);
        if is_well_formed_extra(&self.extra) {
            for (tag, payload) in extra_records(&self.extra) {
                if tag == ZIP64_EXTRA_ID || tag == EXTENDED_TIMESTAMP_ID {
                    continue;
                }
                out.extend_from_slice(&tag.to_le_bytes());
                out.extend_from_slice(&(payload.len() as u16).to_le_bytes());
                out.extend_from_slice(payload);
            }
        } else {
            out.extend_from_slice(&self.extra);
        }
        if let Some(z) = zip64 {
            out.extend(z.to_record());
        }
        if let Some(record) = self.timestamp_record(central) {
            out.extend(record);
        }
        out
    }
}

/// Reject names the writer refuses to store.
pub(crate) fn validate_name(name: &str, encoded_len: usize) -> ZipResult<()> {
    let reason = if name.is_empty() {
        Some("name is empty")
    } else if name.starts_with('/') {
        Some("name is absolute")
    } else if name.contains('\\') {
        Some("name contains a backslash")
    } else if name.contains('\0') {
        Some("name contains NUL")
    } else if encoded_len > 0xFFFF {
        Some("encoded name exceeds 65535 bytes")
    } else {
        None
    };
    match reason {
        Some(reason) => Err(ZipError::InvalidEntryName {
            name: name.to_string(),
            reason,
        }),
        None => Ok(()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use time::macros::datetime;

    #[test]
    fn dos_conversion_and_saturation() {
        let dos = DosDateTime::from_datetime(datetime!(2024-03-15 13:45:31 UTC));
        assert_eq!(dos.date_parts(), (2024, 3, 15));
        assert_eq!(dos.time_parts(), (13, 45, 30));
        assert_eq!(dos.to_datetime(), Some(datetime!(2024-03-15 13:45:30 UTC)));

        assert_eq!(DosDateTime::from_datetime(datetime!(1970-01-01 0:00 UTC)), DosDateTime::MIN);
        assert_eq!(DosDateTime::from_datetime(datetime!(2200-06-01 0:00 UTC)), DosDateTime::MAX);
        assert_eq!(DosDateTime::MAX.to_datetime(), Some(datetime!(2107-12-31 23:59:58 UTC)));
    }

    #[test]
    fn pre_1980_time_kept_in_extended_field() {
        let mut e = ZipEntry::new("old.txt");
        let t = datetime!(1975-06-01 12:00 UTC);
        e.set_time(t);
        assert_eq!(e.dos_time(), Some(DosDateTime::MIN));
        assert_eq!(e.time(), Some(t));

        let extra = e.header_extra(None, false);
        let mut read = ZipEntry::new("old.txt");
        read.set_extra(extra).unwrap();
        assert_eq!(read.last_modified_time(), Some(t));

        let mut recent = ZipEntry::new("new.txt");
        recent.set_time(datetime!(2020-01-01 0:00 UTC));
        assert!(recent.header_extra(None, false).is_empty());
    }

    #[test]
    fn caller_extra_precedes_generated_records() {
        let mut e = ZipEntry::new("a");
        let caller = vec![0xCA, 0xFE, 3, 0, 1, 2, 3];
        e.set_extra(caller.clone()).unwrap();
        e.set_last_modified_time(datetime!(2001-09-09 1:46:40 UTC));
        e.set_last_access_time(datetime!(2001-09-09 1:46:41 UTC));

        let local = e.header_extra(None, false);
        assert_eq!(&local[..caller.len()], &caller[..]);
        let ts = &local[caller.len()..];
        assert_eq!(ts[..2], EXTENDED_TIMESTAMP_ID.to_le_bytes());
        assert_eq!(ts[2], 9);
        assert_eq!(ts[4], MTIME_FLAG | ATIME_FLAG);
        assert_eq!(&ts[5..9], &1_000_000_000i32.to_le_bytes());

        let central = e.header_extra(None, true);
        assert_eq!(central.len(), caller.len() + 4 + 5);
        assert_eq!(central[caller.len() + 4], MTIME_FLAG | ATIME_FLAG);
    }

    #[test]
    fn stale_generated_records_are_replaced() {
        let mut e = ZipEntry::new("a");
        let mut extra = Zip64Extra {
            uncompressed_size: Some(1),
            ..Default::default()
        }
        .to_record();
        extra.extend_from_slice(&[0x01, 0x99, 0, 0]);
        e.set_extra(extra).unwrap();
        assert_eq!(e.header_extra(None, false), vec![0x01, 0x99, 0, 0]);
    }

    #[test]
    fn out_of_range_times_are_not_written() {
        let mut e = ZipEntry::new("far");
        e.set_last_modified_time(datetime!(2200-01-01 0:00 UTC));
        assert!(e.header_extra(None, false).is_empty());
        assert_eq!(e.dos_time(), Some(DosDateTime::MAX));
    }

    #[test]
    fn name_policy() {
        assert!(validate_name("dir/file.txt", 12).is_ok());
        assert!(validate_name("dir/", 4).is_ok());
        for bad in ["", "/etc/passwd", "a\\b", "nul\0"] {
            assert!(matches!(
                validate_name(bad, bad.len()),
                Err(ZipError::InvalidEntryName { .. })
            ));
        }
        assert!(validate_name("x", 0x10000).is_err());
    }

    #[test]
    fn enclosed_names_stay_below_the_top() {
        let enclosed = |name: &str| ZipEntry::new(name).enclosed_name();
        assert_eq!(enclosed("docs/readme.txt"), Some(PathBuf::from("docs/readme.txt")));
        assert_eq!(enclosed("a/../b.txt"), Some(PathBuf::from("a/../b.txt")));
        assert_eq!(enclosed("./x"), Some(PathBuf::from("./x")));
        for unsafe_name in ["../evil.txt", "a/../../evil.txt", "/etc/passwd", "..", "nul\0"] {
            assert_eq!(enclosed(unsafe_name), None, "{unsafe_name}");
        }
    }
}
