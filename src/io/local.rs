use super::ReadAt;
use std::io;
use std::path::Path;

#[cfg(not(unix))]
use std::sync::Mutex;

/// Local file reader with random access support
pub struct LocalFileReader {
    #[cfg(unix)]
    file: std::fs::File,
    #[cfg(not(unix))]
    file: Mutex<std::fs::File>,
}

impl LocalFileReader {
    pub fn new(path: &Path) -> io::Result<Self> {
        let file = std::fs::File::open(path)?;
        #[cfg(not(unix))]
        let file = Mutex::new(file);
        Ok(Self { file })
    }
}

impl ReadAt for LocalFileReader {
    fn read_at(&self, offset: u64, buf: &mut [u8]) -> io::Result<usize> {
        #[cfg(unix)]
        {
            use std::os::unix::fs::FileExt;
            self.file.read_at(buf, offset)
        }

        #[cfg(not(unix))]
        {
            use std::io::{Read, Seek, SeekFrom};
            // No pread here; serialize seek+read pairs
            let mut file = self
                .file
                .lock()
                .map_err(|_| io::Error::other("file lock poisoned"))?;
            file.seek(SeekFrom::Start(offset))?;
            file.read(buf)
        }
    }

    /// Size is queried on every call so that a file rewritten after opening
    /// is noticed.
    fn size(&self) -> io::Result<u64> {
        #[cfg(unix)]
        let len = self.file.metadata()?.len();
        #[cfg(not(unix))]
        let len = self
            .file
            .lock()
            .map_err(|_| io::Error::other("file lock poisoned"))?
            .metadata()?
            .len();
        Ok(len)
    }
}
