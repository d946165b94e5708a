use super::Checksum;

/// CRC-32 (reflected polynomial 0xEDB88320) as used by ZIP and gzip.
#[derive(Clone, Default)]
pub struct Crc32 {
    hasher: crc32fast::Hasher,
}

impl Crc32 {
    pub fn new() -> Self {
        Self::default()
    }

    /// One-shot CRC-32 of `data`.
    pub fn checksum(data: &[u8]) -> u32 {
        crc32fast::hash(data)
    }
}

impl Checksum for Crc32 {
    fn update(&mut self, data: &[u8]) {
        self.hasher.update(data);
    }

    fn value(&self) -> u32 {
        self.hasher.clone().finalize()
    }

    fn reset(&mut self) {
        self.hasher.reset();
    }
}

impl std::fmt::Debug for Crc32 {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "Crc32({:#010x})", self.value())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn check_value() {
        assert_eq!(Crc32::checksum(b"123456789"), 0xCBF43926);
        let mut crc = Crc32::new();
        for &b in b"123456789" {
            crc.update_byte(b);
        }
        assert_eq!(crc.value(), 0xCBF43926);
        crc.reset();
        assert_eq!(crc.value(), 0);
    }
}
