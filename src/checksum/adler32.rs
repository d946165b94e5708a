use super::Checksum;

const MOD_ADLER: u32 = 65521;
/// Largest n such that 255n(n+1)/2 + (n+1)(MOD_ADLER-1) fits in a u32.
const NMAX: usize = 5552;

/// Adler-32 as used by the zlib wrapper and preset dictionary ids.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Adler32 {
    a: u32,
    b: u32,
}

impl Adler32 {
    pub fn new() -> Self {
        Self { a: 1, b: 0 }
    }

    /// One-shot Adler-32 of `data`.
    pub fn checksum(data: &[u8]) -> u32 {
        let mut adler = Self::new();
        adler.update(data);
        adler.value()
    }
}

impl Default for Adler32 {
    fn default() -> Self {
        Self::new()
    }
}

impl Checksum for Adler32 {
    fn update(&mut self, data: &[u8]) {
        for block in data.chunks(NMAX) {
            for &byte in block {
                self.a += byte as u32;
                self.b += self.a;
            }
            self.a %= MOD_ADLER;
            self.b %= MOD_ADLER;
        }
    }

    fn value(&self) -> u32 {
        (self.b << 16) | self.a
    }

    fn reset(&mut self) {
        *self = Self::new();
    }
}
