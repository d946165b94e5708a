//! `std::io` adapters over the compression engines.
//!
//! [`InflaterReader`] pulls compressed bytes from a [`Read`](std::io::Read)
//! and hands out decompressed data; [`DeflaterWriter`] compresses everything
//! written to it into a [`Write`](std::io::Write).
//!
//! Both adapters either create their engine (and end it on `close`) or
//! borrow one supplied by the caller, which is left untouched on `close` so
//! it can be inspected or reset afterwards.

mod deflater_writer;
mod inflater_reader;

use std::ops::{Deref, DerefMut};

pub use deflater_writer::DeflaterWriter;
pub use inflater_reader::InflaterReader;

/// Default size of the adapters' staging buffer.
pub const DEFAULT_BUF_SIZE: usize = 8 * 1024;

/// An engine that is either owned by the adapter or lent to it.
pub(crate) enum Engine<'a, E> {
    Owned(E),
    Borrowed(&'a mut E),
}

impl<E> Engine<'_, E> {
    pub(crate) fn is_owned(&self) -> bool {
        matches!(self, Engine::Owned(_))
    }
}

impl<E> Deref for Engine<'_, E> {
    type Target = E;

    fn deref(&self) -> &E {
        match self {
            Engine::Owned(e) => e,
            Engine::Borrowed(e) => e,
        }
    }
}

impl<E> DerefMut for Engine<'_, E> {
    fn deref_mut(&mut self) -> &mut E {
        match self {
            Engine::Owned(e) => e,
            Engine::Borrowed(e) => e,
        }
    }
}
