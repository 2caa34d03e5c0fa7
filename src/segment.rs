// Copyright (c) 2013-2015 Sandstorm Development Group, Inc. and contributors
// Licensed under the MIT License:
//
// Permission is hereby granted, free of charge, to any person obtaining a copy
// of this software and associated documentation files (the "Software"), to deal
// in the Software without restriction, including without limitation the rights
// to use, copy, modify, merge, publish, distribute, sublicense, and/or sell
// copies of the Software, and to permit persons to whom the Software is
// furnished to do so, subject to the following conditions:
//
// The above copyright notice and this permission notice shall be included in
// all copies or substantial portions of the Software.
//
// THE SOFTWARE IS PROVIDED "AS IS", WITHOUT WARRANTY OF ANY KIND, EXPRESS OR
// IMPLIED, INCLUDING BUT NOT LIMITED TO THE WARRANTIES OF MERCHANTABILITY,
// FITNESS FOR A PARTICULAR PURPOSE AND NONINFRINGEMENT. IN NO EVENT SHALL THE
// AUTHORS OR COPYRIGHT HOLDERS BE LIABLE FOR ANY CLAIM, DAMAGES OR OTHER
// LIABILITY, WHETHER IN AN ACTION OF CONTRACT, TORT OR OTHERWISE, ARISING FROM,
// OUT OF OR IN CONNECTION WITH THE SOFTWARE OR THE USE OR OTHER DEALINGS IN
// THE SOFTWARE.

//! A fixed-capacity run of words with a bump allocator.

use byteorder::{ByteOrder, LittleEndian};

use crate::pointer::SegmentId;
use crate::units::*;
use crate::{Error, Result};

/// One segment of a message.
///
/// The backing buffer never grows: `words.len()` is the capacity, and `allocated` words at
/// the front of it are in use. Only the allocated prefix is readable, writable or
/// serialized.
pub struct Segment {
    id: SegmentId,
    words: Vec<u64>,
    allocated: WordCount32,
}

impl Segment {
    /// A segment for building into. `words` must be zeroed.
    pub(crate) fn new(id: SegmentId, words: Vec<u64>) -> Self {
        Self {
            id,
            words,
            allocated: 0,
        }
    }

    /// A segment whose whole buffer is in use, as when read from a stream.
    pub(crate) fn new_full(id: SegmentId, words: Vec<u64>) -> Self {
        let allocated = words.len() as WordCount32;
        Self {
            id,
            words,
            allocated,
        }
    }

    #[inline]
    pub fn id(&self) -> SegmentId {
        self.id
    }

    /// Number of allocated words.
    #[inline]
    pub fn len(&self) -> WordCount32 {
        self.allocated
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.allocated == 0
    }

    #[inline]
    pub fn capacity(&self) -> WordCount32 {
        self.words.len() as WordCount32
    }

    #[inline]
    pub fn remaining(&self) -> WordCount32 {
        self.capacity() - self.allocated
    }

    /// The allocated words.
    pub fn as_words(&self) -> &[u64] {
        &self.words[..self.allocated as usize]
    }

    /// Claims `amount` words from the free tail of the segment, returning the index of the
    /// first. Returns `None`, and changes nothing, if they do not fit.
    pub fn try_allocate(&mut self, amount: WordCount32) -> Option<WordCount32> {
        if amount > self.remaining() {
            return None;
        }
        let start = self.allocated;
        self.allocated += amount;
        Some(start)
    }

    fn check_index(&self, index: WordCount32) -> Result<usize> {
        if index < self.allocated {
            Ok(index as usize)
        } else {
            Err(Error::out_of_range(format!(
                "word {index} of segment {} with {} allocated words",
                self.id, self.allocated
            )))
        }
    }

    pub fn read_word(&self, index: WordCount32) -> Result<u64> {
        let index = self.check_index(index)?;
        Ok(self.words[index])
    }

    pub fn write_word(&mut self, index: WordCount32, value: u64) -> Result<()> {
        let index = self.check_index(index)?;
        self.words[index] = value;
        Ok(())
    }

    /// Replaces the bits of word `index` selected by `mask` with the same bits of `value`.
    pub fn set_value(&mut self, index: WordCount32, value: u64, mask: u64) -> Result<()> {
        let index = self.check_index(index)?;
        let word = &mut self.words[index];
        *word = (*word & !mask) | (value & mask);
        Ok(())
    }

    /// Copies allocated words, starting at `word_offset`, into `buffer` in little-endian
    /// order. Copies as many whole words as fit and returns how many that was; zero once
    /// `word_offset` reaches the end of the allocated words.
    pub fn read_words(&self, word_offset: WordCount32, buffer: &mut [u8]) -> usize {
        let start = (word_offset as usize).min(self.allocated as usize);
        let count = (buffer.len() / BYTES_PER_WORD).min(self.allocated as usize - start);
        LittleEndian::write_u64_into(
            &self.words[start..start + count],
            &mut buffer[..count * BYTES_PER_WORD],
        );
        count
    }

    /// Fills allocated words, starting at `word_offset`, from the little-endian bytes in
    /// `buffer`. Trailing bytes that do not make up a whole word are ignored. Returns the
    /// number of words written.
    pub fn write_words(&mut self, word_offset: WordCount32, buffer: &[u8]) -> Result<usize> {
        if word_offset > self.allocated {
            return Err(Error::out_of_range(format!(
                "word {word_offset} of segment {} with {} allocated words",
                self.id, self.allocated
            )));
        }
        let start = word_offset as usize;
        let count = (buffer.len() / BYTES_PER_WORD).min(self.allocated as usize - start);
        LittleEndian::read_u64_into(
            &buffer[..count * BYTES_PER_WORD],
            &mut self.words[start..start + count],
        );
        Ok(count)
    }

    fn check_byte_range(&self, byte_index: ByteCount, len: ByteCount) -> Result<()> {
        let limit = self.allocated as usize * BYTES_PER_WORD;
        if byte_index.checked_add(len).map_or(true, |end| end > limit) {
            return Err(Error::out_of_range(format!(
                "bytes {byte_index}..+{len} of segment {} with {} allocated words",
                self.id, self.allocated
            )));
        }
        Ok(())
    }

    /// Reads `len` bytes starting at byte `byte_index` of the segment, in wire order.
    pub fn read_bytes(&self, byte_index: ByteCount, len: ByteCount) -> Result<Vec<u8>> {
        self.check_byte_range(byte_index, len)?;
        Ok((byte_index..byte_index + len)
            .map(|i| (self.words[i / BYTES_PER_WORD] >> ((i % BYTES_PER_WORD) * 8)) as u8)
            .collect())
    }

    /// Writes `bytes` starting at byte `byte_index` of the segment, in wire order.
    pub fn write_bytes(&mut self, byte_index: ByteCount, bytes: &[u8]) -> Result<()> {
        self.check_byte_range(byte_index, bytes.len())?;
        for (i, &byte) in (byte_index..).zip(bytes) {
            let shift = (i % BYTES_PER_WORD) * 8;
            let word = &mut self.words[i / BYTES_PER_WORD];
            *word = (*word & !(0xff << shift)) | (u64::from(byte) << shift);
        }
        Ok(())
    }

    /// Zeroes the allocated words and gives up the buffer, so that it can back a later
    /// segment.
    pub(crate) fn into_zeroed_words(mut self) -> Vec<u64> {
        let allocated = self.allocated as usize;
        self.words[..allocated].fill(0);
        self.words
    }
}

impl core::fmt::Debug for Segment {
    fn fmt(&self, f: &mut core::fmt::Formatter) -> core::fmt::Result {
        f.debug_struct("Segment")
            .field("id", &self.id)
            .field("allocated", &self.allocated)
            .field("capacity", &self.capacity())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::Segment;
    use crate::ErrorKind;

    #[test]
    fn bump_allocation() {
        let mut segment = Segment::new(0, vec![0; 4]);
        assert_eq!(Some(0), segment.try_allocate(1));
        assert_eq!(Some(1), segment.try_allocate(2));
        assert_eq!(None, segment.try_allocate(2));
        assert_eq!(3, segment.len());
        assert_eq!(Some(3), segment.try_allocate(1));
        assert_eq!(0, segment.remaining());
        assert_eq!(Some(4), segment.try_allocate(0));
    }

    #[test]
    fn word_access_is_bounded_by_allocation() {
        let mut segment = Segment::new(2, vec![0; 4]);
        segment.try_allocate(1);
        segment.write_word(0, 7).unwrap();
        assert_eq!(7, segment.read_word(0).unwrap());
        assert_eq!(ErrorKind::OutOfRange, segment.read_word(1).unwrap_err().kind);
        assert_eq!(ErrorKind::OutOfRange, segment.write_word(3, 1).unwrap_err().kind);
    }

    #[test]
    fn masked_update() {
        let mut segment = Segment::new_full(0, vec![0xffff_0000_ffff_0000]);
        segment.set_value(0, 0x1234, 0xffff).unwrap();
        assert_eq!(0xffff_0000_ffff_1234, segment.read_word(0).unwrap());
        segment.set_value(0, 0, 0xffff_0000_0000_0000).unwrap();
        assert_eq!(0x0000_0000_ffff_1234, segment.read_word(0).unwrap());
    }

    #[test]
    fn words_are_little_endian() {
        let segment = Segment::new_full(0, vec![0x0807_0605_0403_0201, 0x10]);
        let mut buffer = [0u8; 12];
        assert_eq!(1, segment.read_words(0, &mut buffer));
        assert_eq!([1, 2, 3, 4, 5, 6, 7, 8], buffer[..8]);
        assert_eq!(1, segment.read_words(1, &mut buffer));
        assert_eq!(0x10, buffer[0]);
        assert_eq!(0, segment.read_words(2, &mut buffer));

        let mut copy = Segment::new_full(1, vec![0; 2]);
        let bytes = [1, 2, 3, 4, 5, 6, 7, 8, 0x10, 0, 0, 0, 0, 0, 0, 0, 0xff];
        assert_eq!(2, copy.write_words(0, &bytes).unwrap());
        assert_eq!(segment.as_words(), copy.as_words());
        assert_eq!(ErrorKind::OutOfRange, copy.write_words(3, &bytes).unwrap_err().kind);
    }

    #[test]
    fn bytes() {
        let mut segment = Segment::new_full(0, vec![0; 2]);
        segment.write_bytes(6, b"abcd").unwrap();
        assert_eq!(0x6261_0000_0000_0000, segment.read_word(0).unwrap());
        assert_eq!(0x6463, segment.read_word(1).unwrap());
        assert_eq!(b"abcd".to_vec(), segment.read_bytes(6, 4).unwrap());
        assert_eq!(ErrorKind::OutOfRange, segment.read_bytes(14, 3).unwrap_err().kind);
    }

    #[test]
    fn zeroed_on_release() {
        let mut segment = Segment::new(0, vec![0; 3]);
        segment.try_allocate(2);
        segment.write_word(1, 99).unwrap();
        assert_eq!(vec![0, 0, 0], segment.into_zeroed_words());
    }
}
