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

pub type BitCount32 = u32;
pub type BitCount64 = u64;

pub type ByteCount = usize;

pub type WordCount16 = u16;
pub type WordCount32 = u32;

pub type ElementCount32 = u32;

pub type WirePointerCount16 = u16;

pub const BITS_PER_BYTE: u32 = 8;
pub const BITS_PER_WORD: u32 = 64;
pub const BYTES_PER_WORD: ByteCount = 8;

pub const POINTER_SIZE_IN_WORDS: WordCount32 = 1;

/// Largest segment, in words, that this crate will create or accept. Keeping every
/// segment below 2^29 words guarantees that any offset between two words of the same
/// segment fits in the signed 30-bit offset field of a pointer.
pub const MAX_SEGMENT_WORDS: WordCount32 = 1 << 29;

/// Lists are limited to 2^29 elements (or, for inline composite lists, 2^29 words).
pub const MAX_LIST_ELEMENTS: ElementCount32 = (1 << 29) - 1;

#[inline]
pub fn round_bits_up_to_words(bits: BitCount64) -> WordCount32 {
    ((bits + 63) / u64::from(BITS_PER_WORD)) as WordCount32
}

#[inline]
pub fn round_bytes_up_to_words(bytes: u32) -> WordCount32 {
    (bytes + 7) / BYTES_PER_WORD as u32
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rounding() {
        assert_eq!(0, round_bits_up_to_words(0));
        assert_eq!(1, round_bits_up_to_words(1));
        assert_eq!(1, round_bits_up_to_words(64));
        assert_eq!(2, round_bits_up_to_words(65));
        assert_eq!(0, round_bytes_up_to_words(0));
        assert_eq!(1, round_bytes_up_to_words(8));
        assert_eq!(2, round_bytes_up_to_words(9));
    }
}
