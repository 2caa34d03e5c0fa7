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

use crate::layout::ElementSize;
use crate::units::BitCount32;

/// A fixed-width scalar that lives in the data section of a struct or in the body of a
/// primitive list.
///
/// Values are moved to and from the low `BITS` bits of a `u64`; placing those bits at the
/// right position inside a word is the caller's job.
pub trait Primitive: Copy + Default + PartialEq {
    const BITS: BitCount32;

    /// Natural list encoding for this type.
    const ELEMENT_SIZE: ElementSize;

    fn from_bits(bits: u64) -> Self;

    fn to_bits(self) -> u64;
}

macro_rules! primitive_impl(
    ($typ:ty, $unsigned:ty, $bits:expr, $size:expr) => (
        impl Primitive for $typ {
            const BITS: BitCount32 = $bits;
            const ELEMENT_SIZE: ElementSize = $size;

            #[inline]
            fn from_bits(bits: u64) -> Self {
                bits as $unsigned as $typ
            }

            #[inline]
            fn to_bits(self) -> u64 {
                self as $unsigned as u64
            }
        }
        );
    );

primitive_impl!(u8, u8, 8, ElementSize::Byte);
primitive_impl!(i8, u8, 8, ElementSize::Byte);
primitive_impl!(u16, u16, 16, ElementSize::TwoBytes);
primitive_impl!(i16, u16, 16, ElementSize::TwoBytes);
primitive_impl!(u32, u32, 32, ElementSize::FourBytes);
primitive_impl!(i32, u32, 32, ElementSize::FourBytes);
primitive_impl!(u64, u64, 64, ElementSize::EightBytes);
primitive_impl!(i64, u64, 64, ElementSize::EightBytes);

impl Primitive for f32 {
    const BITS: BitCount32 = 32;
    const ELEMENT_SIZE: ElementSize = ElementSize::FourBytes;

    #[inline]
    fn from_bits(bits: u64) -> Self {
        f32::from_bits(bits as u32)
    }

    #[inline]
    fn to_bits(self) -> u64 {
        u64::from(f32::to_bits(self))
    }
}

impl Primitive for f64 {
    const BITS: BitCount32 = 64;
    const ELEMENT_SIZE: ElementSize = ElementSize::EightBytes;

    #[inline]
    fn from_bits(bits: u64) -> Self {
        f64::from_bits(bits)
    }

    #[inline]
    fn to_bits(self) -> u64 {
        f64::to_bits(self)
    }
}

impl Primitive for bool {
    const BITS: BitCount32 = 1;
    const ELEMENT_SIZE: ElementSize = ElementSize::Bit;

    #[inline]
    fn from_bits(bits: u64) -> Self {
        bits & 1 != 0
    }

    #[inline]
    fn to_bits(self) -> u64 {
        self as u64
    }
}

/// Mask covering the low `bits` bits of a word.
#[inline]
pub fn low_mask(bits: BitCount32) -> u64 {
    if bits >= 64 {
        u64::MAX
    } else {
        (1u64 << bits) - 1
    }
}
