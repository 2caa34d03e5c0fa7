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

//! Field descriptors, as emitted by schema-driven code generation.
//!
//! The field number is carried along for the benefit of generated code; the accessors here
//! only look at where the field lives.

use crate::layout::StructRef;
use crate::message::Message;
use crate::pointer::Pointer;
use crate::units::BitCount32;
use crate::{Error, Result};

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum FieldLocation {
    /// Bits `bit_start..bit_end` of the data section.
    Data {
        bit_start: BitCount32,
        bit_end: BitCount32,
    },

    /// A slot of the pointer section.
    Pointer(u16),
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct Field {
    pub number: u16,
    pub location: FieldLocation,
}

impl Field {
    pub const fn data(number: u16, bit_start: BitCount32, bit_end: BitCount32) -> Self {
        Self {
            number,
            location: FieldLocation::Data { bit_start, bit_end },
        }
    }

    pub const fn pointer(number: u16, slot: u16) -> Self {
        Self {
            number,
            location: FieldLocation::Pointer(slot),
        }
    }

    /// Returns the bit offset and width of a data field.
    fn data_bits(&self) -> Result<(u64, BitCount32)> {
        match self.location {
            FieldLocation::Data { bit_start, bit_end }
                if bit_end > bit_start && bit_end - bit_start <= 64 =>
            {
                Ok((u64::from(bit_start), bit_end - bit_start))
            }
            FieldLocation::Data { bit_start, bit_end } => Err(Error::invalid_argument(format!(
                "field {} spans bits {bit_start}..{bit_end}",
                self.number
            ))),
            FieldLocation::Pointer(_) => Err(Error::invalid_argument(format!(
                "field {} is a pointer field",
                self.number
            ))),
        }
    }
}

impl StructRef {
    /// Reads a data field as raw bits, zero-extended. Fields beyond the data section read as
    /// zero.
    pub fn read_field(&self, message: &Message, field: &Field) -> Result<u64> {
        let (offset, width) = field.data_bits()?;
        self.read_data_bits(message, offset, width)
    }

    pub fn write_field(&self, message: &mut Message, field: &Field, value: u64) -> Result<()> {
        let (offset, width) = field.data_bits()?;
        self.write_data_bits(message, offset, width, value)
    }

    pub fn pointer_field(&self, message: &Message, field: &Field) -> Result<Pointer> {
        match field.location {
            FieldLocation::Pointer(slot) => self.get_pointer(message, slot),
            FieldLocation::Data { .. } => Err(Error::invalid_argument(format!(
                "field {} is a data field",
                field.number
            ))),
        }
    }
}
