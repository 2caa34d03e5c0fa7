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

//! Struct and list views.
//!
//! [`StructRef`] and [`ListRef`] are plain values: a segment id, a word offset and the shape
//! of the object. They borrow nothing, so every accessor takes the owning [`Message`]
//! explicitly.

use core::fmt;

use crate::accessor::TypeAccessor;
use crate::list::List;
use crate::message::Message;
use crate::pointer::{Pointer, PointerSlot, SegmentId, WirePointer};
use crate::primitive::{low_mask, Primitive};
use crate::units::*;
use crate::{Error, Result};

/// The encoding of each element of a list, stored in the low three bits of the
/// upper half of a list pointer.
#[repr(u8)]
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum ElementSize {
    Void = 0,
    Bit = 1,
    Byte = 2,
    TwoBytes = 3,
    FourBytes = 4,
    EightBytes = 5,
    Pointer = 6,
    InlineComposite = 7,
}

impl ElementSize {
    pub fn from(val: u8) -> Self {
        match val & 7 {
            0 => Self::Void,
            1 => Self::Bit,
            2 => Self::Byte,
            3 => Self::TwoBytes,
            4 => Self::FourBytes,
            5 => Self::EightBytes,
            6 => Self::Pointer,
            _ => Self::InlineComposite,
        }
    }

    pub fn data_bits_per_element(self) -> BitCount32 {
        match self {
            Self::Void => 0,
            Self::Bit => 1,
            Self::Byte => 8,
            Self::TwoBytes => 16,
            Self::FourBytes => 32,
            Self::EightBytes => 64,
            Self::Pointer => 0,
            Self::InlineComposite => 0,
        }
    }

    pub fn pointers_per_element(self) -> u32 {
        match self {
            Self::Pointer => 1,
            _ => 0,
        }
    }

    /// Total stride of one element, or `None` for inline composite lists, whose stride is
    /// carried by the tag word at the head of the list body.
    pub fn bits_per_element(self) -> Option<BitCount32> {
        match self {
            Self::InlineComposite => None,
            _ => Some(self.data_bits_per_element() + self.pointers_per_element() * BITS_PER_WORD),
        }
    }
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
pub struct StructSize {
    pub data: WordCount16,
    pub pointers: WirePointerCount16,
}

impl StructSize {
    pub fn total(&self) -> WordCount32 {
        u32::from(self.data) + u32::from(self.pointers) * POINTER_SIZE_IN_WORDS
    }
}

pub(crate) fn read_bits(
    message: &Message,
    segment_id: SegmentId,
    start: WordCount32,
    bit_offset: BitCount64,
    width: BitCount32,
) -> Result<u64> {
    if width == 0 {
        return Ok(0);
    }
    let index = word_index(start, bit_offset)?;
    let shift = (bit_offset % u64::from(BITS_PER_WORD)) as u32;
    let segment = message.segment(segment_id)?;
    let low = segment.read_word(index)? >> shift;
    if shift + width <= BITS_PER_WORD {
        Ok(low & low_mask(width))
    } else {
        let high = segment.read_word(index + 1)? << (BITS_PER_WORD - shift);
        Ok((low | high) & low_mask(width))
    }
}

pub(crate) fn write_bits(
    message: &mut Message,
    segment_id: SegmentId,
    start: WordCount32,
    bit_offset: BitCount64,
    width: BitCount32,
    value: u64,
) -> Result<()> {
    if width == 0 {
        return Ok(());
    }
    let index = word_index(start, bit_offset)?;
    let shift = (bit_offset % u64::from(BITS_PER_WORD)) as u32;
    let mask = low_mask(width);
    let value = value & mask;
    let segment = message.segment_mut(segment_id)?;
    segment.set_value(index, value << shift, mask << shift)?;
    if shift + width > BITS_PER_WORD {
        let spill = BITS_PER_WORD - shift;
        segment.set_value(index + 1, value >> spill, low_mask(width - spill))?;
    }
    Ok(())
}

fn word_index(start: WordCount32, bit_offset: BitCount64) -> Result<WordCount32> {
    let index = u64::from(start) + bit_offset / u64::from(BITS_PER_WORD);
    u32::try_from(index).map_err(|_| Error::out_of_range(format!("word index {index}")))
}

/// A struct inside a message: where its data section starts, and how big its data and
/// pointer sections are.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct StructRef {
    segment: SegmentId,
    data: WordCount32,
    data_size: WordCount16,
    pointer_count: WirePointerCount16,
}

impl StructRef {
    /// The struct read through a null pointer: every data field is zero and every pointer
    /// field is null.
    pub fn empty() -> Self {
        Self {
            segment: 0,
            data: 0,
            data_size: 0,
            pointer_count: 0,
        }
    }

    pub(crate) fn new(segment: SegmentId, data: WordCount32, size: StructSize) -> Self {
        Self {
            segment,
            data,
            data_size: size.data,
            pointer_count: size.pointers,
        }
    }

    #[inline]
    pub fn segment_id(&self) -> SegmentId {
        self.segment
    }

    #[inline]
    pub fn start(&self) -> WordCount32 {
        self.data
    }

    #[inline]
    pub fn size(&self) -> StructSize {
        StructSize {
            data: self.data_size,
            pointers: self.pointer_count,
        }
    }

    fn pointer_section(&self) -> WordCount32 {
        self.data + u32::from(self.data_size)
    }

    fn data_bits(&self) -> BitCount64 {
        u64::from(self.data_size) * u64::from(BITS_PER_WORD)
    }

    /// Reads `width` bits starting `bit_offset` bits into the data section. Bits beyond the
    /// end of the data section read as zero: the struct may have been written by an older
    /// producer that did not know about the field.
    pub(crate) fn read_data_bits(
        &self,
        message: &Message,
        bit_offset: BitCount64,
        width: BitCount32,
    ) -> Result<u64> {
        if bit_offset + u64::from(width) > self.data_bits() {
            return Ok(0);
        }
        read_bits(message, self.segment, self.data, bit_offset, width)
    }

    pub(crate) fn write_data_bits(
        &self,
        message: &mut Message,
        bit_offset: BitCount64,
        width: BitCount32,
        value: u64,
    ) -> Result<()> {
        if bit_offset + u64::from(width) > self.data_bits() {
            return Err(Error::out_of_range(format!(
                "bits {}..{} are outside a data section of {} words",
                bit_offset,
                bit_offset + u64::from(width),
                self.data_size
            )));
        }
        write_bits(message, self.segment, self.data, bit_offset, width, value)
    }

    /// Gets the `offset`-th value of type `T` in the data section, counting in units of `T`.
    pub fn get<T: Primitive>(&self, message: &Message, offset: u32) -> Result<T> {
        let bit_offset = u64::from(offset) * u64::from(T::BITS);
        Ok(T::from_bits(self.read_data_bits(message, bit_offset, T::BITS)?))
    }

    /// Sets the `offset`-th value of type `T` in the data section, counting in units of `T`.
    pub fn set<T: Primitive>(&self, message: &mut Message, offset: u32, value: T) -> Result<()> {
        let bit_offset = u64::from(offset) * u64::from(T::BITS);
        self.write_data_bits(message, bit_offset, T::BITS, value.to_bits())
    }

    pub fn get_bool(&self, message: &Message, bit_offset: u32) -> Result<bool> {
        self.get::<bool>(message, bit_offset)
    }

    pub fn set_bool(&self, message: &mut Message, bit_offset: u32, value: bool) -> Result<()> {
        self.set::<bool>(message, bit_offset, value)
    }

    /// Gets the raw pointer in slot `index` of the pointer section. Slots beyond the end of
    /// the section read as null.
    pub fn get_pointer(&self, message: &Message, index: u16) -> Result<Pointer> {
        if index >= self.pointer_count {
            return Ok(Pointer::null());
        }
        let location = self.pointer_section() + u32::from(index);
        let word = message.segment(self.segment)?.read_word(location)?;
        Ok(Pointer::new(
            self.segment,
            location,
            WirePointer::from_word(word),
        ))
    }

    /// The location of pointer slot `index`, for writing.
    pub fn pointer_slot(&self, index: u16) -> Result<PointerSlot> {
        if index >= self.pointer_count {
            return Err(Error::out_of_range(format!(
                "pointer slot {index} of a struct with {} pointers",
                self.pointer_count
            )));
        }
        Ok(PointerSlot::new(
            self.segment,
            self.pointer_section() + u32::from(index),
        ))
    }

    pub fn get_struct(&self, message: &Message, index: u16) -> Result<StructRef> {
        message.read_struct(&self.get_pointer(message, index)?)
    }

    pub fn init_struct(
        &self,
        message: &mut Message,
        index: u16,
        size: StructSize,
    ) -> Result<StructRef> {
        message.init_struct(self.pointer_slot(index)?, size)
    }

    pub fn get_list<T: TypeAccessor>(&self, message: &Message, index: u16) -> Result<List<T>> {
        List::from_pointer(message, &self.get_pointer(message, index)?)
    }

    pub fn init_list<T: TypeAccessor>(
        &self,
        message: &mut Message,
        index: u16,
        count: ElementCount32,
    ) -> Result<List<T>> {
        T::create_list(message, self.pointer_slot(index)?, count)
    }

    /// Points slot `index` at a copy-free view of the object `value` refers to.
    pub fn set_pointer(&self, message: &mut Message, index: u16, value: &Pointer) -> Result<()> {
        let slot = self.pointer_slot(index)?;
        match message.resolve(value)? {
            Some(target) => message.set_pointer(slot, &target),
            None => message.write_pointer_word(slot, WirePointer::NULL),
        }
    }

    /// Reads a text field: a byte list whose last byte is a NUL terminator.
    pub fn get_text(&self, message: &Message, index: u16) -> Result<String> {
        let list = message.read_list(&self.get_pointer(message, index)?)?;
        if list.is_empty() {
            return Ok(String::new());
        }
        if list.element_size() != ElementSize::Byte {
            return Err(Error::format(format!(
                "expected a byte list for text, found {:?} elements",
                list.element_size()
            )));
        }
        let mut bytes = message
            .segment(list.segment_id())?
            .read_bytes(list.start() as usize * BYTES_PER_WORD, list.len() as usize)?;
        if bytes.pop() != Some(0) {
            return Err(Error::format("text is not NUL-terminated"));
        }
        String::from_utf8(bytes).map_err(|e| Error::format(format!("text is not UTF-8: {e}")))
    }

    pub fn set_text(&self, message: &mut Message, index: u16, value: &str) -> Result<()> {
        let slot = self.pointer_slot(index)?;
        let byte_count = u32::try_from(value.len() + 1)
            .ok()
            .filter(|&n| n <= MAX_LIST_ELEMENTS)
            .ok_or_else(|| Error::out_of_range(format!("text of {} bytes", value.len())))?;
        let list = message.init_list(slot, ElementSize::Byte, byte_count)?;
        message
            .segment_mut(list.segment_id())?
            .write_bytes(list.start() as usize * BYTES_PER_WORD, value.as_bytes())
    }
}

impl fmt::Display for StructRef {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(
            f,
            "struct [{}:{}] data={} ptrs={}",
            self.segment, self.data, self.data_size, self.pointer_count
        )
    }
}

/// A list inside a message.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct ListRef {
    segment: SegmentId,
    start: WordCount32,
    element_count: ElementCount32,
    step: BitCount32,
    struct_data_size: WordCount16,
    struct_pointer_count: WirePointerCount16,
    element_size: ElementSize,
}

impl ListRef {
    pub fn empty() -> Self {
        Self {
            segment: 0,
            start: 0,
            element_count: 0,
            step: 0,
            struct_data_size: 0,
            struct_pointer_count: 0,
            element_size: ElementSize::Void,
        }
    }

    pub(crate) fn new_primitive(
        segment: SegmentId,
        start: WordCount32,
        element_size: ElementSize,
        element_count: ElementCount32,
    ) -> Self {
        let step = element_size.data_bits_per_element()
            + element_size.pointers_per_element() * BITS_PER_WORD;
        Self {
            segment,
            start,
            element_count,
            step,
            struct_data_size: if element_size == ElementSize::EightBytes { 1 } else { 0 },
            struct_pointer_count: element_size.pointers_per_element() as u16,
            element_size,
        }
    }

    pub(crate) fn new_composite(
        segment: SegmentId,
        start: WordCount32,
        size: StructSize,
        element_count: ElementCount32,
    ) -> Self {
        Self {
            segment,
            start,
            element_count,
            step: size.total() * BITS_PER_WORD,
            struct_data_size: size.data,
            struct_pointer_count: size.pointers,
            element_size: ElementSize::InlineComposite,
        }
    }

    #[inline]
    pub fn len(&self) -> ElementCount32 {
        self.element_count
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.element_count == 0
    }

    #[inline]
    pub fn segment_id(&self) -> SegmentId {
        self.segment
    }

    /// First word of the first element. For inline composite lists this is the word after
    /// the tag.
    #[inline]
    pub fn start(&self) -> WordCount32 {
        self.start
    }

    #[inline]
    pub fn element_size(&self) -> ElementSize {
        self.element_size
    }

    /// Distance between consecutive elements, in bits.
    #[inline]
    pub fn step_bits(&self) -> BitCount32 {
        self.step
    }

    /// Shape of each element when read as a struct.
    pub fn element_struct_size(&self) -> StructSize {
        StructSize {
            data: self.struct_data_size,
            pointers: self.struct_pointer_count,
        }
    }

    #[inline]
    pub fn element_bit_offset(&self, index: ElementCount32) -> BitCount64 {
        u64::from(index) * u64::from(self.step)
    }

    pub fn check_index(&self, index: ElementCount32) -> Result<()> {
        if index < self.element_count {
            Ok(())
        } else {
            Err(Error::out_of_range(format!(
                "list index {index} in a list of {} elements",
                self.element_count
            )))
        }
    }

    /// Element `index` viewed as a struct. Lists of data words and lists of pointers can be
    /// read this way too; anything narrower than a word cannot.
    pub fn get_struct_element(&self, index: ElementCount32) -> Result<StructRef> {
        self.check_index(index)?;
        if self.step % BITS_PER_WORD != 0 {
            return Err(Error::unsupported(format!(
                "elements of a {:?} list cannot be read as structs",
                self.element_size
            )));
        }
        let data = self.start + index * (self.step / BITS_PER_WORD);
        Ok(StructRef::new(
            self.segment,
            data,
            self.element_struct_size(),
        ))
    }

    /// The location of the pointer belonging to element `index`: the element itself for a
    /// pointer list, the first pointer slot of the element for a struct list.
    pub fn pointer_slot(&self, index: ElementCount32) -> Result<PointerSlot> {
        if self.struct_pointer_count == 0 {
            return Err(Error::unsupported(format!(
                "elements of a {:?} list hold no pointers",
                self.element_size
            )));
        }
        let element = self.get_struct_element(index)?;
        element.pointer_slot(0)
    }

    pub fn get_pointer_element(&self, message: &Message, index: ElementCount32) -> Result<Pointer> {
        let slot = self.pointer_slot(index)?;
        let word = message.segment(slot.segment)?.read_word(slot.index)?;
        Ok(Pointer::new(
            slot.segment,
            slot.index,
            WirePointer::from_word(word),
        ))
    }
}

impl fmt::Display for ListRef {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(
            f,
            "list [{}:{}] {:?} x{}",
            self.segment, self.start, self.element_size, self.element_count
        )
    }
}
