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

//! Tagged pointer words.
//!
//! A [`WirePointer`] is the bare 64-bit word and knows nothing about where it lives.
//! A [`Pointer`] pairs that word with the segment and word index it was read from, which is
//! what gives its offset a meaning. Following a pointer to the object it describes produces
//! a [`ResolvedPointer`].

use core::fmt;

use crate::layout::{ElementSize, StructSize};
use crate::message::Message;
use crate::units::*;
use crate::{Error, Result};

pub type SegmentId = u32;

#[repr(u8)]
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum WirePointerKind {
    Struct = 0,
    List = 1,
    Far = 2,
    Other = 3,
}

impl WirePointerKind {
    fn from(val: u8) -> Self {
        match val & 3 {
            0 => Self::Struct,
            1 => Self::List,
            2 => Self::Far,
            _ => Self::Other,
        }
    }
}

/// One pointer word, in host representation.
#[derive(Clone, Copy, Default, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct WirePointer(u64);

/// The fields of a pointer word, decoded according to its kind.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum PointerValue {
    Null,
    Struct {
        offset: i32,
        size: StructSize,
    },
    List {
        offset: i32,
        element_size: ElementSize,
        element_count: ElementCount32,
    },
    Far {
        double_far: bool,
        position: WordCount32,
        segment: SegmentId,
    },
    /// Capability pointers and anything else with kind 3; kept verbatim.
    Other { raw: u64 },
}

#[inline]
fn offset_and_kind(offset: i32, kind: WirePointerKind) -> u32 {
    ((offset as u32) << 2) | kind as u32
}

impl WirePointer {
    pub const NULL: Self = Self(0);

    #[inline]
    pub const fn from_word(word: u64) -> Self {
        Self(word)
    }

    #[inline]
    pub const fn word(self) -> u64 {
        self.0
    }

    #[inline]
    fn from_halves(lower: u32, upper: u32) -> Self {
        Self(u64::from(lower) | (u64::from(upper) << 32))
    }

    #[inline]
    fn offset_and_kind(self) -> u32 {
        self.0 as u32
    }

    #[inline]
    fn upper32bits(self) -> u32 {
        (self.0 >> 32) as u32
    }

    pub fn new_struct(offset: i32, size: StructSize) -> Self {
        Self::from_halves(
            offset_and_kind(offset, WirePointerKind::Struct),
            u32::from(size.data) | (u32::from(size.pointers) << 16),
        )
    }

    /// A pointer to a struct with no data and no pointers. The offset is -1, as if the struct
    /// were allocated immediately before the pointer; an offset of 0 would make the word null.
    pub fn empty_struct() -> Self {
        Self::from_halves(0xffff_fffc, 0)
    }

    pub fn new_list(offset: i32, element_size: ElementSize, element_count: ElementCount32) -> Self {
        debug_assert!(element_count <= MAX_LIST_ELEMENTS);
        Self::from_halves(
            offset_and_kind(offset, WirePointerKind::List),
            (element_count << 3) | element_size as u32,
        )
    }

    pub fn new_inline_composite_list(offset: i32, word_count: WordCount32) -> Self {
        Self::new_list(offset, ElementSize::InlineComposite, word_count)
    }

    /// The tag word at the head of an inline composite list body: shaped like a struct
    /// pointer, but the offset field carries the element count.
    pub fn new_inline_composite_tag(element_count: ElementCount32, size: StructSize) -> Self {
        Self::from_halves(
            (element_count << 2) | WirePointerKind::Struct as u32,
            u32::from(size.data) | (u32::from(size.pointers) << 16),
        )
    }

    pub fn new_far(double_far: bool, position: WordCount32, segment: SegmentId) -> Self {
        Self::from_halves(
            (position << 3) | ((double_far as u32) << 2) | WirePointerKind::Far as u32,
            segment,
        )
    }

    /// Same kind and size information, different offset. Only meaningful for struct and
    /// list pointers.
    #[inline]
    pub fn with_offset(self, offset: i32) -> Self {
        Self::from_halves(offset_and_kind(offset, self.kind()), self.upper32bits())
    }

    #[inline]
    pub fn kind(self) -> WirePointerKind {
        WirePointerKind::from(self.offset_and_kind() as u8)
    }

    #[inline]
    pub fn is_null(self) -> bool {
        self.0 == 0
    }

    /// Struct and list pointers locate their target relative to themselves.
    #[inline]
    pub fn is_positional(self) -> bool {
        (self.offset_and_kind() & 2) == 0
    }

    #[inline]
    pub fn offset(self) -> i32 {
        (self.offset_and_kind() as i32) >> 2
    }

    #[inline]
    pub fn struct_data_size(self) -> WordCount16 {
        self.upper32bits() as WordCount16
    }

    #[inline]
    pub fn struct_ptr_count(self) -> WirePointerCount16 {
        (self.upper32bits() >> 16) as WirePointerCount16
    }

    #[inline]
    pub fn struct_size(self) -> StructSize {
        StructSize {
            data: self.struct_data_size(),
            pointers: self.struct_ptr_count(),
        }
    }

    #[inline]
    pub fn struct_word_size(self) -> WordCount32 {
        self.struct_size().total()
    }

    #[inline]
    pub fn list_element_size(self) -> ElementSize {
        ElementSize::from(self.upper32bits() as u8)
    }

    #[inline]
    pub fn list_element_count(self) -> ElementCount32 {
        self.upper32bits() >> 3
    }

    #[inline]
    pub fn list_inline_composite_word_count(self) -> WordCount32 {
        self.list_element_count()
    }

    #[inline]
    pub fn inline_composite_list_element_count(self) -> ElementCount32 {
        self.offset_and_kind() >> 2
    }

    #[inline]
    pub fn far_position_in_segment(self) -> WordCount32 {
        self.offset_and_kind() >> 3
    }

    #[inline]
    pub fn is_double_far(self) -> bool {
        ((self.offset_and_kind() >> 2) & 1) != 0
    }

    #[inline]
    pub fn far_segment_id(self) -> SegmentId {
        self.upper32bits()
    }

    pub fn decode(self) -> PointerValue {
        if self.is_null() {
            return PointerValue::Null;
        }
        match self.kind() {
            WirePointerKind::Struct => PointerValue::Struct {
                offset: self.offset(),
                size: self.struct_size(),
            },
            WirePointerKind::List => PointerValue::List {
                offset: self.offset(),
                element_size: self.list_element_size(),
                element_count: self.list_element_count(),
            },
            WirePointerKind::Far => PointerValue::Far {
                double_far: self.is_double_far(),
                position: self.far_position_in_segment(),
                segment: self.far_segment_id(),
            },
            WirePointerKind::Other => PointerValue::Other { raw: self.0 },
        }
    }
}

impl PointerValue {
    pub fn encode(self) -> WirePointer {
        match self {
            Self::Null => WirePointer::NULL,
            Self::Struct { offset, size } => WirePointer::new_struct(offset, size),
            Self::List {
                offset,
                element_size,
                element_count,
            } => WirePointer::new_list(offset, element_size, element_count),
            Self::Far {
                double_far,
                position,
                segment,
            } => WirePointer::new_far(double_far, position, segment),
            Self::Other { raw } => WirePointer::from_word(raw),
        }
    }
}

impl fmt::Debug for WirePointer {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "WirePointer({:#018x})", self.0)
    }
}

impl fmt::Display for WirePointer {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self.decode() {
            PointerValue::Null => write!(f, "null"),
            PointerValue::Struct { offset, size } => write!(
                f,
                "struct {:+} data={} ptrs={}",
                offset, size.data, size.pointers
            ),
            PointerValue::List {
                offset,
                element_size,
                element_count,
            } => write!(f, "list {offset:+} {element_size:?} x{element_count}"),
            PointerValue::Far {
                double_far,
                position,
                segment,
            } => {
                write!(f, "far -> [{segment}:{position}]")?;
                if double_far {
                    write!(f, " (double)")?;
                }
                Ok(())
            }
            PointerValue::Other { raw } => write!(f, "other {raw:#018x}"),
        }
    }
}

/// The location of a pointer word inside a message: the place a new pointer can be written.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct PointerSlot {
    pub segment: SegmentId,
    pub index: WordCount32,
}

impl PointerSlot {
    /// Word 0 of segment 0.
    pub const ROOT: Self = Self {
        segment: 0,
        index: 0,
    };

    pub fn new(segment: SegmentId, index: WordCount32) -> Self {
        Self { segment, index }
    }
}

/// A pointer word together with the segment and word index it was read from.
///
/// This is the raw view of the address space: a far pointer stays a far pointer until it is
/// explicitly followed, either one hop at a time with [`Pointer::dereference`] or all the way
/// to its object with [`Message::resolve`].
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Pointer {
    segment: SegmentId,
    location: WordCount32,
    wire: WirePointer,
}

impl Pointer {
    pub fn new(segment: SegmentId, location: WordCount32, wire: WirePointer) -> Self {
        Self {
            segment,
            location,
            wire,
        }
    }

    /// A null pointer that does not live anywhere, used for absent fields.
    pub fn null() -> Self {
        Self::new(0, 0, WirePointer::NULL)
    }

    #[inline]
    pub fn segment_id(&self) -> SegmentId {
        self.segment
    }

    #[inline]
    pub fn location(&self) -> WordCount32 {
        self.location
    }

    #[inline]
    pub fn wire(&self) -> WirePointer {
        self.wire
    }

    #[inline]
    pub fn kind(&self) -> WirePointerKind {
        self.wire.kind()
    }

    #[inline]
    pub fn is_null(&self) -> bool {
        self.wire.is_null()
    }

    #[inline]
    pub fn is_far(&self) -> bool {
        !self.is_null() && self.kind() == WirePointerKind::Far
    }

    #[inline]
    pub fn is_struct(&self) -> bool {
        !self.is_null() && self.kind() == WirePointerKind::Struct
    }

    #[inline]
    pub fn is_list(&self) -> bool {
        !self.is_null() && self.kind() == WirePointerKind::List
    }

    pub fn slot(&self) -> PointerSlot {
        PointerSlot::new(self.segment, self.location)
    }

    /// Word index targeted by a struct or list pointer: the offset counts from the word
    /// after the pointer itself. `None` for far, other and null pointers, and for offsets that
    /// land before the start of the segment.
    pub fn target(&self) -> Option<WordCount32> {
        if self.is_null() || !self.wire.is_positional() {
            return None;
        }
        let target = i64::from(self.location) + 1 + i64::from(self.wire.offset());
        u32::try_from(target).ok()
    }

    /// Follows one far hop, returning the pointer stored at the landing pad. Struct, list
    /// and null pointers are returned unchanged.
    ///
    /// For a double-far pointer the landing pad is itself a far pointer to the first word of
    /// the object, with the object's tag in the following word; [`Message::resolve`]
    /// understands that layout.
    pub fn dereference(&self, message: &Message) -> Result<Self> {
        if !self.is_far() {
            return Ok(*self);
        }
        let segment_id = self.wire.far_segment_id();
        let position = self.wire.far_position_in_segment();
        let segment = message.segment(segment_id)?;
        let pad_words = if self.wire.is_double_far() { 2 } else { 1 };
        if u64::from(position) + pad_words > u64::from(segment.len()) {
            return Err(Error::out_of_range(format!(
                "far pointer landing pad at word {position} is outside segment {segment_id}"
            )));
        }
        Ok(Self::new(
            segment_id,
            position,
            WirePointer::from_word(segment.read_word(position)?),
        ))
    }
}

impl fmt::Display for Pointer {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "[{}:{}] {}", self.segment, self.location, self.wire)?;
        if let Some(target) = self.target() {
            write!(f, " @{target}")?;
        }
        Ok(())
    }
}

/// A pointer that has been followed to its object: the segment and first word of the object,
/// and the tag word describing its shape (a struct or list pointer whose offset is no longer
/// meaningful).
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct ResolvedPointer {
    pub(crate) segment: SegmentId,
    pub(crate) start: WordCount32,
    pub(crate) tag: WirePointer,
}

impl ResolvedPointer {
    #[inline]
    pub fn segment_id(&self) -> SegmentId {
        self.segment
    }

    #[inline]
    pub fn start(&self) -> WordCount32 {
        self.start
    }

    #[inline]
    pub fn tag(&self) -> WirePointer {
        self.tag
    }

    #[inline]
    pub fn kind(&self) -> WirePointerKind {
        self.tag.kind()
    }
}

impl fmt::Display for ResolvedPointer {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{} at [{}:{}]", self.tag.with_offset(0), self.segment, self.start)
    }
}
