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

//! Untyped root container for a Cap'n Proto value.

use core::fmt;
use std::io::Read;
use std::path::Path;

use crate::accessor::TypeAccessor;
use crate::layout::{ElementSize, ListRef, StructRef, StructSize};
use crate::list::List;
use crate::pointer::{
    Pointer, PointerSlot, ResolvedPointer, SegmentId, WirePointer, WirePointerKind,
};
use crate::segment::Segment;
use crate::serialize;
use crate::units::*;
use crate::{Error, Result};

/// Options controlling how data is read.
#[derive(Clone, Copy, Debug)]
pub struct ReaderOptions {
    /// Limits how many total words of segment data a single message may carry. A preamble
    /// announcing more than this is rejected before any segment is read.
    ///
    /// This limit exists for security reasons: without it, a few bytes of preamble could make
    /// the reader allocate gigabytes.
    pub traversal_limit_in_words: u64,

    /// Limits how many segments a single message may have.
    pub segment_limit: u32,
}

pub const DEFAULT_READER_OPTIONS: ReaderOptions = ReaderOptions {
    traversal_limit_in_words: 8 * 1024 * 1024,
    segment_limit: 512,
};

impl Default for ReaderOptions {
    fn default() -> Self {
        DEFAULT_READER_OPTIONS
    }
}

impl ReaderOptions {
    pub fn new() -> Self {
        DEFAULT_READER_OPTIONS
    }

    pub fn traversal_limit_in_words(&mut self, value: u64) -> &mut Self {
        self.traversal_limit_in_words = value;
        self
    }

    pub fn segment_limit(&mut self, value: u32) -> &mut Self {
        self.segment_limit = value;
        self
    }
}

/// An object that provides the backing buffers of a message's segments.
pub trait Allocator: Send {
    /// Allocates a new zero-filled buffer of at least `minimum_size` words. The length of
    /// the returned vector is the capacity of the new segment.
    fn allocate_segment(&mut self, minimum_size: WordCount32) -> Result<Vec<u64>>;

    /// Takes back a buffer previously returned by `allocate_segment`, once its message is
    /// dropped. The buffer has been zeroed.
    fn deallocate_segment(&mut self, _words: Vec<u64>) {}
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum AllocationStrategy {
    /// Every segment after the first is the same size as the first.
    FixedSize,

    /// Each new segment is as large as all previous segments together, so that the number
    /// of segments grows logarithmically with message size.
    GrowHeuristically,
}

pub const SUGGESTED_FIRST_SEGMENT_WORDS: u32 = 1024;
pub const SUGGESTED_ALLOCATION_STRATEGY: AllocationStrategy = AllocationStrategy::GrowHeuristically;

/// Standard segment allocator. Allocates each segment on the heap.
#[derive(Debug)]
pub struct HeapAllocator {
    next_size: u32,
    allocation_strategy: AllocationStrategy,
    max_segment_words: u32,
}

impl HeapAllocator {
    pub fn new() -> Self {
        Self {
            next_size: SUGGESTED_FIRST_SEGMENT_WORDS,
            allocation_strategy: SUGGESTED_ALLOCATION_STRATEGY,
            max_segment_words: MAX_SEGMENT_WORDS,
        }
    }

    /// Sets the size of the initial segment in words, where 1 word = 8 bytes.
    pub fn first_segment_words(mut self, value: u32) -> Self {
        self.next_size = value;
        self
    }

    /// Sets the allocation strategy for segments after the first one.
    pub fn allocation_strategy(mut self, value: AllocationStrategy) -> Self {
        self.allocation_strategy = value;
        self
    }

    /// Caps the size that the growth heuristic will pick. A single object larger than the
    /// cap still gets a segment big enough to hold it.
    pub fn max_segment_words(mut self, value: u32) -> Self {
        self.max_segment_words = value.min(MAX_SEGMENT_WORDS);
        self
    }
}

impl Default for HeapAllocator {
    fn default() -> Self {
        Self::new()
    }
}

impl Allocator for HeapAllocator {
    fn allocate_segment(&mut self, minimum_size: WordCount32) -> Result<Vec<u64>> {
        let size = core::cmp::max(
            minimum_size,
            core::cmp::min(self.next_size, self.max_segment_words),
        );
        let mut words = Vec::new();
        words
            .try_reserve_exact(size as usize)
            .map_err(|e| Error::out_of_memory(format!("segment of {size} words: {e}")))?;
        words.resize(size as usize, 0);

        if let AllocationStrategy::GrowHeuristically = self.allocation_strategy {
            self.next_size = self.next_size.saturating_add(size);
        }
        Ok(words)
    }
}

/// Where [`Message::allocate`] placed a run of words.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Allocation {
    pub segment: SegmentId,

    /// First allocated word. When `landing_pad` is set this word is reserved for a landing
    /// pad and the object itself starts at the next word.
    pub start: WordCount32,

    pub landing_pad: bool,
}

/// A message: an ordered collection of segments, with the root pointer in the first word
/// of segment 0.
pub struct Message {
    segments: Vec<Segment>,
    allocator: Box<dyn Allocator>,
    recycled: Vec<Vec<u64>>,
}

impl Message {
    pub fn new<A: Allocator + 'static>(allocator: A) -> Self {
        Self {
            segments: Vec::new(),
            allocator: Box::new(allocator),
            recycled: Vec::new(),
        }
    }

    /// Constructs a new empty message backed by a [`HeapAllocator`].
    pub fn new_default() -> Self {
        Self::new(HeapAllocator::new())
    }

    pub(crate) fn from_segments(segments: Vec<Segment>) -> Self {
        Self {
            segments,
            allocator: Box::new(HeapAllocator::new()),
            recycled: Vec::new(),
        }
    }

    /// Loads a framed message from the front of `bytes`.
    pub fn load(bytes: &[u8]) -> Result<Self> {
        serialize::read_message_from_bytes(bytes, ReaderOptions::new())
    }

    /// Loads a framed message from `buffer[offset..offset + length]`, or from `offset` to the
    /// end of `buffer` when no length is given.
    pub fn load_range(buffer: &[u8], offset: usize, length: Option<usize>) -> Result<Self> {
        let end = match length {
            Some(length) => offset.checked_add(length),
            None => Some(buffer.len()),
        };
        let bytes = end
            .and_then(|end| buffer.get(offset..end))
            .ok_or_else(|| {
                Error::out_of_range(format!(
                    "range {offset}..+{length:?} of a {}-byte buffer",
                    buffer.len()
                ))
            })?;
        Self::load(bytes)
    }

    /// Reads one framed message from `read`. Pass `&mut reader` to keep using the stream
    /// afterwards.
    pub fn read_from<R: Read>(read: R) -> Result<Self> {
        serialize::read_message(read, ReaderOptions::new())
    }

    pub fn load_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let file = std::fs::File::open(path)?;
        serialize::read_message(std::io::BufReader::new(file), ReaderOptions::new())
    }

    pub fn segment_count(&self) -> usize {
        self.segments.len()
    }

    /// Total allocated words across all segments.
    pub fn word_count(&self) -> u64 {
        self.segments.iter().map(|s| u64::from(s.len())).sum()
    }

    pub fn segments(&self) -> core::slice::Iter<'_, Segment> {
        self.segments.iter()
    }

    pub fn segment(&self, id: SegmentId) -> Result<&Segment> {
        self.segments
            .get(id as usize)
            .ok_or_else(|| {
                Error::out_of_range(format!(
                    "no segment {id} in a message of {}",
                    self.segments.len()
                ))
            })
    }

    pub fn segment_mut(&mut self, id: SegmentId) -> Result<&mut Segment> {
        let count = self.segments.len();
        self.segments
            .get_mut(id as usize)
            .ok_or_else(|| Error::out_of_range(format!("no segment {id} in a message of {count}")))
    }

    /// Creates a new segment of at least `minimum_size` words and returns its id.
    pub fn create_segment(&mut self, minimum_size: WordCount32) -> Result<SegmentId> {
        let id = self.segments.len() as SegmentId;
        let (words, recycled) = self.take_buffer(minimum_size)?;
        tracing::debug!(
            segment = id,
            capacity = words.len(),
            recycled,
            "created segment"
        );
        self.segments.push(Segment::new(id, words));
        Ok(id)
    }

    /// A zeroed buffer of at least `minimum_size` words, from the recycled buffers if one is
    /// large enough, else from the allocator. The flag tells which.
    fn take_buffer(&mut self, minimum_size: WordCount32) -> Result<(Vec<u64>, bool)> {
        if minimum_size > MAX_SEGMENT_WORDS {
            return Err(Error::out_of_memory(format!(
                "{minimum_size} words exceeds the largest possible segment"
            )));
        }
        let reuse = self
            .recycled
            .iter()
            .position(|words| words.len() >= minimum_size as usize);
        let mut words = match reuse {
            Some(index) => self.recycled.swap_remove(index),
            None => self.allocator.allocate_segment(minimum_size)?,
        };
        if words.len() < minimum_size as usize {
            return Err(Error::out_of_memory(format!(
                "allocator returned {} words where {minimum_size} were needed",
                words.len()
            )));
        }
        words.truncate(MAX_SEGMENT_WORDS as usize);
        Ok((words, reuse.is_some()))
    }

    /// Finds room for `amount` words.
    ///
    /// Tries segment `current` first, then every later segment in order, then creates a new
    /// segment. `needs_header` asks for one extra word in front of the object to hold a
    /// landing pad; it is only honored when the object ends up outside `current`. A later
    /// segment that can fit the object but not the extra word is still used, in which case
    /// the caller has to build a two-word landing pad elsewhere.
    pub fn allocate(
        &mut self,
        current: SegmentId,
        amount: WordCount32,
        needs_header: bool,
    ) -> Result<Allocation> {
        if amount == 0 {
            return Err(Error::invalid_argument("cannot allocate zero words"));
        }
        if let Some(segment) = self.segments.get_mut(current as usize) {
            if let Some(start) = segment.try_allocate(amount) {
                return Ok(Allocation {
                    segment: current,
                    start,
                    landing_pad: false,
                });
            }
        }

        for segment in self.segments.iter_mut().skip(current as usize + 1) {
            if needs_header {
                if let Some(start) = segment.try_allocate(amount + 1) {
                    return Ok(Allocation {
                        segment: segment.id(),
                        start,
                        landing_pad: true,
                    });
                }
            }
            if let Some(start) = segment.try_allocate(amount) {
                return Ok(Allocation {
                    segment: segment.id(),
                    start,
                    landing_pad: false,
                });
            }
        }

        let header = needs_header && self.segments.len() != current as usize;
        let size = amount + header as u32;
        let id = self.create_segment(size)?;
        let start = self.segments[id as usize]
            .try_allocate(size)
            .ok_or_else(|| {
                Error::out_of_memory(format!("new segment {id} cannot hold {size} words"))
            })?;
        Ok(Allocation {
            segment: id,
            start,
            landing_pad: header,
        })
    }

    /// The root pointer. With no segment 0, or an empty one, this is a far pointer to word 0
    /// of segment 0, which resolves to nothing.
    pub fn root(&self) -> Pointer {
        match self.segments.first() {
            Some(segment) if !segment.is_empty() => Pointer::new(
                0,
                0,
                WirePointer::from_word(segment.as_words()[0]),
            ),
            _ => Pointer::new(0, 0, WirePointer::new_far(false, 0, 0)),
        }
    }

    pub fn root_struct(&self) -> Result<StructRef> {
        self.read_struct(&self.root())
    }

    pub fn root_list<T: TypeAccessor>(&self) -> Result<List<T>> {
        List::from_pointer(self, &self.root())
    }

    /// Makes sure the root pointer word exists and returns its slot. `object_words` sizes the
    /// first segment when one has to be created.
    fn root_slot(&mut self, object_words: WordCount32) -> Result<PointerSlot> {
        if self.segments.is_empty() {
            self.create_segment(object_words.saturating_add(POINTER_SIZE_IN_WORDS))?;
        }
        if self.segments[0].is_empty() {
            if self.segments[0].remaining() < POINTER_SIZE_IN_WORDS {
                // nothing in an empty segment 0 can be referenced yet
                let (words, recycled) =
                    self.take_buffer(object_words.saturating_add(POINTER_SIZE_IN_WORDS))?;
                tracing::debug!(capacity = words.len(), recycled, "replaced empty segment 0");
                self.segments[0] = Segment::new(0, words);
            }
            if self.segments[0].try_allocate(POINTER_SIZE_IN_WORDS).is_none() {
                return Err(Error::out_of_memory("segment 0 has no room for the root pointer"));
            }
        }
        Ok(PointerSlot::ROOT)
    }

    /// Allocates a new struct and makes it the root.
    pub fn init_root(&mut self, size: StructSize) -> Result<StructRef> {
        let slot = self.root_slot(size.total())?;
        self.init_struct(slot, size)
    }

    /// Points the root at an object that already exists in this message.
    pub fn set_root(&mut self, target: &ResolvedPointer) -> Result<()> {
        if self.segments.is_empty() {
            return Err(Error::invalid_argument(
                "a message with no segments has nowhere to put a root",
            ));
        }
        self.root_slot(0)?;
        self.set_pointer(PointerSlot::ROOT, target)
    }

    /// Allocates a new `T` as the root.
    pub fn allocate_root<T: TypeAccessor>(&mut self) -> Result<T> {
        let slot = self.root_slot(0)?;
        T::create(self, slot)
    }

    /// Allocates a new list of `count` elements of `T` as the root.
    pub fn allocate_root_list<T: TypeAccessor>(
        &mut self,
        count: ElementCount32,
    ) -> Result<List<T>> {
        let slot = self.root_slot(0)?;
        T::create_list(self, slot, count)
    }

    /// Follows `pointer` to the object it describes, through far pointers if necessary.
    /// Returns `None` for a null pointer, for a far pointer whose landing pad is null, and for
    /// the placeholder root of a message with an empty segment 0.
    pub fn resolve(&self, pointer: &Pointer) -> Result<Option<ResolvedPointer>> {
        if pointer.is_null() {
            return Ok(None);
        }
        match pointer.kind() {
            WirePointerKind::Struct | WirePointerKind::List => {
                let start = pointer.target().ok_or_else(|| {
                    Error::format(format!("{pointer} points before the start of its segment"))
                })?;
                Ok(Some(ResolvedPointer {
                    segment: pointer.segment_id(),
                    start,
                    tag: pointer.wire(),
                }))
            }
            WirePointerKind::Far => self.resolve_far(pointer),
            WirePointerKind::Other => Err(Error::unsupported(format!("cannot follow {pointer}"))),
        }
    }

    fn resolve_far(&self, pointer: &Pointer) -> Result<Option<ResolvedPointer>> {
        let wire = pointer.wire();
        if wire.far_segment_id() == 0
            && wire.far_position_in_segment() == 0
            && self.segments.first().map_or(true, Segment::is_empty)
        {
            return Ok(None);
        }

        let pad = pointer.dereference(self)?;
        if pad.is_null() {
            return Ok(None);
        }
        if !wire.is_double_far() {
            if pad.is_far() {
                return Err(Error::format(format!(
                    "landing pad {pad} of a single far pointer is itself a far pointer"
                )));
            }
            return self.resolve(&pad);
        }

        if !pad.is_far() || pad.wire().is_double_far() {
            return Err(Error::format(format!(
                "double-far landing pad {pad} does not start with a single far pointer"
            )));
        }
        let tag = WirePointer::from_word(
            self.segment(pad.segment_id())?
                .read_word(pad.location() + 1)?,
        );
        if !tag.is_positional() {
            return Err(Error::format(format!(
                "double-far landing pad tag {tag} is not a struct or list pointer"
            )));
        }
        let segment = pad.wire().far_segment_id();
        self.segment(segment)?;
        Ok(Some(ResolvedPointer {
            segment,
            start: pad.wire().far_position_in_segment(),
            tag,
        }))
    }

    fn bounds_check(&self, segment: SegmentId, start: WordCount32, words: u64) -> Result<()> {
        let len = self.segment(segment)?.len();
        if u64::from(start) + words > u64::from(len) {
            return Err(Error::out_of_range(format!(
                "object at [{segment}:{start}] of {words} words overruns a segment of {len} words"
            )));
        }
        Ok(())
    }

    /// Reads the struct `pointer` refers to. A null pointer reads as an empty struct.
    pub fn read_struct(&self, pointer: &Pointer) -> Result<StructRef> {
        match self.resolve(pointer)? {
            None => Ok(StructRef::empty()),
            Some(target) => self.struct_at(&target),
        }
    }

    pub fn struct_at(&self, target: &ResolvedPointer) -> Result<StructRef> {
        if target.kind() != WirePointerKind::Struct {
            return Err(Error::format(format!(
                "expected a struct, found {}",
                target
            )));
        }
        let size = target.tag.struct_size();
        self.bounds_check(target.segment, target.start, u64::from(size.total()))?;
        Ok(StructRef::new(target.segment, target.start, size))
    }

    /// Reads the list `pointer` refers to. A null pointer reads as an empty list.
    pub fn read_list(&self, pointer: &Pointer) -> Result<ListRef> {
        match self.resolve(pointer)? {
            None => Ok(ListRef::empty()),
            Some(target) => self.list_at(&target),
        }
    }

    pub fn list_at(&self, target: &ResolvedPointer) -> Result<ListRef> {
        if target.kind() != WirePointerKind::List {
            return Err(Error::format(format!("expected a list, found {}", target)));
        }
        let element_size = target.tag.list_element_size();
        match element_size.bits_per_element() {
            Some(bits) => {
                let count = target.tag.list_element_count();
                let words = round_bits_up_to_words(u64::from(count) * u64::from(bits));
                self.bounds_check(target.segment, target.start, u64::from(words))?;
                Ok(ListRef::new_primitive(
                    target.segment,
                    target.start,
                    element_size,
                    count,
                ))
            }
            None => {
                let word_count = target.tag.list_inline_composite_word_count();
                self.bounds_check(target.segment, target.start, u64::from(word_count) + 1)?;
                let tag = WirePointer::from_word(
                    self.segment(target.segment)?.read_word(target.start)?,
                );
                if tag.kind() != WirePointerKind::Struct {
                    return Err(Error::format(format!(
                        "inline composite list tag {tag} is not struct-shaped"
                    )));
                }
                let count = tag.inline_composite_list_element_count();
                let size = tag.struct_size();
                if u64::from(count) * u64::from(size.total()) > u64::from(word_count) {
                    return Err(Error::format(format!(
                        "{count} elements of {} words overrun an inline composite list \
                         of {word_count} words",
                        size.total()
                    )));
                }
                Ok(ListRef::new_composite(
                    target.segment,
                    target.start + 1,
                    size,
                    count,
                ))
            }
        }
    }

    pub(crate) fn write_pointer_word(
        &mut self,
        slot: PointerSlot,
        wire: WirePointer,
    ) -> Result<()> {
        self.segment_mut(slot.segment)?.write_word(slot.index, wire.word())
    }

    /// Writes `tag` at `slot`, locating an object of `amount` words placed by
    /// [`Message::allocate`]. Returns the segment and first word of the object.
    fn allocate_object(
        &mut self,
        slot: PointerSlot,
        amount: WordCount32,
        tag: WirePointer,
    ) -> Result<(SegmentId, WordCount32)> {
        self.segment(slot.segment)?.read_word(slot.index)?;
        if amount == 0 {
            return if tag.kind() == WirePointerKind::Struct {
                self.write_pointer_word(slot, WirePointer::empty_struct())?;
                Ok((slot.segment, slot.index))
            } else {
                self.write_pointer_word(slot, tag.with_offset(0))?;
                Ok((slot.segment, slot.index + 1))
            };
        }

        let allocation = self.allocate(slot.segment, amount, true)?;
        if allocation.segment == slot.segment {
            let offset = relative_offset(slot.index, allocation.start);
            self.write_pointer_word(slot, tag.with_offset(offset))?;
            Ok((allocation.segment, allocation.start))
        } else if allocation.landing_pad {
            let pad = PointerSlot::new(allocation.segment, allocation.start);
            self.write_pointer_word(pad, tag.with_offset(0))?;
            self.write_pointer_word(
                slot,
                WirePointer::new_far(false, allocation.start, allocation.segment),
            )?;
            Ok((allocation.segment, allocation.start + 1))
        } else {
            self.write_double_far(slot, allocation.segment, allocation.start, tag)?;
            Ok((allocation.segment, allocation.start))
        }
    }

    fn write_double_far(
        &mut self,
        slot: PointerSlot,
        segment: SegmentId,
        start: WordCount32,
        tag: WirePointer,
    ) -> Result<()> {
        let pad = self.allocate(slot.segment, 2, false)?;
        let pad_segment = self.segment_mut(pad.segment)?;
        pad_segment.write_word(pad.start, WirePointer::new_far(false, start, segment).word())?;
        pad_segment.write_word(pad.start + 1, tag.with_offset(0).word())?;
        tracing::trace!(
            slot_segment = slot.segment,
            slot_index = slot.index,
            pad_segment = pad.segment,
            pad_start = pad.start,
            target_segment = segment,
            target_start = start,
            "wrote double-far pointer"
        );
        self.write_pointer_word(slot, WirePointer::new_far(true, pad.start, pad.segment))
    }

    /// Points `slot` at an object that already exists in this message. A target in another
    /// segment gets a two-word landing pad.
    pub fn set_pointer(&mut self, slot: PointerSlot, target: &ResolvedPointer) -> Result<()> {
        self.segment(slot.segment)?.read_word(slot.index)?;
        self.segment(target.segment)?;
        if target.segment == slot.segment {
            let empty_struct =
                target.kind() == WirePointerKind::Struct && target.tag.struct_word_size() == 0;
            let wire = if empty_struct {
                WirePointer::empty_struct()
            } else {
                target.tag.with_offset(relative_offset(slot.index, target.start))
            };
            self.write_pointer_word(slot, wire)
        } else {
            self.write_double_far(slot, target.segment, target.start, target.tag)
        }
    }

    pub fn init_struct(&mut self, slot: PointerSlot, size: StructSize) -> Result<StructRef> {
        let (segment, start) =
            self.allocate_object(slot, size.total(), WirePointer::new_struct(0, size))?;
        Ok(StructRef::new(segment, start, size))
    }

    /// Allocates a list of `count` elements encoded as `element_size`, which must not be
    /// [`ElementSize::InlineComposite`]; see [`Message::init_struct_list`] for those.
    pub fn init_list(
        &mut self,
        slot: PointerSlot,
        element_size: ElementSize,
        count: ElementCount32,
    ) -> Result<ListRef> {
        let bits = element_size.bits_per_element().ok_or_else(|| {
            Error::invalid_argument("struct lists are allocated with init_struct_list")
        })?;
        if count > MAX_LIST_ELEMENTS {
            return Err(Error::out_of_range(format!("list of {count} elements")));
        }
        let words = round_bits_up_to_words(u64::from(count) * u64::from(bits));
        let (segment, start) =
            self.allocate_object(slot, words, WirePointer::new_list(0, element_size, count))?;
        Ok(ListRef::new_primitive(segment, start, element_size, count))
    }

    /// Allocates an inline composite list of `count` structs of `size`.
    pub fn init_struct_list(
        &mut self,
        slot: PointerSlot,
        size: StructSize,
        count: ElementCount32,
    ) -> Result<ListRef> {
        let words = u64::from(count) * u64::from(size.total());
        if words > u64::from(MAX_LIST_ELEMENTS) {
            return Err(Error::out_of_range(format!(
                "struct list of {count} elements of {} words",
                size.total()
            )));
        }
        let words = words as WordCount32;
        let (segment, start) = self.allocate_object(
            slot,
            words + POINTER_SIZE_IN_WORDS,
            WirePointer::new_inline_composite_list(0, words),
        )?;
        self.write_pointer_word(
            PointerSlot::new(segment, start),
            WirePointer::new_inline_composite_tag(count, size),
        )?;
        Ok(ListRef::new_composite(segment, start + 1, size, count))
    }

    /// Drops all segments, keeping their zeroed buffers for reuse by later allocations.
    pub fn reset(&mut self) {
        for segment in self.segments.drain(..) {
            self.recycled.push(segment.into_zeroed_words());
        }
    }
}

fn relative_offset(pointer: WordCount32, target: WordCount32) -> i32 {
    (i64::from(target) - i64::from(pointer) - 1) as i32
}

impl Default for Message {
    fn default() -> Self {
        Self::new_default()
    }
}

impl Drop for Message {
    fn drop(&mut self) {
        for segment in self.segments.drain(..) {
            self.allocator.deallocate_segment(segment.into_zeroed_words());
        }
        for words in self.recycled.drain(..) {
            self.allocator.deallocate_segment(words);
        }
    }
}

impl fmt::Display for Message {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(
            f,
            "{} segments, {} words",
            self.segment_count(),
            self.word_count()
        )
    }
}

impl fmt::Debug for Message {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.debug_struct("Message")
            .field("segments", &self.segments)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ErrorKind;

    fn small() -> Message {
        Message::new(
            HeapAllocator::new()
                .first_segment_words(4)
                .allocation_strategy(AllocationStrategy::FixedSize),
        )
    }

    #[test]
    fn heap_allocator_growth() {
        let mut allocator = HeapAllocator::new().first_segment_words(8);
        assert_eq!(8, allocator.allocate_segment(1).unwrap().len());
        assert_eq!(16, allocator.allocate_segment(1).unwrap().len());
        assert_eq!(100, allocator.allocate_segment(100).unwrap().len());

        let mut allocator = HeapAllocator::new()
            .first_segment_words(8)
            .allocation_strategy(AllocationStrategy::FixedSize);
        assert_eq!(8, allocator.allocate_segment(1).unwrap().len());
        assert_eq!(8, allocator.allocate_segment(1).unwrap().len());
    }

    #[test]
    fn empty_message_root() {
        let message = Message::new_default();
        assert_eq!(0, message.segment_count());
        let root = message.root();
        assert!(root.is_far());
        assert_eq!(2, root.wire().word());
        assert!(message.resolve(&root).unwrap().is_none());
        assert_eq!(StructRef::empty(), message.root_struct().unwrap());
        assert_eq!("0 segments, 0 words", format!("{message}"));
    }

    #[test]
    fn set_root_needs_a_segment() {
        let mut message = Message::new_default();
        let target = ResolvedPointer {
            segment: 0,
            start: 1,
            tag: WirePointer::new_struct(0, StructSize::default()),
        };
        assert_eq!(
            ErrorKind::InvalidArgument,
            message.set_root(&target).unwrap_err().kind
        );
    }

    #[test]
    fn init_root_reserves_the_root_word() {
        let mut message = Message::new_default();
        let root = message
            .init_root(StructSize {
                data: 1,
                pointers: 1,
            })
            .unwrap();
        assert_eq!(0, root.segment_id());
        assert_eq!(1, root.start());
        assert_eq!(3, message.word_count());
        assert_eq!(Some(1), message.root().target());
        assert_eq!(root, message.root_struct().unwrap());
    }

    fn reloaded_empty() -> Message {
        let bytes = serialize::write_message_to_bytes(&Message::new_default()).unwrap();
        Message::load(&bytes).unwrap()
    }

    #[test]
    fn reloaded_empty_message_takes_a_root() {
        let mut message = reloaded_empty();
        assert_eq!(1, message.segment_count());
        assert_eq!(0, message.segment(0).unwrap().capacity());
        assert_eq!(None, message.resolve(&message.root()).unwrap());

        let root = message
            .init_root(StructSize {
                data: 1,
                pointers: 0,
            })
            .unwrap();
        root.set::<u64>(&mut message, 0, 0x2a).unwrap();
        assert_eq!(1, message.segment_count());
        assert_eq!(2, message.word_count());

        let bytes = serialize::write_message_to_bytes(&message).unwrap();
        let reloaded = Message::load(&bytes).unwrap();
        let root = reloaded.root_struct().unwrap();
        assert_eq!(0x2a, root.get::<u64>(&reloaded, 0).unwrap());

        let mut message = reloaded_empty();
        let list = message.allocate_root_list::<u16>(3).unwrap();
        list.set(&mut message, 2, 7).unwrap();
        assert_eq!(7, message.root_list::<u16>().unwrap().get(&message, 2).unwrap());
    }

    #[test]
    fn empty_root_struct_is_not_null() {
        let mut message = Message::new_default();
        message.init_root(StructSize::default()).unwrap();
        assert_eq!(WirePointer::empty_struct(), message.root().wire());
        let root = message.root_struct().unwrap();
        assert_eq!(StructSize::default(), root.size());
    }

    #[test]
    fn allocation_falls_back_to_later_segments() {
        let mut message = small();
        message.create_segment(4).unwrap();
        message.create_segment(4).unwrap();
        message.segments[1].try_allocate(3);

        assert_eq!(
            Allocation {
                segment: 0,
                start: 0,
                landing_pad: false
            },
            message.allocate(0, 4, true).unwrap()
        );
        // segment 1 has one word left; segment 2 can take object and pad
        assert_eq!(
            Allocation {
                segment: 2,
                start: 0,
                landing_pad: true
            },
            message.allocate(0, 2, true).unwrap()
        );
        // segment 1 fits the object but not the pad
        assert_eq!(
            Allocation {
                segment: 1,
                start: 3,
                landing_pad: false
            },
            message.allocate(0, 1, true).unwrap()
        );
        let fresh = message.allocate(0, 9, true).unwrap();
        assert_eq!(3, fresh.segment);
        assert!(fresh.landing_pad);
        assert_eq!(10, message.segment(3).unwrap().len());

        assert_eq!(
            ErrorKind::InvalidArgument,
            message.allocate(0, 0, false).unwrap_err().kind
        );
    }

    #[test]
    fn struct_in_another_segment_gets_a_landing_pad() {
        let mut message = small();
        let root = message
            .init_root(StructSize {
                data: 1,
                pointers: 2,
            })
            .unwrap();
        let child = root
            .init_struct(
                &mut message,
                0,
                StructSize {
                    data: 2,
                    pointers: 0,
                },
            )
            .unwrap();
        assert_eq!(1, child.segment_id());
        assert_eq!(1, child.start());
        child.set::<u64>(&mut message, 1, 77).unwrap();

        let pointer = root.get_pointer(&message, 0).unwrap();
        assert!(pointer.is_far());
        assert!(!pointer.wire().is_double_far());
        let reread = root.get_struct(&message, 0).unwrap();
        assert_eq!(child, reread);
        assert_eq!(77, reread.get::<u64>(&message, 1).unwrap());
    }

    #[test]
    fn set_pointer_across_segments_uses_double_far() {
        let mut message = small();
        let root = message
            .init_root(StructSize {
                data: 0,
                pointers: 2,
            })
            .unwrap();
        let child = root
            .init_struct(
                &mut message,
                0,
                StructSize {
                    data: 2,
                    pointers: 0,
                },
            )
            .unwrap();
        assert_eq!(1, child.segment_id());
        child.set::<u32>(&mut message, 0, 5).unwrap();
        let target = message
            .resolve(&root.get_pointer(&message, 0).unwrap())
            .unwrap()
            .unwrap();
        message.set_pointer(root.pointer_slot(1).unwrap(), &target).unwrap();

        let alias = root.get_pointer(&message, 1).unwrap();
        assert!(alias.wire().is_double_far());
        assert_eq!(Some(target), message.resolve(&alias).unwrap());
        assert_eq!(5, root.get_struct(&message, 1).unwrap().get::<u32>(&message, 0).unwrap());
    }

    #[test]
    fn null_landing_pad_resolves_to_nothing() {
        let mut message = small();
        message.create_segment(2).unwrap();
        message.create_segment(2).unwrap();
        message.segments[0].try_allocate(1);
        message.segments[1].try_allocate(1);
        message
            .write_pointer_word(PointerSlot::ROOT, WirePointer::new_far(false, 0, 1))
            .unwrap();
        assert!(message.resolve(&message.root()).unwrap().is_none());
        assert_eq!(StructRef::empty(), message.root_struct().unwrap());
    }

    #[test]
    fn malformed_pointers() {
        let mut message = small();
        message.create_segment(4).unwrap();
        message.segments[0].try_allocate(2);

        message
            .write_pointer_word(PointerSlot::ROOT, WirePointer::new_far(false, 0, 7))
            .unwrap();
        assert_eq!(ErrorKind::OutOfRange, message.root_struct().unwrap_err().kind);

        message
            .write_pointer_word(
                PointerSlot::ROOT,
                WirePointer::new_struct(0, StructSize { data: 5, pointers: 0 }),
            )
            .unwrap();
        assert_eq!(ErrorKind::OutOfRange, message.root_struct().unwrap_err().kind);

        message
            .write_pointer_word(PointerSlot::ROOT, WirePointer::from_word(3))
            .unwrap();
        assert_eq!(ErrorKind::Unsupported, message.root_struct().unwrap_err().kind);

        message
            .write_pointer_word(PointerSlot::ROOT, WirePointer::new_list(0, ElementSize::Byte, 4))
            .unwrap();
        assert_eq!(ErrorKind::Format, message.root_struct().unwrap_err().kind);
    }

    #[test]
    fn reset_recycles_zeroed_buffers() {
        let mut message = Message::new_default();
        let root = message
            .init_root(StructSize {
                data: 1,
                pointers: 0,
            })
            .unwrap();
        root.set::<u64>(&mut message, 0, u64::MAX).unwrap();
        message.reset();
        assert_eq!(0, message.segment_count());
        assert_eq!(1, message.recycled.len());

        let root = message
            .init_root(StructSize {
                data: 1,
                pointers: 0,
            })
            .unwrap();
        assert!(message.recycled.is_empty());
        assert_eq!(0, root.get::<u64>(&message, 0).unwrap());
    }

    #[test]
    fn load_range_checks_bounds() {
        assert_eq!(
            ErrorKind::OutOfRange,
            Message::load_range(&[0; 8], 4, Some(8)).unwrap_err().kind
        );
    }
}
