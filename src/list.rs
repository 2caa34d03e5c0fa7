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

//! List of values of a single type.

use core::fmt;
use core::marker::PhantomData;

use crate::accessor::TypeAccessor;
use crate::layout::{ElementSize, ListRef};
use crate::message::Message;
use crate::pointer::{Pointer, PointerSlot};
use crate::units::*;
use crate::{Error, Result};

/// A typed view of a list inside a message.
///
/// The length is fixed when the list is allocated. Elements can be read and overwritten, but
/// the list cannot grow or shrink: a longer list has to be allocated afresh.
pub struct List<T> {
    list: ListRef,
    marker: PhantomData<T>,
}

impl<T> Clone for List<T> {
    fn clone(&self) -> Self {
        *self
    }
}

impl<T> Copy for List<T> {}

impl<T> PartialEq for List<T> {
    fn eq(&self, other: &Self) -> bool {
        self.list == other.list
    }
}

impl<T> Eq for List<T> {}

impl<T> fmt::Debug for List<T> {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.debug_tuple("List").field(&self.list).finish()
    }
}

impl<T> List<T> {
    pub(crate) fn new(list: ListRef) -> Self {
        Self {
            list,
            marker: PhantomData,
        }
    }

    #[inline]
    pub fn len(&self) -> ElementCount32 {
        self.list.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.list.is_empty()
    }

    pub fn as_list_ref(&self) -> &ListRef {
        &self.list
    }
}

impl<T: TypeAccessor> List<T> {
    /// Reads the list `pointer` refers to, checking that its encoding can hold `T`. A null
    /// pointer reads as an empty list.
    pub fn from_pointer(message: &Message, pointer: &Pointer) -> Result<Self> {
        let list = message.read_list(pointer)?;
        T::check_list(&list)?;
        Ok(Self::new(list))
    }

    /// Allocates a list of `count` default-valued elements behind the pointer at `parent`.
    pub fn create(
        message: &mut Message,
        parent: PointerSlot,
        count: ElementCount32,
    ) -> Result<Self> {
        T::create_list(message, parent, count)
    }

    /// Allocates a list behind the pointer at `parent` and copies `items` into it.
    ///
    /// Not available for struct types: the elements of a struct list are the list body
    /// itself, so they have to be created by [`List::create`] and filled in place.
    pub fn create_from(message: &mut Message, parent: PointerSlot, items: &[T]) -> Result<Self>
    where
        T: Clone,
    {
        if T::IS_STRUCT {
            return Err(Error::unsupported(
                "a struct list must be allocated with its final length and filled in place",
            ));
        }
        let count = u32::try_from(items.len())
            .ok()
            .filter(|&count| count <= MAX_LIST_ELEMENTS)
            .ok_or_else(|| Error::out_of_range(format!("list of {} elements", items.len())))?;
        let list = T::create_list(message, parent, count)?;
        for (index, item) in (0..).zip(items) {
            list.set(message, index, item.clone())?;
        }
        Ok(list)
    }

    pub fn get(&self, message: &Message, index: ElementCount32) -> Result<T> {
        T::get_element(message, &self.list, index)
    }

    pub fn set(&self, message: &mut Message, index: ElementCount32, value: T) -> Result<()> {
        T::set_element(message, &self.list, index, value)
    }

    pub fn iter<'a>(&self, message: &'a Message) -> ListIter<'a, T> {
        ListIter {
            message,
            list: self.list,
            index: 0,
            size: self.list.len(),
            marker: PhantomData,
        }
    }

    /// Index of the first element equal to `value`.
    pub fn index_of(&self, message: &Message, value: &T) -> Result<Option<ElementCount32>>
    where
        T: PartialEq,
    {
        for index in 0..self.len() {
            if self.get(message, index)? == *value {
                return Ok(Some(index));
            }
        }
        Ok(None)
    }

    pub fn contains(&self, message: &Message, value: &T) -> Result<bool>
    where
        T: PartialEq,
    {
        Ok(self.index_of(message, value)?.is_some())
    }

    pub fn insert(&self, _message: &mut Message, _index: ElementCount32, _value: T) -> Result<()> {
        Err(fixed_length())
    }

    pub fn remove(&self, _message: &mut Message, _index: ElementCount32) -> Result<T> {
        Err(fixed_length())
    }

    pub fn push(&self, _message: &mut Message, _value: T) -> Result<()> {
        Err(fixed_length())
    }

    pub fn clear(&self, _message: &mut Message) -> Result<()> {
        Err(fixed_length())
    }
}

fn fixed_length() -> Error {
    Error::unsupported("lists have a fixed length; allocate a new list instead")
}

/// Iterator over the elements of a [`List`]. Each call to [`List::iter`] starts over.
pub struct ListIter<'a, T> {
    message: &'a Message,
    list: ListRef,
    index: ElementCount32,
    size: ElementCount32,
    marker: PhantomData<T>,
}

impl<'a, T: TypeAccessor> Iterator for ListIter<'a, T> {
    type Item = Result<T>;

    fn next(&mut self) -> Option<Result<T>> {
        if self.index < self.size {
            let result = T::get_element(self.message, &self.list, self.index);
            self.index += 1;
            Some(result)
        } else {
            None
        }
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        let remaining = (self.size - self.index) as usize;
        (remaining, Some(remaining))
    }
}

impl<'a, T: TypeAccessor> ExactSizeIterator for ListIter<'a, T> {}

impl<'a, T: TypeAccessor> DoubleEndedIterator for ListIter<'a, T> {
    fn next_back(&mut self) -> Option<Result<T>> {
        if self.size > self.index {
            self.size -= 1;
            Some(T::get_element(self.message, &self.list, self.size))
        } else {
            None
        }
    }
}

/// A list whose element type is taken from its encoding rather than from the caller.
///
/// Integer elements are exposed unsigned; reinterpret them as needed.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum AnyList {
    Void(List<()>),
    Bit(List<bool>),
    Byte(List<u8>),
    TwoBytes(List<u16>),
    FourBytes(List<u32>),
    EightBytes(List<u64>),
    Pointer(List<Pointer>),

    /// Struct elements, read with [`ListRef::get_struct_element`].
    Struct(ListRef),
}

impl AnyList {
    /// Reads the list `pointer` refers to. A null pointer reads as an empty list of `Void`.
    pub fn from_pointer(message: &Message, pointer: &Pointer) -> Result<Self> {
        let list = message.read_list(pointer)?;
        Ok(match list.element_size() {
            ElementSize::Void => Self::Void(List::new(list)),
            ElementSize::Bit => Self::Bit(List::new(list)),
            ElementSize::Byte => Self::Byte(List::new(list)),
            ElementSize::TwoBytes => Self::TwoBytes(List::new(list)),
            ElementSize::FourBytes => Self::FourBytes(List::new(list)),
            ElementSize::EightBytes => Self::EightBytes(List::new(list)),
            ElementSize::Pointer => Self::Pointer(List::new(list)),
            ElementSize::InlineComposite => Self::Struct(list),
        })
    }

    pub fn as_list_ref(&self) -> &ListRef {
        match self {
            Self::Void(list) => list.as_list_ref(),
            Self::Bit(list) => list.as_list_ref(),
            Self::Byte(list) => list.as_list_ref(),
            Self::TwoBytes(list) => list.as_list_ref(),
            Self::FourBytes(list) => list.as_list_ref(),
            Self::EightBytes(list) => list.as_list_ref(),
            Self::Pointer(list) => list.as_list_ref(),
            Self::Struct(list) => list,
        }
    }

    pub fn element_size(&self) -> ElementSize {
        self.as_list_ref().element_size()
    }

    pub fn len(&self) -> ElementCount32 {
        self.as_list_ref().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
