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

//! Per-type element access.
//!
//! Every type that can be stored in a list implements [`TypeAccessor`], which knows how
//! wide one element is and how to move a value in and out of a list body. Primitives get
//! their implementation here; a struct type gets one by implementing [`StructType`].

use crate::layout::{read_bits, write_bits, ElementSize, ListRef, StructRef, StructSize};
use crate::list::List;
use crate::message::Message;
use crate::pointer::{Pointer, PointerSlot, WirePointer};
use crate::primitive::Primitive;
use crate::units::*;
use crate::{Error, Result};

pub trait TypeAccessor: Sized {
    /// Whether values of this type are structs, stored in inline composite lists.
    const IS_STRUCT: bool = false;

    /// The encoding used for new lists of this type.
    fn element_size() -> ElementSize;

    /// Checks that `list`, as found in a message, can be read as a list of this type.
    fn check_list(list: &ListRef) -> Result<()>;

    fn get_element(message: &Message, list: &ListRef, index: ElementCount32) -> Result<Self>;

    fn set_element(
        message: &mut Message,
        list: &ListRef,
        index: ElementCount32,
        value: Self,
    ) -> Result<()>;

    /// Allocates a new value behind the pointer at `parent`.
    fn create(message: &mut Message, parent: PointerSlot) -> Result<Self>;

    /// Allocates a list of `count` values behind the pointer at `parent`.
    fn create_list(
        message: &mut Message,
        parent: PointerSlot,
        count: ElementCount32,
    ) -> Result<List<Self>> {
        let list = message.init_list(parent, Self::element_size(), count)?;
        Ok(List::new(list))
    }
}

/// A struct type with a fixed layout, typically generated from a schema.
///
/// Implementing this is how a struct type registers itself: it gets a [`TypeAccessor`] for
/// free and can then be used in [`List`]s and created with [`Message::allocate_root`].
pub trait StructType: Sized {
    const SIZE: StructSize;

    fn from_struct(reader: StructRef) -> Self;

    fn as_struct(&self) -> StructRef;
}

fn check_data_list(list: &ListRef, bits: BitCount32) -> Result<()> {
    if list.is_empty() {
        return Ok(());
    }
    let data_bits = match list.element_size() {
        ElementSize::InlineComposite => u32::from(list.element_struct_size().data) * BITS_PER_WORD,
        ElementSize::Pointer => 0,
        ElementSize::Bit if bits != 1 => 0,
        _ => list.step_bits(),
    };
    if data_bits < bits || (bits == 1 && list.element_size() != ElementSize::Bit) {
        return Err(Error::format(format!(
            "expected a list of {bits}-bit values, found {:?} elements",
            list.element_size()
        )));
    }
    Ok(())
}

macro_rules! primitive_accessor(
    ($typ:ty) => (
        impl TypeAccessor for $typ {
            fn element_size() -> ElementSize {
                <$typ as Primitive>::ELEMENT_SIZE
            }

            fn check_list(list: &ListRef) -> Result<()> {
                check_data_list(list, <$typ as Primitive>::BITS)
            }

            fn get_element(
                message: &Message,
                list: &ListRef,
                index: ElementCount32,
            ) -> Result<Self> {
                list.check_index(index)?;
                let bits = read_bits(
                    message,
                    list.segment_id(),
                    list.start(),
                    list.element_bit_offset(index),
                    <$typ as Primitive>::BITS,
                )?;
                Ok(<$typ as Primitive>::from_bits(bits))
            }

            fn set_element(
                message: &mut Message,
                list: &ListRef,
                index: ElementCount32,
                value: Self,
            ) -> Result<()> {
                list.check_index(index)?;
                write_bits(
                    message,
                    list.segment_id(),
                    list.start(),
                    list.element_bit_offset(index),
                    <$typ as Primitive>::BITS,
                    Primitive::to_bits(value),
                )
            }

            fn create(_message: &mut Message, _parent: PointerSlot) -> Result<Self> {
                Err(Error::unsupported(concat!(
                    stringify!($typ),
                    " values live inline and cannot be allocated behind a pointer"
                )))
            }
        }
        );
    );

primitive_accessor!(u8);
primitive_accessor!(i8);
primitive_accessor!(u16);
primitive_accessor!(i16);
primitive_accessor!(u32);
primitive_accessor!(i32);
primitive_accessor!(u64);
primitive_accessor!(i64);
primitive_accessor!(f32);
primitive_accessor!(f64);
primitive_accessor!(bool);

impl TypeAccessor for () {
    fn element_size() -> ElementSize {
        ElementSize::Void
    }

    fn check_list(_list: &ListRef) -> Result<()> {
        Ok(())
    }

    fn get_element(_message: &Message, list: &ListRef, index: ElementCount32) -> Result<()> {
        list.check_index(index)
    }

    fn set_element(
        _message: &mut Message,
        list: &ListRef,
        index: ElementCount32,
        _value: (),
    ) -> Result<()> {
        list.check_index(index)
    }

    fn create(_message: &mut Message, _parent: PointerSlot) -> Result<()> {
        Err(Error::unsupported("void values cannot be allocated"))
    }
}

impl TypeAccessor for Pointer {
    fn element_size() -> ElementSize {
        ElementSize::Pointer
    }

    fn check_list(list: &ListRef) -> Result<()> {
        if list.is_empty() || list.element_struct_size().pointers > 0 {
            Ok(())
        } else {
            Err(Error::format(format!(
                "expected a list of pointers, found {:?} elements",
                list.element_size()
            )))
        }
    }

    fn get_element(message: &Message, list: &ListRef, index: ElementCount32) -> Result<Self> {
        list.get_pointer_element(message, index)
    }

    /// Re-points element `index` at whatever `value` refers to; `value` must come from the
    /// same message.
    fn set_element(
        message: &mut Message,
        list: &ListRef,
        index: ElementCount32,
        value: Self,
    ) -> Result<()> {
        list.check_index(index)?;
        let slot = list.pointer_slot(index)?;
        match message.resolve(&value)? {
            Some(target) => message.set_pointer(slot, &target),
            None => message.write_pointer_word(slot, WirePointer::NULL),
        }
    }

    fn create(_message: &mut Message, _parent: PointerSlot) -> Result<Self> {
        Err(Error::unsupported(
            "a raw pointer has no shape to allocate; create a struct or list instead",
        ))
    }
}

impl<T: StructType> TypeAccessor for T {
    const IS_STRUCT: bool = true;

    fn element_size() -> ElementSize {
        ElementSize::InlineComposite
    }

    fn check_list(list: &ListRef) -> Result<()> {
        if list.is_empty() || list.step_bits() % BITS_PER_WORD == 0 {
            Ok(())
        } else {
            Err(Error::format(format!(
                "expected a list of structs, found {:?} elements",
                list.element_size()
            )))
        }
    }

    fn get_element(_message: &Message, list: &ListRef, index: ElementCount32) -> Result<Self> {
        Ok(T::from_struct(list.get_struct_element(index)?))
    }

    fn set_element(
        _message: &mut Message,
        _list: &ListRef,
        _index: ElementCount32,
        _value: Self,
    ) -> Result<()> {
        Err(Error::unsupported(
            "elements of a struct list are stored in the list itself; write their fields instead",
        ))
    }

    fn create(message: &mut Message, parent: PointerSlot) -> Result<Self> {
        Ok(T::from_struct(message.init_struct(parent, T::SIZE)?))
    }

    fn create_list(
        message: &mut Message,
        parent: PointerSlot,
        count: ElementCount32,
    ) -> Result<List<Self>> {
        let list = message.init_struct_list(parent, T::SIZE, count)?;
        Ok(List::new(list))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ErrorKind;

    #[derive(Clone, Copy, Debug, PartialEq)]
    struct Point(StructRef);

    impl StructType for Point {
        const SIZE: StructSize = StructSize {
            data: 1,
            pointers: 0,
        };

        fn from_struct(reader: StructRef) -> Self {
            Self(reader)
        }

        fn as_struct(&self) -> StructRef {
            self.0
        }
    }

    #[test]
    fn primitive_elements_pack() {
        let mut message = Message::new_default();
        let list = message.allocate_root_list::<u16>(5).unwrap();
        let list = *list.as_list_ref();
        assert_eq!(16, list.step_bits());
        for i in 0..5 {
            u16::set_element(&mut message, &list, i, 0x100 + i as u16).unwrap();
        }
        assert_eq!(
            0x0103_0102_0101_0100,
            message.segment(0).unwrap().read_word(list.start()).unwrap()
        );
        assert_eq!(0x104, u16::get_element(&message, &list, 4).unwrap());
        assert_eq!(
            ErrorKind::OutOfRange,
            u16::get_element(&message, &list, 5).unwrap_err().kind
        );
    }

    #[test]
    fn bits() {
        let mut message = Message::new_default();
        let list = *message.allocate_root_list::<bool>(70).unwrap().as_list_ref();
        bool::set_element(&mut message, &list, 0, true).unwrap();
        bool::set_element(&mut message, &list, 65, true).unwrap();
        assert!(bool::get_element(&message, &list, 65).unwrap());
        assert!(!bool::get_element(&message, &list, 64).unwrap());
        assert_eq!(2, message.segment(0).unwrap().len() - 1);
        assert!(bool::check_list(&list).is_ok());
        assert_eq!(ErrorKind::Format, u8::check_list(&list).unwrap_err().kind);
    }

    #[test]
    fn narrow_lists_are_rejected() {
        let mut message = Message::new_default();
        let list = *message.allocate_root_list::<u8>(3).unwrap().as_list_ref();
        assert!(u8::check_list(&list).is_ok());
        assert!(i8::check_list(&list).is_ok());
        assert_eq!(ErrorKind::Format, u32::check_list(&list).unwrap_err().kind);
        assert_eq!(ErrorKind::Format, bool::check_list(&list).unwrap_err().kind);
        assert_eq!(ErrorKind::Format, Pointer::check_list(&list).unwrap_err().kind);
    }

    #[test]
    fn primitives_cannot_be_created() {
        let mut message = Message::new_default();
        assert_eq!(
            ErrorKind::Unsupported,
            message.allocate_root::<u32>().unwrap_err().kind
        );
        assert!(!u32::IS_STRUCT);
    }

    #[test]
    fn structs() {
        assert!(Point::IS_STRUCT);
        assert_eq!(ElementSize::InlineComposite, Point::element_size());

        let mut message = Message::new_default();
        let points = message.allocate_root_list::<Point>(3).unwrap();
        for i in 0..3 {
            let point = points.get(&message, i).unwrap();
            point.as_struct().set::<i32>(&mut message, 1, -(i as i32)).unwrap();
        }
        let point = points.get(&message, 2).unwrap();
        assert_eq!(-2, point.as_struct().get::<i32>(&message, 1).unwrap());
        assert_eq!(
            ErrorKind::Unsupported,
            points.set(&mut message, 0, point).unwrap_err().kind
        );

        let single = Point::create(&mut message, PointerSlot::ROOT).unwrap();
        assert_eq!(Point::SIZE, single.as_struct().size());
    }
}
