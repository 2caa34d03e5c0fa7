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

//! # capnp-wire
//!
//! The pointer and segment layer of the [Cap'n Proto](https://capnproto.org/encoding.html)
//! encoding. A [`message::Message`] owns a sequence of word-aligned [`segment::Segment`]s;
//! structs and lists inside it are reached through 64-bit tagged [`pointer::WirePointer`]s,
//! without any parse step.
//!
//! Typed access goes through the [`accessor::TypeAccessor`] trait, which is implemented
//! for the fixed-width primitives, for raw pointers, and for every type that registers a
//! struct layout through [`accessor::StructType`].
//!
//! ```
//! use capnp_wire::layout::StructSize;
//! use capnp_wire::message::Message;
//!
//! let mut message = Message::new_default();
//! let root = message.init_root(StructSize { data: 1, pointers: 1 }).unwrap();
//! root.set::<u64>(&mut message, 0, 0x2a).unwrap();
//! let list = root.init_list::<u8>(&mut message, 0, 3).unwrap();
//! list.set(&mut message, 1, 7).unwrap();
//!
//! let bytes = capnp_wire::serialize::write_message_to_bytes(&message).unwrap();
//! let reloaded = Message::load(&bytes).unwrap();
//! let root = reloaded.root_struct().unwrap();
//! assert_eq!(0x2a, root.get::<u64>(&reloaded, 0).unwrap());
//! assert_eq!(7, root.get_list::<u8>(&reloaded, 0).unwrap().get(&reloaded, 1).unwrap());
//! ```

pub mod accessor;
pub mod crawl;
pub mod field;
pub mod layout;
pub mod list;
pub mod message;
pub mod pointer;
pub mod pool;
pub mod primitive;
pub mod segment;
pub mod serialize;
pub mod units;

pub use crate::accessor::{StructType, TypeAccessor};
pub use crate::list::{AnyList, List};
pub use crate::message::Message;
pub use crate::pointer::Pointer;

/// Because messages are lazily validated, the return type of any method that reads a pointer field
/// must be wrapped in a Result.
pub type Result<T> = ::core::result::Result<T, Error>;

/// Describes an arbitrary error that prevented an operation from completing.
#[derive(Debug, Clone)]
pub struct Error {
    /// The general kind of the error.
    pub kind: ErrorKind,

    /// Extra context about the error, in human-readable form.
    pub extra: String,
}

/// The general nature of an error.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[non_exhaustive]
pub enum ErrorKind {
    /// Malformed wire data: a truncated frame, a bad segment table, or a pointer whose
    /// target does not make sense. Fatal to the current load.
    Format,

    /// An index outside its valid range: a segment id, a list index, a word index.
    OutOfRange,

    /// A new segment could not be allocated.
    OutOfMemory,

    /// The operation cannot be performed on a fixed-layout value.
    Unsupported,

    /// An input was empty or otherwise unusable.
    InvalidArgument,

    /// The underlying byte source or sink failed.
    Io,
}

impl Error {
    pub fn from_kind(kind: ErrorKind) -> Self {
        Self {
            kind,
            extra: String::new(),
        }
    }

    pub fn format(description: impl Into<String>) -> Self {
        Self {
            kind: ErrorKind::Format,
            extra: description.into(),
        }
    }

    pub fn out_of_range(description: impl Into<String>) -> Self {
        Self {
            kind: ErrorKind::OutOfRange,
            extra: description.into(),
        }
    }

    pub fn out_of_memory(description: impl Into<String>) -> Self {
        Self {
            kind: ErrorKind::OutOfMemory,
            extra: description.into(),
        }
    }

    pub fn unsupported(description: impl Into<String>) -> Self {
        Self {
            kind: ErrorKind::Unsupported,
            extra: description.into(),
        }
    }

    pub fn invalid_argument(description: impl Into<String>) -> Self {
        Self {
            kind: ErrorKind::InvalidArgument,
            extra: description.into(),
        }
    }
}

impl core::fmt::Display for ErrorKind {
    fn fmt(&self, fmt: &mut core::fmt::Formatter) -> core::result::Result<(), core::fmt::Error> {
        match self {
            Self::Format => write!(fmt, "malformed message"),
            Self::OutOfRange => write!(fmt, "index out of range"),
            Self::OutOfMemory => write!(fmt, "unable to allocate segment"),
            Self::Unsupported => write!(fmt, "unsupported operation"),
            Self::InvalidArgument => write!(fmt, "invalid argument"),
            Self::Io => write!(fmt, "I/O error"),
        }
    }
}

impl core::fmt::Display for Error {
    fn fmt(&self, fmt: &mut core::fmt::Formatter) -> core::result::Result<(), core::fmt::Error> {
        if self.extra.is_empty() {
            write!(fmt, "{}", self.kind)
        } else {
            write!(fmt, "{}: {}", self.kind, self.extra)
        }
    }
}

impl std::error::Error for Error {}

impl From<std::io::Error> for Error {
    fn from(err: std::io::Error) -> Self {
        let kind = match err.kind() {
            std::io::ErrorKind::UnexpectedEof => ErrorKind::Format,
            _ => ErrorKind::Io,
        };
        Self {
            kind,
            extra: format!("{err}"),
        }
    }
}

impl From<core::fmt::Error> for Error {
    fn from(_err: core::fmt::Error) -> Self {
        Self {
            kind: ErrorKind::Io,
            extra: "formatter error".to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::{Error, ErrorKind};

    #[test]
    fn unexpected_eof_is_a_format_error() {
        let err: Error = std::io::Error::new(std::io::ErrorKind::UnexpectedEof, "eof").into();
        assert_eq!(ErrorKind::Format, err.kind);

        let err: Error = std::io::Error::new(std::io::ErrorKind::BrokenPipe, "pipe").into();
        assert_eq!(ErrorKind::Io, err.kind);
    }

    #[test]
    fn display_includes_extra() {
        let err = Error::out_of_range("segment 3");
        assert_eq!("index out of range: segment 3", format!("{err}"));
        assert_eq!(
            "unsupported operation",
            format!("{}", Error::from_kind(ErrorKind::Unsupported))
        );
    }
}
