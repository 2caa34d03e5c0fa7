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

//! Reading and writing of messages using the
//! [standard stream framing](https://capnproto.org/encoding.html#serialization-over-a-stream).

use std::cell::RefCell;
use std::io::{self, Read, Write};

use byteorder::{ByteOrder, LittleEndian};
use futures::{AsyncWrite, AsyncWriteExt};

use crate::message::{Message, ReaderOptions};
use crate::segment::Segment;
use crate::units::*;
use crate::{Error, Result};

/// Size of the buffer that segment words are staged through on their way to a writer.
pub const WRITE_BUFFER_BYTES: usize = 8 * 1024;

thread_local! {
    static WRITE_BUFFER: RefCell<Option<Vec<u8>>> = const { RefCell::new(None) };
}

/// The calling thread's write buffer, on loan. Dropping it scrubs the contents and hands the
/// buffer back to the thread.
struct WriteBuffer {
    bytes: Vec<u8>,
}

impl WriteBuffer {
    fn take() -> Self {
        let bytes = WRITE_BUFFER
            .try_with(|cell| cell.borrow_mut().take())
            .ok()
            .flatten()
            .unwrap_or_else(|| vec![0; WRITE_BUFFER_BYTES]);
        Self { bytes }
    }
}

impl Drop for WriteBuffer {
    fn drop(&mut self) {
        let mut bytes = core::mem::take(&mut self.bytes);
        if bytes.len() != WRITE_BUFFER_BYTES {
            return;
        }
        bytes.fill(0);
        let _ = WRITE_BUFFER.try_with(|cell| {
            let mut slot = cell.borrow_mut();
            if slot.is_none() {
                *slot = Some(bytes);
            }
        });
    }
}

/// Reads a message from `read`. Pass `&mut reader` to keep the stream open for further
/// messages.
///
/// For optimal performance, `read` should be a buffered reader type.
pub fn read_message<R>(read: R, options: ReaderOptions) -> Result<Message>
where
    R: Read,
{
    match try_read_message(read, options)? {
        Some(message) => Ok(message),
        None => Err(Error::format("Premature end of file")),
    }
}

/// Like [`read_message`], but returns `Ok(None)` if the stream is already at its end before
/// the first byte of the message.
pub fn try_read_message<R>(mut read: R, options: ReaderOptions) -> Result<Option<Message>>
where
    R: Read,
{
    let segment_lengths = match read_segment_table(&mut read, options)? {
        Some(lengths) => lengths,
        None => return Ok(None),
    };
    read_segments(&mut read, &segment_lengths).map(Some)
}

/// Reads a message from the front of `bytes`. Any bytes after the message are ignored.
pub fn read_message_from_bytes(bytes: &[u8], options: ReaderOptions) -> Result<Message> {
    read_message(bytes, options)
}

/// Fills `buf`, or returns `false` if the stream ends before the first byte.
fn read_first_word<R: Read>(read: &mut R, buf: &mut [u8]) -> Result<bool> {
    let mut filled = 0;
    while filled < buf.len() {
        match read.read(&mut buf[filled..]) {
            Ok(0) if filled == 0 => return Ok(false),
            Ok(0) => return Err(Error::format("Premature end of file")),
            Ok(n) => filled += n,
            Err(e) if e.kind() == io::ErrorKind::Interrupted => {}
            Err(e) => return Err(e.into()),
        }
    }
    Ok(true)
}

/// Reads a segment table from `read` and returns the length in words of each segment.
fn read_segment_table<R>(read: &mut R, options: ReaderOptions) -> Result<Option<Vec<u32>>>
where
    R: Read,
{
    let mut buf: [u8; 8] = [0; 8];

    // read the first Word, which contains segment_count and the 1st segment length
    if !read_first_word(read, &mut buf)? {
        return Ok(None);
    }
    let segment_count = LittleEndian::read_u32(&buf[0..4]).wrapping_add(1) as usize;

    if segment_count >= options.segment_limit as usize {
        return Err(Error::format(format!("Too many segments: {segment_count}")));
    } else if segment_count == 0 {
        return Err(Error::format(format!("Too few segments: {segment_count}")));
    }

    let mut segment_lengths = Vec::with_capacity(segment_count);
    segment_lengths.push(LittleEndian::read_u32(&buf[4..8]));

    if segment_count > 1 {
        let mut segment_sizes = vec![0u8; (segment_count & !1) * 4];
        read.read_exact(&mut segment_sizes[..])?;
        for idx in 0..(segment_count - 1) {
            segment_lengths.push(LittleEndian::read_u32(&segment_sizes[(idx * 4)..(idx + 1) * 4]));
        }
    }

    if let Some(len) = segment_lengths.iter().find(|&&len| len > MAX_SEGMENT_WORDS) {
        return Err(Error::format(format!("Segment of {len} words is too large")));
    }

    // Don't accept a message which the receiver couldn't possibly traverse without hitting the
    // traversal limit. Without this check, a malicious client could transmit a very large segment
    // size to make the receiver allocate excessive space and possibly crash.
    let total_words: u64 = segment_lengths.iter().map(|&len| u64::from(len)).sum();
    if total_words > options.traversal_limit_in_words {
        return Err(Error::format(format!(
            "Message has {total_words} words, which is too large. To increase the limit on the \
             receiving end, see capnp_wire::message::ReaderOptions."
        )));
    }

    Ok(Some(segment_lengths))
}

/// Reads segments from `read`.
fn read_segments<R>(read: &mut R, segment_lengths: &[u32]) -> Result<Message>
where
    R: Read,
{
    let mut segments = Vec::with_capacity(segment_lengths.len());
    for (id, &len) in (0..).zip(segment_lengths) {
        let mut bytes = vec![0u8; len as usize * BYTES_PER_WORD];
        read.read_exact(&mut bytes)?;
        let mut segment = Segment::new_full(id, vec![0; len as usize]);
        segment.write_words(0, &bytes)?;
        segments.push(segment);
    }
    let message = Message::from_segments(segments);
    tracing::debug!(
        segments = message.segment_count(),
        words = message.word_count(),
        "loaded message"
    );
    Ok(message)
}

/// Lengths to frame. A message with no segments is framed as one empty segment.
fn segment_lengths(message: &Message) -> Vec<u32> {
    let lengths: Vec<u32> = message.segments().map(Segment::len).collect();
    if lengths.is_empty() {
        vec![0]
    } else {
        lengths
    }
}

/// The segment table for segments of the given lengths.
fn segment_table(lengths: &[u32]) -> Vec<u8> {
    let segment_count = lengths.len();
    let mut buf = vec![0u8; (segment_count / 2 + 1) * BYTES_PER_WORD];
    LittleEndian::write_u32(&mut buf[0..4], segment_count as u32 - 1);
    for (idx, &len) in lengths.iter().enumerate() {
        LittleEndian::write_u32(&mut buf[(idx + 1) * 4..(idx + 2) * 4], len);
    }
    buf
}

fn write_segment_table<W>(write: &mut W, lengths: &[u32]) -> io::Result<()>
where
    W: Write,
{
    write.write_all(&segment_table(lengths))
}

/// Writes the provided message to `write`, returning once every byte has been handed to it.
/// A failure of the writer is returned as is; whatever was already written stays written.
///
/// For optimal performance, `write` should be a buffered writer. `flush` will not be called on
/// the writer.
pub fn write_message<W>(mut write: W, message: &Message) -> Result<()>
where
    W: Write,
{
    write_segment_table(&mut write, &segment_lengths(message))?;
    let mut buffer = WriteBuffer::take();
    for segment in message.segments() {
        let mut offset = 0;
        loop {
            let words = segment.read_words(offset, &mut buffer.bytes);
            if words == 0 {
                break;
            }
            write.write_all(&buffer.bytes[..words * BYTES_PER_WORD])?;
            offset += words as WordCount32;
        }
    }
    Ok(())
}

/// Asynchronous version of [`write_message`].
pub async fn write_message_async<W>(mut write: W, message: &Message) -> Result<()>
where
    W: AsyncWrite + Unpin,
{
    write.write_all(&segment_table(&segment_lengths(message))).await?;
    let mut buffer = WriteBuffer::take();
    for segment in message.segments() {
        let mut offset = 0;
        loop {
            let words = segment.read_words(offset, &mut buffer.bytes);
            if words == 0 {
                break;
            }
            write.write_all(&buffer.bytes[..words * BYTES_PER_WORD]).await?;
            offset += words as WordCount32;
        }
    }
    Ok(())
}

/// Constructs a flat vector containing the entire framed message.
pub fn write_message_to_bytes(message: &Message) -> Result<Vec<u8>> {
    let mut bytes = Vec::with_capacity(compute_serialized_size_in_words(message) * BYTES_PER_WORD);
    write_message(&mut bytes, message)?;
    Ok(bytes)
}

/// Returns the number of words required to serialize the message, table included.
pub fn compute_serialized_size_in_words(message: &Message) -> usize {
    let lengths = segment_lengths(message);
    lengths.len() / 2 + 1 + lengths.iter().map(|&len| len as usize).sum::<usize>()
}

#[cfg(test)]
pub mod test {
    use std::io::{self, Cursor, Write};

    use quickcheck::{quickcheck, TestResult};

    use super::{
        compute_serialized_size_in_words, read_message, read_segment_table, segment_lengths,
        segment_table, try_read_message, write_message, write_message_to_bytes,
        write_segment_table, WriteBuffer, WRITE_BUFFER_BYTES,
    };
    use crate::message::{Message, ReaderOptions};
    use crate::segment::Segment;
    use crate::ErrorKind;

    fn message_of(segments: &[Vec<u64>]) -> Message {
        Message::from_segments(
            (0..)
                .zip(segments)
                .map(|(id, words)| Segment::new_full(id, words.clone()))
                .collect(),
        )
    }

    /// Segment tables and the lengths they announce.
    const TABLES: &[(&[u8], &[u32])] = &[
        // one empty segment
        (&[0, 0, 0, 0, 0, 0, 0, 0], &[0]),
        // one segment of 3 words
        (&[0, 0, 0, 0, 3, 0, 0, 0], &[3]),
        // an empty segment followed by the padding word
        (&[1, 0, 0, 0, 0, 0, 0, 0, 3, 0, 0, 0, 0, 0, 0, 0], &[0, 3]),
        // three segments, no padding
        (&[2, 0, 0, 0, 5, 0, 0, 0, 0, 0, 0, 0, 0, 2, 0, 0], &[5, 0, 512]),
        // four segments and padding
        (
            &[
                3, 0, 0, 0, 1, 0, 0, 0, 40, 0, 0, 0, 0, 0, 0, 0, 7, 0, 0, 0, 0, 0, 0, 0,
            ],
            &[1, 40, 0, 7],
        ),
    ];

    #[test]
    fn test_read_segment_table() {
        for &(table, lengths) in TABLES {
            let read =
                read_segment_table(&mut Cursor::new(table), ReaderOptions::new()).unwrap();
            assert_eq!(Some(lengths.to_vec()), read, "table {table:?}");
        }

        let mut empty = Cursor::new(&[0u8; 0][..]);
        let none = read_segment_table(&mut empty, ReaderOptions::new()).unwrap();
        assert_eq!(None, none);

        // cut off inside the second length
        let table = &TABLES[2].0[..10];
        let err = read_segment_table(&mut Cursor::new(table), ReaderOptions::new()).unwrap_err();
        assert_eq!(ErrorKind::Format, err.kind);
    }

    #[test]
    fn test_read_invalid_segment_table() {
        let mut buf = vec![];

        buf.extend([0, 2, 0, 0].iter().cloned()); // 513 segments
        buf.extend([0; 513 * 4].iter().cloned());
        let err = read_segment_table(&mut Cursor::new(&buf[..]), ReaderOptions::new()).unwrap_err();
        assert_eq!(ErrorKind::Format, err.kind);
        buf.clear();

        buf.extend([0, 0, 0, 0].iter().cloned()); // 1 segments
        let err = read_segment_table(&mut Cursor::new(&buf[..]), ReaderOptions::new()).unwrap_err();
        assert_eq!(ErrorKind::Format, err.kind);
        buf.clear();

        buf.extend([0, 0, 0, 0].iter().cloned()); // 1 segments
        buf.extend([0; 3].iter().cloned());
        let err = read_segment_table(&mut Cursor::new(&buf[..]), ReaderOptions::new()).unwrap_err();
        assert_eq!(ErrorKind::Format, err.kind);
        buf.clear();

        buf.extend([255, 255, 255, 255].iter().cloned()); // 0 segments
        buf.extend([0; 4].iter().cloned());
        let err = read_segment_table(&mut Cursor::new(&buf[..]), ReaderOptions::new()).unwrap_err();
        assert_eq!(ErrorKind::Format, err.kind);
        buf.clear();

        buf.extend([0, 0, 0, 0, 0, 1, 0, 0].iter().cloned()); // 256 words
        let mut options = ReaderOptions::new();
        options.traversal_limit_in_words(255);
        let err = read_segment_table(&mut Cursor::new(&buf[..]), options).unwrap_err();
        assert_eq!(ErrorKind::Format, err.kind);
        buf.clear();

        buf.extend([2, 0, 0, 0, 0, 0, 0, 0].iter().cloned()); // 3 segments
        let mut options = ReaderOptions::new();
        options.segment_limit(3);
        let err = read_segment_table(&mut Cursor::new(&buf[..]), options).unwrap_err();
        assert_eq!(ErrorKind::Format, err.kind);
    }

    #[test]
    fn test_write_segment_table() {
        for &(table, lengths) in TABLES {
            let mut buf = vec![];
            write_segment_table(&mut buf, lengths).unwrap();
            assert_eq!(table, &buf[..], "lengths {lengths:?}");
            assert_eq!(buf, segment_table(lengths));
        }
    }

    #[test]
    fn empty_message_is_framed_as_one_empty_segment() {
        let message = Message::new_default();
        assert_eq!(vec![0], segment_lengths(&message));
        assert_eq!(1, compute_serialized_size_in_words(&message));
        let bytes = write_message_to_bytes(&message).unwrap();
        assert_eq!(vec![0u8; 8], bytes);

        let reloaded = Message::load(&bytes).unwrap();
        assert_eq!(1, reloaded.segment_count());
        assert!(reloaded.resolve(&reloaded.root()).unwrap().is_none());
    }

    #[test]
    fn consecutive_messages() {
        let mut bytes = write_message_to_bytes(&message_of(&[vec![1, 2]])).unwrap();
        bytes.extend(write_message_to_bytes(&message_of(&[vec![3], vec![4, 5, 6]])).unwrap());
        let mut cursor = Cursor::new(&bytes[..]);

        let first = try_read_message(&mut cursor, ReaderOptions::new()).unwrap().unwrap();
        assert_eq!(2, first.word_count());
        let second = try_read_message(&mut cursor, ReaderOptions::new()).unwrap().unwrap();
        assert_eq!(2, second.segment_count());
        assert_eq!(&[4, 5, 6], second.segment(1).unwrap().as_words());
        assert!(try_read_message(&mut cursor, ReaderOptions::new()).unwrap().is_none());
        assert_eq!(
            ErrorKind::Format,
            read_message(&mut cursor, ReaderOptions::new()).unwrap_err().kind
        );
    }

    #[test]
    fn truncated_body() {
        let bytes = write_message_to_bytes(&message_of(&[vec![1, 2, 3]])).unwrap();
        let err = Message::load(&bytes[..bytes.len() - 1]).unwrap_err();
        assert_eq!(ErrorKind::Format, err.kind);
    }

    struct BrokenPipe;

    impl Write for BrokenPipe {
        fn write(&mut self, _buf: &[u8]) -> io::Result<usize> {
            Err(io::Error::new(io::ErrorKind::BrokenPipe, "closed"))
        }

        fn flush(&mut self) -> io::Result<()> {
            Ok(())
        }
    }

    #[test]
    fn writer_failure_is_reported() {
        let err = write_message(BrokenPipe, &message_of(&[vec![1]])).unwrap_err();
        assert_eq!(ErrorKind::Io, err.kind);
    }

    #[test]
    fn write_buffer_is_scrubbed() {
        {
            let mut buffer = WriteBuffer::take();
            buffer.bytes[0] = 0xff;
        }
        let buffer = WriteBuffer::take();
        assert_eq!(WRITE_BUFFER_BYTES, buffer.bytes.len());
        assert!(buffer.bytes.iter().all(|&b| b == 0));
    }

    #[test]
    fn large_segments_cross_buffer_boundaries() {
        let words: Vec<u64> = (0..3000).collect();
        let message = message_of(&[words.clone()]);
        let bytes = write_message_to_bytes(&message).unwrap();
        assert_eq!(8 + 3000 * 8, bytes.len());
        let reloaded = Message::load(&bytes).unwrap();
        assert_eq!(&words[..], reloaded.segment(0).unwrap().as_words());
    }

    #[test]
    fn check_round_trip() {
        fn round_trip(segments: Vec<Vec<u64>>) -> TestResult {
            if segments.is_empty() {
                return TestResult::discard();
            }
            let mut cursor = Cursor::new(Vec::new());

            write_message(&mut cursor, &message_of(&segments)).unwrap();
            cursor.set_position(0);

            let message = read_message(&mut cursor, ReaderOptions::new()).unwrap();

            TestResult::from_bool(
                segments.iter().enumerate().all(|(i, segment)| {
                    &segment[..] == message.segment(i as u32).unwrap().as_words()
                }),
            )
        }

        quickcheck(round_trip as fn(Vec<Vec<u64>>) -> TestResult);
    }
}
