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

//! Diagnostic walk over the raw pointer graph of a message.
//!
//! Nothing here is needed to read or write messages. The walk looks at pointers as they are
//! stored, one far hop at a time, so it can describe messages that normal access would
//! reject, including ones whose pointers form a cycle.

use std::collections::{BTreeMap, HashSet};
use std::fmt::Write;

use crate::layout::ElementSize;
use crate::message::Message;
use crate::pointer::{Pointer, PointerSlot, ResolvedPointer, WirePointerKind};
use crate::Result;

/// Summary of a [`Message::crawl`].
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct CrawlReport {
    /// Number of distinct pointer words visited.
    pub visited: usize,

    /// Pointers reached again after they had already been visited, in the order the walk
    /// reached them. Well-formed messages have none.
    pub revisits: Vec<Pointer>,
}

/// Pending pointers, each with the pointer it was found through. Ordered so that the walk
/// proceeds segment by segment, word by word.
type Worklist = BTreeMap<Pointer, Pointer>;

impl Message {
    /// Walks the pointer graph from `root` (the message root when `None`), writing one block
    /// per visited pointer to `output`. With `include_data_words`, the data section of each
    /// struct is dumped as well.
    pub fn crawl<W: Write>(
        &self,
        output: &mut W,
        include_data_words: bool,
        root: Option<Pointer>,
    ) -> Result<CrawlReport> {
        let mut report = CrawlReport::default();
        if self.segment_count() == 0 {
            return Ok(report);
        }
        let root = match root {
            Some(root) => root,
            // an empty segment 0 has only the placeholder root
            None if self.segment(0)?.is_empty() => return Ok(report),
            None => self.root(),
        };

        let mut pending = Worklist::new();
        pending.insert(root, root);
        let mut seen: HashSet<PointerSlot> = HashSet::new();

        while let Some((next, from)) = pending.pop_first() {
            if next.is_null() {
                continue;
            }
            writeln!(output, "{next}")?;
            if next != from {
                writeln!(output, "     < {from}")?;
            }
            if !seen.insert(next.slot()) {
                writeln!(output, "   (duplicated; recursion is likely)")?;
                report.revisits.push(next);
                continue;
            }
            report.visited += 1;

            if next.is_far() {
                if next.wire().is_double_far() {
                    if let Some(target) = self.resolve(&next)? {
                        writeln!(output, "     > {target}")?;
                        self.crawl_object(output, include_data_words, &target, next, &mut pending)?;
                    }
                } else {
                    let pad = next.dereference(self)?;
                    writeln!(output, "     > {pad}")?;
                    if !pad.is_null() {
                        pending.entry(pad).or_insert(next);
                    }
                }
            } else if let Some(target) = self.resolve(&next)? {
                self.crawl_object(output, include_data_words, &target, next, &mut pending)?;
            }
            writeln!(output)?;
        }
        Ok(report)
    }

    fn crawl_object<W: Write>(
        &self,
        output: &mut W,
        include_data_words: bool,
        target: &ResolvedPointer,
        from: Pointer,
        pending: &mut Worklist,
    ) -> Result<()> {
        match target.kind() {
            WirePointerKind::Struct => {
                let object = self.struct_at(target)?;
                if include_data_words {
                    let segment = self.segment(object.segment_id())?;
                    for i in 0..u32::from(object.size().data) {
                        let word = segment.read_word(object.start() + i)?;
                        writeln!(output, "  {i:02} = {word:#018x}")?;
                    }
                }
                for i in 0..object.size().pointers {
                    let child = object.get_pointer(self, i)?;
                    writeln!(output, "  {i:02} > {child}")?;
                    if !child.is_null() {
                        pending.entry(child).or_insert(from);
                    }
                }
            }
            WirePointerKind::List => {
                let list = self.list_at(target)?;
                match list.element_size() {
                    ElementSize::Pointer => {
                        for i in 0..list.len() {
                            let child = list.get_pointer_element(self, i)?;
                            writeln!(output, "  {i:02} > {child}")?;
                            if !child.is_null() {
                                pending.entry(child).or_insert(from);
                            }
                        }
                    }
                    ElementSize::InlineComposite => {
                        for i in 0..list.len() {
                            let element = list.get_struct_element(i)?;
                            writeln!(output, "  {i:02} : {element}")?;
                            for j in 0..element.size().pointers {
                                let child = element.get_pointer(self, j)?;
                                writeln!(output, "    {j:02} > {child}")?;
                                if !child.is_null() {
                                    pending.entry(child).or_insert(from);
                                }
                            }
                        }
                    }
                    _ => writeln!(output, "  {list}")?,
                }
            }
            _ => {}
        }
        Ok(())
    }
}
