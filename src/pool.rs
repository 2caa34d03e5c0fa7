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

//! Reuse of message buffers.

use crate::message::Message;

pub const DEFAULT_MAX_POOLED: usize = 16;

/// A free-list of messages. A released message is [reset](Message::reset) before it is kept,
/// so that nothing written into it can be read back by the next user.
///
/// The pool is a plain value: keep one wherever messages are built repeatedly, e.g. per
/// connection.
#[derive(Debug)]
pub struct MessagePool {
    free: Vec<Message>,
    max_pooled: usize,
}

impl MessagePool {
    pub fn new(max_pooled: usize) -> Self {
        Self {
            free: Vec::new(),
            max_pooled,
        }
    }

    /// Takes an empty message from the pool, or makes a new one.
    pub fn acquire(&mut self) -> Message {
        self.free.pop().unwrap_or_else(Message::new_default)
    }

    /// Resets `message` and keeps it for a later [`MessagePool::acquire`], unless the pool is
    /// full.
    pub fn release(&mut self, mut message: Message) {
        message.reset();
        if self.free.len() < self.max_pooled {
            self.free.push(message);
            tracing::trace!(pooled = self.free.len(), "recycled message");
        }
    }

    /// Number of messages waiting to be reused.
    pub fn len(&self) -> usize {
        self.free.len()
    }

    pub fn is_empty(&self) -> bool {
        self.free.is_empty()
    }
}

impl Default for MessagePool {
    fn default() -> Self {
        Self::new(DEFAULT_MAX_POOLED)
    }
}
