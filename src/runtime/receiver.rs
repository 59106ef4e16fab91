//! Typed read handle for a block's input port
//!
//! A [`StreamReader`] borrows the input's consumer half for the duration of
//! one `work()` call. Blocks inspect what is available, copy or consume
//! samples, and receive the tags attached to whatever they consume.

use super::buffer::{ErasedConsumer, ReadChunk, StreamConsumer};
use super::errors::BufferError;
use super::sample::Sample;
use super::tag::Tag;

/// Reader side of a stream connection
pub struct StreamReader<'a, T> {
    consumer: &'a mut StreamConsumer<T>,
}

impl<'a, T: Sample> StreamReader<'a, T> {
    pub(crate) fn new(consumer: &'a mut StreamConsumer<T>) -> Self {
        Self { consumer }
    }

    /// Number of samples ready to be read
    pub fn available(&self) -> usize {
        self.consumer.available()
    }

    /// The writer closed the stream
    pub fn is_closed(&self) -> bool {
        self.consumer.is_closed()
    }

    /// The writer closed the stream and everything has been read
    pub fn is_exhausted(&self) -> bool {
        self.consumer.is_exhausted()
    }

    /// Copy up to `max` samples and their tags without consuming
    pub fn peek(&mut self, max: usize) -> ReadChunk<T> {
        self.consumer.peek(max)
    }

    /// Consume exactly `n` samples, returning their tags
    pub fn consume(&mut self, n: usize) -> Result<Vec<Tag>, BufferError> {
        self.consumer.consume(n)
    }

    /// Consume up to `max` samples
    pub fn take(&mut self, max: usize) -> ReadChunk<T> {
        self.consumer.take(max)
    }

    /// Consume everything currently available
    pub fn take_all(&mut self) -> ReadChunk<T> {
        self.consumer.take(usize::MAX)
    }
}
