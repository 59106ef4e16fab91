//! Bounded single-producer/single-consumer stream buffer with tags
//!
//! Each connection in a graph is a [`StreamProducer`]/[`StreamConsumer`]
//! pair created by [`stream_buffer`]. The halves share two lock-free `rtrb`
//! ring buffers: one carries samples, the other carries tags indexed by
//! absolute stream offset. The producer half lives in the upstream block's
//! output port and the consumer half in the downstream block's input port,
//! so each side is only ever touched by the thread running its block.
//!
//! The consumer rebases tags against its read position: a tag handed to a
//! block is always indexed relative to the chunk it reads. A tag that
//! arrives for a sample the consumer has already read is dropped.
//!
//! The writer may close the buffer (end of stream). The reader may detach
//! from it (it will never read again), which lets the writer stop accounting
//! for its free space. Dropping a half has the same effect as closing or
//! detaching it.

use std::any::Any;
use std::collections::VecDeque;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};

use rtrb::RingBuffer;
use tracing::warn;

use super::errors::BufferError;
use super::sample::Sample;
use super::tag::Tag;

/// Tag ring slots never drop below this, however small the sample ring
pub const MIN_TAG_SLOTS: usize = 64;

/// Samples and tags read from a buffer
#[derive(Debug, Clone, PartialEq)]
pub struct ReadChunk<T> {
    pub samples: Vec<T>,
    /// Tags indexed relative to `samples[0]`
    pub tags: Vec<Tag>,
}

impl<T> ReadChunk<T> {
    pub fn len(&self) -> usize {
        self.samples.len()
    }

    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }
}

impl<T> Default for ReadChunk<T> {
    fn default() -> Self {
        Self {
            samples: Vec::new(),
            tags: Vec::new(),
        }
    }
}

/// Type-erased producer half, owned by an output port
pub trait ErasedProducer: Send {
    fn capacity(&self) -> usize;

    /// Free sample slots for the writer
    fn space(&self) -> usize;

    /// Mark end of stream. Data already published stays readable.
    fn close(&self);

    fn is_closed(&self) -> bool;

    /// The reader will never consume again
    fn is_detached(&self) -> bool;

    fn items_written(&self) -> u64;

    fn sample_type(&self) -> &'static str;

    fn as_any_mut(&mut self) -> &mut dyn Any;
}

/// Type-erased consumer half, owned by an input port
pub trait ErasedConsumer: Send {
    fn capacity(&self) -> usize;

    /// Samples published but not yet consumed
    fn available(&self) -> usize;

    /// The writer closed the stream or went away
    fn is_closed(&self) -> bool;

    /// Closed with nothing left to read
    fn is_exhausted(&self) -> bool;

    /// Tell the writer this reader is done
    fn detach(&self);

    fn is_detached(&self) -> bool;

    fn items_read(&self) -> u64;

    fn sample_type(&self) -> &'static str;

    fn as_any_mut(&mut self) -> &mut dyn Any;
}

/// Counters and flags both halves publish to each other
#[derive(Debug)]
struct Shared {
    capacity: usize,
    written: AtomicU64,
    read: AtomicU64,
    closed: AtomicBool,
    detached: AtomicBool,
}

/// Create a connection buffer holding at most `capacity` samples (minimum 1)
pub fn stream_buffer<T: Sample>(capacity: usize) -> (StreamProducer<T>, StreamConsumer<T>) {
    let capacity = capacity.max(1);
    let (samples_tx, samples_rx) = RingBuffer::new(capacity);
    let (tags_tx, tags_rx) = RingBuffer::new(capacity.max(MIN_TAG_SLOTS));
    let shared = Arc::new(Shared {
        capacity,
        written: AtomicU64::new(0),
        read: AtomicU64::new(0),
        closed: AtomicBool::new(false),
        detached: AtomicBool::new(false),
    });
    (
        StreamProducer {
            samples: samples_tx,
            tags: tags_tx,
            shared: Arc::clone(&shared),
        },
        StreamConsumer {
            samples: samples_rx,
            tags: tags_rx,
            pending: VecDeque::new(),
            shared,
        },
    )
}

/// Create a connection buffer behind the type-erased interfaces
pub fn erased_stream_buffer<T: Sample>(
    capacity: usize,
) -> (Box<dyn ErasedProducer>, Box<dyn ErasedConsumer>) {
    let (producer, consumer) = stream_buffer::<T>(capacity);
    (Box::new(producer), Box::new(consumer))
}

/// Writing half of a stream buffer
pub struct StreamProducer<T> {
    samples: rtrb::Producer<T>,
    /// Tags with absolute stream offsets
    tags: rtrb::Producer<Tag>,
    shared: Arc<Shared>,
}

impl<T: Sample> StreamProducer<T> {
    /// Free tag slots
    pub fn tag_space(&self) -> usize {
        self.tags.slots()
    }

    /// Append samples and their tags
    ///
    /// Tag indices are relative to `samples[0]`. A negative index tags an
    /// already published sample; the reader drops it if it has read that
    /// sample by then. A tag past the end of `samples` or before the start of
    /// the stream is dropped with a warning. Fails without writing anything
    /// if samples or tags do not fit.
    pub fn push(&mut self, samples: &[T], tags: &[Tag]) -> Result<(), BufferError> {
        let space = self.samples.slots();
        if samples.len() > space {
            return Err(BufferError::InsufficientSpace {
                requested: samples.len(),
                space,
            });
        }

        let written = self.shared.written.load(Ordering::Relaxed) as i64;
        let count = samples.len() as i64;
        let mut accepted: Vec<Tag> = tags
            .iter()
            .filter(|tag| {
                let in_range = tag.index < count && written + tag.index >= 0;
                if !in_range {
                    warn!("Dropping {} outside published range {}..{}", tag, -written, count);
                }
                in_range
            })
            .map(|tag| tag.shifted(written))
            .collect();
        let tag_space = self.tags.slots();
        if accepted.len() > tag_space {
            return Err(BufferError::InsufficientTagSpace {
                requested: accepted.len(),
                space: tag_space,
            });
        }
        accepted.sort_by_key(|tag| tag.index);

        // tags first, so a reader that sees a sample also sees its tags
        self.tags
            .write_chunk_uninit(accepted.len())
            .map_err(|_| BufferError::InsufficientTagSpace {
                requested: accepted.len(),
                space: tag_space,
            })?
            .fill_from_iter(accepted);
        self.samples
            .write_chunk_uninit(samples.len())
            .map_err(|_| BufferError::InsufficientSpace {
                requested: samples.len(),
                space,
            })?
            .fill_from_iter(samples.iter().copied());
        self.shared
            .written
            .fetch_add(samples.len() as u64, Ordering::Release);
        Ok(())
    }
}

impl<T: Sample> ErasedProducer for StreamProducer<T> {
    fn capacity(&self) -> usize {
        self.shared.capacity
    }

    fn space(&self) -> usize {
        self.samples.slots()
    }

    fn close(&self) {
        self.shared.closed.store(true, Ordering::Release);
    }

    fn is_closed(&self) -> bool {
        self.shared.closed.load(Ordering::Acquire)
    }

    fn is_detached(&self) -> bool {
        self.shared.detached.load(Ordering::Acquire) || self.samples.is_abandoned()
    }

    fn items_written(&self) -> u64 {
        self.shared.written.load(Ordering::Acquire)
    }

    fn sample_type(&self) -> &'static str {
        T::TYPE_NAME
    }

    fn as_any_mut(&mut self) -> &mut dyn Any {
        self
    }
}

/// Reading half of a stream buffer
pub struct StreamConsumer<T> {
    samples: rtrb::Consumer<T>,
    tags: rtrb::Consumer<Tag>,
    /// Tags taken off the ring, sorted by absolute offset
    pending: VecDeque<Tag>,
    shared: Arc<Shared>,
}

impl<T: Sample> StreamConsumer<T> {
    fn position(&self) -> i64 {
        self.shared.read.load(Ordering::Relaxed) as i64
    }

    /// Move newly published tags into `pending`
    fn collect_tags(&mut self) {
        let read = self.position();
        while let Ok(tag) = self.tags.pop() {
            if tag.index < read {
                warn!("Dropping {} rebased before the read position", tag.shifted(-read));
                continue;
            }
            let at = self.pending.partition_point(|t| t.index <= tag.index);
            self.pending.insert(at, tag);
        }
    }

    /// Copy the first `n` readable samples, committing them if `consume`
    fn read_front(&mut self, n: usize, consume: bool) -> Vec<T> {
        match self.samples.read_chunk(n) {
            Ok(chunk) => {
                let (first, second) = chunk.as_slices();
                let mut samples = Vec::with_capacity(n);
                samples.extend_from_slice(first);
                samples.extend_from_slice(second);
                if consume {
                    chunk.commit_all();
                }
                samples
            }
            Err(_) => Vec::new(),
        }
    }

    /// Advance the read position by `n`, returning the tags passed over
    fn advance(&mut self, n: usize) -> Vec<Tag> {
        let read = self.position();
        let end = read + n as i64;
        let mut taken = Vec::new();
        while self.pending.front().is_some_and(|tag| tag.index < end) {
            if let Some(tag) = self.pending.pop_front() {
                taken.push(tag.shifted(-read));
            }
        }
        self.shared.read.fetch_add(n as u64, Ordering::Release);
        taken
    }

    /// Copy up to `max` unread samples and their tags without consuming them
    pub fn peek(&mut self, max: usize) -> ReadChunk<T> {
        self.collect_tags();
        let n = max.min(self.samples.slots());
        let samples = self.read_front(n, false);
        let read = self.position();
        let end = read + samples.len() as i64;
        let tags = self
            .pending
            .iter()
            .take_while(|tag| tag.index < end)
            .map(|tag| tag.shifted(-read))
            .collect();
        ReadChunk { samples, tags }
    }

    /// Consume exactly `n` samples, returning the tags attached to them
    pub fn consume(&mut self, n: usize) -> Result<Vec<Tag>, BufferError> {
        let available = self.samples.slots();
        if n > available {
            return Err(BufferError::InsufficientData {
                requested: n,
                available,
            });
        }
        self.collect_tags();
        self.samples
            .read_chunk(n)
            .map_err(|_| BufferError::InsufficientData {
                requested: n,
                available,
            })?
            .commit_all();
        Ok(self.advance(n))
    }

    /// Consume up to `max` samples together with their tags
    pub fn take(&mut self, max: usize) -> ReadChunk<T> {
        self.collect_tags();
        let n = max.min(self.samples.slots());
        let samples = self.read_front(n, true);
        let tags = self.advance(samples.len());
        ReadChunk { samples, tags }
    }
}

impl<T: Sample> ErasedConsumer for StreamConsumer<T> {
    fn capacity(&self) -> usize {
        self.shared.capacity
    }

    fn available(&self) -> usize {
        self.samples.slots()
    }

    fn is_closed(&self) -> bool {
        self.shared.closed.load(Ordering::Acquire) || self.samples.is_abandoned()
    }

    fn is_exhausted(&self) -> bool {
        // closed is checked first: anything published before close is visible
        self.is_closed() && self.samples.slots() == 0
    }

    fn detach(&self) {
        self.shared.detached.store(true, Ordering::Release);
    }

    fn is_detached(&self) -> bool {
        self.shared.detached.load(Ordering::Acquire)
    }

    fn items_read(&self) -> u64 {
        self.shared.read.load(Ordering::Acquire)
    }

    fn sample_type(&self) -> &'static str {
        T::TYPE_NAME
    }

    fn as_any_mut(&mut self) -> &mut dyn Any {
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::property_map;

    fn tag(index: i64, key: &str) -> Tag {
        Tag::new(index, property_map! { key => true })
    }

    #[test]
    fn test_push_respects_capacity() {
        let (mut producer, consumer) = stream_buffer::<f32>(4);
        assert_eq!(producer.space(), 4);
        producer.push(&[1.0, 2.0, 3.0], &[]).unwrap();
        assert_eq!(consumer.available(), 3);
        assert_eq!(producer.space(), 1);

        let err = producer.push(&[4.0, 5.0], &[]).unwrap_err();
        assert_eq!(
            err,
            BufferError::InsufficientSpace {
                requested: 2,
                space: 1
            }
        );
        // nothing was written
        assert_eq!(consumer.available(), 3);
    }

    #[test]
    fn test_tags_rebased_on_consume() {
        let (mut producer, mut consumer) = stream_buffer::<i32>(16);
        producer
            .push(&[0, 1, 2, 3, 4], &[tag(1, "a"), tag(4, "b")])
            .unwrap();
        producer.push(&[5, 6], &[tag(0, "c")]).unwrap();

        let consumed = consumer.consume(2).unwrap();
        assert_eq!(consumed, vec![tag(1, "a")]);

        let chunk = consumer.peek(10);
        assert_eq!(chunk.samples, vec![2, 3, 4, 5, 6]);
        assert_eq!(chunk.tags, vec![tag(2, "b"), tag(3, "c")]);
    }

    #[test]
    fn test_out_of_range_tags_dropped() {
        let (mut producer, mut consumer) = stream_buffer::<u8>(8);
        producer
            .push(&[1, 2], &[tag(-1, "neg"), tag(1, "ok"), tag(2, "past")])
            .unwrap();
        let chunk = consumer.take(8);
        assert_eq!(chunk.tags, vec![tag(1, "ok")]);
    }

    #[test]
    fn test_late_tags() {
        let (mut producer, mut consumer) = stream_buffer::<u8>(8);
        producer.push(&[0, 1, 2, 3], &[tag(3, "b")]).unwrap();
        consumer.consume(2).unwrap();

        // offsets 0 and 3 of the stream: one already read, one still queued
        producer
            .push(&[], &[tag(-1, "late"), tag(-4, "read"), tag(-5, "before")])
            .unwrap();
        let chunk = consumer.take(8);
        assert_eq!(chunk.samples, vec![2, 3]);
        assert_eq!(chunk.tags, vec![tag(1, "b"), tag(1, "late")]);
    }

    #[test]
    fn test_tags_sorted_on_push() {
        let (mut producer, mut consumer) = stream_buffer::<u8>(8);
        producer.push(&[1, 2, 3], &[tag(2, "b"), tag(0, "a")]).unwrap();
        let chunk = consumer.take(3);
        assert_eq!(chunk.tags, vec![tag(0, "a"), tag(2, "b")]);
    }

    #[test]
    fn test_tag_ring_full() {
        let (mut producer, consumer) = stream_buffer::<u8>(4);
        let many: Vec<Tag> = (0..MIN_TAG_SLOTS as i64 + 1).map(|_| tag(0, "x")).collect();
        assert_eq!(
            producer.push(&[1], &many),
            Err(BufferError::InsufficientTagSpace {
                requested: MIN_TAG_SLOTS + 1,
                space: MIN_TAG_SLOTS
            })
        );
        assert_eq!(consumer.available(), 0);
        assert_eq!(producer.tag_space(), MIN_TAG_SLOTS);
    }

    #[test]
    fn test_peek_limits_tags_to_chunk() {
        let (mut producer, mut consumer) = stream_buffer::<u16>(8);
        producer
            .push(&[1, 2, 3, 4], &[tag(0, "a"), tag(3, "b")])
            .unwrap();
        let chunk = consumer.peek(2);
        assert_eq!(chunk.samples, vec![1, 2]);
        assert_eq!(chunk.tags, vec![tag(0, "a")]);
        // peek does not consume
        assert_eq!(consumer.available(), 4);
    }

    #[test]
    fn test_wraps_around() {
        let (mut producer, mut consumer) = stream_buffer::<u32>(4);
        producer.push(&[1, 2, 3], &[]).unwrap();
        consumer.consume(3).unwrap();
        producer.push(&[4, 5, 6], &[tag(2, "end")]).unwrap();
        let chunk = consumer.take(4);
        assert_eq!(chunk.samples, vec![4, 5, 6]);
        assert_eq!(chunk.tags, vec![tag(2, "end")]);
    }

    #[test]
    fn test_consume_more_than_available() {
        let (mut producer, mut consumer) = stream_buffer::<f64>(4);
        producer.push(&[1.0], &[]).unwrap();
        assert_eq!(
            consumer.consume(2),
            Err(BufferError::InsufficientData {
                requested: 2,
                available: 1
            })
        );
    }

    #[test]
    fn test_close_and_exhaust() {
        let (mut producer, mut consumer) = stream_buffer::<i64>(4);
        producer.push(&[1, 2], &[]).unwrap();
        producer.close();
        assert!(consumer.is_closed());
        assert!(!consumer.is_exhausted());
        consumer.consume(2).unwrap();
        assert!(consumer.is_exhausted());
        assert_eq!(producer.items_written(), 2);
        assert_eq!(consumer.items_read(), 2);
    }

    #[test]
    fn test_dropped_halves() {
        let (producer, consumer) = stream_buffer::<u8>(4);
        drop(consumer);
        assert!(producer.is_detached());

        let (producer, consumer) = stream_buffer::<u8>(4);
        drop(producer);
        assert!(consumer.is_exhausted());
    }

    #[test]
    fn test_zero_capacity_rounds_up() {
        let (producer, consumer) = stream_buffer::<u32>(0);
        assert_eq!(producer.capacity(), 1);
        assert_eq!(consumer.capacity(), 1);
    }
}
