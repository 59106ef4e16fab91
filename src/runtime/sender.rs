//! Fan-out write handle for a block's output port
//!
//! An output port may feed several inputs. Each connection has its own
//! buffer, and a [`StreamWriter`] publishes every chunk to all of them.
//! Readers that have detached (finished downstream blocks) are skipped and
//! no longer limit the writer's space.

use super::buffer::{ErasedProducer, ReadChunk, StreamProducer};
use super::errors::BufferError;
use super::sample::Sample;
use super::tag::Tag;

/// Writer side of one or more stream connections
pub struct StreamWriter<'a, T> {
    destinations: Vec<&'a mut StreamProducer<T>>,
}

impl<'a, T: Sample> StreamWriter<'a, T> {
    pub(crate) fn new(destinations: Vec<&'a mut StreamProducer<T>>) -> Self {
        Self { destinations }
    }

    /// Get the number of connected destinations
    pub fn num_destinations(&self) -> usize {
        self.destinations.len()
    }

    pub fn is_connected(&self) -> bool {
        !self.destinations.is_empty()
    }

    fn live(&self) -> impl Iterator<Item = &&'a mut StreamProducer<T>> {
        self.destinations.iter().filter(|p| !p.is_detached())
    }

    /// Samples that can be published without overflowing any live reader
    ///
    /// An unconnected port discards everything, so its space is unbounded.
    /// When every reader has detached the space is zero.
    pub fn space(&self) -> usize {
        if self.destinations.is_empty() {
            return usize::MAX;
        }
        self.live()
            .map(|p| p.space().min(p.tag_space()))
            .min()
            .unwrap_or(0)
    }

    /// Publish samples to every live destination
    pub fn publish(&mut self, samples: &[T]) -> Result<(), BufferError> {
        self.publish_with_tags(samples, &[])
    }

    /// Publish samples and tags (indexed relative to `samples[0]`)
    ///
    /// Either every live destination receives the chunk or none does.
    pub fn publish_with_tags(&mut self, samples: &[T], tags: &[Tag]) -> Result<(), BufferError> {
        if (samples.is_empty() && tags.is_empty()) || self.destinations.is_empty() {
            return Ok(());
        }
        let space = self.live().map(|p| p.space()).min().unwrap_or(0);
        if samples.len() > space {
            return Err(BufferError::InsufficientSpace {
                requested: samples.len(),
                space,
            });
        }
        let tag_space = self.live().map(|p| p.tag_space()).min().unwrap_or(0);
        if tags.len() > tag_space {
            return Err(BufferError::InsufficientTagSpace {
                requested: tags.len(),
                space: tag_space,
            });
        }
        for producer in self.destinations.iter_mut().filter(|p| !p.is_detached()) {
            producer.push(samples, tags)?;
        }
        Ok(())
    }

    /// Attach tags to samples already published
    ///
    /// Indices count back from the next sample, so `-1` tags the last sample
    /// written. Readers that already consumed the sample never see the tag.
    pub fn publish_tags(&mut self, tags: &[Tag]) -> Result<(), BufferError> {
        self.publish_with_tags(&[], tags)
    }

    /// Forward a chunk read from an input, tags included
    pub fn publish_chunk(&mut self, chunk: &ReadChunk<T>) -> Result<(), BufferError> {
        self.publish_with_tags(&chunk.samples, &chunk.tags)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::property_map;
    use crate::runtime::buffer::{ErasedConsumer, stream_buffer};

    #[test]
    fn test_fan_out_limited_by_slowest_reader() {
        let (mut pa, ca) = stream_buffer::<u8>(4);
        let (mut pb, cb) = stream_buffer::<u8>(8);
        let mut writer = StreamWriter::new(vec![&mut pa, &mut pb]);

        assert_eq!(writer.space(), 4);
        writer.publish(&[1, 2, 3]).unwrap();
        assert_eq!(ca.available(), 3);
        assert_eq!(cb.available(), 3);
        assert_eq!(writer.space(), 1);
        assert!(writer.publish(&[4, 5]).is_err());
        assert_eq!(cb.available(), 3);
    }

    #[test]
    fn test_detached_readers_are_skipped() {
        let (mut pa, ca) = stream_buffer::<u8>(2);
        let (mut pb, cb) = stream_buffer::<u8>(8);
        let mut writer = StreamWriter::new(vec![&mut pa, &mut pb]);

        writer.publish(&[1, 2]).unwrap();
        ca.detach();
        assert_eq!(writer.space(), 6);
        writer.publish(&[3, 4, 5]).unwrap();
        assert_eq!(ca.available(), 2);
        assert_eq!(cb.available(), 5);

        cb.detach();
        assert_eq!(writer.space(), 0);
    }

    #[test]
    fn test_late_tag_reaches_unread_sample() {
        let (mut producer, mut consumer) = stream_buffer::<i32>(8);
        let mut writer = StreamWriter::new(vec![&mut producer]);
        writer.publish(&[1, 2, 3]).unwrap();
        writer
            .publish_tags(&[Tag::new(-1, property_map! { "eob" => true })])
            .unwrap();

        let chunk = consumer.take(8);
        assert_eq!(chunk.tags, vec![Tag::new(2, property_map! { "eob" => true })]);
    }

    #[test]
    fn test_unconnected_writer_discards() {
        let mut writer = StreamWriter::<f32>::new(Vec::new());
        assert!(!writer.is_connected());
        assert_eq!(writer.space(), usize::MAX);
        writer.publish(&[1.0; 16]).unwrap();
    }
}
