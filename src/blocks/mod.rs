//! Built-in blocks
//!
//! Every block here is generic over the sample type and registered with the
//! block registry once per built-in sample type.

mod copy;
mod head;
mod null_sink;
mod null_source;
mod tag_gate;
mod vector_sink;
mod vector_source;

pub use copy::Copy;
pub use head::Head;
pub use null_sink::NullSink;
pub use null_source::NullSource;
pub use tag_gate::TagGate;
pub use vector_sink::VectorSink;
pub use vector_source::VectorSource;

use num_complex::Complex;
use tracing::warn;

use crate::runtime::registry::BlockRegistry;

/// Upper bound on samples a source produces per work call
pub(crate) const MAX_CHUNK: usize = 1 << 16;

macro_rules! register_for_sample_types {
    (@each $registry:expr, $block:ident, $($ty:ty),+) => {
        $(
            if let Err(e) = $registry.add_block_type::<$block<$ty>>() {
                warn!("Skipping built-in block: {}", e);
            }
        )+
    };
    ($registry:expr, $($block:ident),+ $(,)?) => {
        $(
            register_for_sample_types!(
                @each $registry, $block,
                f32, f64, i8, i16, i32, i64, u8, u16, u32, u64, Complex<f32>, Complex<f64>
            );
        )+
    };
}

/// Register every built-in block for every built-in sample type
pub fn register_builtin_blocks(registry: &BlockRegistry) {
    register_for_sample_types!(
        registry,
        NullSource,
        NullSink,
        VectorSource,
        VectorSink,
        Head,
        Copy,
        TagGate,
    );
}

#[cfg(test)]
pub(crate) mod testing {
    //! Ports bound to standalone buffers, for driving `work()` directly

    use crate::runtime::buffer::{StreamConsumer, StreamProducer, stream_buffer};
    use crate::runtime::ports::{InputPort, OutputPort, PortSchema};
    use crate::runtime::sample::Sample;
    use crate::runtime::tag::Tag;

    /// An input port pre-filled with `samples` and `tags`
    ///
    /// Returns the producer half so a test can publish more later.
    pub fn input<T: Sample>(samples: &[T], tags: &[Tag]) -> (InputPort, StreamProducer<T>) {
        let (mut producer, consumer) = stream_buffer::<T>(samples.len().max(1024));
        producer.push(samples, tags).unwrap();
        let mut port = InputPort::new(PortSchema::input::<T>("in", 0));
        port.bind(Box::new(consumer));
        (port, producer)
    }

    /// An output port feeding a single buffer of `capacity`
    pub fn output<T: Sample>(capacity: usize) -> (OutputPort, StreamConsumer<T>) {
        let (producer, consumer) = stream_buffer::<T>(capacity);
        let mut port = OutputPort::new(PortSchema::output::<T>("out", 0));
        port.attach(Box::new(producer));
        (port, consumer)
    }

    pub fn drain<T: Sample>(consumer: &mut StreamConsumer<T>) -> (Vec<T>, Vec<Tag>) {
        let chunk = consumer.take(usize::MAX);
        (chunk.samples, chunk.tags)
    }
}
