use std::collections::BTreeSet;

use flowgraph::blocks::Copy;
use flowgraph::runtime::ReadChunk;
use flowgraph::runtime::buffer::stream_buffer;
use flowgraph::{Graph, Scheduler, Tag, VectorSink, VectorSource, property_map};
use proptest::prelude::*;

fn tags_at(indices: &BTreeSet<usize>) -> Vec<Tag> {
    indices
        .iter()
        .map(|&i| Tag::new(i as i64, property_map! { "at" => i as u64 }))
        .collect()
}

/// Check tag order and placement in a chunk, collecting the tagged positions
fn check_chunk(chunk: ReadChunk<u64>, delivered: &mut Vec<u64>) -> Result<(), TestCaseError> {
    let mut previous = 0;
    for tag in &chunk.tags {
        prop_assert!(tag.index >= previous);
        previous = tag.index;
        let at = u64::try_from(tag.map.get("at").unwrap()).unwrap();
        prop_assert_eq!(chunk.samples[tag.index as usize], at);
        delivered.push(at);
    }
    Ok(())
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(48))]

    /// Consuming n samples shifts every retained tag down by n
    #[test]
    fn consume_rebases_tags(
        len in 1usize..200,
        picks in prop::collection::btree_set(0usize..200, 0..20),
        steps in prop::collection::vec(1usize..50, 1..10),
    ) {
        let indices: BTreeSet<usize> = picks.into_iter().filter(|&i| i < len).collect();
        let samples: Vec<u32> = (0..len as u32).collect();
        let (mut producer, mut consumer) = stream_buffer::<u32>(len);
        producer.push(&samples, &tags_at(&indices)).unwrap();

        let mut consumed = 0;
        for step in steps {
            let n = step.min(len - consumed);
            let chunk = consumer.peek(len);
            for tag in &chunk.tags {
                prop_assert!(tag.index >= 0);
                let absolute = tag.index as usize + consumed;
                prop_assert!(indices.contains(&absolute));
                prop_assert_eq!(chunk.samples[tag.index as usize], absolute as u32);
            }
            let expected = indices.iter().filter(|&&i| i >= consumed).count();
            prop_assert_eq!(chunk.tags.len(), expected);

            consumer.consume(n).unwrap();
            consumed += n;
        }
    }

    /// Tags pushed while the reader is consuming, late tags included, land on
    /// the sample they name or are dropped once that sample has been read
    #[test]
    fn interleaved_late_tags(
        steps in prop::collection::vec(
            (0usize..12, prop::collection::vec(-10i64..12, 0..4), 0usize..12),
            1..12,
        ),
    ) {
        let (mut producer, mut consumer) = stream_buffer::<u64>(32);
        let mut written = 0i64;
        let mut read = 0i64;
        let mut expected = Vec::new();
        let mut delivered = Vec::new();

        for (count, offsets, take) in steps {
            let count = count.min(32 - (written - read) as usize);
            let samples: Vec<u64> = (written..written + count as i64).map(|i| i as u64).collect();
            let tags: Vec<Tag> = offsets
                .iter()
                .map(|&r| Tag::new(r, property_map! { "at" => (written + r).max(0) as u64 }))
                .collect();
            for &r in &offsets {
                if r < count as i64 && written + r >= read {
                    expected.push((written + r) as u64);
                }
            }
            producer.push(&samples, &tags).unwrap();
            written += count as i64;

            let chunk = consumer.take(take);
            read += chunk.samples.len() as i64;
            check_chunk(chunk, &mut delivered)?;
        }
        check_chunk(consumer.take(usize::MAX), &mut delivered)?;

        expected.sort_unstable();
        delivered.sort_unstable();
        prop_assert_eq!(delivered, expected);
    }

    /// A Copy between source and sink preserves samples, tags and offsets
    #[test]
    fn pass_through_preserves_tags(
        len in 1usize..300,
        picks in prop::collection::btree_set(0usize..300, 0..30),
        buffer_size in 1usize..64,
    ) {
        let indices: BTreeSet<usize> = picks.into_iter().filter(|&i| i < len).collect();
        let data: Vec<i16> = (0..len).map(|i| (i as i16).wrapping_mul(7)).collect();
        let tags = tags_at(&indices);

        let mut graph = Graph::new();
        let source = graph
            .add_block(VectorSource::new(data.clone()).with_tags(tags.clone()))
            .unwrap();
        let copy = graph.add_block(Copy::<i16>::default()).unwrap();
        let sink = graph.add_block(VectorSink::<i16>::new()).unwrap();
        graph.connect_with_buffer(source, "out", copy, "in", buffer_size).unwrap();
        graph.connect_with_buffer(copy, "out", sink, "in", buffer_size).unwrap();

        let mut scheduler = Scheduler::single_threaded(graph);
        scheduler.run_and_wait().unwrap();

        let sink = scheduler.graph().block_as::<VectorSink<i16>>(sink).unwrap();
        prop_assert_eq!(sink.data(), data.as_slice());
        prop_assert_eq!(sink.tags(), tags.as_slice());
    }
}
