//! Pass-through block

use std::marker::PhantomData;

use crate::runtime::node::{Block, BlockType, WorkStatus};
use crate::runtime::{InputPort, OutputPort, PortSchema, Sample, WorkResult};

/// Forwards samples and tags unchanged
#[derive(Debug)]
pub struct Copy<T> {
    _marker: PhantomData<T>,
}

impl<T> Default for Copy<T> {
    fn default() -> Self {
        Self {
            _marker: PhantomData,
        }
    }
}

impl<T: Sample> Block for Copy<T> {
    fn description(&self) -> &str {
        "Copies input to output, tags included"
    }

    fn input_schema(&self) -> Vec<PortSchema> {
        vec![PortSchema::input::<T>("in", 0)]
    }

    fn output_schema(&self) -> Vec<PortSchema> {
        vec![PortSchema::output::<T>("out", 0)]
    }

    fn work(
        &mut self,
        inputs: &mut [InputPort],
        outputs: &mut [OutputPort],
    ) -> WorkResult<WorkStatus> {
        let mut reader = inputs[0].reader::<T>()?;
        let mut writer = outputs[0].writer::<T>()?;
        let available = reader.available();
        if available == 0 {
            return Ok(WorkStatus::InsufficientInput);
        }
        let space = writer.space();
        if space == 0 {
            return Ok(WorkStatus::InsufficientOutput);
        }

        let chunk = reader.take(available.min(space));
        writer.publish_chunk(&chunk)?;
        Ok(WorkStatus::Ok)
    }
}

impl<T: Sample> BlockType for Copy<T> {
    const TYPE_NAME: &'static str = "flowgraph::Copy";

    fn parameterization() -> String {
        T::TYPE_NAME.to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::blocks::testing;
    use crate::runtime::Tag;
    use num_complex::Complex;

    #[test]
    fn test_copies_samples_and_tags() {
        let samples = [Complex::new(1.0f32, 0.0), Complex::new(0.0, 1.0)];
        let tags = [Tag::new(1, crate::property_map! { "sync" => true })];
        let (input, _) = testing::input(&samples, &tags);
        let (output, mut out_buf) = testing::output::<Complex<f32>>(8);

        let mut copy = Copy::<Complex<f32>>::default();
        assert_eq!(copy.work(&mut [input], &mut [output]).unwrap(), WorkStatus::Ok);
        assert_eq!(testing::drain(&mut out_buf), (samples.to_vec(), tags.to_vec()));
    }

    #[test]
    fn test_splits_chunk_on_small_output() {
        let tags = [
            Tag::new(0, crate::property_map! { "first" => true }),
            Tag::new(3, crate::property_map! { "second" => true }),
        ];
        let (input, _in_buf) = testing::input::<i64>(&[0, 1, 2, 3, 4], &tags);
        let (output, mut out_buf) = testing::output::<i64>(3);
        let mut inputs = [input];
        let mut outputs = [output];
        let mut copy = Copy::<i64>::default();

        copy.work(&mut inputs, &mut outputs).unwrap();
        let (first, first_tags) = testing::drain(&mut out_buf);
        assert_eq!(first, vec![0, 1, 2]);
        assert_eq!(first_tags, vec![tags[0].clone()]);

        copy.work(&mut inputs, &mut outputs).unwrap();
        let (second, second_tags) = testing::drain(&mut out_buf);
        assert_eq!(second, vec![3, 4]);
        assert_eq!(second_tags, vec![tags[1].shifted(-3)]);
    }
}
