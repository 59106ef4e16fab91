//! Pass-through that drops tags

use std::marker::PhantomData;

use tracing::trace;

use crate::runtime::node::{Block, BlockType, WorkStatus};
use crate::runtime::{InputPort, OutputPort, PortSchema, Sample, WorkResult};

/// Forwards samples unchanged and discards every tag
#[derive(Debug)]
pub struct TagGate<T> {
    _marker: PhantomData<T>,
}

impl<T> Default for TagGate<T> {
    fn default() -> Self {
        Self {
            _marker: PhantomData,
        }
    }
}

impl<T: Sample> Block for TagGate<T> {
    fn description(&self) -> &str {
        "Copies samples to output without propagating tags"
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
        if !chunk.tags.is_empty() {
            trace!("TagGate dropping {} tags", chunk.tags.len());
        }
        writer.publish(&chunk.samples)?;
        Ok(WorkStatus::Ok)
    }
}

impl<T: Sample> BlockType for TagGate<T> {
    const TYPE_NAME: &'static str = "flowgraph::TagGate";

    fn parameterization() -> String {
        T::TYPE_NAME.to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::blocks::testing;
    use crate::runtime::Tag;

    #[test]
    fn test_drops_tags() {
        let tags = [Tag::new(0, crate::property_map! { "sync" => true })];
        let (input, _) = testing::input::<u32>(&[7, 8, 9], &tags);
        let (output, mut out_buf) = testing::output::<u32>(8);

        let mut gate = TagGate::<u32>::default();
        assert_eq!(gate.work(&mut [input], &mut [output]).unwrap(), WorkStatus::Ok);
        let (samples, out_tags) = testing::drain(&mut out_buf);
        assert_eq!(samples, vec![7, 8, 9]);
        assert!(out_tags.is_empty());
    }
}
