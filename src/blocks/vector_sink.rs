//! Sink collecting samples and tags into memory

use tracing::debug;

use crate::runtime::node::{Block, BlockType, SettingDescriptor, WorkStatus};
use crate::runtime::{
    InputPort, OutputPort, PortSchema, PropertyMap, Sample, SettingsError, Tag, Value, WorkResult,
};

/// Stores every sample it reads, and every tag with its absolute offset
#[derive(Debug, Default)]
pub struct VectorSink<T> {
    data: Vec<T>,
    tags: Vec<Tag>,
    reserve_items: u64,
}

impl<T: Sample> VectorSink<T> {
    pub fn new() -> Self {
        Self::default()
    }

    /// Samples received since the last start
    pub fn data(&self) -> &[T] {
        &self.data
    }

    /// Tags received since the last start, indexed into `data()`
    pub fn tags(&self) -> &[Tag] {
        &self.tags
    }
}

impl<T: Sample> Block for VectorSink<T> {
    fn description(&self) -> &str {
        "Collects samples and tags into memory"
    }

    fn input_schema(&self) -> Vec<PortSchema> {
        vec![PortSchema::input::<T>("in", 0)]
    }

    fn setting_descriptors(&self) -> Vec<SettingDescriptor> {
        vec![SettingDescriptor::new("reserve_items", "Capacity to preallocate").fixed()]
    }

    fn settings(&self) -> PropertyMap {
        crate::property_map! { "reserve_items" => self.reserve_items }
    }

    fn set_setting(&mut self, key: &str, value: &Value) -> Result<(), SettingsError> {
        match key {
            "reserve_items" => {
                self.reserve_items =
                    u64::try_from(value).map_err(|e| SettingsError::value(key, e))?;
                Ok(())
            }
            _ => Err(SettingsError::UnknownKey {
                block: String::new(),
                key: key.to_string(),
            }),
        }
    }

    fn start(&mut self) -> WorkResult<()> {
        self.data.clear();
        self.tags.clear();
        self.data
            .reserve(usize::try_from(self.reserve_items).unwrap_or(0));
        Ok(())
    }

    fn stop(&mut self) {
        debug!(
            "VectorSink<{}> collected {} samples, {} tags",
            T::TYPE_NAME,
            self.data.len(),
            self.tags.len()
        );
    }

    fn work(
        &mut self,
        inputs: &mut [InputPort],
        _outputs: &mut [OutputPort],
    ) -> WorkResult<WorkStatus> {
        let mut reader = inputs[0].reader::<T>()?;
        let chunk = reader.take_all();
        if chunk.is_empty() {
            return Ok(WorkStatus::InsufficientInput);
        }
        let offset = self.data.len() as i64;
        self.tags
            .extend(chunk.tags.iter().map(|tag| tag.shifted(offset)));
        self.data.extend_from_slice(&chunk.samples);
        Ok(WorkStatus::Ok)
    }
}

impl<T: Sample> BlockType for VectorSink<T> {
    const TYPE_NAME: &'static str = "flowgraph::VectorSink";

    fn parameterization() -> String {
        T::TYPE_NAME.to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::blocks::testing;
    use crate::property_map;

    #[test]
    fn test_tags_get_absolute_offsets() {
        let (input, mut producer) = testing::input::<u64>(&[1, 2], &[]);
        let mut inputs = [input];
        let mut sink = VectorSink::<u64>::new();
        sink.start().unwrap();

        assert_eq!(sink.work(&mut inputs, &mut []).unwrap(), WorkStatus::Ok);
        producer
            .push(&[3, 4, 5], &[Tag::new(1, property_map! { "k" => 1i32 })])
            .unwrap();
        assert_eq!(sink.work(&mut inputs, &mut []).unwrap(), WorkStatus::Ok);

        assert_eq!(sink.data(), &[1, 2, 3, 4, 5]);
        assert_eq!(sink.tags()[0].index, 3);
        assert_eq!(
            sink.work(&mut inputs, &mut []).unwrap(),
            WorkStatus::InsufficientInput
        );
        assert_eq!(inputs[0].available(), 0);
    }
}
