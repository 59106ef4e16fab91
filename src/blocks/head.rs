//! Pass-through that stops after a fixed number of samples

use std::marker::PhantomData;

use crate::runtime::node::{Block, BlockType, SettingDescriptor, WorkStatus};
use crate::runtime::{
    InputPort, OutputPort, PortSchema, PropertyMap, Sample, SettingsError, Value, WorkResult,
};

/// Forwards exactly `num_items` samples (with their tags), then reports `Done`
///
/// Finishing detaches the input, which in turn lets an upstream source that
/// feeds nothing else finish.
#[derive(Debug)]
pub struct Head<T> {
    num_items: u64,
    published: u64,
    _marker: PhantomData<T>,
}

impl<T> Head<T> {
    pub fn new(num_items: u64) -> Self {
        Self {
            num_items,
            published: 0,
            _marker: PhantomData,
        }
    }

    pub fn num_items(&self) -> u64 {
        self.num_items
    }

    /// Samples forwarded since the last start
    pub fn published(&self) -> u64 {
        self.published
    }
}

impl<T> Default for Head<T> {
    fn default() -> Self {
        Self::new(0)
    }
}

impl<T: Sample> Block for Head<T> {
    fn description(&self) -> &str {
        "Passes the first num_items samples, then finishes"
    }

    fn input_schema(&self) -> Vec<PortSchema> {
        vec![PortSchema::input::<T>("in", 0)]
    }

    fn output_schema(&self) -> Vec<PortSchema> {
        vec![PortSchema::output::<T>("out", 0)]
    }

    fn setting_descriptors(&self) -> Vec<SettingDescriptor> {
        vec![SettingDescriptor::new("num_items", "Number of samples to pass").fixed()]
    }

    fn settings(&self) -> PropertyMap {
        crate::property_map! { "num_items" => self.num_items }
    }

    fn set_setting(&mut self, key: &str, value: &Value) -> Result<(), SettingsError> {
        match key {
            "num_items" => {
                self.num_items = u64::try_from(value).map_err(|e| SettingsError::value(key, e))?;
                Ok(())
            }
            _ => Err(SettingsError::UnknownKey {
                block: String::new(),
                key: key.to_string(),
            }),
        }
    }

    fn start(&mut self) -> WorkResult<()> {
        self.published = 0;
        Ok(())
    }

    fn work(
        &mut self,
        inputs: &mut [InputPort],
        outputs: &mut [OutputPort],
    ) -> WorkResult<WorkStatus> {
        let remaining = self.num_items.saturating_sub(self.published);
        if remaining == 0 {
            return Ok(WorkStatus::Done);
        }

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

        let n = available.min(space).min(usize::try_from(remaining).unwrap_or(usize::MAX));
        let chunk = reader.take(n);
        writer.publish_chunk(&chunk)?;
        self.published += n as u64;

        if self.published == self.num_items {
            Ok(WorkStatus::Done)
        } else {
            Ok(WorkStatus::Ok)
        }
    }
}

impl<T: Sample> BlockType for Head<T> {
    const TYPE_NAME: &'static str = "flowgraph::Head";

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
    fn test_passes_exactly_num_items() {
        let tags = [Tag::new(1, crate::property_map! { "a" => 1i32 })];
        let (input, _in_buf) = testing::input::<i32>(&[10, 11, 12, 13, 14], &tags);
        let (output, mut out_buf) = testing::output::<i32>(16);
        let mut inputs = [input];
        let mut head = Head::<i32>::new(3);

        assert_eq!(
            head.work(&mut inputs, &mut [output]).unwrap(),
            WorkStatus::Done
        );
        let (samples, out_tags) = testing::drain(&mut out_buf);
        assert_eq!(samples, vec![10, 11, 12]);
        assert_eq!(out_tags, tags.to_vec());
        assert_eq!(inputs[0].available(), 2);
    }

    #[test]
    fn test_limited_by_output_space() {
        let (input, _in_buf) = testing::input::<u8>(&[1; 10], &[]);
        let (output, mut out_buf) = testing::output::<u8>(4);
        let mut head = Head::<u8>::new(6);
        let mut inputs = [input];
        let mut outputs = [output];

        assert_eq!(head.work(&mut inputs, &mut outputs).unwrap(), WorkStatus::Ok);
        assert_eq!(head.published(), 4);
        assert_eq!(
            head.work(&mut inputs, &mut outputs).unwrap(),
            WorkStatus::InsufficientOutput
        );
        testing::drain(&mut out_buf);
        assert_eq!(head.work(&mut inputs, &mut outputs).unwrap(), WorkStatus::Done);
        assert_eq!(head.published(), 6);
    }

    #[test]
    fn test_zero_items_is_done() {
        let (input, _in_buf) = testing::input::<f32>(&[], &[]);
        let (output, _out_buf) = testing::output::<f32>(4);
        let mut head = Head::<f32>::default();
        assert_eq!(
            head.work(&mut [input], &mut [output]).unwrap(),
            WorkStatus::Done
        );
    }
}
