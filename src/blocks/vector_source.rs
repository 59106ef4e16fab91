//! Source replaying a fixed vector of samples and tags

use crate::runtime::node::{Block, BlockType, SettingDescriptor, WorkStatus};
use crate::runtime::sample::samples_from_values;
use crate::runtime::{
    InputPort, OutputPort, PortSchema, PropertyMap, Sample, SettingsError, Tag, Value, WorkError,
    WorkResult,
};

use super::MAX_CHUNK;

/// Publishes `data` once, or forever when `repeat` is set
///
/// `tags` are indexed into `data`. With `repeat`, each tag is emitted again
/// every time its sample is.
#[derive(Debug, Default)]
pub struct VectorSource<T> {
    data: Vec<T>,
    repeat: bool,
    tags: Vec<Tag>,
    position: usize,
}

impl<T: Sample> VectorSource<T> {
    pub fn new(data: Vec<T>) -> Self {
        Self {
            data,
            repeat: false,
            tags: Vec::new(),
            position: 0,
        }
    }

    pub fn with_repeat(mut self, repeat: bool) -> Self {
        self.repeat = repeat;
        self
    }

    pub fn with_tags(mut self, tags: Vec<Tag>) -> Self {
        self.tags = tags;
        self
    }

    pub fn data(&self) -> &[T] {
        &self.data
    }

    pub fn tags(&self) -> &[Tag] {
        &self.tags
    }

    /// Copy `len` samples starting at `self.position`, wrapping if repeating
    fn next_chunk(&mut self, len: usize) -> (Vec<T>, Vec<Tag>) {
        let mut samples = Vec::with_capacity(len);
        let mut tags = Vec::new();
        while samples.len() < len {
            let start = self.position;
            let end = (start + len - samples.len()).min(self.data.len());
            let offset = samples.len() as i64 - start as i64;
            tags.extend(
                self.tags
                    .iter()
                    .filter(|t| t.index >= start as i64 && t.index < end as i64)
                    .map(|t| t.shifted(offset)),
            );
            samples.extend_from_slice(&self.data[start..end]);
            self.position = if end == self.data.len() && self.repeat {
                0
            } else {
                end
            };
        }
        (samples, tags)
    }
}

impl<T: Sample> Block for VectorSource<T> {
    fn description(&self) -> &str {
        "Publishes a vector of samples with tags, optionally repeating"
    }

    fn output_schema(&self) -> Vec<PortSchema> {
        vec![PortSchema::output::<T>("out", 0)]
    }

    fn setting_descriptors(&self) -> Vec<SettingDescriptor> {
        vec![
            SettingDescriptor::new("data", "Samples to publish").fixed(),
            SettingDescriptor::new("repeat", "Restart from the beginning after the last sample"),
            SettingDescriptor::new("tags", "Tags indexed into data").fixed(),
        ]
    }

    fn settings(&self) -> PropertyMap {
        crate::property_map! {
            "data" => Value::vector(self.data.iter().map(|s| s.to_value())),
            "repeat" => self.repeat,
            "tags" => Value::vector(self.tags.iter().map(Tag::to_value)),
        }
    }

    fn set_setting(&mut self, key: &str, value: &Value) -> Result<(), SettingsError> {
        let wrap = |e| SettingsError::value(key, e);
        match key {
            "data" => {
                self.data = samples_from_values(value.as_slice().map_err(wrap)?).map_err(wrap)?;
            }
            "repeat" => self.repeat = bool::try_from(value).map_err(wrap)?,
            "tags" => {
                self.tags = value
                    .as_slice()
                    .map_err(wrap)?
                    .iter()
                    .map(Tag::from_value)
                    .collect::<Result<_, _>>()
                    .map_err(wrap)?;
            }
            _ => {
                return Err(SettingsError::UnknownKey {
                    block: String::new(),
                    key: key.to_string(),
                });
            }
        }
        Ok(())
    }

    fn settings_changed(&mut self) -> Result<(), SettingsError> {
        let len = self.data.len() as i64;
        if let Some(tag) = self.tags.iter().find(|t| t.index < 0 || t.index >= len) {
            return Err(SettingsError::invalid(
                "tags",
                format!("tag index {} outside data of length {}", tag.index, len),
            ));
        }
        self.tags.sort_by_key(|t| t.index);
        Ok(())
    }

    fn start(&mut self) -> WorkResult<()> {
        if self.data.is_empty() {
            return Err(WorkError::BlockError("VectorSource has no data".to_string()));
        }
        self.position = 0;
        Ok(())
    }

    fn work(
        &mut self,
        _inputs: &mut [InputPort],
        outputs: &mut [OutputPort],
    ) -> WorkResult<WorkStatus> {
        if self.data.is_empty() {
            return Ok(WorkStatus::Done);
        }
        let remaining = self.data.len() - self.position;
        if !self.repeat && remaining == 0 {
            return Ok(WorkStatus::Done);
        }

        let mut writer = outputs[0].writer::<T>()?;
        let space = writer.space().min(MAX_CHUNK);
        if space == 0 {
            return Ok(WorkStatus::InsufficientOutput);
        }

        let n = if self.repeat { space } else { space.min(remaining) };
        let (samples, tags) = self.next_chunk(n);
        writer.publish_with_tags(&samples, &tags)?;

        if !self.repeat && self.position == self.data.len() {
            Ok(WorkStatus::Done)
        } else {
            Ok(WorkStatus::Ok)
        }
    }
}

impl<T: Sample> BlockType for VectorSource<T> {
    const TYPE_NAME: &'static str = "flowgraph::VectorSource";

    fn parameterization() -> String {
        T::TYPE_NAME.to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::blocks::testing;
    use crate::property_map;

    fn tag(index: i64, n: i32) -> Tag {
        Tag::new(index, property_map! { "n" => n })
    }

    #[test]
    fn test_publishes_once() {
        let (output, mut out_buf) = testing::output::<u8>(16);
        let mut source = VectorSource::new(vec![1u8, 2, 3]).with_tags(vec![tag(2, 0)]);
        source.start().unwrap();

        assert_eq!(source.work(&mut [], &mut [output]).unwrap(), WorkStatus::Done);
        assert_eq!(testing::drain(&mut out_buf), (vec![1, 2, 3], vec![tag(2, 0)]));
    }

    #[test]
    fn test_repeat_wraps_tags() {
        let (output, mut out_buf) = testing::output::<i32>(7);
        let mut source = VectorSource::new(vec![0, 1, 2])
            .with_repeat(true)
            .with_tags(vec![tag(0, 0), tag(2, 2)]);
        source.start().unwrap();

        assert_eq!(source.work(&mut [], &mut [output]).unwrap(), WorkStatus::Ok);
        let (samples, tags) = testing::drain(&mut out_buf);
        assert_eq!(samples, vec![0, 1, 2, 0, 1, 2, 0]);
        assert_eq!(
            tags,
            vec![tag(0, 0), tag(2, 2), tag(3, 0), tag(5, 2), tag(6, 0)]
        );
    }

    #[test]
    fn test_partial_writes_resume() {
        let (output, mut out_buf) = testing::output::<f64>(2);
        let mut outputs = [output];
        let mut source = VectorSource::new(vec![1.0, 2.0, 3.0]).with_tags(vec![tag(2, 9)]);
        source.start().unwrap();

        assert_eq!(source.work(&mut [], &mut outputs).unwrap(), WorkStatus::Ok);
        assert_eq!(testing::drain(&mut out_buf), (vec![1.0, 2.0], vec![]));
        assert_eq!(source.work(&mut [], &mut outputs).unwrap(), WorkStatus::Done);
        assert_eq!(testing::drain(&mut out_buf), (vec![3.0], vec![tag(0, 9)]));
    }

    #[test]
    fn test_settings_round_trip() {
        let mut source = VectorSource::<i16>::default();
        source
            .set_setting("data", &Value::vector([1i16, 2, 3]))
            .unwrap();
        source
            .set_setting("tags", &Value::vector([tag(1, 5).to_value()]))
            .unwrap();
        source.settings_changed().unwrap();
        assert_eq!(source.data(), &[1, 2, 3]);
        assert_eq!(source.settings().get("repeat"), Some(&Value::Bool(false)));

        // wrong sample type
        assert!(source.set_setting("data", &Value::vector([1i32])).is_err());
    }

    #[test]
    fn test_tag_outside_data_rejected() {
        let mut source = VectorSource::new(vec![1u8]).with_tags(vec![tag(1, 0)]);
        assert!(matches!(
            source.settings_changed(),
            Err(SettingsError::InvalidValue { .. })
        ));
    }

    #[test]
    fn test_empty_data_fails_to_start() {
        let mut source = VectorSource::<f32>::default();
        assert!(source.start().is_err());
    }
}
