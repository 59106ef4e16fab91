//! Sink discarding everything it reads

use std::marker::PhantomData;

use tracing::debug;

use crate::runtime::node::{Block, BlockType, WorkStatus};
use crate::runtime::{InputPort, OutputPort, PortSchema, Sample, WorkResult};

#[derive(Debug)]
pub struct NullSink<T> {
    consumed: u64,
    _marker: PhantomData<T>,
}

impl<T> NullSink<T> {
    /// Samples discarded since the last start
    pub fn consumed(&self) -> u64 {
        self.consumed
    }
}

impl<T> Default for NullSink<T> {
    fn default() -> Self {
        Self {
            consumed: 0,
            _marker: PhantomData,
        }
    }
}

impl<T: Sample> Block for NullSink<T> {
    fn description(&self) -> &str {
        "Discards all input"
    }

    fn input_schema(&self) -> Vec<PortSchema> {
        vec![PortSchema::input::<T>("in", 0)]
    }

    fn start(&mut self) -> WorkResult<()> {
        self.consumed = 0;
        Ok(())
    }

    fn stop(&mut self) {
        debug!("NullSink<{}> consumed {} samples", T::TYPE_NAME, self.consumed);
    }

    fn work(
        &mut self,
        inputs: &mut [InputPort],
        _outputs: &mut [OutputPort],
    ) -> WorkResult<WorkStatus> {
        let mut reader = inputs[0].reader::<T>()?;
        let n = reader.available();
        if n == 0 {
            return Ok(WorkStatus::InsufficientInput);
        }
        reader.consume(n)?;
        self.consumed += n as u64;
        Ok(WorkStatus::Ok)
    }
}

impl<T: Sample> BlockType for NullSink<T> {
    const TYPE_NAME: &'static str = "flowgraph::NullSink";

    fn parameterization() -> String {
        T::TYPE_NAME.to_string()
    }
}
