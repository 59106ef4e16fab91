//! Source producing default-valued samples forever

use std::marker::PhantomData;

use tracing::debug;

use super::MAX_CHUNK;
use crate::runtime::node::{Block, BlockType, WorkStatus};
use crate::runtime::{InputPort, OutputPort, PortSchema, Sample, WorkResult};

/// Writes `T::default()` as fast as downstream accepts it
///
/// Never finishes on its own. Stops when every reader detaches or the
/// flowgraph is stopped.
#[derive(Debug)]
pub struct NullSource<T> {
    produced: u64,
    _marker: PhantomData<T>,
}

impl<T> NullSource<T> {
    pub fn produced(&self) -> u64 {
        self.produced
    }
}

impl<T> Default for NullSource<T> {
    fn default() -> Self {
        Self {
            produced: 0,
            _marker: PhantomData,
        }
    }
}

impl<T: Sample> Block for NullSource<T> {
    fn description(&self) -> &str {
        "Produces default-valued samples without end"
    }

    fn output_schema(&self) -> Vec<PortSchema> {
        vec![PortSchema::output::<T>("out", 0)]
    }

    fn start(&mut self) -> WorkResult<()> {
        self.produced = 0;
        Ok(())
    }

    fn stop(&mut self) {
        debug!("NullSource<{}> produced {} samples", T::TYPE_NAME, self.produced);
    }

    fn work(
        &mut self,
        _inputs: &mut [InputPort],
        outputs: &mut [OutputPort],
    ) -> WorkResult<WorkStatus> {
        let mut writer = outputs[0].writer::<T>()?;
        let n = writer.space().min(MAX_CHUNK);
        if n == 0 {
            return Ok(WorkStatus::InsufficientOutput);
        }
        writer.publish(&vec![T::default(); n])?;
        self.produced += n as u64;
        Ok(WorkStatus::Ok)
    }
}

impl<T: Sample> BlockType for NullSource<T> {
    const TYPE_NAME: &'static str = "flowgraph::NullSource";

    fn parameterization() -> String {
        T::TYPE_NAME.to_string()
    }
}
