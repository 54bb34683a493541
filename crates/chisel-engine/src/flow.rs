use std::path::PathBuf;

use chisel_contracts::events::{ArtifactSummary, EventWriter, FlowEvent, OutputSummary};

use crate::data::Data;
use crate::error::Result;
use crate::ops::Stage;

/// Stage built from a closure, for glue steps between ops.
pub struct FnStage<F> {
    name: String,
    func: F,
}

impl<F> FnStage<F>
where
    F: FnMut(Data) -> Result<Data> + Send,
{
    pub fn new(name: impl Into<String>, func: F) -> Self {
        Self {
            name: name.into(),
            func,
        }
    }
}

impl<F> Stage for FnStage<F>
where
    F: FnMut(Data) -> Result<Data> + Send,
{
    fn name(&self) -> String {
        self.name.clone()
    }

    fn call(&mut self, input: Data) -> Result<Data> {
        (self.func)(input)
    }
}

/// Runs stages in order, feeding each output into the next stage. The first
/// failure stops the flow and is returned unchanged.
#[derive(Default)]
pub struct LinearFlow {
    stages: Vec<Box<dyn Stage>>,
    events: Option<EventWriter>,
}

impl LinearFlow {
    pub fn new() -> Self {
        Self::default()
    }

    /// Records `flow_started`, `stage_finished`, `stage_failed` and
    /// `flow_finished` lines to a JSONL file.
    pub fn with_events(mut self, path: impl Into<PathBuf>) -> Self {
        let flow_id = uuid::Uuid::new_v4().to_string();
        self.events = Some(EventWriter::new(path, flow_id));
        self
    }

    pub fn events(&self) -> Option<&EventWriter> {
        self.events.as_ref()
    }

    pub fn add(&mut self, stage: impl Stage + 'static) -> &mut Self {
        self.stages.push(Box::new(stage));
        self
    }

    pub fn extend<I>(&mut self, stages: I) -> &mut Self
    where
        I: IntoIterator<Item = Box<dyn Stage>>,
    {
        self.stages.extend(stages);
        self
    }

    pub fn len(&self) -> usize {
        self.stages.len()
    }

    pub fn is_empty(&self) -> bool {
        self.stages.is_empty()
    }

    pub fn stage_names(&self) -> Vec<String> {
        self.stages.iter().map(|stage| stage.name()).collect()
    }

    pub fn call(&mut self, input: impl Into<Data>) -> Result<Data> {
        self.emit(&FlowEvent::FlowStarted {
            stages: self.stage_names(),
        });
        let mut current = input.into();
        for index in 0..self.stages.len() {
            let stage = &mut self.stages[index];
            let name = stage.name();
            tracing::debug!(stage = %name, index, "running stage");
            match stage.call(current) {
                Ok(output) => {
                    self.emit(&FlowEvent::StageFinished {
                        index,
                        stage: name,
                        output: describe(&output),
                    });
                    current = output;
                }
                Err(err) => {
                    tracing::warn!(stage = %name, index, error = %err, "stage failed");
                    self.emit(&FlowEvent::StageFailed {
                        index,
                        stage: name,
                        error: err.to_string(),
                    });
                    return Err(err);
                }
            }
        }
        self.emit(&FlowEvent::FlowFinished {
            output: describe(&current),
        });
        Ok(current)
    }

    fn emit(&self, event: &FlowEvent) {
        let Some(events) = &self.events else {
            return;
        };
        if let Err(err) = events.emit(event) {
            tracing::warn!(path = %events.path().display(), error = %err, "failed to record flow event");
        }
    }
}

fn describe(data: &Data) -> OutputSummary {
    let mut summary = OutputSummary::kind(data.kind_name());
    match data {
        Data::Result(result) => {
            summary.artifacts = result
                .iter()
                .map(|record| ArtifactSummary {
                    local_path: record.local_path.display().to_string(),
                    remote_url: record.remote_url.clone(),
                })
                .collect();
        }
        Data::List(items) => summary.len = Some(items.len()),
        Data::Text(_) | Data::Image(_) => {}
    }
    summary
}
