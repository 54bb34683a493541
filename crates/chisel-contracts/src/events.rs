use std::fs::OpenOptions;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

use chrono::{SecondsFormat, Utc};
use serde::Serialize;

/// One artifact as it appears in an event line.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ArtifactSummary {
    pub local_path: String,
    pub remote_url: Option<String>,
}

/// Shape of the value a stage produced, without the pixels.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct OutputSummary {
    pub kind: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub len: Option<usize>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub artifacts: Vec<ArtifactSummary>,
}

impl OutputSummary {
    pub fn kind(kind: impl Into<String>) -> Self {
        Self {
            kind: kind.into(),
            len: None,
            artifacts: Vec::new(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum FlowEvent {
    FlowStarted {
        stages: Vec<String>,
    },
    StageFinished {
        index: usize,
        stage: String,
        output: OutputSummary,
    },
    StageFailed {
        index: usize,
        stage: String,
        error: String,
    },
    FlowFinished {
        output: OutputSummary,
    },
}

#[derive(Serialize)]
struct EventLine<'a> {
    #[serde(flatten)]
    event: &'a FlowEvent,
    flow_id: &'a str,
    ts: String,
}

/// Append-only JSONL log of flow events. Each line is the event plus
/// `flow_id` and `ts`.
#[derive(Debug, Clone)]
pub struct EventWriter {
    inner: Arc<EventWriterInner>,
}

#[derive(Debug)]
struct EventWriterInner {
    path: PathBuf,
    flow_id: String,
    lock: Mutex<()>,
}

impl EventWriter {
    pub fn new(path: impl Into<PathBuf>, flow_id: impl Into<String>) -> Self {
        Self {
            inner: Arc::new(EventWriterInner {
                path: path.into(),
                flow_id: flow_id.into(),
                lock: Mutex::new(()),
            }),
        }
    }

    pub fn path(&self) -> &Path {
        &self.inner.path
    }

    pub fn flow_id(&self) -> &str {
        &self.inner.flow_id
    }

    pub fn emit(&self, event: &FlowEvent) -> anyhow::Result<()> {
        let line = serde_json::to_string(&EventLine {
            event,
            flow_id: &self.inner.flow_id,
            ts: Utc::now().to_rfc3339_opts(SecondsFormat::Millis, true),
        })?;

        if let Some(parent) = self.inner.path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let _guard = self
            .inner
            .lock
            .lock()
            .map_err(|_| anyhow::anyhow!("event log lock poisoned"))?;
        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.inner.path)?;
        writeln!(file, "{line}")?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use std::fs;

    use chrono::DateTime;
    use serde_json::{json, Value};

    use super::*;

    fn read_lines(path: &Path) -> anyhow::Result<Vec<Value>> {
        let content = fs::read_to_string(path)?;
        let mut lines = Vec::new();
        for line in content.lines() {
            lines.push(serde_json::from_str(line)?);
        }
        Ok(lines)
    }

    #[test]
    fn events_are_tagged_lines_with_flow_id_and_timestamp() -> anyhow::Result<()> {
        let temp = tempfile::tempdir()?;
        let path = temp.path().join("logs").join("flow.jsonl");
        let writer = EventWriter::new(&path, "flow-1");

        writer.emit(&FlowEvent::FlowStarted {
            stages: vec!["stable_diffusion_api.txt_to_img".to_string()],
        })?;
        writer.emit(&FlowEvent::StageFinished {
            index: 0,
            stage: "stable_diffusion_api.txt_to_img".to_string(),
            output: OutputSummary {
                kind: "result".to_string(),
                len: None,
                artifacts: vec![ArtifactSummary {
                    local_path: "/tmp/a.png".to_string(),
                    remote_url: Some("https://cdn.test/a.png".to_string()),
                }],
            },
        })?;

        let lines = read_lines(&path)?;
        assert_eq!(lines.len(), 2);
        assert_eq!(lines[0]["type"], "flow_started");
        assert_eq!(lines[0]["flow_id"], "flow-1");
        assert_eq!(lines[0]["stages"], json!(["stable_diffusion_api.txt_to_img"]));
        DateTime::parse_from_rfc3339(lines[0]["ts"].as_str().unwrap_or(""))?;

        assert_eq!(lines[1]["type"], "stage_finished");
        assert_eq!(lines[1]["index"], 0);
        assert_eq!(
            lines[1]["output"],
            json!({
                "kind": "result",
                "artifacts": [{"local_path": "/tmp/a.png", "remote_url": "https://cdn.test/a.png"}],
            })
        );
        Ok(())
    }

    #[test]
    fn summaries_omit_empty_fields() -> anyhow::Result<()> {
        let temp = tempfile::tempdir()?;
        let path = temp.path().join("flow.jsonl");
        let writer = EventWriter::new(&path, "flow-2");

        writer.emit(&FlowEvent::FlowFinished {
            output: OutputSummary::kind("text"),
        })?;
        writer.emit(&FlowEvent::StageFailed {
            index: 1,
            stage: "upscale".to_string(),
            error: "boom".to_string(),
        })?;

        let lines = read_lines(&path)?;
        assert_eq!(lines[0]["output"], json!({"kind": "text"}));
        assert_eq!(lines[1]["type"], "stage_failed");
        assert_eq!(lines[1]["error"], "boom");
        assert_eq!(writer.flow_id(), "flow-2");
        Ok(())
    }
}
