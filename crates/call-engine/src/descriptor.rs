//! Scenario descriptors handed to the execution backend
//!
//! One XML document per batch: codec preferences, one `call` action per item and a final
//! `wait` action long enough for the longest call plus a grace margin.

use quick_xml::Writer;
use quick_xml::events::{BytesEnd, BytesStart, Event};
use std::io::Cursor;
use std::path::{Path, PathBuf};

use crate::config::PathsConfig;
use crate::error::{CallEngineError, Result};
use crate::types::{Batch, CallParams, RunId};

/// Seconds added to the longest call for the wait action
pub const WAIT_GRACE_SECS: u32 = 30;

/// Ringing limit applied when early media is recorded
pub const EARLY_RECORD_MAX_RINGING_SECS: u32 = 8;

/// Files belonging to one batch
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BatchArtifacts {
    pub descriptor: PathBuf,
    pub result: PathBuf,
    pub log: PathBuf,
}

impl BatchArtifacts {
    pub fn new(paths: &PathsConfig, run_id: &RunId, batch_index: usize) -> Self {
        let stem = format!("{}-{}", run_id, batch_index);
        Self {
            descriptor: paths.descriptor_dir.join(format!("{}.xml", stem)),
            result: paths.output_dir.join(format!("{}.json", stem)),
            log: paths.output_dir.join(format!("{}.log", stem)),
        }
    }
}

type XmlWriter = Writer<Cursor<Vec<u8>>>;

fn xml_error(e: impl std::fmt::Display) -> CallEngineError {
    CallEngineError::Descriptor(e.to_string())
}

/// Render the descriptor for a batch
pub fn render(batch: &Batch, reference_audio: &str) -> Result<String> {
    let mut writer = Writer::new_with_indent(Cursor::new(Vec::new()), b' ', 2);

    writer
        .write_event(Event::Start(BytesStart::new("config")))
        .map_err(xml_error)?;
    writer
        .write_event(Event::Start(BytesStart::new("actions")))
        .map_err(xml_error)?;

    codec(&mut writer, &[("disable", "all")])?;
    codec(&mut writer, &[("enable", "pcmu"), ("priority", "248")])?;
    codec(&mut writer, &[("enable", "pcma"), ("priority", "247")])?;

    let mut wait_secs = 0;
    for item in &batch.items {
        let duration = effective_duration(item);
        wait_secs = wait_secs.max(duration);
        render_call(&mut writer, item, duration, reference_audio)?;
    }

    let mut wait = BytesStart::new("action");
    wait.push_attribute(("type", "wait"));
    wait.push_attribute(("complete", "true"));
    wait.push_attribute(("ms", ((wait_secs + WAIT_GRACE_SECS) * 1000).to_string().as_str()));
    writer.write_event(Event::Empty(wait)).map_err(xml_error)?;

    writer
        .write_event(Event::End(BytesEnd::new("actions")))
        .map_err(xml_error)?;
    writer
        .write_event(Event::End(BytesEnd::new("config")))
        .map_err(xml_error)?;

    String::from_utf8(writer.into_inner().into_inner()).map_err(xml_error)
}

fn codec(writer: &mut XmlWriter, attributes: &[(&str, &str)]) -> Result<()> {
    let mut action = BytesStart::new("action");
    action.push_attribute(("type", "codec"));
    for attribute in attributes {
        action.push_attribute(*attribute);
    }
    writer.write_event(Event::Empty(action)).map_err(xml_error)?;
    Ok(())
}

/// Early-media calls hang up after one second; the ringing limit bounds them instead
fn effective_duration(item: &CallParams) -> u32 {
    if item.early_record { 1 } else { item.duration }
}

fn render_call(
    writer: &mut XmlWriter,
    item: &CallParams,
    duration: u32,
    reference_audio: &str,
) -> Result<()> {
    let caller = format!("{}@noreply.com", item.from);
    let expected = item.expected_cause_code.to_string();
    let repeat = item.repeat.to_string();
    let max_duration = (duration + 2).to_string();
    let hangup = duration.to_string();
    let max_ringing = EARLY_RECORD_MAX_RINGING_SECS.to_string();

    let mut action = BytesStart::new("action");
    action.push_attribute(("type", "call"));
    action.push_attribute(("label", item.run_id.as_str()));
    action.push_attribute(("transport", "udp"));
    action.push_attribute(("expected_cause_code", expected.as_str()));
    action.push_attribute(("caller", caller.as_str()));
    action.push_attribute(("callee", item.destination.as_str()));
    action.push_attribute(("to_uri", item.destination.as_str()));
    action.push_attribute(("repeat", repeat.as_str()));
    action.push_attribute(("username", item.username.as_str()));
    action.push_attribute(("password", item.password.as_str()));
    action.push_attribute(("max_duration", max_duration.as_str()));
    action.push_attribute(("hangup", hangup.as_str()));
    action.push_attribute(("rtp_stats", "true"));
    action.push_attribute(("record_early", if item.early_record { "true" } else { "false" }));
    if item.early_record {
        action.push_attribute(("max_ringing_duration", max_ringing.as_str()));
    }
    action.push_attribute(("play", reference_audio));

    writer.write_event(Event::Empty(action)).map_err(xml_error)?;
    Ok(())
}

/// Write the descriptor file, creating its directory if needed
pub async fn write(path: &Path, content: &str) -> std::io::Result<()> {
    if let Some(dir) = path.parent() {
        tokio::fs::create_dir_all(dir).await?;
    }
    tokio::fs::write(path, content).await
}
