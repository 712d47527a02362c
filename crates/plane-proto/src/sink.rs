use anyhow::{Context, Result};
use csv::{Writer, WriterBuilder};
use std::fs::{File, OpenOptions};
use std::path::Path;
use tracing::{info, warn};

use crate::telemetry::{ControlEvent, EventKind};

/// Destination for control events. Components write to whatever sink they are handed;
/// there is no global log handle.
pub trait EventSink {
    fn record(&mut self, ev: &ControlEvent) -> Result<()>;

    /// Record from the control path: a sink failure is logged, never returned.
    fn emit(&mut self, ev: ControlEvent) {
        if let Err(e) = self.record(&ev) {
            warn!("event sink: {:#}", e);
        }
    }
}

/// Mirrors events into the tracing log.
#[derive(Debug, Default)]
pub struct TracingSink;

impl EventSink for TracingSink {
    fn record(&mut self, ev: &ControlEvent) -> Result<()> {
        let axis = ev.axis.as_deref().unwrap_or("-");
        match ev.kind {
            EventKind::ParameterUnavailable | EventKind::ModeTimeout | EventKind::AxisFailed => {
                warn!("{:?} axis={} {}", ev.kind, axis, ev.msg)
            }
            _ => info!("{:?} axis={} {}", ev.kind, axis, ev.msg),
        }
        Ok(())
    }
}

/// Appends events to a CSV archive. The header row is only written to an empty file so
/// repeated runs can share one archive.
pub struct CsvSink {
    writer: Writer<File>,
}

impl CsvSink {
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(path)
            .with_context(|| format!("open csv archive {}", path.display()))?;
        let empty = file.metadata().map(|m| m.len() == 0).unwrap_or(true);

        let writer = WriterBuilder::new().has_headers(empty).from_writer(file);
        info!("event archive: {}", path.display());
        Ok(Self { writer })
    }
}

impl EventSink for CsvSink {
    fn record(&mut self, ev: &ControlEvent) -> Result<()> {
        self.writer.serialize(ev).context("csv serialize")?;
        self.writer.flush().context("csv flush")?;
        Ok(())
    }
}

/// Collects events in memory.
#[derive(Debug, Default)]
pub struct MemorySink {
    pub events: Vec<ControlEvent>,
}

impl MemorySink {
    pub fn kinds(&self) -> Vec<EventKind> {
        self.events.iter().map(|e| e.kind).collect()
    }
}

impl EventSink for MemorySink {
    fn record(&mut self, ev: &ControlEvent) -> Result<()> {
        self.events.push(ev.clone());
        Ok(())
    }
}

/// Writes every event to each inner sink. A failing sink is logged and skipped so
/// archiving problems never stop the control path.
#[derive(Default)]
pub struct FanoutSink {
    sinks: Vec<Box<dyn EventSink + Send>>,
}

impl FanoutSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, sink: impl EventSink + Send + 'static) -> Self {
        self.sinks.push(Box::new(sink));
        self
    }
}

impl EventSink for FanoutSink {
    fn record(&mut self, ev: &ControlEvent) -> Result<()> {
        for s in &mut self.sinks {
            if let Err(e) = s.record(ev) {
                warn!("event sink failed: {:#}", e);
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn csv_archive_writes_header_once() {
        let path = std::env::temp_dir().join(format!("planectl-sink-{}.csv", std::process::id()));
        let _ = std::fs::remove_file(&path);

        {
            let mut sink = CsvSink::open(&path).unwrap();
            sink.record(&ControlEvent::new(EventKind::Status, "first").mode("ACRO")).unwrap();
        }
        {
            let mut sink = CsvSink::open(&path).unwrap();
            sink.record(&ControlEvent::new(EventKind::OverrideApplied, "second").pwm([Some(1300), None, None, None]))
                .unwrap();
        }

        let text = std::fs::read_to_string(&path).unwrap();
        let _ = std::fs::remove_file(&path);
        let lines: Vec<&str> = text.lines().collect();
        assert_eq!(lines.len(), 3);
        assert!(lines[0].starts_with("ts_unix_ms,kind,axis"));
        assert!(lines[1].contains("Status"));
        assert!(lines[2].contains("1300"));
    }

    struct Failing;
    impl EventSink for Failing {
        fn record(&mut self, _ev: &ControlEvent) -> Result<()> {
            anyhow::bail!("disk full")
        }
    }

    #[test]
    fn emit_records_and_swallows_sink_errors() {
        let mut mem = MemorySink::default();
        mem.emit(ControlEvent::new(EventKind::Status, "ok"));
        assert_eq!(mem.kinds(), vec![EventKind::Status]);

        let sink: &mut dyn EventSink = &mut Failing;
        sink.emit(ControlEvent::new(EventKind::AxisFailed, "dropped"));
    }

    #[test]
    fn fanout_reaches_every_sink() {
        let mut fan = FanoutSink::new().with(Failing).with(TracingSink);
        assert!(fan.record(&ControlEvent::new(EventKind::Status, "x")).is_ok());
    }
}
