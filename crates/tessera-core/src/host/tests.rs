#![cfg(test)]

use std::sync::{Arc, Mutex};

use crate::host::{CommandSink, HostInfo, LogSink, MemoryCommandSink, PluginLogger};

#[test]
fn host_info_parses_version() {
    let host = HostInfo::new("tessera", "1.2.3").unwrap();
    assert_eq!(host.version.major, 1);
    assert_eq!(format!("{}", host), "tessera v1.2.3");

    assert!(HostInfo::new("tessera", "1.2").is_err());
}

#[test]
fn memory_sink_tracks_registrations_per_plugin() {
    let sink = MemoryCommandSink::new();
    sink.register_command("clock", "clock.show", "Show time");
    sink.register_command("clock", "clock.zone", "Set zone");
    sink.register_command("timer", "timer.start", "Start timer");
    assert_eq!(sink.snapshot().len(), 3);

    sink.unregister_plugin("clock");
    let remaining = sink.snapshot();
    assert_eq!(remaining.len(), 1);
    assert_eq!(remaining[0].plugin_id, "timer");
}

#[derive(Default)]
struct RecordingLogSink {
    lines: Mutex<Vec<(String, log::Level, String)>>,
}

impl LogSink for RecordingLogSink {
    fn log(&self, plugin_id: &str, level: log::Level, message: &str) {
        self.lines
            .lock()
            .unwrap()
            .push((plugin_id.to_string(), level, message.to_string()));
    }
}

#[test]
fn plugin_logger_tags_messages_with_the_plugin_id() {
    let sink = Arc::new(RecordingLogSink::default());
    let logger = PluginLogger::new("clock", sink.clone());

    logger.info("started");
    logger.warn("slow tick");
    logger.error("lost the time");

    let lines = sink.lines.lock().unwrap();
    assert_eq!(lines.len(), 3);
    assert_eq!(lines[0], ("clock".to_string(), log::Level::Info, "started".to_string()));
    assert_eq!(lines[1].1, log::Level::Warn);
    assert_eq!(lines[2].1, log::Level::Error);
}
