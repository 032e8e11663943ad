use fastrace::local::LocalSpan;
use fastrace::Event;
use log::{Log, Metadata, Record};

/// A logger that writes records through the console logger and,
/// when span events are enabled, attaches each written record
/// to the current local span as an event.
pub struct SpanAwareLogger {
    console: env_logger::Logger,
    span_events: bool,
}

impl SpanAwareLogger {
    pub fn new(console: env_logger::Logger, span_events: bool) -> Self {
        Self {
            console,
            span_events,
        }
    }

    pub fn max_level(&self) -> log::LevelFilter {
        self.console.filter()
    }
}

impl Log for SpanAwareLogger {
    fn enabled(&self, metadata: &Metadata) -> bool {
        self.console.enabled(metadata)
    }

    fn log(&self, record: &Record) {
        if !self.console.matches(record) {
            return;
        }
        self.console.log(record);
        if self.span_events {
            let event = Event::new(record.level().as_str()).with_properties(|| {
                [
                    ("target", record.target().to_string()),
                    ("message", record.args().to_string()),
                ]
            });
            LocalSpan::add_event(event);
        }
    }

    fn flush(&self) {
        self.console.flush();
    }
}
