//! Console sink
//!
//! Writes one line per event. `Error` and `Fatal` go to stderr, everything
//! else to stdout. Level labels are colored when the `console` feature is
//! enabled and colors are requested.

use super::format::{format_text, OutputFormat, TimestampFormat};
use super::Sink;
use crate::core::error::Result;
use crate::core::log_event::LogEvent;
use crate::core::log_level::LogLevel;
use std::io::Write;
use std::sync::Arc;

pub struct ConsoleSink {
    use_colors: bool,
    timestamp_format: TimestampFormat,
    output_format: OutputFormat,
}

impl ConsoleSink {
    pub fn new() -> Self {
        Self {
            use_colors: cfg!(feature = "console"),
            timestamp_format: TimestampFormat::default(),
            output_format: OutputFormat::default(),
        }
    }

    pub fn with_colors(use_colors: bool) -> Self {
        Self {
            use_colors,
            ..Self::new()
        }
    }

    /// # Example
    ///
    /// ```
    /// use rust_structured_logger::sinks::{ConsoleSink, OutputFormat};
    ///
    /// let sink = ConsoleSink::new().with_output_format(OutputFormat::Json);
    /// ```
    #[must_use]
    pub fn with_output_format(mut self, format: OutputFormat) -> Self {
        self.output_format = format;
        self
    }

    #[must_use]
    pub fn with_timestamp_format(mut self, format: TimestampFormat) -> Self {
        self.timestamp_format = format;
        self
    }

    /// Use a strftime pattern for timestamps
    #[must_use]
    pub fn with_custom_timestamp(mut self, pattern: &str) -> Self {
        self.timestamp_format = TimestampFormat::Custom(pattern.to_string());
        self
    }

    /// The line that `emit` would write for `event`
    pub fn format_event(&self, event: &LogEvent) -> String {
        match self.output_format {
            OutputFormat::Text => format_text(event, &self.timestamp_format, &self.level_label(event.level())),
            OutputFormat::Json | OutputFormat::Logfmt => {
                self.output_format.format(event, &self.timestamp_format)
            }
        }
    }

    #[cfg(feature = "console")]
    fn level_label(&self, level: LogLevel) -> String {
        use colored::Colorize;
        let label = format!("{:5}", level.to_str());
        if self.use_colors {
            label.color(level.color_code()).to_string()
        } else {
            label
        }
    }

    #[cfg(not(feature = "console"))]
    fn level_label(&self, level: LogLevel) -> String {
        let _ = self.use_colors;
        format!("{:5}", level.to_str())
    }
}

impl Default for ConsoleSink {
    fn default() -> Self {
        Self::new()
    }
}

impl Sink for ConsoleSink {
    fn emit(&self, event: &Arc<LogEvent>) -> Result<()> {
        let line = self.format_event(event);
        match event.level() {
            LogLevel::Error | LogLevel::Fatal => writeln!(std::io::stderr().lock(), "{}", line)?,
            _ => writeln!(std::io::stdout().lock(), "{}", line)?,
        }
        Ok(())
    }

    fn flush(&self) -> Result<()> {
        std::io::stdout().flush()?;
        std::io::stderr().flush()?;
        Ok(())
    }

    fn name(&self) -> &str {
        "console"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::property::Property;
    use crate::template::ParsedTemplate;
    use chrono::Utc;

    fn event(level: LogLevel) -> LogEvent {
        LogEvent::new(
            Utc::now(),
            level,
            Arc::new(ParsedTemplate::parse("User {Name} signed in")),
            vec![Property::new("Name", "alice")],
        )
    }

    #[test]
    fn test_plain_text_line() {
        let sink = ConsoleSink::with_colors(false).with_custom_timestamp("%Y");
        let line = sink.format_event(&event(LogLevel::Info));
        assert!(line.ends_with("[INFO ] User alice signed in"), "{}", line);
    }

    #[test]
    fn test_json_line() {
        let sink = ConsoleSink::with_colors(false).with_output_format(OutputFormat::Json);
        let line = sink.format_event(&event(LogLevel::Warn));
        let parsed: serde_json::Value = serde_json::from_str(&line).unwrap();
        assert_eq!(parsed["Name"], "alice");
        assert_eq!(parsed["level"], "WARN");
    }

    #[test]
    fn test_emit_writes_without_error() {
        let sink = ConsoleSink::with_colors(false);
        sink.emit(&Arc::new(event(LogLevel::Info))).unwrap();
        sink.emit(&Arc::new(event(LogLevel::Error))).unwrap();
        sink.flush().unwrap();
    }
}
