use chrono::Local;
use log::{max_level, Level, LevelFilter, Metadata, Record, SetLoggerError};

const LOGGER_NAME: &str = "ai_proxy";
const RESET: &str = "\x1b[0m";

pub struct StdLogger;

impl StdLogger {
    fn color(level: Level) -> &'static str {
        match level {
            Level::Error => "\x1b[31;20m",
            Level::Warn => "\x1b[33;20m",
            Level::Info | Level::Debug | Level::Trace => "\x1b[38;20m",
        }
    }

    fn render(level: Level, timestamp: &str, message: &str) -> String {
        format!(
            "{0}{1} - {2} - {3} - {4}{5}",
            StdLogger::color(level),
            timestamp,
            LOGGER_NAME,
            level,
            message,
            RESET
        )
    }
}

impl log::Log for StdLogger {
    fn enabled(&self, metadata: &Metadata) -> bool {
        metadata.level() <= max_level()
    }

    fn log(&self, record: &Record) {
        if self.enabled(record.metadata()) {
            let time_str = Local::now().format("%Y-%m-%d %H:%M:%S").to_string();
            println!("{}", StdLogger::render(record.level(), &time_str, &record.args().to_string()))
        }
    }

    fn flush(&self) {}
}

static LOGGER: StdLogger = StdLogger;

pub fn init(level: LevelFilter) -> Result<(), SetLoggerError> {
    log::set_logger(&LOGGER).map(|()| log::set_max_level(level))
}
