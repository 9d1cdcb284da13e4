use std::path::PathBuf;

use log::LevelFilter;
use log4rs::append::console::{ConsoleAppender, Target};
use log4rs::append::file::FileAppender;
use log4rs::config::{Appender, Config, Root};
use log4rs::encode::pattern::PatternEncoder;
use log4rs::Handle;

/// Console logging on stderr, plus a file appender when a log path is
/// given. Returns None (and keeps running) when setup fails.
pub fn init_logging(log_fp: Option<&PathBuf>) -> Option<Handle> {
    let stderr = ConsoleAppender::builder()
        .encoder(Box::new(PatternEncoder::new("> {m}{n}")))
        .target(Target::Stderr)
        .build();

    let mut config = Config::builder()
        .appender(Appender::builder().build("stderr", Box::new(stderr)));
    let mut root = Root::builder().appender("stderr");

    if let Some(fp) = log_fp {
        let file_appender = match FileAppender::builder()
            .encoder(Box::new(PatternEncoder::new(
                "[{d(%Y-%m-%d %H:%M:%S)}] [{l}] {m}{n}",
            )))
            .build(fp)
        {
            Ok(appender) => appender,
            Err(e) => {
                eprintln!(
                    "failed to create log file at {}, {e}",
                    fp.to_string_lossy()
                );
                return None;
            }
        };
        config = config.appender(
            Appender::builder().build("logfile", Box::new(file_appender)),
        );
        root = root.appender("logfile");
    }

    match config.build(root.build(LevelFilter::Info)) {
        Ok(config) => match log4rs::init_config(config) {
            Ok(handle) => Some(handle),
            Err(e) => {
                eprintln!("failed to initialize logging, {e}");
                None
            }
        },
        Err(e) => {
            eprintln!("failed to build logging config, {e}");
            None
        }
    }
}
