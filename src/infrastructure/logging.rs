use crate::domain::settings::{LogRotation, LogSettings};
use tracing_appender::non_blocking::WorkerGuard;
use tracing_appender::rolling::{RollingFileAppender, Rotation};
use tracing_subscriber::filter::Directive;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

/// Target prefix covering the scanner, connection and coordinator modules.
pub const RADIO_TARGET: &str = "peripheral_coordinator::infrastructure::bluetooth";

pub struct LoggingGuard {
    // Dropping the guard flushes the file writer
    _guards: Vec<WorkerGuard>,
}

impl From<LogRotation> for Rotation {
    fn from(rotation: LogRotation) -> Self {
        match rotation {
            LogRotation::Daily => Rotation::DAILY,
            LogRotation::Hourly => Rotation::HOURLY,
            LogRotation::Minutely => Rotation::MINUTELY,
            LogRotation::Never => Rotation::NEVER,
        }
    }
}

/// Filter built from settings alone, plus every directive that did not parse.
pub fn configured_filter(settings: &LogSettings) -> (EnvFilter, Vec<String>) {
    let mut filter = EnvFilter::try_new(&settings.level).unwrap_or_else(|_| EnvFilter::new("info"));
    let mut rejected = Vec::new();

    let radio = settings
        .radio_level
        .as_ref()
        .map(|level| format!("{}={}", RADIO_TARGET, level));
    for directive in radio.iter().chain(settings.directives.iter()) {
        match directive.parse::<Directive>() {
            Ok(parsed) => filter = filter.add_directive(parsed),
            Err(_) => rejected.push(directive.clone()),
        }
    }
    (filter, rejected)
}

pub fn init_logger(settings: &LogSettings) -> anyhow::Result<LoggingGuard> {
    let mut guards = Vec::new();

    // RUST_LOG replaces the configured filter entirely
    let (level_filter, rejected) = match EnvFilter::try_from_default_env() {
        Ok(filter) => (filter, Vec::new()),
        Err(_) => configured_filter(settings),
    };

    let console_layer = settings.console_logging_enabled.then(|| {
        fmt::layer()
            .with_writer(std::io::stderr)
            .with_file(settings.show_file_line)
            .with_line_number(settings.show_file_line)
            .with_target(settings.show_target)
            .with_ansi(settings.ansi_colors)
    });

    let file_layer = if settings.file_logging_enabled {
        std::fs::create_dir_all(&settings.log_dir)?;
        let file_appender = RollingFileAppender::new(
            settings.rotation.into(),
            &settings.log_dir,
            &settings.file_name_prefix,
        );
        let (non_blocking, guard) = tracing_appender::non_blocking(file_appender);
        guards.push(guard);
        Some(
            fmt::layer()
                .with_writer(non_blocking)
                .with_ansi(false)
                .with_file(settings.show_file_line)
                .with_line_number(settings.show_file_line)
                .with_target(true),
        )
    } else {
        None
    };

    tracing_subscriber::registry()
        .with(level_filter)
        .with(console_layer)
        .with(file_layer)
        .try_init()?;

    for directive in rejected {
        tracing::warn!("Ignoring invalid log directive {:?}", directive);
    }
    if settings.file_logging_enabled {
        tracing::info!("Writing logs to {}", settings.log_dir.display());
    }

    Ok(LoggingGuard { _guards: guards })
}

#[cfg(test)]
mod tests {
    use super::*;
    use tracing_subscriber::filter::LevelFilter;

    #[test]
    fn test_rotation_mapping() {
        assert_eq!(Rotation::from(LogRotation::Hourly), Rotation::HOURLY);
        assert_eq!(Rotation::from(LogRotation::Never), Rotation::NEVER);
        assert_eq!(Rotation::from(LogRotation::default()), Rotation::DAILY);
    }

    #[test]
    fn test_radio_level_raises_verbosity() {
        let settings = LogSettings {
            level: "warn".into(),
            radio_level: Some("debug".into()),
            ..LogSettings::default()
        };

        let (filter, rejected) = configured_filter(&settings);

        assert!(rejected.is_empty());
        assert_eq!(filter.max_level_hint(), Some(LevelFilter::DEBUG));
    }

    #[test]
    fn test_invalid_directives_are_reported() {
        let settings = LogSettings {
            level: "info".into(),
            directives: vec!["tokio=warn".into(), "radio=loud".into()],
            ..LogSettings::default()
        };

        let (filter, rejected) = configured_filter(&settings);

        assert_eq!(rejected, vec!["radio=loud".to_string()]);
        assert_eq!(filter.max_level_hint(), Some(LevelFilter::INFO));
    }
}
