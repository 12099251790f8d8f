mod settings;

pub use settings::{
    ApplianceSettings, Command, Config, NotificationSettings, PollerSettings, Settings,
    SmtpSettings, StorageSettings, SyslogSettings, DATA_DIR_ENV, DEFAULT_LOCK_PATH,
    MIN_INTERVAL_SECS,
};
