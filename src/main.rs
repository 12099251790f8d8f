use anyhow::Result;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use licmon_core::api::LicenseMonitorBuilder;
use licmon_core::config::{Command, Config, Settings};

mod commands;

#[tokio::main]
async fn main() -> Result<()> {
    // Parse CLI arguments
    let cli = Config::parse_args();

    // Setup logging
    setup_logging(cli.debug);

    // Load settings
    let mut settings = Settings::load(cli.config.as_ref())?;
    settings.merge_cli(&cli);
    settings.validate();

    let command = cli.command();
    if matches!(command, Command::Run | Command::Fetch) {
        settings.require_appliance()?;
    }

    let interval = settings.poller.interval_secs;
    let mut builder = LicenseMonitorBuilder::new(settings);
    if cli.interval.is_some() {
        builder = builder.with_interval(interval);
    }
    let monitor = builder.build()?;
    match command {
        Command::Run => commands::run(&monitor).await,
        Command::Fetch => commands::fetch(&monitor).await,
        Command::History { limit } => commands::history(&monitor, limit),
        Command::Status => commands::status(&monitor),
        Command::TestAlert { entity, channel } => {
            commands::test_alert(&monitor, &entity, channel).await
        }
    }
}

fn setup_logging(debug: bool) {
    let filter = if debug {
        EnvFilter::new("licmon=debug,licmon_core=debug")
    } else {
        EnvFilter::new("licmon=info,licmon_core=info")
    };

    tracing_subscriber::registry()
        .with(filter)
        .with(tracing_subscriber::fmt::layer().with_target(false))
        .init();
}
