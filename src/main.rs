use anyhow::Result;

use monokle::{cmd::Command, logger, logging::Logger};

fn main() -> Result<()> {
    let cmd = Command::init();

    let config = cmd.load_config()?;

    if cmd.logging {
        Logger::init(&config.settings)?;
    }

    logger!(info, "monokle start [context={:?}]", config.settings.current_context);

    let result = cmd.subcommand.clone().run(&cmd, config);

    if let Err(e) = &result {
        logger!(error, "{:#}", e);
    }

    logger!(info, "monokle end");

    result
}
