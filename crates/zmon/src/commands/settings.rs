use crate::cli::{SettingsArgs, SettingsCommand};
use crate::error::CliError;
use crate::output;

pub fn handle(args: &SettingsArgs) -> Result<(), CliError> {
    match args.command {
        SettingsCommand::Show => {
            let settings = zmon_config::load_settings()?;
            output::print_output(settings.to_toml()?.trim_end());
        }
        SettingsCommand::Path => {
            output::print_output(&zmon_config::config_path().display().to_string());
        }
    }
    Ok(())
}
