//! Config subcommand handlers. None of these need a connection.

use std::path::PathBuf;

use serde::Serialize;

use teslemetry_config::{Config, ConfigError, config_path, save_config_to};

use crate::cli::{ConfigArgs, ConfigCommand, GlobalOpts};
use crate::error::CliError;
use crate::output;

use super::load_config;

#[derive(Debug, Serialize)]
struct Paths {
    config: PathBuf,
    settings: PathBuf,
}

fn target_path(global: &GlobalOpts) -> PathBuf {
    global.config.clone().unwrap_or_else(config_path)
}

pub fn handle(args: ConfigArgs, global: &GlobalOpts) -> Result<(), CliError> {
    match args.command {
        ConfigCommand::Show => {
            let cfg = load_config(global)?;
            let rendered = toml::to_string_pretty(&cfg).map_err(ConfigError::from)?;
            let out = output::render_single(
                &global.output,
                &cfg,
                |_| rendered.trim_end().to_owned(),
                |c| c.api_url.clone(),
            );
            output::print_output(&out, global.quiet);
            Ok(())
        }

        ConfigCommand::Path => {
            let cfg = load_config(global)?;
            let paths = Paths {
                config: target_path(global),
                settings: cfg.resolved_settings_path(),
            };
            let out = output::render_single(
                &global.output,
                &paths,
                |p| {
                    format!(
                        "Config:   {}\nSettings: {}",
                        p.config.display(),
                        p.settings.display()
                    )
                },
                |p| p.config.display().to_string(),
            );
            output::print_output(&out, global.quiet);
            Ok(())
        }

        ConfigCommand::Init { force } => {
            let path = target_path(global);
            if path.exists() && !force {
                return Err(CliError::Validation {
                    field: "config".into(),
                    reason: format!("{} already exists (use --force to overwrite)", path.display()),
                });
            }
            save_config_to(&Config::default(), &path)?;
            if !global.quiet {
                eprintln!("Wrote {}", path.display());
            }
            Ok(())
        }
    }
}
