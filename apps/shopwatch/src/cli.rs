use shopwatch_config::AppConfig;
use std::path::PathBuf;

/// Command-line surface: an optional config file plus per-run overrides for
/// the two paths an operator most often wants to redirect without editing
/// config. Flags accept both `--flag value` and `--flag=value`.
#[derive(Debug, Clone, Default)]
pub struct CliArgs {
    pub config_path: Option<PathBuf>,
    pub log_path: Option<String>,
    pub checkpoint_path: Option<String>,
}

impl CliArgs {
    pub fn resolved_config_path(&self) -> PathBuf {
        shopwatch_config::resolve_config_path(self.config_path.clone())
    }

    /// Folds the override flags into a loaded config. Overrides get the same
    /// `~` expansion as paths coming from the config file.
    pub fn apply_overrides(&self, config: &mut AppConfig) {
        if let Some(log_path) = &self.log_path {
            config.source.log_path = shopwatch_config::expand_path(log_path);
        }
        if let Some(checkpoint_path) = &self.checkpoint_path {
            config.checkpoint.path = shopwatch_config::expand_path(checkpoint_path);
        }
    }
}

fn usage() {
    eprintln!(
        "usage:
  shopwatch [--config <path>] [--log-path <file>] [--checkpoint <file>]

options:
  --config <path>      configuration file (TOML)
  --log-path <file>    log file to tail, overriding the config
  --checkpoint <file>  metrics checkpoint CSV, overriding the config
"
    );
}

fn parse_args_impl(args: &[String]) -> Result<Option<CliArgs>, String> {
    let mut parsed = CliArgs::default();

    let mut idx = 0;
    while idx < args.len() {
        let (flag, inline_value) = match args[idx].split_once('=') {
            Some((flag, value)) => (flag, Some(value.to_string())),
            None => (args[idx].as_str(), None),
        };

        if matches!(flag, "-h" | "--help" | "help") {
            return Ok(None);
        }

        let flag = flag.to_string();
        let value = match inline_value {
            Some(value) => value,
            None => {
                idx += 1;
                args.get(idx)
                    .cloned()
                    .ok_or_else(|| format!("{flag} requires a value"))?
            }
        };

        match flag.as_str() {
            "--config" => parsed.config_path = Some(PathBuf::from(value)),
            "--log-path" => parsed.log_path = Some(value),
            "--checkpoint" => parsed.checkpoint_path = Some(value),
            other => return Err(format!("unrecognized argument `{other}`")),
        }
        idx += 1;
    }

    Ok(Some(parsed))
}

pub fn parse_args() -> CliArgs {
    let args: Vec<String> = std::env::args().skip(1).collect();
    match parse_args_impl(&args) {
        Ok(Some(parsed)) => parsed,
        Ok(None) => {
            usage();
            std::process::exit(0);
        }
        Err(error) => {
            eprintln!("error: {error}");
            usage();
            std::process::exit(2);
        }
    }
}
