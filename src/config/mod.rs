pub mod toml_config;

#[cfg(feature = "cli")]
pub use cli::CliConfig;

#[cfg(feature = "cli")]
mod cli {
    use chrono::NaiveDate;
    use clap::Parser;
    use std::path::PathBuf;

    #[derive(Debug, Clone, Parser)]
    #[command(name = "ehr-sync")]
    #[command(about = "Keeps a local appointment cache in sync with a remote EHR")]
    pub struct CliConfig {
        #[arg(long, short, default_value = "ehr-sync.toml")]
        pub config: PathBuf,

        #[arg(long, help = "Run a single sync, print the result as JSON and exit")]
        pub once: bool,

        #[arg(long, help = "Treat this date (YYYY-MM-DD) as today")]
        pub date: Option<NaiveDate>,

        #[arg(long, help = "Enable verbose output")]
        pub verbose: bool,

        #[arg(long, help = "Emit JSON log lines")]
        pub json_logs: bool,
    }
}
