//! # Cli
//!
//! Argument parsing for the inspirec driver.

use clap::{Parser, ValueEnum};

/// Struct containing the CLI configuration for inspirec.
#[derive(Parser, Debug)]
#[command(author, version, about)]
pub struct Cli {
    /// The serialized source ASTs (.ast.json) to convert.
    #[arg(required = true)]
    pub files: Vec<std::path::PathBuf>,

    /// Include search paths handed to the front end setup.
    #[arg(short = 'I', long = "include-path")]
    pub include_paths: Vec<std::path::PathBuf>,

    /// Preprocessor definitions handed to the front end setup.
    #[arg(short = 'D', long = "define")]
    pub definitions: Vec<String>,

    /// Names matching any of these patterns are kept as opaque externals.
    #[arg(long = "intercept")]
    pub intercept: Vec<String>,

    /// Directories with substitute headers for named system ones.
    #[arg(long = "kidnap-header")]
    pub kidnapped_headers: Vec<std::path::PathBuf>,

    /// Dump the pretty-printed IR of each converted unit.
    #[arg(long)]
    pub dump_ir: bool,

    /// The path the emitted target type fragments are written to.
    #[arg(short, long)]
    pub output: Option<std::path::PathBuf>,

    /// Specify the log level of the driver.
    #[arg(value_enum, short, long, default_value_t = LogLevel::default())]
    pub verbosity: LogLevel,
}

impl Cli {
    pub fn init() -> Self {
        Cli::parse()
    }
}

/// Enum for specifying the log level of inspirec.
#[derive(ValueEnum, Clone, Default, Debug)]
pub enum LogLevel {
    /// The default log level. Only critical errors will be logged.
    #[default]
    #[value(alias("0"))]
    Error,

    /// Also log warnings, e.g. return-type deductions falling back to
    /// unit.
    #[value(alias("1"))]
    Warn,

    /// Log information about the general state of the driver, e.g. which
    /// units are converted.
    #[value(alias("2"))]
    Info,

    /// Log internals like recursion component sizes.
    #[value(alias("3"))]
    Debug,

    /// Log everything, including per-node analysis steps.
    #[value(alias("4"))]
    Trace,
}

impl From<&LogLevel> for log::Level {
    fn from(value: &LogLevel) -> Self {
        match value {
            LogLevel::Error => log::Level::Error,
            LogLevel::Warn => log::Level::Warn,
            LogLevel::Info => log::Level::Info,
            LogLevel::Debug => log::Level::Debug,
            LogLevel::Trace => log::Level::Trace,
        }
    }
}
