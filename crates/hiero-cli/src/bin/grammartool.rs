use clap::{Parser, Subcommand};

use hiero_cli::commands::{config_ops, grammar_ops};

#[derive(Parser)]
#[command(name = "grammartool", about = "Grammar and settings utilities")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Compile a text grammar to the binary format
    Compile {
        /// Text grammar (LHS ||| SOURCE ||| TARGET ||| SCORES)
        input_file: String,
        /// Output binary file
        output_file: String,
    },
    /// Show grammar statistics (format auto-detected by magic bytes)
    Info {
        /// Grammar file, text or compiled
        file: String,
    },
    /// Print a grammar in text form
    Dump {
        /// Grammar file, text or compiled
        file: String,
    },
    /// Export default settings as TOML
    SettingsExport,
    /// Validate a settings TOML file
    SettingsValidate {
        /// Path to the TOML file
        file: String,
    },
}

fn main() {
    let cli = Cli::parse();

    match cli.command {
        Command::Compile {
            input_file,
            output_file,
        } => grammar_ops::compile(&input_file, &output_file),
        Command::Info { file } => grammar_ops::info(&file),
        Command::Dump { file } => grammar_ops::dump(&file),
        Command::SettingsExport => config_ops::settings_export(),
        Command::SettingsValidate { file } => config_ops::settings_validate(&file),
    }
}
