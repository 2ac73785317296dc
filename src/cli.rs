use crate::config::DEFAULT_CONFIG_PATH;
use crate::logging;
use crate::mapping::generate;
use crate::run;
use anyhow::Result;
use clap::{CommandFactory, Parser, Subcommand};
use clap_complete::Shell;
use std::fs;
use std::io;
use std::path::PathBuf;

#[derive(Parser, Debug)]
#[command(name = "kobo-dhis2-sync", version)]
#[command(
    about = "Push KoboToolbox submissions into a DHIS2 tracker program",
    long_about = "kobo-dhis2-sync reads a KoboToolbox extract from the data lake, builds one DHIS2 tracker event per submission, submits it, waits for the import job, and keeps a persistent index of which submissions already reached DHIS2."
)]
#[command(arg_required_else_help = true)]
#[command(after_long_help = "Examples:
  kobo-dhis2-sync sync --config kobo-dhis2-sync.toml
  kobo-dhis2-sync sync --init-index --log-file sync.log
  kobo-dhis2-sync runs
  kobo-dhis2-sync inspect --run <RUN_ID>
  kobo-dhis2-sync completion zsh > ~/.zsh/completions/_kobo-dhis2-sync
  kobo-dhis2-sync man > kobo-dhis2-sync.1")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    #[command(
        about = "Sync the source extract into DHIS2",
        long_about = "Download the source extract and the event index, upload every pending row as a tracker event, flag index entries missing from the extract as deleted, and save the index back."
    )]
    #[command(after_long_help = "Examples:
  kobo-dhis2-sync sync
  kobo-dhis2-sync sync --config /etc/kobo-dhis2-sync.toml --log events.ndjson
  kobo-dhis2-sync sync --init-index")]
    Sync {
        #[arg(
            long,
            value_name = "PATH",
            default_value = DEFAULT_CONFIG_PATH,
            help = "Path to the TOML config file"
        )]
        config: PathBuf,
        #[arg(
            long,
            value_name = "PATH",
            help = "Path to the run journal (default: $XDG_STATE_HOME/kobo-dhis2-sync/journal.db)"
        )]
        state_db: Option<PathBuf>,
        #[arg(long, value_name = "PATH", help = "Write NDJSON event log to file")]
        log: Option<PathBuf>,
        #[arg(long, value_name = "PATH", help = "Also append human-readable logs to file")]
        log_file: Option<PathBuf>,
        #[arg(long, help = "Start from an empty index when none exists yet")]
        init_index: bool,
    },
    #[command(
        about = "Build the data-element mapping table from DHIS2 metadata",
        long_about = "Combine a column -> data element file, an option-set value mapping file and a DHIS2 program metadata export into the mapping table read by `sync`."
    )]
    #[command(arg_required_else_help = true)]
    #[command(after_long_help = "Example:
  kobo-dhis2-sync generate-mapping --data-elements mapping_de.json \\
    --option-sets mapping_optionSet.json --metadata program_metadata.json \\
    --program-id Nep6qUpNTNn --program-name \"SIPCA OCBA\" --output mapping_generated.json")]
    GenerateMapping {
        #[arg(long, value_name = "PATH", help = "Source column -> data element UID file")]
        data_elements: PathBuf,
        #[arg(long, value_name = "PATH", help = "Option-set UID -> value mapping file")]
        option_sets: PathBuf,
        #[arg(long, value_name = "PATH", help = "DHIS2 program metadata export")]
        metadata: PathBuf,
        #[arg(long, value_name = "UID", help = "DHIS2 program UID")]
        program_id: String,
        #[arg(long, value_name = "NAME", help = "DHIS2 program name")]
        program_name: String,
        #[arg(long, value_name = "PATH", help = "Where to write the mapping table")]
        output: PathBuf,
    },
    #[command(about = "List recorded sync runs")]
    #[command(after_long_help = "Example:
  kobo-dhis2-sync runs")]
    Runs {
        #[arg(
            long,
            value_name = "PATH",
            help = "Path to the run journal (default: $XDG_STATE_HOME/kobo-dhis2-sync/journal.db)"
        )]
        state_db: Option<PathBuf>,
    },
    #[command(about = "Show a run's summary and the rows it left pending")]
    #[command(arg_required_else_help = true)]
    #[command(after_long_help = "Example:
  kobo-dhis2-sync inspect --run <RUN_ID>")]
    Inspect {
        #[arg(long, value_name = "RUN_ID", help = "Run ID to inspect")]
        run: String,
        #[arg(
            long,
            value_name = "PATH",
            help = "Path to the run journal (default: $XDG_STATE_HOME/kobo-dhis2-sync/journal.db)"
        )]
        state_db: Option<PathBuf>,
    },
    #[command(
        about = "Generate shell completion script",
        long_about = "Generate shell completion script for your shell. Redirect output to your shell completion directory."
    )]
    #[command(arg_required_else_help = true)]
    #[command(after_long_help = "Examples:
  kobo-dhis2-sync completion bash > ~/.local/share/bash-completion/completions/kobo-dhis2-sync
  kobo-dhis2-sync completion fish > ~/.config/fish/completions/kobo-dhis2-sync.fish")]
    Completion {
        #[arg(value_enum, value_name = "SHELL", help = "Target shell")]
        shell: Shell,
    },
    #[command(
        about = "Generate a man page",
        long_about = "Generate a roff man page for kobo-dhis2-sync."
    )]
    #[command(after_long_help = "Examples:
  kobo-dhis2-sync man > kobo-dhis2-sync.1
  kobo-dhis2-sync man --output docs/kobo-dhis2-sync.1")]
    Man {
        #[arg(
            long,
            value_name = "PATH",
            help = "Write man page to file (stdout when omitted)"
        )]
        output: Option<PathBuf>,
    },
}

pub fn run() -> Result<()> {
    let cli = Cli::parse();
    match cli.command {
        Commands::Sync {
            config,
            state_db,
            log,
            log_file,
            init_index,
        } => {
            logging::init_tracing(log_file.as_deref())?;
            run::execute_sync(run::SyncCommand {
                config,
                state_db,
                log,
                init_index,
            })?;
            Ok(())
        }
        Commands::GenerateMapping {
            data_elements,
            option_sets,
            metadata,
            program_id,
            program_name,
            output,
        } => {
            logging::init_tracing(None)?;
            let cmd = generate::GenerateCommand {
                data_elements,
                option_sets,
                metadata,
                program_id,
                program_name,
                output,
            };
            let report = generate::generate_mapping_files(&cmd)?;
            println!(
                "Wrote {}: {} data elements mapped, {} unmapped, {} option sets attached, {} option sets missing",
                cmd.output.display(),
                report.mapped,
                report.unmapped.len(),
                report.option_sets_attached,
                report.option_sets_missing.len()
            );
            Ok(())
        }
        Commands::Runs { state_db } => run::list_runs(state_db),
        Commands::Inspect {
            run: run_id,
            state_db,
        } => run::inspect_run(&run_id, state_db),
        Commands::Completion { shell } => {
            let mut cmd = Cli::command();
            let name = cmd.get_name().to_string();
            clap_complete::generate(shell, &mut cmd, name, &mut io::stdout());
            Ok(())
        }
        Commands::Man { output } => {
            let man = clap_mangen::Man::new(Cli::command());
            match output {
                Some(path) => {
                    let mut bytes = Vec::new();
                    man.render(&mut bytes)?;
                    fs::write(path, bytes)?;
                }
                None => {
                    man.render(&mut io::stdout())?;
                }
            }
            Ok(())
        }
    }
}
