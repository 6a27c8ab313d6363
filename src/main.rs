//! FUCTool - patcher and quest save editor for Monster Hunter Freedom Unite
//!
//! Command-line entry point.
//!
//! # Commands
//!
//! - **patch**: validate an MHFU ISO and produce `<name>_FUC.iso` beside it
//! - **dump**: split a decrypted DATA.BIN into one file per entry
//! - **quests**: list, add, remove and export quests of a PSP save
//! - **config-bin**: show or change the options stored in a config.bin
//! - **init-config**: write the default `FUCTool.yaml`
//!
//! # Configuration Files
//!
//! Expected in `FUCTool Data/` (override with `--config-dir`):
//! - `FUCTool.yaml`: tool paths, patches, known digests, regions
//! - `FUCTool Settings.yaml`: logging preferences
//!
//! Relative paths in the config resolve against `--base-dir`.
//!
//! # Usage Examples
//!
//! ```bash
//! fuctool patch "MHFU.iso"
//! fuctool dump temp/DATA.BIN.DEC -o dump/
//! fuctool quests list --save "SAVEDATA/ULUS10391QST"
//! fuctool quests add "SAVEDATA/ULUS10391QST" 61001 61002
//! fuctool config-bin set config.bin 0=1 3=0
//! ```

use anyhow::{Context, Result, bail};
use camino::{Utf8Path, Utf8PathBuf};
use clap::{Parser, Subcommand};
use fuctool::models::MainConfig;
use fuctool::services::{
    PatchPipeline, PipelineSettings, ProcessInvoker, QuestPool, SaveEditor, SaveFolder, Toolchain,
    apply_choices, dump_data_bin, export_to_pool, read_file_choices,
};
use fuctool::{APP_NAME, ConfigManager, StateChange, StateManager, VERSION};
use std::io::{BufRead, Write};
use std::time::Duration;

#[derive(Parser)]
#[command(name = "fuctool")]
#[command(version)]
#[command(about = "Patch MHFU disc images and manage quest saves", long_about = None)]
struct Cli {
    /// Directory holding FUCTool.yaml and FUCTool Settings.yaml
    #[arg(long, value_name = "DIR", default_value = "FUCTool Data", global = true)]
    config_dir: Utf8PathBuf,

    /// Directory relative tool, patch and key paths resolve against
    #[arg(long, value_name = "DIR", default_value = ".", global = true)]
    base_dir: Utf8PathBuf,

    /// Log at debug level
    #[arg(short, long, global = true)]
    debug: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Patch an MHFU ISO
    Patch {
        #[arg(value_name = "ISO")]
        iso: Utf8PathBuf,
    },

    /// Dump a decrypted DATA.BIN
    Dump {
        #[arg(value_name = "DATA_BIN")]
        input: Utf8PathBuf,

        /// Output directory (default: DATA.BIN_dump beside the input)
        #[arg(short, long, value_name = "DIR")]
        output: Option<Utf8PathBuf>,
    },

    /// Manage the quests of a PSP save
    Quests {
        #[command(subcommand)]
        command: QuestCommands,
    },

    /// Read or write config.bin options
    ConfigBin {
        #[command(subcommand)]
        command: ConfigBinCommands,
    },

    /// Write the default main config if none exists
    InitConfig,
}

#[derive(Subcommand)]
enum QuestCommands {
    /// List the quest pool, and the save slots when a save is given
    List {
        #[arg(short, long, value_name = "SAVE_DIR")]
        save: Option<Utf8PathBuf>,
    },

    /// Copy pool quests into a save
    Add {
        #[arg(value_name = "SAVE_DIR")]
        save: Utf8PathBuf,

        /// Quest ids as listed by `quests list`
        #[arg(value_name = "ID", required = true)]
        ids: Vec<String>,
    },

    /// Remove quests from a save by slot number
    Remove {
        #[arg(value_name = "SAVE_DIR")]
        save: Utf8PathBuf,

        #[arg(value_name = "SLOT", required = true)]
        slots: Vec<usize>,
    },

    /// Copy quests from a save into the pool
    Export {
        #[arg(value_name = "SAVE_DIR")]
        save: Utf8PathBuf,

        #[arg(value_name = "SLOT", required = true)]
        slots: Vec<usize>,

        /// Replace existing pool files without asking
        #[arg(long, conflicts_with = "keep")]
        overwrite: bool,

        /// Never replace existing pool files
        #[arg(long)]
        keep: bool,
    },
}

#[derive(Subcommand)]
enum ConfigBinCommands {
    /// Show the current value of every option
    Show {
        #[arg(value_name = "CONFIG_BIN")]
        path: Utf8PathBuf,
    },

    /// Set options as OPTION=VALUE index pairs
    Set {
        #[arg(value_name = "CONFIG_BIN")]
        path: Utf8PathBuf,

        #[arg(value_name = "OPTION=VALUE", required = true)]
        choices: Vec<String>,
    },
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    let config_manager = ConfigManager::new(&cli.config_dir)?;
    let user_config = config_manager.load_user_config()?;
    let settings = &user_config.fuc_settings;

    let log_dir = cli.base_dir.join(&settings.log_dir);
    let _log_guard = fuctool::logging::setup_logging_with_console(
        &log_dir,
        "fuctool",
        cli.debug || settings.debug_mode,
        settings.console_output,
    )?;

    tracing::info!("Starting {} v{}", APP_NAME, VERSION);

    if let Commands::InitConfig = cli.command {
        if config_manager.write_default_main_config()? {
            println!("Wrote {}", config_manager.main_config_path());
        } else {
            println!("{} already exists", config_manager.main_config_path());
        }
        return Ok(());
    }

    let main_config = config_manager.load_main_config()?;

    let runtime = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .worker_threads(4)
        .thread_name("fuctool-worker")
        .build()?;

    let result = runtime.block_on(run(cli, main_config));

    runtime.shutdown_timeout(Duration::from_secs(5));
    tracing::info!("Application shutdown complete");

    result.inspect_err(|e| tracing::error!("{:#}", e))
}

async fn run(cli: Cli, config: MainConfig) -> Result<()> {
    let state = StateManager::new();
    let base_dir = cli.base_dir;

    match cli.command {
        Commands::Patch { iso } => patch(&iso, &config, &base_dir, state).await,
        Commands::Dump { input, output } => {
            let report = dump_data_bin(&input, output.as_deref(), config.dump_name_table()).await?;
            println!("DATA.BIN dumped to {} ({} files)", report.output_dir, report.files.len());
            Ok(())
        }
        Commands::Quests { command } => quests(command, &config, &base_dir, state).await,
        Commands::ConfigBin { command } => config_bin(command, &config),
        Commands::InitConfig => Ok(()),
    }
}

fn invoker(config: &MainConfig) -> ProcessInvoker {
    let timeout = match config.fuc_data.tool_timeout {
        0 => None,
        secs => Some(Duration::from_secs(secs)),
    };
    ProcessInvoker::new(timeout)
}

async fn patch(iso: &Utf8Path, config: &MainConfig, base_dir: &Utf8Path, state: StateManager) -> Result<()> {
    let settings = PipelineSettings::from_config(config, base_dir).context("Check known_hashes in FUCTool.yaml")?;

    let mut changes = state.subscribe();
    let progress = tokio::spawn(async move {
        while let Ok(change) = changes.recv().await {
            if let StateChange::StageChanged { stage } = change {
                tracing::debug!("Stage changed: {}", stage);
            }
        }
    });

    let pipeline = PatchPipeline::new(invoker(config), settings, state);
    let result = pipeline.run(iso).await;
    drop(pipeline);
    progress.abort();

    let report = result?;
    println!(
        "Patching done in {:.1}s, patched ISO is located at: {}",
        report.elapsed.as_secs_f32(),
        report.output
    );
    Ok(())
}

async fn quests(command: QuestCommands, config: &MainConfig, base_dir: &Utf8Path, state: StateManager) -> Result<()> {
    let data = &config.fuc_data;
    let quests_dir = base_dir.join(&data.quests_dir);
    let keys_dir = base_dir.join(&data.keys_dir);
    let toolchain = Toolchain::from_config(&data.tools, data.save_encrypt_mode, base_dir);
    let staging_root = base_dir.join(&data.staging_dir).join("save");
    let editor = SaveEditor::new(invoker(config), toolchain, &staging_root, state.clone());

    match command {
        QuestCommands::List { save } => {
            let pool = QuestPool::scan(&quests_dir)?;
            state.set_pool_size(pool.len());
            println!("Quests in folder ({}):", pool.len());
            for entry in pool.entries() {
                println!("  {}  {}", entry.record.id(), entry.record.name());
            }

            if let Some(save) = save {
                let folder = SaveFolder::open(&save, &data.regions, &keys_dir)?;
                let session = editor.load(folder).await?;
                let container = session.container();
                println!("Quests in save ({}/{}):", container.occupied_count(), container.slots().len());
                for (slot, record) in container.slots().iter().enumerate() {
                    if !record.is_empty() {
                        println!("  [{:2}] {}  {}", slot, record.id(), record.name());
                    }
                }
            }
            Ok(())
        }

        QuestCommands::Add { save, ids } => {
            let pool = QuestPool::scan(&quests_dir)?;
            let (records, missing) = pool.select(&ids);
            if !missing.is_empty() {
                bail!("Quests not in {}: {}", quests_dir, missing.join(", "));
            }

            let folder = SaveFolder::open(&save, &data.regions, &keys_dir)?;
            let mut session = editor.load(folder).await?;
            session.add_from_pool(&records)?;
            editor.persist(&session).await?;
            println!("Added {} quest(s), {} slot(s) occupied", records.len(), session.container().occupied_count());
            Ok(())
        }

        QuestCommands::Remove { save, slots } => {
            let folder = SaveFolder::open(&save, &data.regions, &keys_dir)?;
            let mut session = editor.load(folder).await?;
            let removed = session.remove_at(&slots);
            editor.persist(&session).await?;
            println!("Removed {} quest(s), {} slot(s) occupied", removed.len(), session.container().occupied_count());
            Ok(())
        }

        QuestCommands::Export {
            save,
            slots,
            overwrite,
            keep,
        } => {
            let folder = SaveFolder::open(&save, &data.regions, &keys_dir)?;
            let session = editor.load(folder).await?;
            let records: Vec<_> = slots
                .iter()
                .filter_map(|slot| session.container().get(*slot).cloned())
                .collect();

            let mut policy = |path: &Utf8Path| {
                if overwrite || keep {
                    return overwrite;
                }
                ask_overwrite(path)
            };
            let report = export_to_pool(&records, &quests_dir, &mut policy)?;
            println!("Exported {} quest(s), kept {} existing", report.written.len(), report.skipped.len());
            Ok(())
        }
    }
}

fn ask_overwrite(path: &Utf8Path) -> bool {
    print!("{} already exists, overwrite? [y/N] ", path.file_name().unwrap_or(path.as_str()));
    if std::io::stdout().flush().is_err() {
        return false;
    }
    let mut answer = String::new();
    match std::io::stdin().lock().read_line(&mut answer) {
        Ok(_) => matches!(answer.trim(), "y" | "Y" | "yes"),
        Err(_) => false,
    }
}

fn config_bin(command: ConfigBinCommands, config: &MainConfig) -> Result<()> {
    let options = &config.fuc_data.config_bin;

    match command {
        ConfigBinCommands::Show { path } => {
            let choices = read_file_choices(&path, options)?;
            for (index, (option, choice)) in options.iter().zip(choices).enumerate() {
                let current = choice
                    .and_then(|value| option.values.get(value))
                    .map(|value| value.label.as_str())
                    .unwrap_or("(unknown)");
                println!("[{}] {}: {}", index, option.description, current);
            }
            Ok(())
        }

        ConfigBinCommands::Set { path, choices } => {
            let mut selected = vec![None; options.len()];
            for pair in &choices {
                let (option, value) = pair
                    .split_once('=')
                    .with_context(|| format!("Expected OPTION=VALUE, got '{}'", pair))?;
                let option: usize = option.trim().parse().with_context(|| format!("Bad option index in '{}'", pair))?;
                let value: usize = value.trim().parse().with_context(|| format!("Bad value index in '{}'", pair))?;
                let slot = selected
                    .get_mut(option)
                    .with_context(|| format!("No option {} ({} configured)", option, options.len()))?;
                *slot = Some(value);
            }

            apply_choices(&path, options, &selected)?;
            println!("Configuration saved successfully.");
            Ok(())
        }
    }
}
