use anyhow::{anyhow, Result};
use clap::{Args, Parser, Subcommand};
use namesmith::commands::{
    analyze_chain_command, analyze_command, analyze_visible_command, chain_command,
    classify_command, config_set_assembly_command, config_set_base_url_command,
    config_set_model_command, config_set_profile_command, config_show_command, context_command,
    export_snapshot_command, import_binary_command, import_snapshot_command, init_project_command,
    list_functions_command, parse_profile, project_info_command, prompt_command,
};
use namesmith::init_tracing;
use namesmith_core::analysis::{ContextProfile, MAX_CHAIN_DEPTH};

/// Model-assisted naming and commenting for reverse-engineered functions.
///
/// This CLI is a thin wrapper around `namesmith-core` (exposed in code as
/// `namesmith_core`). All substantive logic lives in the library so it can be
/// tested thoroughly and reused from other frontends.
#[derive(Parser, Debug)]
#[command(
    name = "namesmith",
    version,
    about = "Model-assisted function naming and commenting",
    long_about = None
)]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

/// Context profile selection. `--profile` wins; otherwise `--full` beats
/// `--lite-aware`, which beats `--lite`. Nothing set means the project default.
#[derive(Args, Debug, Clone, Default)]
struct ProfileArgs {
    /// Context profile: full, lite-aware or lite.
    #[arg(long)]
    profile: Option<String>,

    #[arg(long, default_value_t = false, conflicts_with = "profile")]
    full: bool,

    #[arg(long, default_value_t = false, conflicts_with = "profile")]
    lite_aware: bool,

    #[arg(long, default_value_t = false, conflicts_with = "profile")]
    lite: bool,
}

impl ProfileArgs {
    fn resolve(&self) -> Result<Option<ContextProfile>> {
        if let Some(profile) = &self.profile {
            return parse_profile(profile).map(Some);
        }
        if self.full || self.lite_aware || self.lite {
            return Ok(Some(ContextProfile::from_flags(self.full, self.lite_aware, self.lite)));
        }
        Ok(None)
    }
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Initialize a new namesmith project at the given root.
    ///
    /// This will:
    /// - Create a `.namesmith` metadata directory and an empty program database.
    /// - Create a `snapshots` directory for exports.
    /// - Write a `.namesmith/project.json` config file.
    InitProject {
        /// Project root directory. Defaults to the current working directory.
        #[arg(long, default_value = ".")]
        root: String,

        /// Optional project name. If omitted, the name is derived from the root directory.
        #[arg(long)]
        name: Option<String>,
    },

    /// Show basic information about an existing project.
    ProjectInfo {
        #[arg(long, default_value = ".")]
        root: String,

        /// Emit JSON instead of human-readable text.
        #[arg(long, default_value_t = false)]
        json: bool,
    },

    /// Load a program snapshot (JSON or YAML) into the project database.
    ///
    /// Replaces any previously imported program.
    ImportSnapshot {
        #[arg(long, default_value = ".")]
        root: String,

        /// Snapshot file exported by a host disassembler.
        #[arg(long)]
        path: String,
    },

    /// Disassemble an ELF/PE/Mach-O binary into the project database.
    ///
    /// No pseudocode is produced, so analysis commands will refuse these functions.
    ImportBinary {
        #[arg(long, default_value = ".")]
        root: String,

        #[arg(long)]
        path: String,

        /// Optional architecture hint (e.g., x86_64, x86, arm, arm64).
        #[arg(long)]
        arch: Option<String>,

        /// Per-function instruction budget.
        #[arg(long)]
        max_instructions: Option<usize>,
    },

    /// Write the stored program, including applied edits, to a snapshot file.
    ExportSnapshot {
        #[arg(long, default_value = ".")]
        root: String,

        /// Output file (`.yaml`/`.yml` selects YAML). Defaults to `snapshots/<program>.json`.
        #[arg(long)]
        out: Option<String>,
    },

    /// List every function with its address and size.
    ListFunctions {
        #[arg(long, default_value = ".")]
        root: String,

        /// Read this snapshot file instead of the project database.
        #[arg(long)]
        snapshot: Option<String>,

        #[arg(long, default_value_t = false)]
        json: bool,
    },

    /// Print the call-graph context digest for a function.
    Context {
        #[arg(long, default_value = ".")]
        root: String,

        #[arg(long)]
        snapshot: Option<String>,

        /// Function address (0x-prefixed hex or decimal) or name.
        #[arg(long)]
        function: String,

        #[command(flatten)]
        profile: ProfileArgs,

        #[arg(long, default_value_t = false)]
        json: bool,
    },

    /// Check whether a function is a trivial stub (nullsub, thunk, ...).
    Classify {
        #[arg(long, default_value = ".")]
        root: String,

        #[arg(long)]
        snapshot: Option<String>,

        #[arg(long)]
        function: String,
    },

    /// Print the call chain `analyze-chain` would process.
    Chain {
        #[arg(long, default_value = ".")]
        root: String,

        #[arg(long)]
        snapshot: Option<String>,

        #[arg(long)]
        function: String,

        /// Traversal depth (1-100). Defaults to the project setting.
        #[arg(long)]
        depth: Option<u32>,

        /// Also walk into the functions the seed calls.
        #[arg(long, default_value_t = false)]
        include_callees: bool,

        #[arg(long, default_value_t = false)]
        json: bool,
    },

    /// Print the analysis prompt for a function without contacting the model.
    Prompt {
        #[arg(long, default_value = ".")]
        root: String,

        #[arg(long)]
        snapshot: Option<String>,

        #[arg(long)]
        function: String,

        #[command(flatten)]
        profile: ProfileArgs,
    },

    /// Ask the model about one function and apply its suggestions.
    Analyze {
        #[arg(long, default_value = ".")]
        root: String,

        #[arg(long)]
        function: String,

        #[command(flatten)]
        profile: ProfileArgs,

        /// Do not ask for confirmation.
        #[arg(long, default_value_t = false)]
        yes: bool,

        /// Print the prompt instead of sending it.
        #[arg(long, default_value_t = false)]
        dry_run: bool,
    },

    /// Analyze a function's callers (and optionally callees), one at a time.
    AnalyzeChain {
        #[arg(long, default_value = ".")]
        root: String,

        #[arg(long)]
        function: String,

        #[arg(long)]
        depth: Option<u32>,

        #[arg(long, default_value_t = false)]
        include_callees: bool,

        #[command(flatten)]
        profile: ProfileArgs,

        #[arg(long, default_value_t = false)]
        yes: bool,

        /// List the functions without analyzing them.
        #[arg(long, default_value_t = false)]
        dry_run: bool,
    },

    /// Analyze a function and every function it calls directly.
    AnalyzeVisible {
        #[arg(long, default_value = ".")]
        root: String,

        #[arg(long)]
        function: String,

        #[command(flatten)]
        profile: ProfileArgs,

        #[arg(long, default_value_t = false)]
        yes: bool,

        #[arg(long, default_value_t = false)]
        dry_run: bool,
    },

    /// Show or change project settings.
    Config {
        #[arg(long, default_value = ".", global = true)]
        root: String,

        #[command(subcommand)]
        action: ConfigAction,
    },
}

#[derive(Subcommand, Debug)]
enum ConfigAction {
    /// Print the current settings.
    Show {
        #[arg(long, default_value_t = false)]
        json: bool,
    },
    /// Change the model identifier sent with each request.
    SetModel { model: String },
    /// Change the OpenAI-compatible endpoint base URL.
    SetBaseUrl { base_url: String },
    /// Change the default context profile (full, lite-aware, lite).
    SetProfile { profile: String },
    /// Include disassembly in full-profile digests (on or off).
    SetAssembly { value: String },
}

fn main() -> Result<()> {
    init_tracing();
    let cli = Cli::parse();

    match cli.command {
        Command::InitProject { root, name } => init_project_command(&root, name)?,
        Command::ProjectInfo { root, json } => project_info_command(&root, json)?,
        Command::ImportSnapshot { root, path } => {
            import_snapshot_command(&root, &path)?;
        }
        Command::ImportBinary { root, path, arch, max_instructions } => {
            import_binary_command(&root, &path, arch, max_instructions)?;
        }
        Command::ExportSnapshot { root, out } => {
            export_snapshot_command(&root, out.as_deref())?;
        }
        Command::ListFunctions { root, snapshot, json } => {
            list_functions_command(&root, snapshot.as_deref(), json)?
        }
        Command::Context { root, snapshot, function, profile, json } => {
            context_command(&root, snapshot.as_deref(), &function, profile.resolve()?, json)?
        }
        Command::Classify { root, snapshot, function } => {
            classify_command(&root, snapshot.as_deref(), &function)?
        }
        Command::Chain { root, snapshot, function, depth, include_callees, json } => {
            check_depth(depth)?;
            chain_command(&root, snapshot.as_deref(), &function, depth, include_callees, json)?;
        }
        Command::Prompt { root, snapshot, function, profile } => {
            prompt_command(&root, snapshot.as_deref(), &function, profile.resolve()?)?
        }
        Command::Analyze { root, function, profile, yes, dry_run } => {
            analyze_command(&root, &function, profile.resolve()?, yes, dry_run)?;
        }
        Command::AnalyzeChain { root, function, depth, include_callees, profile, yes, dry_run } => {
            check_depth(depth)?;
            analyze_chain_command(
                &root,
                &function,
                depth,
                include_callees,
                profile.resolve()?,
                yes,
                dry_run,
            )?;
        }
        Command::AnalyzeVisible { root, function, profile, yes, dry_run } => {
            analyze_visible_command(&root, &function, profile.resolve()?, yes, dry_run)?;
        }
        Command::Config { root, action } => match action {
            ConfigAction::Show { json } => config_show_command(&root, json)?,
            ConfigAction::SetModel { model } => config_set_model_command(&root, &model)?,
            ConfigAction::SetBaseUrl { base_url } => config_set_base_url_command(&root, &base_url)?,
            ConfigAction::SetProfile { profile } => {
                config_set_profile_command(&root, parse_profile(&profile)?)?
            }
            ConfigAction::SetAssembly { value } => config_set_assembly_command(&root, &value)?,
        },
    }

    Ok(())
}

fn check_depth(depth: Option<u32>) -> Result<()> {
    match depth {
        Some(d) if !(1..=MAX_CHAIN_DEPTH).contains(&d) => {
            Err(anyhow!("--depth must be between 1 and {MAX_CHAIN_DEPTH}, got {d}"))
        }
        _ => Ok(()),
    }
}
