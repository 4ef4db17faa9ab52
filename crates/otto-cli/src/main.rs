use std::fs;
use std::io::{self, Read};
use std::path::{Path, PathBuf};

use atty::Stream;
use clap::{value_parser, ArgAction, Args, CommandFactory, Parser, Subcommand, ValueEnum};
use color_eyre::{eyre::eyre, Result};
use otto_core::{
    self, diag_commands, CommandContext, CommandGroup, CommandInfo, CommandStatus, DoctorRequest,
    ExecutionOutcome, GlobalOptions, ImportRequest, InitRequest, LaunchRequest, ListRequest,
    ReapRequest, StageRequest, StagedManifest,
};
use otto_domain::{FilterMap, UpdateId};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

mod style;

use style::Style;

fn main() -> Result<()> {
    color_eyre::install()?;

    let cli = OttoCli::parse();
    init_tracing(cli.trace, cli.verbose);

    let global = GlobalOptions {
        quiet: cli.quiet,
        verbose: cli.verbose,
        trace: cli.trace,
        json: cli.json,
        store: cli.store.clone(),
    };

    let ctx = CommandContext::new(&global).map_err(|err| eyre!("{err:?}"))?;
    let (info, outcome) = dispatch_command(&ctx, &cli.command)?;
    let code = emit_output(&cli, info, &outcome)?;

    if code == 0 {
        Ok(())
    } else {
        std::process::exit(code);
    }
}

fn init_tracing(trace: bool, verbose: u8) {
    let level = if trace {
        "trace"
    } else {
        match verbose {
            0 => "info",
            1 => "debug",
            _ => "trace",
        }
    };

    let filter =
        std::env::var("OTTO_LOG").unwrap_or_else(|_| format!("otto={level},otto_core={level}"));
    let subscriber = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_level(true)
        .finish();

    let _ = tracing::subscriber::set_global_default(subscriber);
}

fn emit_output(cli: &OttoCli, info: CommandInfo, outcome: &ExecutionOutcome) -> Result<i32> {
    let code = match outcome.status {
        CommandStatus::Ok => 0,
        CommandStatus::UserError => 1,
        CommandStatus::Failure => 2,
    };

    if cli.json {
        let payload = otto_core::to_json_response(info, outcome, code);
        println!("{}", serde_json::to_string_pretty(&payload)?);
    } else if code != 0 {
        let style = Style::new(cli.no_color, atty::is(Stream::Stderr));
        let code_label = error_code(info, &outcome.details);
        let header = format!(
            "{code_label}  {}",
            strip_code_prefix(&outcome.message, &code_label)
        );
        eprintln!("{}", style.error_header(&header));
        if let Some(hint) = hint_from_details(&outcome.details) {
            let hint_line = format!("Hint: {hint}");
            eprintln!("{}", style.info(&hint_line));
        }
    } else if !cli.quiet {
        let style = Style::new(cli.no_color, atty::is(Stream::Stdout));
        if is_passthrough(&outcome.details) {
            println!("{}", outcome.message);
        } else {
            let message = otto_core::format_status_message(info, &outcome.message);
            println!("{}", style.status(&outcome.status, &message));
            if let Some(hint) = hint_from_details(&outcome.details) {
                let hint_line = format!("Hint: {hint}");
                println!("{}", style.info(&hint_line));
            }
            if let Some(table) = render_list_table(&style, info, &outcome.details) {
                println!("{table}");
            }
        }
    }

    Ok(code)
}

fn hint_from_details(details: &Value) -> Option<&str> {
    details
        .as_object()
        .and_then(|map| map.get("hint"))
        .and_then(Value::as_str)
}

fn is_passthrough(details: &Value) -> bool {
    details
        .as_object()
        .and_then(|map| map.get("passthrough"))
        .and_then(Value::as_bool)
        .unwrap_or(false)
}

fn error_code(info: CommandInfo, details: &Value) -> String {
    if let Some(code) = details
        .as_object()
        .and_then(|map| map.get("code"))
        .and_then(Value::as_str)
        .filter(|code| code.starts_with("OT"))
    {
        return code.to_string();
    }
    default_error_code(info).to_string()
}

fn default_error_code(info: CommandInfo) -> &'static str {
    match info.group {
        CommandGroup::Init => diag_commands::INIT,
        CommandGroup::Import => diag_commands::IMPORT,
        CommandGroup::Stage => diag_commands::STAGE,
        CommandGroup::List => diag_commands::LIST,
        CommandGroup::Launch => diag_commands::LAUNCH,
        CommandGroup::Reap => diag_commands::REAP,
        CommandGroup::Doctor => diag_commands::DOCTOR,
        CommandGroup::Completions => diag_commands::GENERIC,
    }
}

// Messages carry their own bracketed code; the header already leads with it.
fn strip_code_prefix<'a>(message: &'a str, code: &str) -> &'a str {
    message
        .strip_prefix(&format!("[{code}] "))
        .unwrap_or(message)
}

fn render_list_table(style: &Style, info: CommandInfo, details: &Value) -> Option<String> {
    if info.group != CommandGroup::List {
        return None;
    }
    let updates = details.get("updates")?.as_array()?;
    if updates.is_empty() {
        return None;
    }

    let mut rows = Vec::new();
    for entry in updates {
        let obj = entry.as_object()?;
        rows.push(UpdateRow {
            id: obj.get("id")?.as_str()?.to_string(),
            status: obj.get("status")?.as_str()?.to_string(),
            committed: obj.get("commit_time_rfc3339")?.as_str()?.to_string(),
            runtime: obj.get("runtime_version")?.as_str()?.to_string(),
            launches: format!(
                "ok:{} fail:{}",
                obj.get("successful_launch_count")?.as_u64()?,
                obj.get("failed_launch_count")?.as_u64()?
            ),
        });
    }

    Some(format_update_table(style, &rows))
}

struct UpdateRow {
    id: String,
    status: String,
    committed: String,
    runtime: String,
    launches: String,
}

fn format_update_table(style: &Style, rows: &[UpdateRow]) -> String {
    let headers = ["Update", "Status", "Committed", "Runtime", "Launches"];
    let mut widths = [
        headers[0].len(),
        headers[1].len(),
        headers[2].len(),
        headers[3].len(),
        headers[4].len(),
    ];

    for row in rows {
        widths[0] = widths[0].max(row.id.len());
        widths[1] = widths[1].max(row.status.len());
        widths[2] = widths[2].max(row.committed.len());
        widths[3] = widths[3].max(row.runtime.len());
        widths[4] = widths[4].max(row.launches.len());
    }

    let header_line = format!(
        "{:<width0$}  {:<width1$}  {:<width2$}  {:<width3$}  {:<width4$}",
        headers[0],
        headers[1],
        headers[2],
        headers[3],
        headers[4],
        width0 = widths[0],
        width1 = widths[1],
        width2 = widths[2],
        width3 = widths[3],
        width4 = widths[4],
    );

    let mut lines = Vec::new();
    lines.push(style.table_header(&header_line));
    lines.push(format!(
        "{:-<width0$}  {:-<width1$}  {:-<width2$}  {:-<width3$}  {:-<width4$}",
        "",
        "",
        "",
        "",
        "",
        width0 = widths[0],
        width1 = widths[1],
        width2 = widths[2],
        width3 = widths[3],
        width4 = widths[4],
    ));

    for row in rows {
        lines.push(format!(
            "{:<width0$}  {:<width1$}  {:<width2$}  {:<width3$}  {:<width4$}",
            row.id,
            row.status,
            row.committed,
            row.runtime,
            row.launches,
            width0 = widths[0],
            width1 = widths[1],
            width2 = widths[2],
            width3 = widths[3],
            width4 = widths[4],
        ));
    }

    lines.join("\n")
}

fn dispatch_command(
    ctx: &CommandContext,
    command: &CommandGroupCli,
) -> Result<(CommandInfo, ExecutionOutcome)> {
    match command {
        CommandGroupCli::Init => {
            let info = CommandInfo::new(CommandGroup::Init, "init");
            core_call(info, || {
                otto_core::store_init(ctx, &InitRequest::default())
            })
        }
        CommandGroupCli::Import(args) => {
            let info = CommandInfo::new(CommandGroup::Import, "import");
            let manifest = match read_manifest(&args.manifest) {
                Ok(bytes) => bytes,
                Err(outcome) => return Ok((info, outcome)),
            };
            let request = ImportRequest {
                manifest,
                assets_dir: args.assets.clone(),
                embedded: args.embedded,
            };
            core_call(info, || otto_core::import_update(ctx, &request))
        }
        CommandGroupCli::Stage(args) => {
            let info = CommandInfo::new(CommandGroup::Stage, "stage");
            let mut manifests = Vec::with_capacity(args.manifests.len());
            for path in &args.manifests {
                let raw = match read_manifest(path) {
                    Ok(bytes) => bytes,
                    Err(outcome) => return Ok((info, outcome)),
                };
                manifests.push(StagedManifest {
                    source: path.display().to_string(),
                    raw,
                });
            }
            let request = StageRequest {
                manifests,
                assets_dir: args.assets.clone(),
                filters: filter_map(&args.filters),
                runtime: args.runtime.clone(),
            };
            core_call(info, || otto_core::stage_updates(ctx, &request))
        }
        CommandGroupCli::List(args) => {
            let info = CommandInfo::new(CommandGroup::List, "list");
            let request = ListRequest { limit: args.limit };
            core_call(info, || otto_core::list_updates(ctx, &request))
        }
        CommandGroupCli::Launch(args) => {
            let info = CommandInfo::new(CommandGroup::Launch, "launch");
            let request = LaunchRequest {
                filters: filter_map(&args.filters),
                runtime: args.runtime.clone(),
                pinned: args.pinned,
            };
            core_call(info, || otto_core::launch_update(ctx, &request))
        }
        CommandGroupCli::Reap(args) => {
            let info = CommandInfo::new(CommandGroup::Reap, "reap");
            let request = ReapRequest {
                filters: filter_map(&args.filters),
                dry_run: args.dry_run,
            };
            core_call(info, || otto_core::reap_store(ctx, &request))
        }
        CommandGroupCli::Doctor => {
            let info = CommandInfo::new(CommandGroup::Doctor, "doctor");
            core_call(info, || {
                otto_core::store_doctor(ctx, &DoctorRequest::default())
            })
        }
        CommandGroupCli::Completions(args) => {
            let info = CommandInfo::new(CommandGroup::Completions, "completions");
            Ok((info, completions_outcome(args)))
        }
    }
}

fn core_call<F>(info: CommandInfo, action: F) -> Result<(CommandInfo, ExecutionOutcome)>
where
    F: FnOnce() -> anyhow::Result<ExecutionOutcome>,
{
    match action() {
        Ok(outcome) => Ok((info, outcome)),
        Err(err) => {
            if let Some(outcome) = otto_core::store_error_outcome(&err) {
                return Ok((info, outcome));
            }
            let issues: Vec<String> = err.chain().map(std::string::ToString::to_string).collect();
            Ok((
                info,
                ExecutionOutcome::failure(
                    err.to_string(),
                    json!({
                        "reason": "internal_error",
                        "error": err.to_string(),
                        "issues": issues,
                        "hint": "Re-run with --trace for more detail, or open an issue if this persists.",
                    }),
                ),
            ))
        }
    }
}

fn read_manifest(path: &Path) -> Result<Vec<u8>, ExecutionOutcome> {
    let result = if path.as_os_str() == "-" {
        let mut buffer = Vec::new();
        io::stdin().read_to_end(&mut buffer).map(|_| buffer)
    } else {
        fs::read(path)
    };
    result.map_err(|err| {
        ExecutionOutcome::user_error(
            format!("cannot read manifest {}: {err}", path.display()),
            json!({ "path": path.display().to_string() }),
        )
    })
}

fn filter_map(pairs: &[(String, String)]) -> FilterMap {
    let mut filters = FilterMap::new();
    for (key, value) in pairs {
        filters.insert(key.clone(), value.clone());
    }
    filters
}

fn parse_filter(raw: &str) -> Result<(String, String), String> {
    match raw.split_once('=') {
        Some((key, value)) if !key.is_empty() => Ok((key.to_string(), value.to_string())),
        _ => Err(format!("expected KEY=VALUE, got '{raw}'")),
    }
}

fn completions_outcome(args: &CompletionsArgs) -> ExecutionOutcome {
    let mut command = OttoCli::command();
    let mut buffer: Vec<u8> = Vec::new();
    clap_complete::generate(args.shell.generator(), &mut command, "otto", &mut buffer);
    let script = String::from_utf8_lossy(&buffer).trim_end().to_string();
    ExecutionOutcome::success(
        script,
        json!({
            "passthrough": true,
            "shell": args.shell.as_str(),
        }),
    )
}

#[derive(Parser, Debug)]
#[command(
    author,
    version,
    about = "Over-the-air update store and launcher",
    long_about = "Imports, stages, selects, and retires app updates in a local content-addressed store.",
    after_help = "Examples:\n  otto init\n  otto stage release/*.json --assets payloads/\n  otto --json launch --runtime 1.2.0"
)]
struct OttoCli {
    #[arg(
        short,
        long,
        help = "Suppress human output (errors still print to stderr)"
    )]
    quiet: bool,
    #[arg(short, long, action = ArgAction::Count, help = "Increase logging (-vv reaches trace)")]
    verbose: u8,
    #[arg(long, help = "Force trace logging regardless of -v/-q")]
    trace: bool,
    #[arg(long, help = "Emit {status,message,details} JSON envelopes")]
    json: bool,
    #[arg(long, help = "Disable colored human output")]
    no_color: bool,
    #[arg(
        long,
        value_name = "DIR",
        value_parser = value_parser!(PathBuf),
        help = "Update store directory (overrides OTTO_STORE_DIR)"
    )]
    store: Option<PathBuf>,
    #[command(subcommand)]
    command: CommandGroupCli,
}

#[derive(Subcommand, Debug)]
enum CommandGroupCli {
    #[command(
        about = "Create the update store layout, or verify an existing one.",
        after_help = "Examples:\n  otto init\n  otto --store /srv/updates init\n"
    )]
    Init,
    #[command(
        about = "Import one manifest and its local asset payloads.",
        override_usage = "otto import <MANIFEST> [--assets DIR] [--embedded]",
        after_help = "Examples:\n  otto import release.json --assets payloads/\n  otto import embedded.json --assets app/bundle --embedded\n  cat release.json | otto import -\n"
    )]
    Import(ImportArgs),
    #[command(
        about = "Gate manifests against the launched update and stage the survivors.",
        override_usage = "otto stage <MANIFEST>... [--assets DIR] [--filter KEY=VALUE] [--runtime VERSION]",
        after_help = "Examples:\n  otto stage release/*.json --assets payloads/\n  otto stage nightly.json --filter channel=nightly --runtime 1.2.0\n"
    )]
    Stage(StageArgs),
    #[command(
        about = "List stored updates, newest first.",
        after_help = "Examples:\n  otto list\n  otto --json list --limit 5\n"
    )]
    List(ListArgs),
    #[command(
        about = "Select the best launchable update and print its bundle and asset map.",
        override_usage = "otto launch [--filter KEY=VALUE] [--runtime VERSION] [--pinned UPDATE_ID]",
        after_help = "Examples:\n  otto launch --runtime 1.2.0\n  otto launch --filter channel=stable --runtime 1.2.0\n  otto launch --pinned 0f52d373-4b27-4a05-9a8e-123c5f339d12\n"
    )]
    Launch(LaunchArgs),
    #[command(
        about = "Retire updates the retention policy no longer needs.",
        after_help = "Examples:\n  otto reap --dry-run\n  otto reap --filter channel=stable\n"
    )]
    Reap(ReapArgs),
    #[command(
        about = "Check index integrity and verify every ready update's payloads.",
        after_help = "Examples:\n  otto doctor\n  otto --json doctor\n"
    )]
    Doctor,
    #[command(
        about = "Emit a shell completion script for otto.",
        after_help = "Examples:\n  otto completions bash > /etc/bash_completion.d/otto\n  otto completions zsh > ~/.zfunc/_otto\n"
    )]
    Completions(CompletionsArgs),
}

#[derive(Args, Debug)]
struct ImportArgs {
    #[arg(
        value_name = "MANIFEST",
        help = "Manifest file to import (pass - to read stdin)"
    )]
    manifest: PathBuf,
    #[arg(
        long,
        value_name = "DIR",
        value_parser = value_parser!(PathBuf),
        help = "Directory holding asset payloads named by file key"
    )]
    assets: Option<PathBuf>,
    #[arg(long, help = "Register the update as the embedded fallback")]
    embedded: bool,
}

#[derive(Args, Debug)]
struct StageArgs {
    #[arg(
        value_name = "MANIFEST",
        help = "Manifest files to stage (pass - to read stdin)"
    )]
    manifests: Vec<PathBuf>,
    #[arg(
        long,
        value_name = "DIR",
        value_parser = value_parser!(PathBuf),
        help = "Directory holding asset payloads named by file key"
    )]
    assets: Option<PathBuf>,
    #[arg(
        long = "filter",
        value_name = "KEY=VALUE",
        value_parser = parse_filter,
        help = "Require a manifest filter entry (repeatable)"
    )]
    filters: Vec<(String, String)>,
    #[arg(
        long,
        value_name = "VERSION",
        help = "Runtime version gate (defaults to OTTO_RUNTIME_VERSION)"
    )]
    runtime: Option<String>,
}

#[derive(Args, Debug)]
struct ListArgs {
    #[arg(long, value_name = "N", help = "Show only the newest N updates")]
    limit: Option<usize>,
}

#[derive(Args, Debug)]
struct LaunchArgs {
    #[arg(
        long = "filter",
        value_name = "KEY=VALUE",
        value_parser = parse_filter,
        help = "Require a manifest filter entry (repeatable)"
    )]
    filters: Vec<(String, String)>,
    #[arg(
        long,
        value_name = "VERSION",
        help = "Runtime version to select under (defaults to OTTO_RUNTIME_VERSION)"
    )]
    runtime: Option<String>,
    #[arg(
        long,
        value_name = "UPDATE_ID",
        help = "Launch exactly this update, bypassing filters and the runtime gate"
    )]
    pinned: Option<UpdateId>,
}

#[derive(Args, Debug)]
struct ReapArgs {
    #[arg(
        long = "filter",
        value_name = "KEY=VALUE",
        value_parser = parse_filter,
        help = "Filters the rollback target must match (repeatable)"
    )]
    filters: Vec<(String, String)>,
    #[arg(long, help = "Report what would be removed without deleting anything")]
    dry_run: bool,
}

#[derive(Args, Debug)]
struct CompletionsArgs {
    #[arg(value_enum, help = "Shell to emit a completion script for")]
    shell: CompletionShell,
}

#[derive(ValueEnum, Debug, Clone, Copy, Serialize, Deserialize)]
enum CompletionShell {
    Bash,
    Zsh,
    Fish,
    Powershell,
}

impl CompletionShell {
    fn as_str(&self) -> &'static str {
        match self {
            CompletionShell::Bash => "bash",
            CompletionShell::Zsh => "zsh",
            CompletionShell::Fish => "fish",
            CompletionShell::Powershell => "powershell",
        }
    }

    fn generator(&self) -> clap_complete::Shell {
        match self {
            CompletionShell::Bash => clap_complete::Shell::Bash,
            CompletionShell::Zsh => clap_complete::Shell::Zsh,
            CompletionShell::Fish => clap_complete::Shell::Fish,
            CompletionShell::Powershell => clap_complete::Shell::PowerShell,
        }
    }
}
