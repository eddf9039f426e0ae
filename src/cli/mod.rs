//! CLI surface.
//!
//! Thin command tree over the service layer: parsing and output live
//! here, semantics live in `service`. With `--json` every command emits
//! one `{ok, error?, data?, next_cursor?}` object on stdout.

use std::ffi::OsString;
use std::path::PathBuf;

use clap::{ArgAction, Args, Parser, Subcommand};
use serde::Serialize;

use crate::service::Service;
use crate::{Result, paths};

mod commands;
mod render;

#[derive(Parser, Debug)]
#[command(
    name = "tc",
    version,
    about = "File-backed team collaboration control plane",
    arg_required_else_help = true
)]
pub struct Cli {
    /// Machine-readable JSON output.
    #[arg(long, global = true, default_value_t = false)]
    pub json: bool,

    /// Data root containing `teams/` (default: $TEAM_CHAT_DIR or cwd).
    #[arg(long, global = true, value_name = "PATH")]
    pub data_dir: Option<PathBuf>,

    /// Debug output (repeat for more).
    #[arg(short = 'v', long, global = true, action = ArgAction::Count)]
    pub verbose: u8,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Create a team's directory skeleton and seed empty indexes.
    Init(InitArgs),

    /// Send a message to an agent's inbox.
    Send(SendArgs),

    /// Assign a task (convenience send of `task_assign`).
    TaskAssign(TaskAssignArgs),

    /// Update a task (convenience send of `task_update`).
    TaskUpdate(TaskUpdateArgs),

    /// Read an agent's inbox, newest last, paginated.
    Read(ReadArgs),

    /// Acknowledge a message.
    Ack(AckArgs),

    /// Aggregate counters for a team.
    Status(StatusArgs),

    /// Events for one trace id, chronological.
    Trace(TraceArgs),

    /// Rebuild all derived state from the logs.
    Rehydrate { team: String },

    /// Consistency tooling.
    Doctor {
        #[command(subcommand)]
        cmd: DoctorCmd,
    },

    /// Delivery-guard pass (internal; the notifier cron drives this).
    #[command(hide = true)]
    Tick(TickArgs),
}

#[derive(Subcommand, Debug)]
pub enum DoctorCmd {
    /// Cross-check logs, indexes, acks and snapshots.
    Check { team: String },
}

#[derive(Args, Debug)]
pub struct InitArgs {
    pub team: String,

    /// Comma-separated member agent ids.
    #[arg(long, value_delimiter = ',', value_name = "CSV")]
    pub members: Vec<String>,
}

#[derive(Args, Debug)]
pub struct SendArgs {
    pub team: String,

    #[arg(long)]
    pub from: String,

    #[arg(long)]
    pub to: String,

    /// Message type (e.g. task_assign, idle_notification).
    #[arg(long = "type", value_name = "TYPE")]
    pub kind: String,

    /// Explicit message id (generated when omitted). Resends with the
    /// same id are no-ops.
    #[arg(long, value_name = "ID")]
    pub message_id: Option<String>,

    /// JSON object payload.
    #[arg(long, value_name = "JSON", default_value = "{}")]
    pub payload: String,

    #[arg(long, default_value_t = false)]
    pub require_ack: bool,

    #[arg(long, value_name = "ID")]
    pub trace_id: Option<String>,

    #[arg(long, value_name = "ID")]
    pub task_id: Option<String>,

    #[arg(long, default_value_t = 0)]
    pub priority: i64,

    /// Suppression key for nudge-style sends.
    #[arg(long, value_name = "KEY")]
    pub cooldown_key: Option<String>,

    #[arg(long, value_name = "SECS")]
    pub cooldown_seconds: Option<u64>,
}

#[derive(Args, Debug)]
pub struct TaskAssignArgs {
    pub team: String,

    #[arg(long)]
    pub from: String,

    #[arg(long)]
    pub to: String,

    #[arg(long, value_name = "ID")]
    pub task_id: String,

    #[arg(long)]
    pub subject: String,

    #[arg(long)]
    pub details: Option<String>,

    #[arg(long, value_name = "ID")]
    pub trace_id: Option<String>,

    #[arg(long, default_value_t = false)]
    pub require_ack: bool,
}

#[derive(Args, Debug)]
pub struct TaskUpdateArgs {
    pub team: String,

    #[arg(long)]
    pub from: String,

    #[arg(long)]
    pub to: String,

    #[arg(long, value_name = "ID")]
    pub task_id: String,

    #[arg(long)]
    pub status: String,

    #[arg(long)]
    pub note: Option<String>,

    #[arg(long, value_name = "ID")]
    pub trace_id: Option<String>,
}

#[derive(Args, Debug)]
pub struct ReadArgs {
    pub team: String,

    #[arg(long)]
    pub agent: String,

    /// Only messages without an ack.
    #[arg(long, default_value_t = false)]
    pub unread: bool,

    /// Page size; 0 means everything.
    #[arg(long, default_value_t = 50, value_name = "N")]
    pub limit: usize,

    /// Resume below this message id (from a previous `next_cursor`).
    #[arg(long, value_name = "ID")]
    pub cursor: Option<String>,
}

#[derive(Args, Debug)]
pub struct AckArgs {
    pub team: String,

    #[arg(long)]
    pub agent: String,

    #[arg(long, value_name = "ID")]
    pub message_id: String,
}

#[derive(Args, Debug)]
pub struct StatusArgs {
    pub team: String,
}

#[derive(Args, Debug)]
pub struct TraceArgs {
    pub team: String,

    #[arg(long, value_name = "ID")]
    pub trace_id: String,

    /// Page size; 0 means everything.
    #[arg(long, default_value_t = 0, value_name = "N")]
    pub limit: usize,

    #[arg(long, value_name = "ID")]
    pub cursor: Option<String>,
}

#[derive(Args, Debug)]
pub struct TickArgs {
    pub team: String,

    /// Tick wall time as RFC 3339 (default: now). Test hook.
    #[arg(long, hide = true, value_name = "TS")]
    pub now: Option<String>,
}

pub fn parse_from<I, T>(args: I) -> Cli
where
    I: IntoIterator<Item = T>,
    T: Into<OsString> + Clone,
{
    Cli::parse_from(args)
}

/// Run one parsed command. `Ok(code)` carries the process exit code for
/// non-error outcomes (doctor findings exit 1 without being an `Err`).
pub fn run(cli: Cli) -> Result<i32> {
    let root = paths::data_root(cli.data_dir);
    let ctx = Ctx {
        service: Service::new(root),
        json: cli.json,
    };

    match cli.command {
        Commands::Init(args) => commands::init::handle(&ctx, args),
        Commands::Send(args) => commands::send::handle(&ctx, args),
        Commands::TaskAssign(args) => commands::task::handle_assign(&ctx, args),
        Commands::TaskUpdate(args) => commands::task::handle_update(&ctx, args),
        Commands::Read(args) => commands::read::handle(&ctx, args),
        Commands::Ack(args) => commands::ack::handle(&ctx, args),
        Commands::Status(args) => commands::status::handle(&ctx, args),
        Commands::Trace(args) => commands::trace::handle(&ctx, args),
        Commands::Rehydrate { team } => commands::rehydrate::handle(&ctx, &team),
        Commands::Doctor { cmd } => match cmd {
            DoctorCmd::Check { team } => commands::doctor::handle(&ctx, &team),
        },
        Commands::Tick(args) => commands::tick::handle(&ctx, args),
    }
}

pub(crate) struct Ctx {
    pub service: Service,
    pub json: bool,
}

impl Ctx {
    /// Emit one command result: the JSON envelope or the human rendering.
    pub(crate) fn emit<T: Serialize>(
        &self,
        data: &T,
        next_cursor: Option<&str>,
        human: impl FnOnce() -> String,
    ) {
        if self.json {
            let mut envelope = serde_json::Map::new();
            envelope.insert("ok".to_string(), serde_json::Value::Bool(true));
            if let Ok(value) = serde_json::to_value(data) {
                envelope.insert("data".to_string(), value);
            }
            if let Some(cursor) = next_cursor {
                envelope.insert(
                    "next_cursor".to_string(),
                    serde_json::Value::String(cursor.to_string()),
                );
            }
            println!("{}", serde_json::Value::Object(envelope));
        } else {
            println!("{}", human());
        }
    }
}
