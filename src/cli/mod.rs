pub mod onboard;

use crate::model::ItemKind;
use clap::{Args, Parser, Subcommand};

#[derive(Debug, Parser)]
#[command(
    name = "ritualbell",
    about = "Ritual & task reminder calendar with offline-first delivery"
)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Debug, Subcommand)]
pub enum Commands {
    Onboard,
    Config {
        #[command(subcommand)]
        command: ConfigCommands,
    },
    Status,
    /// Create a daily ritual, weekly ritual or task
    Add {
        #[command(subcommand)]
        command: AddCommands,
    },
    /// Edit an item in place; omitted fields keep their value
    Edit {
        kind: ItemKind,
        id: String,
        #[command(flatten)]
        fields: ItemFields,
        #[arg(long)]
        name: Option<String>,
    },
    Remove {
        kind: ItemKind,
        id: String,
    },
    /// Toggle completion of one occurrence (defaults to today)
    Done {
        kind: ItemKind,
        id: String,
        #[arg(long)]
        date: Option<String>,
    },
    List,
    Month {
        /// YYYY-MM, defaults to the current month
        month: Option<String>,
    },
    /// Run one reminder evaluation now or at `--at YYYY-MM-DDTHH:MM`
    Check {
        #[arg(long)]
        at: Option<String>,
    },
    /// Run one server sweep over all tenants
    Sweep {
        #[arg(long)]
        at: Option<String>,
    },
    Tenant {
        #[command(subcommand)]
        command: TenantCommands,
    },
    Cache {
        #[command(subcommand)]
        command: CacheCommands,
    },
    Service,
}

#[derive(Debug, Subcommand)]
pub enum ConfigCommands {
    Set { key: String, value: String },
    Get { key: String },
}

#[derive(Debug, Clone, Default, Args)]
pub struct ItemFields {
    /// HH:MM
    #[arg(long)]
    pub time: Option<String>,
    #[arg(long)]
    pub description: Option<String>,
    /// Weekday indexes 0-6 (0 = Sunday), comma separated
    #[arg(long, value_delimiter = ',')]
    pub days: Option<Vec<String>>,
    /// YYYY-MM-DD or YYYY-MM-DDTHH:MM
    #[arg(long)]
    pub date: Option<String>,
}

#[derive(Debug, Subcommand)]
pub enum AddCommands {
    Daily {
        name: String,
        #[command(flatten)]
        fields: ItemFields,
    },
    Weekly {
        name: String,
        #[command(flatten)]
        fields: ItemFields,
    },
    Task {
        name: String,
        #[command(flatten)]
        fields: ItemFields,
    },
}

#[derive(Debug, Subcommand)]
pub enum TenantCommands {
    Add {
        tenant: String,
    },
    Token {
        tenant: String,
        token: String,
    },
    Untoken {
        tenant: String,
        token: String,
    },
    /// Publish the local snapshot to a tenant record
    Sync {
        tenant: String,
    },
    Complete {
        tenant: String,
        list: String,
        name: String,
        #[arg(long, default_value_t = false)]
        undo: bool,
    },
    List,
}

#[derive(Debug, Subcommand)]
pub enum CacheCommands {
    Install,
    Activate,
    Fetch {
        url: String,
        #[arg(long, default_value_t = false)]
        navigate: bool,
    },
    Precache {
        #[arg(required = true)]
        urls: Vec<String>,
    },
}
