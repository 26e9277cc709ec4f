use crate::config::Config;
use crate::global;
use crate::model::{Caption, User};
use crate::store::{from_row, Filter, RemoteStore, SqliteStore, Table};
use anyhow::Result;
use clap::{Args as ClapArgs, Parser, Subcommand};

#[derive(Parser, Debug)]
#[command(name = "huddle")]
#[command(about = "Meeting companion: presence sync, speaking detection, live captions", long_about = None)]
pub struct Cli {
    #[arg(short, long, global = true)]
    pub verbose: bool,

    #[command(subcommand)]
    pub command: Option<CliCommand>,
}

#[derive(Subcommand, Debug)]
pub enum CliCommand {
    /// Print version information
    Version,
    /// View the caption log for the configured meeting
    Captions(CaptionsCliArgs),
    /// List registered users and their admission state
    Users(UsersCliArgs),
}

#[derive(ClapArgs, Debug)]
pub struct CaptionsCliArgs {
    /// Filter captions by text content
    #[arg(short, long)]
    pub query: Option<String>,
    /// Maximum number of results to show
    #[arg(short, long, default_value = "20")]
    pub limit: usize,
}

#[derive(ClapArgs, Debug)]
pub struct UsersCliArgs {
    /// Show only users waiting for approval
    #[arg(long)]
    pub pending: bool,
}

fn open_store() -> Result<SqliteStore> {
    Ok(SqliteStore::open(
        &global::db_file()?,
        &global::photos_dir()?,
    )?)
}

pub async fn handle_captions_command(args: CaptionsCliArgs) -> Result<()> {
    let config = Config::load()?;
    let store = open_store()?;

    let filter = Filter::all().eq("meeting_id", config.room.meeting_id.as_str());
    let mut captions: Vec<Caption> = store
        .select(Table::Captions, &filter)
        .await?
        .into_iter()
        .map(from_row)
        .collect::<Result<_, _>>()?;

    captions.sort_by(|a, b| a.created_at.cmp(&b.created_at));

    if let Some(query) = &args.query {
        let needle = query.to_lowercase();
        captions.retain(|c| c.text.to_lowercase().contains(&needle));
    }

    let skip = captions.len().saturating_sub(args.limit);
    let captions = &captions[skip..];

    if captions.is_empty() {
        println!("No captions found matching your criteria.");
        return Ok(());
    }

    println!("Showing {} caption(s):\n", captions.len());
    for caption in captions {
        println!(
            "[{}] {}: {}",
            caption.created_at.format("%Y-%m-%d %H:%M:%S"),
            caption.user_name,
            caption.text
        );
    }

    Ok(())
}

pub async fn handle_users_command(args: UsersCliArgs) -> Result<()> {
    let store = open_store()?;

    let mut users: Vec<User> = store
        .select(Table::Users, &Filter::all())
        .await?
        .into_iter()
        .map(from_row)
        .collect::<Result<_, _>>()?;

    if args.pending {
        users.retain(|u| !u.is_admitted());
    }

    if users.is_empty() {
        println!("No users found.");
        return Ok(());
    }

    for user in users {
        let admission = if user.is_admitted() {
            "admitted"
        } else {
            "pending"
        };
        println!(
            "{}  {}  role={}  {}  status={}",
            user.id,
            user.email,
            user.role.as_str(),
            admission,
            user.status.as_str()
        );
    }

    Ok(())
}
