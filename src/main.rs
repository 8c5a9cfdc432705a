mod api;
mod auth;
mod config;
mod dates;
mod history;
mod models;
mod output;

use std::io::IsTerminal;
use std::path::{Path, PathBuf};

use clap::{Args, Parser, Subcommand};
use dialoguer::{Confirm, Password};
use tracing::{debug, info};
use tracing_subscriber::EnvFilter;
use url::Url;

use crate::api::{ApiClient, SendOutcome};
use crate::auth::{ApiToken, AuthStore};
use crate::config::Config;
use crate::models::Attachment;
use crate::output::{DmChatListOutput, GroupListOutput, MessageListOutput};

const DEFAULT_READ_LIMIT: usize = 20;
const MAX_IMAGE_BYTES: u64 = 20 * 1024 * 1024;

#[derive(Parser)]
#[command(
    name = "groupme",
    version,
    about = "GroupMe CLI",
    after_help = "Examples:\n  groupme list-groups\n  groupme read 12345 --limit 50\n  groupme send 12345 \"hello\" --dry-run\n  groupme send 12345 \"look\" --image ./photo.jpg --confirm\n  groupme list-dms\n  groupme dm 67890 \"hey\" --confirm\n  groupme export 12345 --out history.json --csv-out history.csv\n  groupme search 12345 \"dinner\"\n  groupme group show 12345"
)]
struct Cli {
    #[command(subcommand)]
    command: Command,

    #[arg(long, global = true, help = "Output JSON instead of a table")]
    json: bool,

    #[arg(long, short, global = true, help = "Log requests and pagination to stderr")]
    verbose: bool,
}

#[derive(Subcommand)]
enum Command {
    #[command(about = "Manage the saved API token")]
    Auth {
        #[command(subcommand)]
        command: AuthCommand,
    },
    #[command(about = "List the groups you belong to")]
    ListGroups(ListGroupsArgs),
    #[command(about = "Read recent messages from a group")]
    Read(ReadArgs),
    #[command(about = "Read recent messages from a direct chat")]
    ReadDm(ReadArgs),
    #[command(about = "Send a message to a group")]
    Send(SendArgs),
    #[command(about = "List direct-message chats")]
    ListDms(PageArgs),
    #[command(visible_alias = "send-dm", about = "Send a direct message to a user")]
    Dm(DmArgs),
    #[command(about = "Show the account the token belongs to")]
    Whoami,
    #[command(about = "Like a message")]
    Like(LikeArgs),
    #[command(about = "Remove your like from a message")]
    Unlike(LikeArgs),
    #[command(about = "Export the full history of a group as JSON or CSV")]
    Export(ExportArgs),
    #[command(about = "List groups you have left")]
    FormerGroups(PageArgs),
    #[command(about = "Inspect a single group")]
    Group {
        #[command(subcommand)]
        command: GroupCommand,
    },
    #[command(about = "Search a group's messages")]
    Search(SearchArgs),
    #[command(about = "Search recent direct messages for text")]
    SearchDm(SearchDmArgs),
}

#[derive(Subcommand)]
enum GroupCommand {
    #[command(about = "Show a group's details")]
    Show(GroupShowArgs),
}

#[derive(Args)]
struct GroupShowArgs {
    #[arg(help = "Group id")]
    group_id: String,
}

#[derive(Args)]
struct SearchArgs {
    #[arg(help = "Group id")]
    group_id: String,

    #[arg(allow_hyphen_values = true, help = "Text to search for")]
    query: String,
}

#[derive(Args)]
struct SearchDmArgs {
    #[arg(allow_hyphen_values = true, help = "Text to search for (case-insensitive)")]
    query: String,

    #[arg(long, help = "Only search the chat with this user")]
    user_id: Option<String>,
}

#[derive(Subcommand)]
enum AuthCommand {
    #[command(about = "Save a token to the token file")]
    SaveToken(SaveTokenArgs),
    #[command(about = "Delete the saved token")]
    Logout,
}

#[derive(Args)]
struct SaveTokenArgs {
    #[arg(long, help = "Token to save (prompted when omitted)")]
    token: Option<String>,
}

#[derive(Args)]
struct PageArgs {
    #[arg(long, help = "Page number, starting at 1")]
    page: Option<u32>,

    #[arg(long, help = "Results per page")]
    per_page: Option<u32>,
}

#[derive(Args)]
struct ListGroupsArgs {
    #[command(flatten)]
    page: PageArgs,

    #[arg(long, conflicts_with_all = ["page", "per_page"], help = "Fetch every page")]
    all: bool,
}

#[derive(Args)]
struct ReadArgs {
    #[arg(help = "Group id (or user id for read-dm)")]
    id: String,

    #[arg(long, default_value_t = DEFAULT_READ_LIMIT, help = "Number of messages to show (max 500)")]
    limit: usize,
}

#[derive(Args)]
struct SendArgs {
    #[arg(help = "Group id")]
    group_id: String,

    #[arg(allow_hyphen_values = true, help = "Message text, sent exactly as given")]
    text: String,

    #[arg(long, value_name = "PATH", help = "Attach an image")]
    image: Option<PathBuf>,

    #[command(flatten)]
    gate: SendGateArgs,
}

#[derive(Args)]
struct DmArgs {
    #[arg(help = "User id of the recipient")]
    user_id: String,

    #[arg(allow_hyphen_values = true, help = "Message text, sent exactly as given")]
    text: String,

    #[command(flatten)]
    gate: SendGateArgs,
}

#[derive(Args)]
struct SendGateArgs {
    #[arg(long, conflicts_with = "confirm", help = "Print the payload instead of sending")]
    dry_run: bool,

    #[arg(long, help = "Send without asking for confirmation")]
    confirm: bool,
}

#[derive(Args)]
struct LikeArgs {
    #[arg(help = "Group id, or the chat id for a direct message")]
    conversation_id: String,

    #[arg(help = "Message id")]
    message_id: String,
}

#[derive(Args)]
struct ExportArgs {
    #[arg(help = "Group id")]
    group_id: String,

    #[arg(long, value_name = "PATH", help = "Write JSON to a file instead of stdout")]
    out: Option<PathBuf>,

    #[arg(long, value_name = "PATH", help = "Also write id, created_at, name, text and likes as CSV")]
    csv_out: Option<PathBuf>,
}

#[tokio::main(flavor = "current_thread")]
async fn main() {
    if let Err(error) = run().await {
        eprintln!("{error}");
        std::process::exit(1);
    }
}

async fn run() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();
    dotenvy::dotenv().ok();
    init_logging(cli.verbose);

    let config = Config::load()?;
    debug!(
        api = %config.api_base_url,
        data_dir = %config.data_dir.display(),
        token_path = %config.token_path.display(),
        "configuration loaded"
    );
    let auth_store = AuthStore::new(config.token_path.clone());

    match cli.command {
        Command::Auth { command } => match command {
            AuthCommand::SaveToken(args) => {
                let token = match args.token {
                    Some(token) => token,
                    None => Password::new().with_prompt("GroupMe token").interact()?,
                };
                let token = token.trim();
                if token.is_empty() {
                    return Err("Token cannot be empty.".into());
                }
                auth_store.store_token(&ApiToken::new(token))?;
                println!("Token saved to {}.", auth_store.path().display());
            }
            AuthCommand::Logout => {
                auth_store.clear_token()?;
                println!("Logged out.");
            }
        },
        Command::ListGroups(args) => {
            let api = api_client(&config, &auth_store)?;
            let groups = if args.all {
                api.list_all_groups().await?
            } else {
                api.list_groups(args.page.page, args.page.per_page).await?
            };
            output::print_groups(&GroupListOutput { groups }, cli.json)?;
        }
        Command::Read(args) => {
            let api = api_client(&config, &auth_store)?;
            let messages = api.fetch_messages(&args.id, args.limit).await?;
            output::print_messages(
                &MessageListOutput {
                    conversation: args.id,
                    messages,
                },
                cli.json,
            )?;
        }
        Command::ReadDm(args) => {
            let api = api_client(&config, &auth_store)?;
            let messages = api.fetch_direct_messages(&args.id, args.limit).await?;
            output::print_messages(
                &MessageListOutput {
                    conversation: args.id,
                    messages,
                },
                cli.json,
            )?;
        }
        Command::Send(args) => {
            let api = api_client(&config, &auth_store)?;
            require_text(&args.text, args.image.is_some())?;
            let target = format!("group {}", args.group_id);

            if args.gate.dry_run {
                let attachments = match &args.image {
                    Some(path) => vec![Attachment::image(placeholder_image_url(path).await?)],
                    None => Vec::new(),
                };
                let outcome = api.send_message(&args.group_id, &args.text, attachments, true).await?;
                return report_send(outcome, "Message", cli.json);
            }

            if !confirm_send(&target, &args.text, args.gate.confirm)? {
                println!("Cancelled.");
                return Ok(());
            }

            let mut attachments = Vec::new();
            if let Some(path) = &args.image {
                let (data, content_type) = read_image(path).await?;
                let url = api.upload_image(data, &content_type).await?;
                info!(url = %url, "image uploaded");
                attachments.push(Attachment::image(url));
            }
            let outcome = api.send_message(&args.group_id, &args.text, attachments, false).await?;
            report_send(outcome, "Message", cli.json)?;
        }
        Command::ListDms(args) => {
            let api = api_client(&config, &auth_store)?;
            let chats = api.list_dm_chats(args.page, args.per_page).await?;
            output::print_dm_chats(&DmChatListOutput { chats }, cli.json, dates::now_epoch_seconds())?;
        }
        Command::Dm(args) => {
            let api = api_client(&config, &auth_store)?;
            require_text(&args.text, false)?;
            let target = format!("user {}", args.user_id);

            if !args.gate.dry_run && !confirm_send(&target, &args.text, args.gate.confirm)? {
                println!("Cancelled.");
                return Ok(());
            }
            let outcome = api
                .send_direct_message(&args.user_id, &args.text, Vec::new(), args.gate.dry_run)
                .await?;
            report_send(outcome, "Direct message", cli.json)?;
        }
        Command::Whoami => {
            let api = api_client(&config, &auth_store)?;
            let user = api.me().await?;
            output::print_user(&user, cli.json)?;
        }
        Command::Like(args) => {
            let api = api_client(&config, &auth_store)?;
            api.like_message(&args.conversation_id, &args.message_id).await?;
            println!("Liked message {}.", args.message_id);
        }
        Command::Unlike(args) => {
            let api = api_client(&config, &auth_store)?;
            api.unlike_message(&args.conversation_id, &args.message_id).await?;
            println!("Unliked message {}.", args.message_id);
        }
        Command::Export(args) => {
            let api = api_client(&config, &auth_store)?;
            let messages = api.export_messages(&args.group_id).await?;
            if let Some(path) = &args.out {
                write_export(path, output::json_string(&messages)?.into_bytes()).await?;
                println!("Exported {} messages to {}.", messages.len(), path.display());
            }
            if let Some(path) = &args.csv_out {
                let mut csv = Vec::new();
                output::write_messages_csv(&mut csv, &messages)?;
                write_export(path, csv).await?;
                println!("Exported {} messages as CSV to {}.", messages.len(), path.display());
            }
            if args.out.is_none() && args.csv_out.is_none() {
                output::print_json(&messages)?;
            }
        }
        Command::FormerGroups(args) => {
            let api = api_client(&config, &auth_store)?;
            let groups = api.list_former_groups(args.page, args.per_page).await?;
            output::print_groups(&GroupListOutput { groups }, cli.json)?;
        }
        Command::Group { command } => match command {
            GroupCommand::Show(args) => {
                let api = api_client(&config, &auth_store)?;
                let group = api.group(&args.group_id).await?;
                output::print_group_details(&group, cli.json)?;
            }
        },
        Command::Search(args) => {
            let api = api_client(&config, &auth_store)?;
            require_query(&args.query)?;
            let messages = api.search_group_messages(&args.group_id, &args.query).await?;
            output::print_messages(
                &MessageListOutput {
                    conversation: args.group_id,
                    messages,
                },
                cli.json,
            )?;
        }
        Command::SearchDm(args) => {
            let api = api_client(&config, &auth_store)?;
            require_query(&args.query)?;
            let messages = api
                .search_direct_messages(&args.query, args.user_id.as_deref())
                .await?;
            output::print_messages(
                &MessageListOutput {
                    conversation: args.user_id.unwrap_or_else(|| "direct messages".to_string()),
                    messages,
                },
                cli.json,
            )?;
        }
    }

    Ok(())
}

fn init_logging(verbose: bool) {
    let filter = if verbose {
        EnvFilter::new("warn,groupme=debug")
    } else {
        EnvFilter::try_from_env("GROUPME_LOG").unwrap_or_else(|_| EnvFilter::new("warn"))
    };
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(false)
        .try_init();
}

fn api_client(config: &Config, auth_store: &AuthStore) -> Result<ApiClient, Box<dyn std::error::Error>> {
    let token = auth_store.require_token(config.env_token.as_ref())?;
    debug!(source = token_source(config), "token resolved");
    Ok(ApiClient::from_config(config, token)?)
}

fn token_source(config: &Config) -> &'static str {
    if config.env_token.is_some() {
        "environment"
    } else {
        "token file"
    }
}

fn require_query(query: &str) -> Result<(), Box<dyn std::error::Error>> {
    if query.trim().is_empty() {
        return Err("Search query is empty.".into());
    }
    Ok(())
}

async fn write_export(path: &Path, contents: Vec<u8>) -> Result<(), Box<dyn std::error::Error>> {
    tokio::fs::write(path, contents)
        .await
        .map_err(|err| format!("Failed to write {}: {err}", path.display()))?;
    Ok(())
}

fn require_text(text: &str, has_image: bool) -> Result<(), Box<dyn std::error::Error>> {
    if text.trim().is_empty() && !has_image {
        return Err("Message text is empty. Provide some text or attach an image.".into());
    }
    Ok(())
}

/// `true` when the send may proceed. Without `--confirm` the user is asked,
/// and a session without a terminal is refused rather than sent blindly.
fn confirm_send(target: &str, text: &str, confirmed: bool) -> Result<bool, Box<dyn std::error::Error>> {
    if confirmed {
        return Ok(true);
    }
    if !std::io::stdin().is_terminal() || !console::user_attended_stderr() {
        return Err("Refusing to send without confirmation in a non-interactive session. Pass --confirm to send or --dry-run to preview.".into());
    }
    let preview: String = text.chars().take(60).collect();
    let ellipsis = if text.chars().count() > 60 { "..." } else { "" };
    let answer = Confirm::new()
        .with_prompt(format!("Send to {target}: \"{preview}{ellipsis}\"?"))
        .default(false)
        .interact()?;
    Ok(answer)
}

fn report_send(outcome: SendOutcome, label: &str, json: bool) -> Result<(), Box<dyn std::error::Error>> {
    match outcome {
        SendOutcome::DryRun(payload) => {
            debug!(source_guid = %payload.message().source_guid, "dry run, payload not sent");
            output::print_dry_run(&payload)?;
        }
        SendOutcome::Sent(message) => output::print_sent(label, &message, json)?,
    }
    Ok(())
}

fn image_content_type(path: &Path) -> Result<String, Box<dyn std::error::Error>> {
    let mime = mime_guess::from_path(path)
        .first()
        .ok_or_else(|| format!("Cannot tell the file type of {}.", path.display()))?;
    if mime.type_() != mime_guess::mime::IMAGE {
        return Err(format!("{} is not an image ({mime}).", path.display()).into());
    }
    Ok(mime.essence_str().to_string())
}

async fn check_image_file(path: &Path) -> Result<(), Box<dyn std::error::Error>> {
    let metadata = tokio::fs::metadata(path)
        .await
        .map_err(|err| format!("Cannot read image {}: {err}", path.display()))?;
    if !metadata.is_file() {
        return Err(format!("{} is not a file.", path.display()).into());
    }
    if metadata.len() > MAX_IMAGE_BYTES {
        return Err(format!(
            "{} is too large ({} bytes, limit {MAX_IMAGE_BYTES}).",
            path.display(),
            metadata.len()
        )
        .into());
    }
    Ok(())
}

async fn read_image(path: &Path) -> Result<(Vec<u8>, String), Box<dyn std::error::Error>> {
    let content_type = image_content_type(path)?;
    check_image_file(path).await?;
    let data = tokio::fs::read(path)
        .await
        .map_err(|err| format!("Cannot read image {}: {err}", path.display()))?;
    Ok((data, content_type))
}

/// Stand-in attachment URL for a dry run, which never uploads.
async fn placeholder_image_url(path: &Path) -> Result<String, Box<dyn std::error::Error>> {
    image_content_type(path)?;
    check_image_file(path).await?;
    let absolute = tokio::fs::canonicalize(path)
        .await
        .map_err(|err| format!("Cannot resolve {}: {err}", path.display()))?;
    let url = Url::from_file_path(&absolute)
        .map_err(|()| format!("Cannot build a file URL for {}.", absolute.display()))?;
    Ok(url.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cli_definition_is_consistent() {
        use clap::CommandFactory;
        Cli::command().debug_assert();
    }

    #[test]
    fn dry_run_and_confirm_conflict() {
        let result = Cli::try_parse_from(["groupme", "send", "1", "hi", "--dry-run", "--confirm"]);
        let Err(err) = result else {
            panic!("expected a usage error");
        };
        assert_eq!(err.kind(), clap::error::ErrorKind::ArgumentConflict);
    }

    #[test]
    fn read_limit_defaults_to_twenty() {
        let cli = Cli::try_parse_from(["groupme", "read", "123"]).expect("parse");
        let Command::Read(args) = cli.command else {
            panic!("expected read");
        };
        assert_eq!(args.id, "123");
        assert_eq!(args.limit, DEFAULT_READ_LIMIT);
    }

    #[test]
    fn send_dm_alias_parses_as_dm() {
        let cli = Cli::try_parse_from(["groupme", "send-dm", "55", "see you at 8", "--dry-run"]).expect("parse");
        let Command::Dm(args) = cli.command else {
            panic!("expected dm");
        };
        assert_eq!(args.user_id, "55");
        assert_eq!(args.text, "see you at 8");
        assert!(args.gate.dry_run);
    }

    #[test]
    fn search_dm_user_filter_is_optional() {
        let cli = Cli::try_parse_from(["groupme", "search-dm", "pizza"]).expect("parse");
        let Command::SearchDm(args) = cli.command else {
            panic!("expected search-dm");
        };
        assert_eq!(args.query, "pizza");
        assert!(args.user_id.is_none());

        let cli = Cli::try_parse_from(["groupme", "search-dm", "pizza", "--user-id", "7"]).expect("parse");
        let Command::SearchDm(args) = cli.command else {
            panic!("expected search-dm");
        };
        assert_eq!(args.user_id.as_deref(), Some("7"));
    }

    #[test]
    fn group_show_takes_an_id() {
        let cli = Cli::try_parse_from(["groupme", "group", "show", "42"]).expect("parse");
        let Command::Group {
            command: GroupCommand::Show(args),
        } = cli.command
        else {
            panic!("expected group show");
        };
        assert_eq!(args.group_id, "42");
    }

    #[test]
    fn blank_search_query_is_rejected() {
        assert!(require_query("  ").is_err());
        assert!(require_query("pizza").is_ok());
    }

    #[test]
    fn empty_text_needs_an_image() {
        assert!(require_text("", false).is_err());
        assert!(require_text(" \n\t", false).is_err());
        assert!(require_text("", true).is_ok());
        assert!(require_text("  hi  ", false).is_ok());
    }

    #[test]
    fn image_type_comes_from_extension() {
        assert_eq!(image_content_type(Path::new("a/photo.JPG")).expect("jpeg"), "image/jpeg");
        assert_eq!(image_content_type(Path::new("b.png")).expect("png"), "image/png");
        assert!(image_content_type(Path::new("notes.txt")).is_err());
        assert!(image_content_type(Path::new("no_extension")).is_err());
    }

    #[tokio::test]
    async fn placeholder_url_points_at_local_file() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("cat.png");
        std::fs::write(&path, b"\x89PNG").expect("write");
        let url = placeholder_image_url(&path).await.expect("placeholder");
        assert!(url.starts_with("file:///"), "{url}");
        assert!(url.ends_with("/cat.png"), "{url}");
    }

    #[tokio::test]
    async fn placeholder_url_requires_existing_file() {
        let dir = tempfile::tempdir().expect("tempdir");
        let missing = dir.path().join("gone.png");
        assert!(placeholder_image_url(&missing).await.is_err());
    }
}
