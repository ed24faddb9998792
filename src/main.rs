use anyhow::Result;
use clap::{Args, Parser, Subcommand};

#[derive(Debug, Parser)]
#[command(name = "maildesk", version, about = "Gmail inbox-to-ticket sync and triage")]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Output structured JSON
    #[arg(long, global = true)]
    json: bool,
}

#[derive(Debug, Subcommand)]
enum Commands {
    /// Pull inbox threads into the ticket store
    Sync(SyncArgs),
    /// Frequent incremental check for changed threads
    Check(CheckArgs),
    /// Inspect and manage tickets
    Tickets {
        #[command(subcommand)]
        command: TicketCommands,
    },
    /// Send a reply in a ticket's thread
    Reply(ReplyArgs),
    /// Manage excluded senders
    Blacklist {
        #[command(subcommand)]
        command: BlacklistCommands,
    },
    /// Inspect or flush sync state
    State {
        #[command(subcommand)]
        command: StateCommands,
    },
    /// Show ticket store stats
    Stats,
}

#[derive(Debug, Args)]
struct SyncArgs {
    /// Range start date (YYYY-MM-DD)
    #[arg(long)]
    start: Option<String>,
    /// Range end date, inclusive (YYYY-MM-DD)
    #[arg(long)]
    end: Option<String>,
    #[arg(long, default_value_t = 500)]
    max_threads: usize,
    /// Disable change-log tailing even when a watermark exists
    #[arg(long, default_value_t = false)]
    no_incremental: bool,
    /// Search archived mail too, not just the inbox
    #[arg(long, default_value_t = false)]
    include_archived: bool,
    /// Also create tickets for threads that are not awaiting a reply
    #[arg(long, default_value_t = false)]
    all_threads: bool,
    /// Run the triage classifier on awaiting threads
    #[arg(long, default_value_t = false)]
    classify: bool,
    /// Keep syncing on an interval
    #[arg(long, default_value_t = false)]
    watch: bool,
    /// Seconds between watch iterations
    #[arg(long, default_value_t = 300)]
    interval: u64,
}

#[derive(Debug, Args)]
struct CheckArgs {
    #[arg(long, default_value_t = 200)]
    max_threads: usize,
}

#[derive(Debug, Subcommand)]
enum TicketCommands {
    /// List tickets with optional filters
    List(TicketListArgs),
    /// Show one ticket by thread id
    Show { thread_id: String },
    /// Delete all tickets (administrative)
    Clear {
        #[arg(long, default_value_t = false)]
        yes: bool,
    },
}

#[derive(Debug, Args)]
struct TicketListArgs {
    /// Filter by status (PENDING, IN_PROGRESS, RESPONDED, NO_REPLY_NEEDED)
    #[arg(long)]
    status: Option<String>,
    /// Only threads awaiting a reply
    #[arg(long, default_value_t = false)]
    awaiting: bool,
    /// Only threads with unread messages
    #[arg(long, default_value_t = false)]
    unread: bool,
    /// Only tickets due on or before this date (YYYY-MM-DD)
    #[arg(long)]
    due_before: Option<String>,
    /// Substring match on subject, snippet or sender
    #[arg(long)]
    query: Option<String>,
    #[arg(long, default_value_t = 50)]
    limit: usize,
}

#[derive(Debug, Args)]
struct ReplyArgs {
    thread_id: String,
    /// Recipient; defaults to the ticket's sender
    #[arg(long)]
    to: Option<String>,
    /// Subject; defaults to Re: the ticket's subject
    #[arg(long)]
    subject: Option<String>,
    #[arg(long)]
    body: String,
}

#[derive(Debug, Subcommand)]
enum BlacklistCommands {
    Add { email: String },
    Remove { email: String },
    List,
}

#[derive(Debug, Subcommand)]
enum StateCommands {
    /// Show the stored sync watermark
    Show,
    /// Drop the stored watermark, forcing a window resync
    Flush {
        #[arg(long, default_value_t = false)]
        yes: bool,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive(tracing::Level::WARN.into()),
        )
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    commands::dispatch(cli).await
}

mod commands {
    use anyhow::{anyhow, Context, Result};
    use chrono::{NaiveDate, TimeZone, Utc};

    use maildesk::classify::OwnAddresses;
    use maildesk::config::Config;
    use maildesk::db::models::TicketStatus;
    use maildesk::db::{Database, TicketFilters};
    use maildesk::gmail::{GmailGateway, MailboxGateway};
    use maildesk::output::{self, OutputFormat};
    use maildesk::sync::{sync_inbox_threads, SyncOptions, SyncSummary, WATERMARK_KEY};
    use maildesk::triage;

    use super::{
        BlacklistCommands, CheckArgs, Cli, Commands, ReplyArgs, StateCommands, SyncArgs,
        TicketCommands, TicketListArgs,
    };

    pub async fn dispatch(cli: Cli) -> Result<()> {
        match cli.command {
            Commands::Sync(args) => handle_sync(args, cli.json).await,
            Commands::Check(args) => handle_check(args, cli.json).await,
            Commands::Tickets { command } => handle_tickets(command, cli.json).await,
            Commands::Reply(args) => handle_reply(args).await,
            Commands::Blacklist { command } => handle_blacklist(command, cli.json).await,
            Commands::State { command } => handle_state(command).await,
            Commands::Stats => handle_stats(cli.json).await,
        }
    }

    fn open_database() -> Result<Database> {
        let db_path = Config::default_db_path().context("resolve maildesk database path")?;
        Database::open(&db_path)
            .with_context(|| format!("open maildesk database at {}", db_path.display()))
    }

    async fn handle_sync(args: SyncArgs, json: bool) -> Result<()> {
        let config = Config::from_env()?;
        let db = open_database()?;
        let gateway = GmailGateway::from_config(&config);
        let classifier = triage::classifier_from_config(&config);
        let own = OwnAddresses::new(&config.my_emails);

        let options = SyncOptions {
            max_threads: args.max_threads,
            start: parse_date_arg("start", args.start)?,
            end: parse_date_arg("end", args.end)?,
            incremental: !args.no_incremental,
            include_archived: args.include_archived || config.include_archived,
            awaiting_only: !args.all_threads,
            auto_classify: args.classify,
            recovery_window_days: config.recovery_window_days,
        };

        if args.watch {
            loop {
                let summary =
                    sync_inbox_threads(&gateway, &db, classifier.as_ref(), &own, &options).await?;
                print_summary(&summary, json)?;
                tokio::time::sleep(std::time::Duration::from_secs(args.interval)).await;
            }
        } else {
            let summary =
                sync_inbox_threads(&gateway, &db, classifier.as_ref(), &own, &options).await?;
            print_summary(&summary, json)
        }
    }

    async fn handle_check(args: CheckArgs, json: bool) -> Result<()> {
        let config = Config::from_env()?;
        let db = open_database()?;
        let gateway = GmailGateway::from_config(&config);
        let classifier = triage::classifier_from_config(&config);
        let own = OwnAddresses::new(&config.my_emails);

        let options = SyncOptions {
            max_threads: args.max_threads,
            recovery_window_days: config.recovery_window_days,
            ..SyncOptions::default()
        };

        let summary =
            sync_inbox_threads(&gateway, &db, classifier.as_ref(), &own, &options).await?;
        print_summary(&summary, json)
    }

    fn print_summary(summary: &SyncSummary, json: bool) -> Result<()> {
        if json {
            println!("{}", serde_json::to_string_pretty(summary)?);
            return Ok(());
        }

        if summary.ok {
            println!(
                "sync ok: mode={} threads={} upserted={} skipped={} hit_limit={}",
                summary
                    .mode
                    .map(|m| m.to_string())
                    .unwrap_or_else(|| "-".to_string()),
                summary.threads_seen,
                summary.upserted,
                summary.skipped,
                summary.hit_limit
            );
        } else {
            println!(
                "sync failed: {}",
                summary.error.as_deref().unwrap_or("unknown error")
            );
        }
        Ok(())
    }

    async fn handle_tickets(command: TicketCommands, json: bool) -> Result<()> {
        let db = open_database()?;

        match command {
            TicketCommands::List(args) => {
                let filters = ticket_filters(args)?;
                let tickets = db.list_tickets(filters)?;
                let formatted =
                    output::format_tickets(OutputFormat::from_json_flag(json), &tickets)?;
                println!("{formatted}");
            }
            TicketCommands::Show { thread_id } => {
                let ticket = db
                    .get_ticket(&thread_id)?
                    .ok_or_else(|| anyhow!("no ticket for thread '{thread_id}'"))?;
                let formatted =
                    output::format_ticket(OutputFormat::from_json_flag(json), &ticket)?;
                println!("{formatted}");
            }
            TicketCommands::Clear { yes } => {
                if !yes {
                    println!("This deletes every ticket. Re-run with --yes to confirm.");
                    return Ok(());
                }
                let deleted = db.clear_tickets()?;
                println!("Deleted {deleted} tickets.");
            }
        }
        Ok(())
    }

    fn ticket_filters(args: TicketListArgs) -> Result<TicketFilters> {
        let status = args
            .status
            .map(|raw| {
                raw.parse::<TicketStatus>()
                    .map_err(|e| anyhow!("invalid --status: {e}"))
            })
            .transpose()?;

        let due_before = parse_date_arg("due-before", args.due_before)?
            .and_then(|date| date.and_hms_opt(23, 59, 59))
            .map(|naive| Utc.from_utc_datetime(&naive));

        Ok(TicketFilters {
            status,
            not_replied: args.awaiting.then_some(true),
            unread: args.unread.then_some(true),
            due_before,
            from_email: None,
            query: args.query,
            limit: args.limit,
            offset: 0,
        })
    }

    async fn handle_reply(args: ReplyArgs) -> Result<()> {
        let config = Config::from_env()?;
        let db = open_database()?;
        let gateway = GmailGateway::from_config(&config);

        let mut ticket = db
            .get_ticket(&args.thread_id)?
            .ok_or_else(|| anyhow!("no ticket for thread '{}'", args.thread_id))?;

        let to = args
            .to
            .or_else(|| ticket.from_email.clone())
            .ok_or_else(|| anyhow!("no recipient: ticket has no sender email, pass --to"))?;
        let subject = args.subject.unwrap_or_else(|| reply_subject(&ticket.subject));

        gateway
            .send_reply(&args.thread_id, &to, &subject, &args.body)
            .await
            .context("send reply")?;

        // Only a successful send marks the ticket responded.
        ticket.status = TicketStatus::Responded;
        ticket.is_not_replied = false;
        ticket.last_from_me = true;
        ticket.updated_at = Utc::now();
        db.upsert_ticket(&ticket)?;

        println!("Reply sent to {to} in thread {}.", args.thread_id);
        Ok(())
    }

    fn reply_subject(subject: &Option<String>) -> String {
        match subject.as_deref() {
            Some(s) if s.to_ascii_lowercase().starts_with("re:") => s.to_string(),
            Some(s) => format!("Re: {s}"),
            None => "Re:".to_string(),
        }
    }

    async fn handle_blacklist(command: BlacklistCommands, json: bool) -> Result<()> {
        let db = open_database()?;

        match command {
            BlacklistCommands::Add { email } => {
                db.add_blacklisted(&email)?;
                println!("Blacklisted: {}", email.trim().to_ascii_lowercase());
            }
            BlacklistCommands::Remove { email } => {
                let removed = db.remove_blacklisted(&email)?;
                if removed == 0 {
                    println!("Not blacklisted: {email}");
                } else {
                    println!("Removed from blacklist: {email}");
                }
            }
            BlacklistCommands::List => {
                let senders = db.list_blacklisted()?;
                let formatted =
                    output::format_blacklist(OutputFormat::from_json_flag(json), &senders)?;
                println!("{formatted}");
            }
        }
        Ok(())
    }

    async fn handle_state(command: StateCommands) -> Result<()> {
        let db = open_database()?;

        match command {
            StateCommands::Show => match db.get_sync_state(WATERMARK_KEY)? {
                Some(state) => println!(
                    "{} = {} (updated {})",
                    state.key,
                    state.value.as_deref().unwrap_or("-"),
                    state.updated_at.as_deref().unwrap_or("-")
                ),
                None => println!("No watermark stored; next sync bootstraps from a window."),
            },
            StateCommands::Flush { yes } => {
                if !yes {
                    println!("This drops the sync watermark. Re-run with --yes to confirm.");
                    return Ok(());
                }
                let removed = db.clear_sync_state(WATERMARK_KEY)?;
                if removed == 0 {
                    println!("No watermark stored.");
                } else {
                    println!("Watermark flushed; next sync resyncs a recent window.");
                }
            }
        }
        Ok(())
    }

    async fn handle_stats(json: bool) -> Result<()> {
        let db = open_database()?;
        let stats = db.get_stats()?;
        let formatted = output::format_stats(OutputFormat::from_json_flag(json), &stats)?;
        println!("{formatted}");
        Ok(())
    }

    fn parse_date_arg(label: &str, raw: Option<String>) -> Result<Option<NaiveDate>> {
        raw.map(|value| {
            NaiveDate::parse_from_str(value.trim(), "%Y-%m-%d")
                .with_context(|| format!("invalid --{label} date '{value}', expected YYYY-MM-DD"))
        })
        .transpose()
    }
}
