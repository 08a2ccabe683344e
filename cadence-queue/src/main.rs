//! cadence-queue - Manage platforms and scheduled posts
//!
//! Operator tool for the Cadence store: register platforms, schedule and edit
//! posts, and inspect what the pipeline has done with them.

use clap::{Args, Parser, Subcommand};
use libcadence::logging::{LogFormat, LoggingConfig};
use libcadence::queue::QueueStats;
use libcadence::scheduling::parse_schedule_timestamp;
use libcadence::{
    CadenceError, Config, Database, Platform, PlatformType, Post, PostStatus, PostUpdate,
    PostWithLinks, Result, SqliteQueue, TaskQueue,
};

#[derive(Parser, Debug)]
#[command(name = "cadence-queue")]
#[command(version)]
#[command(about = "Manage platforms and scheduled posts")]
#[command(long_about = "\
cadence-queue - Manage platforms and scheduled posts

DESCRIPTION:
    cadence-queue is the operator tool for Cadence. Use it to register the
    platforms posts go to, schedule posts for later publication, edit or
    cancel them while they are still waiting, and inspect the outcome per
    platform once cadence-worker has processed them.

COMMANDS:
    platform    Add, list or toggle platforms
    schedule    Create a scheduled post
    draft       Create a draft post
    edit        Change a draft or scheduled post
    reschedule  Move a post to a different time
    cancel      Turn a scheduled post back into a draft
    delete      Delete a draft post
    list        List posts
    show        Show a post and its per-platform status
    stats       Show post, platform link and queue counts

USAGE EXAMPLES:
    # Register a platform
    cadence-queue platform add --name \"Company Twitter\" --type twitter

    # Schedule a post for two platforms
    cadence-queue schedule --title Launch --content \"We are live\" \\
        --at \"tomorrow 3pm\" --platform 1 2

    # Reschedule a post
    cadence-queue reschedule <POST_ID> 2h

    # Posts still waiting, as JSON
    cadence-queue list --status scheduled --format json

TIME FORMATS:
    now, 30m, 2h, \"1day 3h\", \"tomorrow 3pm\", \"2025-11-20 15:00\" (UTC),
    2025-11-20T15:00:00Z

CONFIGURATION:
    Configuration file: ~/.config/cadence/config.toml
    Database location: ~/.local/share/cadence/cadence.db

    Override with environment variables:
        CADENCE_CONFIG     - Path to config file
        CADENCE_DB_PATH    - Path to database file

EXIT CODES:
    0 - Success
    1 - Operation failed
    2 - Configuration error
    3 - Invalid input (bad post ID, time format, post no longer editable, etc.)
")]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Enable verbose logging to stderr
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Log format: text, json or pretty
    #[arg(long, global = true, value_name = "FORMAT")]
    log_format: Option<LogFormat>,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Manage platforms
    Platform {
        #[command(subcommand)]
        action: PlatformCommand,
    },

    /// Create a post scheduled for publication
    Schedule(PostArgs),

    /// Create a draft post (not published until rescheduled)
    Draft(PostArgs),

    /// Change the text, image or time of a draft or scheduled post
    Edit {
        /// Post ID to edit
        post_id: String,

        #[arg(long)]
        title: Option<String>,

        #[arg(long)]
        content: Option<String>,

        /// New image URL
        #[arg(long, conflicts_with = "clear_image")]
        image_url: Option<String>,

        /// Remove the image
        #[arg(long)]
        clear_image: bool,

        /// New publication time
        #[arg(long, value_name = "WHEN")]
        at: Option<String>,
    },

    /// Reschedule a post
    Reschedule {
        /// Post ID to reschedule
        post_id: String,

        /// New schedule time (e.g., "tomorrow 3pm", "2h")
        time: String,
    },

    /// Cancel a scheduled post (it becomes a draft)
    Cancel {
        /// Post ID to cancel
        post_id: String,
    },

    /// Delete a draft post and its platform links
    Delete {
        /// Post ID to delete
        post_id: String,
    },

    /// List posts
    List {
        /// Only posts with this status: draft, scheduled, published, failed
        #[arg(short, long)]
        status: Option<PostStatus>,

        /// Output format: text or json
        #[arg(short, long, default_value = "text")]
        format: String,

        /// Maximum number of posts
        #[arg(short, long, default_value_t = 50)]
        limit: usize,
    },

    /// Show a post with the status of every platform link
    Show {
        /// Post ID to show
        post_id: String,

        /// Output format: text or json
        #[arg(short, long, default_value = "text")]
        format: String,
    },

    /// Show post, link and queue statistics
    Stats {
        /// Output format: text or json
        #[arg(short, long, default_value = "text")]
        format: String,
    },
}

#[derive(Subcommand, Debug)]
enum PlatformCommand {
    /// Register a platform
    Add {
        /// Display name
        #[arg(long)]
        name: String,

        /// Network: instagram, facebook, twitter, linkedin
        #[arg(long = "type", value_name = "TYPE")]
        platform_type: PlatformType,
    },

    /// List platforms
    List {
        /// Output format: text or json
        #[arg(short, long, default_value = "text")]
        format: String,
    },

    /// Flip a platform's active flag
    Toggle {
        /// Platform ID
        platform_id: i64,
    },
}

#[derive(Args, Debug)]
struct PostArgs {
    #[arg(long)]
    title: String,

    #[arg(long)]
    content: String,

    #[arg(long)]
    image_url: Option<String>,

    /// Publication time
    #[arg(long, value_name = "WHEN", default_value = "now")]
    at: String,

    /// Platform IDs to publish to, in publication order
    #[arg(long = "platform", value_name = "ID", num_args = 1.., required = true)]
    platforms: Vec<i64>,
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    LoggingConfig::resolve(cli.log_format, cli.verbose).init();

    if let Err(e) = run(cli).await {
        eprintln!("Error: {}", e);
        std::process::exit(e.exit_code());
    }
}

async fn run(cli: Cli) -> Result<()> {
    let config = Config::load()?;
    let db = Database::new(&config.database.path).await?;

    match cli.command {
        Commands::Platform { action } => cmd_platform(&db, action).await?,
        Commands::Schedule(args) => cmd_create(&db, args, PostStatus::Scheduled).await?,
        Commands::Draft(args) => cmd_create(&db, args, PostStatus::Draft).await?,
        Commands::Edit {
            post_id,
            title,
            content,
            image_url,
            clear_image,
            at,
        } => {
            let scheduled_at = at.as_deref().map(parse_schedule_timestamp).transpose()?;
            let image_url = if clear_image {
                Some(None)
            } else {
                image_url.map(Some)
            };
            let update = PostUpdate {
                title,
                content,
                image_url,
                scheduled_at,
            };
            let post = db.update_post(&post_id, update).await?;
            println!("Updated post {}", post.id);
        }
        Commands::Reschedule { post_id, time } => {
            cmd_reschedule(&db, &post_id, &time).await?;
        }
        Commands::Cancel { post_id } => {
            let post = db.cancel_post(&post_id).await?;
            println!("Cancelled post {} (now {})", post.id, post.status);
        }
        Commands::Delete { post_id } => {
            db.delete_post(&post_id).await?;
            println!("Deleted post {}", post_id);
        }
        Commands::List {
            status,
            format,
            limit,
        } => {
            validate_format(&format)?;
            let posts = db.list_posts(status, limit).await?;
            if format == "json" {
                print_json(&posts)?;
            } else {
                output_list_text(&posts);
            }
        }
        Commands::Show { post_id, format } => {
            validate_format(&format)?;
            let post = db
                .get_post_with_links(&post_id)
                .await?
                .ok_or_else(|| CadenceError::NotFound(format!("post {}", post_id)))?;
            if format == "json" {
                print_json(&post)?;
            } else {
                output_show_text(&post);
            }
        }
        Commands::Stats { format } => {
            cmd_stats(&db, &config, &format).await?;
        }
    }

    Ok(())
}

fn validate_format(format: &str) -> Result<()> {
    if format != "text" && format != "json" {
        return Err(CadenceError::InvalidInput(format!(
            "Invalid format '{}'. Must be 'text' or 'json'",
            format
        )));
    }
    Ok(())
}

fn print_json<T: serde::Serialize + ?Sized>(value: &T) -> Result<()> {
    let json = serde_json::to_string_pretty(value)
        .map_err(|e| CadenceError::InvalidInput(format!("Failed to serialize output: {}", e)))?;
    println!("{}", json);
    Ok(())
}

async fn cmd_platform(db: &Database, action: PlatformCommand) -> Result<()> {
    match action {
        PlatformCommand::Add {
            name,
            platform_type,
        } => {
            if name.trim().is_empty() {
                return Err(CadenceError::InvalidInput(
                    "Platform name cannot be empty".to_string(),
                ));
            }
            let platform = db.create_platform(name.trim(), platform_type).await?;
            println!("{}", platform.id);
        }
        PlatformCommand::List { format } => {
            validate_format(&format)?;
            let platforms = db.list_platforms().await?;
            if format == "json" {
                print_json(&platforms)?;
            } else {
                output_platforms_text(&platforms);
            }
        }
        PlatformCommand::Toggle { platform_id } => {
            let active = db.toggle_platform_active(platform_id).await?;
            println!(
                "Platform {} is now {}",
                platform_id,
                if active { "active" } else { "inactive" }
            );
        }
    }
    Ok(())
}

/// Create a post with its links; prints the new post id on stdout
async fn cmd_create(db: &Database, args: PostArgs, status: PostStatus) -> Result<()> {
    if args.title.trim().is_empty() {
        return Err(CadenceError::InvalidInput("Title cannot be empty".to_string()));
    }
    if args.content.trim().is_empty() {
        return Err(CadenceError::InvalidInput("Content cannot be empty".to_string()));
    }

    let scheduled_at = parse_schedule_timestamp(&args.at)?;

    let mut post = Post::new(args.title, args.content, scheduled_at);
    post.image_url = args.image_url;
    post.status = status;

    let created = db.create_post_with_links(&post, &args.platforms).await?;
    tracing::debug!(
        post_id = %created.post.id,
        platforms = created.links.len(),
        status = %created.post.status,
        "Created post"
    );
    println!("{}", created.post.id);
    Ok(())
}

async fn cmd_reschedule(db: &Database, post_id: &str, time: &str) -> Result<()> {
    let scheduled_at = parse_schedule_timestamp(time)?;
    let post = db.reschedule_post(post_id, scheduled_at).await?;
    println!(
        "Rescheduled post {} to {}",
        post.id,
        format_timestamp(post.scheduled_at)
    );
    Ok(())
}

async fn cmd_stats(db: &Database, config: &Config, format: &str) -> Result<()> {
    validate_format(format)?;

    let posts = db.post_counts().await?;
    let links = db.link_counts().await?;
    let queue = SqliteQueue::new(db, config.visibility_timeout())
        .stats(&config.scanner.queue)
        .await?;

    if format == "json" {
        let to_map = |pairs: Vec<(String, i64)>| -> serde_json::Map<String, serde_json::Value> {
            pairs
                .into_iter()
                .map(|(k, v)| (k, serde_json::Value::from(v)))
                .collect()
        };
        let json = serde_json::json!({
            "posts": to_map(posts.iter().map(|(s, n)| (s.to_string(), *n)).collect()),
            "links": to_map(links.iter().map(|(s, n)| (s.to_string(), *n)).collect()),
            "queue": queue,
        });
        print_json(&json)?;
    } else {
        output_stats_text(&posts, &links, &queue);
    }
    Ok(())
}

fn output_stats_text(
    posts: &[(PostStatus, i64)],
    links: &[(libcadence::LinkStatus, i64)],
    queue: &QueueStats,
) {
    let total: i64 = posts.iter().map(|(_, n)| n).sum();
    println!("Posts: {}", total);
    for (status, n) in posts {
        println!("  {:<10} {}", status, n);
    }

    println!("Platform links:");
    for (status, n) in links {
        println!("  {:<10} {}", status, n);
    }

    println!("Queue:");
    println!("  {:<10} {}", "ready", queue.ready);
    println!("  {:<10} {}", "delayed", queue.delayed);
    println!("  {:<10} {}", "reserved", queue.reserved);
}

fn output_platforms_text(platforms: &[Platform]) {
    for p in platforms {
        println!(
            "{} | {} | {} | {}",
            p.id,
            p.platform_type.label(),
            p.name,
            if p.is_active { "active" } else { "inactive" }
        );
    }
}

fn output_list_text(posts: &[Post]) {
    let now = chrono::Utc::now().timestamp();

    for post in posts {
        let when = if post.status == PostStatus::Scheduled {
            format_time_until(now, post.scheduled_at)
        } else {
            format_timestamp(post.scheduled_at)
        };
        println!(
            "{} | {} | {} | {}",
            post.id,
            post.status,
            truncate_content(&post.title, 50),
            when
        );
    }
}

fn output_show_text(item: &PostWithLinks) {
    let post = &item.post;
    println!("ID:        {}", post.id);
    println!("Title:     {}", post.title);
    println!("Status:    {}", post.status);
    println!("Scheduled: {}", format_timestamp(post.scheduled_at));
    if let Some(url) = &post.image_url {
        println!("Image:     {}", url);
    }
    println!();
    println!("{}", post.content);
    println!();

    for link in &item.links {
        let detail = match (&link.platform_post_id, &link.error) {
            (Some(ext), _) => ext.clone(),
            (None, Some(err)) => err.clone(),
            (None, None) => String::new(),
        };
        println!(
            "  [{}] {} {} {}",
            link.platform_id,
            link.platform_type.label(),
            link.status,
            detail
        );
    }
}

/// Truncate to `max_chars` characters with an ellipsis
fn truncate_content(content: &str, max_chars: usize) -> String {
    if content.chars().count() <= max_chars {
        content.to_string()
    } else {
        let cut: String = content.chars().take(max_chars).collect();
        format!("{}...", cut)
    }
}

fn format_timestamp(ts: i64) -> String {
    chrono::DateTime::from_timestamp(ts, 0)
        .map(|dt| dt.format("%Y-%m-%d %H:%M UTC").to_string())
        .unwrap_or_else(|| ts.to_string())
}

/// Format time until scheduled time in human-readable format
fn format_time_until(now: i64, scheduled_at: i64) -> String {
    let diff = scheduled_at - now;

    if diff < 0 {
        return "due".to_string();
    }

    let minutes = diff / 60;
    let hours = minutes / 60;
    let days = hours / 24;

    if days > 0 {
        format!("in {} day{}", days, if days == 1 { "" } else { "s" })
    } else if hours > 0 {
        format!("in {} hour{}", hours, if hours == 1 { "" } else { "s" })
    } else if minutes > 0 {
        format!("in {} minute{}", minutes, if minutes == 1 { "" } else { "s" })
    } else {
        "in <1 minute".to_string()
    }
}
