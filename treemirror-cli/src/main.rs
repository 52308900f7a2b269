//! Treemirror CLI - browse and search a cached mirror of a document tree

mod fetcher;
mod workspace;

use clap::{Parser, Subcommand};
use colored::Colorize;
use fetcher::Fetcher;
use serde::Serialize;
use std::path::PathBuf;
use time::format_description::well_known::Rfc3339;
use tracing_subscriber::EnvFilter;
use treemirror_core::store::index_unique;
use treemirror_core::{HierarchyBuilder, Item, Mirror, MirrorError, Tree};
use workspace::Workspace;

#[derive(Parser)]
#[command(name = "treemirror")]
#[command(about = "Cached, searchable mirror of a document hierarchy", long_about = None)]
struct Cli {
    /// Override workspace root detection
    #[arg(long, global = true)]
    root: Option<PathBuf>,

    /// Output as JSON
    #[arg(long, global = true)]
    json: bool,

    /// Item snapshot to load (default: .treemirror/items.json)
    #[arg(long, global = true, env = "TREEMIRROR_SNAPSHOT")]
    snapshot: Option<PathBuf>,

    /// Directory holding one `<id>.md` file per item
    #[arg(long, global = true, env = "TREEMIRROR_CONTENT_DIR")]
    content_dir: Option<PathBuf>,

    /// Content API base URL (GET {url}/items/{id}/content)
    #[arg(
        long,
        global = true,
        env = "TREEMIRROR_CONTENT_URL",
        conflicts_with = "content_dir"
    )]
    content_url: Option<String>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Create .treemirror/ and config.toml
    Init,

    /// Validate the snapshot: duplicate ids and parent anomalies
    Check,

    /// Show the hierarchy, optionally filtered by a search
    Tree {
        /// Only show items matching this query
        #[arg(short, long)]
        query: Option<String>,

        /// List items newest first instead of nesting them
        #[arg(long)]
        flat: bool,
    },

    /// Ranked search over titles, cached content and attributes
    Search {
        /// Free-text query
        text: String,
    },

    /// Print one item's content, fetching it if the cache is stale
    Show {
        /// Item id
        id: String,
    },

    /// Fetch content for every item
    Sync,

    /// Inspect or reset the content cache
    Cache {
        #[command(subcommand)]
        action: CacheAction,
    },
}

#[derive(Subcommand)]
enum CacheAction {
    /// Show cache size
    Status,
    /// Delete all cached content
    Clear,
    /// Drop one item's cached content
    Invalidate {
        /// Item id
        id: String,
    },
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();
    init_logging();

    let result = run(&cli).await;

    if let Err(e) = result {
        if cli.json {
            let envelope = e.to_envelope();
            let rendered =
                serde_json::to_string_pretty(&envelope).unwrap_or_else(|_| e.to_string());
            eprintln!("{}", rendered);
        } else {
            eprintln!("{}: {}", "Error".red(), e);
        }
        std::process::exit(1);
    }
}

fn init_logging() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}

async fn run(cli: &Cli) -> treemirror_core::Result<()> {
    match &cli.command {
        Commands::Init => cmd_init(cli),
        Commands::Check => cmd_check(cli),
        Commands::Tree { query, flat } => cmd_tree(cli, query.as_deref(), *flat),
        Commands::Search { text } => cmd_search(cli, text),
        Commands::Show { id } => cmd_show(cli, id).await,
        Commands::Sync => cmd_sync(cli).await,
        Commands::Cache { action } => cmd_cache(cli, action),
    }
}

fn open_workspace(cli: &Cli) -> treemirror_core::Result<Workspace> {
    Workspace::open(workspace::detect_root(cli.root.clone())?)
}

fn load_items(cli: &Cli, ws: &Workspace) -> treemirror_core::Result<Vec<Item>> {
    workspace::load_snapshot(&ws.snapshot_path(cli.snapshot.as_deref()))
}

fn make_fetcher(cli: &Cli) -> treemirror_core::Result<Fetcher> {
    Fetcher::from_args(cli.content_dir.clone(), cli.content_url.as_deref())
        .map_err(|e| MirrorError::ConfigParse(format!("invalid --content-url: {}", e)))
}

/// Mirror populated from the snapshot
fn open_mirror(cli: &Cli) -> treemirror_core::Result<Mirror<Fetcher>> {
    let ws = open_workspace(cli)?;
    let items = load_items(cli, &ws)?;
    let mirror = ws.mirror(make_fetcher(cli)?)?;
    mirror.refresh(items)?;
    Ok(mirror)
}

fn print_json<T: Serialize>(value: &T) -> treemirror_core::Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

fn cmd_init(cli: &Cli) -> treemirror_core::Result<()> {
    let root = workspace::detect_root(cli.root.clone())?;
    Workspace::init(&root)?;

    println!("{} .treemirror/config.toml", "Created".green());
    println!("{} .treemirror/ to .gitignore", "Added".green());
    Ok(())
}

#[derive(Serialize)]
struct CheckReport {
    items: usize,
    roots: usize,
    edges: usize,
    diagnostics: treemirror_core::Diagnostics,
}

fn cmd_check(cli: &Cli) -> treemirror_core::Result<()> {
    let ws = open_workspace(cli)?;
    let items = load_items(cli, &ws)?;

    // Duplicate ids block everything else
    index_unique(&items)?;

    let builder = HierarchyBuilder::new(ws.config.root_sentinel().map(str::to_string));
    let adjacency = builder.build(&items);
    let tree = adjacency.tree();
    let report = CheckReport {
        items: items.len(),
        roots: tree.nodes.len(),
        edges: adjacency.edge_count(),
        diagnostics: tree.diagnostics,
    };

    if cli.json {
        return print_json(&report);
    }

    println!("{}: {}", "Items".blue(), report.items);
    println!("{}: {}", "Roots".blue(), report.roots);
    println!("{}: {}", "Edges".blue(), report.edges);
    if report.diagnostics.is_empty() {
        println!("{}", "No parent anomalies".green());
    } else {
        println!(
            "{}: {} parent anomalies",
            "Warning".yellow(),
            report.diagnostics.len()
        );
        for diagnostic in report.diagnostics.iter() {
            println!("  {}", diagnostic);
        }
    }
    Ok(())
}

fn cmd_tree(cli: &Cli, query: Option<&str>, flat: bool) -> treemirror_core::Result<()> {
    let mirror = open_mirror(cli)?;
    mirror.warm_cache();

    if flat {
        let items = mirror.flat(query);
        if cli.json {
            return print_json(&items.iter().map(ItemSummary::from).collect::<Vec<_>>());
        }
        for item in &items {
            println!(
                "{}  {} {}",
                format_timestamp(item).dimmed(),
                item.title,
                format!("({})", item.id).dimmed()
            );
        }
        println!("({} items)", items.len());
        return Ok(());
    }

    let tree = mirror.tree(query);
    if cli.json {
        return print_json(&tree);
    }
    for line in tree_lines(&tree) {
        println!("{}", line);
    }
    for diagnostic in tree.diagnostics.iter() {
        eprintln!("{}: {}", "Warning".yellow(), diagnostic);
    }
    Ok(())
}

/// One indented line per node, depth first
fn tree_lines(tree: &Tree) -> Vec<String> {
    tree.depth_first()
        .map(|(depth, node)| {
            let title = if node.children.is_empty() {
                node.title.normal()
            } else {
                node.title.bold()
            };
            format!(
                "{}{} {}",
                "  ".repeat(depth),
                title,
                format!("({})", node.id).dimmed()
            )
        })
        .collect()
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct ItemSummary<'a> {
    id: &'a str,
    title: &'a str,
    #[serde(with = "time::serde::rfc3339")]
    last_modified: time::OffsetDateTime,
    #[serde(skip_serializing_if = "Option::is_none")]
    parent_id: Option<&'a str>,
}

impl<'a> From<&'a Item> for ItemSummary<'a> {
    fn from(item: &'a Item) -> Self {
        Self {
            id: &item.id,
            title: &item.title,
            last_modified: item.last_modified,
            parent_id: item.parent_id(),
        }
    }
}

fn format_timestamp(item: &Item) -> String {
    item.last_modified.format(&Rfc3339).unwrap_or_default()
}

fn cmd_search(cli: &Cli, text: &str) -> treemirror_core::Result<()> {
    let mirror = open_mirror(cli)?;
    mirror.warm_cache();
    let results = mirror.search(text);

    if cli.json {
        return print_json(&results.iter().map(ItemSummary::from).collect::<Vec<_>>());
    }
    for (rank, item) in results.iter().enumerate() {
        println!(
            "{:>3}. {} {}",
            rank + 1,
            item.title.cyan(),
            format!("({})", item.id).dimmed()
        );
    }
    println!("({} results)", results.len());
    Ok(())
}

async fn cmd_show(cli: &Cli, id: &str) -> treemirror_core::Result<()> {
    let mirror = open_mirror(cli)?;
    let content = mirror.resolve_content(id).await?;
    let item = mirror
        .store()
        .get(id)
        .ok_or_else(|| MirrorError::ItemNotFound(id.to_string()))?;

    if cli.json {
        return print_json(&serde_json::json!({
            "id": item.id,
            "title": item.title,
            "content": content,
        }));
    }
    println!("{}", format!("// {} ({})", item.title, item.id).dimmed());
    println!("{}", content);
    Ok(())
}

async fn cmd_sync(cli: &Cli) -> treemirror_core::Result<()> {
    use indicatif::{ProgressBar, ProgressStyle};

    let mirror = open_mirror(cli)?;
    let warmed = mirror.warm_cache();
    tracing::info!(loaded = warmed.loaded, stale = warmed.stale, "cache warmed");

    let progress = if cli.json {
        ProgressBar::hidden()
    } else {
        let pb = ProgressBar::new(mirror.store().len() as u64);
        if let Ok(style) =
            ProgressStyle::default_bar().template("{bar:40.cyan/blue} {pos}/{len} {msg}")
        {
            pb.set_style(style.progress_chars("██░"));
        }
        pb
    };

    let report = mirror
        .refresh_all_content(&mut |done: usize, total: usize| {
            progress.set_length(total as u64);
            progress.set_position(done as u64);
        })
        .await;
    progress.finish_and_clear();

    if cli.json {
        return print_json(&report);
    }
    println!(
        "{}: {} of {} items",
        "Synced".green(),
        report.succeeded,
        report.total
    );
    if !report.failed_ids.is_empty() {
        eprintln!(
            "{}: failed to fetch: {}",
            "Warning".yellow(),
            report.failed_ids.join(", ")
        );
    }
    Ok(())
}

fn cmd_cache(cli: &Cli, action: &CacheAction) -> treemirror_core::Result<()> {
    let ws = open_workspace(cli)?;
    let mirror = ws.mirror(make_fetcher(cli)?)?;

    match action {
        CacheAction::Status => {
            let stats = mirror.cache_stats()?;
            if cli.json {
                return print_json(&stats);
            }
            println!(
                "{}: {} ({:.1} MB)",
                "Cache".blue(),
                ws.cache_path().display(),
                stats.size_bytes as f64 / 1_000_000.0
            );
            println!("{}: {}", "Entries".blue(), stats.entries);
        }
        CacheAction::Clear => {
            let removed = mirror.clear_cache()?;
            if cli.json {
                return print_json(&serde_json::json!({ "entries_removed": removed }));
            }
            println!("{}: {} entries removed", "Cleared".yellow(), removed);
        }
        CacheAction::Invalidate { id } => {
            let removed = mirror.invalidate(id)?;
            if cli.json {
                return print_json(&serde_json::json!({ "id": id, "removed": removed }));
            }
            if removed {
                println!("{}: {}", "Invalidated".yellow(), id);
            } else {
                println!("{} has no cached content", id);
            }
        }
    }
    Ok(())
}
