//! Scriptorium CLI - Documentation Search and Retrieval MCP Server
//!
//! A command-line interface for the Scriptorium MCP server.

use clap::{Args, Parser, Subcommand, ValueEnum};
use colored::Colorize;
use scriptorium::{
    AdmissionFilter, CacheConfig, DocsEngine, EngineConfig, FetchConfig, FetchResponse,
    SERVER_DESCRIPTION, SERVER_NAME, ScriptoriumError, ScriptoriumResult, VERSION,
    engine::DEFAULT_SNIPPET_LENGTH,
    server::{DEFAULT_FETCH_TOOL, DEFAULT_SEARCH_TOOL, ScriptoriumServer, ServerConfig, TransportType},
};
use std::time::Duration;
use tracing_subscriber::{EnvFilter, fmt};

/// Scriptorium - Documentation Search and Retrieval MCP Server
#[derive(Parser, Debug)]
#[command(
    name = "scriptorium",
    version = VERSION,
    author = "DIRMACS Global Services <build@dirmacs.com>",
    about = "A documentation search and retrieval MCP server over a curated, allow-listed catalog",
    long_about = "Scriptorium is a Model Context Protocol (MCP) server that searches and fetches documentation \
                  listed in a curated catalog such as an llms.txt file.\n\n\
                  It can be used as:\n\
                  - An MCP server (STDIO or SSE transport)\n\
                  - A CLI tool for direct searches and document fetching\n\n\
                  Only allow-listed domains are ever fetched. Without --allow, the hosts of URL catalog \
                  sources are allowed."
)]
struct Cli {
    /// Enable verbose output
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Disable all logging output (useful for stdio transport)
    #[arg(short, long, global = true)]
    quiet: bool,

    /// Output format
    #[arg(short, long, global = true, default_value = "pretty")]
    format: OutputFormat,

    /// Disable colored output
    #[arg(long, global = true)]
    no_color: bool,

    #[command(flatten)]
    engine: EngineArgs,

    #[command(subcommand)]
    command: Commands,
}

/// Engine options shared by every command
#[derive(Args, Debug, Clone)]
struct EngineArgs {
    /// Allowed domains (comma separated); subdomains are included
    #[arg(short, long = "allow", global = true, value_delimiter = ',', env = "SCRIPTORIUM_ALLOWED_DOMAINS")]
    allow: Vec<String>,

    /// Catalog sources: local files or URLs (comma separated)
    #[arg(short, long = "catalog", global = true, value_delimiter = ',', env = "SCRIPTORIUM_CATALOG")]
    catalog: Vec<String>,

    /// Fetch timeout in seconds
    #[arg(long, global = true, default_value = "30", env = "SCRIPTORIUM_FETCH_TIMEOUT")]
    fetch_timeout: u64,

    /// Maximum snippet length in characters
    #[arg(long, global = true, default_value_t = DEFAULT_SNIPPET_LENGTH, env = "SCRIPTORIUM_SNIPPET_LENGTH")]
    snippet_length: usize,

    /// Drop cached documents after this many seconds (default: keep for the process lifetime)
    #[arg(long, global = true, env = "SCRIPTORIUM_CACHE_TTL")]
    cache_ttl: Option<u64>,

    /// Fetch search hits before ranking them
    #[arg(long, global = true, env = "SCRIPTORIUM_HYDRATE")]
    hydrate: bool,

    /// Refuse to fetch URLs that are not in the catalog
    #[arg(long, global = true, env = "SCRIPTORIUM_CATALOG_ONLY")]
    catalog_only: bool,
}

impl EngineArgs {
    /// Allow-list from `--allow`, or the hosts of URL catalog sources
    fn allowed_domains(&self) -> Vec<String> {
        if !self.allow.is_empty() {
            return self.allow.clone();
        }
        self.catalog
            .iter()
            .filter_map(|source| url::Url::parse(source).ok())
            .filter_map(|url| url.host_str().map(str::to_string))
            .collect()
    }

    fn engine_config(&self) -> EngineConfig {
        EngineConfig {
            allowed_domains: self.allowed_domains(),
            catalog_sources: self.catalog.clone(),
            snippet_max_len: self.snippet_length,
            allow_uncataloged: !self.catalog_only,
            hydrate_results: self.hydrate,
            fetch: FetchConfig {
                timeout: Duration::from_secs(self.fetch_timeout),
                ..Default::default()
            },
            cache: CacheConfig {
                ttl: self.cache_ttl.map(Duration::from_secs),
            },
        }
    }
}

/// Output format options
#[derive(Debug, Clone, Copy, ValueEnum, Default)]
enum OutputFormat {
    /// Pretty-printed human-readable output
    #[default]
    Pretty,
    /// JSON output
    Json,
    /// Compact JSON output
    JsonCompact,
}

/// Available commands
#[derive(Subcommand, Debug)]
enum Commands {
    /// Start the MCP server
    Serve {
        /// Transport type to use
        #[arg(short, long, default_value = "stdio")]
        transport: TransportOption,

        /// Port for SSE transport (only used with --transport sse)
        #[arg(short, long, default_value = "3000")]
        port: u16,

        /// Host to bind to for SSE transport
        #[arg(long, default_value = "127.0.0.1")]
        host: String,

        /// Name of the search tool
        #[arg(long, default_value = DEFAULT_SEARCH_TOOL, env = "SCRIPTORIUM_SEARCH_TOOL")]
        search_tool_name: String,

        /// Name of the fetch tool
        #[arg(long, default_value = DEFAULT_FETCH_TOOL, env = "SCRIPTORIUM_FETCH_TOOL")]
        fetch_tool_name: String,
    },

    /// Search the catalog
    Search {
        /// Search query
        query: String,

        /// Number of results to return
        #[arg(short = 'k', long, default_value = "5")]
        limit: i64,
    },

    /// Fetch a document and print its content
    Fetch {
        /// URL to fetch
        url: String,
    },

    /// Show server information
    Info,

    /// Validate configuration and load the catalog
    Check,
}

/// Transport options for the serve command
#[derive(Debug, Clone, Copy, ValueEnum, Default)]
enum TransportOption {
    /// Standard input/output (for MCP clients)
    #[default]
    Stdio,
    /// Server-Sent Events over HTTP
    Sse,
}

/// Set up logging with configurable output destination
///
/// # Arguments
/// * `default_level` - Level used unless `RUST_LOG` says otherwise
/// * `verbose` - Enable debug-level logging
/// * `use_stderr` - Write logs to stderr instead of stdout (required for stdio transport)
/// * `quiet` - Disable all logging output
fn setup_logging(default_level: &str, verbose: bool, use_stderr: bool, quiet: bool) {
    let filter = if quiet {
        EnvFilter::new("off")
    } else if verbose {
        EnvFilter::new("debug")
    } else {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level))
    };

    let subscriber = fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_thread_ids(false);

    // For stdio transport, logs MUST go to stderr to avoid corrupting the JSON-RPC stream
    if use_stderr {
        subscriber.with_writer(std::io::stderr).init();
    } else {
        subscriber.init();
    }
}

fn print_banner() {
    println!(
        r#"
{}
╔═══════════════════════════════════════════════════════════════╗
║                                                               ║
║   {}                                      ║
║   {}                         ║
║                                                               ║
║   Documentation search and retrieval MCP server               ║
║                                                               ║
╚═══════════════════════════════════════════════════════════════╝
"#,
        "".clear(),
        format!("📚 SCRIPTORIUM v{}", VERSION).bright_cyan().bold(),
        "by DIRMACS Global Services".bright_black(),
    );
}

fn print_success(message: &str) {
    println!("{} {}", "✓".green().bold(), message);
}

fn print_error(message: &str) {
    eprintln!("{} {}", "✗".red().bold(), message);
}

fn print_info(label: &str, value: &str) {
    println!("  {} {}", format!("{}:", label).bright_blue(), value);
}

fn print_section(title: &str) {
    println!("\n{}", title.yellow().bold());
    println!("{}", "─".repeat(40).bright_black());
}

/// Build the engine and seed it from the configured catalog
async fn load_engine(args: &EngineArgs) -> ScriptoriumResult<DocsEngine> {
    let engine = DocsEngine::new(args.engine_config())?;
    engine.load_catalog().await;
    Ok(engine)
}

async fn run_serve(
    args: &EngineArgs,
    transport: TransportOption,
    port: u16,
    host: String,
    search_tool_name: String,
    fetch_tool_name: String,
) -> ScriptoriumResult<()> {
    let config = ServerConfig {
        engine: args.engine_config(),
        search_tool_name,
        fetch_tool_name,
    };

    let server = ScriptoriumServer::new(config)?;

    let transport_type = match transport {
        TransportOption::Stdio => TransportType::Stdio,
        TransportOption::Sse => {
            let host_parts: Vec<u8> = host.split('.').filter_map(|s| s.parse().ok()).collect();

            if host_parts.len() != 4 {
                return Err(ScriptoriumError::InvalidArguments(
                    "Invalid host format".to_string(),
                ));
            }

            TransportType::Sse {
                port,
                host: [host_parts[0], host_parts[1], host_parts[2], host_parts[3]],
            }
        },
    };

    server.run(transport_type).await
}

async fn run_search(
    args: &EngineArgs,
    query: String,
    limit: i64,
    format: OutputFormat,
    no_color: bool,
) -> ScriptoriumResult<()> {
    let engine = load_engine(args).await?;
    let results = engine.search(&query, limit).await;

    match format {
        OutputFormat::Json => {
            println!("{}", serde_json::to_string_pretty(&results)?);
        },
        OutputFormat::JsonCompact => {
            println!("{}", serde_json::to_string(&results)?);
        },
        OutputFormat::Pretty => {
            if no_color {
                println!("\nSearch Results for: {}", query);
                println!("{}", "=".repeat(50));
                println!("Found {} results", results.len());
                println!();

                for (i, result) in results.iter().enumerate() {
                    println!("{}. {} ({:.3})", i + 1, result.title, result.score);
                    println!("   URL: {}", result.url);
                    println!("   {}", result.snippet);
                    println!();
                }
            } else {
                print_section(&format!("Search Results for: {}", query.cyan()));
                println!("Found {} results", results.len().to_string().green());
                println!();

                for (i, result) in results.iter().enumerate() {
                    println!(
                        "{} {} {}",
                        format!("{}.", i + 1).bright_black(),
                        result.title.white().bold(),
                        format!("({:.3})", result.score).yellow()
                    );
                    println!(
                        "   {} {}",
                        "URL:".bright_black(),
                        result.url.bright_blue().underline()
                    );
                    println!("   {}", result.snippet.bright_white());
                    println!();
                }
            }
        },
    }

    Ok(())
}

async fn run_fetch(
    args: &EngineArgs,
    url: String,
    format: OutputFormat,
    no_color: bool,
) -> ScriptoriumResult<()> {
    let engine = load_engine(args).await?;
    let response = engine.fetch(&url).await;

    match format {
        OutputFormat::Json => {
            println!("{}", serde_json::to_string_pretty(&response)?);
        },
        OutputFormat::JsonCompact => {
            println!("{}", serde_json::to_string(&response)?);
        },
        OutputFormat::Pretty => match &response {
            FetchResponse::Document {
                url,
                title,
                content,
            } => {
                let words = content.split_whitespace().count();
                if no_color {
                    println!("\n{}", title);
                    println!("{}", "=".repeat(50));
                    println!("URL: {}", url);
                    println!("Words: {}", words);
                    println!();
                    println!("{}", content);
                } else {
                    print_section(&title.white().bold().to_string());
                    print_info("URL", &url.bright_blue().underline().to_string());
                    print_info("Words", &words.to_string().green().to_string());
                    println!();
                    println!("{}", content);
                }
            },
            FetchResponse::Error { error, url } => {
                if no_color {
                    eprintln!("Failed to fetch {}: {}", url, error);
                } else {
                    print_error(&format!("Failed to fetch {}: {}", url, error));
                }
            },
        },
    }

    if response.is_error() {
        std::process::exit(1);
    }
    Ok(())
}

fn run_info(args: &EngineArgs, no_color: bool) {
    let allowed = AdmissionFilter::new(args.allowed_domains());
    let domains = if allowed.allowed_domains().is_empty() {
        "(none)".to_string()
    } else {
        allowed.allowed_domains().join(", ")
    };
    let catalog = if args.catalog.is_empty() {
        "(none)".to_string()
    } else {
        args.catalog.join(", ")
    };

    if no_color {
        println!("\nScriptorium Server Information");
        println!("{}", "=".repeat(50));
        println!("  Name: {}", SERVER_NAME);
        println!("  Version: {}", VERSION);
        println!("  Description: {}", SERVER_DESCRIPTION);
        println!("  Allowed domains: {}", domains);
        println!("  Catalog: {}", catalog);
        println!();
        println!("Available Tools:");
        println!("  - {}: Ranked search over the catalog", DEFAULT_SEARCH_TOOL);
        println!("  - {}: Fetch a document as Markdown", DEFAULT_FETCH_TOOL);
        println!();
        println!("Supported Transports:");
        println!("  - stdio: Standard I/O for MCP clients");
        println!("  - sse: Server-Sent Events over HTTP");
    } else {
        print_banner();

        print_section("Server Information");
        print_info("Name", SERVER_NAME);
        print_info("Version", VERSION);
        print_info("Description", SERVER_DESCRIPTION);
        print_info("Allowed domains", &domains);
        print_info("Catalog", &catalog);

        print_section("Available Tools");
        println!(
            "  {} {}",
            DEFAULT_SEARCH_TOOL.green(),
            "- Ranked search over the catalog".bright_black()
        );
        println!(
            "  {} {}",
            DEFAULT_FETCH_TOOL.green(),
            "- Fetch a document as Markdown".bright_black()
        );

        print_section("Supported Transports");
        println!(
            "  {} {}",
            "stdio".cyan(),
            "- Standard I/O for MCP clients".bright_black()
        );
        println!(
            "  {} {}",
            "sse".cyan(),
            "- Server-Sent Events over HTTP".bright_black()
        );
    }
}

fn report(ok: bool, message: &str, no_color: bool) {
    match (ok, no_color) {
        (true, true) => println!("  [OK] {}", message),
        (false, true) => println!("  [FAIL] {}", message),
        (true, false) => print_success(message),
        (false, false) => print_error(message),
    }
}

async fn run_check(args: &EngineArgs, no_color: bool) -> ScriptoriumResult<()> {
    if no_color {
        println!("\nChecking Scriptorium configuration...");
    } else {
        print_section("Configuration Check");
    }

    let mut all_ok = true;

    let config = args.engine_config();
    let filter = AdmissionFilter::new(&config.allowed_domains);
    if filter.allowed_domains().is_empty() {
        report(false, "Allow-list is empty; pass --allow", no_color);
        all_ok = false;
    } else {
        report(
            true,
            &format!("Allow-list: {}", filter.allowed_domains().join(", ")),
            no_color,
        );
    }

    let engine = match DocsEngine::new(config) {
        Ok(engine) => {
            report(true, "Fetch client initialized", no_color);
            Some(engine)
        },
        Err(e) => {
            report(false, &format!("Fetch client: {}", e), no_color);
            all_ok = false;
            None
        },
    };

    if no_color {
        println!("\nLoading catalog...");
    } else {
        print_section("Catalog");
    }

    if args.catalog.is_empty() {
        report(false, "No catalog sources; pass --catalog", no_color);
        all_ok = false;
    } else if let Some(engine) = engine {
        let load = engine.load_catalog().await;
        for (source, error) in &load.failures {
            report(false, &format!("{}: {}", source, error), no_color);
        }
        if load.entries.is_empty() {
            report(false, "Catalog has no admitted entries", no_color);
            all_ok = false;
        } else {
            report(
                true,
                &format!("{} catalog entries loaded", load.entries.len()),
                no_color,
            );
        }
        all_ok &= load.failures.is_empty();
    }

    println!();

    if all_ok {
        if no_color {
            println!("All checks passed!");
        } else {
            println!("{}", "✓ All checks passed!".green().bold());
        }
    } else {
        if no_color {
            println!("Some checks failed. See above for details.");
        } else {
            println!(
                "{}",
                "✗ Some checks failed. See above for details.".red().bold()
            );
        }
        std::process::exit(1);
    }

    Ok(())
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    // Handle color settings
    if cli.no_color {
        colored::control::set_override(false);
    }

    // For stdio transport, logs MUST go to stderr to avoid corrupting the JSON-RPC stream.
    // CLI commands log warnings to stderr so their output stays machine readable.
    match &cli.command {
        Commands::Serve { transport, .. } => {
            let use_stderr = matches!(transport, TransportOption::Stdio);
            setup_logging("info", cli.verbose, use_stderr, cli.quiet);
        },
        _ => setup_logging("warn", cli.verbose, true, cli.quiet),
    }

    let result = match cli.command {
        Commands::Serve {
            transport,
            port,
            host,
            search_tool_name,
            fetch_tool_name,
        } => {
            // Only show banner for SSE transport (not stdio) and when verbose and not quiet
            if cli.verbose
                && !cli.quiet
                && !matches!(cli.format, OutputFormat::Json | OutputFormat::JsonCompact)
                && matches!(transport, TransportOption::Sse)
            {
                print_banner();
            }
            run_serve(
                &cli.engine,
                transport,
                port,
                host,
                search_tool_name,
                fetch_tool_name,
            )
            .await
        },

        Commands::Search { query, limit } => {
            run_search(&cli.engine, query, limit, cli.format, cli.no_color).await
        },

        Commands::Fetch { url } => run_fetch(&cli.engine, url, cli.format, cli.no_color).await,

        Commands::Info => {
            run_info(&cli.engine, cli.no_color);
            Ok(())
        },

        Commands::Check => run_check(&cli.engine, cli.no_color).await,
    };

    if let Err(e) = result {
        if cli.no_color {
            eprintln!("Error: {}", e);
        } else {
            print_error(&e.to_string());
        }
        std::process::exit(1);
    }
}
