use clap::{Parser, Subcommand};
use std::path::{Path, PathBuf};
use std::process;
use std::sync::Arc;

use symref::config::{get_config_path, load_config, save_config, ResolverConfig};
use symref::errors::{Result, SymrefError};
use symref::index::{generate_if_stale, GenerateOptions};
use symref::languages::{detect_project_language, LanguageRegistry};
use symref::live::{HostResources, PoolSizer};
use symref::resolution::HybridResolver;
use symref::types::{assign_missing_ids, DefinitionNode, Language, ResolverMode};

/// Find every reference to a batch of symbol definitions.
#[derive(Parser)]
#[command(name = "symref", version, about = "Find all references to symbol definitions")]
struct Cli {
    /// Log debug output to stderr
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Resolve references for definition nodes read from a JSON file
    Resolve {
        /// JSON array of definition nodes ("-" reads stdin)
        nodes: String,
        /// Project root (default: current directory)
        #[arg(short, long)]
        root: Option<String>,
        /// Resolver mode: automatic, index_only, live_only, index_with_live_fallback
        #[arg(short, long)]
        mode: Option<String>,
        /// Fixed number of analyzer connections per language
        #[arg(short = 'n', long)]
        pool_size: Option<usize>,
        /// Pretty-print the result map
        #[arg(long)]
        pretty: bool,
    },
    /// Show how the project would be resolved
    Info {
        /// Project root (default: current directory)
        #[arg(short, long)]
        root: Option<String>,
    },
    /// Generate the project's index if it is missing or stale
    Generate {
        /// Project root (default: current directory)
        #[arg(short, long)]
        root: Option<String>,
    },
    /// Show the effective configuration, optionally saving it
    Config {
        /// Project root (default: current directory)
        #[arg(short, long)]
        root: Option<String>,
        /// Resolver mode: automatic, index_only, live_only, index_with_live_fallback
        #[arg(short, long)]
        mode: Option<String>,
        /// Fixed number of analyzer connections per language
        #[arg(short = 'n', long)]
        pool_size: Option<usize>,
        /// Write the result to .symref/config.json
        #[arg(long)]
        save: bool,
    },
    /// Print the analyzer pool size this host affords a language
    PoolSize {
        /// Language name, e.g. python or rust
        language: String,
    },
}

fn main() {
    let cli = Cli::parse();
    symref::logging::init(cli.verbose);
    if let Err(e) = run(cli) {
        eprintln!("Error: {}", e);
        process::exit(1);
    }
}

fn run(cli: Cli) -> Result<()> {
    match cli.command {
        Commands::Resolve {
            nodes,
            root,
            mode,
            pool_size,
            pretty,
        } => {
            let project_path = resolve_path(root);
            let config = effective_config(&project_path, mode, pool_size)?;

            let nodes = read_nodes(&nodes)?;
            let resolver = HybridResolver::new(&project_path, config)?;
            let results = resolver.resolve_batch(&nodes);
            resolver.shutdown();

            let json = if pretty {
                serde_json::to_string_pretty(&results)?
            } else {
                serde_json::to_string(&results)?
            };
            println!("{}", json);
        }
        Commands::Info { root } => {
            let project_path = resolve_path(root);
            let config = load_config(&project_path)?;
            let resolver = HybridResolver::new(&project_path, config)?;
            resolver.tier();
            println!("{}", serde_json::to_string_pretty(&resolver.info())?);
            resolver.shutdown();
        }
        Commands::Generate { root } => {
            let project_path = resolve_path(root);
            let config = load_config(&project_path)?;
            let registry = LanguageRegistry::from_config(&config);
            let language = detect_project_language(&project_path, &registry).ok_or_else(|| {
                SymrefError::Config {
                    message: format!("no source files found under {}", project_path.display()),
                }
            })?;
            let index_path = config.index_path_for(&project_path);
            let project_name = project_path
                .file_name()
                .map(|n| n.to_string_lossy().to_string())
                .unwrap_or_else(|| "project".to_string());
            let options = GenerateOptions {
                timeout: config.generation_timeout(),
                memory_mb: config.generation_memory_mb,
            };
            let generated = generate_if_stale(
                &project_path,
                &index_path,
                &project_name,
                language,
                &registry,
                &options,
            )?;
            if generated {
                println!("Generated {} index at {}", language, index_path.display());
            } else {
                println!("Index at {} is up to date", index_path.display());
            }
        }
        Commands::Config {
            root,
            mode,
            pool_size,
            save,
        } => {
            let project_path = resolve_path(root);
            let config = effective_config(&project_path, mode, pool_size)?;
            println!("{}", serde_json::to_string_pretty(&config)?);
            if save {
                save_config(&project_path, &config)?;
                eprintln!("Saved {}", get_config_path(&project_path).display());
            }
        }
        Commands::PoolSize { language } => {
            let language = Language::from_str(&language).ok_or_else(|| {
                SymrefError::UnsupportedLanguage {
                    language: language.clone(),
                }
            })?;
            let config = ResolverConfig::default();
            let registry = Arc::new(LanguageRegistry::from_config(&config));
            let caps = registry
                .get(language)
                .ok_or_else(|| SymrefError::UnsupportedLanguage {
                    language: language.to_string(),
                })?;
            let host = HostResources::detect();
            let sizer = PoolSizer::new(host, None, config.reserved_memory_mb, config.max_pool_size);
            println!(
                "{}: {} connection(s) ({} cores, {} MB available)",
                language,
                sizer.size_for(&caps.profile),
                host.cpu_cores,
                host.available_memory_mb
            );
        }
    }
    Ok(())
}

/// Loads the project config and applies command-line overrides.
fn effective_config(
    project_path: &Path,
    mode: Option<String>,
    pool_size: Option<usize>,
) -> Result<ResolverConfig> {
    let mut config = load_config(project_path)?;
    if let Some(mode) = mode {
        config.mode = parse_mode(&mode)?;
    }
    if pool_size.is_some() {
        config.pool_size = pool_size;
    }
    config.validate()?;
    Ok(config)
}

fn parse_mode(mode: &str) -> Result<ResolverMode> {
    ResolverMode::from_str(mode).ok_or_else(|| SymrefError::Config {
        message: format!("unknown mode '{}'", mode),
    })
}

fn read_nodes(source: &str) -> Result<Vec<DefinitionNode>> {
    let text = if source == "-" {
        std::io::read_to_string(std::io::stdin())?
    } else {
        std::fs::read_to_string(source)?
    };
    let mut nodes: Vec<DefinitionNode> = serde_json::from_str(&text)?;
    assign_missing_ids(&mut nodes);
    Ok(nodes)
}

/// Resolves an optional path argument to a `PathBuf`.
///
/// Defaults to the current working directory if no path is provided.
fn resolve_path(path: Option<String>) -> PathBuf {
    match path {
        Some(p) => PathBuf::from(p),
        None => std::env::current_dir().unwrap_or_else(|_| PathBuf::from(".")),
    }
}
