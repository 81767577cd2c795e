#![warn(clippy::all, clippy::pedantic)]
#![allow(
    clippy::doc_markdown,
    clippy::missing_errors_doc,
    clippy::missing_panics_doc,
    clippy::module_name_repetitions,
    clippy::needless_pass_by_value,
    clippy::too_many_lines,
    clippy::uninlined_format_args,
    dead_code
)]

use anyhow::{bail, Context, Result};
use clap::{CommandFactory, Parser, Subcommand, ValueEnum};
use shopwise::catalog::{render_catalog, CatalogReader};
use shopwise::sessions::{create_session_store, SessionStore};
use shopwise::{agent, catalog, gateway, providers, CatalogCommands, Config, ConfigCommands};
use std::io::Write;
use std::sync::Arc;
use tracing::info;
use tracing_subscriber::{fmt, EnvFilter};

#[derive(Copy, Clone, Debug, Eq, PartialEq, ValueEnum)]
enum CompletionShell {
    #[value(name = "bash")]
    Bash,
    #[value(name = "fish")]
    Fish,
    #[value(name = "zsh")]
    Zsh,
    #[value(name = "powershell")]
    PowerShell,
    #[value(name = "elvish")]
    Elvish,
}

/// `shopwise` - storefront backend with a WhatsApp sales assistant.
#[derive(Parser, Debug)]
#[command(name = "shopwise")]
#[command(version)]
#[command(about = "Storefront backend with a WhatsApp sales assistant.", long_about = None)]
struct Cli {
    #[arg(long, global = true)]
    config_dir: Option<String>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Start the HTTP gateway (uploads, WhatsApp webhook, outbound messages)
    #[command(long_about = "\
Start the HTTP gateway.

Serves file uploads, the WhatsApp Cloud API webhook and the outbound \
message endpoint. Bind address defaults to the values in your config \
file (gateway.host / gateway.port). Idle chat sessions are swept in \
the background while the gateway runs.

Examples:
  shopwise serve                  # use config defaults
  shopwise serve -p 8080          # listen on port 8080
  shopwise serve --host 0.0.0.0   # bind to all interfaces")]
    Serve {
        /// Port to listen on (use 0 for random available port); defaults to config gateway.port
        #[arg(short, long)]
        port: Option<u16>,

        /// Host to bind to; defaults to config gateway.host
        #[arg(long)]
        host: Option<String>,
    },

    /// Ask the sales assistant a single question from the terminal
    #[command(long_about = "\
Ask the sales assistant a single question.

Runs one assistant turn against the configured catalog and provider \
and prints the reply. Useful to check prompts and catalog content \
without a WhatsApp account.

Examples:
  shopwise ask \"Do you have an ebook about marketing?\"
  shopwise ask --conversation +237600000000 \"How much is it?\"")]
    Ask {
        /// Customer message
        message: String,

        /// Conversation id used for the session
        #[arg(long, default_value = "cli")]
        conversation: String,
    },

    /// Show system status
    Status,

    /// List supported completion providers
    Providers,

    /// Inspect or import the product catalog
    Catalog {
        #[command(subcommand)]
        catalog_command: CatalogCommands,
    },

    /// Manage configuration
    #[command(long_about = "\
Manage shopwise configuration.

Use 'schema' to dump the full JSON Schema for the config file, which \
documents every available key, type, and default value.

Examples:
  shopwise config schema              # print JSON Schema to stdout
  shopwise config schema > schema.json")]
    Config {
        #[command(subcommand)]
        config_command: ConfigCommands,
    },

    /// Generate shell completion script to stdout
    #[command(long_about = "\
Generate shell completion scripts for `shopwise`.

The script is printed to stdout so it can be sourced directly:

Examples:
  source <(shopwise completions bash)
  shopwise completions zsh > ~/.zfunc/_shopwise
  shopwise completions fish > ~/.config/fish/completions/shopwise.fish")]
    Completions {
        /// Target shell
        #[arg(value_enum)]
        shell: CompletionShell,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    if let Some(config_dir) = &cli.config_dir {
        if config_dir.trim().is_empty() {
            bail!("--config-dir cannot be empty");
        }
        std::env::set_var("SHOPWISE_CONFIG_DIR", config_dir);
    }

    // Completions stay stdout-only: no config loading, no logging.
    if let Commands::Completions { shell } = &cli.command {
        let mut stdout = std::io::stdout().lock();
        write_shell_completion(*shell, &mut stdout)?;
        return Ok(());
    }

    // Respects RUST_LOG, defaults to INFO
    let subscriber = fmt::Subscriber::builder()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .finish();
    tracing::subscriber::set_global_default(subscriber)
        .context("setting default subscriber failed")?;

    if let Commands::Config {
        config_command: ConfigCommands::Schema,
    } = &cli.command
    {
        let schema = schemars::schema_for!(Config);
        println!("{}", serde_json::to_string_pretty(&schema)?);
        return Ok(());
    }

    let mut config = Config::load_or_init().await?;

    match cli.command {
        Commands::Completions { .. } | Commands::Config { .. } => Ok(()),

        Commands::Serve { port, host } => {
            if let Some(port) = port {
                config.gateway.port = port;
            }
            if let Some(host) = host {
                config.gateway.host = host;
            }
            info!(
                "Starting shopwise gateway on {}:{}",
                config.gateway.host, config.gateway.port
            );
            gateway::run_gateway(config).await
        }

        Commands::Ask {
            message,
            conversation,
        } => {
            let sessions: Arc<dyn SessionStore> =
                Arc::new(create_session_store(&config.sessions));
            let assistant = agent::create_assistant(&config, sessions)?;
            let reply = assistant.handle_message(&conversation, &message).await?;
            println!("{reply}");
            Ok(())
        }

        Commands::Status => {
            print_status(&config).await;
            Ok(())
        }

        Commands::Providers => {
            let current = config
                .default_provider
                .as_deref()
                .unwrap_or("openai")
                .trim()
                .to_ascii_lowercase();
            let providers = providers::list_providers();
            println!("Supported providers ({} total):\n", providers.len());
            println!("  ID (use in config)  DESCRIPTION");
            for p in &providers {
                let marker = if p.name.eq_ignore_ascii_case(&current) {
                    " (active)"
                } else {
                    ""
                };
                println!("  {:<19} {}{}", p.name, p.display_name, marker);
            }
            println!("\n  custom:<URL>        Any OpenAI-compatible endpoint");
            Ok(())
        }

        Commands::Catalog { catalog_command } => {
            handle_catalog_command(catalog_command, &config).await
        }
    }
}

async fn print_status(config: &Config) {
    println!("shopwise status");
    println!();
    println!("Version:     {}", env!("CARGO_PKG_VERSION"));
    println!("Workspace:   {}", config.workspace_dir.display());
    println!("Config:      {}", config.config_path.display());
    println!();
    println!(
        "Provider:    {}",
        config.default_provider.as_deref().unwrap_or("openai")
    );
    println!(
        "Model:       {}",
        config.default_model.as_deref().unwrap_or("(default)")
    );
    println!("Persona:     {} ({})", config.assistant.persona_name, config.assistant.store_name);
    println!();
    println!("Catalog:     {}", config.catalog_db_path().display());
    match catalog::create_catalog(config) {
        Ok(db) => match db.fetch_all().await {
            Ok(products) => println!("  Products:  {}", products.len()),
            Err(e) => println!("  Products:  unavailable ({e})"),
        },
        Err(e) => println!("  Products:  unavailable ({e})"),
    }
    println!("Uploads:     {}", config.upload_dir().display());
    println!();
    println!(
        "Gateway:     {}:{} (auth: {})",
        config.gateway.host,
        config.gateway.port,
        if config.gateway.api_tokens.is_empty() {
            "off"
        } else {
            "bearer"
        }
    );
    println!(
        "Sessions:    history {} turns, idle timeout {}s, sweep every {}s",
        config.sessions.max_history,
        config.sessions.idle_timeout_secs,
        config.sessions.sweep_interval_secs
    );
    println!();
    println!("Channels:");
    let whatsapp = match config.channels_config.whatsapp.as_ref() {
        None => "not configured",
        Some(wa) if wa.is_complete() => "configured",
        Some(_) => "incomplete",
    };
    println!("  WhatsApp:  {whatsapp}");
}

async fn handle_catalog_command(command: CatalogCommands, config: &Config) -> Result<()> {
    let db = catalog::create_catalog(config)?;
    match command {
        CatalogCommands::Show { json } => {
            let products = db.fetch_all().await?;
            if json {
                println!("{}", render_catalog(&products));
                return Ok(());
            }
            if products.is_empty() {
                println!("Catalog is empty ({}).", db.db_path().display());
                return Ok(());
            }
            println!("{} product(s):\n", products.len());
            for p in &products {
                let category = p.category.as_ref().map_or("-", |c| c.name.as_str());
                println!(
                    "  #{:<5} {:<32} {:>10.2} {:<4} [{}]",
                    p.id, p.name, p.price, p.currency, category
                );
            }
            Ok(())
        }
        CatalogCommands::Import { path } => {
            let count = db.import_json(&path).await?;
            println!(
                "Imported {count} product(s) from {} into {}",
                path.display(),
                db.db_path().display()
            );
            Ok(())
        }
    }
}

fn write_shell_completion<W: Write>(shell: CompletionShell, writer: &mut W) -> Result<()> {
    use clap_complete::generate;
    use clap_complete::shells;

    let mut cmd = Cli::command();
    let bin_name = cmd.get_name().to_string();

    match shell {
        CompletionShell::Bash => generate(shells::Bash, &mut cmd, bin_name.clone(), writer),
        CompletionShell::Fish => generate(shells::Fish, &mut cmd, bin_name.clone(), writer),
        CompletionShell::Zsh => generate(shells::Zsh, &mut cmd, bin_name.clone(), writer),
        CompletionShell::PowerShell => {
            generate(shells::PowerShell, &mut cmd, bin_name.clone(), writer);
        }
        CompletionShell::Elvish => generate(shells::Elvish, &mut cmd, bin_name, writer),
    }

    writer.flush()?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::{CommandFactory, Parser};

    #[test]
    fn cli_definition_has_no_flag_conflicts() {
        Cli::command().debug_assert();
    }

    #[test]
    fn completions_cli_parses_supported_shells() {
        for shell in ["bash", "fish", "zsh", "powershell", "elvish"] {
            let cli = Cli::try_parse_from(["shopwise", "completions", shell])
                .expect("completions invocation should parse");
            match cli.command {
                Commands::Completions { .. } => {}
                other => panic!("expected completions command, got {other:?}"),
            }
        }
    }

    #[test]
    fn completion_generation_mentions_binary_name() {
        let mut output = Vec::new();
        write_shell_completion(CompletionShell::Bash, &mut output)
            .expect("completion generation should succeed");
        let script = String::from_utf8(output).expect("completion output should be valid utf-8");
        assert!(
            script.contains("shopwise"),
            "completion script should reference binary name"
        );
    }

    #[test]
    fn serve_accepts_port_and_host_overrides() {
        let cli = Cli::try_parse_from(["shopwise", "serve", "-p", "8080", "--host", "0.0.0.0"])
            .unwrap();
        match cli.command {
            Commands::Serve { port, host } => {
                assert_eq!(port, Some(8080));
                assert_eq!(host.as_deref(), Some("0.0.0.0"));
            }
            other => panic!("expected serve command, got {other:?}"),
        }
    }

    #[test]
    fn catalog_import_takes_a_path() {
        let cli =
            Cli::try_parse_from(["shopwise", "--config-dir", "/tmp/x", "catalog", "import", "p.json"])
                .unwrap();
        assert_eq!(cli.config_dir.as_deref(), Some("/tmp/x"));
        match cli.command {
            Commands::Catalog {
                catalog_command: CatalogCommands::Import { path },
            } => assert_eq!(path, std::path::PathBuf::from("p.json")),
            other => panic!("expected catalog import, got {other:?}"),
        }
    }

    #[test]
    fn ask_defaults_conversation_id() {
        let cli = Cli::try_parse_from(["shopwise", "ask", "Bonjour"]).unwrap();
        match cli.command {
            Commands::Ask {
                message,
                conversation,
            } => {
                assert_eq!(message, "Bonjour");
                assert_eq!(conversation, "cli");
            }
            other => panic!("expected ask command, got {other:?}"),
        }
    }
}
