//! mailbridge CLI: send one message or a bulk file through the configured provider.
//!
//! Usage:
//!   mailbridge send --to <addr> --subject <s> --body <b> [--from <addr>] [--text]
//!   mailbridge bulk <file.json> [--concurrency <n>] [--fail-fast]
//!   mailbridge check                               Validate the configuration
//!   mailbridge providers                           List available providers

use anyhow::{bail, Context};
use mailbridge::{BulkRequest, MailClient, MailConfig, Message, ProviderKind};
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("mailbridge=info")),
        )
        .with_writer(std::io::stderr)
        .init();

    let args: Vec<String> = std::env::args().collect();
    if args.len() < 2 {
        print_usage();
        std::process::exit(1);
    }

    let result = match args[1].as_str() {
        "send" => cmd_send(&args[2..]).await,
        "bulk" => cmd_bulk(&args[2..]).await,
        "check" => cmd_check(&args[2..]),
        "providers" | "list" => {
            cmd_providers();
            Ok(())
        }
        "version" | "--version" | "-V" => {
            println!("mailbridge {}", env!("CARGO_PKG_VERSION"));
            Ok(())
        }
        "help" | "--help" | "-h" => {
            print_usage();
            Ok(())
        }
        other => {
            eprintln!("Unknown command: {other}");
            eprintln!();
            print_usage();
            std::process::exit(1);
        }
    };

    if let Err(e) = result {
        eprintln!("Error: {e:#}");
        std::process::exit(1);
    }
}

fn print_usage() {
    println!(
        r#"mailbridge — unified email delivery

USAGE:
    mailbridge <COMMAND> [OPTIONS]

COMMANDS:
    send --to <addr> --subject <s> --body <b> [--from <addr>] [--text]
                                Send one message
    bulk <file.json> [--concurrency <n>] [--fail-fast]
                                Send a bulk request and print the result as JSON
    check                       Validate the provider configuration
    providers                   List available providers
    version                     Show version information
    help                        Show this help message

OPTIONS:
    --config <path>             Read configuration from a YAML or JSON file
                                instead of MAIL_* environment variables

ENVIRONMENT:
    MAIL_MAILER                 Provider id (default: smtp)
    MAIL_BULK_CONCURRENCY       Chunks dispatched concurrently
    RUST_LOG                    Log filter (default: mailbridge=info)"#
    );
}

fn flag_value<'a>(args: &'a [String], name: &str) -> Option<&'a str> {
    args.iter()
        .position(|a| a == name)
        .and_then(|i| args.get(i + 1))
        .map(|s| s.as_str())
}

fn has_flag(args: &[String], name: &str) -> bool {
    args.iter().any(|a| a == name)
}

fn load_config(args: &[String]) -> anyhow::Result<MailConfig> {
    let config = match flag_value(args, "--config") {
        Some(path) => MailConfig::from_file(path)
            .with_context(|| format!("reading configuration from {path}"))?,
        None => MailConfig::from_env().context("reading MAIL_* environment")?,
    };
    Ok(config)
}

async fn client(args: &[String]) -> anyhow::Result<MailClient> {
    let mut builder = MailClient::builder().config(load_config(args)?);
    if let Some(n) = flag_value(args, "--concurrency") {
        let n: usize = n.parse().context("--concurrency expects a number")?;
        builder = builder.max_concurrency(n);
    }
    Ok(builder.build().await?)
}

async fn cmd_send(args: &[String]) -> anyhow::Result<()> {
    let (Some(to), Some(subject), Some(body)) = (
        flag_value(args, "--to"),
        flag_value(args, "--subject"),
        flag_value(args, "--body"),
    ) else {
        bail!("send requires --to, --subject and --body");
    };

    let mut builder = Message::builder().to(to).subject(subject);
    builder = if has_flag(args, "--text") {
        builder.text_body(body)
    } else {
        builder.body(body)
    };
    if let Some(from) = flag_value(args, "--from") {
        builder = builder.from(from);
    }

    let client = client(args).await?;
    let outcome = client.send(&builder.build()).await?;
    match (&outcome.error, &outcome.message_id) {
        (Some(err), _) => bail!("delivery failed: {err}"),
        (None, Some(id)) => println!("sent via {} (message id {id})", client.provider()),
        (None, None) => println!("sent via {}", client.provider()),
    }
    Ok(())
}

async fn cmd_bulk(args: &[String]) -> anyhow::Result<()> {
    let Some(path) = args.first().filter(|a| !a.starts_with("--")) else {
        bail!("bulk requires a request file");
    };
    let raw = std::fs::read_to_string(path).with_context(|| format!("reading {path}"))?;
    let request: BulkRequest =
        serde_json::from_str(&raw).with_context(|| format!("parsing {path}"))?;

    let client = client(args).await?;
    let mut bulk = client
        .bulk()
        .messages(request.messages)
        .tags(request.tags)
        .fail_fast(has_flag(args, "--fail-fast"));
    if let Some(from) = request.default_from {
        bulk = bulk.default_from(from);
    }
    let result = bulk.execute().await?;

    println!("{}", serde_json::to_string_pretty(&result)?);
    if !result.all_succeeded() {
        std::process::exit(2);
    }
    Ok(())
}

fn cmd_check(args: &[String]) -> anyhow::Result<()> {
    let config = load_config(args)?;
    config.validate()?;
    println!("configuration for '{}' is valid", config.provider);
    Ok(())
}

fn cmd_providers() {
    for kind in ProviderKind::all() {
        println!("{}", kind.id());
    }
}
