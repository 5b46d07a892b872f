use std::{io::Read, time::Duration};

use clap::Parser;
use docchain::{
    AttrUpdate,
    Chain,
    ChainConfig,
    DataDir,
    Document,
    Entry,
    Error,
    Result,
    StoreOutcome,
    query::{JoinPolicy, SearchFilter},
    store::open_store,
};
use tokio_util::sync::CancellationToken;
use tracing_subscriber::EnvFilter;

mod cli;

use cli::{AttrArgs, Cli, Command, EntryArgs, GetArgs, SearchArgs, StoreArgs};

fn init_tracing(verbose: u8, quiet: bool) {
    let filter = if let Ok(env) = std::env::var("DOCCHAIN_LOG") {
        EnvFilter::new(env)
    } else if quiet {
        EnvFilter::new("warn")
    } else {
        match verbose {
            0 => EnvFilter::new("info"),
            1 => EnvFilter::new("debug"),
            _ => EnvFilter::new("trace"),
        }
    };

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .without_time()
        .init();
}

/// A token that fires after `secs`, or never.
fn cancel_after(secs: Option<u64>) -> CancellationToken {
    let token = CancellationToken::new();
    if let Some(secs) = secs {
        let trigger = token.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_secs(secs)).await;
            trigger.cancel();
        });
    }
    token
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    init_tracing(cli.verbose, cli.quiet);

    let data_dir = DataDir::resolve(cli.data_dir.as_deref())?;
    let config = ChainConfig::load(&data_dir.config_file())?;
    let store = open_store(&config, &data_dir)?;
    let chain = Chain::from_config(&config, store)?;
    let cancel = cancel_after(cli.timeout);

    match cli.command {
        Command::Store(args) => cmd_store(&chain, &cancel, args).await?,
        Command::Attr(args) => cmd_attr(&chain, &cancel, args).await?,
        Command::Get(args) => cmd_get(&chain, &cancel, args).await?,
        Command::Search(args) => cmd_search(&chain, &cancel, args).await?,
        Command::Delete(EntryArgs {
            namespace,
            entry_id,
        }) => {
            chain.delete_entry(&cancel, &namespace, &entry_id).await?;
            println!("Deleted {namespace}/{entry_id}");
        }
    }

    Ok(())
}

async fn cmd_store(
    chain: &Chain,
    cancel: &CancellationToken,
    args: StoreArgs,
) -> Result<()> {
    let content = match &args.file {
        Some(path) => std::fs::read_to_string(path)?,
        None => {
            let mut buf = String::new();
            std::io::stdin().read_to_string(&mut buf)?;
            buf
        }
    };

    let mut doc = Document::new(
        &args.entry.namespace,
        &args.entry.entry_id,
        args.name,
        content,
    );
    doc.source = args.source.unwrap_or_default();
    doc.web_url = args.web_url.unwrap_or_default();
    doc.summary = args.summary.unwrap_or_default();
    let key = doc.entry_key();

    match chain.store(cancel, doc).await? {
        StoreOutcome::Created(doc) if args.json => {
            println!("{}", serde_json::to_string_pretty(&doc)?);
        }
        StoreOutcome::Created(_) => println!("Stored {key}"),
        StoreOutcome::AlreadyExists => {
            println!("{key} already exists, left unchanged")
        }
    }
    Ok(())
}

async fn cmd_attr(
    chain: &Chain,
    cancel: &CancellationToken,
    args: AttrArgs,
) -> Result<()> {
    let update = AttrUpdate {
        parent_id: args.parent_id,
        mark: args.mark,
        unread: args.unread,
    };
    if update.is_empty() {
        return Err(Error::Config(
            "nothing to set: pass --parent-id, --mark or --unread".into(),
        ));
    }

    let EntryArgs {
        namespace,
        entry_id,
    } = args.entry;
    chain
        .update_attrs(cancel, &namespace, &entry_id, &update)
        .await?;
    println!("Updated {namespace}/{entry_id}");
    Ok(())
}

async fn cmd_get(
    chain: &Chain,
    cancel: &CancellationToken,
    args: GetArgs,
) -> Result<()> {
    let entry = chain
        .get_entry(cancel, &args.entry.namespace, &args.entry.entry_id)
        .await?;

    if args.json {
        println!("{}", serde_json::to_string_pretty(&entry)?);
    } else {
        print_entry(&entry);
    }
    Ok(())
}

fn print_entry(entry: &Entry) {
    let doc = &entry.document;
    println!("{}/{}  {}", doc.namespace, doc.entry_id, doc.name);
    for (label, value) in [
        ("source", &doc.source),
        ("url", &doc.web_url),
        ("image", &doc.header_image),
    ] {
        if !value.is_empty() {
            println!("  {label}: {value}");
        }
    }
    if let Some(parent_id) = &entry.parent_id {
        println!("  parent: {parent_id}");
    }
    if let Some(marked) = entry.marked {
        println!("  marked: {marked}");
    }
    if let Some(unread) = entry.unread {
        println!("  unread: {unread}");
    }
    println!("  created: {}", doc.created_at.to_rfc3339());
    if !doc.sub_content.is_empty() {
        println!();
        println!("{}", doc.sub_content);
    }
}

async fn cmd_search(
    chain: &Chain,
    cancel: &CancellationToken,
    args: SearchArgs,
) -> Result<()> {
    let filter = SearchFilter {
        search: args.query.unwrap_or_default(),
        source: args.source,
        web_url: args.web_url,
        fuzzy_name: args.fuzzy_name,
        parent_id: args.parent_id,
        mark: args.mark,
        unread: args.unread,
        page: args.page,
        page_size: args.page_size,
        sort: args.sort.map(Into::into),
        desc: args.desc,
        ..SearchFilter::new(args.namespace)
    };

    let chain = if args.intersect {
        chain.clone().with_join_policy(JoinPolicy::Intersect)
    } else {
        chain.clone()
    };
    let docs = chain.search_filter(cancel, &filter).await?;

    if args.json {
        println!("{}", serde_json::to_string_pretty(&docs)?);
        return Ok(());
    }
    if docs.is_empty() {
        println!("No results.");
        return Ok(());
    }
    for doc in &docs {
        println!("{}  {}", doc.entry_id, doc.name);
        for snippet in &doc.search_context {
            println!("    {snippet}");
        }
    }
    Ok(())
}
