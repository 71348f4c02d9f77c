use anyhow::{Context, Result};
use clap::Parser;
use ldap_client::{
    Config, Connection, Control, SearchRequest, SearchScope, LDAP_OPT_PROTOCOL_VERSION,
};
use std::path::PathBuf;
use std::time::Duration;
use tracing::{debug, error, info};

#[derive(Parser)]
#[command(name = "ldapsearch")]
#[command(about = "Search an LDAP v3 directory and print the matching entries")]
struct Args {
    /// Client profile (YAML); flags override its values
    #[arg(short = 'c', long, value_name = "FILE")]
    config: Option<PathBuf>,

    /// Server URL (ldap://host:port/ or ldaps://host:port/)
    #[arg(short = 'H', long, value_name = "URL")]
    url: Option<String>,

    /// Bind DN; omit for anonymous bind
    #[arg(short = 'D', long, value_name = "DN")]
    binddn: Option<String>,

    /// Bind password
    #[arg(short = 'w', long, value_name = "PASSWORD")]
    password: Option<String>,

    /// Search base
    #[arg(short = 'b', long, value_name = "BASE")]
    base: Option<String>,

    /// Search scope: base, one or sub
    #[arg(short = 's', long, value_name = "SCOPE")]
    scope: Option<SearchScope>,

    /// Issue StartTLS before binding
    #[arg(short = 'Z', long)]
    starttls: bool,

    /// Protocol version (2 or 3)
    #[arg(short = 'P', long, value_name = "VERSION")]
    protocol_version: Option<i32>,

    /// Server control as [!]OID[=value]; a leading ! marks it critical
    #[arg(short = 'E', long = "control", value_name = "CONTROL")]
    control: Option<String>,

    /// Server-side time limit in seconds
    #[arg(short = 'l', long, value_name = "SECONDS")]
    time_limit: Option<i32>,

    /// Server-side size limit
    #[arg(short = 'z', long, value_name = "ENTRIES")]
    size_limit: Option<i32>,

    /// Client-side wait limit in seconds
    #[arg(long, value_name = "SECONDS")]
    timeout: Option<u64>,

    /// Issue the search asynchronously and collect it by message id
    #[arg(long = "async")]
    async_search: bool,

    /// Enable debug logging
    #[arg(short, long)]
    debug: bool,

    /// Search filter
    #[arg(default_value = "(objectClass=*)")]
    filter: String,

    /// Attributes to return (default: all)
    attributes: Vec<String>,
}

/// Parse `[!]oid[=value]` into a control.
fn parse_control(spec: &str) -> Result<Control> {
    let (critical, rest) = match spec.strip_prefix('!') {
        Some(rest) => (true, rest),
        None => (false, spec),
    };
    let (oid, value) = match rest.split_once('=') {
        Some((oid, value)) => (oid, value.as_bytes().to_vec()),
        None => (rest, Vec::new()),
    };
    Ok(Control::new(oid, critical, value)?)
}

async fn run(args: Args) -> Result<()> {
    let mut config = match &args.config {
        Some(path) => Config::from_file(path)?,
        None => Config::default(),
    };
    if let Some(url) = args.url {
        config.url = url;
    }
    if let Some(dn) = args.binddn {
        config.bind.binddn = Some(dn);
    }
    if let Some(password) = args.password {
        config.bind.credentials = Some(password);
    }
    if let Some(version) = args.protocol_version {
        config.protocol_version = Some(version);
    }
    config.starttls |= args.starttls;

    let base = args
        .base
        .or_else(|| config.search.base.clone())
        .context("No search base: use -b or search.base in the config")?;
    let scope = args.scope.unwrap_or(config.search.scope);

    let mut request = SearchRequest::new(base, scope, args.filter).with_attributes(args.attributes);
    if let Some(limit) = args.size_limit.or(config.search.size_limit) {
        request = request.with_size_limit(limit);
    }
    if let Some(limit) = args.time_limit.or(config.search.time_limit) {
        request = request.with_time_limit(limit);
    }
    if let Some(spec) = &args.control {
        request = request.with_server_control(parse_control(spec)?);
    }

    let options = config.connect_options()?;
    let mut conn = Connection::initialize_with(&config.url, options).await?;
    if let Some(version) = config.protocol_version {
        conn.set_option(LDAP_OPT_PROTOCOL_VERSION, version)?;
    }
    if config.starttls {
        conn.start_tls().await?;
    }
    let binddn = config.bind.binddn.clone().unwrap_or_default();
    let credentials = config.bind.credentials.clone().unwrap_or_default();
    conn.bind(&binddn, &credentials).await?;

    let timeout = args.timeout.map(Duration::from_secs);
    let result = if args.async_search {
        let message_id = conn.search_ext(&request).await?;
        debug!("Search issued with message id {}", message_id);
        conn.search_result(message_id, timeout).await?
    } else {
        match timeout {
            Some(limit) => conn.search_ext_sync_timeout(&request, limit).await?,
            None => conn.search_ext_sync(&request).await?,
        }
    };
    print!("{}", result.to_text());
    for referral in result.referrals() {
        println!("# refldap : {}", referral);
    }

    conn.unbind().await?;
    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    let log_level = if args.debug { "debug" } else { "info" };
    tracing_subscriber::fmt()
        .with_env_filter(format!("ldap_client={},ldapsearch={},info", log_level, log_level))
        .with_writer(std::io::stderr)
        .init();

    info!("Starting ldapsearch");

    if let Err(e) = run(args).await {
        error!("{:#}", e);
        std::process::exit(1);
    }
    Ok(())
}
