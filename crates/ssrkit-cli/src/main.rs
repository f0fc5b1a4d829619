//! # ssrkit CLI Entry Point
//!
//! ## Usage
//!
//! ```bash
//! # Start the rendering server
//! ssrkit serve -c ssrkit.json
//!
//! # Start in development mode with live reload
//! ssrkit serve -c ssrkit.json --dev
//!
//! # Render a fragment once and print the markup
//! ssrkit render Home.js -p '{"id": 1}' -d dist/server
//!
//! # Print the content digest of a source tree
//! ssrkit digest frontend
//!
//! # Print metrics of a running server
//! ssrkit stats http://127.0.0.1:3000
//! ```

use anyhow::{Context, Result};
use argh::FromArgs;
use ssrkit_common::{Location, RequestContext, SsrConfig};
use ssrkit_server::{
    App, BoaEngineFactory, ChangeDetector, EnginePool, PoolConfig, Renderer, ResourceLimits,
    WatchTarget,
};
use std::path::PathBuf;
use std::time::Duration;

#[derive(FromArgs)]
/// ssrkit - server-side rendering on an embedded JavaScript engine
struct Cli {
    #[argh(subcommand)]
    command: Commands,
}

#[derive(FromArgs)]
#[argh(subcommand)]
enum Commands {
    Serve(ServeArgs),
    Render(RenderArgs),
    Digest(DigestArgs),
    Stats(StatsArgs),
}

#[derive(FromArgs)]
#[argh(subcommand, name = "serve")]
/// start the rendering server
struct ServeArgs {
    /// path to a JSON config file; defaults apply when omitted
    #[argh(option, short = 'c')]
    config: Option<String>,

    /// address to bind to, overrides the config file
    #[argh(option, short = 'b')]
    bind: Option<String>,

    /// directory holding the server bundles, overrides the config file
    #[argh(option, short = 'd', long = "build-dir")]
    build_dir: Option<String>,

    /// enable development mode (live reload, rebuilds, diagnostics)
    #[argh(switch)]
    dev: bool,
}

#[derive(FromArgs)]
#[argh(subcommand, name = "render")]
/// render one fragment and print its markup
struct RenderArgs {
    /// fragment file name inside the build directory, e.g. Home.js
    #[argh(positional)]
    fragment: String,

    /// JSON props passed to the fragment as INITIAL_PROPS
    #[argh(option, short = 'p', long = "props", default = "\"{}\".into()")]
    props: String,

    /// directory holding the server bundles
    #[argh(option, short = 'd', long = "build-dir", default = "\"dist/server\".into()")]
    build_dir: String,

    /// request language
    #[argh(option, long = "lang", default = "\"en\".into()")]
    lang: String,

    /// URL the render pretends to serve
    #[argh(option, long = "url", default = "\"http://localhost/\".into()")]
    url: String,

    /// render timeout in milliseconds
    #[argh(option, long = "timeout-ms", default = "10000")]
    timeout_ms: u64,
}

#[derive(FromArgs)]
#[argh(subcommand, name = "digest")]
/// print the content digest of a directory
struct DigestArgs {
    /// directory to digest
    #[argh(positional)]
    path: String,

    /// compare against the persisted digest in this state directory and
    /// record the new one
    #[argh(option, long = "state-dir")]
    state_dir: Option<String>,
}

#[derive(FromArgs)]
#[argh(subcommand, name = "stats")]
/// print the metrics of a running server
struct StatsArgs {
    /// server base URL, e.g. http://127.0.0.1:3000
    #[argh(positional)]
    server_address: String,
}

/// Validates that a URL string starts with http:// or https://
fn validate_http_url(url: &str, description: &str) -> Result<()> {
    if url.starts_with("http://") || url.starts_with("https://") {
        Ok(())
    } else {
        Err(anyhow::anyhow!(
            "Invalid {}: '{}' must start with http:// or https://",
            description,
            url
        ))
    }
}

fn load_config(args: &ServeArgs) -> Result<SsrConfig> {
    let config = match &args.config {
        Some(path) => SsrConfig::from_file(path)?,
        None => SsrConfig::default(),
    };
    let mut config = config.with_env_overrides();
    if let Some(bind) = &args.bind {
        config.bind = bind.clone();
    }
    if let Some(dir) = &args.build_dir {
        config.server_build_dir = PathBuf::from(dir);
    }
    if args.dev {
        config.dev = true;
    }
    Ok(config)
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli: Cli = argh::from_env();

    // render, digest and stats print to stdout; keep it clean
    if matches!(cli.command, Commands::Serve(_)) {
        let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
            .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info"));
        tracing_subscriber::fmt().with_env_filter(env_filter).init();
    }

    match cli.command {
        Commands::Serve(args) => {
            let config = load_config(&args)?;
            tracing::info!("Serving {} on {}", config.server_build_dir.display(), config.bind);
            App::new(config)?.serve().await?;
            Ok(())
        }
        Commands::Render(args) => run_render(args).await,
        Commands::Digest(args) => run_digest(args),
        Commands::Stats(args) => {
            validate_http_url(&args.server_address, "server address")?;
            ssrkit_cli::stats::run_stats(&args.server_address).await
        }
    }
}

/// Request context for a one-off render of `url`.
fn context_for(url: &str, lang: &str) -> Result<RequestContext> {
    let parsed = reqwest::Url::parse(url).with_context(|| format!("Invalid URL {}", url))?;
    let host = match (parsed.host_str(), parsed.port()) {
        (Some(host), Some(port)) => format!("{}:{}", host, port),
        (Some(host), None) => host.to_string(),
        (None, _) => "localhost".to_string(),
    };
    let location = Location::from_parts(
        parsed.scheme(),
        &host,
        parsed.path(),
        parsed.query().unwrap_or(""),
        parsed.fragment().unwrap_or(""),
    );
    Ok(RequestContext::new(location).with_lang(lang))
}

async fn run_render(args: RenderArgs) -> Result<()> {
    let props: serde_json::Value = serde_json::from_str(&args.props)
        .map_err(|e| anyhow::anyhow!("Invalid JSON in props: {}", e))?;
    let ctx = context_for(&args.url, &args.lang)?;

    let limits = ResourceLimits::new().with_render_timeout(Duration::from_millis(args.timeout_ms));
    limits.validate().map_err(|e| anyhow::anyhow!(e))?;
    let pool = EnginePool::new(
        BoaEngineFactory::new(limits.clone()),
        PoolConfig { size: 1, max_uses: 1 },
    )?;
    let renderer = Renderer::new(&args.build_dir, pool, limits);

    let markup = renderer.render(&args.fragment, &props, &ctx).await?;
    println!("{}", markup);
    Ok(())
}

fn run_digest(args: DigestArgs) -> Result<()> {
    let target = WatchTarget::Directory(PathBuf::from(&args.path));
    match &args.state_dir {
        Some(state_dir) => {
            let check = ChangeDetector::new(state_dir).has_changed(&target)?;
            check.commit()?;
            println!("{} {}", check.digest, if check.changed { "changed" } else { "unchanged" });
        }
        None => println!("{}", target.digest()?),
    }
    Ok(())
}

#[cfg(test)]
mod tests;
