//! `para-builder` - builds and publishes Terraform plugin binaries.
//!
//! Reads the catalog from `formulae/`, builds every declared artifact that the
//! registry's `binaries` release does not have yet (one container per
//! release), uploads the results, and regenerates `para.idx.yaml`.

use std::path::PathBuf;
use std::time::{Duration, Instant};

use anyhow::{Context, Result, bail};
use clap::Parser;
use para_core::io::github::{API_BASE, UPLOAD_BASE};
use para_core::{
    ArtifactStore, CATALOG_DIR, DockerConfig, DockerProvisioner, GitHubConfig, GitHubStore,
    IndexError, PublishOutcome, ReconcileOptions, ReconcileReport, Reconciler, ReleaseOutcome,
    RepoKey, build_index, load_catalog, publish, render,
};
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
#[command(
    author,
    version,
    about = "Build and publish Terraform plugin binaries",
    long_about = None
)]
struct Args {
    /// GitHub token with write access to the registry repository
    #[arg(long, env = "GITHUB_TOKEN", hide_env_values = true)]
    token: String,

    /// Owner of the registry repository
    #[arg(long, env = "GITHUB_ORGANIZATION")]
    organization: String,

    /// Name of the registry repository
    #[arg(long, env = "GITHUB_PROJECT")]
    project: String,

    /// Path to the catalog directory
    #[arg(short, long, default_value = CATALOG_DIR)]
    catalog_dir: PathBuf,

    /// Only build a single package (the index still covers the whole catalog)
    #[arg(short, long)]
    filter: Option<String>,

    /// Report what would be built; don't provision, upload or publish
    #[arg(long, default_value_t = false)]
    dry_run: bool,

    /// Also write the rendered index to this path
    #[arg(short, long)]
    output: Option<PathBuf>,

    /// GitHub API base URL
    #[arg(long, default_value = API_BASE)]
    api_url: String,

    /// GitHub uploads base URL
    #[arg(long, default_value = UPLOAD_BASE)]
    upload_url: String,

    /// Container CLI used for build environments
    #[arg(long, default_value = "docker")]
    container_cli: String,

    /// Seconds allowed to pull, create and start a build container
    #[arg(long, default_value_t = 600)]
    provision_timeout: u64,

    /// Seconds allowed for each command run inside a build container
    #[arg(long, default_value_t = 3600)]
    command_timeout: u64,

    /// Seconds allowed to copy an artifact out of a build container
    #[arg(long, default_value_t = 300)]
    copy_timeout: u64,

    /// Seconds allowed for each asset upload
    #[arg(long, default_value_t = 600)]
    upload_timeout: u64,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let args = Args::parse();
    let start_time = Instant::now();

    for (name, value) in [
        ("GITHUB_TOKEN", &args.token),
        ("GITHUB_ORGANIZATION", &args.organization),
        ("GITHUB_PROJECT", &args.project),
    ] {
        if value.trim().is_empty() {
            bail!("{name} must not be empty");
        }
    }

    println!("  loading catalog from {}", args.catalog_dir.display());
    let catalog = load_catalog(&args.catalog_dir)
        .with_context(|| format!("Failed to load catalog from {}", args.catalog_dir.display()))?;
    println!(
        "  found {} packages, {} artifacts",
        catalog.len(),
        catalog.artifacts().count()
    );
    if catalog.is_empty() {
        println!("  catalog is empty; the index will have no entries");
    }
    if let Some(filter) = &args.filter
        && catalog.package(filter).is_none()
    {
        bail!("package '{filter}' is not in the catalog");
    }

    let repo = RepoKey::new(&args.organization, &args.project);
    let mut github = GitHubConfig::new(&args.token, repo.clone());
    github.api_base = args.api_url.trim_end_matches('/').to_string();
    github.upload_base = args.upload_url.trim_end_matches('/').to_string();
    github.upload_timeout = Duration::from_secs(args.upload_timeout);
    let store = GitHubStore::new(github).context("Failed to create GitHub client")?;

    let provisioner = DockerProvisioner::new(DockerConfig {
        program: args.container_cli.clone(),
        provision_timeout: Duration::from_secs(args.provision_timeout),
        command_timeout: Duration::from_secs(args.command_timeout),
        copy_timeout: Duration::from_secs(args.copy_timeout),
        ..DockerConfig::default()
    });

    println!("  reconciling against {repo}");
    let options = ReconcileOptions {
        dry_run: args.dry_run,
        filter: args.filter.clone(),
    };
    let report = Reconciler::new(&store, &provisioner, options)
        .run(&catalog)
        .await?;
    print_summary(&report, start_time.elapsed());

    if !report.is_success() {
        println!("  index not published");
        std::process::exit(1);
    }

    // Re-list: the index must reflect what the store holds now.
    let assets = store
        .list_release_assets()
        .await
        .context("Failed to re-list release assets")?;
    let doc = match build_index(&catalog, &assets) {
        Ok(doc) => doc,
        Err(IndexError::MissingAsset { fqn }) if args.dry_run => {
            println!("  dry-run: index incomplete until {fqn} is built");
            return Ok(());
        }
        Err(e) => return Err(e).context("Failed to build index"),
    };
    let rendered = render(&doc)?;
    if doc.is_empty() {
        warn!("built an empty index");
    } else {
        info!(entries = doc.len(), "built index");
    }

    if let Some(path) = &args.output {
        tokio::fs::write(path, &rendered)
            .await
            .with_context(|| format!("Failed to write {}", path.display()))?;
        println!("  wrote {}", path.display());
    }

    if args.dry_run {
        println!("  dry-run: skipping index publish");
        return Ok(());
    }

    match publish(&store, &rendered)
        .await
        .context("Failed to publish index")?
    {
        PublishOutcome::Created => println!("  index created ({} entries)", doc.len()),
        PublishOutcome::Updated => println!("  index updated ({} entries)", doc.len()),
        PublishOutcome::Unchanged => println!("  index unchanged"),
    }

    Ok(())
}

fn print_summary(report: &ReconcileReport, elapsed: Duration) {
    let mut built = 0;
    let mut up_to_date = 0;
    let mut planned = 0;
    let mut failed = 0;

    println!();
    println!("  summary");
    for r in &report.releases {
        match &r.outcome {
            ReleaseOutcome::UpToDate => up_to_date += 1,
            ReleaseOutcome::Built { uploaded } => {
                built += 1;
                println!("    built {}/{} ({} artifacts)", r.package, r.release, uploaded.len());
            }
            ReleaseOutcome::Planned { missing } => {
                planned += 1;
                println!("    would build {}/{}", r.package, r.release);
                for fqn in missing {
                    println!("      {fqn}");
                }
            }
            ReleaseOutcome::Failed { error, .. } => {
                failed += 1;
                println!("    failed {}/{}: {error}", r.package, r.release);
            }
        }
    }

    println!();
    println!(
        "  {built} built, {up_to_date} up to date, {planned} planned, {failed} failed in {:.1}s",
        elapsed.as_secs_f64()
    );
}
