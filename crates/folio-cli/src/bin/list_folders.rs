use anyhow::Result;
use clap::Parser;

use folio_cli::{ensure_storage_kind, format_listing, init_tracing, router_from_env};

#[derive(Parser, Debug)]
#[command(name = "list_folders")]
#[command(about = "List the folders below a tenant path")]
struct Args {
    /// Tenant slug
    #[arg(long)]
    tenant: String,

    /// Content type used to pick the tenant's backend
    #[arg(long)]
    content_type: String,

    /// Path below the tenant folder (defaults to the tenant folder itself)
    #[arg(long)]
    path: Option<String>,

    /// Expected backend kind (local, object_store, cloud_drive); fail if the tenant uses another
    #[arg(long)]
    storage_type: Option<String>,

    /// Output format: json or table (default: table)
    #[arg(long, default_value = "table")]
    format: String,
}

#[tokio::main]
async fn main() -> Result<()> {
    init_tracing();

    let args = Args::parse();
    let router = router_from_env()?;

    let target = match args.path.as_deref().map(|p| p.trim_matches('/')) {
        Some(sub) if !sub.is_empty() => format!("{}/{}", args.tenant, sub),
        _ => args.tenant.clone(),
    };

    let backend = router.get_backend(&args.tenant, &args.content_type).await?;
    let names = match ensure_storage_kind(args.storage_type.as_deref(), backend.kind()) {
        Ok(()) => backend.list_directories(&target).await.map_err(anyhow::Error::from),
        Err(e) => Err(e),
    };
    router.shutdown().await;
    let names = names?;

    match args.format.as_str() {
        "json" => println!("{}", serde_json::to_string_pretty(&names)?),
        _ => print!("{}", format_listing(&target, &names)),
    }

    Ok(())
}
