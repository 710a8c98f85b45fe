use anyhow::Result;
use clap::Parser;

use folio_cli::{ensure_storage_kind, init_tracing, router_from_env};

#[derive(Parser, Debug)]
#[command(name = "provision_tenant")]
#[command(about = "Create a tenant's category folders and their required subfolders")]
struct Args {
    /// Tenant slug (top-level folder)
    #[arg(long)]
    tenant: String,

    /// Content type used to pick the tenant's backend
    #[arg(long)]
    content_type: String,

    /// Category to provision; repeat for several
    #[arg(long = "category", required_unless_present_any = ["order", "repair"])]
    categories: Vec<String>,

    /// Provision a single order folder under `tenant/content_type` instead
    #[arg(long, conflicts_with_all = ["categories", "repair"])]
    order: Option<String>,

    /// Add missing required subfolders to every existing order under `tenant/content_type`
    #[arg(long, conflicts_with = "categories")]
    repair: bool,

    /// Expected backend kind (local, object_store, cloud_drive); fail if the tenant uses another
    #[arg(long)]
    storage_type: Option<String>,
}

#[tokio::main]
async fn main() -> Result<()> {
    init_tracing();

    let args = Args::parse();
    let router = router_from_env()?;

    let backend = router.get_backend(&args.tenant, &args.content_type).await?;
    if let Err(e) = ensure_storage_kind(args.storage_type.as_deref(), backend.kind()) {
        router.shutdown().await;
        return Err(e);
    }
    tracing::info!(
        tenant = %args.tenant,
        kind = %backend.kind(),
        subfolders = ?router.settings().required_subfolders,
        "Provisioning tenant storage"
    );

    let result = if let Some(order) = &args.order {
        router
            .provision_order(&args.tenant, &args.content_type, order)
            .await
    } else if args.repair {
        router.repair_orders(&args.tenant, &args.content_type).await
    } else {
        router
            .provision_tenant(&args.tenant, &args.content_type, &args.categories)
            .await
    };
    router.shutdown().await;

    let result = result?;
    println!("{}", serde_json::to_string_pretty(&result)?);

    if !result.success {
        tracing::error!(
            tenant = %result.tenant,
            failed = result.failed_paths.len(),
            "Provisioning finished with failures"
        );
        std::process::exit(1);
    }

    Ok(())
}
