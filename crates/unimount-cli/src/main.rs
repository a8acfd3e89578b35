//! Unimount CLI: inspect driver types and mounts, probe settings, browse mounted paths.
//!
//! Commands that touch mount records need DATABASE_URL.

use std::sync::Arc;

use anyhow::Context;
use clap::{Parser, Subcommand};
use serde::Serialize;
use unimount_cli::{format_row, init_tracing};
use unimount_core::{Config, MountScope, NewMount};
use unimount_db::{InMemoryMountRepository, MountRepository, PgMountRepository};
use unimount_storage::{
    registry, CancellationToken, DriverManager, FsService, ListArgs, MountService, Scope,
    TenantDriverManager,
};
use uuid::Uuid;

#[derive(Parser)]
#[command(name = "unimount", about = "Unimount storage routing CLI")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// List registered driver types
    Drivers,
    /// Show the descriptor and settings schema of a driver type
    Describe {
        /// Driver name, e.g. Local
        driver: String,
    },
    /// List mount records of a scope
    Mounts {
        /// Tenant UUID; global mounts when omitted
        #[arg(long)]
        tenant: Option<Uuid>,
        /// Maximum number of records
        #[arg(long, default_value = "50")]
        limit: i64,
        /// Offset for pagination
        #[arg(long, default_value = "0")]
        offset: i64,
    },
    /// Create a mount and wait until it is loaded
    Add {
        /// Mount path, e.g. /docs
        mount_path: String,
        /// Driver name
        driver: String,
        /// Driver settings as JSON
        #[arg(long, default_value = "{}")]
        addition: String,
        /// Owning tenant UUID
        #[arg(long)]
        tenant: Option<Uuid>,
        /// Lower values sort first
        #[arg(long, default_value = "0")]
        order_index: i32,
        /// Expose the mount to other tenants
        #[arg(long)]
        public: bool,
        /// Let unauthenticated callers see a public mount
        #[arg(long)]
        allow_guest: bool,
    },
    /// Delete a mount record and unload its driver
    Remove {
        /// Mount record id
        id: i64,
    },
    /// Initialize a driver with the given settings and list its root, without saving anything
    Probe {
        /// Driver name
        driver: String,
        /// Driver settings as JSON
        #[arg(long, default_value = "{}")]
        addition: String,
    },
    /// List a path through the mount table
    Ls {
        /// Path to list
        #[arg(default_value = "/")]
        path: String,
        /// Browse as this tenant
        #[arg(long, conflicts_with = "guest")]
        tenant: Option<Uuid>,
        /// Browse as an unauthenticated caller
        #[arg(long)]
        guest: bool,
        /// Print JSON instead of a table
        #[arg(long)]
        json: bool,
    },
}

fn print_json(value: &impl Serialize) -> anyhow::Result<()> {
    let out = serde_json::to_string_pretty(value).context("Serialize response")?;
    println!("{}", out);
    Ok(())
}

fn managers(config: &Config, repo: Arc<dyn MountRepository>) -> TenantDriverManager {
    let global = DriverManager::from_config(config, registry::global(), repo);
    TenantDriverManager::new(global)
}

async fn connect_repo(config: &Config) -> anyhow::Result<Arc<dyn MountRepository>> {
    let pool = unimount_db::connect(config)
        .await
        .context("Failed to connect to the mount database. Set DATABASE_URL")?;
    Ok(Arc::new(PgMountRepository::new(pool)))
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    init_tracing();
    dotenvy::dotenv().ok();

    let cli = Cli::parse();
    let config = Config::from_env().context("Failed to load configuration")?;
    let cancel = CancellationToken::new();

    match cli.command {
        Commands::Drivers => {
            print_json(&registry::names())?;
        }
        Commands::Describe { driver } => {
            let info = registry::info(&driver)?;
            print_json(&info)?;
        }
        Commands::Mounts {
            tenant,
            limit,
            offset,
        } => {
            let repo = connect_repo(&config).await?;
            let records = repo
                .list(MountScope::from(tenant), limit, offset)
                .await?;
            print_json(&records)?;
        }
        Commands::Add {
            mount_path,
            driver,
            addition,
            tenant,
            order_index,
            public,
            allow_guest,
        } => {
            let repo = connect_repo(&config).await?;
            let service = MountService::new(managers(&config, repo));
            let mut new = NewMount::new(tenant, mount_path, driver, addition);
            new.order_index = order_index;
            new.is_public = public;
            new.allow_guest = allow_guest;

            let (record, handle) = service.create(new, cancel.clone()).await?;
            if let Err(e) = handle.wait().await {
                tracing::warn!(mount_path = %record.mount_path, error = %e, "Mount saved but failed to load");
            }
            print_json(&record)?;
        }
        Commands::Remove { id } => {
            let repo = connect_repo(&config).await?;
            let service = MountService::new(managers(&config, repo));
            let (record, handle) = service.delete(id, cancel.clone()).await?;
            handle.wait().await?;
            print_json(&serde_json::json!({
                "success": true,
                "message": format!("Mount {} deleted", record.mount_path)
            }))?;
        }
        Commands::Probe { driver, addition } => {
            let repo: Arc<dyn MountRepository> = Arc::new(InMemoryMountRepository::new());
            let service = MountService::new(managers(&config, repo));
            let objects = service
                .test(NewMount::new(None, "/", driver, addition), &cancel)
                .await?;
            print_json(&objects)?;
        }
        Commands::Ls {
            path,
            tenant,
            guest,
            json,
        } => {
            let repo = connect_repo(&config).await?;
            let tenants = managers(&config, repo);
            let report = tenants.global().load_all(&cancel).await?;
            for failure in &report.failed {
                tracing::warn!(mount_path = %failure.mount_path, error = %failure.error, "Mount failed to load");
            }

            let scope = match (tenant, guest) {
                (Some(tenant_id), _) => {
                    tenants.load_tenant(tenant_id, &cancel).await?;
                    Scope::Tenant(tenant_id)
                }
                (None, true) => Scope::Guest,
                (None, false) => Scope::Global,
            };

            let fs = FsService::new(tenants);
            let objects = fs.list(scope, &path, ListArgs::default(), &cancel).await?;
            if json {
                print_json(&objects)?;
            } else {
                for obj in &objects {
                    println!("{}", format_row(obj));
                }
            }
        }
    }

    Ok(())
}
