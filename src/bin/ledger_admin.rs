use std::sync::Arc;

use anyhow::{Context, Result};
use clap::{ArgAction, Args, Parser, Subcommand};
use serde::Serialize;
use stateset_ledger::{
    config::{self, AppConfig},
    db,
    events::{self, EventSender},
    services::{
        inventory::MovementRecord,
        inventory_adjustment_service::{AdjustmentReason, ManualAdjustment},
        reconciliation::VariantReconciliation,
    },
    LedgerState,
};

#[derive(Parser)]
#[command(name = "ledger-admin", about = "Operate the StateSet inventory ledger")]
struct Cli {
    #[arg(
        long,
        global = true,
        action = ArgAction::SetTrue,
        help = "Render command output as pretty JSON"
    )]
    json: bool,
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Apply pending schema migrations
    Migrate,
    /// Record a manual stock adjustment
    Adjust(AdjustArgs),
    /// Recompute cached variant totals from location stock
    Resync(VariantArgs),
    /// Compare location stock and totals against the movement ledger
    Reconcile(VariantArgs),
    /// Show recent movements, newest first
    History(HistoryArgs),
}

#[derive(Args)]
struct AdjustArgs {
    #[arg(long)]
    variant: i64,
    /// Defaults to the default location
    #[arg(long)]
    location: Option<i64>,
    /// received, returned_to_stock, sold_manually, damaged or correction
    #[arg(long)]
    reason: AdjustmentReason,
    #[arg(long, allow_negative_numbers = true)]
    quantity: i64,
    #[arg(long)]
    reference: Option<String>,
    #[arg(long)]
    notes: Option<String>,
}

#[derive(Args)]
struct VariantArgs {
    /// Limit to one variant; all variants otherwise
    #[arg(long)]
    variant: Option<i64>,
}

#[derive(Args)]
struct HistoryArgs {
    #[arg(long)]
    variant: i64,
    #[arg(long)]
    location: Option<i64>,
    #[arg(long, default_value_t = 20)]
    limit: u64,
}

struct CliContext {
    state: LedgerState,
}

impl CliContext {
    async fn initialize() -> Result<Self> {
        let config = config::load_config().context("failed to load application config")?;
        config::init_tracing(config.log_level(), config.log_json);

        let db_pool = db::establish_connection_from_app_config(&config)
            .await
            .context("failed to connect to database")?;
        let db = Arc::new(db_pool);

        if config.auto_migrate {
            db::run_migrations(&db)
                .await
                .context("failed to run migrations")?;
        }

        let (event_sender, event_rx) = EventSender::channel(config.event_channel_capacity);
        tokio::spawn(events::process_events(event_rx, Vec::new()));

        Ok(Self {
            state: LedgerState::new(db, config, Some(event_sender)),
        })
    }

    fn config(&self) -> &AppConfig {
        &self.state.config
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let context = CliContext::initialize().await?;

    match cli.command {
        Commands::Migrate => handle_migrate(&context).await?,
        Commands::Adjust(args) => handle_adjust(&context, args, cli.json).await?,
        Commands::Resync(args) => handle_resync(&context, args, cli.json).await?,
        Commands::Reconcile(args) => handle_reconcile(&context, args, cli.json).await?,
        Commands::History(args) => handle_history(&context, args, cli.json).await?,
    }

    Ok(())
}

async fn handle_migrate(context: &CliContext) -> Result<()> {
    db::run_migrations(&context.state.db)
        .await
        .context("failed to run migrations")?;
    println!("Migrations applied ({})", context.config().environment);
    Ok(())
}

async fn handle_adjust(context: &CliContext, args: AdjustArgs, json: bool) -> Result<()> {
    let adjustment = ManualAdjustment {
        variant_id: args.variant,
        location_id: args.location,
        reason: args.reason,
        quantity: args.quantity,
        reference: args.reference,
        notes: args.notes,
    };

    let record = context
        .state
        .adjustment_service()
        .apply(adjustment)
        .await
        .context("adjustment rejected")?;

    if json {
        print_json(&record)?;
    } else {
        render_movement(&record);
        if record.is_oversold() {
            println!("  warning: stock at {} is now negative", record.location_code);
        }
    }
    Ok(())
}

async fn handle_resync(context: &CliContext, args: VariantArgs, json: bool) -> Result<()> {
    let inventory = &context.state.inventory;

    match args.variant {
        Some(variant_id) => {
            let total = inventory
                .resync(variant_id)
                .await
                .with_context(|| format!("failed to resync variant {}", variant_id))?;
            if json {
                print_json(&serde_json::json!({ "variant_id": variant_id, "total": total }))?;
            } else {
                println!("Variant {} total = {}", variant_id, total);
            }
        }
        None => {
            let drifted = inventory
                .resync_all()
                .await
                .context("failed to resync variants")?;
            if json {
                print_json(&drifted)?;
            } else if drifted.is_empty() {
                println!("All variant totals were already in sync");
            } else {
                for sync in &drifted {
                    println!(
                        "- Variant {} repaired: {} -> {}",
                        sync.variant_id, sync.previous_total, sync.current_total
                    );
                }
            }
        }
    }
    Ok(())
}

async fn handle_reconcile(context: &CliContext, args: VariantArgs, json: bool) -> Result<()> {
    let service = context.state.reconciliation_service();

    let reports = match args.variant {
        Some(variant_id) => vec![service
            .reconcile(variant_id)
            .await
            .with_context(|| format!("failed to reconcile variant {}", variant_id))?],
        None => service
            .reconcile_all()
            .await
            .context("failed to reconcile variants")?,
    };

    if json {
        print_json(&reports)?;
    } else {
        reports.iter().for_each(render_reconciliation);
    }

    let inconsistent = reports.iter().filter(|r| !r.is_consistent()).count();
    if inconsistent > 0 {
        anyhow::bail!("{} variant(s) do not reconcile", inconsistent);
    }
    Ok(())
}

async fn handle_history(context: &CliContext, args: HistoryArgs, json: bool) -> Result<()> {
    let movements = context
        .state
        .inventory
        .movement_history(args.variant, args.location, args.limit)
        .await
        .context("failed to load movement history")?;

    if json {
        print_json(&movements)?;
    } else if movements.is_empty() {
        println!("No movements recorded for variant {}", args.variant);
    } else {
        for m in &movements {
            let label = m
                .reference
                .clone()
                .unwrap_or_else(|| m.movement_type.to_string());
            println!(
                "- #{} {} • location {} • {:+} ({} -> {}) • {}",
                m.id,
                m.created_at.format("%Y-%m-%d %H:%M:%S"),
                m.location_id,
                m.quantity,
                m.quantity_before,
                m.quantity_after,
                label,
            );
        }
    }
    Ok(())
}

fn print_json<T: Serialize>(value: &T) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

fn render_movement(record: &MovementRecord) {
    let m = &record.movement;
    println!(
        "- Movement #{} • {} @ {} • {} {:+} ({} -> {}) • variant total {}",
        m.id,
        record.sku,
        record.location_code,
        m.movement_type,
        m.quantity,
        m.quantity_before,
        m.quantity_after,
        record.variant_total
    );
}

fn render_reconciliation(report: &VariantReconciliation) {
    let status = if report.is_consistent() { "ok" } else { "MISMATCH" };
    println!(
        "- Variant {} ({}) • {} • cached {} / derived {}",
        report.variant_id, report.sku, status, report.cached_total, report.derived_total
    );
    for location in &report.locations {
        println!(
            "    location {} • projection {} • ledger {} • {} movements • {} chain breaks",
            location.location_id,
            location.projection_quantity,
            location.ledger_quantity,
            location.movement_count,
            location.chain_breaks.len()
        );
    }
}
