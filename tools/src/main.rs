//! interest-runner: headless batch runner for overdue-invoice interest.
//!
//! Usage:
//!   interest-runner --db interest.db --data-dir ./data --as-of 2025-03-01
//!   interest-runner --fixture data/sandbox.json --dry-run --json
//!
//! The runner is the only place that builds a platform client. It seeds
//! client configs from `<data_dir>/clients.json` into an empty store, wraps
//! the client in the rate limiter and runs one batch. Auth and connectivity
//! failures end the process with a non-zero status.

use anyhow::{Context, Result};
use chrono::NaiveDate;
use interest_core::{
    config::EngineConfig,
    engine::{ClientRunReport, InterestEngine},
    sandbox::SandboxAccounting,
    store::InterestStore,
    throttle::Throttled,
};
use std::env;

fn main() -> Result<()> {
    env_logger::init();

    let args: Vec<String> = env::args().collect();
    let db = arg_str(&args, "--db").unwrap_or(":memory:");
    let data_dir = arg_str(&args, "--data-dir").unwrap_or("./data");
    let fixture = arg_str(&args, "--fixture")
        .map(str::to_string)
        .unwrap_or_else(|| format!("{data_dir}/sandbox.json"));
    let as_of = match arg_str(&args, "--as-of") {
        Some(raw) => NaiveDate::parse_from_str(raw, "%Y-%m-%d")
            .with_context(|| format!("--as-of expects YYYY-MM-DD, got '{raw}'"))?,
        None => chrono::Local::now().date_naive(),
    };
    let dry_run = args.iter().any(|a| a == "--dry-run");
    let reseed = args.iter().any(|a| a == "--seed-clients");
    let json = args.iter().any(|a| a == "--json");
    let spacing = parse_arg(&args, "--spacing-ms", u64::MAX);

    if !json {
        println!("interest-runner");
        println!("  db:        {db}");
        println!("  data_dir:  {data_dir}");
        println!("  fixture:   {fixture}");
        println!("  as_of:     {as_of}");
        println!("  dry_run:   {dry_run}");
        println!();
    }

    // For :memory: use a SQLite shared-memory URI so every connection opened
    // during the run sees the same database.
    let db_effective: String = if db == ":memory:" {
        format!("file:interest_{}?mode=memory&cache=shared", unix_secs())
    } else {
        db.to_string()
    };
    let store = InterestStore::open(&db_effective)?;
    store.migrate()?;

    if reseed || store.config_count()? == 0 {
        seed_clients(&store, data_dir)?;
    }

    let mut engine_config = EngineConfig::load(data_dir).unwrap_or_else(|e| {
        log::warn!("{e}; using built-in engine defaults");
        EngineConfig::default()
    });
    if spacing != u64::MAX {
        engine_config.min_call_spacing_ms = spacing;
    }

    let sandbox = SandboxAccounting::from_fixture_file(&fixture)
        .with_context(|| format!("cannot load platform fixture {fixture}"))?;
    let mut client = Throttled::from_millis(sandbox, engine_config.min_call_spacing_ms);

    let engine = InterestEngine::new(&store, engine_config);
    let reports = engine.run(&mut client, as_of, dry_run)?;

    if json {
        println!("{}", serde_json::to_string_pretty(&reports)?);
    } else {
        print_summary(&reports, &store, client.calls())?;
    }
    Ok(())
}

fn seed_clients(store: &InterestStore, data_dir: &str) -> Result<()> {
    let clients = EngineConfig::load_clients(data_dir)?;
    let mut seeded = 0;
    for c in &clients {
        if store.get_config(&c.config_id)?.is_none() {
            store.insert_config(c)?;
            seeded += 1;
        }
    }
    log::info!("seeded {seeded} of {} client configs", clients.len());
    Ok(())
}

fn print_summary(reports: &[ClientRunReport], store: &InterestStore, calls: u64) -> Result<()> {
    println!("=== RUN SUMMARY ===");
    for report in reports {
        println!("  {} ({}, {})", report.contact_name, report.contact_id, report.mode.as_str());
        if let Some(err) = &report.error {
            println!("    error: {err}");
        }
        let Some(s) = &report.summary else { continue };
        println!("    invoices:          {}", s.results.len());
        println!("    changed:           {}", s.changed().count());
        println!("    should owe:        {:.2}", s.total_should_owe);
        println!("    previously charged: {:.2}", s.total_previously_charged);
        println!("    net change:        {:.2}", s.net_change);
        println!("    entries written:   {}", s.entries_written);
        for r in s.changed() {
            println!(
                "      {} [{}] {:>10.2} -> {:>10.2} ({:+.2}) {} / {}",
                r.source_invoice_number,
                r.period,
                r.previously_charged,
                r.should_owe,
                r.delta,
                r.action.as_str(),
                r.reason.as_str()
            );
        }
        for doc in &s.created_invoices {
            println!("    invoice created:   {}", doc.number);
        }
        for doc in &s.credit_notes {
            println!("    credit note:       {}", doc.number);
        }
        for err in &s.errors {
            println!("    skipped:           {err}");
        }
    }
    println!();
    println!("  platform calls:    {calls}");
    println!("  ledger entries:    {}", store.ledger_entry_count()?);
    Ok(())
}

fn arg_str<'a>(args: &'a [String], flag: &str) -> Option<&'a str> {
    args.windows(2)
        .find(|w| w[0] == flag)
        .map(|w| w[1].as_str())
}

fn parse_arg<T: std::str::FromStr + Copy>(args: &[String], flag: &str, default: T) -> T {
    args.windows(2)
        .find(|w| w[0] == flag)
        .and_then(|w| w[1].parse().ok())
        .unwrap_or(default)
}

fn unix_secs() -> u64 {
    use std::time::{SystemTime, UNIX_EPOCH};
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or(0)
}
