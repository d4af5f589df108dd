use chrono::{Datelike, Local, NaiveDate, Utc};
use clap::{Parser, Subcommand};
use pillbox_core::journal::MemoryJournal;
use pillbox_core::*;
use std::collections::HashSet;
use std::path::PathBuf;
use std::process::ExitCode;

#[derive(Parser)]
#[command(name = "pillbox")]
#[command(about = "Weekly pillbox schedule and stock tracker", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Override data directory
    #[arg(long, global = true)]
    data_dir: Option<PathBuf>,

    /// Debug logging
    #[arg(long, short, global = true)]
    verbose: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// List the dose events of the week containing a date
    Schedule {
        /// Calendar ID
        #[arg(long)]
        calendar: String,

        /// Restrict to one medicine box of the calendar
        #[arg(long = "box", value_name = "BOX_ID")]
        medicine_box: Option<String>,

        /// Reference date (YYYY-MM-DD), defaults to today
        #[arg(long)]
        date: Option<String>,

        /// Print JSON instead of a list
        #[arg(long)]
        json: bool,
    },

    /// Show the weekly table, grouped by time of day
    Table {
        /// Calendar ID
        #[arg(long)]
        calendar: String,

        /// Restrict to one medicine box of the calendar
        #[arg(long = "box", value_name = "BOX_ID")]
        medicine_box: Option<String>,

        /// Reference date (YYYY-MM-DD), defaults to today
        #[arg(long)]
        date: Option<String>,

        /// Print JSON instead of a table
        #[arg(long, conflicts_with = "csv")]
        json: bool,

        /// Export the table to a CSV file
        #[arg(long)]
        csv: Option<PathBuf>,
    },

    /// Mark the pillbox as used: decrement the week's tablets from stock
    Use {
        /// Calendar ID
        #[arg(long)]
        calendar: String,

        /// First day of the week being filled (YYYY-MM-DD), defaults to today
        #[arg(long)]
        date: Option<String>,

        /// Show what would change without writing anything
        #[arg(long)]
        dry_run: bool,

        /// Print the report as JSON
        #[arg(long)]
        json: bool,
    },

    /// Run the weekly decrement sweep over every calendar
    Sweep {
        /// First day of the swept week (YYYY-MM-DD), defaults to today
        #[arg(long)]
        date: Option<String>,

        /// Sweep even if this week was already swept
        #[arg(long)]
        force: bool,

        /// Show what would change without writing anything
        #[arg(long)]
        dry_run: bool,

        /// Print the report as JSON
        #[arg(long)]
        json: bool,
    },

    /// Check the store for invalid rules and duplicate IDs
    Validate,
}

fn main() -> ExitCode {
    let cli = Cli::parse();
    pillbox_core::logging::init_with_level(pillbox_core::logging::level_for(cli.verbose));

    match run(cli) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("Error: {}", e);
            ExitCode::FAILURE
        }
    }
}

fn run(cli: Cli) -> Result<()> {
    let mut config = Config::load()?;
    if let Some(data_dir) = cli.data_dir {
        config.data.data_dir = data_dir;
    }

    match cli.command {
        Commands::Schedule {
            calendar,
            medicine_box,
            date,
            json,
        } => cmd_schedule(
            &config,
            &calendar,
            medicine_box.as_deref(),
            parse_date(date)?,
            json,
        ),
        Commands::Table {
            calendar,
            medicine_box,
            date,
            json,
            csv,
        } => cmd_table(
            &config,
            &calendar,
            medicine_box.as_deref(),
            parse_date(date)?,
            json,
            csv,
        ),
        Commands::Use {
            calendar,
            date,
            dry_run,
            json,
        } => cmd_use(&config, &calendar, parse_date(date)?, dry_run, json),
        Commands::Sweep {
            date,
            force,
            dry_run,
            json,
        } => cmd_sweep(&config, parse_date(date)?, force, dry_run, json),
        Commands::Validate => cmd_validate(&config),
    }
}

fn parse_date(raw: Option<String>) -> Result<NaiveDate> {
    match raw {
        None => Ok(Local::now().date_naive()),
        Some(s) => NaiveDate::parse_from_str(s.trim(), "%Y-%m-%d")
            .map_err(|e| Error::Validation(format!("invalid date '{}': {}", s, e))),
    }
}

/// Rules of the whole calendar, or only those of one of its boxes
fn selected_rules(
    store: &JsonStore,
    calendar: &Calendar,
    box_id: Option<&str>,
) -> Result<Vec<PrescribedRule>> {
    let box_id = match box_id {
        Some(id) => id,
        None => return Ok(calendar.prescribed_rules()),
    };

    let medicine_box = calendar
        .find_box(box_id)
        .ok_or_else(|| Error::box_not_found(box_id))?;
    Ok(store
        .box_rules(box_id)?
        .into_iter()
        .map(|rule| PrescribedRule {
            title: medicine_box.name.clone(),
            dose: medicine_box.dose.clone(),
            rule,
        })
        .collect())
}

fn cmd_schedule(
    config: &Config,
    calendar_id: &str,
    box_id: Option<&str>,
    date: NaiveDate,
    json: bool,
) -> Result<()> {
    let store = JsonStore::new(config.data.store_path());
    let calendar = store.calendar(calendar_id)?;
    let events = generate_schedule(date, &selected_rules(&store, &calendar, box_id)?)?;

    if json {
        println!("{}", serde_json::to_string_pretty(&events)?);
        return Ok(());
    }

    let window = weekly_window_from_monday(date);
    println!(
        "{}: week of {} to {}",
        calendar.name, window[0], window[window.len() - 1]
    );
    if events.is_empty() {
        println!("  No doses scheduled.");
    }
    for event in &events {
        println!(
            "  {}  {} {}  x{}",
            event.timestamp.format("%a %Y-%m-%d %H:%M"),
            event.title,
            event.dose,
            event.tablet_count
        );
    }
    Ok(())
}

fn cmd_table(
    config: &Config,
    calendar_id: &str,
    box_id: Option<&str>,
    date: NaiveDate,
    json: bool,
    csv: Option<PathBuf>,
) -> Result<()> {
    let store = JsonStore::new(config.data.store_path());
    let calendar = store.calendar(calendar_id)?;
    let table = generate_table(date, &selected_rules(&store, &calendar, box_id)?)?;

    if let Some(path) = csv {
        let rows = pillbox_core::export::export_table_csv(&table, &path)?;
        println!("✓ Exported {} rows to {}", rows, path.display());
        return Ok(());
    }

    if json {
        println!("{}", serde_json::to_string_pretty(&table)?);
        return Ok(());
    }

    display_table(&calendar.name, date, &table);
    Ok(())
}

fn display_table(name: &str, date: NaiveDate, table: &WeeklyTable) {
    let window = weekly_window_from_monday(date);
    println!("{}: week of {}", name, window[0]);

    for slot in TimeSlot::ALL {
        let entries = table.bucket(slot);
        println!();
        println!("  {}", slot.as_str().to_uppercase());
        if entries.is_empty() {
            println!("    -");
            continue;
        }

        print!("    {:<28}", "");
        for day in window {
            print!("{:>5}", day.format("%a").to_string());
        }
        println!();

        for entry in entries {
            let label = format!("{} {}", entry.title, entry.dose);
            print!("    {:<28}", label.trim());
            for day in window {
                let cell = entry
                    .cells
                    .get(day.weekday())
                    .map(|t| t.to_string())
                    .unwrap_or_else(|| "·".to_string());
                print!("{:>5}", cell);
            }
            println!();
        }
    }
}

fn cmd_use(
    config: &Config,
    calendar_id: &str,
    date: NaiveDate,
    dry_run: bool,
    json: bool,
) -> Result<()> {
    let mut store = JsonStore::new(config.data.store_path());

    let report = if dry_run {
        let mut preview = MemoryStore {
            document: store.load()?,
        };
        mark_pillbox_used(&mut preview, &mut MemoryJournal::default(), calendar_id, date)?
    } else {
        let mut journal = JsonlJournal::new(config.data.journal_path());
        mark_pillbox_used(&mut store, &mut journal, calendar_id, date)?
    };

    print_report(config, report, dry_run, json)
}

fn cmd_sweep(config: &Config, date: NaiveDate, force: bool, dry_run: bool, json: bool) -> Result<()> {
    let ledger_path = config.data.ledger_path();
    let guarded = config.sweep.use_ledger && !force;
    let mut store = JsonStore::new(config.data.store_path());

    if dry_run {
        let ledger = SweepLedger::load(&ledger_path)?;
        if guarded && ledger.already_swept(date) {
            return report_already_swept(date);
        }
        let mut done: HashSet<String> = if guarded {
            ledger.pending_boxes_for(date).iter().cloned().collect()
        } else {
            HashSet::new()
        };
        let mut preview = MemoryStore {
            document: store.load()?,
        };
        let report = run_weekly_sweep(&mut preview, &mut MemoryJournal::default(), &mut done, date)?;
        return print_report(config, report, dry_run, json);
    }

    // Held until the week is recorded so concurrent triggers cannot both sweep
    let _lock = SweepLedger::lock(&ledger_path)?;
    let mut ledger = SweepLedger::load(&ledger_path)?;
    if guarded && ledger.already_swept(date) {
        return report_already_swept(date);
    }
    if !guarded {
        ledger.clear_pending();
    }
    if !ledger.pending_boxes_for(date).is_empty() {
        tracing::info!(
            "Resuming sweep of {}: {} boxes already done",
            pillbox_core::ledger::iso_week_key(date),
            ledger.pending_boxes_for(date).len()
        );
    }

    let mut journal = JsonlJournal::new(config.data.journal_path());
    let mut progress = LedgerProgress::new(&ledger_path, ledger, date);
    let report = run_weekly_sweep(&mut store, &mut journal, &mut progress, date)?;

    let mut ledger = progress.into_ledger();
    ledger.record(date, Utc::now());
    ledger.save(&ledger_path)?;

    print_report(config, report, dry_run, json)
}

fn report_already_swept(date: NaiveDate) -> Result<()> {
    println!(
        "Week {} was already swept, nothing to do (use --force to sweep again).",
        pillbox_core::ledger::iso_week_key(date)
    );
    Ok(())
}

fn print_report(config: &Config, mut report: SweepReport, dry_run: bool, json: bool) -> Result<()> {
    if config.alerts.enabled {
        for alert in &report.alerts {
            tracing::warn!(
                "Low stock for {} ({}): {} left, threshold {}",
                alert.name,
                alert.box_id,
                alert.stock,
                alert.threshold
            );
        }
    } else {
        report.alerts.clear();
    }

    if json {
        println!("{}", serde_json::to_string_pretty(&report)?);
        return Ok(());
    }

    if dry_run {
        println!("[Dry run - nothing written]");
    }

    for entry in &report.boxes {
        match entry.outcome {
            DecrementOutcome::Decremented {
                previous,
                consumed,
                new,
            } => println!(
                "  {} ({}): {} -> {} (-{})",
                entry.name, entry.box_id, previous, new, consumed
            ),
            DecrementOutcome::Unchanged => {
                println!("  {} ({}): unchanged", entry.name, entry.box_id)
            }
            DecrementOutcome::Skipped { reason } => {
                tracing::debug!("Skipped box {}: {:?}", entry.box_id, reason)
            }
        }
    }

    println!("✓ {} boxes decremented", report.decremented_count());

    for alert in &report.alerts {
        println!(
            "⚠ Low stock: {} has {} left (threshold {})",
            alert.name, alert.stock, alert.threshold
        );
    }

    Ok(())
}

fn cmd_validate(config: &Config) -> Result<()> {
    let document = StoreDocument::load(&config.data.store_path())?;
    let errors = document.validate();

    if errors.is_empty() {
        let boxes: usize = document.calendars.iter().map(|c| c.boxes.len()).sum();
        println!(
            "✓ Store is valid: {} calendars, {} boxes",
            document.calendars.len(),
            boxes
        );
        return Ok(());
    }

    eprintln!("Store validation errors:");
    for error in &errors {
        eprintln!("  - {}", error);
    }
    Err(Error::Validation(format!("{} problems found", errors.len())))
}
