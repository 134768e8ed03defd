// Only compile UI module when TUI feature is enabled
#[cfg(feature = "tui")]
mod ui;

use anyhow::{bail, Context, Result};
use std::env;
use std::fs::File;
use std::path::Path;

// Use library instead of local modules
use skin_exchange::{export_transactions_csv, logging, Exchange, ExchangeConfig};

fn main() -> Result<()> {
    logging::init("skin-exchange");

    let args: Vec<String> = env::args().collect();
    let config = ExchangeConfig::from_env();

    match args.get(1).map(String::as_str) {
        Some("init") => run_init(config),
        Some("stats") => run_stats(config),
        Some("export") => {
            let path = args.get(2).context("usage: skin-exchange export <file.csv>")?;
            run_export(config, Path::new(path))
        }
        Some("grant-vip") => {
            let id = parse_id_arg(args.get(2), "usage: skin-exchange grant-vip <account_id> [days]")?;
            let days = match args.get(3) {
                Some(raw) => raw.parse::<i64>().context("days must be a whole number")?,
                None => config.vip_days,
            };
            run_grant_vip(config, id, days)
        }
        Some("make-admin") => {
            let id = parse_id_arg(args.get(2), "usage: skin-exchange make-admin <account_id>")?;
            run_make_admin(config, id)
        }
        Some("help") | Some("--help") | Some("-h") => {
            print_usage();
            Ok(())
        }
        // UI mode (default)
        None | Some("ui") => run_ui_mode(config),
        Some(other) => {
            print_usage();
            bail!("unknown command: {}", other)
        }
    }
}

fn print_usage() {
    println!("skin-exchange {}", skin_exchange::VERSION);
    println!();
    println!("USAGE:");
    println!("  skin-exchange [ui]                         admin dashboard (default)");
    println!("  skin-exchange init                         create the database schema");
    println!("  skin-exchange stats                        print admin statistics");
    println!("  skin-exchange export <file.csv>            write the transaction ledger");
    println!("  skin-exchange grant-vip <id> [days]        extend an account's VIP");
    println!("  skin-exchange make-admin <id>              set the admin flag");
    println!();
    println!("Database: $SKIN_EXCHANGE_DB (default skin_exchange.db)");
}

fn parse_id_arg(raw: Option<&String>, usage: &str) -> Result<i64> {
    let raw = raw.with_context(|| usage.to_string())?;
    raw.parse::<i64>()
        .with_context(|| format!("invalid account id: {}", raw))
}

fn open(config: ExchangeConfig) -> Result<Exchange> {
    let path = config.db_path.display().to_string();
    Exchange::open(config).with_context(|| format!("failed to open database {}", path))
}

fn run_init(config: ExchangeConfig) -> Result<()> {
    println!("🗄️  Skin Exchange - database setup");
    println!("━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━");

    let path = config.db_path.clone();
    println!("\n🔧 Setting up database...");
    let exchange = open(config)?;
    let stats = exchange.admin_stats()?;
    println!("✓ Database ready at {} (WAL mode)", path.display());
    println!("✓ {} accounts, {} listings active", stats.users, stats.active_listings);

    Ok(())
}

fn run_stats(config: ExchangeConfig) -> Result<()> {
    let exchange = open(config)?;
    let stats = exchange.admin_stats()?;

    println!("📊 Exchange statistics");
    println!("━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━");
    println!("👥 Users:            {}", stats.users);
    println!("💎 Active VIP:       {}", stats.vip_users);
    println!("📦 Active listings:  {}", stats.active_listings);
    println!("🤝 Transactions:     {}", stats.transactions);
    println!("💰 Coins in system:  {}", stats.total_coins);

    Ok(())
}

fn run_export(config: ExchangeConfig, path: &Path) -> Result<()> {
    let exchange = open(config)?;

    println!("📂 Exporting ledger...");
    let transactions = exchange.all_transactions()?;
    let file = File::create(path).with_context(|| format!("cannot create {}", path.display()))?;
    let written = export_transactions_csv(&transactions, file)?;
    println!("✓ Wrote {} transactions to {}", written, path.display());

    Ok(())
}

fn run_grant_vip(config: ExchangeConfig, id: i64, days: i64) -> Result<()> {
    let exchange = open(config)?;
    let account = exchange
        .grant_vip(id, days)
        .with_context(|| format!("cannot grant VIP to {}", id))?;

    let until = account
        .vip_until
        .map(|t| t.format("%Y-%m-%d").to_string())
        .unwrap_or_default();
    println!("💎 {} is VIP until {}", account.display_name, until);

    Ok(())
}

fn run_make_admin(config: ExchangeConfig, id: i64) -> Result<()> {
    let exchange = open(config)?;
    exchange
        .set_admin(id, true)
        .with_context(|| format!("cannot make {} an admin", id))?;
    println!("✅ Account {} is now an admin", id);

    Ok(())
}

#[cfg(feature = "tui")]
fn run_ui_mode(config: ExchangeConfig) -> Result<()> {
    println!("🖥️  Loading Skin Exchange admin dashboard...\n");

    if !config.db_path.exists() {
        eprintln!("❌ Database not found!");
        eprintln!("   Run: skin-exchange init");
        eprintln!("   or start the server once to create it.");
        std::process::exit(1);
    }

    let exchange = open(config)?;

    println!("📊 Loading listings and ledger...");
    let listings = exchange.all_listings()?;
    let transactions = exchange.all_transactions()?;
    let stats = exchange.admin_stats()?;

    println!("✓ Loaded {} listings, {} transactions\n", listings.len(), transactions.len());
    println!("Starting UI... (Press 'q' to quit)\n");

    // Create and run app
    let mut app = ui::App::new(listings, transactions, stats);
    ui::run_ui(&mut app)?;

    println!("\n✅ UI closed successfully");

    Ok(())
}

#[cfg(not(feature = "tui"))]
fn run_ui_mode(_config: ExchangeConfig) -> Result<()> {
    eprintln!("❌ TUI mode not available!");
    eprintln!("   Rebuild with: cargo build --features tui");
    eprintln!("   Or use the HTTP API: cargo run --bin skin-server --features server");
    std::process::exit(1);
}
