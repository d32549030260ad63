use tcane_marketplace::infra::config::{AppConfig, LedgerConfig, StorageConfig};
use tcane_marketplace::infra::ledger::SolanaLedger;
use tcane_marketplace::storage::PgMarketStore;

fn usage_and_exit() -> ! {
    eprintln!(
        "Usage: cargo run --bin preflight -- [--init-state-if-missing]\n\
         \n\
         Reads the same environment as api_server:\n\
           JWT_SECRET, DATABASE_URL, LEDGER_BACKEND=solana,\n\
           SOLANA_RPC_URL, SOLANA_PROGRAM_ID, SOLANA_KEYPAIR_PATH\n"
    );
    std::process::exit(2);
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args: Vec<String> = std::env::args().skip(1).collect();
    if args.iter().any(|a| a == "-h" || a == "--help") {
        usage_and_exit();
    }
    let init_if_missing = args.iter().any(|a| a == "--init-state-if-missing");

    let config = AppConfig::from_env()?;
    println!("> Preflight:");

    // Database connectivity + schema
    match &config.storage {
        StorageConfig::Postgres { url, max_connections } => {
            let store = PgMarketStore::connect(url, *max_connections).await?;
            store.migrate().await?;
            println!("  Postgres reachable, schema up to date.");
        }
        StorageConfig::Memory => {
            println!("  DATABASE_URL not set: the server would run on the in-memory store.");
        }
    }

    let solana = match &config.ledger {
        LedgerConfig::Solana(solana) => solana,
        LedgerConfig::Memory => {
            println!("  LEDGER_BACKEND=memory: nothing to check on-chain.");
            println!("> Preflight OK.");
            return Ok(());
        }
    };
    println!("  SOLANA_RPC_URL={}", solana.rpc_url);
    println!("  SOLANA_PROGRAM_ID={}", solana.program_id);

    let ledger = SolanaLedger::from_config(solana)?;
    let client = ledger.rpc_client();

    // Basic RPC connectivity
    let version = client.get_version().await?;
    println!("  RPC version: {}", version.solana_core);

    // Payer balance
    let payer = ledger.payer();
    let balance_lamports = client.get_balance(&payer).await?;
    let sol = balance_lamports as f64 / 1_000_000_000_f64;
    println!("  Authority: {}", payer);
    println!("  Authority balance: {} lamports (~{:.6} SOL)", balance_lamports, sol);
    if balance_lamports < 10_000_000 {
        eprintln!("  Warning: authority balance looks low; transactions may fail.");
    }

    // Program account existence
    let program_id = ledger.program_id();
    let program_acct = client
        .get_account(&program_id)
        .await
        .map_err(|e| anyhow::anyhow!("Program account not found on cluster: {} ({})", program_id, e))?;
    if !program_acct.executable {
        eprintln!("  Warning: program account exists but is not marked executable.");
    } else {
        println!("  Program account is deployed + executable.");
    }

    // State PDA
    println!("  State PDA: {}", ledger.state_address());
    let state = match ledger.read_state().await? {
        Some(state) => state,
        None if init_if_missing => {
            println!("  State missing -> initializing...");
            ledger.initialize().await?;
            ledger
                .read_state()
                .await?
                .ok_or_else(|| anyhow::anyhow!("State account still missing after initialize"))?
        }
        None => {
            return Err(anyhow::anyhow!(
                "Program state does not exist. Re-run with --init-state-if-missing"
            ))
        }
    };
    if state.authority != payer {
        return Err(anyhow::anyhow!(
            "State authority {} does not match the configured keypair {}",
            state.authority,
            payer
        ));
    }
    println!(
        "  Supply: {} base units minted, {} burned.",
        state.total_supply, state.total_burned
    );

    println!("> Preflight OK.");
    Ok(())
}
