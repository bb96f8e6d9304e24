use leasewarden::{cli, VaultError};

#[tokio::main]
async fn main() {
    // Load .env file if it exists; a missing file is fine
    if let Err(e) = dotenvy::dotenv() {
        if !e.not_found() {
            eprintln!("Warning: Error loading .env file: {}", e);
        }
    }

    if let Err(e) = cli::run_cli().await {
        let fatal = e.downcast_ref::<VaultError>().map(VaultError::is_fatal).unwrap_or(false);
        if fatal {
            tracing::error!(error = %e, "lost the Vault session, exiting");
        }
        eprintln!("Error: {:#}", e);
        std::process::exit(1);
    }
}
