// Keyguard — CLI Command Handlers
//
// Builds the orchestrator over the platform keyring, the software cipher
// engine and the console confirmation gate, then dispatches one command.

use std::time::Duration;

use crate::config::KeyguardConfig;
use crate::enclave::{
    ConsoleGate, KeyGenConfig, KeyedOperationOrchestrator, KeyringProvider, SoftwareCipherEngine,
};
use crate::error::KeyguardError;

use super::{Cli, Commands, GenerateArgs};

type CliOrchestrator =
    KeyedOperationOrchestrator<KeyringProvider, SoftwareCipherEngine, ConsoleGate>;

/// Execute the parsed CLI command.
pub async fn execute(cli: Cli) -> Result<(), KeyguardError> {
    let config = KeyguardConfig::from_env()?.with_overrides(
        cli.service,
        cli.enrollment,
        cli.gate_timeout,
    );
    tracing::debug!(
        service = %config.service,
        invalidation_metadata = config.capabilities().supports_invalidation_metadata,
        "Configuration resolved"
    );
    let orch = build_orchestrator(&config);

    match cli.command {
        Commands::Generate(args) => {
            orch.generate_key(&key_config(&args))?;
            println!("✓ Encryption key '{}' generated", args.alias);
        }
        Commands::GeneratePair(args) => {
            let pem = orch.generate_key_pair(&key_config(&args))?;
            print!("{}", pem);
        }
        Commands::GenerateHmac(args) => {
            orch.generate_hmac_key(&key_config(&args))?;
            println!("✓ HMAC key '{}' generated", args.alias);
        }
        Commands::Encrypt { alias, plaintext } => {
            println!("{}", orch.encrypt(&alias, &plaintext).await?);
        }
        Commands::Decrypt { alias, payload } => {
            println!("{}", orch.decrypt(&alias, payload.trim()).await?);
        }
        Commands::Sign { alias, data } => {
            println!("{}", orch.sign(&alias, data.as_bytes()).await?);
        }
        Commands::Verify {
            alias,
            data,
            signature,
        } => {
            if orch.verify(&alias, data.as_bytes(), &signature)? {
                println!("✓ Signature valid");
            } else {
                return Err(KeyguardError::Other("Signature invalid".to_string()));
            }
        }
        Commands::Hmac { alias, data } => {
            println!("{}", orch.hmac(&alias, data.as_bytes())?);
        }
        Commands::PublicKey { alias } => {
            print!("{}", orch.public_key_pem(&alias)?);
        }
        Commands::Remove { alias } => {
            orch.remove_key(&alias)?;
            println!("✓ Key '{}' removed", alias);
        }
        Commands::RemoveAll => {
            orch.remove_all_keys()?;
            println!("✓ All keys removed from '{}'", config.service);
        }
        Commands::Exists { alias } => {
            println!("{}", orch.has_alias(&alias)?);
        }
        Commands::List => cmd_list(&orch)?,
    }

    Ok(())
}

fn cmd_list(orch: &CliOrchestrator) -> Result<(), KeyguardError> {
    let keys = orch.list_keys()?;

    if keys.is_empty() {
        println!("No keys stored yet.");
        println!("Generate one with: keyguard generate --alias <name>");
        return Ok(());
    }

    println!("Stored keys ({}):\n", keys.len());
    for key in &keys {
        println!(
            "  {:24} │ {:12} │ {:9} │ {}",
            key.alias,
            key.kind.to_string(),
            if key.auth_required { "gated" } else { "open" },
            key.created_at.format("%Y-%m-%d %H:%M:%S UTC"),
        );
    }
    Ok(())
}

// ─── Helpers ─────────────────────────────────────────────────────────────────

fn build_orchestrator(config: &KeyguardConfig) -> CliOrchestrator {
    let provider = KeyringProvider::with_service(&config.service)
        .with_enrollment(config.enrollment_id.clone());
    KeyedOperationOrchestrator::new(
        provider,
        SoftwareCipherEngine::new(),
        ConsoleGate::new(),
        config.capabilities(),
    )
    .with_gate_timeout(config.gate_timeout)
}

fn key_config(args: &GenerateArgs) -> KeyGenConfig {
    let mut config = KeyGenConfig::new(args.alias.clone())
        .invalidate_on_enrollment_change(args.invalidate_on_enrollment_change);
    if args.auth_required {
        let timeout = (args.auth_timeout > 0).then(|| Duration::from_secs(args.auth_timeout));
        config = config.require_auth(timeout);
    }
    config
}
