use anyhow::{anyhow, Context, Result};
use clap::{Parser, Subcommand};
use client_core::{
    config::{load_settings, Settings},
    lifecycle::legal_actions,
    task_controller::{PLATFORM_STRUCT, TASK_STRUCT},
    wallet::MissingWallet,
    MarketClient,
};
use ledger::decode::{decode_idea, decode_platform, decode_task};
use shared::domain::{Address, ObjectId};
use std::sync::Arc;
use tx_builder::{
    market::{self, PurchaseIdea},
    seal_policy, task, ContractConfig, TransactionDescription,
};

#[derive(Parser, Debug)]
#[command(name = "market", about = "Inspect ideas and tasks on the marketplace contracts")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Print the effective settings after file and environment overrides.
    Settings,
    /// Show a task and the actions `caller` may take on it.
    Task {
        task_id: String,
        #[arg(long)]
        caller: Option<String>,
    },
    /// List every task registered on the platform.
    Board,
    /// Show an idea object.
    Idea { idea_id: String },
    /// Print an unsigned transaction as JSON.
    Build {
        #[command(subcommand)]
        tx: BuildCommand,
    },
}

#[derive(Subcommand, Debug)]
enum BuildCommand {
    Purchase {
        idea_id: String,
        kiosk_id: String,
        price: u64,
    },
    SealApprove {
        sender: String,
        /// Seal id as hex.
        seal_id: String,
        approval_id: String,
    },
    Start { task_id: String },
    Complete {
        task_id: String,
        freelancer_profile_id: String,
    },
    Cancel { task_id: String },
    Dispute { task_id: String, reason: String },
}

fn parse_hex(raw: &str) -> Result<Vec<u8>> {
    let hex = raw.trim_start_matches("0x");
    if let Some(bad) = hex.chars().find(|c| !c.is_ascii_hexdigit()) {
        return Err(anyhow!("invalid hex digit {bad:?}"));
    }
    if hex.len() % 2 != 0 {
        return Err(anyhow!("hex string has an odd number of digits"));
    }
    (0..hex.len())
        .step_by(2)
        .map(|i| {
            u8::from_str_radix(&hex[i..i + 2], 16).with_context(|| format!("invalid hex at {i}"))
        })
        .collect()
}

fn build(contracts: &ContractConfig, command: BuildCommand) -> Result<TransactionDescription> {
    let tx = match command {
        BuildCommand::Purchase {
            idea_id,
            kiosk_id,
            price,
        } => market::purchase(
            contracts,
            &PurchaseIdea {
                price,
                idea_id,
                kiosk_id,
            },
        )?,
        BuildCommand::SealApprove {
            sender,
            seal_id,
            approval_id,
        } => seal_policy::seal_approve(contracts, &sender, &parse_hex(&seal_id)?, &approval_id)?,
        BuildCommand::Start { task_id } => task::start_task(contracts, &task_id)?,
        BuildCommand::Complete {
            task_id,
            freelancer_profile_id,
        } => task::complete_task(contracts, &task_id, &freelancer_profile_id)?,
        BuildCommand::Cancel { task_id } => task::cancel_task(contracts, &task_id)?,
        BuildCommand::Dispute { task_id, reason } => {
            task::raise_dispute(contracts, &task_id, &reason)?
        }
    };
    Ok(tx)
}

fn print_json(value: &impl serde::Serialize) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

async fn run(settings: Settings, command: Command) -> Result<()> {
    if let Command::Settings = command {
        println!("{settings:#?}");
        return Ok(());
    }
    let client = MarketClient::from_settings(&settings, Arc::new(MissingWallet))?;
    let contracts = client.contracts().clone();
    let chain = client.chain();

    match command {
        Command::Settings => {}
        Command::Task { task_id, caller } => {
            let raw = chain.get_object(&ObjectId::parse(&task_id)?).await?;
            let task = decode_task(&raw, &contracts.task_struct_type(TASK_STRUCT))?;
            print_json(&task)?;
            if let Some(caller) = caller {
                let caller = Address::parse(&caller)?;
                let actions: Vec<&str> = legal_actions(&task, &caller)
                    .into_iter()
                    .map(|action| action.label())
                    .collect();
                println!("legal actions for {caller}: {}", actions.join(", "));
            }
        }
        Command::Board => {
            let raw = chain.get_object(&contracts.platform_id).await?;
            let platform = decode_platform(&raw, &contracts.task_struct_type(PLATFORM_STRUCT))?;
            println!(
                "platform {}: {} tasks, {} completed",
                platform.id, platform.total_tasks, platform.total_completed
            );
            for task in client.tasks().load_board().await? {
                println!(
                    "{} [{}] {} escrow={}",
                    task.id, task.status, task.title, task.escrow_balance
                );
            }
        }
        Command::Idea { idea_id } => {
            let raw = chain.get_object(&ObjectId::parse(&idea_id)?).await?;
            print_json(&decode_idea(&raw, &contracts.idea_type())?)?;
        }
        Command::Build { tx } => print_json(&build(&contracts, tx)?)?,
    }
    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt().with_env_filter("info").init();

    let cli = Cli::parse();
    let settings = load_settings();
    run(settings, cli.command).await
}

#[cfg(test)]
#[path = "tests/main_tests.rs"]
mod tests;
