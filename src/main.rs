// serbridge - Serial-to-TCP bridge and TCP relay
use clap::Parser;
use serbridge::cli::{execute_command, Args};
use serbridge::BridgeError;

#[tokio::main]
async fn main() -> Result<(), BridgeError> {
    let args = Args::parse();

    match execute_command(args).await {
        Ok(()) => Ok(()),
        Err(e) => {
            eprintln!("Error: {}", e);
            std::process::exit(1);
        }
    }
}
