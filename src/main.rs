use anyhow::{Context, Result};
use sentry_gateway::{log, shutdown, Gateway, Settings};

/// exit the complete program if one thread panics
fn setup_panic_handler() {
	let default_panic = std::panic::take_hook();
	std::panic::set_hook(Box::new(move |info| {
		default_panic(info);
		std::process::exit(1);
	}));
}

/// the entry point of the program
#[tokio::main]
pub async fn main() -> Result<()> {
	setup_panic_handler();

	// tracing isn't setup yet, errors are printed by returning them
	let settings = Settings::load().context("failed to load config and command line arguments")?;

	log::setup_logging(&settings.log).context("could not setup logging")?;

	let gateway = Gateway::new(&settings)?;

	tracing::info!("forwarding alerts received on {}", gateway.local_addr()?);

	gateway.run(shutdown::termination_signal()).await?;

	tracing::info!("shut down gracefully");

	Ok(())
}
