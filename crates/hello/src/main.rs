//! `mondo-hello` binary: run the relay server or talk to one.

use std::sync::Arc;

use clap::Parser;
use mondo_hello::cli::{Args, Command, setup_tracing};
use mondo_hello::{Blob, HelloClient, HelloConfig, HelloService, Input, Relay};
use tracing::info;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
	let args = Args::parse();

	let mut config = match &args.config {
		Some(path) => HelloConfig::load(path)?,
		None => HelloConfig::default(),
	};
	setup_tracing(args.verbose, config.log.filter.as_deref());

	match args.command {
		Command::Serve {
			port,
			greeting,
			greetings,
		} => {
			if let Some(port) = port {
				config.server.port = port;
			}
			if let Some(greeting) = greeting {
				config.server.greeting = greeting;
			}
			if let Some(greetings) = greetings {
				config.server.greetings = greetings;
			}

			let relay = Arc::new(Relay::new(&config.server));
			let server = HelloService::new(relay).bind(&config.server)?;
			println!("listening on port {}", server.port());
			let handle = server.spawn();

			tokio::signal::ctrl_c().await?;
			info!(port = handle.port(), "hello.serve.interrupted");
			handle.stop().await;
			handle.listener().wait().await;
		}
		Command::Login { uri, user, token } => {
			let uri = uri.unwrap_or(config.client.uri);
			let client = HelloClient::connect(&uri)?;
			let result = client.start_session(&user, token).await;
			client.stop().await;

			let input = result?;
			println!("{}", input.session_id);
			for blob in &input.blobs {
				println!("{}: {}", blob.kind, blob.as_text().unwrap_or("<binary>"));
			}
		}
		Command::Poll { uri, session, send } => {
			let uri = uri.unwrap_or(config.client.uri);
			let client = HelloClient::connect(&uri)?;
			let input = Input {
				session_id: session,
				blobs: send.iter().map(|text| Blob::text("text", text)).collect(),
			};
			let result = client.poll_in_out(&input).await;
			client.stop().await;

			let output = result?;
			if let Some(error) = output.error {
				return Err(error.into());
			}
			for blob in &output.blobs {
				println!("{}: {}", blob.kind, blob.as_text().unwrap_or("<binary>"));
			}
		}
	}

	Ok(())
}
