//! Command line and logging setup for the `mondo-hello` binary.

use std::path::PathBuf;

use clap::{Parser, Subcommand};

use crate::messages::SessionId;

/// `mondo-hello` command line arguments.
#[derive(Parser, Debug)]
#[command(name = "mondo-hello", version)]
#[command(about = "Session relay over the mondo RPC engine")]
pub struct Args {
	/// Configuration file
	#[arg(short, long, value_name = "PATH", global = true)]
	pub config: Option<PathBuf>,

	/// Verbose logging
	#[arg(short, long, global = true)]
	pub verbose: bool,

	/// What to run
	#[command(subcommand)]
	pub command: Command,
}

/// Subcommands.
#[derive(Subcommand, Debug)]
pub enum Command {
	/// Serve `StartSession` and `PollInOut` until interrupted
	Serve {
		/// Port to listen on (0 picks a free port)
		#[arg(short, long)]
		port: Option<u16>,
		/// Greeting used in `StartSession` replies
		#[arg(short = 'G', long)]
		greeting: Option<String>,
		/// Number of greetings per reply
		#[arg(short = 'N', long)]
		greetings: Option<u32>,
	},
	/// Open a session and print its id
	Login {
		/// Server URI, e.g. `ipv4:127.0.0.1:50051`
		#[arg(short, long)]
		uri: Option<String>,
		/// User name
		#[arg(long)]
		user: String,
		/// Shared secret
		#[arg(long)]
		token: Option<String>,
	},
	/// Publish text blobs and print what other sessions sent
	Poll {
		/// Server URI
		#[arg(short, long)]
		uri: Option<String>,
		/// Session id printed by `login`
		#[arg(short, long, value_parser = parse_session_id)]
		session: SessionId,
		/// Text to publish; repeatable
		#[arg(long = "send", value_name = "TEXT")]
		send: Vec<String>,
	},
}

/// Parses a session id in the hexadecimal form it is printed in.
pub fn parse_session_id(text: &str) -> Result<SessionId, String> {
	u64::from_str_radix(text.trim().trim_start_matches("0x"), 16)
		.map(SessionId)
		.map_err(|e| format!("invalid session id `{text}`: {e}"))
}

/// Installs the stderr subscriber.
///
/// `RUST_LOG` wins over `filter`, which wins over the verbosity default.
pub fn setup_tracing(verbose: bool, filter: Option<&str>) {
	use tracing_subscriber::EnvFilter;

	let filter = EnvFilter::try_from_default_env()
		.ok()
		.or_else(|| filter.and_then(|f| EnvFilter::try_new(f).ok()))
		.unwrap_or_else(|| {
			if verbose {
				EnvFilter::new("mondo_hello=trace,mondo_rpc=debug,mondo_transport=debug,info")
			} else {
				EnvFilter::new("mondo_hello=info,warn")
			}
		});

	let _ = tracing_subscriber::fmt()
		.with_env_filter(filter)
		.with_writer(std::io::stderr)
		.with_target(verbose)
		.try_init();
}

#[cfg(test)]
mod tests {
	use clap::CommandFactory;

	use super::*;

	#[test]
	fn command_line_is_well_formed() {
		Args::command().debug_assert();
	}

	#[test]
	fn session_ids_parse_as_printed() {
		let id = SessionId(0xdead_beef);
		assert_eq!(parse_session_id(&id.to_string()), Ok(id));
		assert_eq!(parse_session_id("0x10"), Ok(SessionId(16)));
		assert!(parse_session_id("zz").is_err());
	}

	#[test]
	fn poll_collects_repeated_sends() {
		let args = Args::parse_from(["mondo-hello", "-v", "poll", "-s", "ff", "--send", "a", "--send", "b"]);
		assert!(args.verbose);
		match args.command {
			Command::Poll { session, send, uri } => {
				assert_eq!(session, SessionId(255));
				assert_eq!(send, vec!["a", "b"]);
				assert_eq!(uri, None);
			}
			other => panic!("unexpected command {other:?}"),
		}
	}
}
