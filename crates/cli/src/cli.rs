use std::path::PathBuf;

use clap::{Parser, Subcommand};

#[derive(Parser, Debug)]
#[command(name = "scout-agent")]
#[command(about = "Run allow-listed recon tools locally and stream their output over WebSocket")]
#[command(version)]
pub struct Cli {
	/// Increase verbosity (-v info, -vv debug, -vvv trace)
	#[arg(short, long, global = true, action = clap::ArgAction::Count)]
	pub verbose: u8,

	/// Load agent configuration from a JSON file
	#[arg(short, long, global = true, value_name = "FILE")]
	pub config: Option<PathBuf>,

	#[command(subcommand)]
	pub command: Commands,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
	/// Start the WebSocket agent
	Serve {
		/// Interface to bind (overrides config)
		#[arg(long)]
		host: Option<String>,
		/// Port to bind (overrides config)
		#[arg(short, long)]
		port: Option<u16>,
	},

	/// List allow-listed tools and whether they are installed
	Tools,

	/// Check whether a scan target would be accepted
	#[command(alias = "check")]
	CheckTarget { target: String },
}
