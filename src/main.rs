use clap::{Arg, ArgAction, ArgMatches, Command};
use std::error::Error;
use std::path::PathBuf;
use std::time::{Duration, UNIX_EPOCH};
use tokio_util::sync::CancellationToken;

use contentsync::config::Config;
use contentsync::logging;
use contentsync::progress::CliProgress;
use contentsync::state::{FileVersionStore, VersionStore};
use contentsync::sync::SyncBuilder;
use contentsync::utils::setup_signal_handlers;

///////////////////////
// Utility functions //
///////////////////////

fn init_state_dir(config: &Config) -> Result<(), Box<dyn Error>> {
	match std::fs::metadata(&config.state_dir) {
		Ok(meta) if meta.is_dir() => Ok(()),
		Ok(_) => {
			Err(format!("{} exists, but it is not a directory!", config.state_dir.display()).into())
		}
		Err(_) => {
			std::fs::create_dir_all(&config.state_dir)
				.map_err(|err| format!("Cannot create directory: {}", err))?;
			Ok(())
		}
	}
}

/// Defaults, then config file, then environment, then CLI flags
fn resolve_config(matches: &ArgMatches) -> Result<Config, Box<dyn Error>> {
	let file = match matches.get_one::<String>("config") {
		Some(path) => Some(PathBuf::from(path)),
		None => {
			let mut probe = Config::default();
			probe.apply_env()?;
			Config::find_default_file(&probe.state_dir)
		}
	};

	let mut config = match &file {
		Some(path) => Config::load(path)?,
		None => Config::default(),
	};
	config.apply_env()?;

	if let Some(profile) = matches.get_one::<String>("profile") {
		config.profile = profile.clone();
	}
	if let Some(sub) = matches.subcommand_matches("sync") {
		if let Some(source) = sub.get_one::<String>("source") {
			config.source = Some(source.clone());
		}
		if let Some(dir) = sub.get_one::<String>("dir") {
			config.content_dir = Some(PathBuf::from(dir));
		}
		if sub.get_flag("no-progress") {
			config.show_progress = false;
		}
		if let Some(secs) = sub.get_one::<u64>("timeout") {
			config.sync_timeout_secs = Some(*secs);
		}
	}
	if matches.get_flag("verbose") {
		config.log_level = "debug".to_string();
	}
	Ok(config)
}

async fn run_sync(config: Config) -> Result<(), Box<dyn Error>> {
	config.validate()?;
	init_state_dir(&config)?;

	let token = CancellationToken::new();
	setup_signal_handlers(token.clone());

	let mut builder = SyncBuilder::from_config(&config).shutdown_token(token);
	if config.show_progress {
		builder = builder.notifier(Box::new(CliProgress::new()));
	}
	let controller = builder.build()?;

	match controller.sync().await {
		Ok(outcome) => {
			println!("{}: {}", config.profile, outcome);
			Ok(())
		}
		Err(e) => {
			eprintln!("Error: {}", e);
			std::process::exit(e.code() as i32);
		}
	}
}

async fn run_status(config: Config) -> Result<(), Box<dyn Error>> {
	let record = FileVersionStore::new(config.state_file()).load().await?;
	println!("profile:      {}", config.profile);
	println!("source:       {}", config.source.as_deref().unwrap_or("-"));
	match &config.content_dir {
		Some(dir) => println!("content dir:  {}", dir.display()),
		None => println!("content dir:  -"),
	}
	println!("version tag:  {}", record.version_tag.as_deref().unwrap_or("-"));
	match record.last_sync {
		Some(secs) => println!("last sync:    {:?}", UNIX_EPOCH + Duration::from_secs(secs)),
		None => println!("last sync:    never"),
	}

	let staging = match config.staging_area() {
		Some(staging) => staging,
		None => {
			println!("interrupted:  unknown (no content dir configured)");
			return Ok(());
		}
	};
	println!("staging dir:  {}", staging.dir().display());
	match staging.read_marker().await {
		Ok(Some(marker)) => println!(
			"interrupted:  attempt {} for version {}",
			marker.attempt_id,
			marker.version_tag.as_deref().unwrap_or("-")
		),
		Ok(None) => println!("interrupted:  no"),
		Err(e) => println!("interrupted:  unreadable marker ({})", e),
	}
	Ok(())
}

async fn run_reset(config: Config) -> Result<(), Box<dyn Error>> {
	let staging = config
		.staging_area()
		.ok_or("reset needs a content dir (or staging dir) to locate staged files")?;
	FileVersionStore::new(config.state_file()).clear().await?;
	staging.discard().await?;
	println!("{}: sync state reset", config.profile);
	Ok(())
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn Error>> {
	let matches = Command::new("contentsync")
		.version(env!("CARGO_PKG_VERSION"))
		.author("Szilard Hajba <szilard@symbion.hu>")
		.about("Crash-safe content directory synchronizer")
		.subcommand_required(true)
		.arg(
			Arg::new("config")
				.short('c')
				.long("config")
				.value_name("FILE")
				.help("Config file (.toml or JSON5)"),
		)
		.arg(
			Arg::new("profile")
				.short('p')
				.long("profile")
				.value_name("PROFILE")
				.help("Profile"),
		)
		.arg(
			Arg::new("verbose")
				.short('v')
				.long("verbose")
				.action(ArgAction::SetTrue)
				.help("Debug logging"),
		)
		.subcommand(
			Command::new("sync")
				.about("Sync the content directory with its source")
				.arg(Arg::new("source").help("Base URL or mirror directory"))
				.arg(Arg::new("dir").help("Live content directory"))
				.arg(
					Arg::new("timeout")
						.long("timeout")
						.value_name("SECS")
						.value_parser(clap::value_parser!(u64))
						.help("Cancel the attempt after SECS seconds"),
				)
				.arg(
					Arg::new("no-progress")
						.long("no-progress")
						.action(ArgAction::SetTrue)
						.help("Do not draw a progress bar"),
				),
		)
		.subcommand(Command::new("status").about("Show stored version and interruption state"))
		.subcommand(Command::new("reset").about("Forget the stored version and staged files"))
		.get_matches();

	let config = resolve_config(&matches)?;
	logging::init_tracing(&config.log_level);

	match matches.subcommand() {
		Some(("sync", _)) => run_sync(config).await,
		Some(("status", _)) => run_status(config).await,
		Some(("reset", _)) => run_reset(config).await,
		_ => Ok(()),
	}
}

// vim: ts=4
