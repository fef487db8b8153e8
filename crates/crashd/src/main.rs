use std::io::{self, Write};
use std::path::PathBuf;
use std::process;
use std::sync::atomic::Ordering;
use std::time::Duration;

use clap::{Args, Parser, Subcommand};
use crashd_core::config::ready_timeout_from_secs;
use crashd_core::watcher::{watch_directory, WatchBackend};
use crashd_core::{CrashDaemon, DaemonConfig};
use crashd_utils::{error, info, init_logging, LogFormat, LogLevel, LogSettings};

/// Watches a directory for core dumps and prints a backtrace for every thread.
#[derive(Parser, Debug)]
#[command(name = "crashd")]
#[command(version)]
#[command(about = "Watches a directory for core dumps and prints symbolicated backtraces", long_about = None)]
struct Cli
{
    /// Log level (error, warn, info, debug, trace); defaults to RUST_LOG or info
    #[arg(long, global = true)]
    log_level: Option<LogLevel>,
    /// Log format (pretty or json); defaults to CRASHD_LOG_FORMAT or pretty
    #[arg(long, global = true)]
    log_format: Option<LogFormat>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands
{
    /// Run the daemon: watch a directory and analyse every new dump
    Watch(WatchArgs),
    /// Analyse existing core dumps once and exit
    Analyze
    {
        /// Core dump files to analyse
        #[arg(required = true)]
        cores: Vec<PathBuf>,
        #[command(flatten)]
        symbols: SymbolArgs,
    },
}

#[derive(Args, Debug)]
struct WatchArgs
{
    /// Directory to watch [env: CRASHD_WATCH_DIR, default: /tmp/coredump]
    #[arg(long)]
    dir: Option<PathBuf>,
    /// Readiness poll interval in milliseconds
    #[arg(long)]
    poll_interval_ms: Option<u64>,
    /// Give up on a dump that is not readable after this many seconds (0 waits forever)
    #[arg(long)]
    ready_timeout_secs: Option<u64>,
    /// Rescan the directory instead of using inotify
    #[arg(long, default_value_t = false)]
    polling: bool,
    /// Reload objects whose file changed between dumps
    #[arg(long, default_value_t = false)]
    evict_stale: bool,
    #[command(flatten)]
    symbols: SymbolArgs,
}

#[derive(Args, Debug)]
struct SymbolArgs
{
    /// Directory holding shared libraries [env: CRASHD_LIBRARY_DIR, default: /usr/lib]
    #[arg(long)]
    library_dir: Option<PathBuf>,
    /// Region-name marker of the dynamic loader, whose frames are hidden
    #[arg(long)]
    loader_marker: Option<String>,
    /// Maximum frames walked per thread
    #[arg(long)]
    max_frames: Option<usize>,
}

impl SymbolArgs
{
    fn apply(self, config: &mut DaemonConfig)
    {
        if let Some(dir) = self.library_dir {
            config.library_dir = dir;
        }
        if let Some(marker) = self.loader_marker {
            config.loader_marker = marker;
        }
        if let Some(max_frames) = self.max_frames {
            config.max_frames = max_frames;
        }
    }
}

impl WatchArgs
{
    fn apply(self, config: &mut DaemonConfig)
    {
        if let Some(dir) = self.dir {
            config.watch_dir = dir;
        }
        if let Some(ms) = self.poll_interval_ms {
            config.poll_interval = Duration::from_millis(ms);
        }
        if let Some(secs) = self.ready_timeout_secs {
            config.ready_timeout = ready_timeout_from_secs(secs);
        }
        if self.polling {
            config.backend = WatchBackend::Polling;
        }
        config.evict_stale |= self.evict_stale;
        self.symbols.apply(config);
    }
}

fn main()
{
    let cli = Cli::parse();

    let mut settings = match LogSettings::from_env() {
        Ok(settings) => settings,
        Err(e) => {
            eprintln!("Failed to initialize logging: {e}");
            process::exit(1);
        }
    };
    settings.level = cli.log_level;
    if let Some(format) = cli.log_format {
        settings.format = format;
    }
    let _guard = match init_logging(&settings) {
        Ok(guard) => guard,
        Err(e) => {
            eprintln!("Failed to initialize logging: {e}");
            process::exit(1);
        }
    };

    if let Err(e) = run_command(cli.command) {
        error!(error = %e, "crashd stopped");
        eprintln!("Error: {e}");
        process::exit(1);
    }
}

fn run_command(command: Commands) -> Result<(), Box<dyn std::error::Error>>
{
    let mut config = DaemonConfig::from_env()?;

    match command {
        Commands::Watch(args) => {
            args.apply(&mut config);
            let mut daemon = CrashDaemon::new(config)?;
            daemon.prepare_watch_dir()?;

            let shutdown = daemon.shutdown_handle();
            ctrlc::set_handler(move || shutdown.store(true, Ordering::SeqCst))?;

            let config = daemon.config();
            let mut source = watch_directory(&config.watch_dir, config.backend, config.poll_interval)?;
            daemon.run(&mut source, &mut io::stdout().lock())?;
            Ok(())
        }
        Commands::Analyze { cores, symbols } => {
            symbols.apply(&mut config);
            let mut daemon = CrashDaemon::new(config)?;
            let mut stdout = io::stdout().lock();
            let mut failures = 0;

            for path in &cores {
                match daemon.process_dump(path) {
                    Ok(report) => {
                        writeln!(stdout, "==> {}", path.display())?;
                        write!(stdout, "{report}")?;
                    }
                    Err(e) => {
                        error!(path = %path.display(), error = %e, "failed to analyse coredump");
                        failures += 1;
                    }
                }
            }

            info!(analysed = cores.len() - failures, failures, "analysis finished");
            if failures > 0 {
                return Err(format!("{failures} of {} core dumps could not be analysed", cores.len()).into());
            }
            Ok(())
        }
    }
}
