//! Shell-exec binary entry point.

use std::process::ExitCode;

use futures_util::FutureExt;
use shell_exec::cli::{self, Args};
use shell_exec::config::Settings;
use shell_exec::{execution, logging, CommandConfig, CommandHandle, ShellError};
use tracing::{debug, error};

/// Exit code for a command that ran out of time, as `timeout(1)` uses.
const EXIT_TIMEOUT: u8 = 124;

fn main() -> ExitCode {
    let args = match cli::parse_args() {
        Ok(args) => args,
        Err(e) => {
            eprintln!("error: {e}");
            eprintln!("Run 'shell-exec --help' for usage.");
            return ExitCode::FAILURE;
        }
    };

    if args.help {
        cli::print_help();
        return ExitCode::SUCCESS;
    }
    if args.version {
        cli::print_version();
        return ExitCode::SUCCESS;
    }

    let settings = match Settings::load(&args) {
        Ok(settings) => settings,
        Err(e) => {
            eprintln!("error: {e}");
            return ExitCode::FAILURE;
        }
    };
    // A subscriber may already be installed when embedded
    let _ = logging::try_init_with(Some(settings.log_filter()));

    let Some(ref command_line) = args.command else {
        eprintln!("error: missing command");
        eprintln!("Run 'shell-exec --help' for usage.");
        return ExitCode::FAILURE;
    };
    let config = settings.to_command_config(command_line.as_str());
    debug!(?config, use_async = args.use_async, lines = args.lines, "running command");

    let result = if args.use_async {
        run_suspended(config, &args)
    } else {
        run_blocking(config, &args)
    };

    match result {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            error!(error = %e, "command failed");
            eprintln!("shell-exec: {e}");
            if e.is_timeout() {
                ExitCode::from(EXIT_TIMEOUT)
            } else {
                ExitCode::FAILURE
            }
        }
    }
}

fn print_output(output: Option<String>) {
    if let Some(output) = output {
        println!("{output}");
    }
}

fn run_blocking(config: CommandConfig, args: &Args) -> Result<(), ShellError> {
    if !args.lines {
        print_output(execution::run(config)?);
        return Ok(());
    }
    CommandHandle::new(config).scoped(|command| {
        for line in command.lines() {
            println!("{}", line?);
        }
        Ok(())
    })
}

fn run_suspended(config: CommandConfig, args: &Args) -> Result<(), ShellError> {
    let runtime = tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()?;
    let scheduler = runtime.handle().clone();
    let lines = args.lines;

    runtime.block_on(async move {
        if !lines {
            print_output(execution::run_async(config, &scheduler).await?);
            return Ok(());
        }
        CommandHandle::new(config)
            .scoped_async(move |command| {
                async move {
                    let mut lines = command.lines_async(&scheduler);
                    while let Some(line) = lines.next_line().await? {
                        println!("{line}");
                    }
                    Ok(())
                }
                .boxed()
            })
            .await
    })
}
