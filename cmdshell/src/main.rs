use clap::Parser;
use cmdshell::{Args, LineOutcome, log, reboot};
use miette::{IntoDiagnostic, WrapErr};

#[tokio::main]
async fn main() -> miette::Result<()> {
    let args = Args::parse();

    let log_file = args.log_file();
    log::init_tracing(args.log_level, &log_file)
        .into_diagnostic()
        .wrap_err_with(|| format!("Failed to open log file {}", log_file.display()))?;

    match cmdshell::run(args).await? {
        LineOutcome::Reboot => Err(reboot::reexec().into()),
        LineOutcome::Exit | LineOutcome::Continue => Ok(()),
    }
}
