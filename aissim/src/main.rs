mod antenna;
mod boat;
mod common;
mod server;

trait ToolRun {
    fn run(&self) -> anyhow::Result<()> {
        Ok(())
    }
}

#[derive(clap::Parser, Debug)]
#[command(version, about, long_about = None)]
struct SimOptions {
    #[command(subcommand)]
    command: SimCommand,

    /// Log verbosity; repeat for more detail.
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    verbose: u8,

    /// Append log records to this file instead of stderr.
    #[arg(long, global = true)]
    log_file: Option<std::path::PathBuf>,
}

#[derive(clap::Subcommand, Debug)]
enum SimCommand {
    Boat(boat::BoatOpts),
    Server(server::ServerOpts),
}

impl ToolRun for SimCommand {
    fn run(&self) -> anyhow::Result<()> {
        use SimCommand::*;
        match self {
            Boat(o) => o.run(),
            Server(o) => o.run(),
        }
    }
}

fn main() -> anyhow::Result<()> {
    use clap::Parser;
    let opts = SimOptions::parse();

    common::init_logging(opts.verbose, opts.log_file.as_deref())?;
    opts.command.run()
}
