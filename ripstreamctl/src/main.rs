use clap::Parser;

fn main() {
    let cli = ripstreamctl::Cli::parse();
    ripstreamctl::init_tracing(cli.verbose);
    if let Err(err) = ripstreamctl::run(cli) {
        eprintln!("error: {err}");
        std::process::exit(1);
    }
}
