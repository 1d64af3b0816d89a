#[tokio::main]
async fn main() {
    use clap::Parser;
    use std::error::Error;
    let args = lnscrape::cli::Args::parse();
    lnscrape::telemetry::init(args.verbose);
    if let Err(e) = lnscrape::cli::run(&args).await {
        eprintln!("{}", e);
        if args.verbose {
            let mut source = e.source();
            while let Some(s) = source {
                eprintln!("  cause: {}", s);
                source = s.source();
            }
        }
        std::process::exit(e.exit_code());
    }
}
