use clap::Parser;
use docsweep_lib::Args;

fn main() {
    let args = Args::parse();
    docsweep_lib::init_logging(args.log_directives());

    tracing::info!(
        input = %args.input_dir.display(),
        output = %args.output_dir.display(),
        "Starting docsweep"
    );

    std::process::exit(docsweep_lib::run(&args));
}
