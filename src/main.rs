use argh::FromArgs;
use pipeline_shell::Interpreter;
use tracing::Level;

#[derive(FromArgs)]
/// Interactive command interpreter with `cmd1 | cmd2 | ... | cmdN` pipelines.
struct Args {
    #[argh(option, default = "String::from(\"shell> \")")]
    /// prompt printed before each input line
    prompt: String,

    #[argh(switch, short = 'v')]
    /// log pipeline lifecycle events to stderr
    verbose: bool,
}

fn main() -> anyhow::Result<()> {
    let args: Args = argh::from_env();

    let level = if args.verbose { Level::DEBUG } else { Level::WARN };
    tracing_subscriber::fmt()
        .with_max_level(level)
        .with_writer(std::io::stderr)
        .with_target(false)
        .init();

    Interpreter::default().repl(&args.prompt)?;
    Ok(())
}
