use clap::Parser;
use clap_derive::Parser;
use rtpmidi::midi;
use rtpmidi::rtp::MidiMessage;
use rtpmidi::session::{Session, SessionConfig};
use tracing::{info, Level};

/// Waits for remote peers to invite this session and prints every MIDI command they send
#[derive(Parser)]
struct Args {
    #[clap(long, default_value_t = 7005)]
    port: u16,

    #[clap(long, default_value = "rtpmidi-dumper")]
    name: String,

    #[clap(short, long, default_value_t = false)]
    verbose: bool,

    #[clap(long, default_value_t = false)]
    very_verbose: bool,
}

#[tokio::main]
pub async fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    let level = match (args.verbose, args.very_verbose) {
        (_, true) => Level::TRACE,
        (true, _) => Level::DEBUG,
        (false, false) => Level::INFO,
    };

    tracing_subscriber::fmt()
        .with_max_level(level)
        .try_init()
        .ok();

    let session = Session::start_with_config(SessionConfig::new(args.name, args.port)).await?;
    session.handle(|message: MidiMessage| {
        for command in message.commands.iter() {
            let name = command.status()
                .and_then(midi::command_info)
                .map(|info| info.name)
                .unwrap_or("unknown");
            println!("received {} from SSRC {:#x}: {:02x?}", name, message.ssrc, command.payload.as_ref());
        }
    });

    tokio::signal::ctrl_c().await?;

    info!("shutting down");
    session.end().await;
    Ok(())
}
