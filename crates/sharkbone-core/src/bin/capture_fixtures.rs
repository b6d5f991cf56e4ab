use std::path::PathBuf;
use std::process::ExitCode;

use sharkbone_core::fixtures::{self, FixtureError};

fn main() -> ExitCode {
    if let Err(err) = run() {
        eprintln!("error: {}", err);
        return ExitCode::from(1);
    }
    ExitCode::SUCCESS
}

/// Writes the sample captures under `tests/fixtures`, or the directory given
/// as the first argument.
fn run() -> Result<(), FixtureError> {
    let root = std::env::args_os()
        .nth(1)
        .map(PathBuf::from)
        .unwrap_or_else(|| PathBuf::from("tests").join("fixtures"));

    let captures = [
        ("mixed_udp.pcapng", fixtures::mixed_capture()?),
        ("lmsg_stream.pcapng", fixtures::lmsg_capture()?),
    ];
    for (name, frames) in &captures {
        let path = root.join(name);
        fixtures::write_pcapng(&path, frames)?;
        println!("wrote {} ({} frames)", path.display(), frames.len());
    }
    Ok(())
}
