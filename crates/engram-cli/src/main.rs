use clap::Parser;
use engram_cli::{Cli, run};

fn main() {
    // Piping output into `head` or `less` closes stdout early; the default
    // SIGPIPE disposition ends the process quietly instead of panicking.
    #[cfg(unix)]
    unsafe {
        libc::signal(libc::SIGPIPE, libc::SIG_DFL);
    }

    let code = match run(Cli::parse()) {
        Ok(()) => 0,
        Err(err) => {
            eprintln!("error: {:#}", err);
            1
        }
    };
    std::process::exit(code);
}
