//! scale-reader
//!
//! Connects to a weighing scale streaming readings over TCP and prints every
//! chunk it sends, trimmed, along with connection events.

use scale_reader::Client;
use scale_reader_tools::{log, reader_opts, reader_settings, reader_usage, ConsoleHandler};
use std::env;
use std::process::ExitCode;

fn main() -> ExitCode {
    let opts = reader_opts();
    let args: Vec<String> = env::args().collect();

    macro_rules! die{
        ($f:expr,$($a:tt)*)=>{
        {
            die!(format!($f, $($a)*));
        }
        };
        ($msg:expr)=>{
        {
            eprintln!("ERROR: {}", $msg);
            return ExitCode::FAILURE;
        }
        };
    }
    macro_rules! die_usage{
        ($f:expr,$($a:tt)*)=>{
        {
            die_usage!(format!($f, $($a)*));
        }
        };
        ($msg:expr)=>{
        {
            die!("{}\n{}", $msg, reader_usage(&opts, &args[0]));
        }
        };
    }

    let matches = match opts.parse(&args[1..]) {
        Ok(m) => m,
        Err(f) => die_usage!("{}", f.to_string()),
    };

    if matches.opt_present("h") {
        println!("{}", reader_usage(&opts, &args[0]));
        return ExitCode::SUCCESS;
    }

    let settings = match reader_settings(&matches) {
        Ok(settings) => settings,
        Err(err) => die_usage!(err),
    };
    let tf = settings.timestamp_format;

    log!(tf, "Connecting to scale at {}", settings.config);
    let mut client = match Client::connect(settings.config) {
        Ok(client) => client,
        Err(err) => die!("Failed to start: {}", err),
    };

    // Returns once the connection is closed, or the attempt to open it failed.
    client.run(&mut ConsoleHandler::new(&tf));

    ExitCode::SUCCESS
}
