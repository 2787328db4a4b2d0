//! `xbar-msg`: broadcast a message to one or all running bar
//! instances over their ipc channels.
//!
//! Usage: `xbar-msg [-p pid] <command=(action|cmd|hook)> <payload> [...]`

use std::env;
use std::path::Path;
use std::process;

use tracing_subscriber::fmt as logger;

use xbar::ipc::{self, Delivery, IpcError, Request};

fn main() {
    process::exit(run());
}

fn run() -> i32 {
    let _ = logger::fmt()
        .without_time()
        .with_file(false)
        .with_line_number(false)
        .with_writer(std::io::stderr)
        .try_init();

    let args: Vec<String> = env::args().skip(1).collect();
    let dir = Path::new(ipc::CHANNEL_DIR);

    // an explicit -p target is validated before anything else: the
    // process must be running and its channel must be a usable pipe
    let (pid_arg, rest) = ipc::split_pid(&args);
    let pid = match pid_arg {
        Some(p) => match ipc::validate_target(p, dir) {
            Ok(pid) => Some(pid),
            Err(e) => return fail(&e),
        },
        None => None,
    };

    let request = match Request::parse_body(pid, rest) {
        Ok(request) => request,
        Err(e) => return fail(&e),
    };

    match ipc::broadcast(&request, dir, &mut report) {
        Ok(()) => 0,
        Err(e) => fail(&e),
    }
}

fn report(delivery: Delivery) {
    eprintln!("xbar-msg: {}", delivery);
}

fn fail(err: &IpcError) -> i32 {
    eprintln!("xbar-msg: {}", err);
    err.exit_code()
}
