use std::process::ExitCode;

fn main() -> ExitCode {
    vouchy_cli::run()
}
