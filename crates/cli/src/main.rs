use std::process::ExitCode;

fn main() -> ExitCode {
    neuronx_cli::run()
}
