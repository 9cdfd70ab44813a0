use std::process::ExitCode;

fn main() -> ExitCode {
    let command_line_interface = json_vet::cli::CommandLineInterface::load();
    match command_line_interface.run() {
        Ok(code) => code,
        Err(error) => {
            eprintln!("error: {error:#}");
            ExitCode::from(2)
        }
    }
}
