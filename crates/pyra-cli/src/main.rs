use std::env;
use std::fs;
use std::process::ExitCode;

use pyra::{Config, Context};

fn main() -> ExitCode {
    let args: Vec<String> = env::args().collect();
    let file_path = if args.len() > 1 { &args[1] } else { "main.pyra" };

    let code = match read_file(file_path) {
        Ok(code) => code,
        Err(err) => {
            eprintln!("error: {err}");
            return ExitCode::FAILURE;
        }
    };

    let config = Config {
        argv: args.clone(),
        ..Config::default()
    };
    let mut ctx = Context::new(config);

    if ctx.run_source(file_path, &code).is_err() {
        let trace = ctx
            .format_traceback()
            .unwrap_or_else(|| "pyra: an exception propagated with no captured trace".to_owned());
        eprint!("{trace}");
        return ExitCode::FAILURE;
    }

    ExitCode::SUCCESS
}

fn read_file(file_path: &str) -> Result<String, String> {
    match fs::metadata(file_path) {
        Ok(metadata) if !metadata.is_file() => return Err(format!("{file_path} is not a file")),
        Ok(_) => {}
        Err(err) => return Err(format!("reading {file_path}: {err}")),
    }
    fs::read_to_string(file_path).map_err(|err| format!("reading {file_path}: {err}"))
}
