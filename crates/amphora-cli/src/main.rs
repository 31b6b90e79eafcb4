use std::{env, process::ExitCode, time::Instant};

use amphora::{Global, RequestError, ResourceLimits, StdOutput};

fn main() -> ExitCode {
    let args: Vec<String> = env::args().collect();
    let Some(file_path) = args.get(1) else {
        eprintln!("usage: amphora <script.php>");
        return ExitCode::FAILURE;
    };

    let mut global = Global::with_limits(Box::new(StdOutput), ResourceLimits::default());

    let start = Instant::now();
    match global.run_file(file_path) {
        Ok(code) => {
            if code == 0 {
                ExitCode::SUCCESS
            } else {
                ExitCode::from(code.clamp(0, 255) as u8)
            }
        }
        Err(err) => {
            let elapsed = start.elapsed();
            eprintln!("error after {elapsed:?}:\n{err}");
            report_exit(&err)
        }
    }
}

fn report_exit(err: &RequestError) -> ExitCode {
    ExitCode::from(err.exit_code().clamp(1, 255) as u8)
}
