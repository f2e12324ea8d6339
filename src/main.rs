use std::process::ExitCode;

fn main() -> ExitCode {
    // A `.env` file may carry `MRS_LOG`.
    dotenvy::dotenv().ok();

    match mrs_invert::app::run() {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            eprintln!("{err}");
            ExitCode::from(err.exit_code())
        }
    }
}
