//! `ocipkg`: a thin CLI front end over the packaging engine library
//! (§1.1). Grounded on the teacher's `main.rs` (parse args, build a
//! runner, run it, map errors to an exit code).

use kraftkit_ocipkg::cli::{Args, Runner};

#[tokio::main]
async fn main() {
    let args = match Args::try_parse() {
        Ok(args) => args,
        Err(e) => {
            eprintln!("error: {e}");
            std::process::exit(2);
        }
    };

    let runner = match Runner::new(args) {
        Ok(runner) => runner,
        Err(e) => {
            eprintln!("error: {e}");
            std::process::exit(1);
        }
    };

    if let Err(e) = runner.run().await {
        eprintln!("error: {e}");
        std::process::exit(1);
    }
}
