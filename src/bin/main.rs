use teamchat::{cli, telemetry};

fn main() {
    let cli = cli::parse_from(std::env::args_os());
    telemetry::init(cli.verbose);
    let json = cli.json;

    match cli::run(cli) {
        Ok(code) => std::process::exit(code),
        Err(err) => {
            if json {
                println!(
                    "{}",
                    serde_json::json!({ "ok": false, "error": err.to_string() })
                );
            } else {
                eprintln!("error: {err}");
            }
            std::process::exit(err.exit_code());
        }
    }
}
