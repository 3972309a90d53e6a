fn main() {
    if handle_cli_flags() {
        return;
    }

    if let Err(err) = teamchat_tui::run() {
        eprintln!("error: {err:?}");
        std::process::exit(1);
    }
}

fn handle_cli_flags() -> bool {
    let mut saw_flag = false;
    for arg in std::env::args().skip(1) {
        match arg.as_str() {
            "--version" | "-V" => {
                println!("teamchat-tui {}", teamchat_tui::VERSION);
                saw_flag = true;
            }
            "--help" | "-h" => {
                println!(
                    "teamchat-tui - Team chat channels, mentions and slash commands in the terminal.\n\n  --version, -V        Show version and exit\n  --help,    -h        Show this help message\n  --write-config       Write the default config file and exit"
                );
                saw_flag = true;
            }
            "--write-config" => {
                saw_flag = true;
                let defaults = teamchat_tui::config::Config::default();
                match teamchat_tui::config::save(None, &defaults) {
                    Ok(path) => println!("Wrote {}", path.display()),
                    Err(err) => {
                        eprintln!("Could not write config: {err:?}");
                        std::process::exit(1);
                    }
                }
            }
            _ => {}
        }
    }
    saw_flag
}
