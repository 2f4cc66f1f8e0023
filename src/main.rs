fn main() {
    if let Err(err) = riskgate::cli::run() {
        riskgate::ui::eprintln_error(&err);
        std::process::exit(riskgate::exit::exit_code(&err));
    }
}
