fn main() {
    if let Err(error) = forge_randomize_lib::run() {
        eprintln!("error: {error}");
        std::process::exit(1);
    }
}
