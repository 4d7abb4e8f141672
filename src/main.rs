fn main() {
    #[cfg(feature = "cli")]
    tardiff::cli::run();

    #[cfg(not(feature = "cli"))]
    {
        eprintln!("tardiff: CLI not enabled. Rebuild with `--features cli`.");
        std::process::exit(1);
    }
}
