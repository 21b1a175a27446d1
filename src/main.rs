fn main() -> std::process::ExitCode {
    archindex::run()
}
