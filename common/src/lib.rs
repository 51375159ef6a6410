pub mod args;
pub mod metrics;
pub mod postgres;
pub mod shutdown;

/// One-time process setup shared by every binary in the workspace.
pub fn init() {
    let disable_colors = ["1", "true"].contains(
        &std::env::var("DISABLE_COLORS")
            .unwrap_or_else(|_| String::new())
            .to_lowercase()
            .as_str(),
    );
    owo_colors::set_override(!disable_colors);
}
