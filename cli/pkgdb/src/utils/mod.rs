pub mod errors;
pub mod logger;
pub mod message;

/// The system this binary was built for, in nix notation
pub fn current_system() -> String {
    let os = match std::env::consts::OS {
        "macos" => "darwin",
        os => os,
    };
    format!("{}-{os}", std::env::consts::ARCH)
}
