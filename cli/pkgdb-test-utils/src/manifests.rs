//! Example manifests

pub const EMPTY_ALL_SYSTEMS: &str = r#"
    version = 1

    [options]
    systems = ["aarch64-darwin", "x86_64-darwin", "aarch64-linux", "x86_64-linux"]
"#;

pub const HELLO: &str = r#"
    version = 1

    [install]
    hello.pkg-path = "hello"

    [registry.inputs.nixpkgs]
    from = "github:NixOS/nixpkgs/nixpkgs-unstable"

    [options]
    systems = ["x86_64-linux"]
"#;

pub const HELLO_AND_RIPGREP: &str = r#"
    version = 1

    [install]
    hello.pkg-path = "hello"
    hello.version = "^2.12"
    ripgrep.pkg-path = "ripgrep"
    ripgrep.priority = 3
    ripgrep.pkg-group = "tools"

    [registry.inputs.nixpkgs]
    from = "github:NixOS/nixpkgs/nixpkgs-unstable"

    [options]
    systems = ["x86_64-linux", "aarch64-darwin"]
"#;
