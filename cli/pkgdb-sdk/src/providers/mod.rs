pub mod buildenv;
pub mod lock_manifest;
pub mod realise;
pub mod registry;
pub mod transaction;
