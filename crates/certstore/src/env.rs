//! Resolution of the platform data directory that software-backed key
//! containers live under.

/// Source of the machine data root (e.g. `C:\ProgramData`).
pub trait DataRoot {
    fn data_root(&self) -> Option<String>;
}

/// Reads the `ProgramData` environment variable.
#[derive(Debug, Clone, Copy, Default)]
pub struct ProgramDataEnv;

impl DataRoot for ProgramDataEnv {
    fn data_root(&self) -> Option<String> {
        std::env::var("ProgramData").ok().filter(|v| !v.is_empty())
    }
}

/// A data root fixed at construction.
#[derive(Debug, Clone, Default)]
pub struct FixedDataRoot(pub Option<String>);

impl FixedDataRoot {
    pub fn new(root: impl Into<String>) -> Self {
        Self(Some(root.into()))
    }
}

impl DataRoot for FixedDataRoot {
    fn data_root(&self) -> Option<String> {
        self.0.clone()
    }
}

/// On-disk location of a machine key container held by the software
/// provider.
pub fn software_key_path(data_root: &str, unique_name: &str) -> String {
    format!(
        r"{}\Microsoft\Crypto\Keys\{unique_name}",
        data_root.trim_end_matches('\\')
    )
}
