/// Represents information about a file in the CASC storage.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CascFileInfo {
    /// The name of the file.
    pub file_name: String,
    /// The name hash the root lists the file under.
    pub hash: u64,
    /// The decoded size of the file in bytes, 0 if it cannot be resolved.
    pub file_size: u64,
    /// Whether every chunk of the file is present in the storage indexes.
    pub is_local: bool,
}
