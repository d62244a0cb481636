pub mod dummy_root_handler;
pub mod text_root_handler;
pub mod tvfs_root_handler;
pub mod wow_root_handler;
