pub mod virtual_file_system;

pub use virtual_file_system::{
    append_if_missing, dir_attr, DirEntry, FileHandle, FileNode, Node, TagDir, TagFilesystem,
};
