pub mod hardlink;
pub mod read;
pub mod write;

pub use hardlink::HardlinkCoalescer;
pub use read::{read_symlink_target, read_xattrs, FileMetadata, FileType};
pub use write::{
    apply_metadata, create_block_device, create_char_device, create_directory, create_fifo,
    create_hardlink, create_socket, create_symlink,
};
