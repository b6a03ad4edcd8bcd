// The core module contains the business logic.
// Nothing in here knows about HTTP, OAuth or the command line; the Drive and
// Docs APIs are only seen through the traits in `drive`.

#[path = "folders/folder_tree.rs"]
pub mod folders;

#[path = "drive/mod.rs"]
pub mod drive;
