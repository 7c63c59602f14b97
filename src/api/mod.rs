pub mod client;
pub mod pager;
