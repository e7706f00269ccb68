//! Host identity and hostname ban-list handling

mod banlist;
mod host;

pub use banlist::HostBanList;
pub use host::HostKey;
