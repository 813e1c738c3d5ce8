#![doc = include_str!("../README.md")]
#![doc(issue_tracker_base_url = "https://github.com/keel-ledger/keel/issues/")]
#![cfg_attr(docsrs, feature(doc_cfg, doc_auto_cfg))]
#![cfg_attr(not(test), warn(unused_crate_dependencies))]

mod block_cache;
pub use block_cache::BlockCache;

mod tx_cache;
pub use tx_cache::{TxCache, VmState};
