#![doc = include_str!("../README.md")]
#![doc(issue_tracker_base_url = "https://github.com/keel-ledger/keel/issues/")]
#![cfg_attr(docsrs, feature(doc_cfg, doc_auto_cfg))]
#![cfg_attr(not(test), warn(unused_crate_dependencies))]

mod config;
pub use config::ExecutionConfig;

mod error;
pub use error::ExecutionError;

mod events;
pub use events::EventCache;

mod executor;
pub use executor::BatchExecutor;

mod permissions;
pub use permissions::{all_have_permission, has_permission};

mod tip;
pub use tip::{Tip, TipInfo};

mod validation;

mod vm;
pub use vm::{Vm, VmCall, VmError, VmParams};
