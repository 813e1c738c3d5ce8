#![doc = include_str!("../README.md")]
#![doc(issue_tracker_base_url = "https://github.com/keel-ledger/keel/issues/")]
#![cfg_attr(docsrs, feature(doc_cfg, doc_auto_cfg))]
#![cfg_attr(not(test), warn(unused_crate_dependencies))]

mod account;
pub use account::{contract_address, Account, PublicKey, Signature};

mod permissions;
pub use permissions::{
    AccountPermissions, BasePermissions, PermFlag, GLOBAL_PERMISSIONS_ADDRESS,
};

mod namereg;
pub use namereg::{name_base_cost, validate_name, validate_name_data, NameEntry, NameError};

mod tx;
pub use tx::{CallTx, NameTx, PermArgs, PermissionsTx, SendTx, Tx, TxCfg, TxInput, TxOutput};

mod events;
pub use events::{
    acc_input_topic, acc_output_topic, name_reg_topic, permissions_topic, EventSink, NoOpSink,
    TxEventData,
};
