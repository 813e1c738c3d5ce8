//! Execution event topics and payloads.
//!
//! Topic strings are part of the chain's observable surface and must not
//! change shape: `Acc/<hex-address>/Input`, `Acc/<hex-address>/Output`,
//! `NameReg/<name>`, `Permissions/<perm-name>`.

use alloy_primitives::{hex, Address, Bytes};

use crate::{PermFlag, Tx};

/// Topic fired for every debited input account.
pub fn acc_input_topic(address: &Address) -> String {
    format!("Acc/{}/Input", hex::encode(address))
}

/// Topic fired for every credited or called account.
pub fn acc_output_topic(address: &Address) -> String {
    format!("Acc/{}/Output", hex::encode(address))
}

/// Topic fired for a name-registry operation.
pub fn name_reg_topic(name: &str) -> String {
    format!("NameReg/{name}")
}

/// Topic fired for a permission mutation.
pub fn permissions_topic(flag: PermFlag) -> String {
    format!("Permissions/{}", flag.name())
}

/// Payload attached to every execution event.
#[derive(Clone, Debug)]
pub struct TxEventData {
    /// The transaction that produced the event.
    pub tx: Tx,
    /// VM return bytes, empty for non-call transactions.
    pub ret: Bytes,
    /// Exception text, empty on success.
    pub exception: String,
}

impl TxEventData {
    /// Event payload for a transaction that completed without a VM call.
    pub fn plain(tx: Tx) -> Self {
        Self { tx, ret: Bytes::new(), exception: String::new() }
    }
}

/// Destination for execution events.
///
/// Firing is fire-and-forget from the executor's perspective: a sink must
/// not block the commit path. Queueing and backpressure are the sink's
/// concern.
pub trait EventSink: Send + Sync {
    /// Deliver one event.
    fn fire(&self, topic: &str, data: TxEventData);
}

/// Sink that drops everything, used on the check path.
#[derive(Clone, Copy, Debug, Default)]
pub struct NoOpSink;

impl EventSink for NoOpSink {
    fn fire(&self, _topic: &str, _data: TxEventData) {}
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn account_topics_use_bare_hex() {
        let address = Address::repeat_byte(0xab);
        assert_eq!(
            acc_input_topic(&address),
            "Acc/abababababababababababababababababababab/Input"
        );
        assert_eq!(
            acc_output_topic(&address),
            "Acc/abababababababababababababababababababab/Output"
        );
    }

    #[test]
    fn name_reg_topic_embeds_name() {
        assert_eq!(name_reg_topic("foo"), "NameReg/foo");
    }

    #[test]
    fn permissions_topic_uses_flag_name() {
        assert_eq!(permissions_topic(PermFlag::SET_BASE), "Permissions/SetBase");
        assert_eq!(permissions_topic(PermFlag::ADD_ROLE), "Permissions/AddRole");
    }

    #[test]
    fn plain_event_data_is_empty() {
        let tx = Tx::Send(crate::SendTx::new());
        let data = TxEventData::plain(tx);
        assert!(data.ret.is_empty());
        assert!(data.exception.is_empty());
    }
}
