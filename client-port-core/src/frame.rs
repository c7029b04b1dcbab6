//! The wire protocol: tagged frames multiplexed over one bidirectional byte
//! stream. Modeled as a single `#[serde(tag = "type")]` enum covering both
//! directions, since `client-port` only ever constructs the outbound
//! variants and only ever matches the inbound ones. Three frame shapes
//! (`channelSend`, `writableSignalUpdate`, `communicationWarning`) are
//! byte-identical in both directions, so they get one variant each rather
//! than two: giving them distinct Rust variants would mean two enum arms
//! sharing one wire tag, which serde cannot disambiguate on
//! deserialization.

use crate::error::SerializedError;
use crate::patch::Patch;
use crate::tag::WriteTag;
use serde::{Deserialize, Serialize};
use serde_json::Value;

pub type CallId = u64;
pub type ChannelId = u64;
pub type SubscribeId = u64;
pub type AckId = u64;

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum Frame {
    // -- outbound only (client -> server) --
    RpcCall {
        endpoint: String,
        call_id: CallId,
        parameter: Value,
    },
    ChannelCreate {
        endpoint: String,
        channel_id: ChannelId,
        creation_parameter: Value,
    },
    SignalSubscribe {
        endpoint: String,
        subscribe_id: SubscribeId,
        creation_parameter: Value,
    },
    SignalUnsubscribe {
        subscribe_id: SubscribeId,
    },
    WritableSignalSubscribe {
        endpoint: String,
        subscribe_id: SubscribeId,
        creation_parameter: Value,
    },
    WritableSignalUnsubscribe {
        subscribe_id: SubscribeId,
    },
    KeepAlive {},

    // -- inbound only (server -> client) --
    RpcResult {
        call_id: CallId,
        result: Value,
    },
    RpcError {
        call_id: CallId,
        error: SerializedError,
    },
    ChannelAck {
        channel_id: ChannelId,
        ack_id: AckId,
    },
    ChannelClose {
        channel_id: ChannelId,
    },
    ChannelError {
        channel_id: ChannelId,
        error: SerializedError,
    },
    SignalUpdate {
        subscribe_id: SubscribeId,
        patches: Vec<Patch>,
        tags: Vec<WriteTag>,
    },
    SignalError {
        subscribe_id: SubscribeId,
        error: SerializedError,
    },
    WritableSignalError {
        subscribe_id: SubscribeId,
        error: SerializedError,
    },
    KeepAliveAck {},

    // -- identical shape in both directions --
    ChannelSend {
        channel_id: ChannelId,
        message: Value,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        ack_id: Option<AckId>,
    },
    WritableSignalUpdate {
        subscribe_id: SubscribeId,
        patches: Vec<Patch>,
        tags: Vec<WriteTag>,
    },
    CommunicationWarning {
        warning: String,
    },
}

impl Frame {
    /// A short, loggable name for the frame kind, independent of direction.
    pub fn kind(&self) -> &'static str {
        match self {
            Frame::RpcCall { .. } => "rpcCall",
            Frame::ChannelCreate { .. } => "channelCreate",
            Frame::SignalSubscribe { .. } => "signalSubscribe",
            Frame::SignalUnsubscribe { .. } => "signalUnsubscribe",
            Frame::WritableSignalSubscribe { .. } => "writableSignalSubscribe",
            Frame::WritableSignalUnsubscribe { .. } => "writableSignalUnsubscribe",
            Frame::KeepAlive {} => "keepAlive",
            Frame::RpcResult { .. } => "rpcResult",
            Frame::RpcError { .. } => "rpcError",
            Frame::ChannelAck { .. } => "channelAck",
            Frame::ChannelClose { .. } => "channelClose",
            Frame::ChannelError { .. } => "channelError",
            Frame::SignalUpdate { .. } => "signalUpdate",
            Frame::SignalError { .. } => "signalError",
            Frame::WritableSignalError { .. } => "writableSignalError",
            Frame::KeepAliveAck {} => "keepAliveAck",
            Frame::ChannelSend { .. } => "channelSend",
            Frame::WritableSignalUpdate { .. } => "writableSignalUpdate",
            Frame::CommunicationWarning { .. } => "communicationWarning",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn rpc_call_wire_shape() {
        let frame = Frame::RpcCall {
            endpoint: "add".into(),
            call_id: 0,
            parameter: json!({"a": 2, "b": 3}),
        };
        let value = serde_json::to_value(&frame).unwrap();
        assert_eq!(
            value,
            json!({"type": "rpcCall", "endpoint": "add", "callId": 0, "parameter": {"a": 2, "b": 3}})
        );
    }

    #[test]
    fn inbound_channel_send_round_trips() {
        let wire = json!({"type": "channelSend", "channelId": 2, "message": {"x": 1}});
        let frame: Frame = serde_json::from_value(wire).unwrap();
        assert!(matches!(frame, Frame::ChannelSend { channel_id: 2, ack_id: None, .. }));
    }

    #[test]
    fn communication_warning_round_trips_either_direction() {
        let wire = json!({"type": "communicationWarning", "warning": "huh"});
        let frame: Frame = serde_json::from_value(wire.clone()).unwrap();
        assert_eq!(serde_json::to_value(&frame).unwrap(), wire);
    }
}
