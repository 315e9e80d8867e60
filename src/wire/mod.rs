//! Binary wire codec (C1, §4.1): the five message kinds exchanged over UDP
//! between host and scan head, all big-endian.

pub mod command;
pub mod data_packet;
pub mod header;
pub mod status;

pub use command::{BroadcastConnect, ConnectionKind, ConstraintRecord, Disconnect, ScanRequest, SetWindow};
pub use data_packet::{data_type, fragment_column, fragment_value_count, DataPacketView};
pub use header::{
    InfoHeader, DatagramHeader, MAGIC_DATA, MAGIC_STATUS_OR_COMMAND, MSG_TYPE_BROADCAST_CONNECT,
    MSG_TYPE_DISCONNECT, MSG_TYPE_SCAN_REQUEST, MSG_TYPE_SET_WINDOW, MSG_TYPE_STATUS,
    SCAN_HEAD_COMMAND_PORT,
};
pub use status::{StatusMessage, VersionInformation, VERSION_INFO_SIZE};
