//! Meshtastic protobuf messages
//!
//! The bridge only needs a small slice of the Meshtastic API: the `ToRadio` / `FromRadio`
//! envelopes, mesh packets carrying `Data`, and the node identity records sent during the
//! initial config download. Those messages are declared here with `prost` derives using the
//! field numbers from `meshtastic/mesh.proto`. Fields and oneof variants that are not declared
//! are skipped by the decoder, so newer firmware stays compatible.

pub mod meshtastic_generated {
    //! Hand-maintained subset of the `meshtastic` protobuf package.
    #![allow(clippy::derive_partial_eq_without_eq)]

    /// Packets from the radio to the client.
    #[derive(Clone, PartialEq, ::prost::Message)]
    pub struct FromRadio {
        #[prost(uint32, tag = "1")]
        pub id: u32,
        #[prost(oneof = "from_radio::PayloadVariant", tags = "2, 3, 4, 7, 8")]
        pub payload_variant: ::core::option::Option<from_radio::PayloadVariant>,
    }

    pub mod from_radio {
        #[derive(Clone, PartialEq, ::prost::Oneof)]
        pub enum PayloadVariant {
            #[prost(message, tag = "2")]
            Packet(super::MeshPacket),
            #[prost(message, tag = "3")]
            MyInfo(super::MyNodeInfo),
            #[prost(message, tag = "4")]
            NodeInfo(super::NodeInfo),
            #[prost(uint32, tag = "7")]
            ConfigCompleteId(u32),
            #[prost(bool, tag = "8")]
            Rebooted(bool),
        }
    }

    /// Packets from the client to the radio.
    #[derive(Clone, PartialEq, ::prost::Message)]
    pub struct ToRadio {
        #[prost(oneof = "to_radio::PayloadVariant", tags = "1, 3, 4, 7")]
        pub payload_variant: ::core::option::Option<to_radio::PayloadVariant>,
    }

    pub mod to_radio {
        #[derive(Clone, PartialEq, ::prost::Oneof)]
        pub enum PayloadVariant {
            #[prost(message, tag = "1")]
            Packet(super::MeshPacket),
            #[prost(uint32, tag = "3")]
            WantConfigId(u32),
            #[prost(bool, tag = "4")]
            Disconnect(bool),
            #[prost(message, tag = "7")]
            Heartbeat(super::Heartbeat),
        }
    }

    #[derive(Clone, PartialEq, ::prost::Message)]
    pub struct MeshPacket {
        #[prost(fixed32, tag = "1")]
        pub from: u32,
        #[prost(fixed32, tag = "2")]
        pub to: u32,
        #[prost(uint32, tag = "3")]
        pub channel: u32,
        #[prost(fixed32, tag = "6")]
        pub id: u32,
        #[prost(fixed32, tag = "7")]
        pub rx_time: u32,
        #[prost(float, tag = "8")]
        pub rx_snr: f32,
        #[prost(uint32, tag = "9")]
        pub hop_limit: u32,
        #[prost(bool, tag = "10")]
        pub want_ack: bool,
        #[prost(int32, tag = "11")]
        pub priority: i32,
        #[prost(int32, tag = "12")]
        pub rx_rssi: i32,
        #[prost(bool, tag = "14")]
        pub via_mqtt: bool,
        #[prost(uint32, tag = "15")]
        pub hop_start: u32,
        #[prost(oneof = "mesh_packet::PayloadVariant", tags = "4, 5")]
        pub payload_variant: ::core::option::Option<mesh_packet::PayloadVariant>,
    }

    pub mod mesh_packet {
        #[derive(Clone, PartialEq, ::prost::Oneof)]
        pub enum PayloadVariant {
            #[prost(message, tag = "4")]
            Decoded(super::Data),
            #[prost(bytes = "bytes", tag = "5")]
            Encrypted(::prost::bytes::Bytes),
        }

        /// Values for `MeshPacket::priority` used by this client.
        pub mod priority {
            pub const RELIABLE: i32 = 70;
            pub const ACK: i32 = 120;
        }
    }

    #[derive(Clone, PartialEq, ::prost::Message)]
    pub struct Data {
        #[prost(enumeration = "PortNum", tag = "1")]
        pub portnum: i32,
        #[prost(bytes = "bytes", tag = "2")]
        pub payload: ::prost::bytes::Bytes,
        #[prost(bool, tag = "3")]
        pub want_response: bool,
        #[prost(fixed32, tag = "4")]
        pub dest: u32,
        #[prost(fixed32, tag = "5")]
        pub source: u32,
        #[prost(fixed32, tag = "6")]
        pub request_id: u32,
        #[prost(fixed32, tag = "7")]
        pub reply_id: u32,
        #[prost(fixed32, tag = "8")]
        pub emoji: u32,
        #[prost(uint32, optional, tag = "9")]
        pub bitfield: ::core::option::Option<u32>,
    }

    #[derive(Clone, PartialEq, ::prost::Message)]
    pub struct MyNodeInfo {
        #[prost(uint32, tag = "1")]
        pub my_node_num: u32,
    }

    #[derive(Clone, PartialEq, ::prost::Message)]
    pub struct NodeInfo {
        #[prost(uint32, tag = "1")]
        pub num: u32,
        #[prost(message, optional, tag = "2")]
        pub user: ::core::option::Option<User>,
        #[prost(float, tag = "4")]
        pub snr: f32,
        #[prost(fixed32, tag = "5")]
        pub last_heard: u32,
    }

    #[derive(Clone, PartialEq, ::prost::Message)]
    pub struct User {
        #[prost(string, tag = "1")]
        pub id: ::prost::alloc::string::String,
        #[prost(string, tag = "2")]
        pub long_name: ::prost::alloc::string::String,
        #[prost(string, tag = "3")]
        pub short_name: ::prost::alloc::string::String,
        #[prost(bool, tag = "6")]
        pub is_licensed: bool,
    }

    #[derive(Clone, PartialEq, ::prost::Message)]
    pub struct Heartbeat {
        #[prost(uint32, tag = "1")]
        pub nonce: u32,
    }

    /// Application port numbers (`portnums.proto`), limited to the ones the bridge names.
    #[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, ::prost::Enumeration)]
    #[repr(i32)]
    pub enum PortNum {
        UnknownApp = 0,
        TextMessageApp = 1,
        RemoteHardwareApp = 2,
        PositionApp = 3,
        NodeinfoApp = 4,
        RoutingApp = 5,
        AdminApp = 6,
        TextMessageCompressedApp = 7,
        WaypointApp = 8,
        TelemetryApp = 67,
        TracerouteApp = 70,
        NeighborinfoApp = 71,
    }
}
