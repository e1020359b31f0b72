//! Classification of node-originated messages.
//!
//! Every message the node can send belongs to a fixed variant set. Each
//! variant carries role predicates used by the routing layer: whether it is
//! an error, a progress event, an unsolicited notification, and whether it
//! concludes a given request command.

use crate::error::ProtocolError;
use crate::message::Message;

/// The fixed set of server message headers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ServerHeader {
    NodeHello,
    CloseConnectionDuplicateName,
    Peer,
    PeerNote,
    PeerRemoved,
    EndListPeers,
    EndListPeerNotes,
    EndListPersistentRequest,
    NodeData,
    ConfigData,
    TestDdaReply,
    TestDdaComplete,
    SskKeypair,
    UriGenerated,
    StartedCompression,
    FinishedCompression,
    SimpleProgress,
    PutSuccessful,
    PutFetchable,
    DataFound,
    AllData,
    PutFailed,
    GetFailed,
    PersistentGet,
    PersistentPut,
    PersistentPutDir,
    PersistentRequestRemoved,
    PersistentRequestModified,
    ProtocolError,
    IdentifierCollision,
    UnknownNodeIdentifier,
    UnknownPeerNoteType,
}

impl ServerHeader {
    /// Parses a wire header. Returns `None` for anything outside the set.
    pub fn parse(header: &str) -> Option<Self> {
        Some(match header {
            "NodeHello" => Self::NodeHello,
            "CloseConnectionDuplicateName" => Self::CloseConnectionDuplicateName,
            "Peer" => Self::Peer,
            "PeerNote" => Self::PeerNote,
            "PeerRemoved" => Self::PeerRemoved,
            "EndListPeers" => Self::EndListPeers,
            "EndListPeerNotes" => Self::EndListPeerNotes,
            "EndListPersistentRequest" => Self::EndListPersistentRequest,
            "NodeData" => Self::NodeData,
            "ConfigData" => Self::ConfigData,
            "TestDDAReply" => Self::TestDdaReply,
            "TestDDAComplete" => Self::TestDdaComplete,
            "SSKKeypair" => Self::SskKeypair,
            "URIGenerated" => Self::UriGenerated,
            "StartedCompression" => Self::StartedCompression,
            "FinishedCompression" => Self::FinishedCompression,
            "SimpleProgress" => Self::SimpleProgress,
            "PutSuccessful" => Self::PutSuccessful,
            "PutFetchable" => Self::PutFetchable,
            "DataFound" => Self::DataFound,
            "AllData" => Self::AllData,
            "PutFailed" => Self::PutFailed,
            "GetFailed" => Self::GetFailed,
            "PersistentGet" => Self::PersistentGet,
            "PersistentPut" => Self::PersistentPut,
            "PersistentPutDir" => Self::PersistentPutDir,
            "PersistentRequestRemoved" => Self::PersistentRequestRemoved,
            "PersistentRequestModified" => Self::PersistentRequestModified,
            "ProtocolError" => Self::ProtocolError,
            "IdentifierCollision" => Self::IdentifierCollision,
            "UnknownNodeIdentifier" => Self::UnknownNodeIdentifier,
            "UnknownPeerNoteType" => Self::UnknownPeerNoteType,
            _ => return None,
        })
    }

    /// The wire spelling of this header.
    pub fn wire_name(&self) -> &'static str {
        match self {
            Self::NodeHello => "NodeHello",
            Self::CloseConnectionDuplicateName => "CloseConnectionDuplicateName",
            Self::Peer => "Peer",
            Self::PeerNote => "PeerNote",
            Self::PeerRemoved => "PeerRemoved",
            Self::EndListPeers => "EndListPeers",
            Self::EndListPeerNotes => "EndListPeerNotes",
            Self::EndListPersistentRequest => "EndListPersistentRequest",
            Self::NodeData => "NodeData",
            Self::ConfigData => "ConfigData",
            Self::TestDdaReply => "TestDDAReply",
            Self::TestDdaComplete => "TestDDAComplete",
            Self::SskKeypair => "SSKKeypair",
            Self::UriGenerated => "URIGenerated",
            Self::StartedCompression => "StartedCompression",
            Self::FinishedCompression => "FinishedCompression",
            Self::SimpleProgress => "SimpleProgress",
            Self::PutSuccessful => "PutSuccessful",
            Self::PutFetchable => "PutFetchable",
            Self::DataFound => "DataFound",
            Self::AllData => "AllData",
            Self::PutFailed => "PutFailed",
            Self::GetFailed => "GetFailed",
            Self::PersistentGet => "PersistentGet",
            Self::PersistentPut => "PersistentPut",
            Self::PersistentPutDir => "PersistentPutDir",
            Self::PersistentRequestRemoved => "PersistentRequestRemoved",
            Self::PersistentRequestModified => "PersistentRequestModified",
            Self::ProtocolError => "ProtocolError",
            Self::IdentifierCollision => "IdentifierCollision",
            Self::UnknownNodeIdentifier => "UnknownNodeIdentifier",
            Self::UnknownPeerNoteType => "UnknownPeerNoteType",
        }
    }

    /// Whether this message reports a per-job error.
    pub fn is_error(&self) -> bool {
        matches!(
            self,
            Self::ProtocolError
                | Self::IdentifierCollision
                | Self::UnknownNodeIdentifier
                | Self::UnknownPeerNoteType
                | Self::PutFailed
                | Self::GetFailed
        )
    }

    /// Whether this message is a non-terminal progress event.
    pub fn is_progress(&self) -> bool {
        matches!(
            self,
            Self::UriGenerated
                | Self::StartedCompression
                | Self::FinishedCompression
                | Self::SimpleProgress
        )
    }

    /// Whether this message arrives unsolicited and is delivered to the
    /// session-wide notification sink instead of a job.
    pub fn is_notification(&self) -> bool {
        matches!(
            self,
            Self::PersistentRequestRemoved | Self::PersistentRequestModified
        )
    }

    /// Whether this message concludes a request with the given command
    /// header.
    pub fn terminal_for(&self, request_header: &str) -> bool {
        match self {
            Self::ProtocolError
            | Self::IdentifierCollision
            | Self::UnknownNodeIdentifier
            | Self::UnknownPeerNoteType => true,
            Self::NodeHello | Self::CloseConnectionDuplicateName => {
                request_header == "ClientHello"
            }
            Self::Peer => matches!(
                request_header,
                "ListPeer" | "AddPeer" | "ModifyPeer" | "RemovePeer"
            ),
            Self::PeerNote => request_header == "ModifyPeerNote",
            Self::PeerRemoved => request_header == "RemovePeer",
            Self::EndListPeers => request_header == "ListPeers",
            Self::EndListPeerNotes => request_header == "ListPeerNotes",
            Self::EndListPersistentRequest => request_header == "ListPersistentRequest",
            Self::NodeData => request_header == "GetNode",
            Self::ConfigData => matches!(request_header, "GetConfig" | "ModifyConfig"),
            Self::TestDdaReply => request_header == "TestDDARequest",
            Self::TestDdaComplete => request_header == "TestDDAResponse",
            Self::SskKeypair => request_header == "GenerateSSK",
            Self::PutSuccessful | Self::PutFetchable | Self::PutFailed => {
                request_header == "ClientPut"
            }
            Self::DataFound | Self::AllData | Self::GetFailed => request_header == "ClientGet",
            Self::UriGenerated
            | Self::StartedCompression
            | Self::FinishedCompression
            | Self::SimpleProgress
            | Self::PersistentGet
            | Self::PersistentPut
            | Self::PersistentPutDir
            | Self::PersistentRequestRemoved
            | Self::PersistentRequestModified => false,
        }
    }

    /// Whether a request with the given command header can legally receive
    /// this message through the identifier-less (global) routing bucket.
    pub fn globally_routable_for(&self, request_header: &str) -> bool {
        if self.is_notification() {
            return false;
        }
        if matches!(
            self,
            Self::ProtocolError
                | Self::IdentifierCollision
                | Self::UnknownNodeIdentifier
                | Self::UnknownPeerNoteType
        ) {
            return true;
        }
        match request_header {
            "ClientHello" => matches!(self, Self::NodeHello | Self::CloseConnectionDuplicateName),
            "ListPeers" => matches!(self, Self::Peer | Self::EndListPeers),
            "ListPeer" | "AddPeer" | "ModifyPeer" => matches!(self, Self::Peer),
            "ListPeerNotes" => matches!(self, Self::PeerNote | Self::EndListPeerNotes),
            "ModifyPeerNote" => matches!(self, Self::PeerNote),
            "RemovePeer" => matches!(self, Self::Peer | Self::PeerRemoved),
            "GetNode" => matches!(self, Self::NodeData),
            "GetConfig" | "ModifyConfig" => matches!(self, Self::ConfigData),
            "TestDDARequest" => matches!(self, Self::TestDdaReply),
            "TestDDAResponse" => matches!(self, Self::TestDdaComplete),
            "ListPersistentRequest" => matches!(
                self,
                Self::PersistentGet
                    | Self::PersistentPut
                    | Self::PersistentPutDir
                    | Self::EndListPersistentRequest
            ),
            _ => false,
        }
    }
}

/// A classified message from the node.
#[derive(Debug, Clone)]
pub struct ServerMessage {
    pub kind: ServerHeader,
    pub message: Message,
}

impl ServerMessage {
    /// Classifies a decoded message. Unknown headers are a protocol
    /// violation.
    pub fn classify(message: Message) -> Result<Self, ProtocolError> {
        match ServerHeader::parse(message.header()) {
            Some(kind) => Ok(Self { kind, message }),
            None => Err(ProtocolError::UnknownServerMessage(
                message.header().to_string(),
            )),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const ALL: &[ServerHeader] = &[
        ServerHeader::NodeHello,
        ServerHeader::CloseConnectionDuplicateName,
        ServerHeader::Peer,
        ServerHeader::PeerNote,
        ServerHeader::PeerRemoved,
        ServerHeader::EndListPeers,
        ServerHeader::EndListPeerNotes,
        ServerHeader::EndListPersistentRequest,
        ServerHeader::NodeData,
        ServerHeader::ConfigData,
        ServerHeader::TestDdaReply,
        ServerHeader::TestDdaComplete,
        ServerHeader::SskKeypair,
        ServerHeader::UriGenerated,
        ServerHeader::StartedCompression,
        ServerHeader::FinishedCompression,
        ServerHeader::SimpleProgress,
        ServerHeader::PutSuccessful,
        ServerHeader::PutFetchable,
        ServerHeader::DataFound,
        ServerHeader::AllData,
        ServerHeader::PutFailed,
        ServerHeader::GetFailed,
        ServerHeader::PersistentGet,
        ServerHeader::PersistentPut,
        ServerHeader::PersistentPutDir,
        ServerHeader::PersistentRequestRemoved,
        ServerHeader::PersistentRequestModified,
        ServerHeader::ProtocolError,
        ServerHeader::IdentifierCollision,
        ServerHeader::UnknownNodeIdentifier,
        ServerHeader::UnknownPeerNoteType,
    ];

    #[test]
    fn test_parse_roundtrips_every_wire_name() {
        for kind in ALL {
            assert_eq!(ServerHeader::parse(kind.wire_name()), Some(*kind));
        }
    }

    #[test]
    fn test_unknown_header_is_rejected() {
        assert_eq!(ServerHeader::parse("FrobnicateQuota"), None);
        let err = ServerMessage::classify(Message::new("FrobnicateQuota"));
        assert!(matches!(
            err,
            Err(ProtocolError::UnknownServerMessage(h)) if h == "FrobnicateQuota"
        ));
    }

    #[test]
    fn test_error_role() {
        assert!(ServerHeader::ProtocolError.is_error());
        assert!(ServerHeader::IdentifierCollision.is_error());
        assert!(ServerHeader::UnknownNodeIdentifier.is_error());
        assert!(ServerHeader::UnknownPeerNoteType.is_error());
        assert!(ServerHeader::PutFailed.is_error());
        assert!(ServerHeader::GetFailed.is_error());
        assert!(!ServerHeader::NodeHello.is_error());
        assert!(!ServerHeader::CloseConnectionDuplicateName.is_error());
        assert!(!ServerHeader::SimpleProgress.is_error());
    }

    #[test]
    fn test_progress_role() {
        for kind in [
            ServerHeader::UriGenerated,
            ServerHeader::StartedCompression,
            ServerHeader::FinishedCompression,
            ServerHeader::SimpleProgress,
        ] {
            assert!(kind.is_progress());
            // progress never terminates anything
            assert!(!kind.terminal_for("ClientPut"));
            assert!(!kind.terminal_for("ClientGet"));
        }
        assert!(!ServerHeader::PutSuccessful.is_progress());
    }

    #[test]
    fn test_peer_is_element_of_list_but_terminal_for_single() {
        assert!(!ServerHeader::Peer.terminal_for("ListPeers"));
        assert!(ServerHeader::Peer.terminal_for("ListPeer"));
        assert!(ServerHeader::Peer.terminal_for("AddPeer"));
        assert!(ServerHeader::Peer.terminal_for("ModifyPeer"));
        assert!(ServerHeader::EndListPeers.terminal_for("ListPeers"));
    }

    #[test]
    fn test_peer_note_roles() {
        assert!(!ServerHeader::PeerNote.terminal_for("ListPeerNotes"));
        assert!(ServerHeader::PeerNote.terminal_for("ModifyPeerNote"));
        assert!(ServerHeader::EndListPeerNotes.terminal_for("ListPeerNotes"));
    }

    #[test]
    fn test_put_get_terminals() {
        assert!(ServerHeader::PutSuccessful.terminal_for("ClientPut"));
        assert!(ServerHeader::PutFetchable.terminal_for("ClientPut"));
        assert!(ServerHeader::PutFailed.terminal_for("ClientPut"));
        assert!(!ServerHeader::PutSuccessful.terminal_for("ClientGet"));
        assert!(ServerHeader::DataFound.terminal_for("ClientGet"));
        assert!(ServerHeader::AllData.terminal_for("ClientGet"));
        assert!(ServerHeader::GetFailed.terminal_for("ClientGet"));
        assert!(!ServerHeader::GetFailed.terminal_for("ClientPut"));
    }

    #[test]
    fn test_errors_terminate_any_request() {
        for kind in [
            ServerHeader::ProtocolError,
            ServerHeader::IdentifierCollision,
            ServerHeader::UnknownNodeIdentifier,
            ServerHeader::UnknownPeerNoteType,
        ] {
            assert!(kind.terminal_for("ClientHello"));
            assert!(kind.terminal_for("ListPeers"));
            assert!(kind.terminal_for("ClientPut"));
            assert!(kind.globally_routable_for("GetConfig"));
        }
    }

    #[test]
    fn test_persistent_list_elements_are_not_terminal() {
        for kind in [
            ServerHeader::PersistentGet,
            ServerHeader::PersistentPut,
            ServerHeader::PersistentPutDir,
        ] {
            assert!(!kind.terminal_for("ListPersistentRequest"));
            assert!(kind.globally_routable_for("ListPersistentRequest"));
        }
        assert!(ServerHeader::EndListPersistentRequest.terminal_for("ListPersistentRequest"));
    }

    #[test]
    fn test_notifications_route_to_sink_only() {
        for kind in [
            ServerHeader::PersistentRequestRemoved,
            ServerHeader::PersistentRequestModified,
        ] {
            assert!(kind.is_notification());
            assert!(!kind.terminal_for("ListPersistentRequest"));
            assert!(!kind.globally_routable_for("ListPersistentRequest"));
        }
    }

    #[test]
    fn test_global_class_table() {
        assert!(ServerHeader::NodeHello.globally_routable_for("ClientHello"));
        assert!(ServerHeader::CloseConnectionDuplicateName.globally_routable_for("ClientHello"));
        assert!(!ServerHeader::NodeHello.globally_routable_for("ListPeers"));
        assert!(ServerHeader::Peer.globally_routable_for("ListPeers"));
        assert!(ServerHeader::Peer.globally_routable_for("RemovePeer"));
        assert!(!ServerHeader::Peer.globally_routable_for("GetConfig"));
        assert!(ServerHeader::ConfigData.globally_routable_for("ModifyConfig"));
        assert!(ServerHeader::TestDdaReply.globally_routable_for("TestDDARequest"));
        assert!(ServerHeader::TestDdaComplete.globally_routable_for("TestDDAResponse"));
        assert!(!ServerHeader::SskKeypair.globally_routable_for("GenerateSSK"));
        assert!(!ServerHeader::PutSuccessful.globally_routable_for("ClientPut"));
    }

    #[test]
    fn test_every_header_has_some_role() {
        for kind in ALL {
            let any = kind.is_error()
                || kind.is_progress()
                || kind.is_notification()
                || [
                    "ClientHello",
                    "ListPeer",
                    "ListPeers",
                    "ListPeerNotes",
                    "AddPeer",
                    "ModifyPeer",
                    "ModifyPeerNote",
                    "RemovePeer",
                    "GetNode",
                    "GetConfig",
                    "ModifyConfig",
                    "TestDDARequest",
                    "TestDDAResponse",
                    "GenerateSSK",
                    "ClientPut",
                    "ClientGet",
                    "ListPersistentRequest",
                ]
                .iter()
                .any(|req| kind.terminal_for(req) || kind.globally_routable_for(req));
            assert!(any, "{:?} classifies to no role", kind);
        }
    }
}
