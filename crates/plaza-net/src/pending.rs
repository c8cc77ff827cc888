//! Request-id correlated map of in-flight control requests.
//!
//! Each outstanding request records the response shape it expects, so two
//! requests of the same kind (e.g. one `CreateTransport` per direction) never
//! share a slot, and a response of the wrong shape can be detected and
//! dropped without consuming the entry.

use std::collections::HashMap;

use crate::protocol::{ClientRequest, MediaKind, ResponseBody, SctpStreamParameters, TransportDirection};
use crate::RequestId;

/// What a pending request is waiting for.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PendingKind {
    /// `GetCapabilities`.
    Capabilities,
    /// `CreateTransport` for one direction.
    CreateTransport(TransportDirection),
    /// `ConnectTransport` for one direction.
    ConnectTransport(TransportDirection),
    /// `Produce` of one media kind.
    Produce(MediaKind),
    /// `ProduceData` with the parameters it was requested with.
    ProduceData(SctpStreamParameters),
    /// `Join`.
    Join,
}

impl PendingKind {
    /// Kind recorded for an outgoing request.
    pub fn for_request(request: &ClientRequest) -> Self {
        match request {
            ClientRequest::GetCapabilities => PendingKind::Capabilities,
            ClientRequest::CreateTransport { direction } => PendingKind::CreateTransport(*direction),
            ClientRequest::ConnectTransport { direction, .. } => {
                PendingKind::ConnectTransport(*direction)
            }
            ClientRequest::Produce { kind, .. } => PendingKind::Produce(*kind),
            ClientRequest::ProduceData {
                sctp_stream_parameters,
                ..
            } => PendingKind::ProduceData(*sctp_stream_parameters),
            ClientRequest::Join { .. } => PendingKind::Join,
        }
    }

    /// Whether `body` is a valid answer to this request. `Failed` answers
    /// every kind.
    pub fn accepts(&self, body: &ResponseBody) -> bool {
        matches!(
            (self, body),
            (_, ResponseBody::Failed { .. })
                | (PendingKind::Capabilities, ResponseBody::Capabilities(_))
                | (PendingKind::CreateTransport(_), ResponseBody::TransportCreated(_))
                | (PendingKind::ConnectTransport(_), ResponseBody::TransportConnected)
                | (PendingKind::Produce(_), ResponseBody::Produced { .. })
                | (PendingKind::ProduceData(_), ResponseBody::DataProduced { .. })
                | (PendingKind::Join, ResponseBody::Joined { .. })
        )
    }
}

/// Outcome of matching a response against the pending map.
#[derive(Debug, PartialEq, Eq)]
pub enum Correlation {
    /// The entry was removed and is returned.
    Matched(PendingKind),
    /// No request with that id is outstanding.
    Unknown,
    /// The id is outstanding but the body has the wrong shape. The entry is
    /// left in place.
    Mismatched(PendingKind),
}

/// Outstanding requests keyed by [`RequestId`].
#[derive(Debug, Default)]
pub struct PendingRequests {
    next_id: u32,
    entries: HashMap<RequestId, PendingKind>,
}

impl PendingRequests {
    /// Create an empty map.
    pub fn new() -> Self {
        Self::default()
    }

    /// Allocate a fresh id and record what it waits for.
    pub fn register(&mut self, kind: PendingKind) -> RequestId {
        self.next_id = self.next_id.wrapping_add(1);
        let id = RequestId(self.next_id);
        self.entries.insert(id, kind);
        id
    }

    /// Match a response and remove its entry when the shape fits.
    pub fn correlate(&mut self, id: RequestId, body: &ResponseBody) -> Correlation {
        match self.entries.get(&id) {
            None => Correlation::Unknown,
            Some(kind) if !kind.accepts(body) => Correlation::Mismatched(kind.clone()),
            Some(_) => match self.entries.remove(&id) {
                Some(kind) => Correlation::Matched(kind),
                None => Correlation::Unknown,
            },
        }
    }

    /// Number of outstanding requests.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Whether nothing is outstanding.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Drop every outstanding request. Ids keep increasing.
    pub fn clear(&mut self) {
        self.entries.clear();
    }
}
