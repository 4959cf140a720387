use uuid::Uuid;

use parley_shared::{ChannelInfo, ChannelKind, CreateChannelRequest};

use crate::api::ParleyApi;
use crate::error::ClientResult;

/// A channel the user just created locally, before the server assigned it an id.
#[derive(Debug, Clone, PartialEq)]
pub struct PendingChannel {
    /// Stable key for lists while the channel has no server id.
    pub local_id: Uuid,
    pub request: CreateChannelRequest,
}

#[derive(Debug, Clone, PartialEq)]
pub enum ChannelHandle {
    Pending(PendingChannel),
    Persisted(ChannelInfo),
}

impl ChannelHandle {
    pub fn pending(request: CreateChannelRequest) -> Self {
        Self::Pending(PendingChannel {
            local_id: Uuid::new_v4(),
            request,
        })
    }

    /// Server id; `None` until persisted.
    pub fn id(&self) -> Option<Uuid> {
        match self {
            Self::Pending(_) => None,
            Self::Persisted(info) => Some(info.id),
        }
    }

    /// Key that stays valid for list rendering in both states.
    pub fn key(&self) -> Uuid {
        match self {
            Self::Pending(pending) => pending.local_id,
            Self::Persisted(info) => info.id,
        }
    }

    pub fn name(&self) -> &str {
        match self {
            Self::Pending(pending) => &pending.request.name,
            Self::Persisted(info) => &info.name,
        }
    }

    pub fn kind(&self) -> ChannelKind {
        match self {
            Self::Pending(pending) => pending.request.kind,
            Self::Persisted(info) => info.kind,
        }
    }

    pub fn is_pending(&self) -> bool {
        matches!(self, Self::Pending(_))
    }

    /// Swap in the server's record. A persisted handle is left as is.
    pub fn persist(self, info: ChannelInfo) -> Self {
        match self {
            Self::Pending(pending) => {
                tracing::debug!(local_id = %pending.local_id, channel = %info.id, "channel persisted");
                Self::Persisted(info)
            }
            persisted @ Self::Persisted(_) => persisted,
        }
    }

    /// Create a pending channel on the server.
    pub async fn create(self, api: &ParleyApi) -> ClientResult<Self> {
        match self {
            Self::Pending(ref pending) => {
                let info = api.create_channel(&pending.request).await?;
                Ok(self.persist(info))
            }
            persisted @ Self::Persisted(_) => Ok(persisted),
        }
    }
}
