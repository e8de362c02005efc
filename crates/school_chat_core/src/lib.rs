pub mod chats;
pub mod domain;
pub mod identity;
pub mod memory;
pub mod messages;
pub mod ports;

pub use chats::ChatDirectory;
pub use domain::{
    Chat, ChatRole, ConversationPreview, ExternalUser, Message, MessagePage, MessageQuery,
    Participant, ParticipantPair, SortOrder, UserKind,
};
pub use identity::IdentityResolver;
pub use messages::MessageLog;
pub use ports::{ChatStore, PortError, PortResult, UserDirectory};
