//! Wire types shared by the session gateway and the backend services it talks to.
//!
//! Every RPC crossing the broker is a JSON document addressed to
//! `<service>.<method>`. Backend services link this crate so both ends agree
//! on field names and subject layout.

pub mod error;
pub mod messages;
pub mod subjects;

pub use error::Error;
pub use messages::{
    BroadcastMsgToSessionRequest, ChangeSessionLogicRequest, CloseSessionRequest, EmptyAck,
    RouteLogicMsgRequest, RouteMsgToSessionRequest, SessionOfflineNotice, SessionOnlineReply,
    SessionOnlineRequest,
};
