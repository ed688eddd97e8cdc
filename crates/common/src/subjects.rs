//! Broker subject layout: `<service>.<method>`.

use crate::error::{Error, Result};
use std::fmt;

/// Default name of the session-manager service.
pub const SESSION_MGR: &str = "session_mgr";

pub const SESSION_ONLINE: &str = "session_online";
pub const SESSION_OFFLINE: &str = "session_offline";
pub const ROUTE_LOGIC_MSG: &str = "route_logic_msg";

/// Build the subject for `method` on `service`.
pub fn rpc_subject(service: &str, method: &str) -> String {
    format!("{}.{}", service, method)
}

/// Subscription pattern covering every control-plane method of a gateway.
pub fn control_wildcard(gate_name: &str) -> String {
    format!("{}.*", gate_name)
}

/// Methods a gateway serves to the rest of the cluster.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ControlMethod {
    ChangeSessionLogic,
    CloseSession,
    RouteMsgToSession,
    BroadcastMsgToSession,
}

impl ControlMethod {
    pub const ALL: [ControlMethod; 4] = [
        ControlMethod::ChangeSessionLogic,
        ControlMethod::CloseSession,
        ControlMethod::RouteMsgToSession,
        ControlMethod::BroadcastMsgToSession,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            ControlMethod::ChangeSessionLogic => "change_session_logic",
            ControlMethod::CloseSession => "close_session",
            ControlMethod::RouteMsgToSession => "route_msg_to_session",
            ControlMethod::BroadcastMsgToSession => "broadcast_msg_to_session",
        }
    }

    /// Resolve the method addressed by `subject`, which must belong to `gate_name`.
    pub fn from_subject(gate_name: &str, subject: &str) -> Result<Self> {
        let method = subject
            .strip_prefix(gate_name)
            .and_then(|rest| rest.strip_prefix('.'))
            .ok_or_else(|| Error::UnknownMethod(subject.to_string()))?;
        method.parse()
    }
}

impl std::str::FromStr for ControlMethod {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        ControlMethod::ALL
            .into_iter()
            .find(|m| m.as_str() == s)
            .ok_or_else(|| Error::UnknownMethod(s.to_string()))
    }
}

impl fmt::Display for ControlMethod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}
